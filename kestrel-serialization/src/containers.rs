//! Traversal rules for standard library values.
//!
//! Collections visit their element count and then each element in iteration
//! order. UNPACK reads the count and rebuilds the elements one at a time. In
//! MAP mode the count is implicit and elements are named by index.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{
    AtomicBool, AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicIsize, AtomicU16, AtomicU32,
    AtomicU64, AtomicU8, AtomicUsize, Ordering,
};

use bytes::Bytes;

use crate::error::SerResult;
use crate::serializer::{Serializer, SerializerMode, Visit};

macro_rules! visit_primitive {
    ($($t:ty),* $(,)?) => {
        $(
            impl Visit for $t {
                #[inline]
                fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
                    ser.primitive(self)
                }
            }
        )*
    };
}

visit_primitive!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char
);

// Only the contained value is visited; the atomic wrapper has no encoding.
macro_rules! visit_atomic {
    ($($atomic:ty => $inner:ty),* $(,)?) => {
        $(
            impl Visit for $atomic {
                fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
                    let mut value: $inner = self.load(Ordering::SeqCst);
                    ser.primitive(&mut value)?;
                    if ser.mode() == SerializerMode::Unpack {
                        self.store(value, Ordering::SeqCst);
                    }
                    Ok(())
                }
            }
        )*
    };
}

visit_atomic!(
    AtomicBool => bool,
    AtomicU8 => u8,
    AtomicU16 => u16,
    AtomicU32 => u32,
    AtomicU64 => u64,
    AtomicUsize => usize,
    AtomicI8 => i8,
    AtomicI16 => i16,
    AtomicI32 => i32,
    AtomicI64 => i64,
    AtomicIsize => isize,
);

impl Visit for String {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        ser.string(self)
    }
}

impl Visit for Bytes {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        let mut raw = self.to_vec();
        ser.bytes(&mut raw)?;
        if ser.mode() == SerializerMode::Unpack {
            *self = Bytes::from(raw);
        }
        Ok(())
    }
}

impl Visit for () {
    fn visit(&mut self, _ser: &mut Serializer) -> SerResult<()> {
        Ok(())
    }
}

fn visit_indexed<'a, T, I>(ser: &mut Serializer, items: I) -> SerResult<()>
where
    T: Visit + 'a,
    I: Iterator<Item = &'a mut T>,
{
    for (index, item) in items.enumerate() {
        ser.field(&index.to_string(), item)?;
    }
    Ok(())
}

impl<T: Visit + Default> Visit for Vec<T> {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        let len = ser.element_count::<T>(self.len())?;
        if ser.mode() != SerializerMode::Unpack {
            return visit_indexed(ser, self.iter_mut());
        }
        self.clear();
        for _ in 0..len {
            let mut item = T::default();
            item.visit(ser)?;
            self.push(item);
        }
        Ok(())
    }
}

impl<T: Visit + Default> Visit for VecDeque<T> {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        let len = ser.element_count::<T>(self.len())?;
        if ser.mode() != SerializerMode::Unpack {
            return visit_indexed(ser, self.iter_mut());
        }
        self.clear();
        for _ in 0..len {
            let mut item = T::default();
            item.visit(ser)?;
            self.push_back(item);
        }
        Ok(())
    }
}

impl<T: Visit, const N: usize> Visit for [T; N] {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        // fixed length, no count on the wire
        visit_indexed(ser, self.iter_mut())
    }
}

// Set elements cannot be borrowed mutably, so SIZER/PACK/MAP visit a copy.
fn visit_set_elements<'a, T, I>(ser: &mut Serializer, items: I) -> SerResult<()>
where
    T: Visit + Clone + 'a,
    I: Iterator<Item = &'a T>,
{
    for (index, item) in items.enumerate() {
        let mut copy = item.clone();
        ser.field(&index.to_string(), &mut copy)?;
    }
    Ok(())
}

impl<T: Visit + Clone + Default + Ord> Visit for BTreeSet<T> {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        let len = ser.element_count::<T>(self.len())?;
        if ser.mode() != SerializerMode::Unpack {
            return visit_set_elements(ser, self.iter());
        }
        self.clear();
        for _ in 0..len {
            let mut item = T::default();
            item.visit(ser)?;
            self.insert(item);
        }
        Ok(())
    }
}

impl<T: Visit + Clone + Default + Eq + Hash> Visit for HashSet<T> {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        let len = ser.element_count::<T>(self.len())?;
        if ser.mode() != SerializerMode::Unpack {
            return visit_set_elements(ser, self.iter());
        }
        self.clear();
        self.reserve(len.min(ser.remaining()));
        for _ in 0..len {
            let mut item = T::default();
            item.visit(ser)?;
            self.insert(item);
        }
        Ok(())
    }
}

fn visit_entries<'a, K, V, I>(ser: &mut Serializer, entries: I) -> SerResult<()>
where
    K: Visit + Clone + 'a,
    V: Visit + 'a,
    I: Iterator<Item = (&'a K, &'a mut V)>,
{
    let mapping = ser.mode() == SerializerMode::Map;
    for (index, (key, value)) in entries.enumerate() {
        let mut key = key.clone();
        if mapping {
            ser.mapper_mut().push(&index.to_string(), "entry");
            let result = ser
                .field("key", &mut key)
                .and_then(|()| ser.field("value", value));
            ser.mapper_mut().pop();
            result?;
        } else {
            key.visit(ser)?;
            value.visit(ser)?;
        }
    }
    Ok(())
}

impl<K, V> Visit for BTreeMap<K, V>
where
    K: Visit + Clone + Default + Ord,
    V: Visit + Default,
{
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        let len = ser.element_count::<(K, V)>(self.len())?;
        if ser.mode() != SerializerMode::Unpack {
            return visit_entries(ser, self.iter_mut());
        }
        self.clear();
        for _ in 0..len {
            let mut key = K::default();
            let mut value = V::default();
            key.visit(ser)?;
            value.visit(ser)?;
            self.insert(key, value);
        }
        Ok(())
    }
}

impl<K, V> Visit for HashMap<K, V>
where
    K: Visit + Clone + Default + Eq + Hash,
    V: Visit + Default,
{
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        let len = ser.element_count::<(K, V)>(self.len())?;
        if ser.mode() != SerializerMode::Unpack {
            return visit_entries(ser, self.iter_mut());
        }
        self.clear();
        self.reserve(len.min(ser.remaining()));
        for _ in 0..len {
            let mut key = K::default();
            let mut value = V::default();
            key.visit(ser)?;
            value.visit(ser)?;
            self.insert(key, value);
        }
        Ok(())
    }
}

impl<T: Visit + Default> Visit for Option<T> {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        if ser.mode() == SerializerMode::Map {
            return match self {
                Some(inner) => inner.visit(ser),
                None => {
                    ser.mapper_mut().set_value("Option", "None".to_owned());
                    Ok(())
                }
            };
        }
        let mut present = self.is_some();
        ser.primitive(&mut present)?;
        match (ser.mode(), present) {
            (SerializerMode::Unpack, false) => *self = None,
            (SerializerMode::Unpack, true) => {
                let mut inner = T::default();
                inner.visit(ser)?;
                *self = Some(inner);
            }
            _ => {
                if let Some(inner) = self {
                    inner.visit(ser)?;
                }
            }
        }
        Ok(())
    }
}

impl<T: Visit> Visit for Box<T> {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        (**self).visit(ser)
    }
}

impl<A: Visit, B: Visit> Visit for (A, B) {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        ser.field("0", &mut self.0)?;
        ser.field("1", &mut self.1)
    }
}

impl<A: Visit, B: Visit, C: Visit> Visit for (A, B, C) {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        ser.field("0", &mut self.0)?;
        ser.field("1", &mut self.1)?;
        ser.field("2", &mut self.2)
    }
}
