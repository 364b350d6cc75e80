//! Four-mode traversal engine.
//!
//! A [`Serializer`] is switched into exactly one [`SerializerMode`] before a
//! traversal and stays there until the next `start_*` call. Types describe
//! themselves once through [`Visit`]; the engine decides whether that
//! description sizes, packs, unpacks or maps them. SIZER, PACK and UNPACK must
//! see the same fields in the same order, which is why the description is
//! shared rather than written per mode.

use std::any::type_name;
use std::mem;
use std::sync::Arc;

use tracing::trace;

use crate::buffer::BufferAccessor;
use crate::error::{SerResult, SerializationError};
use crate::object_map::{ObjectMap, ObjectMapBuilder};
use crate::pointer::PointerTables;
use crate::primitive::Primitive;
use crate::registry::SerializableRegistry;

/// Largest element count accepted for a container of zero-sized values.
pub const MAX_ZERO_SIZED_ELEMENTS: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerializerMode {
    /// Count the bytes a PACK pass would need.
    Sizer,
    /// Write each visited value into the buffer.
    Pack,
    /// Read each visited value back out of the buffer.
    Unpack,
    /// Build an [`ObjectMap`] for tooling.
    Map,
}

/// Mode-independent description of how a value is traversed.
pub trait Visit {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()>;
}

pub struct Serializer {
    mode: SerializerMode,
    sized: usize,
    buffer: BufferAccessor,
    pointers: PointerTables,
    mapper: ObjectMapBuilder,
    registry: Arc<SerializableRegistry>,
}

impl Serializer {
    /// Creates a serializer that reconstructs polymorphic objects through
    /// `registry`. Starts in SIZER mode.
    pub fn new(registry: Arc<SerializableRegistry>) -> Self {
        Self {
            mode: SerializerMode::Sizer,
            sized: 0,
            buffer: BufferAccessor::new(),
            pointers: PointerTables::default(),
            mapper: ObjectMapBuilder::default(),
            registry,
        }
    }

    pub fn mode(&self) -> SerializerMode {
        self.mode
    }

    pub fn registry(&self) -> &Arc<SerializableRegistry> {
        &self.registry
    }

    pub fn start_sizing(&mut self) {
        self.begin(SerializerMode::Sizer);
        self.buffer.clear();
        self.sized = 0;
    }

    /// Packs into a fresh zeroed buffer of exactly `capacity` bytes.
    pub fn start_packing(&mut self, capacity: usize) {
        self.begin(SerializerMode::Pack);
        self.buffer.init(vec![0; capacity]);
    }

    pub fn start_unpacking(&mut self, bytes: Vec<u8>) {
        self.begin(SerializerMode::Unpack);
        self.buffer.init(bytes);
    }

    pub fn start_mapping(&mut self, root_name: &str) {
        self.begin(SerializerMode::Map);
        self.buffer.clear();
        self.mapper.start(root_name);
    }

    fn begin(&mut self, mode: SerializerMode) {
        trace!(?mode, "serializer traversal started");
        self.mode = mode;
        self.pointers.reset();
    }

    /// Bytes counted (SIZER) or consumed (PACK/UNPACK) so far.
    pub fn size(&self) -> usize {
        match self.mode {
            SerializerMode::Sizer => self.sized,
            SerializerMode::Pack | SerializerMode::Unpack => self.buffer.size(),
            SerializerMode::Map => 0,
        }
    }

    /// Bytes left to read during UNPACK.
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    /// Ends a PACK traversal and hands back the bytes written.
    pub fn finish_packing(&mut self) -> SerResult<Vec<u8>> {
        self.expect_mode(SerializerMode::Pack)?;
        Ok(self.buffer.take_used())
    }

    /// Ends a MAP traversal and hands back the finished tree.
    pub fn finish_mapping(&mut self) -> SerResult<ObjectMap> {
        self.expect_mode(SerializerMode::Map)?;
        self.mapper
            .finish()
            .ok_or(SerializationError::ModeMismatch {
                expected: SerializerMode::Map,
                actual: self.mode,
            })
    }

    fn expect_mode(&self, expected: SerializerMode) -> SerResult<()> {
        if self.mode == expected {
            Ok(())
        } else {
            Err(SerializationError::ModeMismatch {
                expected,
                actual: self.mode,
            })
        }
    }

    /// Traverses `value` in the current mode.
    #[inline]
    pub fn visit<T: Visit + ?Sized>(&mut self, value: &mut T) -> SerResult<()> {
        value.visit(self)
    }

    /// Traverses `value` under `name`. Names only matter in MAP mode.
    pub fn field<T: Visit + ?Sized>(&mut self, name: &str, value: &mut T) -> SerResult<()> {
        if self.mode != SerializerMode::Map {
            return value.visit(self);
        }
        self.mapper.push(name, type_name::<T>());
        let result = value.visit(self);
        self.mapper.pop();
        result
    }

    /// Sizes, packs, unpacks or maps one fixed-width value.
    pub fn primitive<P: Primitive>(&mut self, value: &mut P) -> SerResult<()> {
        match self.mode {
            SerializerMode::Sizer => self.sized += P::SIZE,
            SerializerMode::Pack => value.write_le(self.buffer.next::<P>()?),
            SerializerMode::Unpack => *value = P::read_le(self.buffer.next::<P>()?)?,
            SerializerMode::Map => self.mapper.set_value(P::TYPE_NAME, value.map_value()),
        }
        Ok(())
    }

    /// Visits a container's element count.
    ///
    /// SIZER/PACK record `current`; UNPACK returns the count read from the
    /// buffer; MAP leaves the count implicit in the entries.
    pub fn container_len(&mut self, current: usize) -> SerResult<usize> {
        let mut len = current as u64;
        if self.mode != SerializerMode::Map {
            self.primitive(&mut len)?;
        }
        Ok(len as usize)
    }

    /// [`Self::container_len`] for a container of `T`.
    ///
    /// On UNPACK the count is checked against what the rest of the buffer can
    /// hold before any element is rebuilt: a sized element takes at least one
    /// byte, and zero-sized elements are capped at [`MAX_ZERO_SIZED_ELEMENTS`].
    pub fn element_count<T>(&mut self, current: usize) -> SerResult<usize> {
        let len = self.container_len(current)?;
        if self.mode != SerializerMode::Unpack {
            return Ok(len);
        }
        let limit = if mem::size_of::<T>() == 0 {
            MAX_ZERO_SIZED_ELEMENTS
        } else {
            self.remaining()
        };
        if len > limit {
            return Err(SerializationError::BufferOverrun {
                max_size: self.buffer.max_size(),
                requested: self.buffer.size().saturating_add(len),
            });
        }
        Ok(len)
    }

    /// Length-prefixed raw byte run.
    pub fn bytes(&mut self, data: &mut Vec<u8>) -> SerResult<()> {
        if self.mode == SerializerMode::Map {
            self.mapper.set_value("bytes", hex::encode(data.as_slice()));
            return Ok(());
        }
        let len = self.container_len(data.len())?;
        match self.mode {
            SerializerMode::Sizer => self.sized += len,
            SerializerMode::Pack => self.buffer.next_str(len)?.copy_from_slice(data),
            SerializerMode::Unpack => {
                let raw = self.buffer.next_str(len)?;
                data.clear();
                data.extend_from_slice(raw);
            }
            SerializerMode::Map => {}
        }
        Ok(())
    }

    /// Length-prefixed UTF-8 string.
    pub fn string(&mut self, value: &mut String) -> SerResult<()> {
        if self.mode == SerializerMode::Map {
            self.mapper.set_value("String", value.clone());
            return Ok(());
        }
        let mut raw = std::mem::take(value).into_bytes();
        let result = self.bytes(&mut raw);
        match (self.mode, result) {
            (SerializerMode::Unpack, Ok(())) => {
                *value = String::from_utf8(raw)?;
                Ok(())
            }
            (_, result) => {
                // PACK/SIZER only borrowed the bytes; put them back untouched
                *value = String::from_utf8(raw)?;
                result
            }
        }
    }

    pub(crate) fn pointers_mut(&mut self) -> &mut PointerTables {
        &mut self.pointers
    }

    pub(crate) fn mapper_mut(&mut self) -> &mut ObjectMapBuilder {
        &mut self.mapper
    }
}

impl std::fmt::Debug for Serializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializer")
            .field("mode", &self.mode)
            .field("size", &self.size())
            .field("max_size", &self.buffer.max_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serializer() -> Serializer {
        Serializer::new(Arc::new(SerializableRegistry::new()))
    }

    #[derive(Debug, Default, PartialEq)]
    struct Sample {
        id: u32,
        weight: f64,
        label: String,
        blob: Vec<u8>,
    }

    impl Visit for Sample {
        fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
            ser.field("id", &mut self.id)?;
            ser.field("weight", &mut self.weight)?;
            ser.field("label", &mut self.label)?;
            ser.bytes(&mut self.blob)
        }
    }

    fn sample() -> Sample {
        Sample {
            id: 9,
            weight: 0.25,
            label: "edge".into(),
            blob: vec![1, 2, 3],
        }
    }

    #[test]
    fn sizer_counts_what_pack_writes() {
        let mut ser = serializer();
        let mut value = sample();
        ser.start_sizing();
        ser.visit(&mut value).unwrap();
        // u32 + f64 + (len + 4) + (len + 3)
        assert_eq!(ser.size(), 4 + 8 + 8 + 4 + 8 + 3);

        let size = ser.size();
        ser.start_packing(size);
        ser.visit(&mut value).unwrap();
        assert_eq!(ser.finish_packing().unwrap().len(), size);
    }

    #[test]
    fn pack_then_unpack_restores_fields() {
        let mut ser = serializer();
        let mut value = sample();
        ser.start_sizing();
        ser.visit(&mut value).unwrap();
        ser.start_packing(ser.size());
        ser.visit(&mut value).unwrap();
        let bytes = ser.finish_packing().unwrap();

        let mut restored = Sample::default();
        ser.start_unpacking(bytes);
        ser.visit(&mut restored).unwrap();
        assert_eq!(restored, value);
        assert_eq!(ser.remaining(), 0);
    }

    #[test]
    fn packing_into_short_buffer_overruns() {
        let mut ser = serializer();
        let mut value = sample();
        ser.start_sizing();
        ser.visit(&mut value).unwrap();
        let size = ser.size();

        ser.start_packing(size - 1);
        assert!(matches!(
            ser.visit(&mut value),
            Err(SerializationError::BufferOverrun { .. })
        ));
    }

    #[test]
    fn truncated_input_overruns_on_unpack() {
        let mut ser = serializer();
        ser.start_unpacking(vec![0, 0]);
        let mut value = 0u32;
        assert!(matches!(
            ser.visit(&mut value),
            Err(SerializationError::BufferOverrun { max_size: 2, .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut ser = serializer();
        let mut bytes = vec![2, 0, 0, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(&[0xff, 0xfe]);
        ser.start_unpacking(bytes);
        let mut text = String::new();
        assert!(matches!(
            ser.visit(&mut text),
            Err(SerializationError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn map_mode_names_fields() {
        let mut ser = serializer();
        let mut value = sample();
        ser.start_mapping("sample");
        ser.visit(&mut value).unwrap();
        let map = ser.finish_mapping().unwrap();
        assert_eq!(map.lookup("id").and_then(ObjectMap::value), Some("9"));
        assert_eq!(map.lookup("label").and_then(ObjectMap::value), Some("edge"));
        assert_eq!(map.lookup("weight").and_then(ObjectMap::type_name), Some("f64"));
    }

    #[test]
    fn finishing_in_the_wrong_mode_fails() {
        let mut ser = serializer();
        ser.start_sizing();
        assert!(matches!(
            ser.finish_packing(),
            Err(SerializationError::ModeMismatch {
                expected: SerializerMode::Pack,
                actual: SerializerMode::Sizer
            })
        ));
        assert!(ser.finish_mapping().is_err());
    }
}
