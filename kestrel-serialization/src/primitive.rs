//! Fixed-width values that map directly onto buffer bytes.
//!
//! Every primitive is stored little-endian. `usize`/`isize` are widened to
//! 64 bits so that a checkpoint written on one word size can be read on another.

use crate::error::{SerResult, SerializationError};

/// A value with a fixed on-buffer width.
pub trait Primitive: Sized {
    /// Number of bytes this value occupies in a packed buffer.
    const SIZE: usize;

    /// Name reported in MAP mode.
    const TYPE_NAME: &'static str;

    /// Writes `self` into `out`, which is exactly `SIZE` bytes long.
    fn write_le(&self, out: &mut [u8]);

    /// Reads a value from `bytes`, which is exactly `SIZE` bytes long.
    fn read_le(bytes: &[u8]) -> SerResult<Self>;

    /// Human readable rendering used by MAP mode.
    fn map_value(&self) -> String;
}

macro_rules! le_primitive {
    ($($t:ty),* $(,)?) => {
        $(
            impl Primitive for $t {
                const SIZE: usize = std::mem::size_of::<$t>();
                const TYPE_NAME: &'static str = stringify!($t);

                #[inline]
                fn write_le(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> SerResult<Self> {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    Ok(<$t>::from_le_bytes(raw))
                }

                fn map_value(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

le_primitive!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl Primitive for usize {
    const SIZE: usize = 8;
    const TYPE_NAME: &'static str = "usize";

    #[inline]
    fn write_le(&self, out: &mut [u8]) {
        (*self as u64).write_le(out);
    }

    #[inline]
    fn read_le(bytes: &[u8]) -> SerResult<Self> {
        Ok(u64::read_le(bytes)? as usize)
    }

    fn map_value(&self) -> String {
        self.to_string()
    }
}

impl Primitive for isize {
    const SIZE: usize = 8;
    const TYPE_NAME: &'static str = "isize";

    #[inline]
    fn write_le(&self, out: &mut [u8]) {
        (*self as i64).write_le(out);
    }

    #[inline]
    fn read_le(bytes: &[u8]) -> SerResult<Self> {
        Ok(i64::read_le(bytes)? as isize)
    }

    fn map_value(&self) -> String {
        self.to_string()
    }
}

impl Primitive for bool {
    const SIZE: usize = 1;
    const TYPE_NAME: &'static str = "bool";

    #[inline]
    fn write_le(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }

    #[inline]
    fn read_le(bytes: &[u8]) -> SerResult<Self> {
        match bytes[0] {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(SerializationError::InvalidTag {
                what: "bool",
                tag: u32::from(tag),
            }),
        }
    }

    fn map_value(&self) -> String {
        self.to_string()
    }
}

impl Primitive for char {
    const SIZE: usize = 4;
    const TYPE_NAME: &'static str = "char";

    #[inline]
    fn write_le(&self, out: &mut [u8]) {
        u32::from(*self).write_le(out);
    }

    #[inline]
    fn read_le(bytes: &[u8]) -> SerResult<Self> {
        let raw = u32::read_le(bytes)?;
        char::from_u32(raw).ok_or(SerializationError::InvalidTag {
            what: "char",
            tag: raw,
        })
    }

    fn map_value(&self) -> String {
        self.to_string()
    }
}
