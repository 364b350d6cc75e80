//! Bounds-checked cursor over a fixed-capacity byte region.
//!
//! Shared by PACK (writes through the returned slices) and UNPACK (reads from
//! them). The capacity is fixed when the buffer is attached; every advance is
//! checked against it so an oversized write can never spill past the end.

use crate::error::{SerResult, SerializationError};
use crate::primitive::Primitive;

#[derive(Debug, Default)]
pub struct BufferAccessor {
    buf: Vec<u8>,
    size: usize,
    max_size: usize,
}

impl BufferAccessor {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            size: 0,
            max_size: 0,
        }
    }

    /// Creates an accessor over a zeroed region of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut accessor = Self::new();
        accessor.init(vec![0; capacity]);
        accessor
    }

    /// Attaches `buf`; its current length becomes the maximum size.
    pub fn init(&mut self, buf: Vec<u8>) {
        self.max_size = buf.len();
        self.buf = buf;
        self.reset();
    }

    /// Advances by the packed width of `T` and returns the bytes it covers.
    #[inline]
    pub fn next<T: Primitive>(&mut self) -> SerResult<&mut [u8]> {
        self.next_str(T::SIZE)
    }

    /// Advances by `len` raw bytes and returns the bytes covered.
    ///
    /// Fails with [`SerializationError::BufferOverrun`] without moving the
    /// cursor when the advance would pass the configured maximum.
    pub fn next_str(&mut self, len: usize) -> SerResult<&mut [u8]> {
        let start = self.size;
        let end = match start.checked_add(len) {
            Some(end) if end <= self.max_size => end,
            _ => {
                return Err(SerializationError::BufferOverrun {
                    max_size: self.max_size,
                    requested: start.saturating_add(len),
                })
            }
        };
        self.size = end;
        Ok(&mut self.buf[start..end])
    }

    /// Bytes consumed since the last reset.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn remaining(&self) -> usize {
        self.max_size - self.size
    }

    /// Rewinds the cursor; the capacity is unchanged.
    pub fn reset(&mut self) {
        self.size = 0;
    }

    /// Drops the buffer association entirely.
    pub fn clear(&mut self) {
        self.buf = Vec::new();
        self.size = 0;
        self.max_size = 0;
    }

    /// Detaches and returns the underlying buffer truncated to the bytes used.
    pub fn take_used(&mut self) -> Vec<u8> {
        let used = self.size;
        let mut buf = std::mem::take(&mut self.buf);
        buf.truncate(used);
        self.clear();
        buf
    }
}
