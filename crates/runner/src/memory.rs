//! Bounds-checked access to guest linear memory.

use std::ops::Range;

use wasmtime::{AsContext, AsContextMut, Caller, Instance, Memory};

use crate::error::{Error, Result};

/// Convert a guest pointer or length to an unsigned offset.
///
/// # Errors
/// Negative values are reported as out-of-bounds accesses.
pub fn guest_offset(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::MemoryBounds {
        offset: 0,
        len: 0,
        size: 0,
    })
}

/// The exported linear memory of a guest instance.
#[derive(Debug, Clone, Copy)]
pub struct GuestMemory {
    memory: Memory,
}

impl GuestMemory {
    pub const EXPORT_NAME: &'static str = "memory";

    #[must_use]
    pub const fn from_memory(memory: Memory) -> Self {
        Self { memory }
    }

    /// # Errors
    /// Returns [`Error::Link`] if the guest exports no memory.
    pub fn from_caller<T>(caller: &mut Caller<'_, T>) -> Result<Self> {
        caller
            .get_export(Self::EXPORT_NAME)
            .and_then(wasmtime::Extern::into_memory)
            .map(|memory| Self { memory })
            .ok_or_else(|| Error::link(Self::EXPORT_NAME, "guest exports no linear memory"))
    }

    /// # Errors
    /// Returns [`Error::Link`] if the guest exports no memory.
    pub fn from_instance(instance: &Instance, store: impl AsContextMut) -> Result<Self> {
        instance
            .get_memory(store, Self::EXPORT_NAME)
            .map(|memory| Self { memory })
            .ok_or_else(|| Error::link(Self::EXPORT_NAME, "guest exports no linear memory"))
    }

    #[must_use]
    pub fn size(&self, store: impl AsContext) -> usize {
        self.memory.data_size(store)
    }

    fn range(offset: u32, len: u32, size: usize) -> Result<Range<usize>> {
        let start = offset as usize;
        start
            .checked_add(len as usize)
            .filter(|end| *end <= size)
            .map(|end| start..end)
            .ok_or(Error::MemoryBounds {
                offset: u64::from(offset),
                len: u64::from(len),
                size,
            })
    }

    /// # Errors
    /// Fails if the range lies outside linear memory.
    pub fn read_bytes(&self, store: impl AsContext, offset: u32, len: u32) -> Result<Vec<u8>> {
        let data = self.memory.data(&store);
        let range = Self::range(offset, len, data.len())?;
        Ok(data[range].to_vec())
    }

    /// # Errors
    /// Fails if the range lies outside linear memory or is not UTF-8.
    pub fn read_str(&self, store: impl AsContext, offset: u32, len: u32) -> Result<String> {
        String::from_utf8(self.read_bytes(store, offset, len)?)
            .map_err(|_| Error::Decode(sourcebridge_codec::Error::InvalidUtf8))
    }

    /// Read a little-endian `u32`.
    ///
    /// # Errors
    /// Fails if the value lies outside linear memory.
    pub fn read_u32(&self, store: impl AsContext, offset: u32) -> Result<u32> {
        let data = self.memory.data(&store);
        let range = Self::range(offset, 4, data.len())?;
        let mut buf = [0_u8; 4];
        buf.copy_from_slice(&data[range]);
        Ok(u32::from_le_bytes(buf))
    }

    /// Read `count` little-endian `i32` values.
    ///
    /// # Errors
    /// Fails if the array lies outside linear memory.
    pub fn read_i32s(&self, store: impl AsContext, offset: u32, count: u32) -> Result<Vec<i32>> {
        let len = count.checked_mul(4).ok_or(Error::MemoryBounds {
            offset: u64::from(offset),
            len: u64::from(count) * 4,
            size: self.size(&store),
        })?;
        let bytes = self.read_bytes(store, offset, len)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// # Errors
    /// Fails if the range lies outside linear memory.
    pub fn write_bytes(&self, mut store: impl AsContextMut, offset: u32, bytes: &[u8]) -> Result<()> {
        let data = self.memory.data_mut(&mut store);
        let len = u32::try_from(bytes.len()).map_err(|_| Error::MemoryBounds {
            offset: u64::from(offset),
            len: bytes.len() as u64,
            size: data.len(),
        })?;
        let range = Self::range(offset, len, data.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Write `values` as little-endian `i32`s.
    ///
    /// # Errors
    /// Fails if the array lies outside linear memory.
    pub fn write_i32s(&self, store: impl AsContextMut, offset: u32, values: &[i32]) -> Result<()> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.write_bytes(store, offset, &bytes)
    }
}
