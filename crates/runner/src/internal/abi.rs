//! Result buffers returned by guest entry points.
//!
//! A non-negative return value points at a buffer whose first `u32` is the
//! total length including an 8-byte header; the payload follows the header.
//! A length of `u32::MAX` marks an error message instead: the `u32` at offset
//! 8 is the message length plus 12 and the UTF-8 text starts at offset 12.

use wasmtime::{AsContext, Store, TypedFunc};

use crate::{
    error::{Error, Result},
    memory::GuestMemory,
    state::HostState,
};

pub const HEADER_LEN: u32 = 8;
const MESSAGE_MARKER: u32 = u32::MAX;
const MESSAGE_HEADER_LEN: u32 = 12;

#[derive(Debug, PartialEq, Eq)]
pub enum GuestResult {
    Payload(Vec<u8>),
    Message(String),
}

fn malformed(ptr: u32, len: u32, memory: &GuestMemory, store: impl AsContext) -> Error {
    Error::MemoryBounds {
        offset: u64::from(ptr),
        len: u64::from(len),
        size: memory.size(store),
    }
}

fn offset(ptr: u32, by: u32, memory: &GuestMemory, store: impl AsContext) -> Result<u32> {
    ptr.checked_add(by)
        .ok_or_else(|| malformed(ptr, by, memory, store))
}

/// Read a length-prefixed buffer: payload of `length - 8` bytes at `ptr + 8`.
///
/// # Errors
/// Fails when the header is shorter than itself or the payload lies outside
/// linear memory.
pub fn read_framed(memory: &GuestMemory, store: impl AsContext, ptr: u32) -> Result<Vec<u8>> {
    let len = memory.read_u32(&store, ptr)?;
    let payload_len = len
        .checked_sub(HEADER_LEN)
        .ok_or_else(|| malformed(ptr, len, memory, &store))?;
    let start = offset(ptr, HEADER_LEN, memory, &store)?;
    memory.read_bytes(store, start, payload_len)
}

/// Interpret the result buffer at `ptr`.
///
/// # Errors
/// Fails when the buffer lies outside linear memory.
pub fn read_result(memory: &GuestMemory, store: impl AsContext, ptr: u32) -> Result<GuestResult> {
    let len = memory.read_u32(&store, ptr)?;
    if len != MESSAGE_MARKER {
        return read_framed(memory, store, ptr).map(GuestResult::Payload);
    }
    let total = memory.read_u32(&store, offset(ptr, HEADER_LEN, memory, &store)?)?;
    let message_len = total
        .checked_sub(MESSAGE_HEADER_LEN)
        .ok_or_else(|| malformed(ptr, total, memory, &store))?;
    let start = offset(ptr, MESSAGE_HEADER_LEN, memory, &store)?;
    let text = memory.read_bytes(store, start, message_len)?;
    Ok(GuestResult::Message(
        String::from_utf8_lossy(&text).into_owned(),
    ))
}

/// A result buffer the guest still owns.
///
/// The buffer is handed back through `free_result` exactly once: by
/// [`ResultBuffer::release`], or on drop if the caller bailed out earlier.
pub struct ResultBuffer<'a> {
    store: &'a mut Store<HostState>,
    free: TypedFunc<i32, ()>,
    ptr: i32,
    released: bool,
}

impl<'a> ResultBuffer<'a> {
    pub fn new(store: &'a mut Store<HostState>, free: TypedFunc<i32, ()>, ptr: i32) -> Self {
        Self {
            store,
            free,
            ptr,
            released: false,
        }
    }

    pub fn read(&self, memory: &GuestMemory) -> Result<GuestResult> {
        let ptr = u32::try_from(self.ptr).map_err(|_| malformed(0, 0, memory, &*self.store))?;
        read_result(memory, &*self.store, ptr)
    }

    pub fn release(mut self) -> wasmtime::Result<()> {
        self.released = true;
        self.free.call(&mut *self.store, self.ptr)
    }
}

impl Drop for ResultBuffer<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(error) = self.free.call(&mut *self.store, self.ptr)
        {
            tracing::warn!(ptr = self.ptr, %error, "free_result failed");
        }
    }
}
