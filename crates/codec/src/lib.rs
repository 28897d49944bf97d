//! Positional binary codec shared byte-for-byte with guest modules.
//!
//! Values are encoded by walking their type: the decoder must be given the
//! same type the encoder saw. Integers wider than a byte are varints (signed
//! ones zig-zag mapped first), floats are little-endian IEEE-754, strings and
//! collections carry a varint length, options a presence byte, and enums a
//! one-byte variant index.

mod de;
mod error;
mod ser;
pub mod varint;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use de::{Deserializer, MAX_UNBACKED_COUNT};
pub use error::{Error, Result};
pub use ser::Serializer;

/// Encode a value.
///
/// # Errors
/// Returns an error for values the format cannot express (sequences of
/// unknown length, enums with more than 256 variants).
pub fn to_bytes<T: ?Sized + Serialize>(value: &T) -> Result<Bytes> {
    let mut serializer = Serializer::new();
    value.serialize(&mut serializer)?;
    Ok(serializer.into_inner().freeze())
}

/// Decode a value that must span the entire buffer.
///
/// # Errors
/// Returns an error on truncated input, out-of-range lengths, unknown
/// discriminants or leftover bytes.
pub fn from_bytes<'de, T: Deserialize<'de>>(input: &'de [u8]) -> Result<T> {
    let (value, rest) = take_from_bytes(input)?;
    if !rest.is_empty() {
        return Err(Error::TrailingBytes(rest.len()));
    }
    Ok(value)
}

/// Decode one value from the front of the buffer and return the remainder.
///
/// # Errors
/// Returns an error on truncated input, out-of-range lengths or unknown
/// discriminants.
pub fn take_from_bytes<'de, T: Deserialize<'de>>(input: &'de [u8]) -> Result<(T, &'de [u8])> {
    let mut deserializer = Deserializer::from_slice(input);
    let value = T::deserialize(&mut deserializer)?;
    Ok((value, deserializer.remaining()))
}
