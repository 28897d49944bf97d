use std::fmt::Display;

use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of buffer")]
    UnexpectedEof,
    #[error("varint exceeds {bits}-bit range")]
    VarintOverflow { bits: u32 },
    #[error("invalid discriminant {0}")]
    InvalidDiscriminant(u64),
    #[error("length {0} out of range")]
    LengthOutOfRange(u64),
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
    #[error("invalid char")]
    InvalidChar,
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error("unsupported type: {0}")]
    UnsupportedType(&'static str),
    #[error("{0}")]
    Custom(String),
}

impl serde::ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

impl serde::de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}
