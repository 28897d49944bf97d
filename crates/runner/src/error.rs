use std::time::Duration;

use thiserror::Error;

use crate::host::BoxError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Arena lookups that failed to produce the expected resource.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("no resource stored under handle {0}")]
    Missing(i32),

    #[error("handle {handle} holds {found}, expected {expected}")]
    WrongKind {
        handle: i32,
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    /// The guest does not implement the requested entry point.
    #[error("unimplemented")]
    Unimplemented,

    /// The guest reported a transport failure while serving the call.
    #[error("network error")]
    Transport,

    /// The guest returned a negative value without a more specific meaning.
    #[error("missing result")]
    MissingResult,

    /// The guest failed with a message of its own.
    #[error("{0}")]
    Message(String),

    #[error("decode error: {0}")]
    Decode(#[source] sourcebridge_codec::Error),

    #[error("encode error: {0}")]
    Encode(#[source] sourcebridge_codec::Error),

    /// A required export or import could not be resolved.
    #[error("link error: {name}: {reason}")]
    Link { name: String, reason: String },

    /// Guest memory access outside the current linear memory.
    #[error("memory access out of bounds: offset {offset}, length {len}, memory size {size}")]
    MemoryBounds { offset: u64, len: u64, size: usize },

    #[error(transparent)]
    Arena(#[from] ArenaError),

    /// Wasmtime engine error (compilation, instantiation, trap).
    #[error("wasm error: {0}")]
    Wasm(#[source] anyhow::Error),

    /// The call exceeded its configured deadline.
    #[error("call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Embedder-supplied host returned an error (type-erased).
    #[error("host error: {0}")]
    Host(#[source] BoxError),

    /// A blocking worker panicked or was cancelled.
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// No async runtime was available to run bridged work.
    #[error("async runtime unavailable")]
    RuntimeShutdown,
}

impl Error {
    /// Map a negative guest return value onto the error taxonomy.
    #[must_use]
    pub const fn from_sentinel(code: i32) -> Self {
        match code {
            -2 => Self::Unimplemented,
            -3 => Self::Transport,
            _ => Self::MissingResult,
        }
    }

    pub(crate) fn link(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Link {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
