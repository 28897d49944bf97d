//! Host side of the bridge between an application and sandboxed source
//! extensions compiled to WebAssembly.
//!
//! A [`Source`] loads a guest module, links the `env`, `std`, `defaults` and
//! `net` capability namespaces into it and exposes the guest's entry points
//! as typed async methods. Values cross the boundary through the integer
//! handles of an [`Arena`] and the positional binary codec of
//! [`sourcebridge_codec`].

mod internal;

pub mod arena;
pub mod bridge;
pub mod capability;
pub mod config;
pub mod error;
pub mod features;
pub mod host;
pub mod interpreter;
pub mod memory;
pub mod model;
pub mod partial;
pub mod rate_limit;
#[cfg(feature = "request")]
pub mod request;
pub mod settings;
pub mod source;
pub mod state;

/// Target for host-side spans and events about guest execution.
pub const TRACE_TARGET_SCRIPT: &str = "sourcebridge::script";
/// Target for lines the guest prints.
pub const TRACE_TARGET_GUEST: &str = "sourcebridge::guest";

pub use arena::{ABSENT, Arena, Document, Image, ImageFormat, Resource, SharedArena};
pub use bridge::Bridge;
pub use capability::{Capability, Registrar};
pub use config::{SourceConfig, UnknownImports};
pub use error::{ArenaError, Error, Result};
pub use features::SourceFeatures;
pub use host::{
    BoxError, BoxedStream, Host, HttpBodyStream, HttpRequest, HttpResponse, ResponseUrl,
};
pub use interpreter::Interpreter;
pub use partial::{PartialResults, Registration};
pub use rate_limit::{RateLimiter, TimeUnit};
#[cfg(feature = "request")]
pub use request::ReqwestHost;
pub use settings::{MemorySettingsStore, SettingValue, SettingsStore};
pub use source::Source;
pub use state::{HostState, SourceContext};
