//! Per-source state reachable from capability functions.

use std::sync::Arc;

use crate::{
    arena::SharedArena, bridge::Bridge, host::Host, internal::limits::StoreLimits,
    partial::PartialResults, rate_limit::RateLimiter, settings::SettingsStore,
};

/// Everything a capability needs while serving one source.
pub struct SourceContext {
    pub(crate) source_key: String,
    pub(crate) arena: SharedArena,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) bridge: Bridge,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) partials: PartialResults,
    pub(crate) settings: Arc<dyn SettingsStore>,
    pub(crate) max_response_bytes: usize,
}

impl SourceContext {
    #[must_use]
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    #[must_use]
    pub const fn arena(&self) -> &SharedArena {
        &self.arena
    }

    #[must_use]
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    #[must_use]
    pub const fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    #[must_use]
    pub const fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    #[must_use]
    pub const fn partials(&self) -> &PartialResults {
        &self.partials
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    #[must_use]
    pub const fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }
}

impl std::fmt::Debug for SourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceContext")
            .field("source_key", &self.source_key)
            .field("arena_len", &self.arena.lock().len())
            .field("rate_limiter", &self.rate_limiter)
            .field("partials", &self.partials)
            .finish_non_exhaustive()
    }
}

/// Data attached to the wasmtime store of a loaded source.
#[derive(Debug)]
pub struct HostState {
    pub(crate) limits: StoreLimits,
    context: Arc<SourceContext>,
}

impl HostState {
    pub(crate) const fn new(limits: StoreLimits, context: Arc<SourceContext>) -> Self {
        Self { limits, context }
    }

    #[must_use]
    pub const fn context(&self) -> &Arc<SourceContext> {
        &self.context
    }
}
