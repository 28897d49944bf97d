use std::{sync::Arc, time::Duration};

use crate::{
    capability::Capability,
    settings::{MemorySettingsStore, SettingsStore},
};

/// What to do with guest imports no capability namespace provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownImports {
    /// Fail the load.
    #[default]
    Reject,
    /// Link a stub that traps when called.
    Trap,
}

#[derive(Clone)]
pub struct SourceConfig {
    /// Namespaces persisted settings and is stamped on decoded catalog entries.
    pub source_key: String,
    pub max_memory: usize,
    /// Upper bound on elements in any guest function table.
    pub max_table_elements: usize,
    pub unknown_imports: UnknownImports,
    /// Deadline for guest execution within one call. `None` disables it.
    pub call_timeout: Option<Duration>,
    /// Granularity at which `call_timeout` is checked.
    pub epoch_tick: Duration,
    /// Upper bound on a buffered HTTP response body.
    pub max_response_bytes: usize,
    pub settings: Arc<dyn SettingsStore>,
    /// Linked after the built-in namespaces, shadowing same-named functions.
    pub capabilities: Vec<Arc<dyn Capability>>,
}

impl SourceConfig {
    pub const DEFAULT_MAX_MEMORY: usize = 64 * 1024 * 1024;
    pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;
    pub const DEFAULT_MAX_TABLE_ELEMENTS: usize = 10_000;
    pub const DEFAULT_EPOCH_TICK: Duration = Duration::from_millis(10);

    #[must_use]
    pub fn new(source_key: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            max_memory: Self::DEFAULT_MAX_MEMORY,
            max_table_elements: Self::DEFAULT_MAX_TABLE_ELEMENTS,
            unknown_imports: UnknownImports::Reject,
            call_timeout: None,
            epoch_tick: Self::DEFAULT_EPOCH_TICK,
            max_response_bytes: Self::DEFAULT_MAX_RESPONSE_BYTES,
            settings: Arc::new(MemorySettingsStore::default()),
            capabilities: Vec::new(),
        }
    }

    #[must_use]
    pub const fn max_memory(mut self, max_memory: usize) -> Self {
        self.max_memory = max_memory;
        self
    }

    #[must_use]
    pub const fn max_table_elements(mut self, max: usize) -> Self {
        self.max_table_elements = max;
        self
    }

    #[must_use]
    pub const fn unknown_imports(mut self, policy: UnknownImports) -> Self {
        self.unknown_imports = policy;
        self
    }

    #[must_use]
    pub const fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Zero is raised to one millisecond.
    #[must_use]
    pub fn epoch_tick(mut self, tick: Duration) -> Self {
        self.epoch_tick = tick.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub const fn max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    #[must_use]
    pub fn settings(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = store;
        self
    }

    #[must_use]
    pub fn capability(mut self, capability: impl Capability) -> Self {
        self.capabilities.push(Arc::new(capability));
        self
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::new("")
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("source_key", &self.source_key)
            .field("max_memory", &self.max_memory)
            .field("max_table_elements", &self.max_table_elements)
            .field("unknown_imports", &self.unknown_imports)
            .field("call_timeout", &self.call_timeout)
            .field("epoch_tick", &self.epoch_tick)
            .field("max_response_bytes", &self.max_response_bytes)
            .field(
                "capabilities",
                &self
                    .capabilities
                    .iter()
                    .map(|c| c.namespace())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
