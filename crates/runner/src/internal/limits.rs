use wasmtime::ResourceLimiter;

use crate::config::SourceConfig;

/// Enforces a source's `max_memory` and `max_table_elements` on its store.
/// Guest resources live in the host arena, so tables only ever hold the
/// guest's own function references.
#[derive(Debug)]
pub struct StoreLimits {
    max_memory: usize,
    max_table_elements: usize,
}

impl StoreLimits {
    pub const fn new(config: &SourceConfig) -> Self {
        Self {
            max_memory: config.max_memory,
            max_table_elements: config.max_table_elements,
        }
    }
}

impl ResourceLimiter for StoreLimits {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.max_memory {
            tracing::debug!(current, desired, max = self.max_memory, "guest memory growth denied");
            return Ok(false);
        }
        Ok(true)
    }

    fn table_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.max_table_elements {
            tracing::debug!(
                current,
                desired,
                max = self.max_table_elements,
                "guest table growth denied"
            );
            return Ok(false);
        }
        Ok(true)
    }
}
