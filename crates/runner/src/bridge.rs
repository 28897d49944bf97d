//! Drives asynchronous host work to completion from synchronous guest calls.

use std::future::Future;

use tokio::{runtime::Handle, sync::oneshot};

use crate::error::{Error, Result};

/// Spawns futures on a runtime and blocks the calling thread until they
/// finish.
///
/// Guest code runs on a plain call stack that must not be suspended, so a
/// capability needing async work parks its worker thread instead. Only call
/// [`Bridge::run`] from threads outside the runtime (for example inside
/// `spawn_blocking`); blocking a runtime worker on its own task deadlocks, and
/// tokio panics to prevent it.
#[derive(Debug, Clone)]
pub struct Bridge {
    handle: Handle,
}

impl Bridge {
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bridge onto the runtime of the current context.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeShutdown`] outside a tokio runtime.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| Error::RuntimeShutdown)
    }

    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `future` to completion and return its output.
    ///
    /// # Errors
    /// Returns [`Error::Join`] if the task panicked and
    /// [`Error::RuntimeShutdown`] if the runtime went away first.
    ///
    /// # Panics
    /// Panics when called from within an asynchronous execution context.
    pub fn run<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let task = self.handle.spawn(future);
        let (tx, rx) = oneshot::channel();
        self.handle.spawn(async move {
            let _ = tx.send(task.await);
        });
        match rx.blocking_recv() {
            Ok(joined) => joined.map_err(Error::Join),
            Err(_) => Err(Error::RuntimeShutdown),
        }
    }
}
