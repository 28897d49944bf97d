//! Host functions linked into the guest, grouped by import namespace.
//!
//! The built-in namespaces are `env`, `std`, `defaults` and `net`. Embedders
//! add their own (or replace built-in functions) by implementing
//! [`Capability`]; later registrations shadow earlier ones.

pub mod defaults;
pub mod env;
pub mod net;
pub mod stdlib;

use std::sync::Arc;

use wasmtime::{Caller, IntoFunc, Linker};

use crate::state::{HostState, SourceContext};

/// A set of host functions exposed under one import namespace.
pub trait Capability: Send + Sync + 'static {
    fn namespace(&self) -> &'static str;

    fn register(&self, registrar: &mut Registrar<'_>);
}

/// Links functions into a single namespace.
pub struct Registrar<'a> {
    linker: &'a mut Linker<HostState>,
    namespace: &'static str,
}

impl Registrar<'_> {
    /// Link `func` as `namespace.name`. A function that cannot be linked is
    /// skipped; guests importing it fail at instantiation instead.
    pub fn func<Params, Args>(
        &mut self,
        name: &str,
        func: impl IntoFunc<HostState, Params, Args>,
    ) -> &mut Self {
        if let Err(error) = self.linker.func_wrap(self.namespace, name, func) {
            tracing::debug!(namespace = self.namespace, name, %error, "host function not linked");
        }
        self
    }
}

/// Built-in capabilities in link order.
pub(crate) fn builtin() -> Vec<Arc<dyn Capability>> {
    vec![
        Arc::new(env::Env),
        Arc::new(stdlib::Std),
        Arc::new(defaults::Defaults),
        Arc::new(net::Net),
    ]
}

pub(crate) fn link_all(linker: &mut Linker<HostState>, capabilities: &[Arc<dyn Capability>]) {
    linker.allow_shadowing(true);
    for capability in capabilities {
        let mut registrar = Registrar {
            namespace: capability.namespace(),
            linker: &mut *linker,
        };
        capability.register(&mut registrar);
    }
}

/// Shared context of the source a host function is serving.
#[must_use]
pub fn context(caller: &Caller<'_, HostState>) -> Arc<SourceContext> {
    Arc::clone(caller.data().context())
}
