//! `env`: process-level services.

use std::time::Duration;

use tracing::{debug, info, warn};
use wasmtime::Caller;

use super::{Capability, Registrar, context};
use crate::{
    TRACE_TARGET_GUEST,
    internal::abi,
    memory::{GuestMemory, guest_offset},
    state::HostState,
};

pub struct Env;

impl Capability for Env {
    fn namespace(&self) -> &'static str {
        "env"
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        registrar
            .func("abort", abort)
            .func("print", print)
            .func("sleep", sleep)
            .func("send_partial_result", send_partial_result);
    }
}

fn abort(caller: Caller<'_, HostState>) -> wasmtime::Result<()> {
    let ctx = context(&caller);
    warn!(target: TRACE_TARGET_GUEST, source = ctx.source_key(), "guest aborted");
    ctx.host().print("Aborted");
    Err(anyhow::anyhow!("guest aborted"))
}

fn print(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) {
    let (Ok(ptr), Ok(len)) = (guest_offset(ptr), guest_offset(len)) else {
        return;
    };
    let message = GuestMemory::from_caller(&mut caller)
        .and_then(|memory| memory.read_bytes(&caller, ptr, len))
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    let ctx = context(&caller);
    info!(target: TRACE_TARGET_GUEST, source = ctx.source_key(), "{message}");
    ctx.host().print(&message);
}

fn sleep(caller: Caller<'_, HostState>, seconds: i32) -> wasmtime::Result<()> {
    let Ok(seconds) = u64::try_from(seconds) else {
        return Ok(());
    };
    let ctx = context(&caller);
    ctx.bridge()
        .run(tokio::time::sleep(Duration::from_secs(seconds)))
        .map_err(anyhow::Error::from)
}

fn send_partial_result(mut caller: Caller<'_, HostState>, ptr: i32) {
    let Ok(ptr) = guest_offset(ptr) else {
        return;
    };
    let data = GuestMemory::from_caller(&mut caller)
        .and_then(|memory| abi::read_framed(&memory, &caller, ptr));
    match data {
        Ok(data) => context(&caller).partials().deliver(&data),
        Err(error) => debug!(%error, "unreadable partial result"),
    }
}
