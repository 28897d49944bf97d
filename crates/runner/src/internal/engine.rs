use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use wasmtime::{Config, Engine};

pub fn configure_engine(cfg: &mut Config, interruptible: bool) {
    cfg.epoch_interruption(interruptible);
    cfg.table_lazy_init(false);
    cfg.generate_address_map(false);
    cfg.wasm_backtrace(false);
    cfg.native_unwind_info(false);
    cfg.cranelift_opt_level(wasmtime::OptLevel::Speed);
}

/// Number of `tick`s covering `timeout`, at least one.
pub fn deadline_ticks(timeout: Duration, tick: Duration) -> u64 {
    let tick = tick.as_nanos().max(1);
    let ticks = timeout.as_nanos().div_ceil(tick);
    u64::try_from(ticks).unwrap_or(u64::MAX).max(1)
}

/// Advances one source's engine epoch every `tick` on a dedicated thread
/// until dropped.
#[derive(Debug)]
pub struct EpochTicker {
    stopped: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EpochTicker {
    pub fn start(engine: Engine, tick: Duration) -> std::io::Result<Self> {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let thread = std::thread::Builder::new()
            .name("sourcebridge-epoch".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    std::thread::park_timeout(tick);
                    engine.increment_epoch();
                }
            })?;
        Ok(Self {
            stopped,
            thread: Some(thread),
        })
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                tracing::warn!("epoch ticker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_rounds_up_to_whole_ticks() {
        let tick = Duration::from_millis(10);
        assert_eq!(deadline_ticks(Duration::ZERO, tick), 1);
        assert_eq!(deadline_ticks(Duration::from_millis(10), tick), 1);
        assert_eq!(deadline_ticks(Duration::from_millis(11), tick), 2);
        assert_eq!(deadline_ticks(Duration::from_secs(1), tick), 100);
        assert_eq!(
            deadline_ticks(Duration::from_secs(1), Duration::from_millis(1)),
            1000
        );
        assert_eq!(
            deadline_ticks(Duration::from_secs(1), Duration::ZERO),
            1_000_000_000
        );
    }

    #[test]
    fn ticker_stops_on_drop() {
        let ticker = EpochTicker::start(Engine::default(), Duration::from_secs(60)).expect("start");
        assert!(ticker.is_running());
        let stopped = Arc::clone(&ticker.stopped);
        // Drop must unpark the thread rather than wait out the tick.
        let started = std::time::Instant::now();
        drop(ticker);
        assert!(stopped.load(Ordering::Acquire));
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
