use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Fixed-window request gate shared by every outbound request of one source.
///
/// At most `permits` requests are admitted per window. A window opens with the
/// first request admitted after the previous one has elapsed. Disabled until
/// configured with positive `permits` and `period`.
#[derive(Debug, Default)]
pub struct RateLimiter {
    state: Mutex<Window>,
}

#[derive(Debug, Default)]
struct Window {
    permits: u32,
    period: Duration,
    start: Option<Instant>,
    issued: u32,
}

impl Window {
    const fn is_enabled(&self) -> bool {
        self.permits > 0 && !self.period.is_zero()
    }

    fn in_period(&self, now: Instant) -> bool {
        self.start
            .is_some_and(|start| now.duration_since(start) < self.period)
    }

    /// Admit one request, or return when the current window ends.
    fn try_admit(&mut self, now: Instant) -> Result<(), Instant> {
        if !self.is_enabled() {
            return Ok(());
        }
        if !self.in_period(now) {
            self.start = Some(now);
            self.issued = 0;
        }
        if self.issued < self.permits {
            self.issued += 1;
            return Ok(());
        }
        Err(self.start.map_or(now, |start| start + self.period))
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconfigure the gate. Non-positive `permits` disables it.
    pub fn set(&self, permits: i32, period: Duration) {
        let mut state = self.state.lock();
        state.permits = u32::try_from(permits).unwrap_or(0);
        state.period = period;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.lock().is_enabled()
    }

    /// Wait until a request may be issued and count it against the window.
    ///
    /// Concurrent waiters race for the next window; admission is not FIFO.
    pub async fn acquire(&self) {
        loop {
            let outcome = self.state.lock().try_admit(Instant::now());
            match outcome {
                Ok(()) => return,
                Err(next_window) => {
                    debug!(
                        wait_ms = next_window
                            .saturating_duration_since(Instant::now())
                            .as_millis(),
                        "rate limit reached, waiting for next window"
                    );
                    tokio::time::sleep_until(next_window).await;
                }
            }
        }
    }
}

/// Unit selector passed by `net.set_rate_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    /// Unknown values fall back to seconds.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Minutes,
            2 => Self::Hours,
            _ => Self::Seconds,
        }
    }

    #[must_use]
    pub fn duration(self, amount: i32) -> Duration {
        let unit = match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3600,
        };
        Duration::from_secs(u64::try_from(amount).unwrap_or(0) * unit)
    }
}
