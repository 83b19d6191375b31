use crate::config::BackoffConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Multiplicative retry delay, clamped to `[min_delay, max_delay]`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    pub fn new(config: &BackoffConfig) -> Self {
        let min_delay = config.min_delay;
        let max_delay = config.max_delay.max(min_delay);
        Self {
            min_delay,
            current_delay: min_delay,
            max_delay,
            multiplier: config.multiplier.max(1.0),
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn success_reset(&mut self) {
        self.current_delay = self.min_delay;
    }

    /// Grows the delay and returns the new value.
    pub fn fail_increase(&mut self) -> Duration {
        let next = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = if next >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(next).max(self.min_delay)
        };
        self.current_delay
    }
}

/// Returns `false` if `cancel` fired before `delay` elapsed.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
