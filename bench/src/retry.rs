//! Connect-time retry with exponential backoff.

use bench_core::backend::Backend;
use bench_core::BenchResult;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempts are 1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Connect `backend`, retrying transient connection errors.
///
/// Any other error, or the last transient one, is returned as is.
pub fn connect_with_retry(backend: &mut dyn Backend, policy: &RetryPolicy) -> BenchResult<()> {
    let mut attempt = 1;
    loop {
        match backend.connect() {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "{}: connect attempt {attempt}/{} failed ({e}), retrying in {delay:.2?}...",
                    backend.id(),
                    policy.max_attempts
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
