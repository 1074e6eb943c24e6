//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is created once in `main`, wired to SIGINT/SIGTERM
//! and handed down to every component that has a yield point. Nothing ever
//! pre-empts a backend call; components only look at the token between units
//! of work.

use bench_core::{BenchError, BenchResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` once cancellation has been requested.
    pub fn check(&self) -> BenchResult<()> {
        if self.is_cancelled() {
            Err(BenchError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Cancel this token on SIGINT or SIGTERM.
    ///
    /// Can only be installed once per process.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            if !token.is_cancelled() {
                log::info!(
                    "Got signal to terminate. Finishing in-flight work, then saving checkpoint..."
                );
            } else {
                log::info!("Alright, alright, I'm already shutting down!");
            }
            token.cancel();
        })
    }
}
