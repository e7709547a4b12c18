//! Injected pacing: exit predicate, waits, and a clock.
//!
//! The session and control loop never sleep or read time directly; they
//! go through this trait so tests can script time and shutdown without
//! real timers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Pacing collaborators injected into the worker loops.
#[async_trait]
pub trait Ticker: Send + Sync {
    /// Cooperative shutdown check; every wait loop polls this.
    fn should_exit(&self) -> bool;

    /// Bounded wait; returns early only at the implementation's whim
    /// (tests typically make it instantaneous).
    async fn wait_ms(&self, ms: u64);

    /// Milliseconds on a monotonically increasing clock.
    fn now_ms(&self) -> u64;
}

/// Production ticker: tokio sleeps, a shared exit flag, and a
/// process-start-relative monotonic clock.
pub struct TokioTicker {
    exit: Arc<AtomicBool>,
    started: Instant,
}

impl TokioTicker {
    pub fn new(exit: Arc<AtomicBool>) -> Self {
        Self {
            exit,
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl Ticker for TokioTicker {
    fn should_exit(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    async fn wait_ms(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
