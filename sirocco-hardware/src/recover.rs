//! Generic recreate-on-failure combinator.
//!
//! Wraps an object whose operations may fail transiently (the helper
//! process above all: the executable crashes, the pipe breaks) together
//! with the factory that builds it. A failed operation is logged and
//! answered by rebuilding the instance, retrying the factory with a
//! delay until it succeeds; the caller never sees the operation's
//! failure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

use sirocco_core::{Error, LogQueue, Result, Ticker};

/// Delay between factory attempts while recreating.
pub const RECREATE_RETRY_MS: u64 = 50;

/// Async fallible factory producing the wrapped instance.
pub type Factory<T> =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<T>> + Send>> + Send + Sync>;

/// Holds a live `T`, rebuilding it whenever an operation fails.
pub struct RecreateOnFailure<T> {
    factory: Factory<T>,
    instance: T,
    ticker: Arc<dyn Ticker>,
    log: LogQueue,
}

impl<T> RecreateOnFailure<T> {
    /// Build the wrapper, running the factory once.
    ///
    /// A failure of this first construction propagates; the caller's
    /// outer retry loop owns that case.
    pub async fn new(factory: Factory<T>, ticker: Arc<dyn Ticker>, log: LogQueue) -> Result<Self> {
        let instance = (factory)().await?;
        Ok(Self {
            factory,
            instance,
            ticker,
            log,
        })
    }

    /// Run `action` against the current instance.
    ///
    /// If the action fails, the failure is logged and swallowed, and
    /// the factory is retried (with [`RECREATE_RETRY_MS`] between
    /// attempts) until a fresh instance exists. On return the wrapper
    /// holds a live instance again.
    ///
    /// # Errors
    ///
    /// Only `Error::Interrupted`, when a shutdown request arrives while
    /// the factory is still failing.
    pub async fn execute(&mut self, action: impl FnOnce(&mut T) -> Result<()>) -> Result<()> {
        match action(&mut self.instance) {
            Ok(()) => return Ok(()),
            Err(e) => {
                self.log.try_log(e.to_string());
                warn!("Operation failed, recreating: {}", e);
            }
        }

        loop {
            if self.ticker.should_exit() {
                return Err(Error::Interrupted);
            }
            match (self.factory)().await {
                Ok(instance) => {
                    self.instance = instance;
                    return Ok(());
                }
                Err(e) => {
                    self.log.try_log(e.to_string());
                    warn!("Recreation failed, retrying: {}", e);
                    self.ticker.wait_ms(RECREATE_RETRY_MS).await;
                }
            }
        }
    }

    /// Give up the wrapper and take the instance (for final teardown).
    pub fn into_inner(self) -> T {
        self.instance
    }
}
