//! Non-blocking log queue for user-visible messages.
//!
//! I/O completion callbacks must never wait on the presentation layer,
//! so log records go through a bounded queue: producers try to enqueue
//! and drop the record when the queue is full, the single consumer
//! drains at its own pace. Accepted records are delivered in order for
//! a single producer; no ordering is guaranteed across producers.
//!
//! The queue is an explicit value threaded through constructors rather
//! than process-wide state; clone [`LogQueue`] freely for every
//! producer.

use std::borrow::Cow;
use tokio::sync::mpsc;

/// Number of records the queue holds before dropping new ones.
pub const LOG_QUEUE_CAPACITY: usize = 500;

/// One log record: a static literal or an owned heap string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord(pub Cow<'static, str>);

impl LogRecord {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for LogRecord {
    fn from(message: &'static str) -> Self {
        Self(Cow::Borrowed(message))
    }
}

impl From<String> for LogRecord {
    fn from(message: String) -> Self {
        Self(Cow::Owned(message))
    }
}

/// Producer handle; cheap to clone, safe from any thread.
#[derive(Clone)]
pub struct LogQueue {
    tx: mpsc::Sender<LogRecord>,
}

impl LogQueue {
    /// Try to enqueue a record without blocking.
    ///
    /// Returns whether the record was accepted; a full queue drops it.
    pub fn try_log(&self, message: impl Into<LogRecord>) -> bool {
        self.tx.try_send(message.into()).is_ok()
    }
}

/// Single-consumer drain side.
pub struct LogDrain {
    rx: mpsc::Receiver<LogRecord>,
}

impl LogDrain {
    /// Pop one record if any is queued, without blocking.
    pub fn try_next(&mut self) -> Option<LogRecord> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next record; `None` once every producer is gone.
    pub async fn next(&mut self) -> Option<LogRecord> {
        self.rx.recv().await
    }
}

/// Create a queue with the default capacity.
pub fn log_queue() -> (LogQueue, LogDrain) {
    log_queue_with_capacity(LOG_QUEUE_CAPACITY)
}

/// Create a queue with an explicit capacity (tests use small ones).
pub fn log_queue_with_capacity(capacity: usize) -> (LogQueue, LogDrain) {
    let (tx, rx) = mpsc::channel(capacity);
    (LogQueue { tx }, LogDrain { rx })
}
