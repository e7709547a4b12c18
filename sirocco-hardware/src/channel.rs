//! Asynchronous byte channels with at most one operation per direction.
//!
//! `ReadChannel` and `WriteChannel` wrap any `AsyncRead`/`AsyncWrite`
//! source, so the serial port, the helper-process pipe, and in-memory
//! test streams all share the same machinery. Issuing an operation
//! spawns one task; the direction's [`OpSlot`] guarantees no second
//! operation is submitted while it runs, and records completion or
//! failure. Failures surface from the *next* issue call, where the
//! owning retry loop catches them.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use sirocco_core::{Error, Result};

use crate::op_slot::OpSlot;

/// Invoked with each completed read's bytes. Runs on the channel's read
/// task; keep it short and never block in it.
pub type ReadCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Fixed read buffer size.
pub const READ_BUFFER_LEN: usize = 1024;

/// Fixed write buffer size; larger writes are a caller bug.
pub const WRITE_BUFFER_LEN: usize = 1024;

struct ReadEnd<R> {
    source: R,
    buf: Box<[u8]>,
}

struct ReadShared<R> {
    end: tokio::sync::Mutex<ReadEnd<R>>,
    callback: std::sync::Mutex<ReadCallback>,
    slot: OpSlot,
}

/// Read side of a channel: one fixed buffer, one outstanding read.
pub struct ReadChannel<R> {
    shared: Arc<ReadShared<R>>,
}

impl<R: AsyncRead + Unpin + Send + 'static> ReadChannel<R> {
    pub fn new(source: R, callback: ReadCallback) -> Self {
        Self {
            shared: Arc::new(ReadShared {
                end: tokio::sync::Mutex::new(ReadEnd {
                    source,
                    buf: vec![0u8; READ_BUFFER_LEN].into_boxed_slice(),
                }),
                callback: std::sync::Mutex::new(callback),
                slot: OpSlot::new("read"),
            }),
        }
    }

    /// Submit a read unless one is already outstanding.
    ///
    /// Idempotent: calling this every tick is fine, a read in flight
    /// makes it a no-op. The registered callback is invoked from the
    /// read task with the transferred bytes.
    ///
    /// # Errors
    ///
    /// Propagates a failure recorded by an earlier read (I/O error or
    /// end of stream) or use after shutdown.
    pub fn issue_read(&self) -> Result<()> {
        if !self.shared.slot.try_begin()? {
            return Ok(());
        }

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let mut end = shared.end.lock().await;
            let ReadEnd { source, buf } = &mut *end;
            match source.read(buf).await {
                Ok(0) => shared.slot.fail("end of stream".to_string()),
                Ok(n) => {
                    {
                        let mut callback = shared.callback.lock().unwrap();
                        (*callback)(&buf[..n]);
                    }
                    shared.slot.finish();
                }
                Err(e) => shared.slot.fail(e.to_string()),
            }
        });
        self.shared.slot.attach(task);
        Ok(())
    }

    pub fn is_read_in_flight(&self) -> bool {
        self.shared.slot.is_in_flight()
    }

    /// Cancel any outstanding read and wait until its task is gone.
    pub async fn shutdown(&self) {
        self.shared.slot.cancel_and_wait().await;
    }
}

impl<R> Drop for ReadChannel<R> {
    fn drop(&mut self) {
        self.shared.slot.release_now();
    }
}

struct WriteEnd<W> {
    sink: W,
    buf: Box<[u8]>,
    len: usize,
}

struct WriteShared<W> {
    end: tokio::sync::Mutex<WriteEnd<W>>,
    slot: OpSlot,
}

/// Write side of a channel: one fixed buffer, one outstanding write,
/// non-blocking backpressure.
pub struct WriteChannel<W> {
    shared: Arc<WriteShared<W>>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> WriteChannel<W> {
    pub fn new(sink: W) -> Self {
        Self {
            shared: Arc::new(WriteShared {
                end: tokio::sync::Mutex::new(WriteEnd {
                    sink,
                    buf: vec![0u8; WRITE_BUFFER_LEN].into_boxed_slice(),
                    len: 0,
                }),
                slot: OpSlot::new("write"),
            }),
        }
    }

    /// Try to submit a write.
    ///
    /// Returns `Ok(false)` without side effects while a previous write
    /// is outstanding; the record is dropped, not queued, and the
    /// caller retries on a later tick. Write completion is
    /// fire-and-forget; a failed write surfaces from the next call.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `data` exceeds the write buffer (caller bug,
    /// not a transient condition), or a recorded write failure.
    pub fn try_issue_write(&self, data: &[u8]) -> Result<bool> {
        if data.len() > WRITE_BUFFER_LEN {
            return Err(Error::InvalidInput(format!(
                "write of {} bytes exceeds buffer of {}",
                data.len(),
                WRITE_BUFFER_LEN
            )));
        }
        if !self.shared.slot.try_begin()? {
            return Ok(false);
        }

        // The slot reservation guarantees the write task is not holding
        // the end; a failed try_lock would mean a completion is still
        // unwinding, which reads as "busy".
        let Ok(mut end) = self.shared.end.try_lock() else {
            self.shared.slot.finish();
            return Ok(false);
        };
        end.buf[..data.len()].copy_from_slice(data);
        end.len = data.len();
        drop(end);

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let mut end = shared.end.lock().await;
            let WriteEnd { sink, buf, len } = &mut *end;
            let result = async {
                sink.write_all(&buf[..*len]).await?;
                sink.flush().await
            }
            .await;
            drop(end);
            match result {
                Ok(()) => shared.slot.finish(),
                Err(e) => shared.slot.fail(e.to_string()),
            }
        });
        self.shared.slot.attach(task);
        Ok(true)
    }

    pub fn is_write_in_flight(&self) -> bool {
        self.shared.slot.is_in_flight()
    }

    /// Cancel any outstanding write and wait until its task is gone.
    pub async fn shutdown(&self) {
        self.shared.slot.cancel_and_wait().await;
    }
}

impl<W> Drop for WriteChannel<W> {
    fn drop(&mut self) {
        self.shared.slot.release_now();
    }
}
