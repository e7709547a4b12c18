//! Single-slot tracking of one in-flight I/O operation.
//!
//! Each channel direction owns one `OpSlot`. The slot enforces the
//! at-most-one-outstanding invariant: a direction's completion writes
//! into that direction's buffer by reference, so two overlapping
//! operations would race on it. The slot also carries the direction's
//! failure state and the teardown handshake: `cancel_and_wait` aborts
//! the attached task and does not return until the task is gone, so a
//! completion can never run against a released channel.

use std::sync::Mutex;
use tokio::task::JoinHandle;

use sirocco_core::{Error, Result};

struct SlotState {
    in_flight: bool,
    task: Option<JoinHandle<()>>,
    failure: Option<String>,
    released: bool,
}

/// Tracks at most one outstanding operation for one channel direction.
pub struct OpSlot {
    direction: &'static str,
    state: Mutex<SlotState>,
}

impl OpSlot {
    /// `direction` names the slot in error messages ("read" / "write").
    pub fn new(direction: &'static str) -> Self {
        Self {
            direction,
            state: Mutex::new(SlotState {
                in_flight: false,
                task: None,
                failure: None,
                released: false,
            }),
        }
    }

    /// Try to reserve the slot for a new operation.
    ///
    /// Returns `Ok(false)` while an operation is in flight (the caller
    /// treats this as "already issued" or "try again later"). Fails if
    /// the slot was released, or if a previous operation recorded a
    /// failure; the failure is sticky, so misuse of a dead channel is
    /// loud on every call.
    pub fn try_begin(&self) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.released {
            return Err(Error::ChannelClosed(format!(
                "{} slot used after release",
                self.direction
            )));
        }
        if let Some(message) = &state.failure {
            return Err(Error::ChannelClosed(format!(
                "{} side failed: {}",
                self.direction, message
            )));
        }
        if state.in_flight {
            return Ok(false);
        }
        state.in_flight = true;
        Ok(true)
    }

    /// Store the join handle of the operation's task for teardown.
    pub fn attach(&self, task: JoinHandle<()>) {
        let mut state = self.state.lock().unwrap();
        state.task = Some(task);
    }

    /// Completion path: the operation finished, the slot is free again.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight = false;
        state.task = None;
    }

    /// Completion path: the operation failed; the slot stays dead.
    pub fn fail(&self, message: String) {
        let mut state = self.state.lock().unwrap();
        state.failure = Some(message);
        state.in_flight = false;
        state.task = None;
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.lock().unwrap().in_flight
    }

    /// Release the slot: cancel any outstanding operation and wait for
    /// its task to terminate. After this returns no completion can run,
    /// and every further `try_begin` fails.
    pub async fn cancel_and_wait(&self) {
        let task = self.release();
        if let Some(task) = task {
            task.abort();
            // A JoinError here is the expected cancellation acknowledgment.
            let _ = task.await;
        }
        self.state.lock().unwrap().in_flight = false;
    }

    /// Release without waiting: cancel the outstanding operation and
    /// mark the slot dead. Used from `Drop`, where waiting is not an
    /// option; the aborted task stops at its next suspension point.
    pub fn release_now(&self) {
        if let Some(task) = self.release() {
            task.abort();
        }
    }

    fn release(&self) -> Option<JoinHandle<()>> {
        let mut state = self.state.lock().unwrap();
        state.released = true;
        state.task.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_reports_in_flight() {
        let slot = OpSlot::new("read");
        assert!(slot.try_begin().unwrap());
        assert!(!slot.try_begin().unwrap());
        assert!(slot.is_in_flight());
    }

    #[test]
    fn test_finish_frees_the_slot() {
        let slot = OpSlot::new("read");
        assert!(slot.try_begin().unwrap());
        slot.finish();
        assert!(!slot.is_in_flight());
        assert!(slot.try_begin().unwrap());
    }

    #[test]
    fn test_failure_is_sticky() {
        let slot = OpSlot::new("read");
        assert!(slot.try_begin().unwrap());
        slot.fail("pipe broke".to_string());

        for _ in 0..2 {
            let err = slot.try_begin().unwrap_err();
            assert!(matches!(err, Error::ChannelClosed(_)));
            assert!(err.to_string().contains("pipe broke"));
        }
    }

    #[tokio::test]
    async fn test_release_makes_begin_fail() {
        let slot = OpSlot::new("write");
        slot.cancel_and_wait().await;
        assert!(matches!(slot.try_begin(), Err(Error::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn test_cancel_aborts_attached_task() {
        let slot = OpSlot::new("read");
        assert!(slot.try_begin().unwrap());
        slot.attach(tokio::spawn(async {
            std::future::pending::<()>().await;
        }));

        slot.cancel_and_wait().await;
        assert!(!slot.is_in_flight());
    }
}
