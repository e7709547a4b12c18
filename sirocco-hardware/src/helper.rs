//! Child-process transport for the temperature helper.
//!
//! Spawns the helper executable with its standard output and error both
//! redirected into the channel's single read side; no stdin is wired
//! up. The transport has no write side. A crashed or unreadable helper
//! surfaces from the next `issue_read`, where the recovery wrapper
//! respawns it.

use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

use sirocco_core::{Error, Result};

use crate::channel::{ReadCallback, ReadChannel};

/// The helper's stdout and stderr merged into one read source.
///
/// Whichever stream has bytes completes the read; end of stream is
/// reported only once both pipes are exhausted.
struct MergedOutput {
    stdout: ChildStdout,
    stderr: ChildStderr,
    stdout_done: bool,
    stderr_done: bool,
}

impl AsyncRead for MergedOutput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if !this.stdout_done {
            let before = buf.filled().len();
            match Pin::new(&mut this.stdout).poll_read(cx, buf) {
                Poll::Ready(Ok(())) => {
                    if buf.filled().len() > before {
                        return Poll::Ready(Ok(()));
                    }
                    this.stdout_done = true;
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }
        }

        if !this.stderr_done {
            let before = buf.filled().len();
            match Pin::new(&mut this.stderr).poll_read(cx, buf) {
                Poll::Ready(Ok(())) => {
                    if buf.filled().len() > before {
                        return Poll::Ready(Ok(()));
                    }
                    this.stderr_done = true;
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }
        }

        if this.stdout_done && this.stderr_done {
            return Poll::Ready(Ok(()));
        }
        Poll::Pending
    }
}

/// Read-only channel over a spawned helper process.
pub struct HelperChannel {
    read: ReadChannel<MergedOutput>,
    child: Child,
}

impl HelperChannel {
    /// Spawn `executable` and expose its output as the channel's read
    /// side.
    pub fn spawn(executable: &Path, callback: ReadCallback) -> Result<Self> {
        debug!("Spawning helper process: {}", executable.display());

        let mut child = Command::new(executable)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Process(format!(
                    "Failed to spawn {}: {}",
                    executable.display(),
                    e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Process("Helper stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Process("Helper stderr was not captured".to_string()))?;

        let merged = MergedOutput {
            stdout,
            stderr,
            stdout_done: false,
            stderr_done: false,
        };

        Ok(Self {
            read: ReadChannel::new(merged, callback),
            child,
        })
    }

    /// Submit a read unless one is outstanding; see
    /// [`ReadChannel::issue_read`]. A dead helper makes this fail, which
    /// is the signal the recovery wrapper reacts to.
    pub fn issue_read(&self) -> Result<()> {
        self.read.issue_read()
    }

    /// Cancel any outstanding read, then terminate and reap the helper.
    pub async fn shutdown(&mut self) {
        self.read.shutdown().await;
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}
