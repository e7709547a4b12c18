//! Reassembles a raw byte stream into newline-delimited records.
//!
//! Transports deliver bytes in arbitrary chunks; the framer accumulates
//! them and hands complete records (the bytes between two newlines) to a
//! caller-supplied handler. A channel is usually opened mid-record, so
//! everything up to the first newline is discarded before the framer
//! starts flushing records.

use crate::error::{Error, Result};

/// Accumulates bytes and flushes one record per newline.
///
/// The framer has a fixed capacity. A record longer than the capacity is
/// a hard failure: the instance stays failed and must be replaced by a
/// new one. Records never include the terminating newline.
pub struct LineFramer {
    buf: Vec<u8>,
    capacity: usize,
    /// Set once the first newline has been seen; bytes before it belong
    /// to a record whose start we never observed.
    synced: bool,
    failed: bool,
}

impl LineFramer {
    /// Create a framer that accepts records up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            synced: false,
            failed: false,
        }
    }

    /// Feed a chunk of bytes, invoking `on_record` for every complete
    /// record it terminates.
    ///
    /// # Errors
    ///
    /// Returns `Error::Framing` when the accumulator fills up without a
    /// newline. The failure is sticky: every later call fails too, and
    /// the only recovery is constructing a fresh framer.
    pub fn push(&mut self, data: &[u8], mut on_record: impl FnMut(&[u8])) -> Result<()> {
        if self.failed {
            return Err(Error::Framing(
                "framer previously overflowed; construct a new instance".to_string(),
            ));
        }

        let mut data = data;
        if !self.synced {
            match data.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.synced = true;
                    data = &data[pos + 1..];
                }
                None => return Ok(()),
            }
        }

        for &byte in data {
            if byte == b'\n' {
                on_record(&self.buf);
                self.buf.clear();
            } else {
                if self.buf.len() >= self.capacity {
                    self.failed = true;
                    return Err(Error::Framing(
                        "record exceeded framer capacity before a newline".to_string(),
                    ));
                }
                self.buf.push(byte);
            }
        }

        Ok(())
    }
}
