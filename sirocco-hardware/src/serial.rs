//! Serial transport for the fan controller line.
//!
//! Opens a named port, applies the controller's line settings, and
//! exposes it as a pair of single-operation channels. The
//! [`SerialBackend`] trait sits in front of port enumeration and
//! opening so the session logic can be driven by scripted ports in
//! tests.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use sirocco_core::{Error, Result};

use crate::channel::{ReadCallback, ReadChannel, WriteChannel};

/// Baud rate spoken by the fan controller.
pub const BAUD_RATE: u32 = 19200;

/// Port read/write timeout constants.
pub const SERIAL_TIMEOUT_MS: u64 = 5;

/// A connected half- or full-duplex port: at most one outstanding
/// operation per direction.
#[async_trait]
pub trait PortChannel: Send {
    /// Idempotent read submission; see [`ReadChannel::issue_read`].
    fn issue_read(&self) -> Result<()>;

    /// Non-blocking write attempt; see [`WriteChannel::try_issue_write`].
    fn try_issue_write(&self, data: &[u8]) -> Result<bool>;

    /// Cancel outstanding operations and wait for their completion
    /// paths to be gone.
    async fn shutdown(&mut self);
}

/// Enumerates and opens serial ports.
///
/// The real implementation is [`NativeBackend`]; tests substitute
/// scripted ones.
pub trait SerialBackend: Send + Sync {
    type Port: PortChannel;

    /// Names of the ports currently present. Absent or inaccessible
    /// device registries yield an empty list, never an error.
    fn list_ports(&self) -> Vec<String>;

    /// Open and configure a port, registering the read callback.
    fn open(&self, port_name: &str, callback: ReadCallback) -> Result<Self::Port>;
}

/// Serial port as a byte channel.
pub struct SerialChannel {
    read: ReadChannel<ReadHalf<SerialStream>>,
    write: WriteChannel<WriteHalf<SerialStream>>,
    port_name: String,
}

impl SerialChannel {
    /// Open `port_name` at the controller's line settings.
    pub fn open(port_name: &str, callback: ReadCallback) -> Result<Self> {
        debug!("Opening serial port: {}", port_name);

        let stream = tokio_serial::new(port_name, BAUD_RATE)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                Error::Serial(format!("Failed opening port {}: {}", port_name, e))
            })?;

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self {
            read: ReadChannel::new(read_half, callback),
            write: WriteChannel::new(write_half),
            port_name: port_name.to_string(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl PortChannel for SerialChannel {
    fn issue_read(&self) -> Result<()> {
        self.read.issue_read()
    }

    fn try_issue_write(&self, data: &[u8]) -> Result<bool> {
        self.write.try_issue_write(data)
    }

    async fn shutdown(&mut self) {
        self.read.shutdown().await;
        self.write.shutdown().await;
        debug!("Serial port {} released", self.port_name);
    }
}

/// Backend backed by the operating system's serial devices.
pub struct NativeBackend;

impl SerialBackend for NativeBackend {
    type Port = SerialChannel;

    fn list_ports(&self) -> Vec<String> {
        match tokio_serial::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                debug!("Serial port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    fn open(&self, port_name: &str, callback: ReadCallback) -> Result<Self::Port> {
        SerialChannel::open(port_name, callback)
    }
}
