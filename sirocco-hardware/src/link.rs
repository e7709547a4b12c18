//! Session with the fan controller.
//!
//! Finds the controller by probing serial ports: a port qualifies when
//! a well-formed status record (four whitespace-separated RPM integers)
//! arrives within the validation budget. The last port that worked is
//! tried first and persisted on success. Once connected, the session
//! exposes read issuance, the RPM read-out, and the duty command write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use sirocco_core::{
    Error, LineFramer, LogQueue, Result, Scanner, Settings, Ticker, NUM_FANS,
};

use crate::channel::ReadCallback;
use crate::serial::{PortChannel, SerialBackend};

/// Total time a candidate port gets to produce a valid record.
pub const VALIDATION_BUDGET_MS: u64 = 4000;

/// Read cadence while validating.
pub const VALIDATION_STEP_MS: u64 = 50;

/// Pause before rescanning when no port qualified.
pub const RESCAN_WAIT_MS: u64 = 2000;

/// Capacity of the status-record line buffer.
pub const STATUS_RECORD_CAPACITY: usize = 256;

/// State written by the read callback, read by the session owner.
#[derive(Default)]
struct LinkShared {
    rpms: Mutex<[i32; NUM_FANS]>,
    /// A syntactically valid status record arrived since connecting.
    valid_record_seen: AtomicBool,
}

/// Parse incoming bytes into status records and RPM samples.
fn make_status_callback(shared: Arc<LinkShared>, log: LogQueue) -> ReadCallback {
    let mut framer = LineFramer::new(STATUS_RECORD_CAPACITY);
    Box::new(move |bytes| {
        let result = framer.push(bytes, |record| {
            let mut scanner = Scanner::new(record);
            let mut rpms = [0i32; NUM_FANS];
            for rpm in rpms.iter_mut() {
                match scanner.read_int() {
                    Some(value) => *rpm = value,
                    None => {
                        shared.valid_record_seen.store(false, Ordering::Release);
                        return;
                    }
                }
            }
            *shared.rpms.lock().unwrap() = rpms;
            shared.valid_record_seen.store(true, Ordering::Release);
        });
        if result.is_err() {
            // Overflow kills the framer instance; start over with a
            // fresh one and wait for the stream to resynchronize.
            log.try_log("Status record exceeded the line buffer; resynchronizing");
            shared.valid_record_seen.store(false, Ordering::Release);
            framer = LineFramer::new(STATUS_RECORD_CAPACITY);
        }
    })
}

/// Connected session with the fan controller.
pub struct ControllerLink<P: PortChannel> {
    channel: P,
    shared: Arc<LinkShared>,
    port_name: String,
}

impl<P: PortChannel> ControllerLink<P> {
    /// Search for and validate a controller port; returns only once
    /// connected or when shutdown is requested.
    ///
    /// Errors opening one port mean "try the next candidate"; an empty
    /// port list or exhausted candidates mean waiting and rescanning.
    ///
    /// # Errors
    ///
    /// Only `Error::Interrupted`, when the exit predicate fires first.
    pub async fn establish<B>(
        backend: &B,
        settings: &Settings,
        ticker: &dyn Ticker,
        log: &LogQueue,
    ) -> Result<Self>
    where
        B: SerialBackend<Port = P>,
    {
        loop {
            if ticker.should_exit() {
                return Err(Error::Interrupted);
            }

            let mut ports = backend.list_ports();
            if ports.is_empty() {
                log.try_log("No serial ports are available. Retrying in 2 seconds...");
                if !ticker.should_exit() {
                    ticker.wait_ms(RESCAN_WAIT_MS).await;
                }
                continue;
            }

            // Try the last port that carried a valid record first.
            let last_port = settings.access_last_port(|port| port.clone());
            if !last_port.is_empty() {
                if let Some(position) = ports.iter().position(|name| *name == last_port) {
                    ports.swap(0, position);
                }
            }

            for port_name in ports {
                if ticker.should_exit() {
                    return Err(Error::Interrupted);
                }

                log.try_log(format!("Connecting to port {}...", port_name));
                let shared = Arc::new(LinkShared::default());
                let callback = make_status_callback(shared.clone(), log.clone());

                let mut channel = match backend.open(&port_name, callback) {
                    Ok(channel) => channel,
                    Err(e) => {
                        log.try_log(e.to_string());
                        warn!("Failed to open {}: {}", port_name, e);
                        continue;
                    }
                };

                if validate(&channel, &shared, ticker, log).await {
                    info!("Fan controller found on port {}", port_name);
                    log.try_log(format!("Fan controller found on port {}", port_name));
                    settings.access_last_port(|port| *port = port_name.clone());
                    settings.mark_dirty();
                    return Ok(ControllerLink {
                        channel,
                        shared,
                        port_name,
                    });
                }

                log.try_log(format!("No valid message was received on {}", port_name));
                channel.shutdown().await;
            }

            log.try_log("Fan controller not found. Retrying in 2 seconds...");
            if !ticker.should_exit() {
                ticker.wait_ms(RESCAN_WAIT_MS).await;
            }
        }
    }

    /// Submit a status read unless one is outstanding. The owner calls
    /// this on every tick.
    pub fn issue_read(&self) -> Result<()> {
        self.channel.issue_read()
    }

    /// Latest RPM sample per fan.
    pub fn rpms(&self) -> [i32; NUM_FANS] {
        *self.shared.rpms.lock().unwrap()
    }

    /// Format and try to send the duty command; dropped, not queued,
    /// while a write is outstanding.
    pub fn try_send_duties(&self, duties: [u8; NUM_FANS]) -> Result<bool> {
        let command = format_duty_command(duties);
        self.channel.try_issue_write(command.as_bytes())
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Tear the session down, waiting out any outstanding operations.
    pub async fn shutdown(mut self) {
        self.channel.shutdown().await;
    }
}

/// Issue reads on a short cadence until a valid record arrives or the
/// budget runs out.
async fn validate<P: PortChannel>(
    channel: &P,
    shared: &LinkShared,
    ticker: &dyn Ticker,
    log: &LogQueue,
) -> bool {
    for _ in 0..VALIDATION_BUDGET_MS / VALIDATION_STEP_MS {
        if ticker.should_exit() {
            return false;
        }
        if let Err(e) = channel.issue_read() {
            log.try_log(e.to_string());
            return false;
        }
        ticker.wait_ms(VALIDATION_STEP_MS).await;
        if shared.valid_record_seen.load(Ordering::Acquire) {
            return true;
        }
    }
    false
}

/// The duty command line: duty cycle per fan on the 0-255 scale.
pub fn format_duty_command(duties: [u8; NUM_FANS]) -> String {
    format!(
        "c 1 {} {} {} {}\n",
        duties[0], duties[1], duties[2], duties[3]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sirocco_core::log_queue;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    /// Ticker with instantaneous waits and a wait-count safety valve.
    struct TestTicker {
        exit: AtomicBool,
        waits: AtomicU32,
        exit_after_waits: u32,
    }

    impl TestTicker {
        fn new(exit_after_waits: u32) -> Arc<Self> {
            Arc::new(Self {
                exit: AtomicBool::new(false),
                waits: AtomicU32::new(0),
                exit_after_waits,
            })
        }
    }

    #[async_trait]
    impl Ticker for TestTicker {
        fn should_exit(&self) -> bool {
            self.exit.load(Ordering::Acquire)
        }

        async fn wait_ms(&self, _ms: u64) {
            let waited = self.waits.fetch_add(1, Ordering::AcqRel) + 1;
            if waited >= self.exit_after_waits {
                self.exit.store(true, Ordering::Release);
            }
        }

        fn now_ms(&self) -> u64 {
            self.waits.load(Ordering::Acquire) as u64
        }
    }

    /// Port that feeds a script to the callback on the first read.
    struct MockPort {
        script: Mutex<Option<Vec<u8>>>,
        callback: Mutex<ReadCallback>,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl PortChannel for MockPort {
        fn issue_read(&self) -> Result<()> {
            if let Some(bytes) = self.script.lock().unwrap().take() {
                let mut callback = self.callback.lock().unwrap();
                (*callback)(&bytes);
            }
            Ok(())
        }

        fn try_issue_write(&self, data: &[u8]) -> Result<bool> {
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(true)
        }

        async fn shutdown(&mut self) {}
    }

    /// Backend with scripted ports; records the order ports are opened.
    struct MockBackend {
        ports: Vec<String>,
        /// Bytes each port emits; a missing entry means opening fails.
        scripts: HashMap<String, Vec<u8>>,
        opened: Arc<Mutex<Vec<String>>>,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl MockBackend {
        fn new(ports: &[(&str, Option<&[u8]>)]) -> Self {
            Self {
                ports: ports.iter().map(|(name, _)| name.to_string()).collect(),
                scripts: ports
                    .iter()
                    .filter_map(|(name, script)| {
                        script.map(|bytes| (name.to_string(), bytes.to_vec()))
                    })
                    .collect(),
                opened: Arc::new(Mutex::new(Vec::new())),
                writes: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl SerialBackend for MockBackend {
        type Port = MockPort;

        fn list_ports(&self) -> Vec<String> {
            self.ports.clone()
        }

        fn open(&self, port_name: &str, callback: ReadCallback) -> Result<Self::Port> {
            self.opened.lock().unwrap().push(port_name.to_string());
            let script = self
                .scripts
                .get(port_name)
                .cloned()
                .ok_or_else(|| Error::Serial(format!("Failed opening port {}", port_name)))?;
            Ok(MockPort {
                script: Mutex::new(Some(script)),
                callback: Mutex::new(callback),
                writes: self.writes.clone(),
            })
        }
    }

    const VALID_SCRIPT: &[u8] = b"sync\n1000 1200 900 800\n";

    #[tokio::test]
    async fn test_connects_to_valid_port_and_persists_it() {
        let backend = MockBackend::new(&[("COM3", Some(VALID_SCRIPT))]);
        let settings = Settings::default();
        let ticker = TestTicker::new(10_000);
        let (log, _drain) = log_queue();

        let link = ControllerLink::establish(&backend, &settings, ticker.as_ref(), &log)
            .await
            .unwrap();

        assert_eq!(link.port_name(), "COM3");
        assert_eq!(link.rpms(), [1000, 1200, 900, 800]);
        assert_eq!(settings.access_last_port(|port| port.clone()), "COM3");
        assert!(settings.is_dirty());
    }

    #[tokio::test]
    async fn test_invalid_port_is_skipped() {
        // COM3 emits a record that does not parse as four integers.
        let backend = MockBackend::new(&[
            ("COM3", Some(b"sync\nnot numbers\n".as_slice())),
            ("COM7", Some(VALID_SCRIPT)),
        ]);
        let settings = Settings::default();
        let ticker = TestTicker::new(10_000);
        let (log, _drain) = log_queue();

        let link = ControllerLink::establish(&backend, &settings, ticker.as_ref(), &log)
            .await
            .unwrap();

        assert_eq!(link.port_name(), "COM7");
        assert_eq!(
            backend.opened.lock().unwrap().as_slice(),
            &["COM3".to_string(), "COM7".to_string()]
        );
    }

    #[tokio::test]
    async fn test_last_known_port_is_tried_first() {
        let backend = MockBackend::new(&[
            ("COM3", Some(VALID_SCRIPT)),
            ("COM7", Some(VALID_SCRIPT)),
        ]);
        let settings = Settings::default();
        settings.access_last_port(|port| *port = "COM7".to_string());
        let ticker = TestTicker::new(10_000);
        let (log, _drain) = log_queue();

        let link = ControllerLink::establish(&backend, &settings, ticker.as_ref(), &log)
            .await
            .unwrap();

        assert_eq!(link.port_name(), "COM7");
        assert_eq!(backend.opened.lock().unwrap().first().unwrap(), "COM7");
    }

    #[tokio::test]
    async fn test_open_failure_moves_to_next_candidate() {
        let backend = MockBackend::new(&[("COM3", None), ("COM7", Some(VALID_SCRIPT))]);
        let settings = Settings::default();
        let ticker = TestTicker::new(10_000);
        let (log, _drain) = log_queue();

        let link = ControllerLink::establish(&backend, &settings, ticker.as_ref(), &log)
            .await
            .unwrap();

        assert_eq!(link.port_name(), "COM7");
    }

    #[tokio::test]
    async fn test_no_ports_waits_until_shutdown() {
        let backend = MockBackend::new(&[]);
        let settings = Settings::default();
        let ticker = TestTicker::new(3);
        let (log, _drain) = log_queue();

        let result =
            ControllerLink::establish(&backend, &settings, ticker.as_ref(), &log)
                .await;
        assert!(matches!(result, Err(Error::Interrupted)));
    }

    #[tokio::test]
    async fn test_duty_command_reaches_the_port() {
        let backend = MockBackend::new(&[("COM3", Some(VALID_SCRIPT))]);
        let settings = Settings::default();
        let ticker = TestTicker::new(10_000);
        let (log, _drain) = log_queue();

        let link = ControllerLink::establish(&backend, &settings, ticker.as_ref(), &log)
            .await
            .unwrap();

        assert!(link.try_send_duties([0, 128, 255, 64]).unwrap());
        let writes = backend.writes.lock().unwrap();
        assert_eq!(writes.as_slice(), &[b"c 1 0 128 255 64\n".to_vec()]);
    }

    #[test]
    fn test_format_duty_command() {
        assert_eq!(format_duty_command([0, 128, 255, 64]), "c 1 0 128 255 64\n");
        assert_eq!(format_duty_command([0, 0, 0, 0]), "c 1 0 0 0 0\n");
    }

    #[test]
    fn test_status_callback_parses_four_rpms() {
        let shared = Arc::new(LinkShared::default());
        let (log, _drain) = log_queue();
        let mut callback = make_status_callback(shared.clone(), log);

        callback(b"partial\n900 901 902 903\n");
        assert!(shared.valid_record_seen.load(Ordering::Acquire));
        assert_eq!(*shared.rpms.lock().unwrap(), [900, 901, 902, 903]);
    }

    #[test]
    fn test_status_callback_rejects_short_record() {
        let shared = Arc::new(LinkShared::default());
        let (log, _drain) = log_queue();
        let mut callback = make_status_callback(shared.clone(), log);

        callback(b"\n1 2 3 4\n");
        assert!(shared.valid_record_seen.load(Ordering::Acquire));

        // Three integers only: not a valid status record.
        callback(b"5 6 7\n");
        assert!(!shared.valid_record_seen.load(Ordering::Acquire));
        // The last good sample is retained.
        assert_eq!(*shared.rpms.lock().unwrap(), [1, 2, 3, 4]);
    }

    #[test]
    fn test_status_callback_survives_overflow() {
        let shared = Arc::new(LinkShared::default());
        let (log, mut drain) = log_queue();
        let mut callback = make_status_callback(shared.clone(), log);

        // One long unterminated run overflows the framer.
        let long = vec![b'9'; STATUS_RECORD_CAPACITY + 2];
        callback(b"\n");
        callback(&long);
        assert!(drain.try_next().is_some());

        // The fresh framer resynchronizes on the next newline.
        callback(b"tail\n10 20 30 40\n");
        assert!(shared.valid_record_seen.load(Ordering::Acquire));
        assert_eq!(*shared.rpms.lock().unwrap(), [10, 20, 30, 40]);
    }
}
