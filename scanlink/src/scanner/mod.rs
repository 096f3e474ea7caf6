//! Thread-safe facade over the scanner event loop.
//!
//! A [`Scanner`] spawns one event-loop thread that exclusively owns the
//! device handle, the reassembly buffer and the registered consumer. Every
//! public method either posts a command to that thread and waits for the
//! reply, or reads the lock-free status snapshot.
//!
//! Scan callbacks run on the event-loop thread. From inside a callback,
//! blocking commands ([`Scanner::initialize`], [`Scanner::open`],
//! [`Scanner::send_command`], [`Scanner::reconnect`]) return
//! [`Error::Reentrant`]; [`Scanner::disconnect`] is queued instead.

mod event_loop;

use crate::connection::{
    ConnectionManager, ConnectionState, EventSink, RECONNECT_SETTLE_DELAY, StatusCell,
};
use crate::dispatcher::ConsumerResult;
use crate::error::{Error, Result};
use crate::locator::{locate_device, DeviceCandidates, DeviceSelection, SelectionSource};
use crate::port::SerialBackend;
use event_loop::{Command, EventLoop, Message};
use log::{debug, error, info, warn};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Where to look for the scanner.
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Candidate paths for automatic selection.
    pub candidates: DeviceCandidates,
    /// Explicit device path; skips automatic selection.
    pub port: Option<String>,
}

/// Result of [`Scanner::reconnect`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ReconnectReport {
    /// The scanner is connected after re-initialization.
    pub success: bool,
    /// Connection status observed after the settle delay.
    pub connected: bool,
    /// Why re-initialization failed, if it did.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub error: Option<String>,
}

/// Pick the device path for `config`: the configured port if set,
/// otherwise the first candidate [`locate_device`] finds.
pub fn select_device(backend: &dyn SerialBackend, config: &ScannerConfig) -> DeviceSelection {
    match &config.port {
        Some(path) => {
            info!("Using configured scanner port {path}");
            DeviceSelection {
                path: path.clone(),
                source: SelectionSource::Configured,
            }
        },
        None => locate_device(backend, &config.candidates),
    }
}

/// Handle to a running scanner service.
///
/// `Scanner` is `Send + Sync`; share it behind an [`Arc`] to use it from
/// several threads. Dropping it closes the device and stops the event loop.
pub struct Scanner {
    tx: Sender<Message>,
    status: Arc<StatusCell>,
    backend: Arc<dyn SerialBackend>,
    config: ScannerConfig,
    loop_thread: Option<JoinHandle<()>>,
    loop_id: ThreadId,
}

impl Scanner {
    /// Start the event loop without opening a device.
    pub fn spawn(config: ScannerConfig, backend: Arc<dyn SerialBackend>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let status = Arc::new(StatusCell::default());

        let device_tx = tx.clone();
        let sink: EventSink = Arc::new(move |notice| {
            let _ = device_tx.send(Message::Device(notice));
        });
        let connection = ConnectionManager::new(Arc::clone(&backend), sink, Arc::clone(&status));
        let event_loop = EventLoop::new(connection);

        let handle = thread::Builder::new()
            .name("scanlink-loop".to_string())
            .spawn(move || event_loop.run(rx))?;
        let loop_id = handle.thread().id();

        Ok(Self {
            tx,
            status,
            backend,
            config,
            loop_thread: Some(handle),
            loop_id,
        })
    }

    /// Start the event loop and attempt one initialization.
    ///
    /// A failed initialization is logged, not returned; the scanner stays
    /// usable for [`reconnect`](Self::reconnect).
    pub fn start(config: ScannerConfig, backend: Arc<dyn SerialBackend>) -> Result<Self> {
        let scanner = Self::spawn(config, backend)?;
        if let Err(e) = scanner.initialize() {
            error!("Failed to initialize scanner: {e}");
        }
        Ok(scanner)
    }

    /// [`start`](Self::start) on the host's serial ports.
    #[cfg(feature = "native")]
    pub fn start_native(config: ScannerConfig) -> Result<Self> {
        Self::start(config, Arc::new(crate::port::NativeBackend))
    }

    /// Pick the device path to open.
    pub fn select_device(&self) -> DeviceSelection {
        select_device(self.backend.as_ref(), &self.config)
    }

    /// Select a device and open it. Returns the opened path.
    pub fn initialize(&self) -> Result<String> {
        self.ensure_outside_loop()?;
        info!("Initializing scanner");
        let selection = self.select_device();
        info!("Attempting to connect to scanner on {}", selection.path);
        self.open(&selection.path)?;
        info!("Scanner initialization completed on {}", selection.path);
        Ok(selection.path)
    }

    /// Open `path`, replacing any current connection.
    ///
    /// Blocks until the device opens, refuses, or the open times out.
    pub fn open(&self, path: &str) -> Result<()> {
        self.request(|reply| Command::Open {
            path: path.to_string(),
            reply,
        })?
    }

    /// Whether a device handle is held.
    pub fn connection_status(&self) -> bool {
        let open = self.status.is_open();
        debug!("Connection status check: {}", if open { "open" } else { "closed" });
        open
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Close, re-initialize, and report the resulting status.
    pub fn reconnect(&self) -> ReconnectReport {
        if let Err(e) = self.ensure_outside_loop() {
            return ReconnectReport {
                success: false,
                connected: self.connection_status(),
                error: Some(e.to_string()),
            };
        }

        info!("Manual scanner reconnection requested");
        if self.connection_status() {
            self.disconnect();
        }

        let result = self.initialize();
        thread::sleep(RECONNECT_SETTLE_DELAY);
        let connected = self.connection_status();

        let report = ReconnectReport {
            success: connected,
            connected,
            error: result.err().map(|e| e.to_string()),
        };
        info!(
            "Reconnection {}",
            if report.success { "succeeded" } else { "failed" }
        );
        report
    }

    /// Write `text` plus CR+LF to the device.
    pub fn send_command(&self, text: &str) -> Result<()> {
        if !self.connection_status() {
            warn!("Cannot send command {text:?}: scanner not connected");
            return Err(Error::NotConnected);
        }
        self.request(|reply| Command::Send {
            text: text.to_string(),
            reply,
        })?
    }

    /// Install the scan consumer, replacing any previous one.
    pub fn on_scan<F>(&self, callback: F)
    where
        F: FnMut(&str) -> ConsumerResult + Send + 'static,
    {
        info!("Registering scan callback");
        self.post(Command::Register(Box::new(callback)));
    }

    /// Remove the scan consumer.
    pub fn remove_scan_listener(&self) {
        info!("Removing scan listener");
        self.post(Command::Unregister);
    }

    /// Close the device. Safe to call at any time, any number of times.
    pub fn disconnect(&self) {
        if self.ensure_outside_loop().is_err() {
            self.post(Command::Close { reply: None });
            return;
        }
        if self
            .request(|reply| Command::Close { reply: Some(reply) })
            .is_err()
        {
            debug!("Scanner event loop already stopped");
        }
    }

    fn ensure_outside_loop(&self) -> Result<()> {
        if thread::current().id() == self.loop_id {
            Err(Error::Reentrant)
        } else {
            Ok(())
        }
    }

    fn post(&self, command: Command) {
        if self.tx.send(Message::Command(command)).is_err() {
            warn!("Scanner event loop is not running");
        }
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        self.ensure_outside_loop()?;
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Message::Command(build(reply_tx)))
            .map_err(|_| Error::Shutdown)?;
        reply_rx.recv().map_err(|_| Error::Shutdown)
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(handle) = self.loop_thread.take() {
            // Dropped from inside a callback: the loop exits on its own
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OPEN_TIMEOUT;
    use crate::error::DeviceFault;
    use crate::mock::{wait_until, MockBackend, OpenBehavior};
    use std::io::ErrorKind;
    use std::sync::mpsc::Receiver;
    use std::thread;
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(2);

    fn started(backend: &Arc<MockBackend>) -> Scanner {
        let _ = env_logger::builder().is_test(true).try_init();
        let scanner = Scanner::spawn(ScannerConfig::default(), backend.clone()).unwrap();
        assert_eq!(scanner.initialize().unwrap(), "/dev/serial0");
        scanner
    }

    fn collect(scanner: &Scanner) -> Receiver<(String, Instant)> {
        let (tx, rx) = mpsc::channel();
        scanner.on_scan(move |scan| {
            let _ = tx.send((scan.to_string(), Instant::now()));
            Ok(())
        });
        rx
    }

    #[test]
    fn test_delimited_scan_across_two_chunks() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = started(&backend);
        let scans = collect(&scanner);

        let device = backend.device(0);
        device.feed(b"https://e.c");
        device.feed(b"o/r\r\n");

        let (scan, _) = scans.recv_timeout(WAIT).unwrap();
        assert_eq!(scan, "https://e.co/r");
        assert!(scans.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_undelimited_scan_flushes_after_quiescence() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = started(&backend);
        let scans = collect(&scanner);

        let fed_at = Instant::now();
        backend.device(0).feed(b"ABC123");

        let (scan, at) = scans.recv_timeout(WAIT).unwrap();
        assert_eq!(scan, "ABC123");
        let elapsed = at.duration_since(fed_at);
        assert!(elapsed >= Duration::from_millis(100), "flushed after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(200), "flushed after {elapsed:?}");
        assert!(scans.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_missing_device_times_out() {
        let backend = Arc::new(MockBackend::new());
        let scanner = Scanner::spawn(ScannerConfig::default(), backend.clone()).unwrap();

        let started_at = Instant::now();
        let err = scanner.open("/dev/ttyNOPE").unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
        assert!(started_at.elapsed() >= OPEN_TIMEOUT);
        assert_eq!(err.to_string(), "Failed to connect to /dev/ttyNOPE within 2000ms");
        assert!(!scanner.connection_status());
        assert_eq!(scanner.state(), ConnectionState::Error);
        assert!(backend.attempts() > 1);
    }

    #[test]
    fn test_permission_denied_fails_fast() {
        let backend = Arc::new(MockBackend::new());
        backend.set_behavior("/dev/serial0", OpenBehavior::Fail(ErrorKind::PermissionDenied));
        let scanner = Scanner::spawn(ScannerConfig::default(), backend.clone()).unwrap();

        let started_at = Instant::now();
        match scanner.open("/dev/serial0") {
            Err(Error::ConnectError { path, fault, .. }) => {
                assert_eq!(path, "/dev/serial0");
                assert_eq!(fault, DeviceFault::PermissionDenied);
            },
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(started_at.elapsed() < OPEN_TIMEOUT);
        assert!(!scanner.connection_status());
    }

    #[test]
    fn test_configured_port_skips_locator() {
        let backend = Arc::new(MockBackend::attached("/dev/ttyUSB0"));
        let config = ScannerConfig {
            port: Some("/dev/ttyUSB0".to_string()),
            ..ScannerConfig::default()
        };
        let scanner = Scanner::start(config, backend.clone()).unwrap();
        assert!(scanner.connection_status());
        assert_eq!(scanner.select_device().source, SelectionSource::Configured);
    }

    #[test]
    fn test_start_survives_failed_initialization() {
        let backend = Arc::new(MockBackend::new());
        backend.set_behavior("/dev/serial1", OpenBehavior::Fail(ErrorKind::PermissionDenied));
        let scanner = Scanner::start(ScannerConfig::default(), backend.clone()).unwrap();
        assert!(!scanner.connection_status());
        assert_eq!(scanner.state(), ConnectionState::Error);
    }

    #[test]
    fn test_reconnect_replaces_handle() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = started(&backend);
        let scans = collect(&scanner);
        let old = backend.device(0);

        let report = scanner.reconnect();
        assert_eq!(
            report,
            ReconnectReport {
                success: true,
                connected: true,
                error: None
            }
        );
        assert!(old.is_closed());
        assert_eq!(backend.open_count(), 2);

        // The old handle can no longer affect the connection
        old.feed(b"stale\r\n");
        old.fail(ErrorKind::BrokenPipe);
        backend.device(1).feed(b"fresh\r\n");

        let (scan, _) = scans.recv_timeout(WAIT).unwrap();
        assert_eq!(scan, "fresh");
        assert!(scans.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(scanner.state(), ConnectionState::Open);
    }

    #[test]
    fn test_reconnect_reports_failure() {
        let backend = Arc::new(MockBackend::new());
        backend.set_behavior("/dev/serial1", OpenBehavior::Fail(ErrorKind::PermissionDenied));
        let scanner = Scanner::spawn(ScannerConfig::default(), backend.clone()).unwrap();

        let report = scanner.reconnect();
        assert!(!report.success);
        assert!(!report.connected);
        assert!(report.error.unwrap().contains("/dev/serial1"));
    }

    #[test]
    fn test_late_open_from_superseded_attempt() {
        let backend = Arc::new(MockBackend::new());
        backend.set_behavior("/dev/slow", OpenBehavior::Delay(Duration::from_millis(300)));
        backend.set_behavior("/dev/fast", OpenBehavior::Succeed);
        let scanner = Scanner::spawn(ScannerConfig::default(), backend.clone()).unwrap();

        thread::scope(|s| {
            let slow = s.spawn(|| scanner.open("/dev/slow"));
            thread::sleep(Duration::from_millis(50));
            scanner.open("/dev/fast").unwrap();
            let superseded = slow.join().unwrap();
            assert!(matches!(superseded, Err(Error::ConnectError { .. })));
        });

        assert!(wait_until(WAIT, || backend.device_for("/dev/slow").is_some_and(|d| d.is_closed())));
        assert!(scanner.connection_status());
        assert_eq!(scanner.state(), ConnectionState::Open);
        assert!(!backend.device_for("/dev/fast").unwrap().is_closed());
    }

    #[test]
    fn test_second_registration_replaces_first() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = started(&backend);
        let first = collect(&scanner);
        let second = collect(&scanner);

        backend.device(0).feed(b"X\r\n");
        assert_eq!(second.recv_timeout(WAIT).unwrap().0, "X");
        assert!(first.try_recv().is_err());
    }

    #[test]
    fn test_remove_listener_drops_scans() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = started(&backend);
        let scans = collect(&scanner);
        scanner.remove_scan_listener();

        backend.device(0).feed(b"dropped\r\n");
        assert!(scans.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_send_command_when_disconnected() {
        let backend = Arc::new(MockBackend::new());
        let scanner = Scanner::spawn(ScannerConfig::default(), backend.clone()).unwrap();
        assert!(matches!(scanner.send_command("PING"), Err(Error::NotConnected)));
        assert_eq!(backend.attempts(), 0);
    }

    #[test]
    fn test_send_command_appends_crlf() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = started(&backend);
        scanner.send_command("S_CMD_MT11").unwrap();
        assert_eq!(backend.device(0).written(), b"S_CMD_MT11\r\n");
    }

    #[test]
    fn test_disconnect_twice() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = started(&backend);

        scanner.disconnect();
        scanner.disconnect();
        assert!(!scanner.connection_status());
        assert_eq!(scanner.state(), ConnectionState::Disconnected);
        assert!(backend.device(0).is_closed());
    }

    #[test]
    fn test_disconnect_without_connection() {
        let backend = Arc::new(MockBackend::new());
        let scanner = Scanner::spawn(ScannerConfig::default(), backend).unwrap();
        scanner.disconnect();
        assert_eq!(scanner.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_runtime_error_keeps_session_alive() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = started(&backend);
        let scans = collect(&scanner);
        let device = backend.device(0);

        device.fail(ErrorKind::Other);
        assert!(wait_until(WAIT, || scanner.state() == ConnectionState::Error));
        assert!(scanner.connection_status());

        device.feed(b"AFTER\r\n");
        let (scan, _) = scans.recv_timeout(WAIT).unwrap();
        assert_eq!(scan, "AFTER");
        assert!(scanner.connection_status());
    }

    #[test]
    fn test_retried_open_stays_connecting() {
        let backend = Arc::new(MockBackend::new());
        let scanner = Scanner::spawn(ScannerConfig::default(), backend.clone()).unwrap();

        thread::scope(|s| {
            let opening = s.spawn(|| scanner.open("/dev/late"));
            assert!(wait_until(WAIT, || backend.attempts() >= 1));
            thread::sleep(Duration::from_millis(200));
            assert_eq!(scanner.state(), ConnectionState::Connecting);
            assert!(!scanner.connection_status());

            backend.set_behavior("/dev/late", OpenBehavior::Succeed);
            opening.join().unwrap().unwrap();
        });
        assert_eq!(scanner.state(), ConnectionState::Open);
        assert!(scanner.connection_status());
    }

    #[test]
    fn test_consumer_panic_keeps_connection() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = started(&backend);
        let (hit_tx, hit_rx) = mpsc::channel();
        scanner.on_scan(move |_scan| {
            let _ = hit_tx.send(());
            panic!("consumer bug")
        });

        let device = backend.device(0);
        device.feed(b"first\r\n");
        hit_rx.recv_timeout(WAIT).unwrap();
        let scans = collect(&scanner);
        device.feed(b"second\r\n");

        assert_eq!(scans.recv_timeout(WAIT).unwrap().0, "second");
        assert!(scanner.connection_status());
        assert_eq!(scanner.state(), ConnectionState::Open);
    }

    #[test]
    fn test_blocking_calls_from_callback_are_rejected() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = Arc::new(started(&backend));
        let (tx, rx) = mpsc::channel();

        let weak = Arc::downgrade(&scanner);
        scanner.on_scan(move |_scan| {
            if let Some(scanner) = weak.upgrade() {
                let sent = scanner.send_command("ACK");
                let reconnected = scanner.reconnect();
                scanner.disconnect();
                let _ = tx.send((sent, reconnected));
            }
            Ok(())
        });

        backend.device(0).feed(b"trigger\r\n");
        let (sent, reconnected) = rx.recv_timeout(WAIT).unwrap();
        assert!(matches!(sent, Err(Error::Reentrant)));
        assert!(!reconnected.success);
        assert!(wait_until(WAIT, || scanner.state() == ConnectionState::Disconnected));
    }

    #[test]
    fn test_drop_closes_device() {
        let backend = Arc::new(MockBackend::attached("/dev/serial0"));
        let scanner = started(&backend);
        drop(scanner);
        assert!(backend.device(0).is_closed());
    }
}
