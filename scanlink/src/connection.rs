//! Serial connection lifecycle.
//!
//! [`ConnectionManager`] owns the device handle and is driven exclusively by
//! the scanner event loop. Blocking work runs on helper threads:
//!
//! - an **opener** retries [`SerialBackend::open`] until it succeeds, hits a
//!   permission failure, or [`OPEN_TIMEOUT`] runs out;
//! - a **reader** polls the open port and forwards chunks and errors. It
//!   keeps polling after an error until its generation is retired.
//!
//! Helpers report back through an [`EventSink`] tagged with the generation
//! they were started for. Every `begin_open` and `close` bumps the
//! generation, so notices from a superseded handle are recognized and
//! dropped instead of corrupting the current connection.

use crate::error::{DeviceFault, Error, Result};
use crate::port::{Port, READ_POLL_INTERVAL, SerialBackend, SerialConfig};
use crate::reassembler::LINE_DELIMITER;
use log::{debug, error, info, trace, warn};
use std::fmt;
use std::io::{self, ErrorKind, Read as _};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long an open may take before it is reported as a timeout.
pub const OPEN_TIMEOUT: Duration = Duration::from_millis(2000);

/// Delay between open attempts on a busy or missing device.
pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Settle time between re-initializing and reporting connection status.
pub const RECONNECT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Size of one read from the device.
const READ_CHUNK_SIZE: usize = 1024;

/// Lifecycle state of the scanner connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum ConnectionState {
    /// No handle.
    #[default]
    Disconnected = 0,
    /// Open in progress.
    Connecting = 1,
    /// Handle open and being read.
    Open = 2,
    /// Last open or read failed.
    Error = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Open,
            3 => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Error => "error",
        })
    }
}

/// Connection status readable from any thread without a round-trip.
#[derive(Debug, Default)]
pub(crate) struct StatusCell {
    open: AtomicBool,
    state: AtomicU8,
}

impl StatusCell {
    fn publish(&self, state: ConnectionState, open: bool) {
        self.state.store(state as u8, Ordering::Release);
        self.open.store(open, Ordering::Release);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Something that happened on a helper thread.
pub(crate) enum DeviceEvent {
    /// The backend opened the device.
    Opened(Box<dyn Port>),
    /// One open attempt failed. `fatal` failures are not retried.
    OpenFailed { error: Error, fatal: bool },
    /// Bytes read from the device.
    Data(Vec<u8>),
    /// A read failed. Reported once per run of consecutive failures.
    Failed(io::Error),
}

/// A [`DeviceEvent`] tagged with the generation of the attempt it belongs to.
pub(crate) struct DeviceNotice {
    pub generation: u64,
    pub event: DeviceEvent,
}

/// Where helper threads deliver notices.
pub(crate) type EventSink = Arc<dyn Fn(DeviceNotice) + Send + Sync>;

/// Outcome of acknowledging an opened handle.
#[derive(Debug)]
pub(crate) enum OpenAck {
    /// The handle became the current connection.
    Adopted,
    /// The handle belonged to a superseded attempt and was closed.
    Stale,
    /// The handle was current but could not be put into service.
    Failed(Error),
}

pub(crate) struct ConnectionManager {
    backend: Arc<dyn SerialBackend>,
    sink: EventSink,
    status: Arc<StatusCell>,
    generation: Arc<AtomicU64>,
    state: ConnectionState,
    path: Option<String>,
    port: Option<Box<dyn Port>>,
    reader: Option<JoinHandle<()>>,
    failures: u32,
}

impl ConnectionManager {
    pub(crate) fn new(
        backend: Arc<dyn SerialBackend>,
        sink: EventSink,
        status: Arc<StatusCell>,
    ) -> Self {
        Self {
            backend,
            sink,
            status,
            generation: Arc::new(AtomicU64::new(0)),
            state: ConnectionState::Disconnected,
            path: None,
            port: None,
            reader: None,
            failures: 0,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state: {} -> {}", self.state, state);
        }
        self.state = state;
        self.status.publish(state, self.port.is_some());
    }

    fn current_path(&self) -> String {
        self.path.clone().unwrap_or_default()
    }

    /// Start opening `path`, closing any current handle first.
    ///
    /// Returns the generation of the new attempt. The outcome arrives
    /// later as [`DeviceEvent::Opened`] or [`DeviceEvent::OpenFailed`].
    pub(crate) fn begin_open(&mut self, path: &str) -> u64 {
        self.release_handle();
        let generation = self.bump_generation();
        self.path = Some(path.to_string());
        self.failures = 0;
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to scanner on {path}");

        let backend = Arc::clone(&self.backend);
        let sink = Arc::clone(&self.sink);
        let current = Arc::clone(&self.generation);
        let previous_reader = self.reader.take();
        let config = SerialConfig::scanner(path);

        let spawned = thread::Builder::new()
            .name(format!("scanlink-open-{generation}"))
            .spawn(move || {
                // The old reader holds a cloned descriptor; wait for it so
                // the exclusive lock on the device is released.
                if let Some(reader) = previous_reader {
                    let _ = reader.join();
                }
                run_opener(backend.as_ref(), &config, generation, &current, &sink);
            });

        if let Err(e) = spawned {
            error!("Failed to spawn opener thread: {e}");
            (self.sink)(DeviceNotice {
                generation,
                event: DeviceEvent::OpenFailed {
                    error: Error::Io(e),
                    fatal: true,
                },
            });
        }
        generation
    }

    /// Take ownership of a handle opened for `generation`.
    pub(crate) fn acknowledge_open(&mut self, generation: u64, mut port: Box<dyn Port>) -> OpenAck {
        if generation != self.generation() {
            warn!(
                "Closing {} opened by superseded attempt #{generation}",
                port.name()
            );
            let _ = port.close();
            return OpenAck::Stale;
        }

        let path = port.name().to_string();
        if let Err(e) = port.clear_input() {
            warn!("Could not discard stale input on {path}: {e}");
        }
        let reader_port = match port.try_clone_port() {
            Ok(reader_port) => reader_port,
            Err(e) => {
                error!("Could not start reading {path}: {e}");
                let _ = port.close();
                self.set_state(ConnectionState::Error);
                return OpenAck::Failed(e);
            },
        };

        let sink = Arc::clone(&self.sink);
        let current = Arc::clone(&self.generation);
        let spawned = thread::Builder::new()
            .name(format!("scanlink-read-{generation}"))
            .spawn(move || run_reader(reader_port, generation, &current, &sink));

        match spawned {
            Ok(handle) => self.reader = Some(handle),
            Err(e) => {
                error!("Failed to spawn reader thread: {e}");
                let _ = port.close();
                self.set_state(ConnectionState::Error);
                return OpenAck::Failed(Error::Io(e));
            },
        }

        info!("Serial port {path} opened");
        self.port = Some(port);
        self.failures = 0;
        self.set_state(ConnectionState::Open);
        OpenAck::Adopted
    }

    /// Record a failed open attempt. Returns `true` if it is current.
    ///
    /// Retried failures leave the state at `Connecting`; only a fatal
    /// failure or [`open_timed_out`](Self::open_timed_out) moves it to `Error`.
    pub(crate) fn open_failed(&mut self, generation: u64, error: &Error, fatal: bool) -> bool {
        if generation != self.generation() {
            debug!("Ignoring open failure from superseded attempt #{generation}: {error}");
            return false;
        }

        self.failures += 1;
        if self.failures == 1 {
            error!("Failed to open {}: {error}", self.current_path());
            log_remediation(error.fault());
        } else {
            debug!("Open attempt {} failed: {error}", self.failures);
        }
        if fatal {
            self.set_state(ConnectionState::Error);
        }
        true
    }

    /// The open deadline for `generation` passed without a handle.
    pub(crate) fn open_timed_out(&mut self, generation: u64) -> Option<Error> {
        if generation != self.generation() || self.port.is_some() {
            return None;
        }

        let error = Error::ConnectTimeout {
            path: self.current_path(),
            timeout: OPEN_TIMEOUT,
        };
        error!("Connection timeout: {error}");
        self.set_state(ConnectionState::Error);
        Some(error)
    }

    /// Whether data from `generation` belongs to the current handle.
    pub(crate) fn accepts_data(&self, generation: u64) -> bool {
        generation == self.generation() && self.port.is_some()
    }

    /// The reader for `generation` reported `error`.
    ///
    /// The handle is kept and the reader keeps polling; only
    /// [`close`](Self::close) or a new open drops it.
    pub(crate) fn device_failed(&mut self, generation: u64, error: &io::Error) {
        if generation != self.generation() {
            debug!("Ignoring error from superseded attempt #{generation}: {error}");
            return;
        }

        let fault = match DeviceFault::from_io_kind(error.kind()) {
            DeviceFault::Other => DeviceFault::from_message(&error.to_string()),
            fault => fault,
        };
        let error = Error::RuntimeDevice {
            path: self.current_path(),
            reason: error.to_string(),
            fault,
        };
        error!("Serial port error: {error}");
        log_remediation(fault);
        self.set_state(ConnectionState::Error);
    }

    /// Close the handle if any and wait for its reader to let go of the
    /// device. Safe to call repeatedly.
    pub(crate) fn close(&mut self) {
        self.bump_generation();
        self.release_handle();
        self.join_reader();
        self.set_state(ConnectionState::Disconnected);
    }

    fn join_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
    }

    /// Write `text` followed by CR+LF.
    pub(crate) fn send(&mut self, text: &str) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        let mut line = Vec::with_capacity(text.len() + LINE_DELIMITER.len());
        line.extend_from_slice(text.as_bytes());
        line.extend_from_slice(LINE_DELIMITER);
        port.write_all_bytes(&line)?;

        debug!("Sent command {text:?}");
        Ok(())
    }

    fn release_handle(&mut self) {
        if let Some(mut port) = self.port.take() {
            match port.close() {
                Ok(()) => info!("Scanner disconnected from {}", port.name()),
                Err(e) => warn!("Error closing {}: {e}", port.name()),
            }
        }
    }
}

fn log_remediation(fault: DeviceFault) {
    for hint in fault.remediation() {
        warn!("{hint}");
    }
}

fn run_opener(
    backend: &dyn SerialBackend,
    config: &SerialConfig,
    generation: u64,
    current: &AtomicU64,
    sink: &EventSink,
) {
    let deadline = Instant::now() + OPEN_TIMEOUT;

    loop {
        if current.load(Ordering::Acquire) != generation {
            debug!("Abandoning superseded open of {}", config.port_name);
            return;
        }

        match backend.open(config) {
            Ok(port) => {
                sink(DeviceNotice {
                    generation,
                    event: DeviceEvent::Opened(port),
                });
                return;
            },
            Err(error) => {
                let fatal = error.fault() == DeviceFault::PermissionDenied;
                sink(DeviceNotice {
                    generation,
                    event: DeviceEvent::OpenFailed { error, fatal },
                });

                let now = Instant::now();
                if fatal || now >= deadline {
                    return;
                }
                thread::sleep(OPEN_RETRY_DELAY.min(deadline - now));
                if Instant::now() >= deadline {
                    return;
                }
            },
        }
    }
}

fn run_reader(mut port: Box<dyn Port>, generation: u64, current: &AtomicU64, sink: &EventSink) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut failing = false;

    while current.load(Ordering::Acquire) == generation {
        match port.read(&mut buf) {
            Ok(0) => thread::sleep(READ_POLL_INTERVAL),
            Ok(n) => {
                if failing {
                    info!("Reads on {} recovered", port.name());
                    failing = false;
                }
                sink(DeviceNotice {
                    generation,
                    event: DeviceEvent::Data(buf[..n].to_vec()),
                });
            },
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {},
            Err(e) => {
                if failing {
                    trace!("Read on {} still failing: {e}", port.name());
                } else if current.load(Ordering::Acquire) == generation {
                    failing = true;
                    sink(DeviceNotice {
                        generation,
                        event: DeviceEvent::Failed(e),
                    });
                }
                thread::sleep(READ_POLL_INTERVAL);
            },
        }
    }

    let _ = port.close();
    trace!("Reader for attempt #{generation} stopped");
}
