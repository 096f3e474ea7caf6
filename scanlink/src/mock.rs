//! In-memory serial backend for tests.

use crate::error::{Error, Result};
use crate::port::{Port, PortInfo, SerialBackend, SerialConfig};
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// What `open` does for a given path.
#[derive(Debug, Clone, Copy)]
pub(crate) enum OpenBehavior {
    Succeed,
    Fail(io::ErrorKind),
    /// Block for the given time, then succeed.
    Delay(Duration),
}

/// Serial backend whose ports, device nodes and open results are scripted.
#[derive(Default)]
pub(crate) struct MockBackend {
    ports: Mutex<Option<Vec<PortInfo>>>,
    existing: Mutex<HashSet<String>>,
    behaviors: Mutex<HashMap<String, OpenBehavior>>,
    devices: Mutex<Vec<MockDevice>>,
    attempts: AtomicUsize,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self {
            ports: Mutex::new(Some(Vec::new())),
            ..Default::default()
        }
    }

    /// A backend where `path` is enumerated and opens successfully.
    pub(crate) fn attached(path: &str) -> Self {
        let backend = Self::new();
        backend.set_ports(&[path]);
        backend.set_behavior(path, OpenBehavior::Succeed);
        backend
    }

    pub(crate) fn set_ports(&self, names: &[&str]) {
        *self.ports.lock().unwrap() = Some(names.iter().map(|n| PortInfo::bare(*n)).collect());
    }

    pub(crate) fn fail_enumeration(&self) {
        *self.ports.lock().unwrap() = None;
    }

    pub(crate) fn add_existing(&self, path: &str) {
        self.existing.lock().unwrap().insert(path.to_string());
    }

    pub(crate) fn set_behavior(&self, path: &str, behavior: OpenBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(path.to_string(), behavior);
    }

    /// Number of successful opens.
    pub(crate) fn open_count(&self) -> usize {
        self.devices.lock().unwrap().len()
    }

    /// Number of open attempts, successful or not.
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The `index`-th successfully opened device.
    pub(crate) fn device(&self, index: usize) -> MockDevice {
        self.devices.lock().unwrap()[index].clone()
    }

    /// The most recent device opened on `path`.
    pub(crate) fn device_for(&self, path: &str) -> Option<MockDevice> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|d| d.path() == path)
            .cloned()
    }
}

impl SerialBackend for MockBackend {
    fn list_ports(&self) -> Result<Vec<PortInfo>> {
        self.ports
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Discovery("mock enumeration failure".to_string()))
    }

    fn path_exists(&self, path: &str) -> bool {
        self.existing.lock().unwrap().contains(path)
    }

    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&config.port_name)
            .copied()
            .unwrap_or(OpenBehavior::Fail(io::ErrorKind::NotFound));

        match behavior {
            OpenBehavior::Fail(kind) => Err(Error::Io(io::Error::new(
                kind,
                format!("cannot open {}", config.port_name),
            ))),
            OpenBehavior::Delay(delay) => {
                thread::sleep(delay);
                Ok(self.create_port(config))
            },
            OpenBehavior::Succeed => Ok(self.create_port(config)),
        }
    }
}

impl MockBackend {
    fn create_port(&self, config: &SerialConfig) -> Box<dyn Port> {
        let device = MockDevice::new(&config.port_name);
        self.devices.lock().unwrap().push(device.clone());
        Box::new(MockPort {
            device,
            timeout: config.timeout,
            closed: false,
            primary: true,
        })
    }
}

struct MockShared {
    path: String,
    tx: Mutex<Sender<io::Result<Vec<u8>>>>,
    rx: Mutex<Receiver<io::Result<Vec<u8>>>>,
    leftover: Mutex<Vec<u8>>,
    written: Mutex<Vec<u8>>,
    closed: AtomicBool,
    cleared: AtomicUsize,
}

/// Test-side view of an opened device: inject bytes and errors, inspect writes.
#[derive(Clone)]
pub(crate) struct MockDevice {
    shared: Arc<MockShared>,
}

impl MockDevice {
    fn new(path: &str) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            shared: Arc::new(MockShared {
                path: path.to_string(),
                tx: Mutex::new(tx),
                rx: Mutex::new(rx),
                leftover: Mutex::new(Vec::new()),
                written: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                cleared: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.shared.path
    }

    /// Make `bytes` available to the next read.
    pub(crate) fn feed(&self, bytes: &[u8]) {
        let _ = self.shared.tx.lock().unwrap().send(Ok(bytes.to_vec()));
    }

    /// Make the next read fail.
    pub(crate) fn fail(&self, kind: io::ErrorKind) {
        let _ = self
            .shared
            .tx
            .lock()
            .unwrap()
            .send(Err(io::Error::new(kind, "mock device error")));
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.shared.written.lock().unwrap().clone()
    }

    /// How many times pending input was discarded.
    pub(crate) fn clear_count(&self) -> usize {
        self.shared.cleared.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

struct MockPort {
    device: MockDevice,
    timeout: Duration,
    closed: bool,
    // Only closing the handle returned by `open` closes the device.
    primary: bool,
}

impl MockPort {
    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"))
        } else {
            Ok(())
        }
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let shared = &self.device.shared;

        {
            let mut leftover = shared.leftover.lock().unwrap();
            if !leftover.is_empty() {
                let n = leftover.len().min(buf.len());
                buf[..n].copy_from_slice(&leftover[..n]);
                leftover.drain(..n);
                return Ok(n);
            }
        }

        let received = shared.rx.lock().unwrap().recv_timeout(self.timeout);
        match received {
            Ok(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    shared.leftover.lock().unwrap().extend_from_slice(&bytes[n..]);
                }
                Ok(n)
            },
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timeout"))
            },
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock device gone"))
            },
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.device
            .shared
            .written
            .lock()
            .unwrap()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        self.device.path()
    }

    fn clear_input(&mut self) -> Result<()> {
        self.device.shared.leftover.lock().unwrap().clear();
        self.device.shared.cleared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn try_clone_port(&self) -> Result<Box<dyn Port>> {
        self.ensure_open()?;
        Ok(Box::new(MockPort {
            device: self.device.clone(),
            timeout: self.timeout,
            closed: false,
            primary: false,
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        if self.primary {
            self.device.shared.closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
