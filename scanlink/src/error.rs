//! Error types for scanlink.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for scanlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a device failure, used to pick remediation hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    /// The device node does not exist (UART disabled or cable missing).
    MissingDevice,
    /// The process may not open the device node.
    PermissionDenied,
    /// Anything else.
    Other,
}

impl DeviceFault {
    /// Classify an I/O error kind.
    #[must_use]
    pub fn from_io_kind(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => Self::MissingDevice,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Other,
        }
    }

    /// Classify an error message the way the OS reports it.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        if message.contains("No such file or directory") || message.contains("No such device") {
            Self::MissingDevice
        } else if message.contains("Permission denied") {
            Self::PermissionDenied
        } else {
            Self::Other
        }
    }

    /// Operator-facing steps that usually fix this fault on a Raspberry Pi.
    #[must_use]
    pub fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::MissingDevice => &[
                "UART device not found. For a hardwired scanner:",
                "1. Enable UART: sudo raspi-config -> Interface Options -> Serial",
                "2. Disable console: Login shell over serial = NO",
                "3. Enable hardware: Serial port hardware = YES",
                "4. Add to /boot/config.txt: enable_uart=1",
                "5. Reboot the system",
            ],
            Self::PermissionDenied => &[
                "Permission denied. Add the user to the dialout group:",
                "sudo usermod -a -G dialout $USER",
                "Then log out and log in again",
            ],
            Self::Other => &[],
        }
    }
}

/// Error type for scanlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port reads and writes).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Serial port enumeration failed.
    #[error("Serial port enumeration failed: {0}")]
    Discovery(String),

    /// The device did not acknowledge the open in time.
    #[error("Failed to connect to {path} within {}ms", .timeout.as_millis())]
    ConnectTimeout {
        /// Device path.
        path: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The device refused to open.
    #[error("Failed to open {path}: {reason}")]
    ConnectError {
        /// Device path.
        path: String,
        /// OS-level reason.
        reason: String,
        /// Classification of the failure.
        fault: DeviceFault,
    },

    /// Asynchronous error reported by an open device.
    #[error("Device error on {path}: {reason}")]
    RuntimeDevice {
        /// Device path.
        path: String,
        /// OS-level reason.
        reason: String,
        /// Classification of the failure.
        fault: DeviceFault,
    },

    /// A command needs an open device but none is open.
    #[error("Scanner not connected")]
    NotConnected,

    /// The registered scan consumer failed.
    #[error("Scan consumer failed: {0}")]
    Consumer(String),

    /// A blocking scanner command was issued from inside a scan callback.
    #[error("Scanner command issued from inside a scan callback")]
    Reentrant,

    /// The scanner event loop is no longer running.
    #[error("Scanner event loop has shut down")]
    Shutdown,
}

impl Error {
    /// Whether this error is a connect timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. })
    }

    /// Device fault classification, when the error came from the device.
    #[must_use]
    pub fn fault(&self) -> DeviceFault {
        match self {
            Self::ConnectError { fault, .. } | Self::RuntimeDevice { fault, .. } => *fault,
            Self::Io(e) => match DeviceFault::from_io_kind(e.kind()) {
                DeviceFault::Other => DeviceFault::from_message(&e.to_string()),
                fault => fault,
            },
            #[cfg(feature = "native")]
            Self::Serial(e) => match e.kind() {
                serialport::ErrorKind::NoDevice => DeviceFault::MissingDevice,
                serialport::ErrorKind::Io(kind) => match DeviceFault::from_io_kind(kind) {
                    DeviceFault::Other => DeviceFault::from_message(&e.description),
                    fault => fault,
                },
                _ => DeviceFault::from_message(&e.description),
            },
            _ => DeviceFault::Other,
        }
    }
}
