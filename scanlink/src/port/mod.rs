//! Port abstraction for the scanner's serial line.
//!
//! The scanner subsystem never talks to `serialport` directly. It goes through
//! two traits:
//!
//! - [`Port`]: an open device handle (read, write, clone for a reader thread).
//! - [`SerialBackend`]: enumeration, existence probes and opening.
//!
//! ```text
//! +------------------+
//! | Scanner loop     |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | SerialBackend    |  list_ports / path_exists / open
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Native (serialport)
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use scanlink::port::Port;
//! use std::io::{Read, Write};
//!
//! fn example(port: &mut dyn Port) -> std::io::Result<()> {
//!     port.write_all(b"S_CMD_020D\r\n")?;
//!
//!     let mut buf = [0u8; 32];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Baud rate of the scanner UART.
pub const SCANNER_BAUD_RATE: u32 = 9600;

/// Read timeout used by reader threads so they can notice supersession.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/serial0").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Data bits.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Flow control.
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: SCANNER_BAUD_RATE,
            timeout: READ_POLL_INTERVAL,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Fixed scanner framing: 9600-8-N-1, no flow control.
    pub fn scanner(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Serial port information reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

impl PortInfo {
    /// A port with no USB metadata (on-board UARTs, test fixtures).
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

/// An open device handle.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Discard bytes received but not yet read.
    fn clear_input(&mut self) -> Result<()>;

    /// Create a second handle to the same device for a background reader.
    fn try_clone_port(&self) -> Result<Box<dyn Port>>;

    /// Close the port and release resources.
    ///
    /// Calling this more than once is allowed.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }
}

/// Access to the host's serial devices.
///
/// Separated from [`Port`] because enumeration and probing do not need an
/// open handle.
pub trait SerialBackend: Send + Sync {
    /// List all serial ports visible to the operating system.
    fn list_ports(&self) -> Result<Vec<PortInfo>>;

    /// Whether a device node exists on the filesystem.
    fn path_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    /// Open a device with the given configuration.
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>>;
}

#[cfg(feature = "native")]
pub use native::{NativeBackend, NativePort};
