//! # scanlink
//!
//! A library for reading a hardwired serial QR/barcode scanner.
//!
//! The scanner is attached to a board UART (typically a Raspberry Pi) and
//! sends each scan as ASCII text, usually terminated by CR+LF but sometimes
//! split across undelimited writes. This crate provides:
//!
//! - Device path selection across the usual UART nodes
//! - A connection lifecycle with open timeout and safe reconnection
//! - Reassembly of raw chunks into whole scans (delimiter or quiescence)
//! - Delivery of each scan to a single registered consumer
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for status and report types
//!
//! ## Example
//!
//! ```rust,no_run
//! use scanlink::{Scanner, ScannerConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let scanner = Scanner::start_native(ScannerConfig::default())?;
//!
//!         scanner.on_scan(|scan| {
//!             println!("Scanned: {scan}");
//!             Ok(())
//!         });
//!
//!         if !scanner.connection_status() {
//!             let report = scanner.reconnect();
//!             println!("Reconnected: {}", report.success);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod locator;
pub mod port;
pub mod reassembler;
pub mod scanner;

#[cfg(test)]
mod mock;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativeBackend, NativePort};
pub use {
    connection::{ConnectionState, OPEN_TIMEOUT, RECONNECT_SETTLE_DELAY},
    dispatcher::{ConsumerResult, DispatchOutcome, ScanCallback, ScanDispatcher},
    error::{DeviceFault, Error, Result},
    locator::{
        CandidateStatus, DEVICE_CANDIDATES, DeviceCandidates, DeviceSelection, SelectionSource,
        locate_device, survey_candidates,
    },
    port::{Port, PortInfo, SerialBackend, SerialConfig},
    reassembler::{LineReassembler, QUIESCENCE_WINDOW},
    scanner::{ReconnectReport, Scanner, ScannerConfig, select_device},
};
