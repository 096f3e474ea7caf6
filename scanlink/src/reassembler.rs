//! Reassembly of raw serial chunks into scan strings.
//!
//! The scanner either terminates each scan with CR+LF or, depending on
//! firmware and cabling, sends a scan as several undelimited writes. Both
//! shapes are handled over a single buffer:
//!
//! - **Delimiter path**: every complete CR+LF-terminated segment is emitted
//!   as soon as the delimiter arrives.
//! - **Quiescence path**: bytes left after the last delimiter are flushed
//!   once no chunk has arrived for [`QUIESCENCE_WINDOW`].
//!
//! The delimiter path always wins: the timer only ever sees bytes that no
//! delimiter has claimed, and it is re-armed on every chunk. Flushed bytes
//! leave the buffer, so nothing is emitted twice.

use log::{debug, log_enabled, trace, Level};
use std::time::{Duration, Instant};

/// Scan terminator sent by the scanner.
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// Silence after which buffered bytes count as one complete scan.
pub const QUIESCENCE_WINDOW: Duration = Duration::from_millis(100);

/// Accumulates chunks and yields complete, trimmed, non-empty scans.
#[derive(Debug)]
pub struct LineReassembler {
    buffer: Vec<u8>,
    last_chunk_at: Option<Instant>,
    window: Duration,
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReassembler {
    /// Create a reassembler with the standard quiescence window.
    pub fn new() -> Self {
        Self::with_window(QUIESCENCE_WINDOW)
    }

    /// Create a reassembler with a custom quiescence window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            last_chunk_at: None,
            window,
        }
    }

    /// Feed one raw chunk received at `now`.
    ///
    /// Returns the scans completed by a delimiter in this chunk, in order.
    pub fn push(&mut self, chunk: &[u8], now: Instant) -> Vec<String> {
        if log_enabled!(Level::Trace) {
            trace!(
                "Raw chunk: {} bytes, hex {}, ascii {:?}",
                chunk.len(),
                to_hex(chunk),
                String::from_utf8_lossy(chunk)
            );
        }

        self.buffer.extend_from_slice(chunk);

        let mut scans = Vec::new();
        while let Some(pos) = find_delimiter(&self.buffer) {
            let segment: Vec<u8> = self.buffer.drain(..pos + LINE_DELIMITER.len()).collect();
            if let Some(scan) = finish(&segment[..pos], "delimiter") {
                scans.push(scan);
            }
        }

        self.last_chunk_at = if self.buffer.is_empty() {
            None
        } else {
            trace!("Buffer holds {:?}", String::from_utf8_lossy(&self.buffer));
            Some(now)
        };

        scans
    }

    /// When the quiescence timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.last_chunk_at.map(|at| at + self.window)
    }

    /// Flush the buffer if the quiescence window has elapsed at `now`.
    pub fn poll_quiescence(&mut self, now: Instant) -> Option<String> {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                debug!("No data for {}ms, flushing buffer", self.window.as_millis());
                self.take_buffer("quiescence")
            },
            _ => None,
        }
    }

    /// Flush whatever is buffered, regardless of timing.
    pub fn flush(&mut self) -> Option<String> {
        self.take_buffer("flush")
    }

    /// Drop buffered bytes and disarm the timer.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            debug!("Discarding {} unterminated byte(s)", self.buffer.len());
        }
        self.buffer.clear();
        self.last_chunk_at = None;
    }

    /// Bytes waiting for a delimiter or the quiescence timer.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    fn take_buffer(&mut self, path: &str) -> Option<String> {
        self.last_chunk_at = None;
        if self.buffer.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.buffer);
        finish(&bytes, path)
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(LINE_DELIMITER.len())
        .position(|w| w == LINE_DELIMITER)
}

fn finish(bytes: &[u8], path: &str) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let scan = text.trim();
    if scan.is_empty() {
        debug!("Ignoring empty {path} result");
        None
    } else {
        debug!("Assembled scan via {path}: {scan:?}");
        Some(scan.to_string())
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
