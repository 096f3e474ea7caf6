//! Device path selection for the hardwired scanner.
//!
//! The scanner sits on an on-board UART whose device node differs between
//! Raspberry Pi models and `config.txt` settings. Enumeration alone is not
//! trustworthy (the `/dev/serial*` symlinks never show up in it), so
//! selection runs in three stages:
//!
//! 1. enumerate and take the first candidate the OS reports,
//! 2. probe the filesystem for the primary UART paths,
//! 3. fall back to the lowest-preference candidate.
//!
//! A path is always returned.

use crate::port::{PortInfo, SerialBackend};
use log::{debug, info, warn};

/// Candidate device paths in preference order.
pub const DEVICE_CANDIDATES: [&str; 4] = [
    "/dev/serial0", // primary UART symlink
    "/dev/ttyAMA0", // PL011 hardware UART
    "/dev/ttyS0",   // mini UART
    "/dev/serial1", // secondary UART symlink
];

/// How many leading candidates are probed directly on the filesystem.
pub const PRIMARY_CANDIDATE_COUNT: usize = 2;

/// Ordered list of device paths to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidates {
    paths: Vec<String>,
}

impl Default for DeviceCandidates {
    fn default() -> Self {
        Self {
            paths: DEVICE_CANDIDATES.iter().map(ToString::to_string).collect(),
        }
    }
}

impl DeviceCandidates {
    /// Build a candidate list from configured paths.
    ///
    /// An empty list falls back to [`DEVICE_CANDIDATES`].
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        if paths.is_empty() {
            warn!("Empty device candidate list, using built-in defaults");
            return Self::default();
        }
        Self { paths }
    }

    /// All candidates in preference order.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Candidates probed directly on the filesystem.
    pub fn primary(&self) -> &[String] {
        &self.paths[..PRIMARY_CANDIDATE_COUNT.min(self.paths.len())]
    }

    /// Best-effort default when nothing else matched.
    pub fn fallback(&self) -> &str {
        self.paths
            .last()
            .map_or(DEVICE_CANDIDATES[DEVICE_CANDIDATES.len() - 1], String::as_str)
    }
}

/// Which stage produced the selected path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SelectionSource {
    /// The path was configured explicitly.
    Configured,
    /// The OS enumerated the device.
    Enumerated,
    /// The device node exists on the filesystem.
    Filesystem,
    /// Nothing matched; the path may not work.
    Fallback,
}

/// The path chosen for the scanner and how it was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceSelection {
    /// Selected device path.
    pub path: String,
    /// Stage that produced it.
    pub source: SelectionSource,
}

impl DeviceSelection {
    /// Whether the path was confirmed to exist.
    pub fn is_confirmed(&self) -> bool {
        !matches!(self.source, SelectionSource::Fallback)
    }
}

/// Presence of one candidate, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CandidateStatus {
    /// Candidate path.
    pub path: String,
    /// Reported by enumeration.
    pub enumerated: bool,
    /// Device node exists.
    pub exists: bool,
}

/// Select the scanner device path.
pub fn locate_device(backend: &dyn SerialBackend, candidates: &DeviceCandidates) -> DeviceSelection {
    match backend.list_ports() {
        Ok(ports) => {
            debug!("Enumerated {} serial port(s)", ports.len());
            for port in &ports {
                debug!(
                    "  {} (manufacturer: {}, vid: {}, pid: {})",
                    port.name,
                    port.manufacturer.as_deref().unwrap_or("-"),
                    port.vid.map_or_else(|| "-".to_string(), |v| format!("{v:04X}")),
                    port.pid.map_or_else(|| "-".to_string(), |p| format!("{p:04X}")),
                );
            }
            if let Some(path) = first_enumerated(&ports, candidates) {
                info!("Selected enumerated scanner port {path}");
                return DeviceSelection {
                    path,
                    source: SelectionSource::Enumerated,
                };
            }
        },
        Err(e) => warn!("Could not list serial ports: {e}"),
    }

    debug!("No candidate enumerated, checking filesystem directly");
    for path in candidates.primary() {
        if backend.path_exists(path) {
            info!("Found {path} in filesystem");
            return DeviceSelection {
                path: path.clone(),
                source: SelectionSource::Filesystem,
            };
        }
        debug!("{path} not found in filesystem");
    }

    let path = candidates.fallback().to_string();
    warn!("No scanner UART found, falling back to {path}; this may not work reliably");
    warn!("Consider enabling the primary UART with: sudo raspi-config");
    DeviceSelection {
        path,
        source: SelectionSource::Fallback,
    }
}

fn first_enumerated(ports: &[PortInfo], candidates: &DeviceCandidates) -> Option<String> {
    candidates
        .paths()
        .iter()
        .find(|path| {
            let found = ports.iter().any(|p| &p.name == *path);
            debug!("Checking {path}: {}", if found { "found" } else { "not found" });
            found
        })
        .cloned()
}

/// Report every candidate's presence.
pub fn survey_candidates(
    backend: &dyn SerialBackend,
    candidates: &DeviceCandidates,
    ports: &[PortInfo],
) -> Vec<CandidateStatus> {
    candidates
        .paths()
        .iter()
        .map(|path| CandidateStatus {
            path: path.clone(),
            enumerated: ports.iter().any(|p| &p.name == path),
            exists: backend.path_exists(path),
        })
        .collect()
}
