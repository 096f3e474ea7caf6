//! Configuration file support for scanlink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SCANLINK_*)
//! 3. Local config file (./scanlink.toml)
//! 4. Global config file (~/.config/scanlink/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use scanlink::{DeviceCandidates, ScannerConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "scanlink.toml";

/// Default time a registration result stays on screen.
const DEFAULT_RESULT_DISPLAY_MS: u64 = 1000;

/// Default timeout for one registration request.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Scanner device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerSection {
    /// Fixed device path (skips discovery).
    pub port: Option<String>,
    /// Candidate device paths in preference order.
    #[serde(default)]
    pub candidates: Vec<String>,
}

/// Kiosk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KioskSection {
    /// Default credential, by name or id.
    pub key: Option<String>,
    /// How long a result stays visible, in milliseconds.
    pub result_display_ms: Option<u64>,
    /// Registration request timeout, in milliseconds.
    pub request_timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scanner configuration.
    #[serde(default)]
    pub scanner: ScannerSection,
    /// Kiosk configuration.
    #[serde(default)]
    pub kiosk: KioskSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "scanlink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Scanner config
        if other.scanner.port.is_some() {
            self.scanner.port = other.scanner.port;
        }
        if !other.scanner.candidates.is_empty() {
            self.scanner.candidates = other.scanner.candidates;
        }

        // Kiosk config
        if other.kiosk.key.is_some() {
            self.kiosk.key = other.kiosk.key;
        }
        if other.kiosk.result_display_ms.is_some() {
            self.kiosk.result_display_ms = other.kiosk.result_display_ms;
        }
        if other.kiosk.request_timeout_ms.is_some() {
            self.kiosk.request_timeout_ms = other.kiosk.request_timeout_ms;
        }
    }

    /// Build the library scanner configuration.
    ///
    /// `port_override` comes from `--port` / `SCANLINK_PORT` and wins over the file.
    pub fn scanner_config(&self, port_override: Option<&str>) -> ScannerConfig {
        ScannerConfig {
            candidates: if self.scanner.candidates.is_empty() {
                DeviceCandidates::default()
            } else {
                DeviceCandidates::new(self.scanner.candidates.iter().cloned())
            },
            port: port_override
                .map(str::to_string)
                .or_else(|| self.scanner.port.clone()),
        }
    }

    /// How long a registration result stays visible.
    pub fn result_display(&self) -> Duration {
        Duration::from_millis(
            self.kiosk
                .result_display_ms
                .unwrap_or(DEFAULT_RESULT_DISPLAY_MS),
        )
    }

    /// Timeout for one registration request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(
            self.kiosk
                .request_timeout_ms
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        )
    }
}
