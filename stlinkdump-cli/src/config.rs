//! Configuration file support for stlinkdump.
//!
//! Only host-side timeouts are configurable. Files are loaded in this order,
//! later ones overriding earlier ones:
//! 1. Global config file (~/.config/stlinkdump/config.toml)
//! 2. Local config file (./stlinkdump.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use stlinkdump::SessionConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local config file.
const LOCAL_CONFIG: &str = "stlinkdump.toml";

/// USB transfer settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsbConfig {
    /// Timeout of one bulk transfer in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Serial channel settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerialSection {
    /// Timeout of one serial read in milliseconds.
    pub poll_timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// USB settings.
    #[serde(default)]
    pub usb: UsbConfig,
    /// Serial settings.
    #[serde(default)]
    pub serial: SerialSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file.
    ///
    /// Missing files yield `None` silently; unreadable or malformed files are
    /// reported and ignored.
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
        ProjectDirs::from("", "", "stlinkdump").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.usb.timeout_ms.is_some() {
            self.usb.timeout_ms = other.usb.timeout_ms;
        }
        if other.serial.poll_timeout_ms.is_some() {
            self.serial.poll_timeout_ms = other.serial.poll_timeout_ms;
        }
    }

    /// Build the session parameters, starting from the library defaults.
    pub fn session(&self) -> SessionConfig {
        let mut session = SessionConfig::default();
        if let Some(ms) = self.usb.timeout_ms {
            session.usb_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.serial.poll_timeout_ms {
            session.serial_timeout = Duration::from_millis(ms);
        }
        session
    }
}
