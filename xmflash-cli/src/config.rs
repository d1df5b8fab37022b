//! Configuration file support for xmflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (XMFLASH_*)
//! 3. Local config file (./xmflash.toml)
//! 4. Global config file (~/.config/xmflash/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use xmflash::XmodemConfig;

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "xmflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Flash target configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    /// First writable address.
    pub base: Option<u32>,
    /// Writable region size in bytes.
    pub size: Option<u32>,
    /// Read every block back after programming it.
    #[serde(default)]
    pub verify: bool,
}

/// XMODEM timing overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XmodemSection {
    /// Wait per attempt for the first frame, in milliseconds.
    pub first_timeout_ms: Option<u64>,
    /// Wait per attempt for every later frame, in milliseconds.
    pub frame_timeout_ms: Option<u64>,
    /// Receive attempts per frame.
    pub max_retries: Option<u32>,
}

impl XmodemSection {
    /// Engine configuration with these overrides applied to the defaults.
    pub fn to_engine_config(&self) -> XmodemConfig {
        let mut config = XmodemConfig::default();
        if let Some(ms) = self.first_timeout_ms {
            config.first_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.frame_timeout_ms {
            config.frame_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        config
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Flash target configuration.
    #[serde(default)]
    pub target: TargetConfig,
    /// XMODEM timing configuration.
    #[serde(default)]
    pub xmodem: XmodemSection,
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
        ProjectDirs::from("", "", "xmflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.target.base.is_some() {
            self.target.base = other.target.base;
        }
        if other.target.size.is_some() {
            self.target.size = other.target.size;
        }
        if other.target.verify {
            self.target.verify = true;
        }

        if other.xmodem.first_timeout_ms.is_some() {
            self.xmodem.first_timeout_ms = other.xmodem.first_timeout_ms;
        }
        if other.xmodem.frame_timeout_ms.is_some() {
            self.xmodem.frame_timeout_ms = other.xmodem.frame_timeout_ms;
        }
        if other.xmodem.max_retries.is_some() {
            self.xmodem.max_retries = other.xmodem.max_retries;
        }
    }

    /// Remember the selected serial port in the local config file.
    pub fn remember_port(&mut self, serial: &str) -> anyhow::Result<()> {
        self.remember_port_at(Path::new(LOCAL_CONFIG_FILE), serial)
    }

    fn remember_port_at(&mut self, path: &Path, serial: &str) -> anyhow::Result<()> {
        // Keep whatever else the file already holds
        let mut on_disk = Self::load_from_file(path).unwrap_or_default();
        on_disk.connection.serial = Some(serial.to_string());
        self.connection.serial = Some(serial.to_string());

        let content = toml::to_string_pretty(&on_disk)?;
        fs::write(path, content)?;
        info!("Saved port {serial} to {}", path.display());

        Ok(())
    }
}
