//! Remembered connection preferences.
//!
//! The last port and baud that worked are kept in a small TOML file so the
//! next run can omit them. The file is looked up in this order:
//! 1. `--config PATH`
//! 2. `./w600flash.toml`, if it exists
//! 3. The per-user config directory (`~/.config/w600flash/config.toml` on Linux)
//!
//! It is rewritten only when a remembered value actually changes.

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local preference file name.
pub const LOCAL_CONFIG: &str = "w600flash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Last used serial port (e.g., "/dev/ttyUSB0" or "COM6").
    pub serial: Option<String>,
    /// Last used baud rate.
    pub baud: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// File this configuration is saved to.
    #[serde(skip)]
    path: Option<PathBuf>,

    /// Whether a remembered value changed since loading.
    #[serde(skip)]
    dirty: bool,
}

impl Config {
    /// Load configuration from the default locations.
    pub fn load() -> Self {
        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::load_from_path(local);
        }

        match Self::global_config_path() {
            Some(global) => Self::load_from_path(&global),
            None => Self::default(),
        }
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// A missing or unreadable file yields defaults that will be saved to
    /// `path`.
    pub fn load_from_path(path: &Path) -> Self {
        let mut config = Self::load_from_file(path).unwrap_or_default();
        config.path = Some(path.to_path_buf());
        config
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    Some(config)
                },
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
        ProjectDirs::from("", "", "w600flash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Remember `port`; returns whether it changed.
    pub fn remember_port(&mut self, port: &str) -> bool {
        if self.connection.serial.as_deref() == Some(port) {
            return false;
        }
        self.connection.serial = Some(port.to_string());
        self.dirty = true;
        true
    }

    /// Remember `baud`; returns whether it changed.
    pub fn remember_baud(&mut self, baud: u32) -> bool {
        if self.connection.baud == Some(baud) {
            return false;
        }
        self.connection.baud = Some(baud);
        self.dirty = true;
        true
    }

    /// Whether there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the file if anything changed. Returns whether it was written.
    pub fn save_if_changed(&mut self) -> anyhow::Result<bool> {
        if !self.dirty {
            return Ok(false);
        }

        let path = match &self.path {
            Some(path) => path.clone(),
            None => match Self::global_config_dir() {
                Some(dir) => dir.join("config.toml"),
                None => PathBuf::from(LOCAL_CONFIG),
            },
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("Saved preferences to {}", path.display());

        self.path = Some(path);
        self.dirty = false;
        Ok(true)
    }
}
