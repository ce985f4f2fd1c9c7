//! Locating, reading and writing the stockpile config file.
//!
//! The file lives at `~/.stockpile/config.ini` unless `STOCKPILE_CONFIG`
//! points somewhere else. Saves go through a sibling `.tmp` file and a
//! rename, so a crash mid-save never leaves a truncated config behind.

use ini::Ini;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::settings::ConfigFile;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "STOCKPILE_CONFIG";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file {path}: {reason}")]
    WriteError { path: PathBuf, reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create a directory the config refers to
    #[error("Failed to create directory {path}: {source}")]
    DirectoryError {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigFile {
    /// Load configuration from [`config_file_path`].
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to [`config_file_path`].
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to `path`, replacing any existing file atomically.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir(parent)?;
        }

        let staging = staging_path(path);
        let write_error = |e: std::io::Error| ConfigFileError::WriteError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        fs::write(&staging, super::writer::to_config_string(self)).map_err(write_error)?;
        if let Err(e) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(write_error(e));
        }
        Ok(())
    }

    /// Create the storage and log directories this config points at.
    ///
    /// The external root is left alone; it belongs to a removable store
    /// that may not be mounted.
    pub fn create_directories(&self) -> Result<(), ConfigFileError> {
        create_dir(&self.storage.internal_dir)?;
        create_dir(&self.logging.directory)
    }

    /// Write a default config file at [`config_file_path`] unless one is
    /// already there, then make sure its directories exist.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        Self::ensure_exists_at(&path)?;
        Ok(path)
    }

    /// [`ensure_exists`](Self::ensure_exists) for an explicit path.
    ///
    /// An existing file is loaded, never overwritten.
    pub fn ensure_exists_at(path: &Path) -> Result<Self, ConfigFileError> {
        let config = if path.exists() {
            Self::load_from(path)?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            info!(path = %path.display(), "Created default config file");
            config
        };
        config.create_directories()?;
        Ok(config)
    }
}

fn create_dir(path: &Path) -> Result<(), ConfigFileError> {
    fs::create_dir_all(path).map_err(|source| ConfigFileError::DirectoryError {
        path: path.to_path_buf(),
        source,
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// The config directory (`~/.stockpile`). Default storage and log
/// directories live beneath it.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stockpile")
}

/// Path of the config file, honouring [`CONFIG_PATH_ENV`].
pub fn config_file_path() -> PathBuf {
    resolve_config_path(std::env::var_os(CONFIG_PATH_ENV))
}

fn resolve_config_path(overridden: Option<OsString>) -> PathBuf {
    match overridden {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_directory().join("config.ini"),
    }
}
