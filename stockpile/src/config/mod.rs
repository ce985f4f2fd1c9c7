//! User configuration stored in `~/.stockpile/config.ini`.
//!
//! [`ConfigFile`] mirrors the INI sections one struct per section. It is
//! plain data: [`ConfigFile::to_coordinator_config`] turns it into the
//! runtime [`crate::CoordinatorConfig`].
//!
//! # Example
//!
//! ```
//! use stockpile::config::{parse_size, ConfigFile};
//!
//! let config = ConfigFile::default();
//! assert_eq!(config.download.small_workers, 8);
//! assert_eq!(config.memory.low_watermark, parse_size("2MB").unwrap() as u64);
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError, CONFIG_PATH_ENV};
pub use settings::{
    CacheSettings, ConfigFile, DownloadSettings, LoggingSettings, MemorySettings, ProbeSettings,
    StorageSettings,
};
pub use size::{format_size, parse_size, SizeParseError};
