//! CLI error handling with user-friendly messages.

use std::fmt;
use std::process;
use stockpile::config::ConfigFileError;
use stockpile::{CoordinatorError, StorageError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to start the coordinator
    Startup(CoordinatorError),
    /// Some downloads did not complete
    Download { failed: usize, total: usize },
    /// Reading or deleting stored resources failed
    Storage(StorageError),
    /// Image loading failed
    Image(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Startup(CoordinatorError::Storage(_)) = self {
            eprintln!();
            eprintln!("Check the [storage] directories in your config file:");
            eprintln!("  stockpile config show");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Startup(e) => write!(f, "Failed to start downloader: {}", e),
            CliError::Download { failed, total } => {
                write!(f, "{} of {} downloads failed", failed, total)
            }
            CliError::Storage(e) => write!(f, "Storage error: {}", e),
            CliError::Image(msg) => write!(f, "Image error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Startup(e) => Some(e),
            CliError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<CoordinatorError> for CliError {
    fn from(e: CoordinatorError) -> Self {
        CliError::Startup(e)
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Storage(e)
    }
}
