//! CLI runner for common setup.
//!
//! Loads the config file, initializes logging and builds the coordinator so
//! command handlers don't repeat it.

use std::sync::Arc;

use crate::error::CliError;
use stockpile::config::ConfigFile;
use stockpile::logging::{init_logging, LoggingGuard};
use stockpile::{DrawableLoader, ResourceCoordinator};
use tracing::info;

/// Runner that manages CLI lifecycle.
pub struct CliRunner {
    /// Keeps logging active while the runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    config: ConfigFile,
}

impl CliRunner {
    /// Load config and initialize logging. `verbose` mirrors logs to stdout
    /// regardless of the config file.
    pub fn new(verbose: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;

        let logging_guard = init_logging(
            &config.logging.directory,
            &config.logging.file,
            verbose || config.logging.stdout,
        )
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("Stockpile v{}", stockpile::VERSION);
        info!("Stockpile CLI: {} command", command);
    }

    /// Build a coordinator for HTTP(S) and `file://` sources using the
    /// loaded config.
    pub fn create_coordinator(&self) -> Result<ResourceCoordinator, CliError> {
        let coordinator = ResourceCoordinator::with_http(
            self.config.to_coordinator_config(),
            self.config.download.timeout,
        )?;
        info!("Coordinator started");
        Ok(coordinator)
    }

    /// Build an image loader sized by the `[cache]` section.
    pub fn create_loader(
        &self,
        coordinator: Arc<ResourceCoordinator>,
    ) -> Result<DrawableLoader, CliError> {
        self.config
            .drawable_loader(coordinator, None)
            .map_err(|e| CliError::Image(format!("Failed to start image loader: {}", e)))
    }
}
