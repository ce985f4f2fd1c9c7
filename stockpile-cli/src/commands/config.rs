//! Configuration management CLI commands.

use clap::Subcommand;
use stockpile::config::{config_file_path, format_size, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Write a default config file if none exists
    Init,
    /// Show the effective configuration
    Show,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init => run_init(),
        ConfigCommands::Show => run_show(),
    }
}

fn run_init() -> Result<(), CliError> {
    let existed = config_file_path().exists();
    let path = ConfigFile::ensure_exists()?;
    if existed {
        println!("Config file already exists: {}", path.display());
    } else {
        println!("Created config file: {}", path.display());
    }
    Ok(())
}

fn run_show() -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    let path = config_file_path();
    if path.exists() {
        println!("# {}", path.display());
    } else {
        println!("# {} (not found, showing defaults)", path.display());
    }

    println!("storage.internal_dir      = {}", config.storage.internal_dir.display());
    println!("storage.external_root     = {}", config.storage.external_root.display());
    println!("storage.app_dir           = {}", config.storage.app_dir);
    println!(
        "storage.embedded_dir      = {}",
        config
            .storage
            .embedded_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    );
    println!("download.small_workers    = {}", config.download.small_workers);
    println!("download.large_workers    = {}", config.download.large_workers);
    println!("download.max_retries      = {}", config.download.max_retries);
    println!(
        "download.chunk_threshold  = {}",
        format_size(config.download.chunk_threshold)
    );
    println!("download.timeout          = {}", config.download.timeout);
    println!("memory.min_slots          = {}", config.memory.min_slots);
    println!(
        "memory.low_watermark      = {}",
        format_size(config.memory.low_watermark as usize)
    );
    println!(
        "memory.high_watermark     = {}",
        format_size(config.memory.high_watermark as usize)
    );
    println!("probe.mount_ttl_secs      = {}", config.probe.mount_ttl_secs);
    println!("probe.free_space_ttl_secs = {}", config.probe.free_space_ttl_secs);
    println!("cache.drawable_capacity   = {}", config.cache.drawable_capacity);
    println!("cache.operation_threads   = {}", config.cache.operation_threads);
    println!("logging.directory         = {}", config.logging.directory.display());
    println!("logging.file              = {}", config.logging.file);
    println!("logging.stdout            = {}", config.logging.stdout);
    Ok(())
}
