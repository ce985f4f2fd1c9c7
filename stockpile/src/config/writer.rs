//! INI serialization: [`ConfigFile`] to the commented text written to
//! config.ini.

use std::path::Path;

use super::settings::ConfigFile;
use super::size::format_size;

/// Convert a `ConfigFile` to a commented INI string.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let embedded_dir = config
        .storage
        .embedded_dir
        .as_ref()
        .map(|p| path_to_string(p))
        .unwrap_or_default();

    format!(
        r#"[storage]
; Directory for the internal tier (always available)
internal_dir = {}
; Mount point of the removable store
external_root = {}
; Directory created under the removable store's root
app_dir = {}
; Read-only directory of bundled assets (leave empty for none)
embedded_dir = {}

[download]
; Threads serving small files and large files
small_workers = {}
large_workers = {}
; Extra attempts after a failure (0-3)
max_retries = {}
; Largest small file, and how much a large download buffers before spooling
chunk_threshold = {}
; HTTP timeout in seconds
timeout = {}

[memory]
; Buffer slots kept allocated while idle
min_slots = {}
; Below this much free internal space, downloads need the removable store
low_watermark = {}
; Below this much free internal space, files go to the removable store
high_watermark = {}

[probe]
; Seconds to reuse mount and free-space answers
mount_ttl_secs = {}
free_space_ttl_secs = {}

[cache]
; Decoded images kept in memory
drawable_capacity = {}
; Threads decoding images
operation_threads = {}

[logging]
directory = {}
file = {}
; Mirror log output to the terminal
stdout = {}
"#,
        path_to_string(&config.storage.internal_dir),
        path_to_string(&config.storage.external_root),
        config.storage.app_dir,
        embedded_dir,
        config.download.small_workers,
        config.download.large_workers,
        config.download.max_retries,
        format_size(config.download.chunk_threshold),
        config.download.timeout,
        config.memory.min_slots,
        format_size(config.memory.low_watermark as usize),
        format_size(config.memory.high_watermark as usize),
        config.probe.mount_ttl_secs,
        config.probe.free_space_ttl_secs,
        config.cache.drawable_capacity,
        config.cache.operation_threads,
        path_to_string(&config.logging.directory),
        config.logging.file,
        config.logging.stdout,
    )
}

/// Convert path to string, collapsing the home dir to ~.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
