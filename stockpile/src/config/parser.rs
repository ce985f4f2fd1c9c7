//! INI parsing: `Ini` to [`ConfigFile`].
//!
//! The one place where INI key names are mapped to struct fields.

use ini::{Ini, Properties};
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;

/// Parse an `Ini` into a `ConfigFile`, overlaying defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [storage] section
    if let Some(section) = ini.section(Some("storage")) {
        if let Some(v) = non_empty(section, "internal_dir") {
            config.storage.internal_dir = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "external_root") {
            config.storage.external_root = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "app_dir") {
            config.storage.app_dir = v.to_string();
        }
        if let Some(v) = non_empty(section, "embedded_dir") {
            config.storage.embedded_dir = Some(expand_tilde(v));
        }
    }

    // [download] section
    if let Some(section) = ini.section(Some("download")) {
        if let Some(v) = section.get("small_workers") {
            config.download.small_workers = parse_positive(v, "download", "small_workers")?;
        }
        if let Some(v) = section.get("large_workers") {
            config.download.large_workers = parse_positive(v, "download", "large_workers")?;
        }
        if let Some(v) = section.get("max_retries") {
            config.download.max_retries =
                parse_number(v, "download", "max_retries", "must be an integer from 0 to 3")?;
            if config.download.max_retries > super::defaults::DEFAULT_MAX_RETRIES {
                return Err(invalid(
                    "download",
                    "max_retries",
                    v,
                    "must be an integer from 0 to 3",
                ));
            }
        }
        if let Some(v) = section.get("chunk_threshold") {
            config.download.chunk_threshold = parse_size_value(v, "download", "chunk_threshold")?;
            if config.download.chunk_threshold == 0 {
                return Err(invalid("download", "chunk_threshold", v, "must be greater than zero"));
            }
        }
        if let Some(v) = section.get("timeout") {
            config.download.timeout =
                parse_number(v, "download", "timeout", "must be a positive integer (seconds)")?;
        }
    }

    // [memory] section
    if let Some(section) = ini.section(Some("memory")) {
        if let Some(v) = section.get("min_slots") {
            config.memory.min_slots =
                parse_number(v, "memory", "min_slots", "must be a non-negative integer")?;
        }
        if let Some(v) = section.get("low_watermark") {
            config.memory.low_watermark = parse_size_value(v, "memory", "low_watermark")? as u64;
        }
        if let Some(v) = section.get("high_watermark") {
            config.memory.high_watermark = parse_size_value(v, "memory", "high_watermark")? as u64;
        }
        if config.memory.low_watermark > config.memory.high_watermark {
            return Err(invalid(
                "memory",
                "low_watermark",
                &config.memory.low_watermark.to_string(),
                "must not exceed high_watermark",
            ));
        }
    }

    // [probe] section
    if let Some(section) = ini.section(Some("probe")) {
        if let Some(v) = section.get("mount_ttl_secs") {
            config.probe.mount_ttl_secs =
                parse_number(v, "probe", "mount_ttl_secs", "must be a non-negative integer (seconds)")?;
        }
        if let Some(v) = section.get("free_space_ttl_secs") {
            config.probe.free_space_ttl_secs = parse_number(
                v,
                "probe",
                "free_space_ttl_secs",
                "must be a non-negative integer (seconds)",
            )?;
        }
    }

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("drawable_capacity") {
            config.cache.drawable_capacity = parse_positive(v, "cache", "drawable_capacity")?;
        }
        if let Some(v) = section.get("operation_threads") {
            config.cache.operation_threads = parse_positive(v, "cache", "operation_threads")?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section, "directory") {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "file") {
            config.logging.file = v.to_string();
        }
        if let Some(v) = section.get("stdout") {
            config.logging.stdout = parse_bool(v).ok_or_else(|| {
                invalid("logging", "stdout", v, "must be 'true' or 'false'")
            })?;
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number<T: FromStr>(
    v: &str,
    section: &str,
    key: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    v.trim().parse().map_err(|_| invalid(section, key, v, reason))
}

fn parse_positive(v: &str, section: &str, key: &str) -> Result<usize, ConfigFileError> {
    let reason = "must be a positive integer";
    match parse_number::<usize>(v, section, key, reason)? {
        0 => Err(invalid(section, key, v, reason)),
        n => Ok(n),
    }
}

fn parse_size_value(v: &str, section: &str, key: &str) -> Result<usize, ConfigFileError> {
    parse_size(v).map_err(|_| invalid(section, key, v, "expected format like '100MB', '2MB', or '500KB'"))
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        parse_ini(&Ini::load_from_str(content).unwrap())
    }

    #[test]
    fn test_parse_empty_gives_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.download.small_workers, 8);
        assert_eq!(config.memory.high_watermark, 100 * 1024 * 1024);
    }

    #[test]
    fn test_parse_all_sections() {
        let config = parse(
            r#"
[storage]
internal_dir = /data/files
external_root = /mnt/sd
app_dir = covers
embedded_dir = /opt/assets

[download]
small_workers = 4
large_workers = 2
max_retries = 1
chunk_threshold = 1MB
timeout = 10

[memory]
min_slots = 20
low_watermark = 1MB
high_watermark = 50MB

[probe]
mount_ttl_secs = 0
free_space_ttl_secs = 1

[cache]
drawable_capacity = 16
operation_threads = 2

[logging]
directory = /var/log/stockpile
file = run.log
stdout = yes
"#,
        )
        .unwrap();

        assert_eq!(config.storage.internal_dir, PathBuf::from("/data/files"));
        assert_eq!(config.storage.app_dir, "covers");
        assert_eq!(config.storage.embedded_dir, Some(PathBuf::from("/opt/assets")));
        assert_eq!(config.download.small_workers, 4);
        assert_eq!(config.download.large_workers, 2);
        assert_eq!(config.download.max_retries, 1);
        assert_eq!(config.download.chunk_threshold, 1024 * 1024);
        assert_eq!(config.download.timeout, 10);
        assert_eq!(config.memory.min_slots, 20);
        assert_eq!(config.memory.low_watermark, 1024 * 1024);
        assert_eq!(config.probe.mount_ttl_secs, 0);
        assert_eq!(config.cache.drawable_capacity, 16);
        assert_eq!(config.logging.file, "run.log");
        assert!(config.logging.stdout);
    }

    #[test]
    fn test_parse_rejects_zero_workers() {
        let err = parse("[download]\nsmall_workers = 0\n").unwrap_err();
        match err {
            ConfigFileError::InvalidValue { section, key, .. } => {
                assert_eq!(section, "download");
                assert_eq!(key, "small_workers");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_parse_rejects_retries_above_cap() {
        assert!(parse("[download]\nmax_retries = 4\n").is_err());
        assert!(parse("[download]\nmax_retries = 3\n").is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_size() {
        assert!(parse("[memory]\nlow_watermark = lots\n").is_err());
    }

    #[test]
    fn test_parse_rejects_inverted_watermarks() {
        assert!(parse("[memory]\nlow_watermark = 200MB\n").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_bool() {
        assert!(parse("[logging]\nstdout = maybe\n").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/files"), home.join("files"));
        }
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }
}
