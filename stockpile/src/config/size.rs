//! Human-readable sizes ("2MB", "500KB").

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '100MB', '2MB', or '500KB'")]
pub struct SizeParseError {
    input: String,
}

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Parse a size string into bytes.
///
/// Bare numbers are bytes; `K`/`KB`, `M`/`MB` and `G`/`GB` suffixes are
/// binary multiples. Case and surrounding whitespace are ignored.
///
/// ```
/// use stockpile::config::parse_size;
///
/// assert_eq!(parse_size("500000").unwrap(), 500_000);
/// assert_eq!(parse_size("2MB").unwrap(), 2 * 1024 * 1024);
/// assert_eq!(parse_size("1 k").unwrap(), 1024);
/// ```
pub fn parse_size(s: &str) -> Result<usize, SizeParseError> {
    let invalid = || SizeParseError {
        input: s.to_string(),
    };
    let trimmed = s.trim();
    let upper = trimmed.to_uppercase();

    let (digits, multiplier) = [("GB", GB), ("G", GB), ("MB", MB), ("M", MB), ("KB", KB), ("K", KB)]
        .iter()
        .find_map(|(suffix, multiplier)| {
            upper
                .strip_suffix(suffix)
                .map(|rest| (rest.trim().to_string(), *multiplier))
        })
        .unwrap_or((upper.clone(), 1));

    if digits.is_empty() {
        return Err(invalid());
    }
    let number: usize = digits.parse().map_err(|_| invalid())?;
    number.checked_mul(multiplier).ok_or_else(invalid)
}

/// Format a byte count using the largest suffix that divides it evenly.
///
/// ```
/// use stockpile::config::format_size;
///
/// assert_eq!(format_size(2 * 1024 * 1024), "2MB");
/// assert_eq!(format_size(500_000), "500000");
/// ```
pub fn format_size(bytes: usize) -> String {
    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        bytes.to_string()
    }
}
