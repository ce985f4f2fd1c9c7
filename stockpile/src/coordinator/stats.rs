//! Download throughput statistics.

use std::time::Duration;

/// Totals for completed downloads since creation or the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DownloadStats {
    pub files_downloaded: u64,
    pub bytes_downloaded: u64,
    pub failures: u64,
    /// Wall time during which at least one task was live.
    pub busy_time: Duration,
}

impl DownloadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_download(&mut self, bytes: u64) {
        self.files_downloaded += 1;
        self.bytes_downloaded += bytes;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_busy(&mut self, elapsed: Duration) {
        self.busy_time += elapsed;
    }

    /// Average throughput in bytes per second over busy time.
    pub fn average_speed(&self) -> f64 {
        let secs = self.busy_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.bytes_downloaded as f64 / secs
        }
    }
}
