//! `stockpile fetch`: download resources and wait for them.

use std::collections::HashSet;

use stockpile::config::format_size;
use stockpile::{DownloadEvent, DownloadRequest, Listener, ResourceDescriptor, TaskKind};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for a fetch run.
#[derive(Debug)]
pub struct FetchArgs {
    pub urls: Vec<String>,
    pub large: bool,
    pub priority: i32,
}

/// Content id for a URL: its last non-empty path segment, or the whole URL
/// with separators replaced.
pub fn content_id_for(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .find(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(str::to_string)
        .unwrap_or_else(|| {
            url.chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect()
        })
}

pub fn run(args: FetchArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(false)?;
    runner.log_startup("fetch");
    let coordinator = runner.create_coordinator()?;

    let kind = if args.large {
        TaskKind::Large
    } else {
        TaskKind::Small
    };
    let (listener, events) = Listener::channel();

    let mut submitted = HashSet::new();
    for url in &args.urls {
        let content_id = content_id_for(url);
        if coordinator.is_available(&content_id) {
            println!("{}: already stored", content_id);
            continue;
        }
        let request = DownloadRequest::new(ResourceDescriptor::new(url.as_str(), content_id.as_str()))
            .kind(kind)
            .priority(args.priority)
            .listener(&listener);
        if coordinator.submit(request) {
            submitted.insert(content_id);
        } else if !submitted.contains(&content_id) {
            println!("{}: not queued (no storage space?)", content_id);
        }
    }

    if submitted.is_empty() {
        return Ok(());
    }

    let total = submitted.len();
    let mut failed = 0;
    for event in events {
        match event {
            DownloadEvent::Succeeded(report) => {
                let size = report.location.map(|l| l.size_bytes).unwrap_or(0);
                println!(
                    "{}: stored ({}, {})",
                    report.content_id(),
                    report
                        .location
                        .map(|l| l.tier.to_string())
                        .unwrap_or_default(),
                    format_size(size as usize)
                );
            }
            DownloadEvent::Failed { report, error } => {
                failed += 1;
                eprintln!(
                    "{}: failed after {} retries: {}",
                    report.content_id(),
                    report.retries,
                    error
                );
            }
            DownloadEvent::AllFinished => break,
        }
    }

    let stats = coordinator.stats();
    println!(
        "Downloaded {} files ({}) at {:.1} KB/s",
        stats.files_downloaded,
        format_size(stats.bytes_downloaded as usize),
        stats.average_speed() / 1024.0
    );

    if failed > 0 {
        Err(CliError::Download { failed, total })
    } else {
        Ok(())
    }
}
