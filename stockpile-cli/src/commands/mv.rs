//! `stockpile mv`: move stored resources between tiers.

use clap::ValueEnum;
use stockpile::config::format_size;
use stockpile::{Recode, StorageTier};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Writable tiers a resource can be moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetTier {
    Internal,
    External,
}

impl From<TargetTier> for StorageTier {
    fn from(tier: TargetTier) -> Self {
        match tier {
            TargetTier::Internal => StorageTier::Internal,
            TargetTier::External => StorageTier::External,
        }
    }
}

pub fn run(ids: Vec<String>, to: TargetTier) -> Result<(), CliError> {
    let runner = CliRunner::new(false)?;
    runner.log_startup("mv");
    let coordinator = runner.create_coordinator()?;
    let target = StorageTier::from(to);

    for id in &ids {
        let progress = |copied: u64, total: u64| {
            if total > 0 && copied < total {
                eprint!("\r{}: {}%", id, copied * 100 / total);
            }
        };
        let location = coordinator.relocate(id, target, Recode::Keep, Some(&progress))?;
        eprint!("\r");
        println!(
            "{}: now on {} ({})",
            id,
            location.tier,
            format_size(location.size_bytes as usize)
        );
    }
    Ok(())
}
