//! `stockpile list`: show stored resources.

use stockpile::config::format_size;

use crate::error::CliError;
use crate::runner::CliRunner;

pub fn run(filter: Option<String>) -> Result<(), CliError> {
    let runner = CliRunner::new(false)?;
    runner.log_startup("list");
    let coordinator = runner.create_coordinator()?;

    let names = match &filter {
        Some(fragment) => coordinator.names_containing(fragment),
        None => {
            let mut names = coordinator.all_names();
            names.sort();
            names
        }
    };

    if names.is_empty() {
        println!("No stored resources.");
        return Ok(());
    }

    for name in &names {
        if let Some(location) = coordinator.location(name) {
            println!(
                "{:<40} {:<9} {:>10}",
                name,
                location.tier,
                format_size(location.size_bytes as usize)
            );
        }
    }
    println!();
    println!(
        "{} resources, {} total",
        names.len(),
        format_size(coordinator.total_size() as usize)
    );
    Ok(())
}
