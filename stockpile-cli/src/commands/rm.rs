//! `stockpile rm`: delete stored resources.

use crate::error::CliError;
use crate::runner::CliRunner;

pub fn run(ids: Vec<String>, all: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(false)?;
    runner.log_startup("rm");
    let coordinator = runner.create_coordinator()?;

    if all {
        let removed = coordinator.delete_all()?;
        println!("Deleted {} resources", removed);
        return Ok(());
    }

    for id in &ids {
        if coordinator.delete(id)? {
            println!("{}: deleted", id);
        } else {
            println!("{}: not stored", id);
        }
    }
    Ok(())
}
