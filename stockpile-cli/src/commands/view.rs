//! `stockpile view`: decode a stored image through the drawable cache.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use stockpile::DrawableEvent;

use crate::error::CliError;
use crate::runner::CliRunner;

/// How long to wait for one decode.
const DECODE_TIMEOUT: Duration = Duration::from_secs(30);

pub fn run(ids: Vec<String>, max_width: u32, max_height: u32) -> Result<(), CliError> {
    let runner = CliRunner::new(false)?;
    runner.log_startup("view");
    let coordinator = Arc::new(runner.create_coordinator()?);
    let loader = runner.create_loader(Arc::clone(&coordinator))?;
    let (tx, rx) = mpsc::channel();

    let mut requested = 0;
    for id in &ids {
        if loader.load(id, max_width, max_height, tx.clone()) {
            requested += 1;
        } else {
            println!("{}: not stored", id);
        }
    }
    drop(tx);

    let mut failed = 0;
    for _ in 0..requested {
        let event = rx
            .recv_timeout(DECODE_TIMEOUT)
            .map_err(|_| CliError::Image("timed out waiting for decode".to_string()))?;
        match event {
            DrawableEvent::Loaded { key, image } => {
                println!("{}: {}x{}", key.content_id, image.width(), image.height());
            }
            DrawableEvent::Failed { key, error } => {
                failed += 1;
                eprintln!("{}: {}", key.content_id, error);
            }
        }
    }

    if failed > 0 {
        Err(CliError::Image(format!("{} of {} images failed to decode", failed, requested)))
    } else {
        Ok(())
    }
}
