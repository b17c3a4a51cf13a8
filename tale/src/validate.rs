//! World-definition validation from the command line.

use crate::args::ValidateArgs;
use narrator::Narrator;
use std::error::Error;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tale_core::{
    DebouncedValidator, HttpTransport, ResponseMode, ValidationView, DEFAULT_QUIET_PERIOD,
};
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Validate the file once, or keep validating it as it changes.
///
/// Returns whether the last printed verdict was a successful preview.
pub async fn run_validate(args: ValidateArgs) -> Result<bool, Box<dyn Error>> {
    let narrator = Narrator::from_env()?;
    let quiet = args
        .quiet_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_QUIET_PERIOD);
    let mut validator =
        DebouncedValidator::new(HttpTransport::new(narrator, ResponseMode::Batched), quiet);
    let mut updates = validator.subscribe();

    validator.edit(tokio::fs::read_to_string(&args.file).await?);

    if !args.watch {
        let snapshot = updates.wait_for(|s| s.is_settled()).await?.clone();
        return Ok(print_view(&snapshot.view));
    }

    info!(file = %args.file.display(), "watching for changes");
    let mut last_modified = modified(&args.file).await?;
    let mut printed_epoch = 0;
    let mut valid = false;
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = updates.changed() => {
                changed?;
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.is_settled() && snapshot.settled_epoch != printed_epoch {
                    printed_epoch = snapshot.settled_epoch;
                    valid = print_view(&snapshot.view);
                }
            }
            _ = poll.tick() => {
                let current = modified(&args.file).await?;
                if current != last_modified {
                    last_modified = current;
                    let epoch = validator.edit(tokio::fs::read_to_string(&args.file).await?);
                    debug!(epoch, "file changed");
                }
            }
        }
    }

    validator.teardown();
    Ok(valid)
}

async fn modified(path: &Path) -> std::io::Result<SystemTime> {
    tokio::fs::metadata(path).await?.modified()
}

fn print_view(view: &ValidationView) -> bool {
    match view {
        ValidationView::Idle => false,
        ValidationView::Preview(world) => {
            println!("[VALID] {} ({})", world.title, world.ruleset);
            if !world.end_goal.is_empty() {
                println!("  Goal: {}", world.end_goal);
            }
            println!(
                "  {} locations, {} NPCs, {} factions, {} items",
                world.locations.len(),
                world.npcs.len(),
                world.factions.len(),
                world.items.len()
            );
            true
        }
        ValidationView::Error(message) => {
            println!("[INVALID] {message}");
            false
        }
    }
}
