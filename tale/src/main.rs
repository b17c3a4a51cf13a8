//! Tale: a line-oriented client for narrative games.
//!
//! Play a game against a narration server, or check a world definition
//! while you write it:
//!
//! ```bash
//! cargo run -p tale -- --session 3
//! cargo run -p tale -- validate world.md --watch
//! ```

mod args;
mod play;
mod validate;

use args::Mode;
use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "tale=info,tale_core=info,narrator=warn";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so they never interleave with narration on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mode = match args::parse_args(&args) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run with --help for usage.");
            std::process::exit(2);
        }
    };

    match mode {
        Mode::Help => {
            args::print_help();
            Ok(())
        }
        Mode::Play(play_args) => play::run_play(play_args).await,
        Mode::Validate(validate_args) => {
            if !validate::run_validate(validate_args).await? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
