//! Line-oriented play loop.
//!
//! Reads one line at a time from stdin. `/command` lines go to the command
//! handler; while a roll is pending, lines are read as `VALUE [MOD]`;
//! everything else is a player action.

use crate::args::PlayArgs;
use narrator::Narrator;
use std::error::Error;
use std::io::Write;
use tale_core::{
    parse_input, BackendCommands, CommandHandler, CommandOutput, HttpTransport, IgnoreReason,
    PlayerInput, Preferences, ResponseMode, SubmitOutcome, TurnController, COMMAND_PREFIX,
    TURN_ERROR_MARKER,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

pub async fn run_play(args: PlayArgs) -> Result<(), Box<dyn Error>> {
    let prefs_path = Preferences::path_from_env();
    let mut prefs = match Preferences::load(&prefs_path).await {
        Ok(prefs) => prefs,
        Err(e) => {
            warn!(path = %prefs_path.display(), error = %e, "ignoring unreadable preferences");
            Preferences::default()
        }
    };

    let config = prefs
        .session_config(args.session.as_deref(), args.model.as_deref())
        .ok_or("No game to play: pass --session <ID>")?;

    let remembered_session = prefs.remember_session(&config.session_id);
    let remembered_model = prefs.remember_model(&config.model);
    if remembered_session || remembered_model {
        if let Err(e) = prefs.save(&prefs_path).await {
            warn!(path = %prefs_path.display(), error = %e, "could not save preferences");
        }
    }

    let narrator = Narrator::from_env()?;
    let mode = if args.streaming {
        ResponseMode::Streaming
    } else {
        ResponseMode::Batched
    };
    let commands = BackendCommands::new(narrator.clone(), config.session_id.clone());
    let mut controller = TurnController::new(HttpTransport::new(narrator, mode), config);

    info!(
        session = %controller.config().session_id,
        model = %controller.config().model,
        ?mode,
        "session started"
    );
    println!("=== Tale ===");
    println!(
        "Game {} with model {}",
        controller.config().session_id,
        controller.config().model
    );
    println!("Type {COMMAND_PREFIX}help for commands, {COMMAND_PREFIX}quit to leave.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            PlayerInput::Empty => continue,
            PlayerInput::UnknownCommand(name) if name == "quit" || name == "exit" => {
                println!("Goodbye!");
                break;
            }
            PlayerInput::UnknownCommand(name) => {
                println!("[ERROR] Unknown command {COMMAND_PREFIX}{name}. Type {COMMAND_PREFIX}help for help.");
            }
            PlayerInput::Command(command) => match commands.execute(command).await {
                Ok(output) => print_output(output),
                Err(e) => println!("[ERROR] {e}"),
            },
            PlayerInput::Text(text) => {
                let outcome = match controller.session().pending_roll() {
                    Some(roll) => {
                        let (value, modifier) = match parse_roll(&text) {
                            Some(parsed) => parsed,
                            None => {
                                println!("[ERROR] Enter a roll as VALUE [MOD], e.g. 14 2");
                                continue;
                            }
                        };
                        if let Err(e) = roll.check(value) {
                            println!("[ERROR] {e}");
                            continue;
                        }
                        println!("[NARRATOR]");
                        match controller
                            .submit_roll_streaming(value, modifier, print_chunk)
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                println!("[ERROR] {e}");
                                continue;
                            }
                        }
                    }
                    None => {
                        println!("[NARRATOR]");
                        controller.submit_action_streaming(&text, print_chunk).await
                    }
                };
                println!();
                report(&controller, outcome);
            }
        }
    }

    Ok(())
}

fn print_chunk(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

fn report<T: tale_core::Transport>(controller: &TurnController<T>, outcome: SubmitOutcome) {
    let session = controller.session();
    match outcome {
        SubmitOutcome::Ignored(IgnoreReason::RollPending) => {
            println!("[ERROR] Resolve the pending roll first.");
        }
        SubmitOutcome::Ignored(reason) => warn!(?reason, "submission ignored"),
        SubmitOutcome::Completed { .. } => {
            if session.transcript().last().is_some_and(|e| e.is_error) {
                println!("[ERROR] {TURN_ERROR_MARKER}");
            }
        }
    }
    if let Some(roll) = session.pending_roll() {
        println!("[ROLL] {roll}");
        println!("Enter the result and an optional modifier, e.g. 14 2");
    }
    println!();
}

fn print_output(output: CommandOutput) {
    match output {
        CommandOutput::Message(message) => println!("{message}"),
        CommandOutput::Lines(lines) => {
            for line in lines {
                println!("  {line}");
            }
        }
        CommandOutput::Written(path) => println!("[SAVED] Exported to {}", path.display()),
    }
}

/// Parse `VALUE [MOD]`.
fn parse_roll(text: &str) -> Option<(u32, i32)> {
    let mut parts = text.split_whitespace();
    let value = parts.next()?.parse().ok()?;
    let modifier = match parts.next() {
        Some(raw) => raw.trim_start_matches('+').parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((value, modifier))
}
