//! Command-line argument parsing.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("Unknown option: {0}")]
    UnknownFlag(String),

    #[error("Invalid value for {flag}: {value}")]
    InvalidNumber { flag: String, value: String },

    #[error("validate requires a FILE argument")]
    MissingFile,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

/// Options for `tale play`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayArgs {
    pub session: Option<String>,
    pub model: Option<String>,
    pub streaming: bool,
}

/// Options for `tale validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateArgs {
    pub file: PathBuf,
    pub watch: bool,
    pub quiet_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Play(PlayArgs),
    Validate(ValidateArgs),
    Help,
}

/// Parse `std::env::args()`; the first element is the program name.
pub fn parse_args(args: &[String]) -> Result<Mode, ArgError> {
    if args.iter().any(|a| a == "--help" || a == "-h") {
        return Ok(Mode::Help);
    }

    let rest = args.get(1..).unwrap_or_default();
    match rest.first().map(String::as_str) {
        None | Some("play") => parse_play(rest.get(1..).unwrap_or_default()).map(Mode::Play),
        Some("validate") => {
            parse_validate(rest.get(1..).unwrap_or_default()).map(Mode::Validate)
        }
        Some("help") => Ok(Mode::Help),
        // Bare flags mean `play`.
        Some(flag) if flag.starts_with("--") => parse_play(rest).map(Mode::Play),
        Some(other) => Err(ArgError::UnknownCommand(other.to_string())),
    }
}

fn parse_play(args: &[String]) -> Result<PlayArgs, ArgError> {
    let mut play = PlayArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--session" => {
                play.session = Some(value(args, i)?.to_string());
                i += 1;
            }
            "--model" => {
                play.model = Some(value(args, i)?.to_string());
                i += 1;
            }
            "--streaming" => play.streaming = true,
            other => return Err(ArgError::UnknownFlag(other.to_string())),
        }
        i += 1;
    }
    Ok(play)
}

fn parse_validate(args: &[String]) -> Result<ValidateArgs, ArgError> {
    let mut file = None;
    let mut watch = false;
    let mut quiet_ms = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--watch" => watch = true,
            "--quiet-ms" => {
                let raw = value(args, i)?;
                let parsed = raw.parse::<u64>().map_err(|_| ArgError::InvalidNumber {
                    flag: "--quiet-ms".to_string(),
                    value: raw.to_string(),
                })?;
                quiet_ms = Some(parsed);
                i += 1;
            }
            flag if flag.starts_with("--") => return Err(ArgError::UnknownFlag(flag.to_string())),
            path => file = Some(PathBuf::from(path)),
        }
        i += 1;
    }
    Ok(ValidateArgs {
        file: file.ok_or(ArgError::MissingFile)?,
        watch,
        quiet_ms,
    })
}

fn value(args: &[String], i: usize) -> Result<&str, ArgError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| ArgError::MissingValue(args[i].clone()))
}

pub fn print_help() {
    println!("Tale - play and author narrative games against a narration server");
    println!();
    println!("USAGE:");
    println!("  tale [play] [OPTIONS]");
    println!("  tale validate FILE [--watch] [--quiet-ms N]");
    println!();
    println!("PLAY OPTIONS:");
    println!("  --session <ID>   Game id to play (default: last used)");
    println!("  --model <NAME>   Model to narrate with (default: last used, or llama3)");
    println!("  --streaming      Server streams narration instead of batching it");
    println!();
    println!("VALIDATE OPTIONS:");
    println!("  --watch          Re-validate whenever FILE changes (Ctrl-C to stop)");
    println!("  --quiet-ms <N>   Wait N ms after the last change (default: 300)");
    println!();
    println!("ENVIRONMENT:");
    println!("  TALE_API_URL     Server base URL (default: http://localhost:8000)");
    println!("  TALE_PREFS       Preferences file (default: .tale/preferences.json)");
    println!("  RUST_LOG         Log filter, written to stderr");
    println!();
    println!("EXAMPLES:");
    println!("  tale --session 3                 # Play game 3");
    println!("  tale validate world.md --watch   # Live-check a world definition");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("tale")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_no_args_plays() {
        assert_eq!(parse_args(&argv(&[])), Ok(Mode::Play(PlayArgs::default())));
    }

    #[test]
    fn test_play_flags() {
        let mode = parse_args(&argv(&["play", "--session", "4", "--model", "phi3", "--streaming"]));
        assert_eq!(
            mode,
            Ok(Mode::Play(PlayArgs {
                session: Some("4".to_string()),
                model: Some("phi3".to_string()),
                streaming: true,
            }))
        );
    }

    #[test]
    fn test_bare_flags_mean_play() {
        let mode = parse_args(&argv(&["--session", "9"])).unwrap();
        assert!(matches!(mode, Mode::Play(PlayArgs { session: Some(ref s), .. }) if s == "9"));
    }

    #[test]
    fn test_validate() {
        let mode = parse_args(&argv(&["validate", "world.md", "--watch", "--quiet-ms", "150"]));
        assert_eq!(
            mode,
            Ok(Mode::Validate(ValidateArgs {
                file: PathBuf::from("world.md"),
                watch: true,
                quiet_ms: Some(150),
            }))
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse_args(&argv(&["validate"])),
            Err(ArgError::MissingFile)
        );
        assert_eq!(
            parse_args(&argv(&["play", "--session"])),
            Err(ArgError::MissingValue("--session".to_string()))
        );
        assert_eq!(
            parse_args(&argv(&["validate", "w.md", "--quiet-ms", "soon"])),
            Err(ArgError::InvalidNumber {
                flag: "--quiet-ms".to_string(),
                value: "soon".to_string()
            })
        );
        assert_eq!(
            parse_args(&argv(&["dance"])),
            Err(ArgError::UnknownCommand("dance".to_string()))
        );
    }

    #[test]
    fn test_help_anywhere() {
        assert_eq!(parse_args(&argv(&["validate", "-h"])), Ok(Mode::Help));
    }
}
