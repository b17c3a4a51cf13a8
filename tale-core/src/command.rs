//! Out-of-band commands.
//!
//! A line beginning with [`COMMAND_PREFIX`] never reaches the turn state
//! machine. It is parsed into a [`Command`] and handed to a
//! [`CommandHandler`], which has no access to the transcript or roll gate.

use async_trait::async_trait;
use narrator::Narrator;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// Marks a line as a command rather than a player action.
pub const COMMAND_PREFIX: char = '/';

/// The closed set of commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Persist the game on the backend.
    Save,
    /// Download the saved game to a local file.
    Export,
    /// Show the party roster.
    Party,
    /// List the commands.
    Help,
    /// List the models the backend can narrate with.
    Models,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::Save,
        Command::Export,
        Command::Party,
        Command::Models,
        Command::Help,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Save => "save",
            Command::Export => "export",
            Command::Party => "party",
            Command::Help => "help",
            Command::Models => "models",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Command::Save => "Save the game on the server",
            Command::Export => "Write the saved game to a local JSON file",
            Command::Party => "Show party members, stats and inventory",
            Command::Help => "Show this help",
            Command::Models => "List models the server can narrate with",
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        Command::ALL
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or(CommandError::Unknown(name))
    }
}

/// A classified line of player input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerInput {
    Command(Command),
    UnknownCommand(String),
    Text(String),
    Empty,
}

/// Classify a raw input line.
pub fn parse_input(line: &str) -> PlayerInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return PlayerInput::Empty;
    }
    match trimmed.strip_prefix(COMMAND_PREFIX) {
        Some(rest) => match rest.parse::<Command>() {
            Ok(command) => PlayerInput::Command(command),
            Err(_) => PlayerInput::UnknownCommand(rest.trim().to_string()),
        },
        None => PlayerInput::Text(trimmed.to_string()),
    }
}

/// Help text listing every command.
pub fn help_text() -> String {
    let mut text = String::from("Commands:\n");
    for command in Command::ALL {
        text.push_str(&format!(
            "  {COMMAND_PREFIX}{:<8} {}\n",
            command.name(),
            command.description()
        ));
    }
    text.push_str("While a roll is pending, enter the value and an optional modifier: 15 2");
    text
}

/// Error type for command handling.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Server error: {0}")]
    Backend(#[from] narrator::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What a command produced, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Message(String),
    Lines(Vec<String>),
    Written(PathBuf),
}

/// Executes commands.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, command: Command) -> Result<CommandOutput, CommandError>;
}

/// Runs commands against the narration backend.
pub struct BackendCommands {
    narrator: Narrator,
    session_id: String,
    export_dir: PathBuf,
}

impl BackendCommands {
    pub fn new(narrator: Narrator, session_id: impl Into<String>) -> Self {
        Self {
            narrator,
            session_id: session_id.into(),
            export_dir: PathBuf::from("."),
        }
    }

    /// Set the directory exports are written to.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    /// File name an export of this game is written to.
    pub fn export_path(&self) -> PathBuf {
        self.export_dir
            .join(format!("game-{}-save.json", self.session_id))
    }
}

#[async_trait]
impl CommandHandler for BackendCommands {
    async fn execute(&self, command: Command) -> Result<CommandOutput, CommandError> {
        match command {
            Command::Save => {
                self.narrator.save_game(&self.session_id).await?;
                info!(session = %self.session_id, "game saved");
                Ok(CommandOutput::Message("Game saved.".to_string()))
            }
            Command::Export => {
                let game = self.narrator.export_game(&self.session_id).await?;
                let path = self.export_path();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, serde_json::to_string_pretty(&game)?).await?;
                info!(path = %path.display(), "game exported");
                Ok(CommandOutput::Written(path))
            }
            Command::Party => {
                let game = self.narrator.game(&self.session_id).await?;
                if game.party.is_empty() {
                    return Ok(CommandOutput::Message("The party is empty.".to_string()));
                }
                let lines = game
                    .party
                    .iter()
                    .map(|member| {
                        let stats: Vec<String> = member
                            .stats
                            .iter()
                            .map(|(name, value)| format!("{name} {value}"))
                            .collect();
                        let mut line = member.name.clone();
                        if !stats.is_empty() {
                            line.push_str(&format!(" ({})", stats.join(", ")));
                        }
                        if !member.inventory.is_empty() {
                            line.push_str(&format!(" carrying {}", member.inventory.join(", ")));
                        }
                        line
                    })
                    .collect();
                Ok(CommandOutput::Lines(lines))
            }
            Command::Models => {
                let models = self.narrator.models().await?;
                if models.is_empty() {
                    return Ok(CommandOutput::Message("No models available.".to_string()));
                }
                Ok(CommandOutput::Lines(models))
            }
            Command::Help => Ok(CommandOutput::Message(help_text())),
        }
    }
}
