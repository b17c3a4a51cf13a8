//! Client-local preferences.
//!
//! Remembers the last session id and model between runs. Nothing depends on
//! the file existing; a missing file means defaults.

use crate::session::{SessionConfig, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Environment variable naming the preferences file.
pub const PREFS_PATH_ENV: &str = "TALE_PREFS";

/// Where preferences live when [`PREFS_PATH_ENV`] is unset.
pub const DEFAULT_PREFS_PATH: &str = ".tale/preferences.json";

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current preferences file version.
const PREFS_VERSION: u32 = 1;

fn current_version() -> u32 {
    PREFS_VERSION
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

/// Remembered client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "current_version")]
    pub version: u32,

    /// Game played most recently.
    #[serde(default)]
    pub last_session_id: Option<String>,

    /// Model selected most recently.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: PREFS_VERSION,
            last_session_id: None,
            model: default_model(),
        }
    }
}

impl Preferences {
    /// Path from [`PREFS_PATH_ENV`], or [`DEFAULT_PREFS_PATH`].
    pub fn path_from_env() -> PathBuf {
        std::env::var(PREFS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PREFS_PATH))
    }

    /// Load preferences, returning defaults when the file does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let prefs: Self = serde_json::from_str(&content)?;

        if prefs.version != PREFS_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: PREFS_VERSION,
                found: prefs.version,
            });
        }

        Ok(prefs)
    }

    /// Write preferences, creating parent directories as needed.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Record the session id. Returns whether it changed.
    pub fn remember_session(&mut self, session_id: &str) -> bool {
        if self.last_session_id.as_deref() == Some(session_id) {
            return false;
        }
        self.last_session_id = Some(session_id.to_string());
        true
    }

    /// Record the model. Returns whether it changed.
    pub fn remember_model(&mut self, model: &str) -> bool {
        if self.model == model {
            return false;
        }
        self.model = model.to_string();
        true
    }

    /// Build a session config, letting explicit choices override what was
    /// remembered. `None` if no session id is known at all.
    pub fn session_config(
        &self,
        session_id: Option<&str>,
        model: Option<&str>,
    ) -> Option<SessionConfig> {
        let session_id = session_id.or(self.last_session_id.as_deref())?;
        let model = model.unwrap_or(&self.model);
        Some(SessionConfig::new(session_id).with_model(model))
    }
}
