//! Minimal client for the narration backend.
//!
//! This crate provides a focused client for the game server's HTTP API with:
//! - Turn resolution, either as one JSON document or as a raw byte stream
//! - Player roll submission
//! - World-definition validation that separates rejections from transport failures
//! - The side-channel endpoints used by out-of-band commands (save, export, party, models)

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// Base URL used when `TALE_API_URL` is not set.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Environment variable naming the backend base URL.
pub const BASE_URL_ENV: &str = "TALE_API_URL";

/// Errors that can occur when talking to the narration backend.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error at {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// A raw response body delivered incrementally.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, Error>> + Send>>;

/// Narration backend client.
#[derive(Clone)]
pub struct Narrator {
    client: reqwest::Client,
    base_url: String,
}

impl Narrator {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL '{base_url}': {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Create a client from the `TALE_API_URL` environment variable,
    /// falling back to [`DEFAULT_BASE_URL`].
    pub fn from_env() -> Result<Self, Error> {
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }

    /// The backend base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a player action and return the whole narration at once.
    pub async fn turn(&self, game_id: &str, request: &TurnRequest) -> Result<TurnResponse, Error> {
        let url = self.endpoint(&format!("/games/{game_id}/turn"));
        let response = self.post(&url, request).await?;
        parse_json(response).await
    }

    /// Resolve a player action and stream the narration body as it arrives.
    pub async fn turn_stream(
        &self,
        game_id: &str,
        request: &TurnRequest,
    ) -> Result<ByteStream, Error> {
        let url = self.endpoint(&format!("/games/{game_id}/turn"));
        let response = self.post(&url, request).await?;
        Ok(byte_stream(response, url))
    }

    /// Submit the player's answer to an outstanding roll request.
    pub async fn player_roll(
        &self,
        game_id: &str,
        submission: &RollSubmission,
    ) -> Result<TurnResponse, Error> {
        let url = self.endpoint(&format!("/games/{game_id}/player-roll"));
        let response = self.post(&url, submission).await?;
        parse_json(response).await
    }

    /// Submit a roll and stream the narration body as it arrives.
    pub async fn player_roll_stream(
        &self,
        game_id: &str,
        submission: &RollSubmission,
    ) -> Result<ByteStream, Error> {
        let url = self.endpoint(&format!("/games/{game_id}/player-roll"));
        let response = self.post(&url, submission).await?;
        Ok(byte_stream(response, url))
    }

    /// Ask the backend to parse a world definition without importing it.
    ///
    /// A non-success status is not an error here: it is the server rejecting
    /// the definition, and the reason is returned as [`Validation::Rejected`].
    /// Only transport and decoding failures produce `Err`.
    pub async fn validate_world(&self, content: &str) -> Result<Validation, Error> {
        let url = self.endpoint("/worlds/validate");
        let body = ValidateRequest { content };
        let response = self.send(self.client.post(&url).headers(json_headers()).json(&body), &url).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "world definition rejected");
            return Ok(Validation::Rejected {
                status: status.as_u16(),
                reason: rejection_reason(&body),
            });
        }

        let preview: WorldPreview = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Validation::Accepted(preview))
    }

    /// Persist the game on the server.
    pub async fn save_game(&self, game_id: &str) -> Result<(), Error> {
        let url = self.endpoint(&format!("/games/{game_id}/save"));
        let response = self.send(self.client.post(&url), &url).await?;
        check_status(response).await?;
        Ok(())
    }

    /// Fetch the saved game document for download.
    pub async fn export_game(&self, game_id: &str) -> Result<serde_json::Value, Error> {
        let url = self.endpoint(&format!("/games/{game_id}/export"));
        let response = self.send(self.client.get(&url), &url).await?;
        parse_json(response).await
    }

    /// Fetch the game summary, including the party roster.
    pub async fn game(&self, game_id: &str) -> Result<GameSummary, Error> {
        let url = self.endpoint(&format!("/games/{game_id}"));
        let response = self.send(self.client.get(&url), &url).await?;
        parse_json(response).await
    }

    /// List the model selectors the backend can narrate with.
    pub async fn models(&self) -> Result<Vec<String>, Error> {
        let url = self.endpoint("/health/llm");
        let response = self.send(self.client.get(&url), &url).await?;
        let models: ModelList = parse_json(response).await?;
        Ok(models.models)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, Error> {
        let response = self
            .send(self.client.post(url).headers(json_headers()).json(body), url)
            .await?;
        check_status(response).await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, Error> {
        debug!(%url, "sending request");
        request.send().await.map_err(|e| {
            warn!(%url, error = %e, "request did not reach the backend");
            Error::Network {
                endpoint: url.to_string(),
                message: e.to_string(),
            }
        })
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    warn!(status, "backend returned a non-success status");
    Err(Error::Api { status, message })
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, Error> {
    let response = check_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| Error::Parse(e.to_string()))
}

fn byte_stream(response: reqwest::Response, url: String) -> ByteStream {
    let stream = response.bytes_stream().map(move |chunk| {
        chunk.map(|bytes| bytes.to_vec()).map_err(|e| Error::Network {
            endpoint: url.clone(),
            message: e.to_string(),
        })
    });
    Box::pin(stream)
}

/// Extract the human-readable reason from a rejection body.
///
/// The server answers with `{ "detail": ... }`; anything else is passed through.
fn rejection_reason(body: &str) -> String {
    #[derive(Deserialize)]
    struct Rejection {
        #[serde(default)]
        detail: serde_json::Value,
    }

    match serde_json::from_str::<Rejection>(body) {
        Ok(Rejection {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(Rejection { detail }) if !detail.is_null() => detail.to_string(),
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => "invalid world definition".to_string(),
    }
}

// ============================================================================
// Public types
// ============================================================================

/// Body of a turn-resolution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnRequest {
    /// The player's free-text action.
    pub message: String,
    /// Which model the backend should narrate with.
    pub model: String,
}

/// Body of a roll submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollSubmission {
    pub request_id: String,
    pub value: u32,
    #[serde(rename = "mod")]
    pub modifier: i32,
}

/// A batched turn result.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnResponse {
    pub message: String,
    #[serde(default)]
    pub awaiting_player_roll: bool,
    #[serde(default)]
    pub roll_request: Option<ApiRollRequest>,
}

impl TurnResponse {
    /// The roll the server is waiting for, if any.
    ///
    /// A roll request only counts when the server also flags the turn as
    /// awaiting a player roll.
    pub fn pending_roll(&self) -> Option<&ApiRollRequest> {
        if self.awaiting_player_roll {
            self.roll_request.as_ref()
        } else {
            None
        }
    }
}

/// A roll the server asks the player to make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRollRequest {
    pub id: String,
    pub skill: String,
    pub sides: u32,
    #[serde(default)]
    pub dc: Option<i32>,
}

/// Result of a world-definition validation call.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// The definition parsed; this is what the server understood.
    Accepted(WorldPreview),
    /// The server was reachable but refused the definition.
    Rejected { status: u16, reason: String },
}

/// The parsed world the server would import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldPreview {
    pub id: String,
    pub title: String,
    pub ruleset: String,
    #[serde(default)]
    pub end_goal: String,
    #[serde(default)]
    pub lore: String,
    #[serde(default)]
    pub locations: Vec<serde_json::Value>,
    #[serde(default)]
    pub npcs: Vec<serde_json::Value>,
    #[serde(default)]
    pub factions: Vec<serde_json::Value>,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
    #[serde(default)]
    pub rules_notes: Option<String>,
}

/// Summary of a game as returned by `GET /games/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GameSummary {
    #[serde(default)]
    pub world_id: Option<serde_json::Value>,
    #[serde(default)]
    pub party: Vec<PartyMember>,
}

/// A member of the player's party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyMember {
    pub id: serde_json::Value,
    pub name: String,
    #[serde(default)]
    pub stats: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub inventory: Vec<String>,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<String>,
}
