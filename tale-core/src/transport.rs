//! The request/response boundary shared by the turn controller and the
//! debounced validator.
//!
//! [`Transport`] is the seam: [`HttpTransport`] talks to the narration
//! backend through the `narrator` client, and `testing::MockTransport`
//! replays scripted replies.

use crate::roll::{RollError, RollRequest, RollSubmission};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use narrator::{Narrator, Validation, WorldPreview};
use std::fmt;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Error type for calls across the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Cannot reach {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from server: {0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// True when the backend could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TransportError::Unreachable { .. })
    }
}

impl From<narrator::Error> for TransportError {
    fn from(err: narrator::Error) -> Self {
        match err {
            narrator::Error::Network { endpoint, message } => TransportError::Unreachable {
                endpoint,
                reason: message,
            },
            narrator::Error::Api { status, message } => TransportError::Status { status, message },
            narrator::Error::Parse(message) => TransportError::Decode(message),
            narrator::Error::Config(message) => TransportError::Config(message),
        }
    }
}

impl From<RollError> for TransportError {
    fn from(err: RollError) -> Self {
        TransportError::Decode(err.to_string())
    }
}

/// Narration body bytes, delivered as they arrive.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// A player action to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub action_text: String,
    pub model_selector: String,
}

/// A turn result delivered as one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchedTurnResult {
    pub narration: String,
    pub roll_request: Option<RollRequest>,
}

/// How the backend answered a turn or roll.
///
/// Only the batched form can ask for a roll; a streamed body is narration
/// text and nothing else.
pub enum TurnReply {
    Batched(BatchedTurnResult),
    Streaming(ChunkStream),
}

impl fmt::Debug for TurnReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnReply::Batched(result) => f.debug_tuple("Batched").field(result).finish(),
            TurnReply::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// World-definition text tagged with the edit that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationDraft {
    pub source_text: String,
    pub request_epoch: u64,
}

/// The backend's verdict on a world definition.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Accepted(WorldPreview),
    Rejected { reason: String },
}

/// Which body format the backend is deployed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    Batched,
    Streaming,
}

/// Boundary to the narration backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve a free-text player action.
    async fn resolve_turn(
        &self,
        session_id: &str,
        request: &TurnRequest,
    ) -> Result<TurnReply, TransportError>;

    /// Answer an outstanding roll request.
    async fn submit_roll(
        &self,
        session_id: &str,
        submission: &RollSubmission,
    ) -> Result<TurnReply, TransportError>;

    /// Validate a world definition.
    ///
    /// Implementations should stop work and return
    /// [`TransportError::Cancelled`] once `cancel` fires.
    async fn validate_world(
        &self,
        draft: &ValidationDraft,
        cancel: &CancellationToken,
    ) -> Result<ValidationOutcome, TransportError>;

    /// Where the backend lives, for connectivity messages.
    fn endpoint(&self) -> &str;
}

/// [`Transport`] backed by the HTTP narration client.
#[derive(Clone)]
pub struct HttpTransport {
    narrator: Narrator,
    mode: ResponseMode,
}

impl HttpTransport {
    pub fn new(narrator: Narrator, mode: ResponseMode) -> Self {
        Self { narrator, mode }
    }

    pub fn narrator(&self) -> &Narrator {
        &self.narrator
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn resolve_turn(
        &self,
        session_id: &str,
        request: &TurnRequest,
    ) -> Result<TurnReply, TransportError> {
        let body = narrator::TurnRequest {
            message: request.action_text.clone(),
            model: request.model_selector.clone(),
        };
        match self.mode {
            ResponseMode::Batched => {
                let response = self.narrator.turn(session_id, &body).await?;
                Ok(TurnReply::Batched(batched_result(response)?))
            }
            ResponseMode::Streaming => {
                let stream = self.narrator.turn_stream(session_id, &body).await?;
                Ok(TurnReply::Streaming(chunk_stream(stream)))
            }
        }
    }

    async fn submit_roll(
        &self,
        session_id: &str,
        submission: &RollSubmission,
    ) -> Result<TurnReply, TransportError> {
        let body = narrator::RollSubmission {
            request_id: submission.roll_request_id.0.clone(),
            value: submission.value,
            modifier: submission.modifier,
        };
        match self.mode {
            ResponseMode::Batched => {
                let response = self.narrator.player_roll(session_id, &body).await?;
                Ok(TurnReply::Batched(batched_result(response)?))
            }
            ResponseMode::Streaming => {
                let stream = self.narrator.player_roll_stream(session_id, &body).await?;
                Ok(TurnReply::Streaming(chunk_stream(stream)))
            }
        }
    }

    async fn validate_world(
        &self,
        draft: &ValidationDraft,
        cancel: &CancellationToken,
    ) -> Result<ValidationOutcome, TransportError> {
        debug!(epoch = draft.request_epoch, "validating world definition");
        // Losing the race drops the request future, which aborts the connection.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.narrator.validate_world(&draft.source_text) => match result? {
                Validation::Accepted(preview) => Ok(ValidationOutcome::Accepted(preview)),
                Validation::Rejected { reason, .. } => Ok(ValidationOutcome::Rejected { reason }),
            },
        }
    }

    fn endpoint(&self) -> &str {
        self.narrator.base_url()
    }
}

fn batched_result(response: narrator::TurnResponse) -> Result<BatchedTurnResult, TransportError> {
    let roll_request = response
        .pending_roll()
        .cloned()
        .map(RollRequest::try_from)
        .transpose()?;
    Ok(BatchedTurnResult {
        narration: response.message,
        roll_request,
    })
}

fn chunk_stream(stream: narrator::ByteStream) -> ChunkStream {
    Box::pin(stream.map(|chunk| chunk.map_err(TransportError::from)))
}
