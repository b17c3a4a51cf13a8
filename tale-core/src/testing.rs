//! Testing utilities for turn sessions and world validation.
//!
//! This module provides tools for integration testing:
//! - `MockTransport` for deterministic testing without a backend
//! - `TestHarness` for scripted play scenarios
//! - Assertion helpers for verifying session state

use crate::command::{Command, CommandError, CommandHandler, CommandOutput};
use crate::roll::{RollError, RollRequest, RollSubmission};
use crate::session::{SessionConfig, SessionState, SubmitOutcome, TurnController};
use crate::transport::{
    BatchedTurnResult, Transport, TransportError, TurnReply, TurnRequest, ValidationDraft,
    ValidationOutcome,
};
use async_trait::async_trait;
use narrator::WorldPreview;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Endpoint reported by [`MockTransport`].
pub const MOCK_ENDPOINT: &str = "mock://narrator";

/// A scripted answer to a turn or roll call.
#[derive(Debug)]
pub enum MockReply {
    Batched(BatchedTurnResult),
    /// Body chunks delivered in order; an `Err` breaks the stream there.
    Stream(Vec<Result<Vec<u8>, TransportError>>),
    Fail(TransportError),
}

impl MockReply {
    /// Plain narration with no roll.
    pub fn narration(text: impl Into<String>) -> Self {
        MockReply::Batched(BatchedTurnResult {
            narration: text.into(),
            roll_request: None,
        })
    }

    /// Narration that asks the player for a roll.
    pub fn with_roll(text: impl Into<String>, roll: RollRequest) -> Self {
        MockReply::Batched(BatchedTurnResult {
            narration: text.into(),
            roll_request: Some(roll),
        })
    }

    /// A streamed body made of the given text chunks.
    pub fn chunks(chunks: &[&str]) -> Self {
        MockReply::Stream(chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect())
    }

    /// The backend cannot be reached.
    pub fn unreachable() -> Self {
        MockReply::Fail(unreachable_error())
    }
}

/// A scripted answer to a validation call.
#[derive(Debug)]
pub enum MockValidation {
    Ready(Result<ValidationOutcome, TransportError>),
    /// Resolves when the paired sender fires, or with `Cancelled` if the
    /// call is cancelled first.
    Deferred(oneshot::Receiver<Result<ValidationOutcome, TransportError>>),
}

impl MockValidation {
    pub fn accepted(preview: WorldPreview) -> Self {
        MockValidation::Ready(Ok(ValidationOutcome::Accepted(preview)))
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        MockValidation::Ready(Ok(ValidationOutcome::Rejected {
            reason: reason.into(),
        }))
    }

    pub fn unreachable() -> Self {
        MockValidation::Ready(Err(unreachable_error()))
    }

    /// A validation the test resolves by hand.
    pub fn deferred() -> (
        Self,
        oneshot::Sender<Result<ValidationOutcome, TransportError>>,
    ) {
        let (tx, rx) = oneshot::channel();
        (MockValidation::Deferred(rx), tx)
    }
}

/// A turn or roll call the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Turn {
        session_id: String,
        request: TurnRequest,
    },
    Roll {
        session_id: String,
        submission: RollSubmission,
    },
}

/// A validation call the mock received.
#[derive(Debug, Clone)]
pub struct ValidationCall {
    pub draft: ValidationDraft,
    /// When the call was issued.
    pub at: Instant,
    /// The token the caller passed; lets tests see whether it was cancelled.
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    validations: VecDeque<MockValidation>,
    calls: Vec<RecordedCall>,
    validation_calls: Vec<ValidationCall>,
}

/// A transport that returns scripted responses.
///
/// Clones share the same script and call log, so a test can keep one handle
/// while the code under test owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a turn/roll reply to the queue.
    pub fn queue_reply(&self, reply: MockReply) {
        self.lock().replies.push_back(reply);
    }

    /// Add a validation answer to the queue.
    pub fn queue_validation(&self, validation: MockValidation) {
        self.lock().validations.push_back(validation);
    }

    /// Turn and roll calls received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Validation calls received so far.
    pub fn validation_calls(&self) -> Vec<ValidationCall> {
        self.lock().validation_calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self) -> Result<TurnReply, TransportError> {
        let reply = self
            .lock()
            .replies
            .pop_front()
            .unwrap_or_else(|| MockReply::narration("The narrator has no more scripted responses."));
        match reply {
            MockReply::Batched(result) => Ok(TurnReply::Batched(result)),
            MockReply::Stream(chunks) => Ok(TurnReply::Streaming(Box::pin(
                futures::stream::iter(chunks),
            ))),
            MockReply::Fail(err) => Err(err),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn resolve_turn(
        &self,
        session_id: &str,
        request: &TurnRequest,
    ) -> Result<TurnReply, TransportError> {
        self.lock().calls.push(RecordedCall::Turn {
            session_id: session_id.to_string(),
            request: request.clone(),
        });
        self.next_reply()
    }

    async fn submit_roll(
        &self,
        session_id: &str,
        submission: &RollSubmission,
    ) -> Result<TurnReply, TransportError> {
        self.lock().calls.push(RecordedCall::Roll {
            session_id: session_id.to_string(),
            submission: submission.clone(),
        });
        self.next_reply()
    }

    async fn validate_world(
        &self,
        draft: &ValidationDraft,
        cancel: &CancellationToken,
    ) -> Result<ValidationOutcome, TransportError> {
        let script = {
            let mut state = self.lock();
            state.validation_calls.push(ValidationCall {
                draft: draft.clone(),
                at: Instant::now(),
                cancel: cancel.clone(),
            });
            state.validations.pop_front()
        };

        match script {
            Some(MockValidation::Ready(result)) => result,
            Some(MockValidation::Deferred(rx)) => tokio::select! {
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                result = rx => result.unwrap_or(Err(TransportError::Cancelled)),
            },
            None => Ok(ValidationOutcome::Rejected {
                reason: "The mock has no scripted validation.".to_string(),
            }),
        }
    }

    fn endpoint(&self) -> &str {
        MOCK_ENDPOINT
    }
}

fn unreachable_error() -> TransportError {
    TransportError::Unreachable {
        endpoint: MOCK_ENDPOINT.to_string(),
        reason: "connection refused".to_string(),
    }
}

/// A minimal world preview for tests.
pub fn sample_preview(title: &str) -> WorldPreview {
    WorldPreview {
        id: title.to_lowercase().replace(' ', "-"),
        title: title.to_string(),
        ruleset: "dnd5e".to_string(),
        end_goal: String::new(),
        lore: String::new(),
        locations: Vec::new(),
        npcs: Vec::new(),
        factions: Vec::new(),
        items: Vec::new(),
        rules_notes: None,
    }
}

/// A command handler that records what it was asked to do.
#[derive(Debug, Clone, Default)]
pub struct RecordingCommands {
    executed: Arc<Mutex<Vec<Command>>>,
}

impl RecordingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<Command> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CommandHandler for RecordingCommands {
    async fn execute(&self, command: Command) -> Result<CommandOutput, CommandError> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
        Ok(CommandOutput::Message(command.name().to_string()))
    }
}

/// Test harness for running play scenarios.
pub struct TestHarness {
    /// Handle on the controller's transport, for scripting and inspection.
    pub transport: MockTransport,
    /// The controller under test.
    pub controller: TurnController<MockTransport>,
}

impl TestHarness {
    /// Create a harness for a session called `test-session`.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::new("test-session"))
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let transport = MockTransport::new();
        let controller = TurnController::new(transport.clone(), config);
        Self {
            transport,
            controller,
        }
    }

    /// Queue a narration reply.
    pub fn expect_narration(&mut self, text: impl Into<String>) -> &mut Self {
        self.transport.queue_reply(MockReply::narration(text));
        self
    }

    /// Queue a reply that asks for a roll.
    pub fn expect_roll_request(&mut self, text: impl Into<String>, roll: RollRequest) -> &mut Self {
        self.transport.queue_reply(MockReply::with_roll(text, roll));
        self
    }

    /// Queue any reply.
    pub fn expect_reply(&mut self, reply: MockReply) -> &mut Self {
        self.transport.queue_reply(reply);
        self
    }

    /// Submit a free-text action.
    pub async fn act(&mut self, text: &str) -> SubmitOutcome {
        self.controller.submit_action(text).await
    }

    /// Answer the pending roll.
    pub async fn roll(&mut self, value: u32, modifier: i32) -> Result<SubmitOutcome, RollError> {
        self.controller.submit_roll(value, modifier).await
    }

    pub fn state(&self) -> SessionState {
        self.controller.session().state()
    }

    /// Transcript text, oldest first.
    pub fn transcript_texts(&self) -> Vec<String> {
        self.controller
            .session()
            .transcript()
            .entries()
            .iter()
            .map(|e| e.text.clone())
            .collect()
    }

    pub fn last_text(&self) -> Option<&str> {
        self.controller
            .session()
            .transcript()
            .last()
            .map(|e| e.text.as_str())
    }

    /// Number of turn and roll calls sent to the transport.
    pub fn call_count(&self) -> usize {
        self.transport.calls().len()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the session is in the expected state.
#[track_caller]
pub fn assert_state(harness: &TestHarness, expected: SessionState) {
    let actual = harness.state();
    assert_eq!(actual, expected, "Expected state {expected:?}, got {actual:?}");
}

/// Assert free text is gated behind a roll.
#[track_caller]
pub fn assert_gated(harness: &TestHarness) {
    assert!(
        harness.controller.session().is_gated(),
        "Expected input to be gated by a pending roll"
    );
}

/// Assert the transcript holds exactly these texts.
#[track_caller]
pub fn assert_transcript(harness: &TestHarness, expected: &[&str]) {
    let actual = harness.transcript_texts();
    assert_eq!(actual, expected, "Transcript mismatch");
}

/// Assert how many turn/roll calls reached the transport.
#[track_caller]
pub fn assert_call_count(harness: &TestHarness, expected: usize) {
    let actual = harness.call_count();
    assert_eq!(
        actual, expected,
        "Expected {expected} backend calls, got {actual}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::TURN_ERROR_MARKER;

    #[tokio::test]
    async fn test_mock_basic_narration() {
        let mut harness = TestHarness::new();
        harness.expect_narration("You stand in a dusty tavern.");

        let outcome = harness.act("I look around").await;

        assert_eq!(
            outcome,
            SubmitOutcome::Completed {
                state: SessionState::Idle
            }
        );
        assert_transcript(&harness, &["I look around", "You stand in a dusty tavern."]);
        assert_call_count(&harness, 1);
    }

    #[tokio::test]
    async fn test_mock_records_model_and_session() {
        let mut harness =
            TestHarness::with_config(SessionConfig::new("g7").with_model("mistral"));
        harness.act("wave").await;

        assert_eq!(
            harness.transport.calls(),
            vec![RecordedCall::Turn {
                session_id: "g7".to_string(),
                request: TurnRequest {
                    action_text: "wave".to_string(),
                    model_selector: "mistral".to_string(),
                },
            }]
        );
    }

    #[tokio::test]
    async fn test_mock_default_reply_when_script_runs_out() {
        let mut harness = TestHarness::new();
        harness.act("anything").await;
        assert_eq!(
            harness.last_text(),
            Some("The narrator has no more scripted responses.")
        );
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mut harness = TestHarness::new();
        harness.expect_reply(MockReply::unreachable());
        harness.act("knock").await;

        assert_state(&harness, SessionState::Idle);
        assert_eq!(harness.last_text(), Some(TURN_ERROR_MARKER));
    }

    #[tokio::test]
    async fn test_recording_commands() {
        let commands = RecordingCommands::new();
        commands.execute(Command::Save).await.unwrap();
        commands.execute(Command::Party).await.unwrap();
        assert_eq!(commands.executed(), vec![Command::Save, Command::Party]);
    }

    #[tokio::test]
    async fn test_deferred_validation_observes_cancel() {
        let transport = MockTransport::new();
        let (validation, _tx) = MockValidation::deferred();
        transport.queue_validation(validation);

        let cancel = CancellationToken::new();
        let draft = ValidationDraft {
            source_text: "x".to_string(),
            request_epoch: 1,
        };
        cancel.cancel();
        let result = transport.validate_world(&draft, &cancel).await;

        assert_eq!(result, Err(TransportError::Cancelled));
        assert_eq!(transport.validation_calls().len(), 1);
    }
}
