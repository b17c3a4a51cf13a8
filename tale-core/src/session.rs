//! Turn sequencing for one play session.
//!
//! [`TurnSession`] is the state machine: it owns the transcript and the roll
//! gate and decides what may be sent, but performs no I/O. [`TurnController`]
//! drives it against a [`Transport`].
//!
//! ```text
//! Idle --action--> AwaitingTurnResult --result--> Idle | AwaitingPlayerRoll
//! AwaitingPlayerRoll --roll--> AwaitingTurnResult
//! AwaitingTurnResult --failure--> Idle (or back to AwaitingPlayerRoll for a roll)
//! ```

use crate::decoder::Utf8ChunkDecoder;
use crate::roll::{roll_summary, RollError, RollRequest, RollSubmission};
use crate::transcript::{EntryId, Speaker, Transcript};
use crate::transport::{BatchedTurnResult, Transport, TurnReply, TurnRequest};
use futures::StreamExt;
use tracing::{debug, warn};

/// Model used when none has been chosen.
pub const DEFAULT_MODEL: &str = "llama3";

/// Configuration for a play session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Backend game id this session plays.
    pub session_id: String,

    /// Model the backend narrates with.
    pub model: String,
}

impl SessionConfig {
    /// Create a config for the given game, using [`DEFAULT_MODEL`].
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Set the model selector.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Where the session is in the turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingTurnResult,
    AwaitingPlayerRoll,
}

/// Why a submission was dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Input was blank after trimming.
    EmptyInput,
    /// Free text is gated while a roll is outstanding.
    RollPending,
    /// Another turn or roll is already being resolved.
    TurnInFlight,
    /// A roll was submitted but none was requested.
    NoRollPending,
}

/// A backend call the session has committed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnCall {
    Action { text: String },
    Roll { submission: RollSubmission },
}

/// Result of trying to start a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Begin {
    Call(TurnCall),
    Ignored(IgnoreReason),
}

/// What happened to a submission, once it has run its course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Completed { state: SessionState },
    Ignored(IgnoreReason),
}

#[derive(Debug)]
enum InFlight {
    Action,
    Roll(RollRequest),
}

#[derive(Debug)]
struct OpenStream {
    entry: EntryId,
    decoder: Utf8ChunkDecoder,
}

/// The turn state machine.
#[derive(Debug, Default)]
pub struct TurnSession {
    transcript: Transcript,
    pending_roll: Option<RollRequest>,
    in_flight: Option<InFlight>,
    stream: Option<OpenStream>,
}

impl TurnSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        if self.in_flight.is_some() {
            SessionState::AwaitingTurnResult
        } else if self.pending_roll.is_some() {
            SessionState::AwaitingPlayerRoll
        } else {
            SessionState::Idle
        }
    }

    /// Whether free-text input is currently refused because of a roll.
    pub fn is_gated(&self) -> bool {
        self.pending_roll.is_some() || matches!(self.in_flight, Some(InFlight::Roll(_)))
    }

    /// The roll the player is being asked for, if any.
    pub fn pending_roll(&self) -> Option<&RollRequest> {
        self.pending_roll.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Start resolving a free-text action.
    ///
    /// On success the player's entry is already in the transcript and the
    /// returned call must be resolved with one of the `complete`/`fail`
    /// methods.
    pub fn begin_action(&mut self, text: &str) -> Begin {
        let text = text.trim();
        if text.is_empty() {
            return Begin::Ignored(IgnoreReason::EmptyInput);
        }
        if self.in_flight.is_some() {
            return Begin::Ignored(IgnoreReason::TurnInFlight);
        }
        if self.pending_roll.is_some() {
            return Begin::Ignored(IgnoreReason::RollPending);
        }

        self.transcript.push(Speaker::Player, text);
        self.in_flight = Some(InFlight::Action);
        debug!("turn started");
        Begin::Call(TurnCall::Action {
            text: text.to_string(),
        })
    }

    /// Start answering the outstanding roll.
    ///
    /// An out-of-range value is rejected here and leaves the session
    /// untouched.
    pub fn begin_roll(&mut self, value: u32, modifier: i32) -> Result<Begin, RollError> {
        if self.in_flight.is_some() {
            return Ok(Begin::Ignored(IgnoreReason::TurnInFlight));
        }
        let Some(request) = self.pending_roll.as_ref() else {
            return Ok(Begin::Ignored(IgnoreReason::NoRollPending));
        };
        request.check(value)?;

        let Some(request) = self.pending_roll.take() else {
            return Ok(Begin::Ignored(IgnoreReason::NoRollPending));
        };
        let submission = RollSubmission {
            roll_request_id: request.id.clone(),
            value,
            modifier,
        };
        self.transcript
            .push(Speaker::Player, roll_summary(value, modifier));
        debug!(roll_request = %request.id, value, modifier, "roll submitted");
        self.in_flight = Some(InFlight::Roll(request));
        Ok(Begin::Call(TurnCall::Roll { submission }))
    }

    /// Record a batched narrator reply.
    pub fn complete_turn(&mut self, result: BatchedTurnResult) -> SessionState {
        if self.in_flight.take().is_none() {
            warn!("turn result arrived with no turn in flight");
            return self.state();
        }
        self.transcript.push(Speaker::Narrator, result.narration);
        if let Some(request) = &result.roll_request {
            debug!(roll_request = %request.id, "narrator requested a roll");
        }
        self.pending_roll = result.roll_request;
        self.state()
    }

    /// Record a failed turn or roll call.
    ///
    /// A failed roll submission puts its roll request back so the player can
    /// answer it again.
    pub fn fail_turn(&mut self) -> SessionState {
        let Some(in_flight) = self.in_flight.take() else {
            return self.state();
        };
        self.transcript.push_error();
        if let InFlight::Roll(request) = in_flight {
            self.pending_roll = Some(request);
        }
        self.state()
    }

    /// Open the narrator entry a streamed reply will fill.
    pub fn begin_stream(&mut self) -> Option<EntryId> {
        if self.in_flight.is_none() || self.stream.is_some() {
            return None;
        }
        let entry = self.transcript.open(Speaker::Narrator)?;
        self.stream = Some(OpenStream {
            entry,
            decoder: Utf8ChunkDecoder::new(),
        });
        Some(entry)
    }

    /// Decode a chunk into the open narrator entry, returning the new text.
    pub fn push_stream_chunk(&mut self, chunk: &[u8]) -> String {
        let Some(stream) = self.stream.as_mut() else {
            return String::new();
        };
        let text = stream.decoder.decode(chunk);
        if !text.is_empty() {
            self.transcript.append(stream.entry, &text);
        }
        text
    }

    /// The stream broke: the open entry becomes the error marker.
    pub fn fail_stream(&mut self) -> SessionState {
        if let Some(stream) = self.stream.take() {
            self.transcript.fail(stream.entry);
        }
        if let Some(InFlight::Roll(request)) = self.in_flight.take() {
            self.pending_roll = Some(request);
        }
        self.state()
    }

    /// The stream ended normally: freeze the entry.
    ///
    /// Streamed replies never carry a roll request, so this always lands in
    /// [`SessionState::Idle`].
    pub fn finish_stream(&mut self) -> SessionState {
        if let Some(mut stream) = self.stream.take() {
            let tail = stream.decoder.finish();
            if !tail.is_empty() {
                self.transcript.append(stream.entry, &tail);
            }
            self.transcript.close(stream.entry);
        }
        self.in_flight = None;
        self.state()
    }
}

/// Drives a [`TurnSession`] against a transport.
pub struct TurnController<T: Transport> {
    transport: T,
    config: SessionConfig,
    session: TurnSession,
}

impl<T: Transport> TurnController<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            session: TurnSession::new(),
        }
    }

    pub fn session(&self) -> &TurnSession {
        &self.session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Change the model used for subsequent turns.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
    }

    /// Submit a free-text action and wait for the narrator.
    pub async fn submit_action(&mut self, text: &str) -> SubmitOutcome {
        self.submit_action_streaming(text, |_| {}).await
    }

    /// Submit a free-text action, handing narration text to `on_text` as it
    /// arrives.
    pub async fn submit_action_streaming<F>(&mut self, text: &str, on_text: F) -> SubmitOutcome
    where
        F: FnMut(&str),
    {
        match self.session.begin_action(text) {
            Begin::Call(call) => self.run(call, on_text).await,
            Begin::Ignored(reason) => {
                debug!(?reason, "action ignored");
                SubmitOutcome::Ignored(reason)
            }
        }
    }

    /// Answer the outstanding roll and wait for the narrator.
    pub async fn submit_roll(
        &mut self,
        value: u32,
        modifier: i32,
    ) -> Result<SubmitOutcome, RollError> {
        self.submit_roll_streaming(value, modifier, |_| {}).await
    }

    /// Answer the outstanding roll, streaming narration to `on_text`.
    pub async fn submit_roll_streaming<F>(
        &mut self,
        value: u32,
        modifier: i32,
        on_text: F,
    ) -> Result<SubmitOutcome, RollError>
    where
        F: FnMut(&str),
    {
        match self.session.begin_roll(value, modifier)? {
            Begin::Call(call) => Ok(self.run(call, on_text).await),
            Begin::Ignored(reason) => {
                debug!(?reason, "roll ignored");
                Ok(SubmitOutcome::Ignored(reason))
            }
        }
    }

    async fn run<F>(&mut self, call: TurnCall, mut on_text: F) -> SubmitOutcome
    where
        F: FnMut(&str),
    {
        let session_id = self.config.session_id.as_str();
        let reply = match &call {
            TurnCall::Action { text } => {
                let request = TurnRequest {
                    action_text: text.clone(),
                    model_selector: self.config.model.clone(),
                };
                self.transport.resolve_turn(session_id, &request).await
            }
            TurnCall::Roll { submission } => {
                self.transport.submit_roll(session_id, submission).await
            }
        };

        let state = match reply {
            Err(err) => {
                warn!(error = %err, "turn failed");
                self.session.fail_turn()
            }
            Ok(TurnReply::Batched(result)) => {
                on_text(&result.narration);
                self.session.complete_turn(result)
            }
            Ok(TurnReply::Streaming(mut chunks)) => {
                self.session.begin_stream();
                loop {
                    match chunks.next().await {
                        Some(Ok(bytes)) => {
                            let text = self.session.push_stream_chunk(&bytes);
                            if !text.is_empty() {
                                on_text(&text);
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "narration stream failed");
                            break self.session.fail_stream();
                        }
                        None => break self.session.finish_stream(),
                    }
                }
            }
        };

        debug!(?state, "turn settled");
        SubmitOutcome::Completed { state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::TURN_ERROR_MARKER;

    fn roll(sides: u32) -> RollRequest {
        RollRequest::new("r1", "Perception", sides, Some(10)).unwrap()
    }

    fn batched(narration: &str, roll_request: Option<RollRequest>) -> BatchedTurnResult {
        BatchedTurnResult {
            narration: narration.to_string(),
            roll_request,
        }
    }

    fn gated_session() -> TurnSession {
        let mut session = TurnSession::new();
        session.begin_action("search the room");
        session.complete_turn(batched("Make a check.", Some(roll(20))));
        session
    }

    #[test]
    fn test_action_appends_player_entry_before_reply() {
        let mut session = TurnSession::new();
        let begin = session.begin_action("  open the door ");

        assert_eq!(
            begin,
            Begin::Call(TurnCall::Action {
                text: "open the door".to_string()
            })
        );
        assert_eq!(session.state(), SessionState::AwaitingTurnResult);
        let last = session.transcript().last().unwrap();
        assert_eq!(last.speaker, Speaker::Player);
        assert_eq!(last.text, "open the door");
    }

    #[test]
    fn test_blank_action_ignored() {
        let mut session = TurnSession::new();
        assert_eq!(
            session.begin_action("   "),
            Begin::Ignored(IgnoreReason::EmptyInput)
        );
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_second_action_while_in_flight_ignored() {
        let mut session = TurnSession::new();
        session.begin_action("first");

        assert_eq!(
            session.begin_action("second"),
            Begin::Ignored(IgnoreReason::TurnInFlight)
        );
        assert_eq!(
            session.begin_roll(5, 0),
            Ok(Begin::Ignored(IgnoreReason::TurnInFlight))
        );
        assert_eq!(session.transcript().len(), 1);
    }

    #[test]
    fn test_roll_request_gates_free_text() {
        let mut session = gated_session();
        assert_eq!(session.state(), SessionState::AwaitingPlayerRoll);
        assert!(session.is_gated());

        let before = session.transcript().len();
        assert_eq!(
            session.begin_action("run away"),
            Begin::Ignored(IgnoreReason::RollPending)
        );
        assert_eq!(session.transcript().len(), before);
    }

    #[test]
    fn test_out_of_range_roll_leaves_state() {
        let mut session = gated_session();
        let before = session.transcript().len();

        assert_eq!(
            session.begin_roll(21, 0),
            Err(RollError::OutOfRange {
                value: 21,
                sides: 20
            })
        );
        assert_eq!(session.state(), SessionState::AwaitingPlayerRoll);
        assert_eq!(session.transcript().len(), before);
    }

    #[test]
    fn test_roll_summary_entry_and_submission() {
        let mut session = gated_session();
        let begin = session.begin_roll(20, 3).unwrap();

        let Begin::Call(TurnCall::Roll { submission }) = begin else {
            panic!("expected roll call, got {begin:?}");
        };
        assert_eq!(submission.roll_request_id.0, "r1");
        assert_eq!(submission.modifier, 3);
        assert_eq!(session.transcript().last().unwrap().text, "Roll 20 + 3");
        assert!(session.pending_roll().is_none());
        assert!(session.is_gated());
    }

    #[test]
    fn test_roll_without_request_ignored() {
        let mut session = TurnSession::new();
        assert_eq!(
            session.begin_roll(3, 0),
            Ok(Begin::Ignored(IgnoreReason::NoRollPending))
        );
    }

    #[test]
    fn test_reply_to_roll_can_chain_new_roll() {
        let mut session = gated_session();
        session.begin_roll(12, 0).unwrap();
        let next = RollRequest::new("r2", "Athletics", 20, None).unwrap();
        let state = session.complete_turn(batched("Now climb.", Some(next)));

        assert_eq!(state, SessionState::AwaitingPlayerRoll);
        assert_eq!(session.pending_roll().unwrap().id.0, "r2");
    }

    #[test]
    fn test_failed_action_returns_to_idle() {
        let mut session = TurnSession::new();
        session.begin_action("look");
        assert_eq!(session.fail_turn(), SessionState::Idle);

        let last = session.transcript().last().unwrap();
        assert_eq!(last.text, TURN_ERROR_MARKER);
        assert!(last.is_error);
        assert!(matches!(session.begin_action("look again"), Begin::Call(_)));
    }

    #[test]
    fn test_failed_roll_restores_request() {
        let mut session = gated_session();
        session.begin_roll(7, 1).unwrap();
        assert_eq!(session.fail_turn(), SessionState::AwaitingPlayerRoll);
        assert_eq!(session.pending_roll().unwrap().id.0, "r1");
    }

    #[test]
    fn test_stream_fills_single_entry() {
        let mut session = TurnSession::new();
        session.begin_action("hello");
        let entry = session.begin_stream().unwrap();

        for chunk in ["Hel", "lo wor", "ld"] {
            session.push_stream_chunk(chunk.as_bytes());
        }
        assert_eq!(session.finish_stream(), SessionState::Idle);

        let narrator: Vec<_> = session
            .transcript()
            .entries()
            .iter()
            .filter(|e| e.speaker == Speaker::Narrator)
            .collect();
        assert_eq!(narrator.len(), 1);
        assert_eq!(narrator[0].id, entry);
        assert_eq!(narrator[0].text, "Hello world");
    }

    #[test]
    fn test_stream_failure_replaces_partial_text() {
        let mut session = TurnSession::new();
        session.begin_action("hello");
        let entry = session.begin_stream().unwrap();
        session.push_stream_chunk(b"Once upon");

        assert_eq!(session.fail_stream(), SessionState::Idle);
        assert_eq!(session.transcript().get(entry).unwrap().text, TURN_ERROR_MARKER);
        assert_eq!(session.transcript().len(), 2);
    }

    #[test]
    fn test_stream_requires_turn_in_flight() {
        let mut session = TurnSession::new();
        assert!(session.begin_stream().is_none());
        assert!(session.push_stream_chunk(b"stray").is_empty());
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new("7");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.with_model("mistral").model, "mistral");
    }
}
