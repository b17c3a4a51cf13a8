//! Client core for narrative play against a remote narration engine.
//!
//! This crate provides:
//! - A turn state machine that sequences player actions, narrator replies
//!   (batched or streamed) and dice-roll gating
//! - A debounced, cancellable validator for world definitions
//! - Out-of-band commands dispatched outside the turn cycle
//! - Client-local preferences
//!
//! # Quick Start
//!
//! ```ignore
//! use tale_core::{HttpTransport, ResponseMode, SessionConfig, TurnController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let narrator = narrator::Narrator::from_env()?;
//!     let transport = HttpTransport::new(narrator, ResponseMode::Batched);
//!     let mut controller = TurnController::new(transport, SessionConfig::new("1"));
//!
//!     controller.submit_action("I look around the tavern").await;
//!     if let Some(roll) = controller.session().pending_roll() {
//!         println!("{roll}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod decoder;
pub mod prefs;
pub mod roll;
pub mod session;
pub mod testing;
pub mod transcript;
pub mod transport;
pub mod validator;

// Primary public API
pub use command::{
    help_text, parse_input, BackendCommands, Command, CommandError, CommandHandler, CommandOutput,
    PlayerInput, COMMAND_PREFIX,
};
pub use decoder::Utf8ChunkDecoder;
pub use prefs::{PersistError, Preferences};
pub use roll::{roll_summary, RollError, RollRequest, RollRequestId, RollSubmission};
pub use session::{
    Begin, IgnoreReason, SessionConfig, SessionState, SubmitOutcome, TurnCall, TurnController,
    TurnSession, DEFAULT_MODEL,
};
pub use testing::{MockReply, MockTransport, MockValidation, TestHarness};
pub use transcript::{EntryId, Speaker, Transcript, TranscriptEntry, TURN_ERROR_MARKER};
pub use transport::{
    BatchedTurnResult, ChunkStream, HttpTransport, ResponseMode, Transport, TransportError,
    TurnReply, TurnRequest, ValidationDraft, ValidationOutcome,
};
pub use validator::{
    DebouncedValidator, ValidationMessage, ValidationView, ValidatorSnapshot, DEFAULT_QUIET_PERIOD,
};
