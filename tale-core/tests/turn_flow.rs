//! Turn sequencing against a scripted transport.
//!
//! These tests verify:
//! - The roll gate and single-flight rules
//! - Local roll validation and the roll summary entry
//! - Recovery from transport failures
//! - Streamed narration filling exactly one entry

use tale_core::testing::{
    assert_call_count, assert_gated, assert_state, assert_transcript, MockReply,
    RecordingCommands, TestHarness,
};
use tale_core::{
    parse_input, Begin, CommandHandler, IgnoreReason, PlayerInput, RollError, RollRequest,
    SessionState, Speaker, SubmitOutcome, TransportError, TurnSession, TURN_ERROR_MARKER,
};

fn d20(id: &str) -> RollRequest {
    RollRequest::new(id, "Perception", 20, Some(12)).unwrap()
}

fn narrator_entries(harness: &TestHarness) -> Vec<String> {
    harness
        .controller
        .session()
        .transcript()
        .entries()
        .iter()
        .filter(|e| e.speaker == Speaker::Narrator)
        .map(|e| e.text.clone())
        .collect()
}

// =============================================================================
// GATE AND SINGLE-FLIGHT
// =============================================================================

#[tokio::test]
async fn test_free_text_ignored_while_roll_pending() {
    let mut harness = TestHarness::new();
    harness.expect_roll_request("Something moves in the dark.", d20("r1"));

    harness.act("I search the cellar").await;
    assert_state(&harness, SessionState::AwaitingPlayerRoll);
    assert_gated(&harness);

    for attempt in ["I run", "I scream", "/not-a-roll"] {
        let outcome = harness.act(attempt).await;
        assert_eq!(outcome, SubmitOutcome::Ignored(IgnoreReason::RollPending));
    }

    assert_call_count(&harness, 1);
    assert_transcript(
        &harness,
        &["I search the cellar", "Something moves in the dark."],
    );
}

#[test]
fn test_second_submission_while_awaiting_result_is_dropped() {
    let mut session = TurnSession::new();

    let first = session.begin_action("open the gate");
    assert!(matches!(first, Begin::Call(_)));

    // No call descriptor means nothing is sent.
    assert_eq!(
        session.begin_action("open it again"),
        Begin::Ignored(IgnoreReason::TurnInFlight)
    );
    assert_eq!(
        session.begin_roll(10, 0),
        Ok(Begin::Ignored(IgnoreReason::TurnInFlight))
    );
    assert_eq!(session.transcript().len(), 1);
    assert_eq!(session.state(), SessionState::AwaitingTurnResult);
}

// =============================================================================
// ROLLS
// =============================================================================

#[tokio::test]
async fn test_roll_out_of_range_rejected_locally() {
    let mut harness = TestHarness::new();
    harness.expect_roll_request("Roll for it.", d20("r1"));
    harness.act("I leap the chasm").await;

    let err = harness.roll(21, 0).await.unwrap_err();
    assert_eq!(err, RollError::OutOfRange { value: 21, sides: 20 });
    assert_eq!(harness.roll(0, 0).await.unwrap_err().to_string(), "Enter a number between 1 and 20");

    assert_call_count(&harness, 1);
    assert_state(&harness, SessionState::AwaitingPlayerRoll);
}

#[tokio::test]
async fn test_roll_with_modifier() {
    let mut harness = TestHarness::new();
    harness
        .expect_roll_request("Roll for it.", d20("r1"))
        .expect_narration("You spot the trap.");
    harness.act("I check for traps").await;

    let outcome = harness.roll(20, 3).await.unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Completed {
            state: SessionState::Idle
        }
    );
    assert_transcript(
        &harness,
        &[
            "I check for traps",
            "Roll for it.",
            "Roll 20 + 3",
            "You spot the trap.",
        ],
    );
}

#[tokio::test]
async fn test_roll_without_modifier_has_no_suffix() {
    let mut harness = TestHarness::new();
    harness
        .expect_roll_request("Roll for it.", d20("r1"))
        .expect_narration("Done.");
    harness.act("I climb").await;
    harness.roll(20, 0).await.unwrap();

    let texts = harness.transcript_texts();
    assert_eq!(texts[2], "Roll 20");
}

#[tokio::test]
async fn test_roll_reply_may_request_another_roll() {
    let mut harness = TestHarness::new();
    harness
        .expect_roll_request("Roll to sneak.", d20("r1"))
        .expect_roll_request("The guard turns. Roll again.", d20("r2"));
    harness.act("I sneak").await;
    harness.roll(14, 2).await.unwrap();

    assert_state(&harness, SessionState::AwaitingPlayerRoll);
    let pending = harness.controller.session().pending_roll().unwrap();
    assert_eq!(pending.id.0, "r2");
}

#[tokio::test]
async fn test_roll_ignored_when_none_requested() {
    let mut harness = TestHarness::new();
    let outcome = harness.roll(5, 0).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Ignored(IgnoreReason::NoRollPending));
    assert_call_count(&harness, 0);
}

// =============================================================================
// FAILURE RECOVERY
// =============================================================================

#[tokio::test]
async fn test_transport_failure_yields_one_error_entry() {
    let mut harness = TestHarness::new();
    harness
        .expect_reply(MockReply::unreachable())
        .expect_narration("The innkeeper nods.");

    let outcome = harness.act("I greet the innkeeper").await;
    assert_eq!(
        outcome,
        SubmitOutcome::Completed {
            state: SessionState::Idle
        }
    );
    assert_eq!(narrator_entries(&harness), vec![TURN_ERROR_MARKER]);

    harness.act("I greet the innkeeper again").await;
    assert_transcript(
        &harness,
        &[
            "I greet the innkeeper",
            TURN_ERROR_MARKER,
            "I greet the innkeeper again",
            "The innkeeper nods.",
        ],
    );
}

#[tokio::test]
async fn test_failed_roll_submission_can_be_retried() {
    let mut harness = TestHarness::new();
    harness
        .expect_roll_request("Roll.", d20("r1"))
        .expect_reply(MockReply::Fail(TransportError::Status {
            status: 500,
            message: "boom".to_string(),
        }))
        .expect_narration("Success.");
    harness.act("I pick the lock").await;

    harness.roll(11, 0).await.unwrap();
    assert_state(&harness, SessionState::AwaitingPlayerRoll);
    assert_eq!(harness.last_text(), Some(TURN_ERROR_MARKER));

    harness.roll(11, 0).await.unwrap();
    assert_state(&harness, SessionState::Idle);
    assert_eq!(harness.last_text(), Some("Success."));
}

// =============================================================================
// STREAMING
// =============================================================================

#[tokio::test]
async fn test_streamed_chunks_fill_one_entry() {
    let mut harness = TestHarness::new();
    harness.expect_reply(MockReply::chunks(&["Hel", "lo wor", "ld"]));

    let mut pieces = Vec::new();
    let outcome = harness
        .controller
        .submit_action_streaming("hello", |text| pieces.push(text.to_string()))
        .await;

    assert_eq!(pieces, vec!["Hel", "lo wor", "ld"]);
    assert_eq!(
        outcome,
        SubmitOutcome::Completed {
            state: SessionState::Idle
        }
    );
    assert_eq!(narrator_entries(&harness), vec!["Hello world"]);
}

#[tokio::test]
async fn test_stream_split_inside_multibyte_character() {
    let mut harness = TestHarness::new();
    harness.expect_reply(MockReply::Stream(vec![
        Ok(b"The caf\xC3".to_vec()),
        Ok(b"\xA9 is closed.".to_vec()),
    ]));

    harness.act("enter").await;
    assert_eq!(narrator_entries(&harness), vec!["The café is closed."]);
}

#[tokio::test]
async fn test_stream_error_replaces_entry_text() {
    let mut harness = TestHarness::new();
    harness.expect_reply(MockReply::Stream(vec![
        Ok(b"Once upon a ".to_vec()),
        Err(TransportError::Decode("connection reset".to_string())),
    ]));

    harness.act("tell me a story").await;

    assert_state(&harness, SessionState::Idle);
    assert_transcript(&harness, &["tell me a story", TURN_ERROR_MARKER]);
}

#[tokio::test]
async fn test_stream_never_opens_roll_gate() {
    let mut harness = TestHarness::new();
    harness.expect_reply(MockReply::chunks(&["Roll a d20 for Stealth"]));

    harness.act("hide").await;

    assert_state(&harness, SessionState::Idle);
    assert!(harness.controller.session().pending_roll().is_none());
}

#[tokio::test]
async fn test_batched_reply_reported_to_streaming_callback() {
    let mut harness = TestHarness::new();
    harness.expect_narration("All at once.");

    let mut pieces = Vec::new();
    harness
        .controller
        .submit_action_streaming("go", |text| pieces.push(text.to_string()))
        .await;
    assert_eq!(pieces, vec!["All at once."]);
}

// =============================================================================
// COMMANDS
// =============================================================================

#[tokio::test]
async fn test_commands_leave_session_untouched() {
    let mut harness = TestHarness::new();
    harness.expect_roll_request("Roll.", d20("r1"));
    harness.act("I listen").await;
    let before = harness.transcript_texts();

    let commands = RecordingCommands::new();
    for line in ["/save", "/party", "/help"] {
        let PlayerInput::Command(command) = parse_input(line) else {
            panic!("expected a command for {line}");
        };
        commands.execute(command).await.unwrap();
    }

    assert_eq!(commands.executed().len(), 3);
    assert_eq!(harness.transcript_texts(), before);
    assert_gated(&harness);
    assert_call_count(&harness, 1);
}
