//! Debounced, cancellable validation of world definitions.
//!
//! Every edit bumps an epoch, cancels whatever the previous edit started and
//! schedules a new validation after a quiet period. A response only reaches
//! the shared snapshot if its epoch is still current when it lands; the
//! comparison and the write happen under the same lock.

use crate::transport::{Transport, TransportError, ValidationDraft, ValidationOutcome};
use narrator::WorldPreview;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Default quiet period between the last edit and the validation call.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(300);

/// A user-facing validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationMessage {
    /// The backend could not be reached.
    Unreachable { endpoint: String },
    /// The backend read the definition and refused it.
    Rejected { reason: String },
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMessage::Unreachable { endpoint } => {
                write!(f, "Cannot reach server at {endpoint}. Is it running?")
            }
            ValidationMessage::Rejected { reason } => f.write_str(reason),
        }
    }
}

/// What the author should currently be shown.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ValidationView {
    #[default]
    Idle,
    Preview(WorldPreview),
    Error(ValidationMessage),
}

/// Shared validator state, observable through [`DebouncedValidator::subscribe`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidatorSnapshot {
    /// Epoch of the latest edit.
    pub epoch: u64,
    /// Epoch whose response produced `view`; 0 before any response.
    pub settled_epoch: u64,
    pub view: ValidationView,
    pub torn_down: bool,
}

impl ValidatorSnapshot {
    /// Apply the response for `epoch`.
    ///
    /// Returns `false` and changes nothing if the response is stale or the
    /// validator has been torn down.
    pub fn settle(&mut self, epoch: u64, view: ValidationView) -> bool {
        if self.torn_down || epoch != self.epoch {
            return false;
        }
        self.view = view;
        self.settled_epoch = epoch;
        true
    }

    /// Whether the latest edit has been answered.
    pub fn is_settled(&self) -> bool {
        self.settled_epoch == self.epoch
    }
}

/// Validates a world-definition buffer as it is edited.
///
/// Must be used from within a tokio runtime: each edit spawns the task that
/// waits out the quiet period and performs the call.
pub struct DebouncedValidator<T: Transport + 'static> {
    transport: Arc<T>,
    quiet_period: Duration,
    state: Arc<watch::Sender<ValidatorSnapshot>>,
    in_flight: Option<CancellationToken>,
}

impl<T: Transport + 'static> DebouncedValidator<T> {
    pub fn new(transport: T, quiet_period: Duration) -> Self {
        Self::from_arc(Arc::new(transport), quiet_period)
    }

    /// Share a transport that is also used elsewhere.
    pub fn from_arc(transport: Arc<T>, quiet_period: Duration) -> Self {
        let (state, _) = watch::channel(ValidatorSnapshot::default());
        Self {
            transport,
            quiet_period,
            state: Arc::new(state),
            in_flight: None,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Record a new version of the source text and return its epoch.
    ///
    /// After teardown this does nothing and returns the last epoch.
    pub fn edit(&mut self, text: impl Into<String>) -> u64 {
        if self.state.borrow().torn_down {
            return self.current_epoch();
        }
        if let Some(previous) = self.in_flight.take() {
            previous.cancel();
        }

        let mut epoch = 0;
        self.state.send_modify(|snapshot| {
            snapshot.epoch += 1;
            epoch = snapshot.epoch;
        });

        let token = CancellationToken::new();
        self.in_flight = Some(token.clone());
        let draft = ValidationDraft {
            source_text: text.into(),
            request_epoch: epoch,
        };
        tokio::spawn(run_validation(
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            draft,
            self.quiet_period,
            token,
        ));
        epoch
    }

    pub fn view(&self) -> ValidationView {
        self.state.borrow().view.clone()
    }

    pub fn snapshot(&self) -> ValidatorSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ValidatorSnapshot> {
        self.state.subscribe()
    }

    pub fn current_epoch(&self) -> u64 {
        self.state.borrow().epoch
    }

    /// Stop validating: cancels the pending timer or call, and no later
    /// response will touch the snapshot.
    pub fn teardown(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        self.state.send_if_modified(|snapshot| {
            let changed = !snapshot.torn_down;
            snapshot.torn_down = true;
            changed
        });
    }
}

impl<T: Transport + 'static> Drop for DebouncedValidator<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn run_validation<T: Transport>(
    transport: Arc<T>,
    state: Arc<watch::Sender<ValidatorSnapshot>>,
    draft: ValidationDraft,
    quiet_period: Duration,
    cancel: CancellationToken,
) {
    let epoch = draft.request_epoch;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            trace!(epoch, "superseded before quiet period elapsed");
            return;
        }
        _ = tokio::time::sleep(quiet_period) => {}
    }

    debug!(epoch, "quiet period elapsed, validating");
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            trace!(epoch, "validation call cancelled");
            return;
        }
        result = transport.validate_world(&draft, &cancel) => result,
    };
    if cancel.is_cancelled() {
        trace!(epoch, "discarding response of cancelled validation");
        return;
    }

    let view = match result {
        Ok(ValidationOutcome::Accepted(preview)) => ValidationView::Preview(preview),
        Ok(ValidationOutcome::Rejected { reason }) => {
            ValidationView::Error(ValidationMessage::Rejected { reason })
        }
        Err(TransportError::Cancelled) => return,
        Err(err) if err.is_connectivity() => {
            debug!(epoch, error = %err, "validation endpoint unreachable");
            ValidationView::Error(ValidationMessage::Unreachable {
                endpoint: transport.endpoint().to_string(),
            })
        }
        Err(err) => ValidationView::Error(ValidationMessage::Rejected {
            reason: err.to_string(),
        }),
    };

    if !state.send_if_modified(|snapshot| snapshot.settle(epoch, view)) {
        trace!(epoch, "discarding stale validation response");
    }
}
