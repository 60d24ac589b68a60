//! Boundary between the engines and whatever renders them.
//!
//! The engines never call into a UI directly. They push [`UiEvent`]s onto an
//! unbounded channel drained by the UI dispatcher. A decision prompt carries a
//! [`DecisionResponder`], a single-use handle that resumes the waiting break
//! worker from any thread.

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    breaks::{BreakOutcome, ScheduleSnapshot},
    models::{BreakKind, PostureState, TimeSpan},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakDecision {
    TakeBreak,
    Postpone,
    Dismiss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionReply {
    pub decision: BreakDecision,
    /// Replaces the configured postpone duration for this one decision.
    pub postpone_override: Option<TimeSpan>,
}

impl DecisionReply {
    pub fn take_break() -> Self {
        Self {
            decision: BreakDecision::TakeBreak,
            postpone_override: None,
        }
    }

    pub fn postpone() -> Self {
        Self {
            decision: BreakDecision::Postpone,
            postpone_override: None,
        }
    }

    pub fn postpone_for(span: TimeSpan) -> Self {
        Self {
            decision: BreakDecision::Postpone,
            postpone_override: Some(span),
        }
    }

    pub fn dismiss() -> Self {
        Self {
            decision: BreakDecision::Dismiss,
            postpone_override: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPrompt {
    pub kind: BreakKind,
    pub message: String,
    pub countdown: TimeSpan,
    pub offer_take_break: bool,
}

/// Resolves one pending decision. Consumed on use, so a worker is resumed
/// at most once.
#[derive(Debug)]
pub struct DecisionResponder {
    kind: BreakKind,
    tx: oneshot::Sender<DecisionReply>,
}

impl DecisionResponder {
    pub(crate) fn channel(kind: BreakKind) -> (Self, oneshot::Receiver<DecisionReply>) {
        let (tx, rx) = oneshot::channel();
        (Self { kind, tx }, rx)
    }

    pub fn kind(&self) -> BreakKind {
        self.kind
    }

    /// Returns `false` if the worker stopped waiting (timeout or cancellation).
    pub fn respond(self, reply: DecisionReply) -> bool {
        self.tx.send(reply).is_ok()
    }

    pub fn is_stale(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Lets the break countdown surface end a break early.
#[derive(Debug, Clone, Default)]
pub struct SkipHandle {
    token: CancellationToken,
}

impl SkipHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(&self) {
        self.token.cancel();
    }

    pub fn is_skipped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn skipped(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug)]
pub enum UiEvent {
    DecisionRequested {
        prompt: DecisionPrompt,
        responder: DecisionResponder,
    },
    DecisionCountdown {
        kind: BreakKind,
        remaining: TimeSpan,
    },
    DecisionClosed {
        kind: BreakKind,
    },
    BreakStarted {
        kind: BreakKind,
        duration: TimeSpan,
        skip: SkipHandle,
    },
    BreakCountdown {
        kind: BreakKind,
        remaining: TimeSpan,
    },
    BreakFinished {
        kind: BreakKind,
        outcome: BreakOutcome,
    },
    Status(Vec<ScheduleSnapshot>),
    Posture(PostureState),
    /// A device failure the user has to see, reported once per failure.
    DeviceError {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct UiBridge {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl UiBridge {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            debug!("UI dispatcher gone; dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responder_resumes_waiter_exactly_once() {
        let (responder, rx) = DecisionResponder::channel(BreakKind::Micro);
        assert_eq!(responder.kind(), BreakKind::Micro);
        assert!(!responder.is_stale());

        let handle = std::thread::spawn(move || responder.respond(DecisionReply::dismiss()));
        assert!(handle.join().unwrap());
        assert_eq!(rx.await.unwrap(), DecisionReply::dismiss());
    }

    #[tokio::test]
    async fn responder_reports_abandoned_waiter() {
        let (responder, rx) = DecisionResponder::channel(BreakKind::Day);
        drop(rx);
        assert!(responder.is_stale());
        assert!(!responder.respond(DecisionReply::postpone()));
    }

    #[tokio::test]
    async fn bridge_delivers_in_order_and_tolerates_closed_receiver() {
        let (bridge, mut rx) = UiBridge::new();
        bridge.emit(UiEvent::DecisionClosed {
            kind: BreakKind::Micro,
        });
        bridge.emit(UiEvent::DeviceError {
            message: "camera".into(),
        });
        assert!(matches!(
            rx.recv().await,
            Some(UiEvent::DecisionClosed {
                kind: BreakKind::Micro
            })
        ));
        assert!(matches!(rx.recv().await, Some(UiEvent::DeviceError { .. })));

        drop(rx);
        bridge.emit(UiEvent::DecisionClosed {
            kind: BreakKind::Day,
        });
    }

    #[test]
    fn skip_handle_is_shared_between_clones() {
        let skip = SkipHandle::new();
        let ui_side = skip.clone();
        assert!(!skip.is_skipped());
        ui_side.skip();
        assert!(skip.is_skipped());
    }
}
