use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    db::BreakEvent,
    hooks::HookEvent,
    models::{BreakConfig, BreakKind, TimeSpan},
    ui::{BreakDecision, DecisionPrompt, DecisionReply, DecisionResponder, SkipHandle, UiEvent},
};

use super::{
    schedule::{BreakOutcome, BreakPhase},
    scheduler::BreakScheduler,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

/// What a finished worker asks the scheduler to do with its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Rearm(TimeSpan),
    /// Externally cancelled: timing stays as it is for the next tick.
    LeaveAsIs,
}

enum PromptResult {
    Reply(DecisionReply),
    TimedOut,
    Cancelled,
}

/// Frees the scheduler slot if the worker ends without reaching `finish`
/// (panic or task abort).
struct ReleaseGuard {
    scheduler: Option<BreakScheduler>,
    kind: BreakKind,
    id: u64,
}

impl ReleaseGuard {
    fn disarm(mut self) {
        self.scheduler = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.release(self.id, self.kind, std::thread::panicking());
        }
    }
}

/// Drives one firing: `Armed -> Notifying -> {Taken | Postponed | Dismissed}`.
pub(crate) struct BreakWorker {
    scheduler: BreakScheduler,
    kind: BreakKind,
    id: u64,
    config: BreakConfig,
    token: CancellationToken,
}

impl BreakWorker {
    pub(crate) fn new(
        scheduler: BreakScheduler,
        kind: BreakKind,
        id: u64,
        config: BreakConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            kind,
            id,
            config,
            token,
        }
    }

    pub(crate) async fn run(self) {
        let guard = ReleaseGuard {
            scheduler: Some(self.scheduler.clone()),
            kind: self.kind,
            id: self.id,
        };
        let notified_at = self.scheduler.clock().now();

        let (outcome, resolution, break_secs) = self.drive().await;

        self.scheduler.finish(self.id, self.kind, outcome, resolution);
        guard.disarm();

        log_info!("{} resolved as {}", self.kind, outcome.as_str());
        if outcome != BreakOutcome::Cancelled {
            let resolved_at = self.scheduler.clock().now();
            self.scheduler.record(BreakEvent::new(
                self.kind,
                outcome,
                notified_at,
                resolved_at,
                break_secs,
            ));
        }
        self.scheduler.ui().emit(UiEvent::BreakFinished {
            kind: self.kind,
            outcome,
        });
    }

    async fn drive(&self) -> (BreakOutcome, Resolution, Option<u32>) {
        let work = Resolution::Rearm(self.config.work);

        self.run_hook(HookEvent::NotificationShown);
        let result = self.prompt().await;
        self.run_hook(HookEvent::NotificationClosed);

        match result {
            PromptResult::Cancelled => (BreakOutcome::Cancelled, Resolution::LeaveAsIs, None),
            PromptResult::TimedOut => (BreakOutcome::TimedOut, work, None),
            PromptResult::Reply(reply) => match reply.decision {
                BreakDecision::TakeBreak if self.kind.offers_break() => self.take_break().await,
                BreakDecision::TakeBreak => {
                    log_warn!("{} cannot be taken; treating as dismissed", self.kind);
                    (BreakOutcome::Dismissed, work, None)
                }
                BreakDecision::Postpone => {
                    let after = reply.postpone_override.unwrap_or(self.config.postpone);
                    (BreakOutcome::Postponed, Resolution::Rearm(after), None)
                }
                BreakDecision::Dismiss => (BreakOutcome::Dismissed, work, None),
            },
        }
    }

    /// Shows the decision prompt and waits for the first of: a reply, the
    /// notification window running out, or cancellation.
    async fn prompt(&self) -> PromptResult {
        let ui = self.scheduler.ui();
        let (responder, mut reply_rx) = DecisionResponder::channel(self.kind);
        ui.emit(UiEvent::DecisionRequested {
            prompt: DecisionPrompt {
                kind: self.kind,
                message: self.kind.prompt().to_string(),
                countdown: self.config.notification_window,
                offer_take_break: self.kind.offers_break(),
            },
            responder,
        });

        let mut remaining = self.config.notification_window;
        let mut ticker = interval_at(Instant::now() + COUNTDOWN_STEP, COUNTDOWN_STEP);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            if remaining.is_zero() {
                break PromptResult::TimedOut;
            }
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break PromptResult::Cancelled,
                reply = &mut reply_rx => {
                    break match reply {
                        Ok(reply) => PromptResult::Reply(reply),
                        // The surface dropped its responder without answering.
                        Err(_) => PromptResult::TimedOut,
                    };
                }
                _ = ticker.tick() => {
                    remaining.tick_down(1);
                    ui.emit(UiEvent::DecisionCountdown { kind: self.kind, remaining });
                }
            }
        };

        ui.emit(UiEvent::DecisionClosed { kind: self.kind });
        result
    }

    async fn take_break(&self) -> (BreakOutcome, Resolution, Option<u32>) {
        let duration = self.config.break_duration.unwrap_or(TimeSpan::ZERO);
        let ui = self.scheduler.ui();
        let skip = SkipHandle::new();

        self.scheduler.set_phase(self.id, self.kind, BreakPhase::OnBreak);
        self.run_hook(HookEvent::BreakStart);
        ui.emit(UiEvent::BreakStarted {
            kind: self.kind,
            duration,
            skip: skip.clone(),
        });

        let mut remaining = duration;
        let mut ticker = interval_at(Instant::now() + COUNTDOWN_STEP, COUNTDOWN_STEP);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            if remaining.is_zero() {
                break BreakOutcome::Taken;
            }
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break BreakOutcome::Cancelled,
                _ = skip.skipped() => break BreakOutcome::Skipped,
                _ = ticker.tick() => {
                    remaining.tick_down(1);
                    ui.emit(UiEvent::BreakCountdown { kind: self.kind, remaining });
                }
            }
        };

        self.run_hook(HookEvent::BreakEnd);

        let spent = duration.total_seconds() - remaining.total_seconds();
        let resolution = match outcome {
            BreakOutcome::Cancelled => Resolution::LeaveAsIs,
            _ => Resolution::Rearm(self.config.work),
        };
        (outcome, resolution, Some(spent))
    }

    fn run_hook(&self, event: HookEvent) {
        self.scheduler.hooks().run(&self.config.hooks, event);
    }
}
