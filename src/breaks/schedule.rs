use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BreakConfig, BreakKind, TimeSpan};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BreakPhase {
    /// Counting down working time.
    #[default]
    Armed,
    /// Decision prompt is showing.
    Notifying,
    /// User accepted; break-duration countdown is running.
    OnBreak,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BreakOutcome {
    Taken,
    Skipped,
    Postponed,
    Dismissed,
    TimedOut,
    Cancelled,
}

impl BreakOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakOutcome::Taken => "Taken",
            BreakOutcome::Skipped => "Skipped",
            BreakOutcome::Postponed => "Postponed",
            BreakOutcome::Dismissed => "Dismissed",
            BreakOutcome::TimedOut => "TimedOut",
            BreakOutcome::Cancelled => "Cancelled",
        }
    }
}

/// Live timing state for one break category.
///
/// Owned by the scheduler and addressed by [`BreakKind`]; `reload` swaps the
/// timing in place rather than replacing the schedule.
#[derive(Debug, Clone)]
pub struct BreakSchedule {
    kind: BreakKind,
    config: BreakConfig,
    next_fire: DateTime<Utc>,
    cancelled: bool,
    phase: BreakPhase,
    last_outcome: Option<BreakOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSnapshot {
    pub kind: BreakKind,
    pub enabled: bool,
    pub phase: BreakPhase,
    pub next_fire: DateTime<Utc>,
    pub remaining: TimeSpan,
    pub last_outcome: Option<BreakOutcome>,
}

impl BreakSchedule {
    pub fn new(kind: BreakKind, config: BreakConfig, now: DateTime<Utc>) -> Self {
        let next_fire = now + config.work.as_chrono();
        Self {
            kind,
            cancelled: !config.enabled,
            config,
            next_fire,
            phase: BreakPhase::Armed,
            last_outcome: None,
        }
    }

    pub fn kind(&self) -> BreakKind {
        self.kind
    }

    pub fn config(&self) -> &BreakConfig {
        &self.config
    }

    pub fn next_fire(&self) -> DateTime<Utc> {
        self.next_fire
    }

    pub fn phase(&self) -> BreakPhase {
        self.phase
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Enabled and not cancelled: allowed to fire and to re-arm.
    pub fn is_live(&self) -> bool {
        self.config.enabled && !self.cancelled
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire <= now
    }

    pub fn should_fire(&self, now: DateTime<Utc>) -> bool {
        self.is_live() && self.phase == BreakPhase::Armed && self.is_due(now)
    }

    pub fn postpone(&mut self, seconds: u32) {
        self.next_fire += chrono::Duration::seconds(i64::from(seconds));
    }

    /// Fresh full work period from `now` with the given settings.
    pub fn reload(&mut self, config: BreakConfig, now: DateTime<Utc>) {
        self.cancelled = !config.enabled;
        self.config = config;
        self.next_fire = now + self.config.work.as_chrono();
        self.phase = BreakPhase::Armed;
    }

    pub fn rearm(&mut self, after: TimeSpan, now: DateTime<Utc>) {
        self.next_fire = now + after.as_chrono();
        self.phase = BreakPhase::Armed;
    }

    pub fn make_due(&mut self, now: DateTime<Utc>) {
        self.next_fire = now;
    }

    /// Stops future firing and re-arming until the next `reload`.
    pub fn disable(&mut self) {
        self.config.enabled = false;
        self.cancelled = true;
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn set_phase(&mut self, phase: BreakPhase) {
        self.phase = phase;
    }

    pub(crate) fn set_last_outcome(&mut self, outcome: BreakOutcome) {
        self.last_outcome = Some(outcome);
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> TimeSpan {
        let seconds = (self.next_fire - now).num_seconds().max(0);
        TimeSpan::from_total_seconds(u32::try_from(seconds).unwrap_or(u32::MAX))
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> ScheduleSnapshot {
        ScheduleSnapshot {
            kind: self.kind,
            enabled: self.config.enabled,
            phase: self.phase,
            next_fire: self.next_fire,
            remaining: self.remaining(now),
            last_outcome: self.last_outcome,
        }
    }
}
