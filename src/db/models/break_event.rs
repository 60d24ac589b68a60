use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{breaks::BreakOutcome, models::BreakKind};

/// One resolved break notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreakEvent {
    pub id: String,
    pub kind: BreakKind,
    pub outcome: BreakOutcome,
    pub notified_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    /// Seconds spent in the break countdown, for taken or skipped breaks.
    pub break_secs: Option<u32>,
}

impl BreakEvent {
    pub fn new(
        kind: BreakKind,
        outcome: BreakOutcome,
        notified_at: DateTime<Utc>,
        resolved_at: DateTime<Utc>,
        break_secs: Option<u32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            outcome,
            notified_at,
            resolved_at,
            break_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCount {
    pub kind: BreakKind,
    pub outcome: BreakOutcome,
    pub count: u32,
}
