use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::{breaks::BreakOutcome, models::BreakKind};

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_kind(value: &str) -> Result<BreakKind> {
    BreakKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == value)
        .ok_or_else(|| anyhow!("unknown break kind {value}"))
}

pub fn parse_outcome(value: &str) -> Result<BreakOutcome> {
    match value {
        "Taken" => Ok(BreakOutcome::Taken),
        "Skipped" => Ok(BreakOutcome::Skipped),
        "Postponed" => Ok(BreakOutcome::Postponed),
        "Dismissed" => Ok(BreakOutcome::Dismissed),
        "TimedOut" => Ok(BreakOutcome::TimedOut),
        "Cancelled" => Ok(BreakOutcome::Cancelled),
        other => Err(anyhow!("unknown break outcome {other}")),
    }
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}
