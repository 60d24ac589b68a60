use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_datetime, parse_kind, parse_outcome, to_u32},
    models::{BreakEvent, OutcomeCount},
    Database,
};

fn row_to_event(row: &Row) -> Result<BreakEvent> {
    let kind: String = row.get("kind")?;
    let outcome: String = row.get("outcome")?;
    let notified_at: String = row.get("notified_at")?;
    let resolved_at: String = row.get("resolved_at")?;
    let duration_secs: Option<i64> = row.get("duration_secs")?;

    Ok(BreakEvent {
        id: row.get("id")?,
        kind: parse_kind(&kind)?,
        outcome: parse_outcome(&outcome)?,
        notified_at: parse_datetime(&notified_at, "notified_at")?,
        resolved_at: parse_datetime(&resolved_at, "resolved_at")?,
        break_secs: duration_secs
            .map(|secs| to_u32(secs, "duration_secs"))
            .transpose()?,
    })
}

impl Database {
    pub async fn insert_break_event(&self, event: &BreakEvent) -> Result<()> {
        let record = event.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO break_events (id, kind, outcome, notified_at, resolved_at, duration_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.kind.as_str(),
                    record.outcome.as_str(),
                    record.notified_at.to_rfc3339(),
                    record.resolved_at.to_rfc3339(),
                    record.break_secs.map(i64::from),
                ],
            )
            .with_context(|| "failed to insert break event")?;
            Ok(())
        })
        .await
    }

    /// Most recent events first.
    pub async fn break_history(&self, limit: u32) -> Result<Vec<BreakEvent>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, outcome, notified_at, resolved_at, duration_secs
                 FROM break_events
                 ORDER BY notified_at DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }

            Ok(events)
        })
        .await
    }

    /// Per-category outcome tallies for notifications at or after `since`.
    pub async fn outcome_counts(&self, since: DateTime<Utc>) -> Result<Vec<OutcomeCount>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, outcome, COUNT(*) AS count
                 FROM break_events
                 WHERE notified_at >= ?1
                 GROUP BY kind, outcome
                 ORDER BY kind, outcome",
            )?;

            let mut rows = stmt.query(params![since.to_rfc3339()])?;
            let mut counts = Vec::new();
            while let Some(row) = rows.next()? {
                let kind: String = row.get("kind")?;
                let outcome: String = row.get("outcome")?;
                let count: i64 = row.get("count")?;
                counts.push(OutcomeCount {
                    kind: parse_kind(&kind)?,
                    outcome: parse_outcome(&outcome)?,
                    count: to_u32(count, "count")?,
                });
            }

            Ok(counts)
        })
        .await
    }
}
