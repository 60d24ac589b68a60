//! Typed errors for values rejected at the edit boundary.
//!
//! Runtime plumbing (files, database, camera) reports through `anyhow`; the
//! enums here are for user input that must never be persisted.

use thiserror::Error;

use crate::models::{BreakKind, TimeSpan};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimeSpanError {
    #[error("{component} must be at most {max}, got {value}")]
    OutOfRange {
        component: &'static str,
        value: u32,
        max: u32,
    },

    #[error("cannot parse '{0}' as a time span")]
    Unparsable(String),

    #[error("{0} is longer than 23:59:59")]
    TooLong(u32),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("active hours must end after they start ({start} - {end})")]
    ActiveHoursOrder { start: TimeSpan, end: TimeSpan },

    #[error("{0} needs a break duration")]
    MissingBreakDuration(BreakKind),

    #[error("{0} does not take a break duration")]
    UnexpectedBreakDuration(BreakKind),

    #[error("{0} work duration must be longer than zero")]
    ZeroWorkDuration(BreakKind),

    #[error("{field} margin must be between 0 and {max}%, got {value}%")]
    MarginOutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("sampling interval must be between {min_ms} and {max_ms} ms, got {value_ms} ms")]
    SamplingInterval {
        value_ms: u64,
        min_ms: u64,
        max_ms: u64,
    },

    #[error("{0} must be a positive number")]
    NonPositive(&'static str),

    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),
}
