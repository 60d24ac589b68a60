use std::fmt;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, hooks::HookBundle};

use super::TimeSpan;

/// The independently scheduled break categories, in firing priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakKind {
    Micro,
    Stretch,
    Day,
}

impl BreakKind {
    pub const ALL: [BreakKind; 3] = [BreakKind::Micro, BreakKind::Stretch, BreakKind::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakKind::Micro => "micro",
            BreakKind::Stretch => "stretch",
            BreakKind::Day => "day",
        }
    }

    /// Whether this category has a break-duration countdown. The day break is
    /// advisory only and can be postponed or dismissed, never taken.
    pub fn offers_break(&self) -> bool {
        !matches!(self, BreakKind::Day)
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            BreakKind::Micro => "Time for a micro break: look away from the screen.",
            BreakKind::Stretch => "Time to stand up and stretch.",
            BreakKind::Day => "You have reached the end of your working day.",
        }
    }

    pub fn default_config(&self) -> BreakConfig {
        match self {
            BreakKind::Micro => BreakConfig {
                work: TimeSpan::from_minutes(10),
                break_duration: Some(TimeSpan::from_seconds(20)),
                postpone: TimeSpan::from_minutes(2),
                notification_window: TimeSpan::from_seconds(30),
                enabled: true,
                hooks: HookBundle::default(),
            },
            BreakKind::Stretch => BreakConfig {
                work: TimeSpan::from_minutes(45),
                break_duration: Some(TimeSpan::from_minutes(5)),
                postpone: TimeSpan::from_minutes(5),
                notification_window: TimeSpan::from_seconds(30),
                enabled: true,
                hooks: HookBundle::default(),
            },
            BreakKind::Day => BreakConfig {
                work: TimeSpan::from_minutes(8 * 60),
                break_duration: None,
                postpone: TimeSpan::from_minutes(30),
                notification_window: TimeSpan::from_minutes(20),
                enabled: true,
                hooks: HookBundle::default(),
            },
        }
    }

    /// Second-scale durations for exercising the whole flow by hand.
    pub fn debug_config(&self) -> BreakConfig {
        let base = self.default_config();
        match self {
            BreakKind::Micro => BreakConfig {
                work: TimeSpan::from_seconds(20),
                break_duration: Some(TimeSpan::from_seconds(5)),
                postpone: TimeSpan::from_seconds(10),
                notification_window: TimeSpan::from_seconds(15),
                ..base
            },
            BreakKind::Stretch => BreakConfig {
                work: TimeSpan::from_seconds(60),
                break_duration: Some(TimeSpan::from_seconds(10)),
                postpone: TimeSpan::from_seconds(15),
                notification_window: TimeSpan::from_seconds(15),
                ..base
            },
            BreakKind::Day => BreakConfig {
                work: TimeSpan::from_minutes(3),
                postpone: TimeSpan::from_seconds(30),
                notification_window: TimeSpan::from_seconds(60),
                ..base
            },
        }
    }
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} break", self.as_str())
    }
}

/// User settings for one break category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakConfig {
    /// Working time between two breaks.
    pub work: TimeSpan,
    /// Length of the break itself; absent for the day break.
    pub break_duration: Option<TimeSpan>,
    pub postpone: TimeSpan,
    /// How long the decision prompt waits for an answer.
    pub notification_window: TimeSpan,
    pub enabled: bool,
    #[serde(default)]
    pub hooks: HookBundle,
}

impl BreakConfig {
    pub fn validate(&self, kind: BreakKind) -> Result<(), ConfigError> {
        if self.work.is_zero() {
            return Err(ConfigError::ZeroWorkDuration(kind));
        }
        match (kind.offers_break(), self.break_duration) {
            (true, None) => Err(ConfigError::MissingBreakDuration(kind)),
            (false, Some(_)) => Err(ConfigError::UnexpectedBreakDuration(kind)),
            _ => Ok(()),
        }
    }
}

/// Daily window outside of which no break fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHours {
    pub enabled: bool,
    pub start: TimeSpan,
    pub end: TimeSpan,
    /// Runs `OutsideActiveHours` when the window closes.
    #[serde(default)]
    pub hooks: HookBundle,
}

impl Default for ActiveHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: TimeSpan::from_minutes(9 * 60),
            end: TimeSpan::from_minutes(18 * 60),
            hooks: HookBundle::default(),
        }
    }
}

impl ActiveHours {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start >= self.end {
            return Err(ConfigError::ActiveHoursOrder {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// `start <= time_of_day < end`, or always true while disabled.
    pub fn contains(&self, time_of_day: TimeSpan) -> bool {
        if !self.enabled {
            return true;
        }
        self.start <= time_of_day && time_of_day < self.end
    }

    pub fn contains_time(&self, time: NaiveTime) -> bool {
        self.contains(TimeSpan::from_total_seconds(time.num_seconds_from_midnight()))
    }
}
