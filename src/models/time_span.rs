use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::TimeSpanError;

const SECS_PER_MINUTE: u32 = 60;
const SECS_PER_HOUR: u32 = 60 * SECS_PER_MINUTE;

/// Longest representable span: 23:59:59.
pub const MAX_TOTAL_SECONDS: u32 = 24 * SECS_PER_HOUR - 1;

/// An `H:M:S` span of time, stored as whole seconds.
///
/// Values are always in `0..=23:59:59`. The only in-place mutation is
/// [`TimeSpan::tick_down`]; everything else produces a new value, so a span
/// handed to a countdown is always the caller's own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSpan {
    total_seconds: u32,
}

impl TimeSpan {
    pub const ZERO: TimeSpan = TimeSpan { total_seconds: 0 };

    pub fn new(hours: u32, minutes: u32, seconds: u32) -> Result<Self, TimeSpanError> {
        if hours > 23 {
            return Err(TimeSpanError::OutOfRange {
                component: "hours",
                value: hours,
                max: 23,
            });
        }
        if minutes > 59 {
            return Err(TimeSpanError::OutOfRange {
                component: "minutes",
                value: minutes,
                max: 59,
            });
        }
        if seconds > 59 {
            return Err(TimeSpanError::OutOfRange {
                component: "seconds",
                value: seconds,
                max: 59,
            });
        }

        Ok(Self {
            total_seconds: hours * SECS_PER_HOUR + minutes * SECS_PER_MINUTE + seconds,
        })
    }

    /// Builds a span from a second count, saturating at 23:59:59.
    pub fn from_total_seconds(total_seconds: u32) -> Self {
        Self {
            total_seconds: total_seconds.min(MAX_TOTAL_SECONDS),
        }
    }

    pub fn from_minutes(minutes: u32) -> Self {
        Self::from_total_seconds(minutes.saturating_mul(SECS_PER_MINUTE))
    }

    pub fn from_seconds(seconds: u32) -> Self {
        Self::from_total_seconds(seconds)
    }

    pub fn total_seconds(&self) -> u32 {
        self.total_seconds
    }

    pub fn hours(&self) -> u32 {
        self.total_seconds / SECS_PER_HOUR
    }

    pub fn minutes(&self) -> u32 {
        (self.total_seconds % SECS_PER_HOUR) / SECS_PER_MINUTE
    }

    pub fn seconds(&self) -> u32 {
        self.total_seconds % SECS_PER_MINUTE
    }

    pub fn is_zero(&self) -> bool {
        self.total_seconds == 0
    }

    /// Counts the span down by `seconds`.
    ///
    /// Returns `false` and leaves the span untouched when fewer than `seconds`
    /// remain.
    pub fn tick_down(&mut self, seconds: u32) -> bool {
        match self.total_seconds.checked_sub(seconds) {
            Some(remaining) => {
                self.total_seconds = remaining;
                true
            }
            None => false,
        }
    }

    pub fn as_std(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.total_seconds))
    }

    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.total_seconds))
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours(),
            self.minutes(),
            self.seconds()
        )
    }
}

/// Accepts `HH:MM:SS`, `MM:SS`, or a single number with an optional
/// `h`/`m`/`s` suffix (`90s`, `10m`, `1h`; bare numbers are seconds).
impl FromStr for TimeSpan {
    type Err = TimeSpanError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let raw = input.trim();
        let invalid = || TimeSpanError::Unparsable(input.to_string());

        if raw.contains(':') {
            let parts = raw
                .split(':')
                .map(|part| part.trim().parse::<u32>().map_err(|_| invalid()))
                .collect::<Result<Vec<_>, _>>()?;
            return match parts.as_slice() {
                [h, m, s] => TimeSpan::new(*h, *m, *s),
                [m, s] => TimeSpan::new(0, *m, *s),
                _ => Err(invalid()),
            };
        }

        let (digits, unit) = match raw.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], Some(c.to_ascii_lowercase())),
            Some(_) => (raw, None),
            None => return Err(invalid()),
        };
        let value: u32 = digits.trim().parse().map_err(|_| invalid())?;
        let multiplier = match unit {
            None | Some('s') => 1,
            Some('m') => SECS_PER_MINUTE,
            Some('h') => SECS_PER_HOUR,
            Some(_) => return Err(invalid()),
        };
        let total = value
            .checked_mul(multiplier)
            .filter(|total| *total <= MAX_TOTAL_SECONDS)
            .ok_or(TimeSpanError::TooLong(value))?;
        Ok(TimeSpan::from_total_seconds(total))
    }
}

impl TryFrom<String> for TimeSpan {
    type Error = TimeSpanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeSpan> for String {
    fn from(span: TimeSpan) -> Self {
        span.to_string()
    }
}
