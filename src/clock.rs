use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, NaiveTime, Utc};

/// Wall-clock source for schedule arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Local time of day, used for active-hours gating.
    fn local_time(&self) -> NaiveTime {
        self.now().with_timezone(&Local).time()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Cloned handles share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    local_time: Arc<Mutex<Option<NaiveTime>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            local_time: Arc::new(Mutex::new(None)),
        }
    }

    pub fn advance_secs(&self, seconds: i64) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += chrono::Duration::seconds(seconds);
    }

    /// Pins the local time of day reported to active-hours checks.
    pub fn set_local_time(&self, time: NaiveTime) {
        *self
            .local_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(time);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn local_time(&self) -> NaiveTime {
        let pinned = *self
            .local_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pinned.unwrap_or_else(|| self.now().with_timezone(&Local).time())
    }
}
