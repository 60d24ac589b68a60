#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{NaiveTime, TimeZone, Utc};
use tokio::sync::mpsc::UnboundedReceiver;

use restwise_lib::{
    breaks::{BreakOutcome, BreakScheduler, ScheduleSnapshot},
    clock::ManualClock,
    hooks::{HookBundle, HookEvent, HookRunner},
    models::{ActiveHours, BreakConfig, BreakKind, TimeSpan},
    ui::{DecisionPrompt, DecisionResponder, SkipHandle, UiBridge, UiEvent},
};

/// Upper bound for any single wait; virtual time under `start_paused`.
const WAIT: Duration = Duration::from_secs(3 * 60 * 60);

#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl HookRunner for RecordingHooks {
    fn run(&self, _hooks: &HookBundle, event: HookEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn secs(seconds: u32) -> TimeSpan {
    TimeSpan::from_seconds(seconds)
}

/// Only `kind` enabled, with the given work and postpone durations and a
/// short notification window.
pub fn only(kind: BreakKind, work: u32, postpone: u32) -> BTreeMap<BreakKind, BreakConfig> {
    BreakKind::ALL
        .into_iter()
        .map(|candidate| {
            let mut config = candidate.default_config();
            config.enabled = candidate == kind;
            if candidate == kind {
                config.work = secs(work);
                config.postpone = secs(postpone);
                config.notification_window = secs(30);
                if kind.offers_break() {
                    config.break_duration = Some(secs(3));
                }
            }
            (candidate, config)
        })
        .collect()
}

pub struct Harness {
    pub scheduler: BreakScheduler,
    pub clock: ManualClock,
    pub events: UnboundedReceiver<UiEvent>,
    pub hooks: Arc<RecordingHooks>,
}

impl Harness {
    pub fn new(configs: BTreeMap<BreakKind, BreakConfig>) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 9, 30, 0).unwrap());
        clock.set_local_time(NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        let (ui, events) = UiBridge::new();
        let hooks = Arc::new(RecordingHooks::default());
        let scheduler = BreakScheduler::new(
            &configs,
            ActiveHours::default(),
            Arc::new(clock.clone()),
            ui,
            hooks.clone(),
        );
        Self {
            scheduler,
            clock,
            events,
            hooks,
        }
    }

    /// One scheduler tick per simulated second.
    pub fn advance(&self, ticks: u32) {
        for _ in 0..ticks {
            self.clock.advance_secs(1);
            self.scheduler.tick();
        }
    }

    pub fn snapshot(&self, kind: BreakKind) -> ScheduleSnapshot {
        self.scheduler.schedule(kind).unwrap()
    }

    async fn next_event(&mut self) -> UiEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for a UI event")
            .expect("UI event stream closed")
    }

    pub async fn next_decision(&mut self) -> (DecisionPrompt, DecisionResponder) {
        loop {
            if let UiEvent::DecisionRequested { prompt, responder } = self.next_event().await {
                return (prompt, responder);
            }
        }
    }

    pub async fn next_break(&mut self) -> (BreakKind, TimeSpan, SkipHandle) {
        loop {
            if let UiEvent::BreakStarted {
                kind,
                duration,
                skip,
            } = self.next_event().await
            {
                return (kind, duration, skip);
            }
        }
    }

    pub async fn finished(&mut self) -> (BreakKind, BreakOutcome) {
        loop {
            if let UiEvent::BreakFinished { kind, outcome } = self.next_event().await {
                return (kind, outcome);
            }
        }
    }
}
