use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::Clock,
    db::{BreakEvent, Database},
    error::ConfigError,
    hooks::{HookBundle, HookEvent, HookRunner},
    models::{ActiveHours, BreakConfig, BreakKind, TimeSpan},
    ui::{UiBridge, UiEvent},
};

use super::{
    schedule::{BreakOutcome, BreakPhase, BreakSchedule, ScheduleSnapshot},
    worker::{BreakWorker, Resolution},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// One scheduler tick, in seconds.
pub const TICK_SECS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseState {
    Running,
    Paused { until: Option<DateTime<Utc>> },
}

struct InFlight {
    kind: BreakKind,
    id: u64,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl InFlight {
    fn cancel(mut self) -> Option<JoinHandle<()>> {
        self.token.cancel();
        self.handle.take()
    }
}

struct SchedulerState {
    schedules: BTreeMap<BreakKind, BreakSchedule>,
    active_hours: ActiveHours,
    pause: PauseState,
    in_flight: Option<InFlight>,
    next_worker_id: u64,
    outside_active_hours: bool,
    shut_down: bool,
}

impl SchedulerState {
    fn postpone_live(&mut self, except: Option<BreakKind>) {
        for schedule in self.schedules.values_mut() {
            if Some(schedule.kind()) != except && schedule.is_live() {
                schedule.postpone(TICK_SECS);
            }
        }
    }

    fn in_flight_matches(&self, id: u64) -> bool {
        self.in_flight.as_ref().is_some_and(|flight| flight.id == id)
    }
}

/// Owns every [`BreakSchedule`] and the single "break in flight" slot.
///
/// `tick` is driven once per second, either by [`BreakScheduler::start`] or
/// by a caller's own trigger. A due break is handed to a dedicated worker
/// task; the worker reports back through `finish`, which re-arms the schedule
/// and frees the slot in one critical section.
#[derive(Clone)]
pub struct BreakScheduler {
    state: Arc<Mutex<SchedulerState>>,
    clock: Arc<dyn Clock>,
    ui: UiBridge,
    hooks: Arc<dyn HookRunner>,
    history: Option<Database>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_interval: Duration,
}

impl BreakScheduler {
    pub fn new(
        configs: &BTreeMap<BreakKind, BreakConfig>,
        active_hours: ActiveHours,
        clock: Arc<dyn Clock>,
        ui: UiBridge,
        hooks: Arc<dyn HookRunner>,
    ) -> Self {
        let now = clock.now();
        let schedules = BreakKind::ALL
            .into_iter()
            .map(|kind| {
                let config = configs
                    .get(&kind)
                    .cloned()
                    .unwrap_or_else(|| kind.default_config());
                (kind, BreakSchedule::new(kind, config, now))
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                schedules,
                active_hours,
                pause: PauseState::Running,
                in_flight: None,
                next_worker_id: 0,
                outside_active_hours: false,
                shut_down: false,
            })),
            clock,
            ui,
            hooks,
            history: None,
            ticker: Arc::new(Mutex::new(None)),
            tick_interval: Duration::from_secs(u64::from(TICK_SECS)),
        }
    }

    /// Records every resolved notification into `history`.
    pub fn with_history(mut self, history: Database) -> Self {
        self.history = Some(history);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn ui(&self) -> &UiBridge {
        &self.ui
    }

    pub(crate) fn hooks(&self) -> &Arc<dyn HookRunner> {
        &self.hooks
    }

    /// Spawns the 1 Hz ticker. Calling it again replaces the previous ticker.
    pub fn start(&self) {
        let mut ticker_guard = self.ticker.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let scheduler = self.clone();
        let tick_interval = self.tick_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so a fresh
            // schedule gets a full second before its first evaluation.
            interval.tick().await;
            loop {
                interval.tick().await;
                if panic::catch_unwind(AssertUnwindSafe(|| scheduler.tick())).is_err() {
                    log_error!("break scheduler tick panicked; continuing with next tick");
                }
                scheduler.ui.emit(UiEvent::Status(scheduler.snapshot()));
            }
        });

        *ticker_guard = Some(handle);
        log_info!("break scheduler started");
    }

    /// Evaluates every schedule once. At most one break starts per call.
    pub fn tick(&self) {
        let now = self.clock.now();
        let local_time = self.clock.local_time();
        let mut pending_hook: Option<HookBundle> = None;

        {
            let mut state = self.lock_state();
            if state.shut_down {
                return;
            }

            if let PauseState::Paused { until: Some(until) } = state.pause {
                if until <= now {
                    state.pause = PauseState::Running;
                    log_info!("pause expired; break scheduler resumed");
                }
            }

            if let Some(active) = state.in_flight.as_ref().map(|flight| flight.kind) {
                state.postpone_live(Some(active));
                return;
            }

            if state.pause != PauseState::Running {
                state.postpone_live(None);
                return;
            }

            if !state.active_hours.contains_time(local_time) {
                state.postpone_live(None);
                if !state.outside_active_hours {
                    state.outside_active_hours = true;
                    log_info!("outside active hours; breaks suspended");
                    pending_hook = Some(state.active_hours.hooks.clone());
                }
            } else {
                state.outside_active_hours = false;

                let due = state
                    .schedules
                    .values()
                    .find(|schedule| schedule.should_fire(now))
                    .map(BreakSchedule::kind);

                if let Some(kind) = due {
                    self.start_worker(&mut state, kind);
                }
            }
        }

        if let Some(hooks) = pending_hook {
            self.hooks.run(&hooks, HookEvent::OutsideActiveHours);
        }
    }

    fn start_worker(&self, state: &mut SchedulerState, kind: BreakKind) {
        if let Some(stale) = state.in_flight.take() {
            log_warn!("clearing stale in-flight {} before starting {}", stale.kind, kind);
            let _ = stale.cancel();
        }

        let id = state.next_worker_id;
        state.next_worker_id = state.next_worker_id.wrapping_add(1);

        let Some(schedule) = state.schedules.get_mut(&kind) else {
            return;
        };
        schedule.set_phase(BreakPhase::Notifying);
        let config = schedule.config().clone();

        let token = CancellationToken::new();
        let worker = BreakWorker::new(self.clone(), kind, id, config, token.clone());
        let handle = tokio::spawn(worker.run());

        state.in_flight = Some(InFlight {
            kind,
            id,
            token,
            handle: Some(handle),
        });
        log_info!("{} is due; notifying", kind);
    }

    /// Applies a worker's resolution and frees the in-flight slot.
    ///
    /// Ignored when the slot no longer belongs to `id` (the worker was
    /// superseded by a configuration change), so a late finish cannot clobber
    /// freshly reloaded timing.
    pub(crate) fn finish(&self, id: u64, kind: BreakKind, outcome: BreakOutcome, resolution: Resolution) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        if !state.in_flight_matches(id) {
            return;
        }
        state.in_flight = None;

        let Some(schedule) = state.schedules.get_mut(&kind) else {
            return;
        };
        schedule.set_last_outcome(outcome);
        match resolution {
            Resolution::Rearm(after) if schedule.is_live() => schedule.rearm(after, now),
            Resolution::Rearm(_) | Resolution::LeaveAsIs => schedule.set_phase(BreakPhase::Armed),
        }
    }

    /// Last-resort release for a worker that never reached `finish`.
    pub(crate) fn release(&self, id: u64, kind: BreakKind, panicked: bool) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        if !state.in_flight_matches(id) {
            return;
        }
        state.in_flight = None;

        if let Some(schedule) = state.schedules.get_mut(&kind) {
            if panicked && schedule.is_live() {
                // Avoid re-firing a crashing worker every second.
                let work = schedule.config().work;
                schedule.rearm(work, now);
            } else {
                schedule.set_phase(BreakPhase::Armed);
            }
        }
    }

    pub(crate) fn set_phase(&self, id: u64, kind: BreakKind, phase: BreakPhase) {
        let mut state = self.lock_state();
        if !state.in_flight_matches(id) {
            return;
        }
        if let Some(schedule) = state.schedules.get_mut(&kind) {
            schedule.set_phase(phase);
        }
    }

    pub(crate) fn record(&self, event: BreakEvent) {
        let Some(history) = self.history.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = history.insert_break_event(&event).await {
                log_error!("failed to record {} outcome: {err:?}", event.kind);
            }
        });
    }

    pub fn set_enabled(&self, kind: BreakKind, enabled: bool) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        let Some(schedule) = state.schedules.get_mut(&kind) else {
            return;
        };

        if enabled {
            if !schedule.is_live() {
                let mut config = schedule.config().clone();
                config.enabled = true;
                schedule.reload(config, now);
                log_info!("{} enabled; next at {}", kind, schedule.next_fire());
            }
        } else {
            schedule.disable();
            log_info!("{} disabled", kind);
        }
    }

    /// Replaces a category's settings and restarts its timing. A showing
    /// notification for that category is cancelled first.
    pub fn update_schedule(&self, kind: BreakKind, config: BreakConfig) -> Result<(), ConfigError> {
        config.validate(kind)?;

        let now = self.clock.now();
        let mut state = self.lock_state();
        if state.in_flight.as_ref().is_some_and(|flight| flight.kind == kind) {
            if let Some(flight) = state.in_flight.take() {
                log_info!("cancelling in-flight {} for configuration change", kind);
                let _ = flight.cancel();
            }
        }

        if let Some(schedule) = state.schedules.get_mut(&kind) {
            schedule.reload(config, now);
        }
        Ok(())
    }

    pub fn set_active_hours(&self, active_hours: ActiveHours) -> Result<(), ConfigError> {
        active_hours.validate()?;
        let mut state = self.lock_state();
        state.active_hours = active_hours;
        state.outside_active_hours = false;
        Ok(())
    }

    /// Stops new breaks from starting; a break already in flight continues.
    /// With `duration`, the scheduler resumes by itself once it elapses.
    pub fn pause(&self, duration: Option<TimeSpan>) {
        let until = duration.map(|span| self.clock.now() + span.as_chrono());
        self.lock_state().pause = PauseState::Paused { until };
        match until {
            Some(until) => log_info!("break scheduler paused until {until}"),
            None => log_info!("break scheduler paused"),
        }
    }

    pub fn resume(&self) {
        self.lock_state().pause = PauseState::Running;
        log_info!("break scheduler resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.lock_state().pause != PauseState::Running
    }

    /// Makes `kind` due so the next tick notifies for it.
    pub fn take_break_now(&self, kind: BreakKind) {
        let now = self.clock.now();
        if let Some(schedule) = self.lock_state().schedules.get_mut(&kind) {
            schedule.make_due(now);
        }
    }

    pub fn in_flight(&self) -> Option<BreakKind> {
        self.lock_state().in_flight.as_ref().map(|flight| flight.kind)
    }

    pub fn schedule(&self, kind: BreakKind) -> Option<ScheduleSnapshot> {
        let now = self.clock.now();
        self.lock_state()
            .schedules
            .get(&kind)
            .map(|schedule| schedule.snapshot(now))
    }

    pub fn snapshot(&self) -> Vec<ScheduleSnapshot> {
        let now = self.clock.now();
        self.lock_state()
            .schedules
            .values()
            .map(|schedule| schedule.snapshot(now))
            .collect()
    }

    /// Stops the ticker, cancels any in-flight break and waits for it to
    /// wind down. The scheduler does nothing afterwards.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.ticker.lock().unwrap_or_else(|p| p.into_inner()).take() {
            handle.abort();
        }

        let worker = {
            let mut state = self.lock_state();
            state.shut_down = true;
            for schedule in state.schedules.values_mut() {
                schedule.cancel();
            }
            state.in_flight.take().and_then(InFlight::cancel)
        };

        if let Some(handle) = worker {
            if let Err(err) = handle.await {
                log_warn!("break worker ended abnormally during shutdown: {err}");
            }
        }
        log_info!("break scheduler stopped");
    }
}
