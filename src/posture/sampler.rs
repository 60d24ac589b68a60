use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    hooks::{HookBundle, HookEvent, HookRunner},
    models::{FaceBox, MarginPercents, MarginThresholds, PostureState},
    settings::{PostureSettings, CAPTURE_ATTEMPTS},
};

use super::{
    camera::{capture_with_retry, Frame},
    detector::FaceDetector,
    manager::SharedCamera,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub type PostureCallback = Arc<dyn Fn(&PostureState) + Send + Sync>;

/// What one sample did to the loop state.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    NoFace { streak: u32 },
    /// The no-face streak reached its threshold; the hook ran and the streak
    /// started over.
    UserGone,
    MultipleFaces { count: usize, streak: u32 },
    Ambiguous,
    Accepted { state: PostureState, reported: bool },
}

/// Debounce and verdict state for one sampling loop.
pub struct PostureSampler {
    margins: MarginPercents,
    thresholds: Option<MarginThresholds>,
    min_distance_cm: f64,
    focal_length: Option<f64>,
    callback_every: u32,
    no_face_threshold: u32,
    multi_face_threshold: u32,
    no_face_streak: u32,
    multi_face_streak: u32,
    accepted: u64,
    hook_bundle: HookBundle,
    detector: Arc<dyn FaceDetector>,
    hooks: Arc<dyn HookRunner>,
    callback: PostureCallback,
}

impl PostureSampler {
    pub fn new(
        settings: &PostureSettings,
        detector: Arc<dyn FaceDetector>,
        hooks: Arc<dyn HookRunner>,
        callback: PostureCallback,
    ) -> Self {
        Self {
            margins: settings.margins,
            thresholds: None,
            min_distance_cm: settings.min_distance_cm,
            focal_length: settings.focal_length(),
            callback_every: settings.callback_every.max(1),
            no_face_threshold: settings.no_face_threshold.max(1),
            multi_face_threshold: settings.multi_face_threshold.max(1),
            no_face_streak: 0,
            multi_face_streak: 0,
            accepted: 0,
            hook_bundle: settings.hooks.clone(),
            detector,
            hooks,
            callback,
        }
    }

    pub fn no_face_streak(&self) -> u32 {
        self.no_face_streak
    }

    pub fn multi_face_streak(&self) -> u32 {
        self.multi_face_streak
    }

    pub fn thresholds(&self) -> Option<MarginThresholds> {
        self.thresholds
    }

    /// Recomputes margin lines unless they already match this frame size.
    pub fn set_frame_size(&mut self, width: u32, height: u32) {
        if self
            .thresholds
            .is_some_and(|current| current.matches_frame(width, height))
        {
            return;
        }
        log_info!("margin thresholds computed for {width}x{height} frames");
        self.thresholds = Some(MarginThresholds::compute(width, height, &self.margins));
    }

    pub fn set_margins(&mut self, margins: MarginPercents) {
        self.margins = margins;
        if let Some(current) = self.thresholds {
            self.thresholds = Some(MarginThresholds::compute(
                current.frame_width,
                current.frame_height,
                &margins,
            ));
        }
    }

    pub fn set_focal_length(&mut self, focal_length: Option<f64>) {
        self.focal_length = focal_length;
    }

    /// Detects faces in `frame` and folds the result into the loop state.
    pub fn sample(&mut self, frame: &Frame) -> Result<SampleOutcome> {
        let faces = self.detector.detect(frame)?;
        Ok(self.process(&faces, frame.width(), frame.height()))
    }

    pub fn process(&mut self, faces: &[FaceBox], frame_width: u32, frame_height: u32) -> SampleOutcome {
        match faces {
            [] => {
                self.no_face_streak += 1;
                if self.no_face_streak >= self.no_face_threshold {
                    log_info!("no face for {} samples; user gone", self.no_face_streak);
                    self.no_face_streak = 0;
                    self.hooks.run(&self.hook_bundle, HookEvent::UserGone);
                    return SampleOutcome::UserGone;
                }
                SampleOutcome::NoFace {
                    streak: self.no_face_streak,
                }
            }
            [face] => self.accept(face, frame_width, frame_height),
            many => {
                self.multi_face_streak += 1;
                if self.multi_face_streak >= self.multi_face_threshold {
                    log_warn!("{} faces for {} samples", many.len(), self.multi_face_streak);
                    self.multi_face_streak = 0;
                    self.hooks
                        .run(&self.hook_bundle, HookEvent::AmbiguousDetection);
                    return SampleOutcome::Ambiguous;
                }
                SampleOutcome::MultipleFaces {
                    count: many.len(),
                    streak: self.multi_face_streak,
                }
            }
        }
    }

    fn accept(&mut self, face: &FaceBox, frame_width: u32, frame_height: u32) -> SampleOutcome {
        self.no_face_streak = 0;
        self.multi_face_streak = 0;
        self.set_frame_size(frame_width, frame_height);

        let thresholds = match self.thresholds {
            Some(thresholds) => thresholds,
            None => MarginThresholds::compute(frame_width, frame_height, &self.margins),
        };
        let distance_cm = self.focal_length.and_then(|focal| {
            self.detector
                .estimate_distance(focal, f64::from(face.height))
        });
        let state = PostureState::evaluate(face, &thresholds, distance_cm, self.min_distance_cm);

        self.accepted += 1;
        let reported = state.is_ok() || self.accepted % u64::from(self.callback_every) == 0;
        if reported {
            (self.callback)(&state);
        }
        SampleOutcome::Accepted { state, reported }
    }
}

/// Samples on `interval` until `cancel_token` fires. Each cycle runs on the
/// blocking pool: the frame is read under the camera lock, which is released
/// before detection.
pub(crate) async fn sampling_loop(
    sampler: Arc<Mutex<PostureSampler>>,
    camera: SharedCamera,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("posture loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let sampler = sampler.clone();
                let camera = camera.clone();
                let token = cancel_token.clone();
                let cycle = tokio::task::spawn_blocking(move || sample_once(&sampler, &camera, &token));

                match cycle.await {
                    Ok(Ok(outcome)) => log_debug!("posture sample: {outcome:?}"),
                    Ok(Err(err)) => log_warn!("posture sample skipped: {err:#}"),
                    Err(err) => log_error!("posture sample task failed: {err}"),
                }
            }
        }
    }
}

fn sample_once(
    sampler: &Mutex<PostureSampler>,
    camera: &SharedCamera,
    token: &CancellationToken,
) -> Result<SampleOutcome> {
    let frame = {
        let mut camera = camera.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        capture_with_retry(camera.as_mut(), CAPTURE_ATTEMPTS, token)?
    };
    let mut sampler = sampler.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    sampler.sample(&frame)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::models::{calibration, CalibrationMeasurement};

    use super::*;

    const W: u32 = 640;
    const H: u32 = 480;

    struct NoDetector;

    impl FaceDetector for NoDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<FaceBox>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<HookEvent>>,
    }

    impl HookRunner for RecordingHooks {
        fn run(&self, _bundle: &HookBundle, event: HookEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct Harness {
        sampler: PostureSampler,
        hooks: Arc<RecordingHooks>,
        reports: Arc<AtomicUsize>,
    }

    fn harness(settings: PostureSettings) -> Harness {
        let hooks = Arc::new(RecordingHooks::default());
        let reports = Arc::new(AtomicUsize::new(0));
        let counter = reports.clone();
        let sampler = PostureSampler::new(
            &settings,
            Arc::new(NoDetector),
            hooks.clone(),
            Arc::new(move |_state: &PostureState| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        Harness {
            sampler,
            hooks,
            reports,
        }
    }

    fn centered() -> FaceBox {
        FaceBox::new(220, 140, 200, 200)
    }

    fn off_left() -> FaceBox {
        FaceBox::new(5, 140, 200, 200)
    }

    fn hook_count(harness: &Harness, event: HookEvent) -> usize {
        harness
            .hooks
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|recorded| **recorded == event)
            .count()
    }

    #[test]
    fn twenty_misses_fire_user_gone_exactly_once() {
        let mut h = harness(PostureSettings::default());
        for expected in 1..20 {
            assert_eq!(
                h.sampler.process(&[], W, H),
                SampleOutcome::NoFace { streak: expected }
            );
        }
        assert_eq!(h.sampler.process(&[], W, H), SampleOutcome::UserGone);
        assert_eq!(h.sampler.no_face_streak(), 0);
        assert_eq!(hook_count(&h, HookEvent::UserGone), 1);
        assert_eq!(h.reports.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn one_face_on_the_nineteenth_sample_resets_the_streak() {
        let mut h = harness(PostureSettings::default());
        for _ in 0..18 {
            h.sampler.process(&[], W, H);
        }
        assert!(matches!(
            h.sampler.process(&[centered()], W, H),
            SampleOutcome::Accepted { .. }
        ));
        assert_eq!(h.sampler.no_face_streak(), 0);

        for _ in 0..19 {
            h.sampler.process(&[], W, H);
        }
        assert_eq!(hook_count(&h, HookEvent::UserGone), 0);
    }

    #[test]
    fn multiple_faces_fire_ambiguous_at_their_own_threshold() {
        let mut h = harness(PostureSettings::default());
        let crowd = [centered(), off_left()];
        for expected in 1..5 {
            assert_eq!(
                h.sampler.process(&crowd, W, H),
                SampleOutcome::MultipleFaces {
                    count: 2,
                    streak: expected
                }
            );
        }
        assert_eq!(h.sampler.process(&crowd, W, H), SampleOutcome::Ambiguous);
        assert_eq!(h.sampler.multi_face_streak(), 0);
        assert_eq!(hook_count(&h, HookEvent::AmbiguousDetection), 1);
        assert_eq!(hook_count(&h, HookEvent::UserGone), 0);
    }

    #[test]
    fn a_clean_detection_clears_both_streaks() {
        let mut h = harness(PostureSettings::default());
        h.sampler.process(&[], W, H);
        h.sampler.process(&[centered(), off_left()], W, H);
        h.sampler.process(&[centered()], W, H);
        assert_eq!(h.sampler.no_face_streak(), 0);
        assert_eq!(h.sampler.multi_face_streak(), 0);
    }

    #[test]
    fn uncalibrated_distance_is_none() {
        let mut h = harness(PostureSettings::default());
        match h.sampler.process(&[centered()], W, H) {
            SampleOutcome::Accepted { state, .. } => {
                assert_eq!(state.distance_cm, None);
                assert!(!state.too_close);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn calibrated_distance_uses_mean_focal_length() {
        let settings = PostureSettings {
            calibrations: vec![
                CalibrationMeasurement::from_detection(60.0, 200.0, chrono::Utc::now()).unwrap(),
                CalibrationMeasurement::from_detection(60.0, 200.0, chrono::Utc::now()).unwrap(),
            ],
            ..PostureSettings::default()
        };
        let mut h = harness(settings);
        match h.sampler.process(&[centered()], W, H) {
            SampleOutcome::Accepted { state, .. } => {
                let expected = calibration::estimate_distance(750.0, 200.0).unwrap();
                assert_eq!(state.distance_cm, Some(expected));
                assert!((expected - 60.0).abs() < 1e-9);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn bad_posture_is_reported_every_nth_sample_good_posture_always() {
        let mut h = harness(PostureSettings::default());
        let reported: Vec<bool> = (0..4)
            .map(|_| match h.sampler.process(&[off_left()], W, H) {
                SampleOutcome::Accepted { state, reported } => {
                    assert!(state.margins.left);
                    reported
                }
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert_eq!(reported, vec![false, true, false, true]);

        assert!(matches!(
            h.sampler.process(&[centered()], W, H),
            SampleOutcome::Accepted { reported: true, .. }
        ));
        assert_eq!(h.reports.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn thresholds_follow_frame_size_and_margins() {
        let mut h = harness(PostureSettings::default());
        h.sampler.process(&[centered()], W, H);
        assert_eq!(h.sampler.thresholds().unwrap().left_x, 64.0);

        h.sampler.process(&[centered()], 1280, 720);
        let resized = h.sampler.thresholds().unwrap();
        assert!(resized.matches_frame(1280, 720));
        assert_eq!(resized.left_x, 128.0);

        h.sampler.set_margins(MarginPercents {
            left: 20.0,
            ..MarginPercents::default()
        });
        assert_eq!(h.sampler.thresholds().unwrap().left_x, 256.0);
    }

    #[test]
    fn streaks_are_per_instance() {
        let mut first = harness(PostureSettings::default());
        let second = harness(PostureSettings::default());
        first.sampler.process(&[], W, H);
        assert_eq!(first.sampler.no_face_streak(), 1);
        assert_eq!(second.sampler.no_face_streak(), 0);
    }
}
