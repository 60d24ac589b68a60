use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{error, info};
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ConfigError,
    hooks::HookRunner,
    models::{CalibrationMeasurement, PostureState},
    settings::{PostureSettings, CAPTURE_ATTEMPTS},
    ui::{UiBridge, UiEvent},
};

use super::{
    camera::{capture_with_retry, Camera, Frame},
    detector::FaceDetector,
    sampler::{sampling_loop, PostureCallback, PostureSampler},
};

/// The one camera handle. Every open, close and read goes through this lock.
pub type SharedCamera = Arc<Mutex<Box<dyn Camera>>>;

struct ActiveLoop {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
    sampler: Arc<Mutex<PostureSampler>>,
}

/// Owns the camera and at most one sampling loop over it.
pub struct PostureLoopManager {
    camera: SharedCamera,
    detector: Arc<dyn FaceDetector>,
    hooks: Arc<dyn HookRunner>,
    ui: UiBridge,
    callback: PostureCallback,
    active: tokio::sync::Mutex<Option<ActiveLoop>>,
}

impl PostureLoopManager {
    /// Accepted samples are pushed to `ui` as `UiEvent::Posture` unless
    /// another callback is installed with [`Self::with_callback`].
    pub fn new(
        camera: Box<dyn Camera>,
        detector: Arc<dyn FaceDetector>,
        hooks: Arc<dyn HookRunner>,
        ui: UiBridge,
    ) -> Self {
        let bridge = ui.clone();
        Self {
            camera: Arc::new(Mutex::new(camera)),
            detector,
            hooks,
            ui,
            callback: Arc::new(move |state: &PostureState| bridge.emit(UiEvent::Posture(*state))),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_callback(mut self, callback: PostureCallback) -> Self {
        self.callback = callback;
        self
    }

    /// Opens the camera and starts sampling. Does nothing while a loop is
    /// already running. A camera that cannot deliver a frame is reported to
    /// the UI once and leaves nothing running or open.
    pub async fn start(&self, settings: &PostureSettings) -> Result<()> {
        let mut active = self.active.lock().await;
        if active
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
        {
            info!("posture loop already running");
            return Ok(());
        }
        settings.validate()?;

        let camera = self.camera.clone();
        let probe = tokio::task::spawn_blocking(move || open_and_probe(&camera))
            .await
            .context("camera probe task failed")?;
        let (width, height) = match probe {
            Ok(size) => size,
            Err(err) => {
                error!("posture loop not started: {err:#}");
                self.ui.emit(UiEvent::DeviceError {
                    message: format!("{err:#}"),
                });
                return Err(err);
            }
        };

        let mut sampler = PostureSampler::new(
            settings,
            self.detector.clone(),
            self.hooks.clone(),
            self.callback.clone(),
        );
        sampler.set_frame_size(width, height);
        let sampler = Arc::new(Mutex::new(sampler));

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sampling_loop(
            sampler.clone(),
            self.camera.clone(),
            Duration::from_millis(settings.sampling_interval_ms),
            cancel_token.clone(),
        ));

        info!(
            "posture loop started ({width}x{height}, every {} ms)",
            settings.sampling_interval_ms
        );
        *active = Some(ActiveLoop {
            handle,
            cancel_token,
            sampler,
        });
        Ok(())
    }

    /// Stops sampling. The camera stays open unless `close_camera` is set,
    /// so a quick restart does not pay for reopening it.
    pub async fn stop(&self, close_camera: bool) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.take() {
            current.cancel_token.cancel();
            if let Err(err) = current.handle.await {
                error!("posture loop task failed to join: {err}");
            }
            info!("posture loop stopped");
        }

        if close_camera {
            let camera = self.camera.clone();
            tokio::task::spawn_blocking(move || lock_camera(&camera).close())
                .await
                .context("camera close task failed")?;
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
    }

    pub fn is_camera_open(&self) -> bool {
        lock_camera(&self.camera).is_open()
    }

    /// Applies new margins and calibration to a running loop. Cadence and
    /// thresholds take effect on the next `start`.
    pub async fn apply_settings(&self, settings: &PostureSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        if let Some(current) = self.active.lock().await.as_ref() {
            let mut sampler = current
                .sampler
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            sampler.set_margins(settings.margins);
            sampler.set_focal_length(settings.focal_length());
        }
        Ok(())
    }

    /// One frame for a live preview. Only available while the camera is open.
    pub async fn capture_preview(&self) -> Result<Frame> {
        let camera = self.camera.clone();
        tokio::task::spawn_blocking(move || {
            let mut camera = lock_camera(&camera);
            if !camera.is_open() {
                bail!("camera is not open");
            }
            capture_with_retry(camera.as_mut(), CAPTURE_ATTEMPTS, &CancellationToken::new())
        })
        .await
        .context("preview task failed")?
    }

    /// Measures the focal length for a face held `known_distance_cm` from
    /// the camera. Opens the camera for the capture if nothing else has.
    pub async fn calibrate(&self, known_distance_cm: f64) -> Result<CalibrationMeasurement> {
        let camera = self.camera.clone();
        let frame = tokio::task::spawn_blocking(move || {
            let mut camera = lock_camera(&camera);
            let opened_here = !camera.is_open();
            if opened_here {
                camera.open().context("failed to open camera")?;
            }
            let frame = capture_with_retry(camera.as_mut(), CAPTURE_ATTEMPTS, &CancellationToken::new());
            if opened_here {
                camera.close();
            }
            frame
        })
        .await
        .context("calibration capture task failed")??;

        let detector = self.detector.clone();
        let faces = tokio::task::spawn_blocking(move || detector.detect(&frame))
            .await
            .context("calibration detection task failed")??;

        let face = match faces.as_slice() {
            [face] => *face,
            [] => bail!("no face found for calibration"),
            many => bail!("{} faces found; calibration needs exactly one", many.len()),
        };
        let measurement =
            CalibrationMeasurement::from_detection(known_distance_cm, f64::from(face.height), Utc::now())?;
        info!(
            "calibrated at {known_distance_cm} cm: focal length {:.1}",
            measurement.focal_length
        );
        Ok(measurement)
    }
}

fn lock_camera(camera: &SharedCamera) -> std::sync::MutexGuard<'_, Box<dyn Camera>> {
    camera.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Opens the camera if needed and reads one frame to learn its size.
/// Leaves the camera closed on failure.
fn open_and_probe(camera: &SharedCamera) -> Result<(u32, u32)> {
    let mut camera = lock_camera(camera);
    if !camera.is_open() {
        if let Err(err) = camera.open() {
            camera.close();
            return Err(err.context("failed to open camera"));
        }
    }
    match capture_with_retry(camera.as_mut(), CAPTURE_ATTEMPTS, &CancellationToken::new()) {
        Ok(frame) => Ok(frame.dimensions()),
        Err(err) => {
            camera.close();
            Err(err.context("camera produced no frame"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use image::RgbImage;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::{
        hooks::{HookBundle, HookEvent},
        models::{FaceBox, PostureState},
    };

    use super::*;

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
        reads: AtomicUsize,
        fail_reads: AtomicBool,
    }

    struct FakeCamera {
        open: bool,
        fail_open: bool,
        counters: Arc<Counters>,
    }

    impl Camera for FakeCamera {
        fn open(&mut self) -> Result<()> {
            if self.fail_open {
                bail!("device busy");
            }
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            if self.open {
                self.counters.closes.fetch_add(1, Ordering::SeqCst);
            }
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn read(&mut self) -> Result<Frame> {
            if !self.open {
                bail!("camera is not open");
            }
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            if self.counters.fail_reads.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(5));
                bail!("read timeout");
            }
            Ok(RgbImage::new(640, 480))
        }
    }

    struct FixedDetector {
        faces: Vec<FaceBox>,
    }

    impl FaceDetector for FixedDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<FaceBox>> {
            Ok(self.faces.clone())
        }
    }

    struct NoHooks;

    impl HookRunner for NoHooks {
        fn run(&self, _bundle: &HookBundle, _event: HookEvent) {}
    }

    fn fixture(
        fail_open: bool,
        faces: Vec<FaceBox>,
    ) -> (PostureLoopManager, Arc<Counters>, UnboundedReceiver<UiEvent>) {
        let counters = Arc::new(Counters::default());
        let (ui, rx) = UiBridge::new();
        let manager = PostureLoopManager::new(
            Box::new(FakeCamera {
                open: false,
                fail_open,
                counters: counters.clone(),
            }),
            Arc::new(FixedDetector { faces }),
            Arc::new(NoHooks),
            ui,
        );
        (manager, counters, rx)
    }

    fn fast() -> PostureSettings {
        PostureSettings {
            sampling_interval_ms: 100,
            ..PostureSettings::default()
        }
    }

    fn centered() -> FaceBox {
        FaceBox::new(220, 140, 200, 200)
    }

    #[tokio::test]
    async fn double_start_opens_once_and_runs_one_loop() {
        let (manager, counters, _rx) = fixture(false, vec![centered()]);
        manager.start(&fast()).await.unwrap();
        manager.start(&fast()).await.unwrap();

        assert!(manager.is_running().await);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        manager.stop(true).await.unwrap();
        assert!(!manager.is_running().await);
        assert!(!manager.is_camera_open());
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_without_close_keeps_the_camera_for_a_restart() {
        let (manager, counters, _rx) = fixture(false, vec![centered()]);
        manager.start(&fast()).await.unwrap();
        manager.stop(false).await.unwrap();
        assert!(manager.is_camera_open());

        manager.start(&fast()).await.unwrap();
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        manager.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn open_failure_is_reported_once_and_nothing_runs() {
        let (manager, counters, mut rx) = fixture(true, vec![centered()]);
        assert!(manager.start(&fast()).await.is_err());

        assert!(!manager.is_running().await);
        assert!(!manager.is_camera_open());
        assert_eq!(counters.reads.load(Ordering::SeqCst), 0);
        assert!(matches!(rx.try_recv(), Ok(UiEvent::DeviceError { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unreadable_camera_is_closed_again() {
        let (manager, counters, mut rx) = fixture(false, vec![centered()]);
        counters.fail_reads.store(true, Ordering::SeqCst);

        assert!(manager.start(&fast()).await.is_err());
        assert_eq!(counters.reads.load(Ordering::SeqCst), CAPTURE_ATTEMPTS as usize);
        assert!(!manager.is_camera_open());
        assert!(matches!(rx.try_recv(), Ok(UiEvent::DeviceError { .. })));
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_before_the_camera_opens() {
        let (manager, counters, _rx) = fixture(false, vec![centered()]);
        let settings = PostureSettings {
            sampling_interval_ms: 0,
            ..PostureSettings::default()
        };
        assert!(manager.start(&settings).await.is_err());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn running_loop_pushes_posture_to_the_ui() {
        let (manager, _counters, mut rx) = fixture(false, vec![centered()]);
        manager.start(&fast()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            UiEvent::Posture(state) => assert!(state.is_ok()),
            other => panic!("unexpected event {other:?}"),
        }
        manager.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn custom_callback_replaces_the_ui_push() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let (manager, _counters, mut rx) = fixture(false, vec![centered()]);
        let manager = manager.with_callback(Arc::new(move |_state: &PostureState| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        manager.start(&fast()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        manager.stop(true).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_returns_while_captures_keep_failing() {
        let (manager, counters, _rx) = fixture(false, vec![centered()]);
        manager.start(&fast()).await.unwrap();
        counters.fail_reads.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;

        tokio::time::timeout(Duration::from_secs(2), manager.stop(true))
            .await
            .unwrap()
            .unwrap();
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn preview_requires_an_open_camera() {
        let (manager, _counters, _rx) = fixture(false, vec![centered()]);
        assert!(manager.capture_preview().await.is_err());

        manager.start(&fast()).await.unwrap();
        let frame = manager.capture_preview().await.unwrap();
        assert_eq!(frame.dimensions(), (640, 480));
        manager.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn calibration_needs_exactly_one_face() {
        let (manager, counters, _rx) = fixture(false, vec![centered()]);
        let measurement = manager.calibrate(60.0).await.unwrap();
        assert_eq!(measurement.focal_length, 750.0);
        assert!(!manager.is_camera_open());
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

        let (crowded, _counters, _rx) = fixture(false, vec![centered(), centered()]);
        assert!(crowded.calibrate(60.0).await.is_err());

        let (empty, _counters, _rx) = fixture(false, Vec::new());
        assert!(empty.calibrate(60.0).await.is_err());
    }

    #[tokio::test]
    async fn applying_settings_updates_the_running_sampler() {
        let (manager, _counters, _rx) = fixture(false, vec![centered()]);
        manager.start(&fast()).await.unwrap();

        let mut settings = fast();
        settings.margins.left = 40.0;
        manager.apply_settings(&settings).await.unwrap();
        {
            let active = manager.active.lock().await;
            let sampler = active.as_ref().unwrap().sampler.lock().unwrap();
            assert_eq!(sampler.thresholds().unwrap().left_x, 256.0);
        }

        settings.margins.left = 90.0;
        assert!(manager.apply_settings(&settings).await.is_err());
        manager.stop(true).await.unwrap();
    }
}
