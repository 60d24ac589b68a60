use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use tokio_util::sync::CancellationToken;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub type Frame = RgbImage;

/// A frame source. Implementations may block; callers keep them off the
/// async executor.
pub trait Camera: Send {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn read(&mut self) -> Result<Frame>;
}

/// Reads one frame, retrying up to `attempts` times. Stops early once
/// `token` is cancelled.
pub fn capture_with_retry(
    camera: &mut dyn Camera,
    attempts: u32,
    token: &CancellationToken,
) -> Result<Frame> {
    let mut last_err = anyhow!("no capture attempted");
    for attempt in 1..=attempts.max(1) {
        if token.is_cancelled() {
            bail!("capture cancelled");
        }
        match camera.read() {
            Ok(frame) => return Ok(frame),
            Err(err) => {
                log_warn!("frame capture attempt {attempt}/{attempts} failed: {err:#}");
                last_err = err;
            }
        }
    }
    Err(last_err.context(format!("no frame after {} attempts", attempts.max(1))))
}

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// Plays back the images of a directory in name order, looping forever.
/// Lets the posture loop run against recorded frames instead of a webcam.
pub struct ReplayCamera {
    dir: PathBuf,
    frames: Vec<PathBuf>,
    cursor: usize,
}

impl ReplayCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frames: Vec::new(),
            cursor: 0,
        }
    }

    fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}

impl Camera for ReplayCamera {
    fn open(&mut self) -> Result<()> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to open frame directory {}", self.dir.display()))?;

        let mut frames = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && Self::is_image(&path) {
                frames.push(path);
            }
        }
        if frames.is_empty() {
            bail!("no image frames in {}", self.dir.display());
        }
        frames.sort();

        self.frames = frames;
        self.cursor = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.frames.clear();
        self.cursor = 0;
    }

    fn is_open(&self) -> bool {
        !self.frames.is_empty()
    }

    fn read(&mut self) -> Result<Frame> {
        if self.frames.is_empty() {
            bail!("camera is not open");
        }
        let path = &self.frames[self.cursor];
        self.cursor = (self.cursor + 1) % self.frames.len();

        let image = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?;
        Ok(image.to_rgb8())
    }
}
