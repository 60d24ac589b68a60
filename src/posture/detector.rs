use anyhow::Result;

use crate::models::{calibration, FaceBox};

use super::camera::Frame;

/// Face-finding capability the posture loop is built on. Detection itself
/// lives outside this crate.
pub trait FaceDetector: Send + Sync {
    /// Every face bounding box found in `frame`, in frame pixels.
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceBox>>;

    /// Distance in centimetres for a face of `face_height_px`, given the
    /// calibrated focal length.
    fn estimate_distance(&self, focal_length: f64, face_height_px: f64) -> Option<f64> {
        calibration::estimate_distance(focal_length, face_height_px)
    }
}
