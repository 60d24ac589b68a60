//! Pinhole-camera distance estimation.
//!
//! A calibration run records the focal length that makes a face of the
//! detected pixel height sit at a known distance. At runtime the mean of all
//! recorded focal lengths turns a detected face height back into a distance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Nominal height of a detector face box, in centimetres. It cancels out
/// between calibration and estimation, so it only has to be consistent.
pub const REFERENCE_FACE_HEIGHT_CM: f64 = 16.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationMeasurement {
    pub distance_cm: f64,
    pub focal_length: f64,
    pub recorded_at: DateTime<Utc>,
}

impl CalibrationMeasurement {
    pub fn from_detection(
        known_distance_cm: f64,
        face_height_px: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            distance_cm: known_distance_cm,
            focal_length: ideal_focal_length(known_distance_cm, face_height_px)?,
            recorded_at,
        })
    }
}

pub fn ideal_focal_length(known_distance_cm: f64, face_height_px: f64) -> Result<f64, ConfigError> {
    if !(known_distance_cm.is_finite() && known_distance_cm > 0.0) {
        return Err(ConfigError::NonPositive("calibration distance"));
    }
    if !(face_height_px.is_finite() && face_height_px > 0.0) {
        return Err(ConfigError::NonPositive("face height"));
    }
    Ok(face_height_px * known_distance_cm / REFERENCE_FACE_HEIGHT_CM)
}

/// Distance in centimetres, or `None` for a degenerate face height.
pub fn estimate_distance(focal_length: f64, face_height_px: f64) -> Option<f64> {
    if face_height_px <= 0.0 || !focal_length.is_finite() {
        return None;
    }
    Some(REFERENCE_FACE_HEIGHT_CM * focal_length / face_height_px)
}

/// Arithmetic mean of all stored focal lengths; `None` means uncalibrated.
pub fn mean_focal_length(measurements: &[CalibrationMeasurement]) -> Option<f64> {
    if measurements.is_empty() {
        return None;
    }
    let sum: f64 = measurements.iter().map(|m| m.focal_length).sum();
    Some(sum / measurements.len() as f64)
}
