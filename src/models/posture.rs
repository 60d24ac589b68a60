use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest margin allowed on any single side, in percent of the frame.
pub const MAX_MARGIN_PERCENT: f64 = 45.0;

/// Face bounding box in frame pixels, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }
}

/// How far in from each frame edge the face must stay, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginPercents {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Default for MarginPercents {
    fn default() -> Self {
        Self {
            left: 10.0,
            right: 10.0,
            top: 5.0,
            bottom: 5.0,
        }
    }
}

impl MarginPercents {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("left", self.left),
            ("right", self.right),
            ("top", self.top),
            ("bottom", self.bottom),
        ] {
            if !(0.0..=MAX_MARGIN_PERCENT).contains(&value) {
                return Err(ConfigError::MarginOutOfRange {
                    field,
                    value,
                    max: MAX_MARGIN_PERCENT,
                });
            }
        }
        Ok(())
    }
}

/// Margin lines resolved against a concrete frame size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginThresholds {
    pub frame_width: u32,
    pub frame_height: u32,
    pub left_x: f64,
    pub right_x: f64,
    pub top_y: f64,
    pub bottom_y: f64,
}

impl MarginThresholds {
    pub fn compute(frame_width: u32, frame_height: u32, margins: &MarginPercents) -> Self {
        let width = f64::from(frame_width);
        let height = f64::from(frame_height);
        Self {
            frame_width,
            frame_height,
            left_x: width * margins.left / 100.0,
            right_x: width - width * margins.right / 100.0,
            top_y: height * margins.top / 100.0,
            bottom_y: height - height * margins.bottom / 100.0,
        }
    }

    pub fn matches_frame(&self, frame_width: u32, frame_height: u32) -> bool {
        self.frame_width == frame_width && self.frame_height == frame_height
    }

    pub fn violations(&self, face: &FaceBox) -> MarginViolations {
        MarginViolations {
            left: f64::from(face.x) < self.left_x,
            right: f64::from(face.right()) > self.right_x,
            top: f64::from(face.y) < self.top_y,
            bottom: f64::from(face.bottom()) > self.bottom_y,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginViolations {
    pub left: bool,
    pub right: bool,
    pub top: bool,
    pub bottom: bool,
}

impl MarginViolations {
    pub fn any(&self) -> bool {
        self.left || self.right || self.top || self.bottom
    }
}

/// Verdict for one accepted posture sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostureState {
    /// Estimated distance to the camera; `None` while uncalibrated.
    pub distance_cm: Option<f64>,
    pub too_close: bool,
    pub margins: MarginViolations,
}

impl PostureState {
    pub fn evaluate(
        face: &FaceBox,
        thresholds: &MarginThresholds,
        distance_cm: Option<f64>,
        min_distance_cm: f64,
    ) -> Self {
        Self {
            distance_cm,
            too_close: distance_cm.is_some_and(|distance| distance < min_distance_cm),
            margins: thresholds.violations(face),
        }
    }

    pub fn is_ok(&self) -> bool {
        !self.too_close && !self.margins.any()
    }
}
