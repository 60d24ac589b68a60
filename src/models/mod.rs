pub mod break_config;
pub mod calibration;
pub mod posture;
pub mod time_span;

pub use break_config::{ActiveHours, BreakConfig, BreakKind};
pub use calibration::CalibrationMeasurement;
pub use posture::{FaceBox, MarginPercents, MarginThresholds, MarginViolations, PostureState};
pub use time_span::TimeSpan;
