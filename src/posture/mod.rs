pub mod camera;
pub mod detector;
pub mod manager;
pub mod sampler;

pub use camera::{capture_with_retry, Camera, Frame, ReplayCamera};
pub use detector::FaceDetector;
pub use manager::{PostureLoopManager, SharedCamera};
pub use sampler::{PostureCallback, PostureSampler, SampleOutcome};
