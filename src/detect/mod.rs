//! Object detectors and their results.

mod backend;
mod backends;
mod result;

pub use backend::Detector;
pub use backends::SceneChangeDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use result::{non_maximum_suppression, BoundingBox, Detection, InferenceResult};
