use anyhow::Result;

use crate::detect::result::InferenceResult;
use crate::frame::Frame;

/// Object detector trait.
///
/// Detectors are moved onto the session worker thread when a session starts,
/// so they must be `Send`. `infer` may block for the duration of a model run;
/// that blocking is confined to the worker.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Implementations may drop detections below `confidence_threshold`, but
    /// callers filter again and must not rely on it.
    fn infer(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<InferenceResult>;

    /// Optional warm-up hook, run synchronously by `SessionController::start`.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<InferenceResult> {
        (**self).infer(frame, confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
