//! spotter
//!
//! Watches a camera for a target object class, draws detections onto each
//! frame, and speaks an alert when the target appears, at most once per
//! cooldown window.
//!
//! # Architecture
//!
//! The crate is built around a `SessionController` that enforces, by
//! construction:
//!
//! 1. **Single worker**: at most one capture/inference loop runs at a time.
//! 2. **Debounced alerts**: no two alerts closer together than the cooldown.
//! 3. **Clean stop**: `stop` joins the worker; nothing is published afterwards.
//! 4. **Non-fatal sinks**: display and speech failures are logged, never fatal.
//!
//! # Module Structure
//!
//! - `frame`: Frame and AnnotatedFrame
//! - `ingest`: Frame sources (synthetic, image directory, V4L2)
//! - `detect`: Detectors (scene change stub, tract ONNX) and results
//! - `alert`: The debounce decision
//! - `annotate`: Overlay drawing
//! - `sink`: Display and speech sinks
//! - `session`: Lifecycle, worker loop, clock and cancellation
//! - `config`: File + environment configuration

pub mod alert;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod session;
pub mod sink;

pub use alert::{should_alert, AlertDecision, AlertState};
pub use annotate::Annotator;
pub use config::{CameraSettings, SpotterConfig};
pub use detect::{BoundingBox, Detection, Detector, InferenceResult, SceneChangeDetector};
#[cfg(feature = "backend-tract")]
pub use detect::TractDetector;
pub use frame::{AnnotatedFrame, Frame};
pub use ingest::{open_source, FrameSource, SourceStats};
pub use session::{
    Clock, CooldownPolicy, ManualClock, RetryPolicy, SessionConfig, SessionController,
    SessionError, SessionExit, SessionState, SessionStats, SystemClock,
};
pub use sink::{DisplaySink, SpeechSink};

use anyhow::Result;

/// Build the detector named by the model settings.
///
/// With the backend-tract feature the ONNX model at `model.path` is loaded;
/// a path of `stub://` selects the scene-change stub regardless.
pub fn open_detector(cfg: &SpotterConfig) -> Result<Box<dyn Detector>> {
    let path = cfg.model.path.to_string_lossy();
    if path.starts_with("stub://") {
        return Ok(Box::new(SceneChangeDetector::new(
            cfg.detection.target_label.clone(),
        )));
    }
    #[cfg(feature = "backend-tract")]
    {
        let detector = TractDetector::new(
            &cfg.model.path,
            cfg.class_labels(),
            cfg.model.input_width,
            cfg.model.input_height,
        )?
        .with_iou_threshold(cfg.model.iou_threshold);
        Ok(Box::new(detector))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        anyhow::bail!(
            "loading {} requires the backend-tract feature (use stub:// for the stub detector)",
            path
        )
    }
}
