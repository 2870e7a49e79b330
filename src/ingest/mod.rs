//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Synthetic scenes (`stub://name`, testing and demos)
//! - Local image directories (replay of captured stills)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Every source implements `FrameSource`. A session connects the source
//! synchronously at start, moves it to the worker thread, and releases it
//! when the loop ends. Each successful `connect` is paired with one `release`.

pub mod file;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::config::CameraSettings;
use crate::frame::Frame;

pub use file::{ImageDirConfig, ImageDirSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// Counters reported by a source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub failures: u64,
    pub origin: String,
}

/// A camera-like producer of frames.
///
/// `next_frame` returning an error means "no frame available right now"; the
/// session decides whether to retry or give up.
pub trait FrameSource: Send {
    /// Open the underlying device. Called once per session start, before the
    /// worker is spawned; an error here is reported to the caller of `start`.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. May block.
    fn next_frame(&mut self) -> Result<Frame>;

    /// False once the device is closed or has stalled. The session ends with
    /// `SourceLost` instead of retrying an unhealthy source.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;

    /// Release the device. Called once after each successful `connect`, when the
    /// session using it ends.
    fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Build the source named by `settings.source`.
///
/// - `stub://...` selects the synthetic source
/// - `/dev/...` selects V4L2 (requires the ingest-v4l2 feature)
/// - any other local path is treated as an image directory
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn FrameSource>> {
    let source = settings.source.trim();
    if source.is_empty() {
        return Err(anyhow!("camera source must not be empty"));
    }
    if source.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig {
            name: source.to_string(),
            width: settings.width,
            height: settings.height,
        })));
    }
    if source.contains("://") {
        return Err(anyhow!(
            "unsupported camera source '{}' (only local devices and paths)",
            source
        ));
    }
    if source.starts_with("/dev/") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(V4l2Config {
                device: source.to_string(),
                target_fps: settings.target_fps,
                width: settings.width,
                height: settings.height,
            })));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!(
                "camera device {} requires the ingest-v4l2 feature",
                source
            ));
        }
    }
    Ok(Box::new(ImageDirSource::new(ImageDirConfig {
        path: source.into(),
        width: settings.width,
        height: settings.height,
    })))
}
