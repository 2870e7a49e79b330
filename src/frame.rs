//! Frame types flowing through a detection session.
//!
//! - `Frame`: one captured RGB image, produced by a `FrameSource`.
//! - `AnnotatedFrame`: the annotated copy published to the display sink.
//!
//! Frames are owned by the loop iteration that acquired them and are dropped
//! once the annotated copy has been handed to the display sink.

use image::RgbImage;
use std::time::Instant;

use crate::detect::Detection;

/// One captured frame.
///
/// Not `Clone`: the annotator copies the pixels once and the captured frame
/// is dropped at the end of the iteration.
pub struct Frame {
    image: RgbImage,
    /// Per-source sequence number, starting at 1.
    pub sequence: u64,
    /// Monotonic capture instant.
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB8 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// A frame with detection overlays drawn on it.
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    pub image: RgbImage,
    pub sequence: u64,
    pub captured_at: Instant,
    /// Detections that were drawn onto `image`.
    pub detections: Vec<Detection>,
    /// True when this iteration fired an alert.
    pub alerted: bool,
}

impl AnnotatedFrame {
    pub fn has_overlays(&self) -> bool {
        !self.detections.is_empty()
    }
}
