//! Detection overlays.

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::{Detection, InferenceResult};
use crate::frame::{AnnotatedFrame, Frame};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const BANNER_HEIGHT: u32 = 14;
const LABEL_SCALE: f32 = 13.0;

/// Draws bounding boxes and labels onto a copy of a frame.
///
/// Without a font only the boxes and label banners are drawn; the label
/// text is still carried on the `AnnotatedFrame`.
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: FontVec) -> Self {
        Self { font: Some(font) }
    }

    /// Load a TTF/OTF font for label text.
    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read font file {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid font file {}: {}", path.display(), e))?;
        Ok(Self::with_font(font))
    }

    /// Annotate every detection at or above `confidence_threshold`.
    pub fn annotate(
        &self,
        frame: &Frame,
        result: &InferenceResult,
        confidence_threshold: f32,
        alerted: bool,
    ) -> AnnotatedFrame {
        let mut image = frame.image().clone();
        let drawn: Vec<Detection> = result.above(confidence_threshold).cloned().collect();
        for detection in &drawn {
            self.draw_detection(&mut image, detection);
        }
        AnnotatedFrame {
            image,
            sequence: frame.sequence,
            captured_at: frame.captured_at,
            detections: drawn,
            alerted,
        }
    }

    fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
        let (width, height) = image.dimensions();
        let Some(rect) = clamp_rect(detection, width, height) else {
            return;
        };

        for inset in 0..BOX_THICKNESS {
            let w = rect.width() as i32 - 2 * inset;
            let h = rect.height() as i32 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let ring = Rect::at(rect.left() + inset, rect.top() + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, ring, BOX_COLOR);
        }

        // Banner sits above the box, or inside it when the box touches the top edge.
        let text = label_text(detection);
        let banner_top = if rect.top() >= BANNER_HEIGHT as i32 {
            rect.top() - BANNER_HEIGHT as i32
        } else {
            rect.top()
        };
        let banner_width = (text.len() as u32 * 7 + 4).min(width.saturating_sub(rect.left() as u32).max(1));
        let banner = Rect::at(rect.left(), banner_top).of_size(banner_width, BANNER_HEIGHT);
        draw_filled_rect_mut(image, banner, BOX_COLOR);

        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                TEXT_COLOR,
                rect.left() + 2,
                banner_top,
                PxScale::from(LABEL_SCALE),
                font,
                &text,
            );
        }
    }
}

/// "wheel 0.87"
pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.2}", detection.label, detection.confidence)
}

fn clamp_rect(detection: &Detection, width: u32, height: u32) -> Option<Rect> {
    if width == 0 || height == 0 {
        return None;
    }
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let x1 = detection.bbox.x1.clamp(0.0, max_x).round() as i32;
    let y1 = detection.bbox.y1.clamp(0.0, max_y).round() as i32;
    let x2 = detection.bbox.x2.clamp(0.0, max_x).round() as i32;
    let y2 = detection.bbox.y2.clamp(0.0, max_y).round() as i32;
    let w = (x2 - x1 + 1).max(1) as u32;
    let h = (y2 - y1 + 1).max(1) as u32;
    Some(Rect::at(x1, y1).of_size(w, h))
}
