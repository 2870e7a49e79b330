use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection, InferenceResult};
use crate::frame::Frame;

/// Stub detector for synthetic runs. Hashes pixels and reports a full-frame
/// detection of `label` whenever the scene changes.
pub struct SceneChangeDetector {
    label: String,
    confidence: f32,
    last_hash: Option<[u8; 32]>,
}

impl SceneChangeDetector {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            confidence: 0.85,
            last_hash: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

impl Detector for SceneChangeDetector {
    fn name(&self) -> &'static str {
        "scene-change"
    }

    fn infer(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<InferenceResult> {
        let current_hash: [u8; 32] = Sha256::digest(frame.pixels()).into();

        let changed = self.last_hash.is_some_and(|prev| prev != current_hash);

        self.last_hash = Some(current_hash);

        if changed && self.confidence >= confidence_threshold {
            let bbox = BoundingBox::new(0.0, 0.0, frame.width() as f32, frame.height() as f32);
            Ok(InferenceResult::new(vec![Detection::new(
                self.label.clone(),
                self.confidence,
                bbox,
            )]))
        } else {
            Ok(InferenceResult::empty())
        }
    }
}
