/// Axis-aligned box in frame pixel coordinates.
///
/// Corners are normalized on construction so that `x1 <= x2` and `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Build from a center point and size, as YOLO heads emit them.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_over_union(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Multiply every coordinate by per-axis factors.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x1 * sx, self.y1 * sy, self.x2 * sx, self.y2 * sy)
    }
}

/// One recognized object instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Score in `[0.0, 1.0]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }

    pub fn meets(&self, confidence_threshold: f32) -> bool {
        self.confidence >= confidence_threshold
    }
}

/// Detections for a single frame, in detector order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferenceResult {
    pub detections: Vec<Detection>,
}

impl InferenceResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    /// Detections at or above the threshold, any label.
    pub fn above(&self, confidence_threshold: f32) -> impl Iterator<Item = &Detection> {
        self.detections
            .iter()
            .filter(move |d| d.meets(confidence_threshold))
    }

    /// True when any detection of `label` meets the threshold.
    pub fn contains_label(&self, label: &str, confidence_threshold: f32) -> bool {
        self.above(confidence_threshold).any(|d| d.label == label)
    }
}

impl From<Vec<Detection>> for InferenceResult {
    fn from(detections: Vec<Detection>) -> Self {
        Self::new(detections)
    }
}

/// Class-aware non-maximum suppression. Output is sorted by descending confidence.
pub fn non_maximum_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut suppressed = vec![false; detections.len()];
    for current in 0..detections.len() {
        if suppressed[current] {
            continue;
        }
        for other in (current + 1)..detections.len() {
            if suppressed[other] || detections[current].label != detections[other].label {
                continue;
            }
            if detections[current]
                .bbox
                .intersection_over_union(&detections[other].bbox)
                > iou_threshold
            {
                suppressed[other] = true;
            }
        }
    }
    let mut keep = suppressed.iter();
    detections.retain(|_| !keep.next().copied().unwrap_or(true));
    detections
}
