use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in normalized 0..1 image coordinates (top-left origin).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn intersection_over_union(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.w).min(other.x + other.w);
        let bottom = (self.y + self.h).min(other.y + other.h);
        let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One detected object. Geometry is kept for rendering only.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class_id: u32,
    pub confidence: f32,
    #[serde(default)]
    pub bbox: BoundingBox,
}

impl DetectionRecord {
    pub fn new(class_id: u32, confidence: f32) -> Self {
        Self {
            class_id,
            confidence,
            bbox: BoundingBox::default(),
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = bbox;
        self
    }
}

/// Detections for a single frame, in adapter order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameResult {
    pub detections: Vec<DetectionRecord>,
}

impl FrameResult {
    pub fn new(detections: Vec<DetectionRecord>) -> Self {
        Self { detections }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectionRecord> {
        self.detections.iter()
    }

    /// Keep only records at or above `threshold`.
    pub fn filtered(&self, threshold: f32) -> Self {
        Self {
            detections: self
                .detections
                .iter()
                .filter(|det| det.confidence >= threshold)
                .copied()
                .collect(),
        }
    }
}

/// Everything an adapter returns for one invocation.
#[derive(Clone, Debug, Default)]
pub struct InferenceOutput {
    /// One entry per processed frame, in temporal order.
    pub frames: Vec<FrameResult>,
    /// Annotated frame; present for image requests.
    pub rendered: Option<RgbImage>,
}

/// Drop lower-confidence boxes that overlap a kept box of the same class.
pub fn non_maximum_suppression(
    mut detections: Vec<DetectionRecord>,
    iou_threshold: f32,
) -> Vec<DetectionRecord> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<DetectionRecord> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|existing| {
            existing.class_id == candidate.class_id
                && existing.bbox.intersection_over_union(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(class_id: u32, confidence: f32, x: f32, y: f32) -> DetectionRecord {
        DetectionRecord::new(class_id, confidence).with_bbox(BoundingBox {
            x,
            y,
            w: 0.2,
            h: 0.2,
        })
    }

    #[test]
    fn filtered_keeps_records_at_threshold() {
        let frame = FrameResult::new(vec![
            DetectionRecord::new(0, 0.49),
            DetectionRecord::new(1, 0.5),
            DetectionRecord::new(2, 0.9),
        ]);
        let kept = frame.filtered(0.5);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|det| det.confidence >= 0.5));
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox { x: 0.1, y: 0.1, w: 0.2, h: 0.2 };
        let b = BoundingBox { x: 0.6, y: 0.6, w: 0.2, h: 0.2 };
        assert!((a.intersection_over_union(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.intersection_over_union(&b), 0.0);
    }

    #[test]
    fn nms_suppresses_same_class_overlap_only() {
        let kept = non_maximum_suppression(
            vec![
                boxed(0, 0.7, 0.10, 0.10),
                boxed(0, 0.9, 0.11, 0.11),
                boxed(1, 0.8, 0.11, 0.11),
                boxed(0, 0.6, 0.70, 0.70),
            ],
            0.45,
        );
        let confidences: Vec<f32> = kept.iter().map(|det| det.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.8, 0.6]);
    }

    #[test]
    fn frame_result_deserializes_from_plain_array() {
        let frame: FrameResult =
            serde_json::from_str(r#"[{"class_id": 3, "confidence": 0.75}]"#).unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.detections[0].class_id, 3);
        assert_eq!(frame.detections[0].bbox, BoundingBox::default());
    }
}
