//! Fluent construction of labelled detections from detector output.

use crate::tracker::{Detection, Rect};

/// Builds a [`Detection`] from whatever box convention a detector emits.
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    bbox: Rect,
    label: String,
    score: f32,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Corners (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox = Rect::from_tlbr(x1, y1, x2, y2);
        self
    }

    /// Centre and size (cx, cy, w, h), as YOLO-style heads report.
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(cx - w / 2.0, cy - h / 2.0, w, h);
        self
    }

    /// Top-left corner and size (x, y, w, h), as face cascades report.
    pub fn tlwh(mut self, x: f32, y: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(x, y, w, h);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// COCO class index, mapped to its name when it is one of the
    /// classes the monitor cares about.
    pub fn coco_class(self, class_id: usize) -> Self {
        let label = coco_label(class_id).map_or_else(|| format!("class_{class_id}"), str::to_string);
        self.label(label)
    }

    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn build(self) -> Detection {
        Detection::from_rect(self.bbox, self.label, self.score)
    }
}

/// Names for the COCO ids relevant to exam monitoring.
pub fn coco_label(class_id: usize) -> Option<&'static str> {
    match class_id {
        0 => Some("person"),
        63 => Some("laptop"),
        64 => Some("mouse"),
        65 => Some("remote"),
        66 => Some("keyboard"),
        67 => Some("cell phone"),
        73 => Some("book"),
        _ => None,
    }
}
