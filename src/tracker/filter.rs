//! Validation and per-class policies applied to raw detector output before
//! it reaches the tracker.
//!
//! The thresholds are empirically tuned defaults for COCO-style detectors.
//! Visually similar classes (phone vs. mouse, laptop vs. book) get shape
//! checks that demand more confidence when the box looks like the other class.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::tracker::matching::Detection;

/// Extra confidence required when a box has an unexpected shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapePolicy {
    /// Boxes with aspect ratio (w/h) below this are suspicious
    pub min_aspect: Option<f32>,
    /// Boxes with aspect ratio above this are suspicious
    pub max_aspect: Option<f32>,
    /// Boxes smaller than this area (px^2) are suspicious
    pub min_area: Option<f32>,
    /// Boxes larger than this area (px^2) are suspicious
    pub max_area: Option<f32>,
    /// Confidence needed to keep a suspicious box
    pub suspicious_min_confidence: f32,
    /// Aspect ratio below which the box is rejected outright
    pub reject_below_aspect: Option<f32>,
}

impl ShapePolicy {
    fn is_suspicious(&self, aspect: f32, area: f32) -> bool {
        self.min_aspect.is_some_and(|v| aspect < v)
            || self.max_aspect.is_some_and(|v| aspect > v)
            || self.min_area.is_some_and(|v| area < v)
            || self.max_area.is_some_and(|v| area > v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionFilterConfig {
    /// Labels that count as prohibited objects. Anything else is dropped.
    pub prohibited_labels: Vec<String>,
    /// Confidence floor for labels without a per-class threshold
    pub default_min_confidence: f32,
    pub class_min_confidence: BTreeMap<String, f32>,
    pub shape_policies: BTreeMap<String, ShapePolicy>,
}

impl Default for DetectionFilterConfig {
    fn default() -> Self {
        let labels = ["cell phone", "book", "laptop", "keyboard", "mouse", "remote"];

        let class_min_confidence = [
            ("cell phone", 0.30),
            ("book", 0.30),
            ("laptop", 0.45),
            ("keyboard", 0.35),
            ("mouse", 0.35),
            ("remote", 0.30),
        ]
        .into_iter()
        .map(|(label, conf)| (label.to_string(), conf))
        .collect();

        let mut shape_policies = BTreeMap::new();
        shape_policies.insert(
            "cell phone".to_string(),
            ShapePolicy {
                min_aspect: None,
                max_aspect: Some(1.8),
                min_area: Some(5000.0),
                max_area: None,
                suspicious_min_confidence: 0.40,
                reject_below_aspect: None,
            },
        );
        shape_policies.insert(
            "mouse".to_string(),
            ShapePolicy {
                min_aspect: Some(0.7),
                max_aspect: None,
                min_area: None,
                max_area: Some(15000.0),
                suspicious_min_confidence: 0.40,
                reject_below_aspect: None,
            },
        );
        shape_policies.insert(
            "laptop".to_string(),
            ShapePolicy {
                min_aspect: Some(1.5),
                max_aspect: None,
                min_area: None,
                max_area: None,
                suspicious_min_confidence: 0.55,
                reject_below_aspect: Some(1.2),
            },
        );

        Self {
            prohibited_labels: labels.iter().map(|l| l.to_string()).collect(),
            default_min_confidence: 0.5,
            class_min_confidence,
            shape_policies,
        }
    }
}

impl DetectionFilterConfig {
    /// Check confidence thresholds are in [0, 1].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !in_unit(self.default_min_confidence) {
            return Err(ConfigError::Invalid(
                "filter.default_min_confidence must be in [0, 1]".into(),
            ));
        }
        if let Some((label, _)) = self.class_min_confidence.iter().find(|(_, v)| !in_unit(**v)) {
            return Err(ConfigError::Invalid(format!(
                "filter.class_min_confidence[{label}] must be in [0, 1]"
            )));
        }
        Ok(())
    }
}

/// Why a detection was dropped at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MalformedBox,
    InvalidConfidence,
    NotProhibited,
    LowConfidence,
    Shape,
}

#[derive(Debug, Clone)]
pub struct DetectionFilter {
    config: DetectionFilterConfig,
}

impl DetectionFilter {
    /// Create a filter from its configuration.
    pub fn new(config: DetectionFilterConfig) -> Self {
        Self { config }
    }

    /// Get a reference to the filter configuration.
    pub fn config(&self) -> &DetectionFilterConfig {
        &self.config
    }

    /// Keep only well-formed detections of prohibited classes that pass
    /// their confidence and shape policies.
    pub fn apply(&self, detections: &[Detection]) -> Vec<Detection> {
        detections
            .iter()
            .filter(|det| match self.check(det) {
                Ok(()) => true,
                Err(reason) => {
                    debug!(
                        label = %det.class_label,
                        confidence = det.confidence,
                        ?reason,
                        "detection dropped"
                    );
                    false
                }
            })
            .cloned()
            .collect()
    }

    pub fn check(&self, det: &Detection) -> Result<(), Rejection> {
        if !det.bbox.is_valid() {
            return Err(Rejection::MalformedBox);
        }
        if !det.confidence.is_finite() || !(0.0..=1.0).contains(&det.confidence) {
            return Err(Rejection::InvalidConfidence);
        }
        if !self
            .config
            .prohibited_labels
            .iter()
            .any(|label| label == &det.class_label)
        {
            return Err(Rejection::NotProhibited);
        }

        let min_confidence = self
            .config
            .class_min_confidence
            .get(&det.class_label)
            .copied()
            .unwrap_or(self.config.default_min_confidence);
        if det.confidence < min_confidence {
            return Err(Rejection::LowConfidence);
        }

        if let Some(policy) = self.config.shape_policies.get(&det.class_label) {
            let aspect = det.bbox.aspect_ratio();
            let area = det.bbox.area();
            if policy.reject_below_aspect.is_some_and(|v| aspect < v) {
                return Err(Rejection::Shape);
            }
            if policy.is_suspicious(aspect, area) && det.confidence < policy.suspicious_min_confidence
            {
                return Err(Rejection::Shape);
            }
        }

        Ok(())
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self::new(DetectionFilterConfig::default())
    }
}
