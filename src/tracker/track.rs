//! Single object track.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tracker::matching::Detection;
use crate::tracker::rect::Rect;

/// A persistent identity for one detected object across frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Unique track identifier, never reused by the owning tracker
    pub track_id: u64,
    /// Latest matched bounding box
    pub bbox: Rect,
    /// Latest matched detection confidence
    pub confidence: f32,
    pub class_label: String,
    /// Frames matched since the track was created
    pub consecutive_hits: u32,
    /// Frames since the last match
    pub missed_frames: u32,
    /// Sticky: stays true for the rest of the track's life
    pub confirmed: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Track {
    /// Start a track from an unmatched detection.
    pub fn new(track_id: u64, detection: &Detection, now: DateTime<Utc>) -> Self {
        Self {
            track_id,
            bbox: detection.bbox,
            confidence: detection.confidence,
            class_label: detection.class_label.clone(),
            consecutive_hits: 1,
            missed_frames: 0,
            confirmed: false,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Take over a matched detection and count one more hit.
    pub fn update(&mut self, detection: &Detection, now: DateTime<Utc>) {
        self.bbox = detection.bbox;
        self.confidence = detection.confidence;
        self.class_label.clone_from(&detection.class_label);
        self.consecutive_hits = self.consecutive_hits.saturating_add(1);
        self.missed_frames = 0;
        self.last_seen = now;
    }

    /// Fold in another detection of the same object seen in the same frame.
    /// Keeps the more confident box and does not count a hit.
    pub fn absorb(&mut self, detection: &Detection, now: DateTime<Utc>) {
        if detection.confidence > self.confidence {
            self.bbox = detection.bbox;
            self.confidence = detection.confidence;
            self.class_label.clone_from(&detection.class_label);
        }
        self.missed_frames = 0;
        self.last_seen = now;
    }

    /// Count one frame without a matching detection.
    pub fn mark_missed(&mut self) {
        self.missed_frames = self.missed_frames.saturating_add(1);
    }

    /// Confirm once enough hits accumulated. Returns `true` on the frame the
    /// track becomes confirmed.
    pub fn try_confirm(&mut self, confirmation_threshold: u32) -> bool {
        if !self.confirmed && self.consecutive_hits >= confirmation_threshold {
            self.confirmed = true;
            return true;
        }
        false
    }

    /// Whether the track has been missed long enough to be dropped.
    pub fn is_gone(&self, disappearance_threshold: u32) -> bool {
        self.missed_frames >= disappearance_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_is_sticky() {
        let now = Utc::now();
        let det = Detection::new(0.0, 0.0, 10.0, 10.0, "cell phone", 0.9);
        let mut track = Track::new(1, &det, now);

        assert!(!track.try_confirm(2));
        track.update(&det, now);
        assert!(track.try_confirm(2));
        assert!(!track.try_confirm(2));

        track.mark_missed();
        assert!(track.confirmed);
        assert_eq!(track.missed_frames, 1);
        assert!(track.is_gone(1));
    }

    #[test]
    fn test_absorb_keeps_best_box_without_a_hit() {
        let now = Utc::now();
        let phone = Detection::new(0.0, 0.0, 10.0, 20.0, "cell phone", 0.6);
        let remote = Detection::new(1.0, 0.0, 11.0, 20.0, "remote", 0.8);
        let mut track = Track::new(1, &phone, now);

        track.absorb(&remote, now);
        assert_eq!(track.consecutive_hits, 1);
        assert_eq!(track.class_label, "remote");
        assert_eq!(track.bbox, remote.bbox);

        track.absorb(&phone, now);
        assert_eq!(track.class_label, "remote");
    }
}
