//! Frame-count based object tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::tracker::matching::{self, AssignmentResult, Detection};
use crate::tracker::rect::Rect;
use crate::tracker::track::Track;

/// Configuration for the ObjectTracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Hits required before a track is confirmed
    pub confirmation_threshold: u32,
    /// Consecutive missed frames before a track is deleted
    pub disappearance_threshold: u32,
    /// Minimum IoU (exclusive) to match a detection to a track
    pub iou_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: 2,
            disappearance_threshold: 10,
            iou_threshold: 0.3,
        }
    }
}

impl TrackerConfig {
    /// Check thresholds are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confirmation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "tracker.confirmation_threshold must be at least 1".into(),
            ));
        }
        if self.disappearance_threshold == 0 {
            return Err(ConfigError::Invalid(
                "tracker.disappearance_threshold must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.iou_threshold) {
            return Err(ConfigError::Invalid(
                "tracker.iou_threshold must be in [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub frame_count: u64,
    pub live_tracks: usize,
    pub confirmed_tracks: usize,
    pub ids_issued: u64,
}

/// Matches per-frame detections to persistent tracks.
///
/// Not thread-safe: owned by one pipeline and driven from one thread.
pub struct ObjectTracker {
    tracks: Vec<Track>,
    next_track_id: u64,
    frame_count: u64,
    config: TrackerConfig,
}

impl ObjectTracker {
    /// Create a tracker with no tracks and the id counter at zero.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_track_id: 0,
            frame_count: 0,
            config,
        }
    }

    /// Get a reference to the tracker configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Advance one frame using the wall clock.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<Track> {
        self.update_at(detections, Utc::now())
    }

    /// Advance one frame and return the confirmed tracks.
    ///
    /// Must be called once per processed frame, with an empty slice for
    /// frames where no detection pass ran.
    pub fn update_at(&mut self, detections: &[Detection], now: DateTime<Utc>) -> Vec<Track> {
        self.frame_count += 1;

        let track_rects: Vec<Rect> = self.tracks.iter().map(|t| t.bbox).collect();
        let det_rects: Vec<Rect> = detections.iter().map(|d| d.bbox).collect();

        let AssignmentResult {
            matches,
            duplicates,
            unmatched_tracks,
            unmatched_detections,
        } = matching::greedy_assignment(&track_rects, &det_rects, self.config.iou_threshold);

        for (itrack, idet) in matches {
            self.tracks[itrack].update(&detections[idet], now);
        }
        for (itrack, idet) in duplicates {
            self.tracks[itrack].absorb(&detections[idet], now);
        }

        for itrack in unmatched_tracks {
            self.tracks[itrack].mark_missed();
        }

        let disappearance = self.config.disappearance_threshold;
        let frame = self.frame_count;
        self.tracks.retain(|track| {
            let gone = track.is_gone(disappearance);
            if gone {
                debug!(
                    track_id = track.track_id,
                    label = %track.class_label,
                    frame,
                    "track disappeared"
                );
            }
            !gone
        });

        // New tracks are appended after retention so they are never aged on
        // the frame that created them. A later detection overlapping a track
        // born this frame is the same object and folds into it.
        let born_from = self.tracks.len();
        for idet in unmatched_detections {
            let det = &detections[idet];
            let threshold = self.config.iou_threshold;
            let mut best: Option<(usize, f32)> = None;
            for (offset, track) in self.tracks[born_from..].iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou > threshold && best.is_none_or(|(_, best_iou)| iou > best_iou) {
                    best = Some((born_from + offset, iou));
                }
            }
            match best {
                Some((itrack, _)) => self.tracks[itrack].absorb(det, now),
                None => {
                    let track_id = self.issue_track_id();
                    self.tracks.push(Track::new(track_id, det, now));
                }
            }
        }

        let confirmation = self.config.confirmation_threshold;
        for track in &mut self.tracks {
            if track.try_confirm(confirmation) {
                info!(
                    track_id = track.track_id,
                    label = %track.class_label,
                    confidence = track.confidence,
                    frame,
                    "object confirmed"
                );
            }
        }

        self.tracks.iter().filter(|t| t.confirmed).cloned().collect()
    }

    fn issue_track_id(&mut self) -> u64 {
        self.next_track_id += 1;
        self.next_track_id
    }

    /// All live tracks, confirmed or not, in creation order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Snapshot of the confirmed tracks.
    pub fn confirmed(&self) -> Vec<Track> {
        self.tracks.iter().filter(|t| t.confirmed).cloned().collect()
    }

    /// Number of confirmed tracks.
    pub fn confirmed_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.confirmed).count()
    }

    /// Frames processed since creation or the last reset.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Counters for monitoring.
    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            frame_count: self.frame_count,
            live_tracks: self.tracks.len(),
            confirmed_tracks: self.confirmed_count(),
            ids_issued: self.next_track_id,
        }
    }

    /// Drop all tracks. Ids keep increasing so none is ever reused.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.frame_count = 0;
    }
}

impl Default for ObjectTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone(x: f32) -> Detection {
        Detection::new(x, 100.0, x + 100.0, 250.0, "cell phone", 0.85)
    }

    fn tracker(confirm: u32, disappear: u32) -> ObjectTracker {
        ObjectTracker::new(TrackerConfig {
            confirmation_threshold: confirm,
            disappearance_threshold: disappear,
            iou_threshold: 0.3,
        })
    }

    #[test]
    fn test_confirms_after_threshold() {
        let mut tracker = tracker(3, 5);
        assert!(tracker.update(&[phone(100.0)]).is_empty());
        assert!(tracker.update(&[phone(102.0)]).is_empty());
        let confirmed = tracker.update(&[phone(104.0)]);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].consecutive_hits, 3);
        assert_eq!(confirmed[0].bbox.x, 104.0);
    }

    #[test]
    fn test_threshold_one_confirms_immediately() {
        let mut tracker = tracker(1, 5);
        assert_eq!(tracker.update(&[phone(100.0)]).len(), 1);
    }

    #[test]
    fn test_bridges_short_gap() {
        let mut tracker = tracker(2, 3);
        tracker.update(&[phone(100.0)]);
        let id = tracker.update(&[phone(100.0)])[0].track_id;

        // Two missed frames: still alive and confirmed
        assert_eq!(tracker.update(&[]).len(), 1);
        assert_eq!(tracker.update(&[]).len(), 1);

        let confirmed = tracker.update(&[phone(101.0)]);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].track_id, id);
        assert_eq!(confirmed[0].missed_frames, 0);
    }

    #[test]
    fn test_sparse_detection_cadence_still_confirms() {
        // Detector runs every third frame
        let mut tracker = tracker(2, 10);
        let mut confirmed = Vec::new();
        for frame in 0..6 {
            let dets = if frame % 3 == 0 { vec![phone(100.0)] } else { vec![] };
            confirmed = tracker.update(&dets);
        }
        assert_eq!(confirmed.len(), 1);
    }

    #[test]
    fn test_overlapping_detections_are_one_object() {
        let mut tracker = tracker(2, 5);
        let dets = || {
            vec![
                phone(100.0),
                Detection::new(102.0, 100.0, 202.0, 250.0, "remote", 0.7),
            ]
        };

        // Second detection folds into the track born from the first
        assert!(tracker.update(&dets()).is_empty());
        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.tracks()[0].consecutive_hits, 1);

        let confirmed = tracker.update(&dets());
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].consecutive_hits, 2);
        assert_eq!(confirmed[0].class_label, "cell phone");
        assert_eq!(tracker.stats().ids_issued, 1);
    }

    #[test]
    fn test_disjoint_detections_create_separate_tracks() {
        let mut tracker = tracker(1, 5);
        let confirmed = tracker.update(&[phone(0.0), phone(400.0)]);
        assert_eq!(confirmed.len(), 2);
        assert_ne!(confirmed[0].track_id, confirmed[1].track_id);
    }

    #[test]
    fn test_zero_area_detection_never_matches() {
        let mut tracker = tracker(2, 5);
        let flat = Detection::new(0.0, 0.0, 10.0, 0.0, "book", 0.9);
        tracker.update(std::slice::from_ref(&flat));
        tracker.update(std::slice::from_ref(&flat));
        assert_eq!(tracker.confirmed_count(), 0);
        assert_eq!(tracker.tracks().len(), 2);
    }

    #[test]
    fn test_reset_keeps_ids_unique() {
        let mut tracker = tracker(1, 5);
        let first = tracker.update(&[phone(100.0)])[0].track_id;
        tracker.reset();
        let second = tracker.update(&[phone(100.0)])[0].track_id;
        assert!(second > first);
        assert_eq!(tracker.stats().ids_issued, 2);
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let config = TrackerConfig {
            confirmation_threshold: 0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(TrackerConfig::default().validate().is_ok());
    }
}
