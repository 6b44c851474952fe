//! Detection records and greedy IoU association.

use serde::{Deserialize, Serialize};

use crate::tracker::rect::{Rect, iou_batch};

/// Object detection input for the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Bounding box in TLWH pixel space
    pub bbox: Rect,
    /// Class label reported by the detector, e.g. "cell phone"
    pub class_label: String,
    /// Detection confidence (0-1)
    pub confidence: f32,
}

impl Detection {
    /// Build from TLBR corners.
    pub fn new(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        class_label: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            class_label: class_label.into(),
            confidence,
        }
    }

    /// Build from an existing box.
    pub fn from_rect(bbox: Rect, class_label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_label: class_label.into(),
            confidence,
        }
    }
}

/// Outcome of one association pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentResult {
    /// (track index, detection index) pairs, one per track at most
    pub matches: Vec<(usize, usize)>,
    /// (track index, detection index) pairs whose best track was already
    /// matched earlier in the same pass
    pub duplicates: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Greedy best-match association.
///
/// Detections are visited in input order. Each picks, among all tracks, the
/// one with the highest IoU strictly above `iou_threshold`; ties go to the
/// track that comes first. The first detection to reach a track matches it,
/// later ones landing on the same track are reported as duplicates of it.
pub fn greedy_assignment(
    track_boxes: &[Rect],
    det_boxes: &[Rect],
    iou_threshold: f32,
) -> AssignmentResult {
    let num_tracks = track_boxes.len();
    let num_dets = det_boxes.len();

    if num_tracks == 0 {
        return AssignmentResult {
            unmatched_detections: (0..num_dets).collect(),
            ..AssignmentResult::default()
        };
    }

    if num_dets == 0 {
        return AssignmentResult {
            unmatched_tracks: (0..num_tracks).collect(),
            ..AssignmentResult::default()
        };
    }

    let ious = iou_batch(track_boxes, det_boxes);
    let mut track_taken = vec![false; num_tracks];
    let mut matches = Vec::new();
    let mut duplicates = Vec::new();
    let mut unmatched_detections = Vec::new();

    for idet in 0..num_dets {
        let mut best: Option<(usize, f32)> = None;
        for itrack in 0..num_tracks {
            let iou = ious[[itrack, idet]];
            if iou > iou_threshold && best.is_none_or(|(_, best_iou)| iou > best_iou) {
                best = Some((itrack, iou));
            }
        }

        match best {
            Some((itrack, _)) if track_taken[itrack] => duplicates.push((itrack, idet)),
            Some((itrack, _)) => {
                track_taken[itrack] = true;
                matches.push((itrack, idet));
            }
            None => unmatched_detections.push(idet),
        }
    }

    let unmatched_tracks = track_taken
        .iter()
        .enumerate()
        .filter_map(|(i, &taken)| if taken { None } else { Some(i) })
        .collect();

    AssignmentResult {
        matches,
        duplicates,
        unmatched_tracks,
        unmatched_detections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracks() {
        let result = greedy_assignment(&[], &[Rect::new(0.0, 0.0, 1.0, 1.0)], 0.3);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_picks_highest_iou() {
        let tracks = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(2.0, 0.0, 10.0, 10.0)];
        let dets = [Rect::new(2.0, 0.0, 10.0, 10.0)];
        let result = greedy_assignment(&tracks, &dets, 0.3);
        assert_eq!(result.matches, vec![(1, 0)]);
        assert_eq!(result.unmatched_tracks, vec![0]);
    }

    #[test]
    fn test_tie_goes_to_first_track() {
        let tracks = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(0.0, 0.0, 10.0, 10.0)];
        let dets = [Rect::new(0.0, 0.0, 10.0, 10.0)];
        let result = greedy_assignment(&tracks, &dets, 0.3);
        assert_eq!(result.matches, vec![(0, 0)]);
    }

    #[test]
    fn test_second_detection_on_same_track_is_duplicate() {
        let tracks = [Rect::new(0.0, 0.0, 10.0, 10.0)];
        let dets = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(1.0, 0.0, 10.0, 10.0)];
        let result = greedy_assignment(&tracks, &dets, 0.3);
        assert_eq!(result.matches, vec![(0, 0)]);
        assert_eq!(result.duplicates, vec![(0, 1)]);
        assert!(result.unmatched_detections.is_empty());
    }

    #[test]
    fn test_duplicate_does_not_steal_a_free_track() {
        // Second detection overlaps the free track too, but less than the taken one
        let tracks = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(6.0, 0.0, 10.0, 10.0)];
        let dets = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(1.0, 0.0, 10.0, 10.0)];
        let result = greedy_assignment(&tracks, &dets, 0.1);
        assert_eq!(result.matches, vec![(0, 0)]);
        assert_eq!(result.duplicates, vec![(0, 1)]);
        assert_eq!(result.unmatched_tracks, vec![1]);
    }

    #[test]
    fn test_threshold_is_strict() {
        // IoU of these two is exactly 1/3
        let tracks = [Rect::new(0.0, 0.0, 10.0, 10.0)];
        let dets = [Rect::new(5.0, 0.0, 10.0, 10.0)];
        let result = greedy_assignment(&tracks, &dets, 1.0 / 3.0);
        assert!(result.matches.is_empty());
    }
}
