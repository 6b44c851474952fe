//! Input seams between capture/detector backends and the monitoring loop.

use std::collections::VecDeque;
use std::convert::Infallible;

use ndarray::Array1;
use thiserror::Error;

use crate::handoff::LatestSlot;
use crate::integration::builder::DetectionBuilder;
use crate::integration::pipeline::FrameObservation;
use crate::tracker::Detection;

/// Supplies frames to a [`MonitorWorker`](crate::MonitorWorker).
///
/// `Ok(None)` means no new frame yet; the worker idles and polls again.
/// An error ends the worker loop.
///
/// # Example
///
/// ```ignore
/// use focusguard_core::integration::FrameSource;
/// use focusguard_core::FrameObservation;
///
/// struct CameraFeed { /* capture handle, detectors */ }
///
/// impl FrameSource for CameraFeed {
///     type Error = std::io::Error;
///
///     fn next_frame(&mut self) -> Result<Option<FrameObservation>, Self::Error> {
///         // Grab a frame, run detectors, build the observation
///         Ok(None)
///     }
/// }
/// ```
pub trait FrameSource {
    type Error: std::fmt::Display;

    fn next_frame(&mut self) -> Result<Option<FrameObservation>, Self::Error>;
}

/// Supplies mono audio blocks to the audio producer loop.
pub trait AudioSource {
    type Error: std::fmt::Display;

    fn next_block(&mut self) -> Result<Option<Array1<f32>>, Self::Error>;
}

/// Helper trait for converting model-specific outputs to `Detection`.
pub trait IntoDetections {
    fn into_detections(self) -> Vec<Detection>;
}

impl IntoDetections for Vec<Detection> {
    fn into_detections(self) -> Vec<Detection> {
        self
    }
}

impl IntoDetections for Vec<DetectionBuilder> {
    fn into_detections(self) -> Vec<Detection> {
        self.into_iter().map(DetectionBuilder::build).collect()
    }
}

/// Reads whatever frame the capture thread published last.
///
/// Frames published faster than the worker consumes them are skipped.
#[derive(Clone, Default)]
pub struct SlotFrameSource {
    slot: LatestSlot<FrameObservation>,
}

impl SlotFrameSource {
    /// Read frames from an existing slot.
    pub fn new(slot: LatestSlot<FrameObservation>) -> Self {
        Self { slot }
    }

    /// Producer side of the slot.
    pub fn slot(&self) -> &LatestSlot<FrameObservation> {
        &self.slot
    }
}

impl FrameSource for SlotFrameSource {
    type Error = Infallible;

    fn next_frame(&mut self) -> Result<Option<FrameObservation>, Self::Error> {
        Ok(self.slot.take())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("recorded input exhausted")]
pub struct SourceExhausted;

/// Replays a fixed sequence, then reports exhaustion.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource<T> {
    items: VecDeque<T>,
}

impl<T> ReplaySource<T> {
    /// Queue items to be returned in order.
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    /// Items not yet returned.
    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl FrameSource for ReplaySource<FrameObservation> {
    type Error = SourceExhausted;

    fn next_frame(&mut self) -> Result<Option<FrameObservation>, Self::Error> {
        self.items.pop_front().map(Some).ok_or(SourceExhausted)
    }
}

impl AudioSource for ReplaySource<Array1<f32>> {
    type Error = SourceExhausted;

    fn next_block(&mut self) -> Result<Option<Array1<f32>>, Self::Error> {
        self.items.pop_front().map(Some).ok_or(SourceExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::PoseObservation;
    use chrono::Utc;

    #[test]
    fn test_builders_convert_to_detections() {
        let raw = vec![
            DetectionBuilder::new()
                .tlbr(10.0, 20.0, 50.0, 80.0)
                .label("book")
                .score(0.7),
        ];
        let detections = raw.into_detections();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_label, "book");
    }

    #[test]
    fn test_slot_source_yields_latest_once() {
        let mut source = SlotFrameSource::default();
        let now = Utc::now();
        source.slot().publish(FrameObservation::new(1, now, PoseObservation::facing(80.0)));
        source.slot().publish(FrameObservation::new(2, now, PoseObservation::facing(80.0)));

        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.frame_index, 2);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_replay_source_exhausts() {
        let mut source = ReplaySource::new(vec![Array1::<f32>::zeros(4)]);
        assert!(source.next_block().unwrap().is_some());
        assert_eq!(source.next_block(), Err(SourceExhausted));
    }
}
