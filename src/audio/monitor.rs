//! Thread boundary between the audio capture loop and the fusion loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::Array1;
use parking_lot::Mutex;

use crate::audio::event::AudioEvent;
use crate::audio::spectral::{AudioStatistics, SpectralConfig, SpectralEventDetector};
use crate::handoff::LatestSlot;

/// Cloneable handle shared by the audio producer and the fusion consumer.
///
/// The producer analyses blocks and publishes each event into a single slot.
/// The consumer reads the newest event without draining it, so a reader is at
/// most one block behind and no analysed block is ever dropped from history.
#[derive(Clone)]
pub struct AudioMonitor {
    detector: Arc<Mutex<SpectralEventDetector>>,
    latest: LatestSlot<AudioEvent>,
}

impl AudioMonitor {
    /// Create a monitor around a fresh detector.
    pub fn new(config: SpectralConfig) -> Self {
        Self::from_detector(SpectralEventDetector::new(config))
    }

    /// Wrap an existing detector.
    pub fn from_detector(detector: SpectralEventDetector) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            latest: LatestSlot::new(),
        }
    }

    /// Analyse one block and publish the resulting event.
    pub fn push_block(&self, samples: &Array1<f32>) -> AudioEvent {
        self.push_block_at(samples, Utc::now())
    }

    pub fn push_block_at(&self, samples: &Array1<f32>, timestamp: DateTime<Utc>) -> AudioEvent {
        let event = self.detector.lock().analyze_at(samples, timestamp);
        self.latest.publish(event.clone());
        event
    }

    /// Publish an event produced by an external analyser.
    pub fn publish_event(&self, event: AudioEvent) {
        self.latest.publish(event);
    }

    /// Most recent event, left in place for the next reader.
    pub fn latest(&self) -> Option<AudioEvent> {
        self.latest.latest()
    }

    /// Number of events published since creation.
    pub fn events_published(&self) -> u64 {
        self.latest.published()
    }

    /// See [`SpectralEventDetector::is_sustained_voice`].
    pub fn is_sustained_voice(&self, duration_seconds: f64) -> bool {
        self.detector.lock().is_sustained_voice(duration_seconds)
    }

    /// Detector statistics snapshot.
    pub fn statistics(&self) -> AudioStatistics {
        self.detector.lock().statistics()
    }

    /// Clear detector history and the published event.
    pub fn reset(&self) {
        self.detector.lock().reset();
        self.latest.clear();
    }
}

impl Default for AudioMonitor {
    fn default() -> Self {
        Self::new(SpectralConfig::default())
    }
}
