use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of one audio block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEvent {
    pub timestamp: DateTime<Utc>,
    /// Overall RMS energy (dB full scale)
    pub energy_db: f32,
    /// Energy inside the voice band
    pub voice_energy_db: f32,
    /// Energy outside the voice band
    pub background_energy_db: f32,
    /// Frequency of the strongest spectral bin
    pub spectral_peak_hz: f32,
    pub voice_detected: bool,
    pub noise_detected: bool,
    /// 0-100, higher is more suspicious
    pub anomaly_score: f32,
}

impl AudioEvent {
    /// Event for a block carrying no signal.
    pub fn silent(timestamp: DateTime<Utc>, floor_db: f32) -> Self {
        Self {
            timestamp,
            energy_db: floor_db,
            voice_energy_db: floor_db,
            background_energy_db: floor_db,
            spectral_peak_hz: 0.0,
            voice_detected: false,
            noise_detected: false,
            anomaly_score: 0.0,
        }
    }

    /// Whether the block carried voice or noise.
    pub fn is_active(&self) -> bool {
        self.voice_detected || self.noise_detected
    }
}
