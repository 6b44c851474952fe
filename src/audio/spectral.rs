//! Energy and voice-band classification of raw audio blocks.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::Array1;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::audio::event::AudioEvent;
use crate::error::ConfigError;

/// Floor added before taking logarithms so silence stays finite.
const EPSILON: f64 = 1e-10;

/// Energy reported for an empty block.
const SILENCE_DB: f32 = -200.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Voice band [low, high] in Hz
    pub voice_band_hz: [f32; 2],
    /// Overall energy above this counts as noise (dB)
    pub noise_floor_db: f32,
    /// Voice-band energy above this counts as voice (dB)
    pub voice_threshold_db: f32,
    /// Blocks kept in the rolling history
    pub history_capacity: usize,
    /// Voiced share of recent blocks needed for sustained voice
    pub sustained_voice_ratio: f32,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            voice_band_hz: [85.0, 3400.0],
            noise_floor_db: -35.0,
            voice_threshold_db: -30.0,
            history_capacity: 50,
            sustained_voice_ratio: 0.7,
        }
    }
}

impl SpectralConfig {
    /// Check band edges, thresholds and capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be positive".into()));
        }
        let [low, high] = self.voice_band_hz;
        if !(low >= 0.0 && low < high) {
            return Err(ConfigError::Invalid(
                "audio.voice_band_hz must be an increasing [low, high] pair".into(),
            ));
        }
        if self.history_capacity < 2 {
            return Err(ConfigError::Invalid(
                "audio.history_capacity must hold at least 2 blocks".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.sustained_voice_ratio) {
            return Err(ConfigError::Invalid(
                "audio.sustained_voice_ratio must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    energy_db: f32,
    voice: bool,
    block_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStatistics {
    pub blocks_analyzed: u64,
    pub voice_detections: u64,
    pub noise_detections: u64,
    /// Percentage of analysed blocks with voice
    pub voice_detection_rate: f32,
    /// Mean energy over the rolling history, -100 when empty
    pub average_energy_db: f32,
    pub last_voice_at: Option<DateTime<Utc>>,
}

/// Converts audio blocks into [`AudioEvent`]s and keeps a rolling history
/// for sustained-voice queries.
pub struct SpectralEventDetector {
    config: SpectralConfig,
    cached_fft: Option<(usize, Arc<dyn Fft<f32>>)>,
    history: VecDeque<HistoryEntry>,
    blocks_analyzed: u64,
    voice_detections: u64,
    noise_detections: u64,
    last_voice_at: Option<DateTime<Utc>>,
}

impl SpectralEventDetector {
    /// Create a detector. The FFT plan is built lazily for the first block size.
    pub fn new(config: SpectralConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_capacity.max(1)),
            config,
            cached_fft: None,
            blocks_analyzed: 0,
            voice_detections: 0,
            noise_detections: 0,
            last_voice_at: None,
        }
    }

    /// Get a reference to the detector configuration.
    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    /// Classify one mono block stamped with the wall clock.
    pub fn analyze(&mut self, samples: &Array1<f32>) -> AudioEvent {
        self.analyze_at(samples, Utc::now())
    }

    /// Classify one mono block. Never fails: empty or silent input yields a
    /// quiet event with finite energy.
    pub fn analyze_at(&mut self, samples: &Array1<f32>, timestamp: DateTime<Utc>) -> AudioEvent {
        let n = samples.len();
        if n == 0 {
            return AudioEvent::silent(timestamp, SILENCE_DB);
        }

        let clean: Array1<f32> = samples.mapv(|s| if s.is_finite() { s } else { 0.0 });

        let mean_square = clean.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / n as f64;
        let rms = mean_square.sqrt();
        let energy_db = (20.0 * (rms + EPSILON).log10()) as f32;

        let bands = self.band_powers(&clean);
        let voice_energy_db = (10.0 * (bands.voice + EPSILON).log10()) as f32;
        let background_energy_db = (10.0 * (bands.background + EPSILON).log10()) as f32;

        let voice_detected = voice_energy_db > self.config.voice_threshold_db
            && energy_db > self.config.noise_floor_db;
        let noise_detected = energy_db > self.config.noise_floor_db && !voice_detected;

        let anomaly_score = if voice_detected {
            60.0 + (voice_energy_db - self.config.voice_threshold_db) * 2.0
        } else if noise_detected {
            30.0 + (energy_db - self.config.noise_floor_db) * 1.5
        } else {
            0.0
        }
        .clamp(0.0, 100.0);

        self.blocks_analyzed += 1;
        if voice_detected {
            self.voice_detections += 1;
            self.last_voice_at = Some(timestamp);
        } else if noise_detected {
            self.noise_detections += 1;
        }

        while self.history.len() >= self.config.history_capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            energy_db,
            voice: voice_detected,
            block_seconds: n as f64 / self.config.sample_rate as f64,
        });

        trace!(
            energy_db,
            voice_energy_db,
            voice_detected,
            noise_detected,
            "audio block analysed"
        );

        AudioEvent {
            timestamp,
            energy_db,
            voice_energy_db,
            background_energy_db,
            spectral_peak_hz: bands.peak_hz,
            voice_detected,
            noise_detected,
            anomaly_score,
        }
    }

    /// Split the one-sided power spectrum into voice band and the rest.
    ///
    /// Bin powers are scaled so they sum to the block's mean square.
    fn band_powers(&mut self, samples: &Array1<f32>) -> BandPowers {
        let n = samples.len();
        let fft = match &self.cached_fft {
            Some((len, fft)) if *len == n => Arc::clone(fft),
            _ => {
                let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
                self.cached_fft = Some((n, Arc::clone(&fft)));
                fft
            }
        };

        let mut buffer: Vec<Complex32> = samples.iter().map(|&s| Complex32::new(s, 0.0)).collect();
        fft.process(&mut buffer);

        let half_n = n / 2;
        let bin_hz = self.config.sample_rate as f32 / n as f32;
        let [low, high] = self.config.voice_band_hz;
        let norm = (n as f64) * (n as f64);

        let mut powers = BandPowers::default();
        let mut peak_power = -1.0f64;

        for (k, value) in buffer.iter().enumerate().take(half_n + 1) {
            let one_sided = if k == 0 || (n % 2 == 0 && k == half_n) { 1.0 } else { 2.0 };
            let power = one_sided * value.norm_sqr() as f64 / norm;
            let freq = k as f32 * bin_hz;

            if freq >= low && freq <= high {
                powers.voice += power;
            } else {
                powers.background += power;
            }
            if power > peak_power {
                peak_power = power;
                powers.peak_hz = freq;
            }
        }

        powers
    }

    /// Whether voice dominated the most recent `duration_seconds` of audio.
    ///
    /// Needs at least two blocks in the window and a voiced share of at
    /// least `sustained_voice_ratio`.
    pub fn is_sustained_voice(&self, duration_seconds: f64) -> bool {
        let mut covered = 0.0;
        let mut count = 0usize;
        let mut voiced = 0usize;

        for entry in self.history.iter().rev() {
            count += 1;
            if entry.voice {
                voiced += 1;
            }
            covered += entry.block_seconds;
            if covered >= duration_seconds {
                break;
            }
        }

        if count < 2 {
            return false;
        }
        voiced as f32 / count as f32 >= self.config.sustained_voice_ratio
    }

    pub fn statistics(&self) -> AudioStatistics {
        let voice_detection_rate = if self.blocks_analyzed > 0 {
            self.voice_detections as f32 / self.blocks_analyzed as f32 * 100.0
        } else {
            0.0
        };
        let average_energy_db = if self.history.is_empty() {
            -100.0
        } else {
            self.history.iter().map(|e| e.energy_db).sum::<f32>() / self.history.len() as f32
        };

        AudioStatistics {
            blocks_analyzed: self.blocks_analyzed,
            voice_detections: self.voice_detections,
            noise_detections: self.noise_detections,
            voice_detection_rate,
            average_energy_db,
            last_voice_at: self.last_voice_at,
        }
    }

    /// Entries currently held in the rolling history.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.blocks_analyzed = 0;
        self.voice_detections = 0;
        self.noise_detections = 0;
        self.last_voice_at = None;
    }
}

impl Default for SpectralEventDetector {
    fn default() -> Self {
        Self::new(SpectralConfig::default())
    }
}

#[derive(Debug, Default)]
struct BandPowers {
    voice: f64,
    background: f64,
    peak_hz: f32,
}
