//! Aggregated engine configuration.
//!
//! Every section has defaults, so a JSON document only needs the fields it
//! overrides:
//!
//! ```json
//! { "tracker": { "confirmation_threshold": 3 }, "fusion": { "dedup_window_seconds": 5.0 } }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::{AudioMonitor, SpectralConfig};
use crate::error::ConfigError;
use crate::integration::{FrameFusionPipeline, FusionConfig, WorkerConfig};
use crate::scoring::{HeadPoseConfig, HeadPoseEstimator, ScorerConfig};
use crate::session::{RegistryConfig, SessionRegistry};
use crate::tracker::{DetectionFilterConfig, TrackerConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tracker: TrackerConfig,
    pub filter: DetectionFilterConfig,
    pub audio: SpectralConfig,
    pub scorer: ScorerConfig,
    pub pose: HeadPoseConfig,
    pub fusion: FusionConfig,
    pub registry: RegistryConfig,
    pub worker: WorkerConfig,
}

impl MonitorConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize with every field spelled out.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracker.validate()?;
        self.filter.validate()?;
        self.audio.validate()?;
        self.scorer.validate()?;
        self.pose.validate()?;
        self.fusion.validate()?;
        self.registry.validate()
    }

    /// Fresh pipeline for one session.
    pub fn build_pipeline(&self) -> FrameFusionPipeline {
        FrameFusionPipeline::with_components(
            self.fusion.clone(),
            self.filter.clone(),
            self.tracker.clone(),
            self.scorer.clone(),
        )
    }

    /// Registry on the system clock.
    pub fn build_registry(&self) -> SessionRegistry {
        SessionRegistry::new(self.registry.clone())
    }

    /// Audio monitor with the configured detector.
    pub fn build_audio_monitor(&self) -> AudioMonitor {
        AudioMonitor::new(self.audio.clone())
    }

    /// Pose estimator for the configured camera.
    pub fn build_pose_estimator(&self) -> HeadPoseEstimator {
        HeadPoseEstimator::new(self.pose.clone())
    }
}
