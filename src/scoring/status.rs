//! Score to status classification.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Ordered severity attached to statuses and alerts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Nominal,
    Minor,
    Major,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Severity::Nominal => "nominal",
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBand {
    /// Inclusive lower bound of the band
    pub min_score: f32,
    pub label: String,
    pub severity: Severity,
}

impl StatusBand {
    /// Create a band starting at `min_score`.
    pub fn new(min_score: f32, label: impl Into<String>, severity: Severity) -> Self {
        Self {
            min_score,
            label: label.into(),
            severity,
        }
    }
}

/// Breakpoints ordered from the highest band down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusBands(Vec<StatusBand>);

impl Default for StatusBands {
    fn default() -> Self {
        Self(vec![
            StatusBand::new(90.0, "Excellent Focus", Severity::Nominal),
            StatusBand::new(70.0, "Good Focus", Severity::Nominal),
            StatusBand::new(50.0, "Fair Focus", Severity::Minor),
            StatusBand::new(30.0, "Poor Focus", Severity::Major),
            StatusBand::new(0.0, "Critical", Severity::Critical),
        ])
    }
}

impl StatusBands {
    pub fn new(bands: Vec<StatusBand>) -> Result<Self, ConfigError> {
        let bands = Self(bands);
        bands.validate()?;
        Ok(bands)
    }

    /// Bands from highest to lowest threshold.
    pub fn bands(&self) -> &[StatusBand] {
        &self.0
    }

    /// Bands must strictly descend and the last one must cover 0, so every
    /// score in [0, 100] lands in exactly one band.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(last) = self.0.last() else {
            return Err(ConfigError::Invalid("status bands must not be empty".into()));
        };
        if self.0.iter().any(|b| !b.min_score.is_finite()) {
            return Err(ConfigError::Invalid("status band bounds must be finite".into()));
        }
        if self.0.windows(2).any(|w| w[0].min_score <= w[1].min_score) {
            return Err(ConfigError::Invalid(
                "status bands must be ordered by strictly decreasing min_score".into(),
            ));
        }
        if last.min_score > 0.0 {
            return Err(ConfigError::Invalid(
                "lowest status band must start at or below 0".into(),
            ));
        }
        if self.0.windows(2).any(|w| w[0].severity > w[1].severity) {
            return Err(ConfigError::Invalid(
                "status band severity must not decrease as the score drops".into(),
            ));
        }
        Ok(())
    }

    /// Band containing `score`. Scores below every bound fall into the lowest band.
    pub fn classify(&self, score: f32) -> Option<&StatusBand> {
        self.0
            .iter()
            .find(|band| score >= band.min_score)
            .or_else(|| self.0.last())
    }
}
