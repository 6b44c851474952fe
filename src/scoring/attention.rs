//! Attention scoring with device, multi-person and looking-away penalties.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::elapsed_seconds;
use crate::error::ConfigError;
use crate::integration::{Alert, AlertCategory};
use crate::scoring::status::{Severity, StatusBands};
use crate::tracker::Track;

/// Configuration for the AttentionScorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Points removed per confirmed prohibited object
    pub device_penalty_per_item: f32,
    /// Points removed when more than one person is in frame
    pub multi_person_penalty: f32,
    /// Ceiling on the base score while more than one person is in frame
    pub multi_person_baseline: f32,
    /// Seconds without a face before the temporal penalty starts
    pub looking_away_grace_seconds: f64,
    /// Points per second beyond the grace period
    pub temporal_penalty_rate: f32,
    /// Maximum entries kept in the score history
    pub history_capacity: usize,
    /// Difference between half-history means needed to call a trend
    pub trend_margin: f32,
    /// History must be longer than this before a trend is reported
    pub trend_min_samples: usize,
    /// Scores at or above this count as good focus
    pub good_focus_threshold: f32,
    /// Neutral score used when the base score is unusable
    pub fallback_score: f32,
    pub status_bands: StatusBands,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            device_penalty_per_item: 30.0,
            multi_person_penalty: 50.0,
            multi_person_baseline: 70.0,
            looking_away_grace_seconds: 3.0,
            temporal_penalty_rate: 5.0,
            history_capacity: 1000,
            trend_margin: 5.0,
            trend_min_samples: 20,
            good_focus_threshold: 70.0,
            fallback_score: 50.0,
            status_bands: StatusBands::default(),
        }
    }
}

impl ScorerConfig {
    /// Check penalties, ranges and status bands.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("device_penalty_per_item", self.device_penalty_per_item),
            ("multi_person_penalty", self.multi_person_penalty),
            ("temporal_penalty_rate", self.temporal_penalty_rate),
            ("trend_margin", self.trend_margin),
        ];
        if let Some((name, _)) = non_negative.iter().find(|(_, v)| !(v.is_finite() && *v >= 0.0)) {
            return Err(ConfigError::Invalid(format!(
                "scorer.{name} must be finite and non-negative"
            )));
        }
        if !(self.looking_away_grace_seconds.is_finite() && self.looking_away_grace_seconds >= 0.0) {
            return Err(ConfigError::Invalid(
                "scorer.looking_away_grace_seconds must be finite and non-negative".into(),
            ));
        }
        let in_range = |v: f32| (0.0..=100.0).contains(&v);
        if !in_range(self.fallback_score) || !in_range(self.multi_person_baseline) {
            return Err(ConfigError::Invalid(
                "scorer.fallback_score and scorer.multi_person_baseline must be in [0, 100]".into(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "scorer.history_capacity must be at least 1".into(),
            ));
        }
        self.status_bands.validate()
    }
}

/// Individual contributions to one frame's score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Base score actually used after fallback and multi-person substitution
    pub base_score: f32,
    pub device_penalty: f32,
    pub person_penalty: f32,
    pub temporal_penalty: f32,
    /// Length of the current looking-away episode
    pub away_seconds: f64,
}

impl ScoreBreakdown {
    /// Sum of all penalties applied this frame.
    pub fn total_penalty(&self) -> f32 {
        self.device_penalty + self.person_penalty + self.temporal_penalty
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub timestamp: DateTime<Utc>,
    pub score: f32,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub score: f32,
    pub breakdown: ScoreBreakdown,
    pub status_label: String,
    pub severity: Severity,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    #[default]
    InsufficientData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreStatistics {
    pub samples: usize,
    pub average_score: f32,
    pub min_score: f32,
    pub max_score: f32,
    pub trend: Trend,
    pub total_device_penalty: f32,
    pub total_person_penalty: f32,
    pub total_temporal_penalty: f32,
    pub total_penalties: f32,
    /// Share of history entries at or above the good-focus threshold
    pub focus_time_percentage: f32,
    pub cumulative_away_seconds: f64,
    pub device_alert_count: u64,
}

/// Mutable state behind one scoring context.
#[derive(Debug, Clone, Default)]
pub struct AttentionState {
    /// Set while the face is absent, cleared on the frame it returns
    pub looking_away_since: Option<DateTime<Utc>>,
    /// Sum of completed looking-away episodes. Never decreases.
    pub cumulative_away_seconds: f64,
    pub score_history: VecDeque<ScoreEntry>,
    pub device_alert_count: u64,
}

/// Fuses pose, tracked objects and face presence into one 0-100 score.
///
/// Not thread-safe: owned by one pipeline.
pub struct AttentionScorer {
    config: ScorerConfig,
    state: AttentionState,
}

impl AttentionScorer {
    /// Create a scorer with empty state.
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            state: AttentionState {
                score_history: VecDeque::with_capacity(config.history_capacity.min(1024)),
                ..AttentionState::default()
            },
            config,
        }
    }

    /// Get a reference to the scorer configuration.
    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Get a reference to the current scoring state.
    pub fn state(&self) -> &AttentionState {
        &self.state
    }

    /// Score one frame. The result is always finite and within [0, 100].
    pub fn score(
        &mut self,
        base_pose_score: f32,
        face_present: bool,
        confirmed_objects: &[Track],
        person_count: u32,
        now: DateTime<Utc>,
    ) -> ScoreOutcome {
        let cfg = &self.config;
        let mut alerts = Vec::new();
        let mut breakdown = ScoreBreakdown::default();

        let mut base = if base_pose_score.is_finite() {
            base_pose_score
        } else {
            warn!(base_pose_score, "unusable base score, using fallback");
            cfg.fallback_score
        };

        if !confirmed_objects.is_empty() {
            breakdown.device_penalty = confirmed_objects.len() as f32 * cfg.device_penalty_per_item;

            let mut labels: Vec<&str> = Vec::new();
            for track in confirmed_objects {
                if !labels.contains(&track.class_label.as_str()) {
                    labels.push(&track.class_label);
                }
            }
            alerts.push(Alert::new(
                AlertCategory::Device,
                Severity::Critical,
                format!(
                    "{} device(s) detected: {}",
                    confirmed_objects.len(),
                    labels.join(", ")
                ),
            ));
            self.state.device_alert_count += 1;
        }

        if person_count > 1 {
            base = base.min(cfg.multi_person_baseline);
            breakdown.person_penalty = cfg.multi_person_penalty;
            alerts.push(Alert::new(
                AlertCategory::Person,
                Severity::Critical,
                format!("Multiple people detected ({person_count} people)"),
            ));
        }

        if face_present {
            if let Some(since) = self.state.looking_away_since.take() {
                let away = elapsed_seconds(since, now).max(0.0);
                self.state.cumulative_away_seconds += away;
                debug!(away_seconds = away, "face returned");
            }
        } else {
            let since = *self.state.looking_away_since.get_or_insert(now);
            let away = elapsed_seconds(since, now).max(0.0);
            breakdown.away_seconds = away;
            if away > cfg.looking_away_grace_seconds {
                let excess = (away - cfg.looking_away_grace_seconds) as f32;
                breakdown.temporal_penalty = cfg.temporal_penalty_rate * excess;
                alerts.push(Alert::new(
                    AlertCategory::Pose,
                    Severity::Major,
                    format!("Looking away for {away:.1}s"),
                ));
            }
        }

        breakdown.base_score = base;
        let raw = base - breakdown.total_penalty();
        let score = if raw.is_nan() { cfg.fallback_score } else { raw }.clamp(0.0, 100.0);

        let (status_label, severity) = match cfg.status_bands.classify(score) {
            Some(band) => (band.label.clone(), band.severity),
            None => (String::new(), Severity::Nominal),
        };

        if self.state.score_history.len() >= cfg.history_capacity {
            self.state.score_history.pop_front();
        }
        self.state.score_history.push_back(ScoreEntry {
            timestamp: now,
            score,
            breakdown,
        });

        ScoreOutcome {
            score,
            breakdown,
            status_label,
            severity,
            alerts,
        }
    }

    /// Seconds spent away so far, including an episode still in progress.
    pub fn away_seconds(&self, now: DateTime<Utc>) -> f64 {
        let ongoing = self
            .state
            .looking_away_since
            .map(|since| elapsed_seconds(since, now).max(0.0))
            .unwrap_or(0.0);
        self.state.cumulative_away_seconds + ongoing
    }

    /// Summary over the score history.
    pub fn get_statistics(&self) -> ScoreStatistics {
        let history = &self.state.score_history;
        if history.is_empty() {
            return ScoreStatistics {
                cumulative_away_seconds: self.state.cumulative_away_seconds,
                device_alert_count: self.state.device_alert_count,
                ..ScoreStatistics::default()
            };
        }

        let n = history.len();
        let scores: Vec<f32> = history.iter().map(|e| e.score).collect();
        let mean = |s: &[f32]| s.iter().sum::<f32>() / s.len() as f32;

        let trend = if n > self.config.trend_min_samples {
            let half = n / 2;
            let previous = mean(&scores[..half]);
            let recent = mean(&scores[n - half..]);
            if recent > previous + self.config.trend_margin {
                Trend::Improving
            } else if recent < previous - self.config.trend_margin {
                Trend::Declining
            } else {
                Trend::Stable
            }
        } else {
            Trend::InsufficientData
        };

        let total_device_penalty = history.iter().map(|e| e.breakdown.device_penalty).sum::<f32>();
        let total_person_penalty = history.iter().map(|e| e.breakdown.person_penalty).sum::<f32>();
        let total_temporal_penalty =
            history.iter().map(|e| e.breakdown.temporal_penalty).sum::<f32>();
        let good = scores
            .iter()
            .filter(|&&s| s >= self.config.good_focus_threshold)
            .count();

        ScoreStatistics {
            samples: n,
            average_score: mean(&scores),
            min_score: scores.iter().copied().fold(f32::INFINITY, f32::min),
            max_score: scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            trend,
            total_device_penalty,
            total_person_penalty,
            total_temporal_penalty,
            total_penalties: total_device_penalty + total_person_penalty + total_temporal_penalty,
            focus_time_percentage: good as f32 / n as f32 * 100.0,
            cumulative_away_seconds: self.state.cumulative_away_seconds,
            device_alert_count: self.state.device_alert_count,
        }
    }

    /// Most recent score, if any frame was scored.
    pub fn last_score(&self) -> Option<f32> {
        self.state.score_history.back().map(|e| e.score)
    }

    /// Forget history, timers and counters.
    pub fn reset(&mut self) {
        self.state = AttentionState::default();
    }
}

impl Default for AttentionScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}
