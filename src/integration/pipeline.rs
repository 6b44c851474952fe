//! FrameFusionPipeline: one fused result per processed frame.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::audio::AudioEvent;
use crate::clock::elapsed_seconds;
use crate::error::{Component, ConfigError, SignalError};
use crate::integration::alerts::{Alert, AlertCategory, AlertDebouncer};
use crate::scoring::{
    AttentionScorer, GazeCounts, GazeStatistics, PoseObservation, ScoreBreakdown, ScorerConfig,
    Severity,
};
use crate::tracker::{
    Detection, DetectionFilter, DetectionFilterConfig, ObjectTracker, Track, TrackerConfig,
};

/// Configuration for cross-signal fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Alerts of one category are emitted at most once per window
    pub dedup_window_seconds: f64,
    /// Audio events older than this relative to the frame are ignored
    pub audio_max_age_seconds: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            dedup_window_seconds: 3.0,
            audio_max_age_seconds: 2.0,
        }
    }
}

impl FusionConfig {
    /// Check windows are finite and non-negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.dedup_window_seconds.is_finite() && self.dedup_window_seconds >= 0.0) {
            return Err(ConfigError::Invalid(
                "fusion.dedup_window_seconds must be finite and non-negative".into(),
            ));
        }
        if !(self.audio_max_age_seconds.is_finite() && self.audio_max_age_seconds >= 0.0) {
            return Err(ConfigError::Invalid(
                "fusion.audio_max_age_seconds must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Everything known about one captured frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub pose: PoseObservation,
    /// Raw detector output; empty on frames the detector skipped
    pub detections: Vec<Detection>,
    /// Most recent audio event, if any
    pub audio: Option<AudioEvent>,
}

impl FrameObservation {
    /// Frame with a pose and no detections or audio.
    pub fn new(frame_index: u64, timestamp: DateTime<Utc>, pose: PoseObservation) -> Self {
        Self {
            frame_index,
            timestamp,
            pose,
            detections: Vec::new(),
            audio: None,
        }
    }

    /// Attach raw detector output.
    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }

    /// Attach the latest audio event.
    pub fn with_audio(mut self, audio: Option<AudioEvent>) -> Self {
        self.audio = audio;
        self
    }
}

/// Fused output for one frame. Always populated, score always in [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
    pub score: f32,
    pub status_label: String,
    pub status_severity: Severity,
    /// Priority ordered and debounced
    pub alerts: Vec<Alert>,
    pub person_count: u32,
    pub confirmed_objects: Vec<Track>,
    pub breakdown: ScoreBreakdown,
    /// Some component fell back to a substitute value this frame
    pub degraded: bool,
}

impl FusedResult {
    /// Alert messages in priority order.
    pub fn alert_messages(&self) -> Vec<&str> {
        self.alerts.iter().map(|a| a.message.as_str()).collect()
    }
}

/// Per-component count of frames that fell back to substitute values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedCounters {
    pub tracker: u64,
    pub scorer: u64,
    pub pose: u64,
    pub audio: u64,
}

impl DegradedCounters {
    /// Count one degraded frame for `component`.
    pub fn record(&mut self, component: Component) {
        match component {
            Component::Tracker => self.tracker += 1,
            Component::Scorer => self.scorer += 1,
            Component::Pose => self.pose += 1,
            Component::Audio => self.audio += 1,
        }
    }

    /// Degraded frames counted for `component`.
    pub fn get(&self, component: Component) -> u64 {
        match component {
            Component::Tracker => self.tracker,
            Component::Scorer => self.scorer,
            Component::Pose => self.pose,
            Component::Audio => self.audio,
        }
    }

    /// Degraded frames across all components.
    pub fn total(&self) -> u64 {
        self.tracker + self.scorer + self.pose + self.audio
    }
}

/// Throughput over the frames seen so far, timed by frame timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    /// Span between the first and latest processed frame
    pub elapsed_seconds: f64,
    /// Frame intervals per second over that span, 0 until two frames exist
    pub average_fps: f64,
    pub degraded: DegradedCounters,
}

/// Per-frame orchestrator over the filter, tracker, scorer and audio input.
///
/// Owned by one monitoring loop. `process` never fails and never blocks;
/// component failures are counted in [`DegradedCounters`] instead.
pub struct FrameFusionPipeline {
    config: FusionConfig,
    filter: DetectionFilter,
    tracker: ObjectTracker,
    scorer: AttentionScorer,
    debouncer: AlertDebouncer,
    last_frame_index: Option<u64>,
    last_confirmed: Vec<Track>,
    last_good_score: Option<f32>,
    degraded: DegradedCounters,
    frames_processed: u64,
    gaze: GazeCounts,
    first_frame_at: Option<DateTime<Utc>>,
    last_frame_at: Option<DateTime<Utc>>,
}

impl FrameFusionPipeline {
    /// Pipeline with default component configuration.
    pub fn new(config: FusionConfig) -> Self {
        Self::with_components(
            config,
            DetectionFilterConfig::default(),
            TrackerConfig::default(),
            ScorerConfig::default(),
        )
    }

    /// Pipeline with explicit component configuration.
    pub fn with_components(
        config: FusionConfig,
        filter: DetectionFilterConfig,
        tracker: TrackerConfig,
        scorer: ScorerConfig,
    ) -> Self {
        Self {
            debouncer: AlertDebouncer::new(config.dedup_window_seconds),
            config,
            filter: DetectionFilter::new(filter),
            tracker: ObjectTracker::new(tracker),
            scorer: AttentionScorer::new(scorer),
            last_frame_index: None,
            last_confirmed: Vec::new(),
            last_good_score: None,
            degraded: DegradedCounters::default(),
            frames_processed: 0,
            gaze: GazeCounts::default(),
            first_frame_at: None,
            last_frame_at: None,
        }
    }

    pub fn process(&mut self, frame: FrameObservation) -> FusedResult {
        let FrameObservation {
            frame_index,
            timestamp: now,
            pose,
            detections,
            audio,
        } = frame;
        let mut degraded = false;

        let pose = if pose.is_valid() {
            pose
        } else {
            self.record(SignalError::degraded(
                Component::Pose,
                format!("attention score {} is not finite", pose.attention_score),
            ));
            degraded = true;
            PoseObservation {
                attention_score: self.scorer.config().fallback_score,
                ..pose
            }
        };

        let confirmed = match self.advance_tracker(frame_index, &detections, now) {
            Ok(confirmed) => confirmed,
            Err(err) => {
                self.record(err);
                degraded = true;
                self.last_confirmed.clone()
            }
        };

        let scorer = &mut self.scorer;
        let scored = panic::catch_unwind(AssertUnwindSafe(|| {
            scorer.score(
                pose.attention_score,
                pose.face_present,
                &confirmed,
                pose.person_count,
                now,
            )
        }));

        let (score, status_label, status_severity, breakdown, mut alerts) = match scored {
            Ok(outcome) => {
                self.last_good_score = Some(outcome.score);
                (
                    outcome.score,
                    outcome.status_label,
                    outcome.severity,
                    outcome.breakdown,
                    outcome.alerts,
                )
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(frame_index, %reason, "scorer panicked");
                self.record(SignalError::degraded(Component::Scorer, reason));
                degraded = true;

                let score = self
                    .last_good_score
                    .unwrap_or(self.scorer.config().fallback_score);
                let (label, severity) = match self.scorer.config().status_bands.classify(score) {
                    Some(band) => (band.label.clone(), band.severity),
                    None => (String::new(), Severity::Nominal),
                };
                (score, label, severity, ScoreBreakdown::default(), Vec::new())
            }
        };

        if pose.face_present {
            self.gaze.record(pose.direction);
        }
        if pose.face_present && pose.looking_away {
            alerts.push(Alert::new(
                AlertCategory::Pose,
                Severity::Minor,
                format!("Looking {}", pose.direction),
            ));
        }

        if let Some(event) = audio {
            match self.audio_alert(&event, now) {
                Ok(Some(alert)) => alerts.push(alert),
                Ok(None) => {}
                Err(err) => {
                    self.record(err);
                    degraded = true;
                }
            }
        }

        let alerts = self.debouncer.filter(alerts, now);
        self.frames_processed += 1;
        if self.first_frame_at.is_none() {
            self.first_frame_at = Some(now);
        }
        self.last_frame_at = Some(now);

        debug!(
            frame_index,
            score,
            status = %status_label,
            alerts = alerts.len(),
            confirmed = confirmed.len(),
            degraded,
            "frame fused"
        );

        FusedResult {
            frame_index,
            timestamp: now,
            score,
            status_label,
            status_severity,
            alerts,
            person_count: pose.person_count,
            confirmed_objects: confirmed,
            breakdown,
            degraded,
        }
    }

    /// Run the filter and tracker for one frame. Out-of-order frames and
    /// tracker panics leave the previous confirmed snapshot in place.
    fn advance_tracker(
        &mut self,
        frame_index: u64,
        detections: &[Detection],
        now: DateTime<Utc>,
    ) -> Result<Vec<Track>, SignalError> {
        if let Some(last) = self.last_frame_index.filter(|&last| frame_index <= last) {
            return Err(SignalError::degraded(
                Component::Tracker,
                format!("frame {frame_index} is not after frame {last}"),
            ));
        }
        self.last_frame_index = Some(frame_index);

        let filtered = self.filter.apply(detections);
        let tracker = &mut self.tracker;
        match panic::catch_unwind(AssertUnwindSafe(|| tracker.update_at(&filtered, now))) {
            Ok(confirmed) => {
                self.last_confirmed = confirmed.clone();
                Ok(confirmed)
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(frame_index, %reason, "tracker panicked, dropping its tracks");
                // Keeps the id counter so ids stay unique after recovery
                self.tracker.reset();
                Err(SignalError::degraded(Component::Tracker, reason))
            }
        }
    }

    fn audio_alert(
        &self,
        event: &AudioEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, SignalError> {
        if !(event.energy_db.is_finite() && event.anomaly_score.is_finite()) {
            return Err(SignalError::degraded(
                Component::Audio,
                "audio event carries non-finite values",
            ));
        }
        if elapsed_seconds(event.timestamp, now) > self.config.audio_max_age_seconds {
            return Ok(None);
        }

        let alert = if event.voice_detected {
            Some(Alert::new(
                AlertCategory::Audio,
                Severity::Major,
                format!("Voice detected (score: {:.0}/100)", event.anomaly_score),
            ))
        } else if event.noise_detected {
            Some(Alert::new(
                AlertCategory::Audio,
                Severity::Minor,
                format!("Background noise detected ({:.1} dB)", event.energy_db),
            ))
        } else {
            None
        };
        Ok(alert)
    }

    fn record(&mut self, err: SignalError) {
        warn!(component = %err.component(), error = %err, "degraded signal");
        self.degraded.record(err.component());
    }

    /// Get a reference to the fusion configuration.
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Get a reference to the object tracker.
    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    /// Get a reference to the attention scorer.
    pub fn scorer(&self) -> &AttentionScorer {
        &self.scorer
    }

    /// Get a reference to the detection filter.
    pub fn filter(&self) -> &DetectionFilter {
        &self.filter
    }

    /// Side-channel failure counters.
    pub fn degraded(&self) -> DegradedCounters {
        self.degraded
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Gaze direction distribution over frames with a face.
    pub fn gaze_statistics(&self) -> GazeStatistics {
        self.gaze.statistics()
    }

    /// Raw per-direction frame counts.
    pub fn gaze_counts(&self) -> GazeCounts {
        self.gaze
    }

    /// Frame count, covered time span and frame rate.
    pub fn stats(&self) -> PipelineStats {
        let elapsed_seconds = match (self.first_frame_at, self.last_frame_at) {
            (Some(first), Some(last)) => elapsed_seconds(first, last).max(0.0),
            _ => 0.0,
        };
        let average_fps = if elapsed_seconds > 0.0 {
            self.frames_processed.saturating_sub(1) as f64 / elapsed_seconds
        } else {
            0.0
        };
        PipelineStats {
            frames_processed: self.frames_processed,
            elapsed_seconds,
            average_fps,
            degraded: self.degraded,
        }
    }

    /// Alerts dropped by debouncing so far.
    pub fn suppressed_alerts(&self) -> u64 {
        self.debouncer.suppressed()
    }

    /// Clear all per-session state. Track ids keep increasing.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.scorer.reset();
        self.debouncer.reset();
        self.last_frame_index = None;
        self.last_confirmed.clear();
        self.last_good_score = None;
        self.degraded = DegradedCounters::default();
        self.frames_processed = 0;
        self.gaze = GazeCounts::default();
        self.first_frame_at = None;
        self.last_frame_at = None;
    }
}

impl Default for FrameFusionPipeline {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 24, 9, 0, 0).unwrap()
    }

    fn phone() -> Detection {
        Detection::new(200.0, 150.0, 290.0, 300.0, "cell phone", 0.8)
    }

    fn frame(index: u64, pose: PoseObservation) -> FrameObservation {
        FrameObservation::new(index, t0() + Duration::milliseconds(100 * index as i64), pose)
    }

    #[test]
    fn test_clean_frame() {
        let mut pipeline = FrameFusionPipeline::default();
        let result = pipeline.process(frame(1, PoseObservation::facing(95.0)));
        assert_eq!(result.score, 95.0);
        assert_eq!(result.status_label, "Excellent Focus");
        assert!(result.alerts.is_empty());
        assert!(!result.degraded);
        assert_eq!(pipeline.frames_processed(), 1);
    }

    #[test]
    fn test_single_frame_detection_does_not_penalise() {
        let mut pipeline = FrameFusionPipeline::default();
        let result =
            pipeline.process(frame(1, PoseObservation::facing(90.0)).with_detections(vec![phone()]));
        assert_eq!(result.score, 90.0);
        assert!(result.confirmed_objects.is_empty());

        let result =
            pipeline.process(frame(2, PoseObservation::facing(90.0)).with_detections(vec![phone()]));
        assert_eq!(result.score, 60.0);
        assert_eq!(result.confirmed_objects.len(), 1);
        assert_eq!(result.alerts[0].category, AlertCategory::Device);
    }

    #[test]
    fn test_filtered_detections_never_reach_tracker() {
        let mut pipeline = FrameFusionPipeline::default();
        let teddy = Detection::new(0.0, 0.0, 100.0, 100.0, "teddy bear", 0.99);
        for i in 1..=3 {
            pipeline.process(frame(i, PoseObservation::facing(90.0)).with_detections(vec![teddy.clone()]));
        }
        assert!(pipeline.tracker().tracks().is_empty());
    }

    #[test]
    fn test_out_of_order_frame_is_degraded() {
        let mut pipeline = FrameFusionPipeline::default();
        pipeline.process(frame(5, PoseObservation::facing(90.0)));
        let result = pipeline.process(frame(5, PoseObservation::facing(90.0)));
        assert!(result.degraded);
        assert_eq!(pipeline.degraded().tracker, 1);
        assert_eq!(pipeline.tracker().frame_count(), 1);
    }

    #[test]
    fn test_invalid_pose_uses_neutral_score() {
        let mut pipeline = FrameFusionPipeline::default();
        let result = pipeline.process(frame(1, PoseObservation::facing(f32::NAN)));
        assert!(result.degraded);
        assert_eq!(result.score, 50.0);
        assert_eq!(pipeline.degraded().pose, 1);
    }

    #[test]
    fn test_voice_event_becomes_major_audio_alert() {
        let mut pipeline = FrameFusionPipeline::default();
        let f = frame(1, PoseObservation::facing(90.0));
        let event = AudioEvent {
            voice_detected: true,
            anomaly_score: 72.0,
            ..AudioEvent::silent(f.timestamp, -20.0)
        };
        let result = pipeline.process(f.with_audio(Some(event)));
        assert_eq!(result.alerts.len(), 1);
        assert_eq!(result.alerts[0].severity, Severity::Major);
        assert_eq!(result.alerts[0].message, "Voice detected (score: 72/100)");
        // Audio does not change the score
        assert_eq!(result.score, 90.0);
    }

    #[test]
    fn test_stale_audio_is_ignored() {
        let mut pipeline = FrameFusionPipeline::default();
        let f = frame(1, PoseObservation::facing(90.0));
        let event = AudioEvent {
            noise_detected: true,
            ..AudioEvent::silent(f.timestamp - Duration::seconds(10), -20.0)
        };
        let result = pipeline.process(f.with_audio(Some(event)));
        assert!(result.alerts.is_empty());
    }

    #[test]
    fn test_looking_direction_alert() {
        use crate::scoring::GazeDirection;

        let mut pipeline = FrameFusionPipeline::default();
        let pose = PoseObservation::facing(60.0).looking(GazeDirection::Left);
        let result = pipeline.process(frame(1, pose));
        assert_eq!(result.alert_messages(), vec!["Looking left"]);
        assert_eq!(result.alerts[0].severity, Severity::Minor);
    }

    #[test]
    fn test_alerts_are_priority_ordered() {
        let mut pipeline = FrameFusionPipeline::new(FusionConfig::default());
        let f = frame(1, PoseObservation::facing(90.0).with_person_count(2));
        let event = AudioEvent {
            noise_detected: true,
            ..AudioEvent::silent(f.timestamp, -20.0)
        };
        let result = pipeline.process(f.with_audio(Some(event)));
        let categories: Vec<AlertCategory> = result.alerts.iter().map(|a| a.category).collect();
        assert_eq!(categories, vec![AlertCategory::Person, AlertCategory::Audio]);
    }

    #[test]
    fn test_gaze_statistics_skip_frames_without_face() {
        use crate::scoring::GazeDirection;

        let mut pipeline = FrameFusionPipeline::default();
        let poses = [
            PoseObservation::facing(90.0),
            PoseObservation::facing(90.0),
            PoseObservation::facing(70.0).looking(GazeDirection::Right),
            PoseObservation::absent(),
        ];
        for (i, pose) in poses.into_iter().enumerate() {
            pipeline.process(frame(i as u64 + 1, pose));
        }

        let gaze = pipeline.gaze_statistics();
        assert_eq!(gaze.frames_analyzed, 3);
        assert!((gaze.forward_percentage - 200.0 / 3.0).abs() < 1e-3);
        assert!((gaze.right_percentage - 100.0 / 3.0).abs() < 1e-3);
        assert_eq!(gaze.left_percentage, 0.0);

        pipeline.reset();
        assert_eq!(pipeline.gaze_statistics().frames_analyzed, 0);
    }

    #[test]
    fn test_stats_report_frame_rate_from_timestamps() {
        let mut pipeline = FrameFusionPipeline::default();
        assert_eq!(pipeline.stats().average_fps, 0.0);

        // 11 frames 100 ms apart
        for i in 0..=10 {
            pipeline.process(frame(i, PoseObservation::facing(90.0)));
        }
        let stats = pipeline.stats();
        assert_eq!(stats.frames_processed, 11);
        assert!((stats.elapsed_seconds - 1.0).abs() < 1e-9);
        assert!((stats.average_fps - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_audio_is_degraded() {
        let mut pipeline = FrameFusionPipeline::default();
        let f = frame(1, PoseObservation::facing(85.0));
        let event = AudioEvent {
            energy_db: f32::NAN,
            voice_detected: true,
            ..AudioEvent::silent(f.timestamp, -20.0)
        };
        let result = pipeline.process(f.with_audio(Some(event)));

        assert!(result.degraded);
        assert!(result.alerts.is_empty());
        assert_eq!(result.score, 85.0);
        assert_eq!(pipeline.degraded().audio, 1);
        assert_eq!(pipeline.degraded().total(), 1);
    }
}
