//! Signal-fusion and temporal-tracking engine for exam attention monitoring.
//!
//! Per-frame object detections, face/pose observations and audio blocks are
//! fused into one 0-100 attention score with a deduplicated alert stream,
//! while a [`SessionRegistry`] keeps per-session history.

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod handoff;
pub mod integration;
pub mod scoring;
pub mod session;
pub mod tracker;

pub use audio::{AudioEvent, AudioMonitor, SpectralConfig, SpectralEventDetector};
pub use config::MonitorConfig;
pub use error::{ConfigError, SessionError, SignalError};
pub use integration::{
    Alert, AlertCategory, FrameFusionPipeline, FrameObservation, FusedResult, FusionConfig,
    MonitorWorker,
};
pub use scoring::{AttentionScorer, PoseObservation, ScorerConfig, Severity};
pub use session::{SessionId, SessionRecord, SessionRegistry, SessionStatus};
pub use tracker::{Detection, ObjectTracker, Rect, Track, TrackerConfig};
