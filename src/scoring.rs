mod attention;
mod pose;
mod status;

pub use attention::{
    AttentionScorer, AttentionState, ScoreBreakdown, ScoreEntry, ScoreOutcome, ScoreStatistics,
    ScorerConfig, Trend,
};
pub use pose::{
    FaceDistance, GazeCounts, GazeDirection, GazeStatistics, HeadPoseConfig, HeadPoseEstimator,
    PoseEstimate, PoseObservation,
};
pub use status::{Severity, StatusBand, StatusBands};
