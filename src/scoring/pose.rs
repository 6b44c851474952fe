//! Face/pose input to the scorer, and a bbox-based head-pose estimator for
//! detectors that only report face boxes.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tracker::Rect;

/// Where the candidate appears to be looking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeDirection {
    #[default]
    Forward,
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

impl GazeDirection {
    fn from_parts(up: bool, down: bool, left: bool, right: bool) -> Self {
        match (up, down, left, right) {
            (true, _, true, _) => Self::UpLeft,
            (true, _, _, true) => Self::UpRight,
            (true, _, _, _) => Self::Up,
            (_, true, true, _) => Self::DownLeft,
            (_, true, _, true) => Self::DownRight,
            (_, true, _, _) => Self::Down,
            (_, _, true, _) => Self::Left,
            (_, _, _, true) => Self::Right,
            _ => Self::Forward,
        }
    }
}

impl std::fmt::Display for GazeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Forward => "forward",
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
            Self::UpLeft => "up left",
            Self::UpRight => "up right",
            Self::DownLeft => "down left",
            Self::DownRight => "down right",
        };
        f.write_str(name)
    }
}

/// Per-direction frame counts for frames with a face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GazeCounts {
    pub forward: u64,
    pub up: u64,
    pub down: u64,
    pub left: u64,
    pub right: u64,
    /// Any of the four corner directions
    pub diagonal: u64,
}

impl GazeCounts {
    /// Count one frame looking in `direction`.
    pub fn record(&mut self, direction: GazeDirection) {
        let slot = match direction {
            GazeDirection::Forward => &mut self.forward,
            GazeDirection::Up => &mut self.up,
            GazeDirection::Down => &mut self.down,
            GazeDirection::Left => &mut self.left,
            GazeDirection::Right => &mut self.right,
            GazeDirection::UpLeft
            | GazeDirection::UpRight
            | GazeDirection::DownLeft
            | GazeDirection::DownRight => &mut self.diagonal,
        };
        *slot += 1;
    }

    /// Frames counted in any direction.
    pub fn total(&self) -> u64 {
        self.forward + self.up + self.down + self.left + self.right + self.diagonal
    }

    /// Share of frames per direction, all zero before the first frame.
    pub fn statistics(&self) -> GazeStatistics {
        let total = self.total();
        let pct = |n: u64| {
            if total == 0 {
                0.0
            } else {
                n as f32 / total as f32 * 100.0
            }
        };
        GazeStatistics {
            frames_analyzed: total,
            forward_percentage: pct(self.forward),
            up_percentage: pct(self.up),
            down_percentage: pct(self.down),
            left_percentage: pct(self.left),
            right_percentage: pct(self.right),
            diagonal_percentage: pct(self.diagonal),
        }
    }
}

/// Gaze direction distribution over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeStatistics {
    pub frames_analyzed: u64,
    pub forward_percentage: f32,
    pub up_percentage: f32,
    pub down_percentage: f32,
    pub left_percentage: f32,
    pub right_percentage: f32,
    pub diagonal_percentage: f32,
}

/// Per-frame output of the face/pose detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseObservation {
    pub face_present: bool,
    /// 0-100, 100 when looking straight at the camera
    pub attention_score: f32,
    pub person_count: u32,
    pub looking_away: bool,
    pub direction: GazeDirection,
}

impl PoseObservation {
    /// A single candidate facing the camera with the given attention.
    pub fn facing(attention_score: f32) -> Self {
        Self {
            face_present: true,
            attention_score,
            person_count: 1,
            looking_away: false,
            direction: GazeDirection::Forward,
        }
    }

    /// Nobody in frame.
    pub fn absent() -> Self {
        Self {
            face_present: false,
            attention_score: 0.0,
            person_count: 0,
            looking_away: false,
            direction: GazeDirection::Forward,
        }
    }

    /// Set the number of faces seen.
    pub fn with_person_count(mut self, person_count: u32) -> Self {
        self.person_count = person_count;
        self
    }

    pub fn looking(mut self, direction: GazeDirection) -> Self {
        self.looking_away = direction != GazeDirection::Forward;
        self.direction = direction;
        self
    }

    /// Whether the attention value can be used as a score base.
    pub fn is_valid(&self) -> bool {
        self.attention_score.is_finite()
    }
}

impl Default for PoseObservation {
    fn default() -> Self {
        Self::absent()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceDistance {
    Close,
    Normal,
    Far,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadPoseConfig {
    pub frame_width: f32,
    pub frame_height: f32,
    /// Normalised horizontal offset beyond which the candidate looks sideways
    pub horizontal_threshold: f32,
    pub vertical_threshold: f32,
    /// Camera preview is mirrored: a face drifting to the right of the image
    /// means the candidate turned to their left.
    pub mirrored: bool,
    /// Face area share under which the face counts as far away
    pub far_face_ratio: f32,
    /// Face area share over which the face counts as close
    pub close_face_ratio: f32,
    pub far_factor: f32,
    pub close_factor: f32,
}

impl Default for HeadPoseConfig {
    fn default() -> Self {
        Self {
            frame_width: 640.0,
            frame_height: 480.0,
            horizontal_threshold: 0.15,
            vertical_threshold: 0.15,
            mirrored: true,
            far_face_ratio: 0.05,
            close_face_ratio: 0.15,
            far_factor: 0.7,
            close_factor: 1.1,
        }
    }
}

impl HeadPoseConfig {
    /// Check frame size and thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frame_width > 0.0 && self.frame_height > 0.0) {
            return Err(ConfigError::Invalid(
                "pose.frame_width and pose.frame_height must be positive".into(),
            ));
        }
        if !(self.horizontal_threshold > 0.0 && self.vertical_threshold > 0.0) {
            return Err(ConfigError::Invalid("pose thresholds must be positive".into()));
        }
        if self.far_face_ratio >= self.close_face_ratio {
            return Err(ConfigError::Invalid(
                "pose.far_face_ratio must be below pose.close_face_ratio".into(),
            ));
        }
        Ok(())
    }
}

/// Geometry derived from the primary face box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    /// Horizontal rotation in [-1, 1], positive towards the candidate's right
    pub yaw: f32,
    /// Vertical tilt in [-1, 1], positive up
    pub pitch: f32,
    /// Face area as a share of the frame
    pub face_size: f32,
    pub distance: FaceDistance,
    pub looking_away: bool,
    pub direction: GazeDirection,
    pub attention_score: f32,
}

pub struct HeadPoseEstimator {
    config: HeadPoseConfig,
}

impl HeadPoseEstimator {
    /// Create an estimator for one camera geometry.
    pub fn new(config: HeadPoseConfig) -> Self {
        Self { config }
    }

    /// Get a reference to the estimator configuration.
    pub fn config(&self) -> &HeadPoseConfig {
        &self.config
    }

    /// Pose from every face box in the frame. The largest valid box is taken
    /// as the candidate; the count of valid boxes is the person count.
    pub fn observe(&self, faces: &[Rect]) -> PoseObservation {
        let valid: Vec<&Rect> = faces.iter().filter(|f| f.is_valid()).collect();
        let primary = valid
            .iter()
            .copied()
            .max_by(|a, b| a.area().total_cmp(&b.area()));

        let Some(primary) = primary else {
            return PoseObservation::absent();
        };

        let estimate = self.estimate(primary);
        PoseObservation {
            face_present: true,
            attention_score: estimate.attention_score,
            person_count: valid.len() as u32,
            looking_away: estimate.looking_away,
            direction: estimate.direction,
        }
    }

    pub fn estimate(&self, face: &Rect) -> PoseEstimate {
        let cfg = &self.config;
        let (cx, cy) = face.center();
        let offset_x = (cx - cfg.frame_width / 2.0) / (cfg.frame_width / 2.0);
        let offset_y = (cy - cfg.frame_height / 2.0) / (cfg.frame_height / 2.0);

        // Image y grows downwards
        let pitch = -offset_y;
        let yaw = if cfg.mirrored { -offset_x } else { offset_x };

        let face_size = face.area() / (cfg.frame_width * cfg.frame_height);
        let distance = if face_size > cfg.close_face_ratio {
            FaceDistance::Close
        } else if face_size > cfg.far_face_ratio {
            FaceDistance::Normal
        } else {
            FaceDistance::Far
        };

        let right = yaw > cfg.horizontal_threshold;
        let left = yaw < -cfg.horizontal_threshold;
        let up = pitch > cfg.vertical_threshold;
        let down = pitch < -cfg.vertical_threshold;
        let direction = GazeDirection::from_parts(up, down, left, right);

        let magnitude = offset_x.hypot(offset_y);
        let mut attention_score = (1.0 - magnitude / 0.5).max(0.0) * 100.0;
        attention_score = match distance {
            FaceDistance::Far => attention_score * cfg.far_factor,
            FaceDistance::Close => (attention_score * cfg.close_factor).min(100.0),
            FaceDistance::Normal => attention_score,
        };

        PoseEstimate {
            yaw,
            pitch,
            face_size,
            distance,
            looking_away: direction != GazeDirection::Forward,
            direction,
            attention_score,
        }
    }
}

impl Default for HeadPoseEstimator {
    fn default() -> Self {
        Self::new(HeadPoseConfig::default())
    }
}
