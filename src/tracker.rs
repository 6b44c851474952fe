mod filter;
mod matching;
mod object_tracker;
mod rect;
mod track;

pub use filter::{DetectionFilter, DetectionFilterConfig, Rejection, ShapePolicy};
pub use matching::{AssignmentResult, Detection, greedy_assignment};
pub use object_tracker::{ObjectTracker, TrackerConfig, TrackerStats};
pub use rect::{Rect, iou_batch};
pub use track::Track;
