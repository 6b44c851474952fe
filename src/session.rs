mod record;
mod registry;

pub use record::{
    AlertCounts, ScorePoint, SessionEvent, SessionEventKind, SessionId, SessionOwners,
    SessionRecord, SessionStatus, SessionSummary,
};
pub use registry::{RegistryConfig, RegistryStats, SessionRegistry};
