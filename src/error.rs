//! Error types shared across the engine.

use thiserror::Error;

use crate::session::{SessionId, SessionStatus};

/// Session lifecycle violations surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("cannot {operation} session {id} while it is {status}")]
    InvalidState {
        id: SessionId,
        status: SessionStatus,
        operation: &'static str,
    },

    #[error("maximum concurrent sessions ({max}) reached")]
    CapacityExceeded { max: usize },
}

/// Configuration that cannot be used as-is.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Component of the fusion pipeline that may fail to produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Component {
    Tracker,
    Scorer,
    Pose,
    Audio,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Component::Tracker => "tracker",
            Component::Scorer => "scorer",
            Component::Pose => "pose",
            Component::Audio => "audio",
        };
        f.write_str(name)
    }
}

/// A sub-component failed for one frame. Never returned from
/// [`FrameFusionPipeline::process`](crate::FrameFusionPipeline::process);
/// recorded on the pipeline's degraded counters instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("degraded {component} signal: {reason}")]
    Degraded { component: Component, reason: String },
}

impl SignalError {
    pub fn degraded(component: Component, reason: impl Into<String>) -> Self {
        Self::Degraded {
            component,
            reason: reason.into(),
        }
    }

    pub fn component(&self) -> Component {
        match self {
            Self::Degraded { component, .. } => *component,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
