//! Per-session records owned by the registry.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::elapsed_seconds;
use crate::integration::{Alert, AlertCategory};
use crate::scoring::Severity;

/// Opaque session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Fresh random (v4) id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse the hyphenated UUID form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Who the session belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOwners {
    pub institution_id: String,
    pub exam_id: String,
    pub student_id: String,
}

impl SessionOwners {
    pub fn new(
        institution_id: impl Into<String>,
        exam_id: impl Into<String>,
        student_id: impl Into<String>,
    ) -> Self {
        Self {
            institution_id: institution_id.into(),
            exam_id: exam_id.into(),
            student_id: student_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScorePoint {
    pub timestamp: DateTime<Utc>,
    pub score: f32,
}

/// Alerts received per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCounts {
    pub device: u64,
    pub audio: u64,
    pub person: u64,
    pub pose: u64,
}

impl AlertCounts {
    /// Count one alert of `category`.
    pub fn increment(&mut self, category: AlertCategory) {
        match category {
            AlertCategory::Device => self.device += 1,
            AlertCategory::Audio => self.audio += 1,
            AlertCategory::Person => self.person += 1,
            AlertCategory::Pose => self.pose += 1,
        }
    }

    /// Alerts counted for `category`.
    pub fn get(&self, category: AlertCategory) -> u64 {
        match category {
            AlertCategory::Device => self.device,
            AlertCategory::Audio => self.audio,
            AlertCategory::Person => self.person,
            AlertCategory::Pose => self.pose,
        }
    }

    /// Alerts counted across all categories.
    pub fn total(&self) -> u64 {
        self.device + self.audio + self.person + self.pose
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEventKind {
    Created,
    Alert {
        category: AlertCategory,
        severity: Severity,
        message: String,
    },
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

impl SessionEvent {
    /// Log entry for an alert.
    pub fn alert(timestamp: DateTime<Utc>, alert: &Alert) -> Self {
        Self {
            timestamp,
            kind: SessionEventKind::Alert {
                category: alert.category,
                severity: alert.severity,
                message: alert.message.clone(),
            },
        }
    }
}

/// Accumulated state of one exam session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub owners: SessionOwners,
    pub metadata: BTreeMap<String, String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub frames_processed: u64,
    /// Append-only
    pub score_series: Vec<ScorePoint>,
    pub counts: AlertCounts,
    /// Most recent events, oldest evicted first
    pub event_log: VecDeque<SessionEvent>,
}

impl SessionRecord {
    pub(crate) fn new(
        session_id: SessionId,
        owners: SessionOwners,
        metadata: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut event_log = VecDeque::new();
        event_log.push_back(SessionEvent {
            timestamp: now,
            kind: SessionEventKind::Created,
        });
        Self {
            session_id,
            owners,
            metadata,
            status: SessionStatus::Active,
            created_at: now,
            last_activity_at: now,
            ended_at: None,
            frames_processed: 0,
            score_series: Vec::new(),
            counts: AlertCounts::default(),
            event_log,
        }
    }

    /// Whether frames may still be appended.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub(crate) fn push_event(&mut self, event: SessionEvent, capacity: usize) {
        while self.event_log.len() >= capacity.max(1) {
            self.event_log.pop_front();
        }
        self.event_log.push_back(event);
    }

    /// Mean of the score series, `None` when empty.
    pub fn average_score(&self) -> Option<f32> {
        if self.score_series.is_empty() {
            return None;
        }
        let sum: f32 = self.score_series.iter().map(|p| p.score).sum();
        Some(sum / self.score_series.len() as f32)
    }

    /// Plain-data copy for reporting.
    pub fn summary(&self) -> SessionSummary {
        let end = self.ended_at.unwrap_or(self.last_activity_at);
        SessionSummary {
            session_id: self.session_id,
            owners: self.owners.clone(),
            metadata: self.metadata.clone(),
            status: self.status,
            created_at: self.created_at,
            ended_at: self.ended_at,
            duration_seconds: elapsed_seconds(self.created_at, end).max(0.0),
            frames_processed: self.frames_processed,
            average_score: self.average_score(),
            score_series: self.score_series.clone(),
            counts: self.counts,
        }
    }
}

/// Plain-data hand-off for reporting when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub owners: SessionOwners,
    pub metadata: BTreeMap<String, String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub frames_processed: u64,
    pub average_score: Option<f32>,
    pub score_series: Vec<ScorePoint>,
    pub counts: AlertCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_round_trips_through_text() {
        let id = SessionId::new();
        assert_eq!(SessionId::parse(&id.to_string()).unwrap(), id);
        assert!(SessionId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_event_log_is_bounded() {
        let now = Utc::now();
        let mut record =
            SessionRecord::new(SessionId::new(), SessionOwners::default(), BTreeMap::new(), now);
        let alert = Alert::new(AlertCategory::Audio, Severity::Minor, "noise");
        for _ in 0..10 {
            record.push_event(SessionEvent::alert(now, &alert), 4);
        }
        assert_eq!(record.event_log.len(), 4);
        assert!(matches!(record.event_log[0].kind, SessionEventKind::Alert { .. }));
    }

    #[test]
    fn test_counts_by_category() {
        let mut counts = AlertCounts::default();
        counts.increment(AlertCategory::Device);
        counts.increment(AlertCategory::Device);
        counts.increment(AlertCategory::Pose);
        assert_eq!(counts.get(AlertCategory::Device), 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_summary_of_empty_session() {
        let now = Utc::now();
        let record =
            SessionRecord::new(SessionId::new(), SessionOwners::default(), BTreeMap::new(), now);
        let summary = record.summary();
        assert_eq!(summary.average_score, None);
        assert_eq!(summary.duration_seconds, 0.0);
    }
}
