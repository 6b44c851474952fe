//! Bounded, expiring store of per-session state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock, seconds_to_duration};
use crate::error::{ConfigError, SessionError, SessionResult};
use crate::integration::Alert;
use crate::session::record::{
    ScorePoint, SessionEvent, SessionEventKind, SessionId, SessionOwners, SessionRecord,
    SessionStatus, SessionSummary,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of concurrently active sessions
    pub max_sessions: usize,
    /// Active sessions idle longer than this are expired by a sweep
    pub idle_timeout_seconds: f64,
    /// Ended sessions are purged this long after they end
    pub ended_retention_seconds: f64,
    /// Events kept per session
    pub event_log_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            idle_timeout_seconds: 4.0 * 3600.0,
            ended_retention_seconds: 3600.0,
            event_log_capacity: 500,
        }
    }
}

impl RegistryConfig {
    /// Check limits and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "registry.max_sessions must be at least 1".into(),
            ));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.idle_timeout_seconds) || !positive(self.ended_retention_seconds) {
            return Err(ConfigError::Invalid(
                "registry timeouts must be finite and positive".into(),
            ));
        }
        if self.event_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "registry.event_log_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Idle timeout as a `chrono::Duration`.
    pub fn idle_timeout(&self) -> Duration {
        seconds_to_duration(self.idle_timeout_seconds)
    }

    /// Retention for ended sessions as a `chrono::Duration`.
    pub fn ended_retention(&self) -> Duration {
        seconds_to_duration(self.ended_retention_seconds)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub ended: usize,
    pub max_sessions: usize,
}

/// Shared session store. Every operation runs under one lock.
///
/// Construct once and hand out `Arc<SessionRegistry>` to the monitoring
/// workers and the request layer.
pub struct SessionRegistry {
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl SessionRegistry {
    /// Create a registry on the system clock.
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a registry reading time from `clock`.
    pub fn with_clock(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Get a reference to the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Start a session. Sweeps idle sessions first, then fails with
    /// `CapacityExceeded` if the active limit is still reached.
    pub fn create(
        &self,
        owners: SessionOwners,
        metadata: BTreeMap<String, String>,
    ) -> SessionResult<SessionId> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();

        self.sweep_locked(&mut sessions, self.config.idle_timeout(), now);

        let active = sessions.values().filter(|s| s.is_active()).count();
        if active >= self.config.max_sessions {
            warn!(active, max = self.config.max_sessions, "session capacity reached");
            return Err(SessionError::CapacityExceeded {
                max: self.config.max_sessions,
            });
        }

        let id = SessionId::new();
        info!(
            session_id = %id,
            student_id = %owners.student_id,
            exam_id = %owners.exam_id,
            at = %now,
            "session created"
        );
        sessions.insert(id, SessionRecord::new(id, owners, metadata, now));
        Ok(id)
    }

    /// Snapshot of a session. Counts as activity for idle expiry.
    pub fn get(&self, id: SessionId) -> Option<SessionRecord> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        let record = sessions.get_mut(&id)?;
        record.last_activity_at = now;
        Some(record.clone())
    }

    /// Snapshot without touching activity.
    pub fn peek(&self, id: SessionId) -> Option<SessionRecord> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Record one fused frame. The session must exist and be active.
    pub fn append_frame_result(
        &self,
        id: SessionId,
        score: f32,
        alerts: &[Alert],
    ) -> SessionResult<()> {
        let now = self.clock.now();
        let capacity = self.config.event_log_capacity;
        let mut sessions = self.sessions.lock();

        let record = sessions
            .get_mut(&id)
            .filter(|r| r.is_active())
            .ok_or(SessionError::NotFound(id))?;

        record.score_series.push(ScorePoint {
            timestamp: now,
            score,
        });
        record.frames_processed += 1;
        for alert in alerts {
            record.counts.increment(alert.category);
            record.push_event(SessionEvent::alert(now, alert), capacity);
        }
        record.last_activity_at = now;
        Ok(())
    }

    /// Move an active session to Ended and hand off its data.
    pub fn end(&self, id: SessionId) -> SessionResult<SessionSummary> {
        let now = self.clock.now();
        let capacity = self.config.event_log_capacity;
        let mut sessions = self.sessions.lock();

        let record = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if !record.is_active() {
            return Err(SessionError::InvalidState {
                id,
                status: record.status,
                operation: "end",
            });
        }

        record.status = SessionStatus::Ended;
        record.ended_at = Some(now);
        record.last_activity_at = now;
        record.push_event(
            SessionEvent {
                timestamp: now,
                kind: SessionEventKind::Ended,
            },
            capacity,
        );

        info!(
            session_id = %id,
            frames = record.frames_processed,
            at = %now,
            "session ended"
        );
        Ok(record.summary())
    }

    /// Remove a session regardless of its state. Returns whether it existed.
    pub fn delete(&self, id: SessionId) -> bool {
        let removed = self.sessions.lock().remove(&id).is_some();
        if removed {
            info!(session_id = %id, "session deleted");
        }
        removed
    }

    /// Expire active sessions idle longer than `idle_timeout` and purge
    /// ended sessions past retention. Returns the expired ids.
    pub fn sweep_expired(&self, idle_timeout: Duration) -> Vec<SessionId> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        self.sweep_locked(&mut sessions, idle_timeout, now)
    }

    /// Sweep with the configured idle timeout.
    pub fn sweep(&self) -> Vec<SessionId> {
        self.sweep_expired(self.config.idle_timeout())
    }

    fn sweep_locked(
        &self,
        sessions: &mut HashMap<SessionId, SessionRecord>,
        idle_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Vec<SessionId> {
        let retention = self.config.ended_retention();
        let mut expired = Vec::new();

        sessions.retain(|id, record| {
            let status = record.status;
            match status {
                SessionStatus::Active if now - record.last_activity_at > idle_timeout => {
                    record.status = SessionStatus::Expired;
                    info!(
                        session_id = %id,
                        idle_since = %record.last_activity_at,
                        at = %now,
                        "session expired"
                    );
                    expired.push(*id);
                    false
                }
                SessionStatus::Ended
                    if record.ended_at.is_some_and(|ended| now - ended > retention) =>
                {
                    debug!(session_id = %id, "ended session purged");
                    false
                }
                SessionStatus::Expired => false,
                _ => true,
            }
        });

        expired
    }

    /// Ids of active sessions, oldest first.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        let sessions = self.sessions.lock();
        let mut active: Vec<&SessionRecord> = sessions.values().filter(|s| s.is_active()).collect();
        active.sort_by_key(|s| s.created_at);
        active.iter().map(|s| s.session_id).collect()
    }

    /// Counts by status.
    pub fn stats(&self) -> RegistryStats {
        let sessions = self.sessions.lock();
        RegistryStats {
            total: sessions.len(),
            active: sessions.values().filter(|s| s.is_active()).count(),
            ended: sessions
                .values()
                .filter(|s| s.status == SessionStatus::Ended)
                .count(),
            max_sessions: self.config.max_sessions,
        }
    }

    /// Number of stored sessions in any state.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is stored.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::integration::AlertCategory;
    use crate::scoring::Severity;

    fn registry(max: usize) -> (SessionRegistry, ManualClock) {
        let clock = ManualClock::default();
        let registry = SessionRegistry::with_clock(
            RegistryConfig {
                max_sessions: max,
                ..RegistryConfig::default()
            },
            Arc::new(clock.clone()),
        );
        (registry, clock)
    }

    fn owners() -> SessionOwners {
        SessionOwners::new("uni-1", "exam-42", "student-7")
    }

    #[test]
    fn test_create_and_get() {
        let (registry, _) = registry(4);
        let id = registry.create(owners(), BTreeMap::new()).unwrap();
        let record = registry.get(id).unwrap();
        assert_eq!(record.status, SessionStatus::Active);
        assert_eq!(record.owners.student_id, "student-7");
        assert_eq!(registry.active_sessions(), vec![id]);
    }

    #[test]
    fn test_get_touches_activity() {
        let (registry, clock) = registry(4);
        let id = registry.create(owners(), BTreeMap::new()).unwrap();
        clock.advance(Duration::seconds(30));
        let record = registry.get(id).unwrap();
        assert_eq!(record.last_activity_at, clock.now());
        assert!(record.last_activity_at > record.created_at);
    }

    #[test]
    fn test_append_counts_alerts() {
        let (registry, _) = registry(4);
        let id = registry.create(owners(), BTreeMap::new()).unwrap();
        let alerts = [
            Alert::new(AlertCategory::Device, Severity::Critical, "phone"),
            Alert::new(AlertCategory::Audio, Severity::Minor, "noise"),
        ];
        registry.append_frame_result(id, 60.0, &alerts).unwrap();
        registry.append_frame_result(id, 70.0, &[]).unwrap();

        let record = registry.peek(id).unwrap();
        assert_eq!(record.score_series.len(), 2);
        assert_eq!(record.frames_processed, 2);
        assert_eq!(record.counts.device, 1);
        assert_eq!(record.counts.audio, 1);
        // Created + two alerts
        assert_eq!(record.event_log.len(), 3);
    }

    #[test]
    fn test_append_to_ended_session_is_not_found() {
        let (registry, _) = registry(4);
        let id = registry.create(owners(), BTreeMap::new()).unwrap();
        registry.end(id).unwrap();
        assert_eq!(
            registry.append_frame_result(id, 80.0, &[]),
            Err(SessionError::NotFound(id))
        );
    }

    #[test]
    fn test_end_twice_is_invalid_state() {
        let (registry, _) = registry(4);
        let id = registry.create(owners(), BTreeMap::new()).unwrap();
        let summary = registry.end(id).unwrap();
        assert_eq!(summary.status, SessionStatus::Ended);
        assert!(matches!(
            registry.end(id),
            Err(SessionError::InvalidState {
                status: SessionStatus::Ended,
                ..
            })
        ));
        assert!(matches!(
            registry.end(SessionId::new()),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn test_sweep_expires_idle_sessions() {
        let (registry, clock) = registry(4);
        let idle = registry.create(owners(), BTreeMap::new()).unwrap();
        clock.advance(Duration::minutes(20));
        let busy = registry.create(owners(), BTreeMap::new()).unwrap();

        clock.advance(Duration::minutes(15));
        let expired = registry.sweep_expired(Duration::minutes(30));
        assert_eq!(expired, vec![idle]);
        assert!(registry.peek(idle).is_none());
        assert!(registry.peek(busy).is_some());
    }

    #[test]
    fn test_ended_sessions_purged_after_retention() {
        let (registry, clock) = registry(4);
        let id = registry.create(owners(), BTreeMap::new()).unwrap();
        registry.end(id).unwrap();

        clock.advance(Duration::minutes(30));
        registry.sweep();
        assert!(registry.peek(id).is_some());

        clock.advance(Duration::minutes(31));
        registry.sweep();
        assert!(registry.peek(id).is_none());
    }

    #[test]
    fn test_ended_sessions_do_not_count_against_capacity() {
        let (registry, _) = registry(1);
        let first = registry.create(owners(), BTreeMap::new()).unwrap();
        assert!(registry.create(owners(), BTreeMap::new()).is_err());
        registry.end(first).unwrap();
        assert!(registry.create(owners(), BTreeMap::new()).is_ok());
        assert_eq!(registry.stats().ended, 1);
    }
}
