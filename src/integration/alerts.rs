//! Alert records, priority ordering and per-category debouncing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::clock::elapsed_seconds;
use crate::scoring::Severity;

/// Source of an alert. Declaration order is the tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Device,
    Person,
    Audio,
    Pose,
}

impl AlertCategory {
    pub const ALL: [AlertCategory; 4] = [Self::Device, Self::Person, Self::Audio, Self::Pose];
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlertCategory::Device => "device",
            AlertCategory::Person => "person",
            AlertCategory::Audio => "audio",
            AlertCategory::Pose => "pose",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alert {
    pub category: AlertCategory,
    pub severity: Severity,
    pub message: String,
}

impl Alert {
    /// Create an alert.
    pub fn new(category: AlertCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Sort by severity (highest first) then category, dropping exact duplicates.
pub fn prioritize(mut alerts: Vec<Alert>) -> Vec<Alert> {
    alerts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(a.category.cmp(&b.category))
    });
    let mut unique: Vec<Alert> = Vec::with_capacity(alerts.len());
    for alert in alerts {
        if !unique.contains(&alert) {
            unique.push(alert);
        }
    }
    unique
}

/// Emits at most one alert per category inside each dedup window.
#[derive(Debug, Clone)]
pub struct AlertDebouncer {
    window_seconds: f64,
    last_emitted: HashMap<AlertCategory, DateTime<Utc>>,
    suppressed: u64,
}

impl AlertDebouncer {
    /// Create a debouncer with the given window.
    pub fn new(window_seconds: f64) -> Self {
        Self {
            window_seconds,
            last_emitted: HashMap::new(),
            suppressed: 0,
        }
    }

    /// Order `alerts` by priority and drop those whose category already
    /// fired within the window, including earlier alerts of the same frame.
    pub fn filter(&mut self, alerts: Vec<Alert>, now: DateTime<Utc>) -> Vec<Alert> {
        let mut emitted = Vec::new();
        for alert in prioritize(alerts) {
            let recent = self
                .last_emitted
                .get(&alert.category)
                .is_some_and(|&last| elapsed_seconds(last, now) < self.window_seconds);
            if recent {
                self.suppressed += 1;
                trace!(category = %alert.category, message = %alert.message, "alert debounced");
                continue;
            }
            self.last_emitted.insert(alert.category, now);
            emitted.push(alert);
        }
        emitted
    }

    /// Alerts dropped since creation or the last reset.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// When an alert of `category` last went out.
    pub fn last_emitted(&self, category: AlertCategory) -> Option<DateTime<Utc>> {
        self.last_emitted.get(&category).copied()
    }

    /// Forget all emission times.
    pub fn reset(&mut self) {
        self.last_emitted.clear();
        self.suppressed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 24, 9, 0, 0).unwrap()
    }

    fn device() -> Alert {
        Alert::new(AlertCategory::Device, Severity::Critical, "1 device(s) detected: cell phone")
    }

    #[test]
    fn test_prioritize_orders_by_severity_then_category() {
        let ordered = prioritize(vec![
            Alert::new(AlertCategory::Audio, Severity::Minor, "noise"),
            Alert::new(AlertCategory::Pose, Severity::Major, "away"),
            Alert::new(AlertCategory::Person, Severity::Critical, "people"),
            Alert::new(AlertCategory::Device, Severity::Critical, "phone"),
            Alert::new(AlertCategory::Audio, Severity::Major, "voice"),
        ]);
        let messages: Vec<&str> = ordered.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(messages, vec!["phone", "people", "voice", "away", "noise"]);
    }

    #[test]
    fn test_prioritize_removes_exact_duplicates() {
        let ordered = prioritize(vec![device(), device()]);
        assert_eq!(ordered.len(), 1);
    }

    #[test]
    fn test_sustained_condition_emits_once_per_window() {
        let mut debouncer = AlertDebouncer::new(3.0);
        let mut emitted = 0;
        for frame in 0..10 {
            let now = t0() + Duration::milliseconds(100 * frame);
            emitted += debouncer.filter(vec![device()], now).len();
        }
        assert_eq!(emitted, 1);
        assert_eq!(debouncer.suppressed(), 9);
    }

    #[test]
    fn test_alert_fires_again_after_window() {
        let mut debouncer = AlertDebouncer::new(3.0);
        assert_eq!(debouncer.filter(vec![device()], t0()).len(), 1);
        assert!(debouncer.filter(vec![device()], t0() + Duration::milliseconds(2900)).is_empty());
        assert_eq!(debouncer.filter(vec![device()], t0() + Duration::seconds(3)).len(), 1);
    }

    #[test]
    fn test_categories_are_independent() {
        let mut debouncer = AlertDebouncer::new(3.0);
        debouncer.filter(vec![device()], t0());
        let emitted = debouncer.filter(
            vec![
                device(),
                Alert::new(AlertCategory::Audio, Severity::Major, "Voice detected"),
            ],
            t0() + Duration::seconds(1),
        );
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].category, AlertCategory::Audio);
    }

    #[test]
    fn test_one_alert_per_category_within_a_frame() {
        let mut debouncer = AlertDebouncer::new(3.0);
        let emitted = debouncer.filter(
            vec![
                Alert::new(AlertCategory::Pose, Severity::Minor, "Looking left"),
                Alert::new(AlertCategory::Pose, Severity::Major, "Looking away for 4.0s"),
            ],
            t0(),
        );
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].severity, Severity::Major);
    }
}
