//! Deduplicated, escalating, expiring alerts.
//!
//! Anomalies and recovery outcomes become alerts with a small lifecycle:
//! created, updated in place while the same pattern repeats inside the
//! dedup window, escalated by fire-once timers when left unattended,
//! resolved explicitly, or expired into bounded history by TTL.
//!
//! Meta-alerts synthesize on top: two or more simultaneous error/critical
//! alerts, or a context explosion co-occurring with a memory leak
//! ("cascading failure"), raise a pre-escalated compound alert.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::anomaly::{AnomalyKind, AnomalyRecord};
use crate::config::AlertConfig;
use crate::recovery::RecoveryResult;
use uuid::Uuid;

/// Alert severity level, escalating upward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    /// The next level up; critical stays critical.
    pub fn bumped(self) -> Self {
        match self {
            AlertLevel::Info => AlertLevel::Warning,
            AlertLevel::Warning => AlertLevel::Error,
            AlertLevel::Error | AlertLevel::Critical => AlertLevel::Critical,
        }
    }

    /// Map an anomaly severity in [0,1] to an initial level.
    pub fn from_severity(severity: f32) -> Self {
        if severity >= 0.85 {
            AlertLevel::Critical
        } else if severity >= 0.6 {
            AlertLevel::Error
        } else if severity >= 0.3 {
            AlertLevel::Warning
        } else {
            AlertLevel::Info
        }
    }
}

/// One alert in its current lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    /// Pattern key used for deduplication, e.g. an anomaly type.
    pub pattern: String,
    pub level: AlertLevel,
    pub severity: f32,
    pub message: String,
    pub metrics: BTreeMap<String, f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub escalation_level: u8,
    /// Times the pattern repeated into this alert.
    pub occurrences: u32,
    pub resolved: bool,
    /// Synthesized from other alerts rather than a detector.
    pub is_meta: bool,
}

/// What `process` did this cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertBatch {
    pub created: Vec<Uuid>,
    pub updated: Vec<Uuid>,
    pub meta: Vec<Uuid>,
    pub expired: Vec<Uuid>,
}

/// Owns active alerts and their bounded history.
#[derive(Debug, Clone)]
pub struct AlertManager {
    config: AlertConfig,
    active: Vec<Alert>,
    history: VecDeque<Alert>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        let cap = config.history_cap;
        Self {
            config,
            active: Vec::new(),
            history: VecDeque::with_capacity(cap),
        }
    }

    /// Turn a cycle's anomalies and recovery outcomes into alerts.
    pub fn process(
        &mut self,
        anomalies: &[AnomalyRecord],
        recoveries: &[RecoveryResult],
    ) -> AlertBatch {
        let now = Utc::now();
        let mut batch = AlertBatch {
            expired: self.expire_due(now),
            ..AlertBatch::default()
        };

        for anomaly in anomalies {
            let level = AlertLevel::from_severity(anomaly.severity);
            let message = match &anomaly.domain {
                Some(domain) => format!("{} in domain {domain}", anomaly.kind),
                None => format!("{} detected", anomaly.kind),
            };
            let pattern = match &anomaly.domain {
                Some(domain) => format!("{}:{domain}", anomaly.kind),
                None => anomaly.kind.as_str().to_string(),
            };
            match self.raise(now, pattern, level, anomaly.severity, message, &anomaly.metrics) {
                RaiseOutcome::Created(id) => batch.created.push(id),
                RaiseOutcome::Updated(id) => batch.updated.push(id),
            }
        }

        for recovery in recoveries {
            if recovery.success {
                // A successful recovery resolves the anomaly's open alert.
                self.resolve_pattern(recovery.kind.as_str());
                continue;
            }
            let exhausted = recovery.reason.as_deref() == Some("max attempts exceeded");
            let level = if exhausted {
                AlertLevel::Critical
            } else {
                AlertLevel::Error
            };
            let pattern = format!("recovery_failed:{}", recovery.kind);
            let message = format!(
                "recovery for {} failed ({})",
                recovery.kind,
                recovery.reason.as_deref().unwrap_or("unspecified")
            );
            match self.raise(now, pattern, level, 0.9, message, &BTreeMap::new()) {
                RaiseOutcome::Created(id) => batch.created.push(id),
                RaiseOutcome::Updated(id) => batch.updated.push(id),
            }
        }

        batch.meta = self.synthesize_meta(now, anomalies);
        self.enforce_cap();
        batch
    }

    /// Create or dedup-update an alert for a pattern.
    fn raise(
        &mut self,
        now: DateTime<Utc>,
        pattern: String,
        level: AlertLevel,
        severity: f32,
        message: String,
        metrics: &BTreeMap<String, f32>,
    ) -> RaiseOutcome {
        let dedup = Duration::milliseconds(self.config.dedup_window_ms as i64);
        if let Some(alert) = self
            .active
            .iter_mut()
            .find(|a| !a.resolved && a.pattern == pattern && now - a.updated_at < dedup)
        {
            alert.severity = alert.severity.max(severity);
            alert.level = alert.level.max(level);
            for (key, value) in metrics {
                alert.metrics.insert(key.clone(), *value);
            }
            alert.occurrences += 1;
            alert.updated_at = now;
            debug!(pattern = %alert.pattern, occurrences = alert.occurrences, "alert updated");
            return RaiseOutcome::Updated(alert.id);
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            pattern,
            level,
            severity,
            message,
            metrics: metrics.clone(),
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::milliseconds(self.config.ttl_ms as i64),
            escalation_level: 0,
            occurrences: 1,
            resolved: false,
            is_meta: false,
        };
        info!(pattern = %alert.pattern, ?level, "alert created");
        let id = alert.id;
        self.active.push(alert);
        RaiseOutcome::Created(id)
    }

    /// Synthesize meta-alerts from the current active set.
    fn synthesize_meta(&mut self, now: DateTime<Utc>, anomalies: &[AnomalyRecord]) -> Vec<Uuid> {
        let mut created = Vec::new();

        let severe = self
            .active
            .iter()
            .filter(|a| !a.resolved && !a.is_meta && a.level >= AlertLevel::Error)
            .count();
        if severe >= 2 {
            if let Some(id) = self.raise_meta(
                now,
                "multiple_failures",
                format!("{severe} simultaneous error/critical alerts"),
            ) {
                created.push(id);
            }
        }

        let explosion = anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::ContextExplosion);
        let leak = anomalies.iter().any(|a| a.kind == AnomalyKind::MemoryLeak);
        if explosion && leak {
            if let Some(id) = self.raise_meta(
                now,
                "cascading_failure",
                "context explosion and memory leak co-occurring".to_string(),
            ) {
                created.push(id);
            }
        }
        created
    }

    /// Meta-alerts start pre-escalated. Returns None when deduped into an
    /// existing meta-alert.
    fn raise_meta(&mut self, now: DateTime<Utc>, pattern: &str, message: String) -> Option<Uuid> {
        let dedup = Duration::milliseconds(self.config.dedup_window_ms as i64);
        if let Some(existing) = self
            .active
            .iter_mut()
            .find(|a| !a.resolved && a.pattern == pattern && now - a.updated_at < dedup)
        {
            existing.occurrences += 1;
            existing.updated_at = now;
            return None;
        }
        let alert = Alert {
            id: Uuid::new_v4(),
            pattern: pattern.to_string(),
            level: AlertLevel::Critical,
            severity: 1.0,
            message,
            metrics: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::milliseconds(self.config.ttl_ms as i64),
            escalation_level: 1,
            occurrences: 1,
            resolved: false,
            is_meta: true,
        };
        warn!(pattern = %alert.pattern, "meta-alert synthesized");
        let id = alert.id;
        self.active.push(alert);
        Some(id)
    }

    /// Escalate one alert by id. Fire-once timer callback; a no-op when the
    /// alert is resolved, expired, or already at the cap.
    pub fn escalate(&mut self, id: Uuid) -> Option<&Alert> {
        let max_level = self.config.max_escalation_level;
        let alert = self
            .active
            .iter_mut()
            .find(|a| a.id == id && !a.resolved)?;
        if alert.escalation_level >= max_level {
            return None;
        }
        alert.escalation_level += 1;
        alert.level = alert.level.bumped();
        alert.updated_at = Utc::now();
        info!(pattern = %alert.pattern, level = ?alert.level, escalation = alert.escalation_level, "alert escalated");
        Some(&*alert)
    }

    /// Ids of unresolved alerts whose escalation delay has elapsed.
    pub fn due_escalations(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let delay = Duration::milliseconds(self.config.escalation_delay_ms as i64);
        self.active
            .iter()
            .filter(|a| {
                !a.resolved
                    && a.escalation_level < self.config.max_escalation_level
                    && now - a.updated_at >= delay
            })
            .map(|a| a.id)
            .collect()
    }

    /// Resolve every active alert matching a pattern. Resolved alerts move
    /// to history.
    pub fn resolve_pattern(&mut self, pattern: &str) -> usize {
        let mut resolved = 0;
        let mut index = 0;
        while index < self.active.len() {
            if self.active[index].pattern == pattern && !self.active[index].resolved {
                let mut alert = self.active.remove(index);
                alert.resolved = true;
                alert.updated_at = Utc::now();
                self.push_history(alert);
                resolved += 1;
            } else {
                index += 1;
            }
        }
        resolved
    }

    /// Move expired alerts into history, returning their ids.
    fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut expired = Vec::new();
        let mut index = 0;
        while index < self.active.len() {
            if now >= self.active[index].expires_at {
                let alert = self.active.remove(index);
                debug!(pattern = %alert.pattern, "alert expired");
                expired.push(alert.id);
                self.push_history(alert);
            } else {
                index += 1;
            }
        }
        expired
    }

    /// Evict the oldest non-critical alerts beyond the active cap.
    fn enforce_cap(&mut self) {
        while self.active.len() > self.config.max_active {
            let victim = self
                .active
                .iter()
                .enumerate()
                .filter(|(_, a)| a.level < AlertLevel::Critical)
                .min_by_key(|(_, a)| a.created_at)
                .map(|(i, _)| i);
            match victim {
                Some(index) => {
                    let alert = self.active.remove(index);
                    warn!(pattern = %alert.pattern, "active alert cap reached, evicting oldest non-critical");
                    self.push_history(alert);
                }
                // Everything left is critical; stop evicting.
                None => break,
            }
        }
    }

    fn push_history(&mut self, alert: Alert) {
        self.history.push_back(alert);
        while self.history.len() > self.config.history_cap {
            self.history.pop_front();
        }
    }

    pub fn active(&self) -> &[Alert] {
        &self.active
    }

    pub fn history(&self) -> &VecDeque<Alert> {
        &self.history
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }
}

enum RaiseOutcome {
    Created(Uuid),
    Updated(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn anomaly(kind: AnomalyKind, severity: f32) -> AnomalyRecord {
        AnomalyRecord {
            kind,
            severity,
            detected_at: Utc::now(),
            metrics: BTreeMap::new(),
            recommendations: Vec::new(),
            domain: None,
        }
    }

    fn failed_recovery(kind: AnomalyKind, reason: &str) -> RecoveryResult {
        RecoveryResult {
            kind,
            success: false,
            strategy: "archive_lru".to_string(),
            action: "archived nothing".to_string(),
            deltas: crate::recovery::RecoveryDeltas::default(),
            validation: crate::recovery::ValidationOutcome::Skipped,
            reason: Some(reason.to_string()),
        }
    }

    #[test]
    fn test_level_from_severity() {
        assert_eq!(AlertLevel::from_severity(0.1), AlertLevel::Info);
        assert_eq!(AlertLevel::from_severity(0.4), AlertLevel::Warning);
        assert_eq!(AlertLevel::from_severity(0.7), AlertLevel::Error);
        assert_eq!(AlertLevel::from_severity(0.9), AlertLevel::Critical);
    }

    #[test]
    fn test_create_then_dedup_update() {
        let mut manager = AlertManager::default();
        let first = manager.process(&[anomaly(AnomalyKind::ContextRot, 0.4)], &[]);
        assert_eq!(first.created.len(), 1);

        let second = manager.process(&[anomaly(AnomalyKind::ContextRot, 0.7)], &[]);
        assert!(second.created.is_empty());
        assert_eq!(second.updated.len(), 1);

        assert_eq!(manager.active().len(), 1);
        let alert = &manager.active()[0];
        assert_eq!(alert.occurrences, 2);
        // Dedup keeps the maximum severity and level.
        assert!((alert.severity - 0.7).abs() < f32::EPSILON);
        assert_eq!(alert.level, AlertLevel::Error);
    }

    #[test]
    fn test_distinct_patterns_do_not_dedup() {
        let mut manager = AlertManager::default();
        manager.process(&[anomaly(AnomalyKind::ContextRot, 0.4)], &[]);
        manager.process(&[anomaly(AnomalyKind::MemoryLeak, 0.7)], &[]);
        assert_eq!(manager.active().len(), 2);
    }

    #[test]
    fn test_escalation_bumps_level_and_caps() {
        let mut manager = AlertManager::default();
        let batch = manager.process(&[anomaly(AnomalyKind::ContextRot, 0.1)], &[]);
        let id = batch.created[0];

        assert_eq!(manager.active()[0].level, AlertLevel::Info);
        manager.escalate(id);
        assert_eq!(manager.active()[0].level, AlertLevel::Warning);
        manager.escalate(id);
        manager.escalate(id);
        assert_eq!(manager.active()[0].escalation_level, 3);
        // Max escalation level reached: further escalations are no-ops.
        assert!(manager.escalate(id).is_none());
        assert_eq!(manager.active()[0].escalation_level, 3);
    }

    #[test]
    fn test_recovery_success_resolves_alert() {
        let mut manager = AlertManager::default();
        manager.process(&[anomaly(AnomalyKind::ContextRot, 0.5)], &[]);
        assert_eq!(manager.active().len(), 1);

        let recovery = RecoveryResult {
            success: true,
            reason: None,
            ..failed_recovery(AnomalyKind::ContextRot, "")
        };
        manager.process(&[], &[recovery]);
        assert!(manager.active().is_empty());
        assert_eq!(manager.history().len(), 1);
        assert!(manager.history()[0].resolved);
    }

    #[test]
    fn test_exhausted_recovery_raises_critical() {
        let mut manager = AlertManager::default();
        manager.process(
            &[],
            &[failed_recovery(AnomalyKind::MemoryLeak, "max attempts exceeded")],
        );
        let alert = &manager.active()[0];
        assert_eq!(alert.level, AlertLevel::Critical);
        assert!(alert.pattern.starts_with("recovery_failed"));
    }

    #[test]
    fn test_meta_alert_on_two_severe() {
        let mut manager = AlertManager::default();
        let batch = manager.process(
            &[
                anomaly(AnomalyKind::ContextRot, 0.9),
                anomaly(AnomalyKind::DomainBloat, 0.7),
            ],
            &[],
        );
        assert_eq!(batch.meta.len(), 1);
        let meta = manager
            .active()
            .iter()
            .find(|a| a.is_meta)
            .expect("meta alert present");
        assert_eq!(meta.pattern, "multiple_failures");
        // Meta-alerts start pre-escalated.
        assert_eq!(meta.escalation_level, 1);
        assert_eq!(meta.level, AlertLevel::Critical);
    }

    #[test]
    fn test_cascading_failure_meta() {
        let mut manager = AlertManager::default();
        let batch = manager.process(
            &[
                anomaly(AnomalyKind::ContextExplosion, 0.5),
                anomaly(AnomalyKind::MemoryLeak, 0.5),
            ],
            &[],
        );
        assert!(!batch.meta.is_empty());
        assert!(manager
            .active()
            .iter()
            .any(|a| a.pattern == "cascading_failure"));
    }

    #[test]
    fn test_cap_evicts_oldest_non_critical() {
        let mut config = AlertConfig::default();
        config.max_active = 3;
        config.dedup_window_ms = 0; // every raise creates a fresh alert
        let mut manager = AlertManager::new(config);

        manager.process(&[anomaly(AnomalyKind::ContextRot, 0.4)], &[]);
        manager.process(&[anomaly(AnomalyKind::MemoryLeak, 0.4)], &[]);
        manager.process(&[anomaly(AnomalyKind::DomainBloat, 0.9)], &[]);
        manager.process(&[anomaly(AnomalyKind::StateOscillation, 0.4)], &[]);

        assert_eq!(manager.active().len(), 3);
        // The oldest non-critical (context_rot) was evicted; the critical
        // bloat alert survives.
        assert!(!manager.active().iter().any(|a| a.pattern == "context_rot"));
        assert!(manager.active().iter().any(|a| a.pattern == "domain_bloat"));
    }

    #[test]
    fn test_expiry_moves_to_bounded_history() {
        let mut config = AlertConfig::default();
        config.dedup_window_ms = 1;
        config.ttl_ms = 2;
        config.history_cap = 5;
        let mut manager = AlertManager::new(config);

        manager.process(&[anomaly(AnomalyKind::ContextRot, 0.4)], &[]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let batch = manager.process(&[], &[]);
        assert_eq!(batch.expired.len(), 1);
        assert!(manager.active().is_empty());
        assert_eq!(manager.history().len(), 1);
    }

    #[test]
    fn test_due_escalations_after_delay() {
        let mut config = AlertConfig::default();
        config.escalation_delay_ms = 1;
        let mut manager = AlertManager::new(config);
        let batch = manager.process(&[anomaly(AnomalyKind::ContextRot, 0.4)], &[]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let due = manager.due_escalations();
        assert_eq!(due, batch.created);
    }

    #[test]
    fn test_domain_scoped_patterns() {
        let mut manager = AlertManager::default();
        let mut a = anomaly(AnomalyKind::DomainBloat, 0.5);
        a.domain = Some("storage".to_string());
        manager.process(&[a], &[]);
        assert_eq!(manager.active()[0].pattern, "domain_bloat:storage");
    }
}
