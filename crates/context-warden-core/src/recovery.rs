//! Severity-tiered automated recovery.
//!
//! Each anomaly type maps to an escalating ladder of tactics, from gentle
//! (compress harder) to destructive (deactivate everything but the most
//! active domain). The anomaly's severity picks the rung. A per-type
//! attempt counter bounds repeated remediation: once `max_attempts`
//! unsuccessful tries accumulate, further calls short-circuit without
//! mutating anything until a success resets the counter.
//!
//! Post-action validation recomputes the state vector and scores four
//! checks; passing three of four marks the result validated. Validation
//! past its deadline is inconclusive, which neither confirms nor fails the
//! recovery.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::anomaly::{AnomalyKind, AnomalyRecord};
use crate::budget::BudgetOptimizer;
use crate::compression::{CompressionEngine, CompressionOptions};
use crate::config::RecoveryConfig;
use crate::context::{ContextSnapshot, DomainStatus};
use crate::health::HealthMonitor;
use crate::state::{StateCalculator, StateExtras};
use crate::zone::{Zone, ZoneClassifier};

/// Result of the post-action validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationOutcome {
    /// At least three of the four checks passed.
    Validated,
    /// Fewer than three checks passed. Does not fail the recovery itself.
    Failed,
    /// The deadline elapsed before a verdict could be trusted.
    Inconclusive,
    /// Validation disabled or nothing was mutated.
    Skipped,
}

/// Quantitative before/after evidence for a recovery action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryDeltas {
    pub size_before_kb: f32,
    pub size_after_kb: f32,
    pub domains_archived: usize,
    pub domains_deactivated: usize,
    pub items_removed: usize,
    pub ratio_achieved: Option<f32>,
    pub amplitude_before: Option<f32>,
    pub amplitude_after: Option<f32>,
}

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub kind: AnomalyKind,
    pub success: bool,
    /// Name of the tactic that ran.
    pub strategy: String,
    /// Human-readable account of what was done.
    pub action: String,
    pub deltas: RecoveryDeltas,
    pub validation: ValidationOutcome,
    pub reason: Option<String>,
}

/// Mutable handles a recovery tactic may touch. All borrowed from the
/// single-owner controller, so tactics never race each other.
pub struct RecoveryTargets<'a> {
    pub snapshot: &'a mut ContextSnapshot,
    pub monitor: &'a mut HealthMonitor,
    pub states: &'a mut StateCalculator,
    pub engine: &'a mut CompressionEngine,
    pub optimizer: &'a mut BudgetOptimizer,
    pub zones: &'a ZoneClassifier,
}

/// Executes remediation tactics with bounded per-type retries.
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    config: RecoveryConfig,
    attempts: HashMap<AnomalyKind, u32>,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

impl RecoveryEngine {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            attempts: HashMap::new(),
        }
    }

    /// Execute the tactic ladder for one anomaly.
    pub fn execute(
        &mut self,
        anomaly: &AnomalyRecord,
        targets: &mut RecoveryTargets<'_>,
    ) -> RecoveryResult {
        let attempts = self.attempts.get(&anomaly.kind).copied().unwrap_or(0);
        if attempts >= self.config.max_attempts {
            debug!(kind = %anomaly.kind, attempts, "recovery short-circuited");
            return RecoveryResult {
                kind: anomaly.kind,
                success: false,
                strategy: "none".to_string(),
                action: "no tactic executed".to_string(),
                deltas: RecoveryDeltas::default(),
                validation: ValidationOutcome::Skipped,
                reason: Some("max attempts exceeded".to_string()),
            };
        }

        let started = Instant::now();
        let zone_before = self.current_zone(targets);
        let size_before = targets.snapshot.serialized_size_kb();

        let (strategy, action, mut deltas, success) = self.run_tactic(anomaly, targets);
        deltas.size_before_kb = size_before;
        deltas.size_after_kb = targets.snapshot.serialized_size_kb();

        if success {
            self.attempts.insert(anomaly.kind, 0);
        } else {
            self.attempts.insert(anomaly.kind, attempts + 1);
        }

        let validation = if self.config.validate_actions {
            self.validate(targets, zone_before, deltas.ratio_achieved, started)
        } else {
            ValidationOutcome::Skipped
        };

        info!(
            kind = %anomaly.kind,
            %strategy,
            success,
            ?validation,
            "recovery attempt"
        );

        RecoveryResult {
            kind: anomaly.kind,
            success,
            strategy,
            action,
            deltas,
            validation,
            reason: (!success).then(|| "tactic did not reach its success threshold".to_string()),
        }
    }

    /// Attempts currently recorded against an anomaly type.
    pub fn attempts_for(&self, kind: AnomalyKind) -> u32 {
        self.attempts.get(&kind).copied().unwrap_or(0)
    }

    /// Snapshot of all attempt counters, for diagnostics.
    pub fn attempt_counters(&self) -> HashMap<AnomalyKind, u32> {
        self.attempts.clone()
    }

    fn current_zone(&self, targets: &RecoveryTargets<'_>) -> Zone {
        let assessment = targets.monitor.evaluate(targets.snapshot);
        let state = targets
            .states
            .evaluate(targets.snapshot, &assessment, StateExtras::default());
        targets.zones.classify(&state).zone
    }

    /// Dispatch on anomaly type and severity tier. Returns
    /// (strategy, action, deltas, success).
    fn run_tactic(
        &self,
        anomaly: &AnomalyRecord,
        targets: &mut RecoveryTargets<'_>,
    ) -> (String, String, RecoveryDeltas, bool) {
        let severity = anomaly.severity;
        match anomaly.kind {
            AnomalyKind::ContextRot => {
                if severity < 0.5 {
                    self.compress_harder(targets)
                } else if severity < 0.8 {
                    self.archive_lru(targets)
                } else {
                    let _ = self.reset_windows(targets);
                    self.compress_harder(targets)
                }
            }
            AnomalyKind::ContextExplosion => {
                if severity < 0.5 {
                    self.compress_harder(targets)
                } else if severity < 0.8 {
                    self.archive_lru(targets)
                } else {
                    self.deactivate_all_but_top(targets)
                }
            }
            AnomalyKind::MemoryLeak => {
                if severity < 0.5 {
                    self.reset_windows(targets)
                } else if severity < 0.8 {
                    self.archive_lru(targets)
                } else {
                    self.deactivate_all_but_top(targets)
                }
            }
            AnomalyKind::StateOscillation => {
                if severity < 0.6 {
                    self.dampen_oscillation(anomaly, targets)
                } else {
                    self.reset_windows(targets)
                }
            }
            AnomalyKind::DomainBloat => {
                if severity < 0.6 {
                    self.truncate_bloated(anomaly, targets)
                } else {
                    self.archive_named(anomaly, targets)
                }
            }
            AnomalyKind::CompressionDegradation => {
                if severity < 0.6 {
                    self.retune_engine(targets, 2.0, 0.6)
                } else {
                    self.retune_engine(targets, 2.5, 0.65)
                }
            }
        }
    }

    /// Compress the whole snapshot toward the configured target ratio.
    fn compress_harder(
        &self,
        targets: &mut RecoveryTargets<'_>,
    ) -> (String, String, RecoveryDeltas, bool) {
        let options = CompressionOptions {
            target_ratio: Some(self.config.compress_target_ratio),
            ..CompressionOptions::default()
        };
        let result =
            targets
                .engine
                .compress(targets.snapshot, &options, targets.monitor, targets.states);
        let achieved = result.ratio;
        *targets.snapshot = result.snapshot;
        let success = achieved >= self.config.compress_success_ratio;
        (
            "compress_harder".to_string(),
            format!(
                "compressed context at {:.1}x toward target {:.1}x",
                achieved, self.config.compress_target_ratio
            ),
            RecoveryDeltas {
                ratio_achieved: Some(achieved),
                ..RecoveryDeltas::default()
            },
            success,
        )
    }

    /// Archive the least-recently-modified non-active domains.
    fn archive_lru(
        &self,
        targets: &mut RecoveryTargets<'_>,
    ) -> (String, String, RecoveryDeltas, bool) {
        let mut candidates: Vec<(String, Option<chrono::DateTime<chrono::Utc>>)> = targets
            .snapshot
            .working_memory
            .domains
            .iter()
            .filter(|(_, d)| !d.is_active() && d.status != DomainStatus::Archived)
            .map(|(id, d)| (id.clone(), d.last_modified))
            .collect();
        // None sorts first: never-touched domains are the coldest.
        candidates.sort_by(|a, b| a.1.cmp(&b.1));

        let mut archived = 0usize;
        for (id, _) in candidates.into_iter().take(self.config.lru_archive_count) {
            if let Some(domain) = targets.snapshot.working_memory.domains.get_mut(&id) {
                *domain = domain.to_stub(DomainStatus::Archived);
                archived += 1;
            }
        }
        let success = archived > 0;
        (
            "archive_lru".to_string(),
            format!("archived {archived} least-recently-used domains"),
            RecoveryDeltas {
                domains_archived: archived,
                ..RecoveryDeltas::default()
            },
            success,
        )
    }

    /// Clear every rolling window.
    fn reset_windows(
        &self,
        targets: &mut RecoveryTargets<'_>,
    ) -> (String, String, RecoveryDeltas, bool) {
        let cleared = targets.monitor.history().len()
            + targets.states.history().len()
            + targets.optimizer.usage_history().len();
        targets.monitor.reset_history();
        targets.states.reset_history();
        targets.optimizer.reset_usage_history();
        (
            "reset_windows".to_string(),
            format!("cleared {cleared} rolling-history entries"),
            RecoveryDeltas {
                items_removed: cleared,
                ..RecoveryDeltas::default()
            },
            cleared > 0,
        )
    }

    /// Deactivate everything except the single most-active domain.
    fn deactivate_all_but_top(
        &self,
        targets: &mut RecoveryTargets<'_>,
    ) -> (String, String, RecoveryDeltas, bool) {
        let top = targets
            .snapshot
            .working_memory
            .domains
            .iter()
            .max_by(|a, b| {
                a.1.observation()
                    .partial_cmp(&b.1.observation())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(id, _)| id.clone());

        let mut deactivated = 0usize;
        if let Some(top_id) = &top {
            for (id, domain) in targets.snapshot.working_memory.domains.iter_mut() {
                if id != top_id && domain.is_active() {
                    domain.status = DomainStatus::Inactive;
                    deactivated += 1;
                }
            }
            targets.snapshot.working_memory.active_domain = Some(top_id.clone());
        }
        (
            "deactivate_all_but_top".to_string(),
            format!(
                "kept {} active, deactivated {deactivated} domains",
                top.as_deref().unwrap_or("none")
            ),
            RecoveryDeltas {
                domains_deactivated: deactivated,
                ..RecoveryDeltas::default()
            },
            deactivated > 0,
        )
    }

    /// Exponentially smooth the recorded state history to damp oscillation.
    fn dampen_oscillation(
        &self,
        anomaly: &AnomalyRecord,
        targets: &mut RecoveryTargets<'_>,
    ) -> (String, String, RecoveryDeltas, bool) {
        let amplitude = anomaly.metrics.get("amplitude").copied().unwrap_or(0.0);
        let frequency = anomaly.metrics.get("frequency").copied().unwrap_or(0.0);
        let factor = (0.5 + amplitude * frequency).min(0.9);
        let (before, after) = targets.states.smooth_history(factor);
        let success = after < before;
        (
            "dampen_oscillation".to_string(),
            format!("smoothed state history with factor {factor:.2}"),
            RecoveryDeltas {
                amplitude_before: Some(before),
                amplitude_after: Some(after),
                ..RecoveryDeltas::default()
            },
            success,
        )
    }

    /// Truncate the named bloated domain back to its ceilings.
    fn truncate_bloated(
        &self,
        anomaly: &AnomalyRecord,
        targets: &mut RecoveryTargets<'_>,
    ) -> (String, String, RecoveryDeltas, bool) {
        let Some(id) = anomaly.domain.as_deref() else {
            return (
                "truncate_bloated".to_string(),
                "no domain named in anomaly".to_string(),
                RecoveryDeltas::default(),
                false,
            );
        };
        let max_files = anomaly
            .metrics
            .get("max_files")
            .map(|v| *v as usize)
            .unwrap_or(50);
        let max_facts = anomaly
            .metrics
            .get("max_facts")
            .map(|v| *v as usize)
            .unwrap_or(20);

        let mut removed = 0usize;
        if let Some(domain) = targets.snapshot.working_memory.domains.get_mut(id) {
            let before = domain.item_count();
            domain.files_created.truncate(max_files);
            domain.critical_facts.truncate(max_facts);
            domain.decisions_made.truncate(max_facts);
            removed = before - domain.item_count();
        }
        (
            "truncate_bloated".to_string(),
            format!("truncated domain {id}, removed {removed} items"),
            RecoveryDeltas {
                items_removed: removed,
                ..RecoveryDeltas::default()
            },
            removed > 0,
        )
    }

    /// Archive the specific domain named by the anomaly.
    fn archive_named(
        &self,
        anomaly: &AnomalyRecord,
        targets: &mut RecoveryTargets<'_>,
    ) -> (String, String, RecoveryDeltas, bool) {
        let Some(id) = anomaly.domain.as_deref() else {
            return (
                "archive_named".to_string(),
                "no domain named in anomaly".to_string(),
                RecoveryDeltas::default(),
                false,
            );
        };
        let mut archived = 0usize;
        if let Some(domain) = targets.snapshot.working_memory.domains.get_mut(id) {
            if domain.status != DomainStatus::Archived {
                *domain = domain.to_stub(DomainStatus::Archived);
                archived = 1;
            }
        }
        (
            "archive_named".to_string(),
            format!("archived bloated domain {id}"),
            RecoveryDeltas {
                domains_archived: archived,
                ..RecoveryDeltas::default()
            },
            archived > 0,
        )
    }

    /// Reset the engine's trailing stats and retune its floors.
    fn retune_engine(
        &self,
        targets: &mut RecoveryTargets<'_>,
        ratio_target: f32,
        relevance_target: f32,
    ) -> (String, String, RecoveryDeltas, bool) {
        targets.engine.retune(ratio_target, relevance_target);
        (
            "retune_engine".to_string(),
            format!("reset engine stats, targets ratio {ratio_target:.1} relevance {relevance_target:.2}"),
            RecoveryDeltas::default(),
            true,
        )
    }

    /// Four checks against the recomputed state; three must pass. A missed
    /// deadline yields an inconclusive verdict instead.
    fn validate(
        &self,
        targets: &RecoveryTargets<'_>,
        zone_before: Zone,
        ratio_achieved: Option<f32>,
        started: Instant,
    ) -> ValidationOutcome {
        if started.elapsed().as_millis() as u64 > self.config.validation_timeout_ms {
            return ValidationOutcome::Inconclusive;
        }
        let assessment = targets.monitor.evaluate(targets.snapshot);
        let state = targets
            .states
            .evaluate(targets.snapshot, &assessment, StateExtras::default());
        let zone_after = targets.zones.classify(&state).zone;

        let mut passed = 0u8;
        if state.magnitude >= 0.4 {
            passed += 1;
        }
        if state.is_viable {
            passed += 1;
        }
        match ratio_achieved {
            Some(ratio) if ratio < self.config.compress_success_ratio => {}
            _ => passed += 1,
        }
        let newly_critical = zone_after >= Zone::Critical && zone_before < Zone::Critical;
        if !newly_critical {
            passed += 1;
        }

        if started.elapsed().as_millis() as u64 > self.config.validation_timeout_ms {
            return ValidationOutcome::Inconclusive;
        }
        if passed >= 3 {
            ValidationOutcome::Validated
        } else {
            ValidationOutcome::Failed
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyKind;
    use crate::config::{HealthConfig, StateConfig, ZoneConfig};
    use crate::context::DomainState;
    use chrono::Utc;

    struct Harness {
        snapshot: ContextSnapshot,
        monitor: HealthMonitor,
        states: StateCalculator,
        engine: CompressionEngine,
        optimizer: BudgetOptimizer,
        zones: ZoneClassifier,
    }

    impl Harness {
        fn new() -> Self {
            let mut snapshot = ContextSnapshot::default();
            for i in 0..4 {
                snapshot.working_memory.domains.insert(
                    format!("domain-{i}"),
                    DomainState {
                        status: if i == 0 {
                            DomainStatus::Active
                        } else {
                            DomainStatus::Inactive
                        },
                        critical_facts: (0..15)
                            .map(|j| format!("critical fact {j} in domain {i}"))
                            .collect(),
                        decisions_made: (0..15).map(|j| format!("decision {j}")).collect(),
                        files_created: (0..15).map(|j| format!("file-{j}.rs")).collect(),
                        ..DomainState::default()
                    },
                );
            }
            Self {
                snapshot,
                monitor: HealthMonitor::new(HealthConfig::default()),
                states: StateCalculator::new(StateConfig::default(), HealthConfig::default()),
                engine: CompressionEngine::default(),
                optimizer: BudgetOptimizer::default(),
                zones: ZoneClassifier::new(ZoneConfig::default()),
            }
        }

        fn targets(&mut self) -> RecoveryTargets<'_> {
            RecoveryTargets {
                snapshot: &mut self.snapshot,
                monitor: &mut self.monitor,
                states: &mut self.states,
                engine: &mut self.engine,
                optimizer: &mut self.optimizer,
                zones: &self.zones,
            }
        }
    }

    fn anomaly(kind: AnomalyKind, severity: f32) -> AnomalyRecord {
        let json = serde_json::json!({
            "kind": kind.as_str(),
            "severity": severity,
            "detected_at": Utc::now(),
            "metrics": {},
            "recommendations": [],
            "domain": null,
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_compress_harder_on_low_severity_rot() {
        let mut harness = Harness::new();
        let mut engine = RecoveryEngine::default();
        let record = anomaly(AnomalyKind::ContextRot, 0.3);
        let result = engine.execute(&record, &mut harness.targets());
        assert_eq!(result.strategy, "compress_harder");
        assert!(result.deltas.ratio_achieved.is_some());
        assert!(result.deltas.size_after_kb <= result.deltas.size_before_kb);
    }

    #[test]
    fn test_archive_lru_on_mid_severity() {
        let mut harness = Harness::new();
        let mut engine = RecoveryEngine::default();
        let record = anomaly(AnomalyKind::ContextExplosion, 0.6);
        let result = engine.execute(&record, &mut harness.targets());
        assert_eq!(result.strategy, "archive_lru");
        assert!(result.success);
        assert_eq!(result.deltas.domains_archived, 2);
        let archived = harness
            .snapshot
            .working_memory
            .domains
            .values()
            .filter(|d| d.status == DomainStatus::Archived)
            .count();
        assert_eq!(archived, 2);
    }

    #[test]
    fn test_deactivate_all_but_top_on_high_severity() {
        let mut harness = Harness::new();
        // Make domain-1 active too, so there is something to deactivate.
        harness
            .snapshot
            .working_memory
            .domains
            .get_mut("domain-1")
            .unwrap()
            .status = DomainStatus::Active;
        let mut engine = RecoveryEngine::default();
        let record = anomaly(AnomalyKind::ContextExplosion, 0.9);
        let result = engine.execute(&record, &mut harness.targets());
        assert_eq!(result.strategy, "deactivate_all_but_top");
        assert!(result.success);
        assert_eq!(harness.snapshot.active_domain_count(), 1);
    }

    #[test]
    fn test_max_attempts_short_circuits_without_mutation() {
        let mut harness = Harness::new();
        let mut engine = RecoveryEngine::default();
        // A tactic guaranteed to fail: truncate with no named domain.
        let record = anomaly(AnomalyKind::DomainBloat, 0.3);

        let max = engine.config().max_attempts;
        for _ in 0..max {
            let result = engine.execute(&record, &mut harness.targets());
            assert!(!result.success);
            assert_ne!(result.reason.as_deref(), Some("max attempts exceeded"));
        }

        let before = harness.snapshot.clone();
        let result = engine.execute(&record, &mut harness.targets());
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("max attempts exceeded"));
        assert_eq!(result.validation, ValidationOutcome::Skipped);
        assert_eq!(harness.snapshot, before, "short-circuit must not mutate");
    }

    #[test]
    fn test_success_resets_attempt_counter() {
        let mut harness = Harness::new();
        let mut engine = RecoveryEngine::default();

        let failing = anomaly(AnomalyKind::DomainBloat, 0.3);
        engine.execute(&failing, &mut harness.targets());
        engine.execute(&failing, &mut harness.targets());
        assert_eq!(engine.attempts_for(AnomalyKind::DomainBloat), 2);

        let mut succeeding = anomaly(AnomalyKind::DomainBloat, 0.9);
        succeeding.domain = Some("domain-1".to_string());
        let result = engine.execute(&succeeding, &mut harness.targets());
        assert!(result.success);
        assert_eq!(engine.attempts_for(AnomalyKind::DomainBloat), 0);
    }

    #[test]
    fn test_truncate_bloated_respects_ceilings() {
        let mut harness = Harness::new();
        harness.snapshot.working_memory.domains.insert(
            "bloated".to_string(),
            DomainState {
                critical_facts: (0..25).map(|i| format!("fact {i}")).collect(),
                files_created: (0..60).map(|i| format!("file-{i}")).collect(),
                ..DomainState::default()
            },
        );
        let mut engine = RecoveryEngine::default();
        let mut record = anomaly(AnomalyKind::DomainBloat, 0.3);
        record.domain = Some("bloated".to_string());
        record.metrics.insert("max_files".into(), 50.0);
        record.metrics.insert("max_facts".into(), 20.0);

        let result = engine.execute(&record, &mut harness.targets());
        assert!(result.success);
        let domain = &harness.snapshot.working_memory.domains["bloated"];
        assert_eq!(domain.files_created.len(), 50);
        assert_eq!(domain.critical_facts.len(), 20);
    }

    #[test]
    fn test_dampen_oscillation_uses_amplitude_times_frequency() {
        let mut harness = Harness::new();
        // Seed an oscillating state history.
        let assessment = harness.monitor.evaluate(&harness.snapshot);
        for _ in 0..10 {
            harness
                .states
                .calculate(&harness.snapshot, &assessment, StateExtras::default());
        }
        let mut engine = RecoveryEngine::default();
        let mut record = anomaly(AnomalyKind::StateOscillation, 0.4);
        record.metrics.insert("amplitude".into(), 0.3);
        record.metrics.insert("frequency".into(), 0.5);
        let result = engine.execute(&record, &mut harness.targets());
        assert_eq!(result.strategy, "dampen_oscillation");
        assert!(result.action.contains("0.65"));
    }

    #[test]
    fn test_retune_engine_always_succeeds() {
        let mut harness = Harness::new();
        let mut engine = RecoveryEngine::default();
        let record = anomaly(AnomalyKind::CompressionDegradation, 0.9);
        let result = engine.execute(&record, &mut harness.targets());
        assert!(result.success);
        assert_eq!(harness.engine.targets(), (2.5, 0.65));
    }

    #[test]
    fn test_reset_windows_clears_histories() {
        let mut harness = Harness::new();
        let snapshot = harness.snapshot.clone();
        harness.monitor.assess(&snapshot);
        harness.optimizer.note_usage(10.0);
        let mut engine = RecoveryEngine::default();
        let record = anomaly(AnomalyKind::MemoryLeak, 0.3);
        let result = engine.execute(&record, &mut harness.targets());
        assert_eq!(result.strategy, "reset_windows");
        assert!(result.success);
        assert!(harness.monitor.history().is_empty());
        assert!(harness.optimizer.usage_history().is_empty());
    }

    #[test]
    fn test_validation_outcome_present_when_enabled() {
        let mut harness = Harness::new();
        let mut engine = RecoveryEngine::default();
        let record = anomaly(AnomalyKind::ContextRot, 0.3);
        let result = engine.execute(&record, &mut harness.targets());
        assert_ne!(result.validation, ValidationOutcome::Skipped);
    }
}
