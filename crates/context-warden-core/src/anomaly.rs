//! Multi-signal anomaly detection over the control loop's rolling state.
//!
//! Six independent, side-effect-free checks inspect the latest state
//! vector, the health and memory histories, and the compression engine's
//! trailing performance. Detectors are non-exclusive: everything that fires
//! in a cycle is returned together, in a fixed detection order.
//!
//! Severity is a linear interpolation between the firing threshold and a
//! configured maximum reference, clamped to [0,1].

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::budget::{MemoryStatus, MemoryUsagePoint};
use crate::compression::EnginePerformance;
use crate::config::AnomalyConfig;
use crate::context::ContextSnapshot;
use crate::health::HealthAssessment;
use crate::state::{StatePatterns, StateVector};

/// The six anti-pattern types, in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ContextRot,
    ContextExplosion,
    MemoryLeak,
    StateOscillation,
    DomainBloat,
    CompressionDegradation,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::ContextRot => "context_rot",
            AnomalyKind::ContextExplosion => "context_explosion",
            AnomalyKind::MemoryLeak => "memory_leak",
            AnomalyKind::StateOscillation => "state_oscillation",
            AnomalyKind::DomainBloat => "domain_bloat",
            AnomalyKind::CompressionDegradation => "compression_degradation",
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub kind: AnomalyKind,
    /// Interpolated severity in [0,1].
    pub severity: f32,
    pub detected_at: DateTime<Utc>,
    /// Numeric evidence backing the detection.
    pub metrics: BTreeMap<String, f32>,
    pub recommendations: Vec<String>,
    /// Offending domain, for per-domain anomalies.
    pub domain: Option<String>,
}

impl AnomalyRecord {
    fn new(kind: AnomalyKind, severity: f32) -> Self {
        Self {
            kind,
            severity: severity.clamp(0.0, 1.0),
            detected_at: Utc::now(),
            metrics: BTreeMap::new(),
            recommendations: Vec::new(),
            domain: None,
        }
    }

    fn with_metric(mut self, key: &str, value: f32) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    fn with_recommendation(mut self, text: impl Into<String>) -> Self {
        self.recommendations.push(text.into());
        self
    }
}

/// Read-only inputs for one detection pass.
#[derive(Debug, Clone, Copy)]
pub struct DetectionInputs<'a> {
    pub state: &'a StateVector,
    pub patterns: &'a StatePatterns,
    pub health_history: &'a VecDeque<HealthAssessment>,
    pub usage_history: &'a VecDeque<MemoryUsagePoint>,
    pub memory: &'a MemoryStatus,
    pub engine: &'a EnginePerformance,
    /// The engine's tuned (ratio, relevance) floors.
    pub engine_targets: (f32, f32),
    pub snapshot: &'a ContextSnapshot,
}

/// Runs the six checks. Holds only configuration; all inputs arrive
/// per-call, so detection is side-effect-free.
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Run every check and return all firing anomalies in detection order.
    pub fn detect(&self, inputs: &DetectionInputs<'_>) -> Vec<AnomalyRecord> {
        let mut anomalies = Vec::new();
        if let Some(a) = self.check_context_rot(inputs) {
            anomalies.push(a);
        }
        if let Some(a) = self.check_context_explosion(inputs) {
            anomalies.push(a);
        }
        if let Some(a) = self.check_memory_leak(inputs) {
            anomalies.push(a);
        }
        if let Some(a) = self.check_state_oscillation(inputs) {
            anomalies.push(a);
        }
        anomalies.extend(self.check_domain_bloat(inputs));
        if let Some(a) = self.check_compression_degradation(inputs) {
            anomalies.push(a);
        }
        if !anomalies.is_empty() {
            debug!(count = anomalies.len(), "anomalies detected");
        }
        anomalies
    }

    /// Persistent hysteresis breaches: the current assessment breaches and
    /// at least `rot_breach_min` of the recent window did too.
    fn check_context_rot(&self, inputs: &DetectionInputs<'_>) -> Option<AnomalyRecord> {
        let latest = inputs.health_history.back()?;
        if latest.hysteresis <= self.config.rot_hysteresis_threshold {
            return None;
        }
        let window = self.config.rot_breach_window;
        let start = inputs.health_history.len().saturating_sub(window);
        let breaches = inputs
            .health_history
            .range(start..)
            .filter(|a| a.hysteresis > 0.0)
            .count();
        if breaches < self.config.rot_breach_min {
            return None;
        }
        let fraction = breaches as f32 / window as f32;
        let severity = interpolate(
            fraction,
            self.config.rot_breach_min as f32 / window as f32,
            1.0,
        );
        Some(
            AnomalyRecord::new(AnomalyKind::ContextRot, severity)
                .with_metric("breaches", breaches as f32)
                .with_metric("window", window as f32)
                .with_metric("size_kb", latest.size_kb)
                .with_recommendation("compress the context toward the stable ratio")
                .with_recommendation("archive domains untouched in recent sessions"),
        )
    }

    /// Hard size breach, or a complexity surge across the recent samples.
    fn check_context_explosion(&self, inputs: &DetectionInputs<'_>) -> Option<AnomalyRecord> {
        if inputs.memory.total_kb > self.config.explosion_hard_kb {
            let severity = interpolate(
                inputs.memory.total_kb,
                self.config.explosion_hard_kb,
                self.config.explosion_max_kb,
            );
            return Some(
                AnomalyRecord::new(AnomalyKind::ContextExplosion, severity)
                    .with_metric("total_kb", inputs.memory.total_kb)
                    .with_metric("hard_kb", self.config.explosion_hard_kb)
                    .with_recommendation("run an emergency compression pass")
                    .with_recommendation("deactivate all but the most active domain"),
            );
        }

        let latest = inputs.health_history.back()?;
        if latest.complexity <= self.config.explosion_complexity_threshold {
            return None;
        }
        let window = self.config.explosion_growth_window;
        let start = inputs.health_history.len().checked_sub(window)?;
        let first = inputs.health_history.get(start)?.complexity;
        if first <= f32::EPSILON {
            return None;
        }
        let growth = (latest.complexity - first) / first;
        if growth < self.config.explosion_growth_fraction {
            return None;
        }
        let severity = interpolate(
            latest.complexity,
            self.config.explosion_complexity_threshold,
            1.0,
        );
        Some(
            AnomalyRecord::new(AnomalyKind::ContextExplosion, severity)
                .with_metric("complexity", latest.complexity)
                .with_metric("growth", growth)
                .with_recommendation("run an emergency compression pass"),
        )
    }

    /// Sustained growth across the usage history. Requires a full minimum
    /// window of samples before it can fire.
    fn check_memory_leak(&self, inputs: &DetectionInputs<'_>) -> Option<AnomalyRecord> {
        if inputs.usage_history.len() < self.config.leak_min_samples {
            return None;
        }
        let first = inputs.usage_history.front()?.total_kb;
        let last = inputs.usage_history.back()?.total_kb;
        if first <= f32::EPSILON {
            return None;
        }
        let growth = (last - first) / first;
        if growth <= self.config.leak_growth_threshold {
            return None;
        }
        let severity = interpolate(
            growth,
            self.config.leak_growth_threshold,
            self.config.leak_growth_max,
        );
        Some(
            AnomalyRecord::new(AnomalyKind::MemoryLeak, severity)
                .with_metric("growth", growth)
                .with_metric("first_kb", first)
                .with_metric("last_kb", last)
                .with_metric("samples", inputs.usage_history.len() as f32)
                .with_recommendation("reset rolling history windows")
                .with_recommendation("archive least-recently-used domains"),
        )
    }

    /// Reuses the state calculator's oscillation output.
    fn check_state_oscillation(&self, inputs: &DetectionInputs<'_>) -> Option<AnomalyRecord> {
        let oscillation = &inputs.patterns.oscillation;
        if !oscillation.detected
            || oscillation.frequency <= self.config.oscillation_frequency_threshold
        {
            return None;
        }
        let severity = interpolate(
            oscillation.frequency,
            self.config.oscillation_frequency_threshold,
            1.0,
        );
        Some(
            AnomalyRecord::new(AnomalyKind::StateOscillation, severity)
                .with_metric("frequency", oscillation.frequency)
                .with_metric("amplitude", oscillation.amplitude)
                .with_recommendation("dampen oscillating dimensions via exponential smoothing"),
        )
    }

    /// Any domain past the file-count or fact-count ceiling fires its own
    /// record naming the domain.
    fn check_domain_bloat(&self, inputs: &DetectionInputs<'_>) -> Vec<AnomalyRecord> {
        let max_files = self.config.bloat_max_files;
        let max_facts = self.config.bloat_max_facts;
        inputs
            .snapshot
            .working_memory
            .domains
            .iter()
            .filter_map(|(id, domain)| {
                let files = domain.files_created.len();
                let facts = domain.critical_facts.len();
                if files <= max_files && facts <= max_facts {
                    return None;
                }
                let file_factor = files as f32 / max_files as f32;
                let fact_factor = facts as f32 / max_facts as f32;
                let severity = interpolate(file_factor.max(fact_factor), 1.0, 2.0);
                let mut record = AnomalyRecord::new(AnomalyKind::DomainBloat, severity)
                    .with_metric("files", files as f32)
                    .with_metric("facts", facts as f32)
                    .with_metric("max_files", max_files as f32)
                    .with_metric("max_facts", max_facts as f32)
                    .with_recommendation("truncate the domain's payload to its ceilings");
                record.domain = Some(id.clone());
                Some(record)
            })
            .collect()
    }

    /// Engine trailing averages under its tuned floors.
    fn check_compression_degradation(
        &self,
        inputs: &DetectionInputs<'_>,
    ) -> Option<AnomalyRecord> {
        let perf = inputs.engine;
        if perf.samples < self.config.degradation_min_samples {
            return None;
        }
        let (_, relevance_target) = inputs.engine_targets;
        let ratio_bad = perf.avg_ratio < self.config.degradation_min_ratio;
        let relevance_bad = perf.avg_relevance < relevance_target.min(self.config.degradation_min_relevance);
        let duration_bad = perf.avg_duration_ms > self.config.degradation_max_duration_ms;
        if !(ratio_bad || relevance_bad || duration_bad) {
            return None;
        }

        let ratio_severity = interpolate(
            self.config.degradation_min_ratio - perf.avg_ratio,
            0.0,
            self.config.degradation_min_ratio - 1.0,
        );
        let duration_severity = interpolate(
            perf.avg_duration_ms,
            self.config.degradation_max_duration_ms,
            self.config.degradation_max_duration_ms * 3.0,
        );
        let mut severity = 0.0f32;
        if ratio_bad {
            severity = severity.max(ratio_severity);
        }
        if duration_bad {
            severity = severity.max(duration_severity);
        }
        if relevance_bad {
            severity = severity.max(0.5);
        }

        Some(
            AnomalyRecord::new(AnomalyKind::CompressionDegradation, severity)
                .with_metric("avg_ratio", perf.avg_ratio)
                .with_metric("avg_relevance", perf.avg_relevance)
                .with_metric("avg_duration_ms", perf.avg_duration_ms)
                .with_recommendation("reset and retune the compression engine"),
        )
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }
}

/// Linear interpolation of severity between a firing threshold and a
/// maximum reference, clamped to [0,1].
fn interpolate(value: f32, threshold: f32, max: f32) -> f32 {
    if max <= threshold {
        return 1.0;
    }
    ((value - threshold) / (max - threshold)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DomainState, DomainStatus};
    use crate::health::HealthMonitor;
    use crate::state::OscillationPattern;

    struct Fixture {
        state: StateVector,
        patterns: StatePatterns,
        health_history: VecDeque<HealthAssessment>,
        usage_history: VecDeque<MemoryUsagePoint>,
        memory: MemoryStatus,
        engine: EnginePerformance,
        snapshot: ContextSnapshot,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                state: StateVector {
                    form: 0.8,
                    function: 0.8,
                    behavior: 0.8,
                    context: 0.8,
                    magnitude: 0.8,
                    is_viable: true,
                    timestamp: Utc::now(),
                },
                patterns: StatePatterns::default(),
                health_history: VecDeque::new(),
                usage_history: VecDeque::new(),
                memory: MemoryStatus::default(),
                engine: EnginePerformance::default(),
                snapshot: ContextSnapshot::default(),
            }
        }

        fn inputs(&self) -> DetectionInputs<'_> {
            DetectionInputs {
                state: &self.state,
                patterns: &self.patterns,
                health_history: &self.health_history,
                usage_history: &self.usage_history,
                memory: &self.memory,
                engine: &self.engine,
                engine_targets: (2.0, 0.6),
                snapshot: &self.snapshot,
            }
        }

        fn push_health(&mut self, hysteresis: f32, complexity: f32) {
            let mut assessment = HealthAssessment::neutral();
            assessment.hysteresis = hysteresis;
            assessment.complexity = complexity;
            self.health_history.push_back(assessment);
        }

        fn push_usage(&mut self, kb: f32) {
            self.usage_history.push_back(MemoryUsagePoint {
                timestamp: Utc::now(),
                total_kb: kb,
            });
        }
    }

    fn detector() -> AnomalyDetector {
        AnomalyDetector::default()
    }

    #[test]
    fn test_quiet_inputs_fire_nothing() {
        let fixture = Fixture::new();
        assert!(detector().detect(&fixture.inputs()).is_empty());
    }

    #[test]
    fn test_context_rot_requires_persistent_breaches() {
        let mut fixture = Fixture::new();
        // Two breaches out of five: below the minimum of three.
        for h in [0.0, 1.0, 0.0, 1.0, 1.0] {
            fixture.push_health(h, 0.1);
        }
        let fired = detector().detect(&fixture.inputs());
        assert!(fired.iter().any(|a| a.kind == AnomalyKind::ContextRot));

        let mut calm = Fixture::new();
        for h in [0.0, 0.0, 0.0, 1.0, 1.0] {
            calm.push_health(h, 0.1);
        }
        let fired = detector().detect(&calm.inputs());
        assert!(!fired.iter().any(|a| a.kind == AnomalyKind::ContextRot));
    }

    #[test]
    fn test_context_explosion_on_hard_kb() {
        let mut fixture = Fixture::new();
        fixture.memory.total_kb = 200.0;
        let fired = detector().detect(&fixture.inputs());
        let explosion = fired
            .iter()
            .find(|a| a.kind == AnomalyKind::ContextExplosion)
            .expect("explosion should fire");
        assert!(explosion.severity > 0.0);
        assert_eq!(explosion.metrics["total_kb"], 200.0);
    }

    #[test]
    fn test_context_explosion_on_complexity_surge() {
        let mut fixture = Fixture::new();
        fixture.push_health(0.0, 0.5);
        fixture.push_health(0.0, 0.7);
        fixture.push_health(0.0, 0.9);
        let fired = detector().detect(&fixture.inputs());
        assert!(fired.iter().any(|a| a.kind == AnomalyKind::ContextExplosion));
    }

    #[test]
    fn test_memory_leak_needs_ten_samples() {
        let mut fixture = Fixture::new();
        // ~20% growth per cycle: 10, 12, 14.4, ...
        let mut kb = 10.0;
        for _ in 0..9 {
            fixture.push_usage(kb);
            kb *= 1.2;
        }
        let fired = detector().detect(&fixture.inputs());
        assert!(
            !fired.iter().any(|a| a.kind == AnomalyKind::MemoryLeak),
            "nine samples must not fire"
        );

        fixture.push_usage(kb);
        let fired = detector().detect(&fixture.inputs());
        let leak = fired
            .iter()
            .find(|a| a.kind == AnomalyKind::MemoryLeak)
            .expect("ten growing samples must fire");
        assert!(leak.metrics["growth"] > 0.5);
    }

    #[test]
    fn test_oscillation_reuses_state_pattern() {
        let mut fixture = Fixture::new();
        fixture.patterns.oscillation = OscillationPattern {
            detected: true,
            frequency: 0.5,
            amplitude: 0.2,
        };
        let fired = detector().detect(&fixture.inputs());
        let oscillation = fired
            .iter()
            .find(|a| a.kind == AnomalyKind::StateOscillation)
            .expect("oscillation should fire");
        assert!(oscillation.severity > 0.0);
    }

    #[test]
    fn test_domain_bloat_names_exactly_the_offender() {
        let mut fixture = Fixture::new();
        // 40 domains, one over both ceilings.
        for i in 0..40 {
            let (files, facts) = if i == 7 { (60, 25) } else { (3, 2) };
            fixture.snapshot.working_memory.domains.insert(
                format!("domain-{i}"),
                DomainState {
                    status: DomainStatus::Active,
                    critical_facts: (0..facts).map(|j| format!("fact {j}")).collect(),
                    files_created: (0..files).map(|j| format!("file-{j}.rs")).collect(),
                    ..DomainState::default()
                },
            );
        }
        let fired = detector().detect(&fixture.inputs());
        let bloat: Vec<_> = fired
            .iter()
            .filter(|a| a.kind == AnomalyKind::DomainBloat)
            .collect();
        assert_eq!(bloat.len(), 1);
        assert_eq!(bloat[0].domain.as_deref(), Some("domain-7"));
    }

    #[test]
    fn test_compression_degradation_on_low_ratio() {
        let mut fixture = Fixture::new();
        fixture.engine = EnginePerformance {
            samples: 10,
            avg_ratio: 1.2,
            avg_relevance: 0.9,
            avg_duration_ms: 5.0,
        };
        let fired = detector().detect(&fixture.inputs());
        assert!(fired
            .iter()
            .any(|a| a.kind == AnomalyKind::CompressionDegradation));

        // Too few samples: silent.
        fixture.engine.samples = 2;
        let fired = detector().detect(&fixture.inputs());
        assert!(!fired
            .iter()
            .any(|a| a.kind == AnomalyKind::CompressionDegradation));
    }

    #[test]
    fn test_detectors_cofire_independently() {
        let mut fixture = Fixture::new();
        fixture.memory.total_kb = 200.0;
        let mut kb = 10.0;
        for _ in 0..10 {
            fixture.push_usage(kb);
            kb *= 1.2;
        }
        let fired = detector().detect(&fixture.inputs());
        assert!(fired.iter().any(|a| a.kind == AnomalyKind::ContextExplosion));
        assert!(fired.iter().any(|a| a.kind == AnomalyKind::MemoryLeak));
    }

    #[test]
    fn test_severity_interpolation_clamped() {
        assert_eq!(interpolate(0.5, 1.0, 2.0), 0.0);
        assert_eq!(interpolate(3.0, 1.0, 2.0), 1.0);
        assert!((interpolate(1.5, 1.0, 2.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_detection_has_no_side_effects() {
        let mut fixture = Fixture::new();
        fixture.memory.total_kb = 200.0;
        let before = fixture.snapshot.clone();
        let d = detector();
        d.detect(&fixture.inputs());
        d.detect(&fixture.inputs());
        assert_eq!(fixture.snapshot, before);
    }

    #[test]
    fn test_real_monitor_history_feeds_rot() {
        // End-to-end shape check with a real monitor history.
        let mut monitor = HealthMonitor::default();
        let mut snapshot = ContextSnapshot::default();
        snapshot.working_memory.domains.insert(
            "d".into(),
            DomainState {
                critical_facts: (0..30).map(|i| format!("a long critical fact {i}")).collect(),
                ..DomainState::default()
            },
        );
        snapshot.context_health.size_limit_kb = 0.5;
        for _ in 0..5 {
            monitor.assess(&snapshot);
        }
        let mut fixture = Fixture::new();
        fixture.health_history = monitor.history().clone();
        let fired = detector().detect(&fixture.inputs());
        assert!(fired.iter().any(|a| a.kind == AnomalyKind::ContextRot));
    }
}
