//! Four-dimensional state vector over a context snapshot.
//!
//! Combines the health metrics with structural signals from the snapshot
//! into Form / Function / Behavior / Context dimensions, each in [0,1],
//! plus a weighted magnitude and a viability verdict. A bounded history
//! feeds velocity (per-second slope of each dimension) and pattern
//! detection (per-dimension degradation via linear regression, oscillation
//! via local-extrema counting on the magnitude series).
//!
//! The calculator reads its inputs and never mutates them.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{HealthConfig, StateConfig};
use crate::context::{ContextSnapshot, Domain};
use crate::health::HealthAssessment;
use crate::normalize::{normalize, normalize_inverted, Band, Curve};

/// Names of the four dimensions, in storage order.
pub const DIMENSION_NAMES: [&str; 4] = ["form", "function", "behavior", "context"];

/// A point-in-time state of the working context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub form: f32,
    pub function: f32,
    pub behavior: f32,
    pub context: f32,

    /// Weighted Euclidean norm of the four dimensions.
    pub magnitude: f32,

    /// True when every dimension reaches the viability threshold.
    pub is_viable: bool,

    pub timestamp: DateTime<Utc>,
}

impl StateVector {
    #[inline]
    pub fn dimensions(&self) -> [f32; 4] {
        [self.form, self.function, self.behavior, self.context]
    }

    fn set_dimension(&mut self, idx: usize, value: f32) {
        match idx {
            0 => self.form = value,
            1 => self.function = value,
            2 => self.behavior = value,
            _ => self.context = value,
        }
    }
}

/// Per-dimension rate of change, per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StateVelocity {
    pub form: f32,
    pub function: f32,
    pub behavior: f32,
    pub context: f32,
}

impl StateVelocity {
    pub fn as_array(&self) -> [f32; 4] {
        [self.form, self.function, self.behavior, self.context]
    }

    /// Mean of the component velocities, the overall drift rate.
    pub fn mean(&self) -> f32 {
        self.as_array().iter().sum::<f32>() / 4.0
    }
}

/// Direction the state is heading, derived from velocity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trajectory {
    Improving,
    #[default]
    Steady,
    Degrading,
}

/// Dimensions whose regression slope fell below the degradation cutoff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DegradationPattern {
    pub detected: bool,
    pub dimensions: Vec<String>,
}

/// Oscillation summary over the recent magnitude series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OscillationPattern {
    pub detected: bool,
    /// Local extrema per sample in the analysis window.
    pub frequency: f32,
    /// Half the peak-to-peak magnitude range.
    pub amplitude: f32,
}

/// Combined pattern report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePatterns {
    pub degradation: DegradationPattern,
    pub oscillation: OscillationPattern,
}

/// Optional extra signals for a state computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateExtras<'a> {
    /// Most recent cycle latency, feeding the behavior dimension.
    pub latency_ms: Option<f32>,
    /// Domain descriptors for dependency/coupling scoring.
    pub domains: Option<&'a [Domain]>,
}

/// Computes state vectors and maintains their bounded history.
#[derive(Debug, Clone)]
pub struct StateCalculator {
    config: StateConfig,
    health: HealthConfig,
    history: VecDeque<StateVector>,
}

impl StateCalculator {
    pub fn new(config: StateConfig, health: HealthConfig) -> Self {
        let cap = config.history_cap;
        Self {
            config,
            health,
            history: VecDeque::with_capacity(cap),
        }
    }

    /// Compute the state, record it, and return it.
    pub fn calculate(
        &mut self,
        snapshot: &ContextSnapshot,
        assessment: &HealthAssessment,
        extras: StateExtras<'_>,
    ) -> StateVector {
        let state = self.evaluate(snapshot, assessment, extras);
        self.history.push_back(state.clone());
        while self.history.len() > self.config.history_cap {
            self.history.pop_front();
        }
        state
    }

    /// Compute a state without recording it. Used to validate compression
    /// results without polluting the trend history.
    pub fn evaluate(
        &self,
        snapshot: &ContextSnapshot,
        assessment: &HealthAssessment,
        extras: StateExtras<'_>,
    ) -> StateVector {
        let form = self.form_score(snapshot, assessment);
        let function = self.function_score(snapshot, assessment);
        let behavior = self.behavior_score(assessment, extras.latency_ms);
        let context = self.context_score(snapshot, assessment, extras.domains);

        let dims = [form, function, behavior, context];
        let weights = self.config.weights.as_array();
        let magnitude = dims
            .iter()
            .zip(weights.iter())
            .map(|(d, w)| w * d * d)
            .sum::<f32>()
            .sqrt()
            .clamp(0.0, 1.0);

        let is_viable = dims.iter().all(|d| *d >= self.config.viability_threshold);

        StateVector {
            form,
            function,
            behavior,
            context,
            magnitude,
            is_viable,
            timestamp: Utc::now(),
        }
    }

    /// Form = 0.4*schema compliance + 0.3*size efficiency + 0.3*symmetry.
    fn form_score(&self, snapshot: &ContextSnapshot, assessment: &HealthAssessment) -> f32 {
        let domains = &snapshot.working_memory.domains;
        let schema_compliance = if domains.is_empty() {
            1.0
        } else {
            let compliant = domains
                .values()
                .filter(|d| d.item_count() > 0 || d.is_active())
                .count();
            compliant as f32 / domains.len() as f32
        };

        let limit = snapshot.context_health.size_limit_kb.max(f32::EPSILON);
        let size_efficiency = (1.0 - assessment.size_kb / limit).clamp(0.0, 1.0);

        let symmetry = normalize(assessment.symmetry, self.health.symmetry_band, Curve::Linear);

        (0.4 * schema_compliance + 0.3 * size_efficiency + 0.3 * symmetry).clamp(0.0, 1.0)
    }

    /// Function = 0.5*semantic relevance + 0.3*intent preservation
    /// + 0.2*momentum.
    fn function_score(&self, snapshot: &ContextSnapshot, assessment: &HealthAssessment) -> f32 {
        let domains = &snapshot.working_memory.domains;
        let active: Vec<_> = domains.values().filter(|d| d.is_active()).collect();

        let semantic_relevance = if active.is_empty() {
            1.0
        } else {
            active
                .iter()
                .filter(|d| !d.critical_facts.is_empty())
                .count() as f32
                / active.len() as f32
        };

        let intent_preservation = if domains.is_empty() {
            1.0
        } else {
            domains
                .values()
                .filter(|d| !d.decisions_made.is_empty())
                .count() as f32
                / domains.len() as f32
        };

        let momentum = normalize(assessment.momentum, self.health.momentum_band, Curve::Linear);

        (0.5 * semantic_relevance + 0.3 * intent_preservation + 0.2 * momentum).clamp(0.0, 1.0)
    }

    /// Behavior = equal parts inverted hysteresis, inverted complexity,
    /// momentum, and latency health.
    fn behavior_score(&self, assessment: &HealthAssessment, latency_ms: Option<f32>) -> f32 {
        let hysteresis = normalize_inverted(assessment.hysteresis, Band::new(0.0, 1.0), Curve::Linear);
        let complexity =
            normalize_inverted(assessment.complexity, self.health.complexity_band, Curve::Linear);
        let momentum = normalize(assessment.momentum, self.health.momentum_band, Curve::Linear);
        let performance = match latency_ms {
            Some(latency) => normalize_inverted(latency, self.config.latency_band, Curve::Linear),
            None => 0.75,
        };

        (0.25 * hysteresis + 0.25 * complexity + 0.25 * momentum + 0.25 * performance)
            .clamp(0.0, 1.0)
    }

    /// Context = 0.4*fairness + 0.3*dependency health + 0.3*coupling balance.
    fn context_score(
        &self,
        snapshot: &ContextSnapshot,
        assessment: &HealthAssessment,
        domains: Option<&[Domain]>,
    ) -> f32 {
        let fairness = normalize(assessment.fairness, self.health.fairness_band, Curve::Linear);

        let (dependency_health, coupling_balance) = match domains {
            None => (0.75, 0.75),
            Some(descriptors) if descriptors.is_empty() => (0.75, 0.75),
            Some(descriptors) => {
                let known: std::collections::BTreeSet<&str> = descriptors
                    .iter()
                    .map(|d| d.id.as_str())
                    .chain(snapshot.working_memory.domains.keys().map(|k| k.as_str()))
                    .collect();

                let mut total_deps = 0usize;
                let mut resolved = 0usize;
                let mut balance_sum = 0.0;
                for descriptor in descriptors {
                    total_deps += descriptor.dependencies.internal.len();
                    resolved += descriptor
                        .dependencies
                        .internal
                        .iter()
                        .filter(|dep| known.contains(dep.as_str()))
                        .count();

                    let deps = descriptor.dependencies.total() as f32;
                    let dependents = descriptor.dependents.len() as f32;
                    let sum = deps + dependents;
                    balance_sum += if sum == 0.0 {
                        1.0
                    } else {
                        1.0 - (deps - dependents).abs() / sum
                    };
                }

                let health = if total_deps == 0 {
                    1.0
                } else {
                    resolved as f32 / total_deps as f32
                };
                (health, balance_sum / descriptors.len() as f32)
            }
        };

        (0.4 * fairness + 0.3 * dependency_health + 0.3 * coupling_balance).clamp(0.0, 1.0)
    }

    /// Per-dimension slope between the last two recorded states, per second.
    /// Zero until two states exist.
    pub fn velocity(&self) -> StateVelocity {
        let len = self.history.len();
        if len < 2 {
            return StateVelocity::default();
        }
        let prev = &self.history[len - 2];
        let last = &self.history[len - 1];
        let dt_secs = ((last.timestamp - prev.timestamp).num_milliseconds() as f32 / 1000.0)
            .max(0.001);
        let d = |a: f32, b: f32| (b - a) / dt_secs;
        StateVelocity {
            form: d(prev.form, last.form),
            function: d(prev.function, last.function),
            behavior: d(prev.behavior, last.behavior),
            context: d(prev.context, last.context),
        }
    }

    /// Overall direction derived from velocity, with a small deadband.
    pub fn trajectory(&self) -> Trajectory {
        let mean = self.velocity().mean();
        if mean < -0.005 {
            Trajectory::Degrading
        } else if mean > 0.005 {
            Trajectory::Improving
        } else {
            Trajectory::Steady
        }
    }

    /// Detect degradation and oscillation over the recent window.
    pub fn detect_patterns(&self) -> StatePatterns {
        let window = self.config.pattern_window;
        let start = self.history.len().saturating_sub(window);
        let recent: Vec<&StateVector> = self.history.range(start..).collect();

        let mut degraded = Vec::new();
        if recent.len() >= 3 {
            for (idx, name) in DIMENSION_NAMES.iter().enumerate() {
                let series: Vec<f32> = recent.iter().map(|s| s.dimensions()[idx]).collect();
                if regression_slope(&series) < self.config.degradation_slope {
                    degraded.push((*name).to_string());
                }
            }
        }

        let magnitudes: Vec<f32> = recent.iter().map(|s| s.magnitude).collect();
        let oscillation = detect_oscillation(&magnitudes, self.config.oscillation_ratio);

        StatePatterns {
            degradation: DegradationPattern {
                detected: !degraded.is_empty(),
                dimensions: degraded,
            },
            oscillation,
        }
    }

    pub fn history(&self) -> &VecDeque<StateVector> {
        &self.history
    }

    pub fn latest(&self) -> Option<&StateVector> {
        self.history.back()
    }

    /// Drop all recorded states.
    pub fn reset_history(&mut self) {
        self.history.clear();
    }

    /// Apply exponential smoothing across the recorded history, dampening
    /// oscillation. Returns (amplitude before, amplitude after) over the
    /// pattern window.
    pub fn smooth_history(&mut self, alpha: f32) -> (f32, f32) {
        let alpha = alpha.clamp(0.0, 0.95);
        let before = self.detect_patterns().oscillation.amplitude;
        let weights = self.config.weights.as_array();
        for i in 1..self.history.len() {
            let prev = self.history[i - 1].clone();
            let current = &mut self.history[i];
            for d in 0..4 {
                let smoothed =
                    alpha * prev.dimensions()[d] + (1.0 - alpha) * current.dimensions()[d];
                current.set_dimension(d, smoothed);
            }
            let dims = current.dimensions();
            current.magnitude = dims
                .iter()
                .zip(weights.iter())
                .map(|(d, w)| w * d * d)
                .sum::<f32>()
                .sqrt()
                .clamp(0.0, 1.0);
        }
        let after = self.detect_patterns().oscillation.amplitude;
        (before, after)
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }
}

/// Least-squares slope of a series against its index. Zero for fewer than
/// two samples or a degenerate denominator.
pub fn regression_slope(series: &[f32]) -> f32 {
    let n = series.len() as f32;
    if series.len() < 2 {
        return 0.0;
    }
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    for (i, y) in series.iter().enumerate() {
        let x = i as f32;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }
    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f32::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Count local extrema in `series` and report oscillation when the
/// extrema-per-sample ratio exceeds `ratio_threshold`.
pub fn detect_oscillation(series: &[f32], ratio_threshold: f32) -> OscillationPattern {
    if series.len() < 3 {
        return OscillationPattern::default();
    }
    let mut extrema = 0usize;
    for i in 1..series.len() - 1 {
        let left = series[i] - series[i - 1];
        let right = series[i + 1] - series[i];
        if left * right < 0.0 {
            extrema += 1;
        }
    }
    let frequency = extrema as f32 / series.len() as f32;
    let max = series.iter().cloned().fold(f32::MIN, f32::max);
    let min = series.iter().cloned().fold(f32::MAX, f32::min);
    OscillationPattern {
        detected: frequency > ratio_threshold,
        frequency,
        amplitude: (max - min) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DomainDependencies, DomainState, DomainStatus};

    fn calculator() -> StateCalculator {
        StateCalculator::new(StateConfig::default(), HealthConfig::default())
    }

    fn populated_snapshot() -> ContextSnapshot {
        let mut snapshot = ContextSnapshot::default();
        for i in 0..4 {
            snapshot.working_memory.domains.insert(
                format!("d{i}"),
                DomainState {
                    status: if i < 2 {
                        DomainStatus::Active
                    } else {
                        DomainStatus::Inactive
                    },
                    critical_facts: vec![format!("fact-{i}")],
                    decisions_made: vec![format!("decision-{i}")],
                    files_created: vec![format!("file-{i}.rs")],
                    ..DomainState::default()
                },
            );
        }
        snapshot
    }

    fn assessment_for(snapshot: &ContextSnapshot) -> HealthAssessment {
        crate::health::HealthMonitor::default().evaluate(snapshot)
    }

    // ------------------------------------------------------------------
    // dimension invariants
    // ------------------------------------------------------------------

    #[test]
    fn test_all_dimensions_in_unit_interval() {
        let mut calc = calculator();
        let snapshot = populated_snapshot();
        let assessment = assessment_for(&snapshot);
        let state = calc.calculate(&snapshot, &assessment, StateExtras::default());

        for (name, d) in DIMENSION_NAMES.iter().zip(state.dimensions()) {
            assert!((0.0..=1.0).contains(&d), "{name} out of range: {d}");
        }
        assert!((0.0..=1.0).contains(&state.magnitude));
    }

    #[test]
    fn test_empty_snapshot_is_well_formed() {
        let mut calc = calculator();
        let snapshot = ContextSnapshot::default();
        let assessment = assessment_for(&snapshot);
        let state = calc.calculate(&snapshot, &assessment, StateExtras::default());
        for d in state.dimensions() {
            assert!((0.0..=1.0).contains(&d));
        }
    }

    #[test]
    fn test_viability_requires_every_dimension() {
        let mut calc = calculator();
        let snapshot = populated_snapshot();
        let assessment = assessment_for(&snapshot);
        let state = calc.calculate(&snapshot, &assessment, StateExtras::default());
        let threshold = calc.config().viability_threshold;
        assert_eq!(
            state.is_viable,
            state.dimensions().iter().all(|d| *d >= threshold)
        );
    }

    #[test]
    fn test_input_not_mutated() {
        let mut calc = calculator();
        let snapshot = populated_snapshot();
        let copy = snapshot.clone();
        let assessment = assessment_for(&snapshot);
        calc.calculate(&snapshot, &assessment, StateExtras::default());
        assert_eq!(snapshot, copy);
    }

    #[test]
    fn test_dependency_scoring_with_descriptors() {
        let calc = calculator();
        let snapshot = populated_snapshot();
        let assessment = assessment_for(&snapshot);

        let resolved = Domain {
            id: "d0".into(),
            dependencies: DomainDependencies {
                internal: vec!["d1".into()],
                external: vec![],
            },
            dependents: vec!["d1".into()],
            ..Domain::default()
        };
        let dangling = Domain {
            id: "dx".into(),
            dependencies: DomainDependencies {
                internal: vec!["missing".into()],
                external: vec![],
            },
            ..Domain::default()
        };

        let good = calc.evaluate(
            &snapshot,
            &assessment,
            StateExtras {
                domains: Some(std::slice::from_ref(&resolved)),
                ..StateExtras::default()
            },
        );
        let bad = calc.evaluate(
            &snapshot,
            &assessment,
            StateExtras {
                domains: Some(std::slice::from_ref(&dangling)),
                ..StateExtras::default()
            },
        );
        assert!(good.context > bad.context);
    }

    // ------------------------------------------------------------------
    // velocity and trajectory
    // ------------------------------------------------------------------

    #[test]
    fn test_velocity_zero_until_two_samples() {
        let mut calc = calculator();
        assert_eq!(calc.velocity(), StateVelocity::default());

        let snapshot = populated_snapshot();
        let assessment = assessment_for(&snapshot);
        calc.calculate(&snapshot, &assessment, StateExtras::default());
        assert_eq!(calc.velocity(), StateVelocity::default());

        calc.calculate(&snapshot, &assessment, StateExtras::default());
        // Identical states: velocity exists but is zero.
        assert!(calc.velocity().mean().abs() < 1e-6);
        assert_eq!(calc.trajectory(), Trajectory::Steady);
    }

    // ------------------------------------------------------------------
    // patterns
    // ------------------------------------------------------------------

    #[test]
    fn test_regression_slope_signs() {
        assert!(regression_slope(&[1.0, 2.0, 3.0, 4.0]) > 0.0);
        assert!(regression_slope(&[4.0, 3.0, 2.0, 1.0]) < 0.0);
        assert!(regression_slope(&[2.0, 2.0, 2.0]).abs() < 1e-6);
    }

    #[test]
    fn test_oscillation_zigzag_period_4_over_12_samples() {
        // Period-4 zig-zag: two up, two down.
        let series: Vec<f32> = (0..12)
            .map(|i| match i % 4 {
                0 => 0.4,
                1 => 0.6,
                2 => 0.8,
                _ => 0.6,
            })
            .collect();
        let pattern = detect_oscillation(&series, 0.3);
        assert!(pattern.detected);
        // Frequency is extrema over the 12-sample window.
        let expected_extrema = series
            .windows(3)
            .filter(|w| (w[1] - w[0]) * (w[2] - w[1]) < 0.0)
            .count() as f32;
        assert!((pattern.frequency - expected_extrema / 12.0).abs() < 1e-6);
        assert!((pattern.amplitude - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_oscillation_monotone_series_not_detected() {
        let series: Vec<f32> = (0..12).map(|i| i as f32 * 0.05).collect();
        let pattern = detect_oscillation(&series, 0.3);
        assert!(!pattern.detected);
        assert_eq!(pattern.frequency, 0.0);
    }

    #[test]
    fn test_smooth_history_reduces_amplitude() {
        let mut calc = calculator();
        let snapshot = populated_snapshot();
        let assessment = assessment_for(&snapshot);
        // Seed history, then force a zig-zag onto the recorded magnitudes.
        for _ in 0..10 {
            calc.calculate(&snapshot, &assessment, StateExtras::default());
        }
        for (i, state) in calc.history.iter_mut().enumerate() {
            let offset: f32 = if i % 2 == 0 { 0.2 } else { -0.2 };
            state.form = (0.5 + offset).clamp(0.0, 1.0);
            state.function = (0.5 + offset).clamp(0.0, 1.0);
            state.behavior = (0.5 + offset).clamp(0.0, 1.0);
            state.context = (0.5 + offset).clamp(0.0, 1.0);
            state.magnitude = (0.5 + offset).clamp(0.0, 1.0);
        }
        let (before, after) = calc.smooth_history(0.7);
        assert!(after < before, "smoothing should dampen amplitude: {before} -> {after}");
    }

    #[test]
    fn test_history_bounded() {
        let mut config = StateConfig::default();
        config.history_cap = 5;
        let mut calc = StateCalculator::new(config, HealthConfig::default());
        let snapshot = populated_snapshot();
        let assessment = assessment_for(&snapshot);
        for _ in 0..20 {
            calc.calculate(&snapshot, &assessment, StateExtras::default());
        }
        assert_eq!(calc.history().len(), 5);
    }
}
