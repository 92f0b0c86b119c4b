//! Statistical health assessment of a working-context snapshot.
//!
//! The monitor computes five metrics from one pass over the snapshot:
//!
//! - **hysteresis** — binary breach indicator: context size past the warn
//!   threshold
//! - **complexity** — variance of the domain observations, scaled
//! - **momentum** — fraction of adjacent increasing observation pairs
//! - **fairness** — 1 minus the normalized Gini coefficient
//! - **symmetry** — balance between the first and second half of the
//!   observation series
//!
//! One observation is produced per domain (`facts*2 + decisions*3 + files`,
//! scaled 1.5x when active) plus one for the size in KB. Assessments are kept
//! in a bounded ring; the trend compares momentum across the recent window.
//!
//! This component never fails: malformed input was already defaulted at the
//! snapshot boundary, and every statistic degrades to a neutral value on
//! empty or single-sample series.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HealthConfig;
use crate::context::ContextSnapshot;
use crate::normalize::Band;

/// Worst-of health classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

/// Direction of the recent momentum trend. Rising momentum means growth
/// pressure, so it reads as degrading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTrend {
    Improving,
    Degrading,
    #[default]
    Stable,
}

/// One health assessment of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAssessment {
    pub timestamp: DateTime<Utc>,

    /// 1.0 when context size breached the warn threshold, else 0.0.
    pub hysteresis: f32,
    pub complexity: f32,
    pub momentum: f32,
    pub fairness: f32,
    pub symmetry: f32,

    pub status: HealthStatus,
    pub alerts: Vec<String>,
    pub trend: HealthTrend,

    /// True when every metric sits inside its configured viability band.
    pub in_viable_region: bool,

    /// Serialized snapshot size at assessment time.
    pub size_kb: f32,

    /// Number of observations the metrics were computed from.
    pub observation_count: usize,
}

impl HealthAssessment {
    /// Neutral assessment used when there is nothing to measure.
    pub fn neutral() -> Self {
        Self {
            timestamp: Utc::now(),
            hysteresis: 0.0,
            complexity: 0.0,
            momentum: 0.5,
            fairness: 1.0,
            symmetry: 1.0,
            status: HealthStatus::Healthy,
            alerts: Vec::new(),
            trend: HealthTrend::Stable,
            in_viable_region: true,
            size_kb: 0.0,
            observation_count: 0,
        }
    }
}

/// Computes health assessments and maintains their bounded history.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: HealthConfig,
    history: VecDeque<HealthAssessment>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        let cap = config.history_cap;
        Self {
            config,
            history: VecDeque::with_capacity(cap),
        }
    }

    /// Assess a snapshot, append the result to history, and return it.
    pub fn assess(&mut self, snapshot: &ContextSnapshot) -> HealthAssessment {
        let assessment = self.evaluate(snapshot);
        self.push_history(assessment.clone());
        assessment
    }

    /// Compute an assessment without recording it. The trend still reads
    /// from the existing history.
    pub fn evaluate(&self, snapshot: &ContextSnapshot) -> HealthAssessment {
        let observations = Self::observations(snapshot);
        let size_kb = snapshot.serialized_size_kb();
        let warn_kb = snapshot.context_health.size_limit_kb * self.config.warn_fraction;

        let hysteresis = if size_kb > warn_kb { 1.0 } else { 0.0 };
        let complexity = (variance(&observations) / 100.0).clamp(0.0, 1.0);
        let momentum = momentum(&observations);
        let fairness = fairness(&observations);
        let symmetry = symmetry(&observations);

        let mut alerts = Vec::new();
        let mut status = HealthStatus::Healthy;
        let mut in_viable_region = hysteresis == 0.0;
        if hysteresis > 0.0 {
            status = HealthStatus::Warning;
            alerts.push(format!(
                "context size {size_kb:.1}KB exceeds warn threshold {warn_kb:.1}KB"
            ));
        }

        for (name, value, band) in [
            ("complexity", complexity, self.config.complexity_band),
            ("momentum", momentum, self.config.momentum_band),
            ("fairness", fairness, self.config.fairness_band),
            ("symmetry", symmetry, self.config.symmetry_band),
        ] {
            let metric_status = self.classify_metric(value, band);
            if metric_status > HealthStatus::Healthy {
                in_viable_region = false;
                alerts.push(format!("{name} {value:.3} outside band [{}, {}]", band.min, band.max));
            }
            status = status.max(metric_status);
        }

        let trend = self.compute_trend(momentum);

        debug!(
            size_kb,
            ?status,
            ?trend,
            observations = observations.len(),
            "health assessment"
        );

        HealthAssessment {
            timestamp: Utc::now(),
            hysteresis,
            complexity,
            momentum,
            fairness,
            symmetry,
            status,
            alerts,
            trend,
            in_viable_region,
            size_kb,
            observation_count: observations.len(),
        }
    }

    /// One weighted observation per domain plus the size observation.
    fn observations(snapshot: &ContextSnapshot) -> Vec<f32> {
        let mut observations: Vec<f32> = snapshot
            .working_memory
            .domains
            .values()
            .map(|d| d.observation())
            .collect();
        observations.push(snapshot.serialized_size_kb());
        observations
    }

    fn classify_metric(&self, value: f32, band: Band) -> HealthStatus {
        let deviation = band.deviation(value);
        if deviation == 0.0 {
            HealthStatus::Healthy
        } else if deviation <= self.config.critical_margin {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }

    /// Compare the new momentum against the oldest momentum in the trend
    /// window. Rising momentum reads as degrading.
    fn compute_trend(&self, current_momentum: f32) -> HealthTrend {
        let window = self.config.trend_window.saturating_sub(1);
        if window == 0 || self.history.is_empty() {
            return HealthTrend::Stable;
        }
        let start = self.history.len().saturating_sub(window);
        let reference = match self.history.get(start) {
            Some(entry) => entry.momentum,
            None => return HealthTrend::Stable,
        };
        let delta = current_momentum - reference;
        if delta > self.config.trend_delta {
            HealthTrend::Degrading
        } else if delta < -self.config.trend_delta {
            HealthTrend::Improving
        } else {
            HealthTrend::Stable
        }
    }

    fn push_history(&mut self, assessment: HealthAssessment) {
        self.history.push_back(assessment);
        while self.history.len() > self.config.history_cap {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> &VecDeque<HealthAssessment> {
        &self.history
    }

    /// Average hysteresis over the most recent `window` assessments.
    /// Returns 0.0 with an empty history.
    pub fn recent_hysteresis_avg(&self, window: usize) -> f32 {
        if self.history.is_empty() || window == 0 {
            return 0.0;
        }
        let start = self.history.len().saturating_sub(window);
        let slice: Vec<f32> = self.history.range(start..).map(|a| a.hysteresis).collect();
        slice.iter().sum::<f32>() / slice.len() as f32
    }

    /// Number of hysteresis breaches among the most recent `window` entries.
    pub fn recent_breach_count(&self, window: usize) -> usize {
        let start = self.history.len().saturating_sub(window);
        self.history
            .range(start..)
            .filter(|a| a.hysteresis > 0.0)
            .count()
    }

    /// Drop all recorded assessments. Used by recovery tactics that reset
    /// rolling windows.
    pub fn reset_history(&mut self) {
        self.history.clear();
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }
}

/// Population variance. 0.0 for fewer than two samples.
fn variance(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    samples.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n
}

/// Fraction of adjacent pairs that increase. 0.5 for fewer than two samples.
fn momentum(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.5;
    }
    let increasing = samples.windows(2).filter(|w| w[1] > w[0]).count();
    increasing as f32 / (samples.len() - 1) as f32
}

/// 1 minus the normalized Gini coefficient. 1.0 for one or zero samples or
/// an all-zero series.
fn fairness(samples: &[f32]) -> f32 {
    if samples.len() <= 1 {
        return 1.0;
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    if mean.abs() < f32::EPSILON {
        return 1.0;
    }
    let mut abs_diff_sum = 0.0;
    for a in samples {
        for b in samples {
            abs_diff_sum += (a - b).abs();
        }
    }
    let gini = abs_diff_sum / (2.0 * n * n * mean);
    (1.0 - gini).clamp(0.0, 1.0)
}

/// 1 minus the relative difference between the means of the two halves.
fn symmetry(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 1.0;
    }
    let mid = samples.len() / 2;
    let first = &samples[..mid];
    let second = &samples[mid..];
    let mean_first = first.iter().sum::<f32>() / first.len().max(1) as f32;
    let mean_second = second.iter().sum::<f32>() / second.len().max(1) as f32;
    let denom = mean_first.abs().max(mean_second.abs()).max(f32::EPSILON);
    (1.0 - (mean_first - mean_second).abs() / denom).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DomainState, DomainStatus};
    use serde_json::json;

    fn snapshot_with_domains(specs: &[(usize, usize, usize, bool)]) -> ContextSnapshot {
        let mut snapshot = ContextSnapshot::default();
        for (i, (facts, decisions, files, active)) in specs.iter().enumerate() {
            snapshot.working_memory.domains.insert(
                format!("d{i}"),
                DomainState {
                    status: if *active {
                        DomainStatus::Active
                    } else {
                        DomainStatus::Inactive
                    },
                    critical_facts: (0..*facts).map(|j| format!("fact-{j}")).collect(),
                    decisions_made: (0..*decisions).map(|j| format!("dec-{j}")).collect(),
                    files_created: (0..*files).map(|j| format!("file-{j}")).collect(),
                    ..DomainState::default()
                },
            );
        }
        snapshot
    }

    // ------------------------------------------------------------------
    // metric primitives
    // ------------------------------------------------------------------

    #[test]
    fn test_variance_of_constant_series_is_zero() {
        assert_eq!(variance(&[3.0, 3.0, 3.0]), 0.0);
        assert_eq!(variance(&[3.0]), 0.0);
    }

    #[test]
    fn test_momentum_neutral_under_two_samples() {
        assert_eq!(momentum(&[]), 0.5);
        assert_eq!(momentum(&[1.0]), 0.5);
    }

    #[test]
    fn test_momentum_strictly_increasing_is_one() {
        assert_eq!(momentum(&[1.0, 2.0, 3.0, 4.0]), 1.0);
        assert_eq!(momentum(&[4.0, 3.0, 2.0, 1.0]), 0.0);
    }

    #[test]
    fn test_fairness_even_distribution() {
        assert!((fairness(&[5.0, 5.0, 5.0, 5.0]) - 1.0).abs() < 1e-6);
        assert_eq!(fairness(&[7.0]), 1.0);
    }

    #[test]
    fn test_fairness_concentrated_distribution_is_low() {
        let even = fairness(&[5.0, 5.0, 5.0, 5.0]);
        let skewed = fairness(&[20.0, 0.0, 0.0, 0.0]);
        assert!(skewed < even);
        assert!(skewed < 0.5);
    }

    #[test]
    fn test_symmetry_balanced_halves() {
        assert!((symmetry(&[1.0, 2.0, 1.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_symmetry_lopsided_halves() {
        let s = symmetry(&[10.0, 10.0, 1.0, 1.0]);
        assert!(s < 0.2, "lopsided series should score near zero, got {s}");
    }

    // ------------------------------------------------------------------
    // assessment
    // ------------------------------------------------------------------

    #[test]
    fn test_assess_empty_snapshot_is_neutral() {
        let mut monitor = HealthMonitor::default();
        let assessment = monitor.assess(&ContextSnapshot::default());
        assert_eq!(assessment.hysteresis, 0.0);
        assert_eq!(assessment.status, HealthStatus::Healthy);
        assert_eq!(assessment.trend, HealthTrend::Stable);
        // Only the size observation exists.
        assert_eq!(assessment.observation_count, 1);
    }

    #[test]
    fn test_assess_malformed_input_never_panics() {
        let mut monitor = HealthMonitor::default();
        let snapshot = ContextSnapshot::from_value(json!({"working_memory": [1, 2, 3]}));
        let assessment = monitor.assess(&snapshot);
        assert_eq!(assessment.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_hysteresis_trips_over_warn_threshold() {
        let mut snapshot = snapshot_with_domains(&[(5, 5, 5, true)]);
        // Default limit 100KB, warn at 80KB. Shrink the limit instead of
        // inflating the snapshot.
        snapshot.context_health.size_limit_kb = 0.1;
        let mut monitor = HealthMonitor::default();
        let assessment = monitor.assess(&snapshot);
        assert_eq!(assessment.hysteresis, 1.0);
        assert!(assessment.status >= HealthStatus::Warning);
        assert!(!assessment.in_viable_region);
        assert!(!assessment.alerts.is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut config = HealthConfig::default();
        config.history_cap = 10;
        let mut monitor = HealthMonitor::new(config);
        let snapshot = snapshot_with_domains(&[(1, 1, 1, true)]);
        for _ in 0..25 {
            monitor.assess(&snapshot);
        }
        assert_eq!(monitor.history().len(), 10);
    }

    #[test]
    fn test_trend_stable_for_identical_snapshots() {
        let mut monitor = HealthMonitor::default();
        let snapshot = snapshot_with_domains(&[(2, 2, 2, true), (1, 1, 1, false)]);
        for _ in 0..6 {
            monitor.assess(&snapshot);
        }
        let last = monitor.history().back().unwrap();
        assert_eq!(last.trend, HealthTrend::Stable);
    }

    #[test]
    fn test_recent_breach_count_and_avg() {
        let mut monitor = HealthMonitor::default();
        let mut breaching = snapshot_with_domains(&[(2, 2, 2, true)]);
        breaching.context_health.size_limit_kb = 0.1;
        let calm = snapshot_with_domains(&[(2, 2, 2, true)]);

        monitor.assess(&calm);
        monitor.assess(&breaching);
        monitor.assess(&breaching);
        monitor.assess(&breaching);
        monitor.assess(&calm);

        assert_eq!(monitor.recent_breach_count(5), 3);
        assert!((monitor.recent_hysteresis_avg(5) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_reset_history() {
        let mut monitor = HealthMonitor::default();
        monitor.assess(&ContextSnapshot::default());
        assert_eq!(monitor.history().len(), 1);
        monitor.reset_history();
        assert!(monitor.history().is_empty());
    }
}
