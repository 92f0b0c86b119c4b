//! Zone- and trajectory-aware multi-stage context compression.
//!
//! A compression pass runs four stages over an immutable copy of the
//! snapshot, each returning a new value rather than mutating in place:
//!
//! 1. **temporal** — when recent hysteresis shows the context is stable,
//!    non-active domains shrink to the stable ratio
//! 2. **centrality** — high-value domains (scored from activity, facts,
//!    decisions, files) are protected and trimmed only lightly
//! 3. **zone-adaptive** — the classified zone picks how hard remaining
//!    content is trimmed, up to collapsing active domains to status-only
//!    stubs in crisis
//! 4. **validate** — the result is re-scored against the original state
//!    vector to produce a relevance score; a boost pass retries harder when
//!    a caller-supplied target ratio was badly missed
//!
//! The engine never expands a snapshot, and an internal failure returns the
//! input unchanged with ratio 1.0 rather than surfacing an error.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{CompressionConfig, ZoneConfig};
use crate::context::{ContextSnapshot, DomainState, DomainStatus};
use crate::health::HealthMonitor;
use crate::state::{StateCalculator, StateExtras, StateVector, Trajectory};
use crate::zone::{Zone, ZoneClassifier};

/// Caller options for a compression pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionOptions {
    /// Requested ratio; when achieved < 80% of this, a boost pass runs.
    pub target_ratio: Option<f32>,

    /// Protect high-centrality domains from aggressive trimming.
    pub preserve_centrality: bool,

    /// Force the crisis collapse regardless of the classified zone.
    pub emergency_mode: bool,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            target_ratio: None,
            preserve_centrality: true,
            emergency_mode: false,
        }
    }
}

/// Outcome of a compression pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    /// The compressed snapshot. Equals the input when compression failed
    /// or nothing could be removed.
    pub snapshot: ContextSnapshot,

    pub original_size: usize,
    pub compressed_size: usize,

    /// `original_size / compressed_size`, always >= 1.
    pub ratio: f32,

    /// Weighted semantic preservation of the result, in [0,1].
    pub relevance_score: f32,

    pub strategy: String,
    pub zone: Zone,
    pub duration_ms: f32,
}

/// Trailing engine performance, consumed by the anomaly detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnginePerformance {
    pub samples: usize,
    pub avg_ratio: f32,
    pub avg_relevance: f32,
    pub avg_duration_ms: f32,
}

/// Multi-stage compression engine with trailing performance stats.
#[derive(Debug, Clone)]
pub struct CompressionEngine {
    config: CompressionConfig,
    classifier: ZoneClassifier,
    stats: VecDeque<(f32, f32, f32)>,

    /// Tunable floors, adjusted by the recovery retune tactic.
    ratio_target: f32,
    relevance_target: f32,
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::new(CompressionConfig::default(), ZoneConfig::default())
    }
}

impl CompressionEngine {
    pub fn new(config: CompressionConfig, zone: ZoneConfig) -> Self {
        let cap = config.stats_cap;
        Self {
            config,
            classifier: ZoneClassifier::new(zone),
            stats: VecDeque::with_capacity(cap),
            ratio_target: 2.0,
            relevance_target: 0.6,
        }
    }

    /// Compress a snapshot. Never fails and never expands: any internal
    /// error falls back to the unchanged input with ratio 1.0.
    pub fn compress(
        &mut self,
        snapshot: &ContextSnapshot,
        options: &CompressionOptions,
        monitor: &HealthMonitor,
        states: &StateCalculator,
    ) -> CompressionResult {
        let started = Instant::now();
        match self.run_stages(snapshot, options, monitor, states, started) {
            Ok(result) => {
                self.record(result.ratio, result.relevance_score, result.duration_ms);
                result
            }
            Err(reason) => {
                warn!(%reason, "compression failed, returning input unchanged");
                let size = snapshot.serialized_size_bytes();
                let result = CompressionResult {
                    snapshot: snapshot.clone(),
                    original_size: size,
                    compressed_size: size,
                    ratio: 1.0,
                    relevance_score: 1.0,
                    strategy: "fallback".to_string(),
                    zone: Zone::Optimal,
                    duration_ms: started.elapsed().as_secs_f32() * 1000.0,
                };
                self.record(1.0, 1.0, result.duration_ms);
                result
            }
        }
    }

    fn run_stages(
        &self,
        snapshot: &ContextSnapshot,
        options: &CompressionOptions,
        monitor: &HealthMonitor,
        states: &StateCalculator,
        started: Instant,
    ) -> Result<CompressionResult, String> {
        let original_size = snapshot.serialized_size_bytes();
        if original_size == 0 {
            return Err("snapshot serialization produced no bytes".to_string());
        }

        let assessment = monitor.evaluate(snapshot);
        let original_state = states.evaluate(snapshot, &assessment, StateExtras::default());
        let zone_assessment = self.classifier.classify(&original_state);
        let zone = if options.emergency_mode {
            Zone::Crisis
        } else {
            zone_assessment.zone
        };

        let trajectory_multiplier = match states.trajectory() {
            Trajectory::Degrading => self.config.degrading_multiplier,
            Trajectory::Improving => self.config.improving_multiplier,
            Trajectory::Steady => 1.0,
        };
        let effective_target = options
            .target_ratio
            .unwrap_or_else(|| self.classifier.target_ratio(zone))
            * trajectory_multiplier;

        // Stage 1: temporal.
        let stable = monitor.recent_hysteresis_avg(self.config.temporal_window)
            < self.config.stable_hysteresis_max;
        let mut working = snapshot.clone();
        if stable {
            working = self.temporal_stage(&working);
        }

        // Stage 2: centrality.
        if options.preserve_centrality && zone != Zone::Crisis {
            working = self.centrality_stage(&working, effective_target);
        }

        // Stage 3: zone-adaptive.
        working = self.zone_stage(&working, zone, effective_target);
        working.refresh_size();

        // Never expand.
        let compressed_size = working.serialized_size_bytes();
        if compressed_size >= original_size {
            let duration_ms = started.elapsed().as_secs_f32() * 1000.0;
            return Ok(CompressionResult {
                snapshot: snapshot.clone(),
                original_size,
                compressed_size: original_size,
                ratio: 1.0,
                relevance_score: 1.0,
                strategy: "noop".to_string(),
                zone,
                duration_ms,
            });
        }

        // Stage 4: validate, then optionally boost.
        let mut result = self.validated_result(
            snapshot,
            &original_state,
            working,
            original_size,
            zone,
            monitor,
            states,
            strategy_name(zone).to_string(),
            started,
        );

        if let Some(target) = options.target_ratio {
            if result.ratio < self.config.boost_trigger_fraction * target {
                let boosted_snapshot = self.boost_stage(&result.snapshot);
                let boosted = self.validated_result(
                    snapshot,
                    &original_state,
                    boosted_snapshot,
                    original_size,
                    zone,
                    monitor,
                    states,
                    format!("{}+boost", strategy_name(zone)),
                    started,
                );
                if boosted.ratio > result.ratio {
                    result = boosted;
                }
            }
        }

        debug!(
            zone = %result.zone,
            ratio = result.ratio,
            relevance = result.relevance_score,
            strategy = %result.strategy,
            "compression pass complete"
        );
        Ok(result)
    }

    /// Shrink non-active domains to the stable ratio.
    fn temporal_stage(&self, snapshot: &ContextSnapshot) -> ContextSnapshot {
        let keep = 1.0 / self.config.stable_ratio;
        let mut out = snapshot.clone();
        for domain in out.working_memory.domains.values_mut() {
            if !domain.is_active() {
                *domain = trim_domain(domain, keep, keep, keep);
            }
        }
        out
    }

    /// Score each domain 0-1 and protect the central ones.
    fn centrality_stage(&self, snapshot: &ContextSnapshot, target_ratio: f32) -> ContextSnapshot {
        let strategy_keep = 1.0 / target_ratio.max(1.0);
        let central_keep = self.config.central_ratio;
        let mut out = snapshot.clone();
        for domain in out.working_memory.domains.values_mut() {
            let keep = if centrality_score(domain) >= self.config.centrality_threshold {
                central_keep
            } else {
                strategy_keep
            };
            *domain = trim_domain(domain, keep, keep, keep);
        }
        out
    }

    /// Apply the zone-specific trim policy.
    fn zone_stage(&self, snapshot: &ContextSnapshot, zone: Zone, target_ratio: f32) -> ContextSnapshot {
        let mut out = snapshot.clone();
        match zone {
            Zone::Optimal => {
                for domain in out.working_memory.domains.values_mut() {
                    if !domain.is_active() {
                        *domain = trim_domain(domain, 0.9, 0.9, 0.9);
                    }
                }
            }
            Zone::Viable => {
                let keep = 1.0 / target_ratio.max(1.0);
                for domain in out.working_memory.domains.values_mut() {
                    *domain = trim_domain(domain, keep, keep, keep);
                }
            }
            Zone::Warning => {
                for domain in out.working_memory.domains.values_mut() {
                    let keep = if domain.is_active() { 0.3 } else { 0.1 };
                    *domain = trim_domain(domain, keep, keep, keep);
                }
            }
            Zone::Critical => {
                for domain in out.working_memory.domains.values_mut() {
                    if domain.is_active() {
                        *domain = trim_domain(domain, 0.1, 0.1, 0.1);
                    } else {
                        let mut reduced = trim_domain(domain, 0.0, 0.0, 0.0);
                        reduced.critical_facts = domain.critical_facts.iter().take(1).cloned().collect();
                        *domain = reduced;
                    }
                }
            }
            Zone::Crisis => {
                let retained: Vec<String> = out
                    .working_memory
                    .domains
                    .iter()
                    .filter(|(_, d)| d.is_active())
                    .map(|(id, _)| id.clone())
                    .collect();
                let mut collapsed = std::collections::BTreeMap::new();
                for id in retained {
                    let stub = out.working_memory.domains[&id].to_stub(DomainStatus::Active);
                    collapsed.insert(id, stub);
                }
                out.working_memory.domains = collapsed;
            }
        }
        out
    }

    /// Strip optional metadata and floor every array at one entry.
    fn boost_stage(&self, snapshot: &ContextSnapshot) -> ContextSnapshot {
        let mut out = snapshot.clone();
        for domain in out.working_memory.domains.values_mut() {
            domain.constraints.clear();
            domain.last_modified = None;
            domain.critical_facts.truncate(1);
            domain.decisions_made.truncate(1);
            domain.files_created.truncate(1);
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn validated_result(
        &self,
        original: &ContextSnapshot,
        original_state: &StateVector,
        mut compressed: ContextSnapshot,
        original_size: usize,
        zone: Zone,
        monitor: &HealthMonitor,
        states: &StateCalculator,
        strategy: String,
        started: Instant,
    ) -> CompressionResult {
        compressed.refresh_size();
        let compressed_size = compressed.serialized_size_bytes().max(1);
        if compressed_size >= original_size {
            return CompressionResult {
                snapshot: original.clone(),
                original_size,
                compressed_size: original_size,
                ratio: 1.0,
                relevance_score: 1.0,
                strategy: "noop".to_string(),
                zone,
                duration_ms: started.elapsed().as_secs_f32() * 1000.0,
            };
        }

        let assessment = monitor.evaluate(&compressed);
        let compressed_state = states.evaluate(&compressed, &assessment, StateExtras::default());
        let relevance_score =
            self.relevance_score(original_state, &compressed_state, &compressed);

        CompressionResult {
            original_size,
            compressed_size,
            ratio: original_size as f32 / compressed_size as f32,
            relevance_score,
            strategy,
            zone,
            duration_ms: started.elapsed().as_secs_f32() * 1000.0,
            snapshot: compressed,
        }
    }

    /// Weighted per-dimension preservation plus retention bonuses.
    fn relevance_score(
        &self,
        original: &StateVector,
        compressed: &StateVector,
        snapshot: &ContextSnapshot,
    ) -> f32 {
        let w = &self.config.relevance_weights;
        let weights = [w.form, w.function, w.behavior, w.context];
        let mut score = 0.0;
        for ((orig, comp), weight) in original
            .dimensions()
            .iter()
            .zip(compressed.dimensions().iter())
            .zip(weights.iter())
        {
            let preservation = if *orig < f32::EPSILON {
                1.0
            } else {
                (comp / orig).min(1.0)
            };
            let bonus = if *comp >= 0.5 {
                self.config.half_preservation_bonus
            } else {
                0.0
            };
            score += weight * (preservation + bonus);
        }
        if compressed.magnitude >= 0.4 {
            score += self.config.magnitude_bonus;
        }
        if snapshot.active_domain_count() >= 1 {
            score += self.config.active_bonus;
        }
        score.clamp(0.0, 1.0)
    }

    /// Trim a single domain's payload toward `ratio`. Used by the budget
    /// optimizer's per-domain passes; the result and the achieved ratio are
    /// recorded in the trailing stats.
    pub fn compress_domain(&mut self, domain: &DomainState, ratio: f32) -> (DomainState, f32) {
        let started = Instant::now();
        let keep = 1.0 / ratio.max(1.0);
        let before = domain.size_kb().max(f32::EPSILON);
        let trimmed = trim_domain(domain, keep, keep, keep);
        let after = trimmed.size_kb().max(f32::EPSILON);
        let achieved = (before / after).max(1.0);
        self.record(achieved, 1.0_f32.min(keep + 0.5), started.elapsed().as_secs_f32() * 1000.0);
        (trimmed, achieved)
    }

    fn record(&mut self, ratio: f32, relevance: f32, duration_ms: f32) {
        self.stats.push_back((ratio, relevance, duration_ms));
        while self.stats.len() > self.config.stats_cap {
            self.stats.pop_front();
        }
    }

    /// Trailing averages over the recorded passes.
    pub fn performance(&self) -> EnginePerformance {
        if self.stats.is_empty() {
            return EnginePerformance::default();
        }
        let n = self.stats.len() as f32;
        let (mut ratio, mut relevance, mut duration) = (0.0, 0.0, 0.0);
        for (r, rel, d) in &self.stats {
            ratio += r;
            relevance += rel;
            duration += d;
        }
        EnginePerformance {
            samples: self.stats.len(),
            avg_ratio: ratio / n,
            avg_relevance: relevance / n,
            avg_duration_ms: duration / n,
        }
    }

    /// Current (ratio, relevance) floors the engine is tuned for.
    pub fn targets(&self) -> (f32, f32) {
        (self.ratio_target, self.relevance_target)
    }

    /// Reset stats and retune the performance floors. Recovery tactic for
    /// compression degradation.
    pub fn retune(&mut self, ratio_target: f32, relevance_target: f32) {
        self.stats.clear();
        self.ratio_target = ratio_target.max(1.0);
        self.relevance_target = relevance_target.clamp(0.0, 1.0);
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

fn strategy_name(zone: Zone) -> &'static str {
    match zone {
        Zone::Optimal => "light_trim",
        Zone::Viable => "proportional_trim",
        Zone::Warning => "aggressive_trim",
        Zone::Critical => "deep_trim",
        Zone::Crisis => "emergency_collapse",
    }
}

/// Score a domain's centrality 0-1 from activity and payload counts.
pub fn centrality_score(domain: &DomainState) -> f32 {
    let activity = if domain.is_active() { 1.0 } else { 0.0 };
    let facts = (domain.critical_facts.len() as f32 / 10.0).min(1.0);
    let decisions = (domain.decisions_made.len() as f32 / 10.0).min(1.0);
    let files = (domain.files_created.len() as f32 / 10.0).min(1.0);
    0.4 * activity + 0.2 * facts + 0.2 * decisions + 0.2 * files
}

/// Return a copy of `domain` with each array truncated to the given keep
/// fraction (rounded up, so a non-zero fraction keeps at least one entry of
/// a non-empty array). A fraction of zero clears the array.
fn trim_domain(domain: &DomainState, facts: f32, decisions: f32, files: f32) -> DomainState {
    let trim = |items: &[String], keep: f32| -> Vec<String> {
        if keep <= 0.0 {
            return Vec::new();
        }
        let new_len = ((items.len() as f32 * keep).ceil() as usize).min(items.len());
        items.iter().take(new_len).cloned().collect()
    };
    DomainState {
        status: domain.status,
        priority: domain.priority,
        critical_facts: trim(&domain.critical_facts, facts),
        constraints: trim(&domain.constraints, facts),
        decisions_made: trim(&domain.decisions_made, decisions),
        files_created: trim(&domain.files_created, files),
        last_modified: domain.last_modified,
    }
}
