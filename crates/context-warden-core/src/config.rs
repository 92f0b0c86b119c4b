//! Configuration for the context-warden control loop.
//!
//! One sub-config per component, each with documented defaults and a
//! `validate()` enforcing its invariants (monotonic cutoffs, weight sums,
//! positive windows). [`WardenConfig::load`] supports layered file/env
//! loading; [`WardenConfig::default`] is the tuned in-code baseline.

use serde::{Deserialize, Serialize};

use crate::error::{WardenError, WardenResult};
use crate::normalize::Band;

fn invalid(field: &str, message: impl Into<String>) -> WardenError {
    WardenError::InvalidConfig {
        field: field.to_string(),
        message: message.into(),
    }
}

/// HealthMonitor settings: viability bands per metric and history shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Ring-buffer capacity for past assessments.
    pub history_cap: usize,

    /// Hysteresis trips when size exceeds `size_limit_kb * warn_fraction`.
    pub warn_fraction: f32,

    /// Viability band for complexity (variance-derived, lower is calmer).
    pub complexity_band: Band,

    /// Viability band for momentum (0.5 is neutral growth pressure).
    pub momentum_band: Band,

    /// Viability band for fairness (1 = perfectly even distribution).
    pub fairness_band: Band,

    /// Viability band for symmetry.
    pub symmetry_band: Band,

    /// Deviation outside a band beyond which status becomes critical.
    pub critical_margin: f32,

    /// Entries compared for the trend, and the momentum delta that counts
    /// as a direction change.
    pub trend_window: usize,
    pub trend_delta: f32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            history_cap: 100,
            warn_fraction: 0.8,
            complexity_band: Band::new(0.0, 0.6),
            momentum_band: Band::new(0.2, 0.8),
            fairness_band: Band::new(0.5, 1.0),
            symmetry_band: Band::new(0.6, 1.0),
            critical_margin: 0.25,
            trend_window: 5,
            trend_delta: 0.1,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> WardenResult<()> {
        if self.history_cap == 0 {
            return Err(invalid("health.history_cap", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.warn_fraction) {
            return Err(invalid("health.warn_fraction", "must be in [0,1]"));
        }
        for (name, band) in [
            ("complexity_band", self.complexity_band),
            ("momentum_band", self.momentum_band),
            ("fairness_band", self.fairness_band),
            ("symmetry_band", self.symmetry_band),
        ] {
            if !band.is_valid() {
                return Err(invalid(&format!("health.{name}"), "max must exceed min"));
            }
        }
        if self.trend_window < 2 {
            return Err(invalid("health.trend_window", "must be >= 2"));
        }
        Ok(())
    }
}

/// Weights combining the four state dimensions into a magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionWeights {
    pub form: f32,
    pub function: f32,
    pub behavior: f32,
    pub context: f32,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            form: 0.25,
            function: 0.25,
            behavior: 0.25,
            context: 0.25,
        }
    }
}

impl DimensionWeights {
    pub fn as_array(&self) -> [f32; 4] {
        [self.form, self.function, self.behavior, self.context]
    }

    pub fn validate(&self) -> WardenResult<()> {
        let sum: f32 = self.as_array().iter().sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(invalid(
                "state.weights",
                format!("must sum to 1.0, got {sum}"),
            ));
        }
        if self.as_array().iter().any(|w| *w < 0.0) {
            return Err(invalid("state.weights", "must be non-negative"));
        }
        Ok(())
    }
}

/// StateVector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    pub weights: DimensionWeights,

    /// Every dimension must reach this for the state to be viable.
    pub viability_threshold: f32,

    /// Entries inspected for degradation/oscillation patterns.
    pub pattern_window: usize,

    /// Linear-regression slope below which a dimension counts as degrading.
    pub degradation_slope: f32,

    /// Extrema-per-entry ratio above which oscillation is reported.
    pub oscillation_ratio: f32,

    /// Band for cycle latency feeding the behavior dimension (ms).
    pub latency_band: Band,

    pub history_cap: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            weights: DimensionWeights::default(),
            viability_threshold: 0.4,
            pattern_window: 10,
            degradation_slope: -0.1,
            oscillation_ratio: 0.3,
            latency_band: Band::new(0.0, 200.0),
            history_cap: 100,
        }
    }
}

impl StateConfig {
    pub fn validate(&self) -> WardenResult<()> {
        self.weights.validate()?;
        if !(0.0..=1.0).contains(&self.viability_threshold) {
            return Err(invalid("state.viability_threshold", "must be in [0,1]"));
        }
        if self.pattern_window < 3 {
            return Err(invalid("state.pattern_window", "must be >= 3"));
        }
        if self.degradation_slope >= 0.0 {
            return Err(invalid("state.degradation_slope", "must be negative"));
        }
        if self.history_cap == 0 {
            return Err(invalid("state.history_cap", "must be > 0"));
        }
        Ok(())
    }
}

/// Zone magnitude cutoffs, highest zone first.
///
/// A state classifies into the first zone whose minimum its magnitude
/// reaches; anything below `critical_min` is crisis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneBoundaries {
    pub optimal_min: f32,
    pub viable_min: f32,
    pub warning_min: f32,
    pub critical_min: f32,
}

impl Default for ZoneBoundaries {
    fn default() -> Self {
        Self {
            optimal_min: 0.75,
            viable_min: 0.55,
            warning_min: 0.40,
            critical_min: 0.25,
        }
    }
}

/// Target compression ratio per zone. Must increase monotonically with
/// severity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneTargetRatios {
    pub optimal: f32,
    pub viable: f32,
    pub warning: f32,
    pub critical: f32,
    pub crisis: f32,
}

impl Default for ZoneTargetRatios {
    fn default() -> Self {
        Self {
            optimal: 1.2,
            viable: 2.5,
            warning: 4.0,
            critical: 6.0,
            crisis: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub boundaries: ZoneBoundaries,
    pub target_ratios: ZoneTargetRatios,
}

impl ZoneConfig {
    pub fn validate(&self) -> WardenResult<()> {
        let b = &self.boundaries;
        if !(b.optimal_min > b.viable_min
            && b.viable_min > b.warning_min
            && b.warning_min > b.critical_min
            && b.critical_min > 0.0
            && b.optimal_min <= 1.0)
        {
            return Err(invalid(
                "zone.boundaries",
                format!(
                    "cutoffs must satisfy 1.0 >= optimal ({}) > viable ({}) > warning ({}) > critical ({}) > 0",
                    b.optimal_min, b.viable_min, b.warning_min, b.critical_min
                ),
            ));
        }
        let r = &self.target_ratios;
        if !(r.optimal >= 1.0
            && r.viable > r.optimal
            && r.warning > r.viable
            && r.critical > r.warning
            && r.crisis > r.critical)
        {
            return Err(invalid(
                "zone.target_ratios",
                "ratios must be >= 1.0 and monotonically increasing with severity",
            ));
        }
        Ok(())
    }
}

/// Relevance-score weights applied to per-dimension preservation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelevanceWeights {
    pub form: f32,
    pub function: f32,
    pub behavior: f32,
    pub context: f32,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            form: 0.25,
            function: 0.4,
            behavior: 0.2,
            context: 0.15,
        }
    }
}

/// CompressionEngine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Health-history entries averaged for the temporal stage.
    pub temporal_window: usize,

    /// Average hysteresis below which the context counts as stable.
    pub stable_hysteresis_max: f32,

    /// Ratio applied to non-active domains when stable.
    pub stable_ratio: f32,

    /// Centrality score at or above which a domain is protected.
    pub centrality_threshold: f32,

    /// Protected domains compress only to this ratio.
    pub central_ratio: f32,

    /// Boost pass fires when achieved ratio < trigger * requested target.
    pub boost_trigger_fraction: f32,

    /// Trajectory multipliers applied to the zone target ratio.
    pub degrading_multiplier: f32,
    pub improving_multiplier: f32,

    pub relevance_weights: RelevanceWeights,

    /// Bonus per dimension retaining at least half its score.
    pub half_preservation_bonus: f32,

    /// Bonus when the compressed magnitude stays >= 0.4.
    pub magnitude_bonus: f32,

    /// Bonus when at least one active domain survives.
    pub active_bonus: f32,

    /// Trailing performance samples retained.
    pub stats_cap: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            temporal_window: 5,
            stable_hysteresis_max: 0.1,
            stable_ratio: 3.0,
            centrality_threshold: 0.7,
            central_ratio: 0.9,
            boost_trigger_fraction: 0.8,
            degrading_multiplier: 1.2,
            improving_multiplier: 0.8,
            relevance_weights: RelevanceWeights::default(),
            half_preservation_bonus: 0.15,
            magnitude_bonus: 0.05,
            active_bonus: 0.05,
            stats_cap: 100,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> WardenResult<()> {
        if self.stable_ratio < 1.0 {
            return Err(invalid("compression.stable_ratio", "must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.centrality_threshold) {
            return Err(invalid("compression.centrality_threshold", "must be in [0,1]"));
        }
        if !(0.0..1.0).contains(&self.boost_trigger_fraction) {
            return Err(invalid(
                "compression.boost_trigger_fraction",
                "must be in [0,1)",
            ));
        }
        if self.degrading_multiplier < 1.0 || self.improving_multiplier > 1.0 {
            return Err(invalid(
                "compression.trajectory",
                "degrading multiplier must be >= 1.0 and improving <= 1.0",
            ));
        }
        if self.stats_cap == 0 {
            return Err(invalid("compression.stats_cap", "must be > 0"));
        }
        Ok(())
    }
}

/// Per-tier compression ratios for memory accounting. Higher (colder) tiers
/// compress harder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierRatios {
    pub active: f32,
    pub related: f32,
    pub inactive: f32,
    pub archived: f32,
}

impl Default for TierRatios {
    fn default() -> Self {
        Self {
            active: 1.0,
            related: 2.0,
            inactive: 5.0,
            archived: 10.0,
        }
    }
}

/// Tier-score cutoffs, highest tier first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub active_min: f32,
    pub related_min: f32,
    pub inactive_min: f32,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            active_min: 0.75,
            related_min: 0.5,
            inactive_min: 0.25,
        }
    }
}

/// BudgetOptimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard KB ceiling for the active set.
    pub max_active_size_kb: f32,

    /// Above this, severity is emergency regardless of anything else.
    pub emergency_threshold_kb: f32,

    /// Fraction of the ceiling treated as the comfortable operating point.
    pub target_utilization: f32,

    pub tier_ratios: TierRatios,
    pub tier_thresholds: TierThresholds,

    /// Access count at which the access score saturates.
    pub promotion_threshold: f32,

    /// Recency decay half-life for the access score (seconds).
    pub recency_half_life_secs: f32,

    /// Per-domain compression results are reused within this TTL.
    pub cache_ttl_ms: u64,

    /// Keywords retained on an archive stub.
    pub archive_keyword_cap: usize,

    pub history_cap: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_active_size_kb: 100.0,
            emergency_threshold_kb: 150.0,
            target_utilization: 0.8,
            tier_ratios: TierRatios::default(),
            tier_thresholds: TierThresholds::default(),
            promotion_threshold: 10.0,
            recency_half_life_secs: 3600.0,
            cache_ttl_ms: 60_000,
            archive_keyword_cap: 3,
            history_cap: 100,
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> WardenResult<()> {
        if self.max_active_size_kb <= 0.0 {
            return Err(invalid("budget.max_active_size_kb", "must be > 0"));
        }
        if self.emergency_threshold_kb <= self.max_active_size_kb {
            return Err(invalid(
                "budget.emergency_threshold_kb",
                "must exceed max_active_size_kb",
            ));
        }
        if !(0.0..=1.0).contains(&self.target_utilization) {
            return Err(invalid("budget.target_utilization", "must be in [0,1]"));
        }
        let r = &self.tier_ratios;
        if !(r.active >= 1.0 && r.related > r.active && r.inactive > r.related && r.archived > r.inactive)
        {
            return Err(invalid(
                "budget.tier_ratios",
                "must be >= 1.0 and increase from active to archived",
            ));
        }
        let t = &self.tier_thresholds;
        if !(t.active_min > t.related_min && t.related_min > t.inactive_min && t.inactive_min > 0.0)
        {
            return Err(invalid(
                "budget.tier_thresholds",
                "must satisfy active > related > inactive > 0",
            ));
        }
        if self.promotion_threshold <= 0.0 {
            return Err(invalid("budget.promotion_threshold", "must be > 0"));
        }
        Ok(())
    }
}

/// AnomalyDetector thresholds. Each detector interpolates severity linearly
/// between its firing threshold and the matching `*_max` reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// context_rot: current hysteresis above this, plus history breaches.
    pub rot_hysteresis_threshold: f32,
    pub rot_breach_window: usize,
    pub rot_breach_min: usize,

    /// context_explosion: hard KB ceiling and complexity surge.
    pub explosion_hard_kb: f32,
    pub explosion_max_kb: f32,
    pub explosion_complexity_threshold: f32,
    pub explosion_growth_fraction: f32,
    pub explosion_growth_window: usize,

    /// memory_leak: relative growth across the usage history.
    pub leak_min_samples: usize,
    pub leak_growth_threshold: f32,
    pub leak_growth_max: f32,

    /// state_oscillation: frequency above which the pattern is anomalous.
    pub oscillation_frequency_threshold: f32,

    /// domain_bloat ceilings.
    pub bloat_max_files: usize,
    pub bloat_max_facts: usize,

    /// compression_degradation: engine performance floors.
    pub degradation_min_ratio: f32,
    pub degradation_min_relevance: f32,
    pub degradation_max_duration_ms: f32,
    pub degradation_min_samples: usize,

    /// When set, detected anomalies are handed to the RecoveryEngine
    /// sequentially in detection order.
    pub auto_recovery: bool,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            rot_hysteresis_threshold: 0.5,
            rot_breach_window: 5,
            rot_breach_min: 3,
            explosion_hard_kb: 150.0,
            explosion_max_kb: 300.0,
            explosion_complexity_threshold: 0.8,
            explosion_growth_fraction: 0.5,
            explosion_growth_window: 3,
            leak_min_samples: 10,
            leak_growth_threshold: 0.5,
            leak_growth_max: 2.0,
            oscillation_frequency_threshold: 0.3,
            bloat_max_files: 50,
            bloat_max_facts: 20,
            degradation_min_ratio: 2.0,
            degradation_min_relevance: 0.6,
            degradation_max_duration_ms: 100.0,
            degradation_min_samples: 5,
            auto_recovery: true,
        }
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> WardenResult<()> {
        if self.rot_breach_min > self.rot_breach_window {
            return Err(invalid(
                "anomaly.rot_breach_min",
                "cannot exceed rot_breach_window",
            ));
        }
        if self.explosion_max_kb <= self.explosion_hard_kb {
            return Err(invalid(
                "anomaly.explosion_max_kb",
                "must exceed explosion_hard_kb",
            ));
        }
        if self.leak_min_samples < 2 {
            return Err(invalid("anomaly.leak_min_samples", "must be >= 2"));
        }
        if self.leak_growth_max <= self.leak_growth_threshold {
            return Err(invalid(
                "anomaly.leak_growth_max",
                "must exceed leak_growth_threshold",
            ));
        }
        if self.bloat_max_files == 0 || self.bloat_max_facts == 0 {
            return Err(invalid("anomaly.bloat", "ceilings must be > 0"));
        }
        Ok(())
    }
}

/// RecoveryEngine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Attempts per anomaly type before short-circuiting.
    pub max_attempts: u32,

    /// Run post-action validation against the recomputed state.
    pub validate_actions: bool,

    /// Validation past this deadline is reported inconclusive.
    pub validation_timeout_ms: u64,

    /// Ratio a compression tactic must reach to count as success.
    pub compress_success_ratio: f32,

    /// Target ratio requested by the compress-harder tactic.
    pub compress_target_ratio: f32,

    /// Domains archived per LRU-archival tactic invocation.
    pub lru_archive_count: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            validate_actions: true,
            validation_timeout_ms: 500,
            compress_success_ratio: 1.5,
            compress_target_ratio: 4.0,
            lru_archive_count: 2,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> WardenResult<()> {
        if self.max_attempts == 0 {
            return Err(invalid("recovery.max_attempts", "must be > 0"));
        }
        if self.compress_success_ratio < 1.0 || self.compress_target_ratio < 1.0 {
            return Err(invalid("recovery.ratios", "must be >= 1.0"));
        }
        if self.lru_archive_count == 0 {
            return Err(invalid("recovery.lru_archive_count", "must be > 0"));
        }
        Ok(())
    }
}

/// AlertManager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Repeats of the same pattern within this window update in place.
    pub dedup_window_ms: u64,

    /// Untouched unresolved alerts escalate after this delay.
    pub escalation_delay_ms: u64,

    pub max_escalation_level: u8,

    /// Active alerts beyond this evict the oldest non-critical.
    pub max_active: usize,

    /// Unresolved alerts expire into history after this TTL.
    pub ttl_ms: u64,

    pub history_cap: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 60_000,
            escalation_delay_ms: 300_000,
            max_escalation_level: 3,
            max_active: 50,
            ttl_ms: 3_600_000,
            history_cap: 100,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> WardenResult<()> {
        if self.max_active == 0 {
            return Err(invalid("alert.max_active", "must be > 0"));
        }
        if self.ttl_ms <= self.dedup_window_ms {
            return Err(invalid("alert.ttl_ms", "must exceed dedup_window_ms"));
        }
        if self.history_cap == 0 {
            return Err(invalid("alert.history_cap", "must be > 0"));
        }
        Ok(())
    }
}

/// Aggregate configuration for the whole control loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub zone: ZoneConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub alert: AlertConfig,
}

impl WardenConfig {
    /// Load configuration from files and environment.
    ///
    /// Sources, in order:
    /// 1. `config/default.toml`
    /// 2. `config/{CONTEXT_WARDEN_ENV}.toml`
    /// 3. Environment variables with a `CONTEXT_WARDEN` prefix
    pub fn load() -> WardenResult<Self> {
        let env =
            std::env::var("CONTEXT_WARDEN_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(config::Environment::with_prefix("CONTEXT_WARDEN").separator("__"));

        let loaded: WardenConfig = builder.build()?.try_deserialize().unwrap_or_default();
        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate every sub-config.
    pub fn validate(&self) -> WardenResult<()> {
        self.health.validate()?;
        self.state.validate()?;
        self.zone.validate()?;
        self.compression.validate()?;
        self.budget.validate()?;
        self.anomaly.validate()?;
        self.recovery.validate()?;
        self.alert.validate()?;
        Ok(())
    }
}
