//! Budget-constrained active-set optimization.
//!
//! Enforces the KB ceiling over a domain set: each domain is scored into a
//! memory tier, total usage is compared against the emergency / ceiling /
//! utilization thresholds to pick a severity, and the matching strategy
//! drives per-domain compression (through the [`CompressionEngine`]) and
//! archiving. Per-domain compression results are cached with a short TTL so
//! repeated passes inside one window are cheap and deterministic.
//!
//! A budget breach is never a hard failure; the optimizer always produces a
//! best-effort result.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compression::CompressionEngine;
use crate::config::BudgetConfig;
use crate::context::{ContextSnapshot, Domain, DomainState, DomainStatus};

/// Memory tier of a domain, warmest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    Active,
    Related,
    Inactive,
    Archived,
}

impl MemoryTier {
    /// Accounting compression ratio for the tier.
    pub fn ratio(&self, config: &BudgetConfig) -> f32 {
        let r = &config.tier_ratios;
        match self {
            MemoryTier::Active => r.active,
            MemoryTier::Related => r.related,
            MemoryTier::Inactive => r.inactive,
            MemoryTier::Archived => r.archived,
        }
    }
}

/// Recency/frequency signals for one domain, supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessStats {
    /// Accesses within the caller's tracking window.
    pub frequency: f32,
    /// Seconds since the most recent access.
    pub last_access_secs: f32,
}

/// Map of domain id to its access signals.
pub type AccessPattern = HashMap<String, AccessStats>;

/// Budget pressure classification, worst first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetSeverity {
    Emergency,
    Critical,
    Warning,
    None,
}

impl BudgetSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetSeverity::Emergency => "emergency",
            BudgetSeverity::Critical => "critical",
            BudgetSeverity::Warning => "warning",
            BudgetSeverity::None => "none",
        }
    }
}

/// Fixed response profile for a severity level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStrategy {
    pub severity: BudgetSeverity,
    /// Multiplied into every per-domain tier ratio.
    pub aggressiveness: f32,
    /// Fraction of total memory the pass aims to shed.
    pub target_reduction: f32,
    /// Archive domains scored into the archived tier.
    pub archive_cold: bool,
    /// Also archive inactive-tier domains (emergency only).
    pub archive_inactive: bool,
    /// Compress related-tier domains, not just colder ones.
    pub compress_related: bool,
}

impl OptimizationStrategy {
    pub fn for_severity(severity: BudgetSeverity) -> Self {
        match severity {
            BudgetSeverity::Emergency => Self {
                severity,
                aggressiveness: 2.0,
                target_reduction: 0.6,
                archive_cold: true,
                archive_inactive: true,
                compress_related: true,
            },
            BudgetSeverity::Critical => Self {
                severity,
                aggressiveness: 1.5,
                target_reduction: 0.4,
                archive_cold: true,
                archive_inactive: false,
                compress_related: true,
            },
            BudgetSeverity::Warning => Self {
                severity,
                aggressiveness: 1.2,
                target_reduction: 0.25,
                archive_cold: false,
                archive_inactive: false,
                compress_related: true,
            },
            BudgetSeverity::None => Self {
                severity,
                aggressiveness: 1.0,
                target_reduction: 0.0,
                archive_cold: false,
                archive_inactive: false,
                compress_related: false,
            },
        }
    }
}

/// Point-in-time memory accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatus {
    /// Tier-adjusted total, in KB.
    pub total_kb: f32,
    pub budget_kb: f32,
    /// `total_kb / budget_kb`.
    pub utilization: f32,
    pub domain_count: usize,
    pub per_domain_kb: BTreeMap<String, f32>,
}

/// Identity stub left behind when a domain is archived. Intentionally
/// lossy: dropped detail is never re-introduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveStub {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub domain_type: String,
    pub file_count: usize,
    pub total_size_kb: f32,
    /// At most `archive_keyword_cap` keywords survive.
    pub keywords: Vec<String>,
}

/// One recorded usage sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsagePoint {
    pub timestamp: DateTime<Utc>,
    pub total_kb: f32,
}

/// Outcome of an optimization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub classification: BTreeMap<String, MemoryTier>,
    pub initial_memory: MemoryStatus,
    pub final_memory: MemoryStatus,
    pub strategy: OptimizationStrategy,
    /// Optimized copy of the context; the input is untouched.
    pub snapshot: ContextSnapshot,
    pub archived: Vec<ArchiveStub>,
    pub compressed_domains: Vec<String>,
    pub duration_ms: f32,
}

struct CacheEntry {
    state: DomainState,
    achieved_ratio: f32,
    at: Instant,
}

/// Enforces the memory budget over the domain set.
pub struct BudgetOptimizer {
    config: BudgetConfig,
    cache: HashMap<(String, MemoryTier, u32), CacheEntry>,
    active_set: Vec<String>,
    usage_history: std::collections::VecDeque<MemoryUsagePoint>,
    last_status: Option<MemoryStatus>,
}

impl Default for BudgetOptimizer {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}

impl BudgetOptimizer {
    pub fn new(config: BudgetConfig) -> Self {
        let cap = config.history_cap;
        Self {
            config,
            cache: HashMap::new(),
            active_set: Vec::new(),
            usage_history: std::collections::VecDeque::with_capacity(cap),
            last_status: None,
        }
    }

    /// Run one budget pass over the domain set.
    pub fn optimize_active_set(
        &mut self,
        domains: &[Domain],
        snapshot: &ContextSnapshot,
        access: Option<&AccessPattern>,
        engine: &mut CompressionEngine,
    ) -> OptimizationResult {
        let started = Instant::now();
        let mut working = snapshot.clone();

        let mut scores: BTreeMap<String, f32> = BTreeMap::new();
        let mut classification: BTreeMap<String, MemoryTier> = BTreeMap::new();
        for domain in domains {
            let score = self.tier_score(domain, snapshot, access);
            scores.insert(domain.id.clone(), score);
            classification.insert(domain.id.clone(), self.tier_for(score));
        }

        let initial_memory = self.account(domains, &working, &classification);
        let severity = self.severity_for(initial_memory.total_kb);
        let strategy = OptimizationStrategy::for_severity(severity);

        let mut archived = Vec::new();
        let mut compressed_domains = Vec::new();

        if severity != BudgetSeverity::None {
            // Coldest domains first.
            let mut order: Vec<&Domain> = domains.iter().collect();
            order.sort_by(|a, b| {
                scores[&a.id]
                    .partial_cmp(&scores[&b.id])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            for domain in order {
                let tier = classification[&domain.id];
                let should_archive = (tier == MemoryTier::Archived && strategy.archive_cold)
                    || (tier == MemoryTier::Inactive && strategy.archive_inactive);
                if should_archive {
                    archived.push(self.archive_domain(domain, &mut working));
                    continue;
                }

                let should_compress = match tier {
                    MemoryTier::Active => severity == BudgetSeverity::Emergency,
                    MemoryTier::Related => strategy.compress_related,
                    MemoryTier::Inactive | MemoryTier::Archived => true,
                };
                if should_compress && self.compress_domain(domain, tier, &strategy, &mut working, engine)
                {
                    compressed_domains.push(domain.id.clone());
                }
            }

            // An emergency pass must not end above the emergency ceiling
            // while archivable content remains.
            if severity == BudgetSeverity::Emergency {
                self.force_under_ceiling(domains, &scores, &classification, &mut working, &mut archived);
            }
        }

        working.refresh_size();
        let final_memory = self.account(domains, &working, &classification);

        self.active_set = classification
            .iter()
            .filter(|(_, tier)| **tier == MemoryTier::Active)
            .map(|(id, _)| id.clone())
            .collect();
        self.note_usage(final_memory.total_kb);
        self.last_status = Some(final_memory.clone());

        if severity != BudgetSeverity::None {
            info!(
                severity = severity.as_str(),
                before_kb = initial_memory.total_kb,
                after_kb = final_memory.total_kb,
                archived = archived.len(),
                compressed = compressed_domains.len(),
                "budget optimization pass"
            );
        } else {
            debug!(total_kb = final_memory.total_kb, "budget within limits");
        }

        OptimizationResult {
            classification,
            initial_memory,
            final_memory,
            strategy,
            snapshot: working,
            archived,
            compressed_domains,
            duration_ms: started.elapsed().as_secs_f32() * 1000.0,
        }
    }

    /// Tier score: 0.4 access + 0.3 importance + 0.2 dependency + 0.1 size.
    fn tier_score(
        &self,
        domain: &Domain,
        snapshot: &ContextSnapshot,
        access: Option<&AccessPattern>,
    ) -> f32 {
        let access_score = match access {
            Some(pattern) => match pattern.get(&domain.id) {
                Some(stats) => {
                    let frequency =
                        (stats.frequency / self.config.promotion_threshold).min(1.0);
                    let recency = (-stats.last_access_secs * std::f32::consts::LN_2
                        / self.config.recency_half_life_secs)
                        .exp();
                    0.5 * frequency + 0.5 * recency
                }
                None => 0.0,
            },
            // Without access data, snapshot status stands in for recency.
            None => match snapshot.working_memory.domains.get(&domain.id) {
                Some(state) if state.is_active() => 1.0,
                _ => 0.5,
            },
        };

        let importance = 0.4 * (domain.files.len() as f32 / 20.0).min(1.0)
            + 0.3 * (domain.keywords.len() as f32 / 10.0).min(1.0)
            + 0.3 * (domain.dependencies.total() as f32 / 10.0).min(1.0);

        let deps = domain.dependencies.total() as f32;
        let dependents = domain.dependents.len() as f32;
        let dependency_score = if deps + dependents == 0.0 {
            0.5
        } else {
            dependents / (deps + dependents)
        };

        let size_score = 1.0 / (1.0 + self.raw_kb(domain, snapshot) / 10.0);

        (0.4 * access_score + 0.3 * importance + 0.2 * dependency_score + 0.1 * size_score)
            .clamp(0.0, 1.0)
    }

    fn tier_for(&self, score: f32) -> MemoryTier {
        let t = &self.config.tier_thresholds;
        if score >= t.active_min {
            MemoryTier::Active
        } else if score >= t.related_min {
            MemoryTier::Related
        } else if score >= t.inactive_min {
            MemoryTier::Inactive
        } else {
            MemoryTier::Archived
        }
    }

    /// Severity from total KB, checked worst-first.
    pub fn severity_for(&self, total_kb: f32) -> BudgetSeverity {
        if total_kb > self.config.emergency_threshold_kb {
            BudgetSeverity::Emergency
        } else if total_kb > self.config.max_active_size_kb {
            BudgetSeverity::Critical
        } else if total_kb > self.config.max_active_size_kb * self.config.target_utilization {
            BudgetSeverity::Warning
        } else {
            BudgetSeverity::None
        }
    }

    /// Raw (untiered) size of a domain in KB, preferring snapshot state.
    fn raw_kb(&self, domain: &Domain, snapshot: &ContextSnapshot) -> f32 {
        snapshot
            .working_memory
            .domains
            .get(&domain.id)
            .map(|state| state.size_kb())
            .unwrap_or_else(|| domain.size_kb())
    }

    /// Tier-adjusted memory accounting over the whole set.
    fn account(
        &self,
        domains: &[Domain],
        snapshot: &ContextSnapshot,
        classification: &BTreeMap<String, MemoryTier>,
    ) -> MemoryStatus {
        let mut per_domain_kb = BTreeMap::new();
        let mut total_kb = 0.0;
        for domain in domains {
            let tier = classification
                .get(&domain.id)
                .copied()
                .unwrap_or(MemoryTier::Active);
            let effective = self.raw_kb(domain, snapshot) / tier.ratio(&self.config);
            per_domain_kb.insert(domain.id.clone(), effective);
            total_kb += effective;
        }
        MemoryStatus {
            total_kb,
            budget_kb: self.config.max_active_size_kb,
            utilization: total_kb / self.config.max_active_size_kb.max(f32::EPSILON),
            domain_count: domains.len(),
            per_domain_kb,
        }
    }

    /// Compress one domain's snapshot state through the engine, with the
    /// (id, tier, aggressiveness) cache. Returns false when the snapshot
    /// holds no state for the domain.
    fn compress_domain(
        &mut self,
        domain: &Domain,
        tier: MemoryTier,
        strategy: &OptimizationStrategy,
        working: &mut ContextSnapshot,
        engine: &mut CompressionEngine,
    ) -> bool {
        let Some(state) = working.working_memory.domains.get(&domain.id).cloned() else {
            return false;
        };
        let ratio = tier.ratio(&self.config) * strategy.aggressiveness;
        let key = (
            domain.id.clone(),
            tier,
            (strategy.aggressiveness * 10.0).round() as u32,
        );
        let ttl = Duration::from_millis(self.config.cache_ttl_ms);

        if let Some(entry) = self.cache.get(&key) {
            if entry.at.elapsed() < ttl {
                working
                    .working_memory
                    .domains
                    .insert(domain.id.clone(), entry.state.clone());
                return true;
            }
        }

        let (compressed, achieved) = engine.compress_domain(&state, ratio);
        working
            .working_memory
            .domains
            .insert(domain.id.clone(), compressed.clone());
        self.cache.insert(
            key,
            CacheEntry {
                state: compressed,
                achieved_ratio: achieved,
                at: Instant::now(),
            },
        );
        true
    }

    /// Replace a domain with its identity stub in the working snapshot.
    fn archive_domain(&self, domain: &Domain, working: &mut ContextSnapshot) -> ArchiveStub {
        if let Some(state) = working.working_memory.domains.get(&domain.id) {
            let stub_state = state.to_stub(DomainStatus::Archived);
            working
                .working_memory
                .domains
                .insert(domain.id.clone(), stub_state);
        }
        ArchiveStub {
            id: domain.id.clone(),
            name: domain.name.clone(),
            domain_type: domain.domain_type.clone(),
            file_count: domain.files.len(),
            total_size_kb: domain.size_kb(),
            keywords: domain
                .keywords
                .iter()
                .take(self.config.archive_keyword_cap)
                .cloned()
                .collect(),
        }
    }

    /// Archive coldest-first until the emergency ceiling is respected.
    fn force_under_ceiling(
        &self,
        domains: &[Domain],
        scores: &BTreeMap<String, f32>,
        classification: &BTreeMap<String, MemoryTier>,
        working: &mut ContextSnapshot,
        archived: &mut Vec<ArchiveStub>,
    ) {
        let ceiling = self.config.emergency_threshold_kb;
        let mut order: Vec<&Domain> = domains.iter().collect();
        order.sort_by(|a, b| {
            scores[&a.id]
                .partial_cmp(&scores[&b.id])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for domain in order {
            let total = self.account(domains, working, classification).total_kb;
            if total <= ceiling {
                return;
            }
            let already = archived.iter().any(|stub| stub.id == domain.id);
            if already {
                continue;
            }
            archived.push(self.archive_domain(domain, working));
        }

        let total = self.account(domains, working, classification).total_kb;
        if total > ceiling {
            warn!(
                total_kb = total,
                ceiling_kb = ceiling,
                "emergency pass exhausted archivable content above ceiling"
            );
        }
    }

    /// Record a usage sample into the bounded history.
    pub fn note_usage(&mut self, total_kb: f32) {
        self.usage_history.push_back(MemoryUsagePoint {
            timestamp: Utc::now(),
            total_kb,
        });
        while self.usage_history.len() > self.config.history_cap {
            self.usage_history.pop_front();
        }
    }

    pub fn usage_history(&self) -> &std::collections::VecDeque<MemoryUsagePoint> {
        &self.usage_history
    }

    /// Clear the usage history. Recovery tactic for stale trend windows.
    pub fn reset_usage_history(&mut self) {
        self.usage_history.clear();
    }

    /// Ids classified into the active tier on the last pass.
    pub fn active_set(&self) -> &[String] {
        &self.active_set
    }

    /// Accounting from the most recent pass, if any.
    pub fn last_status(&self) -> Option<&MemoryStatus> {
        self.last_status.as_ref()
    }

    /// Cached achieved ratio for a domain, if still fresh. Exposed for
    /// diagnostics.
    pub fn cached_ratio(&self, id: &str, tier: MemoryTier, aggressiveness: f32) -> Option<f32> {
        let key = (id.to_string(), tier, (aggressiveness * 10.0).round() as u32);
        self.cache.get(&key).and_then(|entry| {
            (entry.at.elapsed() < Duration::from_millis(self.config.cache_ttl_ms))
                .then_some(entry.achieved_ratio)
        })
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }
}
