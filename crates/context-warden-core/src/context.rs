//! Working-context snapshot schema and domain descriptors.
//!
//! The original context store is a dynamically-typed nested map rooted at
//! `working_memory.domains`. This module replaces it with a versioned,
//! explicitly-optional schema validated once at the boundary: every field
//! carries a serde default, so malformed or partial input degrades to a
//! neutral snapshot instead of an error.
//!
//! Snapshots are read-only to the control loop. Transforms (compression,
//! archiving) always operate on copies; the caller's snapshot is never
//! mutated in place.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version of the snapshot shape consumed by this crate.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Lifecycle state of a working-memory domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    /// Currently being worked in; protected from aggressive compression.
    #[default]
    Active,
    /// Retained but not in the current focus set.
    Inactive,
    /// Reduced to an identity stub; detail is gone permanently.
    Archived,
}

/// Per-domain working-memory state.
///
/// Array fields hold the semantic payload the budget loop trades against
/// memory: critical facts, recorded decisions, and created files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainState {
    #[serde(default)]
    pub status: DomainStatus,

    /// Relative priority, 1 = normal. Preserved through compression.
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default)]
    pub critical_facts: Vec<String>,

    /// Constraints are optional metadata; the boost compression pass strips
    /// them first.
    #[serde(default)]
    pub constraints: Vec<String>,

    #[serde(default)]
    pub decisions_made: Vec<String>,

    #[serde(default)]
    pub files_created: Vec<String>,

    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

fn default_priority() -> u32 {
    1
}

impl Default for DomainState {
    fn default() -> Self {
        Self {
            status: DomainStatus::default(),
            priority: default_priority(),
            critical_facts: Vec::new(),
            constraints: Vec::new(),
            decisions_made: Vec::new(),
            files_created: Vec::new(),
            last_modified: None,
        }
    }
}

impl DomainState {
    /// Whether this domain counts as active for weighting and protection.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == DomainStatus::Active
    }

    /// Weighted observation used by the health metrics:
    /// `facts*2 + decisions*3 + files*1`, scaled 1.5x when active.
    pub fn observation(&self) -> f32 {
        let base = self.critical_facts.len() as f32 * 2.0
            + self.decisions_made.len() as f32 * 3.0
            + self.files_created.len() as f32;
        if self.is_active() {
            base * 1.5
        } else {
            base
        }
    }

    /// Total number of payload items across all arrays.
    pub fn item_count(&self) -> usize {
        self.critical_facts.len()
            + self.constraints.len()
            + self.decisions_made.len()
            + self.files_created.len()
    }

    /// Serialized size of this domain in KB.
    pub fn size_kb(&self) -> f32 {
        serde_json::to_vec(self)
            .map(|b| b.len() as f32 / 1024.0)
            .unwrap_or(0.0)
    }

    /// Collapse to a status-only stub, dropping all payload. Used by the
    /// crisis compression stage and by archiving.
    pub fn to_stub(&self, status: DomainStatus) -> Self {
        Self {
            status,
            priority: self.priority,
            ..Self::default()
        }
    }
}

/// The `working_memory` block of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemory {
    #[serde(default)]
    pub active_domain: Option<String>,

    #[serde(default)]
    pub session_count: u64,

    #[serde(default)]
    pub last_session: Option<u64>,

    /// Domains keyed by id. A `BTreeMap` keeps iteration deterministic so
    /// repeated runs over the same snapshot produce identical results.
    #[serde(default)]
    pub domains: BTreeMap<String, DomainState>,
}

/// The `context_health` block: size accounting carried on the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextHealth {
    #[serde(default)]
    pub size_kb: f32,

    #[serde(default = "default_size_limit_kb")]
    pub size_limit_kb: f32,

    #[serde(default)]
    pub sessions_since_reset: u32,

    #[serde(default)]
    pub last_reset: Option<DateTime<Utc>>,

    #[serde(default)]
    pub compression_enabled: bool,
}

fn default_size_limit_kb() -> f32 {
    100.0
}

impl Default for ContextHealth {
    fn default() -> Self {
        Self {
            size_kb: 0.0,
            size_limit_kb: default_size_limit_kb(),
            sessions_since_reset: 0,
            last_reset: None,
            compression_enabled: false,
        }
    }
}

/// A full working-context snapshot.
///
/// # Examples
///
/// ```rust
/// use context_warden_core::context::ContextSnapshot;
///
/// let snapshot = ContextSnapshot::from_value(serde_json::json!({
///     "working_memory": {
///         "domains": {
///             "auth": { "status": "active", "critical_facts": ["uses JWT"] }
///         }
///     }
/// }));
/// assert_eq!(snapshot.working_memory.domains.len(), 1);
///
/// // Malformed input degrades to a neutral snapshot, never an error.
/// let neutral = ContextSnapshot::from_value(serde_json::json!(42));
/// assert!(neutral.working_memory.domains.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    #[serde(default)]
    pub working_memory: WorkingMemory,

    #[serde(default)]
    pub context_health: ContextHealth,
}

impl ContextSnapshot {
    /// Ingest an untyped value at the boundary. Any shape mismatch falls
    /// back to defaults for the offending region; a completely malformed
    /// value yields the neutral default snapshot.
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// Serialized size of the whole snapshot in KB.
    pub fn serialized_size_kb(&self) -> f32 {
        serde_json::to_vec(self)
            .map(|b| b.len() as f32 / 1024.0)
            .unwrap_or(0.0)
    }

    /// Serialized size of the whole snapshot in bytes.
    pub fn serialized_size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|b| b.len()).unwrap_or(0)
    }

    /// Recompute `context_health.size_kb` and flip `compression_enabled`
    /// once size crosses 80% of the limit.
    pub fn refresh_size(&mut self) {
        let size = self.serialized_size_kb();
        self.context_health.size_kb = size;
        if size > self.context_health.size_limit_kb * 0.8 {
            self.context_health.compression_enabled = true;
        }
    }

    /// Ids of domains currently marked active.
    pub fn active_domain_ids(&self) -> Vec<&str> {
        self.working_memory
            .domains
            .iter()
            .filter(|(_, d)| d.is_active())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Count of domains currently marked active.
    pub fn active_domain_count(&self) -> usize {
        self.working_memory
            .domains
            .values()
            .filter(|d| d.is_active())
            .count()
    }
}

/// Internal/external dependency lists of an externally-owned domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainDependencies {
    #[serde(default)]
    pub internal: Vec<String>,
    #[serde(default)]
    pub external: Vec<String>,
}

impl DomainDependencies {
    pub fn total(&self) -> usize {
        self.internal.len() + self.external.len()
    }
}

/// Coarse metrics reported by the external domain manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainMetrics {
    #[serde(default)]
    pub total_size_kb: f32,
    #[serde(default)]
    pub file_count: usize,
}

/// An externally-owned domain descriptor, as received from the collaborating
/// DomainManager. The core copies these on read and returns
/// possibly-optimized copies; it never mutates the caller's objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "type")]
    pub domain_type: String,

    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub dependencies: DomainDependencies,

    #[serde(default)]
    pub dependents: Vec<String>,

    #[serde(default)]
    pub metrics: DomainMetrics,
}

impl Domain {
    /// Serialized size of this descriptor in KB, preferring the reported
    /// metric when present.
    pub fn size_kb(&self) -> f32 {
        if self.metrics.total_size_kb > 0.0 {
            self.metrics.total_size_kb
        } else {
            serde_json::to_vec(self)
                .map(|b| b.len() as f32 / 1024.0)
                .unwrap_or(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn domain_with(facts: usize, decisions: usize, files: usize, active: bool) -> DomainState {
        DomainState {
            status: if active {
                DomainStatus::Active
            } else {
                DomainStatus::Inactive
            },
            critical_facts: (0..facts).map(|i| format!("fact-{i}")).collect(),
            decisions_made: (0..decisions).map(|i| format!("decision-{i}")).collect(),
            files_created: (0..files).map(|i| format!("file-{i}.rs")).collect(),
            ..DomainState::default()
        }
    }

    #[test]
    fn test_observation_weighting() {
        let inactive = domain_with(2, 1, 3, false);
        assert!((inactive.observation() - (2.0 * 2.0 + 1.0 * 3.0 + 3.0)).abs() < f32::EPSILON);

        let active = domain_with(2, 1, 3, true);
        assert!((active.observation() - inactive.observation() * 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_from_value_malformed_defaults() {
        let snapshot = ContextSnapshot::from_value(json!({"working_memory": "not a map"}));
        assert!(snapshot.working_memory.domains.is_empty());
        assert_eq!(snapshot.context_health.size_limit_kb, 100.0);

        let snapshot = ContextSnapshot::from_value(json!(null));
        assert_eq!(snapshot, ContextSnapshot::default());
    }

    #[test]
    fn test_from_value_partial_fields() {
        let snapshot = ContextSnapshot::from_value(json!({
            "working_memory": {
                "session_count": 7,
                "domains": { "api": { "critical_facts": ["rate limit is 100rps"] } }
            }
        }));
        assert_eq!(snapshot.working_memory.session_count, 7);
        let api = &snapshot.working_memory.domains["api"];
        assert_eq!(api.status, DomainStatus::Active);
        assert_eq!(api.priority, 1);
        assert_eq!(api.critical_facts.len(), 1);
    }

    #[test]
    fn test_refresh_size_enables_compression_at_80_percent() {
        let mut snapshot = ContextSnapshot::default();
        snapshot.context_health.size_limit_kb = 0.1;
        // Fill with enough content to exceed 0.08 KB serialized.
        snapshot
            .working_memory
            .domains
            .insert("bulk".into(), domain_with(10, 10, 10, true));
        snapshot.refresh_size();
        assert!(snapshot.context_health.size_kb > 0.08);
        assert!(snapshot.context_health.compression_enabled);
    }

    #[test]
    fn test_stub_drops_payload_keeps_priority() {
        let mut d = domain_with(5, 5, 5, true);
        d.priority = 3;
        let stub = d.to_stub(DomainStatus::Archived);
        assert_eq!(stub.status, DomainStatus::Archived);
        assert_eq!(stub.priority, 3);
        assert_eq!(stub.item_count(), 0);
    }

    #[test]
    fn test_active_domain_ids() {
        let mut snapshot = ContextSnapshot::default();
        snapshot
            .working_memory
            .domains
            .insert("a".into(), domain_with(1, 0, 0, true));
        snapshot
            .working_memory
            .domains
            .insert("b".into(), domain_with(1, 0, 0, false));
        assert_eq!(snapshot.active_domain_ids(), vec!["a"]);
        assert_eq!(snapshot.active_domain_count(), 1);
    }

    #[test]
    fn test_domain_descriptor_roundtrip() {
        let json = json!({
            "id": "storage",
            "name": "Storage Layer",
            "type": "infrastructure",
            "files": ["store.rs"],
            "keywords": ["rocksdb", "cf"],
            "dependencies": { "internal": ["core"], "external": ["rocksdb"] },
            "dependents": ["api"],
            "metrics": { "total_size_kb": 12.5, "file_count": 1 }
        });
        let domain: Domain = serde_json::from_value(json).unwrap();
        assert_eq!(domain.dependencies.total(), 2);
        assert!((domain.size_kb() - 12.5).abs() < f32::EPSILON);
    }
}
