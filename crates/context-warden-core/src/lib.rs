//! Context Warden Core Library
//!
//! Keeps an AI agent's resident working context within a hard memory budget
//! while preserving semantic usefulness, detecting degenerate
//! growth/oscillation patterns, and repairing them automatically.
//!
//! # Architecture
//!
//! The crate is a closed feedback loop of small components, leaves first:
//!
//! - [`normalize`] — pure [0,1] metric mappings
//! - [`health`] — statistical health assessment with bounded history
//! - [`state`] — 4-dimensional state vector, velocity, pattern detection
//! - [`zone`] — ordered severity zones driving compression targets
//! - [`compression`] — zone/trajectory-aware multi-stage compressor
//! - [`budget`] — tiered classification and KB-ceiling enforcement
//! - [`anomaly`] — six independent anti-pattern detectors
//! - [`recovery`] — severity-tiered remediation with bounded retries
//! - [`alerts`] — deduplicated, escalating, expiring alerts
//! - [`controller`] — single-owner cycle orchestration and public surface
//!
//! # Example
//!
//! ```rust
//! use context_warden_core::{ContextWarden, WardenConfig};
//! use context_warden_core::context::ContextSnapshot;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let warden = ContextWarden::new(WardenConfig::default()).unwrap();
//! let snapshot = ContextSnapshot::from_value(serde_json::json!({
//!     "working_memory": {
//!         "domains": { "auth": { "status": "active", "critical_facts": ["uses JWT"] } }
//!     }
//! }));
//! let report = warden.run_cycle(&snapshot, &[], None).await;
//! assert!(report.state.magnitude <= 1.0);
//! # }
//! ```

pub mod alerts;
pub mod anomaly;
pub mod budget;
pub mod compression;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod health;
pub mod normalize;
pub mod recovery;
pub mod state;
pub mod zone;

// Re-exports for convenience
pub use alerts::{Alert, AlertLevel, AlertManager};
pub use anomaly::{AnomalyDetector, AnomalyKind, AnomalyRecord};
pub use budget::{BudgetOptimizer, BudgetSeverity, MemoryTier, OptimizationResult};
pub use compression::{CompressionEngine, CompressionOptions, CompressionResult};
pub use config::WardenConfig;
pub use context::{ContextSnapshot, Domain};
pub use controller::{ContextWarden, CycleReport, DetectionResult, WardenObserver};
pub use error::{WardenError, WardenResult};
pub use health::{HealthAssessment, HealthMonitor};
pub use recovery::{RecoveryEngine, RecoveryResult};
pub use state::{StateCalculator, StateVector};
pub use zone::{Zone, ZoneClassifier};
