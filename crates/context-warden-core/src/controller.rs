//! Single-owner orchestration of the control loop.
//!
//! [`ContextWarden`] owns every component behind one `tokio` mutex, so a
//! cycle runs to completion without internal parallelism: health assessment,
//! state calculation, budget optimization, anomaly detection, sequential
//! recovery, and alert processing all mutate shared rolling state in place.
//! Concurrent callers (explicit triggers, the periodic ticker, escalation
//! timers) serialize on the same lock.
//!
//! Listener lists with swallowed exceptions are replaced by an injected
//! [`WardenObserver`]; observer calls happen outside the lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::alerts::{Alert, AlertBatch, AlertManager};
use crate::anomaly::{AnomalyDetector, AnomalyRecord, DetectionInputs};
use crate::budget::{AccessPattern, BudgetOptimizer, MemoryStatus, OptimizationResult};
use crate::compression::{CompressionEngine, CompressionOptions, CompressionResult, EnginePerformance};
use crate::config::WardenConfig;
use crate::context::{ContextSnapshot, Domain};
use crate::error::WardenResult;
use crate::health::{HealthAssessment, HealthMonitor};
use crate::recovery::{RecoveryEngine, RecoveryResult, RecoveryTargets};
use crate::state::{StateCalculator, StateExtras, StateVector};
use crate::zone::{ZoneAssessment, ZoneClassifier};

/// Anomaly detection output, including what was done about it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub anomalies: Vec<AnomalyRecord>,
    pub recoveries: Vec<RecoveryResult>,
    pub alerts: AlertBatch,
    /// Snapshot after recovery tactics ran. Equals the input when nothing
    /// fired or auto-recovery is off.
    pub snapshot: ContextSnapshot,
}

/// Full report of one control-loop cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub assessment: HealthAssessment,
    pub state: StateVector,
    pub zone: ZoneAssessment,
    pub optimization: Option<OptimizationResult>,
    pub detection: DetectionResult,
    pub duration_ms: f32,
}

/// Read-only operator diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub session_count: u64,
    pub active_domains: usize,
    pub context_size_kb: f32,
    pub engine: EnginePerformance,
    pub engine_ratio_target: f32,
    pub engine_relevance_target: f32,
    pub recovery_attempts: BTreeMap<String, u32>,
    pub active_alerts: usize,
    pub alert_history: usize,
    pub health_history: usize,
    pub state_history: usize,
    pub usage_samples: usize,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Injected observer for cycle outcomes. All methods default to no-ops.
#[async_trait]
pub trait WardenObserver: Send + Sync {
    async fn on_cycle(&self, _report: &CycleReport) {}
    async fn on_alert(&self, _alert: &Alert) {}
    async fn on_recovery(&self, _result: &RecoveryResult) {}
}

struct WardenInner {
    monitor: HealthMonitor,
    states: StateCalculator,
    zones: ZoneClassifier,
    engine: CompressionEngine,
    optimizer: BudgetOptimizer,
    detector: AnomalyDetector,
    recovery: RecoveryEngine,
    alerts: AlertManager,
    last_cycle_at: Option<DateTime<Utc>>,
    last_cycle_latency_ms: Option<f32>,
}

/// Handle to a running periodic cycle driver.
pub struct CycleTicker {
    handle: tokio::task::JoinHandle<()>,
}

impl CycleTicker {
    /// Stop the ticker. Idempotent.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for CycleTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The public face of the control loop.
#[derive(Clone)]
pub struct ContextWarden {
    config: Arc<WardenConfig>,
    inner: Arc<Mutex<WardenInner>>,
    observers: Arc<std::sync::Mutex<Vec<Arc<dyn WardenObserver>>>>,
}

impl ContextWarden {
    /// Build a warden from validated configuration.
    pub fn new(config: WardenConfig) -> WardenResult<Self> {
        config.validate()?;
        let inner = WardenInner {
            monitor: HealthMonitor::new(config.health.clone()),
            states: StateCalculator::new(config.state.clone(), config.health.clone()),
            zones: ZoneClassifier::new(config.zone.clone()),
            engine: CompressionEngine::new(config.compression.clone(), config.zone.clone()),
            optimizer: BudgetOptimizer::new(config.budget.clone()),
            detector: AnomalyDetector::new(config.anomaly.clone()),
            recovery: RecoveryEngine::new(config.recovery.clone()),
            alerts: AlertManager::new(config.alert.clone()),
            last_cycle_at: None,
            last_cycle_latency_ms: None,
        };
        Ok(Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(inner)),
            observers: Arc::new(std::sync::Mutex::new(Vec::new())),
        })
    }

    /// Register an observer for cycle/alert/recovery events.
    pub fn add_observer(&self, observer: Arc<dyn WardenObserver>) {
        self.observers
            .lock()
            .expect("observer registry poisoned")
            .push(observer);
    }

    fn observers(&self) -> Vec<Arc<dyn WardenObserver>> {
        self.observers
            .lock()
            .expect("observer registry poisoned")
            .clone()
    }

    /// Assess health of a snapshot, recording it into the rolling history.
    pub async fn assess_health(&self, snapshot: &ContextSnapshot) -> HealthAssessment {
        let mut guard = self.inner.lock().await;
        guard.monitor.assess(snapshot)
    }

    /// Compute the state vector for a snapshot, recording it into history.
    pub async fn compute_state(&self, snapshot: &ContextSnapshot) -> StateVector {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let assessment = inner.monitor.evaluate(snapshot);
        let latency = inner.last_cycle_latency_ms;
        inner.states.calculate(
            snapshot,
            &assessment,
            StateExtras {
                latency_ms: latency,
                domains: None,
            },
        )
    }

    /// Compress a snapshot with the given options.
    pub async fn compress(
        &self,
        snapshot: &ContextSnapshot,
        options: &CompressionOptions,
    ) -> CompressionResult {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner
            .engine
            .compress(snapshot, options, &inner.monitor, &inner.states)
    }

    /// Run a budget pass over the domain set.
    pub async fn optimize_active_set(
        &self,
        domains: &[Domain],
        snapshot: &ContextSnapshot,
        access: Option<&AccessPattern>,
    ) -> OptimizationResult {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner
            .optimizer
            .optimize_active_set(domains, snapshot, access, &mut inner.engine)
    }

    /// Detect anomalies, run sequential recovery when enabled, and process
    /// alerts. Escalation timers are armed for newly created alerts.
    pub async fn detect_anomalies(&self, snapshot: &ContextSnapshot) -> DetectionResult {
        let detection = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let assessment = inner.monitor.assess(snapshot);
            let latency = inner.last_cycle_latency_ms;
            let state = inner.states.calculate(
                snapshot,
                &assessment,
                StateExtras {
                    latency_ms: latency,
                    domains: None,
                },
            );
            let total_kb = snapshot.serialized_size_kb();
            inner.optimizer.note_usage(total_kb);
            let memory = Self::basic_memory_status(&self.config, snapshot, total_kb);
            Self::detect_and_remediate(inner, &self.config, snapshot, &state, memory)
        };
        self.after_detection(&detection).await;
        detection
    }

    /// Run one full control-loop cycle: assess, state, optimize, detect,
    /// recover, alert.
    pub async fn run_cycle(
        &self,
        snapshot: &ContextSnapshot,
        domains: &[Domain],
        access: Option<&AccessPattern>,
    ) -> CycleReport {
        let started = Instant::now();
        let report = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;

            let assessment = inner.monitor.assess(snapshot);
            let latency = inner.last_cycle_latency_ms;
            let state = inner.states.calculate(
                snapshot,
                &assessment,
                StateExtras {
                    latency_ms: latency,
                    domains: Some(domains),
                },
            );
            let zone = inner.zones.classify(&state);

            let optimization = if domains.is_empty() {
                None
            } else {
                Some(inner.optimizer.optimize_active_set(
                    domains,
                    snapshot,
                    access,
                    &mut inner.engine,
                ))
            };
            let working = optimization
                .as_ref()
                .map(|o| o.snapshot.clone())
                .unwrap_or_else(|| snapshot.clone());

            let memory = match &optimization {
                Some(o) => o.final_memory.clone(),
                None => {
                    let total_kb = working.serialized_size_kb();
                    inner.optimizer.note_usage(total_kb);
                    Self::basic_memory_status(&self.config, &working, total_kb)
                }
            };

            let detection =
                Self::detect_and_remediate(inner, &self.config, &working, &state, memory);

            let duration_ms = started.elapsed().as_secs_f32() * 1000.0;
            inner.last_cycle_at = Some(Utc::now());
            inner.last_cycle_latency_ms = Some(duration_ms);

            debug!(
                zone = %zone.zone,
                anomalies = detection.anomalies.len(),
                duration_ms,
                "cycle complete"
            );

            CycleReport {
                timestamp: Utc::now(),
                assessment,
                state,
                zone,
                optimization,
                detection,
                duration_ms,
            }
        };

        self.after_detection(&report.detection).await;
        for observer in self.observers() {
            observer.on_cycle(&report).await;
        }
        report
    }

    /// Current memory accounting from the last budget pass, or an empty
    /// status when none has run.
    pub async fn memory_status(&self) -> MemoryStatus {
        let guard = self.inner.lock().await;
        guard.optimizer.last_status().cloned().unwrap_or_default()
    }

    /// Read-only operator diagnostics.
    pub async fn diagnostics(&self) -> Diagnostics {
        let guard = self.inner.lock().await;
        let perf = guard.engine.performance();
        let (ratio_target, relevance_target) = guard.engine.targets();
        let recovery_attempts = guard
            .recovery
            .attempt_counters()
            .into_iter()
            .map(|(kind, count)| (kind.as_str().to_string(), count))
            .collect();
        let context_size_kb = guard
            .monitor
            .history()
            .back()
            .map(|a| a.size_kb)
            .unwrap_or(0.0);
        Diagnostics {
            session_count: 0,
            active_domains: guard.optimizer.active_set().len(),
            context_size_kb,
            engine: perf,
            engine_ratio_target: ratio_target,
            engine_relevance_target: relevance_target,
            recovery_attempts,
            active_alerts: guard.alerts.active().len(),
            alert_history: guard.alerts.history().len(),
            health_history: guard.monitor.history().len(),
            state_history: guard.states.history().len(),
            usage_samples: guard.optimizer.usage_history().len(),
            last_cycle_at: guard.last_cycle_at,
        }
    }

    /// Diagnostics enriched with a snapshot's own counters.
    pub async fn diagnostics_for(&self, snapshot: &ContextSnapshot) -> Diagnostics {
        let mut diagnostics = self.diagnostics().await;
        diagnostics.session_count = snapshot.working_memory.session_count;
        diagnostics.active_domains = snapshot.active_domain_count();
        diagnostics.context_size_kb = snapshot.serialized_size_kb();
        diagnostics
    }

    /// Drive periodic cycles. The provider supplies each cycle's inputs;
    /// the returned handle cancels on drop.
    pub fn start_ticker<F>(&self, interval: std::time::Duration, provider: F) -> CycleTicker
    where
        F: Fn() -> (ContextSnapshot, Vec<Domain>, Option<AccessPattern>)
            + Send
            + Sync
            + 'static,
    {
        let warden = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the first cycle
            // lands one full interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (snapshot, domains, access) = provider();
                warden.run_cycle(&snapshot, &domains, access.as_ref()).await;
            }
        });
        CycleTicker { handle }
    }

    /// Arm fire-once escalation timers for new alerts and notify observers.
    async fn after_detection(&self, detection: &DetectionResult) {
        for id in detection
            .alerts
            .created
            .iter()
            .chain(detection.alerts.meta.iter())
        {
            self.spawn_escalation_timer(*id);
        }

        let observers = self.observers();
        if observers.is_empty() {
            return;
        }
        let alerts: Vec<Alert> = {
            let guard = self.inner.lock().await;
            detection
                .alerts
                .created
                .iter()
                .filter_map(|id| guard.alerts.active().iter().find(|a| a.id == *id).cloned())
                .collect()
        };
        for observer in observers {
            for recovery in &detection.recoveries {
                observer.on_recovery(recovery).await;
            }
            for alert in &alerts {
                observer.on_alert(alert).await;
            }
        }
    }

    /// One fire-once timer per alert id, serialized on the controller lock.
    fn spawn_escalation_timer(&self, id: uuid::Uuid) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let delay = std::time::Duration::from_millis(self.config.alert.escalation_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut guard = inner.lock().await;
            guard.alerts.escalate(id);
        });
    }

    fn basic_memory_status(
        config: &WardenConfig,
        snapshot: &ContextSnapshot,
        total_kb: f32,
    ) -> MemoryStatus {
        MemoryStatus {
            total_kb,
            budget_kb: config.budget.max_active_size_kb,
            utilization: total_kb / config.budget.max_active_size_kb.max(f32::EPSILON),
            domain_count: snapshot.working_memory.domains.len(),
            per_domain_kb: BTreeMap::new(),
        }
    }

    /// Detection, sequential recovery, and alert processing against a
    /// working copy of the snapshot. Caller has already recorded the
    /// assessment and state for this cycle.
    fn detect_and_remediate(
        inner: &mut WardenInner,
        config: &WardenConfig,
        snapshot: &ContextSnapshot,
        state: &StateVector,
        memory: MemoryStatus,
    ) -> DetectionResult {
        let patterns = inner.states.detect_patterns();
        let engine_perf = inner.engine.performance();
        let engine_targets = inner.engine.targets();
        let anomalies = {
            let inputs = DetectionInputs {
                state,
                patterns: &patterns,
                health_history: inner.monitor.history(),
                usage_history: inner.optimizer.usage_history(),
                memory: &memory,
                engine: &engine_perf,
                engine_targets,
                snapshot,
            };
            inner.detector.detect(&inputs)
        };

        let mut working = snapshot.clone();
        let mut recoveries = Vec::new();
        if config.anomaly.auto_recovery {
            // Sequential, in detection order: concurrent tactics could race
            // on overlapping domains.
            for anomaly in &anomalies {
                let mut targets = RecoveryTargets {
                    snapshot: &mut working,
                    monitor: &mut inner.monitor,
                    states: &mut inner.states,
                    engine: &mut inner.engine,
                    optimizer: &mut inner.optimizer,
                    zones: &inner.zones,
                };
                let result = inner.recovery.execute(anomaly, &mut targets);
                recoveries.push(result);
            }
        }

        let alerts = inner.alerts.process(&anomalies, &recoveries);
        DetectionResult {
            anomalies,
            recoveries,
            alerts,
            snapshot: working,
        }
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }
}
