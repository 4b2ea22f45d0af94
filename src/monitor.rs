//! Component health monitor.
//!
//! The reactive interceptors only see components that fail loudly. This
//! registry proactively probes named components (usually a lightweight GET
//! against a known endpoint) and funnels failures into the same capture
//! buffer, catching the picker whose backing search API silently 404s.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;

use crate::buffer::CaptureBuffer;
use crate::error::SentinelError;
use crate::report::{now_millis, ErrorReport, HealthCheckResult, ReportKind};

/// A registered probe: async, side-effect-light, `Ok(true)` means healthy.
pub type Probe = Arc<dyn Fn() -> BoxFuture<'static, Result<bool, SentinelError>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(60_000),
        }
    }
}

pub struct HealthMonitor {
    buffer: Arc<CaptureBuffer>,
    config: MonitorConfig,
    /// Name-keyed probes; BTreeMap keeps cycle order deterministic.
    probes: Mutex<BTreeMap<String, Probe>>,
    running: AtomicBool,
    /// Bumped on every start/stop; a loop whose generation no longer matches
    /// has been superseded and must exit at its next tick.
    generation: AtomicU64,
    cycles: AtomicU64,
    failures: AtomicU64,
}

impl HealthMonitor {
    pub fn new(buffer: Arc<CaptureBuffer>, config: MonitorConfig) -> Arc<Self> {
        Arc::new(Self {
            buffer,
            config,
            probes: Mutex::new(BTreeMap::new()),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    /// Register a probe under `name`. The last registration for a name wins.
    pub fn register<F, Fut>(&self, name: &str, probe: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<bool, SentinelError>> + Send + 'static,
    {
        let probe: Probe = Arc::new(move || probe().boxed());
        self.lock().insert(name.to_string(), probe);
    }

    pub fn unregister(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Execute every registered probe, one at a time.
    ///
    /// Sequential by design: probes hit real endpoints and a parallel burst
    /// every cycle would be its own load problem. `Ok(false)` and `Err` are
    /// both failures; each failure synthesizes an [`ErrorReport`] into the
    /// shared buffer.
    pub async fn run_checks(&self) -> Vec<HealthCheckResult> {
        let snapshot: Vec<(String, Probe)> = self
            .lock()
            .iter()
            .map(|(name, probe)| (name.clone(), probe.clone()))
            .collect();

        let mut results = Vec::with_capacity(snapshot.len());
        for (name, probe) in snapshot {
            let outcome = probe().await;
            let result = match outcome {
                Ok(true) => HealthCheckResult {
                    name: name.clone(),
                    passed: true,
                    timestamp: now_millis(),
                    error: None,
                },
                Ok(false) => HealthCheckResult {
                    name: name.clone(),
                    passed: false,
                    timestamp: now_millis(),
                    error: None,
                },
                Err(e) => HealthCheckResult {
                    name: name.clone(),
                    passed: false,
                    timestamp: now_millis(),
                    error: Some(e.to_string()),
                },
            };

            if !result.passed {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let detail = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "probe returned unhealthy".into());
                let report = ErrorReport::new(
                    ReportKind::HealthCheckFailure,
                    format!("Component health check failed: {name} ({detail})"),
                )
                .with_context("component", name.clone())
                .with_context("healthCheckFailure", true);
                self.buffer.capture(report);
            }

            results.push(result);
        }

        self.cycles.fetch_add(1, Ordering::Relaxed);
        results
    }

    /// Run a cycle immediately, then every `check_interval`. No-op when
    /// already running.
    pub fn start(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        tracing::info!(
            interval_ms = self.config.check_interval.as_millis() as u64,
            "Health monitor starting"
        );
        // A stale loop from before a stop/start restart must not observe the
        // re-raised running flag and keep ticking alongside the new loop, so
        // each loop is bound to the generation it was started under.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.check_interval);
            loop {
                // First tick completes immediately: a cycle runs on start.
                interval.tick().await;
                if monitor.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                monitor.run_checks().await;
            }
            tracing::info!("Health monitor loop exited");
        });
    }

    /// Cancel the interval at its next tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            running: self.is_running(),
            registered: self.lock().len(),
            cycles: self.cycles.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Probe>> {
        self.probes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub running: bool,
    pub registered: usize,
    pub cycles: u64,
    pub failures: u64,
}
