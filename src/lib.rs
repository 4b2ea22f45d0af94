//! milonga-sentinel: proactive error detection and self-healing for the
//! Milonga client.
//!
//! The pipeline has three legs sharing one rate-limited capture buffer:
//!
//! - interceptors ([`intercept`]) wrap the app's log sink, outbound HTTP
//!   transport, view-tree mutation stream, panic hook and detached tasks,
//!   copying failures into the buffer without changing observed behavior;
//! - a [`monitor::HealthMonitor`] proactively probes named components and
//!   synthesizes reports for silent failures;
//! - a [`reporter::BatchReporter`] drains the buffer on an interval and
//!   ships batches to the remote analysis endpoint.
//!
//! Independently, the [`recovery::SelfHealingBoundary`] catches render-tree
//! exceptions and attempts tiered automated recovery, escalating to a
//! workflow task once its durable attempt budget is spent.
//!
//! [`Sentinel`] wires the whole pipeline together for the common case;
//! every collaborator is also usable on its own.

pub mod buffer;
pub mod error;
pub mod escalation;
pub mod intercept;
pub mod logging;
pub mod monitor;
pub mod recovery;
pub mod report;
pub mod reporter;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use buffer::{BufferConfig, CaptureBuffer};
pub use error::SentinelError;
pub use monitor::{HealthMonitor, MonitorConfig};
pub use recovery::store::{FileRecoveryStore, RecoveryStore};
pub use recovery::{
    BoundaryPhase, CaughtError, RecoveryExecutor, RecoveryPolicy, SelfHealingBoundary,
};
pub use report::{ErrorReport, ReportKind};
pub use reporter::{BatchReporter, ClientContext, ReporterConfig};

use escalation::HttpEscalationChannel;
use intercept::panics::PanicHookGuard;
use intercept::tasks::TaskSupervisor;
use reporter::HttpAnalysisEndpoint;

/// Top-level configuration for the assembled pipeline.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    /// Error-analysis endpoint; batches are POSTed here.
    pub analysis_url: String,
    /// Workflow-task endpoint for escalation.
    pub task_url: String,
    /// Notification endpoint for escalation follow-ups.
    pub notify_url: String,
    /// Timeout applied to every outbound pipeline request.
    pub http_timeout: Duration,
    /// Where the durable recovery counter lives. `None` means the platform
    /// default under the local data directory.
    pub recovery_store_path: Option<PathBuf>,
    pub buffer: BufferConfig,
    pub reporter: ReporterConfig,
    pub monitor: MonitorConfig,
    pub recovery: RecoveryPolicy,
    pub client: ClientContext,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            analysis_url: "http://127.0.0.1:8787/api/errors/analyze".into(),
            task_url: "http://127.0.0.1:8787/api/tasks".into(),
            notify_url: "http://127.0.0.1:8787/api/notifications".into(),
            http_timeout: Duration::from_secs(10),
            recovery_store_path: None,
            buffer: BufferConfig::default(),
            reporter: ReporterConfig::default(),
            monitor: MonitorConfig::default(),
            recovery: RecoveryPolicy::default(),
            client: ClientContext::default(),
        }
    }
}

/// The assembled pipeline: buffer, reporter, monitor, boundary and the
/// panic-hook guard, wired against one HTTP client.
///
/// The host supplies the [`RecoveryExecutor`] (how to actually re-render or
/// reload) and installs the interceptor decorators at its own composition
/// points via [`Sentinel::buffer`] and the [`intercept`] wrappers.
pub struct Sentinel {
    buffer: Arc<CaptureBuffer>,
    reporter: Arc<BatchReporter>,
    monitor: Arc<HealthMonitor>,
    boundary: Arc<SelfHealingBoundary>,
    supervisor: TaskSupervisor,
    panic_guard: Mutex<Option<PanicHookGuard>>,
}

impl Sentinel {
    pub fn new(
        config: SentinelConfig,
        executor: Arc<dyn RecoveryExecutor>,
    ) -> Result<Arc<Self>, SentinelError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        let analysis_url = url::Url::parse(&config.analysis_url)?;
        let task_url = url::Url::parse(&config.task_url)?;
        let notify_url = url::Url::parse(&config.notify_url)?;

        let buffer = Arc::new(CaptureBuffer::new(config.buffer));
        let endpoint: Arc<dyn reporter::AnalysisEndpoint> =
            Arc::new(HttpAnalysisEndpoint::new(http.clone(), analysis_url));
        let escalation = Arc::new(HttpEscalationChannel::new(http, task_url, notify_url));

        let store_path = config
            .recovery_store_path
            .unwrap_or_else(FileRecoveryStore::default_path);
        let store = Arc::new(FileRecoveryStore::new(store_path));

        let reporter = BatchReporter::new(
            buffer.clone(),
            endpoint.clone(),
            config.reporter,
            config.client.clone(),
        );
        let monitor = HealthMonitor::new(buffer.clone(), config.monitor);
        let boundary = SelfHealingBoundary::new(
            config.recovery,
            store,
            executor,
            endpoint,
            escalation,
            config.client,
        );
        let supervisor = TaskSupervisor::new(buffer.clone());

        Ok(Arc::new(Self {
            buffer,
            reporter,
            monitor,
            boundary,
            supervisor,
            panic_guard: Mutex::new(None),
        }))
    }

    /// Start the periodic legs and install the panic capture hook.
    /// Idempotent; each collaborator guards its own running state.
    pub fn start(&self) {
        self.reporter.start();
        self.monitor.start();
        let mut guard = self.lock_guard();
        if guard.is_none() {
            *guard = PanicHookGuard::install(self.buffer.clone());
        }
        tracing::info!("Sentinel pipeline started");
    }

    /// Stop the periodic legs and restore the pre-install panic hook.
    pub fn stop(&self) {
        self.reporter.stop();
        self.monitor.stop();
        if let Some(mut guard) = self.lock_guard().take() {
            guard.uninstall();
        }
        tracing::info!("Sentinel pipeline stopped");
    }

    pub fn buffer(&self) -> &Arc<CaptureBuffer> {
        &self.buffer
    }

    pub fn reporter(&self) -> &Arc<BatchReporter> {
        &self.reporter
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn boundary(&self) -> &Arc<SelfHealingBoundary> {
        &self.boundary
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    fn lock_guard(&self) -> std::sync::MutexGuard<'_, Option<PanicHookGuard>> {
        self.panic_guard.lock().unwrap_or_else(|e| e.into_inner())
    }
}
