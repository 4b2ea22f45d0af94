//! Batch reporter: drains the capture buffer on a fixed interval and ships
//! batches to the remote analysis endpoint.
//!
//! Failure here is never fatal to the host application. Every network or
//! parse failure is absorbed, logged, and answered with a bounded retry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::buffer::CaptureBuffer;
use crate::error::SentinelError;
use crate::report::{now_millis, ErrorReport};

// ── Wire contract ──────────────────────────────────────────────────────

/// Ambient page context attached to every outbound payload.
#[derive(Debug, Clone, Serialize)]
pub struct ClientContext {
    pub page_url: String,
    pub user_agent: String,
}

impl Default for ClientContext {
    fn default() -> Self {
        Self {
            page_url: "app://milonga".into(),
            user_agent: format!("milonga-sentinel/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// One outbound batch. The envelope field names are the analysis backend's
/// contract; do not rename without coordinating a backend change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBatch {
    pub errors: Vec<ErrorReport>,
    pub timestamp: i64,
    pub user_agent: String,
    pub url: String,
}

impl ErrorBatch {
    pub fn new(errors: Vec<ErrorReport>, client: &ClientContext) -> Self {
        Self {
            errors,
            timestamp: now_millis(),
            user_agent: client.user_agent.clone(),
            url: client.page_url.clone(),
        }
    }
}

/// Analysis verdict the backend may attach to a 200 response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAnalysis {
    #[serde(default)]
    pub auto_fixable: bool,
    #[serde(default)]
    pub fix_steps: Option<Vec<String>>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct AnalysisEnvelope {
    analysis: Option<ErrorAnalysis>,
}

/// How the endpoint disposed of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDisposition {
    /// 2xx: delivered.
    Accepted,
    /// 404: analysis feature not rolled out yet. Expected, silent.
    NotAvailable,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub disposition: BatchDisposition,
    pub analysis: Option<ErrorAnalysis>,
}

/// The remote analysis collaborator. One implementation talks HTTP; tests
/// substitute their own.
#[async_trait]
pub trait AnalysisEndpoint: Send + Sync {
    async fn submit(&self, batch: &ErrorBatch) -> Result<SubmitOutcome, SentinelError>;
}

pub struct HttpAnalysisEndpoint {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpAnalysisEndpoint {
    pub fn new(client: reqwest::Client, endpoint: url::Url) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl AnalysisEndpoint for HttpAnalysisEndpoint {
    async fn submit(&self, batch: &ErrorBatch) -> Result<SubmitOutcome, SentinelError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(batch)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(SubmitOutcome {
                disposition: BatchDisposition::NotAvailable,
                analysis: None,
            });
        }
        if !status.is_success() {
            return Err(SentinelError::Endpoint {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        // Body is optional; missing/unparsable analysis is not a failure.
        let envelope: AnalysisEnvelope = response.json().await.unwrap_or_default();
        Ok(SubmitOutcome {
            disposition: BatchDisposition::Accepted,
            analysis: envelope.analysis,
        })
    }
}

// ── BatchReporter ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Tick interval between drain-and-send attempts.
    pub flush_interval: Duration,
    /// Hard cap on buffered reports after a failed-batch requeue.
    pub buffer_ceiling: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(10_000),
            buffer_ceiling: 50,
        }
    }
}

pub struct BatchReporter {
    buffer: Arc<CaptureBuffer>,
    endpoint: Arc<dyn AnalysisEndpoint>,
    config: ReporterConfig,
    client: ClientContext,
    running: AtomicBool,
    /// Bumped on every start/stop; a loop whose generation no longer matches
    /// has been superseded and must exit at its next tick.
    generation: AtomicU64,
    /// Single-threaded-style reentrancy guard: one send in flight at a time.
    in_flight: AtomicBool,
    batches_sent: AtomicU64,
    reports_sent: AtomicU64,
    send_failures: AtomicU64,
}

impl BatchReporter {
    pub fn new(
        buffer: Arc<CaptureBuffer>,
        endpoint: Arc<dyn AnalysisEndpoint>,
        config: ReporterConfig,
        client: ClientContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffer,
            endpoint,
            config,
            client,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            batches_sent: AtomicU64::new(0),
            reports_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
        })
    }

    /// Start the tick loop. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        tracing::info!(
            interval_ms = self.config.flush_interval.as_millis() as u64,
            "Batch reporter starting"
        );
        // Bind the loop to its start generation so a stop/start restart
        // within one tick cannot leave two loops alive.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reporter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(reporter.config.flush_interval);
            // The immediate first tick would race captures made right at
            // startup; skip it so the first real send happens one interval in.
            interval.tick().await;
            loop {
                interval.tick().await;
                if reporter.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                reporter.flush().await;
            }
            tracing::info!("Batch reporter loop exited");
        });
    }

    /// Stop the tick loop at its next tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Drain-and-send once, out of cycle. Public for tests and diagnostics.
    ///
    /// No-ops when the buffer is empty or a send is already in flight.
    /// Never propagates a failure to the caller.
    pub async fn flush(&self) {
        if self.buffer.is_empty() {
            return;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let reports = self.buffer.drain();
        if reports.is_empty() {
            self.in_flight.store(false, Ordering::SeqCst);
            return;
        }

        let count = reports.len();
        let batch = ErrorBatch::new(reports, &self.client);
        match self.endpoint.submit(&batch).await {
            Ok(outcome) => {
                self.batches_sent.fetch_add(1, Ordering::Relaxed);
                self.reports_sent.fetch_add(count as u64, Ordering::Relaxed);
                match outcome.disposition {
                    BatchDisposition::Accepted => {
                        tracing::debug!(count, "Error batch delivered");
                    }
                    BatchDisposition::NotAvailable => {
                        // Phased rollout: endpoint not live yet. Drop quietly.
                        tracing::debug!(count, "Analysis endpoint not available, batch discarded");
                    }
                }
            }
            Err(e) => {
                self.send_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(count, "Error batch send failed, requeueing: {}", e);
                self.buffer
                    .requeue_front(batch.errors, self.config.buffer_ceiling);
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }

    pub fn stats(&self) -> ReporterStats {
        ReporterStats {
            running: self.running.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            reports_sent: self.reports_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReporterStats {
    pub running: bool,
    pub batches_sent: u64,
    pub reports_sent: u64,
    pub send_failures: u64,
}
