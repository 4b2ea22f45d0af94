//! End-to-end pipeline tests: interceptors and monitor feeding the shared
//! buffer, the reporter shipping batches, and the self-healing boundary's
//! full recovery ladder, with stubbed collaborators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;

use sentinel::escalation::{EscalationChannel, EscalationTask};
use sentinel::intercept::console::{CapturingSink, LogSink};
use sentinel::monitor::{HealthMonitor, MonitorConfig};
use sentinel::recovery::store::{MemoryRecoveryStore, PersistedAttempts, RecoveryStore};
use sentinel::recovery::{RecoveryAction, RecoveryExecutor, SelfHealingBoundary};
use sentinel::report::now_millis;
use sentinel::reporter::{
    AnalysisEndpoint, BatchDisposition, ErrorBatch, SubmitOutcome,
};
use sentinel::{
    BatchReporter, BoundaryPhase, BufferConfig, CaptureBuffer, CaughtError, ClientContext,
    ErrorReport, RecoveryPolicy, ReportKind, ReporterConfig, SentinelError,
};

// ── Stub collaborators ─────────────────────────────────────────────────

struct ScriptedEndpoint {
    outcomes: Mutex<Vec<Result<SubmitOutcome, SentinelError>>>,
    batches: Mutex<Vec<ErrorBatch>>,
}

impl ScriptedEndpoint {
    fn new(outcomes: Vec<Result<SubmitOutcome, SentinelError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes),
            batches: Mutex::new(Vec::new()),
        })
    }

    fn always_accepting() -> Arc<Self> {
        Self::new(vec![])
    }

    fn accepted() -> Result<SubmitOutcome, SentinelError> {
        Ok(SubmitOutcome {
            disposition: BatchDisposition::Accepted,
            analysis: None,
        })
    }

    fn failed() -> Result<SubmitOutcome, SentinelError> {
        Err(SentinelError::Endpoint {
            status: 503,
            message: "unavailable".into(),
        })
    }

    fn batches(&self) -> Vec<ErrorBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisEndpoint for ScriptedEndpoint {
    async fn submit(&self, batch: &ErrorBatch) -> Result<SubmitOutcome, SentinelError> {
        self.batches.lock().unwrap().push(batch.clone());
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            Self::accepted()
        } else {
            outcomes.remove(0)
        }
    }
}

struct RecordingExecutor {
    actions: Mutex<Vec<(RecoveryAction, tokio::time::Instant)>>,
}

impl RecordingExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            actions: Mutex::new(Vec::new()),
        })
    }

    fn actions(&self) -> Vec<(RecoveryAction, tokio::time::Instant)> {
        self.actions.lock().unwrap().clone()
    }
}

impl RecoveryExecutor for RecordingExecutor {
    fn rerender(&self) {
        self.actions
            .lock()
            .unwrap()
            .push((RecoveryAction::Rerender, tokio::time::Instant::now()));
    }
    fn reload(&self) {
        self.actions
            .lock()
            .unwrap()
            .push((RecoveryAction::Reload, tokio::time::Instant::now()));
    }
}

struct CountingEscalation {
    tasks: AtomicU32,
    notifies: AtomicU32,
}

impl CountingEscalation {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: AtomicU32::new(0),
            notifies: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl EscalationChannel for CountingEscalation {
    async fn create_task(&self, _task: &EscalationTask) -> Result<String, SentinelError> {
        self.tasks.fetch_add(1, Ordering::SeqCst);
        Ok("task-77".into())
    }
    async fn notify(&self, _task_id: &str, _message: &str) -> Result<(), SentinelError> {
        self.notifies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SilentSink;
impl LogSink for SilentSink {
    fn error(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
}

fn boundary_fixture(
    store: Arc<MemoryRecoveryStore>,
) -> (
    Arc<SelfHealingBoundary>,
    Arc<RecordingExecutor>,
    Arc<CountingEscalation>,
) {
    let executor = RecordingExecutor::new();
    let escalation = CountingEscalation::new();
    let boundary = SelfHealingBoundary::new(
        RecoveryPolicy::default(),
        store,
        executor.clone(),
        ScriptedEndpoint::always_accepting(),
        escalation.clone(),
        ClientContext::default(),
    );
    (boundary, executor, escalation)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ── Capture and reporting ──────────────────────────────────────────────

#[tokio::test]
async fn error_storm_is_capped_by_sliding_window() {
    let buffer = Arc::new(CaptureBuffer::new(BufferConfig::default()));
    let sink = CapturingSink::wrap(Arc::new(SilentSink), buffer.clone());

    for i in 0..25 {
        sink.error(&format!("render failure {i}"));
    }

    assert_eq!(buffer.len(), 10);
    let stats = buffer.stats();
    assert_eq!(stats.captured, 10);
    assert_eq!(stats.dropped, 15);
}

#[tokio::test(start_paused = true)]
async fn reporter_ships_on_interval_not_immediately() {
    let buffer = Arc::new(CaptureBuffer::new(BufferConfig::default()));
    let endpoint = ScriptedEndpoint::always_accepting();
    let reporter = BatchReporter::new(
        buffer.clone(),
        endpoint.clone(),
        ReporterConfig::default(),
        ClientContext::default(),
    );

    buffer.capture(ErrorReport::new(ReportKind::ConsoleError, "early"));
    reporter.start();

    // Nothing goes out before the first full interval elapses
    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(endpoint.batches().is_empty());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let batches = endpoint.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].errors.len(), 1);
    assert!(buffer.is_empty());

    reporter.stop();
}

#[tokio::test(start_paused = true)]
async fn failed_batch_is_resent_ahead_of_newer_reports() {
    let buffer = Arc::new(CaptureBuffer::new(BufferConfig {
        rate_max: 100,
        ..Default::default()
    }));
    let endpoint = ScriptedEndpoint::new(vec![
        ScriptedEndpoint::failed(),
        ScriptedEndpoint::accepted(),
    ]);
    let reporter = BatchReporter::new(
        buffer.clone(),
        endpoint.clone(),
        ReporterConfig::default(),
        ClientContext::default(),
    );

    for i in 1..=5 {
        buffer.capture(ErrorReport::new(ReportKind::ConsoleError, format!("old{i}")));
    }
    reporter.start();
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    // Endpoint was down: everything back in the buffer
    assert_eq!(buffer.len(), 5);

    for i in 1..=3 {
        buffer.capture(ErrorReport::new(ReportKind::ConsoleError, format!("new{i}")));
    }
    tokio::time::sleep(Duration::from_secs(10)).await;

    let batches = endpoint.batches();
    assert_eq!(batches.len(), 2);
    let second: Vec<_> = batches[1].errors.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(
        second,
        vec!["old1", "old2", "old3", "old4", "old5", "new1", "new2", "new3"],
    );

    reporter.stop();
}

// ── Health monitor into the shared pipeline ────────────────────────────

#[tokio::test]
async fn silent_component_failure_reaches_the_endpoint() {
    let buffer = Arc::new(CaptureBuffer::new(BufferConfig::default()));
    let monitor = HealthMonitor::new(buffer.clone(), MonitorConfig::default());
    // The event picker renders fine but its backing search API 404s
    monitor.register("event-picker", || async {
        Err(SentinelError::Probe("search endpoint returned 404".into()))
    });
    monitor.register("feed", || async { Ok(true) });

    monitor.run_checks().await;

    let endpoint = ScriptedEndpoint::always_accepting();
    let reporter = BatchReporter::new(
        buffer.clone(),
        endpoint.clone(),
        ReporterConfig::default(),
        ClientContext::default(),
    );
    reporter.flush().await;

    let batches = endpoint.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].errors.len(), 1);
    let report = &batches[0].errors[0];
    assert_eq!(report.kind, ReportKind::HealthCheckFailure);
    assert!(report.message.contains("event-picker"));
    assert_eq!(report.context["healthCheckFailure"], true);
}

// ── Self-healing ladder ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn transient_network_error_reloads_with_backoff() {
    let store = Arc::new(MemoryRecoveryStore::default());
    let (boundary, executor, _) = boundary_fixture(store.clone());
    let start = tokio::time::Instant::now();

    let phase = boundary.on_error(CaughtError::new("Network request failed"));
    assert_eq!(phase, BoundaryPhase::AutoFixing);
    // Counter persisted before any recovery outcome is known
    assert_eq!(store.load().unwrap().attempts, 1);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let actions = executor.actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].0, RecoveryAction::Reload);
    assert_eq!((actions[0].1 - start).as_millis(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn stale_chunk_reference_forces_full_reload() {
    let store = Arc::new(MemoryRecoveryStore::default());
    let (boundary, executor, _) = boundary_fixture(store);
    let start = tokio::time::Instant::now();

    boundary.on_error(
        CaughtError::new("ChunkLoadError: Loading chunk 7 failed")
            .with_stack("at __webpack_require__ (runtime.js:1:123)"),
    );
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let actions = executor.actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].0, RecoveryAction::Reload);
    assert_eq!((actions[0].1 - start).as_millis(), 1_000);
}

#[tokio::test(start_paused = true)]
async fn spent_budget_escalates_once_and_stops_recovering() {
    let store = Arc::new(MemoryRecoveryStore::default());
    store.save(PersistedAttempts {
        attempts: 3,
        last_attempt_ms: now_millis(),
    });
    let (boundary, executor, escalation) = boundary_fixture(store.clone());

    let phase = boundary.on_error(CaughtError::new("Network request failed"));
    assert_eq!(phase, BoundaryPhase::Exhausted);
    settle().await;

    assert_eq!(escalation.tasks.load(Ordering::SeqCst), 1);
    assert_eq!(escalation.notifies.load(Ordering::SeqCst), 1);

    // No timer was scheduled; the fallback stays up
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(executor.actions().is_empty());
    assert_eq!(boundary.phase(), BoundaryPhase::Exhausted);
}

#[tokio::test(start_paused = true)]
async fn stale_attempts_outside_cooldown_do_not_count() {
    let store = Arc::new(MemoryRecoveryStore::default());
    store.save(PersistedAttempts {
        attempts: 3,
        last_attempt_ms: now_millis() - 31_000,
    });
    let (boundary, executor, escalation) = boundary_fixture(store.clone());

    // Same error that would exhaust above now gets a fresh first attempt
    let phase = boundary.on_error(CaughtError::new("Network request failed"));
    assert_eq!(phase, BoundaryPhase::AutoFixing);
    assert_eq!(store.load().unwrap().attempts, 1);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(executor.actions().len(), 1);
    settle().await;
    assert_eq!(escalation.tasks.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn successful_mount_clears_the_durable_budget() {
    let store = Arc::new(MemoryRecoveryStore::default());
    let (boundary, _, _) = boundary_fixture(store.clone());

    boundary.on_error(CaughtError::new("fetch failed"));
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    boundary.on_mount_success();

    assert!(store.load().is_none());
    assert_eq!(boundary.phase(), BoundaryPhase::Healthy);
}

// ── Buffer invariants ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn pending_never_exceeds_rate_max(
        rate_max in 1usize..30,
        captures in 0usize..100,
    ) {
        let buffer = CaptureBuffer::new(BufferConfig {
            rate_window: Duration::from_secs(60),
            rate_max,
        });
        for i in 0..captures {
            buffer.capture(ErrorReport::new(ReportKind::ConsoleError, format!("e{i}")));
        }
        prop_assert!(buffer.len() <= rate_max);
        let stats = buffer.stats();
        prop_assert_eq!(stats.captured + stats.dropped, captures as u64);
    }

    #[test]
    fn requeue_never_exceeds_ceiling_and_keeps_newest(
        queued in 0usize..20,
        requeued in 0usize..20,
        ceiling in 1usize..25,
    ) {
        let buffer = CaptureBuffer::new(BufferConfig {
            rate_window: Duration::from_secs(60),
            rate_max: 100,
        });
        for i in 0..queued {
            buffer.capture(ErrorReport::new(ReportKind::ConsoleError, format!("q{i}")));
        }
        let batch: Vec<_> = (0..requeued)
            .map(|i| ErrorReport::new(ReportKind::ConsoleError, format!("r{i}")))
            .collect();

        let dropped = buffer.requeue_front(batch, ceiling);

        prop_assert!(buffer.len() <= ceiling);
        prop_assert_eq!(dropped + buffer.len(), queued + requeued);
        // The newest capture survives whenever anything does
        if queued > 0 && buffer.len() > 0 {
            let drained = buffer.drain();
            prop_assert_eq!(
                drained.last().map(|r| r.message.clone()),
                Some(format!("q{}", queued - 1)),
            );
        }
    }
}
