//! Self-healing boundary: the render-tree-level failure handler.
//!
//! Catches exceptions from a bounded subtree and attempts automated recovery
//! with escalating severity: instant pattern-matched fixes, exponential
//! backoff reloads for likely-transient errors, then escalation to a human
//! or agent workflow once the durable attempt budget is spent. The attempt
//! counter is persisted through [`store::RecoveryStore`] so a crash loop is
//! bounded even across full reloads.
//!
//! Recovery scheduling is idempotent per episode: at most one timer is ever
//! pending, so the instant-fix, gradual and analysis-triggered tracks cannot
//! stack actions on the same error.

pub mod patterns;
pub mod store;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::SentinelError;
use crate::escalation::{EscalationChannel, EscalationTask};
use crate::report::{now_millis, ErrorReport, ReportKind};
use crate::reporter::{AnalysisEndpoint, BatchDisposition, ClientContext, ErrorBatch};

use self::patterns::InstantFix;
use self::store::{PersistedAttempts, RecoveryStore};

/// States of the boundary's recovery machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryPhase {
    Healthy,
    /// An error was caught; fallback UI is showing, no timer pending.
    Caught,
    /// A recovery action is scheduled.
    AutoFixing,
    /// Attempt budget spent. Terminal until manual reset.
    Exhausted,
}

/// The two recovery actions the boundary can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Rerender,
    Reload,
}

/// Host-side execution of recovery actions. A full reload is expected to
/// tear down and restart the client (resetting all in-memory state); a
/// re-render gives the protected subtree another pass.
pub trait RecoveryExecutor: Send + Sync {
    fn rerender(&self);
    fn reload(&self);
}

/// One caught render exception, as delivered by the host's boundary glue.
#[derive(Debug, Clone)]
pub struct CaughtError {
    pub message: String,
    pub stack: Option<String>,
    pub component_stack: Option<String>,
}

impl CaughtError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            component_stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_component_stack(mut self, component_stack: impl Into<String>) -> Self {
        self.component_stack = Some(component_stack.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Durable attempt ceiling before the boundary stops auto-recovering.
    pub max_attempts: u32,
    /// Stored attempts older than this read as zero.
    pub cooldown: Duration,
    /// Base unit for the gradual track's `2^(attempt-1)` backoff.
    pub backoff_unit: Duration,
    /// Delay for a recovery scheduled off an auto-fixable analysis verdict.
    pub analysis_fix_delay: Duration,
    /// Assignee identifier for escalation tasks.
    pub escalation_assignee: String,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: Duration::from_millis(30_000),
            backoff_unit: Duration::from_secs(1),
            analysis_fix_delay: Duration::from_millis(2_000),
            escalation_assignee: "healing-agent".into(),
        }
    }
}

struct BoundaryState {
    phase: BoundaryPhase,
    /// Occurrences of the current error episode. Reset only by manual reset.
    error_count: u32,
    current: Option<CaughtError>,
    pending: Option<JoinHandle<()>>,
}

/// The boundary service. One instance per protected subtree.
pub struct SelfHealingBoundary {
    policy: RecoveryPolicy,
    store: Arc<dyn RecoveryStore>,
    executor: Arc<dyn RecoveryExecutor>,
    endpoint: Arc<dyn AnalysisEndpoint>,
    escalation: Arc<dyn EscalationChannel>,
    client: ClientContext,
    state: Mutex<BoundaryState>,
}

impl SelfHealingBoundary {
    pub fn new(
        policy: RecoveryPolicy,
        store: Arc<dyn RecoveryStore>,
        executor: Arc<dyn RecoveryExecutor>,
        endpoint: Arc<dyn AnalysisEndpoint>,
        escalation: Arc<dyn EscalationChannel>,
        client: ClientContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            policy,
            store,
            executor,
            endpoint,
            escalation,
            client,
            state: Mutex::new(BoundaryState {
                phase: BoundaryPhase::Healthy,
                error_count: 0,
                current: None,
                pending: None,
            }),
        })
    }

    /// Durable attempt count, after applying the cooldown rule: state older
    /// than the cooldown window no longer counts against the budget.
    pub fn recovery_attempts(&self) -> u32 {
        match self.store.load() {
            Some(state) => {
                let age_ms = now_millis() - state.last_attempt_ms;
                if age_ms > self.policy.cooldown.as_millis() as i64 {
                    self.store.clear();
                    0
                } else {
                    state.attempts
                }
            }
            None => 0,
        }
    }

    /// Entry point for a caught render exception.
    ///
    /// Increments and immediately persists the attempt counter (independent
    /// of eventual recovery success), then either escalates (budget spent)
    /// or schedules at most one recovery action. The analysis collaborator
    /// is notified as a detached best-effort task; it never blocks recovery.
    pub fn on_error(self: &Arc<Self>, error: CaughtError) -> BoundaryPhase {
        let prior = self.recovery_attempts();
        self.store.save(PersistedAttempts {
            attempts: prior + 1,
            last_attempt_ms: now_millis(),
        });

        let episode = Uuid::new_v4();
        {
            let mut state = self.lock();
            state.error_count += 1;
            state.current = Some(error.clone());
            state.phase = BoundaryPhase::Caught;
        }

        if prior >= self.policy.max_attempts {
            self.lock().phase = BoundaryPhase::Exhausted;
            tracing::error!(
                episode = %episode,
                attempts = prior,
                "Recovery budget exhausted, escalating: {}",
                error.message,
            );
            self.spawn_escalation(error, prior);
            return BoundaryPhase::Exhausted;
        }

        let attempt = prior + 1;
        let haystack_stack = error.stack.as_deref();

        if let Some(fix) = patterns::match_instant_fix(&error.message, haystack_stack) {
            let (action, delay) = match fix {
                InstantFix::Rerender { delay } => (RecoveryAction::Rerender, delay),
                InstantFix::Reload { delay } => (RecoveryAction::Reload, delay),
            };
            tracing::info!(episode = %episode, ?action, "Instant pattern matched");
            self.schedule(action, delay);
        } else if patterns::is_likely_transient(&error.message) {
            // 2^(attempt-1) seconds: 1s, 2s, 4s for attempts 1-3
            let delay = self.policy.backoff_unit * (1u32 << prior.min(16));
            tracing::info!(
                episode = %episode,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Transient error, scheduling backoff reload",
            );
            self.schedule(RecoveryAction::Reload, delay);
        } else {
            tracing::warn!(
                episode = %episode,
                "Error not classified as recoverable, showing fallback: {}",
                error.message,
            );
        }

        self.spawn_analysis(error, episode);
        self.lock().phase
    }

    /// A clean mount after recovery: proof the crash loop is over.
    pub fn on_mount_success(&self) {
        self.store.clear();
        let mut state = self.lock();
        state.phase = BoundaryPhase::Healthy;
        state.current = None;
    }

    /// Manual reset: the only path that clears the episode error count and
    /// the durable budget outside the cooldown rule.
    pub fn reset(&self) {
        {
            let mut state = self.lock();
            state.phase = BoundaryPhase::Healthy;
            state.error_count = 0;
            state.current = None;
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
        }
        self.store.clear();
        tracing::info!("Boundary manually reset");
    }

    /// User-initiated bug report: serialize the current error, send it to
    /// the analysis endpoint, surface the analysis text. When the endpoint
    /// is unreachable or not rolled out, the raw serialized report comes
    /// back instead so the host can offer a clipboard copy.
    pub async fn report_bug(&self) -> Result<BugReportOutcome, SentinelError> {
        let error = self
            .lock()
            .current
            .clone()
            .ok_or_else(|| SentinelError::Internal("No active error to report".into()))?;

        let report = self.bug_report(&error);
        let batch = ErrorBatch::new(vec![report.clone()], &self.client);

        match self.endpoint.submit(&batch).await {
            Ok(outcome) if outcome.disposition == BatchDisposition::Accepted => {
                let text = outcome
                    .analysis
                    .and_then(|a| a.description)
                    .unwrap_or_else(|| "Report received; no analysis available yet.".into());
                Ok(BugReportOutcome::Analysis(text))
            }
            Ok(_) | Err(_) => Ok(BugReportOutcome::Raw(serde_json::to_string_pretty(&report)?)),
        }
    }

    pub fn phase(&self) -> BoundaryPhase {
        self.lock().phase
    }

    pub fn has_error(&self) -> bool {
        self.lock().phase != BoundaryPhase::Healthy
    }

    pub fn error_count(&self) -> u32 {
        self.lock().error_count
    }

    // ── Internals ──────────────────────────────────────────────────────

    /// Schedule a recovery action. Idempotent per episode: a live pending
    /// timer wins and later schedule calls are dropped.
    fn schedule(self: &Arc<Self>, action: RecoveryAction, delay: Duration) {
        let mut state = self.lock();
        match state.phase {
            BoundaryPhase::Caught | BoundaryPhase::AutoFixing => {}
            // Healthy (reset/recovered) or Exhausted: nothing to schedule
            _ => return,
        }
        if let Some(pending) = &state.pending {
            if !pending.is_finished() {
                tracing::debug!(?action, "Recovery already scheduled, dropping duplicate");
                return;
            }
        }

        state.phase = BoundaryPhase::AutoFixing;
        let boundary = self.clone();
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            boundary.fire(action);
        }));
    }

    fn fire(&self, action: RecoveryAction) {
        {
            let mut state = self.lock();
            state.phase = BoundaryPhase::Healthy;
            state.current = None;
            state.pending = None;
        }
        match action {
            RecoveryAction::Rerender => self.executor.rerender(),
            RecoveryAction::Reload => self.executor.reload(),
        }
    }

    /// Best-effort analysis of the caught error, detached from recovery.
    /// An auto-fixable verdict schedules a delayed recovery unless one is
    /// already pending.
    fn spawn_analysis(self: &Arc<Self>, error: CaughtError, episode: Uuid) {
        let boundary = self.clone();
        tokio::spawn(async move {
            let report = boundary.bug_report(&error);
            let batch = ErrorBatch::new(vec![report], &boundary.client);
            match boundary.endpoint.submit(&batch).await {
                Ok(outcome) => {
                    if outcome.analysis.as_ref().is_some_and(|a| a.auto_fixable) {
                        tracing::info!(episode = %episode, "Analysis marked error auto-fixable");
                        boundary.schedule(
                            RecoveryAction::Rerender,
                            boundary.policy.analysis_fix_delay,
                        );
                    }
                }
                Err(e) => {
                    tracing::debug!(episode = %episode, "Error analysis unavailable: {}", e);
                }
            }
        });
    }

    fn spawn_escalation(self: &Arc<Self>, error: CaughtError, attempts: u32) {
        let boundary = self.clone();
        tokio::spawn(async move {
            let mut description = format!(
                "Automatic recovery exhausted after {} attempts.\n\nError: {}",
                attempts, error.message,
            );
            if let Some(stack) = &error.stack {
                description.push_str(&format!("\n\nStack:\n{stack}"));
            }
            if let Some(component_stack) = &error.component_stack {
                description.push_str(&format!("\n\nComponent stack:\n{component_stack}"));
            }

            let task = EscalationTask {
                task_type: "bug".into(),
                title: format!("Auto-recovery exhausted: {}", truncate(&error.message, 120)),
                description,
                priority: "high".into(),
                assignee: boundary.policy.escalation_assignee.clone(),
            };

            match boundary.escalation.create_task(&task).await {
                Ok(task_id) => {
                    tracing::info!(task_id = %task_id, "Escalation task created");
                    let message =
                        format!("Recovery exhausted, task {task_id} needs attention: {}", task.title);
                    if let Err(e) = boundary.escalation.notify(&task_id, &message).await {
                        tracing::warn!(task_id = %task_id, "Escalation notify failed: {}", e);
                    }
                }
                Err(e) => {
                    tracing::warn!("Escalation task creation failed: {}", e);
                }
            }
        });
    }

    fn bug_report(&self, error: &CaughtError) -> ErrorReport {
        let mut report = ErrorReport::new(ReportKind::UncaughtException, error.message.clone());
        if let Some(stack) = &error.stack {
            report = report.with_stack(stack.clone());
        }
        if let Some(component_stack) = &error.component_stack {
            report = report.with_context("componentStack", component_stack.clone());
        }
        report.with_context("boundary", true)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BoundaryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Outcome of a manual bug report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BugReportOutcome {
    /// Analysis text returned by the backend.
    Analysis(String),
    /// Endpoint unreachable/not rolled out: the raw serialized report, for
    /// a clipboard fallback.
    Raw(String),
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}
