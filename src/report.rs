//! Report data model: the common shape every captured signal is normalized to.

use serde::{Deserialize, Serialize};

/// Which extension point a signal came from. Mirrors the wire taxonomy used
/// by the analysis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    ConsoleError,
    ConsoleWarn,
    UncaughtException,
    UnhandledRejection,
    DomMutation,
    HttpError,
    HealthCheckFailure,
}

/// Source location for script-originated errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOrigin {
    pub url: String,
    pub line: u32,
    pub column: u32,
}

/// One captured signal. Created synchronously by an interceptor at the moment
/// a signal occurs, never mutated afterwards. Lives in the capture buffer
/// until drained by the batch reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ReportKind,
    pub message: String,
    /// Capture time, epoch milliseconds.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<ScriptOrigin>,
    /// Opaque key-value bag: status code, method, duration, node identity.
    /// Shape varies by kind but is always serializable.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl ErrorReport {
    pub fn new(kind: ReportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: now_millis(),
            stack: None,
            origin: None,
            context: serde_json::Map::new(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_origin(mut self, origin: ScriptOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// Outcome of one registered health probe execution. Not persisted; failures
/// are immediately converted into an [`ErrorReport`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub passed: bool,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
