//! Console interceptor: a decorator over the application's log sink.
//!
//! The host app routes user-facing error/warning output through a
//! [`LogSink`]. Wrapping that sink with [`CapturingSink`] leaves every call
//! site untouched while copying errors and warnings into the capture buffer.

use std::backtrace::Backtrace;
use std::sync::Arc;

use crate::buffer::CaptureBuffer;
use crate::report::{ErrorReport, ReportKind};

/// The seam the console interceptor wraps: whatever the host application
/// uses for visible error/warning output.
pub trait LogSink: Send + Sync {
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Stock innermost sink: routes to the ambient `tracing` channel.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn error(&self, message: &str) {
        tracing::error!(target: "milonga::console", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "milonga::console", "{message}");
    }
}

/// Decorator that forwards each call to `next` unchanged, then captures an
/// [`ErrorReport`] with a freshly taken backtrace.
///
/// The backtrace is captured here, not at the original call site — an
/// accepted limitation inherited from the capture contract.
pub struct CapturingSink {
    next: Arc<dyn LogSink>,
    buffer: Arc<CaptureBuffer>,
}

impl CapturingSink {
    pub fn wrap(next: Arc<dyn LogSink>, buffer: Arc<CaptureBuffer>) -> Arc<Self> {
        Arc::new(Self { next, buffer })
    }

    /// Teardown: hand back the wrapped sink. Installing the returned sink at
    /// the composition point restores the exact pre-wrap state.
    pub fn into_inner(&self) -> Arc<dyn LogSink> {
        self.next.clone()
    }

    fn capture(&self, kind: ReportKind, message: &str) {
        let report = ErrorReport::new(kind, message)
            .with_stack(Backtrace::force_capture().to_string());
        self.buffer.capture(report);
    }
}

impl LogSink for CapturingSink {
    fn error(&self, message: &str) {
        self.next.error(message);
        self.capture(ReportKind::ConsoleError, message);
    }

    fn warn(&self, message: &str) {
        self.next.warn(message);
        self.capture(ReportKind::ConsoleWarn, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferConfig;
    use std::sync::Mutex;

    struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                lines: Mutex::new(Vec::new()),
            })
        }
    }

    impl LogSink for RecordingSink {
        fn error(&self, message: &str) {
            self.lines.lock().unwrap().push(format!("E:{message}"));
        }
        fn warn(&self, message: &str) {
            self.lines.lock().unwrap().push(format!("W:{message}"));
        }
    }

    #[test]
    fn test_forwards_then_captures() {
        let inner = RecordingSink::new();
        let buffer = Arc::new(CaptureBuffer::new(BufferConfig::default()));
        let sink = CapturingSink::wrap(inner.clone(), buffer.clone());

        sink.error("boom");
        sink.warn("slow");

        // Original output preserved
        let lines = inner.lines.lock().unwrap().clone();
        assert_eq!(lines, vec!["E:boom", "W:slow"]);

        let reports = buffer.drain();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].kind, ReportKind::ConsoleError);
        assert_eq!(reports[0].message, "boom");
        assert!(reports[0].stack.is_some());
        assert_eq!(reports[1].kind, ReportKind::ConsoleWarn);
    }

    #[test]
    fn test_teardown_restores_original_sink() {
        let inner = RecordingSink::new();
        let buffer = Arc::new(CaptureBuffer::new(BufferConfig::default()));
        let sink = CapturingSink::wrap(inner.clone(), buffer.clone());

        let restored = sink.into_inner();
        restored.error("after teardown");

        // Calling through the restored sink captures nothing
        assert!(buffer.is_empty());
        assert_eq!(inner.lines.lock().unwrap().len(), 1);
        // Idempotent: asking again yields the same inner sink
        assert!(Arc::ptr_eq(
            &sink.into_inner(),
            &(inner.clone() as Arc<dyn LogSink>)
        ));
    }
}
