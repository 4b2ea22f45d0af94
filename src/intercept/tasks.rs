//! Unhandled-rejection interceptor: supervision wrapper for detached tasks.
//!
//! A detached `tokio::spawn` whose future resolves to `Err` (or panics) is
//! the runtime's equivalent of an unhandled promise rejection: nobody is
//! holding the join handle, so the failure would vanish silently. Wrapping
//! the future with [`TaskSupervisor::supervise`] copies that failure into
//! the capture buffer while leaving the task's own outcome unchanged for
//! anyone who does await the handle.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::buffer::CaptureBuffer;
use crate::report::{ErrorReport, ReportKind};

pub struct TaskSupervisor {
    buffer: Arc<CaptureBuffer>,
}

impl TaskSupervisor {
    pub fn new(buffer: Arc<CaptureBuffer>) -> Self {
        Self { buffer }
    }

    /// Spawn `future` and capture its failure modes.
    ///
    /// - `Err(e)` is reported with the error's `Display` text.
    /// - An in-task panic is reported with the panic payload, falling back
    ///   to string coercion when the payload is not string-shaped.
    ///
    /// The handle resolves to the original `Result`, re-panicking semantics
    /// excepted: a panicking task yields `Err` mapped into the report and
    /// `None` to the caller.
    pub fn supervise<F, T, E>(&self, name: &str, future: F) -> JoinHandle<Option<Result<T, E>>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let buffer = self.buffer.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(value)) => Some(Ok(value)),
                Ok(Err(e)) => {
                    let report = ErrorReport::new(ReportKind::UnhandledRejection, e.to_string())
                        .with_context("task", name.clone());
                    buffer.capture(report);
                    Some(Err(e))
                }
                Err(payload) => {
                    let message = coerce_panic_payload(payload.as_ref());
                    let report = ErrorReport::new(ReportKind::UnhandledRejection, message)
                        .with_context("task", name.clone())
                        .with_context("panicked", true);
                    buffer.capture(report);
                    None
                }
            }
        })
    }
}

fn coerce_panic_payload(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "<non-string rejection payload>".to_string()
    }
}
