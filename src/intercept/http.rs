//! HTTP interceptor: a decorator over the outbound transport.
//!
//! The host performs its REST calls through an [`HttpTransport`]; wrapping
//! it with [`CapturingTransport`] records failed requests (non-success
//! status or transport error) without altering what callers observe: the
//! exact response or error from the wrapped transport is always returned.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::buffer::CaptureBuffer;
use crate::report::{ErrorReport, ReportKind};

/// The seam the HTTP interceptor wraps.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        reqwest::Client::execute(self, request).await
    }
}

/// Decorator that calls through to `next`, then inspects the outcome.
pub struct CapturingTransport {
    next: Arc<dyn HttpTransport>,
    buffer: Arc<CaptureBuffer>,
}

impl CapturingTransport {
    pub fn wrap(next: Arc<dyn HttpTransport>, buffer: Arc<CaptureBuffer>) -> Arc<Self> {
        Arc::new(Self { next, buffer })
    }

    /// Teardown: hand back the wrapped transport for re-installation at the
    /// composition point.
    pub fn into_inner(&self) -> Arc<dyn HttpTransport> {
        self.next.clone()
    }
}

#[async_trait]
impl HttpTransport for CapturingTransport {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        let method = request.method().clone();
        let url = request.url().clone();
        let started = Instant::now();

        let result = self.next.execute(request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) if !response.status().is_success() => {
                let status = response.status();
                let report = ErrorReport::new(
                    ReportKind::HttpError,
                    format!("HTTP {} {} returned {}", method, url, status.as_u16()),
                )
                .with_context("method", method.as_str())
                .with_context("url", url.as_str())
                .with_context("status", status.as_u16())
                .with_context(
                    "statusText",
                    status.canonical_reason().unwrap_or("unknown"),
                )
                .with_context("durationMs", duration_ms);
                self.buffer.capture(report);
            }
            Ok(_) => {}
            Err(e) => {
                let report = ErrorReport::new(
                    ReportKind::HttpError,
                    format!("HTTP {} {} failed: {}", method, url, e),
                )
                .with_context("method", method.as_str())
                .with_context("url", url.as_str())
                .with_context("durationMs", duration_ms);
                self.buffer.capture(report);
            }
        }

        result
    }
}
