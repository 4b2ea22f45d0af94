//! Rate-limited capture buffer.
//!
//! Decouples "an error happened" from "an error was sent" and protects the
//! reporting pipeline from runaway error storms. Shared by all interceptors
//! and the health monitor; drained exclusively by the batch reporter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::report::ErrorReport;

/// Sliding-window rate limit applied at capture time.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Trailing window over which captures are counted.
    pub rate_window: Duration,
    /// Maximum captures admitted within one window.
    pub rate_max: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            rate_window: Duration::from_millis(60_000),
            rate_max: 10,
        }
    }
}

struct BufferInner {
    queue: VecDeque<ErrorReport>,
    /// Capture timestamps within the trailing window, oldest first.
    window: VecDeque<Instant>,
}

/// In-memory ordered queue with a true sliding-window rate limit.
///
/// No persistence: a restart loses buffered-but-unsent reports by design.
/// Overflow warnings go through `tracing`, which is structurally outside the
/// intercepted log-sink seam, so a capture drop can never recurse back into
/// the buffer.
pub struct CaptureBuffer {
    config: BufferConfig,
    inner: Mutex<BufferInner>,
    captured: AtomicU64,
    dropped: AtomicU64,
}

impl CaptureBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BufferInner {
                queue: VecDeque::new(),
                window: VecDeque::new(),
            }),
            captured: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a report unless the sliding-window ceiling has been reached.
    ///
    /// Prunes expired window entries before checking, so the limit is a true
    /// trailing window rather than a fixed bucket. Returns `false` when the
    /// report was dropped.
    pub fn capture(&self, report: ErrorReport) -> bool {
        let now = Instant::now();
        // `Instant` can sit near its epoch early in process life; a window
        // reaching past it means nothing has expired yet.
        let cutoff = now.checked_sub(self.config.rate_window);

        let mut inner = self.lock();
        if let Some(cutoff) = cutoff {
            while inner.window.front().is_some_and(|t| *t <= cutoff) {
                inner.window.pop_front();
            }
        }

        if inner.window.len() >= self.config.rate_max {
            drop(inner);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                kind = ?report.kind,
                max = self.config.rate_max,
                "Capture rate limit reached, dropping report"
            );
            return false;
        }

        inner.window.push_back(now);
        inner.queue.push_back(report);
        drop(inner);
        self.captured.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Atomically take the full current queue, leaving it empty.
    pub fn drain(&self) -> Vec<ErrorReport> {
        let mut inner = self.lock();
        inner.queue.drain(..).collect()
    }

    /// Re-insert a failed batch at the front of the queue, then enforce
    /// `ceiling` by permanently dropping oldest-still-unsent reports.
    /// Returns the number dropped. Requeued reports do not count against the
    /// capture rate limit; they were already admitted once.
    pub fn requeue_front(&self, batch: Vec<ErrorReport>, ceiling: usize) -> usize {
        let mut inner = self.lock();
        for report in batch.into_iter().rev() {
            inner.queue.push_front(report);
        }
        let mut dropped = 0;
        while inner.queue.len() > ceiling {
            inner.queue.pop_front();
            dropped += 1;
        }
        drop(inner);
        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            tracing::warn!(dropped, ceiling, "Buffer over ceiling after requeue, dropped oldest reports");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pending: self.len(),
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferStats {
    pub pending: usize,
    pub captured: u64,
    pub dropped: u64,
}
