//! Uncaught-exception interceptor: chains onto the process panic hook.
//!
//! The panic hook is the one genuinely process-global extension point this
//! crate touches, so installation goes through a guard that restores the
//! previous hook on teardown and refuses to stack a second wrapper.

use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::CaptureBuffer;
use crate::report::{ErrorReport, ReportKind, ScriptOrigin};

type PrevHook = Arc<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

/// True while a capture hook is installed. One wrapper layer, process-wide.
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Guard for the installed panic hook. Uninstalls on drop.
pub struct PanicHookGuard {
    prev: Option<PrevHook>,
    active: bool,
}

impl PanicHookGuard {
    /// Install a capture hook chained in front of the current panic hook.
    ///
    /// Returns `None` when a guard is already active — installation is
    /// idempotent, never layered.
    pub fn install(buffer: Arc<CaptureBuffer>) -> Option<Self> {
        if INSTALLED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Panic capture hook already installed, skipping");
            return None;
        }

        let prev: PrevHook = Arc::from(std::panic::take_hook());
        let chained_prev = prev.clone();
        std::panic::set_hook(Box::new(move |info| {
            buffer.capture(report_from_panic(info));
            chained_prev(info);
        }));

        tracing::debug!("Panic capture hook installed");
        Some(Self {
            prev: Some(prev),
            active: true,
        })
    }

    /// Restore the pre-install hook. Safe to call more than once.
    pub fn uninstall(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        // Drop our wrapper, then put the original hook back.
        let _ = std::panic::take_hook();
        if let Some(prev) = self.prev.take() {
            std::panic::set_hook(Box::new(move |info| prev(info)));
        }
        INSTALLED.store(false, Ordering::SeqCst);
        tracing::debug!("Panic capture hook removed");
    }
}

impl Drop for PanicHookGuard {
    fn drop(&mut self) {
        self.uninstall();
    }
}

fn report_from_panic(info: &PanicHookInfo<'_>) -> ErrorReport {
    let message = if let Some(msg) = info.payload().downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = info.payload().downcast_ref::<String>() {
        msg.clone()
    } else {
        "<unknown panic payload>".to_string()
    };

    let mut report = ErrorReport::new(ReportKind::UncaughtException, message)
        .with_stack(std::backtrace::Backtrace::force_capture().to_string());

    if let Some(loc) = info.location() {
        report = report.with_origin(ScriptOrigin {
            url: loc.file().to_string(),
            line: loc.line(),
            column: loc.column(),
        });
    }

    report
}
