use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with a compact stdout layer.
///
/// This is the crate's diagnostic channel. It is deliberately distinct from
/// the intercepted [`LogSink`](crate::intercept::console::LogSink) seam:
/// internal warnings (rate-limit drops, send failures) go through `tracing`
/// and can never feed back into the capture pipeline.
///
/// - Default level: INFO, override via RUST_LOG env
/// - Safe to skip entirely when the host app owns the subscriber
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sentinel=debug"));

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();

    tracing::debug!("Tracing initialized");
}
