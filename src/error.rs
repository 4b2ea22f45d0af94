/// Crate-wide error type. Every fallible function returns `Result<T, SentinelError>`.
///
/// The pipeline is diagnostic, not transactional: most internal callers log
/// these and move on rather than propagating to the host application.
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Endpoint returned HTTP {status}: {message}")]
    Endpoint { status: u16, message: String },

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("{0}")]
    Internal(String),
}
