use thiserror::Error;

/// Error taxonomy for the interception / phase-synchronization engine.
///
/// Interceptor-level failures never alter the page's own error contract —
/// they are reported as phases and the original failure flows back to the
/// page. `WireError` is what *our* side of an operation settles with.
#[derive(Debug, Error)]
pub enum WireError {
    /// Watcher still in INIT when its deadline elapsed.
    #[error("timeout waiting for fetch response from {pattern} after {timeout_ms}ms")]
    Timeout { pattern: String, timeout_ms: u64 },

    /// A matching call reported an ERROR phase.
    #[error("error in fetch response: {0}")]
    Phase(String),

    /// Command arrived without a usable correlation ID or payload.
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    /// The page is missing the input control / send button the strategy needs.
    #[error("UI element not found: {0}")]
    ElementNotFound(String),

    /// An operation is already in flight on this bridge.
    #[error("operation {0} rejected: another operation is still active")]
    Busy(String),

    /// A strategy exists for the platform but does not automate this
    /// operation.
    #[error("operation not supported on {0}")]
    Unsupported(String),

    /// Control-channel failure.
    #[error("control socket error: {0}")]
    Socket(String),

    /// CDP / browser-side failure.
    #[error("browser error: {0}")]
    Browser(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type WireResult<T> = Result<T, WireError>;

impl WireError {
    pub fn browser(e: impl std::fmt::Display) -> Self {
        WireError::Browser(e.to_string())
    }

    pub fn socket(e: impl std::fmt::Display) -> Self {
        WireError::Socket(e.to_string())
    }
}
