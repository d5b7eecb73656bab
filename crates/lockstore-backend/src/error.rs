use lockstore_types::SessionId;

/// Errors reported by a KV backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The store could not be reached or failed to serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The session does not exist (never created, destroyed, or expired).
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The store answered with something this client does not understand.
    #[error("unexpected store response: {0}")]
    Protocol(String),

    /// A request could not be built from the given arguments.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    /// Returns `true` if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Convenience type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
