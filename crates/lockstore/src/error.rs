use lockstore_backend::BackendError;
use lockstore_types::{LogicalKey, TypeError};
use thiserror::Error;

/// Errors surfaced to callers of [`Storage`](crate::Storage) and
/// [`LockManager`](crate::LockManager).
///
/// Contention on a lock is never an error: `lock` waits it out.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object is stored at exactly this key.
    #[error("key does not exist: {0}")]
    NotExist(LogicalKey),

    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's context deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Unlock was called for a lock this instance does not hold.
    #[error("lock on {0} is not held by this instance")]
    NotOwner(LogicalKey),

    /// The underlying store failed or could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] BackendError),

    #[error("invalid key: {0}")]
    InvalidKey(#[from] TypeError),

    /// A stored value could not be decoded (corrupt, foreign, or sealed with
    /// another key).
    #[error("cannot decode value of {key}: {reason}")]
    Codec { key: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn is_not_exist(&self) -> bool {
        matches!(self, StorageError::NotExist(_))
    }

    /// `true` for cancellation and deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StorageError::Cancelled | StorageError::DeadlineExceeded)
    }

    /// `true` if the same call may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::StoreUnavailable(e) if e.is_transient())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_are_distinguishable() {
        let key = LogicalKey::new("a/b").unwrap();
        assert!(StorageError::NotExist(key.clone()).is_not_exist());
        assert!(StorageError::Cancelled.is_cancellation());
        assert!(StorageError::DeadlineExceeded.is_cancellation());
        assert!(!StorageError::NotOwner(key).is_retryable());
        assert!(StorageError::from(BackendError::Unavailable("down".into())).is_retryable());
        assert!(!StorageError::from(BackendError::Protocol("bad".into())).is_retryable());
    }
}
