use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("key {key:?} is outside the key space {prefix:?}")]
    OutsideKeySpace { key: String, prefix: String },
}
