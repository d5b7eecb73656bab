use thiserror::Error;

/// Errors raised while configuring a Consul backend.
#[derive(Debug, Error)]
pub enum ConsulError {
    #[error("invalid Consul address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid Consul configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub type ConsulResult<T> = Result<T, ConsulError>;
