//! Hierarchical key-value storage with distributed locking.
//!
//! lockstore persists small binary artifacts (certificates, keys, metadata)
//! under slash-delimited keys in a replicated KV store shared by cooperating
//! processes, and coordinates them with session-backed locks.
//!
//! # Components
//!
//! - [`Storage`] -- store, load, exists, delete, stat and list over a
//!   hierarchical key space
//! - [`LockManager`] -- distributed mutual exclusion with TTL-bounded
//!   sessions
//! - [`Context`] -- cancellation and deadlines for every call
//! - [`StorageConfig`] -- TOML-loadable settings
//!
//! The backing store is any [`lockstore_backend::KvBackend`].

pub mod backoff;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
mod session;
pub mod storage;

pub use backoff::Backoff;
pub use codec::ValueCodec;
pub use config::StorageConfig;
pub use context::Context;
pub use error::{StorageError, StorageResult};
pub use lock::LockManager;
pub use lockstore_types::{KeyInfo, LogicalKey};
pub use storage::Storage;
