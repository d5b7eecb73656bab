//! Replicated key-value store contract for lockstore.
//!
//! lockstore treats the underlying store as a black box that is linearizable
//! per key and offers sessions with a renewable TTL, atomic session-bound
//! acquisition of an entry, and a bounded blocking wait on key changes. This
//! crate defines that contract and ships an in-memory implementation.
//!
//! # Storage Backends
//!
//! All backends implement the [`KvBackend`] trait:
//!
//! - [`InMemoryBackend`] -- process-local store for tests and embedding
//! - `lockstore_consul::ConsulBackend` -- Consul KV and Session HTTP API
//!
//! # Design Rules
//!
//! 1. Keys are store-native strings; namespacing happens above this layer.
//! 2. Single-key operations are atomic; there are no cross-key transactions.
//! 3. Sessions use "release" behaviour: invalidation unbinds, never deletes.
//! 4. Store failures are always errors, never reported as absent keys.

pub mod entry;
pub mod error;
pub mod memory;
pub mod traits;

pub use entry::{KvEntry, SessionSpec, WaitOutcome};
pub use error::{BackendError, BackendResult};
pub use memory::InMemoryBackend;
pub use traits::KvBackend;
