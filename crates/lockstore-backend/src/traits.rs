use std::time::Duration;

use async_trait::async_trait;
use lockstore_types::SessionId;

use crate::entry::{KvEntry, SessionSpec, WaitOutcome};
use crate::error::BackendResult;

/// A replicated, per-key linearizable key-value store with sessions.
///
/// Keys are store-native strings; callers are responsible for namespacing.
/// All implementations must satisfy these invariants:
/// - Single-key operations are atomic. A reader never observes a partially
///   written value.
/// - At most one live session holds an entry at any time. [`acquire`] is the
///   only way to bind an entry to a session and it is atomic.
/// - When a session expires or is destroyed every entry bound to it is
///   released and its modify index advances, waking [`wait`]ers.
/// - Store failures are returned as errors, never reported as absence.
///
/// [`acquire`]: KvBackend::acquire
/// [`wait`]: KvBackend::wait
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Read the entry stored at exactly `key`.
    ///
    /// Returns `Ok(None)` if no entry has that key, even when other keys
    /// have it as a prefix.
    async fn get(&self, key: &str) -> BackendResult<Option<KvEntry>>;

    /// Write `value` at `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> BackendResult<()>;

    /// Delete the entry at exactly `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Every key starting with `prefix` (plain string prefix), in ascending
    /// order.
    async fn list_keys(&self, prefix: &str) -> BackendResult<Vec<String>>;

    /// Create a session with the given TTL and lock-delay.
    async fn create_session(&self, spec: &SessionSpec) -> BackendResult<SessionId>;

    /// Reset the session's TTL.
    ///
    /// Returns [`BackendError::SessionNotFound`] if the session has already
    /// expired or been destroyed.
    ///
    /// [`BackendError::SessionNotFound`]: crate::BackendError::SessionNotFound
    async fn renew_session(&self, session: &SessionId) -> BackendResult<()>;

    /// Destroy the session, releasing every entry bound to it. Destroying an
    /// unknown session succeeds.
    async fn destroy_session(&self, session: &SessionId) -> BackendResult<()>;

    /// Atomically bind `key` to `session` if no other session holds it,
    /// writing `value`. Re-acquiring an entry already held by the same
    /// session succeeds.
    ///
    /// Returns `Ok(false)` when another session holds the entry or the entry
    /// is inside its lock-delay window.
    async fn acquire(&self, key: &str, value: &[u8], session: &SessionId) -> BackendResult<bool>;

    /// Release `key` if `session` holds it. Returns `Ok(false)` if it did not.
    async fn release(&self, key: &str, session: &SessionId) -> BackendResult<bool>;

    /// Block until the modify index of `key` moves past `index`, or until
    /// `max_wait` elapses.
    ///
    /// An `index` of zero returns immediately with the current index. An
    /// absent key reports the store-wide index, so waiting on it may end at
    /// a change to any key.
    async fn wait(&self, key: &str, index: u64, max_wait: Duration) -> BackendResult<WaitOutcome>;
}
