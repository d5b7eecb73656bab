use std::time::Duration;

use lockstore_types::SessionId;

/// A raw entry as stored by the backend, addressed by its native key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
    /// Store index at which the entry was created.
    pub create_index: u64,
    /// Store index of the latest change to the entry, including lock
    /// acquisition and release.
    pub modify_index: u64,
    /// Number of times the entry has been acquired by a session.
    pub lock_index: u64,
    /// Session currently holding the entry, if any.
    pub session: Option<SessionId>,
}

impl KvEntry {
    pub fn size(&self) -> u64 {
        self.value.len() as u64
    }

    pub fn is_locked(&self) -> bool {
        self.session.is_some()
    }
}

/// Parameters for creating a session.
///
/// Sessions use "release" behaviour: when a session is invalidated every
/// entry bound to it is released, not deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSpec {
    /// Human-readable name, for operators inspecting the store.
    pub name: String,
    /// The session is invalidated if not renewed within this period.
    pub ttl: Duration,
    /// After invalidation, released entries cannot be re-acquired for this
    /// long.
    pub lock_delay: Duration,
}

/// Result of a blocking wait on a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Latest store index observed for the key.
    pub index: u64,
    /// `false` if the wait ended because the maximum wait elapsed.
    pub changed: bool,
}
