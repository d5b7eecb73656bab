use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lockstore_types::SessionId;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::entry::{KvEntry, SessionSpec, WaitOutcome};
use crate::error::{BackendError, BackendResult};
use crate::traits::KvBackend;

struct SessionRecord {
    spec: SessionSpec,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, KvEntry>,
    sessions: HashMap<SessionId, SessionRecord>,
    /// Keys released by an invalidated session, with the end of their
    /// lock-delay window.
    delayed: HashMap<String, Instant>,
    index: u64,
    unavailable: bool,
}

impl State {
    fn check_available(&self) -> BackendResult<()> {
        if self.unavailable {
            return Err(BackendError::Unavailable("in-memory store is offline".into()));
        }
        Ok(())
    }

    fn bump(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// Index reported for `key`: its modify index, or the store-wide index
    /// once it is absent, so a waiter on a deleted key sees the deletion.
    fn key_index(&self, key: &str) -> u64 {
        self.entries.get(key).map_or(self.index, |e| e.modify_index)
    }

    /// Release every entry bound to `session`. Returns `true` if any entry
    /// changed.
    fn invalidate(&mut self, session: &SessionId, lock_delay: Duration, now: Instant) -> bool {
        let held: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.session.as_ref() == Some(session))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &held {
            let idx = self.bump();
            if let Some(entry) = self.entries.get_mut(key) {
                entry.session = None;
                entry.modify_index = idx;
            }
            if !lock_delay.is_zero() {
                self.delayed.insert(key.clone(), now + lock_delay);
            }
        }
        !held.is_empty()
    }

    /// Invalidate every session whose TTL has lapsed.
    fn expire_sessions(&mut self, now: Instant) -> bool {
        let expired: Vec<(SessionId, Duration)> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(id, s)| (id.clone(), s.spec.lock_delay))
            .collect();
        let mut changed = false;
        for (id, lock_delay) in expired {
            self.sessions.remove(&id);
            debug!(session = %id, "session expired");
            changed |= self.invalidate(&id, lock_delay, now);
        }
        self.delayed.retain(|_, until| *until > now);
        changed
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.sessions.values().map(|s| s.expires_at).min()
    }
}

/// In-memory KV store with sessions, TTL expiry, lock-delay and blocking
/// waits.
///
/// Intended for tests and embedding. Session expiry is evaluated lazily on
/// every operation and by blocked waiters, so no background task is needed.
/// Time is measured with [`tokio::time::Instant`], which lets tests drive
/// TTL expiry with a paused clock.
pub struct InMemoryBackend {
    state: Mutex<State>,
    changes: watch::Sender<u64>,
}

impl InMemoryBackend {
    /// Create a new empty store.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            changes,
        }
    }

    /// Simulate an outage: while offline every operation fails with
    /// [`BackendError::Unavailable`]. Sessions keep ageing during the outage.
    pub fn set_available(&self, available: bool) {
        self.state.lock().expect("lock poisoned").unavailable = !available;
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.state.lock().expect("lock poisoned").entries.len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live (unexpired) sessions.
    pub fn session_count(&self) -> usize {
        let mut state = self.state.lock().expect("lock poisoned");
        self.expire(&mut state);
        state.sessions.len()
    }

    /// Current store-wide modify index.
    pub fn current_index(&self) -> u64 {
        self.state.lock().expect("lock poisoned").index
    }

    fn expire(&self, state: &mut State) {
        if state.expire_sessions(Instant::now()) {
            self.notify(state.index);
        }
    }

    fn notify(&self, index: u64) {
        self.changes.send_replace(index);
    }

    /// Lock the state, expire sessions and fail if the store is offline.
    fn live_state(&self) -> BackendResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().expect("lock poisoned");
        self.expire(&mut state);
        state.check_available()?;
        Ok(state)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("lock poisoned");
        f.debug_struct("InMemoryBackend")
            .field("entries", &state.entries.len())
            .field("sessions", &state.sessions.len())
            .field("index", &state.index)
            .finish()
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<KvEntry>> {
        let state = self.live_state()?;
        Ok(state.entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        let mut state = self.live_state()?;
        let idx = state.bump();
        state
            .entries
            .entry(key.to_string())
            .and_modify(|e| {
                e.value = value.to_vec();
                e.modify_index = idx;
            })
            .or_insert_with(|| KvEntry {
                key: key.to_string(),
                value: value.to_vec(),
                create_index: idx,
                modify_index: idx,
                lock_index: 0,
                session: None,
            });
        self.notify(idx);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let mut state = self.live_state()?;
        if state.entries.remove(key).is_some() {
            let idx = state.bump();
            self.notify(idx);
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let state = self.live_state()?;
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn create_session(&self, spec: &SessionSpec) -> BackendResult<SessionId> {
        if spec.ttl.is_zero() {
            return Err(BackendError::InvalidRequest("session TTL must be positive".into()));
        }
        let mut state = self.live_state()?;
        let id = SessionId::new(uuid::Uuid::now_v7().to_string());
        state.sessions.insert(
            id.clone(),
            SessionRecord {
                spec: spec.clone(),
                expires_at: Instant::now() + spec.ttl,
            },
        );
        debug!(session = %id, name = %spec.name, ttl_ms = spec.ttl.as_millis() as u64, "session created");
        Ok(id)
    }

    async fn renew_session(&self, session: &SessionId) -> BackendResult<()> {
        let mut state = self.live_state()?;
        let record = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| BackendError::SessionNotFound(session.clone()))?;
        record.expires_at = Instant::now() + record.spec.ttl;
        Ok(())
    }

    async fn destroy_session(&self, session: &SessionId) -> BackendResult<()> {
        let mut state = self.live_state()?;
        if let Some(record) = state.sessions.remove(session) {
            if state.invalidate(session, record.spec.lock_delay, Instant::now()) {
                let idx = state.index;
                self.notify(idx);
            }
        }
        Ok(())
    }

    async fn acquire(&self, key: &str, value: &[u8], session: &SessionId) -> BackendResult<bool> {
        let mut state = self.live_state()?;
        if !state.sessions.contains_key(session) {
            return Err(BackendError::SessionNotFound(session.clone()));
        }
        if state.delayed.contains_key(key) {
            return Ok(false);
        }
        let reacquire = match state.entries.get(key).and_then(|e| e.session.as_ref()) {
            Some(holder) if holder != session => return Ok(false),
            Some(_) => true,
            None => false,
        };

        let idx = state.bump();
        let entry = state
            .entries
            .entry(key.to_string())
            .or_insert_with(|| KvEntry {
                key: key.to_string(),
                value: Vec::new(),
                create_index: idx,
                modify_index: idx,
                lock_index: 0,
                session: None,
            });
        entry.value = value.to_vec();
        entry.modify_index = idx;
        if !reacquire {
            entry.lock_index += 1;
            entry.session = Some(session.clone());
        }
        self.notify(idx);
        Ok(true)
    }

    async fn release(&self, key: &str, session: &SessionId) -> BackendResult<bool> {
        let mut state = self.live_state()?;
        let holds = state
            .entries
            .get(key)
            .is_some_and(|e| e.session.as_ref() == Some(session));
        if !holds {
            return Ok(false);
        }
        let idx = state.bump();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.session = None;
            entry.modify_index = idx;
        }
        self.notify(idx);
        Ok(true)
    }

    async fn wait(&self, key: &str, index: u64, max_wait: Duration) -> BackendResult<WaitOutcome> {
        let deadline = Instant::now() + max_wait;
        // Subscribe before the first check so no change can slip between the
        // check and the wait.
        let mut changes = self.changes.subscribe();
        loop {
            let (current, next_expiry) = {
                let state = self.live_state()?;
                (
                    state.key_index(key),
                    state.next_expiry(),
                )
            };
            if index == 0 || current > index {
                return Ok(WaitOutcome {
                    index: current,
                    changed: current > index,
                });
            }
            if Instant::now() >= deadline {
                return Ok(WaitOutcome {
                    index: current,
                    changed: false,
                });
            }
            let wake = next_expiry.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                res = changes.changed() => {
                    if res.is_err() {
                        return Err(BackendError::Unavailable("in-memory store dropped".into()));
                    }
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}
