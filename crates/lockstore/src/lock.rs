//! Session-backed distributed locks.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use lockstore_backend::{BackendError, KvBackend, SessionSpec};
use lockstore_types::{KeySpace, LogicalKey, SessionId};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::StorageConfig;
use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::session::LockSession;

#[derive(Default)]
struct LockState {
    session: Option<LockSession>,
    /// Keys this manager holds, all bound to `session`.
    held: BTreeSet<LogicalKey>,
}

/// Distributed mutual exclusion over a [`KvBackend`].
///
/// A lock on a logical key is a lock record in the store, bound to a session
/// owned by this manager. At most one live session holds a record at a time;
/// when a holder crashes its session expires after the TTL and the store
/// releases the record. Two tasks sharing one manager also exclude each
/// other: the second waits until the first unlocks.
///
/// All locks of a manager share one session, created on the first lock and
/// destroyed when the last lock is released.
pub struct LockManager {
    backend: Arc<dyn KvBackend>,
    keys: KeySpace,
    lock_suffix: String,
    session_spec: SessionSpec,
    lock_wait: Duration,
    retry_base: Duration,
    retry_max: Duration,
    owner: String,
    state: Arc<Mutex<LockState>>,
    released: Notify,
}

/// Tears down an idle session if a `lock` call is dropped before it
/// finishes.
struct PendingLock<'a> {
    manager: &'a LockManager,
    armed: bool,
}

impl Drop for PendingLock<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state = Arc::clone(&self.manager.state);
        let backend = Arc::clone(&self.manager.backend);
        runtime.spawn(async move {
            let mut state = state.lock().await;
            teardown_if_idle(&mut state, backend.as_ref()).await;
        });
    }
}

impl LockManager {
    pub fn new(backend: Arc<dyn KvBackend>, config: &StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            keys: config.key_space()?,
            lock_suffix: config.lock_suffix.clone(),
            session_spec: SessionSpec {
                name: config.session_name.clone(),
                ttl: config.session_ttl(),
                lock_delay: config.lock_delay(),
            },
            lock_wait: config.lock_wait(),
            retry_base: config.retry_base(),
            retry_max: config.retry_max(),
            owner: uuid::Uuid::now_v7().to_string(),
            state: Arc::new(Mutex::new(LockState::default())),
            released: Notify::new(),
        })
    }

    /// Identifier of this manager, written into every lock record it holds.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Store-native key of the lock record guarding `key`.
    pub fn record_key(&self, key: &LogicalKey) -> String {
        format!("{}{}", self.keys.to_native(key), self.lock_suffix)
    }

    /// Block until this manager holds the lock on `key` or `ctx` ends.
    ///
    /// Contention is waited out with the store's blocking wait, transport
    /// failures are retried with backoff, and a session that disappeared is
    /// replaced. If `ctx` ends first the lock is not held and a session
    /// backing no other lock is destroyed.
    pub async fn lock(&self, ctx: &Context, key: &LogicalKey) -> StorageResult<()> {
        let record = self.record_key(key);
        let mut backoff = Backoff::new(self.retry_base, self.retry_max);
        let mut pending = PendingLock {
            manager: self,
            armed: true,
        };
        loop {
            match self.lock_round(ctx, key, &record, &mut backoff).await {
                Ok(true) => {
                    pending.armed = false;
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => {
                    let mut state = self.state.lock().await;
                    teardown_if_idle(&mut state, self.backend.as_ref()).await;
                    pending.armed = false;
                    return Err(err);
                }
            }
        }
    }

    /// One acquisition attempt, including the wait that follows a failed
    /// one. Returns `Ok(true)` once the lock is held.
    async fn lock_round(
        &self,
        ctx: &Context,
        key: &LogicalKey,
        record: &str,
        backoff: &mut Backoff,
    ) -> StorageResult<bool> {
        ctx.check()?;
        let mut state = ctx.race(self.state.lock()).await?;
        self.reap_lost(&mut state);

        if state.held.contains(key) {
            // Held by another task of this instance. `notified` is created
            // under the state lock so a release cannot slip past it.
            let notified = self.released.notified();
            let lost = state.session.as_ref().map(LockSession::lost_token);
            drop(state);
            debug!(key = %key, "lock held locally, waiting for release");
            ctx.race(async {
                match lost {
                    Some(lost) => tokio::select! {
                        _ = notified => {}
                        _ = lost.cancelled() => {}
                    },
                    None => notified.await,
                }
            })
            .await?;
            return Ok(false);
        }

        let session = match self.ensure_session(&mut state).await {
            Ok(session) => session,
            Err(e) if e.is_transient() => {
                drop(state);
                warn!(key = %key, error = %e, "cannot create lock session, retrying");
                ctx.sleep(backoff.next_delay()).await?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        match self.backend.acquire(record, self.owner.as_bytes(), &session).await {
            Ok(true) => {
                state.held.insert(key.clone());
                info!(key = %key, session = %session, "lock acquired");
                Ok(true)
            }
            Ok(false) => {
                drop(state);
                debug!(key = %key, "lock contended");
                self.wait_for_release(ctx, record, backoff).await?;
                Ok(false)
            }
            Err(BackendError::SessionNotFound(_)) => {
                warn!(key = %key, session = %session, "lock session vanished, creating a new one");
                self.discard_session(&mut state);
                Ok(false)
            }
            Err(e) if e.is_transient() => {
                drop(state);
                warn!(key = %key, error = %e, "lock acquire failed, retrying");
                ctx.sleep(backoff.next_delay()).await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait until the contended record changes. A record that is free but
    /// was refused (lock-delay) is polled with backoff instead.
    async fn wait_for_release(
        &self,
        ctx: &Context,
        record: &str,
        backoff: &mut Backoff,
    ) -> StorageResult<()> {
        let entry = match ctx.run(self.backend.get(record)).await {
            Ok(entry) => entry,
            Err(e) if e.is_retryable() => {
                warn!(record, error = %e, "cannot read lock record, retrying");
                return ctx.sleep(backoff.next_delay()).await;
            }
            Err(e) => return Err(e),
        };
        let index = match entry {
            Some(entry) if entry.is_locked() => entry.modify_index,
            _ => return ctx.sleep(backoff.next_delay()).await,
        };
        match ctx.run(self.backend.wait(record, index, self.lock_wait)).await {
            Ok(outcome) => {
                debug!(record, index = outcome.index, changed = outcome.changed, "lock wait ended");
                backoff.reset();
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                warn!(record, error = %e, "lock wait failed, retrying");
                ctx.sleep(backoff.next_delay()).await
            }
            Err(e) => Err(e),
        }
    }

    /// Release the lock on `key`.
    ///
    /// Fails with [`StorageError::NotOwner`] if this manager does not hold
    /// it, including when the session expired behind its back. A transport
    /// failure leaves the lock held so the call can be retried.
    pub async fn unlock(&self, ctx: &Context, key: &LogicalKey) -> StorageResult<()> {
        ctx.check()?;
        let mut state = ctx.race(self.state.lock()).await?;
        self.reap_lost(&mut state);
        if !state.held.contains(key) {
            return Err(StorageError::NotOwner(key.clone()));
        }
        let Some(session) = state.session.as_ref().map(|s| s.id().clone()) else {
            state.held.clear();
            return Err(StorageError::NotOwner(key.clone()));
        };

        let released = match self.backend.release(&self.record_key(key), &session).await {
            Ok(released) => released,
            Err(BackendError::SessionNotFound(_)) => {
                self.discard_session(&mut state);
                return Err(StorageError::NotOwner(key.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        state.held.remove(key);
        self.released.notify_waiters();
        if state.held.is_empty() {
            teardown_session(&mut state, self.backend.as_ref()).await;
        }
        if !released {
            warn!(key = %key, "lock record was no longer bound to this session");
            return Err(StorageError::NotOwner(key.clone()));
        }
        info!(key = %key, "lock released");
        Ok(())
    }

    /// Release every held lock and destroy the session.
    ///
    /// Every lock is attempted; the first failure is returned.
    pub async fn close(&self) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        self.reap_lost(&mut state);
        let mut first_err = None;
        if let Some(session) = state.session.as_ref().map(|s| s.id().clone()) {
            for key in std::mem::take(&mut state.held) {
                if let Err(e) = self.backend.release(&self.record_key(&key), &session).await {
                    warn!(key = %key, error = %e, "failed to release lock on close");
                    first_err.get_or_insert(StorageError::from(e));
                }
            }
        }
        state.held.clear();
        self.released.notify_waiters();
        if let Some(session) = state.session.take() {
            if let Err(e) = session.destroy(self.backend.as_ref()).await {
                warn!(error = %e, "failed to destroy lock session on close");
                first_err.get_or_insert(StorageError::from(e));
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// `true` if this manager currently holds the lock on `key`.
    pub async fn holds(&self, key: &LogicalKey) -> bool {
        let mut state = self.state.lock().await;
        self.reap_lost(&mut state);
        state.held.contains(key)
    }

    /// Keys currently locked by this manager, in ascending order.
    pub async fn held_keys(&self) -> Vec<LogicalKey> {
        let mut state = self.state.lock().await;
        self.reap_lost(&mut state);
        state.held.iter().cloned().collect()
    }

    /// Id of the live session, if any.
    pub async fn session_id(&self) -> Option<SessionId> {
        let mut state = self.state.lock().await;
        self.reap_lost(&mut state);
        state.session.as_ref().map(|s| s.id().clone())
    }

    async fn ensure_session(&self, state: &mut LockState) -> Result<SessionId, BackendError> {
        if let Some(session) = &state.session {
            return Ok(session.id().clone());
        }
        let session = LockSession::create(self.backend.clone(), &self.session_spec).await?;
        let id = session.id().clone();
        state.session = Some(session);
        Ok(id)
    }

    /// Forget a session the store no longer knows. Every lock bound to it is
    /// gone.
    fn discard_session(&self, state: &mut LockState) {
        if let Some(session) = state.session.take() {
            if !state.held.is_empty() {
                warn!(session = %session.id(), locks = state.held.len(), "locks lost with expired session");
            }
        }
        state.held.clear();
        self.released.notify_waiters();
    }

    fn reap_lost(&self, state: &mut LockState) {
        if state.session.as_ref().is_some_and(LockSession::is_lost) {
            self.discard_session(state);
        }
    }

}

async fn teardown_session(state: &mut LockState, backend: &dyn KvBackend) {
    if let Some(session) = state.session.take() {
        let id = session.id().clone();
        if let Err(e) = session.destroy(backend).await {
            warn!(session = %id, error = %e, "failed to destroy idle lock session, it will expire");
        }
    }
}

/// Clean up after an abandoned `lock` call: a session backing no lock is
/// destroyed.
async fn teardown_if_idle(state: &mut LockState, backend: &dyn KvBackend) {
    if state.held.is_empty() {
        teardown_session(state, backend).await;
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("owner", &self.owner)
            .field("prefix", &self.keys.prefix())
            .finish()
    }
}
