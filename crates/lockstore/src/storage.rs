use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lockstore_backend::KvBackend;
use lockstore_types::{KeyInfo, KeySpace, LogicalKey, TypeError};
use tracing::{debug, instrument};

use crate::codec::ValueCodec;
use crate::config::StorageConfig;
use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::lock::LockManager;

/// Hierarchical key-value storage with distributed locking.
///
/// Keys are slash-delimited paths such as `certificates/acme/example.com.crt`.
/// Every key is stored under the configured prefix of the backing store.
/// Objects are leaves only: directories exist implicitly through the keys
/// below them and are never stored.
///
/// ```no_run
/// # async fn demo() -> lockstore::StorageResult<()> {
/// use std::sync::Arc;
/// use lockstore::{Context, Storage, StorageConfig};
/// use lockstore_backend::InMemoryBackend;
///
/// let storage = Storage::new(Arc::new(InMemoryBackend::new()), StorageConfig::default())?;
/// let ctx = Context::background();
/// storage.lock(&ctx, "acme/example.com").await?;
/// storage.store(&ctx, "acme/example.com/cert.pem", b"...").await?;
/// storage.unlock(&ctx, "acme/example.com").await?;
/// # Ok(())
/// # }
/// ```
pub struct Storage {
    backend: Arc<dyn KvBackend>,
    keys: KeySpace,
    lock_suffix: String,
    codec: ValueCodec,
    locks: LockManager,
}

impl Storage {
    pub fn new(backend: Arc<dyn KvBackend>, config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        let codec = match config.encryption_key_bytes()? {
            Some(key) => ValueCodec::encrypted(&key),
            None => ValueCodec::plain(),
        };
        let locks = LockManager::new(backend.clone(), &config)?;
        Ok(Self {
            backend,
            keys: config.key_space()?,
            lock_suffix: config.lock_suffix,
            codec,
            locks,
        })
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Write `value` at `key`, replacing any previous value.
    #[instrument(skip(self, ctx, value), fields(size = value.len()))]
    pub async fn store(&self, ctx: &Context, key: &str, value: &[u8]) -> StorageResult<()> {
        let key = self.object_key(key)?;
        let raw = self.codec.encode(value, Utc::now())?;
        ctx.run(self.backend.put(&self.keys.to_native(&key), &raw)).await?;
        debug!("stored");
        Ok(())
    }

    /// Read the value stored at exactly `key`.
    pub async fn load(&self, ctx: &Context, key: &str) -> StorageResult<Vec<u8>> {
        let key = self.object_key(key)?;
        let (value, _) = self.read(ctx, &key).await?;
        Ok(value)
    }

    /// `Ok(true)` if an object is stored at exactly `key`. Store failures are
    /// errors, not `false`.
    pub async fn exists(&self, ctx: &Context, key: &str) -> StorageResult<bool> {
        let key = self.object_key(key)?;
        let entry = ctx.run(self.backend.get(&self.keys.to_native(&key))).await?;
        Ok(entry.is_some())
    }

    /// Remove the object at exactly `key`. Deleting an absent key succeeds.
    #[instrument(skip(self, ctx))]
    pub async fn delete(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        let key = self.object_key(key)?;
        ctx.run(self.backend.delete(&self.keys.to_native(&key))).await?;
        debug!("deleted");
        Ok(())
    }

    pub async fn stat(&self, ctx: &Context, key: &str) -> StorageResult<KeyInfo> {
        let key = self.object_key(key)?;
        let (value, modified) = self.read(ctx, &key).await?;
        Ok(KeyInfo::leaf(key, value.len() as u64, modified))
    }

    /// Keys below `prefix`, sorted.
    ///
    /// With `recursive` every object at any depth below `prefix` is listed.
    /// Otherwise each immediate child of `prefix` is listed once, whether it
    /// is an object or a directory. The empty prefix is the root.
    pub async fn list(
        &self,
        ctx: &Context,
        prefix: &str,
        recursive: bool,
    ) -> StorageResult<Vec<LogicalKey>> {
        let prefix = LogicalKey::parse_prefix(prefix)?;
        let below = self.keys_below(ctx, &prefix).await?;
        if recursive {
            return Ok(below.into_iter().collect());
        }
        Ok(below
            .iter()
            .filter_map(|key| prefix.child_toward(key))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// Immediate children of `prefix` with their metadata. Directory nodes
    /// report size 0 and the Unix epoch as modification time.
    pub async fn list_info(&self, ctx: &Context, prefix: &str) -> StorageResult<Vec<KeyInfo>> {
        let prefix = LogicalKey::parse_prefix(prefix)?;
        let below = self.keys_below(ctx, &prefix).await?;
        let mut children: BTreeMap<LogicalKey, bool> = BTreeMap::new();
        for key in &below {
            if let Some(child) = prefix.child_toward(key) {
                let is_leaf = &child == key;
                *children.entry(child).or_default() |= is_leaf;
            }
        }

        let mut infos = Vec::with_capacity(children.len());
        for (child, is_leaf) in children {
            if is_leaf {
                match self.read(ctx, &child).await {
                    Ok((value, modified)) => {
                        infos.push(KeyInfo::leaf(child, value.len() as u64, modified));
                        continue;
                    }
                    Err(StorageError::NotExist(_)) => {
                        if !below.iter().any(|k| child.is_ancestor_of(k)) {
                            continue;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            infos.push(KeyInfo::directory(child, DateTime::<Utc>::UNIX_EPOCH));
        }
        Ok(infos)
    }

    /// Acquire the distributed lock on `key`. See [`LockManager::lock`].
    pub async fn lock(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        let key = LogicalKey::new(key)?;
        self.locks.lock(ctx, &key).await
    }

    /// Release the distributed lock on `key`. See [`LockManager::unlock`].
    pub async fn unlock(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        let key = LogicalKey::new(key)?;
        self.locks.unlock(ctx, &key).await
    }

    /// Release every held lock and destroy the lock session.
    pub async fn close(&self) -> StorageResult<()> {
        self.locks.close().await
    }

    /// Validate a key naming a stored object. Keys ending in the lock suffix
    /// are reserved for lock records.
    fn object_key(&self, key: &str) -> StorageResult<LogicalKey> {
        let key = LogicalKey::new(key)?;
        if key.as_str().ends_with(&self.lock_suffix) {
            return Err(TypeError::InvalidKey {
                key: key.into(),
                reason: format!("keys ending in {:?} are reserved for locks", self.lock_suffix),
            }
            .into());
        }
        Ok(key)
    }

    async fn read(&self, ctx: &Context, key: &LogicalKey) -> StorageResult<(Vec<u8>, DateTime<Utc>)> {
        let native = self.keys.to_native(key);
        let entry = ctx
            .run(self.backend.get(&native))
            .await?
            .ok_or_else(|| StorageError::NotExist(key.clone()))?;
        let decoded = self.codec.decode(&native, &entry.value)?;
        Ok((decoded.value, decoded.modified))
    }

    /// Every object key strictly below `prefix`, lock records excluded.
    async fn keys_below(&self, ctx: &Context, prefix: &LogicalKey) -> StorageResult<BTreeSet<LogicalKey>> {
        let native_prefix = self.keys.descendant_prefix(prefix);
        let natives = ctx.run(self.backend.list_keys(&native_prefix)).await?;
        let mut keys = BTreeSet::new();
        for native in natives {
            if native.ends_with(&self.lock_suffix) {
                continue;
            }
            match self.keys.to_logical(&native) {
                Ok(key) if prefix.is_ancestor_of(&key) => {
                    keys.insert(key);
                }
                Ok(_) => {}
                Err(e) => debug!(key = %native, error = %e, "skipping foreign key"),
            }
        }
        Ok(keys)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("prefix", &self.keys.prefix())
            .field("codec", &self.codec)
            .field("locks", &self.locks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lockstore_backend::InMemoryBackend;

    use super::*;

    const PREFIX: &str = "consultlstest";

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    fn setup() -> (Arc<InMemoryBackend>, Storage) {
        init_tracing();
        let backend = Arc::new(InMemoryBackend::new());
        let config = StorageConfig {
            prefix: PREFIX.into(),
            ..Default::default()
        };
        let storage = Storage::new(backend.clone(), config).unwrap();
        (backend, storage)
    }

    fn keys(list: &[LogicalKey]) -> Vec<&str> {
        list.iter().map(LogicalKey::as_str).collect()
    }

    #[tokio::test]
    async fn store_and_load() {
        let (backend, storage) = setup();
        let ctx = Context::background();
        storage.store(&ctx, "test/key", b"crt data").await.unwrap();
        assert_eq!(storage.load(&ctx, "test/key").await.unwrap(), b"crt data");
        assert!(backend.get("consultlstest/test/key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn store_overwrites() {
        let (_, storage) = setup();
        let ctx = Context::background();
        storage.store(&ctx, "k", b"one").await.unwrap();
        storage.store(&ctx, "k", b"two").await.unwrap();
        assert_eq!(storage.load(&ctx, "k").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn empty_values_round_trip() {
        let (_, storage) = setup();
        let ctx = Context::background();
        storage.store(&ctx, "empty", b"").await.unwrap();
        assert!(storage.load(&ctx, "empty").await.unwrap().is_empty());
        assert_eq!(storage.stat(&ctx, "empty").await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn exists_and_delete() {
        let (_, storage) = setup();
        let ctx = Context::background();
        storage.store(&ctx, "test/key", b"crt data").await.unwrap();
        assert!(storage.exists(&ctx, "test/key").await.unwrap());

        storage.delete(&ctx, "test/key").await.unwrap();
        assert!(!storage.exists(&ctx, "test/key").await.unwrap());
        let err = storage.load(&ctx, "test/key").await.unwrap_err();
        assert!(err.is_not_exist());
        storage.delete(&ctx, "test/key").await.unwrap();
    }

    #[tokio::test]
    async fn directories_are_not_objects() {
        let (_, storage) = setup();
        let ctx = Context::background();
        storage.store(&ctx, "a/b/c", b"x").await.unwrap();
        assert!(!storage.exists(&ctx, "a/b").await.unwrap());
        assert!(storage.load(&ctx, "a/b").await.unwrap_err().is_not_exist());
        assert!(storage.stat(&ctx, "a").await.unwrap_err().is_not_exist());
    }

    #[tokio::test]
    async fn exists_reports_store_failure() {
        let (backend, storage) = setup();
        let ctx = Context::background();
        storage.store(&ctx, "k", b"x").await.unwrap();
        backend.set_available(false);
        let err = storage.exists(&ctx, "k").await.unwrap_err();
        assert!(matches!(err, StorageError::StoreUnavailable(_)));
        assert!(storage.load(&ctx, "k").await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn stat_reports_size_and_time() {
        let (_, storage) = setup();
        let ctx = Context::background();
        let before = Utc::now();
        storage.store(&ctx, "test/key", b"crt data").await.unwrap();
        let info = storage.stat(&ctx, "test/key").await.unwrap();
        assert_eq!(info.key, "test/key");
        assert_eq!(info.size, 8);
        assert!(info.is_terminal);
        assert!(info.modified >= before && info.modified <= Utc::now());
    }

    #[tokio::test]
    async fn invalid_keys_are_rejected() {
        let (_, storage) = setup();
        let ctx = Context::background();
        for key in ["", "/abs", "trailing/", "a//b", "a/../b"] {
            let err = storage.store(&ctx, key, b"x").await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "{key:?}: {err}");
        }
        let err = storage.store(&ctx, "site.lock", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    async fn populate(storage: &Storage, ctx: &Context) {
        for key in [
            "test/key1",
            "test/key2",
            "test/dir/key3",
            "test/dir/sub/key4",
            "testing/other",
            "top",
        ] {
            storage.store(ctx, key, b"v").await.unwrap();
        }
    }

    #[tokio::test]
    async fn list_recursive() {
        let (_, storage) = setup();
        let ctx = Context::background();
        populate(&storage, &ctx).await;

        let list = storage.list(&ctx, "test", true).await.unwrap();
        assert_eq!(
            keys(&list),
            ["test/dir/key3", "test/dir/sub/key4", "test/key1", "test/key2"]
        );
    }

    #[tokio::test]
    async fn list_non_recursive() {
        let (_, storage) = setup();
        let ctx = Context::background();
        populate(&storage, &ctx).await;

        let list = storage.list(&ctx, "test", false).await.unwrap();
        assert_eq!(keys(&list), ["test/dir", "test/key1", "test/key2"]);
        let list = storage.list(&ctx, "test/dir/", false).await.unwrap();
        assert_eq!(keys(&list), ["test/dir/key3", "test/dir/sub"]);
    }

    #[tokio::test]
    async fn list_root() {
        let (_, storage) = setup();
        let ctx = Context::background();
        populate(&storage, &ctx).await;

        let list = storage.list(&ctx, "", false).await.unwrap();
        assert_eq!(keys(&list), ["test", "testing", "top"]);
        assert_eq!(storage.list(&ctx, "", true).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn list_respects_segment_boundaries() {
        let (_, storage) = setup();
        let ctx = Context::background();
        populate(&storage, &ctx).await;

        let list = storage.list(&ctx, "test", true).await.unwrap();
        assert!(list.iter().all(|k| !k.as_str().starts_with("testing")));
        assert!(storage.list(&ctx, "top", true).await.unwrap().is_empty());
        assert!(storage.list(&ctx, "missing", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_ignores_other_prefixes() {
        let (backend, storage) = setup();
        let ctx = Context::background();
        backend.put("other/test/key", b"x").await.unwrap();
        backend.put("consultlstestx/key", b"x").await.unwrap();
        storage.store(&ctx, "test/key", b"x").await.unwrap();
        assert_eq!(keys(&storage.list(&ctx, "", true).await.unwrap()), ["test/key"]);
    }

    #[tokio::test]
    async fn list_info_marks_directories() {
        let (_, storage) = setup();
        let ctx = Context::background();
        populate(&storage, &ctx).await;

        let infos = storage.list_info(&ctx, "test").await.unwrap();
        let summary: Vec<(&str, bool)> = infos
            .iter()
            .map(|i| (i.key.as_str(), i.is_terminal))
            .collect();
        assert_eq!(
            summary,
            [("test/dir", false), ("test/key1", true), ("test/key2", true)]
        );
        assert_eq!(infos[0].size, 0);
        assert_eq!(infos[0].modified, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(infos[1].size, 1);
    }

    #[tokio::test]
    async fn lock_records_are_hidden() {
        let (backend, storage) = setup();
        let ctx = Context::background();
        storage.store(&ctx, "test/key", b"x").await.unwrap();
        storage.lock(&ctx, "test/key").await.unwrap();
        storage.lock(&ctx, "test/other").await.unwrap();
        assert!(backend.get("consultlstest/test/key.lock").await.unwrap().is_some());

        assert_eq!(keys(&storage.list(&ctx, "test", true).await.unwrap()), ["test/key"]);
        assert_eq!(keys(&storage.list(&ctx, "", false).await.unwrap()), ["test"]);
        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn lock_unlock() {
        let (_, storage) = setup();
        let ctx = Context::background();
        storage.lock(&ctx, "test/key").await.unwrap();
        storage.unlock(&ctx, "test/key").await.unwrap();
        assert!(matches!(
            storage.unlock(&ctx, "test/key").await,
            Err(StorageError::NotOwner(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn two_locks() {
        let (backend, first) = setup();
        let config = StorageConfig {
            prefix: PREFIX.into(),
            ..Default::default()
        };
        let second = Storage::new(backend.clone(), config).unwrap();
        let ctx = Context::background();

        first.lock(&ctx, "test/key").await.unwrap();
        let unlocker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            first.unlock(&Context::background(), "test/key").await.unwrap();
        });

        let started = tokio::time::Instant::now();
        second.lock(&ctx, "test/key").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        unlocker.await.unwrap();
        second.unlock(&ctx, "test/key").await.unwrap();
    }

    #[tokio::test]
    async fn encrypted_storage() {
        init_tracing();
        let backend = Arc::new(InMemoryBackend::new());
        let config = StorageConfig {
            encryption_key: Some("11".repeat(32)),
            ..Default::default()
        };
        let storage = Storage::new(backend.clone(), config).unwrap();
        let ctx = Context::background();
        storage.store(&ctx, "secret", b"private key").await.unwrap();
        assert_eq!(storage.load(&ctx, "secret").await.unwrap(), b"private key");
        assert_eq!(storage.stat(&ctx, "secret").await.unwrap().size, 11);

        let other = Storage::new(
            backend.clone(),
            StorageConfig {
                encryption_key: Some("22".repeat(32)),
                ..Default::default()
            },
        )
        .unwrap();
        let err = other.load(&ctx, "secret").await.unwrap_err();
        assert!(matches!(err, StorageError::Codec { .. }));
    }

    #[tokio::test]
    async fn cancelled_context_fails_fast() {
        let (backend, storage) = setup();
        let ctx = Context::background();
        ctx.cancel();
        assert!(matches!(
            storage.store(&ctx, "k", b"x").await,
            Err(StorageError::Cancelled)
        ));
        assert!(backend.is_empty());
    }
}
