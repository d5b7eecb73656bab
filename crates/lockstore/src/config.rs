use std::path::Path;
use std::time::Duration;

use lockstore_types::{KeySpace, SEPARATOR};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Configuration of a [`Storage`](crate::Storage) instance.
///
/// Every field has a default, so a TOML file only needs the values it
/// changes:
///
/// ```toml
/// prefix = "caddytls"
/// session_ttl_secs = 30
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Prepended to every store-native key.
    pub prefix: String,
    /// Appended to a logical key to form its lock record key.
    pub lock_suffix: String,
    /// Session name shown to operators inspecting the store.
    pub session_name: String,
    /// Lock holders' sessions expire this long after their last renewal.
    pub session_ttl_secs: u64,
    /// Quiet period after a session expires before its locks can be taken.
    pub lock_delay_secs: u64,
    /// Maximum length of one blocking wait round while contending a lock.
    pub lock_wait_secs: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Hex-encoded 256-bit AES key. Values are sealed with AES-GCM when set.
    pub encryption_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefix: "lockstore".into(),
            lock_suffix: ".lock".into(),
            session_name: "lockstore".into(),
            session_ttl_secs: 15,
            lock_delay_secs: 0,
            lock_wait_secs: 15,
            retry_base_ms: 100,
            retry_max_ms: 5_000,
            encryption_key: None,
        }
    }
}

impl StorageConfig {
    pub fn from_toml_str(s: &str) -> StorageResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| StorageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> StorageResult<()> {
        self.key_space()?;
        if self.lock_suffix.is_empty() || self.lock_suffix.contains(SEPARATOR) {
            return Err(StorageError::Config(
                "lock_suffix must be non-empty and must not contain '/'".into(),
            ));
        }
        if self.session_ttl_secs == 0 {
            return Err(StorageError::Config("session_ttl_secs must be positive".into()));
        }
        if self.lock_wait_secs == 0 {
            return Err(StorageError::Config("lock_wait_secs must be positive".into()));
        }
        if self.retry_base_ms == 0 || self.retry_max_ms < self.retry_base_ms {
            return Err(StorageError::Config(
                "retry_base_ms must be positive and not exceed retry_max_ms".into(),
            ));
        }
        self.encryption_key_bytes()?;
        Ok(())
    }

    pub fn key_space(&self) -> StorageResult<KeySpace> {
        KeySpace::new(self.prefix.clone())
            .map_err(|e| StorageError::Config(format!("prefix: {e}")))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn lock_delay(&self) -> Duration {
        Duration::from_secs(self.lock_delay_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub(crate) fn encryption_key_bytes(&self) -> StorageResult<Option<[u8; 32]>> {
        let Some(encoded) = &self.encryption_key else {
            return Ok(None);
        };
        let bytes = hex::decode(encoded.trim())
            .map_err(|e| StorageError::Config(format!("encryption_key: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            StorageError::Config(format!("encryption_key must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Some(key))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config() {
        let c = StorageConfig::default();
        c.validate().unwrap();
        assert_eq!(c.prefix, "lockstore");
        assert_eq!(c.lock_suffix, ".lock");
        assert_eq!(c.session_ttl(), Duration::from_secs(15));
        assert_eq!(c.lock_delay(), Duration::ZERO);
        assert!(c.encryption_key.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = StorageConfig::from_toml_str("prefix = \"caddytls\"\nsession_ttl_secs = 30\n").unwrap();
        assert_eq!(c.prefix, "caddytls");
        assert_eq!(c.session_ttl_secs, 30);
        assert_eq!(c.lock_wait_secs, 15);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "prefix = \"certs/prod\"").unwrap();
        writeln!(file, "encryption_key = \"{}\"", "ab".repeat(32)).unwrap();
        let c = StorageConfig::from_file(file.path()).unwrap();
        assert_eq!(c.key_space().unwrap().prefix(), "certs/prod");
        assert_eq!(c.encryption_key_bytes().unwrap(), Some([0xab; 32]));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = StorageConfig::from_file("/nonexistent/lockstore.toml").unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            StorageConfig { prefix: "/abs".into(), ..Default::default() },
            StorageConfig { lock_suffix: String::new(), ..Default::default() },
            StorageConfig { lock_suffix: "/lock".into(), ..Default::default() },
            StorageConfig { session_ttl_secs: 0, ..Default::default() },
            StorageConfig { lock_wait_secs: 0, ..Default::default() },
            StorageConfig { retry_base_ms: 500, retry_max_ms: 100, ..Default::default() },
            StorageConfig { encryption_key: Some("zz".into()), ..Default::default() },
            StorageConfig { encryption_key: Some("abcd".into()), ..Default::default() },
        ];
        for case in cases {
            assert!(case.validate().is_err(), "accepted {case:?}");
        }
    }

    #[test]
    fn unknown_toml_types_are_rejected() {
        assert!(StorageConfig::from_toml_str("session_ttl_secs = \"ten\"").is_err());
    }
}
