use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::LogicalKey;

/// Metadata snapshot for a logical key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key: LogicalKey,
    /// Payload size in bytes. Directory nodes report zero.
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// `true` for a leaf object, `false` for a directory-like node that has
    /// no payload of its own.
    pub is_terminal: bool,
}

impl KeyInfo {
    pub fn leaf(key: LogicalKey, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            key,
            size,
            modified,
            is_terminal: true,
        }
    }

    pub fn directory(key: LogicalKey, modified: DateTime<Utc>) -> Self {
        Self {
            key,
            size: 0,
            modified,
            is_terminal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_terminal_flag() {
        let now = Utc::now();
        let leaf = KeyInfo::leaf(LogicalKey::new("a/b.crt").unwrap(), 12, now);
        assert!(leaf.is_terminal);
        assert_eq!(leaf.size, 12);

        let dir = KeyInfo::directory(LogicalKey::new("a").unwrap(), now);
        assert!(!dir.is_terminal);
        assert_eq!(dir.size, 0);
    }
}
