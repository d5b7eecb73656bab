use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::key::{validate_key, LogicalKey, SEPARATOR};

/// Maps logical keys onto store-native keys by prepending a fixed prefix.
///
/// The mapping is injective and reversible: [`KeySpace::to_logical`] undoes
/// [`KeySpace::to_native`] exactly, so listing native keys under a prefix and
/// stripping it recovers the original logical keys. An empty prefix maps
/// keys onto themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Create a key space rooted at `prefix`.
    ///
    /// The prefix follows the same rules as a logical key, except that it
    /// may be empty.
    pub fn new(prefix: impl Into<String>) -> Result<Self, TypeError> {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            validate_key(&prefix)?;
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Native key for a logical key. The root maps to the native prefix used
    /// for listing the whole space.
    pub fn to_native(&self, key: &LogicalKey) -> String {
        match (self.prefix.is_empty(), key.is_root()) {
            (true, _) => key.as_str().to_string(),
            (false, true) => format!("{}{SEPARATOR}", self.prefix),
            (false, false) => format!("{}{SEPARATOR}{}", self.prefix, key),
        }
    }

    /// Native prefix matching every descendant of `key`.
    pub fn descendant_prefix(&self, key: &LogicalKey) -> String {
        if key.is_root() {
            return self.to_native(key);
        }
        format!("{}{SEPARATOR}", self.to_native(key))
    }

    /// Recover the logical key from a native key.
    pub fn to_logical(&self, native: &str) -> Result<LogicalKey, TypeError> {
        if self.prefix.is_empty() {
            return LogicalKey::new(native);
        }
        native
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
            .ok_or_else(|| TypeError::OutsideKeySpace {
                key: native.to_string(),
                prefix: self.prefix.clone(),
            })
            .and_then(LogicalKey::new)
    }
}
