//! Logical keys and their validation rules.
//!
//! A logical key is a slash-delimited path such as
//! `acme/example.com/sites/example.com/example.com.crt`. Valid keys:
//! - Must be non-empty (the empty key is the root and is only produced by
//!   [`LogicalKey::root`] or [`LogicalKey::parse_prefix`])
//! - Must not start or end with `/`, and must not contain `//`
//! - Must not contain `.` or `..` as a whole segment
//! - Must not contain control characters, `?`, `#` or `%`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Path separator between key segments.
pub const SEPARATOR: char = '/';

/// Characters that are forbidden anywhere in a key. They would be
/// reinterpreted when a key is embedded in a URL path.
const FORBIDDEN_CHARS: &[char] = &['?', '#', '%'];

/// Validate a non-root key, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use lockstore_types::key::validate_key;
///
/// assert!(validate_key("acme/example.com/example.com.crt").is_ok());
/// assert!(validate_key("").is_err());
/// assert!(validate_key("a//b").is_err());
/// assert!(validate_key("a/../b").is_err());
/// ```
pub fn validate_key(key: &str) -> Result<(), TypeError> {
    let invalid = |reason: &str| TypeError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("key must not be empty"));
    }
    if key.starts_with(SEPARATOR) || key.ends_with(SEPARATOR) {
        return Err(invalid("must not start or end with '/'"));
    }
    if let Some(ch) = key
        .chars()
        .find(|c| c.is_control() || FORBIDDEN_CHARS.contains(c))
    {
        return Err(TypeError::InvalidKey {
            key: key.to_string(),
            reason: format!("contains forbidden character: {ch:?}"),
        });
    }
    for segment in key.split(SEPARATOR) {
        match segment {
            "" => return Err(invalid("path segments must not be empty")),
            "." | ".." => return Err(invalid("'.' and '..' are not valid segments")),
            _ => {}
        }
    }
    Ok(())
}

/// A validated, slash-delimited logical key.
///
/// Ordering is plain lexicographic ordering of the underlying string, which
/// keeps listings stable across backends.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalKey(String);

impl LogicalKey {
    /// Parse and validate a non-root key.
    pub fn new(key: impl Into<String>) -> Result<Self, TypeError> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self(key))
    }

    /// The root of the key space. Only meaningful as a listing prefix.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse a listing prefix. Unlike [`LogicalKey::new`] this accepts the
    /// empty string (the root) and tolerates a single trailing `/`.
    pub fn parse_prefix(prefix: &str) -> Result<Self, TypeError> {
        let trimmed = prefix.strip_suffix(SEPARATOR).unwrap_or(prefix);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Self::new(trimmed)
    }

    /// Build a key from individual segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, TypeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self::new(joined)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the path segments. The root has none.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    /// Number of segments in the key.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The last segment, or `""` for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or("")
    }

    /// Append a relative path (one or more segments).
    pub fn join(&self, relative: &str) -> Result<Self, TypeError> {
        validate_key(relative)?;
        if self.is_root() {
            return Ok(Self(relative.to_string()));
        }
        Ok(Self(format!("{}{SEPARATOR}{relative}", self.0)))
    }

    /// The parent key, or `None` for the root. Top-level keys have the root
    /// as parent.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEPARATOR) {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Returns `true` if `self` is a strict path-prefix of `other`.
    ///
    /// `a/b` is an ancestor of `a/b/c` but not of `a/bc` or of itself. The
    /// root is an ancestor of every non-root key.
    pub fn is_ancestor_of(&self, other: &LogicalKey) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with(SEPARATOR))
    }

    /// The immediate child of `self` on the path to `descendant`.
    ///
    /// Returns `None` if `descendant` is not below `self`.
    pub fn child_toward(&self, descendant: &LogicalKey) -> Option<Self> {
        if !self.is_ancestor_of(descendant) {
            return None;
        }
        let rest = if self.is_root() {
            descendant.as_str()
        } else {
            &descendant.0[self.0.len() + 1..]
        };
        let first = rest.split(SEPARATOR).next()?;
        if self.is_root() {
            Some(Self(first.to_string()))
        } else {
            Some(Self(format!("{}{SEPARATOR}{first}", self.0)))
        }
    }
}

impl fmt::Debug for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalKey({:?})", self.0)
    }
}

impl fmt::Display for LogicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LogicalKey {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Ok(Self::root());
        }
        Self::new(value)
    }
}

impl TryFrom<&str> for LogicalKey {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl From<LogicalKey> for String {
    fn from(key: LogicalKey) -> Self {
        key.0
    }
}

impl PartialEq<str> for LogicalKey {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for LogicalKey {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
