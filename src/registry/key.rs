//! Hierarchical registry keys
//!
//! A key is a `/`-separated path such as `/my/service/demo`, made of the
//! segments `["my", "service", "demo"]`. Both `/my` and `/my/service` are
//! parents of `/my/service/demo`; only `/my/service` is its immediate parent.
//!
//! Canonical form: exactly one leading `/`, no trailing `/`, no repeated `/`.
//! Two keys are equal iff their canonical strings are equal.

use crate::common::{Error, Result};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Path segment separator.
pub const SEPARATOR: char = '/';

/// Normalize a raw string into canonical key form.
///
/// Trims surrounding whitespace, ensures a single leading separator, strips
/// trailing separators and collapses repeated ones. Idempotent.
pub fn normalize_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len() + 1);
    for segment in raw.trim().split(SEPARATOR).filter(|s| !s.is_empty()) {
        key.push(SEPARATOR);
        key.push_str(segment);
    }
    key
}

#[derive(Debug, Clone)]
pub struct Key {
    key: String,
    parts: Vec<String>,
}

impl Key {
    /// Parse and normalize a key.
    pub fn create(raw: &str) -> Result<Key> {
        if raw.trim().is_empty() {
            return Err(Error::InvalidKey(
                "key must be a non-empty string".into(),
            ));
        }
        if raw.chars().any(|c| c.is_control()) {
            return Err(Error::InvalidKey(format!(
                "key contains control characters: {:?}",
                raw
            )));
        }

        let key = normalize_key(raw);
        if key.is_empty() {
            return Err(Error::InvalidKey(format!(
                "key has no segments: {:?}",
                raw
            )));
        }
        Ok(Self::from_normalized(key))
    }

    /// The namespace root. It has no segments and renders as `/`; it is only
    /// meaningful as a listing parent.
    pub fn root() -> Key {
        Key {
            key: SEPARATOR.to_string(),
            parts: Vec::new(),
        }
    }

    fn from_normalized(key: String) -> Key {
        if key.is_empty() {
            return Key::root();
        }
        let parts = key[1..].split(SEPARATOR).map(str::to_string).collect();
        Key { key, parts }
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Key segments.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    /// Last segment, e.g. `demo` for `/my/service/demo`.
    pub fn name(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    /// Parent key; the parent of a single-segment key is the root.
    pub fn parent(&self) -> Option<Key> {
        if self.is_root() {
            return None;
        }
        let parts = self.parts[..self.parts.len() - 1].to_vec();
        Some(Self::from_parts(parts))
    }

    fn from_parts(parts: Vec<String>) -> Key {
        if parts.is_empty() {
            return Key::root();
        }
        let mut key = String::new();
        for part in &parts {
            key.push(SEPARATOR);
            key.push_str(part);
        }
        Key { key, parts }
    }

    /// New key with `path` appended to this one.
    ///
    /// `path` may be a single segment, a relative path (`a/b`) or another
    /// key; the result is re-normalized, so empty segments are dropped.
    pub fn relative(&self, path: impl AsRef<str>) -> Key {
        let joined = format!("{}{}{}", self.key, SEPARATOR, path.as_ref());
        Self::from_normalized(normalize_key(&joined))
    }

    /// True iff `parent`'s segments are a strict prefix of this key's segments.
    pub fn is_a_parent(&self, parent: &Key) -> bool {
        parent.len() < self.len() && self.parts.starts_with(&parent.parts)
    }

    /// True iff `parent` is a parent of this key and exactly one segment shorter.
    pub fn is_immediate_parent(&self, parent: &Key) -> bool {
        self.is_a_parent(parent) && parent.len() + 1 == self.len()
    }

    /// Suffix of this key after stripping `parent`, e.g. `/services/demo`
    /// for `/my/services/demo` minus `/my`.
    pub fn remove_parent(&self, parent: &Key) -> Result<Key> {
        if !self.is_a_parent(parent) {
            return Err(Error::KeyRelation {
                key: self.key.clone(),
                parent: parent.key.clone(),
            });
        }
        Ok(Self::from_parts(self.parts[parent.len()..].to_vec()))
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

impl std::str::FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Key::create(s)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.key
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Conversion accepted wherever the registry takes a key: a [`Key`] or a
/// string that is parsed with [`Key::create`].
pub trait IntoKey {
    fn into_key(self) -> Result<Key>;
}

impl IntoKey for Key {
    fn into_key(self) -> Result<Key> {
        Ok(self)
    }
}

impl IntoKey for &Key {
    fn into_key(self) -> Result<Key> {
        Ok(self.clone())
    }
}

impl IntoKey for &str {
    fn into_key(self) -> Result<Key> {
        Key::create(self)
    }
}

impl IntoKey for String {
    fn into_key(self) -> Result<Key> {
        Key::create(&self)
    }
}

impl IntoKey for &String {
    fn into_key(self) -> Result<Key> {
        Key::create(self)
    }
}
