//! Canonical, case-insensitive path keys.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A working-tree path carrying two forms: the spelling it was created
/// with, and a normalized key used for all comparisons.
///
/// Key normalization: lower-cased, forward-slash separated, no trailing
/// separator. Two spellings of the same path on a case-insensitive
/// filesystem compare equal, while the original spelling stays available
/// through [`raw`](NormalizedPath::raw) for case-sensitive filesystem
/// access. The empty path is the filesystem root and has no parent.
///
/// `Eq`, `Ord`, and `Hash` all operate on the key only.
#[derive(Clone)]
pub struct NormalizedPath {
    raw: String,
    key: String,
}

impl NormalizedPath {
    /// Build a path from an arbitrary string, keeping its spelling.
    pub fn new(path: &str) -> Self {
        let mut raw = path.replace('\\', "/");
        while raw.len() > 1 && raw.ends_with('/') {
            raw.pop();
        }
        if raw == "/" {
            raw.clear();
        }
        let key = raw.to_lowercase();
        Self { raw, key }
    }

    /// The normalized key form.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The spelling this path was created with (separators normalized,
    /// case preserved). Use this for filesystem access.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns `true` for the root key.
    pub fn is_root(&self) -> bool {
        self.key.is_empty()
    }

    /// The containing directory, or `None` at the root.
    pub fn parent(&self) -> Option<NormalizedPath> {
        if self.is_root() {
            return None;
        }
        match self.raw.rfind('/') {
            Some(idx) => Some(NormalizedPath::new(&self.raw[..idx])),
            None => Some(NormalizedPath::new("")),
        }
    }

    /// Append a relative component, keeping both spellings consistent.
    pub fn join(&self, component: &str) -> NormalizedPath {
        let component = component.trim_start_matches(['/', '\\']);
        if self.is_root() {
            NormalizedPath::new(component)
        } else {
            NormalizedPath::new(&format!("{}/{component}", self.raw))
        }
    }

    /// The suffix of `child` below `self`, with no leading separator.
    ///
    /// Returns `None` when `child` is not strictly below `self`. This is
    /// the per-directory cache key for file entries, so it is computed on
    /// the normalized key form.
    pub fn relative_key(&self, child: &NormalizedPath) -> Option<String> {
        if self.is_root() {
            if child.is_root() {
                return None;
            }
            return Some(child.key.clone());
        }
        let rest = child.key.strip_prefix(&self.key)?;
        let rest = rest.strip_prefix('/')?;
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// Whether `other` is this path or somewhere below it.
    pub fn contains(&self, other: &NormalizedPath) -> bool {
        self == other || self.relative_key(other).is_some()
    }
}

impl PartialEq for NormalizedPath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for NormalizedPath {}

impl PartialOrd for NormalizedPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NormalizedPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl Hash for NormalizedPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl Serialize for NormalizedPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for NormalizedPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(NormalizedPath::new(&raw))
    }
}

impl fmt::Debug for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NormalizedPath({:?})", self.raw)
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for NormalizedPath {
    fn from(path: &str) -> Self {
        NormalizedPath::new(path)
    }
}
