//! Property and binding names
//!
//! A [`Name`] carries its hash so that runtime lookups (shape tables, the
//! megamorphic cache) never rehash the text.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

/// Hash used for every name and runtime string
#[inline]
pub fn hash_str(s: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}

/// An immutable name with a precomputed hash
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Name {
    text: Arc<str>,
    hash: u64,
}

impl Name {
    /// Create a name from text
    pub fn new(text: &str) -> Self {
        Self {
            hash: hash_str(text),
            text: Arc::from(text),
        }
    }

    /// Text of the name
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Shared text of the name
    #[inline]
    pub fn text(&self) -> &Arc<str> {
        &self.text
    }

    /// Precomputed hash
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Whether this name is a canonical array index (`0`..`2^32 - 2`)
    pub fn as_array_index(&self) -> Option<u32> {
        parse_array_index(&self.text)
    }
}

/// Parse a canonical array index string
pub fn parse_array_index(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 10 {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = s.parse().ok()?;
    if value < u32::MAX as u64 {
        Some(value as u32)
    } else {
        None
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.text == other.text
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl From<&str> for Name {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Name {
    fn from(text: String) -> Self {
        Self {
            hash: hash_str(&text),
            text: Arc::from(text),
        }
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.text.to_string()
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.text)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
