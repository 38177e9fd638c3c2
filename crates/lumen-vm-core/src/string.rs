//! Immutable runtime strings
//!
//! Text is stored as UTF-8 but every index and length is measured in UTF-16
//! code units, as ECMAScript requires.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use lumen_vm_bytecode::Name;
use lumen_vm_bytecode::name::{hash_str, parse_array_index};

/// An immutable string with a precomputed hash
#[derive(Clone)]
pub struct JsString {
    text: Arc<str>,
    hash: u64,
    utf16_len: u32,
}

impl JsString {
    /// Create a string from text
    pub fn new(text: &str) -> Self {
        Self::from_arc(Arc::from(text))
    }

    fn from_arc(text: Arc<str>) -> Self {
        let utf16_len = if text.is_ascii() {
            text.len()
        } else {
            text.encode_utf16().count()
        };
        Self {
            hash: hash_str(&text),
            utf16_len: utf16_len as u32,
            text,
        }
    }

    /// The empty string
    pub fn empty() -> Self {
        Self::new("")
    }

    /// Create from a UTF-16 sequence, replacing lone surrogates
    pub fn from_utf16(units: &[u16]) -> Self {
        Self::from(String::from_utf16_lossy(units))
    }

    /// Get as `&str`
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Precomputed hash (matches [`Name::hash_value`] for equal text)
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Length in UTF-16 code units
    #[inline]
    pub fn len(&self) -> u32 {
        self.utf16_len
    }

    /// Whether the string is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.utf16_len == 0
    }

    /// Single-unit string at a UTF-16 index
    pub fn char_at(&self, index: u32) -> Option<JsString> {
        if index >= self.utf16_len {
            return None;
        }
        if self.text.is_ascii() {
            let i = index as usize;
            return Some(JsString::new(&self.text[i..i + 1]));
        }
        let unit = self.text.encode_utf16().nth(index as usize)?;
        Some(JsString::from_utf16(&[unit]))
    }

    /// Concatenate two strings
    pub fn concat(&self, other: &JsString) -> JsString {
        if other.text.is_empty() {
            return self.clone();
        }
        if self.text.is_empty() {
            return other.clone();
        }
        let mut text = String::with_capacity(self.text.len() + other.text.len());
        text.push_str(&self.text);
        text.push_str(&other.text);
        JsString::from(text)
    }

    /// Compare by UTF-16 code units, as the relational operators do
    pub fn cmp_utf16(&self, other: &JsString) -> Ordering {
        if self.text.is_ascii() && other.text.is_ascii() {
            return self.text.as_bytes().cmp(other.text.as_bytes());
        }
        self.text.encode_utf16().cmp(other.text.encode_utf16())
    }

    /// Canonical array index named by this string
    #[inline]
    pub fn as_array_index(&self) -> Option<u32> {
        parse_array_index(&self.text)
    }
}

impl PartialEq for JsString {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.text == other.text
    }
}

impl Eq for JsString {}

impl Hash for JsString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl From<&str> for JsString {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for JsString {
    fn from(text: String) -> Self {
        Self::from_arc(Arc::from(text))
    }
}

impl From<&Name> for JsString {
    fn from(name: &Name) -> Self {
        let text = Arc::clone(name.text());
        let utf16_len = if text.is_ascii() {
            text.len()
        } else {
            text.encode_utf16().count()
        };
        Self {
            hash: name.hash_value(),
            utf16_len: utf16_len as u32,
            text,
        }
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.text)
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
