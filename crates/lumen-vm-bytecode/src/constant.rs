//! Constant pool for code objects
//!
//! Numbers are interned by bit pattern, so `0` and `-0` get separate slots
//! while every NaN collapses onto one.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::operand::ConstantIndex;

/// Literal operand of `LoadConst` and `Raise`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// Double that does not fit the `LoadInt32` immediate
    Number(f64),
    /// String literal
    String(Arc<str>),
}

impl Constant {
    /// Numeric payload
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(_) => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    fn key(&self) -> ConstantKey {
        match self {
            Self::Number(n) => ConstantKey::Number(n.to_bits()),
            Self::String(s) => ConstantKey::String(Arc::clone(s)),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Number(u64),
    String(Arc<str>),
}

/// Interned literals of one code object
///
/// Serializes as a plain list; the lookup table is rebuilt on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Constant>", into = "Vec<Constant>")]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: FxHashMap<ConstantKey, ConstantIndex>,
}

impl ConstantPool {
    /// Empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of `constant`, appending it on first sight
    pub fn intern(&mut self, constant: Constant) -> ConstantIndex {
        let next = ConstantIndex(self.entries.len() as u32);
        let idx = *self.lookup.entry(constant.key()).or_insert(next);
        if idx == next {
            self.entries.push(constant);
        }
        idx
    }

    /// Constant at `idx`
    #[inline]
    pub fn get(&self, idx: ConstantIndex) -> Option<&Constant> {
        self.entries.get(idx.0 as usize)
    }

    /// Number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been interned
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.entries.iter()
    }
}

impl From<Vec<Constant>> for ConstantPool {
    fn from(entries: Vec<Constant>) -> Self {
        let mut pool = Self::new();
        for constant in entries {
            // keep duplicates a foreign producer may have written
            let idx = ConstantIndex(pool.entries.len() as u32);
            pool.lookup.entry(constant.key()).or_insert(idx);
            pool.entries.push(constant);
        }
        pool
    }
}

impl From<ConstantPool> for Vec<Constant> {
    fn from(pool: ConstantPool) -> Self {
        pool.entries
    }
}
