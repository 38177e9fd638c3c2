//! Bytecode operands

use std::fmt;

use serde::{Deserialize, Serialize};

/// Virtual register, relative to the current frame window.
///
/// Register 0 always holds `this`; registers `1..=params` hold the formal
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Register(pub u16);

impl Register {
    /// The `this` register
    pub const THIS: Register = Register(0);

    /// Create a new register
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Register holding the given (zero based) formal parameter
    #[inline]
    pub const fn param(index: u16) -> Self {
        Self(index + 1)
    }

    /// Get register index
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }

    /// Register `n` slots after this one
    #[inline]
    pub const fn offset(self, n: u16) -> Self {
        Self(self.0 + n)
    }
}

impl From<u16> for Register {
    fn from(index: u16) -> Self {
        Self(index)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Index into the constant pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConstantIndex(pub u32);

impl ConstantIndex {
    /// Create a new constant index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Index into the name table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NameIndex(pub u32);

impl NameIndex {
    /// Create a new name index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Index into the nested code table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CodeIndex(pub u32);

impl CodeIndex {
    /// Create a new code index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Jump offset, relative to the jumping instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JumpOffset(pub i32);

impl JumpOffset {
    /// Create a new jump offset
    #[inline]
    pub const fn new(offset: i32) -> Self {
        Self(offset)
    }

    /// Get offset value
    #[inline]
    pub const fn offset(self) -> i32 {
        self.0
    }

    /// Absolute target when jumping from `pc`, if it is not negative
    #[inline]
    pub fn target(self, pc: usize) -> Option<usize> {
        let target = pc as i64 + self.0 as i64;
        usize::try_from(target).ok()
    }
}

/// Index into a code object's inline cache feedback vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CacheSlot(pub u32);

impl CacheSlot {
    /// Create a new cache slot
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_target() {
        assert_eq!(JumpOffset::new(3).target(4), Some(7));
        assert_eq!(JumpOffset::new(-4).target(4), Some(0));
        assert_eq!(JumpOffset::new(-5).target(4), None);
    }

    #[test]
    fn test_param_register() {
        assert_eq!(Register::param(0), Register(1));
        assert_eq!(Register::THIS.index(), 0);
        assert_eq!(Register(2).offset(3), Register(5));
        assert_eq!(Register(7).to_string(), "r7");
    }
}
