//! Exception table
//!
//! Each entry protects a half-open instruction range `[begin, end)`. Entries
//! carry an explicit parent link, so the unwinder walks from the innermost
//! protecting entry outward without depending on emission order.

use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::operand::Register;

/// What an exception table entry does when an error crosses it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerKind {
    /// Release the for-in enumerator held in `ret`, then keep unwinding
    Iterator,
    /// Pop one lexical environment, then keep unwinding
    Env,
    /// Store the error in `ret` and resume at `handler_pc`
    Catch,
    /// Store the throw completion in `flag`/`jmp` and resume at `handler_pc`
    Finally,
}

impl HandlerKind {
    /// Whether unwinding stops at this entry
    #[inline]
    pub const fn resumes(self) -> bool {
        matches!(self, Self::Catch | Self::Finally)
    }
}

/// Identifier of an entry inside its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct HandlerId(pub u32);

/// One exception table entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    /// Kind of entry
    pub kind: HandlerKind,
    /// First protected instruction
    pub begin: u32,
    /// One past the last protected instruction
    pub end: u32,
    /// Resume point for catch and finally entries
    pub handler_pc: u32,
    /// Catch value register, or the enumerator register for iterator entries
    pub ret: Register,
    /// Finally value register
    pub jmp: Register,
    /// Finally completion flag register
    pub flag: Register,
    /// Enclosing entry
    pub parent: Option<HandlerId>,
}

impl Handler {
    /// Catch entry: the error lands in `ret`
    pub fn catch(begin: u32, end: u32, handler_pc: u32, ret: Register) -> Self {
        Self {
            kind: HandlerKind::Catch,
            begin,
            end,
            handler_pc,
            ret,
            jmp: ret,
            flag: ret,
            parent: None,
        }
    }

    /// Finally entry: completion flag in `flag`, error in `jmp`
    pub fn finally(begin: u32, end: u32, handler_pc: u32, jmp: Register, flag: Register) -> Self {
        Self {
            kind: HandlerKind::Finally,
            begin,
            end,
            handler_pc,
            ret: jmp,
            jmp,
            flag,
            parent: None,
        }
    }

    /// Iterator entry: releases the enumerator in `iterator`
    pub fn iterator(begin: u32, end: u32, iterator: Register) -> Self {
        Self {
            kind: HandlerKind::Iterator,
            begin,
            end,
            handler_pc: end,
            ret: iterator,
            jmp: iterator,
            flag: iterator,
            parent: None,
        }
    }

    /// Env entry: pops one lexical environment
    pub fn env(begin: u32, end: u32) -> Self {
        Self {
            kind: HandlerKind::Env,
            begin,
            end,
            handler_pc: end,
            ret: Register::THIS,
            jmp: Register::THIS,
            flag: Register::THIS,
            parent: None,
        }
    }

    /// Set the enclosing entry
    pub fn within(mut self, parent: HandlerId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Whether `offset` lies in the protected range
    #[inline]
    pub fn covers(&self, offset: u32) -> bool {
        self.begin <= offset && offset < self.end
    }

    fn contains_range(&self, other: &Handler) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    fn overlaps(&self, other: &Handler) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

/// Validated exception table of one code object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionTable {
    handlers: Vec<Handler>,
    depths: Vec<u32>,
}

impl ExceptionTable {
    /// Validate entries and compute nesting depths
    ///
    /// Every entry must lie inside its parent, parents must precede their
    /// children, and entries sharing a parent must not overlap.
    pub fn new(handlers: Vec<Handler>) -> Result<Self> {
        let mut depths = Vec::with_capacity(handlers.len());
        for (idx, handler) in handlers.iter().enumerate() {
            if handler.begin >= handler.end {
                return Err(BytecodeError::InvalidExceptionTable(format!(
                    "entry {idx} has empty range {}..{}",
                    handler.begin, handler.end
                )));
            }
            let depth = match handler.parent {
                None => 0,
                Some(HandlerId(parent)) => {
                    let parent = parent as usize;
                    if parent >= idx {
                        return Err(BytecodeError::InvalidExceptionTable(format!(
                            "entry {idx} names parent {parent} which does not precede it"
                        )));
                    }
                    if !handlers[parent].contains_range(handler) {
                        return Err(BytecodeError::InvalidExceptionTable(format!(
                            "entry {idx} escapes its parent {parent}"
                        )));
                    }
                    depths[parent] + 1
                }
            };
            let sibling = handlers[..idx]
                .iter()
                .position(|h| h.parent == handler.parent && h.overlaps(handler));
            if let Some(sibling) = sibling {
                return Err(BytecodeError::InvalidExceptionTable(format!(
                    "entry {idx} overlaps sibling {sibling}"
                )));
            }
            depths.push(depth);
        }
        Ok(Self { handlers, depths })
    }

    /// All entries
    #[inline]
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Get an entry
    #[inline]
    pub fn get(&self, id: HandlerId) -> Option<&Handler> {
        self.handlers.get(id.0 as usize)
    }

    /// Innermost entry protecting `offset`
    pub fn innermost(&self, offset: u32) -> Option<HandlerId> {
        self.handlers
            .iter()
            .zip(&self.depths)
            .enumerate()
            .filter(|(_, (h, _))| h.covers(offset))
            .max_by_key(|(_, (_, depth))| **depth)
            .map(|(idx, _)| HandlerId(idx as u32))
    }

    /// Entries protecting `offset`, innermost first
    pub fn chain(&self, offset: u32) -> HandlerChain<'_> {
        HandlerChain {
            table: self,
            next: self.innermost(offset),
        }
    }
}

/// Iterator over the entries enclosing an offset, innermost first
pub struct HandlerChain<'a> {
    table: &'a ExceptionTable,
    next: Option<HandlerId>,
}

impl<'a> Iterator for HandlerChain<'a> {
    type Item = &'a Handler;

    fn next(&mut self) -> Option<Self::Item> {
        let handler = self.table.get(self.next?)?;
        self.next = handler.parent;
        Some(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> ExceptionTable {
        // try { for (..) { with (o) { ... } } } catch
        ExceptionTable::new(vec![
            Handler::catch(0, 20, 21, Register(3)),
            Handler::iterator(2, 15, Register(4)).within(HandlerId(0)),
            Handler::env(5, 10).within(HandlerId(1)),
        ])
        .unwrap()
    }

    #[test]
    fn test_chain_innermost_first() {
        let table = nested();
        let kinds: Vec<_> = table.chain(6).map(|h| h.kind).collect();
        assert_eq!(
            kinds,
            vec![HandlerKind::Env, HandlerKind::Iterator, HandlerKind::Catch]
        );

        let kinds: Vec<_> = table.chain(12).map(|h| h.kind).collect();
        assert_eq!(kinds, vec![HandlerKind::Iterator, HandlerKind::Catch]);

        assert_eq!(table.chain(20).count(), 0);
    }

    #[test]
    fn test_range_is_half_open() {
        let table = nested();
        assert_eq!(table.innermost(10), Some(HandlerId(1)));
        assert_eq!(table.innermost(5), Some(HandlerId(2)));
        assert_eq!(table.innermost(0), Some(HandlerId(0)));
    }

    #[test]
    fn test_rejects_escaping_child() {
        let err = ExceptionTable::new(vec![
            Handler::catch(0, 5, 6, Register(1)),
            Handler::env(3, 9).within(HandlerId(0)),
        ]);
        assert!(matches!(err, Err(BytecodeError::InvalidExceptionTable(_))));
    }

    #[test]
    fn test_rejects_overlapping_siblings() {
        let err = ExceptionTable::new(vec![
            Handler::catch(0, 5, 6, Register(1)),
            Handler::catch(3, 9, 10, Register(1)),
        ]);
        assert!(matches!(err, Err(BytecodeError::InvalidExceptionTable(_))));
    }

    #[test]
    fn test_rejects_forward_parent() {
        let err = ExceptionTable::new(vec![Handler::env(1, 2).within(HandlerId(0))]);
        assert!(err.is_err());
    }
}
