//! Property inline caches
//!
//! Every named property access site owns a [`CacheState`] in its code
//! object's feedback table. Sites start uninitialized, become monomorphic on
//! the first own data hit and fall back to a per-context megamorphic table
//! when they see more shapes. Sites that meet something uncacheable
//! (accessors, inherited properties, primitives' element keys) turn generic
//! for good.
//!
//! Caching never changes results: a cached access returns exactly what the
//! generic path would have returned.

use lumen_vm_bytecode::{CacheSlot, CacheState, Code};

use crate::context::VmContext;
use crate::error::{VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::object::{PropertyDescriptor, PropertyKey, WriteOutcome, lookup};
use crate::shape::ShapeId;
use crate::string::JsString;
use crate::value::{ObjectRef, Value};

#[derive(Debug, Clone)]
struct MegamorphicEntry {
    shape: ShapeId,
    name: JsString,
    offset: u32,
    writable: bool,
}

/// Shared `(shape, name) -> offset` table consulted by megamorphic sites
#[derive(Debug)]
pub struct MegamorphicCache {
    entries: Vec<Option<MegamorphicEntry>>,
    mask: usize,
}

impl MegamorphicCache {
    /// Table with at least `size` entries
    pub fn new(size: usize) -> Self {
        let size = size.max(1).next_power_of_two();
        Self {
            entries: vec![None; size],
            mask: size - 1,
        }
    }

    #[inline]
    fn index(&self, shape: ShapeId, name: &JsString) -> usize {
        let h = shape.0.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ name.hash_value();
        (h as usize) & self.mask
    }

    /// Cached offset for `name` in objects of `shape`
    #[inline]
    pub fn lookup(&self, shape: ShapeId, name: &JsString) -> Option<u32> {
        match &self.entries[self.index(shape, name)] {
            Some(entry) if entry.shape == shape && entry.name == *name => Some(entry.offset),
            _ => None,
        }
    }

    /// Cached offset for `name` in objects of `shape`, if a store may use it
    #[inline]
    pub fn lookup_writable(&self, shape: ShapeId, name: &JsString) -> Option<u32> {
        match &self.entries[self.index(shape, name)] {
            Some(entry) if entry.shape == shape && entry.name == *name && entry.writable => Some(entry.offset),
            _ => None,
        }
    }

    /// Record an own data property location, replacing whatever shared the bucket
    pub fn insert(&mut self, shape: ShapeId, name: &JsString, offset: u32, writable: bool) {
        let index = self.index(shape, name);
        if let Some(old) = &self.entries[index] {
            tracing::trace!(
                old_shape = old.shape.0,
                old_name = %old.name,
                new_shape = shape.0,
                new_name = %name,
                "megamorphic cache entry evicted"
            );
        }
        self.entries[index] = Some(MegamorphicEntry {
            shape,
            name: name.clone(),
            offset,
            writable,
        });
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.fill(None);
    }

    /// Number of buckets
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

/// State after a cacheable hit on `(shape, offset)`
pub fn next_state(current: CacheState, shape: ShapeId, offset: u32) -> CacheState {
    match current {
        CacheState::Uninitialized => CacheState::Monomorphic {
            shape: shape.0,
            offset,
        },
        CacheState::Monomorphic { shape: cached, .. } if cached == shape.0 => CacheState::Monomorphic {
            shape: shape.0,
            offset,
        },
        CacheState::Monomorphic { .. } | CacheState::Megamorphic { .. } => CacheState::Megamorphic {
            shape: shape.0,
            offset,
        },
        CacheState::Uncached => CacheState::Uncached,
    }
}

fn transition(code: &Code, slot: CacheSlot, from: CacheState, to: CacheState) {
    if from != to {
        tracing::trace!(
            code = code.display_name(),
            slot = slot.0,
            from = from.form(),
            to = to.form(),
            "inline cache transition"
        );
        code.set_cache_state(slot, to);
    }
}

impl Interpreter {
    /// Cached named load from an object
    ///
    /// `Ok(None)` means the property does not exist anywhere on the chain.
    pub fn load_cached(
        &self,
        ctx: &mut VmContext,
        code: &Code,
        slot: CacheSlot,
        object: &ObjectRef,
        name: &JsString,
    ) -> VmResult<Option<Value>> {
        let key = PropertyKey::from_string(name.clone());
        let state = code.cache_state(slot);

        if !ctx.config().inline_caching {
            return self.load_generic(ctx, object, &key);
        }
        if matches!(key, PropertyKey::Index(_)) {
            transition(code, slot, state, CacheState::Uncached);
            return self.load_generic(ctx, object, &key);
        }

        if state == CacheState::Uncached {
            return self.load_generic(ctx, object, &key);
        }
        if let Some((shape, offset)) = state.cached() {
            if let Some(value) = object.data_at(ShapeId(shape), offset) {
                return Ok(Some(value));
            }
        }
        let shape_id = object.shape_id();
        if let Some(offset) = ctx.megamorphic.lookup(shape_id, name) {
            if let Some(value) = object.data_at(shape_id, offset) {
                let to = CacheState::Megamorphic {
                    shape: shape_id.0,
                    offset,
                };
                transition(code, slot, state, to);
                return Ok(Some(value));
            }
        }

        let Some(found) = lookup(object, &key) else {
            transition(code, slot, state, CacheState::Uncached);
            return Ok(None);
        };
        match found.load_cacheable() {
            Some((shape, offset)) => {
                ctx.megamorphic.insert(shape, name, offset, found.property.attributes().writable);
                transition(code, slot, state, next_state(state, shape, offset));
            }
            None => transition(code, slot, state, CacheState::Uncached),
        }
        self.found_value(ctx, found.property, object).map(Some)
    }

    fn load_generic(&self, ctx: &mut VmContext, object: &ObjectRef, key: &PropertyKey) -> VmResult<Option<Value>> {
        match lookup(object, key) {
            Some(found) => self.found_value(ctx, found.property, object).map(Some),
            None => Ok(None),
        }
    }

    fn found_value(&self, ctx: &mut VmContext, property: PropertyDescriptor, receiver: &ObjectRef) -> VmResult<Value> {
        match property {
            PropertyDescriptor::Data { value, .. } => Ok(value),
            PropertyDescriptor::Accessor { get: Some(getter), .. } => {
                self.call_function(ctx, &Value::Object(getter), Value::Object(receiver.clone()), &[])
            }
            PropertyDescriptor::Accessor { get: None, .. } => Ok(Value::Undefined),
        }
    }

    /// `base.name` through the site's cache
    pub fn load_property_cached(
        &self,
        ctx: &mut VmContext,
        code: &Code,
        slot: CacheSlot,
        base: &Value,
        name: &JsString,
    ) -> VmResult<Value> {
        match base {
            Value::Object(object) => Ok(self.load_cached(ctx, code, slot, object, name)?.unwrap_or_default()),
            primitive => self.get_property(ctx, primitive, &PropertyKey::from_string(name.clone())),
        }
    }

    /// Global variable read through the site's cache
    pub fn load_global_cached(
        &self,
        ctx: &mut VmContext,
        code: &Code,
        slot: CacheSlot,
        name: &JsString,
    ) -> VmResult<Value> {
        let global = ctx.global().clone();
        self.load_cached(ctx, code, slot, &global, name)?
            .ok_or_else(|| VmError::reference_error(format!("{name} is not defined")))
    }

    /// Cached named store
    pub fn store_cached(
        &self,
        ctx: &mut VmContext,
        code: &Code,
        slot: CacheSlot,
        base: &Value,
        name: &JsString,
        value: Value,
    ) -> VmResult<()> {
        let key = PropertyKey::from_string(name.clone());
        let caching = ctx.config().inline_caching;
        let state = code.cache_state(slot);

        if let (true, Value::Object(object)) = (caching, base) {
            if state == CacheState::Uncached {
                return self.put_property(ctx, base, key, value, code.strict).map(drop);
            }
            if let Some((shape, offset)) = state.cached() {
                if object.store_at(ShapeId(shape), offset, value.clone()) {
                    return Ok(());
                }
            }
            let shape_id = object.shape_id();
            if let Some(offset) = ctx.megamorphic.lookup_writable(shape_id, name) {
                if object.store_at(shape_id, offset, value.clone()) {
                    let to = CacheState::Megamorphic {
                        shape: shape_id.0,
                        offset,
                    };
                    transition(code, slot, state, to);
                    return Ok(());
                }
            }
        }

        let uncacheable = matches!(key, PropertyKey::Index(_)) || !base.is_object();
        let outcome = self.put_property(ctx, base, key, value, code.strict)?;
        if !caching || state == CacheState::Uncached {
            return Ok(());
        }
        let to = match outcome {
            _ if uncacheable => CacheState::Uncached,
            WriteOutcome::Replaced { shape, offset } => {
                ctx.megamorphic.insert(shape, name, offset, true);
                next_state(state, shape, offset)
            }
            WriteOutcome::Added => state,
            WriteOutcome::ReplacedElement | WriteOutcome::Rejected => CacheState::Uncached,
        };
        transition(code, slot, state, to);
        Ok(())
    }

    /// Global variable write through the site's cache
    ///
    /// Strict code may not create globals by assignment.
    pub fn store_global_cached(
        &self,
        ctx: &mut VmContext,
        code: &Code,
        slot: CacheSlot,
        name: &JsString,
        value: Value,
    ) -> VmResult<()> {
        let global = ctx.global().clone();
        if code.strict {
            let hit = ctx.config().inline_caching
                && code
                    .cache_state(slot)
                    .cached()
                    .is_some_and(|(shape, _)| global.shape_id() == ShapeId(shape));
            if !hit && lookup(&global, &PropertyKey::from_string(name.clone())).is_none() {
                return Err(VmError::reference_error(format!("{name} is not defined")));
            }
        }
        self.store_cached(ctx, code, slot, &Value::Object(global), name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_state_progression() {
        let a = ShapeId(10);
        let b = ShapeId(11);
        let s = next_state(CacheState::Uninitialized, a, 0);
        assert_eq!(s, CacheState::Monomorphic { shape: 10, offset: 0 });
        assert_eq!(next_state(s, a, 0), s);
        let s = next_state(s, b, 2);
        assert_eq!(s, CacheState::Megamorphic { shape: 11, offset: 2 });
        assert_eq!(next_state(s, a, 0), CacheState::Megamorphic { shape: 10, offset: 0 });
        assert_eq!(next_state(CacheState::Uncached, a, 0), CacheState::Uncached);
    }

    #[test]
    fn test_megamorphic_table() {
        let mut cache = MegamorphicCache::new(100);
        assert_eq!(cache.capacity(), 128);
        let x = JsString::new("x");
        let y = JsString::new("y");
        cache.insert(ShapeId(1), &x, 3, true);
        assert_eq!(cache.lookup(ShapeId(1), &x), Some(3));
        assert_eq!(cache.lookup(ShapeId(2), &x), None);
        assert_eq!(cache.lookup(ShapeId(1), &y), None);
        cache.clear();
        assert_eq!(cache.lookup(ShapeId(1), &x), None);
    }

    #[test]
    fn test_megamorphic_collision_overwrites() {
        let mut cache = MegamorphicCache::new(1);
        let x = JsString::new("x");
        cache.insert(ShapeId(1), &x, 0, true);
        cache.insert(ShapeId(2), &x, 1, true);
        assert_eq!(cache.lookup(ShapeId(1), &x), None);
        assert_eq!(cache.lookup(ShapeId(2), &x), Some(1));
    }

    #[test]
    fn test_read_only_entries_hidden_from_stores() {
        let mut cache = MegamorphicCache::new(16);
        let x = JsString::new("x");
        cache.insert(ShapeId(7), &x, 2, false);
        assert_eq!(cache.lookup(ShapeId(7), &x), Some(2));
        assert_eq!(cache.lookup_writable(ShapeId(7), &x), None);
        cache.insert(ShapeId(7), &x, 2, true);
        assert_eq!(cache.lookup_writable(ShapeId(7), &x), Some(2));
    }
}
