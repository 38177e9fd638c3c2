//! For-in enumerators
//!
//! A `for (k in o)` loop snapshots the enumerable keys of `o` and its
//! prototypes when it starts. The enumerator lives in a context-owned pool
//! and the loop's register holds a generation-checked [`CellRef`] to it, so
//! a stale handle can never observe a recycled enumerator.

use rustc_hash::FxHashSet;

use crate::error::{VmError, VmResult};
use crate::object::has_property;
use crate::object::PropertyKey;
use crate::string::JsString;
use crate::value::ObjectRef;

/// Handle to a pooled enumerator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    /// Pool slot
    pub index: u32,
    /// Generation of the slot when the handle was issued
    pub generation: u32,
}

/// Snapshot of keys being enumerated
#[derive(Debug)]
pub struct NativeIterator {
    object: ObjectRef,
    keys: Vec<JsString>,
    position: usize,
}

impl NativeIterator {
    /// Next key that is still present on the object or its prototypes
    ///
    /// Keys deleted after the snapshot was taken are skipped.
    pub fn next_key(&mut self) -> Option<JsString> {
        while let Some(key) = self.keys.get(self.position) {
            self.position += 1;
            if has_property(&self.object, &PropertyKey::from_string(key.clone())) {
                return Some(key.clone());
            }
        }
        None
    }

    /// Keys not yet visited
    pub fn remaining(&self) -> usize {
        self.keys.len().saturating_sub(self.position)
    }
}

/// Collect enumerable keys of `object` and its prototype chain into `keys`
///
/// A key seen on a nearer object shadows the same key further up the chain,
/// whether or not the nearer property is enumerable.
pub fn collect_enumerable_keys(object: &ObjectRef, keys: &mut Vec<JsString>) {
    let mut seen: FxHashSet<PropertyKey> = FxHashSet::default();
    let mut current = Some(object.clone());
    while let Some(obj) = current {
        for (key, enumerable) in obj.own_keys() {
            if !seen.insert(key.clone()) {
                continue;
            }
            if enumerable {
                keys.push(key.to_js_string());
            }
        }
        current = obj.prototype();
    }
}

#[derive(Debug, Default)]
struct PoolSlot {
    generation: u32,
    iterator: Option<NativeIterator>,
}

/// Context-owned pool of enumerators
#[derive(Debug)]
pub struct IteratorPool {
    slots: Vec<PoolSlot>,
    free: Vec<u32>,
    spare: Vec<Vec<JsString>>,
    spare_limit: usize,
    live: usize,
}

impl IteratorPool {
    /// Create a pool that keeps up to `spare_limit` key buffers for reuse
    pub fn new(spare_limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            spare: Vec::with_capacity(spare_limit),
            spare_limit,
            live: 0,
        }
    }

    /// Start enumerating `object`
    pub fn gain(&mut self, object: ObjectRef) -> CellRef {
        let mut keys = self.spare.pop().unwrap_or_default();
        collect_enumerable_keys(&object, &mut keys);
        let iterator = NativeIterator {
            object,
            keys,
            position: 0,
        };

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(PoolSlot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.iterator = Some(iterator);
        self.live += 1;
        CellRef {
            index,
            generation: slot.generation,
        }
    }

    /// The enumerator behind a handle
    pub fn get_mut(&mut self, cell: CellRef) -> VmResult<&mut NativeIterator> {
        self.slots
            .get_mut(cell.index as usize)
            .filter(|slot| slot.generation == cell.generation)
            .and_then(|slot| slot.iterator.as_mut())
            .ok_or_else(|| VmError::internal("stale for-in enumerator"))
    }

    /// Release an enumerator; releasing twice is a no-op
    pub fn release(&mut self, cell: CellRef) {
        let Some(slot) = self.slots.get_mut(cell.index as usize) else {
            return;
        };
        if slot.generation != cell.generation {
            return;
        }
        let Some(iterator) = slot.iterator.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(cell.index);
        self.live -= 1;

        if self.spare.len() < self.spare_limit {
            let mut keys = iterator.keys;
            keys.clear();
            self.spare.push(keys);
        }
    }

    /// Enumerators currently held by running loops
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{JsObject, ObjectClass, PropertyAttributes, PropertyDescriptor};
    use crate::shape::Shape;
    use crate::value::Value;

    fn object_with(keys: &[&str], proto: Option<ObjectRef>) -> ObjectRef {
        let obj = JsObject::new(ObjectClass::Ordinary, Shape::root(), proto);
        for key in keys {
            obj.write(&PropertyKey::from(*key), Value::Int32(1));
        }
        obj
    }

    fn drain(pool: &mut IteratorPool, cell: CellRef) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(key) = pool.get_mut(cell).unwrap().next_key() {
            out.push(key.to_string());
        }
        out
    }

    #[test]
    fn test_own_then_inherited_keys() {
        let proto = object_with(&["b", "c"], None);
        let obj = object_with(&["a", "b"], Some(proto));
        obj.write(&PropertyKey::Index(2), Value::Null);

        let mut pool = IteratorPool::new(4);
        let cell = pool.gain(obj);
        assert_eq!(drain(&mut pool, cell), vec!["2", "a", "b", "c"]);
    }

    #[test]
    fn test_non_enumerable_shadows_inherited() {
        let proto = object_with(&["hidden"], None);
        let obj = object_with(&[], Some(proto));
        obj.define_own_property(
            PropertyKey::from("hidden"),
            PropertyDescriptor::data_with_attrs(Value::Null, PropertyAttributes::hidden()),
        );
        let mut pool = IteratorPool::new(4);
        let cell = pool.gain(obj);
        assert!(drain(&mut pool, cell).is_empty());
    }

    #[test]
    fn test_deleted_keys_are_skipped() {
        let obj = object_with(&["a", "b", "c"], None);
        let mut pool = IteratorPool::new(4);
        let cell = pool.gain(obj.clone());
        assert_eq!(pool.get_mut(cell).unwrap().next_key().unwrap().as_str(), "a");
        obj.delete(&PropertyKey::from("b"));
        assert_eq!(drain(&mut pool, cell), vec!["c"]);
    }

    #[test]
    fn test_release_is_generation_checked() {
        let mut pool = IteratorPool::new(1);
        let first = pool.gain(object_with(&["x"], None));
        assert_eq!(pool.live(), 1);
        pool.release(first);
        pool.release(first);
        assert_eq!(pool.live(), 0);

        let second = pool.gain(object_with(&["y"], None));
        assert_eq!(second.index, first.index);
        assert_ne!(second.generation, first.generation);
        assert!(pool.get_mut(first).is_err());
        pool.release(first);
        assert_eq!(pool.live(), 1);
        assert_eq!(drain(&mut pool, second), vec!["y"]);
    }
}
