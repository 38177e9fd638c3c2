//! Hidden Classes (Shapes) for property access optimization.
//!
//! A Shape represents the structure of an object: which named properties it
//! has, at what slot offsets and with which attributes. Shapes are shared
//! between objects with the same structure using a transition tree.
//!
//! Every shape gets a process-unique [`ShapeId`] that is never reused, so an
//! inline cache keyed by id can never confuse two layouts. Deleting a
//! property or changing its attributes produces a fresh unshared shape
//! instead of mutating a shared one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::object::PropertyAttributes;
use crate::string::JsString;

static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique shape identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub u64);

impl ShapeId {
    fn fresh() -> Self {
        Self(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Layout of one named property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeEntry {
    /// Slot offset in the object's property vector
    pub offset: u32,
    /// Property attributes
    pub attributes: PropertyAttributes,
    /// Accessor (getter/setter pair) rather than data
    pub accessor: bool,
}

impl ShapeEntry {
    /// Plain data property that an inline cache may read
    #[inline]
    pub fn is_data(&self) -> bool {
        !self.accessor
    }

    /// Data property that an inline cache may overwrite
    #[inline]
    pub fn is_writable_data(&self) -> bool {
        !self.accessor && self.attributes.writable
    }
}

type TransitionKey = (JsString, PropertyAttributes, bool);

/// A Shape defines the layout of properties in an object.
pub struct Shape {
    id: ShapeId,
    /// The shape this one was transitioned from, if any.
    parent: Option<Arc<Shape>>,
    /// Children keyed by the added property. Parent -> child links are weak.
    transitions: Mutex<FxHashMap<TransitionKey, Weak<Shape>>>,
    /// Properties in insertion order.
    properties: IndexMap<JsString, ShapeEntry, FxBuildHasher>,
    /// Unshared shape produced by a delete or reconfiguration.
    unique: bool,
}

impl Shape {
    /// Create a new root (empty) shape.
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            id: ShapeId::fresh(),
            parent: None,
            transitions: Mutex::new(FxHashMap::default()),
            properties: IndexMap::default(),
            unique: false,
        })
    }

    /// Identifier
    #[inline]
    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Whether this shape was split off the transition tree
    #[inline]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// The shape this one was derived from
    pub fn parent(&self) -> Option<&Arc<Shape>> {
        self.parent.as_ref()
    }

    /// Find a transition adding `key`, or create a new one.
    pub fn transition(
        self: &Arc<Self>,
        key: JsString,
        attributes: PropertyAttributes,
        accessor: bool,
    ) -> Arc<Self> {
        let transition_key = (key, attributes, accessor);
        let mut transitions = self.transitions.lock();
        if let Some(shape) = transitions.get(&transition_key).and_then(Weak::upgrade) {
            return shape;
        }

        let (key, attributes, accessor) = transition_key.clone();
        let mut properties = self.properties.clone();
        let entry = ShapeEntry {
            offset: properties.len() as u32,
            attributes,
            accessor,
        };
        properties.insert(key, entry);

        let shape = Arc::new(Self {
            id: ShapeId::fresh(),
            parent: Some(Arc::clone(self)),
            transitions: Mutex::new(FxHashMap::default()),
            properties,
            unique: false,
        });
        transitions.retain(|_, weak| weak.strong_count() > 0);
        transitions.insert(transition_key, Arc::downgrade(&shape));
        shape
    }

    /// Unshared copy without `key`; later offsets shift down by one.
    pub fn without(self: &Arc<Self>, key: &JsString) -> Arc<Self> {
        let mut properties = self.properties.clone();
        let Some(removed) = properties.shift_remove(key) else {
            return Arc::clone(self);
        };
        for entry in properties.values_mut() {
            if entry.offset > removed.offset {
                entry.offset -= 1;
            }
        }
        self.unique_with(properties)
    }

    /// Unshared copy with new attributes/kind for an existing `key`.
    pub fn reconfigure(
        self: &Arc<Self>,
        key: &JsString,
        attributes: PropertyAttributes,
        accessor: bool,
    ) -> Arc<Self> {
        let mut properties = self.properties.clone();
        match properties.get_mut(key) {
            Some(entry) if entry.attributes != attributes || entry.accessor != accessor => {
                entry.attributes = attributes;
                entry.accessor = accessor;
            }
            _ => return Arc::clone(self),
        }
        self.unique_with(properties)
    }

    fn unique_with(self: &Arc<Self>, properties: IndexMap<JsString, ShapeEntry, FxBuildHasher>) -> Arc<Self> {
        Arc::new(Self {
            id: ShapeId::fresh(),
            parent: Some(Arc::clone(self)),
            transitions: Mutex::new(FxHashMap::default()),
            properties,
            unique: true,
        })
    }

    /// Layout of a property key in this shape.
    #[inline]
    pub fn get(&self, key: &JsString) -> Option<ShapeEntry> {
        self.properties.get(key).copied()
    }

    /// Own property keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = (&JsString, &ShapeEntry)> {
        self.properties.iter()
    }

    /// Get the number of properties defined in this shape.
    #[inline]
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("unique", &self.unique)
            .field("property_count", &self.property_count())
            .finish()
    }
}
