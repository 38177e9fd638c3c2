//! JavaScript objects
//!
//! Named properties live in shape-described slots; integer-indexed
//! properties live in an ordered element map so that arrays do not grow the
//! transition tree. Nothing here runs script: getters, setters and the
//! `[[Put]]` rejection rules are driven by the interpreter.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lumen_vm_bytecode::Name;
use parking_lot::RwLock;

use crate::function::JsFunction;
use crate::shape::{Shape, ShapeEntry, ShapeId};
use crate::string::JsString;
use crate::value::{ObjectRef, Value};

/// Property key: a name or a canonical array index
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String property key
    String(JsString),
    /// Integer index (`0..2^32-1`)
    Index(u32),
}

impl PropertyKey {
    /// Canonicalise a string: array-index strings become `Index`
    pub fn from_string(s: JsString) -> Self {
        match s.as_array_index() {
            Some(i) => Self::Index(i),
            None => Self::String(s),
        }
    }

    /// Key as a string
    pub fn to_js_string(&self) -> JsString {
        match self {
            Self::String(s) => s.clone(),
            Self::Index(i) => JsString::new(itoa::Buffer::new().format(*i)),
        }
    }

    /// Get as string key
    #[inline]
    pub fn as_string(&self) -> Option<&JsString> {
        match self {
            Self::String(s) => Some(s),
            Self::Index(_) => None,
        }
    }

    /// Get as index key
    #[inline]
    pub fn as_index(&self) -> Option<u32> {
        match self {
            Self::Index(i) => Some(*i),
            Self::String(_) => None,
        }
    }

    /// Whether this is the `length` key
    #[inline]
    pub fn is_length(&self) -> bool {
        matches!(self, Self::String(s) if s.as_str() == "length")
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::from_string(JsString::new(s))
    }
}

impl From<JsString> for PropertyKey {
    fn from(s: JsString) -> Self {
        Self::from_string(s)
    }
}

impl From<&Name> for PropertyKey {
    fn from(name: &Name) -> Self {
        Self::from_string(JsString::from(name))
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

/// Property attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropertyAttributes {
    /// Property is writable
    pub writable: bool,
    /// Property is enumerable
    pub enumerable: bool,
    /// Property is configurable
    pub configurable: bool,
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        Self::data()
    }
}

impl PropertyAttributes {
    /// Default data property attributes
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Writable and configurable but not enumerable (built-in methods)
    pub const fn hidden() -> Self {
        Self {
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, non-configurable
    pub const fn frozen() -> Self {
        Self {
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Explicit attributes
    pub const fn new(writable: bool, enumerable: bool, configurable: bool) -> Self {
        Self {
            writable,
            enumerable,
            configurable,
        }
    }
}

/// Property descriptor
#[derive(Clone, Debug)]
pub enum PropertyDescriptor {
    /// Data property
    Data {
        /// The value
        value: Value,
        /// Attributes
        attributes: PropertyAttributes,
    },
    /// Accessor property
    Accessor {
        /// Getter function
        get: Option<ObjectRef>,
        /// Setter function
        set: Option<ObjectRef>,
        /// Attributes (`writable` is ignored)
        attributes: PropertyAttributes,
    },
}

impl PropertyDescriptor {
    /// Create a data property with default attributes
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            attributes: PropertyAttributes::data(),
        }
    }

    /// Create a data property with specific attributes
    pub fn data_with_attrs(value: Value, attributes: PropertyAttributes) -> Self {
        Self::Data { value, attributes }
    }

    /// Attributes of either kind
    #[inline]
    pub fn attributes(&self) -> PropertyAttributes {
        match self {
            Self::Data { attributes, .. } | Self::Accessor { attributes, .. } => *attributes,
        }
    }

    /// Value of a data property
    #[inline]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    fn into_slot(self) -> (Slot, PropertyAttributes, bool) {
        match self {
            Self::Data { value, attributes } => (Slot::Data(value), attributes, false),
            Self::Accessor {
                get,
                set,
                attributes,
            } => (Slot::Accessor { get, set }, attributes, true),
        }
    }

    fn from_slot(slot: &Slot, attributes: PropertyAttributes) -> Self {
        match slot {
            Slot::Data(value) => Self::Data {
                value: value.clone(),
                attributes,
            },
            Slot::Accessor { get, set } => Self::Accessor {
                get: get.clone(),
                set: set.clone(),
                attributes,
            },
        }
    }
}

#[derive(Clone, Debug)]
enum Slot {
    Data(Value),
    Accessor {
        get: Option<ObjectRef>,
        set: Option<ObjectRef>,
    },
}

/// Built-in object kind, fixed at creation
#[derive(Debug)]
pub enum ObjectClass {
    /// Plain object
    Ordinary,
    /// Array with a `length`
    Array,
    /// Callable function
    Function(JsFunction),
    /// Error instance
    Error,
    /// Arguments object
    Arguments,
    /// Global object
    Global,
    /// Boolean wrapper
    Boolean(bool),
    /// Number wrapper
    Number(f64),
    /// String wrapper
    String(JsString),
}

struct ObjectData {
    shape: Arc<Shape>,
    slots: Vec<Slot>,
    elements: BTreeMap<u32, PropertyDescriptor>,
    prototype: Option<ObjectRef>,
    extensible: bool,
    length: u32,
}

/// Outcome of writing a data value to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// An own writable data property was replaced in place; shape unchanged
    Replaced {
        /// Shape of the receiver (before and after)
        shape: ShapeId,
        /// Slot offset
        offset: u32,
    },
    /// An own element or special property was replaced
    ReplacedElement,
    /// A new property was added
    Added,
    /// Not written: read-only, accessor or non-extensible
    Rejected,
}

/// Result of a prototype-chain lookup
#[derive(Debug, Clone)]
pub struct Found {
    /// Object holding the property
    pub holder: ObjectRef,
    /// The property
    pub property: PropertyDescriptor,
    /// Found on the receiver itself
    pub own: bool,
    /// Shape slot of a named property, when it lives in one
    pub location: Option<(ShapeId, ShapeEntry)>,
}

impl Found {
    /// Own data property in a shape slot: safe to inline cache for loads
    pub fn load_cacheable(&self) -> Option<(ShapeId, u32)> {
        match self.location {
            Some((shape, entry)) if self.own && entry.is_data() => Some((shape, entry.offset)),
            _ => None,
        }
    }
}

/// A heap object
pub struct JsObject {
    class: ObjectClass,
    data: RwLock<ObjectData>,
}

impl JsObject {
    /// Create a new object
    pub fn new(class: ObjectClass, shape: Arc<Shape>, prototype: Option<ObjectRef>) -> ObjectRef {
        Arc::new(Self {
            class,
            data: RwLock::new(ObjectData {
                shape,
                slots: Vec::new(),
                elements: BTreeMap::new(),
                prototype,
                extensible: true,
                length: 0,
            }),
        })
    }

    /// Object kind
    #[inline]
    pub fn class(&self) -> &ObjectClass {
        &self.class
    }

    /// `[[Class]]` name as reported by `Object.prototype.toString`
    pub fn class_name(&self) -> &'static str {
        match self.class {
            ObjectClass::Ordinary => "Object",
            ObjectClass::Array => "Array",
            ObjectClass::Function(_) => "Function",
            ObjectClass::Error => "Error",
            ObjectClass::Arguments => "Arguments",
            ObjectClass::Global => "global",
            ObjectClass::Boolean(_) => "Boolean",
            ObjectClass::Number(_) => "Number",
            ObjectClass::String(_) => "String",
        }
    }

    /// Function payload
    #[inline]
    pub fn function(&self) -> Option<&JsFunction> {
        match &self.class {
            ObjectClass::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Is a function
    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(self.class, ObjectClass::Function(_))
    }

    /// Is an array
    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self.class, ObjectClass::Array)
    }

    /// Current shape
    pub fn shape(&self) -> Arc<Shape> {
        Arc::clone(&self.data.read().shape)
    }

    /// Current shape identifier
    #[inline]
    pub fn shape_id(&self) -> ShapeId {
        self.data.read().shape.id()
    }

    /// Prototype
    pub fn prototype(&self) -> Option<ObjectRef> {
        self.data.read().prototype.clone()
    }

    /// Replace the prototype
    pub fn set_prototype(&self, prototype: Option<ObjectRef>) {
        self.data.write().prototype = prototype;
    }

    /// `[[Extensible]]`
    pub fn is_extensible(&self) -> bool {
        self.data.read().extensible
    }

    /// Forbid new properties
    pub fn prevent_extensions(&self) {
        self.data.write().extensible = false;
    }

    /// Array length
    pub fn array_length(&self) -> Option<u32> {
        self.is_array().then(|| self.data.read().length)
    }

    /// Set array length, dropping elements at or past it
    pub fn set_array_length(&self, length: u32) {
        let mut data = self.data.write();
        let _truncated = data.elements.split_off(&length);
        data.length = length;
    }

    fn special_own(&self, key: &PropertyKey, data: &ObjectData) -> Option<PropertyDescriptor> {
        match (&self.class, key) {
            (ObjectClass::Array, k) if k.is_length() => Some(PropertyDescriptor::data_with_attrs(
                Value::from_u32(data.length),
                PropertyAttributes::new(true, false, false),
            )),
            (ObjectClass::String(s), k) if k.is_length() => Some(PropertyDescriptor::data_with_attrs(
                Value::from_u32(s.len()),
                PropertyAttributes::frozen(),
            )),
            (ObjectClass::String(s), PropertyKey::Index(i)) => s.char_at(*i).map(|c| {
                PropertyDescriptor::data_with_attrs(
                    Value::String(c),
                    PropertyAttributes::new(false, true, false),
                )
            }),
            _ => None,
        }
    }

    /// `[[GetOwnProperty]]`
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        self.get_own_located(key).map(|(p, _)| p)
    }

    fn get_own_located(
        &self,
        key: &PropertyKey,
    ) -> Option<(PropertyDescriptor, Option<(ShapeId, ShapeEntry)>)> {
        let data = self.data.read();
        if let Some(special) = self.special_own(key, &data) {
            return Some((special, None));
        }
        match key {
            PropertyKey::Index(i) => data.elements.get(i).map(|p| (p.clone(), None)),
            PropertyKey::String(name) => {
                let entry = data.shape.get(name)?;
                let slot = data.slots.get(entry.offset as usize)?;
                Some((
                    PropertyDescriptor::from_slot(slot, entry.attributes),
                    Some((data.shape.id(), entry)),
                ))
            }
        }
    }

    /// Whether the object has an own property
    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.get_own_located(key).is_some()
    }

    /// Shape location of an own named property
    pub fn own_location(&self, name: &JsString) -> Option<(ShapeId, ShapeEntry)> {
        let data = self.data.read();
        data.shape.get(name).map(|entry| (data.shape.id(), entry))
    }

    /// Read a data slot if the object still has shape `shape`
    #[inline]
    pub fn data_at(&self, shape: ShapeId, offset: u32) -> Option<Value> {
        let data = self.data.read();
        if data.shape.id() != shape {
            return None;
        }
        match data.slots.get(offset as usize)? {
            Slot::Data(value) => Some(value.clone()),
            Slot::Accessor { .. } => None,
        }
    }

    /// Overwrite a data slot if the object still has shape `shape`
    #[inline]
    pub fn store_at(&self, shape: ShapeId, offset: u32, value: Value) -> bool {
        let mut data = self.data.write();
        if data.shape.id() != shape {
            return false;
        }
        match data.slots.get_mut(offset as usize) {
            Some(Slot::Data(slot)) => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    /// Write a data value as `[[Put]]` would on this object alone
    ///
    /// Replaces an own writable data property or adds a new one when the
    /// object is extensible. Inherited properties are the caller's concern.
    pub fn write(&self, key: &PropertyKey, value: Value) -> WriteOutcome {
        let mut guard = self.data.write();
        if self.special_own(key, &guard).is_some() {
            return WriteOutcome::Rejected;
        }
        // field borrows below must be disjoint
        let data = &mut *guard;
        match key {
            PropertyKey::Index(i) => {
                let i = *i;
                match data.elements.get_mut(&i) {
                    Some(PropertyDescriptor::Data { value: v, attributes }) if attributes.writable => {
                        *v = value;
                        WriteOutcome::ReplacedElement
                    }
                    Some(_) => WriteOutcome::Rejected,
                    None if !data.extensible => WriteOutcome::Rejected,
                    None => {
                        data.elements.insert(i, PropertyDescriptor::data(value));
                        if self.is_array() && i >= data.length {
                            data.length = i + 1;
                        }
                        WriteOutcome::Added
                    }
                }
            }
            PropertyKey::String(name) => match data.shape.get(name) {
                Some(entry) if entry.is_writable_data() => {
                    let shape = data.shape.id();
                    data.slots[entry.offset as usize] = Slot::Data(value);
                    WriteOutcome::Replaced {
                        shape,
                        offset: entry.offset,
                    }
                }
                Some(_) => WriteOutcome::Rejected,
                None if !data.extensible => WriteOutcome::Rejected,
                None => {
                    let shape = data.shape.transition(name.clone(), PropertyAttributes::data(), false);
                    data.shape = shape;
                    data.slots.push(Slot::Data(value));
                    WriteOutcome::Added
                }
            },
        }
    }

    /// `[[DefineOwnProperty]]` without validation against existing attributes
    ///
    /// Used by literals, binding instantiation and intrinsic setup. Returns
    /// `false` only when an existing property is not configurable.
    pub fn define_own_property(&self, key: PropertyKey, property: PropertyDescriptor) -> bool {
        let mut data = self.data.write();
        if self.special_own(&key, &data).is_some() {
            return false;
        }
        match key {
            PropertyKey::Index(i) => {
                if let Some(existing) = data.elements.get(&i) {
                    if !existing.attributes().configurable {
                        return false;
                    }
                }
                data.elements.insert(i, property);
                if self.is_array() && i >= data.length {
                    data.length = i + 1;
                }
                true
            }
            PropertyKey::String(name) => {
                let (slot, attributes, accessor) = property.into_slot();
                match data.shape.get(&name) {
                    Some(entry) => {
                        if !entry.attributes.configurable
                            && (entry.attributes != attributes || entry.accessor != accessor)
                        {
                            return false;
                        }
                        let shape = data.shape.reconfigure(&name, attributes, accessor);
                        data.shape = shape;
                        data.slots[entry.offset as usize] = slot;
                    }
                    None => {
                        let shape = data.shape.transition(name, attributes, accessor);
                        data.shape = shape;
                        data.slots.push(slot);
                    }
                }
                true
            }
        }
    }

    /// Install a getter or setter half, keeping the other half if present
    pub fn merge_accessor(&self, key: PropertyKey, get: Option<ObjectRef>, set: Option<ObjectRef>) -> bool {
        let (mut new_get, mut new_set) = (get, set);
        if let Some(PropertyDescriptor::Accessor { get, set, .. }) = self.get_own_property(&key) {
            new_get = new_get.or(get);
            new_set = new_set.or(set);
        }
        self.define_own_property(
            key,
            PropertyDescriptor::Accessor {
                get: new_get,
                set: new_set,
                attributes: PropertyAttributes::data(),
            },
        )
    }

    /// `[[Delete]]`: `false` when the property exists and is not configurable
    pub fn delete(&self, key: &PropertyKey) -> bool {
        let mut data = self.data.write();
        if self.special_own(key, &data).is_some() {
            return false;
        }
        match key {
            PropertyKey::Index(i) => match data.elements.get(i) {
                Some(p) if !p.attributes().configurable => false,
                Some(_) => {
                    data.elements.remove(i);
                    true
                }
                None => true,
            },
            PropertyKey::String(name) => match data.shape.get(name) {
                Some(entry) if !entry.attributes.configurable => false,
                Some(entry) => {
                    let shape = data.shape.without(name);
                    data.shape = shape;
                    data.slots.remove(entry.offset as usize);
                    true
                }
                None => true,
            },
        }
    }

    /// Own keys with their enumerability: indices ascending, then names in
    /// insertion order
    pub fn own_keys(&self) -> Vec<(PropertyKey, bool)> {
        let data = self.data.read();
        let mut keys = Vec::new();
        if let ObjectClass::String(s) = &self.class {
            keys.extend((0..s.len()).map(|i| (PropertyKey::Index(i), true)));
        }
        keys.extend(
            data.elements
                .iter()
                .map(|(i, p)| (PropertyKey::Index(*i), p.attributes().enumerable)),
        );
        if matches!(self.class, ObjectClass::Array | ObjectClass::String(_)) {
            keys.push((PropertyKey::from("length"), false));
        }
        keys.extend(
            data.shape
                .keys()
                .map(|(k, e)| (PropertyKey::String(k.clone()), e.attributes.enumerable)),
        );
        keys
    }

    /// Walk the prototype chain for a data value without running getters
    pub fn lookup_data(&self, key: &PropertyKey) -> Option<Value> {
        if let Some(p) = self.get_own_property(key) {
            return p.value().cloned();
        }
        let mut current = self.prototype();
        while let Some(obj) = current {
            if let Some(p) = obj.get_own_property(key) {
                return p.value().cloned();
            }
            current = obj.prototype();
        }
        None
    }
}

/// Find a property on `object` or its prototype chain
pub fn lookup(object: &ObjectRef, key: &PropertyKey) -> Option<Found> {
    let mut current = Arc::clone(object);
    let mut own = true;
    loop {
        if let Some((property, location)) = current.get_own_located(key) {
            return Some(Found {
                holder: current,
                property,
                own,
                location,
            });
        }
        current = current.prototype()?;
        own = false;
    }
}

/// `[[HasProperty]]`
pub fn has_property(object: &ObjectRef, key: &PropertyKey) -> bool {
    lookup(object, key).is_some()
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.read();
        f.debug_struct("JsObject")
            .field("class", &self.class_name())
            .field("shape", &data.shape.id())
            .field("elements", &data.elements.len())
            .finish()
    }
}
