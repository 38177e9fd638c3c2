//! Lexical environments
//!
//! Declarative environments hold bindings addressed by name or by slot
//! offset (the compiler's "heap" operands). Object environments expose an
//! object's properties as bindings, for the global scope and `with`.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{VmError, VmResult};
use crate::string::JsString;
use crate::value::{ObjectRef, Value};

/// Shared environment reference
pub type EnvRef = Arc<Environment>;

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    mutable: bool,
    deletable: bool,
    initialized: bool,
}

/// Bindings of a declarative environment
#[derive(Debug, Default)]
pub struct DeclarativeRecord {
    names: FxHashMap<JsString, u32>,
    bindings: Vec<Binding>,
}

impl DeclarativeRecord {
    /// Slot of a binding
    #[inline]
    pub fn lookup(&self, name: &JsString) -> Option<u32> {
        self.names.get(name).copied()
    }

    /// Number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether there are no slots
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn push(&mut self, name: JsString, binding: Binding) -> u32 {
        let offset = self.bindings.len() as u32;
        self.bindings.push(binding);
        self.names.insert(name, offset);
        offset
    }

    /// CreateMutableBinding, initialised to `undefined`
    pub fn create_mutable(&mut self, name: JsString, deletable: bool) -> u32 {
        if let Some(offset) = self.lookup(&name) {
            return offset;
        }
        self.push(
            name,
            Binding {
                value: Value::Undefined,
                mutable: true,
                deletable,
                initialized: true,
            },
        )
    }

    /// CreateImmutableBinding, uninitialised until [`Self::initialize`]
    pub fn create_immutable(&mut self, name: JsString) -> u32 {
        if let Some(offset) = self.lookup(&name) {
            return offset;
        }
        self.push(
            name,
            Binding {
                value: Value::Undefined,
                mutable: false,
                deletable: false,
                initialized: false,
            },
        )
    }

    /// InitializeImmutableBinding
    pub fn initialize(&mut self, offset: u32, value: Value) {
        if let Some(binding) = self.bindings.get_mut(offset as usize) {
            binding.value = value;
            binding.initialized = true;
        }
    }

    /// GetBindingValue by slot
    pub fn get(&self, offset: u32, name: &JsString, strict: bool) -> VmResult<Value> {
        let binding = self
            .bindings
            .get(offset as usize)
            .ok_or_else(|| VmError::internal(format!("binding slot {offset} out of range")))?;
        if !binding.initialized {
            if strict {
                return Err(VmError::reference_error(format!(
                    "\"{name}\" accessed before initialization"
                )));
            }
            return Ok(Value::Undefined);
        }
        Ok(binding.value.clone())
    }

    /// SetMutableBinding by slot
    pub fn set(&mut self, offset: u32, name: &JsString, value: Value, strict: bool) -> VmResult<()> {
        let binding = self
            .bindings
            .get_mut(offset as usize)
            .ok_or_else(|| VmError::internal(format!("binding slot {offset} out of range")))?;
        if binding.mutable {
            binding.value = value;
        } else if strict {
            return Err(VmError::type_error(format!(
                "mutating immutable binding \"{name}\" not allowed"
            )));
        }
        Ok(())
    }

    /// DeleteBinding: `false` for non-deletable bindings, `true` when absent
    pub fn delete(&mut self, name: &JsString) -> bool {
        match self.lookup(name) {
            None => true,
            Some(offset) => {
                if !self.bindings[offset as usize].deletable {
                    return false;
                }
                // Slot stays allocated so heap offsets remain stable.
                self.names.remove(name);
                true
            }
        }
    }
}

/// Environment record kinds
#[derive(Debug)]
pub enum EnvRecord {
    /// Function scopes, catch scopes, strict eval scopes
    Declarative(RwLock<DeclarativeRecord>),
    /// Global scope and `with`
    Object {
        /// Binding object
        object: ObjectRef,
        /// `with` environments supply the object as implicit `this`
        provide_this: bool,
    },
}

/// A lexical environment: a record and its outer link
#[derive(Debug)]
pub struct Environment {
    outer: Option<EnvRef>,
    record: EnvRecord,
}

impl Environment {
    /// Empty declarative environment
    pub fn declarative(outer: Option<EnvRef>) -> EnvRef {
        Arc::new(Self {
            outer,
            record: EnvRecord::Declarative(RwLock::new(DeclarativeRecord::default())),
        })
    }

    /// Declarative environment whose slot `i` is bound to `names[i]`
    ///
    /// Slots below `mutable_start` are immutable and start uninitialised.
    pub fn with_layout(
        outer: Option<EnvRef>,
        names: impl IntoIterator<Item = JsString>,
        mutable_start: u32,
    ) -> EnvRef {
        let mut record = DeclarativeRecord::default();
        for (i, name) in names.into_iter().enumerate() {
            let binding = Binding {
                value: Value::Undefined,
                mutable: i as u32 >= mutable_start,
                deletable: false,
                initialized: i as u32 >= mutable_start,
            };
            // Duplicate names keep distinct slots; the last one wins by name.
            let offset = record.bindings.len() as u32;
            record.bindings.push(binding);
            record.names.insert(name, offset);
        }
        Arc::new(Self {
            outer,
            record: EnvRecord::Declarative(RwLock::new(record)),
        })
    }

    /// Catch scope with a single mutable binding
    pub fn catch_scope(outer: Option<EnvRef>, name: JsString, value: Value) -> EnvRef {
        let mut record = DeclarativeRecord::default();
        let offset = record.create_mutable(name, false);
        record.bindings[offset as usize].value = value;
        Arc::new(Self {
            outer,
            record: EnvRecord::Declarative(RwLock::new(record)),
        })
    }

    /// Object environment
    pub fn object(object: ObjectRef, outer: Option<EnvRef>, provide_this: bool) -> EnvRef {
        Arc::new(Self {
            outer,
            record: EnvRecord::Object {
                object,
                provide_this,
            },
        })
    }

    /// Enclosing environment
    #[inline]
    pub fn outer(&self) -> Option<&EnvRef> {
        self.outer.as_ref()
    }

    /// Record
    #[inline]
    pub fn record(&self) -> &EnvRecord {
        &self.record
    }

    /// Declarative bindings, if this is a declarative environment
    #[inline]
    pub fn declarative_record(&self) -> Option<&RwLock<DeclarativeRecord>> {
        match &self.record {
            EnvRecord::Declarative(record) => Some(record),
            EnvRecord::Object { .. } => None,
        }
    }

    /// Binding object, if this is an object environment
    #[inline]
    pub fn binding_object(&self) -> Option<&ObjectRef> {
        match &self.record {
            EnvRecord::Object { object, .. } => Some(object),
            EnvRecord::Declarative(_) => None,
        }
    }

    /// ImplicitThisValue
    pub fn implicit_this(&self) -> Value {
        match &self.record {
            EnvRecord::Object {
                object,
                provide_this: true,
            } => Value::Object(Arc::clone(object)),
            _ => Value::Undefined,
        }
    }
}

/// Walk `nest` outer links from `env`
pub fn nth_outer(env: &EnvRef, nest: u32) -> VmResult<&EnvRef> {
    let mut current = env;
    for _ in 0..nest {
        current = current
            .outer()
            .ok_or_else(|| VmError::internal(format!("environment nest {nest} too deep")))?;
    }
    Ok(current)
}
