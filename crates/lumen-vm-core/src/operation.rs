//! Abstract operations that may run script
//!
//! Type conversion, comparison, property access and binding resolution.
//! Anything here can call a user `valueOf`, `toString`, getter or setter,
//! so every operation takes the context and returns `VmResult`.

use std::sync::Arc;

use lumen_vm_bytecode::UpdateOp;

use crate::context::VmContext;
use crate::conversion::{string_to_number, to_uint32};
use crate::environment::{EnvRecord, EnvRef};
use crate::error::{VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::object::{
    PropertyAttributes, PropertyDescriptor, PropertyKey, WriteOutcome, has_property, lookup,
};
use crate::string::JsString;
use crate::value::{ObjectRef, Value};

/// Preferred type for ToPrimitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredType {
    /// No hint (treated as Number)
    Default,
    /// Number hint
    Number,
    /// String hint
    String,
}

impl Interpreter {
    // ==================== Type conversion ====================

    /// ES ToPrimitive
    pub fn to_primitive(&self, ctx: &mut VmContext, value: &Value, hint: PreferredType) -> VmResult<Value> {
        let Value::Object(obj) = value else {
            return Ok(value.clone());
        };
        let order: [&str; 2] = match hint {
            PreferredType::String => ["toString", "valueOf"],
            PreferredType::Default | PreferredType::Number => ["valueOf", "toString"],
        };
        for method in order {
            let function = self.get_from_object(ctx, obj, &PropertyKey::from(method), value)?;
            if function.is_callable() {
                let result = self.call_function(ctx, &function, value.clone(), &[])?;
                if result.is_primitive() {
                    return Ok(result);
                }
            }
        }
        Err(VmError::type_error("cannot convert object to primitive value"))
    }

    /// ES ToNumber
    pub fn to_number(&self, ctx: &mut VmContext, value: &Value) -> VmResult<f64> {
        if let Some(n) = value.primitive_to_number() {
            return Ok(n);
        }
        let primitive = self.to_primitive(ctx, value, PreferredType::Number)?;
        primitive
            .primitive_to_number()
            .ok_or_else(|| VmError::internal("ToPrimitive returned an object"))
    }

    /// ToNumber, keeping int32 values tagged
    #[inline]
    pub fn to_numeric(&self, ctx: &mut VmContext, value: &Value) -> VmResult<Value> {
        match value {
            Value::Int32(_) | Value::Number(_) => Ok(value.clone()),
            other => Ok(Value::number(self.to_number(ctx, other)?)),
        }
    }

    /// ES ToString
    pub fn to_js_string(&self, ctx: &mut VmContext, value: &Value) -> VmResult<JsString> {
        if let Some(s) = value.primitive_to_string() {
            return Ok(s);
        }
        let primitive = self.to_primitive(ctx, value, PreferredType::String)?;
        primitive
            .primitive_to_string()
            .ok_or_else(|| VmError::internal("ToPrimitive returned an object"))
    }

    /// ES ToObject
    pub fn to_object(&self, ctx: &VmContext, value: &Value) -> VmResult<ObjectRef> {
        ctx.realm().to_object(value)
    }

    /// ToString applied to a property name, canonicalising array indices
    pub fn to_property_key(&self, ctx: &mut VmContext, value: &Value) -> VmResult<PropertyKey> {
        match value {
            Value::Int32(i) if *i >= 0 => Ok(PropertyKey::Index(*i as u32)),
            Value::String(s) => Ok(PropertyKey::from_string(s.clone())),
            other => Ok(PropertyKey::from_string(self.to_js_string(ctx, other)?)),
        }
    }

    /// ES CheckObjectCoercible
    pub fn check_object_coercible(&self, value: &Value, key: &dyn std::fmt::Display) -> VmResult<()> {
        if value.is_null_or_undefined() {
            return Err(VmError::type_error(format!(
                "cannot access property '{key}' of {}",
                value.describe()
            )));
        }
        Ok(())
    }

    // ==================== Comparison ====================

    /// ES abstract equality (`==`)
    pub fn abstract_equals(&self, ctx: &mut VmContext, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        let mut x = lhs.clone();
        let mut y = rhs.clone();
        loop {
            let (next_x, next_y) = match (&x, &y) {
                (a, b) if a.is_number() && b.is_number() => return Ok(a.strict_equals(b)),
                (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => return Ok(true),
                (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => {
                    return Ok(false);
                }
                (Value::String(_), Value::String(_))
                | (Value::Boolean(_), Value::Boolean(_))
                | (Value::Object(_), Value::Object(_)) => return Ok(x.strict_equals(&y)),
                (Value::Boolean(b), other) => (Value::Int32(*b as i32), other.clone()),
                (other, Value::Boolean(b)) => (other.clone(), Value::Int32(*b as i32)),
                (Value::String(s), n) if n.is_number() => (Value::number(string_to_number(s.as_str())), n.clone()),
                (n, Value::String(s)) if n.is_number() => (n.clone(), Value::number(string_to_number(s.as_str()))),
                (Value::Object(_), Value::String(_) | Value::Int32(_) | Value::Number(_)) => {
                    (self.to_primitive(ctx, &x, PreferredType::Default)?, y.clone())
                }
                (Value::String(_) | Value::Int32(_) | Value::Number(_), Value::Object(_)) => {
                    (x.clone(), self.to_primitive(ctx, &y, PreferredType::Default)?)
                }
                _ => return Ok(x.strict_equals(&y)),
            };
            x = next_x;
            y = next_y;
        }
    }

    /// ES abstract relational comparison `x < y`; `None` when either side is NaN
    pub fn compare(
        &self,
        ctx: &mut VmContext,
        x: &Value,
        y: &Value,
        left_first: bool,
    ) -> VmResult<Option<bool>> {
        let (px, py) = if left_first {
            let px = self.to_primitive(ctx, x, PreferredType::Number)?;
            let py = self.to_primitive(ctx, y, PreferredType::Number)?;
            (px, py)
        } else {
            let py = self.to_primitive(ctx, y, PreferredType::Number)?;
            let px = self.to_primitive(ctx, x, PreferredType::Number)?;
            (px, py)
        };
        if let (Value::String(a), Value::String(b)) = (&px, &py) {
            return Ok(Some(a.cmp_utf16(b).is_lt()));
        }
        let nx = self.to_number(ctx, &px)?;
        let ny = self.to_number(ctx, &py)?;
        if nx.is_nan() || ny.is_nan() {
            return Ok(None);
        }
        Ok(Some(nx < ny))
    }

    /// Generic `+`: string concatenation when either primitive is a string
    pub fn add_values(&self, ctx: &mut VmContext, lhs: &Value, rhs: &Value) -> VmResult<Value> {
        let lp = self.to_primitive(ctx, lhs, PreferredType::Default)?;
        let rp = self.to_primitive(ctx, rhs, PreferredType::Default)?;
        if lp.is_string() || rp.is_string() {
            let l = self.to_js_string(ctx, &lp)?;
            let r = self.to_js_string(ctx, &rp)?;
            return Ok(Value::String(l.concat(&r)));
        }
        let l = self.to_number(ctx, &lp)?;
        let r = self.to_number(ctx, &rp)?;
        Ok(Value::number(l + r))
    }

    /// `lhs instanceof rhs`
    pub fn instance_of(&self, ctx: &mut VmContext, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        let Value::Object(constructor) = rhs else {
            return Err(VmError::type_error("instanceof requires object"));
        };
        if !constructor.is_callable() {
            return Err(VmError::type_error("instanceof requires constructor"));
        }
        let Value::Object(instance) = lhs else {
            return Ok(false);
        };
        let prototype = self.get_from_object(ctx, constructor, &PropertyKey::from("prototype"), rhs)?;
        let Value::Object(prototype) = prototype else {
            return Err(VmError::type_error("instanceof requires prototype object"));
        };
        let mut current = instance.prototype();
        while let Some(obj) = current {
            if Arc::ptr_eq(&obj, &prototype) {
                return Ok(true);
            }
            current = obj.prototype();
        }
        Ok(false)
    }

    /// `lhs in rhs`
    pub fn has_in(&self, ctx: &mut VmContext, lhs: &Value, rhs: &Value) -> VmResult<bool> {
        let Value::Object(obj) = rhs else {
            return Err(VmError::type_error("in requires object"));
        };
        let key = self.to_property_key(ctx, lhs)?;
        Ok(has_property(obj, &key))
    }

    /// Apply `++`/`--` to a value, returning `(expression result, new value)`
    pub fn update_value(&self, ctx: &mut VmContext, old: &Value, op: UpdateOp) -> VmResult<(Value, Value)> {
        if let Value::Int32(v) = old {
            if let Some(next) = v.checked_add(op.delta()) {
                let result = if op.is_postfix() { old.clone() } else { Value::Int32(next) };
                return Ok((result, Value::Int32(next)));
            }
        }
        let n = self.to_number(ctx, old)?;
        let next = Value::number(n + op.delta() as f64);
        let result = if op.is_postfix() { Value::number(n) } else { next.clone() };
        Ok((result, next))
    }

    // ==================== Property access ====================

    /// `base[key]`
    pub fn get_property(&self, ctx: &mut VmContext, base: &Value, key: &PropertyKey) -> VmResult<Value> {
        match base {
            Value::Object(obj) => self.get_from_object(ctx, obj, key, base),
            Value::String(s) => {
                if key.is_length() {
                    return Ok(Value::from_u32(s.len()));
                }
                if let Some(c) = key.as_index().and_then(|i| s.char_at(i)) {
                    return Ok(Value::String(c));
                }
                let proto = ctx.realm().string_prototype.clone();
                self.get_from_object(ctx, &proto, key, base)
            }
            Value::Int32(_) | Value::Number(_) | Value::Boolean(_) => {
                let proto = ctx
                    .realm()
                    .primitive_prototype(base)
                    .cloned()
                    .ok_or_else(|| VmError::internal("primitive without prototype"))?;
                self.get_from_object(ctx, &proto, key, base)
            }
            Value::Cell(_) => Err(VmError::internal("property access on enumerator handle")),
            Value::Undefined | Value::Null | Value::Empty => {
                self.check_object_coercible(base, key)?;
                Ok(Value::Undefined)
            }
        }
    }

    /// `[[Get]]` on an object with an explicit receiver for getters
    pub fn get_from_object(
        &self,
        ctx: &mut VmContext,
        obj: &ObjectRef,
        key: &PropertyKey,
        receiver: &Value,
    ) -> VmResult<Value> {
        match lookup(obj, key).map(|found| found.property) {
            None => Ok(Value::Undefined),
            Some(PropertyDescriptor::Data { value, .. }) => Ok(value),
            Some(PropertyDescriptor::Accessor { get: Some(getter), .. }) => {
                self.call_function(ctx, &Value::Object(getter), receiver.clone(), &[])
            }
            Some(PropertyDescriptor::Accessor { get: None, .. }) => Ok(Value::Undefined),
        }
    }

    /// `base[key] = value`
    ///
    /// Returns what happened to the receiver so store caches can learn from
    /// it. Setter calls and silent failures report `Rejected`.
    pub fn put_property(
        &self,
        ctx: &mut VmContext,
        base: &Value,
        key: PropertyKey,
        value: Value,
        strict: bool,
    ) -> VmResult<WriteOutcome> {
        let obj = match base {
            Value::Object(obj) => obj.clone(),
            Value::Undefined | Value::Null | Value::Empty => {
                self.check_object_coercible(base, &key)?;
                return Ok(WriteOutcome::Rejected);
            }
            primitive => {
                let wrapper = self.to_object(ctx, primitive)?;
                if let Some(found) = lookup(&wrapper, &key) {
                    if let PropertyDescriptor::Accessor { set: Some(setter), .. } = found.property {
                        self.call_function(ctx, &Value::Object(setter), base.clone(), &[value])?;
                        return Ok(WriteOutcome::Rejected);
                    }
                }
                if strict {
                    return Err(VmError::type_error(format!(
                        "cannot create property '{key}' on primitive {}",
                        primitive.describe()
                    )));
                }
                return Ok(WriteOutcome::Rejected);
            }
        };

        if obj.is_array() && key.is_length() {
            let n = self.to_number(ctx, &value)?;
            let length = to_uint32(n);
            if length as f64 != n {
                return Err(VmError::range_error("invalid array length"));
            }
            obj.set_array_length(length);
            return Ok(WriteOutcome::ReplacedElement);
        }

        match lookup(&obj, &key).map(|found| found.property) {
            Some(PropertyDescriptor::Accessor { set: Some(setter), .. }) => {
                self.call_function(ctx, &Value::Object(setter), base.clone(), &[value])?;
                return Ok(WriteOutcome::Rejected);
            }
            Some(PropertyDescriptor::Accessor { set: None, .. }) => {
                if strict {
                    return Err(VmError::type_error(format!(
                        "cannot set property '{key}' which has only a getter"
                    )));
                }
                return Ok(WriteOutcome::Rejected);
            }
            Some(PropertyDescriptor::Data { attributes, .. }) if !attributes.writable => {
                if strict {
                    return Err(VmError::type_error(format!(
                        "cannot assign to read only property '{key}'"
                    )));
                }
                return Ok(WriteOutcome::Rejected);
            }
            _ => {}
        }

        let outcome = obj.write(&key, value);
        if outcome == WriteOutcome::Rejected && strict {
            return Err(VmError::type_error(format!(
                "cannot add property '{key}', object is not extensible"
            )));
        }
        Ok(outcome)
    }

    /// `delete base[key]`
    pub fn delete_property(
        &self,
        ctx: &mut VmContext,
        base: &Value,
        key: &PropertyKey,
        strict: bool,
    ) -> VmResult<bool> {
        self.check_object_coercible(base, key)?;
        let obj = self.to_object(ctx, base)?;
        let deleted = obj.delete(key);
        if !deleted && strict {
            return Err(VmError::type_error(format!("cannot delete property '{key}'")));
        }
        Ok(deleted)
    }

    // ==================== Environments ====================

    /// Whether `env` itself binds `name`
    pub fn env_has_binding(&self, env: &EnvRef, name: &JsString) -> bool {
        match env.record() {
            EnvRecord::Declarative(record) => record.read().lookup(name).is_some(),
            EnvRecord::Object { object, .. } => has_property(object, &PropertyKey::from_string(name.clone())),
        }
    }

    /// Innermost environment binding `name`
    pub fn resolve_binding(&self, env: &EnvRef, name: &JsString) -> Option<EnvRef> {
        let mut current = Some(env);
        while let Some(e) = current {
            if self.env_has_binding(e, name) {
                return Some(Arc::clone(e));
            }
            current = e.outer();
        }
        None
    }

    /// GetBindingValue
    pub fn get_binding_value(
        &self,
        ctx: &mut VmContext,
        env: &EnvRef,
        name: &JsString,
        strict: bool,
    ) -> VmResult<Value> {
        match env.record() {
            EnvRecord::Declarative(record) => {
                let record = record.read();
                match record.lookup(name) {
                    Some(offset) => record.get(offset, name, strict),
                    None => Ok(Value::Undefined),
                }
            }
            EnvRecord::Object { object, .. } => {
                let key = PropertyKey::from_string(name.clone());
                if strict && !has_property(object, &key) {
                    return Err(VmError::reference_error(format!("{name} is not defined")));
                }
                let object = object.clone();
                self.get_from_object(ctx, &object, &key, &Value::Object(object.clone()))
            }
        }
    }

    /// SetMutableBinding
    pub fn set_mutable_binding(
        &self,
        ctx: &mut VmContext,
        env: &EnvRef,
        name: &JsString,
        value: Value,
        strict: bool,
    ) -> VmResult<()> {
        match env.record() {
            EnvRecord::Declarative(record) => {
                let mut record = record.write();
                match record.lookup(name) {
                    Some(offset) => record.set(offset, name, value, strict),
                    None => Ok(()),
                }
            }
            EnvRecord::Object { object, .. } => {
                let base = Value::Object(object.clone());
                self.put_property(ctx, &base, PropertyKey::from_string(name.clone()), value, strict)?;
                Ok(())
            }
        }
    }

    /// CreateMutableBinding
    pub fn create_mutable_binding(&self, env: &EnvRef, name: &JsString, deletable: bool) {
        match env.record() {
            EnvRecord::Declarative(record) => {
                record.write().create_mutable(name.clone(), deletable);
            }
            EnvRecord::Object { object, .. } => {
                object.define_own_property(
                    PropertyKey::from_string(name.clone()),
                    PropertyDescriptor::data_with_attrs(
                        Value::Undefined,
                        PropertyAttributes::new(true, true, deletable),
                    ),
                );
            }
        }
    }

    /// DeleteBinding
    pub fn delete_binding(&self, env: &EnvRef, name: &JsString) -> bool {
        match env.record() {
            EnvRecord::Declarative(record) => record.write().delete(name),
            EnvRecord::Object { object, .. } => object.delete(&PropertyKey::from_string(name.clone())),
        }
    }

    /// Identifier reference read
    pub fn load_name(&self, ctx: &mut VmContext, env: &EnvRef, name: &JsString, strict: bool) -> VmResult<Value> {
        match self.resolve_binding(env, name) {
            Some(target) => self.get_binding_value(ctx, &target, name, strict),
            None => Err(VmError::reference_error(format!("{name} is not defined"))),
        }
    }

    /// Identifier reference write; unresolvable sloppy writes create a global
    pub fn store_name(
        &self,
        ctx: &mut VmContext,
        env: &EnvRef,
        name: &JsString,
        value: Value,
        strict: bool,
    ) -> VmResult<()> {
        match self.resolve_binding(env, name) {
            Some(target) => self.set_mutable_binding(ctx, &target, name, value, strict),
            None if strict => Err(VmError::reference_error(format!("{name} is not defined"))),
            None => {
                let global = Value::Object(ctx.realm().global.clone());
                self.put_property(ctx, &global, PropertyKey::from_string(name.clone()), value, false)?;
                Ok(())
            }
        }
    }

    /// `delete name`
    pub fn delete_name(&self, env: &EnvRef, name: &JsString) -> bool {
        match self.resolve_binding(env, name) {
            Some(target) => self.delete_binding(&target, name),
            None => true,
        }
    }

    /// `typeof name`; unresolvable names are `"undefined"`
    pub fn typeof_name(&self, ctx: &mut VmContext, env: &EnvRef, name: &JsString, strict: bool) -> VmResult<Value> {
        match self.resolve_binding(env, name) {
            Some(target) => {
                let value = self.get_binding_value(ctx, &target, name, strict)?;
                Ok(Value::from(value.type_of()))
            }
            None => Ok(Value::from("undefined")),
        }
    }
}
