//! Realm: intrinsic prototypes, the global object and object factories
//!
//! Everything the interpreter allocates goes through a realm so that new
//! objects start from the shared root shape and the right prototype.

use std::sync::Arc;

use lumen_vm_bytecode::{Code, ErrorCode};

use crate::context::VmContext;
use crate::environment::{EnvRef, Environment};
use crate::error::{VmError, VmResult};
use crate::function::{JsFunction, NativeFn, NativeFunction, NativeKind};
use crate::intrinsics;
use crate::object::{JsObject, ObjectClass, PropertyAttributes, PropertyDescriptor, PropertyKey};
use crate::shape::Shape;
use crate::string::JsString;
use crate::value::{ObjectRef, Value};

const ERROR_CODES: [ErrorCode; 5] = [
    ErrorCode::Error,
    ErrorCode::Type,
    ErrorCode::Reference,
    ErrorCode::Range,
    ErrorCode::Syntax,
];

fn error_slot(code: ErrorCode) -> usize {
    match code {
        ErrorCode::Error => 0,
        ErrorCode::Type => 1,
        ErrorCode::Reference => 2,
        ErrorCode::Range => 3,
        ErrorCode::Syntax => 4,
    }
}

fn error_name(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Error => "Error",
        ErrorCode::Type => "TypeError",
        ErrorCode::Reference => "ReferenceError",
        ErrorCode::Range => "RangeError",
        ErrorCode::Syntax => "SyntaxError",
    }
}

/// Intrinsic objects of one global environment
pub struct Realm {
    root_shape: Arc<Shape>,
    /// `Object.prototype`
    pub object_prototype: ObjectRef,
    /// `Function.prototype`
    pub function_prototype: ObjectRef,
    /// `Array.prototype`
    pub array_prototype: ObjectRef,
    /// `String.prototype`
    pub string_prototype: ObjectRef,
    /// `Number.prototype`
    pub number_prototype: ObjectRef,
    /// `Boolean.prototype`
    pub boolean_prototype: ObjectRef,
    error_prototypes: [ObjectRef; 5],
    /// The global object
    pub global: ObjectRef,
    /// Object environment over the global object
    pub global_env: EnvRef,
    /// The `eval` intrinsic
    pub eval_function: ObjectRef,
}

impl Realm {
    /// Create a realm with its intrinsics installed
    pub fn new() -> Self {
        let root_shape = Shape::root();
        let object_prototype = JsObject::new(ObjectClass::Ordinary, Arc::clone(&root_shape), None);
        let new_proto = |class| JsObject::new(class, Arc::clone(&root_shape), Some(object_prototype.clone()));

        let function_prototype = new_proto(ObjectClass::Function(JsFunction::Native(NativeFunction {
            name: JsString::empty(),
            arity: 0,
            kind: NativeKind::Normal,
            call: Arc::new(|_: &mut VmContext, _: &Value, _: &[Value]| Ok(Value::Undefined)),
        })));
        let array_prototype = new_proto(ObjectClass::Array);
        let string_prototype = new_proto(ObjectClass::String(JsString::empty()));
        let number_prototype = new_proto(ObjectClass::Number(0.0));
        let boolean_prototype = new_proto(ObjectClass::Boolean(false));

        let base_error = new_proto(ObjectClass::Ordinary);
        let error_prototypes = ERROR_CODES.map(|code| {
            if code == ErrorCode::Error {
                return base_error.clone();
            }
            JsObject::new(ObjectClass::Ordinary, Arc::clone(&root_shape), Some(base_error.clone()))
        });
        for code in ERROR_CODES {
            let proto = &error_prototypes[error_slot(code)];
            proto.define_own_property(
                PropertyKey::from("name"),
                PropertyDescriptor::data_with_attrs(Value::from(error_name(code)), PropertyAttributes::hidden()),
            );
            proto.define_own_property(
                PropertyKey::from("message"),
                PropertyDescriptor::data_with_attrs(Value::from(""), PropertyAttributes::hidden()),
            );
        }

        let global = new_proto(ObjectClass::Global);
        let global_env = Environment::object(global.clone(), None, false);

        let eval_function = JsObject::new(
            ObjectClass::Function(JsFunction::Native(NativeFunction {
                name: JsString::new("eval"),
                arity: 1,
                kind: NativeKind::Eval,
                call: Arc::new(intrinsics::global_eval),
            })),
            Arc::clone(&root_shape),
            Some(function_prototype.clone()),
        );

        let realm = Self {
            root_shape,
            object_prototype,
            function_prototype,
            array_prototype,
            string_prototype,
            number_prototype,
            boolean_prototype,
            error_prototypes,
            global,
            global_env,
            eval_function,
        };
        intrinsics::install(&realm);
        realm
    }

    /// Shape every new object starts with
    #[inline]
    pub fn root_shape(&self) -> &Arc<Shape> {
        &self.root_shape
    }

    /// Prototype for errors of `code`
    #[inline]
    pub fn error_prototype(&self, code: ErrorCode) -> &ObjectRef {
        &self.error_prototypes[error_slot(code)]
    }

    // ==================== Factories ====================

    /// Plain object inheriting from `Object.prototype`
    pub fn new_object(&self) -> ObjectRef {
        self.new_object_with_proto(Some(self.object_prototype.clone()))
    }

    /// Plain object with an explicit prototype
    pub fn new_object_with_proto(&self, prototype: Option<ObjectRef>) -> ObjectRef {
        JsObject::new(ObjectClass::Ordinary, Arc::clone(&self.root_shape), prototype)
    }

    /// Array of `length` holes
    pub fn new_array(&self, length: u32) -> ObjectRef {
        let array = JsObject::new(
            ObjectClass::Array,
            Arc::clone(&self.root_shape),
            Some(self.array_prototype.clone()),
        );
        array.set_array_length(length);
        array
    }

    /// Closure over `scope`, with its own `prototype` object
    pub fn new_function(&self, code: Arc<Code>, scope: EnvRef) -> ObjectRef {
        let length = code.param_count() as u32;
        let function = JsObject::new(
            ObjectClass::Function(JsFunction::Bytecode { code, scope }),
            Arc::clone(&self.root_shape),
            Some(self.function_prototype.clone()),
        );
        function.define_own_property(
            PropertyKey::from("length"),
            PropertyDescriptor::data_with_attrs(Value::from_u32(length), PropertyAttributes::frozen()),
        );

        let prototype = self.new_object();
        prototype.define_own_property(
            PropertyKey::from("constructor"),
            PropertyDescriptor::data_with_attrs(Value::Object(function.clone()), PropertyAttributes::hidden()),
        );
        function.define_own_property(
            PropertyKey::from("prototype"),
            PropertyDescriptor::data_with_attrs(
                Value::Object(prototype),
                PropertyAttributes::new(true, false, false),
            ),
        );
        function
    }

    /// Host function object
    pub fn new_native(&self, name: &str, arity: u32, call: NativeFn) -> ObjectRef {
        let function = JsObject::new(
            ObjectClass::Function(JsFunction::Native(NativeFunction {
                name: JsString::new(name),
                arity,
                kind: NativeKind::Normal,
                call,
            })),
            Arc::clone(&self.root_shape),
            Some(self.function_prototype.clone()),
        );
        function.define_own_property(
            PropertyKey::from("length"),
            PropertyDescriptor::data_with_attrs(Value::from_u32(arity), PropertyAttributes::frozen()),
        );
        function
    }

    /// Error instance of kind `code`
    pub fn new_error(&self, code: ErrorCode, message: &str) -> ObjectRef {
        let error = JsObject::new(
            ObjectClass::Error,
            Arc::clone(&self.root_shape),
            Some(self.error_prototype(code).clone()),
        );
        if !message.is_empty() {
            error.define_own_property(
                PropertyKey::from("message"),
                PropertyDescriptor::data_with_attrs(Value::from(message), PropertyAttributes::hidden()),
            );
        }
        error
    }

    /// Turn an error into the value a `catch` clause observes
    pub fn materialize(&self, error: VmError) -> Value {
        match error {
            VmError::Exception(thrown) => thrown.value,
            other => {
                let code = other.error_code().unwrap_or(ErrorCode::Error);
                Value::Object(self.new_error(code, &other.message()))
            }
        }
    }

    /// Prototype that property lookups on a primitive start from
    pub fn primitive_prototype(&self, value: &Value) -> Option<&ObjectRef> {
        match value {
            Value::String(_) => Some(&self.string_prototype),
            Value::Int32(_) | Value::Number(_) => Some(&self.number_prototype),
            Value::Boolean(_) => Some(&self.boolean_prototype),
            _ => None,
        }
    }

    /// ES ToObject
    pub fn to_object(&self, value: &Value) -> VmResult<ObjectRef> {
        let (class, prototype) = match value {
            Value::Object(obj) => return Ok(obj.clone()),
            Value::Undefined | Value::Null | Value::Empty => {
                return Err(VmError::type_error(format!(
                    "cannot convert {} to object",
                    value.describe()
                )));
            }
            Value::Cell(_) => return Err(VmError::internal("enumerator handle escaped to script")),
            Value::Boolean(b) => (ObjectClass::Boolean(*b), &self.boolean_prototype),
            Value::Int32(i) => (ObjectClass::Number(*i as f64), &self.number_prototype),
            Value::Number(n) => (ObjectClass::Number(*n), &self.number_prototype),
            Value::String(s) => (ObjectClass::String(s.clone()), &self.string_prototype),
        };
        Ok(JsObject::new(class, Arc::clone(&self.root_shape), Some(prototype.clone())))
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm").field("global", &self.global).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::lookup;

    #[test]
    fn test_error_prototype_chain() {
        let realm = Realm::new();
        let error = realm.new_error(ErrorCode::Type, "bad");
        assert_eq!(error.lookup_data(&"name".into()), Some(Value::from("TypeError")));
        assert_eq!(error.lookup_data(&"message".into()), Some(Value::from("bad")));
        let base = realm.error_prototype(ErrorCode::Error);
        let found = lookup(&error, &"toString".into()).unwrap();
        assert!(Arc::ptr_eq(&found.holder, base));
    }

    #[test]
    fn test_materialize() {
        let realm = Realm::new();
        let value = realm.materialize(VmError::range_error("too far"));
        assert_eq!(value.describe(), "RangeError: too far");

        let thrown = realm.materialize(VmError::exception(Value::Int32(7)));
        assert_eq!(thrown, Value::Int32(7));
    }

    #[test]
    fn test_function_prototype_property() {
        let realm = Realm::new();
        let code = Arc::new(Code::builder().param("a").build().unwrap());
        let function = realm.new_function(code, realm.global_env.clone());
        assert_eq!(function.lookup_data(&"length".into()), Some(Value::Int32(1)));
        let proto = function.lookup_data(&"prototype".into()).unwrap();
        let ctor = proto.as_object().unwrap().lookup_data(&"constructor".into()).unwrap();
        assert!(Arc::ptr_eq(ctor.as_object().unwrap(), &function));
    }

    #[test]
    fn test_to_object() {
        let realm = Realm::new();
        assert!(realm.to_object(&Value::Null).is_err());
        let wrapper = realm.to_object(&Value::from("ab")).unwrap();
        assert_eq!(wrapper.class_name(), "String");
        assert_eq!(wrapper.lookup_data(&"length".into()), Some(Value::Int32(2)));
    }
}
