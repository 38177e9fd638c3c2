//! Built-in methods installed on every realm
//!
//! Only what the VM itself leans on: `ToPrimitive` needs `valueOf` and
//! `toString` everywhere, uncaught errors need `Error.prototype.toString`,
//! and `eval` needs a global binding. The rest of the standard library is
//! the embedder's business.

use std::sync::Arc;

use lumen_vm_bytecode::ErrorCode;

use crate::context::VmContext;
use crate::conversion::{number_to_string, to_integer, to_uint32};
use crate::environment::Environment;
use crate::error::{VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::object::{ObjectClass, PropertyAttributes, PropertyDescriptor, PropertyKey};
use crate::realm::Realm;
use crate::string::JsString;
use crate::value::{ObjectRef, Value};

type Method = fn(&mut VmContext, &Value, &[Value]) -> VmResult<Value>;

fn define_method(realm: &Realm, target: &ObjectRef, name: &str, arity: u32, method: Method) {
    let function = realm.new_native(name, arity, Arc::new(method));
    target.define_own_property(
        PropertyKey::from(name),
        PropertyDescriptor::data_with_attrs(Value::Object(function), PropertyAttributes::hidden()),
    );
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

/// Install the built-in methods and global bindings
pub(crate) fn install(realm: &Realm) {
    init_object_prototype(realm);
    init_error_prototype(realm);
    init_array_prototype(realm);
    init_string_prototype(realm);
    init_number_prototype(realm);
    init_boolean_prototype(realm);
    init_globals(realm);
}

// ====================================================================
// Object.prototype
// ====================================================================

fn init_object_prototype(realm: &Realm) {
    let proto = &realm.object_prototype;
    define_method(realm, proto, "toString", 0, object_to_string);
    define_method(realm, proto, "valueOf", 0, object_value_of);
    define_method(realm, proto, "hasOwnProperty", 1, object_has_own_property);
}

fn object_to_string(ctx: &mut VmContext, this: &Value, _args: &[Value]) -> VmResult<Value> {
    let tag = match this {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        other => ctx.realm().to_object(other)?.class_name(),
    };
    Ok(Value::String(JsString::from(format!("[object {tag}]"))))
}

fn object_value_of(ctx: &mut VmContext, this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::Object(ctx.realm().to_object(this)?))
}

fn object_has_own_property(ctx: &mut VmContext, this: &Value, args: &[Value]) -> VmResult<Value> {
    let key = Interpreter::new().to_property_key(ctx, &arg(args, 0))?;
    let object = ctx.realm().to_object(this)?;
    Ok(Value::Boolean(object.has_own_property(&key)))
}

// ====================================================================
// Error.prototype
// ====================================================================

fn init_error_prototype(realm: &Realm) {
    let proto = realm.error_prototype(ErrorCode::Error).clone();
    define_method(realm, &proto, "toString", 0, error_to_string);
}

fn error_to_string(ctx: &mut VmContext, this: &Value, _args: &[Value]) -> VmResult<Value> {
    let Value::Object(object) = this else {
        return Err(VmError::type_error("Error.prototype.toString called on non-object"));
    };
    let vm = Interpreter::new();
    let name = match vm.get_from_object(ctx, object, &PropertyKey::from("name"), this)? {
        Value::Undefined => JsString::new("Error"),
        other => vm.to_js_string(ctx, &other)?,
    };
    let message = match vm.get_from_object(ctx, object, &PropertyKey::from("message"), this)? {
        Value::Undefined => JsString::empty(),
        other => vm.to_js_string(ctx, &other)?,
    };
    let result = if name.is_empty() {
        message
    } else if message.is_empty() {
        name
    } else {
        name.concat(&JsString::new(": ")).concat(&message)
    };
    Ok(Value::String(result))
}

// ====================================================================
// Array.prototype
// ====================================================================

fn init_array_prototype(realm: &Realm) {
    define_method(realm, &realm.array_prototype, "toString", 0, array_to_string);
}

fn array_to_string(ctx: &mut VmContext, this: &Value, _args: &[Value]) -> VmResult<Value> {
    let vm = Interpreter::new();
    let object = ctx.realm().to_object(this)?;
    let receiver = Value::Object(object.clone());
    let length = vm.get_from_object(ctx, &object, &PropertyKey::from("length"), &receiver)?;
    let length = to_uint32(vm.to_number(ctx, &length)?);

    let mut out = String::new();
    for i in 0..length {
        if i > 0 {
            out.push(',');
        }
        let element = vm.get_from_object(ctx, &object, &PropertyKey::Index(i), &receiver)?;
        if !element.is_null_or_undefined() {
            out.push_str(vm.to_js_string(ctx, &element)?.as_str());
        }
    }
    Ok(Value::String(JsString::from(out)))
}

// ====================================================================
// String.prototype
// ====================================================================

fn init_string_prototype(realm: &Realm) {
    define_method(realm, &realm.string_prototype, "toString", 0, string_value_of);
    define_method(realm, &realm.string_prototype, "valueOf", 0, string_value_of);
}

fn string_value_of(_ctx: &mut VmContext, this: &Value, _args: &[Value]) -> VmResult<Value> {
    match this {
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Object(object) => match object.class() {
            ObjectClass::String(s) => Ok(Value::String(s.clone())),
            _ => Err(VmError::type_error("String.prototype.valueOf requires a string")),
        },
        _ => Err(VmError::type_error("String.prototype.valueOf requires a string")),
    }
}

// ====================================================================
// Number.prototype
// ====================================================================

fn init_number_prototype(realm: &Realm) {
    define_method(realm, &realm.number_prototype, "toString", 1, number_to_string_method);
    define_method(realm, &realm.number_prototype, "valueOf", 0, number_value_of);
}

fn this_number(this: &Value) -> VmResult<f64> {
    match this {
        Value::Int32(i) => Ok(*i as f64),
        Value::Number(n) => Ok(*n),
        Value::Object(object) => match object.class() {
            ObjectClass::Number(n) => Ok(*n),
            _ => Err(VmError::type_error("Number.prototype method requires a number")),
        },
        _ => Err(VmError::type_error("Number.prototype method requires a number")),
    }
}

fn number_value_of(_ctx: &mut VmContext, this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::number(this_number(this)?))
}

fn number_to_string_method(ctx: &mut VmContext, this: &Value, args: &[Value]) -> VmResult<Value> {
    let n = this_number(this)?;
    let radix = match arg(args, 0) {
        Value::Undefined => 10.0,
        other => to_integer(Interpreter::new().to_number(ctx, &other)?),
    };
    if !(2.0..=36.0).contains(&radix) {
        return Err(VmError::range_error("toString() radix must be between 2 and 36"));
    }
    let text = if radix == 10.0 || !n.is_finite() {
        number_to_string(n)
    } else {
        to_radix_string(n, radix as u32)
    };
    Ok(Value::String(JsString::from(text)))
}

/// Non-decimal rendering used by `Number.prototype.toString(radix)`
fn to_radix_string(n: f64, radix: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let negative = n < 0.0;
    let n = n.abs();
    let mut integer = n.trunc();
    let mut fraction = n - integer;

    let mut int_digits = Vec::new();
    loop {
        let digit = (integer % radix as f64) as usize;
        int_digits.push(DIGITS[digit]);
        integer = (integer / radix as f64).trunc();
        if integer < 1.0 {
            break;
        }
    }
    let mut out = String::with_capacity(int_digits.len() + 2);
    if negative {
        out.push('-');
    }
    out.extend(int_digits.iter().rev().map(|&d| d as char));

    if fraction > 0.0 {
        out.push('.');
        // 52 digits exhaust the mantissa for every radix >= 2
        for _ in 0..52 {
            fraction *= radix as f64;
            let digit = fraction.trunc() as usize;
            out.push(DIGITS[digit] as char);
            fraction -= digit as f64;
            if fraction <= 0.0 {
                break;
            }
        }
    }
    out
}

// ====================================================================
// Boolean.prototype
// ====================================================================

fn init_boolean_prototype(realm: &Realm) {
    define_method(realm, &realm.boolean_prototype, "toString", 0, boolean_to_string);
    define_method(realm, &realm.boolean_prototype, "valueOf", 0, boolean_value_of);
}

fn this_boolean(this: &Value) -> VmResult<bool> {
    match this {
        Value::Boolean(b) => Ok(*b),
        Value::Object(object) => match object.class() {
            ObjectClass::Boolean(b) => Ok(*b),
            _ => Err(VmError::type_error("Boolean.prototype method requires a boolean")),
        },
        _ => Err(VmError::type_error("Boolean.prototype method requires a boolean")),
    }
}

fn boolean_to_string(_ctx: &mut VmContext, this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::from(if this_boolean(this)? { "true" } else { "false" }))
}

fn boolean_value_of(_ctx: &mut VmContext, this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::Boolean(this_boolean(this)?))
}

// ====================================================================
// Globals
// ====================================================================

fn init_globals(realm: &Realm) {
    let global = &realm.global;
    for (name, value) in [
        ("undefined", Value::Undefined),
        ("NaN", Value::Number(f64::NAN)),
        ("Infinity", Value::Number(f64::INFINITY)),
    ] {
        global.define_own_property(
            PropertyKey::from(name),
            PropertyDescriptor::data_with_attrs(value, PropertyAttributes::frozen()),
        );
    }
    global.define_own_property(
        PropertyKey::from("eval"),
        PropertyDescriptor::data_with_attrs(Value::Object(realm.eval_function.clone()), PropertyAttributes::hidden()),
    );
}

/// `eval` reached through anything but a direct `Eval` instruction
///
/// Indirect eval always runs as global code.
pub(crate) fn global_eval(ctx: &mut VmContext, _this: &Value, args: &[Value]) -> VmResult<Value> {
    let Value::String(source) = arg(args, 0) else {
        return Ok(arg(args, 0));
    };
    let compiler = ctx
        .eval_compiler()
        .cloned()
        .ok_or_else(|| VmError::syntax_error("eval is not supported without a compiler"))?;
    let code = compiler.compile(source.as_str(), false)?;
    if code.is_empty() {
        return Ok(Value::Undefined);
    }

    let realm = Arc::clone(ctx.realm());
    let global_env = Arc::clone(&realm.global_env);
    let (variable_env, lexical_env) = if code.strict {
        let env = Environment::declarative(Some(global_env));
        (Arc::clone(&env), env)
    } else {
        (Arc::clone(&global_env), global_env)
    };
    ctx.stack
        .new_eval_frame(code, variable_env, lexical_env, Value::Object(realm.global.clone()))?;
    Interpreter::new().execute(ctx)
}
