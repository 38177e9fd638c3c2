//! JavaScript values
//!
//! `Value` is a tagged enum. Numbers that are exactly representable as a
//! 32-bit integer (other than `-0`) are kept in the `Int32` variant so the
//! interpreter's integer fast paths apply; [`Value::number`] performs that
//! normalisation.

use std::fmt;
use std::sync::Arc;

use crate::conversion::{number_to_string, string_to_number};
use crate::iterator::CellRef;
use crate::object::{JsObject, ObjectClass, PropertyKey};
use crate::string::JsString;

/// Shared reference to a heap object
pub type ObjectRef = Arc<JsObject>;

/// A JavaScript value
#[derive(Clone, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer fast-path number
    Int32(i32),
    /// Any other number
    Number(f64),
    /// String
    String(JsString),
    /// Object
    Object(ObjectRef),
    /// Sentinel for "no value yet"
    Empty,
    /// Handle to a for-in enumerator owned by the context
    Cell(CellRef),
}

impl Value {
    /// Number value, normalised to `Int32` when exactly representable
    #[inline]
    pub fn number(n: f64) -> Self {
        let i = n as i32;
        if i as f64 == n && !(i == 0 && n.is_sign_negative()) {
            Value::Int32(i)
        } else {
            Value::Number(n)
        }
    }

    /// Number value from an unsigned integer
    #[inline]
    pub fn from_u32(n: u32) -> Self {
        if n <= i32::MAX as u32 {
            Value::Int32(n as i32)
        } else {
            Value::Number(n as f64)
        }
    }

    /// Wrap a string
    #[inline]
    pub fn string(s: impl Into<JsString>) -> Self {
        Value::String(s.into())
    }

    // ==================== Predicates ====================

    /// Is `undefined`
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Is `null`
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Is `null` or `undefined`
    #[inline]
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// Is tagged int32
    #[inline]
    pub fn is_int32(&self) -> bool {
        matches!(self, Value::Int32(_))
    }

    /// Is any number
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int32(_) | Value::Number(_))
    }

    /// Is a string
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Is a boolean
    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    /// Is an object
    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Is a language primitive
    #[inline]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Undefined
                | Value::Null
                | Value::Boolean(_)
                | Value::Int32(_)
                | Value::Number(_)
                | Value::String(_)
        )
    }

    /// Is the empty sentinel
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Is an enumerator handle
    #[inline]
    pub fn is_cell(&self) -> bool {
        matches!(self, Value::Cell(_))
    }

    /// Is a callable object
    #[inline]
    pub fn is_callable(&self) -> bool {
        self.as_object().is_some_and(|o| o.is_callable())
    }

    // ==================== Accessors ====================

    /// Get as int32 if tagged int32
    #[inline]
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Value::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if a number
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int32(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as boolean
    #[inline]
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as string
    #[inline]
    pub fn as_string(&self) -> Option<&JsString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as object
    #[inline]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get as enumerator handle
    #[inline]
    pub fn as_cell(&self) -> Option<CellRef> {
        match self {
            Value::Cell(c) => Some(*c),
            _ => None,
        }
    }

    // ==================== Pure conversions ====================

    /// ES ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null | Value::Empty => false,
            Value::Boolean(b) => *b,
            Value::Int32(i) => *i != 0,
            Value::Number(n) => !(n.is_nan() || *n == 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Cell(_) => true,
        }
    }

    /// ES typeof
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined | Value::Empty => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Int32(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(o) if o.is_callable() => "function",
            Value::Object(_) | Value::Cell(_) => "object",
        }
    }

    /// ToNumber for primitives; `None` for objects
    pub fn primitive_to_number(&self) -> Option<f64> {
        Some(match self {
            Value::Undefined | Value::Empty => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(b) => *b as i32 as f64,
            Value::Int32(i) => *i as f64,
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s.as_str()),
            Value::Object(_) | Value::Cell(_) => return None,
        })
    }

    /// ToString for primitives; `None` for objects
    pub fn primitive_to_string(&self) -> Option<JsString> {
        Some(match self {
            Value::Undefined | Value::Empty => JsString::new("undefined"),
            Value::Null => JsString::new("null"),
            Value::Boolean(true) => JsString::new("true"),
            Value::Boolean(false) => JsString::new("false"),
            Value::Int32(i) => JsString::new(itoa::Buffer::new().format(*i)),
            Value::Number(n) => JsString::from(number_to_string(*n)),
            Value::String(s) => s.clone(),
            Value::Object(_) | Value::Cell(_) => return None,
        })
    }

    /// ES strict equality (`===`)
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.as_number() == b.as_number(),
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Empty, Value::Empty) => true,
            (Value::Cell(a), Value::Cell(b)) => a == b,
            _ => false,
        }
    }

    /// ES SameValue: like `===` but NaN equals NaN and `0` differs from `-0`
    pub fn same_value(&self, other: &Value) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b && a.is_sign_negative() == b.is_sign_negative()
                }
            }
            _ => self.strict_equals(other),
        }
    }

    /// Best-effort description that never runs script, for error messages
    pub fn describe(&self) -> String {
        match self {
            Value::Object(obj) => {
                if matches!(obj.class(), ObjectClass::Error) {
                    let field = |key: &str| {
                        obj.lookup_data(&PropertyKey::from(key))
                            .and_then(|v| v.primitive_to_string())
                            .map(|s| s.to_string())
                            .unwrap_or_default()
                    };
                    let name = field("name");
                    let message = field("message");
                    match (name.is_empty(), message.is_empty()) {
                        (_, true) => name,
                        (true, false) => message,
                        (false, false) => format!("{name}: {message}"),
                    }
                } else {
                    format!("[object {}]", obj.class_name())
                }
            }
            Value::Cell(_) => "[enumerator]".to_string(),
            other => other
                .primitive_to_string()
                .map(|s| s.to_string())
                .unwrap_or_default(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int32(i) => write!(f, "{i}"),
            Value::Number(n) => write!(f, "{n:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(o) => write!(f, "[object {}]", o.class_name()),
            Value::Empty => write!(f, "<empty>"),
            Value::Cell(c) => write!(f, "<cell {}:{}>", c.index, c.generation),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(JsString::new(s))
    }
}

impl From<JsString> for Value {
    fn from(s: JsString) -> Self {
        Value::String(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}
