//! Function payloads

use std::fmt;
use std::sync::Arc;

use lumen_vm_bytecode::Code;

use crate::context::VmContext;
use crate::environment::EnvRef;
use crate::error::VmResult;
use crate::string::JsString;
use crate::value::Value;

/// Native function signature: `(context, this, arguments)`
pub type NativeFn = Arc<dyn Fn(&mut VmContext, &Value, &[Value]) -> VmResult<Value> + Send + Sync>;

/// Special treatment a native needs from the `Eval` instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    /// Ordinary native
    Normal,
    /// The realm's `eval`; a direct call evaluates in the caller's scope
    Eval,
}

/// A host-implemented function
#[derive(Clone)]
pub struct NativeFunction {
    /// Function name
    pub name: JsString,
    /// Declared parameter count (`length`)
    pub arity: u32,
    /// Dispatch kind
    pub kind: NativeKind,
    /// Implementation
    pub call: NativeFn,
}

/// What a function object runs when called
#[derive(Clone)]
pub enum JsFunction {
    /// Compiled code closed over its defining scope
    Bytecode {
        /// Function body
        code: Arc<Code>,
        /// Lexical environment at closure creation
        scope: EnvRef,
    },
    /// Host function
    Native(NativeFunction),
}

impl JsFunction {
    /// Function name for diagnostics
    pub fn name(&self) -> &str {
        match self {
            Self::Bytecode { code, .. } => code.display_name(),
            Self::Native(native) => native.name.as_str(),
        }
    }

    /// Whether this is the realm's `eval`
    #[inline]
    pub fn is_eval(&self) -> bool {
        matches!(self, Self::Native(n) if n.kind == NativeKind::Eval)
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytecode { code, .. } => write!(f, "function {}", code.display_name()),
            Self::Native(native) => write!(f, "native function {}", native.name),
        }
    }
}
