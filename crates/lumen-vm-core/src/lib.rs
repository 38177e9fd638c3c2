//! # Lumen VM Core
//!
//! Execution engine for the Lumen ECMAScript register VM.
//!
//! ## Design Principles
//!
//! - **Register-based**: Every frame owns a window of one contiguous register stack
//! - **Hidden classes**: Objects share shapes so property sites can cache offsets
//! - **Table-driven unwinding**: Exceptions walk the code object's handler table
//! - **No parser**: Code objects come from the host; `eval` goes through a hook

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod conversion;
pub mod environment;
pub mod error;
pub mod eval;
pub mod frame;
pub mod function;
pub mod inline_cache;
pub mod interpreter;
mod intrinsics;
pub mod iterator;
pub mod object;
pub mod operation;
pub mod realm;
pub mod shape;
pub mod stack;
pub mod string;
pub mod value;

pub use config::VmConfig;
pub use context::VmContext;
pub use environment::{EnvRef, Environment};
pub use error::{ErrorKind, VmError, VmResult};
pub use eval::EvalCompiler;
pub use frame::Frame;
pub use function::{JsFunction, NativeFn};
pub use inline_cache::MegamorphicCache;
pub use interpreter::Interpreter;
pub use object::{JsObject, PropertyAttributes, PropertyDescriptor, PropertyKey};
pub use operation::PreferredType;
pub use realm::Realm;
pub use shape::{Shape, ShapeId};
pub use stack::RegisterStack;
pub use string::JsString;
pub use value::{ObjectRef, Value};
