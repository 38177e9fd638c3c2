//! # Lumen VM Bytecode
//!
//! This crate defines the bytecode format for the Lumen ECMAScript register VM.
//!
//! ## Design Principles
//!
//! - **Register-based**: Operations work on frame-relative registers, not a stack
//! - **Fixed-size instructions**: One enum value per instruction, indexed by pc
//! - **Out-of-line feedback**: Inline cache states live beside the stream
//! - **Serializable**: Scripts can be cached to disk and revalidated on load

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod code;
pub mod constant;
pub mod error;
pub mod exception;
pub mod instruction;
pub mod name;
pub mod operand;
pub mod script;

pub use code::{CacheState, Code, CodeBuilder, CodeKind, EnvLayout};
pub use constant::{Constant, ConstantPool};
pub use error::BytecodeError;
pub use exception::{ExceptionTable, Handler, HandlerId, HandlerKind};
pub use instruction::{Completion, ErrorCode, Instruction, Opcode, Operand, UpdateOp};
pub use name::Name;
pub use operand::{CacheSlot, CodeIndex, ConstantIndex, JumpOffset, NameIndex, Register};
pub use script::Script;

/// Bytecode format version
pub const BYTECODE_VERSION: u32 = 1;

/// Magic bytes for bytecode files
pub const BYTECODE_MAGIC: [u8; 8] = *b"LUMENBC\0";
