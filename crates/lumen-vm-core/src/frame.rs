//! Call frames

use std::sync::Arc;

use lumen_vm_bytecode::{Code, Register};

use crate::environment::EnvRef;
use crate::value::ObjectRef;

/// A call stack frame
///
/// The frame's registers live in the shared register arena starting at
/// `base`. Arguments beyond the formal parameters are kept after the
/// register window so `arguments` can still see them.
#[derive(Debug)]
pub struct Frame {
    /// Code being executed
    pub code: Arc<Code>,
    /// Function object being executed, `None` for global and eval code
    pub callee: Option<ObjectRef>,
    /// Arena index of register 0 (`this`)
    pub base: usize,
    /// Registers in the window
    pub register_count: usize,
    /// Actual argument count
    pub argc: usize,
    /// Arena index of the first argument past the formal parameters
    pub extra_base: usize,
    /// Number of arguments past the formal parameters
    pub extra_count: usize,
    /// Variable environment (`var` declarations land here)
    pub variable_env: EnvRef,
    /// Current lexical environment
    pub lexical_env: EnvRef,
    /// Resume address in the caller; `None` when a host or native called in
    pub prev_pc: Option<usize>,
    /// Caller register receiving the result
    pub return_register: Option<Register>,
    /// Invoked through `new`
    pub constructor_call: bool,
    /// Eval frames do not count toward the call depth limit
    pub is_eval: bool,
    /// Arena top to restore when the frame is unwound
    pub restore_top: usize,
}

impl Frame {
    /// Arena index of a register
    #[inline]
    pub fn slot(&self, register: Register) -> usize {
        self.base + register.index() as usize
    }

    /// Arena index of actual argument `i`, if it was passed
    pub fn argument_slot(&self, i: usize) -> Option<usize> {
        if i >= self.argc {
            return None;
        }
        let params = self.code.param_count();
        if i < params {
            Some(self.base + 1 + i)
        } else {
            Some(self.extra_base + (i - params))
        }
    }

    /// Whether the frame was entered from host code or a native
    #[inline]
    pub fn is_entry(&self) -> bool {
        self.prev_pc.is_none()
    }
}
