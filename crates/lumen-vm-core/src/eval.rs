//! Host hook for `eval`
//!
//! The VM has no parser. Hosts that want `eval` to work install a compiler
//! that turns source text into a code object.

use std::sync::Arc;

use lumen_vm_bytecode::Code;

use crate::error::VmResult;

/// Compiles eval source text
pub trait EvalCompiler: Send + Sync {
    /// Compile `source` as eval code
    ///
    /// `strict` is the strictness of the calling code; a direct eval inherits
    /// it. Syntax problems should be reported as `VmError::SyntaxError`.
    fn compile(&self, source: &str, strict: bool) -> VmResult<Arc<Code>>;
}
