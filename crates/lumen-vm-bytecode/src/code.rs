//! Code objects
//!
//! A [`Code`] is the compiled form of one function, global script or eval
//! body. It is immutable once built, apart from its inline cache feedback
//! vector, which the interpreter updates as property sites observe shapes.

use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constant::{Constant, ConstantPool};
use crate::error::{BytecodeError, Result};
use crate::exception::{ExceptionTable, Handler, HandlerId};
use crate::instruction::{Instruction, Operand};
use crate::name::Name;
use crate::operand::{CacheSlot, CodeIndex, ConstantIndex, NameIndex};

/// What kind of body a code object holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CodeKind {
    /// Function body
    #[default]
    Function,
    /// Global script
    Global,
    /// Eval body
    Eval,
}

/// Declarative environment created for every invocation
///
/// Binding `i` is named `names[first + i]`. Bindings below `mutable_start`
/// are immutable and start uninitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvLayout {
    /// First binding name in the name table
    pub first: NameIndex,
    /// Number of bindings
    pub size: u32,
    /// Index of the first mutable binding
    pub mutable_start: u32,
}

/// State of one inline cache site
///
/// The variant plays the role of the rewritten opcode: `Monomorphic` is the
/// own-property fast form, `Megamorphic` the shared-table form and `Uncached`
/// the generic form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheState {
    /// Never executed
    #[default]
    Uninitialized,
    /// One shape seen
    Monomorphic {
        /// Cached shape identifier
        shape: u64,
        /// Slot offset in objects of that shape
        offset: u32,
    },
    /// Several shapes seen; the inline words hold the most recent one
    Megamorphic {
        /// Most recent shape identifier
        shape: u64,
        /// Slot offset in objects of that shape
        offset: u32,
    },
    /// Terminal generic state
    Uncached,
}

impl CacheState {
    /// Cached `(shape, offset)` pair, if any
    #[inline]
    pub fn cached(self) -> Option<(u64, u32)> {
        match self {
            Self::Monomorphic { shape, offset } | Self::Megamorphic { shape, offset } => {
                Some((shape, offset))
            }
            _ => None,
        }
    }

    /// Name used by the disassembler for the specialized opcode form
    pub const fn form(self) -> &'static str {
        match self {
            Self::Uninitialized => "",
            Self::Monomorphic { .. } => "Own",
            Self::Megamorphic { .. } => "Megamorphic",
            Self::Uncached => "Generic",
        }
    }
}

/// Compiled code object
#[derive(Debug, Serialize, Deserialize)]
pub struct Code {
    /// Function name, if any
    pub name: Option<Name>,
    /// Body kind
    pub kind: CodeKind,
    /// Strict mode
    pub strict: bool,
    /// Formal parameter names
    pub params: Vec<Name>,
    /// Registers in a frame window, including `this` and the parameters
    pub register_count: u16,
    /// Instruction stream
    pub instructions: Vec<Instruction>,
    /// Constant pool
    pub constants: ConstantPool,
    /// Name table
    pub names: Vec<Name>,
    /// Nested code objects (function literals)
    pub codes: Vec<Arc<Code>>,
    /// Exception table
    pub exception_table: ExceptionTable,
    /// Per-invocation declarative environment
    pub env: Option<EnvLayout>,
    /// Number of inline cache sites
    pub cache_slots: u32,
    #[serde(skip)]
    feedback: RwLock<Vec<CacheState>>,
}

impl Clone for Code {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            strict: self.strict,
            params: self.params.clone(),
            register_count: self.register_count,
            instructions: self.instructions.clone(),
            constants: self.constants.clone(),
            names: self.names.clone(),
            codes: self.codes.clone(),
            exception_table: self.exception_table.clone(),
            env: self.env,
            cache_slots: self.cache_slots,
            feedback: RwLock::new(self.feedback.read().clone()),
        }
    }
}

impl Code {
    /// Create a new code builder
    pub fn builder() -> CodeBuilder {
        CodeBuilder::new()
    }

    /// Get the function name or `<anonymous>`
    pub fn display_name(&self) -> &str {
        self.name.as_ref().map_or("<anonymous>", Name::as_str)
    }

    /// Number of formal parameters
    #[inline]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// No instructions at all; calls complete with `undefined`
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Fetch an instruction
    #[inline]
    pub fn instruction(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    /// Name table entry
    #[inline]
    pub fn name(&self, index: NameIndex) -> Option<&Name> {
        self.names.get(index.0 as usize)
    }

    /// Nested code entry
    #[inline]
    pub fn code(&self, index: CodeIndex) -> Option<&Arc<Code>> {
        self.codes.get(index.0 as usize)
    }

    /// Current state of a cache site
    #[inline]
    pub fn cache_state(&self, slot: CacheSlot) -> CacheState {
        self.feedback
            .read()
            .get(slot.0 as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Replace the state of a cache site
    pub fn set_cache_state(&self, slot: CacheSlot, state: CacheState) {
        let idx = slot.0 as usize;
        let mut feedback = self.feedback.write();
        if idx >= feedback.len() {
            if idx >= self.cache_slots as usize {
                return;
            }
            feedback.resize(self.cache_slots as usize, CacheState::Uninitialized);
        }
        feedback[idx] = state;
    }

    /// Reset every cache site to `Uninitialized`
    pub fn reset_feedback(&self) {
        self.feedback.write().fill(CacheState::Uninitialized);
    }

    /// Check every operand against this code object, recursively
    pub fn validate(&self) -> Result<()> {
        let len = self.instructions.len();
        let params = self.params.len();
        if (self.register_count as usize) < params + 1 {
            return Err(BytecodeError::InvalidOperand {
                pc: 0,
                reason: format!(
                    "register count {} cannot hold this and {params} parameters",
                    self.register_count
                ),
            });
        }

        let bad = |pc: usize, reason: String| BytecodeError::InvalidOperand { pc, reason };
        for (pc, instruction) in self.instructions.iter().enumerate() {
            for operand in instruction.operands() {
                match operand {
                    Operand::Reg(r) if r.0 >= self.register_count => {
                        return Err(bad(pc, format!("register {r} out of range")));
                    }
                    Operand::Regs(r, n) if r.0 as usize + n as usize > self.register_count as usize => {
                        return Err(bad(pc, format!("register block {r}..+{n} out of range")));
                    }
                    Operand::Const(ConstantIndex(c)) if c as usize >= self.constants.len() => {
                        return Err(bad(pc, format!("constant {c} out of range")));
                    }
                    Operand::Name(NameIndex(n)) if n as usize >= self.names.len() => {
                        return Err(bad(pc, format!("name {n} out of range")));
                    }
                    Operand::Code(CodeIndex(c)) if c as usize >= self.codes.len() => {
                        return Err(bad(pc, format!("code {c} out of range")));
                    }
                    Operand::Cache(CacheSlot(c)) if c >= self.cache_slots => {
                        return Err(bad(pc, format!("cache slot {c} out of range")));
                    }
                    Operand::Jump(offset) => match offset.target(pc) {
                        Some(target) if target < len => {}
                        _ => return Err(bad(pc, format!("jump {:+} leaves the code", offset.0))),
                    },
                    _ => {}
                }
            }
        }

        for handler in self.exception_table.handlers() {
            if handler.end as usize > len || handler.handler_pc as usize > len {
                return Err(BytecodeError::InvalidExceptionTable(format!(
                    "entry {}..{} points outside the code",
                    handler.begin, handler.end
                )));
            }
            for r in [handler.ret, handler.jmp, handler.flag] {
                if r.0 >= self.register_count {
                    return Err(BytecodeError::InvalidExceptionTable(format!(
                        "entry {}..{} uses register {r} out of range",
                        handler.begin, handler.end
                    )));
                }
            }
        }
        // Deserialized tables skip the nesting checks in `ExceptionTable::new`.
        ExceptionTable::new(self.exception_table.handlers().to_vec())?;

        if let Some(layout) = self.env {
            let end = layout.first.0 as usize + layout.size as usize;
            if end > self.names.len() || layout.mutable_start > layout.size {
                return Err(BytecodeError::InvalidOperand {
                    pc: 0,
                    reason: "environment layout out of range".to_string(),
                });
            }
        }

        self.codes.iter().try_for_each(|code| code.validate())
    }

    /// Human-readable listing of this code object and its children
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, 0);
        out
    }

    fn disassemble_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(
            out,
            "{indent}[code] {} ({:?}{}) params={} registers={}",
            self.display_name(),
            self.kind,
            if self.strict { ", strict" } else { "" },
            self.params.len(),
            self.register_count,
        );
        for (pc, instruction) in self.instructions.iter().enumerate() {
            let _ = write!(out, "{indent}{pc:05}: {instruction}");
            let feedback = instruction.operands().into_iter().find_map(|op| match op {
                Operand::Cache(slot) => Some(self.cache_state(slot)),
                _ => None,
            });
            if let Some(state) = feedback.filter(|s| !s.form().is_empty()) {
                let _ = write!(out, " [{}]", state.form());
            }
            for operand in instruction.operands() {
                match operand {
                    Operand::Name(n) => {
                        if let Some(name) = self.name(n) {
                            let _ = write!(out, " ; {name}");
                        }
                    }
                    Operand::Const(c) => {
                        if let Some(constant) = self.constants.get(c) {
                            let _ = write!(out, " ; {constant}");
                        }
                    }
                    Operand::Jump(j) => {
                        if let Some(target) = j.target(pc) {
                            let _ = write!(out, " ; -> {target}");
                        }
                    }
                    _ => {}
                }
            }
            out.push('\n');
        }
        for handler in self.exception_table.handlers() {
            let _ = writeln!(
                out,
                "{indent}  handler {:?} [{}, {}) -> {}",
                handler.kind, handler.begin, handler.end, handler.handler_pc
            );
        }
        for code in &self.codes {
            code.disassemble_into(out, depth + 1);
        }
    }
}

/// Builder for creating code objects
#[derive(Debug, Default)]
pub struct CodeBuilder {
    name: Option<Name>,
    kind: CodeKind,
    strict: bool,
    params: Vec<Name>,
    register_count: u16,
    instructions: Vec<Instruction>,
    constants: ConstantPool,
    names: Vec<Name>,
    codes: Vec<Arc<Code>>,
    handlers: Vec<Handler>,
    env: Option<EnvLayout>,
    cache_slots: u32,
}

impl CodeBuilder {
    /// Create a new code builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set function name
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(Name::new(name));
        self
    }

    /// Set body kind
    pub fn kind(mut self, kind: CodeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set strict mode
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Add a formal parameter
    pub fn param(mut self, name: &str) -> Self {
        self.params.push(Name::new(name));
        self
    }

    /// Set register count (raised to fit `this` and the parameters at build)
    pub fn register_count(mut self, count: u16) -> Self {
        self.register_count = count;
        self
    }

    /// Request a per-invocation declarative environment over `names`
    ///
    /// The first `immutable` names become immutable bindings.
    pub fn env(mut self, names: &[&str], immutable: u32) -> Self {
        let first = NameIndex(self.names.len() as u32);
        // Layout bindings must be contiguous, so they are never deduplicated.
        self.names.extend(names.iter().map(|n| Name::new(n)));
        self.env = Some(EnvLayout {
            first,
            size: names.len() as u32,
            mutable_start: immutable,
        });
        self
    }

    /// Intern a name, returning its index
    pub fn add_name(&mut self, name: &str) -> NameIndex {
        if let Some(idx) = self.names.iter().position(|n| n.as_str() == name) {
            return NameIndex(idx as u32);
        }
        self.names.push(Name::new(name));
        NameIndex(self.names.len() as u32 - 1)
    }

    /// Add a number constant
    pub fn add_number(&mut self, n: f64) -> ConstantIndex {
        self.constants.intern(Constant::Number(n))
    }

    /// Add a string constant
    pub fn add_string(&mut self, s: &str) -> ConstantIndex {
        self.constants.intern(Constant::String(s.into()))
    }

    /// Add a nested code object
    pub fn add_code(&mut self, code: Arc<Code>) -> CodeIndex {
        self.codes.push(code);
        CodeIndex(self.codes.len() as u32 - 1)
    }

    /// Allocate a fresh inline cache site
    pub fn add_cache_slot(&mut self) -> CacheSlot {
        self.cache_slots += 1;
        CacheSlot(self.cache_slots - 1)
    }

    /// Add an exception table entry
    pub fn add_handler(&mut self, handler: Handler) -> HandlerId {
        self.handlers.push(handler);
        HandlerId(self.handlers.len() as u32 - 1)
    }

    /// Append an instruction, returning its pc
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    /// Append several instructions
    pub fn emit_all(&mut self, instructions: impl IntoIterator<Item = Instruction>) {
        self.instructions.extend(instructions);
    }

    /// pc of the next emitted instruction
    #[inline]
    pub fn next_pc(&self) -> usize {
        self.instructions.len()
    }

    /// Replace a previously emitted instruction (jump patching)
    pub fn patch(&mut self, pc: usize, instruction: Instruction) {
        if let Some(slot) = self.instructions.get_mut(pc) {
            *slot = instruction;
        }
    }

    /// Build and validate the code object
    pub fn build(self) -> Result<Code> {
        let register_count = self.register_count.max(self.params.len() as u16 + 1);
        let code = Code {
            name: self.name,
            kind: self.kind,
            strict: self.strict,
            params: self.params,
            register_count,
            instructions: self.instructions,
            constants: self.constants,
            names: self.names,
            codes: self.codes,
            exception_table: ExceptionTable::new(self.handlers)?,
            env: self.env,
            cache_slots: self.cache_slots,
            feedback: RwLock::new(vec![CacheState::Uninitialized; self.cache_slots as usize]),
        };
        code.validate()?;
        Ok(code)
    }
}
