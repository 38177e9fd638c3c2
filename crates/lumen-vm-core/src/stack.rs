//! Register arena and frame manager
//!
//! All frames share one pre-allocated `Vec<Value>`. A call reserves a window
//! at `top`; unwinding a frame restores `top` to where it was before the
//! frame (and any host argument block) was pushed.

use std::sync::Arc;

use lumen_vm_bytecode::{Code, Register};

use crate::environment::{EnvRef, Environment};
use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::realm::Realm;
use crate::string::JsString;
use crate::value::{ObjectRef, Value};

/// The register arena and call stack of a context
#[derive(Debug)]
pub struct RegisterStack {
    slots: Vec<Value>,
    top: usize,
    base: usize,
    frames: Vec<Frame>,
    max_depth: usize,
    call_depth: usize,
    frames_created: u64,
    frames_unwound: u64,
}

impl RegisterStack {
    /// Create an arena of `capacity` slots allowing `max_depth` nested calls
    pub fn new(capacity: usize, max_depth: usize) -> Self {
        Self {
            slots: vec![Value::Undefined; capacity],
            top: 0,
            base: 0,
            frames: Vec::with_capacity(64),
            max_depth,
            call_depth: 0,
            frames_created: 0,
            frames_unwound: 0,
        }
    }

    fn reserve(&self, needed: usize, counted: bool) -> VmResult<usize> {
        let end = self.top.checked_add(needed).ok_or(VmError::StackOverflow)?;
        if end > self.slots.len() || (counted && self.call_depth >= self.max_depth) {
            tracing::debug!(
                top = self.top,
                needed,
                depth = self.call_depth,
                "frame allocation exhausted"
            );
            return Err(VmError::StackOverflow);
        }
        Ok(end)
    }

    fn frame_env(code: &Code, scope: EnvRef) -> EnvRef {
        match code.env {
            Some(layout) => {
                let first = layout.first.index() as usize;
                let names = code.names[first..first + layout.size as usize]
                    .iter()
                    .map(JsString::from);
                Environment::with_layout(Some(scope), names, layout.mutable_start)
            }
            None => scope,
        }
    }

    /// Push a frame for a bytecode function
    ///
    /// `args_at` is the arena index of a `[this, arg0, arg1, ...]` block
    /// holding `argc` arguments. Fails with a stack overflow, leaving the
    /// stack untouched, when the arena or the depth limit is exhausted.
    #[allow(clippy::too_many_arguments)]
    pub fn new_code_frame(
        &mut self,
        code: Arc<Code>,
        scope: EnvRef,
        callee: Option<ObjectRef>,
        args_at: usize,
        argc: usize,
        prev_pc: Option<usize>,
        return_register: Option<Register>,
        constructor_call: bool,
    ) -> VmResult<()> {
        let params = code.param_count();
        let register_count = code.register_count as usize;
        let extra_count = argc.saturating_sub(params);
        let end = self.reserve(register_count + extra_count, true)?;

        let base = self.top;
        let extra_base = base + register_count;
        self.slots[base] = self.slots[args_at].clone();
        for i in 0..params {
            self.slots[base + 1 + i] = if i < argc {
                self.slots[args_at + 1 + i].clone()
            } else {
                Value::Undefined
            };
        }
        for slot in &mut self.slots[base + 1 + params..extra_base] {
            *slot = Value::Undefined;
        }
        for j in 0..extra_count {
            self.slots[extra_base + j] = self.slots[args_at + 1 + params + j].clone();
        }

        let env = Self::frame_env(&code, scope);
        self.frames.push(Frame {
            code,
            callee,
            base,
            register_count,
            argc,
            extra_base,
            extra_count,
            variable_env: env.clone(),
            lexical_env: env,
            prev_pc,
            return_register,
            constructor_call,
            is_eval: false,
            restore_top: self.top,
        });
        self.top = end;
        self.base = base;
        self.call_depth += 1;
        self.frames_created += 1;
        Ok(())
    }

    /// Push a frame for eval or global code
    pub fn new_eval_frame(
        &mut self,
        code: Arc<Code>,
        variable_env: EnvRef,
        lexical_env: EnvRef,
        this: Value,
    ) -> VmResult<()> {
        let register_count = code.register_count as usize;
        let end = self.reserve(register_count, false)?;
        let base = self.top;
        self.slots[base] = this;
        for slot in &mut self.slots[base + 1..end] {
            *slot = Value::Undefined;
        }

        let (variable_env, lexical_env) = match code.env {
            Some(_) => {
                let env = Self::frame_env(&code, lexical_env);
                (env.clone(), env)
            }
            None => (variable_env, lexical_env),
        };
        self.frames.push(Frame {
            code,
            callee: None,
            base,
            register_count,
            argc: 0,
            extra_base: end,
            extra_count: 0,
            variable_env,
            lexical_env,
            prev_pc: None,
            return_register: None,
            constructor_call: false,
            is_eval: true,
            restore_top: self.top,
        });
        self.top = end;
        self.base = base;
        self.frames_created += 1;
        Ok(())
    }

    /// Copy a host argument block `[this, args...]` onto the arena
    ///
    /// Returns the block's arena index for [`Self::new_code_frame`].
    pub fn push_arguments(&mut self, this: Value, args: &[Value]) -> VmResult<usize> {
        let end = self.reserve(args.len() + 1, false)?;
        let at = self.top;
        self.slots[at] = this;
        self.slots[at + 1..end].clone_from_slice(args);
        self.top = end;
        Ok(at)
    }

    /// Drop everything above `top`
    pub fn truncate(&mut self, top: usize) {
        if top < self.top {
            for slot in &mut self.slots[top..self.top] {
                *slot = Value::Undefined;
            }
            self.top = top;
        }
    }

    /// Pop exactly one frame, restoring `top`
    pub fn unwind(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        self.truncate(frame.restore_top);
        self.top = frame.restore_top;
        if !frame.is_eval {
            self.call_depth -= 1;
        }
        self.frames_unwound += 1;
        self.base = self.frames.last().map_or(0, |f| f.base);
        Some(frame)
    }

    /// Coerce the current frame's `this` for non-strict code
    pub fn init_this_binding(&mut self, realm: &Realm) -> VmResult<()> {
        let Some(frame) = self.frames.last() else {
            return Ok(());
        };
        if frame.code.strict {
            return Ok(());
        }
        let base = frame.base;
        let this = &self.slots[base];
        let coerced = match this {
            Value::Undefined | Value::Null => Value::Object(realm.global.clone()),
            Value::Object(_) => return Ok(()),
            other => Value::Object(realm.to_object(other)?),
        };
        self.slots[base] = coerced;
        Ok(())
    }

    // ==================== Register access ====================

    /// Read a register of the current frame
    #[inline]
    pub fn reg(&self, register: Register) -> &Value {
        &self.slots[self.base + register.index() as usize]
    }

    /// Write a register of the current frame
    #[inline]
    pub fn set(&mut self, register: Register, value: Value) {
        self.slots[self.base + register.index() as usize] = value;
    }

    /// Read an arena slot
    #[inline]
    pub fn slot(&self, index: usize) -> &Value {
        &self.slots[index]
    }

    /// Registers `start..start+count` of the current frame
    pub fn regs(&self, start: Register, count: usize) -> &[Value] {
        let from = self.base + start.index() as usize;
        &self.slots[from..from + count]
    }

    // ==================== Inspection ====================

    /// Current frame
    #[inline]
    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Current frame, mutably
    #[inline]
    pub fn current_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// First free arena slot
    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    /// Number of frames
    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Frames counting toward the call depth limit
    #[inline]
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    /// Frames ever pushed
    #[inline]
    pub fn frames_created(&self) -> u64 {
        self.frames_created
    }

    /// Frames ever unwound
    #[inline]
    pub fn frames_unwound(&self) -> u64 {
        self.frames_unwound
    }

    /// Arena size
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
