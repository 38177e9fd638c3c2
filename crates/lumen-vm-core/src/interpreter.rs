//! Bytecode interpreter
//!
//! One `match` per instruction. The program counter lives in a local of
//! [`Interpreter::execute`]; frames only remember where to resume their
//! caller. Calls between bytecode functions push a frame and keep going in
//! the same loop, so script recursion does not grow the host stack. Natives,
//! direct eval and host entry points start a nested `execute`.

use std::sync::Arc;

use lumen_vm_bytecode::{
    Code, Completion, Constant, HandlerKind, Instruction, JumpOffset, NameIndex, Register, UpdateOp,
};
use smallvec::SmallVec;

use crate::context::VmContext;
use crate::conversion::{to_int32, to_uint32};
use crate::environment::{EnvRecord, EnvRef, Environment, nth_outer};
use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::function::{JsFunction, NativeFunction};
use crate::object::{JsObject, ObjectClass, PropertyAttributes, PropertyDescriptor, PropertyKey, lookup};
use crate::operation::PreferredType;
use crate::string::JsString;
use crate::value::{ObjectRef, Value};

/// The bytecode interpreter
///
/// Stateless; all execution state lives in the [`VmContext`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

/// Result of executing an instruction
enum InstructionResult {
    /// Continue to next instruction
    Continue,
    /// Continue at an absolute pc in the same frame
    Jump(usize),
    /// A new frame was pushed; start it at pc 0
    Enter,
    /// The frame returned into its caller; resume the caller at pc
    Resume(usize),
    /// The entry frame returned
    Exit(Value),
}

fn jump(pc: usize, offset: JumpOffset) -> VmResult<InstructionResult> {
    offset
        .target(pc)
        .map(InstructionResult::Jump)
        .ok_or_else(|| VmError::internal(format!("jump {offset:?} from {pc} out of range")))
}

fn name_at(code: &Code, index: NameIndex) -> VmResult<JsString> {
    code.name(index)
        .map(JsString::from)
        .ok_or_else(|| VmError::internal(format!("name index {} out of range", index.0)))
}

fn current(ctx: &VmContext) -> VmResult<&Frame> {
    ctx.stack.current().ok_or_else(|| VmError::internal("no active frame"))
}

fn current_mut(ctx: &mut VmContext) -> VmResult<&mut Frame> {
    ctx.stack.current_mut().ok_or_else(|| VmError::internal("no active frame"))
}

fn lexical_env(ctx: &VmContext) -> VmResult<EnvRef> {
    current(ctx).map(|frame| Arc::clone(&frame.lexical_env))
}

fn variable_env(ctx: &VmContext) -> VmResult<EnvRef> {
    current(ctx).map(|frame| Arc::clone(&frame.variable_env))
}

fn expect_object(value: &Value, what: &str) -> VmResult<ObjectRef> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| VmError::internal(format!("{what} is not an object")))
}

impl Interpreter {
    /// Create a new interpreter
    pub fn new() -> Self {
        Self
    }

    /// Run global code in `ctx`'s realm
    pub fn run(&self, ctx: &mut VmContext, code: Arc<Code>) -> VmResult<Value> {
        let realm = Arc::clone(ctx.realm());
        let env = Arc::clone(&realm.global_env);
        ctx.stack
            .new_eval_frame(code, Arc::clone(&env), env, Value::Object(realm.global.clone()))?;
        self.execute(ctx)
    }

    /// Call a function value from host or native code
    pub fn call_function(&self, ctx: &mut VmContext, callee: &Value, this: Value, args: &[Value]) -> VmResult<Value> {
        let Value::Object(object) = callee else {
            return Err(VmError::type_error(format!("{} is not a function", callee.describe())));
        };
        self.invoke(ctx, object, this, args, false)
    }

    /// `new callee(...args)` from host or native code
    pub fn construct_function(&self, ctx: &mut VmContext, callee: &Value, args: &[Value]) -> VmResult<Value> {
        let Some(object) = callee.as_object().filter(|o| o.is_callable()) else {
            return Err(VmError::type_error(format!("{} is not a constructor", callee.describe())));
        };
        let receiver = self.new_receiver(ctx, object)?;
        self.invoke(ctx, object, Value::Object(receiver), args, true)
    }

    fn invoke(
        &self,
        ctx: &mut VmContext,
        object: &ObjectRef,
        this: Value,
        args: &[Value],
        constructor_call: bool,
    ) -> VmResult<Value> {
        let function = object
            .function()
            .cloned()
            .ok_or_else(|| VmError::type_error(format!("{} is not a function", object.class_name())))?;
        match function {
            JsFunction::Native(native) => self.call_native(ctx, &native, this, args, constructor_call),
            JsFunction::Bytecode { code, scope } => {
                if code.is_empty() {
                    return Ok(if constructor_call { this } else { Value::Undefined });
                }
                let at = ctx.stack.push_arguments(this, args)?;
                if let Err(e) = ctx.stack.new_code_frame(
                    code,
                    scope,
                    Some(object.clone()),
                    at,
                    args.len(),
                    None,
                    None,
                    constructor_call,
                ) {
                    ctx.stack.truncate(at);
                    return Err(e);
                }
                current_mut(ctx)?.restore_top = at;
                let realm = Arc::clone(ctx.realm());
                if let Err(e) = ctx.stack.init_this_binding(&realm) {
                    ctx.stack.unwind();
                    return Err(e);
                }
                self.execute(ctx)
            }
        }
    }

    /// Run a host function; a construct call keeps an object result and
    /// otherwise yields the receiver
    fn call_native(
        &self,
        ctx: &mut VmContext,
        native: &NativeFunction,
        this: Value,
        args: &[Value],
        constructor_call: bool,
    ) -> VmResult<Value> {
        let outer = std::mem::replace(&mut ctx.native_construct, constructor_call);
        let result = (native.call)(ctx, &this, args);
        ctx.native_construct = outer;
        let value = result?;
        Ok(if constructor_call && !value.is_object() { this } else { value })
    }

    fn new_receiver(&self, ctx: &mut VmContext, constructor: &ObjectRef) -> VmResult<ObjectRef> {
        let receiver = Value::Object(constructor.clone());
        let prototype = match self.get_from_object(ctx, constructor, &PropertyKey::from("prototype"), &receiver)? {
            Value::Object(proto) => proto,
            _ => ctx.realm().object_prototype.clone(),
        };
        Ok(ctx.realm().new_object_with_proto(Some(prototype)))
    }

    /// Run the current frame until the entry frame returns
    pub fn execute(&self, ctx: &mut VmContext) -> VmResult<Value> {
        let mut pc = 0usize;
        'frames: loop {
            let code = Arc::clone(&current(ctx)?.code);
            loop {
                let outcome = match code.instruction(pc) {
                    Some(instruction) => self.execute_instruction(ctx, &code, pc, *instruction),
                    None => self.do_return(ctx, Value::Undefined),
                };
                match outcome {
                    Ok(InstructionResult::Continue) => pc += 1,
                    Ok(InstructionResult::Jump(target)) => pc = target,
                    Ok(InstructionResult::Enter) => {
                        pc = 0;
                        continue 'frames;
                    }
                    Ok(InstructionResult::Resume(target)) => {
                        pc = target;
                        continue 'frames;
                    }
                    Ok(InstructionResult::Exit(value)) => return Ok(value),
                    Err(error) => {
                        ctx.error.report(error);
                        pc = self.handle_error(ctx, pc)?;
                        continue 'frames;
                    }
                }
            }
        }
    }

    /// Find a handler for the pending error raised at `pc`
    ///
    /// Walks the exception table chain of each frame from the innermost
    /// entry outward, releasing enumerators and popping environments on the
    /// way. Returns the pc to resume at, or the error itself once the entry
    /// frame has been unwound.
    fn handle_error(&self, ctx: &mut VmContext, pc: usize) -> VmResult<usize> {
        let mut pc = pc;
        loop {
            let code = Arc::clone(&current(ctx)?.code);
            let catchable = ctx.error.peek().is_none_or(VmError::is_catchable);
            for handler in code.exception_table.chain(pc as u32) {
                match handler.kind {
                    HandlerKind::Iterator => {
                        if let Some(cell) = ctx.stack.reg(handler.ret).as_cell() {
                            ctx.iterators.release(cell);
                        }
                        ctx.stack.set(handler.ret, Value::Undefined);
                    }
                    HandlerKind::Env => {
                        let frame = current_mut(ctx)?;
                        if let Some(outer) = frame.lexical_env.outer().cloned() {
                            frame.lexical_env = outer;
                        }
                    }
                    HandlerKind::Catch if catchable => {
                        let error = ctx.error.take().unwrap_or_else(|| VmError::internal("no pending error"));
                        tracing::debug!(code = code.display_name(), pc, handler = handler.handler_pc, %error, "caught");
                        let value = ctx.realm().materialize(error);
                        ctx.stack.set(handler.ret, value);
                        return Ok(handler.handler_pc as usize);
                    }
                    HandlerKind::Finally if catchable => {
                        let error = ctx.error.take().unwrap_or_else(|| VmError::internal("no pending error"));
                        tracing::debug!(code = code.display_name(), pc, handler = handler.handler_pc, %error, "entering finally");
                        let value = ctx.realm().materialize(error);
                        ctx.stack.set(handler.flag, Value::Int32(Completion::Throw as i32));
                        ctx.stack.set(handler.jmp, value);
                        return Ok(handler.handler_pc as usize);
                    }
                    HandlerKind::Catch | HandlerKind::Finally => {}
                }
            }

            let frame = ctx.stack.unwind().ok_or_else(|| VmError::internal("unwound past the stack"))?;
            match frame.prev_pc {
                Some(prev) => pc = prev.saturating_sub(1),
                None => {
                    let error = ctx.error.take().unwrap_or_else(|| VmError::internal("no pending error"));
                    tracing::debug!(code = frame.code.display_name(), %error, "uncaught at entry frame");
                    return Err(error);
                }
            }
        }
    }

    fn do_return(&self, ctx: &mut VmContext, value: Value) -> VmResult<InstructionResult> {
        let frame = current(ctx)?;
        let value = if frame.constructor_call && !value.is_object() {
            ctx.stack.reg(Register::THIS).clone()
        } else {
            value
        };
        let frame = ctx.stack.unwind().ok_or_else(|| VmError::internal("return without frame"))?;
        match frame.prev_pc {
            None => Ok(InstructionResult::Exit(value)),
            Some(prev) => {
                if let Some(register) = frame.return_register {
                    ctx.stack.set(register, value);
                }
                Ok(InstructionResult::Resume(prev))
            }
        }
    }

    fn execute_instruction(
        &self,
        ctx: &mut VmContext,
        code: &Arc<Code>,
        pc: usize,
        instruction: Instruction,
    ) -> VmResult<InstructionResult> {
        let strict = code.strict;
        match instruction {
            // ==================== Constants / moves ====================
            Instruction::Nop => {}

            Instruction::Mv { dst, src } => {
                let value = ctx.stack.reg(src).clone();
                ctx.stack.set(dst, value);
            }

            Instruction::LoadConst { dst, idx } => {
                let value = match code.constants.get(idx) {
                    Some(Constant::Number(n)) => Value::number(*n),
                    Some(Constant::String(s)) => Value::String(JsString::new(s)),
                    None => return Err(VmError::internal(format!("constant {} out of range", idx.0))),
                };
                ctx.stack.set(dst, value);
            }

            Instruction::LoadInt32 { dst, value } => ctx.stack.set(dst, Value::Int32(value)),
            Instruction::LoadUndefined { dst } => ctx.stack.set(dst, Value::Undefined),
            Instruction::LoadNull { dst } => ctx.stack.set(dst, Value::Null),
            Instruction::LoadTrue { dst } => ctx.stack.set(dst, Value::Boolean(true)),
            Instruction::LoadFalse { dst } => ctx.stack.set(dst, Value::Boolean(false)),
            Instruction::LoadEmpty { dst } => ctx.stack.set(dst, Value::Empty),

            // ==================== Unary ====================
            Instruction::Positive { dst, src } | Instruction::ToNumber { dst, src } => {
                let value = ctx.stack.reg(src).clone();
                let result = self.to_numeric(ctx, &value)?;
                ctx.stack.set(dst, result);
            }

            Instruction::Negative { dst, src } => {
                let value = ctx.stack.reg(src).clone();
                let result = match value {
                    Value::Int32(i) if i != 0 && i != i32::MIN => Value::Int32(-i),
                    other => Value::number(-self.to_number(ctx, &other)?),
                };
                ctx.stack.set(dst, result);
            }

            Instruction::Not { dst, src } => {
                let result = !ctx.stack.reg(src).to_boolean();
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::BitNot { dst, src } => {
                let value = ctx.stack.reg(src).clone();
                let result = match value {
                    Value::Int32(i) => !i,
                    other => !to_int32(self.to_number(ctx, &other)?),
                };
                ctx.stack.set(dst, Value::Int32(result));
            }

            Instruction::TypeOf { dst, src } => {
                let result = ctx.stack.reg(src).type_of();
                ctx.stack.set(dst, Value::from(result));
            }

            // ==================== Arithmetic ====================
            Instruction::Add { dst, lhs, rhs } => {
                let l = ctx.stack.reg(lhs).clone();
                let r = ctx.stack.reg(rhs).clone();
                let result = match (&l, &r) {
                    (Value::Int32(a), Value::Int32(b)) => match a.checked_add(*b) {
                        Some(sum) => Value::Int32(sum),
                        None => Value::Number(*a as f64 + *b as f64),
                    },
                    (a, b) if a.is_number() && b.is_number() => {
                        Value::number(a.as_number().unwrap_or(f64::NAN) + b.as_number().unwrap_or(f64::NAN))
                    }
                    _ => self.add_values(ctx, &l, &r)?,
                };
                ctx.stack.set(dst, result);
            }

            Instruction::Sub { dst, lhs, rhs } => {
                let result = match (ctx.stack.reg(lhs), ctx.stack.reg(rhs)) {
                    (Value::Int32(a), Value::Int32(b)) => match a.checked_sub(*b) {
                        Some(diff) => Value::Int32(diff),
                        None => Value::Number(*a as f64 - *b as f64),
                    },
                    _ => {
                        let (a, b) = self.number_operands(ctx, lhs, rhs)?;
                        Value::number(a - b)
                    }
                };
                ctx.stack.set(dst, result);
            }

            Instruction::Mul { dst, lhs, rhs } => {
                let result = match (ctx.stack.reg(lhs), ctx.stack.reg(rhs)) {
                    (Value::Int32(a), Value::Int32(b)) if ((a | b) >> 15) == 0 => Value::Int32(a * b),
                    _ => {
                        let (a, b) = self.number_operands(ctx, lhs, rhs)?;
                        Value::number(a * b)
                    }
                };
                ctx.stack.set(dst, result);
            }

            Instruction::Div { dst, lhs, rhs } => {
                let (a, b) = self.number_operands(ctx, lhs, rhs)?;
                ctx.stack.set(dst, Value::number(a / b));
            }

            Instruction::Mod { dst, lhs, rhs } => {
                let result = match (ctx.stack.reg(lhs), ctx.stack.reg(rhs)) {
                    (Value::Int32(a), Value::Int32(b)) if *a >= 0 && *b > 0 => Value::Int32(a % b),
                    _ => {
                        let (a, b) = self.number_operands(ctx, lhs, rhs)?;
                        Value::number(a % b)
                    }
                };
                ctx.stack.set(dst, result);
            }

            Instruction::Shl { dst, lhs, rhs } => {
                let (a, b) = self.number_operands(ctx, lhs, rhs)?;
                let result = to_int32(a).wrapping_shl(to_uint32(b) & 0x1f);
                ctx.stack.set(dst, Value::Int32(result));
            }

            Instruction::Shr { dst, lhs, rhs } => {
                let (a, b) = self.number_operands(ctx, lhs, rhs)?;
                let result = to_int32(a) >> (to_uint32(b) & 0x1f);
                ctx.stack.set(dst, Value::Int32(result));
            }

            Instruction::Ushr { dst, lhs, rhs } => {
                let (a, b) = self.number_operands(ctx, lhs, rhs)?;
                let result = to_uint32(a) >> (to_uint32(b) & 0x1f);
                ctx.stack.set(dst, Value::from_u32(result));
            }

            Instruction::BitAnd { dst, lhs, rhs } => {
                let (a, b) = self.int32_operands(ctx, lhs, rhs)?;
                ctx.stack.set(dst, Value::Int32(a & b));
            }

            Instruction::BitXor { dst, lhs, rhs } => {
                let (a, b) = self.int32_operands(ctx, lhs, rhs)?;
                ctx.stack.set(dst, Value::Int32(a ^ b));
            }

            Instruction::BitOr { dst, lhs, rhs } => {
                let (a, b) = self.int32_operands(ctx, lhs, rhs)?;
                ctx.stack.set(dst, Value::Int32(a | b));
            }

            // ==================== Comparison ====================
            Instruction::Lt { dst, lhs, rhs } => {
                let result = match (ctx.stack.reg(lhs), ctx.stack.reg(rhs)) {
                    (Value::Int32(a), Value::Int32(b)) => a < b,
                    (l, r) => {
                        let (l, r) = (l.clone(), r.clone());
                        self.compare(ctx, &l, &r, true)? == Some(true)
                    }
                };
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::Gt { dst, lhs, rhs } => {
                let result = match (ctx.stack.reg(lhs), ctx.stack.reg(rhs)) {
                    (Value::Int32(a), Value::Int32(b)) => a > b,
                    (l, r) => {
                        let (l, r) = (l.clone(), r.clone());
                        self.compare(ctx, &r, &l, false)? == Some(true)
                    }
                };
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::Lte { dst, lhs, rhs } => {
                let result = match (ctx.stack.reg(lhs), ctx.stack.reg(rhs)) {
                    (Value::Int32(a), Value::Int32(b)) => a <= b,
                    (l, r) => {
                        let (l, r) = (l.clone(), r.clone());
                        self.compare(ctx, &r, &l, false)? == Some(false)
                    }
                };
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::Gte { dst, lhs, rhs } => {
                let result = match (ctx.stack.reg(lhs), ctx.stack.reg(rhs)) {
                    (Value::Int32(a), Value::Int32(b)) => a >= b,
                    (l, r) => {
                        let (l, r) = (l.clone(), r.clone());
                        self.compare(ctx, &l, &r, true)? == Some(false)
                    }
                };
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::Eq { dst, lhs, rhs } | Instruction::Ne { dst, lhs, rhs } => {
                let l = ctx.stack.reg(lhs).clone();
                let r = ctx.stack.reg(rhs).clone();
                let equal = self.abstract_equals(ctx, &l, &r)?;
                let negate = matches!(instruction, Instruction::Ne { .. });
                ctx.stack.set(dst, Value::Boolean(equal != negate));
            }

            Instruction::StrictEq { dst, lhs, rhs } => {
                let equal = ctx.stack.reg(lhs).strict_equals(ctx.stack.reg(rhs));
                ctx.stack.set(dst, Value::Boolean(equal));
            }

            Instruction::StrictNe { dst, lhs, rhs } => {
                let equal = ctx.stack.reg(lhs).strict_equals(ctx.stack.reg(rhs));
                ctx.stack.set(dst, Value::Boolean(!equal));
            }

            Instruction::InstanceOf { dst, lhs, rhs } => {
                let l = ctx.stack.reg(lhs).clone();
                let r = ctx.stack.reg(rhs).clone();
                let result = self.instance_of(ctx, &l, &r)?;
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::In { dst, lhs, rhs } => {
                let l = ctx.stack.reg(lhs).clone();
                let r = ctx.stack.reg(rhs).clone();
                let result = self.has_in(ctx, &l, &r)?;
                ctx.stack.set(dst, Value::Boolean(result));
            }

            // ==================== Register updates ====================
            Instruction::Increment { src } => {
                let stored = match ctx.stack.reg(src) {
                    Value::Int32(v) if *v < i32::MAX => Value::Int32(v + 1),
                    other => {
                        let other = other.clone();
                        self.update_value(ctx, &other, UpdateOp::Increment)?.1
                    }
                };
                ctx.stack.set(src, stored);
            }

            Instruction::Decrement { src } => {
                let stored = match ctx.stack.reg(src) {
                    Value::Int32(v) if *v > i32::MIN => Value::Int32(v - 1),
                    other => {
                        let other = other.clone();
                        self.update_value(ctx, &other, UpdateOp::Decrement)?.1
                    }
                };
                ctx.stack.set(src, stored);
            }

            Instruction::PostfixIncrement { dst, src } | Instruction::PostfixDecrement { dst, src } => {
                let op = if matches!(instruction, Instruction::PostfixIncrement { .. }) {
                    UpdateOp::PostfixIncrement
                } else {
                    UpdateOp::PostfixDecrement
                };
                let old = ctx.stack.reg(src).clone();
                let (result, stored) = self.update_value(ctx, &old, op)?;
                ctx.stack.set(dst, result);
                ctx.stack.set(src, stored);
            }

            // ==================== Names ====================
            Instruction::LoadName { dst, name } => {
                let name = name_at(code, name)?;
                let env = lexical_env(ctx)?;
                let value = self.load_name(ctx, &env, &name, strict)?;
                ctx.stack.set(dst, value);
            }

            Instruction::StoreName { name, src } => {
                let name = name_at(code, name)?;
                let env = lexical_env(ctx)?;
                let value = ctx.stack.reg(src).clone();
                self.store_name(ctx, &env, &name, value, strict)?;
            }

            Instruction::DeleteName { dst, name } => {
                let name = name_at(code, name)?;
                let env = lexical_env(ctx)?;
                let result = self.delete_name(&env, &name);
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::TypeOfName { dst, name } => {
                let name = name_at(code, name)?;
                let env = lexical_env(ctx)?;
                let result = self.typeof_name(ctx, &env, &name, strict)?;
                ctx.stack.set(dst, result);
            }

            Instruction::UpdateName { dst, name, op } => {
                let name = name_at(code, name)?;
                let env = lexical_env(ctx)?;
                let old = self.load_name(ctx, &env, &name, strict)?;
                let (result, stored) = self.update_value(ctx, &old, op)?;
                self.store_name(ctx, &env, &name, stored, strict)?;
                ctx.stack.set(dst, result);
            }

            // ==================== Heap ====================
            Instruction::LoadHeap { dst, name, offset, nest } => {
                let name = name_at(code, name)?;
                let value = self.heap_get(ctx, &name, offset, nest, strict)?;
                ctx.stack.set(dst, value);
            }

            Instruction::StoreHeap { name, offset, nest, src } => {
                let name = name_at(code, name)?;
                let value = ctx.stack.reg(src).clone();
                self.heap_set(ctx, &name, offset, nest, value, strict)?;
            }

            Instruction::DeleteHeap { dst, name, offset: _, nest } => {
                let name = name_at(code, name)?;
                let env = lexical_env(ctx)?;
                let target = nth_outer(&env, nest)?;
                let result = self.delete_binding(target, &name);
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::TypeOfHeap { dst, name, offset, nest } => {
                let name = name_at(code, name)?;
                let value = self.heap_get(ctx, &name, offset, nest, strict)?;
                ctx.stack.set(dst, Value::from(value.type_of()));
            }

            Instruction::UpdateHeap { dst, name, offset, nest, op } => {
                let name = name_at(code, name)?;
                let old = self.heap_get(ctx, &name, offset, nest, strict)?;
                let (result, stored) = self.update_value(ctx, &old, op)?;
                self.heap_set(ctx, &name, offset, nest, stored, strict)?;
                ctx.stack.set(dst, result);
            }

            // ==================== Globals ====================
            Instruction::LoadGlobal { dst, name, cache } => {
                let name = name_at(code, name)?;
                let value = self.load_global_cached(ctx, code, cache, &name)?;
                ctx.stack.set(dst, value);
            }

            Instruction::StoreGlobal { name, src, cache } => {
                let name = name_at(code, name)?;
                let value = ctx.stack.reg(src).clone();
                self.store_global_cached(ctx, code, cache, &name, value)?;
            }

            Instruction::DeleteGlobal { dst, name } => {
                let key = PropertyKey::from_string(name_at(code, name)?);
                let global = Value::Object(ctx.global().clone());
                let result = self.delete_property(ctx, &global, &key, strict)?;
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::TypeOfGlobal { dst, name } => {
                let key = PropertyKey::from_string(name_at(code, name)?);
                let global = ctx.global().clone();
                let result = if lookup(&global, &key).is_some() {
                    let value = self.get_from_object(ctx, &global, &key, &Value::Object(global.clone()))?;
                    value.type_of()
                } else {
                    "undefined"
                };
                ctx.stack.set(dst, Value::from(result));
            }

            Instruction::UpdateGlobal { dst, name, op } => {
                let name = name_at(code, name)?;
                let key = PropertyKey::from_string(name.clone());
                let global = ctx.global().clone();
                if lookup(&global, &key).is_none() {
                    return Err(VmError::reference_error(format!("{name} is not defined")));
                }
                let base = Value::Object(global.clone());
                let old = self.get_from_object(ctx, &global, &key, &base)?;
                let (result, stored) = self.update_value(ctx, &old, op)?;
                self.put_property(ctx, &base, key, stored, strict)?;
                ctx.stack.set(dst, result);
            }

            // ==================== Elements ====================
            Instruction::LoadElement { dst, base, element } => {
                let base = ctx.stack.reg(base).clone();
                let element = ctx.stack.reg(element).clone();
                self.check_object_coercible(&base, &element.describe())?;
                let key = self.to_property_key(ctx, &element)?;
                let value = self.get_property(ctx, &base, &key)?;
                ctx.stack.set(dst, value);
            }

            Instruction::StoreElement { base, element, src } => {
                let base = ctx.stack.reg(base).clone();
                let element = ctx.stack.reg(element).clone();
                let value = ctx.stack.reg(src).clone();
                self.check_object_coercible(&base, &element.describe())?;
                let key = self.to_property_key(ctx, &element)?;
                self.put_property(ctx, &base, key, value, strict)?;
            }

            Instruction::DeleteElement { dst, base, element } => {
                let base = ctx.stack.reg(base).clone();
                let element = ctx.stack.reg(element).clone();
                self.check_object_coercible(&base, &element.describe())?;
                let key = self.to_property_key(ctx, &element)?;
                let result = self.delete_property(ctx, &base, &key, strict)?;
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::UpdateElement { dst, base, element, op } => {
                let base = ctx.stack.reg(base).clone();
                let element = ctx.stack.reg(element).clone();
                self.check_object_coercible(&base, &element.describe())?;
                let key = self.to_property_key(ctx, &element)?;
                let old = self.get_property(ctx, &base, &key)?;
                let (result, stored) = self.update_value(ctx, &old, op)?;
                self.put_property(ctx, &base, key, stored, strict)?;
                ctx.stack.set(dst, result);
            }

            // ==================== Properties ====================
            Instruction::LoadProp { dst, base, name, cache } => {
                let name = name_at(code, name)?;
                let base = ctx.stack.reg(base).clone();
                self.check_object_coercible(&base, &name)?;
                let value = self.load_property_cached(ctx, code, cache, &base, &name)?;
                ctx.stack.set(dst, value);
            }

            Instruction::StoreProp { base, name, src, cache } => {
                let name = name_at(code, name)?;
                let base = ctx.stack.reg(base).clone();
                let value = ctx.stack.reg(src).clone();
                self.check_object_coercible(&base, &name)?;
                self.store_cached(ctx, code, cache, &base, &name, value)?;
            }

            Instruction::DeleteProp { dst, base, name } => {
                let key = PropertyKey::from_string(name_at(code, name)?);
                let base = ctx.stack.reg(base).clone();
                let result = self.delete_property(ctx, &base, &key, strict)?;
                ctx.stack.set(dst, Value::Boolean(result));
            }

            Instruction::UpdateProp { dst, base, name, op } => {
                let key = PropertyKey::from_string(name_at(code, name)?);
                let base = ctx.stack.reg(base).clone();
                let old = self.get_property(ctx, &base, &key)?;
                let (result, stored) = self.update_value(ctx, &old, op)?;
                self.put_property(ctx, &base, key, stored, strict)?;
                ctx.stack.set(dst, result);
            }

            // ==================== Environments ====================
            Instruction::InstantiateDeclarationBinding { name, configurable } => {
                let name = name_at(code, name)?;
                let env = variable_env(ctx)?;
                self.instantiate_function_binding(&env, &name, configurable)?;
            }

            Instruction::InstantiateVariableBinding { name, configurable } => {
                let name = name_at(code, name)?;
                let env = variable_env(ctx)?;
                if !self.env_has_binding(&env, &name) {
                    self.create_mutable_binding(&env, &name, configurable);
                }
            }

            Instruction::InitializeHeapImmutable { offset, src } => {
                let value = ctx.stack.reg(src).clone();
                let env = variable_env(ctx)?;
                let record = env
                    .declarative_record()
                    .ok_or_else(|| VmError::internal("immutable binding outside a declarative environment"))?;
                record.write().initialize(offset, value);
            }

            Instruction::WithSetup { src } => {
                let value = ctx.stack.reg(src).clone();
                let object = self.to_object(ctx, &value)?;
                let frame = current_mut(ctx)?;
                frame.lexical_env = Environment::object(object, Some(Arc::clone(&frame.lexical_env)), true);
            }

            Instruction::PopEnv => {
                let frame = current_mut(ctx)?;
                let outer = frame
                    .lexical_env
                    .outer()
                    .cloned()
                    .ok_or_else(|| VmError::internal("popped the outermost environment"))?;
                frame.lexical_env = outer;
            }

            Instruction::TryCatchSetup { error, name } => {
                let name = name_at(code, name)?;
                let value = ctx.stack.reg(error).clone();
                let frame = current_mut(ctx)?;
                frame.lexical_env = Environment::catch_scope(Some(Arc::clone(&frame.lexical_env)), name, value);
            }

            // ==================== Control flow ====================
            Instruction::JumpBy { offset } => return jump(pc, offset),

            Instruction::IfTrue { cond, offset } => {
                if ctx.stack.reg(cond).to_boolean() {
                    return jump(pc, offset);
                }
            }

            Instruction::IfFalse { cond, offset } => {
                if !ctx.stack.reg(cond).to_boolean() {
                    return jump(pc, offset);
                }
            }

            Instruction::JumpSubroutine { offset, addr, flag } => {
                let resume = i32::try_from(pc + 1).map_err(|_| VmError::internal("subroutine address overflow"))?;
                ctx.stack.set(addr, Value::Int32(resume));
                ctx.stack.set(flag, Value::Int32(Completion::Jump as i32));
                return jump(pc, offset);
            }

            Instruction::ReturnSubroutine { addr, flag } => {
                let completion = ctx
                    .stack
                    .reg(flag)
                    .as_int32()
                    .and_then(Completion::from_i32)
                    .ok_or_else(|| VmError::internal("corrupt finally completion flag"))?;
                let value = ctx.stack.reg(addr).clone();
                return match completion {
                    Completion::Jump => value
                        .as_int32()
                        .and_then(|target| usize::try_from(target).ok())
                        .map(InstructionResult::Jump)
                        .ok_or_else(|| VmError::internal("corrupt subroutine return address")),
                    Completion::Return => self.do_return(ctx, value),
                    Completion::Throw => Err(VmError::exception(value)),
                };
            }

            Instruction::Return { src } => {
                let value = ctx.stack.reg(src).clone();
                return self.do_return(ctx, value);
            }

            Instruction::Throw { src } => {
                return Err(VmError::exception(ctx.stack.reg(src).clone()));
            }

            Instruction::Raise { kind, message } => {
                let message = code
                    .constants
                    .get(message)
                    .and_then(Constant::as_str)
                    .unwrap_or_default();
                return Err(VmError::raise(kind, message));
            }

            Instruction::RaiseImmutable { name } => {
                let name = name_at(code, name)?;
                return Err(VmError::type_error(format!("mutating immutable binding '{name}' is not allowed")));
            }

            Instruction::Debugger => {
                tracing::debug!(code = code.display_name(), pc, depth = ctx.stack.depth(), "debugger statement");
            }

            // ==================== For-in ====================
            Instruction::ForInSetup { iterator, enumerable, offset } => {
                let value = ctx.stack.reg(enumerable).clone();
                if value.is_null_or_undefined() {
                    return jump(pc, offset);
                }
                let object = self.to_object(ctx, &value)?;
                let cell = ctx.iterators.gain(object);
                ctx.stack.set(iterator, Value::Cell(cell));
            }

            Instruction::ForInEnumerate { dst, iterator, offset } => {
                let cell = ctx
                    .stack
                    .reg(iterator)
                    .as_cell()
                    .ok_or_else(|| VmError::internal("for-in register does not hold an enumerator"))?;
                match ctx.iterators.get_mut(cell)?.next_key() {
                    Some(key) => ctx.stack.set(dst, Value::String(key)),
                    None => return jump(pc, offset),
                }
            }

            Instruction::ForInLeave { iterator } => {
                if let Some(cell) = ctx.stack.reg(iterator).as_cell() {
                    ctx.iterators.release(cell);
                }
                ctx.stack.set(iterator, Value::Undefined);
            }

            // ==================== Literals ====================
            Instruction::LoadObject { dst } => {
                let object = ctx.realm().new_object();
                ctx.stack.set(dst, Value::Object(object));
            }

            Instruction::LoadArray { dst, size } => {
                let array = ctx.realm().new_array(size);
                ctx.stack.set(dst, Value::Object(array));
            }

            Instruction::InitVectorArrayElement { array, start, index, count } => {
                let array = expect_object(ctx.stack.reg(array), "array literal")?;
                for (i, value) in ctx.stack.regs(start, count as usize).iter().enumerate() {
                    if !value.is_empty() {
                        array.define_own_property(PropertyKey::Index(index + i as u32), PropertyDescriptor::data(value.clone()));
                    }
                }
            }

            Instruction::StoreObjectData { object, name, src } => {
                let key = PropertyKey::from_string(name_at(code, name)?);
                let object = expect_object(ctx.stack.reg(object), "object literal")?;
                object.define_own_property(key, PropertyDescriptor::data(ctx.stack.reg(src).clone()));
            }

            Instruction::StoreObjectGet { object, name, src } => {
                let key = PropertyKey::from_string(name_at(code, name)?);
                let object = expect_object(ctx.stack.reg(object), "object literal")?;
                let getter = expect_object(ctx.stack.reg(src), "getter")?;
                object.merge_accessor(key, Some(getter), None);
            }

            Instruction::StoreObjectSet { object, name, src } => {
                let key = PropertyKey::from_string(name_at(code, name)?);
                let object = expect_object(ctx.stack.reg(object), "object literal")?;
                let setter = expect_object(ctx.stack.reg(src), "setter")?;
                object.merge_accessor(key, None, Some(setter));
            }

            Instruction::LoadFunction { dst, code: index } => {
                let child = code
                    .code(index)
                    .cloned()
                    .ok_or_else(|| VmError::internal(format!("code index {} out of range", index.0)))?;
                let scope = lexical_env(ctx)?;
                let function = ctx.realm().new_function(child, scope);
                ctx.stack.set(dst, Value::Object(function));
            }

            Instruction::LoadArguments { dst } => {
                let arguments = self.create_arguments(ctx)?;
                ctx.stack.set(dst, Value::Object(arguments));
            }

            // ==================== Calls ====================
            Instruction::Call { dst, callee, args, argc } => {
                let callee = ctx.stack.reg(callee).clone();
                return self.call_from_frame(ctx, pc, &callee, dst, args, argc, false);
            }

            Instruction::Construct { dst, callee, args, argc } => {
                let callee = ctx.stack.reg(callee).clone();
                let object = callee
                    .as_object()
                    .filter(|o| o.is_callable())
                    .cloned()
                    .ok_or_else(|| VmError::type_error(format!("{} is not a constructor", callee.describe())))?;
                let receiver = self.new_receiver(ctx, &object)?;
                ctx.stack.set(args, Value::Object(receiver));
                return self.call_from_frame(ctx, pc, &callee, dst, args, argc, true);
            }

            Instruction::Eval { dst, callee, args, argc } => {
                let callee = ctx.stack.reg(callee).clone();
                let direct = callee
                    .as_object()
                    .is_some_and(|o| Arc::ptr_eq(o, &ctx.realm().eval_function));
                if !direct {
                    return self.call_from_frame(ctx, pc, &callee, dst, args, argc, false);
                }
                let source = if argc > 0 { ctx.stack.reg(args.offset(1)).clone() } else { Value::Undefined };
                let result = match source {
                    Value::String(source) => self.direct_eval(ctx, code, &source)?,
                    other => other,
                };
                ctx.stack.set(dst, result);
            }

            Instruction::PrepareDynamicCall { callee, this, name } => {
                let name = name_at(code, name)?;
                let env = lexical_env(ctx)?;
                let target = self
                    .resolve_binding(&env, &name)
                    .ok_or_else(|| VmError::reference_error(format!("{name} is not defined")))?;
                let value = self.get_binding_value(ctx, &target, &name, strict)?;
                ctx.stack.set(callee, value);
                ctx.stack.set(this, target.implicit_this());
            }

            // ==================== Strings ====================
            Instruction::ToPrimitiveAndToString { dst, src } => {
                let value = ctx.stack.reg(src).clone();
                let primitive = self.to_primitive(ctx, &value, PreferredType::Default)?;
                let string = self.to_js_string(ctx, &primitive)?;
                ctx.stack.set(dst, Value::String(string));
            }

            Instruction::Concat { dst, start, count } => {
                let parts: SmallVec<[Value; 8]> = ctx.stack.regs(start, count as usize).iter().cloned().collect();
                let mut result = JsString::empty();
                for part in &parts {
                    let part = self.to_js_string(ctx, part)?;
                    result = result.concat(&part);
                }
                ctx.stack.set(dst, Value::String(result));
            }
        }
        Ok(InstructionResult::Continue)
    }

    // ==================== Helpers ====================

    fn number_operands(&self, ctx: &mut VmContext, lhs: Register, rhs: Register) -> VmResult<(f64, f64)> {
        let l = ctx.stack.reg(lhs).clone();
        let r = ctx.stack.reg(rhs).clone();
        let a = self.to_number(ctx, &l)?;
        let b = self.to_number(ctx, &r)?;
        Ok((a, b))
    }

    fn int32_operands(&self, ctx: &mut VmContext, lhs: Register, rhs: Register) -> VmResult<(i32, i32)> {
        if let (Value::Int32(a), Value::Int32(b)) = (ctx.stack.reg(lhs), ctx.stack.reg(rhs)) {
            return Ok((*a, *b));
        }
        let (a, b) = self.number_operands(ctx, lhs, rhs)?;
        Ok((to_int32(a), to_int32(b)))
    }

    fn heap_get(&self, ctx: &VmContext, name: &JsString, offset: u32, nest: u32, strict: bool) -> VmResult<Value> {
        let env = lexical_env(ctx)?;
        let record = nth_outer(&env, nest)?
            .declarative_record()
            .ok_or_else(|| VmError::internal(format!("heap access to '{name}' outside a declarative environment")))?;
        record.read().get(offset, name, strict)
    }

    fn heap_set(
        &self,
        ctx: &VmContext,
        name: &JsString,
        offset: u32,
        nest: u32,
        value: Value,
        strict: bool,
    ) -> VmResult<()> {
        let env = lexical_env(ctx)?;
        let record = nth_outer(&env, nest)?
            .declarative_record()
            .ok_or_else(|| VmError::internal(format!("heap access to '{name}' outside a declarative environment")))?;
        record.write().set(offset, name, value, strict)
    }

    fn instantiate_function_binding(&self, env: &EnvRef, name: &JsString, configurable: bool) -> VmResult<()> {
        match env.record() {
            EnvRecord::Declarative(record) => {
                let mut record = record.write();
                if record.lookup(name).is_none() {
                    record.create_mutable(name.clone(), configurable);
                }
                Ok(())
            }
            EnvRecord::Object { object, .. } => {
                let key = PropertyKey::from_string(name.clone());
                let fresh = PropertyDescriptor::data_with_attrs(
                    Value::Undefined,
                    PropertyAttributes::new(true, true, configurable),
                );
                match object.get_own_property(&key) {
                    None if !self.env_has_binding(env, name) => {
                        object.define_own_property(key, fresh);
                        Ok(())
                    }
                    None => Ok(()),
                    Some(existing) if existing.attributes().configurable => {
                        object.define_own_property(key, fresh);
                        Ok(())
                    }
                    Some(PropertyDescriptor::Data { attributes, .. })
                        if attributes.writable && attributes.enumerable =>
                    {
                        Ok(())
                    }
                    Some(_) => Err(VmError::type_error(format!(
                        "create mutable function binding failed for '{name}'"
                    ))),
                }
            }
        }
    }

    fn create_arguments(&self, ctx: &VmContext) -> VmResult<ObjectRef> {
        let frame = current(ctx)?;
        let realm = ctx.realm();
        let arguments = JsObject::new(
            ObjectClass::Arguments,
            Arc::clone(realm.root_shape()),
            Some(realm.object_prototype.clone()),
        );
        for i in 0..frame.argc {
            if let Some(slot) = frame.argument_slot(i) {
                arguments.define_own_property(
                    PropertyKey::Index(i as u32),
                    PropertyDescriptor::data(ctx.stack.slot(slot).clone()),
                );
            }
        }
        arguments.define_own_property(
            PropertyKey::from("length"),
            PropertyDescriptor::data_with_attrs(Value::from_u32(frame.argc as u32), PropertyAttributes::hidden()),
        );
        if let (false, Some(callee)) = (frame.code.strict, &frame.callee) {
            arguments.define_own_property(
                PropertyKey::from("callee"),
                PropertyDescriptor::data_with_attrs(Value::Object(callee.clone()), PropertyAttributes::hidden()),
            );
        }
        Ok(arguments)
    }

    #[allow(clippy::too_many_arguments)]
    fn call_from_frame(
        &self,
        ctx: &mut VmContext,
        pc: usize,
        callee: &Value,
        dst: Register,
        args: Register,
        argc: u16,
        constructor_call: bool,
    ) -> VmResult<InstructionResult> {
        let Some(object) = callee.as_object().filter(|o| o.is_callable()) else {
            return Err(VmError::type_error(format!("{} is not a function", callee.describe())));
        };
        let function = object
            .function()
            .cloned()
            .ok_or_else(|| VmError::internal("callable object without function payload"))?;
        match function {
            JsFunction::Bytecode { code, scope } => {
                if code.is_empty() {
                    let result = if constructor_call {
                        ctx.stack.reg(args).clone()
                    } else {
                        Value::Undefined
                    };
                    ctx.stack.set(dst, result);
                    return Ok(InstructionResult::Continue);
                }
                let args_at = current(ctx)?.slot(args);
                ctx.stack.new_code_frame(
                    code,
                    scope,
                    Some(object.clone()),
                    args_at,
                    argc as usize,
                    Some(pc + 1),
                    Some(dst),
                    constructor_call,
                )?;
                let realm = Arc::clone(ctx.realm());
                if let Err(e) = ctx.stack.init_this_binding(&realm) {
                    ctx.stack.unwind();
                    return Err(e);
                }
                Ok(InstructionResult::Enter)
            }
            JsFunction::Native(native) => {
                let this = ctx.stack.reg(args).clone();
                let argv: SmallVec<[Value; 8]> = ctx.stack.regs(args.offset(1), argc as usize).iter().cloned().collect();
                let result = self.call_native(ctx, &native, this, &argv, constructor_call)?;
                ctx.stack.set(dst, result);
                Ok(InstructionResult::Continue)
            }
        }
    }

    fn direct_eval(&self, ctx: &mut VmContext, caller: &Code, source: &JsString) -> VmResult<Value> {
        let compiler = ctx
            .eval_compiler()
            .cloned()
            .ok_or_else(|| VmError::syntax_error("eval is not supported without a compiler"))?;
        let compiled = compiler.compile(source.as_str(), caller.strict)?;
        let frame = current(ctx)?;
        let this = ctx.stack.reg(Register::THIS).clone();
        let (variable_env, lexical_env) = if compiled.strict {
            let env = Environment::declarative(Some(Arc::clone(&frame.lexical_env)));
            (Arc::clone(&env), env)
        } else {
            (Arc::clone(&frame.variable_env), Arc::clone(&frame.lexical_env))
        };
        if compiled.is_empty() {
            return Ok(Value::Undefined);
        }
        ctx.stack.new_eval_frame(compiled, variable_env, lexical_env, this)?;
        self.execute(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_vm_bytecode::{CacheSlot, CacheState, Handler};

    fn build(f: impl FnOnce(&mut lumen_vm_bytecode::CodeBuilder)) -> Arc<Code> {
        let mut b = Code::builder().register_count(8);
        f(&mut b);
        Arc::new(b.build().unwrap())
    }

    fn run(code: Arc<Code>) -> VmResult<Value> {
        VmContext::new().run(code)
    }

    #[test]
    fn test_load_and_return() {
        let code = build(|b| {
            b.emit(Instruction::LoadInt32 { dst: Register(1), value: 42 });
            b.emit(Instruction::Return { src: Register(1) });
        });
        assert_eq!(run(code).unwrap(), Value::Int32(42));
    }

    #[test]
    fn test_fall_off_end_returns_undefined() {
        let code = build(|b| {
            b.emit(Instruction::LoadInt32 { dst: Register(1), value: 1 });
        });
        assert_eq!(run(code).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_add_overflow_and_concat() {
        let code = build(|b| {
            let s = b.add_string("n=");
            b.emit(Instruction::LoadInt32 { dst: Register(1), value: i32::MAX });
            b.emit(Instruction::LoadInt32 { dst: Register(2), value: 1 });
            b.emit(Instruction::Add { dst: Register(3), lhs: Register(1), rhs: Register(2) });
            b.emit(Instruction::LoadConst { dst: Register(4), idx: s });
            b.emit(Instruction::Add { dst: Register(5), lhs: Register(4), rhs: Register(3) });
            b.emit(Instruction::Return { src: Register(5) });
        });
        assert_eq!(run(code).unwrap(), Value::from("n=2147483648"));
    }

    #[test]
    fn test_conditional_loop() {
        // r1 = 0; r2 = 0; while (r1 < 10) { r2 += r1; r1++ } return r2
        let code = build(|b| {
            b.emit(Instruction::LoadInt32 { dst: Register(1), value: 0 });
            b.emit(Instruction::LoadInt32 { dst: Register(2), value: 0 });
            b.emit(Instruction::LoadInt32 { dst: Register(3), value: 10 });
            b.emit(Instruction::Lt { dst: Register(4), lhs: Register(1), rhs: Register(3) });
            b.emit(Instruction::IfFalse { cond: Register(4), offset: JumpOffset(4) });
            b.emit(Instruction::Add { dst: Register(2), lhs: Register(2), rhs: Register(1) });
            b.emit(Instruction::Increment { src: Register(1) });
            b.emit(Instruction::JumpBy { offset: JumpOffset(-4) });
            b.emit(Instruction::Return { src: Register(2) });
        });
        assert_eq!(run(code).unwrap(), Value::Int32(45));
    }

    #[test]
    fn test_call_bytecode_function() {
        let callee = {
            let mut b = Code::builder().name("double").param("x").register_count(3);
            b.emit(Instruction::Add { dst: Register(2), lhs: Register(1), rhs: Register(1) });
            b.emit(Instruction::Return { src: Register(2) });
            Arc::new(b.build().unwrap())
        };
        let code = build(|b| {
            let f = b.add_code(callee);
            b.emit(Instruction::LoadFunction { dst: Register(1), code: f });
            b.emit(Instruction::LoadUndefined { dst: Register(2) });
            b.emit(Instruction::LoadInt32 { dst: Register(3), value: 21 });
            b.emit(Instruction::Call { dst: Register(4), callee: Register(1), args: Register(2), argc: 1 });
            b.emit(Instruction::Return { src: Register(4) });
        });
        let mut ctx = VmContext::new();
        assert_eq!(ctx.run(code).unwrap(), Value::Int32(42));
        assert_eq!(ctx.stack().depth(), 0);
        assert_eq!(ctx.stack().top(), 0);
    }

    #[test]
    fn test_call_non_callable_is_type_error() {
        let code = build(|b| {
            b.emit(Instruction::LoadInt32 { dst: Register(1), value: 1 });
            b.emit(Instruction::Call { dst: Register(2), callee: Register(1), args: Register(3), argc: 0 });
        });
        assert!(matches!(run(code), Err(VmError::TypeError(_))));
    }

    #[test]
    fn test_catch_materializes_internal_error() {
        let code = build(|b| {
            let name = b.add_name("x");
            b.add_handler(Handler::catch(0, 1, 2, Register(1)));
            b.emit(Instruction::LoadName { dst: Register(2), name });
            b.emit(Instruction::Return { src: Register(2) });
            b.emit(Instruction::Return { src: Register(1) });
        });
        let value = run(code).unwrap();
        let error = value.as_object().unwrap();
        assert_eq!(error.class_name(), "Error");
        assert_eq!(value.describe(), "ReferenceError: x is not defined");
    }

    #[test]
    fn test_uncaught_throw_surfaces_value() {
        let code = build(|b| {
            b.emit(Instruction::LoadInt32 { dst: Register(1), value: 7 });
            b.emit(Instruction::Throw { src: Register(1) });
        });
        let err = run(code).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::Int32(7)));
    }

    #[test]
    fn test_construct_uses_prototype() {
        let ctor = {
            let mut b = Code::builder().name("Point").param("x").register_count(2);
            let x = b.add_name("x");
            let slot = b.add_cache_slot();
            b.emit(Instruction::StoreProp { base: Register::THIS, name: x, src: Register(1), cache: slot });
            Arc::new(b.build().unwrap())
        };
        let code = build(|b| {
            let f = b.add_code(ctor);
            let x = b.add_name("x");
            let slot = b.add_cache_slot();
            b.emit(Instruction::LoadFunction { dst: Register(1), code: f });
            b.emit(Instruction::LoadInt32 { dst: Register(3), value: 5 });
            b.emit(Instruction::Construct { dst: Register(4), callee: Register(1), args: Register(2), argc: 1 });
            b.emit(Instruction::InstanceOf { dst: Register(5), lhs: Register(4), rhs: Register(1) });
            b.emit(Instruction::IfFalse { cond: Register(5), offset: JumpOffset(3) });
            b.emit(Instruction::LoadProp { dst: Register(6), base: Register(4), name: x, cache: slot });
            b.emit(Instruction::Return { src: Register(6) });
            b.emit(Instruction::Return { src: Register(5) });
        });
        assert_eq!(run(code.clone()).unwrap(), Value::Int32(5));
        assert!(matches!(code.cache_state(CacheSlot(0)), CacheState::Monomorphic { .. }));
    }

    #[test]
    fn test_finally_rethrows() {
        // try { throw 3 } finally { } -> rethrow
        let code = build(|b| {
            b.add_handler(Handler::finally(0, 2, 2, Register(2), Register(3)));
            b.emit(Instruction::LoadInt32 { dst: Register(1), value: 3 });
            b.emit(Instruction::Throw { src: Register(1) });
            b.emit(Instruction::ReturnSubroutine { addr: Register(2), flag: Register(3) });
        });
        let err = run(code).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::Int32(3)));
    }

    #[test]
    fn test_arguments_object() {
        let callee = {
            let mut b = Code::builder().name("f").param("a").register_count(3);
            b.emit(Instruction::LoadArguments { dst: Register(2) });
            b.emit(Instruction::Return { src: Register(2) });
            Arc::new(b.build().unwrap())
        };
        let code = build(|b| {
            let f = b.add_code(callee);
            b.emit(Instruction::LoadFunction { dst: Register(1), code: f });
            b.emit(Instruction::LoadInt32 { dst: Register(3), value: 1 });
            b.emit(Instruction::LoadInt32 { dst: Register(4), value: 2 });
            b.emit(Instruction::Call { dst: Register(5), callee: Register(1), args: Register(2), argc: 2 });
            b.emit(Instruction::Return { src: Register(5) });
        });
        let value = run(code).unwrap();
        let args = value.as_object().unwrap();
        assert_eq!(args.lookup_data(&"length".into()), Some(Value::Int32(2)));
        assert_eq!(args.lookup_data(&PropertyKey::Index(1)), Some(Value::Int32(2)));
        assert!(args.lookup_data(&"callee".into()).is_some());
    }
}
