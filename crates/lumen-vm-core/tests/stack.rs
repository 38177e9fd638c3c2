//! Register stack exhaustion and recovery

use std::sync::Arc;

use lumen_vm_bytecode::{Code, Handler, Instruction, Register};
use lumen_vm_core::{ErrorKind, Value, VmConfig, VmContext, VmError};

/// `function f() { return f() }; return f()`, optionally inside `try/catch (e) { return e }`
fn runaway(catch: bool) -> Arc<Code> {
    let recurse = {
        let mut b = Code::builder().name("f").register_count(4);
        let f = b.add_name("f");
        let slot = b.add_cache_slot();
        b.emit(Instruction::LoadGlobal { dst: Register(1), name: f, cache: slot });
        b.emit(Instruction::LoadUndefined { dst: Register(2) });
        b.emit(Instruction::Call { dst: Register(3), callee: Register(1), args: Register(2), argc: 0 });
        b.emit(Instruction::Return { src: Register(3) });
        Arc::new(b.build().unwrap())
    };
    let mut b = Code::builder().name("main").register_count(6);
    let f_name = b.add_name("f");
    let f = b.add_code(recurse);
    let slot = b.add_cache_slot();
    if catch {
        b.add_handler(Handler::catch(3, 4, 5, Register(5)));
    }
    b.emit(Instruction::LoadFunction { dst: Register(1), code: f });
    b.emit(Instruction::StoreGlobal { name: f_name, src: Register(1), cache: slot });
    b.emit(Instruction::LoadUndefined { dst: Register(2) });
    b.emit(Instruction::Call { dst: Register(3), callee: Register(1), args: Register(2), argc: 0 });
    b.emit(Instruction::Return { src: Register(3) });
    b.emit(Instruction::Return { src: Register(5) });
    Arc::new(b.build().unwrap())
}

fn simple() -> Arc<Code> {
    let mut b = Code::builder().name("simple").register_count(2);
    b.emit(Instruction::LoadInt32 { dst: Register(1), value: 11 });
    b.emit(Instruction::Return { src: Register(1) });
    Arc::new(b.build().unwrap())
}

fn assert_balanced(ctx: &VmContext) {
    assert_eq!(ctx.stack().depth(), 0);
    assert_eq!(ctx.stack().call_depth(), 0);
    assert_eq!(ctx.stack().top(), 0);
    assert_eq!(ctx.stack().frames_created(), ctx.stack().frames_unwound());
}

#[test]
fn test_depth_limit_is_recoverable() {
    let config = VmConfig {
        max_call_depth: 50,
        ..VmConfig::default()
    };
    let mut ctx = VmContext::with_config(config);
    let err = ctx.run(runaway(false)).unwrap_err();
    assert!(matches!(err, VmError::StackOverflow));
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_balanced(&ctx);

    assert_eq!(ctx.run(simple()).unwrap(), Value::Int32(11));
    assert_balanced(&ctx);
}

#[test]
fn test_arena_exhaustion_is_recoverable() {
    let config = VmConfig {
        stack_capacity: 256,
        ..VmConfig::default()
    };
    let mut ctx = VmContext::with_config(config);
    assert!(matches!(ctx.run(runaway(false)), Err(VmError::StackOverflow)));
    assert_balanced(&ctx);
    assert_eq!(ctx.run(simple()).unwrap(), Value::Int32(11));
}

#[test]
fn test_overflow_is_catchable_as_range_error() {
    let config = VmConfig {
        max_call_depth: 20,
        ..VmConfig::default()
    };
    let mut ctx = VmContext::with_config(config);
    let caught = ctx.run(runaway(true)).unwrap();
    assert_eq!(caught.describe(), "RangeError: Maximum call stack size exceeded");
    assert_balanced(&ctx);
}

#[test]
fn test_entry_frame_too_large_for_arena() {
    let config = VmConfig {
        stack_capacity: 8,
        ..VmConfig::default()
    };
    let mut ctx = VmContext::with_config(config);
    let code = {
        let mut b = Code::builder().register_count(64);
        b.emit(Instruction::LoadInt32 { dst: Register(1), value: 1 });
        Arc::new(b.build().unwrap())
    };
    assert!(matches!(ctx.run(code), Err(VmError::StackOverflow)));
    assert_eq!(ctx.stack().top(), 0);
    assert_eq!(ctx.stack().depth(), 0);
}

#[test]
fn test_host_call_with_surplus_arguments() {
    let callee = {
        let mut b = Code::builder().name("f").param("a").register_count(3);
        let length = b.add_name("length");
        let slot = b.add_cache_slot();
        b.emit(Instruction::LoadArguments { dst: Register(2) });
        b.emit(Instruction::LoadProp { dst: Register(2), base: Register(2), name: length, cache: slot });
        b.emit(Instruction::Return { src: Register(2) });
        Arc::new(b.build().unwrap())
    };
    let mut ctx = VmContext::new();
    let scope = ctx.realm().global_env.clone();
    let f = Value::Object(ctx.realm().new_function(callee, scope));
    let args = [Value::Int32(1), Value::Int32(2), Value::Int32(3)];
    assert_eq!(ctx.call(&f, Value::Undefined, &args).unwrap(), Value::Int32(3));
    assert_balanced(&ctx);
}
