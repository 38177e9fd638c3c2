//! Exception unwinding through handler tables and frames

use std::sync::Arc;

use lumen_vm_bytecode::{Code, CodeBuilder, Handler, Instruction, JumpOffset, Register};
use lumen_vm_core::{Value, VmContext, VmError};
use tracing_subscriber::filter::EnvFilter;

/// Route handler-dispatch logs to the test output (`RUST_LOG=lumen_vm_core=debug`)
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn build(f: impl FnOnce(&mut CodeBuilder)) -> Arc<Code> {
    let mut b = Code::builder().name("main").register_count(10);
    f(&mut b);
    Arc::new(b.build().unwrap())
}

fn assert_balanced(ctx: &VmContext) {
    assert_eq!(ctx.stack().depth(), 0);
    assert_eq!(ctx.stack().top(), 0);
    assert_eq!(ctx.stack().frames_created(), ctx.stack().frames_unwound());
}

/// `for (k in {a: 1, b: 1}) throw k;` optionally wrapped in `try/catch (e) { return e }`
fn throwing_for_in(catch: bool) -> Arc<Code> {
    build(|b| {
        let a = b.add_name("a");
        let bb = b.add_name("b");
        let outer = catch.then(|| b.add_handler(Handler::catch(4, 11, 11, Register(6))));
        let iterator = Handler::iterator(5, 8, Register(3));
        b.add_handler(match outer {
            Some(parent) => iterator.within(parent),
            None => iterator,
        });
        b.emit(Instruction::LoadObject { dst: Register(1) });
        b.emit(Instruction::LoadInt32 { dst: Register(2), value: 1 });
        b.emit(Instruction::StoreObjectData { object: Register(1), name: a, src: Register(2) });
        b.emit(Instruction::StoreObjectData { object: Register(1), name: bb, src: Register(2) });
        b.emit(Instruction::ForInSetup { iterator: Register(3), enumerable: Register(1), offset: JumpOffset(5) });
        b.emit(Instruction::ForInEnumerate { dst: Register(4), iterator: Register(3), offset: JumpOffset(3) });
        b.emit(Instruction::Throw { src: Register(4) });
        b.emit(Instruction::JumpBy { offset: JumpOffset(-2) });
        b.emit(Instruction::ForInLeave { iterator: Register(3) });
        b.emit(Instruction::LoadUndefined { dst: Register(5) });
        b.emit(Instruction::Return { src: Register(5) });
        b.emit(Instruction::Return { src: Register(6) });
    })
}

#[test]
fn test_catch_releases_enumerator() {
    init_tracing();
    let mut ctx = VmContext::new();
    assert_eq!(ctx.run(throwing_for_in(true)).unwrap(), Value::from("a"));
    assert_eq!(ctx.live_iterators(), 0);
    assert_balanced(&ctx);
}

#[test]
fn test_uncaught_throw_releases_enumerator() {
    let mut ctx = VmContext::new();
    let err = ctx.run(throwing_for_in(false)).unwrap_err();
    assert_eq!(err.thrown_value(), Some(&Value::from("a")));
    assert_eq!(ctx.live_iterators(), 0);
    assert_balanced(&ctx);
}

#[test]
fn test_throw_in_for_in_runs_finally_once_before_outer_catch() {
    init_tracing();
    // try { try { for (k in {a: 1}) throw k } finally { n++ } } catch (e) { return e + n }
    let code = {
        let mut b = Code::builder().name("main").register_count(13);
        let a = b.add_name("a");
        let outer = b.add_handler(Handler::catch(4, 14, 14, Register(10)));
        let finally = b.add_handler(Handler::finally(4, 9, 12, Register(8), Register(9)).within(outer));
        b.add_handler(Handler::iterator(5, 8, Register(3)).within(finally));
        b.emit(Instruction::LoadObject { dst: Register(1) });
        b.emit(Instruction::LoadInt32 { dst: Register(2), value: 1 });
        b.emit(Instruction::StoreObjectData { object: Register(1), name: a, src: Register(2) });
        b.emit(Instruction::LoadInt32 { dst: Register(11), value: 0 });
        b.emit(Instruction::ForInSetup { iterator: Register(3), enumerable: Register(1), offset: JumpOffset(5) });
        b.emit(Instruction::ForInEnumerate { dst: Register(4), iterator: Register(3), offset: JumpOffset(3) });
        b.emit(Instruction::Throw { src: Register(4) });
        b.emit(Instruction::JumpBy { offset: JumpOffset(-2) });
        b.emit(Instruction::ForInLeave { iterator: Register(3) });
        b.emit(Instruction::JumpSubroutine { offset: JumpOffset(3), addr: Register(8), flag: Register(9) });
        b.emit(Instruction::LoadUndefined { dst: Register(5) });
        b.emit(Instruction::Return { src: Register(5) });
        b.emit(Instruction::Increment { src: Register(11) });
        b.emit(Instruction::ReturnSubroutine { addr: Register(8), flag: Register(9) });
        b.emit(Instruction::Concat { dst: Register(12), start: Register(10), count: 2 });
        b.emit(Instruction::Return { src: Register(12) });
        Arc::new(b.build().unwrap())
    };
    let mut ctx = VmContext::new();
    // the original key reaches the catch, and the finally body ran exactly once
    assert_eq!(ctx.run(code).unwrap(), Value::from("a1"));
    assert_eq!(ctx.live_iterators(), 0);
    assert_balanced(&ctx);
}

#[test]
fn test_for_in_over_null_skips_loop() {
    let code = build(|b| {
        b.emit(Instruction::LoadNull { dst: Register(1) });
        b.emit(Instruction::LoadInt32 { dst: Register(5), value: 0 });
        b.emit(Instruction::ForInSetup { iterator: Register(3), enumerable: Register(1), offset: JumpOffset(4) });
        b.emit(Instruction::ForInEnumerate { dst: Register(4), iterator: Register(3), offset: JumpOffset(3) });
        b.emit(Instruction::Increment { src: Register(5) });
        b.emit(Instruction::JumpBy { offset: JumpOffset(-2) });
        b.emit(Instruction::Return { src: Register(5) });
    });
    let mut ctx = VmContext::new();
    assert_eq!(ctx.run(code).unwrap(), Value::Int32(0));
    assert_eq!(ctx.live_iterators(), 0);
}

#[test]
fn test_finally_on_normal_completion() {
    // try { r1 = 1 } finally { r2 = 2 } return r1 + r2
    let code = build(|b| {
        b.add_handler(Handler::finally(0, 1, 4, Register(8), Register(9)));
        b.emit(Instruction::LoadInt32 { dst: Register(1), value: 1 });
        b.emit(Instruction::JumpSubroutine { offset: JumpOffset(3), addr: Register(8), flag: Register(9) });
        b.emit(Instruction::Add { dst: Register(3), lhs: Register(1), rhs: Register(2) });
        b.emit(Instruction::Return { src: Register(3) });
        b.emit(Instruction::LoadInt32 { dst: Register(2), value: 2 });
        b.emit(Instruction::ReturnSubroutine { addr: Register(8), flag: Register(9) });
    });
    assert_eq!(VmContext::new().run(code).unwrap(), Value::Int32(3));
}

#[test]
fn test_finally_rethrow_reaches_outer_catch() {
    // try { try { throw 5 } finally { r2 = 7 } } catch (e) { return e + r2 }
    let code = build(|b| {
        let outer = b.add_handler(Handler::catch(0, 4, 4, Register(6)));
        b.add_handler(Handler::finally(0, 2, 2, Register(8), Register(9)).within(outer));
        b.emit(Instruction::LoadInt32 { dst: Register(1), value: 5 });
        b.emit(Instruction::Throw { src: Register(1) });
        b.emit(Instruction::LoadInt32 { dst: Register(2), value: 7 });
        b.emit(Instruction::ReturnSubroutine { addr: Register(8), flag: Register(9) });
        b.emit(Instruction::Add { dst: Register(3), lhs: Register(6), rhs: Register(2) });
        b.emit(Instruction::Return { src: Register(3) });
    });
    assert_eq!(VmContext::new().run(code).unwrap(), Value::Int32(12));
}

#[test]
fn test_throw_crosses_frames() {
    let thrower = {
        let mut b = Code::builder().name("thrower").register_count(2);
        b.emit(Instruction::LoadInt32 { dst: Register(1), value: 9 });
        b.emit(Instruction::Throw { src: Register(1) });
        Arc::new(b.build().unwrap())
    };
    let code = build(|b| {
        let f = b.add_code(thrower);
        b.add_handler(Handler::catch(2, 3, 4, Register(4)));
        b.emit(Instruction::LoadFunction { dst: Register(1), code: f });
        b.emit(Instruction::LoadUndefined { dst: Register(2) });
        b.emit(Instruction::Call { dst: Register(3), callee: Register(1), args: Register(2), argc: 0 });
        b.emit(Instruction::Return { src: Register(3) });
        b.emit(Instruction::Return { src: Register(4) });
    });
    let mut ctx = VmContext::new();
    assert_eq!(ctx.run(code).unwrap(), Value::Int32(9));
    assert_balanced(&ctx);
}

#[test]
fn test_catch_scope_binding() {
    // try { missing } catch (e) { return e.message }
    let code = build(|b| {
        let missing = b.add_name("missing");
        let e = b.add_name("e");
        let message = b.add_name("message");
        let slot = b.add_cache_slot();
        b.add_handler(Handler::catch(0, 2, 2, Register(2)));
        b.emit(Instruction::LoadName { dst: Register(1), name: missing });
        b.emit(Instruction::Return { src: Register(1) });
        b.emit(Instruction::TryCatchSetup { error: Register(2), name: e });
        b.emit(Instruction::LoadName { dst: Register(3), name: e });
        b.emit(Instruction::PopEnv);
        b.emit(Instruction::LoadProp { dst: Register(4), base: Register(3), name: message, cache: slot });
        b.emit(Instruction::Return { src: Register(4) });
    });
    assert_eq!(VmContext::new().run(code).unwrap(), Value::from("missing is not defined"));
}

#[test]
fn test_env_handler_pops_with_scope() {
    // try { with ({a: "inner"}) { throw 1 } } catch { return a }
    let code = build(|b| {
        let a = b.add_name("a");
        let inner = b.add_string("inner");
        let catch = b.add_handler(Handler::catch(3, 9, 9, Register(6)));
        b.add_handler(Handler::env(4, 6).within(catch));
        b.emit(Instruction::LoadObject { dst: Register(1) });
        b.emit(Instruction::LoadConst { dst: Register(2), idx: inner });
        b.emit(Instruction::StoreObjectData { object: Register(1), name: a, src: Register(2) });
        b.emit(Instruction::WithSetup { src: Register(1) });
        b.emit(Instruction::LoadInt32 { dst: Register(3), value: 1 });
        b.emit(Instruction::Throw { src: Register(3) });
        b.emit(Instruction::PopEnv);
        b.emit(Instruction::LoadUndefined { dst: Register(4) });
        b.emit(Instruction::Return { src: Register(4) });
        b.emit(Instruction::LoadName { dst: Register(5), name: a });
        b.emit(Instruction::Return { src: Register(5) });
    });
    let mut ctx = VmContext::new();
    ctx.define_global("a", Value::from("global"));
    assert_eq!(ctx.run(code).unwrap(), Value::from("global"));
}

#[test]
fn test_internal_error_skips_handlers() {
    init_tracing();
    let code = build(|b| {
        b.add_handler(Handler::catch(0, 3, 3, Register(3)));
        b.emit(Instruction::LoadInt32 { dst: Register(1), value: 1 });
        b.emit(Instruction::ForInEnumerate { dst: Register(2), iterator: Register(1), offset: JumpOffset(2) });
        b.emit(Instruction::Return { src: Register(2) });
        b.emit(Instruction::Return { src: Register(3) });
    });
    let mut ctx = VmContext::new();
    let err = ctx.run(code).unwrap_err();
    assert!(matches!(err, VmError::InternalError(_)));
    assert!(!err.is_catchable());
    assert_balanced(&ctx);
}

#[test]
fn test_context_reusable_after_uncaught_error() {
    let mut ctx = VmContext::new();
    assert!(ctx.run(throwing_for_in(false)).is_err());
    let code = build(|b| {
        b.emit(Instruction::LoadInt32 { dst: Register(1), value: 1 });
        b.emit(Instruction::Return { src: Register(1) });
    });
    assert_eq!(ctx.run(code).unwrap(), Value::Int32(1));
    assert_balanced(&ctx);
}
