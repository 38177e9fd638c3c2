//! Inline cache behaviour seen from bytecode
//!
//! Caching must be invisible: every program here is run with caching on and
//! off and the two results compared.

use std::sync::Arc;

use lumen_vm_bytecode::{CacheSlot, CacheState, Code, Instruction, Register};
use lumen_vm_core::{PropertyAttributes, PropertyDescriptor, PropertyKey, Value, VmConfig, VmContext};
use proptest::prelude::*;

const SHAPES: usize = 5;

/// `function get(o) { return o.x }`
fn getter_code() -> Arc<Code> {
    let mut b = Code::builder().name("get").param("o").register_count(3);
    let x = b.add_name("x");
    let slot = b.add_cache_slot();
    b.emit(Instruction::LoadProp { dst: Register(2), base: Register(1), name: x, cache: slot });
    b.emit(Instruction::Return { src: Register(2) });
    Arc::new(b.build().unwrap())
}

/// Reads `x` from five differently shaped objects in `order`, then mutates
/// two of them and reads again, concatenating every result.
fn program(order: &[usize]) -> Arc<Code> {
    let four = {
        let mut b = Code::builder().name("four").register_count(2);
        b.emit(Instruction::LoadInt32 { dst: Register(1), value: 4 });
        b.emit(Instruction::Return { src: Register(1) });
        Arc::new(b.build().unwrap())
    };
    let results = 10u16;
    let count = order.len() as u16 * 2;
    let mut b = Code::builder().name("main").register_count(results + count + 1);
    let x = b.add_name("x");
    let a = b.add_name("a");
    let bb = b.add_name("b");
    let c = b.add_name("c");
    let get = b.add_code(getter_code());
    let four = b.add_code(four);
    let store_slot = b.add_cache_slot();

    b.emit(Instruction::LoadFunction { dst: Register(1), code: get });
    // {x: 1}
    b.emit(Instruction::LoadObject { dst: Register(2) });
    b.emit(Instruction::LoadInt32 { dst: Register(9), value: 1 });
    b.emit(Instruction::StoreObjectData { object: Register(2), name: x, src: Register(9) });
    // {a: 0, x: 2}
    b.emit(Instruction::LoadObject { dst: Register(3) });
    b.emit(Instruction::LoadInt32 { dst: Register(9), value: 0 });
    b.emit(Instruction::StoreObjectData { object: Register(3), name: a, src: Register(9) });
    b.emit(Instruction::LoadInt32 { dst: Register(9), value: 2 });
    b.emit(Instruction::StoreObjectData { object: Register(3), name: x, src: Register(9) });
    // {b: 0, c: 0, x: 3}
    b.emit(Instruction::LoadObject { dst: Register(4) });
    b.emit(Instruction::LoadInt32 { dst: Register(9), value: 0 });
    b.emit(Instruction::StoreObjectData { object: Register(4), name: bb, src: Register(9) });
    b.emit(Instruction::StoreObjectData { object: Register(4), name: c, src: Register(9) });
    b.emit(Instruction::LoadInt32 { dst: Register(9), value: 3 });
    b.emit(Instruction::StoreObjectData { object: Register(4), name: x, src: Register(9) });
    // {get x() { return 4 }}
    b.emit(Instruction::LoadObject { dst: Register(5) });
    b.emit(Instruction::LoadFunction { dst: Register(9), code: four });
    b.emit(Instruction::StoreObjectGet { object: Register(5), name: x, src: Register(9) });
    // {x: 5}, same shape as the first
    b.emit(Instruction::LoadObject { dst: Register(6) });
    b.emit(Instruction::LoadInt32 { dst: Register(9), value: 5 });
    b.emit(Instruction::StoreObjectData { object: Register(6), name: x, src: Register(9) });

    let emit_reads = |b: &mut lumen_vm_bytecode::CodeBuilder, first: u16| {
        for (k, &i) in order.iter().enumerate() {
            b.emit(Instruction::LoadUndefined { dst: Register(7) });
            b.emit(Instruction::Mv { dst: Register(8), src: Register(2 + i as u16) });
            b.emit(Instruction::Call {
                dst: Register(first + k as u16),
                callee: Register(1),
                args: Register(7),
                argc: 1,
            });
        }
    };
    emit_reads(&mut b, results);

    // o0.x = 10; delete o1.x
    b.emit(Instruction::LoadInt32 { dst: Register(9), value: 10 });
    b.emit(Instruction::StoreProp { base: Register(2), name: x, src: Register(9), cache: store_slot });
    b.emit(Instruction::DeleteProp { dst: Register(9), base: Register(3), name: x });

    emit_reads(&mut b, results + order.len() as u16);
    b.emit(Instruction::Concat { dst: Register(9), start: Register(results), count });
    b.emit(Instruction::Return { src: Register(9) });
    Arc::new(b.build().unwrap())
}

fn expected(order: &[usize]) -> String {
    let before = ["1", "2", "3", "4", "5"];
    let after = ["10", "undefined", "3", "4", "5"];
    let mut out = String::new();
    for &i in order {
        out.push_str(before[i]);
    }
    for &i in order {
        out.push_str(after[i]);
    }
    out
}

fn run(order: &[usize], inline_caching: bool) -> Value {
    let config = VmConfig {
        inline_caching,
        ..VmConfig::default()
    };
    VmContext::with_config(config).run(program(order)).unwrap()
}

#[test]
fn test_cached_and_uncached_agree() {
    for order in [
        vec![0, 1, 2, 3, 4],
        vec![4, 3, 2, 1, 0],
        vec![0, 0, 4, 4, 0],
        vec![3, 3, 0, 1, 3],
        vec![2, 0, 2, 1, 4, 4, 3, 0],
    ] {
        let cached = run(&order, true);
        let generic = run(&order, false);
        assert_eq!(cached, generic, "order {order:?}");
        assert_eq!(cached, Value::from(expected(&order).as_str()), "order {order:?}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_cache_transparency(order in prop::collection::vec(0..SHAPES, 1..12)) {
        let cached = run(&order, true);
        let generic = run(&order, false);
        prop_assert_eq!(&cached, &generic);
        prop_assert_eq!(cached, Value::from(expected(&order).as_str()));
    }
}

fn object_with(ctx: &VmContext, names: &[&str]) -> Value {
    let object = ctx.realm().new_object();
    for (i, name) in names.iter().enumerate() {
        object.define_own_property(PropertyKey::from(*name), PropertyDescriptor::data(Value::Int32(i as i32)));
    }
    Value::Object(object)
}

#[test]
fn test_state_progression() {
    let mut ctx = VmContext::new();
    let code = getter_code();
    let scope = ctx.realm().global_env.clone();
    let get = Value::Object(ctx.realm().new_function(Arc::clone(&code), scope));
    let slot = CacheSlot(0);

    assert_eq!(code.cache_state(slot), CacheState::Uninitialized);

    let a1 = object_with(&ctx, &["x"]);
    let a2 = object_with(&ctx, &["x"]);
    ctx.call(&get, Value::Undefined, &[a1]).unwrap();
    let mono = code.cache_state(slot);
    assert!(matches!(mono, CacheState::Monomorphic { offset: 0, .. }));
    ctx.call(&get, Value::Undefined, &[a2]).unwrap();
    assert_eq!(code.cache_state(slot), mono);

    let b = object_with(&ctx, &["y", "x"]);
    assert_eq!(ctx.call(&get, Value::Undefined, &[b]).unwrap(), Value::Int32(1));
    assert!(matches!(code.cache_state(slot), CacheState::Megamorphic { offset: 1, .. }));

    // Inherited hits are never cached.
    let proto = ctx.realm().new_object();
    proto.define_own_property(PropertyKey::from("x"), PropertyDescriptor::data(Value::Int32(9)));
    let child = Value::Object(ctx.realm().new_object_with_proto(Some(proto)));
    assert_eq!(ctx.call(&get, Value::Undefined, &[child]).unwrap(), Value::Int32(9));
    assert_eq!(code.cache_state(slot), CacheState::Uncached);

    // Uncached is terminal.
    let a3 = object_with(&ctx, &["x"]);
    assert_eq!(ctx.call(&get, Value::Undefined, &[a3]).unwrap(), Value::Int32(0));
    assert_eq!(code.cache_state(slot), CacheState::Uncached);
}

#[test]
fn test_disabled_caching_leaves_sites_untouched() {
    let config = VmConfig {
        inline_caching: false,
        ..VmConfig::default()
    };
    let mut ctx = VmContext::with_config(config);
    let code = getter_code();
    let scope = ctx.realm().global_env.clone();
    let get = Value::Object(ctx.realm().new_function(Arc::clone(&code), scope));
    let object = object_with(&ctx, &["x"]);
    assert_eq!(ctx.call(&get, Value::Undefined, &[object]).unwrap(), Value::Int32(0));
    assert_eq!(code.cache_state(CacheSlot(0)), CacheState::Uninitialized);
}

#[test]
fn test_global_load_sees_redefinition() {
    let code = {
        let mut b = Code::builder().name("main").register_count(3);
        let g = b.add_name("g");
        let slot = b.add_cache_slot();
        b.emit(Instruction::LoadGlobal { dst: Register(1), name: g, cache: slot });
        b.emit(Instruction::Return { src: Register(1) });
        Arc::new(b.build().unwrap())
    };
    let mut ctx = VmContext::new();
    ctx.define_global("g", Value::Int32(1));
    assert_eq!(ctx.run(Arc::clone(&code)).unwrap(), Value::Int32(1));
    assert!(matches!(code.cache_state(CacheSlot(0)), CacheState::Monomorphic { .. }));

    ctx.define_global("g", Value::Int32(2));
    assert_eq!(ctx.run(Arc::clone(&code)).unwrap(), Value::Int32(2));

    ctx.define_global("other", Value::Null);
    assert_eq!(ctx.run(code).unwrap(), Value::Int32(2));
}

/// `function set(o) { o.x = 5 }`
fn setter_code() -> Arc<Code> {
    let mut b = Code::builder().name("set").param("o").register_count(3);
    let x = b.add_name("x");
    let slot = b.add_cache_slot();
    b.emit(Instruction::LoadInt32 { dst: Register(2), value: 5 });
    b.emit(Instruction::StoreProp { base: Register(1), name: x, src: Register(2), cache: slot });
    b.emit(Instruction::Return { src: Register(2) });
    Arc::new(b.build().unwrap())
}

#[test]
fn test_fresh_site_hits_shared_table() {
    let mut ctx = VmContext::new();
    let scope = ctx.realm().global_env.clone();
    let first = getter_code();
    let second = getter_code();
    let get1 = Value::Object(ctx.realm().new_function(Arc::clone(&first), scope.clone()));
    let get2 = Value::Object(ctx.realm().new_function(Arc::clone(&second), scope));

    let a1 = object_with(&ctx, &["x"]);
    let a2 = object_with(&ctx, &["x"]);
    ctx.call(&get1, Value::Undefined, &[a1]).unwrap();
    assert!(matches!(first.cache_state(CacheSlot(0)), CacheState::Monomorphic { .. }));

    // the second site has never run; the entry left by the first one serves it
    assert_eq!(ctx.call(&get2, Value::Undefined, &[a2.clone()]).unwrap(), Value::Int32(0));
    assert!(matches!(second.cache_state(CacheSlot(0)), CacheState::Megamorphic { offset: 0, .. }));

    // stores share the table too
    let store = setter_code();
    let scope = ctx.realm().global_env.clone();
    let set = Value::Object(ctx.realm().new_function(Arc::clone(&store), scope));
    ctx.call(&set, Value::Undefined, &[a2.clone()]).unwrap();
    assert!(matches!(store.cache_state(CacheSlot(0)), CacheState::Megamorphic { offset: 0, .. }));
    assert_eq!(ctx.call(&get2, Value::Undefined, &[a2]).unwrap(), Value::Int32(5));
}

#[test]
fn test_shared_table_never_writes_read_only() {
    let mut ctx = VmContext::new();
    let scope = ctx.realm().global_env.clone();
    let load = getter_code();
    let store = setter_code();
    let get = Value::Object(ctx.realm().new_function(Arc::clone(&load), scope.clone()));
    let set = Value::Object(ctx.realm().new_function(Arc::clone(&store), scope));

    let object = ctx.realm().new_object();
    object.define_own_property(
        PropertyKey::from("x"),
        PropertyDescriptor::data_with_attrs(Value::Int32(1), PropertyAttributes::new(false, true, true)),
    );
    let object = Value::Object(object);
    ctx.call(&get, Value::Undefined, &[object.clone()]).unwrap();

    // sloppy assignment to a read-only property is silently ignored
    ctx.call(&set, Value::Undefined, &[object.clone()]).unwrap();
    assert_eq!(ctx.call(&get, Value::Undefined, &[object]).unwrap(), Value::Int32(1));
    assert_eq!(store.cache_state(CacheSlot(0)), CacheState::Uncached);
}
