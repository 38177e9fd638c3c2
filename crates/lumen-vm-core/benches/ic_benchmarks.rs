//! Inline Cache (IC) Performance Benchmarks
//!
//! Measures named property loads across monomorphic, megamorphic and
//! uncached sites.

use criterion::{Criterion, criterion_group, criterion_main};
use lumen_vm_bytecode::{Code, Instruction, JumpOffset, Register};
use lumen_vm_core::{Value, VmConfig, VmContext};
use std::hint::black_box;
use std::sync::Arc;

const ITERATIONS: i32 = 1000;

/// Loop `ITERATIONS` times reading `x` from one of `shapes` objects per turn
///
/// Object `i` gets `i` filler properties before `x`, so every object has a
/// distinct shape.
fn property_loop(shapes: u16) -> Arc<Code> {
    let first_object = 10u16;
    let mut b = Code::builder().name("main").register_count(first_object + shapes + 1);
    let x = b.add_name("x");
    let fillers: Vec<_> = (0..shapes).map(|i| b.add_name(&format!("f{i}"))).collect();
    let slot = b.add_cache_slot();

    for i in 0..shapes {
        let object = Register(first_object + i);
        b.emit(Instruction::LoadObject { dst: object });
        b.emit(Instruction::LoadInt32 { dst: Register(5), value: 0 });
        for filler in &fillers[..i as usize] {
            b.emit(Instruction::StoreObjectData { object, name: *filler, src: Register(5) });
        }
        b.emit(Instruction::LoadInt32 { dst: Register(5), value: i as i32 });
        b.emit(Instruction::StoreObjectData { object, name: x, src: Register(5) });
    }

    // r1 = counter, r2 = limit, r3 = sum, r4 = scratch
    b.emit(Instruction::LoadInt32 { dst: Register(1), value: 0 });
    b.emit(Instruction::LoadInt32 { dst: Register(2), value: ITERATIONS });
    b.emit(Instruction::LoadInt32 { dst: Register(3), value: 0 });
    let loop_start = b.next_pc();
    for i in 0..shapes {
        b.emit(Instruction::LoadProp { dst: Register(4), base: Register(first_object + i), name: x, cache: slot });
        b.emit(Instruction::Add { dst: Register(3), lhs: Register(3), rhs: Register(4) });
    }
    b.emit(Instruction::Increment { src: Register(1) });
    b.emit(Instruction::Lt { dst: Register(4), lhs: Register(1), rhs: Register(2) });
    let back = loop_start as i32 - b.next_pc() as i32;
    b.emit(Instruction::IfTrue { cond: Register(4), offset: JumpOffset(back) });
    b.emit(Instruction::Return { src: Register(3) });
    Arc::new(b.build().expect("benchmark program is valid"))
}

fn run(code: &Arc<Code>, inline_caching: bool) -> Value {
    let config = VmConfig {
        inline_caching,
        ..VmConfig::default()
    };
    code.reset_feedback();
    VmContext::with_config(config).run(Arc::clone(code)).expect("benchmark program runs")
}

/// Benchmark: Monomorphic property access (IC hits consistently)
fn bench_monomorphic_property_access(c: &mut Criterion) {
    let code = property_loop(1);
    c.bench_function("ic_monomorphic_1000_reads", |b| {
        b.iter(|| black_box(run(black_box(&code), true)));
    });
}

/// Benchmark: Megamorphic property access (one site, eight shapes)
fn bench_megamorphic_property_access(c: &mut Criterion) {
    let code = property_loop(8);
    c.bench_function("ic_megamorphic_8000_reads", |b| {
        b.iter(|| black_box(run(black_box(&code), true)));
    });
}

/// Benchmark: Same programs with caching turned off
fn bench_uncached_property_access(c: &mut Criterion) {
    let mono = property_loop(1);
    let mega = property_loop(8);
    c.bench_function("ic_disabled_1000_reads", |b| {
        b.iter(|| black_box(run(black_box(&mono), false)));
    });
    c.bench_function("ic_disabled_8000_reads", |b| {
        b.iter(|| black_box(run(black_box(&mega), false)));
    });
}

criterion_group!(
    benches,
    bench_monomorphic_property_access,
    bench_megamorphic_property_access,
    bench_uncached_property_access
);
criterion_main!(benches);
