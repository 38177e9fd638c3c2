//! Property tests: int32 fast paths agree with double arithmetic

use std::sync::Arc;

use lumen_vm_bytecode::{Code, CodeBuilder, Instruction, JumpOffset, Register};
use lumen_vm_core::{Value, VmContext};
use proptest::prelude::*;

fn load(b: &mut CodeBuilder, dst: Register, value: Value) {
    match value {
        Value::Int32(i) => {
            b.emit(Instruction::LoadInt32 { dst, value: i });
        }
        other => {
            let idx = b.add_number(other.as_number().unwrap());
            b.emit(Instruction::LoadConst { dst, idx });
        }
    }
}

fn binary(op: fn(Register, Register, Register) -> Instruction, lhs: Value, rhs: Value) -> Value {
    let mut b = Code::builder().register_count(4);
    load(&mut b, Register(1), lhs);
    load(&mut b, Register(2), rhs);
    b.emit(op(Register(3), Register(1), Register(2)));
    b.emit(Instruction::Return { src: Register(3) });
    VmContext::new().run(Arc::new(b.build().unwrap())).unwrap()
}

fn add(dst: Register, lhs: Register, rhs: Register) -> Instruction {
    Instruction::Add { dst, lhs, rhs }
}

fn sub(dst: Register, lhs: Register, rhs: Register) -> Instruction {
    Instruction::Sub { dst, lhs, rhs }
}

fn mul(dst: Register, lhs: Register, rhs: Register) -> Instruction {
    Instruction::Mul { dst, lhs, rhs }
}

fn rem(dst: Register, lhs: Register, rhs: Register) -> Instruction {
    Instruction::Mod { dst, lhs, rhs }
}

fn as_f64(value: &Value) -> f64 {
    value.as_number().unwrap()
}

proptest! {
    #[test]
    fn test_int32_add_matches_double(a in any::<i32>(), b in any::<i32>()) {
        let fast = binary(add, Value::Int32(a), Value::Int32(b));
        let slow = binary(add, Value::Number(a as f64 + 0.5), Value::Number(-0.5));
        prop_assert_eq!(as_f64(&fast), a as f64 + b as f64);
        prop_assert_eq!(fast, Value::number(a as f64 + b as f64));
        prop_assert_eq!(slow, Value::number(a as f64));
    }

    #[test]
    fn test_int32_sub_matches_double(a in any::<i32>(), b in any::<i32>()) {
        let result = binary(sub, Value::Int32(a), Value::Int32(b));
        prop_assert_eq!(result, Value::number(a as f64 - b as f64));
    }

    #[test]
    fn test_int32_mul_matches_double(a in any::<i32>(), b in any::<i32>()) {
        let result = binary(mul, Value::Int32(a), Value::Int32(b));
        prop_assert_eq!(result, Value::number(a as f64 * b as f64));
    }

    #[test]
    fn test_small_mul_matches_double(a in -40_000i32..40_000, b in -40_000i32..40_000) {
        let result = binary(mul, Value::Int32(a), Value::Int32(b));
        prop_assert_eq!(result, Value::number(a as f64 * b as f64));
    }

    #[test]
    fn test_int32_mod_matches_double(a in any::<i32>(), b in any::<i32>()) {
        let result = binary(rem, Value::Int32(a), Value::Int32(b));
        prop_assert_eq!(result, Value::number(a as f64 % b as f64));
    }

    #[test]
    fn test_prefix_and_postfix_agree(start in any::<i32>()) {
        // r2 = r1++ ; r3 = ++r4 ; both counters must end equal
        let mut b = Code::builder().register_count(6);
        b.emit(Instruction::LoadInt32 { dst: Register(1), value: start });
        b.emit(Instruction::LoadInt32 { dst: Register(4), value: start });
        b.emit(Instruction::PostfixIncrement { dst: Register(2), src: Register(1) });
        b.emit(Instruction::Increment { src: Register(4) });
        b.emit(Instruction::Sub { dst: Register(5), lhs: Register(1), rhs: Register(2) });
        b.emit(Instruction::StrictEq { dst: Register(3), lhs: Register(1), rhs: Register(4) });
        b.emit(Instruction::IfFalse { cond: Register(3), offset: JumpOffset(2) });
        b.emit(Instruction::Return { src: Register(5) });
        b.emit(Instruction::Return { src: Register(3) });
        let result = VmContext::new().run(Arc::new(b.build().unwrap())).unwrap();
        prop_assert_eq!(result, Value::Int32(1));
    }
}

#[test]
fn test_negative_zero_results() {
    assert!(as_f64(&binary(rem, Value::Int32(-1), Value::Int32(-1))).is_sign_negative());
    assert!(as_f64(&binary(rem, Value::Int32(-4), Value::Int32(2))).is_sign_negative());
    assert!(as_f64(&binary(mul, Value::Int32(0), Value::Int32(-5))).is_sign_negative());
    assert!(as_f64(&binary(mul, Value::Int32(-5), Value::Int32(0))).is_sign_negative());
    assert_eq!(binary(rem, Value::Int32(4), Value::Int32(2)), Value::Int32(0));
    assert_eq!(binary(rem, Value::Int32(4), Value::Int32(0)), Value::Number(f64::NAN));
}

#[test]
fn test_overflow_leaves_int32() {
    assert_eq!(
        binary(add, Value::Int32(i32::MAX), Value::Int32(1)),
        Value::Number(2_147_483_648.0)
    );
    assert_eq!(
        binary(sub, Value::Int32(i32::MIN), Value::Int32(1)),
        Value::Number(-2_147_483_649.0)
    );
    assert_eq!(
        binary(mul, Value::Int32(65_536), Value::Int32(65_536)),
        Value::Number(4_294_967_296.0)
    );
}

#[test]
fn test_postfix_returns_numeric_old_value() {
    // var s = "5"; return s++  -> 5 (a number), s becomes 6
    let mut b = Code::builder().register_count(4);
    let five = b.add_string("5");
    b.emit(Instruction::LoadConst { dst: Register(1), idx: five });
    b.emit(Instruction::PostfixIncrement { dst: Register(2), src: Register(1) });
    b.emit(Instruction::Add { dst: Register(3), lhs: Register(1), rhs: Register(2) });
    b.emit(Instruction::Return { src: Register(3) });
    let result = VmContext::new().run(Arc::new(b.build().unwrap())).unwrap();
    assert_eq!(result, Value::Int32(11));
}

#[test]
fn test_increment_at_int32_max() {
    let mut b = Code::builder().register_count(2);
    b.emit(Instruction::LoadInt32 { dst: Register(1), value: i32::MAX });
    b.emit(Instruction::Increment { src: Register(1) });
    b.emit(Instruction::Return { src: Register(1) });
    let result = VmContext::new().run(Arc::new(b.build().unwrap())).unwrap();
    assert_eq!(result, Value::Number(2_147_483_648.0));
}
