//! Bytecode instructions (opcodes)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BytecodeError;
use crate::operand::{CacheSlot, CodeIndex, ConstantIndex, JumpOffset, NameIndex, Register};

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident = $byte:literal, )*) => {
        /// Bytecode opcodes
        ///
        /// Register-based instruction set. One opcode per [`Instruction`]
        /// variant; the byte value is stable across versions.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Opcode {
            $( $(#[$doc])* $name = $byte, )*
        }

        impl Opcode {
            /// Every opcode, in byte order
            pub const ALL: &'static [Opcode] = &[$(Self::$name,)*];

            /// Convert from raw byte
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $byte => Some(Self::$name), )*
                    _ => None,
                }
            }

            /// Get opcode name
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name), )*
                }
            }
        }

        impl TryFrom<u8> for Opcode {
            type Error = BytecodeError;

            fn try_from(byte: u8) -> Result<Self, BytecodeError> {
                Self::from_byte(byte).ok_or(BytecodeError::InvalidOpcode(byte))
            }
        }
    };
}

opcodes! {
    // ==================== Constants / moves ====================
    /// No operation
    Nop = 0x00,
    /// Register copy: dst = src
    Mv = 0x01,
    /// Load constant from pool: dst = constants\[idx\]
    LoadConst = 0x02,
    /// Load integer immediate: dst = imm32
    LoadInt32 = 0x03,
    /// dst = undefined
    LoadUndefined = 0x04,
    /// dst = null
    LoadNull = 0x05,
    /// dst = true
    LoadTrue = 0x06,
    /// dst = false
    LoadFalse = 0x07,
    /// dst = <empty>
    LoadEmpty = 0x08,

    // ==================== Unary ====================
    /// dst = +src
    Positive = 0x10,
    /// dst = -src
    Negative = 0x11,
    /// dst = !src
    Not = 0x12,
    /// dst = ~src
    BitNot = 0x13,
    /// dst = typeof src
    TypeOf = 0x14,
    /// dst = ToNumber(src)
    ToNumber = 0x15,

    // ==================== Binary ====================
    /// dst = lhs + rhs
    Add = 0x20,
    /// dst = lhs - rhs
    Sub = 0x21,
    /// dst = lhs * rhs
    Mul = 0x22,
    /// dst = lhs / rhs
    Div = 0x23,
    /// dst = lhs % rhs
    Mod = 0x24,
    /// dst = lhs << rhs
    Shl = 0x25,
    /// dst = lhs >> rhs
    Shr = 0x26,
    /// dst = lhs >>> rhs
    Ushr = 0x27,
    /// dst = lhs < rhs
    Lt = 0x28,
    /// dst = lhs <= rhs
    Lte = 0x29,
    /// dst = lhs > rhs
    Gt = 0x2A,
    /// dst = lhs >= rhs
    Gte = 0x2B,
    /// dst = lhs instanceof rhs
    InstanceOf = 0x2C,
    /// dst = lhs in rhs
    In = 0x2D,
    /// dst = lhs == rhs
    Eq = 0x2E,
    /// dst = lhs === rhs
    StrictEq = 0x2F,
    /// dst = lhs != rhs
    Ne = 0x30,
    /// dst = lhs !== rhs
    StrictNe = 0x31,
    /// dst = lhs & rhs
    BitAnd = 0x32,
    /// dst = lhs ^ rhs
    BitXor = 0x33,
    /// dst = lhs | rhs
    BitOr = 0x34,

    // ==================== Register updates ====================
    /// ++src
    Increment = 0x38,
    /// --src
    Decrement = 0x39,
    /// dst = src++
    PostfixIncrement = 0x3A,
    /// dst = src--
    PostfixDecrement = 0x3B,

    // ==================== Names ====================
    /// dst = resolve(name)
    LoadName = 0x40,
    /// resolve(name) = src
    StoreName = 0x41,
    /// dst = delete name
    DeleteName = 0x42,
    /// dst = typeof name
    TypeOfName = 0x43,
    /// dst = ++name / name++ ...
    UpdateName = 0x44,

    // ==================== Heap (scope slots) ====================
    /// dst = env\[nest\]\[offset\]
    LoadHeap = 0x48,
    /// env\[nest\]\[offset\] = src
    StoreHeap = 0x49,
    /// dst = delete heap binding (always false)
    DeleteHeap = 0x4A,
    /// dst = typeof heap binding
    TypeOfHeap = 0x4B,
    /// Update heap binding
    UpdateHeap = 0x4C,

    // ==================== Globals ====================
    /// dst = global\[name\] (cached)
    LoadGlobal = 0x50,
    /// global\[name\] = src (cached)
    StoreGlobal = 0x51,
    /// dst = delete global\[name\]
    DeleteGlobal = 0x52,
    /// dst = typeof global\[name\]
    TypeOfGlobal = 0x53,
    /// Update global binding
    UpdateGlobal = 0x54,

    // ==================== Elements ====================
    /// dst = base\[element\]
    LoadElement = 0x58,
    /// base\[element\] = src
    StoreElement = 0x59,
    /// dst = delete base\[element\]
    DeleteElement = 0x5A,
    /// Update base\[element\]
    UpdateElement = 0x5B,

    // ==================== Properties ====================
    /// dst = base.name (cached)
    LoadProp = 0x60,
    /// base.name = src (cached)
    StoreProp = 0x61,
    /// dst = delete base.name
    DeleteProp = 0x62,
    /// Update base.name
    UpdateProp = 0x63,

    // ==================== Environments ====================
    /// Declare a function binding in the variable environment
    InstantiateDeclarationBinding = 0x68,
    /// Declare a var binding in the variable environment
    InstantiateVariableBinding = 0x69,
    /// Initialize an immutable heap binding
    InitializeHeapImmutable = 0x6A,
    /// Push an object environment for `with`
    WithSetup = 0x6B,
    /// Pop one lexical environment
    PopEnv = 0x6C,
    /// Push a catch environment binding name = error
    TryCatchSetup = 0x6D,

    // ==================== Control flow ====================
    /// pc += offset
    JumpBy = 0x70,
    /// if cond { pc += offset }
    IfTrue = 0x71,
    /// if !cond { pc += offset }
    IfFalse = 0x72,
    /// Enter a finally block
    JumpSubroutine = 0x73,
    /// Leave a finally block
    ReturnSubroutine = 0x74,
    /// Return from the current frame
    Return = 0x75,
    /// Throw a value
    Throw = 0x76,
    /// Throw a new error of a fixed kind
    Raise = 0x77,
    /// Throw for assignment to an immutable binding
    RaiseImmutable = 0x78,
    /// Debugger statement
    Debugger = 0x79,

    // ==================== For-in ====================
    /// Create an enumerator
    ForInSetup = 0x80,
    /// Produce the next key
    ForInEnumerate = 0x81,
    /// Release an enumerator
    ForInLeave = 0x82,

    // ==================== Literals ====================
    /// dst = {}
    LoadObject = 0x88,
    /// dst = new Array(size)
    LoadArray = 0x89,
    /// Copy registers into array elements
    InitVectorArrayElement = 0x8A,
    /// Define a data property on a literal
    StoreObjectData = 0x8B,
    /// Define a getter on a literal
    StoreObjectGet = 0x8C,
    /// Define a setter on a literal
    StoreObjectSet = 0x8D,
    /// dst = closure over a nested code object
    LoadFunction = 0x8E,
    /// dst = arguments object
    LoadArguments = 0x8F,

    // ==================== Calls ====================
    /// dst = callee.call(args...)
    Call = 0x90,
    /// dst = new callee(args...)
    Construct = 0x91,
    /// dst = eval(args...), direct when callee is the eval intrinsic
    Eval = 0x92,
    /// Resolve a name to a callee and its implicit this
    PrepareDynamicCall = 0x93,

    // ==================== Strings ====================
    /// dst = ToString(ToPrimitive(src))
    ToPrimitiveAndToString = 0x98,
    /// dst = concatenation of count registers
    Concat = 0x99,
}

impl Opcode {
    /// Convert to raw byte
    #[inline]
    pub const fn to_byte(self) -> u8 {
        self as u8
    }
}

/// The four increment/decrement flavors shared by every update opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateOp {
    /// ++x
    Increment,
    /// --x
    Decrement,
    /// x++
    PostfixIncrement,
    /// x--
    PostfixDecrement,
}

impl UpdateOp {
    /// +1 or -1
    #[inline]
    pub const fn delta(self) -> i32 {
        match self {
            Self::Increment | Self::PostfixIncrement => 1,
            Self::Decrement | Self::PostfixDecrement => -1,
        }
    }

    /// Whether the expression yields the old value
    #[inline]
    pub const fn is_postfix(self) -> bool {
        matches!(self, Self::PostfixIncrement | Self::PostfixDecrement)
    }
}

/// Error kind thrown by [`Instruction::Raise`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Error
    Error,
    /// TypeError
    Type,
    /// ReferenceError
    Reference,
    /// RangeError
    Range,
    /// SyntaxError
    Syntax,
}

/// How a finally block was entered, stored in the subroutine flag register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Completion {
    /// Normal fall-through; resume at the stored address
    Jump = 0,
    /// A `return` crossed the finally; the value register holds the result
    Return = 1,
    /// An exception entered the finally; the value register holds the error
    Throw = 2,
}

impl Completion {
    /// Decode a flag register value
    pub fn from_i32(flag: i32) -> Option<Self> {
        match flag {
            0 => Some(Self::Jump),
            1 => Some(Self::Return),
            2 => Some(Self::Throw),
            _ => None,
        }
    }
}

/// A decoded instruction with its operands
///
/// Call-family instructions read `argc + 1` consecutive registers starting at
/// `args`: the receiver followed by the arguments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Instruction {
    // Constants / moves
    Nop,
    Mv { dst: Register, src: Register },
    LoadConst { dst: Register, idx: ConstantIndex },
    LoadInt32 { dst: Register, value: i32 },
    LoadUndefined { dst: Register },
    LoadNull { dst: Register },
    LoadTrue { dst: Register },
    LoadFalse { dst: Register },
    LoadEmpty { dst: Register },

    // Unary
    Positive { dst: Register, src: Register },
    Negative { dst: Register, src: Register },
    Not { dst: Register, src: Register },
    BitNot { dst: Register, src: Register },
    TypeOf { dst: Register, src: Register },
    ToNumber { dst: Register, src: Register },

    // Binary
    Add { dst: Register, lhs: Register, rhs: Register },
    Sub { dst: Register, lhs: Register, rhs: Register },
    Mul { dst: Register, lhs: Register, rhs: Register },
    Div { dst: Register, lhs: Register, rhs: Register },
    Mod { dst: Register, lhs: Register, rhs: Register },
    Shl { dst: Register, lhs: Register, rhs: Register },
    Shr { dst: Register, lhs: Register, rhs: Register },
    Ushr { dst: Register, lhs: Register, rhs: Register },
    Lt { dst: Register, lhs: Register, rhs: Register },
    Lte { dst: Register, lhs: Register, rhs: Register },
    Gt { dst: Register, lhs: Register, rhs: Register },
    Gte { dst: Register, lhs: Register, rhs: Register },
    InstanceOf { dst: Register, lhs: Register, rhs: Register },
    In { dst: Register, lhs: Register, rhs: Register },
    Eq { dst: Register, lhs: Register, rhs: Register },
    StrictEq { dst: Register, lhs: Register, rhs: Register },
    Ne { dst: Register, lhs: Register, rhs: Register },
    StrictNe { dst: Register, lhs: Register, rhs: Register },
    BitAnd { dst: Register, lhs: Register, rhs: Register },
    BitXor { dst: Register, lhs: Register, rhs: Register },
    BitOr { dst: Register, lhs: Register, rhs: Register },

    // Register updates
    Increment { src: Register },
    Decrement { src: Register },
    PostfixIncrement { dst: Register, src: Register },
    PostfixDecrement { dst: Register, src: Register },

    // Names
    LoadName { dst: Register, name: NameIndex },
    StoreName { name: NameIndex, src: Register },
    DeleteName { dst: Register, name: NameIndex },
    TypeOfName { dst: Register, name: NameIndex },
    UpdateName { dst: Register, name: NameIndex, op: UpdateOp },

    // Heap
    LoadHeap { dst: Register, name: NameIndex, offset: u32, nest: u32 },
    StoreHeap { name: NameIndex, offset: u32, nest: u32, src: Register },
    DeleteHeap { dst: Register, name: NameIndex, offset: u32, nest: u32 },
    TypeOfHeap { dst: Register, name: NameIndex, offset: u32, nest: u32 },
    UpdateHeap { dst: Register, name: NameIndex, offset: u32, nest: u32, op: UpdateOp },

    // Globals
    LoadGlobal { dst: Register, name: NameIndex, cache: CacheSlot },
    StoreGlobal { name: NameIndex, src: Register, cache: CacheSlot },
    DeleteGlobal { dst: Register, name: NameIndex },
    TypeOfGlobal { dst: Register, name: NameIndex },
    UpdateGlobal { dst: Register, name: NameIndex, op: UpdateOp },

    // Elements
    LoadElement { dst: Register, base: Register, element: Register },
    StoreElement { base: Register, element: Register, src: Register },
    DeleteElement { dst: Register, base: Register, element: Register },
    UpdateElement { dst: Register, base: Register, element: Register, op: UpdateOp },

    // Properties
    LoadProp { dst: Register, base: Register, name: NameIndex, cache: CacheSlot },
    StoreProp { base: Register, name: NameIndex, src: Register, cache: CacheSlot },
    DeleteProp { dst: Register, base: Register, name: NameIndex },
    UpdateProp { dst: Register, base: Register, name: NameIndex, op: UpdateOp },

    // Environments
    InstantiateDeclarationBinding { name: NameIndex, configurable: bool },
    InstantiateVariableBinding { name: NameIndex, configurable: bool },
    InitializeHeapImmutable { offset: u32, src: Register },
    WithSetup { src: Register },
    PopEnv,
    TryCatchSetup { error: Register, name: NameIndex },

    // Control flow
    JumpBy { offset: JumpOffset },
    IfTrue { cond: Register, offset: JumpOffset },
    IfFalse { cond: Register, offset: JumpOffset },
    JumpSubroutine { offset: JumpOffset, addr: Register, flag: Register },
    ReturnSubroutine { addr: Register, flag: Register },
    Return { src: Register },
    Throw { src: Register },
    Raise { kind: ErrorCode, message: ConstantIndex },
    RaiseImmutable { name: NameIndex },
    Debugger,

    // For-in
    ForInSetup { iterator: Register, enumerable: Register, offset: JumpOffset },
    ForInEnumerate { dst: Register, iterator: Register, offset: JumpOffset },
    ForInLeave { iterator: Register },

    // Literals
    LoadObject { dst: Register },
    LoadArray { dst: Register, size: u32 },
    InitVectorArrayElement { array: Register, start: Register, index: u32, count: u16 },
    StoreObjectData { object: Register, name: NameIndex, src: Register },
    StoreObjectGet { object: Register, name: NameIndex, src: Register },
    StoreObjectSet { object: Register, name: NameIndex, src: Register },
    LoadFunction { dst: Register, code: CodeIndex },
    LoadArguments { dst: Register },

    // Calls
    Call { dst: Register, callee: Register, args: Register, argc: u16 },
    Construct { dst: Register, callee: Register, args: Register, argc: u16 },
    Eval { dst: Register, callee: Register, args: Register, argc: u16 },
    PrepareDynamicCall { callee: Register, this: Register, name: NameIndex },

    // Strings
    ToPrimitiveAndToString { dst: Register, src: Register },
    Concat { dst: Register, start: Register, count: u16 },
}

/// A single operand, as seen by validation and the disassembler
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// One register
    Reg(Register),
    /// `count` consecutive registers starting at the given one
    Regs(Register, u32),
    /// Constant pool index
    Const(ConstantIndex),
    /// Name table index
    Name(NameIndex),
    /// Nested code index
    Code(CodeIndex),
    /// Relative jump
    Jump(JumpOffset),
    /// Inline cache slot
    Cache(CacheSlot),
    /// Immediate integer
    Imm(i64),
    /// Immediate flag
    Flag(bool),
    /// Update flavor
    Update(UpdateOp),
    /// Error kind
    Error(ErrorCode),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg(r) => write!(f, "{r}"),
            Self::Regs(r, n) => write!(f, "{r}..+{n}"),
            Self::Const(c) => write!(f, "k{}", c.0),
            Self::Name(n) => write!(f, "n{}", n.0),
            Self::Code(c) => write!(f, "code{}", c.0),
            Self::Jump(j) => write!(f, "{:+}", j.0),
            Self::Cache(c) => write!(f, "ic{}", c.0),
            Self::Imm(v) => write!(f, "{v}"),
            Self::Flag(b) => write!(f, "{b}"),
            Self::Update(op) => write!(f, "{op:?}"),
            Self::Error(e) => write!(f, "{e:?}"),
        }
    }
}

impl Instruction {
    /// Opcode of this instruction
    pub const fn opcode(&self) -> Opcode {
        use Instruction as I;
        match self {
            I::Nop => Opcode::Nop,
            I::Mv { .. } => Opcode::Mv,
            I::LoadConst { .. } => Opcode::LoadConst,
            I::LoadInt32 { .. } => Opcode::LoadInt32,
            I::LoadUndefined { .. } => Opcode::LoadUndefined,
            I::LoadNull { .. } => Opcode::LoadNull,
            I::LoadTrue { .. } => Opcode::LoadTrue,
            I::LoadFalse { .. } => Opcode::LoadFalse,
            I::LoadEmpty { .. } => Opcode::LoadEmpty,
            I::Positive { .. } => Opcode::Positive,
            I::Negative { .. } => Opcode::Negative,
            I::Not { .. } => Opcode::Not,
            I::BitNot { .. } => Opcode::BitNot,
            I::TypeOf { .. } => Opcode::TypeOf,
            I::ToNumber { .. } => Opcode::ToNumber,
            I::Add { .. } => Opcode::Add,
            I::Sub { .. } => Opcode::Sub,
            I::Mul { .. } => Opcode::Mul,
            I::Div { .. } => Opcode::Div,
            I::Mod { .. } => Opcode::Mod,
            I::Shl { .. } => Opcode::Shl,
            I::Shr { .. } => Opcode::Shr,
            I::Ushr { .. } => Opcode::Ushr,
            I::Lt { .. } => Opcode::Lt,
            I::Lte { .. } => Opcode::Lte,
            I::Gt { .. } => Opcode::Gt,
            I::Gte { .. } => Opcode::Gte,
            I::InstanceOf { .. } => Opcode::InstanceOf,
            I::In { .. } => Opcode::In,
            I::Eq { .. } => Opcode::Eq,
            I::StrictEq { .. } => Opcode::StrictEq,
            I::Ne { .. } => Opcode::Ne,
            I::StrictNe { .. } => Opcode::StrictNe,
            I::BitAnd { .. } => Opcode::BitAnd,
            I::BitXor { .. } => Opcode::BitXor,
            I::BitOr { .. } => Opcode::BitOr,
            I::Increment { .. } => Opcode::Increment,
            I::Decrement { .. } => Opcode::Decrement,
            I::PostfixIncrement { .. } => Opcode::PostfixIncrement,
            I::PostfixDecrement { .. } => Opcode::PostfixDecrement,
            I::LoadName { .. } => Opcode::LoadName,
            I::StoreName { .. } => Opcode::StoreName,
            I::DeleteName { .. } => Opcode::DeleteName,
            I::TypeOfName { .. } => Opcode::TypeOfName,
            I::UpdateName { .. } => Opcode::UpdateName,
            I::LoadHeap { .. } => Opcode::LoadHeap,
            I::StoreHeap { .. } => Opcode::StoreHeap,
            I::DeleteHeap { .. } => Opcode::DeleteHeap,
            I::TypeOfHeap { .. } => Opcode::TypeOfHeap,
            I::UpdateHeap { .. } => Opcode::UpdateHeap,
            I::LoadGlobal { .. } => Opcode::LoadGlobal,
            I::StoreGlobal { .. } => Opcode::StoreGlobal,
            I::DeleteGlobal { .. } => Opcode::DeleteGlobal,
            I::TypeOfGlobal { .. } => Opcode::TypeOfGlobal,
            I::UpdateGlobal { .. } => Opcode::UpdateGlobal,
            I::LoadElement { .. } => Opcode::LoadElement,
            I::StoreElement { .. } => Opcode::StoreElement,
            I::DeleteElement { .. } => Opcode::DeleteElement,
            I::UpdateElement { .. } => Opcode::UpdateElement,
            I::LoadProp { .. } => Opcode::LoadProp,
            I::StoreProp { .. } => Opcode::StoreProp,
            I::DeleteProp { .. } => Opcode::DeleteProp,
            I::UpdateProp { .. } => Opcode::UpdateProp,
            I::InstantiateDeclarationBinding { .. } => Opcode::InstantiateDeclarationBinding,
            I::InstantiateVariableBinding { .. } => Opcode::InstantiateVariableBinding,
            I::InitializeHeapImmutable { .. } => Opcode::InitializeHeapImmutable,
            I::WithSetup { .. } => Opcode::WithSetup,
            I::PopEnv => Opcode::PopEnv,
            I::TryCatchSetup { .. } => Opcode::TryCatchSetup,
            I::JumpBy { .. } => Opcode::JumpBy,
            I::IfTrue { .. } => Opcode::IfTrue,
            I::IfFalse { .. } => Opcode::IfFalse,
            I::JumpSubroutine { .. } => Opcode::JumpSubroutine,
            I::ReturnSubroutine { .. } => Opcode::ReturnSubroutine,
            I::Return { .. } => Opcode::Return,
            I::Throw { .. } => Opcode::Throw,
            I::Raise { .. } => Opcode::Raise,
            I::RaiseImmutable { .. } => Opcode::RaiseImmutable,
            I::Debugger => Opcode::Debugger,
            I::ForInSetup { .. } => Opcode::ForInSetup,
            I::ForInEnumerate { .. } => Opcode::ForInEnumerate,
            I::ForInLeave { .. } => Opcode::ForInLeave,
            I::LoadObject { .. } => Opcode::LoadObject,
            I::LoadArray { .. } => Opcode::LoadArray,
            I::InitVectorArrayElement { .. } => Opcode::InitVectorArrayElement,
            I::StoreObjectData { .. } => Opcode::StoreObjectData,
            I::StoreObjectGet { .. } => Opcode::StoreObjectGet,
            I::StoreObjectSet { .. } => Opcode::StoreObjectSet,
            I::LoadFunction { .. } => Opcode::LoadFunction,
            I::LoadArguments { .. } => Opcode::LoadArguments,
            I::Call { .. } => Opcode::Call,
            I::Construct { .. } => Opcode::Construct,
            I::Eval { .. } => Opcode::Eval,
            I::PrepareDynamicCall { .. } => Opcode::PrepareDynamicCall,
            I::ToPrimitiveAndToString { .. } => Opcode::ToPrimitiveAndToString,
            I::Concat { .. } => Opcode::Concat,
        }
    }

    /// Operands in declaration order
    pub fn operands(&self) -> Vec<Operand> {
        use Instruction as I;
        use Operand::*;
        match *self {
            I::Nop | I::PopEnv | I::Debugger => vec![],
            I::Mv { dst, src }
            | I::Positive { dst, src }
            | I::Negative { dst, src }
            | I::Not { dst, src }
            | I::BitNot { dst, src }
            | I::TypeOf { dst, src }
            | I::ToNumber { dst, src }
            | I::PostfixIncrement { dst, src }
            | I::PostfixDecrement { dst, src }
            | I::ToPrimitiveAndToString { dst, src } => vec![Reg(dst), Reg(src)],
            I::LoadConst { dst, idx } => vec![Reg(dst), Const(idx)],
            I::LoadInt32 { dst, value } => vec![Reg(dst), Imm(value as i64)],
            I::LoadUndefined { dst }
            | I::LoadNull { dst }
            | I::LoadTrue { dst }
            | I::LoadFalse { dst }
            | I::LoadEmpty { dst }
            | I::LoadObject { dst }
            | I::LoadArguments { dst } => vec![Reg(dst)],
            I::Add { dst, lhs, rhs }
            | I::Sub { dst, lhs, rhs }
            | I::Mul { dst, lhs, rhs }
            | I::Div { dst, lhs, rhs }
            | I::Mod { dst, lhs, rhs }
            | I::Shl { dst, lhs, rhs }
            | I::Shr { dst, lhs, rhs }
            | I::Ushr { dst, lhs, rhs }
            | I::Lt { dst, lhs, rhs }
            | I::Lte { dst, lhs, rhs }
            | I::Gt { dst, lhs, rhs }
            | I::Gte { dst, lhs, rhs }
            | I::InstanceOf { dst, lhs, rhs }
            | I::In { dst, lhs, rhs }
            | I::Eq { dst, lhs, rhs }
            | I::StrictEq { dst, lhs, rhs }
            | I::Ne { dst, lhs, rhs }
            | I::StrictNe { dst, lhs, rhs }
            | I::BitAnd { dst, lhs, rhs }
            | I::BitXor { dst, lhs, rhs }
            | I::BitOr { dst, lhs, rhs } => vec![Reg(dst), Reg(lhs), Reg(rhs)],
            I::Increment { src } | I::Decrement { src } => vec![Reg(src)],
            I::LoadName { dst, name }
            | I::DeleteName { dst, name }
            | I::TypeOfName { dst, name }
            | I::DeleteGlobal { dst, name }
            | I::TypeOfGlobal { dst, name } => vec![Reg(dst), Name(name)],
            I::StoreName { name, src } => vec![Name(name), Reg(src)],
            I::UpdateName { dst, name, op } | I::UpdateGlobal { dst, name, op } => {
                vec![Reg(dst), Name(name), Update(op)]
            }
            I::LoadHeap { dst, name, offset, nest }
            | I::DeleteHeap { dst, name, offset, nest }
            | I::TypeOfHeap { dst, name, offset, nest } => {
                vec![Reg(dst), Name(name), Imm(offset as i64), Imm(nest as i64)]
            }
            I::StoreHeap { name, offset, nest, src } => {
                vec![Name(name), Imm(offset as i64), Imm(nest as i64), Reg(src)]
            }
            I::UpdateHeap { dst, name, offset, nest, op } => vec![
                Reg(dst),
                Name(name),
                Imm(offset as i64),
                Imm(nest as i64),
                Update(op),
            ],
            I::LoadGlobal { dst, name, cache } => vec![Reg(dst), Name(name), Cache(cache)],
            I::StoreGlobal { name, src, cache } => vec![Name(name), Reg(src), Cache(cache)],
            I::LoadElement { dst, base, element } | I::DeleteElement { dst, base, element } => {
                vec![Reg(dst), Reg(base), Reg(element)]
            }
            I::StoreElement { base, element, src } => vec![Reg(base), Reg(element), Reg(src)],
            I::UpdateElement { dst, base, element, op } => {
                vec![Reg(dst), Reg(base), Reg(element), Update(op)]
            }
            I::LoadProp { dst, base, name, cache } => {
                vec![Reg(dst), Reg(base), Name(name), Cache(cache)]
            }
            I::StoreProp { base, name, src, cache } => {
                vec![Reg(base), Name(name), Reg(src), Cache(cache)]
            }
            I::DeleteProp { dst, base, name } => vec![Reg(dst), Reg(base), Name(name)],
            I::UpdateProp { dst, base, name, op } => {
                vec![Reg(dst), Reg(base), Name(name), Update(op)]
            }
            I::InstantiateDeclarationBinding { name, configurable }
            | I::InstantiateVariableBinding { name, configurable } => {
                vec![Name(name), Flag(configurable)]
            }
            I::InitializeHeapImmutable { offset, src } => vec![Imm(offset as i64), Reg(src)],
            I::WithSetup { src } | I::Return { src } | I::Throw { src } => vec![Reg(src)],
            I::TryCatchSetup { error, name } => vec![Reg(error), Name(name)],
            I::JumpBy { offset } => vec![Jump(offset)],
            I::IfTrue { cond, offset } | I::IfFalse { cond, offset } => {
                vec![Reg(cond), Jump(offset)]
            }
            I::JumpSubroutine { offset, addr, flag } => vec![Jump(offset), Reg(addr), Reg(flag)],
            I::ReturnSubroutine { addr, flag } => vec![Reg(addr), Reg(flag)],
            I::Raise { kind, message } => vec![Error(kind), Const(message)],
            I::RaiseImmutable { name } => vec![Name(name)],
            I::ForInSetup { iterator, enumerable, offset } => {
                vec![Reg(iterator), Reg(enumerable), Jump(offset)]
            }
            I::ForInEnumerate { dst, iterator, offset } => {
                vec![Reg(dst), Reg(iterator), Jump(offset)]
            }
            I::ForInLeave { iterator } => vec![Reg(iterator)],
            I::LoadArray { dst, size } => vec![Reg(dst), Imm(size as i64)],
            I::InitVectorArrayElement { array, start, index, count } => {
                vec![Reg(array), Regs(start, u32::from(count)), Imm(index as i64)]
            }
            I::StoreObjectData { object, name, src }
            | I::StoreObjectGet { object, name, src }
            | I::StoreObjectSet { object, name, src } => vec![Reg(object), Name(name), Reg(src)],
            I::LoadFunction { dst, code } => vec![Reg(dst), Code(code)],
            I::Call { dst, callee, args, argc }
            | I::Construct { dst, callee, args, argc }
            | I::Eval { dst, callee, args, argc } => {
                vec![Reg(dst), Reg(callee), Regs(args, u32::from(argc) + 1)]
            }
            I::PrepareDynamicCall { callee, this, name } => {
                vec![Reg(callee), Reg(this), Name(name)]
            }
            I::Concat { dst, start, count } => vec![Reg(dst), Regs(start, u32::from(count))],
        }
    }

    /// Relative jump operand, if this instruction can branch
    pub fn jump_offset(&self) -> Option<JumpOffset> {
        self.operands().into_iter().find_map(|op| match op {
            Operand::Jump(offset) => Some(offset),
            _ => None,
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode().name())?;
        for (i, operand) in self.operands().iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{operand}")?;
        }
        Ok(())
    }
}
