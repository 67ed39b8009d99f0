//! Opcodes consumed by the dispatch loop
//!
//! Instructions address their data through [`Operand`]s: byte offsets into the
//! current stack frame, into the function's constant pool, or into the object
//! behind a handle held in the frame.

use super::types::{FunctionId, PrimitiveKind, ScalarKind, TypeId};
use std::fmt;

/// Where an instruction reads or writes its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Byte offset into the current stack frame
    Local(usize),
    /// Byte offset into the function's constant pool (read only)
    Constant(usize),
    /// Byte offset into the object referenced by the handle at `handle`
    Field { handle: usize, offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Pow,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    ShiftLeft,
    ShiftRight,
    LogicalAnd,
    LogicalOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    LogicalNot,
    BitwiseNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

/// How a [`Opcode::Copy`] moves its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    /// Copy this many bytes
    Value(usize),
    /// Copy a handle, adding a reference
    Handle,
}

/// A source position attached to an instruction for stack traces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLocation {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    // Generic arithmetic
    Binary {
        op: BinaryOp,
        kind: PrimitiveKind,
        lhs: Operand,
        rhs: Operand,
        out: Operand,
    },
    /// `target = target op rhs`
    CompoundAssign {
        op: BinaryOp,
        kind: PrimitiveKind,
        target: Operand,
        rhs: Operand,
    },
    /// Vector `lhs` combined with scalar `rhs`, componentwise
    ScalarBinary {
        op: BinaryOp,
        kind: PrimitiveKind,
        lhs: Operand,
        rhs: Operand,
        out: Operand,
    },
    Unary {
        op: UnaryOp,
        kind: PrimitiveKind,
        operand: Operand,
        out: Operand,
    },
    Increment {
        kind: PrimitiveKind,
        target: Operand,
    },
    Decrement {
        kind: PrimitiveKind,
        target: Operand,
    },

    // Comparison
    Compare {
        op: CompareOp,
        kind: PrimitiveKind,
        lhs: Operand,
        rhs: Operand,
        out: Operand,
    },
    /// Reference equality of two handles
    HandleCompare {
        op: CompareOp,
        lhs: Operand,
        rhs: Operand,
        out: Operand,
    },

    // Conversion
    Convert {
        from: PrimitiveKind,
        to: ScalarKind,
        input: Operand,
        out: Operand,
    },

    // Data movement
    Copy {
        kind: CopyKind,
        source: Operand,
        dest: Operand,
    },
    /// Store the string literal at `index` of the function's string table
    StringLiteral {
        index: usize,
        dest: Operand,
    },

    // Objects
    CreateInstance {
        type_id: TypeId,
        dest: Operand,
    },
    /// Copy the handle if its stored type is castable to `type_id`, else null
    DownCast {
        type_id: TypeId,
        source: Operand,
        dest: Operand,
    },
    BoxAny {
        type_id: TypeId,
        source: Operand,
        dest: Operand,
    },
    UnboxAny {
        type_id: TypeId,
        source: Operand,
        dest: Operand,
    },
    PropertyGet {
        type_id: TypeId,
        property: usize,
        this: Operand,
        dest: Operand,
    },
    PropertySet {
        type_id: TypeId,
        property: usize,
        this: Operand,
        value: Operand,
    },

    // Control
    Jump {
        target: usize,
    },
    JumpIfTrue {
        condition: Operand,
        target: usize,
    },
    JumpIfFalse {
        condition: Operand,
        target: usize,
    },
    FunctionCall {
        function: FunctionId,
        this: Option<Operand>,
        args: Vec<Operand>,
        ret: Option<Operand>,
    },
    VirtualFunctionCall {
        function: FunctionId,
        this: Operand,
        args: Vec<Operand>,
        ret: Option<Operand>,
    },
    /// Raise a user exception whose message is the string handle at `message`
    Throw {
        message: Operand,
    },
    Return,
}

impl Opcode {
    /// Short mnemonic used in traces and diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Binary { .. } => "Binary",
            Opcode::CompoundAssign { .. } => "CompoundAssign",
            Opcode::ScalarBinary { .. } => "ScalarBinary",
            Opcode::Unary { .. } => "Unary",
            Opcode::Increment { .. } => "Increment",
            Opcode::Decrement { .. } => "Decrement",
            Opcode::Compare { .. } => "Compare",
            Opcode::HandleCompare { .. } => "HandleCompare",
            Opcode::Convert { .. } => "Convert",
            Opcode::Copy { .. } => "Copy",
            Opcode::StringLiteral { .. } => "StringLiteral",
            Opcode::CreateInstance { .. } => "CreateInstance",
            Opcode::DownCast { .. } => "DownCast",
            Opcode::BoxAny { .. } => "BoxAny",
            Opcode::UnboxAny { .. } => "UnboxAny",
            Opcode::PropertyGet { .. } => "PropertyGet",
            Opcode::PropertySet { .. } => "PropertySet",
            Opcode::Jump { .. } => "Jump",
            Opcode::JumpIfTrue { .. } => "JumpIfTrue",
            Opcode::JumpIfFalse { .. } => "JumpIfFalse",
            Opcode::FunctionCall { .. } => "FunctionCall",
            Opcode::VirtualFunctionCall { .. } => "VirtualFunctionCall",
            Opcode::Throw { .. } => "Throw",
            Opcode::Return => "Return",
        }
    }
}

/// One opcode and the source position it was generated from
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub location: Option<CodeLocation>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Instruction { opcode, location: None }
    }

    pub fn at(opcode: Opcode, line: u32, column: u32) -> Self {
        Instruction {
            opcode,
            location: Some(CodeLocation { line, column }),
        }
    }
}

impl From<Opcode> for Instruction {
    fn from(opcode: Opcode) -> Self {
        Instruction::new(opcode)
    }
}
