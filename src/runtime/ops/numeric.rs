//! Generic arithmetic
//!
//! One handler per operation shape, instantiated for every scalar kind
//! through [`Arithmetic`]. Vector kinds apply the scalar operation to each
//! component. Integer arithmetic wraps; integer `Modulo` is the truncating
//! remainder and integer `Pow` uses exponentiation by squaring, while real
//! `Modulo` is `fmod` and real `Pow` is `powf`.

use super::{checked_size, Context, ExceptionKind, Flow, MAX_VALUE_SIZE};
use crate::library::{BinaryOp, Operand, PrimitiveKind, ScalarKind, UnaryOp};
use crate::runtime::value::{read_lanes, write_lanes, Scalar};

/// Per-scalar semantics of the arithmetic family
///
/// `None` means the operation is not defined for the scalar kind.
pub trait Arithmetic: Scalar {
    fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Option<Self>;
    fn unary(op: UnaryOp, value: Self) -> Option<Self>;
    fn step(value: Self, up: bool) -> Option<Self>;
}

impl Arithmetic for bool {
    fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Option<Self> {
        match op {
            BinaryOp::LogicalAnd => Some(lhs && rhs),
            BinaryOp::LogicalOr => Some(lhs || rhs),
            BinaryOp::BitwiseAnd => Some(lhs & rhs),
            BinaryOp::BitwiseOr => Some(lhs | rhs),
            BinaryOp::BitwiseXor => Some(lhs ^ rhs),
            _ => None,
        }
    }

    fn unary(op: UnaryOp, value: Self) -> Option<Self> {
        match op {
            UnaryOp::LogicalNot => Some(!value),
            _ => None,
        }
    }

    fn step(_value: Self, _up: bool) -> Option<Self> {
        None
    }
}

macro_rules! impl_integral {
    ($($ty:ty),*) => {
        $(
            impl Arithmetic for $ty {
                fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Option<Self> {
                    // A negative exponent yields 0
                    #[allow(unused_comparisons)]
                    fn power(mut base: $ty, mut exponent: $ty) -> $ty {
                        let mut result: $ty = if exponent >= 0 { 1 } else { 0 };
                        while exponent != 0 && result != 0 {
                            if exponent & 1 == 1 {
                                result = result.wrapping_mul(base);
                            }
                            exponent >>= 1;
                            base = base.wrapping_mul(base);
                        }
                        result
                    }

                    Some(match op {
                        BinaryOp::Add => lhs.wrapping_add(rhs),
                        BinaryOp::Subtract => lhs.wrapping_sub(rhs),
                        BinaryOp::Multiply => lhs.wrapping_mul(rhs),
                        BinaryOp::Divide => lhs.wrapping_div(rhs),
                        BinaryOp::Modulo => lhs.wrapping_rem(rhs),
                        BinaryOp::Pow => power(lhs, rhs),
                        BinaryOp::BitwiseAnd => lhs & rhs,
                        BinaryOp::BitwiseOr => lhs | rhs,
                        BinaryOp::BitwiseXor => lhs ^ rhs,
                        BinaryOp::ShiftLeft => lhs.wrapping_shl(rhs as u32),
                        BinaryOp::ShiftRight => lhs.wrapping_shr(rhs as u32),
                        BinaryOp::LogicalAnd | BinaryOp::LogicalOr => return None,
                    })
                }

                fn unary(op: UnaryOp, value: Self) -> Option<Self> {
                    match op {
                        UnaryOp::Negate => Some(value.wrapping_neg()),
                        UnaryOp::BitwiseNot => Some(!value),
                        UnaryOp::LogicalNot => None,
                    }
                }

                fn step(value: Self, up: bool) -> Option<Self> {
                    Some(if up { value.wrapping_add(1) } else { value.wrapping_sub(1) })
                }
            }
        )*
    };
}

impl_integral!(u8, i32, i64);

macro_rules! impl_real {
    ($($ty:ty),*) => {
        $(
            impl Arithmetic for $ty {
                fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Option<Self> {
                    match op {
                        BinaryOp::Add => Some(lhs + rhs),
                        BinaryOp::Subtract => Some(lhs - rhs),
                        BinaryOp::Multiply => Some(lhs * rhs),
                        BinaryOp::Divide => Some(lhs / rhs),
                        BinaryOp::Modulo => Some(lhs % rhs),
                        BinaryOp::Pow => Some(lhs.powf(rhs)),
                        _ => None,
                    }
                }

                fn unary(op: UnaryOp, value: Self) -> Option<Self> {
                    match op {
                        UnaryOp::Negate => Some(-value),
                        _ => None,
                    }
                }

                fn step(value: Self, up: bool) -> Option<Self> {
                    Some(if up { value + 1.0 } else { value - 1.0 })
                }
            }
        )*
    };
}

impl_real!(f32, f64);

fn undefined(what: &str, kind: PrimitiveKind) -> ExceptionKind {
    ExceptionKind::InvalidInstruction(format!("{what} is not defined for {kind}"))
}

/// Name used in the divide-by-zero message, for the guarded operations
fn zero_guarded(op: BinaryOp) -> Option<&'static str> {
    match op {
        BinaryOp::Divide => Some("divide"),
        BinaryOp::Modulo => Some("modulo"),
        _ => None,
    }
}

fn binary_lanes<T: Arithmetic>(
    op: BinaryOp,
    kind: PrimitiveKind,
    lhs: &[u8],
    rhs: &[u8],
    out: &mut [u8],
) -> Result<(), ExceptionKind> {
    let count = kind.components as usize;
    let a = read_lanes::<T>(lhs, count);
    let b = read_lanes::<T>(rhs, count);
    if T::KIND != ScalarKind::Boolean {
        if let Some(operation) = zero_guarded(op) {
            if b[..count].iter().any(|component| component.is_zero()) {
                return Err(ExceptionKind::DivisionOrModulusByZero { operation });
            }
        }
    }
    let mut result = [T::default(); 4];
    for i in 0..count {
        result[i] = T::binary(op, a[i], b[i]).ok_or_else(|| undefined(&format!("{op:?}"), kind))?;
    }
    write_lanes(out, &result, count);
    Ok(())
}

fn unary_lanes<T: Arithmetic>(
    op: UnaryOp,
    kind: PrimitiveKind,
    input: &[u8],
    out: &mut [u8],
) -> Result<(), ExceptionKind> {
    let count = kind.components as usize;
    let a = read_lanes::<T>(input, count);
    let mut result = [T::default(); 4];
    for i in 0..count {
        result[i] = T::unary(op, a[i]).ok_or_else(|| undefined(&format!("{op:?}"), kind))?;
    }
    write_lanes(out, &result, count);
    Ok(())
}

fn step_lanes<T: Arithmetic>(up: bool, kind: PrimitiveKind, value: &mut [u8]) -> Result<(), ExceptionKind> {
    let count = kind.components as usize;
    let mut lanes = read_lanes::<T>(value, count);
    for lane in lanes.iter_mut().take(count) {
        *lane = T::step(*lane, up).ok_or_else(|| undefined(if up { "Increment" } else { "Decrement" }, kind))?;
    }
    write_lanes(value, &lanes, count);
    Ok(())
}

/// Apply `op` componentwise over packed values of `kind`
pub fn apply_binary(
    op: BinaryOp,
    kind: PrimitiveKind,
    lhs: &[u8],
    rhs: &[u8],
    out: &mut [u8],
) -> Result<(), ExceptionKind> {
    checked_size(kind)?;
    for_scalar!(kind.scalar, binary_lanes(op, kind, lhs, rhs, out))
}

pub fn apply_unary(op: UnaryOp, kind: PrimitiveKind, input: &[u8], out: &mut [u8]) -> Result<(), ExceptionKind> {
    checked_size(kind)?;
    for_scalar!(kind.scalar, unary_lanes(op, kind, input, out))
}

/// `out = lhs op rhs`
pub fn binary(ctx: &mut Context, op: BinaryOp, kind: PrimitiveKind, lhs: Operand, rhs: Operand, out: Operand) -> Flow {
    let size = ctx.value_size(kind)?;
    let mut a = [0u8; MAX_VALUE_SIZE];
    let mut b = [0u8; MAX_VALUE_SIZE];
    ctx.read(lhs, &mut a[..size])?;
    ctx.read(rhs, &mut b[..size])?;

    let mut result = [0u8; MAX_VALUE_SIZE];
    apply_binary(op, kind, &a[..size], &b[..size], &mut result[..size]).map_err(|e| ctx.throw(e))?;
    ctx.write(out, &result[..size])
}

/// `target = target op rhs`
pub fn compound_assign(ctx: &mut Context, op: BinaryOp, kind: PrimitiveKind, target: Operand, rhs: Operand) -> Flow {
    binary(ctx, op, kind, target, rhs, target)
}

/// Vector `lhs` combined with the scalar `rhs` broadcast to every component
pub fn scalar_binary(
    ctx: &mut Context,
    op: BinaryOp,
    kind: PrimitiveKind,
    lhs: Operand,
    rhs: Operand,
    out: Operand,
) -> Flow {
    let size = ctx.value_size(kind)?;
    let component = kind.scalar.size();
    let mut a = [0u8; MAX_VALUE_SIZE];
    let mut scalar = [0u8; 8];
    ctx.read(lhs, &mut a[..size])?;
    ctx.read(rhs, &mut scalar[..component])?;

    let mut b = [0u8; MAX_VALUE_SIZE];
    for lane in b[..size].chunks_exact_mut(component) {
        lane.copy_from_slice(&scalar[..component]);
    }

    let mut result = [0u8; MAX_VALUE_SIZE];
    apply_binary(op, kind, &a[..size], &b[..size], &mut result[..size]).map_err(|e| ctx.throw(e))?;
    ctx.write(out, &result[..size])
}

pub fn unary(ctx: &mut Context, op: UnaryOp, kind: PrimitiveKind, operand: Operand, out: Operand) -> Flow {
    let size = ctx.value_size(kind)?;
    let mut input = [0u8; MAX_VALUE_SIZE];
    ctx.read(operand, &mut input[..size])?;

    let mut result = [0u8; MAX_VALUE_SIZE];
    apply_unary(op, kind, &input[..size], &mut result[..size]).map_err(|e| ctx.throw(e))?;
    ctx.write(out, &result[..size])
}

fn step(ctx: &mut Context, up: bool, kind: PrimitiveKind, target: Operand) -> Flow {
    let size = ctx.value_size(kind)?;
    let mut value = [0u8; MAX_VALUE_SIZE];
    ctx.read(target, &mut value[..size])?;
    for_scalar!(kind.scalar, step_lanes(up, kind, &mut value[..size])).map_err(|e| ctx.throw(e))?;
    ctx.write(target, &value[..size])
}

pub fn increment(ctx: &mut Context, kind: PrimitiveKind, target: Operand) -> Flow {
    step(ctx, true, kind, target)
}

pub fn decrement(ctx: &mut Context, kind: PrimitiveKind, target: Operand) -> Flow {
    step(ctx, false, kind, target)
}
