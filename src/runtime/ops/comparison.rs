//! Comparison instructions
//!
//! Equality is defined for every primitive kind and compares all components.
//! Ordering is only defined for scalar numeric kinds. Results are Booleans.

use super::{checked_size, Context, ExceptionKind, Flow, MAX_VALUE_SIZE};
use crate::library::{CompareOp, Operand, PrimitiveKind, ScalarKind};
use crate::runtime::value::{read_lanes, Scalar};

fn compare_lanes<T: Scalar>(op: CompareOp, kind: PrimitiveKind, lhs: &[u8], rhs: &[u8]) -> Result<bool, ExceptionKind> {
    let count = kind.components as usize;
    let a = read_lanes::<T>(lhs, count);
    let b = read_lanes::<T>(rhs, count);
    let equal = a[..count] == b[..count];
    let ordering = !matches!(op, CompareOp::Equal | CompareOp::NotEqual);
    if ordering && (kind.is_vector() || kind.scalar == ScalarKind::Boolean) {
        return Err(ExceptionKind::InvalidInstruction(format!(
            "{op:?} is not defined for {kind}"
        )));
    }
    let (a, b) = (a[0], b[0]);
    Ok(match op {
        CompareOp::Equal => equal,
        CompareOp::NotEqual => !equal,
        CompareOp::Less => a < b,
        CompareOp::LessEqual => a <= b,
        CompareOp::Greater => a > b,
        CompareOp::GreaterEqual => a >= b,
    })
}

/// Compare packed values of `kind`
pub fn apply_compare(op: CompareOp, kind: PrimitiveKind, lhs: &[u8], rhs: &[u8]) -> Result<bool, ExceptionKind> {
    checked_size(kind)?;
    for_scalar!(kind.scalar, compare_lanes(op, kind, lhs, rhs))
}

pub fn compare(ctx: &mut Context, op: CompareOp, kind: PrimitiveKind, lhs: Operand, rhs: Operand, out: Operand) -> Flow {
    let size = ctx.value_size(kind)?;
    let mut a = [0u8; MAX_VALUE_SIZE];
    let mut b = [0u8; MAX_VALUE_SIZE];
    ctx.read(lhs, &mut a[..size])?;
    ctx.read(rhs, &mut b[..size])?;
    let result = apply_compare(op, kind, &a[..size], &b[..size]).map_err(|e| ctx.throw(e))?;
    ctx.write_value(out, &result)
}

/// Reference equality of two handles
pub fn handle_compare(ctx: &mut Context, op: CompareOp, lhs: Operand, rhs: Operand, out: Operand) -> Flow {
    let a = ctx.read_handle(lhs)?;
    let b = ctx.read_handle(rhs)?;
    let result = match op {
        CompareOp::Equal => a == b,
        CompareOp::NotEqual => a != b,
        _ => {
            return Err(ctx.throw(ExceptionKind::InvalidInstruction(format!(
                "{op:?} is not defined for handles"
            ))))
        }
    };
    ctx.write_value(out, &result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Opcode, TypeId};
    use crate::runtime::test_utils::test::FunctionTest;
    use crate::runtime::value::{Value, Vector};

    fn compare_test(op: CompareOp, kind: PrimitiveKind, rhs_offset: usize) -> FunctionTest {
        let type_id = TypeId::of_primitive(kind).unwrap();
        FunctionTest::new()
            .returns(TypeId::BOOLEAN)
            .param(type_id)
            .param(type_id)
            .inst(Opcode::Compare {
                op,
                kind,
                lhs: Operand::Local(4),
                rhs: Operand::Local(rhs_offset),
                out: Operand::Local(0),
            })
            .inst(Opcode::Return)
    }

    #[test]
    fn scalar_ordering() {
        compare_test(CompareOp::Less, PrimitiveKind::INTEGER, 8)
            .arg(Value::Integer(-3))
            .arg(Value::Integer(2))
            .expect_return(Value::Boolean(true));
        compare_test(CompareOp::GreaterEqual, PrimitiveKind::DOUBLE_REAL, 12)
            .arg(Value::DoubleReal(1.5))
            .arg(Value::DoubleReal(1.5))
            .expect_return(Value::Boolean(true));
    }

    #[test]
    fn vector_equality_compares_every_component() {
        compare_test(CompareOp::Equal, PrimitiveKind::REAL3, 16)
            .arg(Value::Real3(Vector([1.0, 2.0, 3.0])))
            .arg(Value::Real3(Vector([1.0, 2.0, 3.5])))
            .expect_return(Value::Boolean(false));
        compare_test(CompareOp::NotEqual, PrimitiveKind::REAL3, 16)
            .arg(Value::Real3(Vector([1.0, 2.0, 3.0])))
            .arg(Value::Real3(Vector([1.0, 2.0, 3.5])))
            .expect_return(Value::Boolean(true));
    }

    #[test]
    fn vector_ordering_is_undefined() {
        compare_test(CompareOp::Less, PrimitiveKind::INTEGER2, 12)
            .arg(Value::Integer2(Vector([1, 2])))
            .arg(Value::Integer2(Vector([3, 4])))
            .expect_exception("Less is not defined for Integer2");
    }

    #[test]
    fn oversized_kind_is_rejected() {
        // Four doubles need 32 bytes per side
        FunctionTest::new()
            .returns(TypeId::BOOLEAN)
            .frame_size(80)
            .inst(Opcode::Compare {
                op: CompareOp::Equal,
                kind: PrimitiveKind::vector(ScalarKind::DoubleReal, 4),
                lhs: Operand::Local(8),
                rhs: Operand::Local(40),
                out: Operand::Local(0),
            })
            .inst(Opcode::Return)
            .expect_exception("Invalid instruction");
    }

    #[test]
    fn handles_compare_by_identity() {
        // Boolean return at 0, two String parameters at 4 and 20
        FunctionTest::new()
            .returns(TypeId::BOOLEAN)
            .param(TypeId::STRING)
            .param(TypeId::STRING)
            .inst(Opcode::HandleCompare {
                op: CompareOp::Equal,
                lhs: Operand::Local(4),
                rhs: Operand::Local(20),
                out: Operand::Local(0),
            })
            .inst(Opcode::Return)
            .string_arg("same")
            .string_arg("same")
            .expect_return(Value::Boolean(true));
    }

    #[test]
    fn direct_compare() {
        let lhs = 3u8.to_le_bytes();
        let rhs = 9u8.to_le_bytes();
        assert_eq!(apply_compare(CompareOp::Greater, PrimitiveKind::BYTE, &lhs, &rhs), Ok(false));
        assert!(apply_compare(CompareOp::Less, PrimitiveKind::BOOLEAN, &[1], &[0]).is_err());
    }
}
