//! Primitive conversions
//!
//! A conversion keeps the component count and changes the scalar kind of
//! each component. Whenever either side is real the value goes through
//! `f64`, otherwise through `i64`, so:
//!
//! - real to integer truncates towards zero and saturates at the bounds
//! - integer to narrower integer keeps the low bits
//! - anything to Boolean tests against zero

use super::{Context, Flow, MAX_VALUE_SIZE};
use crate::library::{Operand, PrimitiveKind, ScalarKind};
use crate::runtime::value::{read_lanes, write_lanes, Scalar};

fn convert_lanes<F: Scalar, T: Scalar>(count: usize, input: &[u8], out: &mut [u8]) {
    let lanes = read_lanes::<F>(input, count);
    let through_real = F::KIND.is_real() || T::KIND.is_real();
    let mut result = [T::default(); 4];
    for (converted, lane) in result.iter_mut().zip(lanes).take(count) {
        *converted = if through_real {
            T::from_f64(lane.to_f64())
        } else {
            T::from_i64(lane.to_i64())
        };
    }
    write_lanes(out, &result, count);
}

fn convert_from<F: Scalar>(to: ScalarKind, count: usize, input: &[u8], out: &mut [u8]) {
    match to {
        ScalarKind::Boolean => convert_lanes::<F, bool>(count, input, out),
        ScalarKind::Byte => convert_lanes::<F, u8>(count, input, out),
        ScalarKind::Integer => convert_lanes::<F, i32>(count, input, out),
        ScalarKind::DoubleInteger => convert_lanes::<F, i64>(count, input, out),
        ScalarKind::Real => convert_lanes::<F, f32>(count, input, out),
        ScalarKind::DoubleReal => convert_lanes::<F, f64>(count, input, out),
    }
}

/// Convert packed `from` components into `to` components
///
/// `out` must hold `from.components` values of `to`.
pub fn apply_convert(from: PrimitiveKind, to: ScalarKind, input: &[u8], out: &mut [u8]) {
    let count = from.components as usize;
    for_scalar!(from.scalar, convert_from(to, count, input, out))
}

pub fn convert(ctx: &mut Context, from: PrimitiveKind, to: ScalarKind, input: Operand, out: Operand) -> Flow {
    let source_size = ctx.value_size(from)?;
    let target_size = ctx.value_size(PrimitiveKind::vector(to, from.components))?;
    let mut source = [0u8; MAX_VALUE_SIZE];
    ctx.read(input, &mut source[..source_size])?;

    let mut result = [0u8; MAX_VALUE_SIZE];
    apply_convert(from, to, &source[..source_size], &mut result[..target_size]);
    ctx.write(out, &result[..target_size])
}
