//! Calls, branches and throw
//!
//! Branch targets are resolved by the dispatch loop; the handlers here only
//! evaluate conditions. Calls build a fresh [`Call`] for the callee, copy
//! arguments into its frame, run it and copy the return value back.

use super::object::dynamic_type;
use super::{Context, ExceptionKind, Flow};
use crate::library::{Function, FunctionId, Operand};
use crate::runtime::call::Call;
use crate::runtime::handle::Handle;
use std::sync::Arc;

/// Evaluate a branch condition
pub fn condition(ctx: &mut Context, operand: Operand) -> Flow<bool> {
    ctx.read_value::<bool>(operand)
}

fn function_by_id(ctx: &mut Context, id: FunctionId) -> Flow<Arc<Function>> {
    match ctx.library().function(id) {
        Some(function) => Ok(function.clone()),
        None => Err(ctx.throw(ExceptionKind::InvalidInstruction(format!("unknown function {}", id.0)))),
    }
}

/// Run `function` with arguments read from the caller's operands
///
/// The return value, if the function has one and `ret` is given, is copied
/// to `ret` after the callee's frame has finished.
pub(crate) fn call_function(
    ctx: &mut Context,
    function: Arc<Function>,
    this: Option<Handle>,
    args: &[Operand],
    ret: Option<Operand>,
) -> Flow {
    let library = ctx.library();
    if args.len() != function.parameters.len() {
        return Err(ctx.throw(ExceptionKind::InvalidArgumentCount {
            expected: function.parameters.len(),
            actual: args.len(),
        }));
    }

    let mut callee = Call::new(ctx.state(), function.clone());
    if let (Some(this), Some(offset)) = (this, function.layout.this_offset) {
        callee.frame_mut().set_handle(offset, this);
    }
    let slots = function.parameters.iter().zip(&function.layout.parameter_offsets);
    for ((parameter, offset), operand) in slots.zip(args) {
        if library.is_handle_type(parameter.param_type) {
            let handle = ctx.read_handle(*operand)?;
            callee.frame_mut().set_handle(*offset, handle);
        } else {
            let mut buffer = vec![0u8; library.stack_size(parameter.param_type)];
            ctx.read(*operand, &mut buffer)?;
            callee.frame_mut().write(*offset, &buffer);
        }
    }

    callee.run(ctx.report)?;

    let (Some(ret), Some(return_type), Some(offset)) = (ret, function.return_type, function.layout.return_offset)
    else {
        return Ok(());
    };
    if library.is_handle_type(return_type) {
        let handle = callee.frame().handle(offset);
        ctx.write_handle(ret, handle)
    } else {
        let size = library.stack_size(return_type);
        match callee.frame().slice(offset, size).map(<[u8]>::to_vec) {
            Some(bytes) => ctx.write(ret, &bytes),
            None => Err(ctx.throw(ExceptionKind::InvalidInstruction(format!(
                "return slot of {} is out of bounds",
                function.name
            )))),
        }
    }
}

/// A `this` handle that must reference an object
fn receiver(ctx: &mut Context, this: Operand) -> Flow<Handle> {
    let handle = ctx.read_handle(this)?;
    if handle.is_null() {
        return Err(ctx.throw(ExceptionKind::NullReference));
    }
    Ok(handle)
}

pub fn function_call(
    ctx: &mut Context,
    function: FunctionId,
    this: Option<Operand>,
    args: &[Operand],
    ret: Option<Operand>,
) -> Flow {
    let function = function_by_id(ctx, function)?;
    let this = match this {
        Some(operand) => Some(receiver(ctx, operand)?),
        None => None,
    };
    call_function(ctx, function, this, args, ret)
}

/// Call the override of `function` for the dynamic type of `this`
pub fn virtual_function_call(
    ctx: &mut Context,
    function: FunctionId,
    this: Operand,
    args: &[Operand],
    ret: Option<Operand>,
) -> Flow {
    let declared = function_by_id(ctx, function)?;
    let this = receiver(ctx, this)?;
    let library = ctx.library();
    let (resolved, this) = match dynamic_type(library, &this) {
        // The override sees the receiver as its own type
        Some(dynamic) => (library.resolve_virtual(dynamic, &declared), this.retyped(dynamic)),
        None => (declared, this),
    };
    tracing::trace!(declared = function.0, resolved = %resolved.name, "virtual dispatch");
    call_function(ctx, resolved, Some(this), args, ret)
}

/// Raise a user exception carrying the text of the string at `message`
pub fn throw(ctx: &mut Context, message: Operand) -> Flow {
    let handle = ctx.read_handle(message)?;
    let text = handle.text().map(|text| text.to_string()).unwrap_or_default();
    Err(ctx.throw(ExceptionKind::User(text)))
}
