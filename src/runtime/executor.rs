//! Script function dispatch loop
//!
//! Runs one script body inside the frame owned by its [`Call`]. Each opcode is
//! handed to its handler in [`ops`]; a handler that raises an exception
//! returns `Err(Unwind)`, and the loop either transfers control to the
//! innermost protected range covering the faulting instruction or passes the
//! unwind on to the caller.

use super::call::Call;
use super::exception::{ExceptionKind, ExceptionReport, Flow};
use super::ops::{self, Context};
use super::state::ActiveCall;
use crate::library::{Opcode, ScriptBody};
use tracing::{debug, trace};

/// What the dispatch loop does after an instruction
enum Step {
    Next,
    Jump(usize),
    Return,
}

/// Execute `body` until it returns or an exception escapes it
pub(crate) fn execute(call: &mut Call, body: &ScriptBody, report: &mut ExceptionReport, active: &ActiveCall) -> Flow {
    let trace_opcodes = call.state().config().trace_opcodes;
    let mut pc = 0;

    // Falling off the end of the body is a return
    while let Some(instruction) = body.instructions.get(pc) {
        active.set_pc(pc);
        if trace_opcodes {
            trace!(function = %call.function().name, pc, opcode = instruction.opcode.name(), "dispatch");
        }

        let mut ctx = Context::new(call, body, report);
        match dispatch(&mut ctx, &instruction.opcode) {
            Ok(Step::Next) => pc += 1,
            Ok(Step::Jump(target)) => pc = target,
            Ok(Step::Return) => return Ok(()),
            Err(unwind) => match catch(call, body, report, pc) {
                Some(handler) => pc = handler,
                None => {
                    debug!(function = %call.function().name, pc, "exception unwinding past frame");
                    return Err(unwind);
                }
            },
        }
    }
    Ok(())
}

/// Find the handler for an exception raised at `pc`
///
/// Handle locals scoped to the protected range are released before the
/// handler runs. The message comes from the most recent exception, and the
/// report is cleared since everything in it was raised by this unwind.
fn catch(call: &mut Call, body: &ScriptBody, report: &mut ExceptionReport, pc: usize) -> Option<usize> {
    let range = body.handler_for(pc)?;
    call.frame_mut().release_locals(&range.scoped_locals);
    let exception = report.take_last()?;
    // Everything pushed while unwinding to this range is handled with it
    report.clear();
    debug!(
        function = %call.function().name,
        pc,
        handler = range.handler,
        exception = %exception.kind,
        "exception caught"
    );
    if let Some(local) = range.exception_local {
        let message = call.state().string(&exception.message());
        call.frame_mut().set_handle(local, message);
    }
    Some(range.handler)
}

fn jump(ctx: &mut Context, target: usize) -> Flow<Step> {
    // Jumping to one past the last instruction returns
    if target > ctx.body.instructions.len() {
        return Err(ctx.throw(ExceptionKind::InvalidInstruction(format!(
            "jump target {target} is outside the function"
        ))));
    }
    Ok(Step::Jump(target))
}

fn dispatch(ctx: &mut Context, opcode: &Opcode) -> Flow<Step> {
    use Opcode::*;

    match opcode {
        // Arithmetic
        Binary {
            op,
            kind,
            lhs,
            rhs,
            out,
        } => ops::numeric::binary(ctx, *op, *kind, *lhs, *rhs, *out)?,
        CompoundAssign { op, kind, target, rhs } => ops::numeric::compound_assign(ctx, *op, *kind, *target, *rhs)?,
        ScalarBinary {
            op,
            kind,
            lhs,
            rhs,
            out,
        } => ops::numeric::scalar_binary(ctx, *op, *kind, *lhs, *rhs, *out)?,
        Unary { op, kind, operand, out } => ops::numeric::unary(ctx, *op, *kind, *operand, *out)?,
        Increment { kind, target } => ops::numeric::increment(ctx, *kind, *target)?,
        Decrement { kind, target } => ops::numeric::decrement(ctx, *kind, *target)?,

        // Comparison
        Compare {
            op,
            kind,
            lhs,
            rhs,
            out,
        } => ops::comparison::compare(ctx, *op, *kind, *lhs, *rhs, *out)?,
        HandleCompare { op, lhs, rhs, out } => ops::comparison::handle_compare(ctx, *op, *lhs, *rhs, *out)?,

        Convert { from, to, input, out } => ops::conversion::convert(ctx, *from, *to, *input, *out)?,

        // Data movement and objects
        Copy { kind, source, dest } => ops::object::copy(ctx, *kind, *source, *dest)?,
        StringLiteral { index, dest } => ops::object::string_literal(ctx, *index, *dest)?,
        CreateInstance { type_id, dest } => ops::object::create_instance(ctx, *type_id, *dest)?,
        DownCast { type_id, source, dest } => ops::object::down_cast(ctx, *type_id, *source, *dest)?,
        BoxAny { type_id, source, dest } => ops::object::box_any(ctx, *type_id, *source, *dest)?,
        UnboxAny { type_id, source, dest } => ops::object::unbox_any(ctx, *type_id, *source, *dest)?,
        PropertyGet {
            type_id,
            property,
            this,
            dest,
        } => ops::object::property_get(ctx, *type_id, *property, *this, *dest)?,
        PropertySet {
            type_id,
            property,
            this,
            value,
        } => ops::object::property_set(ctx, *type_id, *property, *this, *value)?,

        // Control
        Jump { target } => return jump(ctx, *target),
        JumpIfTrue { condition, target } => {
            if ops::control::condition(ctx, *condition)? {
                return jump(ctx, *target);
            }
        }
        JumpIfFalse { condition, target } => {
            if !ops::control::condition(ctx, *condition)? {
                return jump(ctx, *target);
            }
        }
        FunctionCall {
            function,
            this,
            args,
            ret,
        } => ops::control::function_call(ctx, *function, *this, args, *ret)?,
        VirtualFunctionCall {
            function,
            this,
            args,
            ret,
        } => ops::control::virtual_function_call(ctx, *function, *this, args, *ret)?,
        Throw { message } => ops::control::throw(ctx, *message)?,
        Return => return Ok(Step::Return),
    }
    Ok(Step::Next)
}
