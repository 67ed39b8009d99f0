//! Data movement and object instructions

use super::control::call_function;
use super::{Context, ExceptionKind, Flow};
use crate::library::{CopyKind, Library, Operand, Property, TypeId};
use crate::runtime::handle::{Handle, INLINE_CAPACITY};
use crate::runtime::manager::HandleManager;

/// The most derived type of the object behind `handle`
///
/// Types without a derived type lookup report the handle's stored type.
pub fn dynamic_type(library: &Library, handle: &Handle) -> Option<TypeId> {
    let stored = handle.stored_type()?;
    let lookup = library.get_type(stored).and_then(|bound| bound.derived_type);
    lookup.and_then(|lookup| lookup(handle)).or(Some(stored))
}

fn unknown_type(ctx: &mut Context, type_id: TypeId) -> Flow {
    match ctx.library().get_type(type_id) {
        Some(_) => Ok(()),
        None => Err(ctx.throw(ExceptionKind::InvalidInstruction(format!("unknown type {}", type_id.0)))),
    }
}

pub fn copy(ctx: &mut Context, kind: CopyKind, source: Operand, dest: Operand) -> Flow {
    match kind {
        CopyKind::Value(size) => ctx.copy_slot(false, size, source, dest),
        CopyKind::Handle => ctx.copy_slot(true, 0, source, dest),
    }
}

pub fn string_literal(ctx: &mut Context, index: usize, dest: Operand) -> Flow {
    let Some(text) = ctx.body.strings.get(index) else {
        return Err(ctx.throw(ExceptionKind::InvalidInstruction(format!(
            "string literal {index} does not exist"
        ))));
    };
    let handle = ctx.state().string(text);
    ctx.write_handle(dest, handle)
}

/// Reference types are allocated through their manager; value types are zeroed in place
pub fn create_instance(ctx: &mut Context, type_id: TypeId, dest: Operand) -> Flow {
    unknown_type(ctx, type_id)?;
    let library = ctx.library();
    if library.is_handle_type(type_id) {
        let handle = ctx.state().allocate(type_id).map_err(|e| ctx.throw(e))?;
        ctx.write_handle(dest, handle)
    } else {
        ctx.write(dest, &vec![0u8; library.stack_size(type_id)])
    }
}

/// Copy the handle viewed as `type_id`, or null when the object is not one
pub fn down_cast(ctx: &mut Context, type_id: TypeId, source: Operand, dest: Operand) -> Flow {
    let handle = ctx.read_handle(source)?;
    let library = ctx.library();
    let castable = dynamic_type(library, &handle)
        .map(|dynamic| library.is_raw_castable(dynamic, type_id))
        .unwrap_or(false);
    let result = if castable { handle.retyped(type_id) } else { Handle::null() };
    ctx.write_handle(dest, result)
}

/// Wrap the `type_id` value at `source` in an `Any` handle
pub fn box_any(ctx: &mut Context, type_id: TypeId, source: Operand, dest: Operand) -> Flow {
    unknown_type(ctx, type_id)?;
    let library = ctx.library();
    if library.is_handle_type(type_id) {
        let handle = ctx.read_handle(source)?;
        return ctx.write_handle(dest, handle);
    }

    let mut bytes = vec![0u8; library.stack_size(type_id)];
    ctx.read(source, &mut bytes)?;
    let boxed = if bytes.len() <= INLINE_CAPACITY {
        ctx.state().box_value(type_id, &bytes)
    } else {
        let handle = ctx.state().heap().clone().allocate(type_id, bytes.len());
        if let Some(object) = handle.dereference() {
            object.borrow_mut().write(0, &bytes);
        }
        handle
    };
    ctx.write_handle(dest, boxed)
}

/// Extract a `type_id` value from the `Any` handle at `source`
pub fn unbox_any(ctx: &mut Context, type_id: TypeId, source: Operand, dest: Operand) -> Flow {
    unknown_type(ctx, type_id)?;
    let handle = ctx.read_handle(source)?;
    let library = ctx.library();
    let Some(stored) = handle.stored_type() else {
        return Err(ctx.throw(ExceptionKind::NullReference));
    };
    if !library.is_raw_castable(stored, type_id) {
        return Err(ctx.throw(ExceptionKind::TypeMismatch {
            expected: library.type_name(type_id).to_string(),
            actual: library.type_name(stored).to_string(),
        }));
    }

    if library.is_handle_type(type_id) {
        return ctx.write_handle(dest, handle);
    }
    let size = library.stack_size(type_id);
    match handle.with_bytes(|bytes| bytes.get(..size).map(<[u8]>::to_vec)).flatten() {
        Some(bytes) => ctx.write(dest, &bytes),
        None => Err(ctx.throw(ExceptionKind::NullReference)),
    }
}

fn property(ctx: &mut Context, type_id: TypeId, index: usize) -> Flow<Property> {
    let library = ctx.library();
    match library.get_type(type_id).and_then(|bound| bound.properties.get(index)) {
        Some(property) => Ok(property.clone()),
        None => Err(ctx.throw(ExceptionKind::InvalidInstruction(format!(
            "property {index} does not exist on {}",
            library.type_name(type_id)
        )))),
    }
}

fn receiver(ctx: &mut Context, this: Operand) -> Flow<Handle> {
    let handle = ctx.read_handle(this)?;
    if handle.is_null() {
        return Err(ctx.throw(ExceptionKind::NullReference));
    }
    Ok(handle)
}

pub fn property_get(ctx: &mut Context, type_id: TypeId, index: usize, this: Operand, dest: Operand) -> Flow {
    let property = property(ctx, type_id, index)?;
    let this = receiver(ctx, this)?;
    let Some(getter) = ctx.library().function(property.getter).cloned() else {
        return Err(ctx.throw(ExceptionKind::InvalidInstruction(format!(
            "getter of {} does not exist",
            property.name
        ))));
    };
    call_function(ctx, getter, Some(this), &[], Some(dest))
}

pub fn property_set(ctx: &mut Context, type_id: TypeId, index: usize, this: Operand, value: Operand) -> Flow {
    let property = property(ctx, type_id, index)?;
    let this = receiver(ctx, this)?;
    let setter = property.setter.and_then(|id| ctx.library().function(id).cloned());
    let Some(setter) = setter else {
        return Err(ctx.throw(ExceptionKind::InvalidInstruction(format!(
            "property {} is read only",
            property.name
        ))));
    };
    call_function(ctx, setter, Some(this), &[value], None)
}
