//! Instruction implementations
//!
//! Handlers are grouped by family. Each one receives a [`Context`] giving
//! operand access to the current frame, the function's constant pool and the
//! objects behind frame handles, and returns [`Flow`] so a raised exception
//! propagates with `?`.

/// Instantiate a generic handler for the Rust type behind a scalar kind
macro_rules! for_scalar {
    ($scalar:expr, $handler:ident($($arg:expr),* $(,)?)) => {
        match $scalar {
            $crate::library::ScalarKind::Boolean => $handler::<bool>($($arg),*),
            $crate::library::ScalarKind::Byte => $handler::<u8>($($arg),*),
            $crate::library::ScalarKind::Integer => $handler::<i32>($($arg),*),
            $crate::library::ScalarKind::DoubleInteger => $handler::<i64>($($arg),*),
            $crate::library::ScalarKind::Real => $handler::<f32>($($arg),*),
            $crate::library::ScalarKind::DoubleReal => $handler::<f64>($($arg),*),
        }
    };
}

pub mod comparison;
pub mod control;
pub mod conversion;
pub mod numeric;
pub mod object;

pub(crate) use crate::runtime::exception::{ExceptionKind, Flow};

use crate::library::{Library, Operand, PrimitiveKind, ScriptBody};
use crate::runtime::call::Call;
use crate::runtime::exception::{ExceptionReport, Unwind};
use crate::runtime::handle::Handle;
use crate::runtime::memory::ObjectRef;
use crate::runtime::state::ExecutableState;
use crate::runtime::value::Marshal;

/// Largest primitive value an operand carries
pub const MAX_VALUE_SIZE: usize = 16;

/// Packed size of `kind`, rejecting kinds no operand buffer can hold
pub fn checked_size(kind: PrimitiveKind) -> Result<usize, ExceptionKind> {
    if !(1..=4).contains(&kind.components) || kind.size() > MAX_VALUE_SIZE {
        return Err(ExceptionKind::InvalidInstruction(format!(
            "{} components of {} is not a primitive value",
            kind.components,
            kind.scalar.name()
        )));
    }
    Ok(kind.size())
}

/// Everything an instruction handler may touch
pub struct Context<'a, 's> {
    pub call: &'a mut Call<'s>,
    pub body: &'a ScriptBody,
    pub report: &'a mut ExceptionReport,
}

impl<'a, 's> Context<'a, 's> {
    pub fn new(call: &'a mut Call<'s>, body: &'a ScriptBody, report: &'a mut ExceptionReport) -> Self {
        Context { call, body, report }
    }

    pub fn state(&self) -> &'s ExecutableState {
        self.call.state()
    }

    pub fn library(&self) -> &'s Library {
        self.call.state().library()
    }

    /// Record `kind` and start unwinding
    pub fn throw(&mut self, kind: ExceptionKind) -> Unwind {
        self.call.state().throw_exception(self.report, kind)
    }

    /// Packed size of `kind`, throwing if it is malformed
    pub fn value_size(&mut self, kind: PrimitiveKind) -> Flow<usize> {
        checked_size(kind).map_err(|kind| self.throw(kind))
    }

    fn out_of_bounds(&mut self, operand: Operand, size: usize) -> Unwind {
        self.throw(ExceptionKind::InvalidInstruction(format!(
            "operand {operand:?} of {size} bytes is out of bounds"
        )))
    }

    fn oversized<T>(&mut self) -> Unwind {
        self.throw(ExceptionKind::InvalidInstruction(format!(
            "{} does not fit in an operand",
            std::any::type_name::<T>()
        )))
    }

    /// The object behind the frame handle at `handle`
    fn object(&mut self, handle: usize, writing: bool) -> Flow<ObjectRef> {
        let target = self.call.frame().handle(handle);
        if target.is_null() {
            return Err(self.throw(ExceptionKind::NullReference));
        }
        if writing && target.is_inline() {
            return Err(self.throw(ExceptionKind::InvalidInstruction(
                "cannot write through a value handle".to_string(),
            )));
        }
        match target.dereference() {
            Some(object) => Ok(object),
            None => Err(self.throw(ExceptionKind::NullReference)),
        }
    }

    /// Copy the bytes at `operand` into `buffer`
    pub fn read(&mut self, operand: Operand, buffer: &mut [u8]) -> Flow {
        let size = buffer.len();
        let copied = match operand {
            Operand::Local(offset) => self.call.frame().slice(offset, size).map(|b| buffer.copy_from_slice(b)),
            Operand::Constant(offset) => offset
                .checked_add(size)
                .and_then(|end| self.body.constants.get(offset..end))
                .map(|b| buffer.copy_from_slice(b)),
            Operand::Field { handle, offset } => {
                let object = self.object(handle, false)?;
                let block = object.borrow();
                block.slice(offset, size).map(|b| buffer.copy_from_slice(b))
            }
        };
        copied.ok_or_else(|| self.out_of_bounds(operand, size))
    }

    /// Copy `data` to `operand`
    pub fn write(&mut self, operand: Operand, data: &[u8]) -> Flow {
        let written = match operand {
            Operand::Local(offset) => self.call.frame_mut().write(offset, data),
            Operand::Constant(_) => {
                return Err(self.throw(ExceptionKind::InvalidInstruction(
                    "constants are read only".to_string(),
                )))
            }
            Operand::Field { handle, offset } => {
                let object = self.object(handle, true)?;
                let written = object.borrow_mut().write(offset, data);
                written
            }
        };
        if written {
            Ok(())
        } else {
            Err(self.out_of_bounds(operand, data.len()))
        }
    }

    pub fn read_value<T: Marshal>(&mut self, operand: Operand) -> Flow<T> {
        if T::SIZE > MAX_VALUE_SIZE {
            return Err(self.oversized::<T>());
        }
        let mut buffer = [0u8; MAX_VALUE_SIZE];
        self.read(operand, &mut buffer[..T::SIZE])?;
        Ok(T::read(&buffer[..T::SIZE]))
    }

    pub fn write_value<T: Marshal>(&mut self, operand: Operand, value: &T) -> Flow {
        if T::SIZE > MAX_VALUE_SIZE {
            return Err(self.oversized::<T>());
        }
        let mut buffer = [0u8; MAX_VALUE_SIZE];
        value.write(&mut buffer[..T::SIZE]);
        self.write(operand, &buffer[..T::SIZE])
    }

    /// The handle stored at `operand`, with a new reference
    pub fn read_handle(&mut self, operand: Operand) -> Flow<Handle> {
        match operand {
            Operand::Local(offset) => Ok(self.call.frame().handle(offset)),
            Operand::Constant(_) => Err(self.throw(ExceptionKind::InvalidInstruction(
                "handles cannot be constants".to_string(),
            ))),
            Operand::Field { handle, offset } => {
                let object = self.object(handle, false)?;
                let stored = object.borrow().handle(offset);
                Ok(stored)
            }
        }
    }

    /// Store `value` at `operand`, releasing whatever was there
    pub fn write_handle(&mut self, operand: Operand, value: Handle) -> Flow {
        let stored = match operand {
            Operand::Local(offset) => self.call.frame_mut().set_handle(offset, value),
            Operand::Constant(_) => {
                return Err(self.throw(ExceptionKind::InvalidInstruction(
                    "constants are read only".to_string(),
                )))
            }
            Operand::Field { handle, offset } => {
                let object = self.object(handle, true)?;
                if !object.borrow().has_handle_slot(offset) {
                    false
                } else {
                    let previous = object.borrow_mut().replace_handle(offset, value);
                    drop(previous);
                    true
                }
            }
        };
        if stored {
            Ok(())
        } else {
            Err(self.out_of_bounds(operand, crate::runtime::handle::HANDLE_SIZE))
        }
    }

    /// Copy a value of type `size` bytes, or a handle, between operands
    pub fn copy_slot(&mut self, is_handle: bool, size: usize, source: Operand, dest: Operand) -> Flow {
        if is_handle {
            let handle = self.read_handle(source)?;
            self.write_handle(dest, handle)
        } else {
            let mut buffer = vec![0u8; size];
            self.read(source, &mut buffer)?;
            self.write(dest, &buffer)
        }
    }
}
