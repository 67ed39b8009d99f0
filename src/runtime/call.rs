//! Argument and return marshalling for one invocation
//!
//! A [`Call`] owns the callee's [`StackFrame`]. Callers fill the parameter
//! slots, [`Call::invoke`] runs the function whether it is native or script,
//! and the return slot is read back afterwards. Slots are addressed by index:
//! parameters from 0, plus [`Call::RETURN`] and [`Call::THIS`].

use super::exception::{ExceptionKind, ExceptionReport, Flow};
use super::executor;
use super::frame::StackFrame;
use super::handle::Handle;
use super::state::ExecutableState;
use super::value::{Marshal, Value};
use crate::library::{Function, FunctionBody, TypeId, TypeKind};
use std::sync::Arc;

pub struct Call<'s> {
    state: &'s ExecutableState,
    function: Arc<Function>,
    frame: StackFrame,
    /// First marshalling failure; thrown by `invoke` before anything runs
    marshal_error: Option<ExceptionKind>,
}

impl<'s> Call<'s> {
    pub const RETURN: i32 = -1;
    pub const THIS: i32 = -2;

    pub fn new(state: &'s ExecutableState, function: Arc<Function>) -> Self {
        let frame = StackFrame::for_function(&function);
        Call {
            state,
            function,
            frame,
            marshal_error: None,
        }
    }

    pub fn state(&self) -> &'s ExecutableState {
        self.state
    }

    pub fn function(&self) -> &Arc<Function> {
        &self.function
    }

    pub fn frame(&self) -> &StackFrame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut StackFrame {
        &mut self.frame
    }

    /// Byte offset and declared type of a slot
    pub fn slot(&self, index: i32) -> Result<(usize, TypeId), ExceptionKind> {
        let function = &self.function;
        let (offset, declared) = match index {
            Call::RETURN => (function.layout.return_offset, function.return_type),
            Call::THIS => (function.layout.this_offset, function.owner),
            index if index >= 0 => (
                function.layout.parameter_offsets.get(index as usize).copied(),
                function.parameters.get(index as usize).map(|p| p.param_type),
            ),
            _ => (None, None),
        };
        match (offset, declared) {
            (Some(offset), Some(declared)) => Ok((offset, declared)),
            _ => Err(ExceptionKind::IndexOutOfRange {
                index: index as i64,
                max: function.parameters.len() as i64 - 1,
            }),
        }
    }

    fn mismatch(&self, expected: TypeId, actual: Option<TypeId>) -> ExceptionKind {
        let library = self.state.library();
        ExceptionKind::TypeMismatch {
            expected: library.type_name(expected).to_string(),
            actual: actual
                .map(|t| library.type_name(t).to_string())
                .unwrap_or_else(|| "null".to_string()),
        }
    }

    fn record(&mut self, kind: ExceptionKind) {
        tracing::debug!(function = %self.function.name, error = %kind, "argument rejected");
        self.marshal_error.get_or_insert(kind);
    }

    /// Read slot `index` as `T`
    pub fn try_get<T: Marshal>(&self, index: i32) -> Result<T, ExceptionKind> {
        let (offset, declared) = self.slot(index)?;
        let library = self.state.library();
        if library.is_handle_type(declared) {
            return self.frame.handle(offset).try_get(library);
        }
        let expected = T::script_type(library).ok_or_else(|| self.mismatch(declared, None))?;
        if !library.is_raw_castable(declared, expected) {
            return Err(self.mismatch(expected, Some(declared)));
        }
        self.frame.read_value(offset).ok_or(ExceptionKind::IndexOutOfRange {
            index: index as i64,
            max: self.function.parameters.len() as i64 - 1,
        })
    }

    /// Read slot `index` as `T`, reporting failures and returning zero
    ///
    /// Check the report before using the value.
    pub fn get<T: Marshal>(&self, index: i32, report: &mut ExceptionReport) -> T {
        match self.try_get(index) {
            Ok(value) => value,
            Err(kind) => {
                self.state.throw_exception(report, kind);
                T::zeroed()
            }
        }
    }

    fn try_set<T: Marshal>(&mut self, index: i32, value: &T) -> Result<(), ExceptionKind> {
        let (offset, declared) = self.slot(index)?;
        let library = self.state.library();
        let actual = T::script_type(library).ok_or_else(|| self.mismatch(declared, None))?;
        if declared == TypeId::ANY {
            let mut bytes = vec![0u8; T::SIZE];
            value.write(&mut bytes);
            let boxed = self.state.box_value(actual, &bytes);
            self.frame.set_handle(offset, boxed);
            return Ok(());
        }
        if library.is_handle_type(declared) || !library.is_raw_castable(actual, declared) {
            return Err(self.mismatch(declared, Some(actual)));
        }
        self.frame.write_value(offset, value);
        Ok(())
    }

    /// Write `value` into slot `index`
    ///
    /// A rejected value leaves the slot untouched and makes the next
    /// [`invoke`](Call::invoke) throw before the function runs.
    pub fn set<T: Marshal>(&mut self, index: i32, value: T) {
        if let Err(kind) = self.try_set(index, &value) {
            self.record(kind);
        }
    }

    /// The handle stored in slot `index`
    pub fn get_handle(&self, index: i32, report: &mut ExceptionReport) -> Handle {
        match self.slot(index) {
            Ok((offset, declared)) if self.state.library().is_handle_type(declared) => self.frame.handle(offset),
            Ok((_, declared)) => {
                let kind = self.mismatch(declared, None);
                self.state.throw_exception(report, kind);
                Handle::null()
            }
            Err(kind) => {
                self.state.throw_exception(report, kind);
                Handle::null()
            }
        }
    }

    fn try_set_handle(&mut self, index: i32, handle: Handle) -> Result<(), ExceptionKind> {
        let (offset, declared) = self.slot(index)?;
        let library = self.state.library();
        if !library.is_handle_type(declared) {
            return Err(self.mismatch(declared, handle.stored_type()));
        }
        if declared != TypeId::ANY && !handle.is_null() && !handle.is_raw_castable_to(library, declared) {
            return Err(self.mismatch(declared, handle.stored_type()));
        }
        self.frame.set_handle(offset, handle);
        Ok(())
    }

    /// Store a handle in slot `index`, with the same rejection rules as [`Call::set`]
    pub fn set_handle(&mut self, index: i32, handle: Handle) {
        if let Err(kind) = self.try_set_handle(index, handle) {
            self.record(kind);
        }
    }

    pub fn this_handle(&self, report: &mut ExceptionReport) -> Handle {
        self.get_handle(Call::THIS, report)
    }

    /// Text of the string in slot `index`; empty and reported if it is not a string
    pub fn get_string(&self, index: i32, report: &mut ExceptionReport) -> String {
        let handle = self.get_handle(index, report);
        match handle.text() {
            Some(text) => text.to_string(),
            None if report.has_thrown_exceptions() => String::new(),
            None => {
                let kind = if handle.is_null() {
                    ExceptionKind::NullReference
                } else {
                    self.mismatch(TypeId::STRING, handle.stored_type())
                };
                self.state.throw_exception(report, kind);
                String::new()
            }
        }
    }

    /// The variable arguments of a variadic function
    ///
    /// The count comes from the function's declaration, never from the frame.
    pub fn variadic_args(&self, report: &mut ExceptionReport) -> Vec<Handle> {
        let declared = self.function.parameters.len();
        let count = self.function.variadic.unwrap_or(0);
        if count > declared {
            self.state.throw_exception(
                report,
                ExceptionKind::InvalidArgumentCount {
                    expected: count,
                    actual: declared,
                },
            );
            return Vec::new();
        }
        let mut args = Vec::with_capacity(count);
        for index in declared - count..declared {
            let handle = self.get_handle(index as i32, report);
            if report.has_thrown_exceptions() {
                return Vec::new();
            }
            args.push(handle);
        }
        args
    }

    /// Read slot `index` as a dynamically typed value
    pub fn get_value(&self, index: i32) -> Option<Value> {
        let (offset, declared) = self.slot(index).ok()?;
        let library = self.state.library();
        if library.is_handle_type(declared) {
            return Some(Value::Handle(self.frame.handle(offset)));
        }
        let kind = match library.get_type(declared)?.kind {
            TypeKind::Primitive(kind) => kind,
            TypeKind::Enum { backing } => library.get_type(backing)?.primitive()?,
            _ => return None,
        };
        Value::from_bytes(kind, self.frame.slice(offset, kind.size())?)
    }

    /// Write a dynamically typed value into slot `index`
    pub fn set_value(&mut self, index: i32, value: &Value) -> Result<(), ExceptionKind> {
        if let Value::Handle(handle) = value {
            return self.try_set_handle(index, handle.clone());
        }
        let (offset, declared) = self.slot(index)?;
        let actual = value.type_id();
        if declared == TypeId::ANY {
            self.frame.set_handle(offset, self.state.box_any(value));
            return Ok(());
        }
        let library = self.state.library();
        match (actual, value.to_bytes()) {
            (Some(actual), Some(bytes)) if library.is_raw_castable(actual, declared) => {
                self.frame.write(offset, &bytes);
                Ok(())
            }
            _ => Err(self.mismatch(declared, actual)),
        }
    }

    /// Run the function; failures are left in `report`
    pub fn invoke(&mut self, report: &mut ExceptionReport) {
        let _ = self.run(report);
    }

    pub(crate) fn run(&mut self, report: &mut ExceptionReport) -> Flow {
        if let Some(kind) = self.marshal_error.take() {
            return Err(self.state.throw_exception(report, kind));
        }
        let state = self.state;
        let guard = state.enter(&self.function, report)?;
        let function = self.function.clone();
        match &function.body {
            FunctionBody::Native(callback) => {
                (**callback)(self, report);
                if let Some(kind) = self.marshal_error.take() {
                    return Err(state.throw_exception(report, kind));
                }
                report.check()
            }
            FunctionBody::Script(body) => {
                tracing::debug!(function = %function.name, depth = state.call_depth(), "enter");
                let result = executor::execute(self, body, report, &guard.active);
                tracing::debug!(function = %function.name, unwinding = result.is_err(), "exit");
                result
            }
        }
    }
}
