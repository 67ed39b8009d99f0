//! Exception reporting
//!
//! Exceptions never travel through Rust panics or host unwinding. Whatever
//! raises one records it in the [`ExceptionReport`] and returns [`Unwind`];
//! every instruction handler and call boundary propagates that marker with `?`
//! until a protected range catches it or the outermost caller reports it.

use crate::library::CodeLocation;
use std::fmt;

/// Marker returned when the report holds an exception and execution must unwind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwind;

/// Result of any step that may raise an exception
pub type Flow<T = ()> = Result<T, Unwind>;

/// The kinds of exception the engine raises
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExceptionKind {
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("Attempted to access a member of a null handle")]
    NullReference,
    #[error("Attempted to {operation} by zero")]
    DivisionOrModulusByZero { operation: &'static str },
    #[error("Invalid argument count: expected {expected}, got {actual}")]
    InvalidArgumentCount { expected: usize, actual: usize },
    #[error("The stack overflowed (maximum call depth {0})")]
    StackOverflow(usize),
    #[error("Index {index} out of range [0-{max}]")]
    IndexOutOfRange { index: i64, max: i64 },
    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),
    /// Raised by script `throw` or by native code with a custom message
    #[error("{0}")]
    User(String),
}

/// One frame of a captured stack trace
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrameInfo {
    pub function: String,
    pub location: Option<CodeLocation>,
}

impl fmt::Display for StackFrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} ({})", self.function, location),
            None => write!(f, "{}", self.function),
        }
    }
}

/// Call stack snapshot, innermost frame first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackTrace {
    pub frames: Vec<StackFrameInfo>,
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(f, "  at {frame}")?;
        }
        Ok(())
    }
}

/// A raised exception with the stack captured when it was thrown
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub stack_trace: StackTrace,
}

impl Exception {
    pub fn new(kind: ExceptionKind, stack_trace: StackTrace) -> Self {
        Exception { kind, stack_trace }
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    /// Message followed by the full stack trace
    pub fn format(&self) -> String {
        format!("{}\n{}", self.kind, self.stack_trace)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Accumulates thrown exceptions for one invocation
#[derive(Debug, Default)]
pub struct ExceptionReport {
    exceptions: Vec<Exception>,
}

impl ExceptionReport {
    pub fn new() -> Self {
        ExceptionReport::default()
    }

    pub fn has_thrown_exceptions(&self) -> bool {
        !self.exceptions.is_empty()
    }

    pub fn exceptions(&self) -> &[Exception] {
        &self.exceptions
    }

    /// The most recent exception
    pub fn last(&self) -> Option<&Exception> {
        self.exceptions.last()
    }

    /// Record an exception and return the unwind marker
    pub fn push(&mut self, exception: Exception) -> Unwind {
        self.exceptions.push(exception);
        Unwind
    }

    /// Remove the most recent exception, as a catch handler does
    pub fn take_last(&mut self) -> Option<Exception> {
        self.exceptions.pop()
    }

    pub fn clear(&mut self) {
        self.exceptions.clear();
    }

    /// `Err(Unwind)` if anything has been thrown
    pub fn check(&self) -> Flow {
        if self.has_thrown_exceptions() {
            Err(Unwind)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tracks_thrown_state() {
        let mut report = ExceptionReport::new();
        assert!(!report.has_thrown_exceptions());
        assert_eq!(report.check(), Ok(()));

        let unwind = report.push(Exception::new(ExceptionKind::NullReference, StackTrace::default()));
        assert_eq!(unwind, Unwind);
        assert!(report.has_thrown_exceptions());
        assert_eq!(report.check(), Err(Unwind));

        let caught = report.take_last().unwrap();
        assert_eq!(caught.kind, ExceptionKind::NullReference);
        assert!(!report.has_thrown_exceptions());
    }

    #[test]
    fn messages() {
        let kind = ExceptionKind::DivisionOrModulusByZero { operation: "modulo" };
        assert_eq!(kind.to_string(), "Attempted to modulo by zero");
        let kind = ExceptionKind::TypeMismatch {
            expected: "Integer".into(),
            actual: "String".into(),
        };
        assert_eq!(kind.to_string(), "Type mismatch: expected Integer, got String");
    }

    #[test]
    fn format_includes_stack() {
        let exception = Exception::new(
            ExceptionKind::User("boom".into()),
            StackTrace {
                frames: vec![
                    StackFrameInfo {
                        function: "Inner".into(),
                        location: Some(CodeLocation { line: 3, column: 7 }),
                    },
                    StackFrameInfo {
                        function: "Print".into(),
                        location: None,
                    },
                ],
            },
        );
        assert_eq!(
            exception.format(),
            "boom\n  at Inner (line 3, column 7)\n  at Print\n"
        );
    }
}
