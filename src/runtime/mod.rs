//! Execution engine
//!
//! This module provides the dispatch loop, the handle and frame model, and the
//! call marshalling layer shared by native and script functions.

pub mod call;
pub mod exception;
pub mod executor;
pub mod frame;
pub mod handle;
pub mod manager;
pub mod memory;
pub mod ops;
pub mod state;
pub mod test_utils;
pub mod value;

pub use call::Call;
pub use exception::{Exception, ExceptionKind, ExceptionReport, Flow, StackFrameInfo, StackTrace, Unwind};
pub use frame::StackFrame;
pub use handle::{Handle, HandleData, HANDLE_SIZE, INLINE_CAPACITY};
pub use manager::{AllocationStats, HandleManager, HeapManager, PointerManager, StringManager, ValueManager};
pub use memory::{Block, ObjectRef};
pub use state::{ExecutableState, StateConfig};
pub use value::{Marshal, Value, Vector};

/// Errors returned to embedding code
///
/// Script-level failures travel through [`ExceptionReport`]; these are the
/// host-facing outcomes of a top-level invocation.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Invalid argument count for {function}: expected {expected}, got {actual}")]
    ArgumentCount {
        function: String,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid argument {index}: {source}")]
    InvalidArgument { index: usize, source: ExceptionKind },
    #[error("Unhandled exception: {message}")]
    UnhandledException {
        message: String,
        /// Message followed by the captured stack trace
        diagnostic: String,
    },
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
