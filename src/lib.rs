//! An embeddable execution engine for a statically typed scripting language.
//!
//! kestrel runs compiled script functions and native host callbacks through
//! one calling convention: byte frames with bus-aligned slots, type-erased
//! [`runtime::Handle`]s resolved by pluggable handle managers, and exceptions
//! recorded in a [`runtime::ExceptionReport`] instead of host unwinding.
//!
//! # Modules
//!
//! - [`library`] -- The immutable type and function table, and the builder hosts use to describe it.
//! - [`runtime`] -- Handles, frames, call marshalling, the dispatch loop and the executable state.
//!
//! # Example
//!
//! Bind a native function and invoke it by name:
//!
//! ```
//! use kestrel::library::{FunctionDecl, LibraryBuilder, TypeId};
//! use kestrel::runtime::{Call, ExecutableState, Value};
//!
//! let mut builder = LibraryBuilder::new("math");
//! builder.add_native_function(
//!     FunctionDecl::new("Add")
//!         .param("a", TypeId::INTEGER)
//!         .param("b", TypeId::INTEGER)
//!         .returns(TypeId::INTEGER),
//!     |call, report| {
//!         let a: i32 = call.get(0, report);
//!         let b: i32 = call.get(1, report);
//!         if !report.has_thrown_exceptions() {
//!             call.set(Call::RETURN, a + b);
//!         }
//!     },
//! );
//!
//! let state = ExecutableState::new(builder.build());
//! let result = state.invoke("Add", &[Value::Integer(2), Value::Integer(3)]).unwrap();
//! assert_eq!(result, Some(Value::Integer(5)));
//! ```
//!
//! # Threading
//!
//! A built [`library::Library`] is shared read-only behind an `Arc`. Each
//! [`runtime::ExecutableState`] and every handle it issues belong to one
//! thread; independent states may run on different threads.

pub mod library;
pub mod runtime;
