//! Session-wide runtime context
//!
//! One [`ExecutableState`] drives one logical thread of script execution. It
//! owns the handle managers its handles resolve through, the active call
//! stack used for stack traces, and the random number generator. Native
//! callbacks reach it through [`Call::state`].

use super::call::Call;
use super::exception::{Exception, ExceptionKind, ExceptionReport, StackFrameInfo, StackTrace, Unwind};
use super::handle::Handle;
use super::manager::{AllocationStats, HandleManager, HeapManager, PointerManager, StringManager, ValueManager};
use super::memory::ObjectRef;
use super::value::Value;
use super::RuntimeError;
use crate::library::{Function, Library, ManagerId, ManagerKind, TypeId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, warn};

fn default_max_call_depth() -> usize {
    256
}

/// Tunables for an [`ExecutableState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Deepest allowed call nesting before `StackOverflow` is raised
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    /// Fixed RNG seed; seeded from entropy when absent
    #[serde(default)]
    pub rng_seed: Option<u64>,
    /// Emit a trace event for every dispatched opcode
    #[serde(default)]
    pub trace_opcodes: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            max_call_depth: default_max_call_depth(),
            rng_seed: None,
            trace_opcodes: false,
        }
    }
}

impl StateConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One entry of the active call stack
pub(crate) struct ActiveCall {
    function: Arc<Function>,
    pc: Cell<Option<usize>>,
}

impl ActiveCall {
    pub(crate) fn set_pc(&self, pc: usize) {
        self.pc.set(Some(pc));
    }

    fn info(&self) -> StackFrameInfo {
        let location = match (self.function.script(), self.pc.get()) {
            (Some(body), Some(pc)) => body.instructions.get(pc).and_then(|i| i.location),
            _ => None,
        };
        StackFrameInfo {
            function: self.function.name.clone(),
            location,
        }
    }
}

/// Pops the active call stack entry when the invocation ends, however it ends
pub(crate) struct CallGuard<'s> {
    state: &'s ExecutableState,
    pub(crate) active: Rc<ActiveCall>,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.state.stack.borrow_mut().pop();
    }
}

type UnhandledHandler = Box<dyn Fn(&Exception)>;

pub struct ExecutableState {
    library: Arc<Library>,
    config: StateConfig,
    managers: Vec<Rc<dyn HandleManager>>,
    pointers: Rc<PointerManager>,
    heap: Rc<HeapManager>,
    values: Rc<ValueManager>,
    strings: Rc<StringManager>,
    stack: RefCell<Vec<Rc<ActiveCall>>>,
    rng: RefCell<StdRng>,
    unhandled: RefCell<Option<UnhandledHandler>>,
}

impl ExecutableState {
    pub fn new(library: Arc<Library>) -> Self {
        ExecutableState::with_config(library, StateConfig::default())
    }

    pub fn with_config(library: Arc<Library>, config: StateConfig) -> Self {
        let pointers = Rc::new(PointerManager::new(ManagerId::POINTER));
        let heap = Rc::new(HeapManager::new(ManagerId::HEAP));
        let values = Rc::new(ValueManager::new(ManagerId::VALUE));
        let strings = Rc::new(StringManager::new(ManagerId::STRING));

        let managers = library
            .managers()
            .iter()
            .enumerate()
            .map(|(index, kind)| -> Rc<dyn HandleManager> {
                let id = ManagerId(index as u16);
                match (id, kind) {
                    (ManagerId::POINTER, _) => pointers.clone(),
                    (ManagerId::HEAP, _) => heap.clone(),
                    (ManagerId::VALUE, _) => values.clone(),
                    (ManagerId::STRING, _) => strings.clone(),
                    (_, ManagerKind::Pointer) => Rc::new(PointerManager::new(id)),
                    (_, ManagerKind::Heap) => Rc::new(HeapManager::new(id)),
                    (_, ManagerKind::Value) => Rc::new(ValueManager::new(id)),
                    (_, ManagerKind::String) => Rc::new(StringManager::new(id)),
                    (_, ManagerKind::Custom(create)) => create(id),
                }
            })
            .collect();

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        debug!(library = %library.name, max_call_depth = config.max_call_depth, "executable state created");
        ExecutableState {
            library,
            config,
            managers,
            pointers,
            heap,
            values,
            strings,
            stack: RefCell::new(Vec::new()),
            rng: RefCell::new(rng),
            unhandled: RefCell::new(None),
        }
    }

    /// Tear the session down, reporting objects that are still alive
    pub fn shutdown(self) -> AllocationStats {
        let stats = self.heap.stats();
        if stats.live() > 0 {
            warn!(live = stats.live(), "shutting down with live heap objects");
        }
        debug!(allocations = stats.allocations, frees = stats.frees, "executable state shut down");
        stats
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn manager(&self, id: ManagerId) -> Option<&Rc<dyn HandleManager>> {
        self.managers.get(id.0 as usize)
    }

    pub fn heap_stats(&self) -> AllocationStats {
        self.heap.stats()
    }

    pub fn heap(&self) -> &Rc<HeapManager> {
        &self.heap
    }

    pub fn pointers(&self) -> &Rc<PointerManager> {
        &self.pointers
    }

    pub fn strings(&self) -> &Rc<StringManager> {
        &self.strings
    }

    /// Create a zeroed instance of `type_id` through its manager
    pub fn allocate(&self, type_id: TypeId) -> Result<Handle, ExceptionKind> {
        let bound = self
            .library
            .get_type(type_id)
            .ok_or_else(|| ExceptionKind::InvalidInstruction(format!("unknown type {}", type_id.0)))?;
        let manager = self.manager(bound.handle_manager).ok_or_else(|| {
            ExceptionKind::InvalidInstruction(format!("{} has no handle manager", bound.name))
        })?;
        Ok(manager.clone().allocate(type_id, bound.size))
    }

    /// Wrap a host object as a handle of `type_id`
    pub fn handle_from_object(&self, object: &ObjectRef, type_id: TypeId) -> Result<Handle, ExceptionKind> {
        let bound = self
            .library
            .get_type(type_id)
            .ok_or_else(|| ExceptionKind::InvalidInstruction(format!("unknown type {}", type_id.0)))?;
        let manager = self.manager(bound.handle_manager).ok_or_else(|| {
            ExceptionKind::InvalidInstruction(format!("{} has no handle manager", bound.name))
        })?;
        Ok(manager.clone().object_to_handle(object, type_id))
    }

    /// Box value bytes into an inline handle
    pub fn box_value(&self, type_id: TypeId, bytes: &[u8]) -> Handle {
        self.values.clone().boxed(type_id, bytes)
    }

    /// Box a primitive [`Value`]; handles are returned as they are
    pub fn box_any(&self, value: &Value) -> Handle {
        match value {
            Value::Handle(handle) => handle.clone(),
            other => match (other.type_id(), other.to_bytes()) {
                (Some(type_id), Some(bytes)) => self.box_value(type_id, &bytes),
                _ => Handle::null(),
            },
        }
    }

    /// An interned string handle
    pub fn string(&self, text: &str) -> Handle {
        self.strings.clone().intern(text)
    }

    /// Record an exception with the current stack trace
    pub fn throw_exception(&self, report: &mut ExceptionReport, kind: ExceptionKind) -> Unwind {
        debug!(exception = %kind, depth = self.stack.borrow().len(), "exception thrown");
        report.push(Exception::new(kind, self.stack_trace()))
    }

    /// Snapshot of the active call stack, innermost first
    pub fn stack_trace(&self) -> StackTrace {
        StackTrace {
            frames: self.stack.borrow().iter().rev().map(|active| active.info()).collect(),
        }
    }

    pub fn call_depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Push `function` onto the active stack, refusing past the depth limit
    pub(crate) fn enter(&self, function: &Arc<Function>, report: &mut ExceptionReport) -> Result<CallGuard<'_>, Unwind> {
        if self.call_depth() >= self.config.max_call_depth {
            return Err(self.throw_exception(report, ExceptionKind::StackOverflow(self.config.max_call_depth)));
        }
        let active = Rc::new(ActiveCall {
            function: function.clone(),
            pc: Cell::new(None),
        });
        self.stack.borrow_mut().push(active.clone());
        Ok(CallGuard { state: self, active })
    }

    pub fn rng(&self) -> RefMut<'_, StdRng> {
        self.rng.borrow_mut()
    }

    /// Uniform integer in `[min, max]`
    pub fn random_integer(&self, min: i32, max: i32) -> i32 {
        let (low, high) = if min <= max { (min, max) } else { (max, min) };
        self.rng().gen_range(low..=high)
    }

    /// Uniform real in `[0, 1)`
    pub fn random_real(&self) -> f32 {
        self.rng().gen::<f32>()
    }

    /// Called with every exception that reaches the top of the call stack
    pub fn set_unhandled_exception_handler(&self, handler: impl Fn(&Exception) + 'static) {
        *self.unhandled.borrow_mut() = Some(Box::new(handler));
    }

    /// Invoke a free function by name with dynamically typed arguments
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Option<Value>, RuntimeError> {
        let function = self
            .library
            .find_function(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownFunction(name.to_string()))?;
        self.invoke_function(&function, None, args)
    }

    /// Invoke `function` as a top-level entry point
    ///
    /// An exception that nothing catches stops this invocation only; it comes
    /// back as [`RuntimeError::UnhandledException`].
    pub fn invoke_function(
        &self,
        function: &Arc<Function>,
        this: Option<Handle>,
        args: &[Value],
    ) -> Result<Option<Value>, RuntimeError> {
        if args.len() != function.parameters.len() {
            return Err(RuntimeError::ArgumentCount {
                function: function.name.clone(),
                expected: function.parameters.len(),
                actual: args.len(),
            });
        }

        let mut call = Call::new(self, function.clone());
        if let Some(this) = this {
            call.set_handle(Call::THIS, this);
        }
        for (index, arg) in args.iter().enumerate() {
            call.set_value(index as i32, arg)
                .map_err(|source| RuntimeError::InvalidArgument { index, source })?;
        }

        let mut report = ExceptionReport::new();
        call.invoke(&mut report);
        if let Some(exception) = report.last() {
            return Err(self.report_unhandled(exception));
        }
        Ok(function.return_type.and_then(|_| call.get_value(Call::RETURN)))
    }

    fn report_unhandled(&self, exception: &Exception) -> RuntimeError {
        let diagnostic = exception.format();
        error!(message = %exception.kind, "unhandled exception\n{}", exception.stack_trace);
        if let Some(handler) = self.unhandled.borrow().as_ref() {
            handler(exception);
        }
        RuntimeError::UnhandledException {
            message: exception.message(),
            diagnostic,
        }
    }
}

impl fmt::Debug for ExecutableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableState")
            .field("library", &self.library.name)
            .field("config", &self.config)
            .field("depth", &self.call_depth())
            .field("heap", &self.heap.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibraryBuilder;

    #[test]
    fn config_defaults() {
        let config = StateConfig::from_json("{}").unwrap();
        assert_eq!(config, StateConfig::default());
        assert_eq!(config.max_call_depth, 256);

        let config = StateConfig::from_json(r#"{"max_call_depth": 8, "rng_seed": 3}"#).unwrap();
        assert_eq!(config.max_call_depth, 8);
        assert_eq!(config.rng_seed, Some(3));
        assert!(!config.trace_opcodes);

        assert!(StateConfig::from_json("[").is_err());
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        let library = LibraryBuilder::new("test").build();
        let config = StateConfig {
            rng_seed: Some(7),
            ..StateConfig::default()
        };
        let a = ExecutableState::with_config(library.clone(), config.clone());
        let b = ExecutableState::with_config(library, config);
        let rolls_a: Vec<i32> = (0..8).map(|_| a.random_integer(1, 6)).collect();
        let rolls_b: Vec<i32> = (0..8).map(|_| b.random_integer(6, 1)).collect();
        assert_eq!(rolls_a, rolls_b);
        assert!(rolls_a.iter().all(|r| (1..=6).contains(r)));
        let real = a.random_real();
        assert!((0.0..1.0).contains(&real));
    }

    #[test]
    fn allocate_uses_the_type_manager() {
        let mut builder = LibraryBuilder::new("test");
        let point = builder.add_class("Point", None);
        builder.add_field(point, "x", TypeId::REAL);
        let state = ExecutableState::new(builder.build());

        let handle = state.allocate(point).unwrap();
        assert_eq!(handle.manager_id(), Some(ManagerId::HEAP));
        assert_eq!(state.heap_stats().live(), 1);
        drop(handle);
        assert_eq!(state.shutdown().live(), 0);
    }

    #[test]
    fn unknown_function() {
        let state = ExecutableState::new(LibraryBuilder::new("test").build());
        let result = state.invoke("Missing", &[]);
        assert!(matches!(result, Err(RuntimeError::UnknownFunction(name)) if name == "Missing"));
    }
}
