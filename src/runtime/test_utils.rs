//! Test utilities for runtime testing
//!
//! This module provides test helpers that can be used by any runtime test
//! without creating circular dependencies.

#[cfg(test)]
pub mod test {
    use crate::library::{FunctionDecl, Instruction, LibraryBuilder, Opcode, Operand, ProtectedRange, ScriptBody, TypeId};
    use crate::runtime::{ExecutableState, Marshal, RuntimeError, StateConfig, Value};

    /// Frame size used unless a test asks for another
    const DEFAULT_FRAME_SIZE: usize = 64;

    enum TestArg {
        Value(Value),
        /// Interned once the state exists
        String(String),
    }

    /// Test builder for running a single script function fluently
    ///
    /// The function under test is named `test` and is added to the library
    /// after anything registered through [`FunctionTest::builder`].
    pub struct FunctionTest {
        builder: LibraryBuilder,
        decl: FunctionDecl,
        body: ScriptBody,
        args: Vec<TestArg>,
        config: StateConfig,
    }

    impl Default for FunctionTest {
        fn default() -> Self {
            FunctionTest::new()
        }
    }

    impl FunctionTest {
        pub fn new() -> Self {
            FunctionTest {
                builder: LibraryBuilder::new("test"),
                decl: FunctionDecl::new("test"),
                body: ScriptBody::new(Vec::new()).frame_size(DEFAULT_FRAME_SIZE),
                args: Vec::new(),
                config: StateConfig::default(),
            }
        }

        /// Register supporting types and functions
        pub fn builder(&mut self) -> &mut LibraryBuilder {
            &mut self.builder
        }

        pub fn returns(mut self, return_type: TypeId) -> Self {
            self.decl = self.decl.returns(return_type);
            self
        }

        pub fn param(mut self, param_type: TypeId) -> Self {
            let name = format!("p{}", self.decl.parameters.len());
            self.decl = self.decl.param(name, param_type);
            self
        }

        pub fn frame_size(mut self, size: usize) -> Self {
            self.body.frame_size = size;
            self
        }

        pub fn constant<T: Marshal>(&mut self, value: T) -> Operand {
            self.body.constant(value)
        }

        pub fn string(&mut self, text: &str) -> usize {
            self.body.string(text)
        }

        pub fn protect(mut self, range: ProtectedRange) -> Self {
            self.body.protected_ranges.push(range);
            self
        }

        pub fn inst(mut self, opcode: Opcode) -> Self {
            self.body.instructions.push(Instruction::new(opcode));
            self
        }

        pub fn inst_at(mut self, opcode: Opcode, line: u32, column: u32) -> Self {
            self.body.instructions.push(Instruction::at(opcode, line, column));
            self
        }

        pub fn arg(mut self, value: Value) -> Self {
            self.args.push(TestArg::Value(value));
            self
        }

        pub fn string_arg(mut self, text: &str) -> Self {
            self.args.push(TestArg::String(text.to_string()));
            self
        }

        pub fn config(mut self, config: StateConfig) -> Self {
            self.config = config;
            self
        }

        /// Build the library and invoke `test` with the collected arguments
        pub fn run(mut self) -> (ExecutableState, Result<Option<Value>, RuntimeError>) {
            let id = self.builder.add_script_function(self.decl, self.body);
            let library = self.builder.build();
            let state = ExecutableState::with_config(library.clone(), self.config);
            let args: Vec<Value> = self
                .args
                .into_iter()
                .map(|arg| match arg {
                    TestArg::Value(value) => value,
                    TestArg::String(text) => Value::Handle(state.string(&text)),
                })
                .collect();
            let function = library.function(id).expect("test function exists").clone();
            let result = state.invoke_function(&function, None, &args);
            drop(args);
            (state, result)
        }

        pub fn expect_return(self, expected: Value) -> ExecutableState {
            let (state, result) = self.run();
            match result {
                Ok(Some(value)) => assert_eq!(value, expected),
                other => panic!("Expected {expected:?}, got {other:?}"),
            }
            state
        }

        pub fn expect_string(self, expected: &str) -> ExecutableState {
            let (state, result) = self.run();
            match result {
                Ok(Some(Value::Handle(handle))) => {
                    assert_eq!(handle.text().as_deref(), Some(expected), "returned {handle:?}")
                }
                other => panic!("Expected string {expected:?}, got {other:?}"),
            }
            state
        }

        pub fn expect_exception(self, message_contains: &str) -> ExecutableState {
            let (state, result) = self.run();
            match result {
                Err(RuntimeError::UnhandledException { message, .. }) => {
                    assert!(
                        message.contains(message_contains),
                        "Expected exception containing '{}', got: '{}'",
                        message_contains,
                        message
                    );
                }
                other => panic!(
                    "Expected exception containing '{}', but got {:?}",
                    message_contains, other
                ),
            }
            state
        }
    }
}
