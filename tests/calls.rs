#[cfg(test)]
mod tests {
    use kestrel::library::{
        BinaryOp, CopyMode, FunctionDecl, FunctionId, Instruction, LibraryBuilder, ManagerId, Opcode, Operand,
        PrimitiveKind, ScriptBody, TypeId,
    };
    use kestrel::runtime::{
        Block, Call, ExceptionKind, ExceptionReport, ExecutableState, Handle, RuntimeError, StateConfig, Value, Vector,
    };
    use rstest::rstest;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn add_decl() -> FunctionDecl {
        FunctionDecl::new("Add")
            .param("a", TypeId::INTEGER)
            .param("b", TypeId::INTEGER)
            .returns(TypeId::INTEGER)
    }

    /// `Add(a, b)` that counts how often its body actually ran
    fn add_with_counter(builder: &mut LibraryBuilder) -> Arc<AtomicUsize> {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        builder.add_native_function(add_decl(), move |call, report| {
            let a: i32 = call.get(0, report);
            let b: i32 = call.get(1, report);
            if report.has_thrown_exceptions() {
                return;
            }
            counter.fetch_add(1, Ordering::SeqCst);
            call.set(Call::RETURN, a.wrapping_add(b));
        });
        runs
    }

    // ============================================================================
    // Native calls
    // ============================================================================

    #[test]
    fn native_add() {
        let mut builder = LibraryBuilder::new("calls");
        let runs = add_with_counter(&mut builder);
        let state = ExecutableState::new(builder.build());

        let result = state.invoke("Add", &[Value::Integer(2), Value::Integer(3)]).unwrap();
        assert_eq!(result, Some(Value::Integer(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wrong_handle_type_never_reaches_the_body() {
        let mut builder = LibraryBuilder::new("calls");
        let runs = add_with_counter(&mut builder);
        let state = ExecutableState::new(builder.build());
        let add = state.library().find_function("Add").unwrap().clone();

        let mut call = Call::new(&state, add);
        call.set_handle(0, state.string("2"));
        call.set(1, 3i32);
        let mut report = ExceptionReport::new();
        call.invoke(&mut report);

        assert!(report.has_thrown_exceptions());
        assert_eq!(
            report.last().unwrap().kind,
            ExceptionKind::TypeMismatch {
                expected: "Integer".to_string(),
                actual: "String".to_string(),
            }
        );
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(call.get_value(Call::RETURN), Some(Value::Integer(0)));
    }

    #[test]
    fn invoke_rejects_bad_arguments_up_front() {
        let mut builder = LibraryBuilder::new("calls");
        let runs = add_with_counter(&mut builder);
        let state = ExecutableState::new(builder.build());

        let text = Value::Handle(state.string("2"));
        let result = state.invoke("Add", &[text, Value::Integer(3)]);
        assert!(matches!(result, Err(RuntimeError::InvalidArgument { index: 0, .. })));

        let result = state.invoke("Add", &[Value::Integer(3)]);
        assert!(matches!(
            result,
            Err(RuntimeError::ArgumentCount {
                expected: 2,
                actual: 1,
                ..
            })
        ));

        assert!(matches!(state.invoke("Missing", &[]), Err(RuntimeError::UnknownFunction(_))));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    // ============================================================================
    // Frame layout
    // ============================================================================

    fn flags_decl() -> FunctionDecl {
        FunctionDecl::new("Pack")
            .param("a", TypeId::BOOLEAN)
            .param("b", TypeId::BOOLEAN)
            .param("c", TypeId::BOOLEAN)
            .param("d", TypeId::INTEGER)
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 4)]
    #[case(2, 8)]
    #[case(3, 12)]
    fn parameters_are_bus_aligned(#[case] index: usize, #[case] offset: usize) {
        let builder = LibraryBuilder::new("layout");
        let layout = builder.layout_of(&flags_decl());
        assert_eq!(layout.parameter_offsets[index], offset);
        assert_eq!(layout.locals_start, 16);
    }

    #[test]
    fn marshalled_flags_leave_padding_zeroed() {
        let mut builder = LibraryBuilder::new("layout");
        builder.add_native_function(flags_decl().returns(TypeId::INTEGER), |call, report| {
            let a: bool = call.get(0, report);
            let b: bool = call.get(1, report);
            let c: bool = call.get(2, report);
            let d: i32 = call.get(3, report);
            let packed = a as i32 | (b as i32) << 1 | (c as i32) << 2 | d << 3;
            call.set(Call::RETURN, packed);
        });
        let state = ExecutableState::new(builder.build());
        let pack = state.library().find_function("Pack").unwrap().clone();

        let mut call = Call::new(&state, pack.clone());
        call.set(0, true);
        call.set(1, false);
        call.set(2, true);
        call.set(3, 42i32);

        // One return slot ahead of the parameters
        let first = pack.layout.parameter_offsets[0];
        assert_eq!(first, 4);
        assert_eq!(call.frame().slice(first, 4), Some(&[1u8, 0, 0, 0][..]));
        assert_eq!(call.frame().slice(first + 8, 4), Some(&[1u8, 0, 0, 0][..]));

        let mut report = ExceptionReport::new();
        call.invoke(&mut report);
        assert!(!report.has_thrown_exceptions());
        assert_eq!(call.get::<i32>(Call::RETURN, &mut report), 1 | 4 | 42 << 3);
    }

    // ============================================================================
    // Variadic functions
    // ============================================================================

    fn sum_library(variadic: usize) -> Arc<kestrel::library::Library> {
        let mut builder = LibraryBuilder::new("variadic");
        let decl = FunctionDecl::new("Sum")
            .param("a", TypeId::ANY)
            .param("b", TypeId::ANY)
            .param("c", TypeId::ANY)
            .returns(TypeId::INTEGER)
            .variadic(variadic);
        builder.add_native_function(decl, |call, report| {
            let library = call.state().library();
            let mut total = 0;
            for handle in call.variadic_args(report) {
                match handle.try_get::<i32>(library) {
                    Ok(value) => total += value,
                    Err(kind) => {
                        call.state().throw_exception(report, kind);
                        return;
                    }
                }
            }
            call.set(Call::RETURN, total);
        });
        builder.build()
    }

    #[rstest]
    #[case(3, 6)]
    #[case(2, 5)]
    #[case(0, 0)]
    fn variadic_count_comes_from_the_declaration(#[case] variadic: usize, #[case] expected: i32) {
        let state = ExecutableState::new(sum_library(variadic));
        let args = [Value::Integer(1), Value::Integer(2), Value::Integer(3)];
        assert_eq!(state.invoke("Sum", &args).unwrap(), Some(Value::Integer(expected)));
    }

    #[test]
    fn variadic_count_beyond_the_parameters() {
        let state = ExecutableState::new(sum_library(4));
        let args = [Value::Integer(1), Value::Integer(2), Value::Integer(3)];
        match state.invoke("Sum", &args) {
            Err(RuntimeError::UnhandledException { message, .. }) => {
                assert_eq!(message, "Invalid argument count: expected 4, got 3")
            }
            other => panic!("expected an argument count failure, got {other:?}"),
        }
    }

    // ============================================================================
    // Virtual dispatch
    // ============================================================================

    /// Shapes store their concrete type id in their first four bytes
    fn shape_tag(handle: &Handle) -> Option<TypeId> {
        handle
            .with_bytes(|bytes| bytes.get(..4).map(|tag| TypeId(u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]]))))
            .flatten()
    }

    #[rstest]
    #[case::override_runs(true, 9)]
    #[case::base_runs(false, 0)]
    fn virtual_call_uses_the_dynamic_type(#[case] is_square: bool, #[case] expected: i32) {
        let mut builder = LibraryBuilder::new("shapes");
        let shape = builder.add_native_type("Shape", 8, None, CopyMode::Reference, ManagerId::POINTER);
        let square = builder.add_native_type("Square", 8, Some(shape), CopyMode::Reference, ManagerId::POINTER);
        builder.set_derived_type(shape, shape_tag);

        let area = FunctionDecl::new("Area").returns(TypeId::INTEGER);
        let base_area = builder.add_native_function(area.clone().virtual_method(shape), |call, _| {
            call.set(Call::RETURN, 0i32);
        });
        builder.add_native_function(area.virtual_method(square), move |call, report| {
            let this = call.this_handle(report);
            let object = match this.get_object(call.state().library(), square) {
                Ok(object) => object,
                Err(kind) => {
                    call.state().throw_exception(report, kind);
                    return;
                }
            };
            let side = {
                let block = object.borrow();
                let bytes = block.slice(4, 4).unwrap_or(&[0; 4]);
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            };
            call.set(Call::RETURN, side * side);
        });

        let measure = FunctionDecl::new("Measure").param("shape", shape).returns(TypeId::INTEGER);
        let layout = builder.layout_of(&measure);
        let body = ScriptBody::new(vec![
            Instruction::new(Opcode::VirtualFunctionCall {
                function: base_area,
                this: Operand::Local(layout.parameter_offsets[0]),
                args: Vec::new(),
                ret: layout.return_offset.map(Operand::Local),
            }),
            Instruction::new(Opcode::Return),
        ]);
        builder.add_script_function(measure, body);
        let state = ExecutableState::new(builder.build());

        let tag = if is_square { square } else { shape };
        let mut block = Block::new(8);
        block.write(0, &tag.0.to_le_bytes());
        block.write(4, &3i32.to_le_bytes());
        let object = block.into_object();
        let handle = state.handle_from_object(&object, shape).unwrap();

        let result = state.invoke("Measure", &[Value::Handle(handle)]).unwrap();
        assert_eq!(result, Some(Value::Integer(expected)));
    }

    // ============================================================================
    // Unhandled exceptions
    // ============================================================================

    fn failing_library() -> Arc<kestrel::library::Library> {
        let mut builder = LibraryBuilder::new("failing");
        let fail = builder.add_native_function(FunctionDecl::new("Fail"), |call, report| {
            call.state().throw_exception(report, ExceptionKind::User("bad input".to_string()));
        });
        let body = ScriptBody::new(vec![
            Instruction::at(
                Opcode::FunctionCall {
                    function: fail,
                    this: None,
                    args: Vec::new(),
                    ret: None,
                },
                7,
                3,
            ),
            Instruction::new(Opcode::Return),
        ]);
        builder.add_script_function(FunctionDecl::new("Outer"), body);
        add_with_counter(&mut builder);
        builder.build()
    }

    #[test]
    fn unhandled_exception_reaches_the_host() {
        let state = ExecutableState::new(failing_library());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        state.set_unhandled_exception_handler(move |exception| sink.borrow_mut().push(exception.message()));

        match state.invoke("Outer", &[]) {
            Err(RuntimeError::UnhandledException { message, diagnostic }) => {
                assert_eq!(message, "bad input");
                let fail = diagnostic.find("at Fail").expect("native frame listed");
                let outer = diagnostic.find("at Outer (line 7, column 3)").expect("script frame listed");
                assert!(fail < outer, "{diagnostic}");
            }
            other => panic!("expected an unhandled exception, got {other:?}"),
        }
        assert_eq!(*seen.borrow(), vec!["bad input".to_string()]);

        // Only that invocation stopped
        assert_eq!(state.call_depth(), 0);
        let result = state.invoke("Add", &[Value::Integer(1), Value::Integer(1)]).unwrap();
        assert_eq!(result, Some(Value::Integer(2)));
    }

    #[test]
    fn runaway_recursion_is_a_stack_overflow() {
        let mut builder = LibraryBuilder::new("recursion");
        // The first function registered gets id 0
        let body = ScriptBody::new(vec![
            Instruction::new(Opcode::FunctionCall {
                function: FunctionId(0),
                this: None,
                args: Vec::new(),
                ret: None,
            }),
            Instruction::new(Opcode::Return),
        ]);
        builder.add_script_function(FunctionDecl::new("Recurse"), body);
        let config = StateConfig {
            max_call_depth: 8,
            ..StateConfig::default()
        };
        let state = ExecutableState::with_config(builder.build(), config);

        match state.invoke("Recurse", &[]) {
            Err(RuntimeError::UnhandledException { message, diagnostic }) => {
                assert_eq!(message, "The stack overflowed (maximum call depth 8)");
                assert_eq!(diagnostic.matches("at Recurse").count(), 8);
            }
            other => panic!("expected a stack overflow, got {other:?}"),
        }
        assert_eq!(state.call_depth(), 0);
    }

    // ============================================================================
    // Arithmetic through invoke
    // ============================================================================

    fn divide_state(kind: PrimitiveKind, type_id: TypeId, op: BinaryOp) -> ExecutableState {
        let mut builder = LibraryBuilder::new("divide");
        let decl = FunctionDecl::new("Divide")
            .param("a", type_id)
            .param("b", type_id)
            .returns(type_id);
        let layout = builder.layout_of(&decl);
        let body = ScriptBody::new(vec![
            Instruction::at(
                Opcode::Binary {
                    op,
                    kind,
                    lhs: Operand::Local(layout.parameter_offsets[0]),
                    rhs: Operand::Local(layout.parameter_offsets[1]),
                    out: Operand::Local(layout.return_offset.unwrap_or_default()),
                },
                2,
                12,
            ),
            Instruction::new(Opcode::Return),
        ]);
        builder.add_script_function(decl, body);
        ExecutableState::new(builder.build())
    }

    #[rstest]
    #[case::integer(PrimitiveKind::INTEGER, TypeId::INTEGER, Value::Integer(7), Value::Integer(0))]
    #[case::byte(PrimitiveKind::BYTE, TypeId::BYTE, Value::Byte(7), Value::Byte(0))]
    #[case::double_integer(
        PrimitiveKind::DOUBLE_INTEGER,
        TypeId::DOUBLE_INTEGER,
        Value::DoubleInteger(7),
        Value::DoubleInteger(0)
    )]
    #[case::real(PrimitiveKind::REAL, TypeId::REAL, Value::Real(7.0), Value::Real(0.0))]
    #[case::double_real(PrimitiveKind::DOUBLE_REAL, TypeId::DOUBLE_REAL, Value::DoubleReal(7.0), Value::DoubleReal(0.0))]
    #[case::partial_real3(
        PrimitiveKind::REAL3,
        TypeId::REAL3,
        Value::Real3(Vector([1.0, 2.0, 3.0])),
        Value::Real3(Vector([1.0, 0.0, 1.0]))
    )]
    #[case::partial_integer2(
        PrimitiveKind::INTEGER2,
        TypeId::INTEGER2,
        Value::Integer2(Vector([4, 4])),
        Value::Integer2(Vector([0, 2]))
    )]
    fn division_by_zero_is_an_exception(
        #[case] kind: PrimitiveKind,
        #[case] type_id: TypeId,
        #[case] lhs: Value,
        #[case] rhs: Value,
    ) {
        for (op, name) in [(BinaryOp::Divide, "divide"), (BinaryOp::Modulo, "modulo")] {
            let state = divide_state(kind, type_id, op);
            match state.invoke("Divide", &[lhs.clone(), rhs.clone()]) {
                Err(RuntimeError::UnhandledException { message, diagnostic }) => {
                    assert_eq!(message, format!("Attempted to {name} by zero"));
                    assert!(diagnostic.contains("at Divide (line 2, column 12)"), "{diagnostic}");
                }
                other => panic!("{kind} {name} by zero returned {other:?}"),
            }
        }
    }

    #[test]
    fn nonzero_vector_divisor_divides_componentwise() {
        let state = divide_state(PrimitiveKind::REAL3, TypeId::REAL3, BinaryOp::Divide);
        let result = state
            .invoke(
                "Divide",
                &[Value::Real3(Vector([1.0, 2.0, 3.0])), Value::Real3(Vector([2.0, 4.0, 0.5]))],
            )
            .unwrap();
        assert_eq!(result, Some(Value::Real3(Vector([0.5, 0.5, 6.0]))));
    }

    // ============================================================================
    // Independent states
    // ============================================================================

    #[test]
    fn states_on_separate_threads_share_one_library() {
        let mut builder = LibraryBuilder::new("threads");
        let runs = add_with_counter(&mut builder);
        let library = builder.build();

        let workers: Vec<_> = (0..4)
            .map(|n| {
                let library = library.clone();
                std::thread::spawn(move || {
                    // Handles never leave the thread that owns their state
                    let state = ExecutableState::new(library);
                    match state.invoke("Add", &[Value::Integer(n), Value::Integer(n)]) {
                        Ok(Some(Value::Integer(sum))) => sum,
                        other => panic!("worker {n} got {other:?}"),
                    }
                })
            })
            .collect();
        for (n, worker) in workers.into_iter().enumerate() {
            assert_eq!(worker.join().unwrap(), 2 * n as i32);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[rstest]
    #[case::defaults("{}", 256, None, false)]
    #[case::depth(r#"{"max_call_depth": 32}"#, 32, None, false)]
    #[case::seeded(r#"{"rng_seed": 7, "trace_opcodes": true}"#, 256, Some(7), true)]
    fn config_from_json(
        #[case] json: &str,
        #[case] max_call_depth: usize,
        #[case] rng_seed: Option<u64>,
        #[case] trace_opcodes: bool,
    ) {
        let config = StateConfig::from_json(json).unwrap();
        assert_eq!(
            config,
            StateConfig {
                max_call_depth,
                rng_seed,
                trace_opcodes,
            }
        );
    }

    #[test]
    fn malformed_config_is_rejected() {
        assert!(matches!(
            StateConfig::from_json(r#"{"max_call_depth": "deep"}"#),
            Err(RuntimeError::Config(_))
        ));
    }
}
