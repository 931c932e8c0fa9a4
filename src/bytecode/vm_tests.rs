//! End-to-end VM tests: source in, final value out.

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use crate::bytecode::chunk::Bytecode;
    use crate::bytecode::compiler::Compiler;
    use crate::bytecode::instruction::{make, OpCode};
    use crate::bytecode::value::{HashKey, HashMap, Value};
    use crate::bytecode::vm::Vm;
    use crate::config::VmConfig;
    use crate::error::{CompileError, RuntimeError, SharkError};
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    /// A writer whose contents stay readable after the VM is done with it.
    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    fn compile(source: &str) -> Result<Bytecode, SharkError> {
        let tokens = Scanner::new(source).scan_tokens()?;
        let program = Parser::new(tokens).parse()?;
        let mut compiler = Compiler::new();
        compiler.compile(&program)?;
        Ok(compiler.bytecode())
    }

    fn run_with(source: &str, config: &VmConfig, output: SharedBuffer) -> Result<Vm, SharkError> {
        let bytecode = compile(source)?;
        let mut vm = Vm::with_config(bytecode, config).with_output(Box::new(output));
        vm.run()?;
        Ok(vm)
    }

    fn run(source: &str) -> Result<Value, SharkError> {
        let vm = run_with(source, &VmConfig::default(), SharedBuffer::default())?;
        Ok(vm.last_popped().clone())
    }

    fn runtime_error(source: &str) -> RuntimeError {
        match run(source) {
            Err(SharkError::Runtime(err)) => err,
            other => panic!("Expected runtime error for {:?}, got {:?}", source, other),
        }
    }

    fn run_raw(instructions: Vec<Vec<u8>>) -> RuntimeResult {
        let bytecode = Bytecode {
            instructions: instructions.concat(),
            constants: Vec::new(),
        };
        let mut vm = Vm::new(bytecode).with_output(Box::new(io::sink()));
        vm.run()
    }

    type RuntimeResult = Result<(), RuntimeError>;

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    fn ints(values: &[i64]) -> Value {
        Value::array(values.iter().copied().map(Value::Int).collect())
    }

    fn check(cases: &[(&str, Value)]) {
        for (source, expected) in cases {
            match run(source) {
                Ok(value) => assert_eq!(&value, expected, "source: {}", source),
                Err(err) => panic!("{} failed: {}", source, err),
            }
        }
    }

    #[test]
    fn test_integer_arithmetic() {
        check(&[
            ("1", int(1)),
            ("1 + 2", int(3)),
            ("50 / 2 * 2 + 10 - 5", int(55)),
            ("5 * (2 + 10)", int(60)),
            ("-50 + 100 + -50", int(0)),
            ("(5 + 10 * 2 + 15 / 3) * 2 + -10", int(50)),
            ("4 ** 2", int(16)),
            ("2 ** 3 ** 2", int(512)),
            ("2 ** -1", int(0)),
        ]);
        assert_eq!(runtime_error("1 / 0"), RuntimeError::DivisionByZero);
        assert_eq!(runtime_error("0 ** -2"), RuntimeError::DivisionByZero);
    }

    #[test]
    fn test_boolean_expressions() {
        check(&[
            ("true", Value::Bool(true)),
            ("1 < 2", Value::Bool(true)),
            ("1 > 2", Value::Bool(false)),
            ("1 <= 1", Value::Bool(true)),
            ("2 >= 3", Value::Bool(false)),
            ("1 == 1", Value::Bool(true)),
            ("1 != 1", Value::Bool(false)),
            ("true != false", Value::Bool(true)),
            ("(1 < 2) == true", Value::Bool(true)),
            ("true && false", Value::Bool(false)),
            ("false || true", Value::Bool(true)),
            ("!true", Value::Bool(false)),
            ("!!5", Value::Bool(true)),
            ("!null", Value::Bool(true)),
            ("!(if (false) { 5 })", Value::Bool(true)),
            ("\"a\" == \"a\"", Value::Bool(true)),
            ("\"a\" != \"b\"", Value::Bool(true)),
        ]);
    }

    #[test]
    fn test_operator_type_errors() {
        assert_eq!(
            runtime_error("1 + true"),
            RuntimeError::MismatchedTypes("Int", "Bool")
        );
        assert_eq!(
            runtime_error("-true"),
            RuntimeError::MismatchedTypes("Bool", "Int")
        );

        let err = runtime_error("\"a\" - \"b\"");
        assert_eq!(err.code().as_u16(), 15);
        let err = runtime_error("true + true");
        assert_eq!(err.code().as_u16(), 16);
    }

    #[test]
    fn test_conditionals() {
        check(&[
            ("if (true) { 10 }", int(10)),
            ("if (true) { 10 } else { 20 }", int(10)),
            ("if (false) { 10 } else { 20 }", int(20)),
            ("if (1 < 2) { 10 }", int(10)),
            ("if (1 > 2) { 10 }", Value::Null),
            ("if (false) { 10 }", Value::Null),
            ("if ((if (false) { 10 })) { 10 } else { 20 }", int(20)),
            ("if (false) { 1 } else if (true) { 2 } else { 3 }", int(2)),
            ("if (true) { let a = 1; }", Value::Null),
        ]);
    }

    #[test]
    fn test_global_let_statements() {
        check(&[
            ("let one = 1; one", int(1)),
            ("let one = 1; let two = 2; one + two", int(3)),
            ("let one = 1; let two = one + one; one + two", int(3)),
        ]);
        assert_eq!(run("let a = 1;").unwrap(), Value::Null);
    }

    #[test]
    fn test_assignment() {
        check(&[
            ("let mut x = 1; x = 2; x", int(2)),
            ("let mut one = 1; let mut two = 2; let three = one = two = 3; three", int(3)),
            ("let mut one = 1; let mut two = 2; one = two = 3; one + two", int(6)),
            ("let mut a = 2; a *= 5; a -= 1; a", int(9)),
            ("let mut a = 10; a /= 3; a += 1", int(4)),
        ]);

        match run("let x = 1; x = 2;") {
            Err(SharkError::Compile(CompileError::ImmutableValue { name, .. })) => {
                assert_eq!(name, "x")
            }
            other => panic!("Expected immutable value error, got {:?}", other),
        }
    }

    #[test]
    fn test_increment_and_decrement() {
        check(&[
            ("let mut a = 1; a++; a", int(2)),
            ("let mut a = 1; a++", int(1)),
            ("let mut a = 1; ++a", int(2)),
            ("let mut a = 1; a--; --a", int(-1)),
            ("let f = () => { let mut i = 0; i++; ++i }; f()", int(2)),
        ]);
        assert_eq!(
            runtime_error("let mut s = \"a\"; s++"),
            RuntimeError::NonNumberIncrement("String")
        );
        assert_eq!(
            runtime_error("let mut s = null; s--"),
            RuntimeError::NonNumberDecrement("Null")
        );
    }

    #[test]
    fn test_while_loops() {
        check(&[
            (
                "let mut i = 0; let mut sum = 0; while (i < 5) { sum += i; i++ }; sum",
                int(10),
            ),
            ("let mut i = 10; while (false) { i = 0 }; i", int(10)),
            // loop bodies leave nothing behind on the stack
            ("let mut i = 0; while (i < 5000) { i++; i }; i", int(5000)),
            (
                "let count = (n) => { let mut i = 0; while (i < n) { i++ }; i }; count(3)",
                int(3),
            ),
        ]);
    }

    #[test]
    fn test_strings() {
        check(&[
            ("\"shark\"", Value::string("shark")),
            ("\"sh\" + \"ark\"", Value::string("shark")),
            ("\"sh\" + \"a\" + \"rk\"", Value::string("shark")),
        ]);
    }

    #[test]
    fn test_collection_literals() {
        let mut map = HashMap::default();
        map.insert(HashKey::Int(1), int(4));
        map.insert(HashKey::Int(2), int(6));

        check(&[
            ("[]", ints(&[])),
            ("[1, 2, 3]", ints(&[1, 2, 3])),
            ("[1 + 2, 3 * 4, 5 + 6]", ints(&[3, 12, 11])),
            ("{}", Value::hash(HashMap::default())),
            ("{1: 2 * 2, 2: 2 + 4}", Value::hash(map)),
            ("(1, 2)", Value::tuple(vec![int(1), int(2)])),
            ("(1,)", Value::tuple(vec![int(1)])),
        ]);
        assert_eq!(runtime_error("{[1]: 1}"), RuntimeError::NonHashable("Array"));
    }

    #[test]
    fn test_index_expressions() {
        check(&[
            ("[1, 2, 3][1]", int(2)),
            ("[1, 2, 3][0 + 2]", int(3)),
            ("[[1, 1, 1]][0][0]", int(1)),
            ("[][0]", Value::Null),
            ("[1, 2, 3][99]", Value::Null),
            ("[1][-1]", Value::Null),
            ("{1: 1, 2: 2}[1]", int(1)),
            ("{1: 1}[0]", Value::Null),
            ("{\"k\": true}[\"k\"]", Value::Bool(true)),
            ("(1, 2)[1]", int(2)),
            ("\"abc\"[1]", Value::string("b")),
            ("\"abc\"[3]", Value::Null),
        ]);
        assert_eq!(
            runtime_error("(1, 2)[5]"),
            RuntimeError::IndexOutOfBounds {
                index: 5,
                length: 2
            }
        );
        assert_eq!(runtime_error("1[0]"), RuntimeError::NonIndexable("Int"));
        assert_eq!(runtime_error("{1: 1}[[1]]"), RuntimeError::NonHashable("Array"));
    }

    #[test]
    fn test_index_assignment() {
        check(&[
            ("let mut x = [1, 2, 3]; x[1] = 10; x[1]", int(10)),
            ("let mut x = [0]; x[0] = 5", int(5)),
            ("let mut h = {}; h[\"a\"] = 1; h[\"a\"]", int(1)),
            ("let mut h = {1: 1}; h[1] = 2; len(h)", int(1)),
            // arrays are shared by reference
            ("let mut a = [1]; let b = a; a[0] = 2; b[0]", int(2)),
        ]);
        assert_eq!(
            runtime_error("let mut x = [1]; x[3] = 1;"),
            RuntimeError::IndexOutOfBounds {
                index: 3,
                length: 1
            }
        );
        assert_eq!(
            runtime_error("let mut t = (1, 2); t[0] = 5;"),
            RuntimeError::ImmutableValue("Tuple")
        );
    }

    #[test]
    fn test_ranges_and_spread() {
        check(&[
            ("1..3", ints(&[1, 2, 3])),
            ("1..1", ints(&[1])),
            ("1..0", ints(&[1, 0])),
            ("5..1", ints(&[5, 4, 3, 2, 1])),
            ("2..-2", ints(&[2, 1, 0, -1, -2])),
            (
                "[...\"ab\"]",
                Value::array(vec![Value::string("a"), Value::string("b")]),
            ),
            ("len(...\"héllo\")", int(5)),
        ]);
        assert_eq!(
            runtime_error("1..\"a\""),
            RuntimeError::MismatchedTypes("String", "Int")
        );
        assert_eq!(
            runtime_error("...1"),
            RuntimeError::MismatchedTypes("Int", "String")
        );
    }

    #[test]
    fn test_calling_functions() {
        check(&[
            ("let f = () => { 5 + 10 }; f()", int(15)),
            ("let one = () => { 1 }; let two = () => { 2 }; one() + two()", int(3)),
            ("let early = () => { return 99; 100 }; early()", int(99)),
            ("let none = () => { }; none()", Value::Null),
            ("let bare = () => { return; }; bare()", Value::Null),
            (
                "let one = () => { 1 }; let higher = () => { one }; higher()()",
                int(1),
            ),
            ("let sum = (a, b) => { let c = a + b; c }; sum(1, 2)", int(3)),
            (
                "let g = 10; let f = (a) => { let b = 5; a + b + g }; f(1) + f(2)",
                int(33),
            ),
        ]);
    }

    #[test]
    fn test_default_parameters() {
        check(&[(
            "let test = (a = 1, b = 2) => { a + b }; [test(), test(2), test(2, 3)]",
            ints(&[3, 4, 5]),
        )]);
        check(&[(
            "let f = (a, mut b = a * 2) => { b += 1; b }; f(3)",
            int(7),
        )]);
    }

    #[test]
    fn test_wrong_arity() {
        assert_eq!(
            runtime_error("let f = () => { 1 }; f(1)"),
            RuntimeError::wrong_arity(0, 1)
        );
        assert_eq!(
            runtime_error("let f = (a, b) => { a }; f(1)"),
            RuntimeError::wrong_arity(2, 1)
        );
        assert_eq!(
            runtime_error("let f = (a, b = 1) => { a }; f()"),
            RuntimeError::wrong_arity(2, 0)
        );
        assert_eq!(runtime_error("1()"), RuntimeError::NotCallable("Int"));
    }

    #[test]
    fn test_closures() {
        check(&[
            (
                "let newClosure = (a) => { () => { a } }; let closure = newClosure(99); closure()",
                int(99),
            ),
            (
                "let newAdder = (a, b) => { (c) => { a + b + c } }; let adder = newAdder(1, 2); adder(8)",
                int(11),
            ),
            (
                "let newAdderOuter = (a, b) => { let c = a + b; (d) => { let e = d + c; (f) => { e + f } } };
                 let newAdderInner = newAdderOuter(1, 2);
                 let adder = newAdderInner(3);
                 adder(8)",
                int(14),
            ),
            (
                "let a = 1;
                 let newAdderOuter = (b) => { (c) => { (d) => { a + b + c + d } } };
                 newAdderOuter(2)(3)(8)",
                int(14),
            ),
        ]);
    }

    #[test]
    fn test_recursive_functions() {
        check(&[
            (
                "let countDown = (x) => { if (x == 0) { return 0; } else { countDown(x - 1) } }; countDown(5)",
                int(0),
            ),
            (
                "let wrapper = () => {
                   let countDown = (x) => { if (x == 0) { return 0; } else { countDown(x - 1) } };
                   countDown(1)
                 };
                 wrapper()",
                int(0),
            ),
            (
                "let fibonacci = (x) => {
                   if (x == 0) { return 0; }
                   if (x == 1) { return 1; }
                   fibonacci(x - 1) + fibonacci(x - 2)
                 };
                 fibonacci(15)",
                int(610),
            ),
        ]);
    }

    #[test]
    fn test_builtin_functions() {
        check(&[
            ("len(\"\")", int(0)),
            ("len(\"four\")", int(4)),
            ("len([1, 2, 3])", int(3)),
            ("len((1, 2))", int(2)),
            ("first([1, 2, 3])", int(1)),
            ("first([])", Value::Null),
            ("last([1, 2, 3])", int(3)),
            ("rest([1, 2, 3])", ints(&[2, 3])),
            ("rest([])", Value::Null),
            ("push([], 1)", ints(&[1])),
            ("type(1)", Value::string("Int")),
            ("type(len)", Value::string("Builtin")),
            ("let len = 3; len", int(3)),
        ]);
        assert!(matches!(
            runtime_error("len(1)"),
            RuntimeError::Builtin { name: "len", .. }
        ));
    }

    #[test]
    fn test_puts_writes_to_output() {
        let output = SharedBuffer::default();
        let vm = run_with(
            "puts(\"hello\", 1); puts([1, \"a\"])",
            &VmConfig::default(),
            output.clone(),
        )
        .unwrap();
        assert_eq!(output.contents(), "hello1\n[1, \"a\"]\n");
        assert_eq!(vm.last_popped(), &Value::Null);
    }

    #[test]
    fn test_closures_from_one_literal_do_not_share_cache_entries() {
        check(&[(
            "let make = (n) => { (x) => { x + n } }; let a = make(1); let b = make(2); [a(10), b(10), a(10)]",
            ints(&[11, 12, 11]),
        )]);
    }

    #[test]
    fn test_memoized_calls_hit_the_cache() {
        let vm = run_with(
            "let fib = (n) => { if (n < 2) { n } else { fib(n - 1) + fib(n - 2) } }; fib(25)",
            &VmConfig::default(),
            SharedBuffer::default(),
        )
        .unwrap();
        assert_eq!(vm.last_popped(), &int(75025));
        let stats = vm.cache_stats().unwrap();
        assert!(stats.hits > 0);

        let uncached = VmConfig {
            cache_size: 0,
            ..VmConfig::default()
        };
        let vm = run_with(
            "let fib = (n) => { if (n < 2) { n } else { fib(n - 1) + fib(n - 2) } }; fib(15)",
            &uncached,
            SharedBuffer::default(),
        )
        .unwrap();
        assert_eq!(vm.last_popped(), &int(610));
        assert!(vm.cache_stats().is_none());
    }

    #[test]
    fn test_effectful_calls_are_not_memoized() {
        let output = SharedBuffer::default();
        run_with(
            "let greet = (x) => { puts(x); x }; greet(1); greet(1);",
            &VmConfig::default(),
            output.clone(),
        )
        .unwrap();
        assert_eq!(output.contents(), "1\n1\n");

        // the effect is inherited by callers
        let output = SharedBuffer::default();
        run_with(
            "let inner = (x) => { puts(x); x }; let outer = (x) => { inner(x) + 1 }; outer(1); outer(1);",
            &VmConfig::default(),
            output.clone(),
        )
        .unwrap();
        assert_eq!(output.contents(), "1\n1\n");

        check(&[
            (
                "let mut count = 0; let bump = (x) => { count += x; count }; bump(1); bump(1); count",
                int(2),
            ),
            (
                "let mut xs = [0]; let set = (v) => { xs[0] = v; v }; set(1); xs[0] = 0; set(1); xs[0]",
                int(1),
            ),
            // mutable results are never shared between calls
            (
                "let mk = (x) => { [x] }; let mut a = mk(1); a[0] = 5; mk(1)[0]",
                int(1),
            ),
        ]);
    }

    #[test]
    fn test_capacity_errors() {
        let small_frames = VmConfig {
            max_frames: 64,
            ..VmConfig::default()
        };
        let err = run_with(
            "let f = (x) => { f(x + 1) }; f(0)",
            &small_frames,
            SharedBuffer::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            SharkError::Runtime(RuntimeError::FrameStackOverflow)
        ));

        let small_stack = VmConfig {
            stack_size: 4,
            ..VmConfig::default()
        };
        let err = run_with("[1, 2, 3, 4, 5]", &small_stack, SharedBuffer::default())
            .err()
            .unwrap();
        assert!(matches!(err, SharkError::Runtime(RuntimeError::StackOverflow)));
    }

    #[test]
    fn test_malformed_bytecode() {
        assert_eq!(
            run_raw(vec![make(OpCode::Null, &[]), make(OpCode::ReturnValue, &[])]),
            Err(RuntimeError::TopLevelReturn)
        );
        assert_eq!(
            run_raw(vec![vec![200]]),
            Err(RuntimeError::InvalidOpcode {
                byte: 200,
                offset: 0
            })
        );
        assert_eq!(
            run_raw(vec![make(OpCode::Constant, &[3])]),
            Err(RuntimeError::InvalidConstant(3))
        );
        assert_eq!(
            run_raw(vec![make(OpCode::SetLocalDefault, &[0])]),
            Err(RuntimeError::NoDefaultValue)
        );
        assert_eq!(
            run_raw(vec![make(OpCode::Pop, &[])]),
            Err(RuntimeError::StackUnderflow)
        );
    }

    #[test]
    fn test_globals_out_of_range() {
        let bytecode = Bytecode {
            instructions: [make(OpCode::Null, &[]), make(OpCode::SetGlobal, &[5])].concat(),
            constants: Vec::new(),
        };
        let mut vm = Vm::with_globals(bytecode, vec![Value::Null], &VmConfig::default());
        assert_eq!(vm.run(), Err(RuntimeError::GlobalOutOfRange(5)));
    }

    #[test]
    fn test_local_and_free_slots_out_of_range() {
        assert_eq!(
            run_raw(vec![make(OpCode::GetLocal, &[0])]),
            Err(RuntimeError::LocalOutOfRange(0))
        );
        assert_eq!(
            run_raw(vec![make(OpCode::Null, &[]), make(OpCode::SetLocal, &[3])]),
            Err(RuntimeError::LocalOutOfRange(3))
        );
        assert_eq!(
            run_raw(vec![make(OpCode::IncrementLocal, &[255])]),
            Err(RuntimeError::LocalOutOfRange(255))
        );
        assert_eq!(
            run_raw(vec![make(OpCode::GetFree, &[0])]),
            Err(RuntimeError::FreeOutOfRange(0))
        );
    }

    #[test]
    fn test_calls_reading_mutable_globals_see_updates() {
        check(&[
            (
                "let mut i = 0; let get = () => { i }; let mut xs = []; \
                 while (i < 3) { xs = push(xs, get()); i++ }; xs",
                ints(&[0, 1, 2]),
            ),
            // callers of such a function are not memoized either
            (
                "let mut n = 1; let get = () => { n }; let twice = () => { get() * 2 }; \
                 twice(); n = 5; twice()",
                int(10),
            ),
            // immutable globals keep calls memoizable
            ("let k = 3; let get = () => { k }; get(); get()", int(3)),
        ]);

        let vm = run_with(
            "let mut i = 0; let get = () => { i }; get(); get(); i = 1; get()",
            &VmConfig::default(),
            SharedBuffer::default(),
        )
        .unwrap();
        assert_eq!(vm.last_popped(), &int(1));
        assert_eq!(vm.cache_stats().map(|stats| stats.hits), Some(0));
    }

    #[test]
    fn test_let_shadows_outer_binding() {
        check(&[
            ("let a = 1; let f = () => { let a = a + 1; a }; f()", int(2)),
            (
                "let f = (x) => { let g = () => { let x = x * 10; x }; g() + x }; f(2)",
                int(22),
            ),
        ]);
    }

    #[test]
    fn test_huge_ranges_are_rejected() {
        assert_eq!(
            runtime_error("len(0..9223372036854775807)"),
            RuntimeError::RangeTooLarge(1 << 63)
        );
        assert_eq!(
            runtime_error("len(9223372036854775807..0)"),
            RuntimeError::RangeTooLarge(1 << 63)
        );
        assert!(matches!(
            runtime_error("0..16777216"),
            RuntimeError::RangeTooLarge(16777217)
        ));
        check(&[("len(3..-3)", int(7))]);
    }

    #[test]
    fn test_exit_code_out_of_range() {
        assert!(matches!(
            runtime_error("exit(4294967296)"),
            RuntimeError::Builtin { name: "exit", .. }
        ));
    }

    #[test]
    fn test_state_carries_between_runs() {
        let config = VmConfig::default();
        let mut compiler = Compiler::new();
        let tokens = Scanner::new("let a = 5;").scan_tokens().unwrap();
        compiler.compile(&Parser::new(tokens).parse().unwrap()).unwrap();
        let (bytecode, symbols) = compiler.finish();
        let constants = bytecode.constants.clone();

        let mut vm = Vm::with_globals(bytecode, Vm::new_globals(&config), &config);
        vm.run().unwrap();
        let globals = vm.into_globals();

        let mut compiler = Compiler::with_state(symbols, constants);
        let tokens = Scanner::new("a * 2").scan_tokens().unwrap();
        compiler.compile(&Parser::new(tokens).parse().unwrap()).unwrap();

        let mut vm = Vm::with_globals(compiler.bytecode(), globals, &config);
        vm.run().unwrap();
        assert_eq!(vm.last_popped(), &int(10));
    }
}
