//! End-to-end scenarios: build a small `Module` by hand (standing in for the
//! out-of-scope front end), compile it, and call straight into the native
//! fragment the way `ember-cli`'s JIT driver does.

use ember_ast::{ClassDef, Expr, ExceptHandler, FunctionDef, Literal, Module, Param, Span, Stmt, TypeAnnotation};
use ember_compiler::value::{TypeTag, Value};
use ember_compiler::Compiler;

fn dummy() -> Span {
    Span::dummy()
}

fn common_objects_base() -> u64 {
    ember_runtime::common_objects() as *const ember_runtime::CommonObjects as u64
}

/// Calls a compiled fragment that touches the common-objects table (an
/// instance allocation, a raise) through the same register-seeding
/// trampoline `ember-cli`'s JIT driver uses: `rbx`/`r12`/`r13`/`r14` are
/// callee-saved reserved registers the fragment relies on without them
/// being passed explicitly, so a bare `extern "C"` transmute isn't enough.
/// `arg` goes in `rdi`; the result comes back in `rax`, with `r14`
/// (whatever exception, if any, is still active) returned alongside it.
unsafe fn call_entry_with_arg(entry: *const u8, arg: u64) -> (u64, u64) {
    let common = common_objects_base();
    let result: u64;
    let active_exception: u64;
    std::arch::asm!(
        "mov rbx, {globals}",
        "mov r12, {common}",
        "xor r13, r13",
        "xor r14, r14",
        "mov rdi, {arg}",
        "call {entry}",
        "mov {exc}, r14",
        globals = in(reg) 0u64,
        common = in(reg) common,
        arg = in(reg) arg,
        entry = in(reg) entry,
        exc = out(reg) active_exception,
        out("rax") result,
        out("rbx") _,
        out("rdi") _,
        out("rsi") _,
        out("rdx") _,
        out("rcx") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("r11") _,
        out("r12") _,
        out("r13") _,
        out("r14") _,
        out("r15") _,
    );
    (result, active_exception)
}

/// Same as [`call_entry_with_arg`] but for a two-argument fragment (`rdi`,
/// `rsi`).
unsafe fn call_entry_with_two_args(entry: *const u8, arg0: u64, arg1: u64) -> (u64, u64) {
    let common = common_objects_base();
    let result: u64;
    let active_exception: u64;
    std::arch::asm!(
        "mov rbx, {globals}",
        "mov r12, {common}",
        "xor r13, r13",
        "xor r14, r14",
        "mov rdi, {arg0}",
        "mov rsi, {arg1}",
        "call {entry}",
        "mov {exc}, r14",
        globals = in(reg) 0u64,
        common = in(reg) common,
        arg0 = in(reg) arg0,
        arg1 = in(reg) arg1,
        entry = in(reg) entry,
        exc = out(reg) active_exception,
        out("rax") result,
        out("rbx") _,
        out("rdi") _,
        out("rsi") _,
        out("rdx") _,
        out("rcx") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("r11") _,
        out("r12") _,
        out("r13") _,
        out("r14") _,
        out("r15") _,
    );
    (result, active_exception)
}

/// Same as [`call_entry_with_arg`] but for a three-argument fragment
/// (`rdi`, `rsi`, `rdx`).
unsafe fn call_entry_with_three_args(entry: *const u8, arg0: u64, arg1: u64, arg2: u64) -> (u64, u64) {
    let common = common_objects_base();
    let result: u64;
    let active_exception: u64;
    std::arch::asm!(
        "mov rbx, {globals}",
        "mov r12, {common}",
        "xor r13, r13",
        "xor r14, r14",
        "mov rdi, {arg0}",
        "mov rsi, {arg1}",
        "mov rdx, {arg2}",
        "call {entry}",
        "mov {exc}, r14",
        globals = in(reg) 0u64,
        common = in(reg) common,
        arg0 = in(reg) arg0,
        arg1 = in(reg) arg1,
        arg2 = in(reg) arg2,
        entry = in(reg) entry,
        exc = out(reg) active_exception,
        out("rax") result,
        out("rbx") _,
        out("rdi") _,
        out("rsi") _,
        out("rdx") _,
        out("rcx") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("r11") _,
        out("r12") _,
        out("r13") _,
        out("r14") _,
        out("r15") _,
    );
    (result, active_exception)
}

/// Same as [`call_entry_with_arg`] but for a zero-argument fragment.
unsafe fn call_entry(entry: *const u8) -> (u64, u64) {
    let common = common_objects_base();
    let result: u64;
    let active_exception: u64;
    std::arch::asm!(
        "mov rbx, {globals}",
        "mov r12, {common}",
        "xor r13, r13",
        "xor r14, r14",
        "call {entry}",
        "mov {exc}, r14",
        globals = in(reg) 0u64,
        common = in(reg) common,
        entry = in(reg) entry,
        exc = out(reg) active_exception,
        out("rax") result,
        out("rbx") _,
        out("rdi") _,
        out("rsi") _,
        out("rdx") _,
        out("rcx") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("r11") _,
        out("r12") _,
        out("r13") _,
        out("r14") _,
        out("r15") _,
    );
    (result, active_exception)
}

/// Same as [`call_entry_with_arg`], but seeds `rbx` (`GLOBALS_BASE_REG`)
/// with a real globals pointer instead of the hardcoded `0u64` the other
/// trampolines use — for fragments that read a module-level global.
unsafe fn call_entry_with_arg_and_globals(entry: *const u8, arg: u64, globals: *mut u64) -> (u64, u64) {
    let common = common_objects_base();
    let result: u64;
    let active_exception: u64;
    std::arch::asm!(
        "mov rbx, {globals}",
        "mov r12, {common}",
        "xor r13, r13",
        "xor r14, r14",
        "mov rdi, {arg}",
        "call {entry}",
        "mov {exc}, r14",
        globals = in(reg) globals as u64,
        common = in(reg) common,
        arg = in(reg) arg,
        entry = in(reg) entry,
        exc = out(reg) active_exception,
        out("rax") result,
        out("rbx") _,
        out("rdi") _,
        out("rsi") _,
        out("rdx") _,
        out("rcx") _,
        out("r8") _,
        out("r9") _,
        out("r10") _,
        out("r11") _,
        out("r12") _,
        out("r13") _,
        out("r14") _,
        out("r15") _,
    );
    (result, active_exception)
}

#[test]
fn neg_float_executes() {
    let mut compiler = Compiler::new();
    let x = compiler.intern("x");
    let name = compiler.intern("neg");
    let def = FunctionDef {
        name,
        params: vec![Param { name: x, annotation: TypeAnnotation::Float, default: None, span: dummy() }],
        return_annotation: TypeAnnotation::Float,
        body: vec![Stmt::Return(
            Some(Expr::UnaryOp { op: ember_ast::UnaryOp::Neg, operand: Box::new(Expr::Name(x, dummy())), span: dummy() }),
            dummy(),
        )],
        span: dummy(),
    };
    let module = Module { name: "m".to_string(), statements: vec![Stmt::FunctionDef(def)] };
    let module_id = compiler.register_module(&module);
    let function = compiler.context.module(module_id).functions[0];

    let (_, entry) = compiler.compile_function(function, vec![Value::simple(TypeTag::Float)]).unwrap();
    let f: extern "C" fn(f64) -> f64 = unsafe { std::mem::transmute(entry) };
    assert_eq!(f(1.5), -1.5);
    assert_eq!(f(-0.0), 0.0);
}

/// `def pow(base: int, exp: int) -> int`, computed via the repeated-squaring
/// `while` loop a front end would lower `base ** exp` into: `result = 1;
/// while exp: if exp & 1: result = result * base; base = base * base; exp =
/// exp >> 1; return result`.
#[test]
fn int_pow_by_squaring_executes() {
    let mut compiler = Compiler::new();
    let base = compiler.intern("base");
    let exp = compiler.intern("exp");
    let result = compiler.intern("result");
    let name = compiler.intern("pow");

    let body = vec![
        Stmt::Assign { target: Expr::Name(result, dummy()), value: Expr::Literal(Literal::Int(1), dummy()), span: dummy() },
        Stmt::While {
            cond: Expr::Name(exp, dummy()),
            body: vec![
                Stmt::If {
                    branches: vec![(
                        Expr::BinOp { op: ember_ast::BinOp::BitAnd, left: Box::new(Expr::Name(exp, dummy())), right: Box::new(Expr::Literal(Literal::Int(1), dummy())), span: dummy() },
                        vec![Stmt::Assign {
                            target: Expr::Name(result, dummy()),
                            value: Expr::BinOp { op: ember_ast::BinOp::Mul, left: Box::new(Expr::Name(result, dummy())), right: Box::new(Expr::Name(base, dummy())), span: dummy() },
                            span: dummy(),
                        }],
                    )],
                    orelse: vec![],
                    span: dummy(),
                },
                Stmt::Assign {
                    target: Expr::Name(base, dummy()),
                    value: Expr::BinOp { op: ember_ast::BinOp::Mul, left: Box::new(Expr::Name(base, dummy())), right: Box::new(Expr::Name(base, dummy())), span: dummy() },
                    span: dummy(),
                },
                Stmt::Assign {
                    target: Expr::Name(exp, dummy()),
                    value: Expr::BinOp { op: ember_ast::BinOp::RShift, left: Box::new(Expr::Name(exp, dummy())), right: Box::new(Expr::Literal(Literal::Int(1), dummy())), span: dummy() },
                    span: dummy(),
                },
            ],
            orelse: vec![],
            span: dummy(),
        },
        Stmt::Return(Some(Expr::Name(result, dummy())), dummy()),
    ];
    let def = FunctionDef {
        name,
        params: vec![
            Param { name: base, annotation: TypeAnnotation::Int, default: None, span: dummy() },
            Param { name: exp, annotation: TypeAnnotation::Int, default: None, span: dummy() },
        ],
        return_annotation: TypeAnnotation::Int,
        body,
        span: dummy(),
    };
    let module = Module { name: "m".to_string(), statements: vec![Stmt::FunctionDef(def)] };
    let module_id = compiler.register_module(&module);
    let function = compiler.context.module(module_id).functions[0];

    let (_, entry) = compiler.compile_function(function, vec![Value::simple(TypeTag::Int), Value::simple(TypeTag::Int)]).unwrap();
    let f: extern "C" fn(i64, i64) -> i64 = unsafe { std::mem::transmute(entry) };
    assert_eq!(f(3, 4), 81);
    assert_eq!(f(-2, 10), 1024);
    assert_eq!(f(0, 0), 1);
    assert_eq!(f(-1, 0), 1);
}

/// `def raised(base: int, exp: int) -> int: return base ** exp` — exercises
/// the `**` operator directly (distinct from the hand-rolled squaring loop
/// above), and its negative-exponent `ValueError` raise when the module
/// declares one.
#[test]
fn pow_operator_raises_value_error_for_negative_exponent() {
    let mut compiler = Compiler::new();
    let base = compiler.intern("base");
    let exp = compiler.intern("exp");
    let name = compiler.intern("raised");
    let value_error = compiler.intern("ValueError");

    let value_error_class = ClassDef { name: value_error, base: None, methods: vec![], span: dummy() };
    let def = FunctionDef {
        name,
        params: vec![
            Param { name: base, annotation: TypeAnnotation::Int, default: None, span: dummy() },
            Param { name: exp, annotation: TypeAnnotation::Int, default: None, span: dummy() },
        ],
        return_annotation: TypeAnnotation::Int,
        body: vec![Stmt::Return(
            Some(Expr::BinOp { op: ember_ast::BinOp::Pow, left: Box::new(Expr::Name(base, dummy())), right: Box::new(Expr::Name(exp, dummy())), span: dummy() }),
            dummy(),
        )],
        span: dummy(),
    };
    let module = Module { name: "m".to_string(), statements: vec![Stmt::ClassDef(value_error_class), Stmt::FunctionDef(def)] };
    let module_id = compiler.register_module(&module);
    let function = compiler.context.find_function(module_id, name).unwrap();
    let value_error_class_id = compiler.context.find_class(module_id, value_error).unwrap();

    let (_, entry) = compiler.compile_function(function, vec![Value::simple(TypeTag::Int), Value::simple(TypeTag::Int)]).unwrap();
    unsafe {
        let (result, active_exception) = call_entry_with_two_args(entry, 3, 4);
        assert_eq!(result as i64, 81);
        assert_eq!(active_exception, 0);

        let (_, active_exception) = call_entry_with_two_args(entry, 2, u64::MAX);
        assert_ne!(active_exception, 0);
        let instance = active_exception as *const ember_runtime::instance::InstanceObject;
        assert_eq!((*instance).class_id, value_error_class_id.0 as u64);
    }
}

/// Calling the same function once with two ints and once with two floats
/// must produce two distinct fragments, and recompiling the first
/// specialization must not change its entry pointer.
#[test]
fn mixed_argument_types_specialize_separately() {
    let mut compiler = Compiler::new();
    let a = compiler.intern("a");
    let b = compiler.intern("b");
    let name = compiler.intern("add");
    let def = FunctionDef {
        name,
        params: vec![
            Param { name: a, annotation: TypeAnnotation::Int, default: None, span: dummy() },
            Param { name: b, annotation: TypeAnnotation::Int, default: None, span: dummy() },
        ],
        return_annotation: TypeAnnotation::Int,
        body: vec![Stmt::Return(
            Some(Expr::BinOp { op: ember_ast::BinOp::Add, left: Box::new(Expr::Name(a, dummy())), right: Box::new(Expr::Name(b, dummy())), span: dummy() }),
            dummy(),
        )],
        span: dummy(),
    };
    let module = Module { name: "m".to_string(), statements: vec![Stmt::FunctionDef(def)] };
    let module_id = compiler.register_module(&module);
    let function = compiler.context.module(module_id).functions[0];

    let (id1, ptr1) = compiler.compile_function(function, vec![Value::simple(TypeTag::Int), Value::simple(TypeTag::Int)]).unwrap();
    let (id2, ptr2) = compiler.compile_function(function, vec![Value::simple(TypeTag::Float), Value::simple(TypeTag::Float)]).unwrap();
    assert_ne!(id1, id2);
    assert_eq!(compiler.fragments.specialization_count(function), 2);

    let (id1_again, ptr1_again) = compiler.compile_function(function, vec![Value::simple(TypeTag::Int), Value::simple(TypeTag::Int)]).unwrap();
    assert_eq!(id1, id1_again);
    assert_eq!(ptr1, ptr1_again);
    assert_ne!(ptr1, ptr2);
}

/// `class C: def __init__(self, n: int): self.n = n` — verifies attribute
/// slot assignment and that a constructed instance reads back what its
/// constructor stored.
#[test]
fn class_instantiation_stores_attributes() {
    let mut compiler = Compiler::new();
    let self_sym = compiler.intern("self");
    let n = compiler.intern("n");
    let init = compiler.intern("__init__");
    let class_name = compiler.intern("C");
    let make_name = compiler.intern("make");

    let init_def = FunctionDef {
        name: init,
        params: vec![
            Param { name: self_sym, annotation: TypeAnnotation::Instance(class_name), default: None, span: dummy() },
            Param { name: n, annotation: TypeAnnotation::Int, default: None, span: dummy() },
        ],
        return_annotation: TypeAnnotation::None,
        body: vec![Stmt::Assign {
            target: Expr::Attribute { value: Box::new(Expr::Name(self_sym, dummy())), attr: n, span: dummy() },
            value: Expr::Name(n, dummy()),
            span: dummy(),
        }],
        span: dummy(),
    };
    let class_def = ClassDef { name: class_name, base: None, methods: vec![init_def], span: dummy() };

    let make_def = FunctionDef {
        name: make_name,
        params: vec![Param { name: n, annotation: TypeAnnotation::Int, default: None, span: dummy() }],
        return_annotation: TypeAnnotation::Instance(class_name),
        body: vec![Stmt::Return(
            Some(Expr::Call { func: Box::new(Expr::Name(class_name, dummy())), args: vec![Expr::Name(n, dummy())], keywords: vec![], span: dummy() }),
            dummy(),
        )],
        span: dummy(),
    };

    let module = Module { name: "m".to_string(), statements: vec![Stmt::ClassDef(class_def), Stmt::FunctionDef(make_def)] };
    let module_id = compiler.register_module(&module);
    let make_function = compiler.context.find_function(module_id, make_name).unwrap();

    let (_, entry) = compiler.compile_function(make_function, vec![Value::simple(TypeTag::Int)]).unwrap();
    let class_id = compiler.context.find_class(module_id, class_name).unwrap();
    let attr_slot = *compiler.context.class(class_id).attr_slots.get(&n).unwrap();
    unsafe {
        let (instance, active_exception) = call_entry_with_arg(entry, 7);
        assert_eq!(active_exception, 0);
        let instance = instance as *const ember_runtime::instance::InstanceObject;
        assert_eq!(ember_runtime::instance::get_attr(instance, attr_slot as usize), 7);
    }
}

/// `try: raise KeyError() except KeyError as e: handled = 1` — the handler
/// must bind `e` and clear the active-exception register.
#[test]
fn try_except_binds_and_clears_the_exception() {
    let mut compiler = Compiler::new();
    let e = compiler.intern("e");
    let handled = compiler.intern("handled");
    let key_error = compiler.intern("KeyError");
    let name = compiler.intern("run");

    let key_error_class = ClassDef { name: key_error, base: None, methods: vec![], span: dummy() };
    let run_def = FunctionDef {
        name,
        params: vec![],
        return_annotation: TypeAnnotation::Int,
        body: vec![
            Stmt::Try {
                body: vec![Stmt::Raise(Some(Expr::Call { func: Box::new(Expr::Name(key_error, dummy())), args: vec![], keywords: vec![], span: dummy() }), dummy())],
                handlers: vec![ExceptHandler { classes: vec![key_error], binding: Some(e), body: vec![Stmt::Assign { target: Expr::Name(handled, dummy()), value: Expr::Literal(Literal::Int(1), dummy()), span: dummy() }], span: dummy() }],
                orelse: vec![],
                finally: vec![],
                span: dummy(),
            },
            Stmt::Return(Some(Expr::Name(handled, dummy())), dummy()),
        ],
        span: dummy(),
    };
    let module = Module { name: "m".to_string(), statements: vec![Stmt::ClassDef(key_error_class), Stmt::FunctionDef(run_def)] };
    let module_id = compiler.register_module(&module);
    let function = compiler.context.find_function(module_id, name).unwrap();

    let (_, entry) = compiler.compile_function(function, vec![]).unwrap();
    let (result, active_exception) = unsafe { call_entry(entry) };
    assert_eq!(result, 1);
    assert_eq!(active_exception, 0);
}

/// A `KeyError` raised inside a nested `try` (whose own `handlers` is empty)
/// propagates through that inner `try`'s `finally` to the outer `try`'s
/// handler, which matches. Checks both that the outer handler actually runs
/// and that the inner `finally` ran before it (by having each set a
/// distinct bit of the packed return value).
#[test]
fn nested_try_propagates_to_the_outer_handler_after_the_inner_finally() {
    let mut compiler = Compiler::new();
    let finally_ran = compiler.intern("finally_ran");
    let outer_caught = compiler.intern("outer_caught");
    let key_error = compiler.intern("KeyError");
    let name = compiler.intern("run_nested");

    let name_of = |s| Expr::Name(s, dummy());
    let lit = |v: i64| Expr::Literal(Literal::Int(v), dummy());
    let assign = |sym, value: Expr| Stmt::Assign { target: Expr::Name(sym, dummy()), value, span: dummy() };

    let key_error_class = ClassDef { name: key_error, base: None, methods: vec![], span: dummy() };
    let inner_try = Stmt::Try {
        body: vec![Stmt::Raise(Some(Expr::Call { func: Box::new(name_of(key_error)), args: vec![], keywords: vec![], span: dummy() }), dummy())],
        handlers: vec![],
        orelse: vec![],
        finally: vec![assign(finally_ran, lit(1))],
        span: dummy(),
    };
    let outer_try = Stmt::Try {
        body: vec![assign(finally_ran, lit(0)), inner_try],
        handlers: vec![ExceptHandler { classes: vec![key_error], binding: None, body: vec![assign(outer_caught, lit(1))], span: dummy() }],
        orelse: vec![],
        finally: vec![],
        span: dummy(),
    };
    let run_def = FunctionDef {
        name,
        params: vec![],
        return_annotation: TypeAnnotation::Int,
        body: vec![
            outer_try,
            Stmt::Return(
                Some(Expr::BinOp {
                    op: ember_ast::BinOp::Add,
                    left: Box::new(Expr::BinOp { op: ember_ast::BinOp::Mul, left: Box::new(name_of(outer_caught)), right: Box::new(lit(10)), span: dummy() }),
                    right: Box::new(name_of(finally_ran)),
                    span: dummy(),
                }),
                dummy(),
            ),
        ],
        span: dummy(),
    };
    let module = Module { name: "m".to_string(), statements: vec![Stmt::ClassDef(key_error_class), Stmt::FunctionDef(run_def)] };
    let module_id = compiler.register_module(&module);
    let function = compiler.context.find_function(module_id, name).unwrap();

    let (_, entry) = compiler.compile_function(function, vec![]).unwrap();
    let (result, active_exception) = unsafe { call_entry(entry) };
    assert_eq!(result, 11);
    assert_eq!(active_exception, 0);
}

/// `def quicksort(lst, lo: int, hi: int) -> int` sorting in place via
/// Lomuto partitioning and self-recursion, over a list built directly
/// through `ember_runtime::list` (standing in for a list literal the front
/// end would otherwise lower to).
#[test]
fn quicksort_sorts_a_list_in_place() {
    let mut compiler = Compiler::new();
    let lst = compiler.intern("lst");
    let lo = compiler.intern("lo");
    let hi = compiler.intern("hi");
    let pivot = compiler.intern("pivot");
    let i = compiler.intern("i");
    let j = compiler.intern("j");
    let tmp = compiler.intern("tmp");
    let name = compiler.intern("quicksort");

    let list_ann = TypeAnnotation::List(Box::new(TypeAnnotation::Int));
    let list_ty = || Value::list_of(Value::simple(TypeTag::Int));
    let int_ty = || Value::simple(TypeTag::Int);

    let lst_at = |idx: Expr| Expr::Subscript { value: Box::new(Expr::Name(lst, dummy())), index: Box::new(idx), span: dummy() };
    let name_of = |s| Expr::Name(s, dummy());
    let lit = |v: i64| Expr::Literal(Literal::Int(v), dummy());
    let add = |a: Expr, b: Expr| Expr::BinOp { op: ember_ast::BinOp::Add, left: Box::new(a), right: Box::new(b), span: dummy() };
    let sub = |a: Expr, b: Expr| Expr::BinOp { op: ember_ast::BinOp::Sub, left: Box::new(a), right: Box::new(b), span: dummy() };
    let lt = |a: Expr, b: Expr| Expr::Compare { left: Box::new(a), op: ember_ast::CmpOp::Lt, right: Box::new(b), span: dummy() };
    let assign = |target: Expr, value: Expr| Stmt::Assign { target, value, span: dummy() };

    let partition_body = vec![
        assign(name_of(pivot), lst_at(name_of(hi))),
        assign(name_of(i), sub(name_of(lo), lit(1))),
        assign(name_of(j), name_of(lo)),
        Stmt::While {
            cond: lt(name_of(j), name_of(hi)),
            body: vec![
                Stmt::If {
                    branches: vec![(
                        lt(lst_at(name_of(j)), name_of(pivot)),
                        vec![
                            assign(name_of(i), add(name_of(i), lit(1))),
                            assign(name_of(tmp), lst_at(name_of(i))),
                            assign(lst_at(name_of(i)), lst_at(name_of(j))),
                            assign(lst_at(name_of(j)), name_of(tmp)),
                        ],
                    )],
                    orelse: vec![],
                    span: dummy(),
                },
                assign(name_of(j), add(name_of(j), lit(1))),
            ],
            orelse: vec![],
            span: dummy(),
        },
        assign(name_of(tmp), lst_at(add(name_of(i), lit(1)))),
        assign(lst_at(add(name_of(i), lit(1))), lst_at(name_of(hi))),
        assign(lst_at(name_of(hi)), name_of(tmp)),
        Stmt::Expr(Expr::Call {
            func: Box::new(name_of(name)),
            args: vec![name_of(lst), name_of(lo), name_of(i)],
            keywords: vec![],
            span: dummy(),
        }),
        Stmt::Expr(Expr::Call {
            func: Box::new(name_of(name)),
            args: vec![name_of(lst), add(name_of(i), lit(2)), name_of(hi)],
            keywords: vec![],
            span: dummy(),
        }),
    ];

    let body = vec![
        Stmt::If { branches: vec![(lt(name_of(lo), name_of(hi)), partition_body)], orelse: vec![], span: dummy() },
        Stmt::Return(Some(lit(0)), dummy()),
    ];
    let def = FunctionDef {
        name,
        params: vec![
            Param { name: lst, annotation: list_ann, default: None, span: dummy() },
            Param { name: lo, annotation: TypeAnnotation::Int, default: None, span: dummy() },
            Param { name: hi, annotation: TypeAnnotation::Int, default: None, span: dummy() },
        ],
        return_annotation: TypeAnnotation::Int,
        body,
        span: dummy(),
    };
    let module = Module { name: "m".to_string(), statements: vec![Stmt::FunctionDef(def)] };
    let module_id = compiler.register_module(&module);
    let function = compiler.context.module(module_id).functions[0];

    let (_, entry) = compiler.compile_function(function, vec![list_ty(), int_ty(), int_ty()]).unwrap();

    let values: [i64; 10] = [6, 4, 2, 0, 3, 1, 7, 9, 8, 5];
    let list = ember_runtime::list::alloc(false);
    for v in values {
        unsafe { ember_runtime::list::push(list, v as u64) };
    }

    unsafe {
        let (_, active_exception) = call_entry_with_three_args(entry, list as u64, 0, 9);
        assert_eq!(active_exception, 0);
        let sorted: Vec<i64> = (0..10).map(|idx| ember_runtime::list::get(list, idx) as i64).collect();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }
}

/// `class C: def __init__(self, n, log, counts): ... def __del__(self): ...`
/// — three instances with distinct `n` dropped to zero references each run
/// `__del__` exactly once, proven by a per-`n` counter list rather than by
/// output text (there's no `print` builtin wired up at this layer).
#[test]
fn del_runs_exactly_once_per_instance_on_drop() {
    let mut compiler = Compiler::new();
    let self_sym = compiler.intern("self");
    let n = compiler.intern("n");
    let log = compiler.intern("log");
    let counts = compiler.intern("counts");
    let init = compiler.intern("__init__");
    let del = compiler.intern("__del__");
    let class_name = compiler.intern("C");
    let make_name = compiler.intern("make");

    let name_of = |s| Expr::Name(s, dummy());
    let attr = |sym| Expr::Attribute { value: Box::new(name_of(self_sym)), attr: sym, span: dummy() };
    let assign = |target: Expr, value: Expr| Stmt::Assign { target, value, span: dummy() };

    let init_def = FunctionDef {
        name: init,
        params: vec![
            Param { name: self_sym, annotation: TypeAnnotation::Instance(class_name), default: None, span: dummy() },
            Param { name: n, annotation: TypeAnnotation::Int, default: None, span: dummy() },
            Param { name: log, annotation: TypeAnnotation::Int, default: None, span: dummy() },
            Param { name: counts, annotation: TypeAnnotation::Int, default: None, span: dummy() },
        ],
        return_annotation: TypeAnnotation::None,
        body: vec![assign(attr(n), name_of(n)), assign(attr(log), name_of(log)), assign(attr(counts), name_of(counts))],
        span: dummy(),
    };

    let slot = |list_attr| Expr::Subscript { value: Box::new(attr(list_attr)), index: Box::new(attr(n)), span: dummy() };
    let del_def = FunctionDef {
        name: del,
        params: vec![Param { name: self_sym, annotation: TypeAnnotation::Instance(class_name), default: None, span: dummy() }],
        return_annotation: TypeAnnotation::None,
        body: vec![
            assign(slot(log), attr(n)),
            assign(
                slot(counts),
                Expr::BinOp { op: ember_ast::BinOp::Add, left: Box::new(slot(counts)), right: Box::new(Expr::Literal(Literal::Int(1), dummy())), span: dummy() },
            ),
        ],
        span: dummy(),
    };

    let class_def = ClassDef { name: class_name, base: None, methods: vec![init_def, del_def], span: dummy() };

    let make_def = FunctionDef {
        name: make_name,
        params: vec![
            Param { name: n, annotation: TypeAnnotation::Int, default: None, span: dummy() },
            Param { name: log, annotation: TypeAnnotation::Int, default: None, span: dummy() },
            Param { name: counts, annotation: TypeAnnotation::Int, default: None, span: dummy() },
        ],
        return_annotation: TypeAnnotation::Instance(class_name),
        body: vec![Stmt::Return(
            Some(Expr::Call { func: Box::new(name_of(class_name)), args: vec![name_of(n), name_of(log), name_of(counts)], keywords: vec![], span: dummy() }),
            dummy(),
        )],
        span: dummy(),
    };

    let module = Module { name: "m".to_string(), statements: vec![Stmt::ClassDef(class_def), Stmt::FunctionDef(make_def)] };
    let module_id = compiler.register_module(&module);
    let make_function = compiler.context.find_function(module_id, make_name).unwrap();

    ember_compiler::resolver::install_global(compiler);
    let int_ty = || Value::simple(TypeTag::Int);
    let (_, entry) = ember_compiler::resolver::with_global(|c| c.compile_function(make_function, vec![int_ty(), int_ty(), int_ty()])).unwrap();

    let log_list = ember_runtime::list::alloc(false);
    let counts_list = ember_runtime::list::alloc(false);
    for _ in 0..3 {
        unsafe {
            ember_runtime::list::push(log_list, u64::MAX);
            ember_runtime::list::push(counts_list, 0);
        }
    }

    let mut instances = Vec::new();
    for value in [0u64, 1, 2] {
        let (instance, active_exception) = unsafe { call_entry_with_three_args(entry, value, log_list as u64, counts_list as u64) };
        assert_eq!(active_exception, 0);
        instances.push(instance);
    }

    for instance in instances {
        unsafe { ember_runtime::header::delete_reference(instance as *mut ember_runtime::header::ObjectHeader) };
    }

    for idx in 0..3u64 {
        assert_eq!(unsafe { ember_runtime::list::get(log_list, idx as usize) }, idx);
        assert_eq!(unsafe { ember_runtime::list::get(counts_list, idx as usize) }, 1);
    }
}

/// A top-level `THRESHOLD = 100` declares a module global; `over(n)` reads
/// it without ever assigning it locally, so `compile_name` must fall back
/// from this function's own (empty) local slots to the owning module's
/// globals. Stands in for the embedder: writes the initial value into the
/// module's global storage itself, the same way a real front end would
/// before calling into the module's compiled code.
#[test]
fn reading_a_name_never_assigned_locally_falls_back_to_the_module_global() {
    let mut compiler = Compiler::new();
    let threshold = compiler.intern("THRESHOLD");
    let n = compiler.intern("n");
    let name = compiler.intern("over");

    let def = FunctionDef {
        name,
        params: vec![Param { name: n, annotation: TypeAnnotation::Int, default: None, span: dummy() }],
        return_annotation: TypeAnnotation::Int,
        body: vec![Stmt::Return(
            Some(Expr::BinOp { op: ember_ast::BinOp::Sub, left: Box::new(Expr::Name(n, dummy())), right: Box::new(Expr::Name(threshold, dummy())), span: dummy() }),
            dummy(),
        )],
        span: dummy(),
    };
    let module = Module {
        name: "m".to_string(),
        statements: vec![
            Stmt::Assign { target: Expr::Name(threshold, dummy()), value: Expr::Literal(Literal::Int(100), dummy()), span: dummy() },
            Stmt::FunctionDef(def),
        ],
    };
    let module_id = compiler.register_module(&module);
    let function = compiler.context.find_function(module_id, name).unwrap();
    let (_, entry) = compiler.compile_function(function, vec![Value::simple(TypeTag::Int)]).unwrap();

    let slot = *compiler.context.module(module_id).globals.get(&threshold).unwrap();
    let globals_ptr = compiler.context.module_mut(module_id).globals_base_ptr();
    unsafe { *globals_ptr.add(slot as usize) = 100 };

    let (result, active_exception) = unsafe { call_entry_with_arg_and_globals(entry, 142, globals_ptr) };
    assert_eq!(active_exception, 0);
    assert_eq!(result, 42);
}
