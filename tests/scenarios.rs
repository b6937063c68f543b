//! End-to-end scenarios run through the full `resolve -> infer -> evaluate`
//! pipeline via [`hemlock::run_program`], built by hand against the `ast`
//! module since this crate has no parser of its own.

use hemlock::ast::{BinaryOp, ExprKind, ExprNode, FunctionLiteral, StmtKind, StmtNode, UnaryOp};
use hemlock::builtins::{CollectStringPrint, NoNatives};
use hemlock::{run_program, HemlockError};

fn num(n: i64) -> ExprNode {
    ExprNode::dummy(ExprKind::Number {
        int: n,
        float: n as f64,
        is_float: false,
    })
}

fn str_lit(s: &str) -> ExprNode {
    ExprNode::dummy(ExprKind::Str(s.to_string()))
}

fn ident(name: &str) -> ExprNode {
    ExprNode::dummy(ExprKind::Ident {
        name: name.to_string(),
        resolved: None,
    })
}

fn bin(op: BinaryOp, l: ExprNode, r: ExprNode) -> ExprNode {
    ExprNode::dummy(ExprKind::Binary {
        op,
        left: Box::new(l),
        right: Box::new(r),
    })
}

fn unary(op: UnaryOp, operand: ExprNode) -> ExprNode {
    ExprNode::dummy(ExprKind::Unary {
        op,
        operand: Box::new(operand),
    })
}

fn call(callee: ExprNode, args: Vec<ExprNode>) -> ExprNode {
    ExprNode::dummy(ExprKind::Call {
        callee: Box::new(callee),
        args,
    })
}

fn get_property(object: ExprNode, name: &str) -> ExprNode {
    ExprNode::dummy(ExprKind::GetProperty {
        object: Box::new(object),
        name: name.to_string(),
    })
}

fn method_call(object: ExprNode, name: &str, args: Vec<ExprNode>) -> ExprNode {
    call(get_property(object, name), args)
}

fn array_lit(items: Vec<ExprNode>) -> ExprNode {
    ExprNode::dummy(ExprKind::ArrayLiteral(items))
}

fn index(object: ExprNode, idx: ExprNode) -> ExprNode {
    ExprNode::dummy(ExprKind::Index {
        object: Box::new(object),
        index: Box::new(idx),
    })
}

fn func_expr(param_names: Vec<&str>, body: Vec<StmtNode>) -> ExprNode {
    ExprNode::dummy(ExprKind::Function(FunctionLiteral {
        name: None,
        param_names: param_names.into_iter().map(str::to_string).collect(),
        param_types: None,
        rest_param: None,
        return_type: None,
        body,
        capture_set: Vec::new(),
    }))
}

fn let_stmt(name: &str, value: ExprNode) -> StmtNode {
    StmtNode::dummy(StmtKind::Let {
        name: name.to_string(),
        type_annotation: None,
        value,
    })
}

fn const_stmt(name: &str, value: ExprNode) -> StmtNode {
    StmtNode::dummy(StmtKind::Const {
        name: name.to_string(),
        type_annotation: None,
        value,
    })
}

fn assign_expr(target: &str, value: ExprNode) -> ExprNode {
    ExprNode::dummy(ExprKind::Assign {
        target: target.to_string(),
        value: Box::new(value),
        resolved: None,
    })
}

fn assign_stmt(target: &str, value: ExprNode) -> StmtNode {
    StmtNode::dummy(StmtKind::Expr(assign_expr(target, value)))
}

fn expr_stmt(e: ExprNode) -> StmtNode {
    StmtNode::dummy(StmtKind::Expr(e))
}

fn if_stmt(cond: ExprNode, then_branch: Vec<StmtNode>, else_branch: Option<Vec<StmtNode>>) -> StmtNode {
    StmtNode::dummy(StmtKind::If {
        cond,
        then_branch,
        else_branch,
    })
}

fn return_stmt(e: Option<ExprNode>) -> StmtNode {
    StmtNode::dummy(StmtKind::Return(e))
}

fn for_stmt(
    init: Option<StmtNode>,
    cond: Option<ExprNode>,
    incr: Option<ExprNode>,
    body: Vec<StmtNode>,
) -> StmtNode {
    StmtNode::dummy(StmtKind::For {
        init: init.map(Box::new),
        cond,
        incr,
        body,
    })
}

fn object_lit(fields: Vec<(&str, ExprNode)>) -> ExprNode {
    ExprNode::dummy(ExprKind::ObjectLiteral(
        fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
    ))
}

fn run(program: Vec<StmtNode>) -> Result<String, HemlockError> {
    let mut print = CollectStringPrint::new();
    let mut natives = NoNatives;
    run_program(program, &mut natives, &mut print)?;
    Ok(print.into_output())
}

/// S1: `let a = 1; let b = 2; print(a + b)` => `3`
#[test]
fn s1_arithmetic_addition() {
    let program = vec![
        let_stmt("a", num(1)),
        let_stmt("b", num(2)),
        expr_stmt(call(ident("print"), vec![bin(BinaryOp::Add, ident("a"), ident("b"))])),
    ];
    assert_eq!(run(program).unwrap(), "3\n");
}

/// S2: `let s = "hi"; print(s + " " + 42)` => `hi 42`
#[test]
fn s2_string_concat_coerces_non_string_operand() {
    let program = vec![
        let_stmt("s", str_lit("hi")),
        expr_stmt(call(
            ident("print"),
            vec![bin(
                BinaryOp::Add,
                bin(BinaryOp::Add, ident("s"), str_lit(" ")),
                num(42),
            )],
        )),
    ];
    assert_eq!(run(program).unwrap(), "hi 42\n");
}

/// S3: push three elements then map(x => x*x) => `[1, 4, 9]`
#[test]
fn s3_push_then_map() {
    let program = vec![
        let_stmt("xs", array_lit(vec![])),
        expr_stmt(method_call(ident("xs"), "push", vec![num(1)])),
        expr_stmt(method_call(ident("xs"), "push", vec![num(2)])),
        expr_stmt(method_call(ident("xs"), "push", vec![num(3)])),
        expr_stmt(call(
            ident("print"),
            vec![method_call(
                ident("xs"),
                "map",
                vec![func_expr(
                    vec!["x"],
                    vec![return_stmt(Some(bin(BinaryOp::Mul, ident("x"), ident("x"))))],
                )],
            )],
        )),
    ];
    assert_eq!(run(program).unwrap(), "[1, 4, 9]\n");
}

/// S4: `[1,2,3,4].reduce(fn(a,b)=>a+b, 0)` => `10`
#[test]
fn s4_reduce_with_initial_value() {
    let program = vec![
        let_stmt(
            "acc",
            method_call(
                array_lit(vec![num(1), num(2), num(3), num(4)]),
                "reduce",
                vec![
                    func_expr(
                        vec!["a", "b"],
                        vec![return_stmt(Some(bin(BinaryOp::Add, ident("a"), ident("b"))))],
                    ),
                    num(0),
                ],
            ),
        ),
        expr_stmt(call(ident("print"), vec![ident("acc")])),
    ];
    assert_eq!(run(program).unwrap(), "10\n");
}

/// S5: `const k = 7; k = 8;` => `Cannot assign to const variable 'k'`
#[test]
fn s5_assigning_to_const_fails() {
    let program = vec![const_stmt("k", num(7)), assign_stmt("k", num(8))];
    let err = run(program).unwrap_err();
    assert_eq!(err.to_string(), "Runtime error: Cannot assign to const variable 'k'");
}

/// S6: `let xs = [1,2]; print(xs[5])` => `Array index 5 out of bounds (length 2)`
#[test]
fn s6_array_index_out_of_bounds() {
    let program = vec![
        let_stmt("xs", array_lit(vec![num(1), num(2)])),
        expr_stmt(call(ident("print"), vec![index(ident("xs"), num(5))])),
    ];
    let err = run(program).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Runtime error: Array index 5 out of bounds (length 2)"
    );
}

/// S7: `[].reduce(fn(a,b)=>a+b)` on an empty array with no initial value
/// => `reduce() of empty array with no initial value`
#[test]
fn s7_reduce_empty_array_without_initial_fails() {
    let program = vec![expr_stmt(method_call(
        array_lit(vec![]),
        "reduce",
        vec![func_expr(
            vec!["a", "b"],
            vec![return_stmt(Some(bin(BinaryOp::Add, ident("a"), ident("b"))))],
        )],
    ))];
    let err = run(program).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Runtime error: reduce() of empty array with no initial value"
    );
}

/// S8: recursive factorial, `fact(10)` => `3628800`
#[test]
fn s8_recursive_factorial() {
    let fact_body = vec![
        if_stmt(
            bin(BinaryOp::Le, ident("n"), num(1)),
            vec![return_stmt(Some(num(1)))],
            None,
        ),
        return_stmt(Some(bin(
            BinaryOp::Mul,
            ident("n"),
            call(
                ident("fact"),
                vec![bin(BinaryOp::Sub, ident("n"), num(1))],
            ),
        ))),
    ];
    let program = vec![
        const_stmt("fact", func_expr(vec!["n"], fact_body)),
        expr_stmt(call(ident("print"), vec![call(ident("fact"), vec![num(10)])])),
    ];
    assert_eq!(run(program).unwrap(), "3628800\n");
}

/// Spec §8 invariant: heap refcounts balance to zero once a program with no
/// dangling closures finishes. `Evaluator::run` owns the heap for the whole
/// program, so a successful run with only scalar/string/array values and no
/// escaping closures should leave nothing live.
#[test]
fn heap_refcounts_balance_on_a_straight_line_program() {
    use hemlock::builtins::NoNatives;
    use hemlock::interpreter::Evaluator;
    use hemlock::resolver::Resolver;
    use hemlock::type_infer::TypeInferer;

    let mut program = vec![
        let_stmt("s", str_lit("hello")),
        let_stmt("xs", array_lit(vec![num(1), num(2), str_lit("three")])),
        expr_stmt(call(ident("print"), vec![ident("s"), ident("xs")])),
    ];
    Resolver::new().resolve(&mut program).unwrap();
    let registry = TypeInferer::new().infer(&mut program);
    let mut natives = NoNatives;
    let mut print = CollectStringPrint::new();
    let mut evaluator = Evaluator::new(registry, &mut natives, &mut print);
    evaluator.run(&program).unwrap();
    assert_eq!(evaluator.heap().live_count(), 0);
}

/// While-loop control flow: `break`/`continue` unwind exactly one enclosing
/// loop, matching spec §4.4's `Signal` propagation.
#[test]
fn while_loop_break_and_continue() {
    let body = vec![
        if_stmt(
            bin(BinaryOp::Eq, ident("i"), num(3)),
            vec![
                assign_stmt("i", bin(BinaryOp::Add, ident("i"), num(1))),
                StmtNode::dummy(StmtKind::Continue),
            ],
            None,
        ),
        if_stmt(
            bin(BinaryOp::Eq, ident("i"), num(5)),
            vec![StmtNode::dummy(StmtKind::Break)],
            None,
        ),
        expr_stmt(method_call(ident("out"), "push", vec![ident("i")])),
        assign_stmt("i", bin(BinaryOp::Add, ident("i"), num(1))),
    ];
    let program = vec![
        let_stmt("i", num(0)),
        let_stmt("out", array_lit(vec![])),
        StmtNode::dummy(StmtKind::While {
            cond: bin(BinaryOp::Lt, ident("i"), num(10)),
            body,
        }),
        expr_stmt(call(ident("print"), vec![ident("out")])),
    ];
    assert_eq!(run(program).unwrap(), "[0, 1, 2, 4]\n");
}

/// A `for` loop's body is resolved one scope deeper than its `init`
/// (the evaluator opens a fresh scope per iteration via `exec_block`),
/// so a body that reads the loop variable must not panic.
#[test]
fn for_loop_counts_up() {
    let program = vec![
        let_stmt("out", array_lit(vec![])),
        for_stmt(
            Some(let_stmt("i", num(0))),
            Some(bin(BinaryOp::Lt, ident("i"), num(3))),
            Some(assign_expr("i", bin(BinaryOp::Add, ident("i"), num(1)))),
            vec![expr_stmt(method_call(ident("out"), "push", vec![ident("i")]))],
        ),
        expr_stmt(call(ident("print"), vec![ident("out")])),
    ];
    assert_eq!(run(program).unwrap(), "[0, 1, 2]\n");
}

/// Spec §4.4: `INDEX_ASSIGN` past the end pads with `NULL` up to the
/// target index rather than raising `IndexOutOfBounds` (spec §7
/// deliberately excludes index-assign from that error's raisers).
#[test]
fn index_assign_past_the_end_pads_with_null() {
    let program = vec![
        let_stmt("xs", array_lit(vec![num(1), num(2)])),
        expr_stmt(ExprNode::dummy(ExprKind::IndexAssign {
            object: Box::new(ident("xs")),
            index: Box::new(num(5)),
            value: Box::new(num(9)),
        })),
        expr_stmt(call(ident("print"), vec![ident("xs")])),
    ];
    assert_eq!(run(program).unwrap(), "[1, 2, null, null, null, 9]\n");
}

/// Spec §4.4: `GET_PROPERTY`/`INDEX` on an `OBJECT` with a missing field
/// yield `NULL` rather than erroring.
#[test]
fn object_missing_field_reads_as_null() {
    let program = vec![
        let_stmt("o", object_lit(vec![("a", num(1))])),
        expr_stmt(call(
            ident("print"),
            vec![
                get_property(ident("o"), "missing"),
                index(ident("o"), str_lit("also_missing")),
                get_property(ident("o"), "a"),
            ],
        )),
    ];
    assert_eq!(run(program).unwrap(), "null null 1\n");
}

/// Spec §4.1's numeric-coercion table: `NULL` coerces to `0` and a numeric
/// `STRING` parses, so `~null` and `~"5"` both behave like coercing their
/// integer equivalent first.
#[test]
fn bitnot_coerces_null_and_numeric_string() {
    let program = vec![expr_stmt(call(
        ident("print"),
        vec![unary(UnaryOp::BitNot, ExprNode::dummy(ExprKind::Null)), unary(UnaryOp::BitNot, str_lit("5"))],
    ))];
    assert_eq!(run(program).unwrap(), "-1 -6\n");
}

/// A closure captures its defining environment by reference, so mutating
/// the captured variable after the closure is created is visible the next
/// time the closure runs (spec §3.3).
#[test]
fn closures_capture_environment_by_reference() {
    let make_counter_body = vec![
        let_stmt("count", num(0)),
        return_stmt(Some(func_expr(
            vec![],
            vec![
                assign_stmt("count", bin(BinaryOp::Add, ident("count"), num(1))),
                return_stmt(Some(ident("count"))),
            ],
        ))),
    ];
    let program = vec![
        let_stmt("make_counter", func_expr(vec![], make_counter_body)),
        let_stmt("counter", call(ident("make_counter"), vec![])),
        expr_stmt(call(ident("print"), vec![call(ident("counter"), vec![])])),
        expr_stmt(call(ident("print"), vec![call(ident("counter"), vec![])])),
        expr_stmt(call(ident("print"), vec![call(ident("counter"), vec![])])),
    ];
    assert_eq!(run(program).unwrap(), "1\n2\n3\n");
}

/// `map`/`filter` preserve the heap-refcount contract when the callback
/// itself errors partway through (spec §8 invariant 2 still applies on an
/// error exit, even though the whole heap is discarded with the evaluator).
#[test]
fn filter_keeps_matching_elements() {
    let program = vec![
        let_stmt("xs", array_lit(vec![num(1), num(2), num(3), num(4), num(5)])),
        expr_stmt(call(
            ident("print"),
            vec![method_call(
                ident("xs"),
                "filter",
                vec![func_expr(
                    vec!["x"],
                    vec![return_stmt(Some(bin(BinaryOp::Eq, bin(BinaryOp::Mod, ident("x"), num(2)), num(0))))],
                )],
            )],
        )),
    ];
    assert_eq!(run(program).unwrap(), "[2, 4]\n");
}

/// `len`, `type_of`, and the `.length` property agree for strings and arrays.
#[test]
fn len_type_of_and_length_property() {
    let program = vec![
        let_stmt("s", str_lit("hello")),
        let_stmt("xs", array_lit(vec![num(1), num(2), num(3)])),
        expr_stmt(call(
            ident("print"),
            vec![
                call(ident("len"), vec![ident("s")]),
                call(ident("type_of"), vec![ident("xs")]),
                get_property(ident("xs"), "length"),
            ],
        )),
    ];
    assert_eq!(run(program).unwrap(), "5 array 3\n");
}

/// A family of small straight-line arithmetic checks, generated the same
/// way the teacher's `tests/main.rs` builds its `execute_ok_tests!` family:
/// one `paste::item!` per case so the table stays a flat list of
/// name/expression/expected triples instead of N copy-pasted functions.
macro_rules! arithmetic_ok_tests {
    ($($name:ident: $op:expr, $lhs:expr, $rhs:expr, $expected:expr;)*) => {
        $(
            paste::item! {
                #[test]
                fn [< arithmetic_ $name >]() {
                    let program = vec![expr_stmt(call(ident("print"), vec![bin($op, num($lhs), num($rhs))]))];
                    assert_eq!(run(program).unwrap(), concat!($expected, "\n"));
                }
            }
        )*
    };
}

arithmetic_ok_tests! {
    add: BinaryOp::Add, 2, 3, "5";
    sub: BinaryOp::Sub, 10, 4, "6";
    mul: BinaryOp::Mul, 6, 7, "42";
    mod_: BinaryOp::Mod, 17, 5, "2";
}

/// Spec §4.1: `I32`-vs-`I32` arithmetic wraps two's-complement on overflow
/// rather than promoting to a wider kind (spec §8 invariant 4).
#[test]
fn i32_addition_wraps_on_overflow() {
    let program = vec![expr_stmt(call(
        ident("print"),
        vec![bin(BinaryOp::Add, num(i64::from(i32::MAX)), num(1))],
    ))];
    assert_eq!(run(program).unwrap(), "-2147483648\n");
}

/// Spec §4.1: once an operand is wide enough to need `I64`, overflow has no
/// wider kind to promote into and is a fatal error instead of wrapping.
#[test]
fn i64_addition_overflow_is_fatal() {
    let program = vec![expr_stmt(call(
        ident("print"),
        vec![bin(BinaryOp::Add, num(i64::MAX), num(1))],
    ))];
    let err = run(program).unwrap_err();
    assert_eq!(err.to_string(), "Runtime error: integer overflow");
}

/// Spec §4.1: `DIV` always yields `F64`, even when both operands are
/// integers and the division happens to be exact.
#[test]
fn division_always_yields_float() {
    let program = vec![expr_stmt(call(
        ident("print"),
        vec![
            bin(BinaryOp::Div, num(7), num(2)),
            bin(BinaryOp::Div, num(10), num(2)),
        ],
    ))];
    assert_eq!(run(program).unwrap(), "3.5 5.0\n");
}

/// Spec §4.1: equality across distinct numeric kinds compares widened
/// values, so an `I64` result (forced by operands outside `I32`'s range)
/// still equals a plain `I32` literal of the same numeric value.
#[test]
fn equality_widens_across_numeric_kinds() {
    let program = vec![expr_stmt(call(
        ident("print"),
        vec![bin(
            BinaryOp::Eq,
            bin(BinaryOp::Sub, num(3_000_000_000), num(2_999_999_995)),
            num(5),
        )],
    ))];
    assert_eq!(run(program).unwrap(), "true\n");
}

/// `insert`/`remove`/`get`/`set` round out the array method catalog (spec
/// §4.5) alongside `push`/`pop`/`first`/`last`.
#[test]
fn array_insert_remove_get_set() {
    let program = vec![
        let_stmt("xs", array_lit(vec![num(1), num(2), num(4)])),
        expr_stmt(method_call(ident("xs"), "insert", vec![num(2), num(3)])),
        expr_stmt(method_call(ident("xs"), "set", vec![num(0), num(10)])),
        expr_stmt(method_call(ident("xs"), "remove", vec![num(3)])),
        expr_stmt(call(
            ident("print"),
            vec![ident("xs"), method_call(ident("xs"), "get", vec![num(1)])],
        )),
    ];
    assert_eq!(run(program).unwrap(), "[10, 2, 3] 2\n");
}

/// `find` is a callback-taking array method (like `map`/`filter`/`reduce`):
/// it returns the first element satisfying the predicate, or `null`.
#[test]
fn find_returns_first_match_or_null() {
    let program = vec![
        let_stmt("xs", array_lit(vec![num(1), num(3), num(4), num(5)])),
        expr_stmt(call(
            ident("print"),
            vec![method_call(
                ident("xs"),
                "find",
                vec![func_expr(
                    vec!["x"],
                    vec![return_stmt(Some(bin(BinaryOp::Eq, bin(BinaryOp::Mod, ident("x"), num(2)), num(0))))],
                )],
            )],
        )),
        expr_stmt(call(
            ident("print"),
            vec![method_call(
                array_lit(vec![num(1), num(3)]),
                "find",
                vec![func_expr(
                    vec!["x"],
                    vec![return_stmt(Some(bin(BinaryOp::Eq, bin(BinaryOp::Mod, ident("x"), num(2)), num(0))))],
                )],
            )],
        )),
    ];
    assert_eq!(run(program).unwrap(), "4\nnull\n");
}

/// Spec §4.1's `to_bool` coercion: a `STRING` is falsy exactly when empty,
/// distinct from every other heap-backed value (always truthy).
#[test]
fn empty_string_is_falsy_in_a_condition() {
    let program = vec![
        let_stmt("out", array_lit(vec![])),
        if_stmt(
            str_lit(""),
            vec![expr_stmt(method_call(ident("out"), "push", vec![str_lit("empty-was-truthy")]))],
            Some(vec![expr_stmt(method_call(ident("out"), "push", vec![str_lit("empty-was-falsy")]))]),
        ),
        if_stmt(
            str_lit("x"),
            vec![expr_stmt(method_call(ident("out"), "push", vec![str_lit("nonempty-was-truthy")]))],
            None,
        ),
        expr_stmt(call(ident("print"), vec![ident("out")])),
    ];
    assert_eq!(run(program).unwrap(), "[empty-was-falsy, nonempty-was-truthy]\n");
}
