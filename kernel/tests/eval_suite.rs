//! End-to-end evaluator checks: programs submitted through the scheduler,
//! asserting on the values and exceptions that come back.

mod common;

use common::{setup, setup_with, ROOM};

use loam_kernel::program::build::*;
use loam_kernel::program::{
    BinaryOp, CatchCodes, CondArm, ExceptArm, Expr, StmtNode, UnaryOp,
};
use loam_kernel::tasks::TaskOutcome;
use loam_values::model::r#match::VerbArgsSpec;
use loam_values::model::verbs::VerbFlag;
use loam_values::util::BitEnum;
use loam_values::var::error::Error::{E_DIV, E_MAXREC, E_TYPE, E_VERBNF};
use loam_values::var::{v_empty_list, v_err, v_int, v_list, v_str, Symbol};

fn expect_exception(outcome: TaskOutcome, code: loam_values::var::error::Error) {
    match outcome {
        TaskOutcome::Exception(exc) => {
            assert_eq!(exc.code, v_err(code), "unexpected exception code");
        }
        other => panic!("expected exception {code:?}, got {other:?}"),
    }
}

#[test]
fn test_arithmetic() {
    let tw = setup();
    let result = tw.eval_ok(prog(vec![ret(binary(
        BinaryOp::Add,
        int(1),
        binary(BinaryOp::Mul, int(2), int(3)),
    ))]));
    assert_eq!(result, v_int(7));

    let result = tw.eval_ok(prog(vec![ret(binary(
        BinaryOp::Add,
        value(v_str("foo")),
        value(v_str("bar")),
    ))]));
    assert_eq!(result, v_str("foobar"));
}

#[test]
fn test_type_error_raises_with_debug_on() {
    let tw = setup();
    let outcome = tw.eval(prog(vec![ret(binary(
        BinaryOp::Add,
        int(1),
        value(v_str("x")),
    ))]));
    expect_exception(outcome, E_TYPE);
}

#[test]
fn test_debug_off_yields_error_value() {
    // A verb without the d bit turns its uncaught errors into values.
    let tw = setup_with(|loader| {
        let mut flags = BitEnum::new_with(VerbFlag::Read);
        flags.set(VerbFlag::Exec);
        loader
            .add_verb(
                ROOM,
                &["fumble"],
                common::WIZARD,
                flags,
                VerbArgsSpec::this_none_this(),
                prog(vec![ret(binary(BinaryOp::Add, int(1), value(v_str("x"))))]),
            )
            .unwrap();
    });
    match tw.call_verb(ROOM, "fumble", vec![]) {
        TaskOutcome::Success(v) => assert_eq!(v, v_err(E_TYPE)),
        other => panic!("expected error value, got {other:?}"),
    }
}

#[test]
fn test_nested_index_assignment() {
    let tw = setup();
    let result = tw.eval_ok(prog(vec![
        expr_stmt(assign(
            id("x"),
            list(vec![
                normal(list(vec![normal(int(1)), normal(int(2))])),
                normal(list(vec![normal(int(3)), normal(int(4))])),
            ]),
        )),
        expr_stmt(assign(index(index(id("x"), int(2)), int(1)), int(9))),
        ret(id("x")),
    ]));
    assert_eq!(
        result,
        v_list(vec![
            v_list(vec![v_int(1), v_int(2)]),
            v_list(vec![v_int(9), v_int(4)]),
        ])
    );
}

#[test]
fn test_string_range_assignment() {
    let tw = setup();
    let result = tw.eval_ok(prog(vec![
        expr_stmt(assign(id("y"), value(v_str("foo")))),
        expr_stmt(assign(
            range(id("y"), int(2), int(2)),
            value(v_str("LA")),
        )),
        ret(id("y")),
    ]));
    assert_eq!(result, v_str("fLAo"));
}

#[test]
fn test_scatter_assignment() {
    let tw = setup();
    let scatter_of = |rhs: Expr| {
        prog(vec![
            expr_stmt(Expr::Scatter(
                vec![
                    scatter_required("a"),
                    scatter_optional("b", Some(int(7))),
                    scatter_rest("c"),
                ],
                Box::new(rhs),
            )),
            ret(list(vec![
                normal(id("a")),
                normal(id("b")),
                normal(id("c")),
            ])),
        ])
    };

    let result = tw.eval_ok(scatter_of(list(vec![normal(int(10))])));
    assert_eq!(
        result,
        v_list(vec![v_int(10), v_int(7), v_empty_list()])
    );

    let result = tw.eval_ok(scatter_of(list(vec![
        normal(int(10)),
        normal(int(20)),
        normal(int(30)),
        normal(int(40)),
    ])));
    assert_eq!(
        result,
        v_list(vec![v_int(10), v_int(20), v_list(vec![v_int(30), v_int(40)])])
    );
}

#[test]
fn test_index_length_marker() {
    let tw = setup();
    // {10, 20, 30}[$] is the last element
    let result = tw.eval_ok(prog(vec![ret(index(
        list(vec![normal(int(10)), normal(int(20)), normal(int(30))]),
        Expr::Length,
    ))]));
    assert_eq!(result, v_int(30));
}

#[test]
fn test_while_break_continue() {
    let tw = setup();
    // sum even numbers up to 6, then break out
    let result = tw.eval_ok(prog(vec![
        expr_stmt(assign(id("i"), int(0))),
        expr_stmt(assign(id("s"), int(0))),
        StmtNode::While {
            id: None,
            condition: int(1),
            body: stmts(vec![
                StmtNode::Expr(assign(id("i"), binary(BinaryOp::Add, id("i"), int(1)))),
                StmtNode::Cond {
                    arms: vec![CondArm {
                        condition: binary(BinaryOp::Gt, id("i"), int(6)),
                        statements: stmts(vec![StmtNode::Break { exit: None }]),
                    }],
                    otherwise: vec![],
                },
                StmtNode::Cond {
                    arms: vec![CondArm {
                        condition: binary(BinaryOp::Mod, id("i"), int(2)),
                        statements: stmts(vec![StmtNode::Continue { exit: None }]),
                    }],
                    otherwise: vec![],
                },
                StmtNode::Expr(assign(id("s"), binary(BinaryOp::Add, id("s"), id("i")))),
            ]),
        },
        ret(id("s")),
    ]));
    assert_eq!(result, v_int(2 + 4 + 6));
}

#[test]
fn test_for_range_and_list() {
    let tw = setup();
    let result = tw.eval_ok(prog(vec![
        expr_stmt(assign(id("s"), int(0))),
        StmtNode::ForRange {
            id: Symbol::mk("i"),
            from: int(1),
            to: int(4),
            body: stmts(vec![StmtNode::Expr(assign(
                id("s"),
                binary(BinaryOp::Add, id("s"), id("i")),
            ))]),
        },
        StmtNode::ForList {
            id: Symbol::mk("x"),
            expr: list(vec![normal(int(10)), normal(int(20))]),
            body: stmts(vec![StmtNode::Expr(assign(
                id("s"),
                binary(BinaryOp::Add, id("s"), id("x")),
            ))]),
        },
        ret(id("s")),
    ]));
    assert_eq!(result, v_int(1 + 2 + 3 + 4 + 10 + 20));
}

#[test]
fn test_try_except_catches_named_code() {
    let tw = setup();
    let result = tw.eval_ok(prog(vec![
        StmtNode::TryExcept {
            body: stmts(vec![StmtNode::Expr(assign(
                id("x"),
                binary(BinaryOp::Div, int(1), int(0)),
            ))]),
            excepts: vec![ExceptArm {
                id: Some(Symbol::mk("e")),
                codes: CatchCodes::Codes(vec![normal(value(v_err(E_DIV)))]),
                statements: stmts(vec![StmtNode::Return {
                    expr: Some(list(vec![
                        normal(index(id("e"), int(1))),
                        normal(int(42)),
                    ])),
                }]),
            }],
        },
        ret(int(0)),
    ]));
    assert_eq!(result, v_list(vec![v_err(E_DIV), v_int(42)]));
}

#[test]
fn test_try_except_no_match_reraises() {
    let tw = setup();
    let outcome = tw.eval(prog(vec![StmtNode::TryExcept {
        body: stmts(vec![StmtNode::Expr(binary(BinaryOp::Div, int(1), int(0)))]),
        excepts: vec![ExceptArm {
            id: None,
            codes: CatchCodes::Codes(vec![normal(value(v_err(E_TYPE)))]),
            statements: stmts(vec![StmtNode::Return { expr: Some(int(0)) }]),
        }],
    }]));
    expect_exception(outcome, E_DIV);
}

#[test]
fn test_try_finally_exit_precedence() {
    let tw = setup();
    // the finally body's return wins over the try body's
    let result = tw.eval_ok(prog(vec![StmtNode::TryFinally {
        body: stmts(vec![StmtNode::Return { expr: Some(int(10)) }]),
        handler: stmts(vec![StmtNode::Return { expr: Some(int(20)) }]),
    }]));
    assert_eq!(result, v_int(20));
}

#[test]
fn test_try_finally_runs_on_exception() {
    let tw = setup_with(|loader| {
        common::define_system_property(loader, "cleanup_ran", v_int(0));
    });
    let outcome = tw.eval(prog(vec![StmtNode::TryFinally {
        body: stmts(vec![StmtNode::Expr(binary(BinaryOp::Div, int(1), int(0)))]),
        handler: stmts(vec![StmtNode::Expr(assign(
            prop(value(loam_values::var::v_obj(0)), "cleanup_ran"),
            int(1),
        ))]),
    }]));
    expect_exception(outcome, E_DIV);
    // an uncaught exception still commits the work done before it
    assert_eq!(tw.read_system_property("cleanup_ran"), Some(v_int(1)));
}

#[test]
fn test_catch_expression() {
    let tw = setup();
    let result = tw.eval_ok(prog(vec![ret(Expr::Catch {
        trye: Box::new(binary(BinaryOp::Div, int(1), int(0))),
        codes: CatchCodes::Any,
        except: Some(Box::new(int(99))),
    })]));
    assert_eq!(result, v_int(99));

    // without a fallback, the caught code is the value
    let result = tw.eval_ok(prog(vec![ret(Expr::Catch {
        trye: Box::new(binary(BinaryOp::Div, int(1), int(0))),
        codes: CatchCodes::Any,
        except: None,
    })]));
    assert_eq!(result, v_err(E_DIV));
}

#[test]
fn test_verb_dispatch_and_inheritance() {
    let tw = setup_with(|loader| {
        loader
            .add_verb(
                ROOM,
                &["double"],
                common::WIZARD,
                VerbFlag::rxd(),
                VerbArgsSpec::this_none_this(),
                prog(vec![ret(binary(
                    BinaryOp::Mul,
                    index(id("args"), int(1)),
                    int(2),
                ))]),
            )
            .unwrap();
    });
    let result = tw.eval_ok(prog(vec![ret(verb_call(
        value(loam_values::var::v_obj(ROOM.0)),
        "double",
        vec![normal(int(21))],
    ))]));
    assert_eq!(result, v_int(42));

    let outcome = tw.eval(prog(vec![ret(verb_call(
        value(loam_values::var::v_obj(ROOM.0)),
        "no_such_verb",
        vec![],
    ))]));
    expect_exception(outcome, E_VERBNF);
}

#[test]
fn test_recursion_limit() {
    let tw = setup_with(|loader| {
        loader
            .add_verb(
                ROOM,
                &["recurse"],
                common::WIZARD,
                VerbFlag::rxd(),
                VerbArgsSpec::this_none_this(),
                prog(vec![ret(verb_call(id("this"), "recurse", vec![]))]),
            )
            .unwrap();
    });
    expect_exception(tw.call_verb(ROOM, "recurse", vec![]), E_MAXREC);
}

#[test]
fn test_logical_operators_short_circuit() {
    let tw = setup();
    // `or` must not evaluate the failing side
    let result = tw.eval_ok(prog(vec![ret(Expr::Or(
        Box::new(int(5)),
        Box::new(binary(BinaryOp::Div, int(1), int(0))),
    ))]));
    assert_eq!(result, v_int(5));

    let result = tw.eval_ok(prog(vec![ret(Expr::And(
        Box::new(int(0)),
        Box::new(binary(BinaryOp::Div, int(1), int(0))),
    ))]));
    assert_eq!(result, v_int(0));

    let result = tw.eval_ok(prog(vec![ret(Expr::Unary(
        UnaryOp::Not,
        Box::new(int(0)),
    ))]));
    assert_eq!(result, v_int(1));
}

#[test]
fn test_builtin_values() {
    let tw = setup();
    let result = tw.eval_ok(prog(vec![ret(list(vec![
        normal(call("typeof", vec![normal(value(v_str("s")))])),
        normal(call("length", vec![normal(value(v_str("abc")))])),
        normal(call(
            "tostr",
            vec![normal(int(1)), normal(value(v_str("+"))), normal(int(2))],
        )),
        normal(call("toliteral", vec![normal(value(v_str("q")))])),
        normal(call("tonum", vec![normal(value(v_str("12foo")))])),
    ]))]));
    assert_eq!(
        result,
        v_list(vec![
            v_int(loam_values::var::VarType::TYPE_STR as i64),
            v_int(3),
            v_str("1+2"),
            v_str("\"q\""),
            v_int(12),
        ])
    );
}

#[test]
fn test_case_insensitive_language_equality() {
    let tw = setup();
    let result = tw.eval_ok(prog(vec![ret(list(vec![
        normal(binary(
            BinaryOp::Eq,
            value(v_str("Foo")),
            value(v_str("FOO")),
        )),
        normal(binary(
            BinaryOp::In,
            value(v_str("Foo")),
            list(vec![normal(value(v_str("foo")))]),
        )),
        normal(call(
            "equal",
            vec![normal(value(v_str("Foo"))), normal(value(v_str("FOO")))],
        )),
        normal(call(
            "equal",
            vec![normal(value(v_str("Foo"))), normal(value(v_str("Foo")))],
        )),
    ]))]));
    assert_eq!(
        result,
        v_list(vec![v_int(1), v_int(1), v_int(0), v_int(1)])
    );
}
