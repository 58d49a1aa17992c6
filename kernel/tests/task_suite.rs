//! Scheduler and task-engine checks: forking, suspension, resource limits,
//! kill, quotas, and transactional atomicity under contention.

mod common;

use std::time::{Duration, Instant};

use common::{define_system_property, setup, setup_with};

use loam_kernel::config::ServerOptions;
use loam_kernel::program::build::*;
use loam_kernel::program::{Expr, StmtNode};
use loam_kernel::tasks::TaskOutcome;
use loam_kernel::vm::TaskAbortReason;
use loam_values::var::error::Error::E_QUOTA;
use loam_values::var::{v_err, v_int, v_list, v_obj, v_str, Symbol};

fn sys_prop(name: &str) -> Expr {
    prop(value(v_obj(0)), name)
}

#[test]
fn test_fork_runs_after_parent_commits() {
    let tw = setup_with(|loader| {
        define_system_property(loader, "order", v_list(vec![]));
    });
    // the fork body runs strictly after the parent's own append
    let program = prog(vec![
        StmtNode::Fork {
            id: None,
            delay: int(0),
            body: stmts(vec![StmtNode::Expr(assign(
                sys_prop("order"),
                call(
                    "listappend",
                    vec![normal(sys_prop("order")), normal(value(v_str("late")))],
                ),
            ))]),
        },
        expr_stmt(assign(
            sys_prop("order"),
            call(
                "listappend",
                vec![normal(sys_prop("order")), normal(value(v_str("now")))],
            ),
        )),
        ret(int(0)),
    ]);
    assert!(matches!(tw.eval(program), TaskOutcome::Success(_)));
    assert!(
        tw.wait_for_property(
            "order",
            &v_list(vec![v_str("now"), v_str("late")]),
            Duration::from_secs(5),
        ),
        "fork did not run, or ran before the parent committed"
    );
}

#[test]
fn test_fork_binds_task_id() {
    let tw = setup();
    let program = prog(vec![
        StmtNode::Fork {
            id: Some(Symbol::mk("tid")),
            delay: int(0),
            body: stmts(vec![]),
        },
        ret(id("tid")),
    ]);
    match tw.eval(program) {
        TaskOutcome::Success(v) => {
            let loam_values::var::Variant::Int(tid) = v.variant() else {
                panic!("fork variable should hold the task id, got {v:?}");
            };
            assert!(*tid > 0, "task ids are positive");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_suspend_zero_returns_immediately() {
    let tw = setup();
    let result = tw.eval_ok(prog(vec![ret(call(
        "suspend",
        vec![normal(int(0))],
    ))]));
    assert_eq!(result, v_int(0));
}

#[test]
fn test_suspend_timed_resumes() {
    let tw = setup();
    let started = Instant::now();
    let result = tw.eval_ok(prog(vec![
        expr_stmt(call("suspend", vec![normal(int(1))])),
        ret(int(7)),
    ]));
    assert_eq!(result, v_int(7));
    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "suspend(1) returned too early"
    );
}

#[test]
fn test_state_survives_suspension() {
    // Values written before a suspension are visible after it; the
    // suspension commits and the continuation runs in a new transaction.
    let tw = setup_with(|loader| {
        define_system_property(loader, "stage", v_int(0));
    });
    let result = tw.eval_ok(prog(vec![
        expr_stmt(assign(sys_prop("stage"), int(1))),
        expr_stmt(call("suspend", vec![normal(int(0))])),
        ret(sys_prop("stage")),
    ]));
    assert_eq!(result, v_int(1));
}

#[test]
fn test_ticks_exhaustion_aborts() {
    let tw = setup();
    let outcome = tw.eval(prog(vec![StmtNode::While {
        id: None,
        condition: int(1),
        body: stmts(vec![]),
    }]));
    assert!(
        matches!(outcome, TaskOutcome::AbortedLimit(TaskAbortReason::Ticks)),
        "unexpected outcome {outcome:?}"
    );
}

#[test]
fn test_kill_own_task() {
    let tw = setup();
    let outcome = tw.eval(prog(vec![
        expr_stmt(call(
            "kill_task",
            vec![normal(call("task_id", vec![]))],
        )),
        ret(int(1)),
    ]));
    assert!(matches!(outcome, TaskOutcome::AbortedKill));
}

#[test]
fn test_concurrent_increments_are_atomic() {
    let tw = setup_with(|loader| {
        define_system_property(loader, "counter", v_int(0));
    });
    let increment = || {
        prog(vec![
            expr_stmt(assign(
                sys_prop("counter"),
                binary(
                    loam_kernel::program::BinaryOp::Add,
                    sys_prop("counter"),
                    int(1),
                ),
            )),
            ret(int(0)),
        ])
    };
    let (tx1, rx1) = flume::bounded(1);
    let (tx2, rx2) = flume::bounded(1);
    tw.scheduler
        .submit_program_task(common::WIZARD, common::WIZARD, loam_values::SYSTEM_OBJECT, increment(), Some(tx1))
        .unwrap();
    tw.scheduler
        .submit_program_task(common::WIZARD, common::WIZARD, loam_values::SYSTEM_OBJECT, increment(), Some(tx2))
        .unwrap();
    assert!(matches!(
        rx1.recv_timeout(Duration::from_secs(10)).unwrap(),
        TaskOutcome::Success(_)
    ));
    assert!(matches!(
        rx2.recv_timeout(Duration::from_secs(10)).unwrap(),
        TaskOutcome::Success(_)
    ));
    assert_eq!(tw.read_system_property("counter"), Some(v_int(2)));
}

#[test]
fn test_queued_task_quota() {
    let tw = setup();
    let mut options = ServerOptions::default();
    options.queued_task_limit = Some(0);
    tw.world.set_options(options);

    let outcome = tw.eval(prog(vec![
        StmtNode::Fork {
            id: None,
            delay: int(60),
            body: stmts(vec![]),
        },
        ret(int(0)),
    ]));
    match outcome {
        TaskOutcome::Exception(exc) => assert_eq!(exc.code, v_err(E_QUOTA)),
        other => panic!("expected quota error, got {other:?}"),
    }
}

#[test]
fn test_resume_wakes_suspended_task() {
    let tw = setup_with(|loader| {
        define_system_property(loader, "woke_with", v_int(0));
    });
    // task A suspends indefinitely and records what it was woken with
    let (tx, rx) = flume::bounded(1);
    tw.scheduler
        .submit_program_task(
            common::WIZARD,
            common::WIZARD,
            loam_values::SYSTEM_OBJECT,
            prog(vec![
                expr_stmt(assign(
                    sys_prop("woke_with"),
                    call("suspend", vec![]),
                )),
                ret(int(0)),
            ]),
            Some(tx),
        )
        .unwrap();

    // wait for it to park, then resume it with a value
    let deadline = Instant::now() + Duration::from_secs(5);
    let task_id = loop {
        assert!(Instant::now() < deadline, "task never suspended");
        let queued = tw.scheduler.queued_tasks(common::WIZARD, true);
        if let Some(t) = queued.first() {
            break t.task_id;
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    tw.scheduler.resume_task(task_id, v_int(99)).unwrap();
    assert!(matches!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        TaskOutcome::Success(_)
    ));
    assert_eq!(tw.read_system_property("woke_with"), Some(v_int(99)));
}

#[test]
fn test_queued_tasks_lists_forked_task() {
    let tw = setup();
    let result = tw.eval_ok(prog(vec![
        StmtNode::Fork {
            id: Some(Symbol::mk("tid")),
            delay: int(60),
            body: stmts(vec![]),
        },
        ret(id("tid")),
    ]));
    let loam_values::var::Variant::Int(tid) = result.variant() else {
        panic!("expected task id");
    };
    // the fork should now be queued; give the deferred submission a moment
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let queued = tw.scheduler.queued_tasks(common::WIZARD, true);
        if queued.iter().any(|t| t.task_id == *tid) {
            break;
        }
        assert!(Instant::now() < deadline, "forked task never queued");
        std::thread::sleep(Duration::from_millis(10));
    }
    tw.scheduler.kill_task(*tid).unwrap();
}
