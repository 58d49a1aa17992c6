//! The body of one task thread: run the requested work inside a
//! transaction, commit or retry, and apply the uncaught-error and timeout
//! policy hooks.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{error, warn};

use loam_values::var::objid::Objid;
use loam_values::var::{v_list, v_str, Var, Variant};

use crate::tasks::connections::ConnectionMessage;
use crate::tasks::scheduler::Scheduler;
use crate::tasks::{TaskId, TaskOutcome, TaskStart};
use crate::vm::exec::Exec;
use crate::vm::{Flow, TaskAbortReason};

/// Transactional attempts before giving up on a persistently conflicting
/// task.
const MAX_COMMIT_RETRIES: usize = 20;

/// Run one task to completion on the current thread. Each iteration of the
/// outer loop is one transactional attempt; a conflict on a task that has
/// not yet committed anything is retried wholesale against a fresh snapshot.
pub fn run_task(
    scheduler: Arc<Scheduler>,
    task_id: TaskId,
    player: Objid,
    perms: Objid,
    handler_object: Objid,
    start: TaskStart,
    reply: Option<flume::Sender<TaskOutcome>>,
) {
    let kill = scheduler
        .kill_flag(task_id)
        .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
    let is_background = matches!(start, TaskStart::Fork(_));

    let mut attempt = 0;
    let outcome = loop {
        attempt += 1;
        scheduler.mark_running(task_id, is_background);
        let mut exec = Exec::new(
            scheduler.clone(),
            task_id,
            player,
            perms,
            handler_object,
            is_background,
            kill.clone(),
        );
        match exec.perform_start(&start) {
            Ok(value) => match exec.commit_point() {
                Ok(()) => break TaskOutcome::Success(value),
                Err(_) => {
                    if !exec.committed_once && attempt < MAX_COMMIT_RETRIES {
                        continue;
                    }
                    error!(task_id, attempt, "commit conflict not retryable; aborting task");
                    break TaskOutcome::AbortedError;
                }
            },
            Err(Flow::Raise(exc)) => {
                // Uncaught exception. The work done so far still commits,
                // then policy gets a say about the traceback.
                if exec.commit_point().is_err() {
                    if !exec.committed_once && attempt < MAX_COMMIT_RETRIES {
                        continue;
                    }
                    error!(task_id, "commit conflict during exception unwind");
                }
                let suppress = run_policy_hook(
                    &scheduler,
                    task_id,
                    player,
                    handler_object,
                    &kill,
                    "handle_uncaught_error",
                    vec![
                        exc.code.clone(),
                        v_str(&exc.msg),
                        exc.value.clone(),
                        v_list(exc.stack.clone()),
                        v_list(exc.backtrace.clone()),
                    ],
                );
                if !suppress {
                    deliver_lines(&scheduler, player, &exc.backtrace);
                }
                break TaskOutcome::Exception(exc);
            }
            Err(Flow::Abort(TaskAbortReason::Conflict)) => {
                exec.rollback();
                if !exec.committed_once && attempt < MAX_COMMIT_RETRIES {
                    continue;
                }
                warn!(
                    task_id,
                    "conflict after a prior commit point; task cannot be replayed"
                );
                break TaskOutcome::AbortedError;
            }
            Err(Flow::Abort(TaskAbortReason::Kill)) => {
                exec.rollback();
                break TaskOutcome::AbortedKill;
            }
            Err(Flow::Abort(reason @ (TaskAbortReason::Ticks | TaskAbortReason::Seconds))) => {
                exec.rollback();
                let resource = match reason {
                    TaskAbortReason::Ticks => "ticks",
                    _ => "seconds",
                };
                let (stack, backtrace) = exec
                    .abort_snapshot
                    .take()
                    .unwrap_or((vec![], vec![]));
                let suppress = run_policy_hook(
                    &scheduler,
                    task_id,
                    player,
                    handler_object,
                    &kill,
                    "handle_task_timeout",
                    vec![
                        v_str(resource),
                        v_list(stack),
                        v_list(backtrace.clone()),
                    ],
                );
                if !suppress {
                    deliver_lines(&scheduler, player, &backtrace);
                }
                break TaskOutcome::AbortedLimit(reason);
            }
            Err(Flow::Return(_) | Flow::Break(_) | Flow::Continue(_)) => {
                // perform_start translates these at the frame boundary;
                // reaching here is an interpreter bug.
                error!(task_id, "stray control flow escaped the task body");
                exec.rollback();
                break TaskOutcome::AbortedError;
            }
        }
    };

    if let Some(reply) = &reply {
        let _ = reply.send(outcome);
    }
    scheduler.task_done(task_id);
}

/// Run a server policy verb (`handle_uncaught_error`, `handle_task_timeout`)
/// in its own transaction. Returns true when the hook ran and returned
/// truthy, i.e. the default traceback delivery is suppressed.
fn run_policy_hook(
    scheduler: &Arc<Scheduler>,
    task_id: TaskId,
    player: Objid,
    handler_object: Objid,
    kill: &Arc<AtomicBool>,
    verb: &str,
    args: Vec<Var>,
) -> bool {
    let mut exec = Exec::new(
        scheduler.clone(),
        task_id,
        player,
        handler_object,
        handler_object,
        true,
        kill.clone(),
    );
    match exec.call_system_verb(verb, args, "") {
        Ok(Some(result)) => {
            let committed = exec.commit_point().is_ok();
            if !committed {
                warn!(task_id, verb, "policy hook commit conflicted; effects dropped");
            }
            result.is_true()
        }
        Ok(None) => {
            exec.rollback();
            false
        }
        Err(_) => {
            // A policy hook that itself blows up never suppresses anything.
            exec.rollback();
            false
        }
    }
}

/// Push traceback lines straight onto the player's connection; this runs
/// after the transaction has settled.
fn deliver_lines(scheduler: &Arc<Scheduler>, player: Objid, lines: &[Var]) {
    let Some(conn) = scheduler.world.connections.get(player) else {
        return;
    };
    for line in lines {
        if let Variant::Str(s) = line.variant() {
            conn.output
                .push(ConnectionMessage::Text(s.as_str().to_string()));
        }
    }
}
