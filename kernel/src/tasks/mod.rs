//! The task engine: tasks, the scheduler that multiplexes them, the
//! connection registry they talk to, and command parsing.

pub mod command_parse;
pub mod connections;
pub mod scheduler;
pub mod task;

use std::time::Duration;

use thiserror::Error as ThisError;

use loam_values::var::error::Error;
use loam_values::var::objid::Objid;
use loam_values::var::Var;

use crate::program::Program;
use crate::tasks::connections::ConnectionMessage;
use crate::vm::activation::Activation;
use crate::vm::Exception;

/// Task ids are random positive 32-bit values, unique among live tasks.
pub type TaskId = i64;

/// What a forked task will run: the fork body with the captured environment
/// and frame metadata, starting `delay` after the parent commits.
#[derive(Clone)]
pub struct ForkRequest {
    pub task_id: TaskId,
    pub delay: Duration,
    pub player: Objid,
    pub perms: Objid,
    pub handler_object: Objid,
    pub activation: Activation,
}

/// Messages that wake a suspended or reading task.
#[derive(Debug, Clone)]
pub enum Wake {
    Resume(Var),
    /// Wake by raising; used for EOF on a reading task.
    Error(Error),
    Abort,
}

/// Side effects that must not happen unless the transaction commits. They
/// queue up during execution and run after a successful commit; an aborted
/// transaction discards them.
pub enum DeferredAction {
    Notify {
        player: Objid,
        message: ConnectionMessage,
    },
    Boot {
        player: Objid,
    },
    Fork(ForkRequest),
    Shutdown(Option<String>),
    Checkpoint,
    /// `server_log` output; written only once the transaction commits.
    Log { message: String, is_error: bool },
    /// Re-read `#0.server_options` into the world's option snapshot.
    ReloadOptions,
}

/// What a fresh task has been asked to do.
pub enum TaskStart {
    /// Parse and dispatch a command line.
    Command { line: String },
    /// Call a verb on an object and report its return value.
    Verb {
        vloc: Objid,
        verb: String,
        args: Vec<Var>,
        argstr: String,
    },
    /// Run a bare program (the `eval` path).
    Program { program: Program },
    /// Run a fork body.
    Fork(ForkRequest),
}

/// The terminal outcome of a task, as reported to a subscriber.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success(Var),
    Exception(Exception),
    AbortedLimit(crate::vm::TaskAbortReason),
    AbortedKill,
    AbortedError,
}

#[derive(Debug, Clone, ThisError)]
pub enum SchedulerError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("Could not parse command")]
    CouldNotParseCommand,
    #[error("No verb matched command {0:?}")]
    NoCommandMatch(String),
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}
