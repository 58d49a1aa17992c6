//! The interpreter: activation frames, the expression/statement evaluator,
//! and the unwinding machinery that carries returns, loop exits and
//! exceptions up the stack.

pub mod activation;
pub mod exec;

use loam_values::var::error::ErrorPack;
use loam_values::var::{v_err, v_list, v_objid, v_str, v_string, Symbol, Var};

use crate::vm::activation::Activation;

/// A raised MOO exception, carrying the call stack captured at the raise
/// point and the debug bit of the raising frame.
#[derive(Debug, Clone)]
pub struct Exception {
    /// The error code; usually an error value, but `raise()` admits any.
    pub code: Var,
    pub msg: String,
    pub value: Var,
    /// Frame descriptors, innermost first.
    pub stack: Vec<Var>,
    /// Human-readable traceback lines, innermost first.
    pub backtrace: Vec<Var>,
    /// Debug bit of the frame that raised. When clear, the exception is
    /// suppressed at the enclosing statement and collapses to `code`.
    pub debug: bool,
}

impl Exception {
    /// The 4-list bound by a `try/except` handler variable.
    #[must_use]
    pub fn as_except_binding(&self) -> Var {
        v_list(vec![
            self.code.clone(),
            v_str(&self.msg),
            self.value.clone(),
            v_list(self.stack.clone()),
        ])
    }
}

/// Why a task stopped without producing a value.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TaskAbortReason {
    /// Killed from outside (or killed itself).
    Kill,
    /// Tick budget exhausted.
    Ticks,
    /// Wall-clock budget exhausted.
    Seconds,
    /// The transaction conflicted at a commit point.
    Conflict,
}

/// The non-local exits threaded through evaluation. Statement and expression
/// execution return `Result<_, Flow>`; the `Err` side unwinds to whatever
/// construct handles it.
#[derive(Debug, Clone)]
pub enum Flow {
    Raise(Exception),
    Return(Var),
    Break(Option<Symbol>),
    Continue(Option<Symbol>),
    Abort(TaskAbortReason),
}

pub type ExecResult<T> = Result<T, Flow>;

/// Compose the stack-descriptor list for a traceback: one
/// `{this, verb-name, programmer, verb-loc, player, line}` entry per frame,
/// innermost first.
#[must_use]
pub fn make_stack_list(frames: &[Activation]) -> Vec<Var> {
    let mut stack_list = vec![];
    for a in frames.iter().rev() {
        stack_list.push(v_list(vec![
            v_objid(a.this),
            v_str(&a.verb_name),
            v_objid(a.permissions),
            v_objid(a.verb_definer),
            v_objid(a.player),
            loam_values::var::v_int(i64::from(a.line_number)),
        ]));
    }
    stack_list
}

/// Compose the formatted traceback lines for an error.
#[must_use]
pub fn make_backtrace(frames: &[Activation], msg: &str) -> Vec<Var> {
    let mut backtrace = vec![];
    for (i, a) in frames.iter().rev().enumerate() {
        let mut line = String::new();
        if i != 0 {
            line.push_str("... called from ");
        }
        if let Some(bf_name) = &a.builtin {
            line.push_str(&format!("built-in function {bf_name}()"));
        } else {
            line.push_str(&format!("{}:{}", a.verb_definer, a.verb_name));
            if a.verb_definer != a.this {
                line.push_str(&format!(" (this == {})", a.this));
            }
            line.push_str(&format!(", line {}", a.line_number));
        }
        if i == 0 {
            line.push_str(&format!(":  {msg}"));
        }
        backtrace.push(v_string(line));
    }
    backtrace.push(v_str("(End of traceback.)"));
    backtrace
}

/// Build the exception for an error pack raised against the given stack.
#[must_use]
pub fn exception_for(frames: &[Activation], pack: ErrorPack, debug: bool) -> Exception {
    Exception {
        code: v_err(pack.code),
        msg: pack.msg.clone(),
        value: pack.value,
        stack: make_stack_list(frames),
        backtrace: make_backtrace(frames, &pack.msg),
        debug,
    }
}

