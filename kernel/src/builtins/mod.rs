//! The built-in function registry: every primitive callable from MOO
//! expressions, its signature, and the dispatcher that validates calls
//! before handing them to the implementation.

mod bf_list_sets;
mod bf_num;
mod bf_objects;
mod bf_properties;
mod bf_server;
mod bf_strings;
mod bf_values;
mod bf_verbs;

use std::collections::HashMap;

use lazy_static::lazy_static;

use loam_values::var::error::Error::{E_ARGS, E_INVARG, E_PERM, E_TYPE};
use loam_values::var::{Symbol, Var, Variant};

use crate::vm::activation::Activation;
use crate::vm::exec::Exec;
use crate::vm::ExecResult;

/// Argument type expectations, checked positionally before dispatch.
/// `Num` admits either integer or float.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ArgType {
    Any,
    Int,
    Num,
    Str,
    Obj,
    List,
}

pub type BfFn = fn(&mut Exec, Vec<Var>) -> ExecResult<Var>;

/// The signature descriptor for one builtin.
pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` means variadic.
    pub max_args: Option<usize>,
    /// Expected types for the leading positions; later positions unchecked.
    pub types: &'static [ArgType],
    pub func: BfFn,
}

impl Builtin {
    fn check_args(&self, args: &[Var]) -> Result<(), loam_values::var::error::Error> {
        if args.len() < self.min_args {
            return Err(E_ARGS);
        }
        if let Some(max) = self.max_args {
            if args.len() > max {
                return Err(E_ARGS);
            }
        }
        for (arg, expected) in args.iter().zip(self.types.iter()) {
            let ok = match expected {
                ArgType::Any => true,
                ArgType::Int => matches!(arg.variant(), Variant::Int(_)),
                ArgType::Num => {
                    matches!(arg.variant(), Variant::Int(_) | Variant::Float(_))
                }
                ArgType::Str => matches!(arg.variant(), Variant::Str(_)),
                ArgType::Obj => matches!(arg.variant(), Variant::Obj(_)),
                ArgType::List => matches!(arg.variant(), Variant::List(_)),
            };
            if !ok {
                return Err(E_TYPE);
            }
        }
        Ok(())
    }
}

lazy_static! {
    static ref REGISTRY: HashMap<String, Builtin> = {
        let mut map = HashMap::new();
        let all = bf_values::builtins()
            .into_iter()
            .chain(bf_num::builtins())
            .chain(bf_strings::builtins())
            .chain(bf_list_sets::builtins())
            .chain(bf_objects::builtins())
            .chain(bf_properties::builtins())
            .chain(bf_verbs::builtins())
            .chain(bf_server::builtins());
        for b in all {
            let prior = map.insert(b.name.to_string(), b);
            assert!(prior.is_none(), "duplicate builtin registration");
        }
        map
    };
}

#[must_use]
pub fn is_builtin_name(name: &Symbol) -> bool {
    REGISTRY.contains_key(&name.as_str().to_ascii_lowercase())
}

/// Validate and invoke a builtin, recording the invocation as a frame so it
/// shows up in `callers()` and tracebacks.
pub fn dispatch(exec: &mut Exec, name: &Symbol, args: Vec<Var>) -> ExecResult<Var> {
    exec.tick()?;
    let key = name.as_str().to_ascii_lowercase();
    let Some(builtin) = REGISTRY.get(&key) else {
        return Err(exec.raise_msg(E_INVARG, &format!("Unknown built-in function: {name}")));
    };

    if exec.options().protected_builtins.contains(name) {
        let perms = exec.perms();
        if !exec.tx().is_wizard(perms) {
            return Err(exec.raise(E_PERM));
        }
    }
    if let Err(e) = builtin.check_args(&args) {
        return Err(exec.raise(e));
    }

    let pushed = match exec.stack.last() {
        Some(top) => {
            let frame = Activation::new_for_builtin(builtin.name, top);
            exec.stack.push(frame);
            true
        }
        None => false,
    };
    let result = (builtin.func)(exec, args);
    if pushed {
        exec.stack.pop();
    }
    result
}

/// The topmost verb (non-builtin) frame, where task permissions live.
pub(crate) fn current_verb_frame(exec: &mut Exec) -> Option<&mut Activation> {
    exec.stack.iter_mut().rev().find(|a| a.builtin.is_none())
}
