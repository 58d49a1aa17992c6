use loam_values::var::error::Error::{E_INVARG, E_NACC, E_PERM, E_TYPE};
use loam_values::var::objid::Objid;
use loam_values::var::{v_bool, v_list, v_none, v_objid, Var, Variant};
use loam_values::NOTHING;

use crate::builtins::{ArgType, Builtin};
use crate::vm::exec::Exec;
use crate::vm::{ExecResult, Flow};

fn objid_arg(args: &[Var], n: usize) -> Objid {
    match args[n].variant() {
        Variant::Obj(o) => *o,
        _ => unreachable!("checked by signature"),
    }
}

/// Call a courtesy verb (`initialize`, `recycle`, `exitfunc`...), swallowing
/// the verb's absence and anything it raises.
fn courtesy_call(exec: &mut Exec, target: Objid, verb: &str, args: Vec<Var>) {
    if !target.is_positive() || !exec.tx().valid(target) {
        return;
    }
    match exec.call_verb(target, verb, args, None) {
        Ok(_) | Err(Flow::Raise(_)) => {}
        Err(_) => {
            // aborts must still unwind, but a courtesy call cannot; the
            // abort reasons re-check at the next tick anyway
        }
    }
}

fn bf_create(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let parent = objid_arg(&args, 0);
    if parent != NOTHING && !exec.tx().valid(parent) {
        return Err(exec.raise(E_INVARG));
    }
    let perms = exec.perms();
    let owner = match args.get(1) {
        Some(v) => match v.variant() {
            Variant::Obj(o) => {
                // Handing ownership elsewhere is a wizard affair.
                if *o != perms && *o != NOTHING && !exec.tx().is_wizard(perms) {
                    return Err(exec.raise(E_PERM));
                }
                *o
            }
            _ => return Err(exec.raise(E_TYPE)),
        },
        None => perms,
    };
    let created = match exec.tx().create_object(perms, parent, owner) {
        Ok(o) => o,
        Err(e) => return Err(exec.raise_ws(e)),
    };
    courtesy_call(exec, created, "initialize", vec![]);
    Ok(v_objid(created))
}

fn bf_recycle(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let victim = objid_arg(&args, 0);
    if !exec.tx().valid(victim) {
        return Err(exec.raise(E_INVARG));
    }
    let perms = exec.perms();
    match exec.tx().controls(perms, victim) {
        Ok(true) => {}
        Ok(false) => return Err(exec.raise(E_PERM)),
        Err(e) => return Err(exec.raise_ws(e)),
    }
    courtesy_call(exec, victim, "recycle", vec![]);
    // Contents get their exit courtesy as they are dumped.
    if let Ok(contents) = exec.tx().contents_of(victim) {
        for c in contents {
            courtesy_call(exec, c, "exitfunc", vec![v_objid(victim)]);
        }
    }
    match exec.tx().recycle_object(perms, victim) {
        Ok(()) => Ok(v_none()),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_parent(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    match exec.tx().parent_of(oid) {
        Ok(p) => Ok(v_objid(p)),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_children(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    match exec.tx().children_of(oid) {
        Ok(children) => Ok(v_list(children.into_iter().map(v_objid).collect())),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_chparent(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let new_parent = objid_arg(&args, 1);
    if !exec.tx().valid(oid) {
        return Err(exec.raise(E_INVARG));
    }
    if new_parent != NOTHING && !exec.tx().valid(new_parent) {
        return Err(exec.raise(E_INVARG));
    }
    let perms = exec.perms();
    match exec.tx().change_parent(perms, oid, new_parent) {
        Ok(()) => Ok(v_none()),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_move(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let what = objid_arg(&args, 0);
    let whereto = objid_arg(&args, 1);
    if !exec.tx().valid(what) {
        return Err(exec.raise(E_INVARG));
    }
    let perms = exec.perms();
    match exec.tx().controls(perms, what) {
        Ok(true) => {}
        Ok(false) => return Err(exec.raise(E_PERM)),
        Err(e) => return Err(exec.raise_ws(e)),
    }
    // The destination gets a veto through its `accept` verb; wizards are not
    // refused.
    if whereto != NOTHING && !exec.tx().is_wizard(perms) {
        let accepted = match exec.call_verb(whereto, "accept", vec![v_objid(what)], None) {
            Ok(v) => v.is_true(),
            Err(Flow::Raise(_)) => false,
            Err(flow) => return Err(flow),
        };
        if !accepted {
            return Err(exec.raise(E_NACC));
        }
    }
    let old_loc = exec.tx().location_of(what).unwrap_or(NOTHING);
    if old_loc == whereto {
        return Ok(v_none());
    }
    match exec.tx().move_object(what, whereto) {
        Ok(()) => {}
        Err(e) => return Err(exec.raise_ws(e)),
    }
    courtesy_call(exec, old_loc, "exitfunc", vec![v_objid(what)]);
    courtesy_call(exec, whereto, "enterfunc", vec![v_objid(what)]);
    Ok(v_none())
}

fn bf_players(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    let players = exec.tx().players();
    Ok(v_list(players.into_iter().map(v_objid).collect()))
}

fn bf_is_player(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    if !exec.tx().valid(oid) {
        return Err(exec.raise(E_INVARG));
    }
    let is_player = exec.tx().is_player(oid);
    Ok(v_bool(is_player))
}

fn bf_set_player_flag(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let perms = exec.perms();
    if !exec.tx().is_wizard(perms) {
        return Err(exec.raise(E_PERM));
    }
    if !exec.tx().valid(oid) {
        return Err(exec.raise(E_INVARG));
    }
    let on = args[1].is_true();
    match exec.tx().set_player_flag(oid, on) {
        Ok(()) => Ok(v_none()),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_max_object(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    let max = exec.tx().max_object();
    Ok(v_objid(max))
}

fn bf_renumber(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let perms = exec.perms();
    if !exec.tx().is_wizard(perms) {
        return Err(exec.raise(E_PERM));
    }
    if !exec.tx().valid(oid) {
        return Err(exec.raise(E_INVARG));
    }
    match exec.tx().renumber_object(oid) {
        Ok(new_id) => Ok(v_objid(new_id)),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

pub(crate) fn builtins() -> Vec<Builtin> {
    vec![
        Builtin {
            name: "create",
            min_args: 1,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Any],
            func: bf_create,
        },
        Builtin {
            name: "recycle",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_recycle,
        },
        Builtin {
            name: "parent",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_parent,
        },
        Builtin {
            name: "children",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_children,
        },
        Builtin {
            name: "chparent",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Obj],
            func: bf_chparent,
        },
        Builtin {
            name: "move",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Obj],
            func: bf_move,
        },
        Builtin {
            name: "players",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_players,
        },
        Builtin {
            name: "is_player",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_is_player,
        },
        Builtin {
            name: "set_player_flag",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Any],
            func: bf_set_player_flag,
        },
        Builtin {
            name: "max_object",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_max_object,
        },
        Builtin {
            name: "renumber",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_renumber,
        },
    ]
}
