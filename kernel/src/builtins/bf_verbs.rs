use loam_values::model::r#match::{
    parse_preposition_spec, preposition_to_string, ArgSpec, VerbArgsSpec,
};
use loam_values::model::verbs::{verb_flags_parse, verb_flags_string};
use loam_values::var::error::Error::{E_INVARG, E_PERM, E_TYPE};
use loam_values::var::objid::Objid;
use loam_values::var::{v_int, v_list, v_none, v_objid, v_str, v_string, Var, Variant};

use crate::db::tx::VerbDesc;
use crate::builtins::{ArgType, Builtin};
use crate::vm::exec::Exec;
use crate::vm::ExecResult;

fn objid_arg(args: &[Var], n: usize) -> Objid {
    match args[n].variant() {
        Variant::Obj(o) => *o,
        _ => unreachable!("checked by signature"),
    }
}

/// A verb descriptor: a name string, or an index. Numeric strings count as
/// indices only when the server option allows them.
fn verb_desc(exec: &mut Exec, v: &Var) -> Result<VerbDesc, ()> {
    match v.variant() {
        Variant::Int(n) => {
            if *n < 1 {
                return Err(());
            }
            Ok(VerbDesc::Index(*n as usize))
        }
        Variant::Str(s) => {
            let s = s.as_str();
            if exec.options().support_numeric_verbname_strings {
                if let Ok(n) = s.trim().parse::<usize>() {
                    return Ok(VerbDesc::Index(n));
                }
            }
            Ok(VerbDesc::Name(s.to_string()))
        }
        _ => Err(()),
    }
}

fn bf_verbs(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    if !exec.tx().valid(oid) {
        return Err(exec.raise(E_INVARG));
    }
    let perms = exec.perms();
    match exec.tx().verb_names(perms, oid) {
        Ok(names) => Ok(v_list(names.iter().map(|n| v_str(n)).collect())),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_verb_info(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let Ok(desc) = verb_desc(exec, &args[1]) else {
        return Err(exec.raise(E_TYPE));
    };
    let perms = exec.perms();
    match exec.tx().get_verbdef(perms, oid, &desc) {
        Ok(vd) => Ok(v_list(vec![
            v_objid(vd.owner),
            v_string(verb_flags_string(vd.flags)),
            v_string(vd.names_string()),
        ])),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_set_verb_info(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let Ok(desc) = verb_desc(exec, &args[1]) else {
        return Err(exec.raise(E_TYPE));
    };
    let Variant::List(info) = args[2].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    if info.len() != 3 {
        return Err(exec.raise(E_INVARG));
    }
    let Variant::Obj(owner) = info[0].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    let Variant::Str(flag_str) = info[1].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    let Variant::Str(names) = info[2].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    let Some(flags) = verb_flags_parse(flag_str.as_str()) else {
        return Err(exec.raise(E_INVARG));
    };
    let names: Vec<String> = names
        .as_str()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    if names.is_empty() {
        return Err(exec.raise(E_INVARG));
    }
    let perms = exec.perms();
    let owner = *owner;
    match exec
        .tx()
        .set_verb_info(perms, oid, &desc, Some(owner), Some(flags), Some(names))
    {
        Ok(()) => Ok(v_none()),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn args_spec_to_list(spec: &VerbArgsSpec) -> Var {
    v_list(vec![
        v_str(spec.dobj.to_string()),
        v_str(preposition_to_string(&spec.prep)),
        v_str(spec.iobj.to_string()),
    ])
}

fn parse_args_spec(v: &Var) -> Option<VerbArgsSpec> {
    let Variant::List(l) = v.variant() else {
        return None;
    };
    if l.len() != 3 {
        return None;
    }
    let Variant::Str(dobj) = l[0].variant() else {
        return None;
    };
    let Variant::Str(prep) = l[1].variant() else {
        return None;
    };
    let Variant::Str(iobj) = l[2].variant() else {
        return None;
    };
    Some(VerbArgsSpec {
        dobj: ArgSpec::from_string(dobj.as_str())?,
        prep: parse_preposition_spec(prep.as_str())?,
        iobj: ArgSpec::from_string(iobj.as_str())?,
    })
}

fn bf_verb_args(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let Ok(desc) = verb_desc(exec, &args[1]) else {
        return Err(exec.raise(E_TYPE));
    };
    let perms = exec.perms();
    match exec.tx().get_verbdef(perms, oid, &desc) {
        Ok(vd) => Ok(args_spec_to_list(&vd.args)),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_set_verb_args(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let Ok(desc) = verb_desc(exec, &args[1]) else {
        return Err(exec.raise(E_TYPE));
    };
    let Some(spec) = parse_args_spec(&args[2]) else {
        return Err(exec.raise(E_INVARG));
    };
    let perms = exec.perms();
    match exec.tx().set_verb_args(perms, oid, &desc, spec) {
        Ok(()) => Ok(v_none()),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_add_verb(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let Variant::List(info) = args[1].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    if info.len() != 3 {
        return Err(exec.raise(E_INVARG));
    }
    let Variant::Obj(owner) = info[0].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    let Variant::Str(flag_str) = info[1].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    let Variant::Str(names) = info[2].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    let Some(flags) = verb_flags_parse(flag_str.as_str()) else {
        return Err(exec.raise(E_INVARG));
    };
    let Some(spec) = parse_args_spec(&args[2]) else {
        return Err(exec.raise(E_INVARG));
    };
    let names: Vec<String> = names
        .as_str()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    let perms = exec.perms();
    let owner = *owner;
    if !exec.tx().is_programmer(perms) {
        return Err(exec.raise(E_PERM));
    }
    match exec.tx().add_verb(perms, oid, names, owner, flags, spec) {
        Ok(()) => Ok(v_int(0)),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_delete_verb(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let Ok(desc) = verb_desc(exec, &args[1]) else {
        return Err(exec.raise(E_TYPE));
    };
    let perms = exec.perms();
    match exec.tx().delete_verb(perms, oid, &desc) {
        Ok(()) => Ok(v_none()),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_pass(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    exec.pass_verb(args)
}

pub(crate) fn builtins() -> Vec<Builtin> {
    vec![
        Builtin {
            name: "verbs",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_verbs,
        },
        Builtin {
            name: "verb_info",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Any],
            func: bf_verb_info,
        },
        Builtin {
            name: "set_verb_info",
            min_args: 3,
            max_args: Some(3),
            types: &[ArgType::Obj, ArgType::Any, ArgType::List],
            func: bf_set_verb_info,
        },
        Builtin {
            name: "verb_args",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Any],
            func: bf_verb_args,
        },
        Builtin {
            name: "set_verb_args",
            min_args: 3,
            max_args: Some(3),
            types: &[ArgType::Obj, ArgType::Any, ArgType::List],
            func: bf_set_verb_args,
        },
        Builtin {
            name: "add_verb",
            min_args: 3,
            max_args: Some(3),
            types: &[ArgType::Obj, ArgType::List, ArgType::List],
            func: bf_add_verb,
        },
        Builtin {
            name: "delete_verb",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Any],
            func: bf_delete_verb,
        },
        Builtin {
            name: "pass",
            min_args: 0,
            max_args: None,
            types: &[],
            func: bf_pass,
        },
    ]
}
