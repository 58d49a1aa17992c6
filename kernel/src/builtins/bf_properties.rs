use loam_values::model::props::{prop_flags_parse, prop_flags_string};
use loam_values::var::error::Error::{E_INVARG, E_PERM};
use loam_values::var::objid::Objid;
use loam_values::var::{v_list, v_none, v_objid, v_str, v_string, Symbol, Var, Variant};

use crate::builtins::{ArgType, Builtin};
use crate::vm::exec::Exec;
use crate::vm::ExecResult;

fn objid_arg(args: &[Var], n: usize) -> Objid {
    match args[n].variant() {
        Variant::Obj(o) => *o,
        _ => unreachable!("checked by signature"),
    }
}

fn name_arg(args: &[Var], n: usize) -> Symbol {
    match args[n].variant() {
        Variant::Str(s) => Symbol::mk(s.as_str()),
        _ => unreachable!("checked by signature"),
    }
}

/// Unpack a `{owner, perms [, new-name]}` property info list.
fn parse_propinfo(
    info: &Var,
) -> Option<(Objid, loam_values::model::props::PropFlags, Option<Symbol>)> {
    let Variant::List(info) = info.variant() else {
        return None;
    };
    if info.len() < 2 || info.len() > 3 {
        return None;
    }
    let Variant::Obj(owner) = info[0].variant() else {
        return None;
    };
    let Variant::Str(perms) = info[1].variant() else {
        return None;
    };
    let flags = prop_flags_parse(perms.as_str())?;
    let new_name = match info.get(2) {
        Some(v) => match v.variant() {
            Variant::Str(s) => Some(Symbol::mk(s.as_str())),
            _ => return None,
        },
        None => None,
    };
    Some((*owner, flags, new_name))
}

fn bf_properties(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    if !exec.tx().valid(oid) {
        return Err(exec.raise(E_INVARG));
    }
    let perms = exec.perms();
    let readable = exec
        .tx()
        .flags_of(oid)
        .map(|f| f.contains(loam_values::model::objects::ObjFlag::Read))
        .unwrap_or(false);
    let controls = exec.tx().controls(perms, oid).unwrap_or(false);
    if !readable && !controls {
        return Err(exec.raise(E_PERM));
    }
    let names = match exec.tx().property_names(oid) {
        Ok(names) => names,
        Err(e) => return Err(exec.raise_ws(e)),
    };
    Ok(v_list(
        names.iter().map(|n| v_str(n.as_str())).collect(),
    ))
}

fn bf_property_info(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let name = name_arg(&args, 1);
    let perms = exec.perms();
    match exec.tx().property_info(perms, oid, &name) {
        Ok((owner, flags)) => Ok(v_list(vec![
            v_objid(owner),
            v_string(prop_flags_string(flags)),
        ])),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_set_property_info(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let name = name_arg(&args, 1);
    let Some((owner, flags, new_name)) = parse_propinfo(&args[2]) else {
        return Err(exec.raise(E_INVARG));
    };
    let perms = exec.perms();
    match exec
        .tx()
        .set_property_info(perms, oid, &name, owner, flags, new_name)
    {
        Ok(()) => Ok(v_none()),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_add_property(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let name = name_arg(&args, 1);
    let value = args[2].clone();
    let Some((owner, flags, new_name)) = parse_propinfo(&args[3]) else {
        return Err(exec.raise(E_INVARG));
    };
    if new_name.is_some() {
        return Err(exec.raise(E_INVARG));
    }
    let perms = exec.perms();
    match exec
        .tx()
        .define_property(perms, oid, &name, owner, flags, Some(value))
    {
        Ok(()) => Ok(v_none()),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_delete_property(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let name = name_arg(&args, 1);
    let perms = exec.perms();
    match exec.tx().delete_property(perms, oid, &name) {
        Ok(()) => Ok(v_none()),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_clear_property(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let name = name_arg(&args, 1);
    let perms = exec.perms();
    match exec.tx().clear_property(perms, oid, &name) {
        Ok(()) => Ok(v_none()),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

fn bf_is_clear_property(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let oid = objid_arg(&args, 0);
    let name = name_arg(&args, 1);
    let perms = exec.perms();
    match exec.tx().is_property_clear(perms, oid, &name) {
        Ok(clear) => Ok(loam_values::var::v_bool(clear)),
        Err(e) => Err(exec.raise_ws(e)),
    }
}

pub(crate) fn builtins() -> Vec<Builtin> {
    vec![
        Builtin {
            name: "properties",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_properties,
        },
        Builtin {
            name: "property_info",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Str],
            func: bf_property_info,
        },
        Builtin {
            name: "set_property_info",
            min_args: 3,
            max_args: Some(3),
            types: &[ArgType::Obj, ArgType::Str, ArgType::List],
            func: bf_set_property_info,
        },
        Builtin {
            name: "add_property",
            min_args: 4,
            max_args: Some(4),
            types: &[ArgType::Obj, ArgType::Str, ArgType::Any, ArgType::List],
            func: bf_add_property,
        },
        Builtin {
            name: "delete_property",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Str],
            func: bf_delete_property,
        },
        Builtin {
            name: "clear_property",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Str],
            func: bf_clear_property,
        },
        Builtin {
            name: "is_clear_property",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Str],
            func: bf_is_clear_property,
        },
    ]
}

