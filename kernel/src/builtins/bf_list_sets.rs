use loam_values::var::error::Error::{E_RANGE, E_TYPE};
use loam_values::var::{v_int, v_listv, Var, Variant};

use crate::builtins::{ArgType, Builtin};
use crate::vm::exec::Exec;
use crate::vm::ExecResult;

fn bf_is_member(_exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Variant::List(l) = args[1].variant() else {
        unreachable!("checked by signature");
    };
    let pos = l.iter().position(|x| x.equal_strict(&args[0]));
    Ok(v_int(pos.map(|i| i as i64 + 1).unwrap_or(0)))
}

fn bf_listappend(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Variant::List(l) = args[0].variant() else {
        unreachable!("checked by signature");
    };
    let index = match args.get(2) {
        Some(v) => match v.variant() {
            Variant::Int(i) => *i,
            _ => return Err(exec.raise(E_TYPE)),
        },
        None => l.len() as i64,
    };
    if index < 0 || index > l.len() as i64 {
        return Err(exec.raise(E_RANGE));
    }
    Ok(v_listv(l.insert(index as usize, args[1].clone())))
}

fn bf_listinsert(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Variant::List(l) = args[0].variant() else {
        unreachable!("checked by signature");
    };
    let index = match args.get(2) {
        Some(v) => match v.variant() {
            Variant::Int(i) => *i,
            _ => return Err(exec.raise(E_TYPE)),
        },
        None => 1,
    };
    if index < 1 || index > l.len() as i64 + 1 {
        return Err(exec.raise(E_RANGE));
    }
    Ok(v_listv(l.insert((index - 1) as usize, args[1].clone())))
}

fn bf_listdelete(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Variant::List(l) = args[0].variant() else {
        unreachable!("checked by signature");
    };
    let Variant::Int(index) = args[1].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    if *index < 1 || *index > l.len() as i64 {
        return Err(exec.raise(E_RANGE));
    }
    Ok(v_listv(l.remove_at((*index - 1) as usize)))
}

fn bf_listset(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Variant::List(l) = args[0].variant() else {
        unreachable!("checked by signature");
    };
    let Variant::Int(index) = args[2].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    if *index < 1 || *index > l.len() as i64 {
        return Err(exec.raise(E_RANGE));
    }
    Ok(v_listv(l.set((*index - 1) as usize, args[1].clone())))
}

fn bf_setadd(_exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Variant::List(l) = args[0].variant() else {
        unreachable!("checked by signature");
    };
    if l.contains(&args[1]) {
        return Ok(args[0].clone());
    }
    Ok(v_listv(l.push(args[1].clone())))
}

fn bf_setremove(_exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Variant::List(l) = args[0].variant() else {
        unreachable!("checked by signature");
    };
    Ok(v_listv(l.remove_value(&args[1])))
}

pub(crate) fn builtins() -> Vec<Builtin> {
    vec![
        Builtin {
            name: "is_member",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Any, ArgType::List],
            func: bf_is_member,
        },
        Builtin {
            name: "listappend",
            min_args: 2,
            max_args: Some(3),
            types: &[ArgType::List, ArgType::Any, ArgType::Int],
            func: bf_listappend,
        },
        Builtin {
            name: "listinsert",
            min_args: 2,
            max_args: Some(3),
            types: &[ArgType::List, ArgType::Any, ArgType::Int],
            func: bf_listinsert,
        },
        Builtin {
            name: "listdelete",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::List, ArgType::Int],
            func: bf_listdelete,
        },
        Builtin {
            name: "listset",
            min_args: 3,
            max_args: Some(3),
            types: &[ArgType::List, ArgType::Any, ArgType::Int],
            func: bf_listset,
        },
        Builtin {
            name: "setadd",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::List, ArgType::Any],
            func: bf_setadd,
        },
        Builtin {
            name: "setremove",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::List, ArgType::Any],
            func: bf_setremove,
        },
    ]
}

