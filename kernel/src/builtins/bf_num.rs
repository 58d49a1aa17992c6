use loam_values::var::error::Error::{E_INVARG, E_TYPE};
use loam_values::var::{v_float, v_int, v_string, Var, Variant};

use crate::builtins::{ArgType, Builtin};
use crate::vm::exec::Exec;
use crate::vm::ExecResult;

fn bf_abs(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    match args[0].variant() {
        Variant::Int(i) => Ok(v_int(i.wrapping_abs())),
        Variant::Float(f) => Ok(v_float(f.abs())),
        _ => Err(exec.raise(E_TYPE)),
    }
}

fn minmax(exec: &mut Exec, args: Vec<Var>, want_max: bool) -> ExecResult<Var> {
    let mut best = args[0].clone();
    for candidate in &args[1..] {
        let ord = match best.compare(candidate) {
            Ok(o) => o,
            Err(e) => return Err(exec.raise(e)),
        };
        let replace = if want_max { ord.is_lt() } else { ord.is_gt() };
        if replace {
            best = candidate.clone();
        }
    }
    Ok(best)
}

fn bf_min(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    minmax(exec, args, false)
}

fn bf_max(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    minmax(exec, args, true)
}

fn bf_random(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let limit = match args.first() {
        Some(v) => match v.variant() {
            Variant::Int(n) => *n,
            _ => return Err(exec.raise(E_TYPE)),
        },
        None => i64::from(i32::MAX),
    };
    if limit < 1 {
        return Err(exec.raise(E_INVARG));
    }
    Ok(v_int(exec.random_int(limit)))
}

fn bf_sqrt(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let f = match args[0].variant() {
        Variant::Int(i) => *i as f64,
        Variant::Float(f) => *f,
        _ => return Err(exec.raise(E_TYPE)),
    };
    if f < 0.0 {
        return Err(exec.raise(E_INVARG));
    }
    Ok(v_float(f.sqrt()))
}

fn bf_floatstr(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let f = match args[0].variant() {
        Variant::Float(f) => *f,
        Variant::Int(i) => *i as f64,
        _ => return Err(exec.raise(E_TYPE)),
    };
    let Variant::Int(precision) = args[1].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    if *precision < 0 {
        return Err(exec.raise(E_INVARG));
    }
    let precision = (*precision as usize).min(19);
    let scientific = args.get(2).map(|v| v.is_true()).unwrap_or(false);
    let s = if scientific {
        format!("{f:.precision$e}")
    } else {
        format!("{f:.precision$}")
    };
    Ok(v_string(s))
}

pub(crate) fn builtins() -> Vec<Builtin> {
    vec![
        Builtin {
            name: "abs",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Num],
            func: bf_abs,
        },
        Builtin {
            name: "min",
            min_args: 1,
            max_args: None,
            types: &[ArgType::Num],
            func: bf_min,
        },
        Builtin {
            name: "max",
            min_args: 1,
            max_args: None,
            types: &[ArgType::Num],
            func: bf_max,
        },
        Builtin {
            name: "random",
            min_args: 0,
            max_args: Some(1),
            types: &[ArgType::Int],
            func: bf_random,
        },
        Builtin {
            name: "sqrt",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Num],
            func: bf_sqrt,
        },
        Builtin {
            name: "floatstr",
            min_args: 2,
            max_args: Some(3),
            types: &[ArgType::Num, ArgType::Int, ArgType::Any],
            func: bf_floatstr,
        },
    ]
}
