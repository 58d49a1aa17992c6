use loam_values::var::error::Error;
use loam_values::var::error::Error::{E_INVARG, E_TYPE};
use loam_values::var::{
    v_bool, v_err, v_float, v_int, v_obj, v_objid, v_string, Var, Variant,
};
use loam_values::var::objid::Objid;

use crate::builtins::{ArgType, Builtin};
use crate::vm::exec::Exec;
use crate::vm::ExecResult;

fn bf_typeof(_exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    Ok(v_int(args[0].type_id() as i64))
}

fn bf_tostr(_exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let mut result = String::new();
    for a in &args {
        result.push_str(&a.to_display_string());
    }
    Ok(v_string(result))
}

fn bf_toliteral(_exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    Ok(v_string(args[0].to_literal()))
}

/// Leading-prefix integer parse, the way `toint("12abc")` ignores the tail.
fn parse_int_prefix(s: &str) -> i64 {
    let s = s.trim_start();
    let mut end = 0;
    for (i, c) in s.char_indices() {
        if c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+')) {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    s[..end].parse::<i64>().unwrap_or(0)
}

fn bf_toint(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    match args[0].variant() {
        Variant::Int(i) => Ok(v_int(*i)),
        Variant::Float(f) => Ok(v_int(*f as i64)),
        Variant::Obj(o) => Ok(v_int(o.0)),
        Variant::Err(e) => Ok(v_int(*e as i64)),
        Variant::Str(s) => Ok(v_int(parse_int_prefix(s.as_str()))),
        _ => Err(exec.raise(E_TYPE)),
    }
}

fn bf_tofloat(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    match args[0].variant() {
        Variant::Int(i) => Ok(v_float(*i as f64)),
        Variant::Float(f) => Ok(v_float(*f)),
        Variant::Err(e) => Ok(v_float(*e as i64 as f64)),
        Variant::Str(s) => Ok(v_float(s.as_str().trim().parse::<f64>().unwrap_or(0.0))),
        _ => Err(exec.raise(E_TYPE)),
    }
}

fn bf_toobj(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    match args[0].variant() {
        Variant::Int(i) => Ok(v_obj(*i)),
        Variant::Float(f) => Ok(v_obj(*f as i64)),
        Variant::Obj(o) => Ok(v_objid(*o)),
        Variant::Str(s) => {
            let s = s.as_str().trim();
            let s = s.strip_prefix('#').unwrap_or(s);
            Ok(v_obj(parse_int_prefix(s)))
        }
        _ => Err(exec.raise(E_TYPE)),
    }
}

fn bf_toerr(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    match args[0].variant() {
        Variant::Err(e) => Ok(v_err(*e)),
        Variant::Int(i) => {
            let code = u8::try_from(*i).ok().and_then(Error::from_repr);
            match code {
                Some(e) => Ok(v_err(e)),
                None => Err(exec.raise(E_INVARG)),
            }
        }
        Variant::Str(s) => match Error::parse(s.as_str()) {
            Some(e) => Ok(v_err(e)),
            None => Err(exec.raise(E_INVARG)),
        },
        _ => Err(exec.raise(E_TYPE)),
    }
}

fn bf_equal(_exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    Ok(v_bool(args[0].equal_strict(&args[1])))
}

fn bf_length(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    match args[0].variant() {
        Variant::Str(s) => Ok(v_int(s.len() as i64)),
        Variant::List(l) => Ok(v_int(l.len() as i64)),
        _ => Err(exec.raise(E_TYPE)),
    }
}

fn bf_valid_objid(args: &[Var]) -> Option<Objid> {
    match args[0].variant() {
        Variant::Obj(o) => Some(*o),
        _ => None,
    }
}

fn bf_valid(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Some(oid) = bf_valid_objid(&args) else {
        return Err(exec.raise(E_TYPE));
    };
    let valid = exec.tx().valid(oid);
    Ok(v_bool(valid))
}

fn bf_raise(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let code = args[0].clone();
    let msg = match args.get(1) {
        Some(m) => match m.variant() {
            Variant::Str(s) => s.as_str().to_string(),
            _ => return Err(exec.raise(E_TYPE)),
        },
        None => code.to_display_string(),
    };
    let value = args.get(2).cloned().unwrap_or(loam_values::var::v_none());
    Err(exec.raise_value(code, msg, value))
}

pub(crate) fn builtins() -> Vec<Builtin> {
    vec![
        Builtin {
            name: "typeof",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_typeof,
        },
        Builtin {
            name: "tostr",
            min_args: 0,
            max_args: None,
            types: &[],
            func: bf_tostr,
        },
        Builtin {
            name: "toliteral",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_toliteral,
        },
        Builtin {
            name: "toint",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_toint,
        },
        Builtin {
            name: "tonum",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_toint,
        },
        Builtin {
            name: "tofloat",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_tofloat,
        },
        Builtin {
            name: "toobj",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_toobj,
        },
        Builtin {
            name: "toerr",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_toerr,
        },
        Builtin {
            name: "equal",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Any, ArgType::Any],
            func: bf_equal,
        },
        Builtin {
            name: "length",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_length,
        },
        Builtin {
            name: "valid",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_valid,
        },
        Builtin {
            name: "raise",
            min_args: 1,
            max_args: Some(3),
            types: &[ArgType::Any, ArgType::Str, ArgType::Any],
            func: bf_raise,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::parse_int_prefix;

    #[test]
    fn test_parse_int_prefix() {
        assert_eq!(parse_int_prefix("12"), 12);
        assert_eq!(parse_int_prefix("  -3x"), -3);
        assert_eq!(parse_int_prefix("frob"), 0);
        assert_eq!(parse_int_prefix(""), 0);
    }
}
