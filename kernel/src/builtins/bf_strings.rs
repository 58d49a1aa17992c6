use loam_values::util::bytes::{decode_binary, encode_binary};
use loam_values::var::error::Error::{E_INVARG, E_TYPE};
use loam_values::var::{v_int, v_list, v_string, Var, Variant};

use crate::builtins::{ArgType, Builtin};
use crate::vm::exec::Exec;
use crate::vm::ExecResult;

fn case_fold(s: &str, case_matters: bool) -> String {
    if case_matters {
        s.to_string()
    } else {
        s.to_ascii_lowercase()
    }
}

fn bf_strsub(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let (Variant::Str(subject), Variant::Str(what), Variant::Str(with)) =
        (args[0].variant(), args[1].variant(), args[2].variant())
    else {
        return Err(exec.raise(E_TYPE));
    };
    let case_matters = args.get(3).map(|v| v.is_true()).unwrap_or(false);
    if what.is_empty() {
        return Err(exec.raise(E_INVARG));
    }
    let subject = subject.as_str();
    let what_folded = case_fold(what.as_str(), case_matters);
    let folded = case_fold(subject, case_matters);

    let mut result = String::new();
    let mut pos = 0;
    while let Some(found) = folded[pos..].find(&what_folded) {
        let at = pos + found;
        result.push_str(&subject[pos..at]);
        result.push_str(with.as_str());
        pos = at + what_folded.len();
    }
    result.push_str(&subject[pos..]);
    Ok(v_string(result))
}

fn str_index(exec: &mut Exec, args: Vec<Var>, reverse: bool) -> ExecResult<Var> {
    let (Variant::Str(subject), Variant::Str(what)) = (args[0].variant(), args[1].variant())
    else {
        return Err(exec.raise(E_TYPE));
    };
    let case_matters = args.get(2).map(|v| v.is_true()).unwrap_or(false);
    let subject = case_fold(subject.as_str(), case_matters);
    let what = case_fold(what.as_str(), case_matters);
    if what.is_empty() {
        return Ok(v_int(0));
    }
    let found = if reverse {
        subject.rfind(&what)
    } else {
        subject.find(&what)
    };
    Ok(v_int(found.map(|i| i as i64 + 1).unwrap_or(0)))
}

fn bf_index(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    str_index(exec, args, false)
}

fn bf_rindex(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    str_index(exec, args, true)
}

fn bf_strcmp(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let (Variant::Str(a), Variant::Str(b)) = (args[0].variant(), args[1].variant()) else {
        return Err(exec.raise(E_TYPE));
    };
    Ok(v_int(match a.as_str().cmp(b.as_str()) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))
}

fn bf_decode_binary(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Variant::Str(s) = args[0].variant() else {
        return Err(exec.raise(E_TYPE));
    };
    let fully = args.get(1).map(|v| v.is_true()).unwrap_or(false);
    let bytes = match decode_binary(s.as_str()) {
        Ok(b) => b,
        Err(_) => return Err(exec.raise(E_INVARG)),
    };
    if fully {
        return Ok(v_list(bytes.iter().map(|b| v_int(i64::from(*b))).collect()));
    }
    // Runs of printable characters come back as strings, everything else as
    // individual integers.
    let mut out = vec![];
    let mut run = String::new();
    for b in bytes {
        if (0x20..=0x7e).contains(&b) || b == b'\t' {
            run.push(b as char);
        } else {
            if !run.is_empty() {
                out.push(v_string(std::mem::take(&mut run)));
            }
            out.push(v_int(i64::from(b)));
        }
    }
    if !run.is_empty() {
        out.push(v_string(run));
    }
    Ok(v_list(out))
}

fn encode_one(v: &Var, out: &mut Vec<u8>) -> Result<(), ()> {
    match v.variant() {
        Variant::Int(i) => {
            let b = u8::try_from(*i).map_err(|_| ())?;
            out.push(b);
            Ok(())
        }
        Variant::Str(s) => {
            out.extend_from_slice(s.as_str().as_bytes());
            Ok(())
        }
        Variant::List(l) => {
            for item in l.iter() {
                encode_one(item, out)?;
            }
            Ok(())
        }
        _ => Err(()),
    }
}

fn bf_encode_binary(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let mut bytes = vec![];
    for a in &args {
        if encode_one(a, &mut bytes).is_err() {
            return Err(exec.raise(E_INVARG));
        }
    }
    Ok(v_string(encode_binary(&bytes)))
}

pub(crate) fn builtins() -> Vec<Builtin> {
    vec![
        Builtin {
            name: "strsub",
            min_args: 3,
            max_args: Some(4),
            types: &[ArgType::Str, ArgType::Str, ArgType::Str, ArgType::Any],
            func: bf_strsub,
        },
        Builtin {
            name: "index",
            min_args: 2,
            max_args: Some(3),
            types: &[ArgType::Str, ArgType::Str, ArgType::Any],
            func: bf_index,
        },
        Builtin {
            name: "rindex",
            min_args: 2,
            max_args: Some(3),
            types: &[ArgType::Str, ArgType::Str, ArgType::Any],
            func: bf_rindex,
        },
        Builtin {
            name: "strcmp",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Str, ArgType::Str],
            func: bf_strcmp,
        },
        Builtin {
            name: "decode_binary",
            min_args: 1,
            max_args: Some(2),
            types: &[ArgType::Str, ArgType::Any],
            func: bf_decode_binary,
        },
        Builtin {
            name: "encode_binary",
            min_args: 0,
            max_args: None,
            types: &[],
            func: bf_encode_binary,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::case_fold;

    #[test]
    fn test_case_fold() {
        assert_eq!(case_fold("FooBar", false), "foobar");
        assert_eq!(case_fold("FooBar", true), "FooBar");
    }
}
