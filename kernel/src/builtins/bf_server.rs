//! Task, network and system builtins: everything that touches the
//! scheduler, the connection registry or the world itself.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

use loam_values::util::bytes::decode_binary;
use loam_values::var::error::Error::{E_INVARG, E_PERM, E_TYPE};
use loam_values::var::objid::Objid;
use loam_values::var::{
    v_bool, v_int, v_list, v_none, v_objid, v_str, v_string, Symbol, Var, Variant,
};
use loam_values::NOTHING;

use crate::builtins::{current_verb_frame, ArgType, Builtin};
use crate::tasks::connections::{ConnectionHandle, ConnectionMessage};
use crate::tasks::DeferredAction;
use crate::vm::activation::Activation;
use crate::vm::exec::Exec;
use crate::vm::{ExecResult, Flow, TaskAbortReason};
use crate::world::Listener;

fn objid_arg(args: &[Var], n: usize) -> Objid {
    match args[n].variant() {
        Variant::Obj(o) => *o,
        _ => unreachable!("checked by signature"),
    }
}

/// The non-builtin frames, innermost last.
fn verb_frames(exec: &Exec) -> Vec<&Activation> {
    exec.stack.iter().filter(|a| a.builtin.is_none()).collect()
}

fn wizard_check(exec: &mut Exec) -> ExecResult<()> {
    let perms = exec.perms();
    if !exec.tx().is_wizard(perms) {
        return Err(exec.raise(E_PERM));
    }
    Ok(())
}

/// Wizard, or acting on oneself.
fn self_or_wizard_check(exec: &mut Exec, who: Objid) -> ExecResult<()> {
    let perms = exec.perms();
    if perms == who {
        return Ok(());
    }
    if !exec.tx().is_wizard(perms) {
        return Err(exec.raise(E_PERM));
    }
    Ok(())
}

fn connection_for(exec: &mut Exec, who: Objid) -> ExecResult<std::sync::Arc<ConnectionHandle>> {
    match exec.world.connections.get(who) {
        Some(conn) => Ok(conn),
        None => Err(exec.raise(E_INVARG)),
    }
}

// -- task builtins ----------------------------------------------------------

fn bf_task_id(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    Ok(v_int(exec.task_id))
}

fn bf_ticks_left(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    Ok(v_int(exec.ticks_remaining.max(0)))
}

fn bf_seconds_left(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    Ok(v_int(exec.seconds_left().as_secs() as i64))
}

fn bf_suspend(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let delay = match args.first() {
        Some(v) => match v.variant() {
            Variant::Int(secs) if *secs >= 0 => Some(Duration::from_secs(*secs as u64)),
            Variant::Float(secs) if *secs >= 0.0 => Some(Duration::from_secs_f64(*secs)),
            _ => return Err(exec.raise(E_INVARG)),
        },
        None => None,
    };
    exec.suspend(delay)
}

fn bf_read(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = match args.first() {
        Some(v) => match v.variant() {
            Variant::Obj(o) => *o,
            _ => return Err(exec.raise(E_TYPE)),
        },
        None => exec.player,
    };
    if who != exec.player {
        wizard_check(exec)?;
    }
    exec.read_line(who)
}

fn bf_resume(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Variant::Int(task_id) = args[0].variant() else {
        unreachable!("checked by signature");
    };
    let task_id = *task_id;
    let value = args.get(1).cloned().unwrap_or(v_int(0));
    let Some(owner) = exec.scheduler.task_perms(task_id) else {
        return Err(exec.raise(E_INVARG));
    };
    self_or_wizard_check(exec, owner)?;
    match exec.scheduler.resume_task(task_id, value) {
        Ok(()) => Ok(v_none()),
        Err(_) => Err(exec.raise(E_INVARG)),
    }
}

fn bf_kill_task(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let Variant::Int(task_id) = args[0].variant() else {
        unreachable!("checked by signature");
    };
    let task_id = *task_id;
    if task_id == exec.task_id {
        // Suicide aborts right here.
        return Err(Flow::Abort(TaskAbortReason::Kill));
    }
    let Some(owner) = exec.scheduler.task_perms(task_id) else {
        return Err(exec.raise(E_INVARG));
    };
    self_or_wizard_check(exec, owner)?;
    match exec.scheduler.kill_task(task_id) {
        Ok(()) => Ok(v_none()),
        Err(_) => Err(exec.raise(E_INVARG)),
    }
}

fn bf_queued_tasks(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    let perms = exec.perms();
    let all = exec.tx().is_wizard(perms);
    let tasks = exec.scheduler.queued_tasks(perms, all);
    let entries = tasks
        .into_iter()
        .map(|t| {
            let start = t
                .start_time
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            v_list(vec![
                v_int(t.task_id),
                v_int(start),
                v_int(0),
                v_int(0),
                v_objid(t.perms),
                v_objid(t.verb_definer),
                v_string(t.verb_name),
                v_int(i64::from(t.line_number)),
                v_objid(t.this),
            ])
        })
        .collect();
    Ok(v_list(entries))
}

fn bf_queue_info(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    match args.first() {
        None => {
            wizard_check(exec)?;
            let tasks = exec.scheduler.queued_tasks(NOTHING, true);
            let mut owners: Vec<Objid> = tasks.into_iter().map(|t| t.perms).collect();
            owners.sort();
            owners.dedup();
            Ok(v_list(owners.into_iter().map(v_objid).collect()))
        }
        Some(v) => {
            let Variant::Obj(who) = v.variant() else {
                return Err(exec.raise(E_TYPE));
            };
            let who = *who;
            self_or_wizard_check(exec, who)?;
            Ok(v_int(exec.scheduler.queued_count_for(who) as i64))
        }
    }
}

fn bf_callers(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    let frames = verb_frames(exec);
    // everything above the current verb frame, innermost caller first
    let entries: Vec<Var> = frames
        .iter()
        .rev()
        .skip(1)
        .map(|a| {
            v_list(vec![
                v_objid(a.this),
                v_str(&a.verb_name),
                v_objid(a.permissions),
                v_objid(a.verb_definer),
                v_objid(a.player),
                v_int(i64::from(a.line_number)),
            ])
        })
        .collect();
    Ok(v_list(entries))
}

fn bf_caller_perms(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    let frames = verb_frames(exec);
    let perms = if frames.len() >= 2 {
        frames[frames.len() - 2].permissions
    } else {
        NOTHING
    };
    Ok(v_objid(perms))
}

fn bf_task_perms(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    Ok(v_objid(exec.perms()))
}

fn bf_set_task_perms(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    let perms = exec.perms();
    if who != perms && !exec.tx().is_wizard(perms) {
        return Err(exec.raise(E_PERM));
    }
    if let Some(frame) = current_verb_frame(exec) {
        frame.permissions = who;
    }
    Ok(v_none())
}

fn bf_call_function(exec: &mut Exec, mut args: Vec<Var>) -> ExecResult<Var> {
    if args.is_empty() {
        return Err(exec.raise(E_INVARG));
    }
    let name = args.remove(0);
    let Variant::Str(name) = name.variant() else {
        return Err(exec.raise(E_TYPE));
    };
    let name = Symbol::mk(name.as_str());
    crate::builtins::dispatch(exec, &name, args)
}

// -- time -------------------------------------------------------------------

fn bf_time(_exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(v_int(now))
}

fn bf_ctime(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let time = match args.first() {
        Some(v) => match v.variant() {
            Variant::Int(t) if *t >= 0 => UNIX_EPOCH + Duration::from_secs(*t as u64),
            Variant::Int(t) => UNIX_EPOCH - Duration::from_secs(t.unsigned_abs()),
            _ => return Err(exec.raise(E_TYPE)),
        },
        None => SystemTime::now(),
    };
    let date_time: DateTime<Utc> = DateTime::from(time);
    Ok(v_string(format!(
        "{} UTC",
        date_time.format("%a %b %e %H:%M:%S %Y")
    )))
}

// -- network ----------------------------------------------------------------

fn bf_notify(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    let Variant::Str(msg) = args[1].variant() else {
        unreachable!("checked by signature");
    };
    let msg = msg.as_str().to_string();
    self_or_wizard_check(exec, who)?;

    let Some(conn) = exec.world.connections.get(who) else {
        return Ok(v_none());
    };
    let binary = conn.options.lock().binary;
    let message = if binary {
        match decode_binary(&msg) {
            Ok(bytes) => ConnectionMessage::Bytes(bytes),
            Err(_) => return Err(exec.raise(E_INVARG)),
        }
    } else {
        ConnectionMessage::Text(msg)
    };
    exec.notify(who, message);
    Ok(v_none())
}

fn bf_connected_players(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let include_all = args.first().map(|v| v.is_true()).unwrap_or(false);
    Ok(v_list(
        exec.world
            .connections
            .connected(include_all)
            .into_iter()
            .map(v_objid)
            .collect(),
    ))
}

fn bf_connected_seconds(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    let conn = connection_for(exec, who)?;
    let seconds = conn
        .connected_at
        .elapsed()
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(v_int(seconds))
}

fn bf_idle_seconds(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    let conn = connection_for(exec, who)?;
    let seconds = conn
        .last_activity()
        .elapsed()
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(v_int(seconds))
}

fn bf_connection_name(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    self_or_wizard_check(exec, who)?;
    let conn = connection_for(exec, who)?;
    Ok(v_string(conn.peer_name.clone()))
}

fn bf_boot_player(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    self_or_wizard_check(exec, who)?;
    exec.deferred.push(DeferredAction::Boot { player: who });
    Ok(v_none())
}

fn bf_buffered_output_length(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    // Measured in queued items, consistently.
    match args.first() {
        Some(v) => {
            let Variant::Obj(who) = v.variant() else {
                return Err(exec.raise(E_TYPE));
            };
            let who = *who;
            let conn = connection_for(exec, who)?;
            Ok(v_int(conn.output.buffered_len() as i64))
        }
        None => Ok(v_int(
            crate::tasks::connections::OUTPUT_QUEUE_CAPACITY as i64,
        )),
    }
}

fn bf_flush_input(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    self_or_wizard_check(exec, who)?;
    let conn = connection_for(exec, who)?;
    conn.flush_input();
    Ok(v_none())
}

fn bf_output_delimiters(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    self_or_wizard_check(exec, who)?;
    let conn = connection_for(exec, who)?;
    let (prefix, suffix) = conn.delimiters.lock().clone();
    Ok(v_list(vec![v_string(prefix), v_string(suffix)]))
}

fn bf_set_connection_option(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    let Variant::Str(option) = args[1].variant() else {
        unreachable!("checked by signature");
    };
    let option = option.as_str().to_ascii_lowercase();
    let value = args[2].clone();
    self_or_wizard_check(exec, who)?;
    let conn = connection_for(exec, who)?;

    let mut opts = conn.options.lock();
    match option.as_str() {
        "binary" => opts.binary = value.is_true(),
        "hold-input" => opts.hold_input = value.is_true(),
        "disable-oob" => opts.disable_oob = value.is_true(),
        "client-echo" => {
            let on = value.is_true();
            if opts.client_echo != on {
                opts.client_echo = on;
                // IAC WILL/WON'T ECHO straight onto the wire.
                let seq = if on {
                    vec![255u8, 252, 1]
                } else {
                    vec![255u8, 251, 1]
                };
                conn.output.push(ConnectionMessage::Bytes(seq));
            }
        }
        "flush-command" => {
            let Variant::Str(cmd) = value.variant() else {
                return Err(exec.raise(E_TYPE));
            };
            opts.flush_command = cmd.as_str().to_string();
        }
        "intrinsic-commands" => {
            let Variant::List(cmds) = value.variant() else {
                return Err(exec.raise(E_TYPE));
            };
            let mut set = std::collections::HashSet::new();
            for c in cmds.iter() {
                let Variant::Str(s) = c.variant() else {
                    return Err(exec.raise(E_TYPE));
                };
                set.insert(s.as_str().to_string());
            }
            opts.intrinsic_commands = set;
        }
        _ => return Err(exec.raise(E_INVARG)),
    }
    Ok(v_none())
}

fn connection_options_list(conn: &ConnectionHandle) -> Vec<(String, Var)> {
    let opts = conn.options.lock();
    vec![
        ("binary".to_string(), v_bool(opts.binary)),
        ("hold-input".to_string(), v_bool(opts.hold_input)),
        ("disable-oob".to_string(), v_bool(opts.disable_oob)),
        ("client-echo".to_string(), v_bool(opts.client_echo)),
        (
            "flush-command".to_string(),
            v_str(&opts.flush_command),
        ),
        (
            "intrinsic-commands".to_string(),
            v_list(
                opts.intrinsic_commands
                    .iter()
                    .map(|c| v_str(c))
                    .collect(),
            ),
        ),
    ]
}

fn bf_connection_options(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    self_or_wizard_check(exec, who)?;
    let conn = connection_for(exec, who)?;
    let pairs = connection_options_list(&conn)
        .into_iter()
        .map(|(name, value)| v_list(vec![v_string(name), value]))
        .collect();
    Ok(v_list(pairs))
}

fn bf_connection_option(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    let who = objid_arg(&args, 0);
    let Variant::Str(name) = args[1].variant() else {
        unreachable!("checked by signature");
    };
    let name = name.as_str().to_ascii_lowercase();
    self_or_wizard_check(exec, who)?;
    let conn = connection_for(exec, who)?;
    for (option, value) in connection_options_list(&conn) {
        if option == name {
            return Ok(value);
        }
    }
    Err(exec.raise(E_INVARG))
}

fn bf_listen(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    wizard_check(exec)?;
    let object = objid_arg(&args, 0);
    let point = match args[1].variant() {
        Variant::Int(port) => port.to_string(),
        Variant::Str(s) => s.as_str().to_string(),
        _ => return Err(exec.raise(E_TYPE)),
    };
    let print_messages = args.get(2).map(|v| v.is_true()).unwrap_or(false);
    if !exec.tx().valid(object) {
        return Err(exec.raise(E_INVARG));
    }
    let mut listeners = exec.world.listeners.lock();
    if listeners.contains_key(&point) {
        drop(listeners);
        return Err(exec.raise(E_INVARG));
    }
    listeners.insert(
        point.clone(),
        Listener {
            object,
            endpoint: point.clone(),
            print_messages,
        },
    );
    Ok(v_string(point))
}

fn bf_unlisten(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    wizard_check(exec)?;
    let point = match args[0].variant() {
        Variant::Int(port) => port.to_string(),
        Variant::Str(s) => s.as_str().to_string(),
        _ => return Err(exec.raise(E_TYPE)),
    };
    let removed = exec.world.listeners.lock().remove(&point).is_some();
    if removed {
        Ok(v_none())
    } else {
        Err(exec.raise(E_INVARG))
    }
}

fn bf_listeners(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    let listeners = exec.world.listeners.lock();
    let mut entries: Vec<(String, Listener)> = listeners
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(v_list(
        entries
            .into_iter()
            .map(|(point, l)| {
                v_list(vec![
                    v_objid(l.object),
                    v_string(point),
                    v_bool(l.print_messages),
                ])
            })
            .collect(),
    ))
}

fn bf_open_network_connection(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    wizard_check(exec)?;
    // Outbound connections need host cooperation this build does not carry.
    Err(exec.raise_msg(loam_values::var::error::Error::E_QUOTA, "Not yet implemented"))
}

// -- system -----------------------------------------------------------------

fn bf_server_version(_exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    Ok(v_string(format!("loam {}", env!("CARGO_PKG_VERSION"))))
}

fn bf_shutdown(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    wizard_check(exec)?;
    let message = match args.first() {
        Some(v) => match v.variant() {
            Variant::Str(s) => Some(s.as_str().to_string()),
            _ => return Err(exec.raise(E_TYPE)),
        },
        None => None,
    };
    exec.deferred.push(DeferredAction::Shutdown(message));
    Ok(v_none())
}

fn bf_dump_database(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    wizard_check(exec)?;
    exec.deferred.push(DeferredAction::Checkpoint);
    Ok(v_none())
}

fn bf_server_log(exec: &mut Exec, args: Vec<Var>) -> ExecResult<Var> {
    wizard_check(exec)?;
    let Variant::Str(message) = args[0].variant() else {
        unreachable!("checked by signature");
    };
    let message = message.as_str().to_string();
    let is_error = args.get(1).map(|v| v.is_true()).unwrap_or(false);
    exec.deferred.push(DeferredAction::Log { message, is_error });
    Ok(v_none())
}

fn bf_load_server_options(exec: &mut Exec, _args: Vec<Var>) -> ExecResult<Var> {
    wizard_check(exec)?;
    exec.deferred.push(DeferredAction::ReloadOptions);
    Ok(v_none())
}

pub(crate) fn builtins() -> Vec<Builtin> {
    vec![
        Builtin {
            name: "task_id",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_task_id,
        },
        Builtin {
            name: "ticks_left",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_ticks_left,
        },
        Builtin {
            name: "seconds_left",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_seconds_left,
        },
        Builtin {
            name: "suspend",
            min_args: 0,
            max_args: Some(1),
            types: &[ArgType::Num],
            func: bf_suspend,
        },
        Builtin {
            name: "read",
            min_args: 0,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_read,
        },
        Builtin {
            name: "resume",
            min_args: 1,
            max_args: Some(2),
            types: &[ArgType::Int, ArgType::Any],
            func: bf_resume,
        },
        Builtin {
            name: "kill_task",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Int],
            func: bf_kill_task,
        },
        Builtin {
            name: "queued_tasks",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_queued_tasks,
        },
        Builtin {
            name: "queue_info",
            min_args: 0,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_queue_info,
        },
        Builtin {
            name: "callers",
            min_args: 0,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_callers,
        },
        Builtin {
            name: "caller_perms",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_caller_perms,
        },
        Builtin {
            name: "task_perms",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_task_perms,
        },
        Builtin {
            name: "set_task_perms",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_set_task_perms,
        },
        Builtin {
            name: "call_function",
            min_args: 1,
            max_args: None,
            types: &[ArgType::Str],
            func: bf_call_function,
        },
        Builtin {
            name: "time",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_time,
        },
        Builtin {
            name: "ctime",
            min_args: 0,
            max_args: Some(1),
            types: &[ArgType::Int],
            func: bf_ctime,
        },
        Builtin {
            name: "notify",
            min_args: 2,
            max_args: Some(3),
            types: &[ArgType::Obj, ArgType::Str, ArgType::Any],
            func: bf_notify,
        },
        Builtin {
            name: "connected_players",
            min_args: 0,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_connected_players,
        },
        Builtin {
            name: "connected_seconds",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_connected_seconds,
        },
        Builtin {
            name: "idle_seconds",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_idle_seconds,
        },
        Builtin {
            name: "connection_name",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_connection_name,
        },
        Builtin {
            name: "boot_player",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_boot_player,
        },
        Builtin {
            name: "buffered_output_length",
            min_args: 0,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_buffered_output_length,
        },
        Builtin {
            name: "flush_input",
            min_args: 1,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Any],
            func: bf_flush_input,
        },
        Builtin {
            name: "output_delimiters",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_output_delimiters,
        },
        Builtin {
            name: "set_connection_option",
            min_args: 3,
            max_args: Some(3),
            types: &[ArgType::Obj, ArgType::Str, ArgType::Any],
            func: bf_set_connection_option,
        },
        Builtin {
            name: "connection_options",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Obj],
            func: bf_connection_options,
        },
        Builtin {
            name: "connection_option",
            min_args: 2,
            max_args: Some(2),
            types: &[ArgType::Obj, ArgType::Str],
            func: bf_connection_option,
        },
        Builtin {
            name: "listen",
            min_args: 2,
            max_args: Some(3),
            types: &[ArgType::Obj, ArgType::Any, ArgType::Any],
            func: bf_listen,
        },
        Builtin {
            name: "unlisten",
            min_args: 1,
            max_args: Some(1),
            types: &[ArgType::Any],
            func: bf_unlisten,
        },
        Builtin {
            name: "listeners",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_listeners,
        },
        Builtin {
            name: "open_network_connection",
            min_args: 1,
            max_args: None,
            types: &[],
            func: bf_open_network_connection,
        },
        Builtin {
            name: "server_version",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_server_version,
        },
        Builtin {
            name: "shutdown",
            min_args: 0,
            max_args: Some(1),
            types: &[ArgType::Str],
            func: bf_shutdown,
        },
        Builtin {
            name: "dump_database",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_dump_database,
        },
        Builtin {
            name: "server_log",
            min_args: 1,
            max_args: Some(2),
            types: &[ArgType::Str, ArgType::Any],
            func: bf_server_log,
        },
        Builtin {
            name: "load_server_options",
            min_args: 0,
            max_args: Some(0),
            types: &[],
            func: bf_load_server_options,
        },
    ]
}
