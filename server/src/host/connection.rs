//! Per-connection plumbing: the async reader and writer halves that move
//! bytes, and the driver thread that runs the input state machine — OOB
//! routing, reader wakeup, the login flow, intrinsic commands, and command
//! submission.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use loam_kernel::tasks::connections::{ConnectionHandle, ConnectionMessage, InputItem};
use loam_kernel::tasks::scheduler::{Scheduler, TaskStatus};
use loam_kernel::tasks::{TaskOutcome, Wake};
use loam_kernel::world::World;
use loam_values::util::bytes::encode_binary;
use loam_values::util::parse_into_words;
use loam_values::var::error::Error::E_INVARG;
use loam_values::var::objid::Objid;
use loam_values::var::{v_objid, v_str, v_string, Var, Variant};

use crate::host::codec::{LineBuffer, OOB_PREFIX, OOB_QUOTE_PREFIX};

/// How long the driver waits on a command task before checking whether it
/// has suspended (at which point the suffix delimiter goes out and the
/// driver resumes pulling input).
const TASK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why the driver loop ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Disconnect {
    /// The client went away.
    ClientClosed,
    /// We closed it: boot, redirect, or shutdown.
    ServerClosed,
}

/// Serve one accepted socket: register the connection, spin up the writer
/// and driver, and run the read loop until EOF.
pub async fn serve_connection(
    world: Arc<World>,
    scheduler: Arc<Scheduler>,
    listener: Objid,
    stream: TcpStream,
    peer_name: String,
) {
    let flush_command = world.options().default_flush_command.clone();
    let conn = world
        .connections
        .new_connection(listener, peer_name, flush_command);
    info!(connection = %conn.connection_id, peer = %conn.peer_name, "connection open");

    let (mut read_half, write_half) = stream.into_split();

    // Writer half: drain the output queue onto the socket.
    let writer_conn = conn.clone();
    let writer = tokio::spawn(write_loop(writer_conn, write_half));

    // Watchdog: unauthenticated connections get `connect_timeout` to log in.
    let watchdog_world = world.clone();
    let watchdog_conn = conn.clone();
    tokio::spawn(async move {
        let timeout = watchdog_world.options().connect_timeout;
        tokio::time::sleep(timeout).await;
        if !watchdog_conn.is_authenticated() && !watchdog_conn.output.is_closed() {
            info!(connection = %watchdog_conn.connection_id, "login timeout");
            for line in watchdog_world.system_message("timeout_msg") {
                watchdog_conn.send_text(line);
            }
            watchdog_conn.output.close();
        }
    });

    // Driver: the input state machine, on its own thread because it blocks
    // on the scheduler.
    let driver_world = world.clone();
    let driver_scheduler = scheduler.clone();
    let driver_conn = conn.clone();
    let driver = std::thread::Builder::new()
        .name(format!("loam-conn-{}", conn.connection_id.0))
        .spawn(move || run_driver(driver_world, driver_scheduler, driver_conn))
        .expect("could not spawn connection driver");

    // Read loop: bytes to input items.
    let input_tx = conn.input_sender();
    let mut line_buffer = LineBuffer::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(connection = %conn.connection_id, error = ?e, "read error");
                break;
            }
        };
        line_buffer.extend(&buf[..n]);
        let binary = conn.options.lock().binary;
        if binary {
            let bytes = line_buffer.take_all();
            if !bytes.is_empty() && input_tx.send_async(InputItem::Binary(bytes)).await.is_err()
            {
                break;
            }
        } else {
            let mut closed = false;
            while let Some(line) = line_buffer.next_line() {
                // The flush command empties the queue instead of joining it.
                let flush_command = conn.options.lock().flush_command.clone();
                if !flush_command.is_empty() && line == flush_command {
                    let flushed = conn.flush_input();
                    conn.send_text(format!(">> Flushed {flushed} lines of input <<"));
                    continue;
                }
                if input_tx.send_async(InputItem::Line(line)).await.is_err() {
                    closed = true;
                    break;
                }
            }
            if closed {
                break;
            }
        }
        conn.record_activity();
    }
    // The handle itself keeps a sender alive, so EOF travels as an explicit
    // item rather than channel disconnection.
    let _ = input_tx.send_async(InputItem::Eof).await;
    drop(input_tx);

    let _ = writer.await;
    let _ = tokio::task::spawn_blocking(move || {
        let _ = driver.join();
    })
    .await;
    info!(connection = %conn.connection_id, "connection closed");
}

async fn write_loop(
    conn: Arc<ConnectionHandle>,
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
) {
    let signal = conn.output.signal();
    loop {
        while let Some(msg) = conn.output.try_pop() {
            let result = match msg {
                ConnectionMessage::Text(line) => {
                    let mut bytes = line.into_bytes();
                    bytes.extend_from_slice(b"\r\n");
                    write_half.write_all(&bytes).await
                }
                ConnectionMessage::Bytes(bytes) => write_half.write_all(&bytes).await,
            };
            if result.is_err() {
                conn.output.close();
                return;
            }
        }
        let _ = write_half.flush().await;
        if conn.output.is_closed() && conn.output.buffered_len() == 0 {
            let _ = write_half.shutdown().await;
            return;
        }
        if signal.recv_async().await.is_err() {
            return;
        }
    }
}

/// The connection driver: pulls decoded input items and runs the dispatch
/// state machine over them.
fn run_driver(world: Arc<World>, scheduler: Arc<Scheduler>, conn: Arc<ConnectionHandle>) {
    let input_rx = conn.input_receiver();
    let reason = loop {
        let item = match input_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(item) => item,
            Err(flume::RecvTimeoutError::Timeout) => {
                if conn.output.is_closed() || world.shutting_down() {
                    break Disconnect::ServerClosed;
                }
                continue;
            }
            Err(flume::RecvTimeoutError::Disconnected) => break Disconnect::ClientClosed,
        };
        conn.record_activity();
        match item {
            InputItem::Line(line) => {
                handle_line(&world, &scheduler, &conn, &input_rx, line, false);
            }
            InputItem::Binary(bytes) => {
                // Binary input travels as a binary string and skips the
                // out-of-band machinery.
                let line = encode_binary(&bytes);
                handle_line(&world, &scheduler, &conn, &input_rx, line, true);
            }
            InputItem::Eof => break Disconnect::ClientClosed,
        }
    };
    disconnect(&world, &scheduler, &conn, reason);
}

fn handle_line(
    world: &Arc<World>,
    scheduler: &Arc<Scheduler>,
    conn: &Arc<ConnectionHandle>,
    input_rx: &flume::Receiver<InputItem>,
    line: String,
    is_binary: bool,
) {
    let (disable_oob, hold_input) = {
        let opts = conn.options.lock();
        (opts.disable_oob, opts.hold_input)
    };

    // Out-of-band lines bypass everything below: they never wake a reader
    // and never wait on hold-input. The verb sees the words after the
    // marker, plus the original line.
    if !is_binary && !disable_oob && line.starts_with(OOB_PREFIX) {
        let words: Vec<Var> = parse_into_words(&line[OOB_PREFIX.len()..])
            .iter()
            .map(|w| v_str(w))
            .collect();
        let _ = scheduler.submit_verb_task(
            conn.player(),
            conn.listener,
            "do_out_of_band_command",
            words,
            &line,
            conn.player(),
            conn.listener,
            None,
        );
        return;
    }
    // The quote prefix re-inserts an in-band line that would otherwise look
    // out-of-band.
    let line = if !is_binary && line.starts_with(OOB_QUOTE_PREFIX) {
        line[OOB_QUOTE_PREFIX.len()..].to_string()
    } else {
        line
    };

    // A pending reader gets the line before command processing sees it.
    if conn.wake_reader(Wake::Resume(v_string(line.clone()))) {
        return;
    }

    if hold_input {
        while conn.options.lock().hold_input && !conn.output.is_closed() {
            std::thread::sleep(Duration::from_millis(50));
        }
        if conn.output.is_closed() {
            return;
        }
    }

    if !conn.is_authenticated() {
        login_flow(world, scheduler, conn, &line);
        return;
    }
    command_flow(world, scheduler, conn, input_rx, &line);
}

/// Feed a line to `do_login_command` and bind the connection if the verb
/// blesses it with a `{max_object, player}` pair.
fn login_flow(
    world: &Arc<World>,
    scheduler: &Arc<Scheduler>,
    conn: &Arc<ConnectionHandle>,
    line: &str,
) {
    let words: Vec<Var> = parse_into_words(line).iter().map(|w| v_str(w)).collect();
    if words.is_empty() {
        return;
    }
    let (reply_tx, reply_rx) = flume::bounded(1);
    let submitted = scheduler.submit_verb_task(
        conn.player(),
        conn.listener,
        "do_login_command",
        words,
        line,
        conn.player(),
        conn.listener,
        Some(reply_tx),
    );
    if submitted.is_err() {
        return;
    }
    let outcome = reply_rx.recv_timeout(Duration::from_secs(60));
    let Ok(TaskOutcome::Success(result)) = outcome else {
        return;
    };
    let Variant::List(l) = result.variant() else {
        return;
    };
    if l.len() != 2 {
        return;
    }
    let (Variant::Obj(max_object), Variant::Obj(player)) = (l[0].variant(), l[1].variant())
    else {
        return;
    };
    if player.0 < 0 {
        return;
    }
    finish_login(world, scheduler, conn, *max_object, *player);
}

fn finish_login(
    world: &Arc<World>,
    scheduler: &Arc<Scheduler>,
    conn: &Arc<ConnectionHandle>,
    max_object: Objid,
    player: Objid,
) {
    // An id above the pre-login watermark means the login verb created the
    // player just now.
    let created = player.0 > max_object.0;
    let displaced = world.connections.bind_player(conn, player);
    info!(connection = %conn.connection_id, %player, "player logged in");

    let hook = if let Some(old) = displaced {
        for line in world.system_message("redirect_from_msg") {
            old.send_text(line);
        }
        old.wake_reader(Wake::Error(E_INVARG));
        old.output.close();
        for line in world.system_message("redirect_to_msg") {
            conn.send_text(line);
        }
        "user_reconnected"
    } else if created {
        for line in world.system_message("create_msg") {
            conn.send_text(line);
        }
        "user_created"
    } else {
        for line in world.system_message("connect_msg") {
            conn.send_text(line);
        }
        "user_connected"
    };
    let _ = scheduler.submit_verb_task(
        player,
        conn.listener,
        hook,
        vec![v_objid(player)],
        "",
        player,
        conn.listener,
        None,
    );
}

fn command_flow(
    world: &Arc<World>,
    scheduler: &Arc<Scheduler>,
    conn: &Arc<ConnectionHandle>,
    input_rx: &flume::Receiver<InputItem>,
    line: &str,
) {
    // Intrinsic commands are consumed by the connection itself.
    let words = parse_into_words(line);
    if let Some(first) = words.first() {
        let recognized = conn.options.lock().intrinsic_commands.contains(first);
        if recognized {
            let rest = line
                .split_once(char::is_whitespace)
                .map(|(_, r)| r.trim_start().to_string())
                .unwrap_or_default();
            match first.as_str() {
                "PREFIX" | "OUTPUTPREFIX" => {
                    conn.delimiters.lock().0 = rest;
                    return;
                }
                "SUFFIX" | "OUTPUTSUFFIX" => {
                    conn.delimiters.lock().1 = rest;
                    return;
                }
                ".program" => {
                    program_mode(conn, input_rx);
                    return;
                }
                _ => {}
            }
        }
    }

    let (prefix, suffix) = conn.delimiters.lock().clone();
    if !prefix.is_empty() {
        conn.send_text(prefix);
    }
    let (reply_tx, reply_rx) = flume::bounded(1);
    let submitted =
        scheduler.submit_command_task(conn.player(), line, conn.listener, Some(reply_tx));
    match submitted {
        Ok(task_id) => {
            // Wait for the command's first segment: completion, or
            // suspension (after which output is flushed and the driver must
            // get back to feeding input, e.g. for `read()`).
            loop {
                match reply_rx.recv_timeout(TASK_POLL_INTERVAL) {
                    Ok(_) => break,
                    Err(flume::RecvTimeoutError::Timeout) => {
                        match scheduler.task_status(task_id) {
                            None => break,
                            Some(TaskStatus::Suspended | TaskStatus::Reading) => break,
                            Some(_) => continue,
                        }
                    }
                    Err(flume::RecvTimeoutError::Disconnected) => break,
                }
            }
        }
        Err(e) => {
            warn!(connection = %conn.connection_id, error = %e, "could not submit command");
            conn.send_text("The server is too busy to accept commands right now.".to_string());
        }
    }
    if !suffix.is_empty() {
        conn.send_text(suffix);
    }
}

/// `.program`: accumulate lines until a lone `.`; actually compiling them
/// needs the (external) MOO compiler, which this host does not embed.
fn program_mode(conn: &Arc<ConnectionHandle>, input_rx: &flume::Receiver<InputItem>) {
    let mut lines = 0usize;
    loop {
        match input_rx.recv_timeout(Duration::from_secs(300)) {
            Ok(InputItem::Line(line)) => {
                if line == "." {
                    break;
                }
                lines += 1;
            }
            Ok(InputItem::Binary(_)) => {}
            Ok(InputItem::Eof) | Err(_) => {
                // client went away mid-program; let the driver wind down
                conn.output.close();
                return;
            }
        }
        if conn.output.is_closed() {
            return;
        }
    }
    conn.send_text(format!(
        ".program: {lines} lines read, but no compiler is configured on this host."
    ));
}

fn disconnect(
    world: &Arc<World>,
    scheduler: &Arc<Scheduler>,
    conn: &Arc<ConnectionHandle>,
    reason: Disconnect,
) {
    debug!(connection = %conn.connection_id, ?reason, "disconnect");
    conn.wake_reader(Wake::Error(E_INVARG));
    let was_registered = world.connections.remove(conn);
    conn.output.close();

    let player = conn.player();
    if was_registered && player.0 >= 0 && !world.shutting_down() {
        let hook = match reason {
            Disconnect::ClientClosed => "user_disconnected",
            Disconnect::ServerClosed => "user_client_disconnected",
        };
        let _ = scheduler.submit_verb_task(
            player,
            conn.listener,
            hook,
            vec![v_objid(player)],
            "",
            player,
            conn.listener,
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use loam_kernel::db::loader::Loader;
    use loam_kernel::db::Db;
    use loam_kernel::program::build::{
        assign, call, expr_stmt, id, normal, prog, prop, value,
    };
    use loam_kernel::program::Program;
    use loam_values::model::props::prop_flags_parse;
    use loam_values::model::r#match::{ArgSpec, PrepSpec, VerbArgsSpec};
    use loam_values::model::verbs::VerbFlag;
    use loam_values::var::{v_list, v_obj, Symbol};
    use loam_values::SYSTEM_OBJECT;

    const WIZARD: Objid = Objid(2);

    fn any_spec() -> VerbArgsSpec {
        VerbArgsSpec {
            dobj: ArgSpec::Any,
            prep: PrepSpec::Any,
            iobj: ArgSpec::Any,
        }
    }

    /// `#0.seen = args;` as a probe verb body.
    fn record_args_program() -> Program {
        prog(vec![expr_stmt(assign(
            prop(value(v_obj(0)), "seen"),
            id("args"),
        ))])
    }

    fn fixture(extra: impl FnOnce(&mut Loader)) -> (Arc<World>, Arc<Scheduler>) {
        let db = Db::new();
        let mut loader = Loader::new(db.clone());
        loader.create_object(SYSTEM_OBJECT, "System Object", WIZARD);
        loader.create_object(Objid(1), "Room", WIZARD);
        loader.create_object(WIZARD, "Wizard", WIZARD);
        loader.make_player(WIZARD).unwrap();
        loader.make_wizard(WIZARD).unwrap();
        loader.set_location(WIZARD, Objid(1)).unwrap();
        loader
            .define_property(
                SYSTEM_OBJECT,
                "seen",
                WIZARD,
                prop_flags_parse("rw").unwrap(),
                loam_values::var::v_int(0),
            )
            .unwrap();
        extra(&mut loader);
        loader.commit().unwrap();
        let world = World::new(db);
        let scheduler = Scheduler::new(world.clone());
        scheduler.start();
        (world, scheduler)
    }

    fn wait_for_seen(world: &Arc<World>, expected: &loam_values::var::Var) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let mut tx = world.db.begin_tx();
            let current = tx.raw_property(SYSTEM_OBJECT, &Symbol::mk("seen")).ok();
            tx.rollback();
            if current.as_ref() == Some(expected) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn wait_for_output_line(conn: &Arc<ConnectionHandle>) -> Option<String> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(ConnectionMessage::Text(line)) = conn.output.try_pop() {
                return Some(line);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn test_oob_dispatch_and_reader_bypass() {
        let (world, scheduler) = fixture(|loader| {
            loader
                .add_verb(
                    SYSTEM_OBJECT,
                    &["do_out_of_band_command"],
                    WIZARD,
                    VerbFlag::rxd(),
                    any_spec(),
                    record_args_program(),
                )
                .unwrap();
        });
        let conn = world
            .connections
            .new_connection(SYSTEM_OBJECT, "test-peer".into(), ".flush".into());
        let input_rx = conn.input_receiver();

        // a pending reader must not see the out-of-band line
        let (reader_tx, reader_rx) = flume::unbounded();
        assert!(conn.set_reader(reader_tx));

        handle_line(
            &world,
            &scheduler,
            &conn,
            &input_rx,
            "#$#hello world".to_string(),
            false,
        );
        assert!(
            wait_for_seen(
                &world,
                &v_list(vec![v_str("hello"), v_str("world")])
            ),
            "do_out_of_band_command did not run with the split words"
        );
        assert!(reader_rx.try_recv().is_err(), "reader woken by OOB line");

        // the next in-band line goes to the reader, quote prefix stripped
        handle_line(
            &world,
            &scheduler,
            &conn,
            &input_rx,
            "#$\"#$#not oob".to_string(),
            false,
        );
        match reader_rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Wake::Resume(v) => assert_eq!(v, v_string("#$#not oob".to_string())),
            other => panic!("unexpected wake {other:?}"),
        }
    }

    #[test]
    fn test_oob_disabled_is_plain_command() {
        let (world, scheduler) = fixture(|_| {});
        let conn = world
            .connections
            .new_connection(SYSTEM_OBJECT, "test-peer".into(), ".flush".into());
        let input_rx = conn.input_receiver();
        world.connections.bind_player(&conn, WIZARD);
        conn.options.lock().disable_oob = true;

        handle_line(
            &world,
            &scheduler,
            &conn,
            &input_rx,
            "#$#hello world".to_string(),
            false,
        );
        // no verb matches, so the stock complaint arrives as command output
        assert_eq!(
            wait_for_output_line(&conn).as_deref(),
            Some("I couldn't understand that.")
        );
    }

    #[test]
    fn test_prefix_suffix_bracket_command_output() {
        let (world, scheduler) = fixture(|loader| {
            // `ping` notifies the player
            loader
                .add_verb(
                    Objid(1),
                    &["ping"],
                    WIZARD,
                    VerbFlag::rxd(),
                    VerbArgsSpec {
                        dobj: ArgSpec::None,
                        prep: PrepSpec::None,
                        iobj: ArgSpec::None,
                    },
                    prog(vec![expr_stmt(call(
                        "notify",
                        vec![normal(id("player")), normal(value(v_str("pong")))],
                    ))]),
                )
                .unwrap();
        });
        let conn = world
            .connections
            .new_connection(SYSTEM_OBJECT, "test-peer".into(), ".flush".into());
        let input_rx = conn.input_receiver();
        world.connections.bind_player(&conn, WIZARD);

        handle_line(
            &world,
            &scheduler,
            &conn,
            &input_rx,
            "PREFIX ===begin===".to_string(),
            false,
        );
        handle_line(
            &world,
            &scheduler,
            &conn,
            &input_rx,
            "SUFFIX ===end===".to_string(),
            false,
        );
        assert_eq!(conn.delimiters.lock().clone().0, "===begin===");

        handle_line(
            &world,
            &scheduler,
            &conn,
            &input_rx,
            "ping".to_string(),
            false,
        );
        assert_eq!(wait_for_output_line(&conn).as_deref(), Some("===begin==="));
        assert_eq!(wait_for_output_line(&conn).as_deref(), Some("pong"));
        assert_eq!(wait_for_output_line(&conn).as_deref(), Some("===end==="));
    }

    #[test]
    fn test_login_binds_and_redirects() {
        let (world, scheduler) = fixture(|loader| {
            // do_login_command unconditionally admits the wizard
            loader
                .add_verb(
                    SYSTEM_OBJECT,
                    &["do_login_command"],
                    WIZARD,
                    VerbFlag::rxd(),
                    any_spec(),
                    prog(vec![loam_kernel::program::build::ret(
                        loam_kernel::program::build::list(vec![
                            normal(call("max_object", vec![])),
                            normal(value(v_obj(WIZARD.0))),
                        ]),
                    )]),
                )
                .unwrap();
        });
        let first = world
            .connections
            .new_connection(SYSTEM_OBJECT, "peer-1".into(), ".flush".into());
        let first_rx = first.input_receiver();
        handle_line(
            &world,
            &scheduler,
            &first,
            &first_rx,
            "connect".to_string(),
            false,
        );
        assert_eq!(first.player(), WIZARD);
        assert!(Arc::ptr_eq(
            &world.connections.get(WIZARD).unwrap(),
            &first
        ));

        // a second login displaces the first connection
        let second = world
            .connections
            .new_connection(SYSTEM_OBJECT, "peer-2".into(), ".flush".into());
        let second_rx = second.input_receiver();
        handle_line(
            &world,
            &scheduler,
            &second,
            &second_rx,
            "connect".to_string(),
            false,
        );
        assert!(Arc::ptr_eq(
            &world.connections.get(WIZARD).unwrap(),
            &second
        ));
        assert!(first.output.is_closed(), "displaced connection not closed");
    }
}
