//! A minimal in-code world for running the server without an external
//! database: a system object carrying the connection-policy verbs, a room,
//! and a wizard. Real deployments load a full core through the kernel's
//! loading interface instead.

use std::sync::Arc;

use loam_kernel::db::loader::Loader;
use loam_kernel::db::Db;
use loam_kernel::program::build::{
    assign, binary, call, expr_stmt, id, index, int, list, normal, prog, ret, value,
};
use loam_kernel::program::BinaryOp;
use loam_values::model::props::{prop_flags_parse, PropFlags};
use loam_values::model::r#match::{ArgSpec, PrepSpec, VerbArgsSpec};
use loam_values::model::verbs::VerbFlag;
use loam_values::var::objid::Objid;
use loam_values::var::{v_obj, v_str};
use loam_values::SYSTEM_OBJECT;

const ROOM: Objid = Objid(1);
const WIZARD: Objid = Objid(2);

fn any_any_any() -> VerbArgsSpec {
    VerbArgsSpec {
        dobj: ArgSpec::Any,
        prep: PrepSpec::Any,
        iobj: ArgSpec::Any,
    }
}

fn readable() -> PropFlags {
    prop_flags_parse("r").unwrap()
}

/// Populate a fresh store with the smallest world that can accept logins.
pub fn bootstrap(db: Arc<Db>) -> Result<(), anyhow::Error> {
    let mut loader = Loader::new(db);

    loader.create_object(SYSTEM_OBJECT, "System Object", WIZARD);
    loader.create_object(ROOM, "The First Room", WIZARD);
    loader.create_object(WIZARD, "Wizard", WIZARD);
    loader.make_player(WIZARD)?;
    loader.make_wizard(WIZARD)?;
    loader.set_location(WIZARD, ROOM)?;

    loader.define_property(
        SYSTEM_OBJECT,
        "connect_msg",
        WIZARD,
        readable(),
        v_str("*** Connected ***"),
    )?;
    loader.define_property(
        SYSTEM_OBJECT,
        "redirect_from_msg",
        WIZARD,
        readable(),
        v_str("*** Redirecting connection to new port ***"),
    )?;
    loader.define_property(
        SYSTEM_OBJECT,
        "redirect_to_msg",
        WIZARD,
        readable(),
        v_str("*** Redirecting old connection to this port ***"),
    )?;
    loader.define_property(
        SYSTEM_OBJECT,
        "timeout_msg",
        WIZARD,
        readable(),
        v_str("*** Timed-out waiting for login. ***"),
    )?;
    loader.define_property(
        SYSTEM_OBJECT,
        "boot_msg",
        WIZARD,
        readable(),
        v_str("*** Disconnected ***"),
    )?;

    // do_login_command: `connect` binds the wizard; anything else gets a
    // usage hint.
    let login_program = prog(vec![
        loam_kernel::program::StmtNode::Cond {
            arms: vec![loam_kernel::program::CondArm {
                condition: binary(
                    BinaryOp::Eq,
                    index(id("args"), int(1)),
                    value(v_str("connect")),
                ),
                statements: loam_kernel::program::build::stmts(vec![ret(list(vec![
                    normal(call("max_object", vec![])),
                    normal(value(v_obj(WIZARD.0))),
                ]))]),
            }],
            otherwise: loam_kernel::program::build::stmts(vec![
                expr_stmt(call(
                    "notify",
                    vec![
                        normal(id("player")),
                        normal(value(v_str(
                            "Welcome to loam. Type `connect' to log in.",
                        ))),
                    ],
                )),
                ret(int(0)),
            ]),
        },
    ]);
    loader.add_verb(
        SYSTEM_OBJECT,
        &["do_login_command"],
        WIZARD,
        VerbFlag::rxd(),
        any_any_any(),
        login_program,
    )?;

    // user_connected / user_reconnected / user_created all greet the player.
    let greet_program = prog(vec![expr_stmt(call(
        "notify",
        vec![
            normal(index(id("args"), int(1))),
            normal(value(v_str("You find yourself in the first room."))),
        ],
    ))]);
    loader.add_verb(
        SYSTEM_OBJECT,
        &["user_connected", "user_reconnected", "user_created"],
        WIZARD,
        VerbFlag::rxd(),
        any_any_any(),
        greet_program,
    )?;

    // look: the room describes itself.
    let look_program = prog(vec![expr_stmt(call(
        "notify",
        vec![
            normal(id("player")),
            normal(call(
                "tostr",
                vec![
                    normal(value(v_str("You are in "))),
                    normal(loam_kernel::program::build::prop(id("this"), "name")),
                    normal(value(v_str("."))),
                ],
            )),
        ],
    ))]);
    loader.add_verb(
        ROOM,
        &["l*ook"],
        WIZARD,
        VerbFlag::rxd(),
        VerbArgsSpec {
            dobj: ArgSpec::None,
            prep: PrepSpec::None,
            iobj: ArgSpec::None,
        },
        look_program,
    )?;

    // say: echo back to the speaker.
    let say_program = prog(vec![
        expr_stmt(assign(
            id("line"),
            call(
                "tostr",
                vec![
                    normal(value(v_str("You say, \""))),
                    normal(id("argstr")),
                    normal(value(v_str("\""))),
                ],
            ),
        )),
        expr_stmt(call(
            "notify",
            vec![normal(id("player")), normal(id("line"))],
        )),
    ]);
    loader.add_verb(ROOM, &["say"], WIZARD, VerbFlag::rxd(), any_any_any(), say_program)?;

    loader.commit()?;
    Ok(())
}
