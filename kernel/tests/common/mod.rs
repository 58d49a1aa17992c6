//! Shared fixture for the end-to-end suites: a small world with a system
//! object, a room and a wizard, plus helpers to run programs through the
//! scheduler and wait for their outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use loam_kernel::db::loader::Loader;
use loam_kernel::db::Db;
use loam_kernel::program::Program;
use loam_kernel::tasks::scheduler::Scheduler;
use loam_kernel::tasks::TaskOutcome;
use loam_kernel::world::World;
use loam_values::model::props::prop_flags_parse;
use loam_values::var::objid::Objid;
use loam_values::var::{Symbol, Var};
use loam_values::SYSTEM_OBJECT;

pub const ROOM: Objid = Objid(1);
pub const WIZARD: Objid = Objid(2);

pub struct TestWorld {
    pub world: Arc<World>,
    pub scheduler: Arc<Scheduler>,
}

pub fn setup() -> TestWorld {
    setup_with(|_| {})
}

/// Build the fixture, letting the caller add extra objects/verbs first.
pub fn setup_with(extra: impl FnOnce(&mut Loader)) -> TestWorld {
    let db = Db::new();
    let mut loader = Loader::new(db.clone());
    loader.create_object(SYSTEM_OBJECT, "System Object", WIZARD);
    loader.create_object(ROOM, "The Room", WIZARD);
    loader.create_object(WIZARD, "Wizard", WIZARD);
    loader.make_player(WIZARD).unwrap();
    loader.make_wizard(WIZARD).unwrap();
    loader.set_location(WIZARD, ROOM).unwrap();
    extra(&mut loader);
    loader.commit().unwrap();

    let world = World::new(db);
    let scheduler = Scheduler::new(world.clone());
    scheduler.start();
    TestWorld { world, scheduler }
}

impl TestWorld {
    /// Run a program as the wizard and wait for the task to finish.
    pub fn eval(&self, program: Program) -> TaskOutcome {
        let (tx, rx) = flume::bounded(1);
        self.scheduler
            .submit_program_task(WIZARD, WIZARD, SYSTEM_OBJECT, program, Some(tx))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(30))
            .expect("task did not finish in time")
    }

    pub fn eval_ok(&self, program: Program) -> Var {
        match self.eval(program) {
            TaskOutcome::Success(v) => v,
            other => panic!("expected success, got {other:?}"),
        }
    }

    /// Call a verb and wait for its return value.
    pub fn call_verb(&self, vloc: Objid, verb: &str, args: Vec<Var>) -> TaskOutcome {
        let (tx, rx) = flume::bounded(1);
        self.scheduler
            .submit_verb_task(
                WIZARD,
                vloc,
                verb,
                args,
                "",
                WIZARD,
                SYSTEM_OBJECT,
                Some(tx),
            )
            .unwrap();
        rx.recv_timeout(Duration::from_secs(30))
            .expect("task did not finish in time")
    }

    /// Poll a property on `#0` until it matches, for observing deferred
    /// effects like forks.
    pub fn wait_for_property(&self, name: &str, expected: &Var, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let name = Symbol::mk(name);
        while Instant::now() < deadline {
            let mut tx = self.world.db.begin_tx();
            let current = tx.raw_property(SYSTEM_OBJECT, &name).ok();
            tx.rollback();
            if current.as_ref() == Some(expected) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    pub fn read_system_property(&self, name: &str) -> Option<Var> {
        let mut tx = self.world.db.begin_tx();
        let v = tx.raw_property(SYSTEM_OBJECT, &Symbol::mk(name)).ok();
        tx.rollback();
        v
    }
}

/// Define an integer-ish property on `#0` for tests to mutate.
pub fn define_system_property(loader: &mut Loader, name: &str, value: Var) {
    loader
        .define_property(
            SYSTEM_OBJECT,
            name,
            WIZARD,
            prop_flags_parse("rw").unwrap(),
            value,
        )
        .unwrap();
}
