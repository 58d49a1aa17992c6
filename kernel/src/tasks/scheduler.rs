use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{error, info, warn};

use loam_values::var::objid::Objid;
use loam_values::var::{v_int, Var};

use crate::program::Program;
use crate::tasks::task::run_task;
use crate::tasks::{ForkRequest, SchedulerError, TaskId, TaskOutcome, TaskStart, Wake};
use crate::world::World;

/// How a task currently stands with the scheduler.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TaskStatus {
    /// Fork created, waiting for its start time.
    Forked,
    /// Thread spawned, not yet running its first transaction.
    Pending,
    Running,
    Suspended,
    Reading,
}

/// The scheduler's record of one task.
pub struct TaskControl {
    pub task_id: TaskId,
    pub player: Objid,
    pub perms: Objid,
    pub status: TaskStatus,
    pub kill: Arc<AtomicBool>,
    /// Wake handle for suspended/reading tasks.
    pub wake: Option<flume::Sender<Wake>>,
    /// When a suspended or forked task is due.
    pub wake_time: Option<SystemTime>,
    pub start_time: SystemTime,
    pub is_background: bool,
    /// Where the task is (or will be) executing, for `queued_tasks`.
    pub verb_name: String,
    pub verb_definer: Objid,
    pub this: Objid,
    pub line_number: u32,
    /// The body of a not-yet-started fork.
    fork: Option<ForkRequest>,
}

/// A snapshot of a queued task for `queued_tasks()` listings.
#[derive(Debug, Clone)]
pub struct QueuedTaskDescription {
    pub task_id: TaskId,
    pub start_time: Option<SystemTime>,
    pub perms: Objid,
    pub verb_name: String,
    pub verb_definer: Objid,
    pub this: Objid,
    pub line_number: u32,
}

struct SchedulerInner {
    tasks: HashMap<TaskId, TaskControl>,
    reserved: HashSet<TaskId>,
}

/// The task scheduler. Each task runs on its own thread; the scheduler keeps
/// the registry, hands out task ids, starts forked tasks when they come due,
/// and wakes suspended tasks.
pub struct Scheduler {
    pub world: Arc<World>,
    inner: Mutex<SchedulerInner>,
    running: AtomicBool,
}

impl Scheduler {
    #[must_use]
    pub fn new(world: Arc<World>) -> Arc<Self> {
        Arc::new(Self {
            world,
            inner: Mutex::new(SchedulerInner {
                tasks: HashMap::new(),
                reserved: HashSet::new(),
            }),
            running: AtomicBool::new(false),
        })
    }

    /// Start the background processing loop: promote due forks, wake due
    /// suspensions, and wind everything down on shutdown.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = self.clone();
        std::thread::Builder::new()
            .name("loam-scheduler".to_string())
            .spawn(move || scheduler.process_loop())
            .expect("could not spawn scheduler thread");
    }

    fn process_loop(self: Arc<Self>) {
        info!("scheduler started");
        loop {
            if self.world.shutting_down() {
                self.abort_all();
                break;
            }
            self.process_once();
            std::thread::sleep(Duration::from_millis(5));
        }
        self.running.store(false, Ordering::SeqCst);
        info!("scheduler stopped");
    }

    fn process_once(self: &Arc<Self>) {
        let now = SystemTime::now();
        let mut due_forks = vec![];
        {
            let mut inner = self.inner.lock();
            for control in inner.tasks.values_mut() {
                match control.status {
                    TaskStatus::Forked => {
                        if control.wake_time.map(|t| t <= now).unwrap_or(true) {
                            if let Some(fork) = control.fork.take() {
                                control.status = TaskStatus::Pending;
                                control.wake_time = None;
                                due_forks.push(fork);
                            }
                        }
                    }
                    TaskStatus::Suspended => {
                        if control.wake_time.map(|t| t <= now).unwrap_or(false) {
                            control.wake_time = None;
                            if let Some(wake) = &control.wake {
                                let _ = wake.send(Wake::Resume(v_int(0)));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        for fork in due_forks {
            self.spawn_task_thread(fork.task_id, TaskStart::Fork(fork), None);
        }
    }

    fn abort_all(&self) {
        warn!("aborting all tasks for shutdown");
        let mut inner = self.inner.lock();
        for control in inner.tasks.values_mut() {
            match control.status {
                TaskStatus::Suspended | TaskStatus::Reading => {
                    if let Some(wake) = control.wake.take() {
                        let _ = wake.send(Wake::Abort);
                    }
                }
                _ => control.kill.store(true, Ordering::SeqCst),
            }
        }
    }

    /// Pick an unused random positive 32-bit task id.
    pub fn reserve_task_id(&self) -> TaskId {
        let mut inner = self.inner.lock();
        let mut rng = rand::thread_rng();
        loop {
            let id: TaskId = rng.gen_range(1..=i64::from(i32::MAX));
            if !inner.tasks.contains_key(&id) && inner.reserved.insert(id) {
                return id;
            }
        }
    }

    pub fn release_task_id(&self, id: TaskId) {
        self.inner.lock().reserved.remove(&id);
    }

    // -- task submission -----------------------------------------------------

    /// Submit a player command for parsing and dispatch.
    pub fn submit_command_task(
        self: &Arc<Self>,
        player: Objid,
        line: &str,
        handler_object: Objid,
        reply: Option<flume::Sender<TaskOutcome>>,
    ) -> Result<TaskId, SchedulerError> {
        self.submit(
            player,
            player,
            handler_object,
            false,
            TaskStart::Command {
                line: line.to_string(),
            },
            reply,
        )
    }

    /// Submit a direct verb call, e.g. the connection driver invoking a
    /// system verb.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_verb_task(
        self: &Arc<Self>,
        player: Objid,
        vloc: Objid,
        verb: &str,
        args: Vec<Var>,
        argstr: &str,
        perms: Objid,
        handler_object: Objid,
        reply: Option<flume::Sender<TaskOutcome>>,
    ) -> Result<TaskId, SchedulerError> {
        self.submit(
            player,
            perms,
            handler_object,
            false,
            TaskStart::Verb {
                vloc,
                verb: verb.to_string(),
                args,
                argstr: argstr.to_string(),
            },
            reply,
        )
    }

    /// Submit a bare program (the eval path).
    pub fn submit_program_task(
        self: &Arc<Self>,
        player: Objid,
        perms: Objid,
        handler_object: Objid,
        program: Program,
        reply: Option<flume::Sender<TaskOutcome>>,
    ) -> Result<TaskId, SchedulerError> {
        self.submit(
            player,
            perms,
            handler_object,
            false,
            TaskStart::Program { program },
            reply,
        )
    }

    fn submit(
        self: &Arc<Self>,
        player: Objid,
        perms: Objid,
        handler_object: Objid,
        is_background: bool,
        start: TaskStart,
        reply: Option<flume::Sender<TaskOutcome>>,
    ) -> Result<TaskId, SchedulerError> {
        if self.world.shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        let task_id = self.reserve_task_id();
        {
            let mut inner = self.inner.lock();
            inner.reserved.remove(&task_id);
            inner.tasks.insert(
                task_id,
                TaskControl {
                    task_id,
                    player,
                    perms,
                    status: TaskStatus::Pending,
                    kill: Arc::new(AtomicBool::new(false)),
                    wake: None,
                    wake_time: None,
                    start_time: SystemTime::now(),
                    is_background,
                    verb_name: String::new(),
                    verb_definer: loam_values::NOTHING,
                    this: loam_values::NOTHING,
                    line_number: 0,
                    fork: None,
                },
            );
        }
        self.spawn_task_thread_with(task_id, player, perms, handler_object, start, reply);
        Ok(task_id)
    }

    /// Accept a fork published by a committed parent transaction. The task
    /// id was reserved when the fork statement ran.
    pub fn submit_fork(self: &Arc<Self>, fork: ForkRequest) {
        let mut inner = self.inner.lock();
        inner.reserved.remove(&fork.task_id);
        let wake_time = SystemTime::now() + fork.delay;
        inner.tasks.insert(
            fork.task_id,
            TaskControl {
                task_id: fork.task_id,
                player: fork.player,
                perms: fork.perms,
                status: TaskStatus::Forked,
                kill: Arc::new(AtomicBool::new(false)),
                wake: None,
                wake_time: Some(wake_time),
                start_time: wake_time,
                is_background: true,
                verb_name: fork.activation.verb_name.clone(),
                verb_definer: fork.activation.verb_definer,
                this: fork.activation.this,
                line_number: fork.activation.line_number,
                fork: Some(fork),
            },
        );
    }

    fn spawn_task_thread(self: &Arc<Self>, task_id: TaskId, start: TaskStart, reply: Option<flume::Sender<TaskOutcome>>) {
        let (player, perms, handler_object) = match &start {
            TaskStart::Fork(f) => (f.player, f.perms, f.handler_object),
            _ => {
                let inner = self.inner.lock();
                let Some(c) = inner.tasks.get(&task_id) else {
                    return;
                };
                (c.player, c.perms, loam_values::SYSTEM_OBJECT)
            }
        };
        self.spawn_task_thread_with(task_id, player, perms, handler_object, start, reply);
    }

    fn spawn_task_thread_with(
        self: &Arc<Self>,
        task_id: TaskId,
        player: Objid,
        perms: Objid,
        handler_object: Objid,
        start: TaskStart,
        reply: Option<flume::Sender<TaskOutcome>>,
    ) {
        let scheduler = self.clone();
        let spawn_result = std::thread::Builder::new()
            .name(format!("loam-task-{task_id}"))
            .spawn(move || {
                run_task(
                    scheduler,
                    task_id,
                    player,
                    perms,
                    handler_object,
                    start,
                    reply,
                );
            });
        if let Err(e) = spawn_result {
            error!(task_id, error = ?e, "could not spawn task thread");
            self.task_done(task_id);
        }
    }

    // -- task state transitions ----------------------------------------------

    #[must_use]
    pub fn kill_flag(&self, task_id: TaskId) -> Option<Arc<AtomicBool>> {
        self.inner.lock().tasks.get(&task_id).map(|c| c.kill.clone())
    }

    pub fn mark_running(&self, task_id: TaskId, is_background: bool) {
        let mut inner = self.inner.lock();
        if let Some(c) = inner.tasks.get_mut(&task_id) {
            c.status = TaskStatus::Running;
            c.is_background = is_background;
            c.wake = None;
            c.wake_time = None;
        }
    }

    /// Record where a running task currently stands, for `queued_tasks`.
    pub fn record_position(
        &self,
        task_id: TaskId,
        perms: Objid,
        verb_name: &str,
        verb_definer: Objid,
        this: Objid,
        line_number: u32,
    ) {
        let mut inner = self.inner.lock();
        if let Some(c) = inner.tasks.get_mut(&task_id) {
            c.perms = perms;
            c.verb_name = verb_name.to_string();
            c.verb_definer = verb_definer;
            c.this = this;
            c.line_number = line_number;
        }
    }

    /// Transition a task into suspension, returning the wake handle it will
    /// block on.
    pub fn register_suspend(
        &self,
        task_id: TaskId,
        wake_time: Option<SystemTime>,
        reading: bool,
    ) -> flume::Receiver<Wake> {
        let (tx, rx) = flume::unbounded();
        let mut inner = self.inner.lock();
        if let Some(c) = inner.tasks.get_mut(&task_id) {
            c.status = if reading {
                TaskStatus::Reading
            } else {
                TaskStatus::Suspended
            };
            c.wake = Some(tx);
            c.wake_time = wake_time;
        }
        rx
    }

    /// Remove a finished task from the registry.
    pub fn task_done(&self, task_id: TaskId) {
        self.inner.lock().tasks.remove(&task_id);
    }

    // -- external task control -----------------------------------------------

    /// Owner of a task, for permission checks.
    #[must_use]
    pub fn task_perms(&self, task_id: TaskId) -> Option<Objid> {
        self.inner.lock().tasks.get(&task_id).map(|c| c.perms)
    }

    /// Abort a task: a running task stops at its next tick boundary, a
    /// queued one has its wake handle closed.
    pub fn kill_task(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        let status = inner
            .tasks
            .get(&task_id)
            .map(|c| c.status)
            .ok_or(SchedulerError::TaskNotFound(task_id))?;
        match status {
            TaskStatus::Running | TaskStatus::Pending => {
                if let Some(control) = inner.tasks.get_mut(&task_id) {
                    control.kill.store(true, Ordering::SeqCst);
                }
            }
            TaskStatus::Suspended | TaskStatus::Reading => {
                if let Some(control) = inner.tasks.get_mut(&task_id) {
                    if let Some(wake) = control.wake.take() {
                        let _ = wake.send(Wake::Abort);
                    }
                }
            }
            TaskStatus::Forked => {
                inner.tasks.remove(&task_id);
            }
        }
        Ok(())
    }

    /// Wake a suspended (not reading) task early, handing it `value` as the
    /// result of its `suspend()`.
    pub fn resume_task(&self, task_id: TaskId, value: Var) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock();
        let control = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(SchedulerError::TaskNotFound(task_id))?;
        if control.status != TaskStatus::Suspended {
            return Err(SchedulerError::TaskNotFound(task_id));
        }
        control.wake_time = None;
        if let Some(wake) = &control.wake {
            let _ = wake.send(Wake::Resume(value));
        }
        Ok(())
    }

    /// How many queued (forked, suspended, reading) tasks `perms` owns.
    #[must_use]
    pub fn queued_count_for(&self, perms: Objid) -> usize {
        self.inner
            .lock()
            .tasks
            .values()
            .filter(|c| {
                c.perms == perms
                    && matches!(
                        c.status,
                        TaskStatus::Forked | TaskStatus::Suspended | TaskStatus::Reading
                    )
            })
            .count()
    }

    /// Descriptions of all queued tasks visible to `perms` (everything, for
    /// wizards).
    #[must_use]
    pub fn queued_tasks(&self, perms: Objid, all: bool) -> Vec<QueuedTaskDescription> {
        self.inner
            .lock()
            .tasks
            .values()
            .filter(|c| {
                matches!(
                    c.status,
                    TaskStatus::Forked | TaskStatus::Suspended | TaskStatus::Reading
                ) && (all || c.perms == perms)
            })
            .map(|c| QueuedTaskDescription {
                task_id: c.task_id,
                start_time: c.wake_time.or(Some(c.start_time)),
                perms: c.perms,
                verb_name: c.verb_name.clone(),
                verb_definer: c.verb_definer,
                this: c.this,
                line_number: c.line_number,
            })
            .collect()
    }

    #[must_use]
    pub fn task_status(&self, task_id: TaskId) -> Option<TaskStatus> {
        self.inner.lock().tasks.get(&task_id).map(|c| c.status)
    }
}
