use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::warn;

use loam_values::model::verbs::VerbFlag;
use loam_values::model::{CommitResult, WorldStateError};
use loam_values::util::parse_into_words;
use loam_values::var::error::Error;
use loam_values::var::error::Error::{
    E_ARGS, E_INVARG, E_INVIND, E_MAXREC, E_PERM, E_RANGE, E_TYPE, E_VARNF, E_VERBNF,
};
use loam_values::var::objid::Objid;
use loam_values::var::{v_bool, v_int, v_list, v_str, Symbol, Var, Variant};
use loam_values::NOTHING;

use crate::config::ServerOptions;
use crate::db::tx::WorldTx;
use crate::matching::WsMatchEnv;
use crate::program::{
    Arg, BinaryOp, CatchCodes, Expr, Program, ScatterItem, ScatterKind, Stmt, StmtNode, UnaryOp,
};
use crate::tasks::command_parse::{parse_command, ParsedCommand};
use crate::tasks::connections::ConnectionMessage;
use crate::tasks::scheduler::Scheduler;
use crate::tasks::{DeferredAction, ForkRequest, TaskId, TaskStart, Wake};
use crate::vm::activation::Activation;
use crate::vm::{exception_for, make_backtrace, ExecResult, Exception, Flow, TaskAbortReason};
use crate::world::World;

/// How often the wall-clock deadline is consulted, in ticks.
const TIME_CHECK_INTERVAL: i64 = 256;

/// The execution context of one task: its transaction, call stack, resource
/// budgets, and the queue of effects deferred to commit. Everything a verb
/// does flows through here.
pub struct Exec {
    pub scheduler: Arc<Scheduler>,
    pub world: Arc<World>,
    tx: Option<WorldTx>,
    pub stack: Vec<Activation>,
    pub task_id: TaskId,
    pub player: Objid,
    /// The permissions the task was submitted under, used before any frame
    /// exists and for the eval path.
    pub task_perms: Objid,
    /// The listener object whose verbs implement connection policy.
    pub handler_object: Objid,
    pub is_background: bool,
    pub ticks_remaining: i64,
    pub deadline: Instant,
    pub start_time: SystemTime,
    kill: Arc<AtomicBool>,
    /// True once any transaction of this task has committed; a later
    /// conflict can then no longer be retried from the top.
    pub committed_once: bool,
    pub deferred: Vec<DeferredAction>,
    pub rng: StdRng,
    /// Call stack and formatted traceback captured when a resource limit
    /// fires, for the timeout policy hook.
    pub abort_snapshot: Option<(Vec<Var>, Vec<Var>)>,
    ticks_until_time_check: i64,
}

impl Exec {
    pub fn new(
        scheduler: Arc<Scheduler>,
        task_id: TaskId,
        player: Objid,
        task_perms: Objid,
        handler_object: Objid,
        is_background: bool,
        kill: Arc<AtomicBool>,
    ) -> Self {
        let world = scheduler.world.clone();
        let options = world.options();
        let (ticks, seconds) = if is_background {
            (options.bg_ticks, options.bg_seconds)
        } else {
            (options.fg_ticks, options.fg_seconds)
        };
        let tx = world.db.begin_tx();
        Self {
            scheduler,
            world,
            tx: Some(tx),
            stack: vec![],
            task_id,
            player,
            task_perms,
            handler_object,
            is_background,
            ticks_remaining: ticks,
            deadline: Instant::now() + seconds,
            start_time: SystemTime::now(),
            kill,
            committed_once: false,
            deferred: vec![],
            rng: StdRng::from_entropy(),
            abort_snapshot: None,
            ticks_until_time_check: TIME_CHECK_INTERVAL,
        }
    }

    pub fn options(&self) -> Arc<ServerOptions> {
        self.world.options()
    }

    pub fn tx(&mut self) -> &mut WorldTx {
        self.tx.as_mut().expect("task has no active transaction")
    }

    /// Take the transaction for a commit point.
    fn take_tx(&mut self) -> WorldTx {
        self.tx.take().expect("task has no active transaction")
    }

    // -- resource accounting -------------------------------------------------

    /// Charge one tick; the interruption points for kill, tick exhaustion
    /// and the wall-clock deadline all live here.
    pub fn tick(&mut self) -> ExecResult<()> {
        if self.kill.load(Ordering::Relaxed) {
            return Err(Flow::Abort(TaskAbortReason::Kill));
        }
        self.ticks_remaining -= 1;
        if self.ticks_remaining <= 0 {
            self.snapshot_for_abort("Task ran out of ticks");
            return Err(Flow::Abort(TaskAbortReason::Ticks));
        }
        self.ticks_until_time_check -= 1;
        if self.ticks_until_time_check <= 0 {
            self.ticks_until_time_check = TIME_CHECK_INTERVAL;
            if Instant::now() >= self.deadline {
                self.snapshot_for_abort("Task ran out of seconds");
                return Err(Flow::Abort(TaskAbortReason::Seconds));
            }
        }
        Ok(())
    }

    /// Capture the stack as it stood when a resource limit fired; the
    /// frames unwind before the task loop can see them.
    fn snapshot_for_abort(&mut self, msg: &str) {
        self.abort_snapshot = Some((
            crate::vm::make_stack_list(&self.stack),
            make_backtrace(&self.stack, msg),
        ));
    }

    pub fn seconds_left(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    // -- frame helpers -------------------------------------------------------

    pub fn top(&self) -> &Activation {
        self.stack.last().expect("no current frame")
    }

    pub fn top_mut(&mut self) -> &mut Activation {
        self.stack.last_mut().expect("no current frame")
    }

    /// Effective permissions of the current frame (the task's player when no
    /// frame is live yet).
    pub fn perms(&self) -> Objid {
        self.stack
            .last()
            .map(|a| a.permissions)
            .unwrap_or(self.task_perms)
    }

    fn debug_bit(&self) -> bool {
        self.stack.last().map(|a| a.debug).unwrap_or(true)
    }

    // -- raising -------------------------------------------------------------

    pub fn raise(&mut self, code: Error) -> Flow {
        Flow::Raise(exception_for(
            &self.stack,
            code.make_error_pack(None),
            self.debug_bit(),
        ))
    }

    pub fn raise_msg(&mut self, code: Error, msg: &str) -> Flow {
        Flow::Raise(exception_for(
            &self.stack,
            code.make_error_pack(Some(msg.to_string())),
            self.debug_bit(),
        ))
    }

    /// The `raise()` builtin: any value as code, explicit message and value.
    pub fn raise_value(&mut self, code: Var, msg: String, value: Var) -> Flow {
        Flow::Raise(Exception {
            backtrace: make_backtrace(&self.stack, &msg),
            stack: crate::vm::make_stack_list(&self.stack),
            code,
            msg,
            value,
            debug: self.debug_bit(),
        })
    }

    pub fn raise_ws(&mut self, e: WorldStateError) -> Flow {
        let code = e.to_error_code();
        Flow::Raise(exception_for(
            &self.stack,
            code.make_raise_pack(e.to_string(), loam_values::var::v_none()),
            self.debug_bit(),
        ))
    }

    // -- statement execution -------------------------------------------------

    pub fn run_statements(&mut self, stmts: &[Stmt]) -> ExecResult<()> {
        for stmt in stmts {
            if let Some(top) = self.stack.last_mut() {
                top.line_number = stmt.line;
            }
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ExecResult<()> {
        self.tick()?;
        match &stmt.node {
            StmtNode::Expr(e) => {
                self.eval_stmt_expr(e)?;
                Ok(())
            }
            StmtNode::Cond { arms, otherwise } => {
                for arm in arms {
                    if self.eval_stmt_expr(&arm.condition)?.is_true() {
                        return self.run_statements(&arm.statements);
                    }
                }
                self.run_statements(otherwise)
            }
            StmtNode::While {
                id,
                condition,
                body,
            } => {
                while self.eval_stmt_expr(condition)?.is_true() {
                    if self.loop_iteration(id.as_ref(), body)? {
                        break;
                    }
                }
                Ok(())
            }
            StmtNode::ForList { id, expr, body } => {
                let list = self.eval_stmt_expr(expr)?;
                let Variant::List(l) = list.variant() else {
                    return Err(self.raise(E_TYPE));
                };
                let items: Vec<Var> = l.iter().cloned().collect();
                for item in items {
                    self.top_mut().set_var_sym(id, item);
                    if self.loop_iteration(Some(id), body)? {
                        break;
                    }
                }
                Ok(())
            }
            StmtNode::ForRange { id, from, to, body } => {
                let from_v = self.eval_stmt_expr(from)?;
                let to_v = self.eval_stmt_expr(to)?;
                match (from_v.variant(), to_v.variant()) {
                    (Variant::Int(a), Variant::Int(b)) => {
                        let (a, b) = (*a, *b);
                        for i in a..=b {
                            self.top_mut().set_var_sym(id, v_int(i));
                            if self.loop_iteration(Some(id), body)? {
                                break;
                            }
                        }
                        Ok(())
                    }
                    (Variant::Obj(a), Variant::Obj(b)) => {
                        let (a, b) = (a.0, b.0);
                        for i in a..=b {
                            self.top_mut()
                                .set_var_sym(id, loam_values::var::v_obj(i));
                            if self.loop_iteration(Some(id), body)? {
                                break;
                            }
                        }
                        Ok(())
                    }
                    (_, _) => Err(self.raise(E_TYPE)),
                }
            }
            StmtNode::Fork { id, delay, body } => {
                let delay_v = self.eval_stmt_expr(delay)?;
                self.fork_task(id.as_ref(), &delay_v, body)
            }
            StmtNode::TryExcept { body, excepts } => {
                match self.run_statements(body) {
                    Err(Flow::Raise(exc)) => {
                        for arm in excepts {
                            if self.except_matches(&arm.codes, &exc)? {
                                if let Some(id) = &arm.id {
                                    let binding = exc.as_except_binding();
                                    self.top_mut().set_var_sym(id, binding);
                                }
                                return self.run_statements(&arm.statements);
                            }
                        }
                        Err(Flow::Raise(exc))
                    }
                    other => other,
                }
            }
            StmtNode::TryFinally { body, handler } => {
                let body_result = self.run_statements(body);
                // The finally body runs on every exit except a task abort;
                // its own abnormal exit takes precedence.
                if let Err(Flow::Abort(_)) = body_result {
                    return body_result;
                }
                self.run_statements(handler)?;
                body_result
            }
            StmtNode::Break { exit } => Err(Flow::Break(exit.clone())),
            StmtNode::Continue { exit } => Err(Flow::Continue(exit.clone())),
            StmtNode::Return { expr } => {
                let value = match expr {
                    Some(e) => self.eval_stmt_expr(e)?,
                    None => v_int(0),
                };
                Err(Flow::Return(value))
            }
        }
    }

    /// Run one loop body; true means the loop should break. Break/continue
    /// signals unwind here when unnamed or naming this loop, and keep
    /// unwinding otherwise.
    fn loop_iteration(&mut self, name: Option<&Symbol>, body: &[Stmt]) -> ExecResult<bool> {
        self.tick()?;
        match self.run_statements(body) {
            Ok(()) => Ok(false),
            Err(Flow::Break(None)) => Ok(true),
            Err(Flow::Break(Some(n))) if Some(&n) == name => Ok(true),
            Err(Flow::Continue(None)) => Ok(false),
            Err(Flow::Continue(Some(n))) if Some(&n) == name => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn except_matches(&mut self, codes: &CatchCodes, exc: &Exception) -> ExecResult<bool> {
        match codes {
            CatchCodes::Any => Ok(true),
            CatchCodes::Codes(args) => {
                let codes = self.eval_args(args)?;
                Ok(codes.iter().any(|c| *c == exc.code))
            }
        }
    }

    /// Evaluate an expression in statement position: when the raising
    /// frame's debug bit is clear, the exception collapses to its code
    /// value here.
    pub fn eval_stmt_expr(&mut self, expr: &Expr) -> ExecResult<Var> {
        match self.eval_expr(expr) {
            Err(Flow::Raise(exc)) if !exc.debug => Ok(exc.code),
            other => other,
        }
    }

    // -- expression evaluation -----------------------------------------------

    pub fn eval_expr(&mut self, expr: &Expr) -> ExecResult<Var> {
        match expr {
            Expr::Value(v) => Ok(v.clone()),
            Expr::Id(name) => match self.top().get_var(name) {
                Ok(v) => Ok(v),
                Err(e) => Err(self.raise(e)),
            },
            Expr::Length => {
                let len = self.top().index_env.last().copied();
                match len {
                    Some(len) => Ok(v_int(len)),
                    None => Err(self.raise(E_VARNF)),
                }
            }
            Expr::And(l, r) => {
                self.tick()?;
                let lv = self.eval_expr(l)?;
                if lv.is_true() {
                    self.eval_expr(r)
                } else {
                    Ok(lv)
                }
            }
            Expr::Or(l, r) => {
                self.tick()?;
                let lv = self.eval_expr(l)?;
                if lv.is_true() {
                    Ok(lv)
                } else {
                    self.eval_expr(r)
                }
            }
            Expr::Unary(op, e) => {
                self.tick()?;
                let v = self.eval_expr(e)?;
                let result = match op {
                    UnaryOp::Not => Ok(v_bool(!v.is_true())),
                    UnaryOp::Neg => v.negative(),
                };
                result.map_err(|e| self.raise(e))
            }
            Expr::Binary(op, l, r) => {
                self.tick()?;
                let lv = self.eval_expr(l)?;
                let rv = self.eval_expr(r)?;
                self.binary_op(*op, &lv, &rv)
            }
            Expr::Cond {
                condition,
                consequence,
                alternative,
            } => {
                self.tick()?;
                if self.eval_expr(condition)?.is_true() {
                    self.eval_expr(consequence)
                } else {
                    self.eval_expr(alternative)
                }
            }
            Expr::Index(base, idx) => {
                self.tick()?;
                let base_v = self.eval_expr(base)?;
                let idx_v = self.eval_index_expr(&base_v, idx)?;
                self.index_value(&base_v, &idx_v)
            }
            Expr::Range { base, from, to } => {
                self.tick()?;
                let base_v = self.eval_expr(base)?;
                let (from_v, to_v) = self.eval_range_exprs(&base_v, from, to)?;
                base_v
                    .range(from_v, to_v)
                    .map_err(|e| self.raise(e))
            }
            Expr::List(args) => {
                self.tick()?;
                let items = self.eval_args(args)?;
                Ok(v_list(items))
            }
            Expr::Prop { location, property } => {
                self.tick()?;
                let loc = self.eval_expr(location)?;
                let name = self.eval_expr(property)?;
                self.get_prop(&loc, &name)
            }
            Expr::Assign { left, right } => {
                self.tick()?;
                let value = self.eval_expr(right)?;
                self.assign(left, value)
            }
            Expr::Scatter(items, rhs) => {
                self.tick()?;
                let value = self.eval_expr(rhs)?;
                self.scatter_assign(items, &value)?;
                Ok(value)
            }
            Expr::Catch {
                trye,
                codes,
                except,
            } => {
                self.tick()?;
                match self.eval_expr(trye) {
                    Err(Flow::Raise(exc)) => {
                        if self.except_matches(codes, &exc)? {
                            match except {
                                Some(e) => self.eval_expr(e),
                                None => Ok(exc.code),
                            }
                        } else {
                            Err(Flow::Raise(exc))
                        }
                    }
                    other => other,
                }
            }
            Expr::Verb {
                location,
                verb,
                args,
            } => {
                let loc = self.eval_expr(location)?;
                let verb_name = self.eval_expr(verb)?;
                let args = self.eval_args(args)?;
                let Variant::Obj(target) = loc.variant() else {
                    return Err(self.raise(E_TYPE));
                };
                let Variant::Str(name) = verb_name.variant() else {
                    return Err(self.raise(E_TYPE));
                };
                let name = name.as_str().to_string();
                self.call_verb(*target, &name, args, None)
            }
            Expr::Call { function, args } => {
                let args = self.eval_args(args)?;
                crate::builtins::dispatch(self, function, args)
            }
        }
    }

    fn binary_op(&mut self, op: BinaryOp, l: &Var, r: &Var) -> ExecResult<Var> {
        let result = match op {
            BinaryOp::Add => l.add(r),
            BinaryOp::Sub => l.sub(r),
            BinaryOp::Mul => l.mul(r),
            BinaryOp::Div => l.div(r),
            BinaryOp::Mod => l.modulus(r),
            BinaryOp::Exp => l.pow(r),
            BinaryOp::Eq => Ok(v_bool(l == r)),
            BinaryOp::NEq => Ok(v_bool(l != r)),
            BinaryOp::Lt => l.compare(r).map(|o| v_bool(o.is_lt())),
            BinaryOp::LtE => l.compare(r).map(|o| v_bool(o.is_le())),
            BinaryOp::Gt => l.compare(r).map(|o| v_bool(o.is_gt())),
            BinaryOp::GtE => l.compare(r).map(|o| v_bool(o.is_ge())),
            BinaryOp::In => r.index_in(l),
        };
        result.map_err(|e| self.raise(e))
    }

    /// Evaluate an index expression with `$` bound to the base's length.
    fn eval_index_expr(&mut self, base: &Var, idx: &Expr) -> ExecResult<Var> {
        let len = base.index_length().unwrap_or(0);
        self.top_mut().index_env.push(len);
        let result = self.eval_expr(idx);
        self.top_mut().index_env.pop();
        result
    }

    fn eval_range_exprs(
        &mut self,
        base: &Var,
        from: &Expr,
        to: &Expr,
    ) -> ExecResult<(i64, i64)> {
        let len = base.index_length().unwrap_or(0);
        self.top_mut().index_env.push(len);
        let result: ExecResult<(Var, Var)> = (|| {
            let f = self.eval_expr(from)?;
            let t = self.eval_expr(to)?;
            Ok((f, t))
        })();
        self.top_mut().index_env.pop();
        let (f, t) = result?;
        let (Variant::Int(f), Variant::Int(t)) = (f.variant(), t.variant()) else {
            return Err(self.raise(E_TYPE));
        };
        Ok((*f, *t))
    }

    /// One-element indexing; integer indices are 1-based, string keys do
    /// association-list lookup.
    fn index_value(&mut self, base: &Var, idx: &Var) -> ExecResult<Var> {
        match idx.variant() {
            Variant::Int(i) => {
                if *i < 1 {
                    return Err(self.raise(E_RANGE));
                }
                base.index((*i - 1) as usize).map_err(|e| self.raise(e))
            }
            Variant::Str(key) => base.assoc_get(key).map_err(|e| self.raise(e)),
            _ => Err(self.raise(E_TYPE)),
        }
    }

    /// Evaluate an argument list, splicing `@expr` lists in place.
    pub fn eval_args(&mut self, args: &[Arg]) -> ExecResult<Vec<Var>> {
        let mut out = vec![];
        for arg in args {
            match arg {
                Arg::Normal(e) => out.push(self.eval_expr(e)?),
                Arg::Splice(e) => {
                    let v = self.eval_expr(e)?;
                    let Variant::List(l) = v.variant() else {
                        return Err(self.raise(E_TYPE));
                    };
                    out.extend(l.iter().cloned());
                }
            }
        }
        Ok(out)
    }

    // -- lvalues -------------------------------------------------------------

    /// Read the current value of an assignable expression, for composite
    /// updates.
    fn fetch_lvalue(&mut self, expr: &Expr) -> ExecResult<Var> {
        match expr {
            Expr::Id(name) => match self.top().get_var(name) {
                Ok(v) => Ok(v),
                Err(e) => Err(self.raise(e)),
            },
            Expr::Prop { location, property } => {
                let loc = self.eval_expr(location)?;
                let name = self.eval_expr(property)?;
                self.get_prop(&loc, &name)
            }
            Expr::Index(base, idx) => {
                let base_v = self.fetch_lvalue(base)?;
                let idx_v = self.eval_index_expr(&base_v, idx)?;
                self.index_value(&base_v, &idx_v)
            }
            Expr::Range { base, from, to } => {
                let base_v = self.fetch_lvalue(base)?;
                let (f, t) = self.eval_range_exprs(&base_v, from, to)?;
                base_v.range(f, t).map_err(|e| self.raise(e))
            }
            _ => Err(self.raise(E_INVARG)),
        }
    }

    /// Store into an assignable expression. Index and range writes rebuild
    /// the composite bottom-up through the base lvalue.
    pub fn assign(&mut self, lhs: &Expr, value: Var) -> ExecResult<Var> {
        match lhs {
            Expr::Id(name) => {
                self.top_mut().set_var_sym(name, value.clone());
                Ok(value)
            }
            Expr::Prop { location, property } => {
                let loc = self.eval_expr(location)?;
                let name = self.eval_expr(property)?;
                self.set_prop(&loc, &name, &value)?;
                Ok(value)
            }
            Expr::Index(base, idx) => {
                let old = self.fetch_lvalue(base)?;
                let idx_v = self.eval_index_expr(&old, idx)?;
                let updated = match idx_v.variant() {
                    Variant::Int(i) => {
                        if *i < 1 {
                            return Err(self.raise(E_RANGE));
                        }
                        old.index_set((*i - 1) as usize, &value)
                    }
                    Variant::Str(key) => old.assoc_set(key, &value),
                    _ => Err(E_TYPE),
                };
                let updated = updated.map_err(|e| self.raise(e))?;
                self.assign(base, updated)?;
                Ok(value)
            }
            Expr::Range { base, from, to } => {
                let old = self.fetch_lvalue(base)?;
                let (f, t) = self.eval_range_exprs(&old, from, to)?;
                let updated = old
                    .rangeset(value.clone(), f, t)
                    .map_err(|e| self.raise(e))?;
                self.assign(base, updated)?;
                Ok(value)
            }
            _ => Err(self.raise(E_INVARG)),
        }
    }

    /// Scatter assignment: the right-hand side list is distributed across
    /// required, optional and rest targets.
    fn scatter_assign(&mut self, items: &[ScatterItem], value: &Var) -> ExecResult<()> {
        let Variant::List(list) = value.variant() else {
            return Err(self.raise(E_TYPE));
        };
        let args: Vec<Var> = list.iter().cloned().collect();
        let nargs = args.len();
        let required = items
            .iter()
            .filter(|i| i.kind == ScatterKind::Required)
            .count();
        let optional = items
            .iter()
            .filter(|i| i.kind == ScatterKind::Optional)
            .count();
        let has_rest = items.iter().any(|i| i.kind == ScatterKind::Rest);
        if nargs < required || (!has_rest && nargs > required + optional) {
            return Err(self.raise(E_ARGS));
        }

        // Optionals fill left-to-right from whatever exceeds the required
        // count; the rest target takes the remainder.
        let mut optionals_to_fill = (nargs - required).min(optional);
        let rest_len = if has_rest {
            nargs - required - optionals_to_fill
        } else {
            0
        };

        let mut next = 0usize;
        for item in items {
            match item.kind {
                ScatterKind::Required => {
                    let v = args[next].clone();
                    next += 1;
                    self.top_mut().set_var_sym(&item.id, v);
                }
                ScatterKind::Optional => {
                    if optionals_to_fill > 0 {
                        optionals_to_fill -= 1;
                        let v = args[next].clone();
                        next += 1;
                        self.top_mut().set_var_sym(&item.id, v);
                    } else if let Some(default) = &item.expr {
                        let v = self.eval_expr(default)?;
                        self.top_mut().set_var_sym(&item.id, v);
                    }
                }
                ScatterKind::Rest => {
                    let rest: Vec<Var> = args[next..next + rest_len].to_vec();
                    next += rest_len;
                    self.top_mut().set_var_sym(&item.id, v_list(rest));
                }
            }
        }
        Ok(())
    }

    // -- property access -----------------------------------------------------

    pub fn get_prop(&mut self, loc: &Var, name: &Var) -> ExecResult<Var> {
        let Variant::Obj(oid) = loc.variant() else {
            return Err(self.raise(E_TYPE));
        };
        let Variant::Str(name) = name.variant() else {
            return Err(self.raise(E_TYPE));
        };
        let oid = *oid;
        let name = Symbol::mk(name.as_str());
        if !self.tx().valid(oid) {
            return Err(self.raise(E_INVIND));
        }
        // Builtin-property reads can be marked wizard-only.
        if WorldTx::is_builtin_property(&name)
            && self.options().protected_properties.contains(&name)
        {
            let perms = self.perms();
            if !self.tx().is_wizard(perms) {
                return Err(self.raise(E_PERM));
            }
        }
        let perms = self.perms();
        match self.tx().retrieve_property(perms, oid, &name) {
            Ok(v) => Ok(v),
            Err(e) => Err(self.raise_ws(e)),
        }
    }

    pub fn set_prop(&mut self, loc: &Var, name: &Var, value: &Var) -> ExecResult<()> {
        let Variant::Obj(oid) = loc.variant() else {
            return Err(self.raise(E_TYPE));
        };
        let Variant::Str(name) = name.variant() else {
            return Err(self.raise(E_TYPE));
        };
        let oid = *oid;
        let name = Symbol::mk(name.as_str());
        if !self.tx().valid(oid) {
            return Err(self.raise(E_INVIND));
        }
        let perms = self.perms();
        match self.tx().update_property(perms, oid, &name, value) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.raise_ws(e)),
        }
    }

    // -- verb calls ----------------------------------------------------------

    /// Call `target:verb(args)`: resolve through the inheritance chain,
    /// push a fresh frame with the verb owner's permissions, run the body.
    pub fn call_verb(
        &mut self,
        target: Objid,
        verb: &str,
        args: Vec<Var>,
        command: Option<&ParsedCommand>,
    ) -> ExecResult<Var> {
        self.tick()?;
        if self.stack.len() >= self.options().max_stack_depth {
            return Err(self.raise(E_MAXREC));
        }
        if !self.tx().valid(target) {
            return Err(self.raise(E_INVIND));
        }
        let (definer, vd) = match self.tx().find_method_verb(target, verb) {
            Ok(found) => found,
            Err(WorldStateError::VerbNotFound(_, _)) => return Err(self.raise(E_VERBNF)),
            Err(e) => return Err(self.raise_ws(e)),
        };
        self.call_resolved_verb(target, definer, &vd, verb, args, command)
    }

    /// Call an already-resolved verb; command dispatch and `pass()` land
    /// here directly.
    pub fn call_resolved_verb(
        &mut self,
        target: Objid,
        definer: Objid,
        vd: &crate::db::objects::VerbDef,
        verb: &str,
        args: Vec<Var>,
        command: Option<&ParsedCommand>,
    ) -> ExecResult<Var> {
        let Some(program) = vd.program.clone() else {
            return Err(self.raise(E_VERBNF));
        };
        let (player, caller) = match self.stack.last() {
            Some(top) => (top.player, top.this),
            None => (self.player, self.player),
        };
        let activation = Activation::new_for_verb(
            program.clone(),
            target,
            player,
            caller,
            vd.owner,
            vd.flags.contains(VerbFlag::Debug),
            verb,
            vd.names.clone(),
            definer,
            vd.owner,
            args,
            command,
        );
        self.stack.push(activation);
        let body = program.stmts.clone();
        let result = self.run_statements(&body);
        self.stack.pop();
        match result {
            Ok(()) => Ok(v_int(0)),
            Err(Flow::Return(v)) => Ok(v),
            // Loop control never legitimately crosses a frame.
            Err(Flow::Break(_)) | Err(Flow::Continue(_)) => Ok(v_int(0)),
            Err(flow) => Err(flow),
        }
    }

    /// `pass(@args)`: re-dispatch the current verb name starting above its
    /// definer.
    pub fn pass_verb(&mut self, args: Vec<Var>) -> ExecResult<Var> {
        let (definer, this, verb_name) = {
            let top = self.top();
            (top.verb_definer, top.this, top.verb_name.clone())
        };
        let parent = match self.tx().parent_of(definer) {
            Ok(p) => p,
            Err(e) => return Err(self.raise_ws(e)),
        };
        if parent == NOTHING {
            return Err(self.raise(E_VERBNF));
        }
        let (found_definer, vd) = match self.tx().find_method_verb(parent, &verb_name) {
            Ok(found) => found,
            Err(WorldStateError::VerbNotFound(_, _)) => return Err(self.raise(E_VERBNF)),
            Err(e) => return Err(self.raise_ws(e)),
        };
        self.call_resolved_verb(this, found_definer, &vd, &verb_name, args, None)
    }

    /// Run a bare program in a synthetic frame (the eval path).
    pub fn run_program(&mut self, program: Program, perms: Objid) -> ExecResult<Var> {
        let activation = Activation::new_for_verb(
            program.clone(),
            NOTHING,
            self.player,
            self.player,
            perms,
            true,
            "eval",
            vec!["eval".to_string()],
            NOTHING,
            perms,
            vec![],
            None,
        );
        self.stack.push(activation);
        let body = program.stmts.clone();
        let result = self.run_statements(&body);
        self.stack.pop();
        match result {
            Ok(()) => Ok(v_int(0)),
            Err(Flow::Return(v)) => Ok(v),
            Err(Flow::Break(_)) | Err(Flow::Continue(_)) => Ok(v_int(0)),
            Err(flow) => Err(flow),
        }
    }

    // -- fork ----------------------------------------------------------------

    fn fork_task(
        &mut self,
        id: Option<&Symbol>,
        delay: &Var,
        body: &[Stmt],
    ) -> ExecResult<()> {
        let delay = match delay.variant() {
            Variant::Int(secs) if *secs >= 0 => Duration::from_secs(*secs as u64),
            Variant::Float(secs) if *secs >= 0.0 => Duration::from_secs_f64(*secs),
            _ => return Err(self.raise(E_INVARG)),
        };
        self.check_queued_task_quota()?;

        let task_id = self.scheduler.reserve_task_id();
        if let Some(id) = id {
            self.top_mut().set_var_sym(id, v_int(task_id));
        }
        let template = {
            let top = self.top();
            let mut activation = top.clone();
            activation.program = Program::new(body.to_vec());
            activation.index_env.clear();
            activation
        };
        let fork = ForkRequest {
            task_id,
            delay,
            player: self.top().player,
            perms: self.perms(),
            handler_object: self.handler_object,
            activation: template,
        };
        self.deferred.push(DeferredAction::Fork(fork));
        Ok(())
    }

    /// The quota gate applied before any new queued task is created.
    pub fn check_queued_task_quota(&mut self) -> ExecResult<()> {
        let perms = self.perms();
        let limit = match self.tx().raw_property(perms, &Symbol::mk("queued_task_limit")) {
            Ok(v) => match v.variant() {
                Variant::Int(n) if *n >= 0 => Some(*n as usize),
                _ => self.options().queued_task_limit,
            },
            Err(_) => self.options().queued_task_limit,
        };
        if let Some(limit) = limit {
            if self.scheduler.queued_count_for(perms) >= limit {
                return Err(self.raise(Error::E_QUOTA));
            }
        }
        Ok(())
    }

    // -- suspension ----------------------------------------------------------

    /// Commit the running transaction, run the deferred effects, and leave
    /// the task without an active transaction. A conflict aborts (the task
    /// loop retries from the top if nothing committed yet).
    pub fn commit_point(&mut self) -> ExecResult<()> {
        let tx = self.take_tx();
        match tx.commit() {
            CommitResult::Success => {
                self.committed_once = true;
                self.run_deferred();
                Ok(())
            }
            CommitResult::ConflictRetry => {
                self.discard_deferred();
                Err(Flow::Abort(TaskAbortReason::Conflict))
            }
        }
    }

    /// Open a fresh transaction with background-class limits after a wake.
    fn begin_fresh_transaction(&mut self) {
        let options = self.options();
        self.tx = Some(self.world.db.begin_tx());
        self.ticks_remaining = options.bg_ticks;
        self.deadline = Instant::now() + options.bg_seconds;
        self.start_time = SystemTime::now();
        self.is_background = true;
        self.scheduler.mark_running(self.task_id, true);
    }

    /// `suspend(n)`: commit, park until the wake time (or an explicit
    /// `resume`), and continue in a fresh transaction under background
    /// limits. A suspension already in the past returns immediately.
    pub fn suspend(&mut self, delay: Option<Duration>) -> ExecResult<Var> {
        self.check_queued_task_quota()?;
        self.record_position();
        self.commit_point()?;

        if delay == Some(Duration::ZERO) {
            self.begin_fresh_transaction();
            return Ok(v_int(0));
        }

        let wake_time = delay.map(|d| SystemTime::now() + d);
        let rx = self
            .scheduler
            .register_suspend(self.task_id, wake_time, false);
        match rx.recv() {
            Ok(Wake::Resume(value)) => {
                self.begin_fresh_transaction();
                Ok(value)
            }
            Ok(Wake::Error(e)) => {
                self.begin_fresh_transaction();
                Err(self.raise(e))
            }
            Ok(Wake::Abort) | Err(_) => Err(Flow::Abort(TaskAbortReason::Kill)),
        }
    }

    /// `read(player)`: park until the connection's next in-band line
    /// arrives. EOF wakes the task with an invalid-argument error.
    pub fn read_line(&mut self, who: Objid) -> ExecResult<Var> {
        let Some(conn) = self.world.connections.get(who) else {
            return Err(self.raise(E_INVARG));
        };
        self.check_queued_task_quota()?;
        self.record_position();

        let rx = self.scheduler.register_suspend(self.task_id, None, true);
        let (wake_tx, wake_rx) = flume::unbounded();
        if !conn.set_reader(wake_tx) {
            self.scheduler.mark_running(self.task_id, self.is_background);
            return Err(self.raise(E_INVARG));
        }
        self.commit_point().map_err(|e| {
            conn.wake_reader(Wake::Abort);
            e
        })?;

        // Wait on both the connection reader slot and the scheduler's own
        // wake handle (kill arrives on the latter).
        loop {
            if let Ok(wake) = wake_rx.try_recv() {
                return self.finish_read(wake);
            }
            if let Ok(wake) = rx.try_recv() {
                conn.wake_reader(Wake::Abort);
                return self.finish_read(wake);
            }
            match wake_rx.recv_timeout(Duration::from_millis(25)) {
                Ok(wake) => return self.finish_read(wake),
                Err(flume::RecvTimeoutError::Timeout) => continue,
                Err(flume::RecvTimeoutError::Disconnected) => {
                    return Err(Flow::Abort(TaskAbortReason::Kill));
                }
            }
        }
    }

    fn finish_read(&mut self, wake: Wake) -> ExecResult<Var> {
        match wake {
            Wake::Resume(value) => {
                self.begin_fresh_transaction();
                Ok(value)
            }
            Wake::Error(e) => {
                self.begin_fresh_transaction();
                Err(self.raise(e))
            }
            Wake::Abort => Err(Flow::Abort(TaskAbortReason::Kill)),
        }
    }

    /// Tell the scheduler where this task stands, for `queued_tasks`.
    pub fn record_position(&mut self) {
        let (perms, verb_name, verb_definer, this, line) = match self.stack.last() {
            Some(top) => (
                top.permissions,
                top.verb_name.clone(),
                top.verb_definer,
                top.this,
                top.line_number,
            ),
            None => (self.player, String::new(), NOTHING, self.player, 0),
        };
        self.scheduler
            .record_position(self.task_id, perms, &verb_name, verb_definer, this, line);
    }

    // -- deferred effects ----------------------------------------------------

    /// Queue a line of output for a player's connection, delivered after
    /// commit.
    pub fn notify(&mut self, player: Objid, message: ConnectionMessage) {
        self.deferred.push(DeferredAction::Notify { player, message });
    }

    pub fn run_deferred(&mut self) {
        let actions = std::mem::take(&mut self.deferred);
        for action in actions {
            match action {
                DeferredAction::Notify { player, message } => {
                    if let Some(conn) = self.world.connections.get(player) {
                        conn.output.push(message);
                    }
                }
                DeferredAction::Boot { player } => {
                    if let Some(conn) = self.world.connections.get(player) {
                        conn.wake_reader(Wake::Error(E_INVARG));
                        conn.output.close();
                    }
                }
                DeferredAction::Fork(fork) => {
                    self.scheduler.submit_fork(fork);
                }
                DeferredAction::Shutdown(message) => {
                    self.world.request_shutdown(message);
                }
                DeferredAction::Checkpoint => {
                    let snapshot = self.world.db.snapshot();
                    let sink = self.world.snapshot_sink.lock();
                    match sink.as_ref() {
                        Some(sink) => {
                            if let Err(e) = sink.write_snapshot(snapshot) {
                                warn!(error = ?e, "checkpoint failed");
                            }
                        }
                        None => warn!("checkpoint requested but no snapshot sink configured"),
                    }
                }
                DeferredAction::Log { message, is_error } => {
                    if is_error {
                        tracing::error!(target: "moo", "{message}");
                    } else {
                        tracing::info!(target: "moo", "{message}");
                    }
                }
                DeferredAction::ReloadOptions => {
                    self.world.reload_options();
                }
            }
        }
    }

    /// Abandon the transaction and all deferred effects.
    pub fn rollback(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.rollback();
        }
        self.discard_deferred();
    }

    /// Drop the deferred queue, releasing any task ids reserved for forks
    /// that will now never start.
    fn discard_deferred(&mut self) {
        for action in std::mem::take(&mut self.deferred) {
            if let DeferredAction::Fork(fork) = action {
                self.scheduler.release_task_id(fork.task_id);
            }
        }
    }

    // -- task entry points ---------------------------------------------------

    /// Execute whatever the task was started for.
    pub fn perform_start(&mut self, start: &TaskStart) -> ExecResult<Var> {
        match start {
            TaskStart::Command { line } => self.perform_command(line),
            TaskStart::Verb {
                vloc,
                verb,
                args,
                argstr,
            } => {
                let pc = ParsedCommand {
                    verb: verb.clone(),
                    argstr: argstr.clone(),
                    args: args.clone(),
                    dobjstr: String::new(),
                    dobj: NOTHING,
                    prepstr: String::new(),
                    prep: loam_values::model::r#match::PrepSpec::None,
                    iobjstr: String::new(),
                    iobj: NOTHING,
                };
                self.call_verb(*vloc, verb, args.clone(), Some(&pc))
            }
            TaskStart::Program { program } => {
                let perms = self.task_perms;
                self.run_program(program.clone(), perms)
            }
            TaskStart::Fork(fork) => {
                let program = fork.activation.program.clone();
                self.stack.push(fork.activation.clone());
                let body = program.stmts.clone();
                let result = self.run_statements(&body);
                self.stack.pop();
                match result {
                    Ok(()) => Ok(v_int(0)),
                    Err(Flow::Return(v)) => Ok(v),
                    Err(Flow::Break(_)) | Err(Flow::Continue(_)) => Ok(v_int(0)),
                    Err(flow) => Err(flow),
                }
            }
        }
    }

    /// The in-task half of command dispatch: parse the line, offer it to the
    /// system verb `do_command`, then fall back to verb-matching on player,
    /// location, direct and indirect objects.
    fn perform_command(&mut self, line: &str) -> ExecResult<Var> {
        let player = self.player;
        let Some(pc) = ({
            let tx = self.tx.as_mut().expect("task has no active transaction");
            let mut env = WsMatchEnv { tx, player };
            parse_command(line, &mut env)
        }) else {
            return Ok(v_int(0));
        };

        // $do_command gets first refusal on every command.
        let words: Vec<Var> = parse_into_words(line).iter().map(|w| v_str(w)).collect();
        if let Some(result) = self.call_system_verb("do_command", words, line)? {
            if result.is_true() {
                return Ok(v_int(0));
            }
        }

        let location = self.tx().location_of(player).unwrap_or(NOTHING);
        let candidates = [player, location, pc.dobj, pc.iobj];
        for this in candidates {
            if !this.is_positive() {
                continue;
            }
            let spec = pc.args_spec(this);
            let found = match self.tx().find_command_verb(this, &pc.verb, &spec) {
                Ok(found) => found,
                Err(e) => return Err(self.raise_ws(e)),
            };
            if let Some((definer, vd)) = found {
                return self.call_resolved_verb(
                    this,
                    definer,
                    &vd,
                    &pc.verb,
                    pc.args.clone(),
                    Some(&pc),
                );
            }
        }

        // No match: the location's `huh` verb gets a say, else the stock
        // complaint.
        if location.is_positive() {
            let found = match self
                .tx()
                .find_command_verb(location, "huh", &pc.args_spec(location))
            {
                Ok(found) => found,
                Err(e) => return Err(self.raise_ws(e)),
            };
            if let Some((definer, vd)) = found {
                return self.call_resolved_verb(
                    location,
                    definer,
                    &vd,
                    "huh",
                    pc.args.clone(),
                    Some(&pc),
                );
            }
        }
        self.notify(
            player,
            ConnectionMessage::Text("I couldn't understand that.".to_string()),
        );
        Ok(v_int(0))
    }

    /// Call a system verb on the handler object, if it exists.
    pub fn call_system_verb(
        &mut self,
        verb: &str,
        args: Vec<Var>,
        argstr: &str,
    ) -> ExecResult<Option<Var>> {
        let handler = self.handler_object;
        if !self.tx().valid(handler) {
            return Ok(None);
        }
        let found = match self.tx().find_method_verb(handler, verb) {
            Ok(found) => found,
            Err(WorldStateError::VerbNotFound(_, _)) => return Ok(None),
            Err(e) => return Err(self.raise_ws(e)),
        };
        let (definer, vd) = found;
        let pc = ParsedCommand {
            verb: verb.to_string(),
            argstr: argstr.to_string(),
            args: args.clone(),
            dobjstr: String::new(),
            dobj: NOTHING,
            prepstr: String::new(),
            prep: loam_values::model::r#match::PrepSpec::None,
            iobjstr: String::new(),
            iobj: NOTHING,
        };
        let result = self.call_resolved_verb(handler, definer, &vd, verb, args, Some(&pc))?;
        Ok(Some(result))
    }

    /// Random integer in `[1, n]` from the task-local generator.
    pub fn random_int(&mut self, n: i64) -> i64 {
        use rand::Rng;
        self.rng.gen_range(1..=n)
    }
}
