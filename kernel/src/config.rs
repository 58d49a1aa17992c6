use std::collections::HashSet;
use std::time::Duration;

use loam_values::var::{Symbol, Variant};
use loam_values::SYSTEM_OBJECT;

use crate::db::tx::WorldTx;

/// Server options, defaulted here and overridden by properties on
/// `#0.server_options`. A snapshot of these lives on the `World` and is
/// refreshed by `load_server_options()`.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Tick budget for foreground (command-initiated) tasks.
    pub fg_ticks: i64,
    /// Wall-clock budget for foreground tasks.
    pub fg_seconds: Duration,
    /// Tick budget for background (forked/resumed) tasks.
    pub bg_ticks: i64,
    /// Wall-clock budget for background tasks.
    pub bg_seconds: Duration,
    /// Maximum verb/builtin call depth.
    pub max_stack_depth: usize,
    /// Cap on queued tasks per owner; `None` means unlimited.
    pub queued_task_limit: Option<usize>,
    /// How long an unauthenticated connection may linger.
    pub connect_timeout: Duration,
    pub outbound_connect_timeout: Duration,
    pub name_lookup_timeout: Duration,
    /// The input line that flushes a connection's pending input.
    pub default_flush_command: String,
    /// Whether verb descriptors may be numeric strings naming verb indices.
    pub support_numeric_verbname_strings: bool,
    /// Builtin properties whose reads require wizard permissions.
    pub protected_properties: HashSet<Symbol>,
    /// Builtin functions restricted to wizards.
    pub protected_builtins: HashSet<Symbol>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            fg_ticks: 30_000,
            fg_seconds: Duration::from_secs(5),
            bg_ticks: 15_000,
            bg_seconds: Duration::from_secs(3),
            max_stack_depth: 50,
            queued_task_limit: None,
            connect_timeout: Duration::from_secs(300),
            outbound_connect_timeout: Duration::from_secs(5),
            name_lookup_timeout: Duration::from_secs(5),
            default_flush_command: ".flush".to_string(),
            support_numeric_verbname_strings: false,
            protected_properties: HashSet::new(),
            protected_builtins: HashSet::new(),
        }
    }
}

impl ServerOptions {
    /// Read the current option set out of `#0.server_options`, falling back
    /// to defaults for anything absent or ill-typed.
    pub fn load(tx: &mut WorldTx) -> Self {
        let mut options = Self::default();
        let Ok(opts_val) = tx.raw_property(SYSTEM_OBJECT, &Symbol::mk("server_options")) else {
            return options;
        };
        let Variant::Obj(opts_obj) = opts_val.variant() else {
            return options;
        };
        let opts_obj = *opts_obj;
        let int_opt = |tx: &mut WorldTx, name: &str| -> Option<i64> {
            let v = tx.raw_property(opts_obj, &Symbol::mk(name)).ok()?;
            match v.variant() {
                Variant::Int(i) => Some(*i),
                _ => None,
            }
        };
        if let Some(v) = int_opt(tx, "fg_ticks") {
            options.fg_ticks = v.max(100);
        }
        if let Some(v) = int_opt(tx, "bg_ticks") {
            options.bg_ticks = v.max(100);
        }
        if let Some(v) = int_opt(tx, "fg_seconds") {
            options.fg_seconds = Duration::from_secs(v.max(1) as u64);
        }
        if let Some(v) = int_opt(tx, "bg_seconds") {
            options.bg_seconds = Duration::from_secs(v.max(1) as u64);
        }
        if let Some(v) = int_opt(tx, "max_stack_depth") {
            options.max_stack_depth = v.clamp(10, 10_000) as usize;
        }
        if let Some(v) = int_opt(tx, "queued_task_limit") {
            options.queued_task_limit = if v < 0 { None } else { Some(v as usize) };
        }
        if let Some(v) = int_opt(tx, "connect_timeout") {
            if v > 0 {
                options.connect_timeout = Duration::from_secs(v as u64);
            }
        }
        if let Some(v) = int_opt(tx, "outbound_connect_timeout") {
            if v > 0 {
                options.outbound_connect_timeout = Duration::from_secs(v as u64);
            }
        }
        if let Some(v) = int_opt(tx, "name_lookup_timeout") {
            if v > 0 {
                options.name_lookup_timeout = Duration::from_secs(v as u64);
            }
        }
        if let Ok(v) = tx.raw_property(opts_obj, &Symbol::mk("default_flush_command")) {
            if let Variant::Str(s) = v.variant() {
                options.default_flush_command = s.as_str().to_string();
            }
        }
        if let Some(v) = int_opt(tx, "support_numeric_verbname_strings") {
            options.support_numeric_verbname_strings = v != 0;
        }

        // The protection map: every truthy `protect_<name>` property marks
        // <name> as wizard-only, recomputed on each reload.
        if let Ok(names) = tx.property_names(opts_obj) {
            for name in names {
                let Some(stripped) = name.as_str().strip_prefix("protect_") else {
                    continue;
                };
                let stripped = Symbol::mk(stripped);
                let protected = tx
                    .raw_property(opts_obj, &name)
                    .map(|v| v.is_true())
                    .unwrap_or(false);
                if protected {
                    if crate::builtins::is_builtin_name(&stripped) {
                        options.protected_builtins.insert(stripped);
                    } else {
                        options.protected_properties.insert(stripped);
                    }
                }
            }
        }
        options
    }
}
