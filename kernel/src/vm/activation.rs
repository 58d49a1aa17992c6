use std::collections::HashMap;

use loam_values::var::error::Error::E_VARNF;
use loam_values::var::{
    v_int, v_list, v_objid, v_str, v_string, Symbol, Var, VarType,
};
use loam_values::var::objid::Objid;

use crate::program::Program;
use crate::tasks::command_parse::ParsedCommand;

/// One frame on the task call stack: a single verb (or builtin) invocation,
/// with its variable environment, effective permissions and verb metadata.
#[derive(Clone)]
pub struct Activation {
    /// Variable environment; identifiers are case-insensitive.
    pub env: HashMap<Symbol, Var>,
    pub this: Objid,
    pub player: Objid,
    /// Effective permissions: the verb owner, unless changed by
    /// `set_task_perms`.
    pub permissions: Objid,
    pub caller: Objid,
    pub verb_name: String,
    pub verb_names: Vec<String>,
    pub verb_definer: Objid,
    pub verb_owner: Objid,
    /// Clear means exceptions raised here collapse to their error value.
    pub debug: bool,
    pub line_number: u32,
    /// Set when this frame is a builtin invocation rather than a verb.
    pub builtin: Option<String>,
    /// Nested `$` scopes for index expressions.
    pub index_env: Vec<i64>,
    pub program: Program,
}

impl Activation {
    /// A frame for a verb call. The environment is seeded with the
    /// conventional variables and, for command verbs, the parse results.
    #[allow(clippy::too_many_arguments)]
    pub fn new_for_verb(
        program: Program,
        this: Objid,
        player: Objid,
        caller: Objid,
        permissions: Objid,
        debug: bool,
        verb_name: &str,
        verb_names: Vec<String>,
        verb_definer: Objid,
        verb_owner: Objid,
        args: Vec<Var>,
        command: Option<&ParsedCommand>,
    ) -> Self {
        let mut a = Self {
            env: HashMap::new(),
            this,
            player,
            permissions,
            caller,
            verb_name: verb_name.to_string(),
            verb_names,
            verb_definer,
            verb_owner,
            debug,
            line_number: 0,
            builtin: None,
            index_env: vec![],
            program,
        };
        a.set_var("this", v_objid(this));
        a.set_var("player", v_objid(player));
        a.set_var("caller", v_objid(caller));
        a.set_var("verb", v_str(verb_name));
        a.set_var("args", v_list(args));
        a.set_var("NUM", v_int(VarType::TYPE_INT as i64));
        a.set_var("INT", v_int(VarType::TYPE_INT as i64));
        a.set_var("FLOAT", v_int(VarType::TYPE_FLOAT as i64));
        a.set_var("OBJ", v_int(VarType::TYPE_OBJ as i64));
        a.set_var("STR", v_int(VarType::TYPE_STR as i64));
        a.set_var("ERR", v_int(VarType::TYPE_ERR as i64));
        a.set_var("LIST", v_int(VarType::TYPE_LIST as i64));
        match command {
            Some(pc) => {
                a.set_var("argstr", v_string(pc.argstr.clone()));
                a.set_var("dobjstr", v_string(pc.dobjstr.clone()));
                a.set_var("dobj", v_objid(pc.dobj));
                a.set_var("prepstr", v_string(pc.prepstr.clone()));
                a.set_var("iobjstr", v_string(pc.iobjstr.clone()));
                a.set_var("iobj", v_objid(pc.iobj));
            }
            None => {
                a.set_var("argstr", v_str(""));
                a.set_var("dobjstr", v_str(""));
                a.set_var("dobj", v_objid(loam_values::NOTHING));
                a.set_var("prepstr", v_str(""));
                a.set_var("iobjstr", v_str(""));
                a.set_var("iobj", v_objid(loam_values::NOTHING));
            }
        }
        a
    }

    /// A frame recording a builtin invocation, for tracebacks and `callers`.
    pub fn new_for_builtin(name: &str, from: &Activation) -> Self {
        Self {
            env: HashMap::new(),
            this: from.this,
            player: from.player,
            permissions: from.permissions,
            caller: from.this,
            verb_name: name.to_string(),
            verb_names: vec![name.to_string()],
            verb_definer: loam_values::NOTHING,
            verb_owner: from.permissions,
            debug: from.debug,
            line_number: from.line_number,
            builtin: Some(name.to_string()),
            index_env: vec![],
            program: Program::empty(),
        }
    }

    pub fn set_var(&mut self, name: &str, value: Var) {
        self.env.insert(Symbol::mk(name), value);
    }

    pub fn set_var_sym(&mut self, name: &Symbol, value: Var) {
        self.env.insert(name.clone(), value);
    }

    pub fn get_var(&self, name: &Symbol) -> Result<Var, loam_values::var::error::Error> {
        self.env.get(name).cloned().ok_or(E_VARNF)
    }
}
