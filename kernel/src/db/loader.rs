//! The loading interface the external database reader drives to populate a
//! fresh store. Operations here bypass the permission layer entirely; they
//! exist for startup, before any task runs, and for test fixtures.

use std::sync::Arc;

use loam_values::model::objects::{ObjFlag, ObjFlags};
use loam_values::model::props::PropFlags;
use loam_values::model::r#match::VerbArgsSpec;
use loam_values::model::verbs::VerbFlags;
use loam_values::model::{CommitResult, WorldStateError};
use loam_values::var::objid::Objid;
use loam_values::var::{Symbol, Var};
use loam_values::NOTHING;

use crate::db::objects::{Object, PropValue, VerbDef};
use crate::db::tx::WorldTx;
use crate::db::Db;
use crate::program::Program;

pub struct Loader {
    tx: WorldTx,
}

impl Loader {
    #[must_use]
    pub fn new(db: Arc<Db>) -> Self {
        let tx = db.begin_tx();
        Self { tx }
    }

    /// Create an object with an explicit id, growing the id watermark as
    /// needed.
    pub fn create_object(&mut self, id: Objid, name: &str, owner: Objid) -> Objid {
        let mut obj = Object::new(id);
        obj.name = name.to_string();
        obj.owner = if owner == NOTHING { id } else { owner };
        self.tx.install_raw(obj);
        id
    }

    pub fn set_parent(&mut self, obj: Objid, parent: Objid) -> Result<(), WorldStateError> {
        self.tx.set_parent_raw(obj, parent)
    }

    pub fn set_location(&mut self, obj: Objid, location: Objid) -> Result<(), WorldStateError> {
        self.tx.move_object(obj, location)
    }

    pub fn set_flags(&mut self, obj: Objid, flags: ObjFlags) -> Result<(), WorldStateError> {
        self.tx.set_flags_raw(obj, flags)
    }

    pub fn make_player(&mut self, obj: Objid) -> Result<(), WorldStateError> {
        self.tx.set_player_flag(obj, true)
    }

    pub fn make_wizard(&mut self, obj: Objid) -> Result<(), WorldStateError> {
        let mut flags = self.tx.flags_of(obj)?;
        flags.set(ObjFlag::Wizard);
        flags.set(ObjFlag::Programmer);
        self.tx.set_flags_raw(obj, flags)
    }

    pub fn define_property(
        &mut self,
        obj: Objid,
        name: &str,
        owner: Objid,
        flags: PropFlags,
        value: Var,
    ) -> Result<(), WorldStateError> {
        self.tx.define_property_raw(
            obj,
            Symbol::mk(name),
            PropValue {
                owner,
                flags,
                value: Some(value),
            },
        )
    }

    pub fn add_verb(
        &mut self,
        obj: Objid,
        names: &[&str],
        owner: Objid,
        flags: VerbFlags,
        args: VerbArgsSpec,
        program: Program,
    ) -> Result<(), WorldStateError> {
        self.tx.add_verb_raw(
            obj,
            VerbDef {
                names: names.iter().map(|s| s.to_string()).collect(),
                owner,
                flags,
                args,
                program: Some(program),
            },
        )
    }

    /// Publish everything loaded so far. Loading happens before tasks exist,
    /// so a conflict here means the loader was misused.
    pub fn commit(self) -> Result<(), WorldStateError> {
        match self.tx.commit() {
            CommitResult::Success => Ok(()),
            CommitResult::ConflictRetry => Err(WorldStateError::InvalidArgument(
                "loader transaction conflicted; load must happen before tasks run".to_string(),
            )),
        }
    }

    /// Begin a fresh loading transaction against the same store.
    #[must_use]
    pub fn reopen(db: Arc<Db>) -> Self {
        Self::new(db)
    }
}
