use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{error, info};

use loam_values::model::objects::{ObjFlag, ObjFlags};
use loam_values::model::props::{PropFlag, PropFlags};
use loam_values::model::r#match::VerbArgsSpec;
use loam_values::model::verbs::{VerbFlag, VerbFlags};
use loam_values::model::{CommitResult, WorldStateError};
use loam_values::var::objid::Objid;
use loam_values::var::{v_int, v_list, v_objid, v_string, Symbol, Var, Variant};
use loam_values::NOTHING;

use crate::db::objects::{Object, PropValue, VerbDef};
use crate::db::{CommittedSlot, Db};
use crate::program::Program;

type Result<T> = std::result::Result<T, WorldStateError>;

/// How a verb is named in the verb-manipulation operations: by (pattern)
/// name, or by 1-based index when numeric descriptors are enabled.
#[derive(Debug, Clone)]
pub enum VerbDesc {
    Name(String),
    Index(usize),
}

/// A single transaction against the store: a consistent snapshot plus a
/// write set, validated and installed atomically on commit. Property and
/// verb lookups performed through a transaction must not outlive it; a retry
/// re-reads everything against a fresh snapshot.
pub struct WorldTx {
    db: Arc<Db>,
    snapshot: HashMap<Objid, CommittedSlot>,
    /// Object versions this transaction's outcome depends on
    /// (`None` = observed absent).
    touched: HashMap<Objid, Option<u64>>,
    /// Local copies, copy-on-write. `None` marks deletion.
    local: HashMap<Objid, Option<Arc<Object>>>,
    dirty: HashSet<Objid>,
    players: HashSet<Objid>,
    players_version: u64,
    players_dirty: bool,
    base_next_objid: i64,
    next_objid: i64,
}

impl WorldTx {
    pub(crate) fn new(
        db: Arc<Db>,
        snapshot: HashMap<Objid, CommittedSlot>,
        players: HashSet<Objid>,
        players_version: u64,
        next_objid: i64,
    ) -> Self {
        Self {
            db,
            snapshot,
            touched: HashMap::new(),
            local: HashMap::new(),
            dirty: HashSet::new(),
            players,
            players_version,
            players_dirty: false,
            base_next_objid: next_objid,
            next_objid,
        }
    }

    /// Attempt to publish this transaction's writes.
    pub fn commit(self) -> CommitResult {
        let writes: HashMap<Objid, Option<Arc<Object>>> = self
            .dirty
            .iter()
            .map(|oid| (*oid, self.local.get(oid).cloned().flatten()))
            .collect();
        let players = self
            .players_dirty
            .then_some((self.players_version, self.players));
        let created = (self.next_objid != self.base_next_objid)
            .then_some((self.base_next_objid, self.next_objid));
        self.db.commit_tx(&self.touched, writes, players, created)
    }

    /// Discard the transaction. Dropping does the same; this exists to make
    /// the intent readable at call sites.
    pub fn rollback(self) {}

    // -- raw object access ---------------------------------------------------

    fn fetch(&mut self, oid: Objid) -> Option<Arc<Object>> {
        if let Some(local) = self.local.get(&oid) {
            return local.clone();
        }
        let slot = self.snapshot.get(&oid);
        self.touched
            .entry(oid)
            .or_insert_with(|| slot.map(|s| s.version));
        let obj = slot.map(|s| s.obj.clone());
        self.local.insert(oid, obj.clone());
        obj
    }

    pub(crate) fn get_obj(&mut self, oid: Objid) -> Result<Arc<Object>> {
        self.fetch(oid).ok_or(WorldStateError::ObjectNotFound(oid))
    }

    fn obj_mut(&mut self, oid: Objid) -> Result<&mut Object> {
        self.get_obj(oid)?;
        self.dirty.insert(oid);
        let slot = self.local.get_mut(&oid).unwrap();
        let arc = slot.as_mut().unwrap();
        Ok(Arc::make_mut(arc))
    }

    pub fn valid(&mut self, oid: Objid) -> bool {
        oid.is_positive() && self.fetch(oid).is_some()
    }

    pub fn max_object(&mut self) -> Objid {
        Objid(self.next_objid - 1)
    }

    /// Every ancestor of `oid`, nearest first, excluding `oid` itself.
    pub fn ancestors(&mut self, oid: Objid) -> Result<Vec<Objid>> {
        let mut result = vec![];
        let mut cur = self.get_obj(oid)?.parent;
        while cur != NOTHING {
            result.push(cur);
            cur = self.get_obj(cur)?.parent;
        }
        Ok(result)
    }

    fn descendants(&mut self, oid: Objid) -> Result<Vec<Objid>> {
        let mut result = vec![];
        let mut queue = self.get_obj(oid)?.children.clone();
        while let Some(c) = queue.pop() {
            result.push(c);
            queue.extend(self.get_obj(c)?.children.clone());
        }
        Ok(result)
    }

    // -- permissions ---------------------------------------------------------

    pub fn flags_of(&mut self, oid: Objid) -> Result<ObjFlags> {
        Ok(self.get_obj(oid)?.flags)
    }

    pub fn owner_of(&mut self, oid: Objid) -> Result<Objid> {
        Ok(self.get_obj(oid)?.owner)
    }

    pub fn is_wizard(&mut self, perms: Objid) -> bool {
        self.fetch(perms)
            .map(|o| o.flags.contains(ObjFlag::Wizard))
            .unwrap_or(false)
    }

    pub fn is_programmer(&mut self, perms: Objid) -> bool {
        self.fetch(perms)
            .map(|o| {
                o.flags.contains(ObjFlag::Programmer) || o.flags.contains(ObjFlag::Wizard)
            })
            .unwrap_or(false)
    }

    /// Owner-or-wizard: the standard control check.
    pub fn controls(&mut self, perms: Objid, oid: Objid) -> Result<bool> {
        if self.is_wizard(perms) {
            return Ok(true);
        }
        Ok(self.owner_of(oid)? == perms)
    }

    // -- object lifecycle ----------------------------------------------------

    pub fn create_object(
        &mut self,
        perms: Objid,
        parent: Objid,
        owner: Objid,
    ) -> Result<Objid> {
        if parent != NOTHING {
            let pflags = self.flags_of(parent)?;
            if !self.controls(perms, parent)? && !pflags.contains(ObjFlag::Fertile) {
                return Err(WorldStateError::ObjectPermissionDenied);
            }
        }
        if owner != NOTHING && !self.valid(owner) {
            return Err(WorldStateError::InvalidArgument(
                "invalid owner".to_string(),
            ));
        }

        let oid = Objid(self.next_objid);
        self.next_objid += 1;

        let mut obj = Object::new(oid);
        obj.parent = parent;
        // Owner #-1 means "owned by itself".
        obj.owner = if owner == NOTHING { oid } else { owner };
        self.local.insert(oid, Some(Arc::new(obj)));
        self.dirty.insert(oid);

        if parent != NOTHING {
            self.obj_mut(parent)?.children.push(oid);
        }
        Ok(oid)
    }

    /// Remove an object outright: contents dumped to #-1, children
    /// reparented to the object's own parent. In-world `:recycle`/`:exitfunc`
    /// courtesies are the caller's job.
    pub fn recycle_object(&mut self, perms: Objid, oid: Objid) -> Result<()> {
        if !self.controls(perms, oid)? {
            return Err(WorldStateError::ObjectPermissionDenied);
        }
        let obj = self.get_obj(oid)?;
        let parent = obj.parent;
        let contents = obj.contents.clone();
        let children = obj.children.clone();

        for c in contents {
            self.obj_mut(c)?.location = NOTHING;
        }
        for c in children {
            self.obj_mut(c)?.parent = parent;
            if parent != NOTHING {
                self.obj_mut(parent)?.children.push(c);
            }
        }
        if parent != NOTHING {
            self.obj_mut(parent)?.children.retain(|c| *c != oid);
        }
        let location = self.get_obj(oid)?.location;
        if location != NOTHING {
            self.obj_mut(location)?.contents.retain(|c| *c != oid);
        }
        if self.players.contains(&oid) {
            self.players.remove(&oid);
            self.players_dirty = true;
        }
        self.local.insert(oid, None);
        self.dirty.insert(oid);
        Ok(())
    }

    pub fn parent_of(&mut self, oid: Objid) -> Result<Objid> {
        Ok(self.get_obj(oid)?.parent)
    }

    pub fn children_of(&mut self, oid: Objid) -> Result<Vec<Objid>> {
        Ok(self.get_obj(oid)?.children.clone())
    }

    pub fn location_of(&mut self, oid: Objid) -> Result<Objid> {
        Ok(self.get_obj(oid)?.location)
    }

    pub fn contents_of(&mut self, oid: Objid) -> Result<Vec<Objid>> {
        Ok(self.get_obj(oid)?.contents.clone())
    }

    pub fn name_of(&mut self, oid: Objid) -> Result<String> {
        Ok(self.get_obj(oid)?.name.clone())
    }

    /// Re-parent an object. Fails with a recursive-move error if `new_parent`
    /// is the object itself or a descendant of it, and refuses parents whose
    /// ancestry defines properties that collide with definitions on the
    /// object or its descendants.
    pub fn change_parent(
        &mut self,
        perms: Objid,
        oid: Objid,
        new_parent: Objid,
    ) -> Result<()> {
        if !self.controls(perms, oid)? {
            return Err(WorldStateError::ObjectPermissionDenied);
        }
        if new_parent != NOTHING {
            if new_parent == oid {
                return Err(WorldStateError::RecursiveMove(oid, new_parent));
            }
            let mut cur = new_parent;
            while cur != NOTHING {
                if cur == oid {
                    return Err(WorldStateError::RecursiveMove(oid, new_parent));
                }
                cur = self.get_obj(cur)?.parent;
            }
            let pflags = self.flags_of(new_parent)?;
            if !self.controls(perms, new_parent)? && !pflags.contains(ObjFlag::Fertile) {
                return Err(WorldStateError::ObjectPermissionDenied);
            }

            // A property defined on an ancestor may not be re-defined below.
            let mut new_ancestry_props: HashSet<Symbol> = HashSet::new();
            let mut cur = new_parent;
            while cur != NOTHING {
                let o = self.get_obj(cur)?;
                new_ancestry_props.extend(o.propdefs.iter().cloned());
                cur = o.parent;
            }
            let mut subtree = vec![oid];
            subtree.extend(self.descendants(oid)?);
            for member in &subtree {
                let o = self.get_obj(*member)?;
                for p in &o.propdefs {
                    if new_ancestry_props.contains(p) {
                        return Err(WorldStateError::DuplicatePropertyDefinition(
                            *member,
                            p.to_string(),
                        ));
                    }
                }
            }
        }

        let old_parent = self.get_obj(oid)?.parent;
        if old_parent == new_parent {
            return Ok(());
        }

        // Drop override slots for properties the new ancestry no longer
        // defines; slots for properties defined by shared ancestors survive.
        let mut kept_props: HashSet<Symbol> = HashSet::new();
        let mut cur = new_parent;
        while cur != NOTHING {
            let o = self.get_obj(cur)?;
            kept_props.extend(o.propdefs.iter().cloned());
            cur = o.parent;
        }
        let mut old_ancestry_props: HashSet<Symbol> = HashSet::new();
        let mut cur = old_parent;
        while cur != NOTHING {
            let o = self.get_obj(cur)?;
            old_ancestry_props.extend(o.propdefs.iter().cloned());
            cur = o.parent;
        }
        if !old_ancestry_props.is_empty() {
            let mut subtree = vec![oid];
            subtree.extend(self.descendants(oid)?);
            for member in subtree {
                let own: HashSet<Symbol> = self
                    .get_obj(member)?
                    .propdefs
                    .iter()
                    .cloned()
                    .collect();
                let obj = self.obj_mut(member)?;
                obj.propvals.retain(|name, _| {
                    own.contains(name)
                        || kept_props.contains(name)
                        || !old_ancestry_props.contains(name)
                });
            }
        }

        if old_parent != NOTHING {
            self.obj_mut(old_parent)?.children.retain(|c| *c != oid);
        }
        if new_parent != NOTHING {
            self.obj_mut(new_parent)?.children.push(oid);
        }
        self.obj_mut(oid)?.parent = new_parent;
        Ok(())
    }

    /// Relocate an object, maintaining the contents index. Fails with a
    /// recursive-move error on location cycles. The `:accept` negotiation is
    /// the builtin layer's job.
    pub fn move_object(&mut self, oid: Objid, new_loc: Objid) -> Result<()> {
        if new_loc != NOTHING {
            let mut cur = new_loc;
            while cur != NOTHING {
                if cur == oid {
                    return Err(WorldStateError::RecursiveMove(oid, new_loc));
                }
                cur = self.get_obj(cur)?.location;
            }
        }
        let old_loc = self.get_obj(oid)?.location;
        if old_loc == new_loc {
            return Ok(());
        }
        if old_loc != NOTHING {
            self.obj_mut(old_loc)?.contents.retain(|c| *c != oid);
        }
        if new_loc != NOTHING {
            self.obj_mut(new_loc)?.contents.push(oid);
        }
        self.obj_mut(oid)?.location = new_loc;
        Ok(())
    }

    /// Move the object to the least unused nonnegative id below its own,
    /// rewriting every reference to it across the whole store.
    pub fn renumber_object(&mut self, oid: Objid) -> Result<Objid> {
        let mut new_id = None;
        for candidate in 0..oid.0 {
            if !self.valid(Objid(candidate)) {
                new_id = Some(Objid(candidate));
                break;
            }
        }
        let Some(new_id) = new_id else {
            return Ok(oid);
        };

        let all_ids: Vec<Objid> = {
            let mut ids: HashSet<Objid> = self.snapshot.keys().copied().collect();
            for (id, slot) in &self.local {
                match slot {
                    Some(_) => {
                        ids.insert(*id);
                    }
                    None => {
                        ids.remove(id);
                    }
                }
            }
            ids.into_iter().collect()
        };

        let rewrite = |x: &mut Objid| {
            if *x == oid {
                *x = new_id;
            }
        };
        for id in all_ids {
            // Touch every object: renumbering rewrites the world.
            let obj = self.obj_mut(id)?;
            rewrite(&mut obj.owner);
            rewrite(&mut obj.parent);
            rewrite(&mut obj.location);
            obj.children.iter_mut().for_each(rewrite);
            obj.contents.iter_mut().for_each(rewrite);
            for v in &mut obj.verbs {
                rewrite(&mut v.owner);
            }
            for pv in obj.propvals.values_mut() {
                rewrite(&mut pv.owner);
            }
        }

        let mut moved = self
            .get_obj(oid)?
            .as_ref()
            .clone();
        moved.id = new_id;
        if moved.owner == oid {
            moved.owner = new_id;
        }
        self.local.insert(new_id, Some(Arc::new(moved)));
        self.dirty.insert(new_id);
        self.touched.entry(new_id).or_insert(None);
        self.local.insert(oid, None);
        self.dirty.insert(oid);

        if self.players.contains(&oid) {
            self.players.remove(&oid);
            self.players.insert(new_id);
            self.players_dirty = true;
        }
        Ok(new_id)
    }

    // -- player set ----------------------------------------------------------

    pub fn players(&mut self) -> Vec<Objid> {
        let mut p: Vec<Objid> = self.players.iter().copied().collect();
        p.sort();
        p
    }

    pub fn is_player(&mut self, oid: Objid) -> bool {
        self.players.contains(&oid)
    }

    pub fn set_player_flag(&mut self, oid: Objid, is_player: bool) -> Result<()> {
        self.obj_mut(oid)?
            .flags
            .set_to(ObjFlag::User, is_player);
        if is_player {
            self.players.insert(oid);
        } else {
            self.players.remove(&oid);
        }
        self.players_dirty = true;
        Ok(())
    }

    // -- properties ----------------------------------------------------------

    /// The object on which `name` is defined, looking at `oid` and its
    /// ancestors.
    pub fn prop_definer(&mut self, oid: Objid, name: &Symbol) -> Result<Option<Objid>> {
        let mut cur = oid;
        while cur != NOTHING {
            let o = self.get_obj(cur)?;
            if o.defines_property(name) {
                return Ok(Some(cur));
            }
            cur = o.parent;
        }
        Ok(None)
    }

    /// The slot handle for `name` as seen from `oid`: its definer plus the
    /// effective local slot (owner, flags, and the local value if any). This
    /// distinguishes "defined but locally clear" from "undefined".
    pub fn prop_slot(&mut self, oid: Objid, name: &Symbol) -> Result<(Objid, PropValue)> {
        let definer = self
            .prop_definer(oid, name)?
            .ok_or_else(|| WorldStateError::PropertyNotFound(oid, name.to_string()))?;
        let obj = self.get_obj(oid)?;
        if let Some(local) = obj.propvals.get(name) {
            return Ok((definer, local.clone()));
        }
        let def_slot = self
            .get_obj(definer)?
            .propvals
            .get(name)
            .cloned()
            .ok_or_else(|| WorldStateError::PropertyNotFound(definer, name.to_string()))?;
        // Chown-flagged properties belong to each inheritor's owner.
        let owner = if def_slot.flags.contains(PropFlag::Chown) {
            self.get_obj(oid)?.owner
        } else {
            def_slot.owner
        };
        Ok((
            definer,
            PropValue {
                owner,
                flags: def_slot.flags,
                value: None,
            },
        ))
    }

    fn prop_readable(&mut self, perms: Objid, slot: &PropValue) -> bool {
        slot.flags.contains(PropFlag::Read) || slot.owner == perms || self.is_wizard(perms)
    }

    fn prop_writable(&mut self, perms: Objid, slot: &PropValue) -> bool {
        slot.flags.contains(PropFlag::Write) || slot.owner == perms || self.is_wizard(perms)
    }

    /// Read a property with no permission checks and no builtin synthesis.
    /// Used for server-option plumbing.
    pub fn raw_property(&mut self, oid: Objid, name: &Symbol) -> Result<Var> {
        self.inherited_value(oid, name)
    }

    /// The concrete value of `name` as seen from `oid`: the local slot value
    /// if set, else the nearest ancestor's. A defined property with no
    /// concrete value anywhere is a data-model bug.
    fn inherited_value(&mut self, oid: Objid, name: &Symbol) -> Result<Var> {
        self.prop_definer(oid, name)?
            .ok_or_else(|| WorldStateError::PropertyNotFound(oid, name.to_string()))?;
        let mut cur = oid;
        while cur != NOTHING {
            let o = self.get_obj(cur)?;
            if let Some(pv) = o.propvals.get(name) {
                if let Some(v) = &pv.value {
                    return Ok(v.clone());
                }
            }
            cur = o.parent;
        }
        error!(%oid, %name, "defined property with no concrete value anywhere");
        Err(WorldStateError::PropertyNotFound(oid, name.to_string()))
    }

    /// Full property read: builtin properties first, then the defined set
    /// with inheritance.
    pub fn retrieve_property(&mut self, perms: Objid, oid: Objid, name: &Symbol) -> Result<Var> {
        if !self.valid(oid) {
            return Err(WorldStateError::ObjectNotFound(oid));
        }
        if let Some(v) = self.builtin_property(oid, name)? {
            return Ok(v);
        }
        let (_, slot) = self.prop_slot(oid, name)?;
        if !self.prop_readable(perms, &slot) {
            return Err(WorldStateError::PropertyPermissionDenied);
        }
        self.inherited_value(oid, name)
    }

    /// Builtin properties are synthesized from object attributes.
    pub fn builtin_property(&mut self, oid: Objid, name: &Symbol) -> Result<Option<Var>> {
        let obj = self.get_obj(oid)?;
        let v = match name.as_str().to_ascii_lowercase().as_str() {
            "name" => v_string(obj.name.clone()),
            "owner" => v_objid(obj.owner),
            "location" => v_objid(obj.location),
            "contents" => v_list(obj.contents.iter().map(|o| v_objid(*o)).collect()),
            "programmer" => v_int(i64::from(obj.flags.contains(ObjFlag::Programmer))),
            "wizard" => v_int(i64::from(obj.flags.contains(ObjFlag::Wizard))),
            "player" => v_int(i64::from(obj.flags.contains(ObjFlag::User))),
            "r" => v_int(i64::from(obj.flags.contains(ObjFlag::Read))),
            "w" => v_int(i64::from(obj.flags.contains(ObjFlag::Write))),
            "f" => v_int(i64::from(obj.flags.contains(ObjFlag::Fertile))),
            _ => return Ok(None),
        };
        Ok(Some(v))
    }

    pub fn is_builtin_property(name: &Symbol) -> bool {
        matches!(
            name.as_str().to_ascii_lowercase().as_str(),
            "name"
                | "owner"
                | "location"
                | "contents"
                | "programmer"
                | "wizard"
                | "player"
                | "r"
                | "w"
                | "f"
        )
    }

    /// Write a property, enforcing slot permissions; builtin properties
    /// enforce their own rules.
    pub fn update_property(
        &mut self,
        perms: Objid,
        oid: Objid,
        name: &Symbol,
        value: &Var,
    ) -> Result<()> {
        if !self.valid(oid) {
            return Err(WorldStateError::ObjectNotFound(oid));
        }
        if Self::is_builtin_property(name) {
            return self.update_builtin_property(perms, oid, name, value);
        }
        let (_, slot) = self.prop_slot(oid, name)?;
        if !self.prop_writable(perms, &slot) {
            return Err(WorldStateError::PropertyPermissionDenied);
        }
        let new_slot = PropValue {
            owner: slot.owner,
            flags: slot.flags,
            value: Some(value.clone()),
        };
        self.obj_mut(oid)?.propvals.insert(name.clone(), new_slot);
        Ok(())
    }

    fn update_builtin_property(
        &mut self,
        perms: Objid,
        oid: Objid,
        name: &Symbol,
        value: &Var,
    ) -> Result<()> {
        let is_wizard = self.is_wizard(perms);
        match name.as_str().to_ascii_lowercase().as_str() {
            "name" => {
                let Variant::Str(s) = value.variant() else {
                    return Err(WorldStateError::PropertyTypeMismatch);
                };
                // Renaming a player is a wizard affair; anything else, the
                // owner's.
                let is_user = self.flags_of(oid)?.contains(ObjFlag::User);
                if is_user {
                    if !is_wizard {
                        return Err(WorldStateError::PropertyPermissionDenied);
                    }
                } else if !self.controls(perms, oid)? {
                    return Err(WorldStateError::PropertyPermissionDenied);
                }
                self.obj_mut(oid)?.name = s.as_str().to_string();
                Ok(())
            }
            "owner" => {
                if !is_wizard {
                    return Err(WorldStateError::PropertyPermissionDenied);
                }
                let Variant::Obj(new_owner) = value.variant() else {
                    return Err(WorldStateError::PropertyTypeMismatch);
                };
                self.obj_mut(oid)?.owner = *new_owner;
                Ok(())
            }
            "programmer" | "wizard" => {
                if !is_wizard {
                    return Err(WorldStateError::PropertyPermissionDenied);
                }
                let flag = if name.as_str().eq_ignore_ascii_case("wizard") {
                    ObjFlag::Wizard
                } else {
                    ObjFlag::Programmer
                };
                let on = value.is_true();
                if flag == ObjFlag::Wizard {
                    info!(obj = %oid, by = %perms, on, "wizard bit changed");
                }
                self.obj_mut(oid)?.flags.set_to(flag, on);
                Ok(())
            }
            "r" | "w" | "f" => {
                if !is_wizard && !self.controls(perms, oid)? {
                    return Err(WorldStateError::PropertyPermissionDenied);
                }
                let flag = match name.as_str().to_ascii_lowercase().as_str() {
                    "r" => ObjFlag::Read,
                    "w" => ObjFlag::Write,
                    _ => ObjFlag::Fertile,
                };
                self.obj_mut(oid)?.flags.set_to(flag, value.is_true());
                Ok(())
            }
            // location/contents/player change through move and the player
            // set, never by assignment.
            _ => Err(WorldStateError::PropertyPermissionDenied),
        }
    }

    pub fn define_property(
        &mut self,
        perms: Objid,
        oid: Objid,
        name: &Symbol,
        owner: Objid,
        flags: PropFlags,
        value: Option<Var>,
    ) -> Result<()> {
        if !self.controls(perms, oid)? {
            return Err(WorldStateError::ObjectPermissionDenied);
        }
        if Self::is_builtin_property(name) {
            return Err(WorldStateError::DuplicatePropertyDefinition(
                oid,
                name.to_string(),
            ));
        }
        // No re-definition anywhere on the ancestor chain or in the subtree.
        if self.prop_definer(oid, name)?.is_some() {
            return Err(WorldStateError::DuplicatePropertyDefinition(
                oid,
                name.to_string(),
            ));
        }
        for d in self.descendants(oid)? {
            if self.get_obj(d)?.defines_property(name) {
                return Err(WorldStateError::DuplicatePropertyDefinition(
                    d,
                    name.to_string(),
                ));
            }
        }
        let obj = self.obj_mut(oid)?;
        obj.propdefs.push(name.clone());
        obj.propvals.insert(
            name.clone(),
            PropValue {
                owner,
                flags,
                value: Some(value.unwrap_or(v_int(0))),
            },
        );
        Ok(())
    }

    pub fn delete_property(&mut self, perms: Objid, oid: Objid, name: &Symbol) -> Result<()> {
        if !self.controls(perms, oid)? {
            return Err(WorldStateError::ObjectPermissionDenied);
        }
        if !self.get_obj(oid)?.defines_property(name) {
            return Err(WorldStateError::PropertyNotFound(oid, name.to_string()));
        }
        for d in self.descendants(oid)? {
            self.obj_mut(d)?.propvals.remove(name);
        }
        let obj = self.obj_mut(oid)?;
        obj.propdefs.retain(|p| p != name);
        obj.propvals.remove(name);
        Ok(())
    }

    /// Remove the local value so reads delegate to the nearest ancestor.
    /// Clearing the defining slot itself is refused.
    pub fn clear_property(&mut self, perms: Objid, oid: Objid, name: &Symbol) -> Result<()> {
        let (definer, slot) = self.prop_slot(oid, name)?;
        if !self.prop_writable(perms, &slot) {
            return Err(WorldStateError::PropertyPermissionDenied);
        }
        if definer == oid {
            return Err(WorldStateError::InvalidArgument(
                "cannot clear a property on its definer".to_string(),
            ));
        }
        self.obj_mut(oid)?.propvals.remove(name);
        Ok(())
    }

    pub fn is_property_clear(&mut self, perms: Objid, oid: Objid, name: &Symbol) -> Result<bool> {
        let (_, slot) = self.prop_slot(oid, name)?;
        if !self.prop_readable(perms, &slot) {
            return Err(WorldStateError::PropertyPermissionDenied);
        }
        Ok(slot.value.is_none())
    }

    pub fn set_property_info(
        &mut self,
        perms: Objid,
        oid: Objid,
        name: &Symbol,
        new_owner: Objid,
        new_flags: PropFlags,
        new_name: Option<Symbol>,
    ) -> Result<()> {
        let (definer, slot) = self.prop_slot(oid, name)?;
        if !self.controls(perms, oid)? && slot.owner != perms {
            return Err(WorldStateError::PropertyPermissionDenied);
        }
        if let Some(new_name) = &new_name {
            if definer != oid {
                return Err(WorldStateError::InvalidArgument(
                    "can only rename a property on its definer".to_string(),
                ));
            }
            if self.prop_definer(oid, new_name)?.is_some() {
                return Err(WorldStateError::DuplicatePropertyDefinition(
                    oid,
                    new_name.to_string(),
                ));
            }
            for d in self.descendants(oid)? {
                let obj = self.obj_mut(d)?;
                if let Some(pv) = obj.propvals.remove(name) {
                    obj.propvals.insert(new_name.clone(), pv);
                }
            }
            let obj = self.obj_mut(oid)?;
            obj.propdefs.retain(|p| p != name);
            obj.propdefs.push(new_name.clone());
            if let Some(pv) = obj.propvals.remove(name) {
                obj.propvals.insert(new_name.clone(), pv);
            }
        }
        let target_name = new_name.unwrap_or_else(|| name.clone());
        let obj = self.obj_mut(oid)?;
        let entry = obj.propvals.entry(target_name).or_insert(PropValue {
            owner: new_owner,
            flags: new_flags,
            value: None,
        });
        entry.owner = new_owner;
        entry.flags = new_flags;
        Ok(())
    }

    pub fn property_info(
        &mut self,
        perms: Objid,
        oid: Objid,
        name: &Symbol,
    ) -> Result<(Objid, PropFlags)> {
        let (_, slot) = self.prop_slot(oid, name)?;
        if !self.prop_readable(perms, &slot) {
            return Err(WorldStateError::PropertyPermissionDenied);
        }
        Ok((slot.owner, slot.flags))
    }

    /// The names of the properties defined directly on `oid`.
    pub fn property_names(&mut self, oid: Objid) -> Result<Vec<Symbol>> {
        Ok(self.get_obj(oid)?.propdefs.clone())
    }

    // -- verbs ---------------------------------------------------------------

    /// Resolve a verb for a method call: walk the parent chain matching name
    /// patterns. The executable bit gates callability.
    pub fn find_method_verb(
        &mut self,
        oid: Objid,
        name: &str,
    ) -> Result<(Objid, VerbDef)> {
        let mut cur = oid;
        while cur != NOTHING {
            let o = self.get_obj(cur)?;
            if let Some(idx) = o.find_verb_named(name) {
                let vd = o.verbs[idx].clone();
                if !vd.flags.contains(VerbFlag::Exec) {
                    return Err(WorldStateError::VerbNotFound(oid, name.to_string()));
                }
                return Ok((cur, vd));
            }
            cur = o.parent;
        }
        Err(WorldStateError::VerbNotFound(oid, name.to_string()))
    }

    /// Resolve a verb for command dispatch: name plus argument-spec match.
    pub fn find_command_verb(
        &mut self,
        oid: Objid,
        verb_word: &str,
        parsed_spec: &VerbArgsSpec,
    ) -> Result<Option<(Objid, VerbDef)>> {
        if !self.valid(oid) {
            return Ok(None);
        }
        let mut cur = oid;
        while cur != NOTHING {
            let o = self.get_obj(cur)?;
            for vd in &o.verbs {
                if vd.program.is_some()
                    && vd.matches_name(verb_word)
                    && vd.args.matches(parsed_spec)
                {
                    return Ok(Some((cur, vd.clone())));
                }
            }
            cur = o.parent;
        }
        Ok(None)
    }

    fn verb_index(&mut self, oid: Objid, desc: &VerbDesc) -> Result<usize> {
        let o = self.get_obj(oid)?;
        match desc {
            VerbDesc::Name(name) => o
                .find_verb_named(name)
                .ok_or_else(|| WorldStateError::VerbNotFound(oid, name.clone())),
            VerbDesc::Index(n) => {
                if *n == 0 || *n > o.verbs.len() {
                    return Err(WorldStateError::VerbNotFound(oid, format!("#{n}")));
                }
                Ok(n - 1)
            }
        }
    }

    fn verb_readable(&mut self, perms: Objid, vd: &VerbDef) -> bool {
        vd.flags.contains(VerbFlag::Read) || vd.owner == perms || self.is_wizard(perms)
    }

    fn verb_writable(&mut self, perms: Objid, vd: &VerbDef) -> bool {
        vd.flags.contains(VerbFlag::Write) || vd.owner == perms || self.is_wizard(perms)
    }

    /// The verb defined on `oid` (no inheritance walk) named by `desc`.
    pub fn get_verbdef(&mut self, perms: Objid, oid: Objid, desc: &VerbDesc) -> Result<VerbDef> {
        let idx = self.verb_index(oid, desc)?;
        let vd = self.get_obj(oid)?.verbs[idx].clone();
        if !self.verb_readable(perms, &vd) {
            return Err(WorldStateError::VerbPermissionDenied);
        }
        Ok(vd)
    }

    pub fn verb_names(&mut self, perms: Objid, oid: Objid) -> Result<Vec<String>> {
        let o = self.get_obj(oid)?;
        if !o.flags.contains(ObjFlag::Read) && !self.controls(perms, oid)? {
            return Err(WorldStateError::ObjectPermissionDenied);
        }
        Ok(self
            .get_obj(oid)?
            .verbs
            .iter()
            .map(VerbDef::names_string)
            .collect())
    }

    pub fn add_verb(
        &mut self,
        perms: Objid,
        oid: Objid,
        names: Vec<String>,
        owner: Objid,
        flags: VerbFlags,
        args: VerbArgsSpec,
    ) -> Result<()> {
        if !self.controls(perms, oid)? {
            return Err(WorldStateError::ObjectPermissionDenied);
        }
        if names.is_empty() {
            return Err(WorldStateError::InvalidArgument(
                "verb needs at least one name".to_string(),
            ));
        }
        self.obj_mut(oid)?.verbs.push(VerbDef {
            names,
            owner,
            flags,
            args,
            program: None,
        });
        Ok(())
    }

    pub fn delete_verb(&mut self, perms: Objid, oid: Objid, desc: &VerbDesc) -> Result<()> {
        if !self.controls(perms, oid)? {
            return Err(WorldStateError::ObjectPermissionDenied);
        }
        let idx = self.verb_index(oid, desc)?;
        self.obj_mut(oid)?.verbs.remove(idx);
        Ok(())
    }

    pub fn set_verb_info(
        &mut self,
        perms: Objid,
        oid: Objid,
        desc: &VerbDesc,
        new_owner: Option<Objid>,
        new_flags: Option<VerbFlags>,
        new_names: Option<Vec<String>>,
    ) -> Result<()> {
        let idx = self.verb_index(oid, desc)?;
        let vd = self.get_obj(oid)?.verbs[idx].clone();
        if !self.verb_writable(perms, &vd) {
            return Err(WorldStateError::VerbPermissionDenied);
        }
        if new_owner.is_some() && !self.is_wizard(perms) && new_owner != Some(perms) {
            return Err(WorldStateError::VerbPermissionDenied);
        }
        let renamed = new_names.is_some();
        {
            let obj = self.obj_mut(oid)?;
            let v = &mut obj.verbs[idx];
            if let Some(owner) = new_owner {
                v.owner = owner;
            }
            if let Some(flags) = new_flags {
                v.flags = flags;
            }
            if let Some(names) = new_names {
                v.names = names;
            }
        }
        // Renaming re-orders lookup: the renamed verb moves to the end of
        // the defining object's verb list, keeping match order consistent.
        if renamed {
            let obj = self.obj_mut(oid)?;
            let v = obj.verbs.remove(idx);
            obj.verbs.push(v);
        }
        Ok(())
    }

    pub fn set_verb_args(
        &mut self,
        perms: Objid,
        oid: Objid,
        desc: &VerbDesc,
        args: VerbArgsSpec,
    ) -> Result<()> {
        let idx = self.verb_index(oid, desc)?;
        let vd = self.get_obj(oid)?.verbs[idx].clone();
        if !self.verb_writable(perms, &vd) {
            return Err(WorldStateError::VerbPermissionDenied);
        }
        self.obj_mut(oid)?.verbs[idx].args = args;
        Ok(())
    }

    pub fn set_verb_program(
        &mut self,
        perms: Objid,
        oid: Objid,
        desc: &VerbDesc,
        program: Program,
    ) -> Result<()> {
        let idx = self.verb_index(oid, desc)?;
        let vd = self.get_obj(oid)?.verbs[idx].clone();
        if !self.verb_writable(perms, &vd) {
            return Err(WorldStateError::VerbPermissionDenied);
        }
        self.obj_mut(oid)?.verbs[idx].program = Some(program);
        Ok(())
    }

    // -- loader back-door ----------------------------------------------------
    // No permission checks; used by the loading interface before tasks run.

    pub(crate) fn install_raw(&mut self, obj: Object) {
        let id = obj.id;
        self.local.insert(id, Some(Arc::new(obj)));
        self.dirty.insert(id);
        self.touched.entry(id).or_insert(None);
        if id.0 >= self.next_objid {
            self.next_objid = id.0 + 1;
        }
    }

    pub(crate) fn set_parent_raw(&mut self, oid: Objid, parent: Objid) -> Result<()> {
        let old_parent = self.get_obj(oid)?.parent;
        if old_parent != NOTHING {
            self.obj_mut(old_parent)?.children.retain(|c| *c != oid);
        }
        if parent != NOTHING {
            self.obj_mut(parent)?.children.push(oid);
        }
        self.obj_mut(oid)?.parent = parent;
        Ok(())
    }

    pub(crate) fn set_flags_raw(&mut self, oid: Objid, flags: ObjFlags) -> Result<()> {
        self.obj_mut(oid)?.flags = flags;
        Ok(())
    }

    pub(crate) fn define_property_raw(
        &mut self,
        oid: Objid,
        name: Symbol,
        slot: PropValue,
    ) -> Result<()> {
        let obj = self.obj_mut(oid)?;
        if !obj.defines_property(&name) {
            obj.propdefs.push(name.clone());
        }
        obj.propvals.insert(name, slot);
        Ok(())
    }

    pub(crate) fn add_verb_raw(&mut self, oid: Objid, verb: VerbDef) -> Result<()> {
        self.obj_mut(oid)?.verbs.push(verb);
        Ok(())
    }

    // -- matching support ----------------------------------------------------

    /// The name and aliases of an object, for command-line object matching.
    pub fn names_of(&mut self, oid: Objid) -> Result<(String, Vec<String>)> {
        let name = self.get_obj(oid)?.name.clone();
        let aliases = match self.raw_property(oid, &Symbol::mk("aliases")) {
            Ok(v) => match v.variant() {
                Variant::List(l) => l
                    .iter()
                    .filter_map(|a| match a.variant() {
                        Variant::Str(s) => Some(s.as_str().to_string()),
                        _ => None,
                    })
                    .collect(),
                _ => vec![],
            },
            Err(_) => vec![],
        };
        Ok((name, aliases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use loam_values::model::props::PropFlag;
    use loam_values::util::BitEnum;
    use loam_values::var::v_str;

    fn test_db() -> Arc<Db> {
        Db::new()
    }

    fn wizard(tx: &mut WorldTx) -> Objid {
        let w = tx.create_object(NOTHING, NOTHING, NOTHING).unwrap();
        tx.obj_mut(w).unwrap().flags.set(ObjFlag::Wizard);
        w
    }

    #[test]
    fn test_property_inheritance() {
        let db = test_db();
        let mut tx = db.begin_tx();
        let w = wizard(&mut tx);
        let parent = tx.create_object(w, NOTHING, w).unwrap();
        let child = tx.create_object(w, parent, w).unwrap();

        let pname = Symbol::mk("description");
        tx.define_property(
            w,
            parent,
            &pname,
            w,
            BitEnum::new_with(PropFlag::Read),
            Some(v_str("a thing")),
        )
        .unwrap();

        // child inherits the parent's concrete value through its clear slot
        assert_eq!(
            tx.retrieve_property(w, child, &pname).unwrap(),
            v_str("a thing")
        );
        assert!(tx.is_property_clear(w, child, &pname).unwrap());

        // an override shadows it
        tx.update_property(w, child, &pname, &v_str("a special thing"))
            .unwrap();
        assert_eq!(
            tx.retrieve_property(w, child, &pname).unwrap(),
            v_str("a special thing")
        );
        assert!(!tx.is_property_clear(w, child, &pname).unwrap());

        // and clearing restores delegation
        tx.clear_property(w, child, &pname).unwrap();
        assert_eq!(
            tx.retrieve_property(w, child, &pname).unwrap(),
            v_str("a thing")
        );
    }

    #[test]
    fn test_no_redefinition_down_the_chain() {
        let db = test_db();
        let mut tx = db.begin_tx();
        let w = wizard(&mut tx);
        let parent = tx.create_object(w, NOTHING, w).unwrap();
        let child = tx.create_object(w, parent, w).unwrap();
        let pname = Symbol::mk("size");
        tx.define_property(w, parent, &pname, w, BitEnum::new(), Some(v_int(1)))
            .unwrap();
        let err = tx
            .define_property(w, child, &pname, w, BitEnum::new(), Some(v_int(2)))
            .unwrap_err();
        assert!(matches!(
            err,
            WorldStateError::DuplicatePropertyDefinition(_, _)
        ));
    }

    #[test]
    fn test_chparent_cycle_refused() {
        let db = test_db();
        let mut tx = db.begin_tx();
        let w = wizard(&mut tx);
        let a = tx.create_object(w, NOTHING, w).unwrap();
        let b = tx.create_object(w, a, w).unwrap();
        assert!(matches!(
            tx.change_parent(w, a, b),
            Err(WorldStateError::RecursiveMove(_, _))
        ));
        assert!(matches!(
            tx.change_parent(w, a, a),
            Err(WorldStateError::RecursiveMove(_, _))
        ));
    }

    #[test]
    fn test_move_cycle_refused() {
        let db = test_db();
        let mut tx = db.begin_tx();
        let w = wizard(&mut tx);
        let box_ = tx.create_object(w, NOTHING, w).unwrap();
        let bag = tx.create_object(w, NOTHING, w).unwrap();
        tx.move_object(bag, box_).unwrap();
        assert!(matches!(
            tx.move_object(box_, bag),
            Err(WorldStateError::RecursiveMove(_, _))
        ));
        assert_eq!(tx.contents_of(box_).unwrap(), vec![bag]);
        assert_eq!(tx.location_of(bag).unwrap(), box_);
    }

    #[test]
    fn test_verb_lookup_inherited() {
        let db = test_db();
        let mut tx = db.begin_tx();
        let w = wizard(&mut tx);
        let parent = tx.create_object(w, NOTHING, w).unwrap();
        let child = tx.create_object(w, parent, w).unwrap();
        tx.add_verb(
            w,
            parent,
            vec!["l*ook".to_string()],
            w,
            VerbFlag::rxd(),
            VerbArgsSpec::this_none_this(),
        )
        .unwrap();
        let (definer, vd) = tx.find_method_verb(child, "look").unwrap();
        assert_eq!(definer, parent);
        assert!(vd.matches_name("lo"));
        assert!(tx.find_method_verb(child, "frobnicate").is_err());
    }

    #[test]
    fn test_commit_conflict() {
        let db = test_db();
        let (w, obj) = {
            let mut tx = db.begin_tx();
            let w = wizard(&mut tx);
            let obj = tx.create_object(w, NOTHING, w).unwrap();
            tx.define_property(
                w,
                obj,
                &Symbol::mk("p"),
                w,
                BitEnum::new_with(PropFlag::Read),
                Some(v_int(0)),
            )
            .unwrap();
            assert_eq!(tx.commit(), CommitResult::Success);
            (w, obj)
        };

        // two transactions race to increment the same property
        let mut tx1 = db.begin_tx();
        let mut tx2 = db.begin_tx();
        let p = Symbol::mk("p");
        let v1 = tx1.retrieve_property(w, obj, &p).unwrap();
        tx1.update_property(w, obj, &p, &v1.add(&v_int(1)).unwrap())
            .unwrap();
        let v2 = tx2.retrieve_property(w, obj, &p).unwrap();
        tx2.update_property(w, obj, &p, &v2.add(&v_int(1)).unwrap())
            .unwrap();
        assert_eq!(tx1.commit(), CommitResult::Success);
        assert_eq!(tx2.commit(), CommitResult::ConflictRetry);

        // the retry sees the first increment and lands the second
        let mut tx3 = db.begin_tx();
        let v3 = tx3.retrieve_property(w, obj, &p).unwrap();
        tx3.update_property(w, obj, &p, &v3.add(&v_int(1)).unwrap())
            .unwrap();
        assert_eq!(tx3.commit(), CommitResult::Success);
        let mut tx4 = db.begin_tx();
        assert_eq!(tx4.retrieve_property(w, obj, &p).unwrap(), v_int(2));
    }

    #[test]
    fn test_renumber() {
        let db = test_db();
        let mut tx = db.begin_tx();
        let w = wizard(&mut tx);
        let a = tx.create_object(w, NOTHING, w).unwrap();
        let b = tx.create_object(w, a, w).unwrap();
        tx.recycle_object(w, a).unwrap();
        // b's parent became NOTHING when a was recycled; renumber b into a's
        // hole and check identity references moved
        let new_id = tx.renumber_object(b).unwrap();
        assert_eq!(new_id, a);
        assert!(tx.valid(new_id));
        assert!(!tx.valid(b));
    }
}
