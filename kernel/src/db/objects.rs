use std::collections::HashMap;

use bincode::{Decode, Encode};

use loam_values::model::objects::ObjFlags;
use loam_values::model::props::PropFlags;
use loam_values::model::r#match::VerbArgsSpec;
use loam_values::model::verbs::VerbFlags;
use loam_values::var::objid::Objid;
use loam_values::var::{Symbol, Var};
use loam_values::NOTHING;

use crate::program::Program;

/// A verb as stored on its defining object.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct VerbDef {
    /// The name-pattern words; each may carry one `*` abbreviation point.
    pub names: Vec<String>,
    pub owner: Objid,
    pub flags: VerbFlags,
    pub args: VerbArgsSpec,
    /// Present iff the verb is programmed (and so callable).
    pub program: Option<Program>,
}

impl VerbDef {
    /// Whether `candidate` matches any of this verb's name-pattern words.
    #[must_use]
    pub fn matches_name(&self, candidate: &str) -> bool {
        self.names
            .iter()
            .any(|w| loam_values::util::verbname_cmp(w, candidate))
    }

    #[must_use]
    pub fn names_string(&self) -> String {
        self.names.join(" ")
    }
}

/// A property slot held locally on an object: either the defining slot or a
/// descendant's override. A `None` value on an override means the slot is
/// clear and delegates up the parent chain (the defining slot always carries
/// a value).
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct PropValue {
    pub owner: Objid,
    pub flags: PropFlags,
    pub value: Option<Var>,
}

/// One object in the store. `children` and `contents` are the maintained
/// inverses of `parent` and `location`; relationships are by id only, never
/// by pointer.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Object {
    pub id: Objid,
    pub owner: Objid,
    pub parent: Objid,
    pub location: Objid,
    pub children: Vec<Objid>,
    pub contents: Vec<Objid>,
    pub name: String,
    pub flags: ObjFlags,
    /// Names of the properties defined on this object (not inherited).
    pub propdefs: Vec<Symbol>,
    /// Local slots: defining slots for `propdefs` members, override slots
    /// for inherited properties.
    pub propvals: HashMap<Symbol, PropValue>,
    /// Verbs defined on this object, in definition order.
    pub verbs: Vec<VerbDef>,
}

impl Object {
    #[must_use]
    pub fn new(id: Objid) -> Self {
        Self {
            id,
            owner: NOTHING,
            parent: NOTHING,
            location: NOTHING,
            children: vec![],
            contents: vec![],
            name: String::new(),
            flags: ObjFlags::new(),
            propdefs: vec![],
            propvals: HashMap::new(),
            verbs: vec![],
        }
    }

    #[must_use]
    pub fn defines_property(&self, name: &Symbol) -> bool {
        self.propdefs.iter().any(|p| p == name)
    }

    /// Index of the first verb matching `name`, if any.
    #[must_use]
    pub fn find_verb_named(&self, name: &str) -> Option<usize> {
        self.verbs.iter().position(|v| v.matches_name(name))
    }
}
