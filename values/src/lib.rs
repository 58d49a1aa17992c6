//! The value model shared by every layer of the server: MOO values themselves,
//! the metadata types that describe objects, properties and verbs, and the
//! small utilities (flag sets, verb-name matching, string quoting) that the
//! kernel and hosts both need.

pub mod model;
pub mod util;
pub mod var;

use crate::var::objid::Objid;

/// The "nothing" sentinel, used wherever an object reference is absent.
pub const NOTHING: Objid = Objid(-1);
/// Returned by object matching when more than one object fits.
pub const AMBIGUOUS: Objid = Objid(-2);
/// Returned by object matching when nothing fits.
pub const FAILED_MATCH: Objid = Objid(-3);
/// The system object, on which server options and system verbs live.
pub const SYSTEM_OBJECT: Objid = Objid(0);
/// Unbound connections are handed object ids counting down from here.
pub const FIRST_CONNECTION_ID: i64 = -4;
