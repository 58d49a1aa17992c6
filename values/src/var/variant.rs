use bincode::{Decode, Encode};

use crate::var::error::Error;
use crate::var::list::List;
use crate::var::objid::Objid;
use crate::var::string::Str;

/// The tagged union behind `Var`.
#[derive(Clone, Encode, Decode)]
pub enum Variant {
    None,
    Int(i64),
    Float(f64),
    Str(Str),
    Obj(Objid),
    Err(Error),
    List(List),
}
