use crate::util::{BitEnum, ToPrimitive};

/// Flags on an object. `User` marks player objects.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ObjFlag {
    User = 0,
    Programmer = 1,
    Wizard = 2,
    Read = 3,
    Write = 4,
    Fertile = 5,
}

impl ToPrimitive for ObjFlag {
    fn to_u16(&self) -> u16 {
        *self as u16
    }
}

pub type ObjFlags = BitEnum<ObjFlag>;
