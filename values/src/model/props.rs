use crate::util::{BitEnum, ToPrimitive};

/// Permission bits on a property slot. `Chown` transfers slot ownership to
/// the owner of each descendant that inherits it.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PropFlag {
    Read = 0,
    Write = 1,
    Chown = 2,
}

impl ToPrimitive for PropFlag {
    fn to_u16(&self) -> u16 {
        *self as u16
    }
}

pub type PropFlags = BitEnum<PropFlag>;

/// Parse a property permission string like "rwc".
pub fn prop_flags_parse(s: &str) -> Option<PropFlags> {
    let mut flags = PropFlags::new();
    for c in s.chars() {
        match c.to_ascii_lowercase() {
            'r' => flags.set(PropFlag::Read),
            'w' => flags.set(PropFlag::Write),
            'c' => flags.set(PropFlag::Chown),
            _ => return None,
        }
    }
    Some(flags)
}

/// Render property permissions as "rwc" form.
#[must_use]
pub fn prop_flags_string(flags: PropFlags) -> String {
    let mut s = String::new();
    if flags.contains(PropFlag::Read) {
        s.push('r');
    }
    if flags.contains(PropFlag::Write) {
        s.push('w');
    }
    if flags.contains(PropFlag::Chown) {
        s.push('c');
    }
    s
}
