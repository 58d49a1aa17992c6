use crate::util::{BitEnum, ToPrimitive};

/// Permission bits on a verb. `Exec` gates callability; `Debug` set means
/// exceptions propagate normally, clear means they collapse to error values.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum VerbFlag {
    Read = 0,
    Write = 1,
    Exec = 2,
    Debug = 3,
}

impl ToPrimitive for VerbFlag {
    fn to_u16(&self) -> u16 {
        *self as u16
    }
}

pub type VerbFlags = BitEnum<VerbFlag>;

impl VerbFlag {
    /// The default permissions for a freshly added verb.
    #[must_use]
    pub fn rxd() -> VerbFlags {
        BitEnum::new_with(Self::Read) | Self::Exec | Self::Debug
    }
}

/// Parse a verb permission string like "rxd".
pub fn verb_flags_parse(s: &str) -> Option<VerbFlags> {
    let mut flags = VerbFlags::new();
    for c in s.chars() {
        match c.to_ascii_lowercase() {
            'r' => flags.set(VerbFlag::Read),
            'w' => flags.set(VerbFlag::Write),
            'x' => flags.set(VerbFlag::Exec),
            'd' => flags.set(VerbFlag::Debug),
            _ => return None,
        }
    }
    Some(flags)
}

/// Render verb permissions as "rwxd" form.
#[must_use]
pub fn verb_flags_string(flags: VerbFlags) -> String {
    let mut s = String::new();
    if flags.contains(VerbFlag::Read) {
        s.push('r');
    }
    if flags.contains(VerbFlag::Write) {
        s.push('w');
    }
    if flags.contains(VerbFlag::Exec) {
        s.push('x');
    }
    if flags.contains(VerbFlag::Debug) {
        s.push('d');
    }
    s
}
