use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};

/// An object number. Negative values are sentinels: #-1 is "nothing", #-2
/// "ambiguous match", #-3 "failed match", and #-4 downwards are ids handed to
/// not-yet-authenticated connections.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Encode, Decode)]
pub struct Objid(pub i64);

impl Display for Objid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Objid {
    #[must_use]
    pub fn to_literal(&self) -> String {
        format!("#{}", self.0)
    }

    /// True for ids that can name a stored object (sentinels excluded).
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 >= 0
    }

    /// True for the ids handed out to unauthenticated connections.
    #[must_use]
    pub fn is_connection_id(&self) -> bool {
        self.0 <= crate::FIRST_CONNECTION_ID
    }
}
