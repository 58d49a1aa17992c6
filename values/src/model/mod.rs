pub mod r#match;
pub mod objects;
pub mod props;
pub mod verbs;

use thiserror::Error as ThisError;

use crate::var::error::Error;
use crate::var::objid::Objid;

/// Errors out of the object store. These surface to MOO code as error values
/// via [`WorldStateError::to_error_code`].
#[derive(ThisError, Debug, Clone, Eq, PartialEq)]
pub enum WorldStateError {
    #[error("Object not found: {0}")]
    ObjectNotFound(Objid),
    #[error("Object permission denied")]
    ObjectPermissionDenied,
    #[error("Recursive move: {0} to {1}")]
    RecursiveMove(Objid, Objid),

    #[error("Property not found: {0}.{1}")]
    PropertyNotFound(Objid, String),
    #[error("Property permission denied")]
    PropertyPermissionDenied,
    #[error("Duplicate property definition: {0}.{1}")]
    DuplicatePropertyDefinition(Objid, String),
    #[error("Property type mismatch")]
    PropertyTypeMismatch,

    #[error("Verb not found: {0}:{1}")]
    VerbNotFound(Objid, String),
    #[error("Verb permission denied")]
    VerbPermissionDenied,
    #[error("Verb not programmed: {0}:{1}")]
    VerbNotProgrammed(Objid, String),
    #[error("Duplicate verb: {0}:{1}")]
    DuplicateVerb(Objid, String),

    #[error("Invalid argument to store operation: {0}")]
    InvalidArgument(String),
}

impl WorldStateError {
    /// The MOO error value this failure raises inside the interpreter.
    #[must_use]
    pub fn to_error_code(&self) -> Error {
        match self {
            Self::ObjectNotFound(_) => Error::E_INVIND,
            Self::ObjectPermissionDenied
            | Self::PropertyPermissionDenied
            | Self::VerbPermissionDenied => Error::E_PERM,
            Self::RecursiveMove(_, _) => Error::E_RECMOVE,
            Self::PropertyNotFound(_, _) => Error::E_PROPNF,
            Self::DuplicatePropertyDefinition(_, _) => Error::E_INVARG,
            Self::PropertyTypeMismatch => Error::E_TYPE,
            Self::VerbNotFound(_, _) | Self::VerbNotProgrammed(_, _) => Error::E_VERBNF,
            Self::DuplicateVerb(_, _) => Error::E_INVARG,
            Self::InvalidArgument(_) => Error::E_INVARG,
        }
    }
}

/// The outcome of attempting to commit a transaction against the store.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CommitResult {
    /// All changes published atomically.
    Success,
    /// Another transaction got there first; re-run the whole attempt against
    /// a fresh snapshot.
    ConflictRetry,
}
