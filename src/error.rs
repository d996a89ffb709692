use thiserror::Error;

/// Error surface for every fallible operation in the engine.
///
/// Only [`Error::InvariantViolated`] indicates an internal bug; every other
/// variant is a normal, expected outcome of bad caller input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("tag {0} not found")]
    TagNotFound(u64),
    #[error("entity {0} not found")]
    EntityNotFound(u64),
    #[error("tag id {0} already in use")]
    DuplicateTagId(u64),
    #[error("entity id {0} already in use")]
    DuplicateEntityId(u64),
    #[error("malformed query clause: {0}")]
    MalformedClause(String),
    #[error("query attempted against a dirty context")]
    ContextDirty,
    /// Reserved for a parent/child tree facet that is out of scope for this
    /// engine; kept so the error surface stays stable if that facet is ever
    /// added at the boundary.
    #[error("operation would introduce a cycle in the parent/child tree")]
    WouldCycleInParentTree,
    #[error("internal invariant violated: {0}")]
    InvariantViolated(String),
}

pub type Result<T> = std::result::Result<T, Error>;
