//! Error taxonomy for the cell store.
//!
//! Errors fall into four families: client errors (malformed requests or violated
//! preconditions), conflicts (lost races, drained-access timeouts), not-found,
//! and consistency errors (tree/store divergence, fatal and never retried).
//! Best-effort failures (deletion ledger writes, per-item cascade deletes) are
//! logged by their call sites and never surface through this type.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All failures the storage core can surface to a caller.
#[derive(Debug, Error)]
pub enum Error {
    // -- client errors ------------------------------------------------------
    /// Depth header missing or not one of `0` / `1`.
    #[error("invalid depth header: {0}")]
    InvalidDepthHeader(String),

    /// `Depth: infinity` is explicitly unsupported for PROPFIND.
    #[error("PROPFIND with infinite depth is not supported")]
    PropfindFiniteDepth,

    /// Property-update or ACL request content is malformed.
    #[error("malformed request content: {0}")]
    MalformedContent(String),

    /// ACL failed structural validation.
    #[error("ACL validation failed: {0}")]
    AclValidation(String),

    /// Conditional request failed: If-Match did not match the current ETag.
    #[error("ETag precondition failed")]
    EtagMismatch,

    /// Requested byte range lies outside the payload.
    #[error("requested range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    /// A required confirmation signal was absent.
    #[error("precondition failed: missing {0}")]
    PreconditionRequired(&'static str),

    /// Creating the collection would exceed the configured tree depth.
    #[error("collection depth limit exceeded")]
    CollectionDepthLimit,

    /// Creating the resource would exceed the configured per-collection child count.
    #[error("child resource count limit exceeded")]
    ChildResourceLimit,

    /// Deleting a webdav collection that still has children.
    #[error("collection has children")]
    HasChildren,

    /// Feature is deliberately unimplemented (multi-range requests).
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// The presented access token is invalid.
    #[error("invalid access token")]
    InvalidToken,

    /// Anonymous access where authentication is required.
    #[error("authorization required")]
    AuthorizationRequired,

    /// Operation restricted to unit-level principals.
    #[error("unit-level access required")]
    UnitAccessRequired,

    /// Principal is not the owner of the target cell.
    #[error("cell is not owned by the requesting principal")]
    NotOwner,

    // -- conflicts ----------------------------------------------------------
    /// A sibling with the same name was created concurrently.
    #[error("resource name already exists")]
    NameExists,

    /// The node was unlinked from its parent by a concurrent delete.
    #[error("resource already unlinked from its parent")]
    AlreadyUnlinked,

    /// The document-store version check failed on persist.
    #[error("concurrent update detected")]
    VersionConflict,

    /// Other flows still hold the cell after the drain-wait budget.
    #[error("cell is still referenced by concurrent requests")]
    CellAccessConflict,

    // -- not found ----------------------------------------------------------
    /// Addressed node does not exist.
    #[error("resource not found")]
    NodeNotFound,

    /// Referenced role does not exist in the cell's role collection.
    #[error("role not found: {0}")]
    RoleNotFound(String),

    /// Box referenced by a role resource URL does not exist.
    #[error("box linked by role not found: {0}")]
    BoxNotFound(String),

    /// Cell does not exist.
    #[error("cell not found")]
    CellNotFound,

    /// No payload stored for a node id expected to have one.
    #[error("payload not found for node {0}")]
    PayloadNotFound(String),

    // -- consistency (fatal) ------------------------------------------------
    /// The node tree and the document store have diverged.
    #[error("store inconsistency detected: {0}")]
    Inconsistency(String),

    /// Uniqueness invariant violated inside the store (e.g. duplicate role names).
    #[error("internal data conflict: {0}")]
    DataConflict(String),

    /// A code path assumed unreachable was reached.
    #[error("unreachable state: {0}")]
    Unreachable(&'static str),

    // -- infrastructure -----------------------------------------------------
    /// Document-store round trip failed.
    #[error("document store failure: {0}")]
    Storage(String),

    /// Payload-store I/O fault.
    #[error("payload store failure: {0}")]
    PayloadAccess(String),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for request-is-at-fault errors (4xx family).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidDepthHeader(_)
                | Error::PropfindFiniteDepth
                | Error::MalformedContent(_)
                | Error::AclValidation(_)
                | Error::EtagMismatch
                | Error::RangeNotSatisfiable(_)
                | Error::PreconditionRequired(_)
                | Error::CollectionDepthLimit
                | Error::ChildResourceLimit
                | Error::HasChildren
                | Error::InvalidToken
                | Error::AuthorizationRequired
                | Error::UnitAccessRequired
                | Error::NotOwner
        )
    }

    /// True when a concurrent state change invalidated an otherwise valid request.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::NameExists
                | Error::AlreadyUnlinked
                | Error::VersionConflict
                | Error::CellAccessConflict
        )
    }

    /// True for fatal divergence between the tree and its backing stores.
    pub fn is_consistency_error(&self) -> bool {
        matches!(
            self,
            Error::Inconsistency(_) | Error::DataConflict(_) | Error::Unreachable(_)
        )
    }

    /// HTTP status hint for protocol adapters.
    pub fn status_hint(&self) -> u16 {
        match self {
            Error::InvalidDepthHeader(_)
            | Error::MalformedContent(_)
            | Error::AclValidation(_)
            | Error::CollectionDepthLimit
            | Error::ChildResourceLimit => 400,
            Error::InvalidToken | Error::AuthorizationRequired => 401,
            Error::PropfindFiniteDepth
            | Error::HasChildren
            | Error::UnitAccessRequired
            | Error::NotOwner => 403,
            Error::NodeNotFound
            | Error::RoleNotFound(_)
            | Error::BoxNotFound(_)
            | Error::CellNotFound
            | Error::PayloadNotFound(_)
            | Error::AlreadyUnlinked => 404,
            Error::NameExists => 405,
            Error::VersionConflict | Error::CellAccessConflict => 409,
            Error::EtagMismatch | Error::PreconditionRequired(_) => 412,
            Error::RangeNotSatisfiable(_) => 416,
            Error::NotImplemented(_) => 501,
            Error::Inconsistency(_)
            | Error::DataConflict(_)
            | Error::Unreachable(_)
            | Error::Storage(_)
            | Error::PayloadAccess(_)
            | Error::Config(_) => 500,
        }
    }
}
