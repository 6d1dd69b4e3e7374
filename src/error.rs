//! Core error kinds.
//!
//! Every public operation returns [`Result<T>`]. Handlers built on top of
//! this crate map each variant to an HTTP status; the core itself never
//! constructs a response.

use thiserror::Error;

/// State-machine violations: the object exists but the requested
/// transition is not valid from its current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    #[error("version {0} is already deleted")]
    AlreadyDeleted(String),
    #[error("version {0} is not deleted")]
    NotDeleted(String),
    #[error("entity {0} is deleted and cannot be updated")]
    EntityDeletedCannotUpdate(String),
    #[error("chain {0} was concurrently modified, retry from GetLatest")]
    ConcurrentModification(String),
    #[error("type {0} is still referenced by {1} non-deleted row(s)")]
    TypeInUse(String, u64),
    #[error("email {0} is already in use")]
    EmailInUse(String),
    #[error("group {0} is not empty")]
    GroupNotEmpty(String),
    #[error("group {0} is still a member of another group or referenced by an ACL")]
    GroupInUse(String),
}

/// Malformed input caught before it reaches the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationKind {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
    #[error("invalid property path: {0}")]
    InvalidPath(String),
    #[error("property path exceeds 10 levels: {0}")]
    PathTooDeep(String),
    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),
    #[error("filter nesting exceeds 5 levels")]
    FilterTooDeep,
    #[error("invalid acl principal: {0}")]
    InvalidAclPrincipals(String),
    #[error("invalid fields: {0}")]
    InvalidFields(String),
}

/// Top-level error kind returned by every core operation.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("conflict: {0}")]
    Conflict(#[from] ConflictKind),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationKind),

    #[error("properties fail type schema: {0}")]
    SchemaViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub fn internal(what: impl std::fmt::Display) -> Self {
        CoreError::Internal(what.to_string())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Internal(format!("store error: {e}"))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Validation(ValidationKind::InvalidFields(e.to_string()))
    }
}

impl From<uuid::Error> for CoreError {
    fn from(e: uuid::Error) -> Self {
        CoreError::Validation(ValidationKind::InvalidUuid(e.to_string()))
    }
}
