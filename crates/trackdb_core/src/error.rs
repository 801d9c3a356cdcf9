//! Error taxonomy for sessions, queries and storage round trips.
//!
//! # Responsibility
//! - Separate caller bugs (`ValidationError`) from data conflicts
//!   (`ConstraintViolation`) and backend failures (`StoreError`).
//! - Fold all of them into the top-level [`OrmError`].
//!
//! # Invariants
//! - Validation errors are produced before any storage access.
//! - `ConstraintViolation` is only produced while committing.
//! - Storage errors propagate unchanged.

use crate::db::DbError;
use crate::model::relation::Relation;
use crate::model::value::{EntityId, EntityKind};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type OrmResult<T> = Result<T, OrmError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Caller-side misuse detected synchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    BlankField {
        entity: EntityKind,
        field: &'static str,
    },
    NilId {
        entity: EntityKind,
        field: &'static str,
    },
    /// A different instance with the same identity is already tracked.
    IdentityConflict { kind: EntityKind, id: EntityId },
    /// `skip`/`take` without any sort key.
    UnorderedPagination,
    UnknownField { kind: EntityKind, field: String },
    /// Relation used from a kind it does not start at.
    RelationMismatch {
        relation: Relation,
        expected: EntityKind,
    },
    NotACollection(Relation),
    NotAReference(Relation),
    /// Lazy loading is disabled and the navigation was never loaded.
    NavigationNotLoaded { kind: EntityKind, relation: Relation },
    /// Collection must be loaded before it can be changed.
    CollectionNotLoaded { kind: EntityKind, relation: Relation },
    MissingDeletePolicy(Relation),
    NotAnOwnership(Relation),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankField { entity, field } => write!(f, "{entity}.{field} cannot be blank"),
            Self::NilId { entity, field } => write!(f, "{entity}.{field} cannot be a nil id"),
            Self::IdentityConflict { kind, id } => write!(
                f,
                "another {kind} instance with id {id} is already tracked"
            ),
            Self::UnorderedPagination => {
                write!(f, "skip/take requires at least one sort key")
            }
            Self::UnknownField { kind, field } => write!(f, "{kind} has no field `{field}`"),
            Self::RelationMismatch { relation, expected } => {
                write!(f, "relation {relation} does not start at {expected}")
            }
            Self::NotACollection(relation) => write!(f, "relation {relation} is not a collection"),
            Self::NotAReference(relation) => {
                write!(f, "relation {relation} is not a single reference")
            }
            Self::NavigationNotLoaded { kind, relation } => write!(
                f,
                "navigation {relation} on {kind} is not loaded and lazy loading is disabled"
            ),
            Self::CollectionNotLoaded { kind, relation } => {
                write!(f, "collection {relation} on {kind} must be loaded before changing it")
            }
            Self::MissingDeletePolicy(relation) => {
                write!(f, "ownership relation {relation} has no delete policy")
            }
            Self::NotAnOwnership(relation) => {
                write!(f, "relation {relation} is not an ownership relation")
            }
        }
    }
}

impl Error for ValidationError {}

/// Commit rejected because stored data would become inconsistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintViolation {
    /// An owner under a restrict policy still has dependents.
    RestrictedDelete {
        owner: EntityKind,
        owner_id: EntityId,
        relation: Relation,
        dependents: usize,
    },
    Unique(String),
    ForeignKey(String),
    Other(String),
}

impl Display for ConstraintViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RestrictedDelete {
                owner,
                owner_id,
                relation,
                dependents,
            } => write!(
                f,
                "cannot delete {owner} {owner_id}: {dependents} dependent(s) remain in {relation}"
            ),
            Self::Unique(detail) => write!(f, "unique constraint violated: {detail}"),
            Self::ForeignKey(detail) => write!(f, "foreign key constraint violated: {detail}"),
            Self::Other(detail) => write!(f, "constraint violated: {detail}"),
        }
    }
}

impl Error for ConstraintViolation {}

/// Failure of one backend round trip.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Db(DbError),
    Cancelled,
    TimedOut { elapsed_ms: u128, limit_ms: u128 },
    LockPoisoned,
    InvalidData(String),
    /// Request the backend cannot express, such as an unknown column.
    UnsupportedRequest(String),
    Constraint(ConstraintViolation),
    /// Update or delete matched no row.
    RowMissing { kind: EntityKind, id: EntityId },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Cancelled => write!(f, "round trip cancelled"),
            Self::TimedOut {
                elapsed_ms,
                limit_ms,
            } => write!(f, "round trip took {elapsed_ms}ms, limit is {limit_ms}ms"),
            Self::LockPoisoned => write!(f, "storage connection lock poisoned"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::UnsupportedRequest(message) => write!(f, "unsupported request: {message}"),
            Self::Constraint(violation) => write!(f, "{violation}"),
            Self::RowMissing { kind, id } => write!(f, "{kind} row {id} no longer exists"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Constraint(violation) => Some(violation),
            Self::Cancelled
            | Self::TimedOut { .. }
            | Self::LockPoisoned
            | Self::InvalidData(_)
            | Self::UnsupportedRequest(_)
            | Self::RowMissing { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &value {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                let detail = message
                    .clone()
                    .unwrap_or_else(|| failure.to_string());
                let violation = match failure.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        ConstraintViolation::Unique(detail)
                    }
                    rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                        ConstraintViolation::ForeignKey(detail)
                    }
                    _ => ConstraintViolation::Other(detail),
                };
                return Self::Constraint(violation);
            }
        }
        Self::Sqlite(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            other => Self::Db(other),
        }
    }
}

/// Top-level error of every session and query operation.
#[derive(Debug)]
pub enum OrmError {
    Validation(ValidationError),
    NotFound { kind: EntityKind },
    MultipleResults { kind: EntityKind },
    ConstraintViolation(ConstraintViolation),
    Storage(StoreError),
}

impl OrmError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl Display for OrmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "validation failed: {err}"),
            Self::NotFound { kind } => write!(f, "no {kind} matched the query"),
            Self::MultipleResults { kind } => {
                write!(f, "more than one {kind} matched a single-result query")
            }
            Self::ConstraintViolation(violation) => write!(f, "{violation}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl Error for OrmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::ConstraintViolation(violation) => Some(violation),
            Self::Storage(err) => Some(err),
            Self::NotFound { .. } | Self::MultipleResults { .. } => None,
        }
    }
}

impl From<ValidationError> for OrmError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ConstraintViolation> for OrmError {
    fn from(value: ConstraintViolation) -> Self {
        Self::ConstraintViolation(value)
    }
}

impl From<StoreError> for OrmError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Constraint(violation) => Self::ConstraintViolation(violation),
            other => Self::Storage(other),
        }
    }
}

impl From<DbError> for OrmError {
    fn from(value: DbError) -> Self {
        StoreError::from(value).into()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConstraintViolation, OrmError, StoreError};

    #[test]
    fn store_constraint_becomes_constraint_violation() {
        let err: OrmError =
            StoreError::Constraint(ConstraintViolation::Unique("tags.name".to_string())).into();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn cancelled_round_trip_is_storage_error() {
        let err: OrmError = StoreError::Cancelled.into();
        assert!(err.is_storage());
        assert_eq!(err.to_string(), "storage error: round trip cancelled");
    }

    #[test]
    fn sqlite_unique_failure_is_classified() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .map_err(StoreError::from)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Constraint(ConstraintViolation::Unique(_))
        ));
    }
}
