//! Change-tracking persistence runtime for a small blog domain.
//!
//! Sessions keep one instance per identity, derive pending changes from
//! snapshots and commit them atomically; queries are immutable values
//! materialized through the loading engine.

pub mod db;
pub mod error;
pub mod loading;
pub mod logging;
pub mod model;
pub mod query;
pub mod session;
pub mod store;

pub use error::{
    ConstraintViolation, OrmError, OrmResult, StoreError, StoreResult, ValidationError,
};
pub use logging::{
    default_log_level, init_logging, init_logging_with, logging_status, LoggingConfig,
    LoggingError,
};
pub use model::{
    nav, AnyRef, Article, Author, Comment, DeletePolicy, Entity, EntityId, EntityKey, EntityKind,
    EntityRef, Model, ModelBuilder, Navigation, Relation, Resolvable, Tag, Value,
};
pub use query::expr::{Field, IncludePath, Measure, Predicate, SortKey};
pub use query::{Group, GroupedQuery, Projection, Query};
pub use session::{
    CancellationToken, EntityState, SaveSummary, Session, SessionDebugInfo, SessionOptions,
    SessionStats, TrackedEntityInfo,
};
pub use store::{Backend, BackendTransaction, Row, SqliteBackend};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
