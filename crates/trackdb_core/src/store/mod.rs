//! Abstract storage backend contract.
//!
//! # Responsibility
//! - Define the read requests and write batches a session sends to storage.
//! - Define the [`Backend`] / [`BackendTransaction`] seam implemented by
//!   concrete engines such as [`SqliteBackend`].
//!
//! # Invariants
//! - Rows use the column order of [`EntityKind::columns`].
//! - Dropping an uncommitted transaction rolls it back.
//! - A backend is shared across threads; transactions are not.

use crate::error::StoreResult;
use crate::model::relation::Relation;
use crate::model::value::{EntityId, EntityKind, Value};
use crate::query::expr::{Measure, Predicate, SortKey};
use serde::Serialize;

mod sqlite;

pub use sqlite::SqliteBackend;

/// One result row.
pub type Row = Vec<Value>;

/// Query over one root kind plus what to select from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    pub root: EntityKind,
    /// Conjunction of all filters.
    pub filters: Vec<Predicate>,
    pub order: Vec<SortKey>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub selection: Selection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Max,
    Min,
    Sum,
    Average,
}

/// Result shape of a [`QueryPlan`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Root columns, followed by the target columns of each joined relation
    /// (left join, one row per combination).
    Entities { joins: Vec<Relation> },
    /// One row holding the number of matches.
    Count,
    /// One row holding `1` or `0`, evaluated with a short-circuiting `EXISTS`.
    Exists,
    /// One row holding the aggregate, `Null` when nothing matched.
    Aggregate {
        function: AggregateFunction,
        measure: Measure,
    },
    /// One row per match with the listed measures.
    Project { measures: Vec<Measure>, distinct: bool },
    /// One row per group: key, count and the optional sum, ordered by key.
    Group {
        key: Measure,
        sum: Option<Measure>,
        having_count_greater_than: Option<u64>,
    },
}

/// Targets of `relation` for a set of source ids.
///
/// Rows are `[source_id, target columns...]` in storage order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedRead {
    pub relation: Relation,
    pub source_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadRequest {
    Query(QueryPlan),
    Related(RelatedRead),
}

impl ReadRequest {
    /// Short label used in round-trip log events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Query(plan) => match plan.selection {
                Selection::Entities { .. } => "entities",
                Selection::Count => "count",
                Selection::Exists => "exists",
                Selection::Aggregate { .. } => "aggregate",
                Selection::Project { .. } => "project",
                Selection::Group { .. } => "group",
            },
            Self::Related(_) => "related",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOp {
    Insert {
        kind: EntityKind,
        row: Row,
    },
    /// Changed columns only.
    Update {
        kind: EntityKind,
        id: EntityId,
        changes: Vec<(&'static str, Value)>,
    },
    Delete {
        kind: EntityKind,
        id: EntityId,
    },
    /// Adds one association row of a many-to-many relation.
    Link {
        relation: Relation,
        source: EntityId,
        target: EntityId,
    },
    Unlink {
        relation: Relation,
        source: EntityId,
        target: EntityId,
    },
    /// Removes every association row of `source`.
    UnlinkAll {
        relation: Relation,
        source: EntityId,
    },
}

/// Ordered write operations applied inside one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Shared storage engine.
pub trait Backend: Send + Sync {
    fn execute_read(&self, request: &ReadRequest) -> StoreResult<Vec<Row>>;

    /// Starts a write transaction that holds the backend until it ends.
    fn begin_transaction(&self) -> StoreResult<Box<dyn BackendTransaction + '_>>;
}

/// Scoped write transaction.
pub trait BackendTransaction {
    /// Reads observing the transaction's own writes.
    fn execute_read(&mut self, request: &ReadRequest) -> StoreResult<Vec<Row>>;

    /// Applies the batch in order; returns the number of affected rows.
    fn execute_write(&mut self, batch: &WriteBatch) -> StoreResult<usize>;

    fn commit(self: Box<Self>) -> StoreResult<()>;

    fn rollback(self: Box<Self>) -> StoreResult<()>;
}
