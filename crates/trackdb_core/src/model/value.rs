//! Column values and entity kinds.
//!
//! # Responsibility
//! - Define the storage-neutral scalar value exchanged with backends.
//! - Describe each entity kind's table and column layout.
//!
//! # Invariants
//! - Column `0` of every kind is the identity column `id`.
//! - Column order in [`EntityKind::columns`] is the row layout contract
//!   shared by entity encoding, backend rows and snapshots.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identity of every entity. Assigned once by a factory.
pub type EntityId = Uuid;

/// Scalar column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Id(EntityId),
}

impl Value {
    /// Returns whether this value is SQL `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric view used by aggregates: integers widen to `f64`.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Identity view. Backends that store ids as text are accepted.
    pub fn as_id(&self) -> Option<EntityId> {
        match self {
            Self::Id(value) => Some(*value),
            Self::Text(value) => Uuid::parse_str(value).ok(),
            _ => None,
        }
    }

    pub(crate) fn expect_id(&self, column: &str) -> Result<EntityId, StoreError> {
        self.as_id()
            .ok_or_else(|| StoreError::InvalidData(format!("invalid id value {self} in {column}")))
    }

    pub(crate) fn expect_text(&self, column: &str) -> Result<String, StoreError> {
        self.as_text()
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidData(format!("invalid text value {self} in {column}")))
    }

    pub(crate) fn expect_integer(&self, column: &str) -> Result<i64, StoreError> {
        self.as_integer().ok_or_else(|| {
            StoreError::InvalidData(format!("invalid integer value {self} in {column}"))
        })
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "`{value}`"),
            Self::Id(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<EntityId> for Value {
    fn from(value: EntityId) -> Self {
        Self::Id(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Closed set of persisted entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Author,
    Article,
    Comment,
    Tag,
}

const AUTHOR_COLUMNS: &[&str] = &["id", "name"];
const ARTICLE_COLUMNS: &[&str] = &["id", "title", "content", "created_at", "author_id"];
const COMMENT_COLUMNS: &[&str] = &["id", "content", "article_id"];
const TAG_COLUMNS: &[&str] = &["id", "name"];

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [Self::Author, Self::Article, Self::Comment, Self::Tag];

    pub fn name(self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Article => "article",
            Self::Comment => "comment",
            Self::Tag => "tag",
        }
    }

    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            Self::Author => "authors",
            Self::Article => "articles",
            Self::Comment => "comments",
            Self::Tag => "tags",
        }
    }

    /// Persisted scalar columns in row-layout order.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Author => AUTHOR_COLUMNS,
            Self::Article => ARTICLE_COLUMNS,
            Self::Comment => COMMENT_COLUMNS,
            Self::Tag => TAG_COLUMNS,
        }
    }

    pub fn column_index(self, column: &str) -> Option<usize> {
        self.columns().iter().position(|candidate| *candidate == column)
    }

    /// Position in foreign-key order: owners sort before dependents.
    ///
    /// Inserts run in ascending rank, deletes in descending rank.
    pub fn dependency_rank(self) -> u8 {
        match self {
            Self::Author => 0,
            Self::Tag => 1,
            Self::Article => 2,
            Self::Comment => 3,
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
