//! Query expressions: fields, predicates, sort keys, measures and include paths.
//!
//! # Responsibility
//! - Describe filters and orderings as data the backend can compile.
//! - Validate every expression against the queried kind before any
//!   storage access.

use crate::error::ValidationError;
use crate::model::relation::{Cardinality, Relation};
use crate::model::value::{EntityKind, Value};
use serde::Serialize;
use std::ops::Not;

/// A column of the queried kind, or of the entity reached through a
/// single-valued relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    via: Option<Relation>,
    column: String,
}

impl Field {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            via: None,
            column: column.into(),
        }
    }

    /// Column of the entity behind `relation`, e.g. the author's name of an article.
    pub fn via(relation: Relation, column: impl Into<String>) -> Self {
        Self {
            via: Some(relation),
            column: column.into(),
        }
    }

    pub fn relation(&self) -> Option<Relation> {
        self.via
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn equals(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    pub fn greater_than(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    pub fn at_least(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ge, value)
    }

    pub fn less_than(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    pub fn at_most(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Le, value)
    }

    /// Case-sensitive substring match.
    pub fn contains(self, needle: impl Into<String>) -> Predicate {
        Predicate::Contains {
            field: self,
            needle: needle.into(),
        }
    }

    pub fn starts_with(self, prefix: impl Into<String>) -> Predicate {
        Predicate::StartsWith {
            field: self,
            prefix: prefix.into(),
        }
    }

    /// Membership in a value list. An empty list matches nothing.
    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::In {
            field: self,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull(self)
    }

    pub fn ascending(self) -> SortKey {
        SortKey {
            field: self,
            descending: false,
        }
    }

    pub fn descending(self) -> SortKey {
        SortKey {
            field: self,
            descending: true,
        }
    }

    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            field: self,
            op,
            value: value.into(),
        }
    }

    /// Checks the field exists when queried from `kind`.
    pub(crate) fn validate(&self, kind: EntityKind) -> Result<(), ValidationError> {
        let owner = match self.via {
            None => kind,
            Some(relation) => {
                check_source(relation, kind)?;
                if relation.cardinality() != Cardinality::One {
                    return Err(ValidationError::NotAReference(relation));
                }
                relation.target()
            }
        };
        if owner.column_index(&self.column).is_none() {
            return Err(ValidationError::UnknownField {
                kind: owner,
                field: self.column.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

/// Filter condition, composed as data rather than closures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        field: Field,
        op: CompareOp,
        value: Value,
    },
    Contains {
        field: Field,
        needle: String,
    },
    StartsWith {
        field: Field,
        prefix: String,
    },
    In {
        field: Field,
        values: Vec<Value>,
    },
    IsNull(Field),
    /// At least one member of a collection relation, optionally matching.
    Any {
        relation: Relation,
        predicate: Option<Box<Predicate>>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// True when the collection behind `relation` is not empty.
    pub fn any(relation: Relation) -> Self {
        Self::Any {
            relation,
            predicate: None,
        }
    }

    /// True when some member of `relation` matches `predicate`.
    pub fn any_matching(relation: Relation, predicate: Predicate) -> Self {
        Self::Any {
            relation,
            predicate: Some(Box::new(predicate)),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut terms) => {
                terms.push(other);
                Self::And(terms)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut terms) => {
                terms.push(other);
                Self::Or(terms)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub(crate) fn validate(&self, kind: EntityKind) -> Result<(), ValidationError> {
        match self {
            Self::Compare { field, .. }
            | Self::Contains { field, .. }
            | Self::StartsWith { field, .. }
            | Self::In { field, .. }
            | Self::IsNull(field) => field.validate(kind),
            Self::Any {
                relation,
                predicate,
            } => {
                check_collection(*relation, kind)?;
                match predicate {
                    Some(inner) => inner.validate(relation.target()),
                    None => Ok(()),
                }
            }
            Self::And(terms) | Self::Or(terms) => {
                terms.iter().try_for_each(|term| term.validate(kind))
            }
            Self::Not(inner) => inner.validate(kind),
        }
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Self::Output {
        Predicate::Not(Box::new(self))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub field: Field,
    pub descending: bool,
}

/// Value computed per row for projections, aggregates and grouping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Field(Field),
    /// Number of members in a collection relation.
    Count(Relation),
}

impl Measure {
    pub fn field(column: impl Into<String>) -> Self {
        Self::Field(Field::new(column))
    }

    pub fn via(relation: Relation, column: impl Into<String>) -> Self {
        Self::Field(Field::via(relation, column))
    }

    pub fn count(relation: Relation) -> Self {
        Self::Count(relation)
    }

    pub(crate) fn validate(&self, kind: EntityKind) -> Result<(), ValidationError> {
        match self {
            Self::Field(field) => field.validate(kind),
            Self::Count(relation) => check_collection(*relation, kind),
        }
    }
}

impl From<Field> for Measure {
    fn from(value: Field) -> Self {
        Self::Field(value)
    }
}

/// Chain of relations to load eagerly, starting at the queried kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludePath {
    steps: Vec<Relation>,
}

impl IncludePath {
    pub fn new(first: Relation) -> Self {
        Self { steps: vec![first] }
    }

    /// Appends a step starting at the previous step's target.
    pub fn then(mut self, next: Relation) -> Self {
        self.steps.push(next);
        self
    }

    pub fn steps(&self) -> &[Relation] {
        &self.steps
    }

    pub(crate) fn validate(&self, root: EntityKind) -> Result<(), ValidationError> {
        let mut current = root;
        for step in &self.steps {
            check_source(*step, current)?;
            current = step.target();
        }
        Ok(())
    }
}

impl From<Relation> for IncludePath {
    fn from(value: Relation) -> Self {
        Self::new(value)
    }
}

fn check_source(relation: Relation, kind: EntityKind) -> Result<(), ValidationError> {
    if relation.source() != kind {
        return Err(ValidationError::RelationMismatch {
            relation,
            expected: kind,
        });
    }
    Ok(())
}

fn check_collection(relation: Relation, kind: EntityKind) -> Result<(), ValidationError> {
    check_source(relation, kind)?;
    if relation.cardinality() != Cardinality::Many {
        return Err(ValidationError::NotACollection(relation));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Field, IncludePath, Measure, Predicate};
    use crate::error::ValidationError;
    use crate::model::relation::Relation;
    use crate::model::value::EntityKind;

    #[test]
    fn fields_validate_against_the_owning_kind() {
        assert!(Field::new("title").validate(EntityKind::Article).is_ok());
        assert!(Field::via(Relation::ArticleAuthor, "name")
            .validate(EntityKind::Article)
            .is_ok());
        assert_eq!(
            Field::new("name").validate(EntityKind::Article),
            Err(ValidationError::UnknownField {
                kind: EntityKind::Article,
                field: "name".to_string()
            })
        );
        assert_eq!(
            Field::via(Relation::ArticleComments, "content").validate(EntityKind::Article),
            Err(ValidationError::NotAReference(Relation::ArticleComments))
        );
    }

    #[test]
    fn any_requires_a_collection_of_the_queried_kind() {
        let predicate = Predicate::any_matching(
            Relation::ArticleComments,
            Field::new("content").contains("great"),
        );
        assert!(predicate.validate(EntityKind::Article).is_ok());
        assert!(predicate.validate(EntityKind::Author).is_err());
        assert_eq!(
            Predicate::any(Relation::ArticleAuthor).validate(EntityKind::Article),
            Err(ValidationError::NotACollection(Relation::ArticleAuthor))
        );
    }

    #[test]
    fn and_flattens_into_one_conjunction() {
        let combined = Field::new("title")
            .equals("a")
            .and(Field::new("content").equals("b"))
            .and(Field::new("created_at").greater_than(1_i64));
        match combined {
            Predicate::And(terms) => assert_eq!(terms.len(), 3),
            other => panic!("unexpected predicate: {other:?}"),
        }
    }

    #[test]
    fn include_paths_must_chain() {
        let path = IncludePath::new(Relation::AuthorArticles).then(Relation::ArticleComments);
        assert!(path.validate(EntityKind::Author).is_ok());

        let broken = IncludePath::new(Relation::AuthorArticles).then(Relation::CommentArticle);
        assert_eq!(
            broken.validate(EntityKind::Author),
            Err(ValidationError::RelationMismatch {
                relation: Relation::CommentArticle,
                expected: EntityKind::Article
            })
        );
    }

    #[test]
    fn count_measures_need_collections() {
        assert!(Measure::count(Relation::ArticleComments)
            .validate(EntityKind::Article)
            .is_ok());
        assert!(Measure::count(Relation::CommentArticle)
            .validate(EntityKind::Comment)
            .is_err());
    }
}
