//! Immutable query builder and its materializers.
//!
//! # Responsibility
//! - Compose filters, ordering, pagination and include paths as values.
//! - Materialize them as entities, scalars, projections or groups with
//!   the minimum number of round trips.
//!
//! # Invariants
//! - Composition never touches storage; every builder returns a new query.
//! - Invalid queries fail with `ValidationError` before any round trip.
//! - Pagination requires at least one sort key.
//!
//! # See also
//! - `loading` for include resolution.

pub mod expr;

use crate::error::{OrmError, OrmResult, StoreError, ValidationError};
use crate::loading;
use crate::model::entity::{Entity, EntityRef};
use crate::model::value::Value;
use crate::session::Session;
use crate::store::{AggregateFunction, QueryPlan, ReadRequest, Row, Selection};
use expr::{Field, IncludePath, Measure, Predicate, SortKey};
use serde::Serialize;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// Query over entities of kind `T`.
pub struct Query<T> {
    filters: Vec<Predicate>,
    order: Vec<SortKey>,
    skip: Option<u64>,
    take: Option<u64>,
    includes: Vec<IncludePath>,
    tracking: Option<bool>,
    split: Option<bool>,
    marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            order: self.order.clone(),
            skip: self.skip,
            take: self.take,
            includes: self.includes.clone(),
            tracking: self.tracking,
            split: self.split,
            marker: PhantomData,
        }
    }
}

impl<T> Debug for Query<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("entity", &std::any::type_name::<T>())
            .field("filters", &self.filters)
            .field("order", &self.order)
            .field("skip", &self.skip)
            .field("take", &self.take)
            .field("includes", &self.includes)
            .field("tracking", &self.tracking)
            .field("split", &self.split)
            .finish()
    }
}

impl<T: Entity> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Query<T> {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            order: Vec::new(),
            skip: None,
            take: None,
            includes: Vec::new(),
            tracking: None,
            split: None,
            marker: PhantomData,
        }
    }

    /// Adds a filter; all filters must hold.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Replaces the sort specification with `field` ascending.
    pub fn order_by(mut self, field: Field) -> Self {
        self.order = vec![field.ascending()];
        self
    }

    /// Replaces the sort specification with `field` descending.
    pub fn order_by_desc(mut self, field: Field) -> Self {
        self.order = vec![field.descending()];
        self
    }

    /// Appends an ascending tiebreak key.
    pub fn then_by(mut self, field: Field) -> Self {
        self.order.push(field.ascending());
        self
    }

    pub fn then_by_desc(mut self, field: Field) -> Self {
        self.order.push(field.descending());
        self
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.skip = Some(count);
        self
    }

    pub fn take(mut self, count: u64) -> Self {
        self.take = Some(count);
        self
    }

    /// Requests eager loading of `path`.
    pub fn include(mut self, path: impl Into<IncludePath>) -> Self {
        self.includes.push(path.into());
        self
    }

    /// Returns detached instances that are neither registered nor snapshotted.
    pub fn as_no_tracking(mut self) -> Self {
        self.tracking = Some(false);
        self
    }

    pub fn as_tracking(mut self) -> Self {
        self.tracking = Some(true);
        self
    }

    /// Loads includes with one round trip per relation per level.
    pub fn as_split_query(mut self) -> Self {
        self.split = Some(true);
        self
    }

    /// Loads first-level includes with one combined join.
    pub fn as_single_query(mut self) -> Self {
        self.split = Some(false);
        self
    }

    /// Checks the query against `T` without touching storage.
    ///
    /// # Errors
    /// - `UnorderedPagination` when `skip`/`take` has no sort key.
    /// - `UnknownField`, `RelationMismatch`, `NotACollection` or
    ///   `NotAReference` for mis-shaped expressions.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if (self.skip.is_some() || self.take.is_some()) && self.order.is_empty() {
            return Err(ValidationError::UnorderedPagination);
        }
        for predicate in &self.filters {
            predicate.validate(T::KIND)?;
        }
        for key in &self.order {
            key.field.validate(T::KIND)?;
        }
        for path in &self.includes {
            path.validate(T::KIND)?;
        }
        Ok(())
    }

    pub fn list(self, session: &mut Session) -> OrmResult<Vec<EntityRef<T>>> {
        self.validate()?;
        self.fetch(session, None)
    }

    /// First match.
    ///
    /// # Errors
    /// - `NotFound` when nothing matched.
    pub fn first(self, session: &mut Session) -> OrmResult<EntityRef<T>> {
        self.first_or_default(session)?
            .ok_or(OrmError::NotFound { kind: T::KIND })
    }

    /// First match, `None` when nothing matched.
    pub fn first_or_default(self, session: &mut Session) -> OrmResult<Option<EntityRef<T>>> {
        self.validate()?;
        Ok(self.fetch(session, Some(1))?.into_iter().next())
    }

    /// The only match.
    ///
    /// # Errors
    /// - `NotFound` when nothing matched.
    /// - `MultipleResults` when more than one row matched.
    pub fn single(self, session: &mut Session) -> OrmResult<EntityRef<T>> {
        self.validate()?;
        let mut found = self.fetch(session, Some(2))?;
        match found.len() {
            0 => Err(OrmError::NotFound { kind: T::KIND }),
            1 => Ok(found.remove(0)),
            _ => Err(OrmError::MultipleResults { kind: T::KIND }),
        }
    }

    /// Number of matches, computed by storage.
    pub fn count(self, session: &mut Session) -> OrmResult<u64> {
        self.validate()?;
        let value = self.scalar(session, Selection::Count)?;
        integer(&value).map(|count| count.max(0) as u64)
    }

    /// Whether anything matches, with a single short-circuiting `EXISTS` read.
    pub fn exists(self, session: &mut Session) -> OrmResult<bool> {
        self.validate()?;
        let value = self.scalar(session, Selection::Exists)?;
        integer(&value).map(|flag| flag != 0)
    }

    /// Largest value of `measure`, `None` when nothing matched.
    pub fn max(self, session: &mut Session, measure: impl Into<Measure>) -> OrmResult<Option<Value>> {
        let value = self.aggregate(session, AggregateFunction::Max, measure.into())?;
        Ok((!value.is_null()).then_some(value))
    }

    pub fn min(self, session: &mut Session, measure: impl Into<Measure>) -> OrmResult<Option<Value>> {
        let value = self.aggregate(session, AggregateFunction::Min, measure.into())?;
        Ok((!value.is_null()).then_some(value))
    }

    /// Sum of `measure`; zero when nothing matched.
    pub fn sum(self, session: &mut Session, measure: impl Into<Measure>) -> OrmResult<Value> {
        let value = self.aggregate(session, AggregateFunction::Sum, measure.into())?;
        Ok(if value.is_null() {
            Value::Integer(0)
        } else {
            value
        })
    }

    pub fn average(self, session: &mut Session, measure: impl Into<Measure>) -> OrmResult<Option<f64>> {
        let value = self.aggregate(session, AggregateFunction::Average, measure.into())?;
        Ok(value.as_real())
    }

    /// Projects each match to the given measures instead of entities.
    pub fn select<M: Into<Measure>>(self, measures: impl IntoIterator<Item = M>) -> Projection<T> {
        Projection {
            query: self,
            measures: measures.into_iter().map(Into::into).collect(),
            distinct: false,
        }
    }

    /// Groups matches by `key`, counting each group.
    pub fn group_by(self, key: impl Into<Measure>) -> GroupedQuery<T> {
        GroupedQuery {
            query: self,
            key: key.into(),
            sum: None,
            having_count_greater_than: None,
        }
    }

    fn plan(&self, selection: Selection) -> QueryPlan {
        QueryPlan {
            root: T::KIND,
            filters: self.filters.clone(),
            order: self.order.clone(),
            skip: self.skip,
            take: self.take,
            selection,
        }
    }

    fn fetch(&self, session: &mut Session, limit: Option<u64>) -> OrmResult<Vec<EntityRef<T>>> {
        let tracking = self.tracking.unwrap_or(session.options.tracking);
        let split = self.split.unwrap_or(session.options.split_queries);
        let mut plan = self.plan(Selection::Entities { joins: Vec::new() });
        if let Some(limit) = limit {
            plan.take = Some(plan.take.map_or(limit, |take| take.min(limit)));
        }

        let found = loading::fetch(session, plan, &self.includes, tracking, split)?;
        Ok(found.iter().filter_map(T::downcast).collect())
    }

    fn aggregate(
        self,
        session: &mut Session,
        function: AggregateFunction,
        measure: Measure,
    ) -> OrmResult<Value> {
        self.validate()?;
        measure.validate(T::KIND)?;
        self.scalar(session, Selection::Aggregate { function, measure })
    }

    fn scalar(&self, session: &mut Session, selection: Selection) -> OrmResult<Value> {
        let rows = read(session, self.plan(selection))?;
        rows.into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .ok_or_else(|| StoreError::InvalidData("scalar query returned no row".to_string()).into())
    }
}

/// Untracked value rows of a query.
#[derive(Debug)]
pub struct Projection<T> {
    query: Query<T>,
    measures: Vec<Measure>,
    distinct: bool,
}

impl<T: Entity> Projection<T> {
    /// Drops duplicate rows.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// One row per match, values in measure order.
    pub fn list(self, session: &mut Session) -> OrmResult<Vec<Row>> {
        self.query.validate()?;
        for measure in &self.measures {
            measure.validate(T::KIND)?;
        }
        read(
            session,
            self.query.plan(Selection::Project {
                measures: self.measures,
                distinct: self.distinct,
            }),
        )
    }
}

/// One group of a [`GroupedQuery`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub key: Value,
    pub count: u64,
    /// Sum of the grouped measure, when requested.
    pub sum: Option<Value>,
}

/// Query grouped by one key, groups ordered by key.
#[derive(Debug)]
pub struct GroupedQuery<T> {
    query: Query<T>,
    key: Measure,
    sum: Option<Measure>,
    having_count_greater_than: Option<u64>,
}

impl<T: Entity> GroupedQuery<T> {
    /// Also sums `measure` per group.
    pub fn sum(mut self, measure: impl Into<Measure>) -> Self {
        self.sum = Some(measure.into());
        self
    }

    /// Keeps groups with more than `count` members.
    pub fn having_count_greater_than(mut self, count: u64) -> Self {
        self.having_count_greater_than = Some(count);
        self
    }

    pub fn list(self, session: &mut Session) -> OrmResult<Vec<Group>> {
        self.query.validate()?;
        self.key.validate(T::KIND)?;
        if let Some(sum) = &self.sum {
            sum.validate(T::KIND)?;
        }
        let with_sum = self.sum.is_some();
        let rows = read(
            session,
            self.query.plan(Selection::Group {
                key: self.key,
                sum: self.sum,
                having_count_greater_than: self.having_count_greater_than,
            }),
        )?;

        rows.into_iter()
            .map(|row| {
                let mut values = row.into_iter();
                let key = values.next().unwrap_or(Value::Null);
                let count = integer(&values.next().unwrap_or(Value::Null))?;
                let sum = if with_sum {
                    Some(values.next().unwrap_or(Value::Null))
                } else {
                    None
                };
                Ok(Group {
                    key,
                    count: count.max(0) as u64,
                    sum,
                })
            })
            .collect()
    }
}

fn read(session: &mut Session, plan: QueryPlan) -> OrmResult<Vec<Row>> {
    let rows = session
        .gateway
        .read(session.backend.as_ref(), &ReadRequest::Query(plan))?;
    Ok(rows)
}

fn integer(value: &Value) -> OrmResult<i64> {
    value.as_integer().ok_or_else(|| {
        StoreError::InvalidData(format!("expected an integer, got {value:?}")).into()
    })
}

#[cfg(test)]
mod tests {
    use super::expr::Field;
    use super::Query;
    use crate::error::ValidationError;
    use crate::model::article::Article;
    use crate::model::relation::Relation;
    use crate::model::tag::Tag;

    #[test]
    fn order_by_replaces_and_then_by_appends() {
        let query = Query::<Article>::new()
            .order_by(Field::new("title"))
            .order_by_desc(Field::new("created_at"))
            .then_by(Field::new("title"));
        let debug = format!("{query:?}");
        assert_eq!(query.order.len(), 2);
        assert!(query.order[0].descending);
        assert_eq!(query.order[0].field.column(), "created_at");
        assert!(!query.order[1].descending);
        assert!(debug.contains("Query"));
    }

    #[test]
    fn builders_leave_the_base_query_untouched() {
        let base = Query::<Tag>::new().filter(Field::new("name").starts_with("r"));
        let narrowed = base.clone().filter(Field::new("name").contains("s"));
        assert_eq!(base.filters.len(), 1);
        assert_eq!(narrowed.filters.len(), 2);
    }

    #[test]
    fn pagination_without_order_is_rejected() {
        assert_eq!(
            Query::<Tag>::new().take(2).validate(),
            Err(ValidationError::UnorderedPagination)
        );
        assert_eq!(
            Query::<Tag>::new().skip(1).validate(),
            Err(ValidationError::UnorderedPagination)
        );
        assert!(Query::<Tag>::new()
            .order_by(Field::new("name"))
            .skip(1)
            .take(2)
            .validate()
            .is_ok());
    }

    #[test]
    fn include_paths_must_chain() {
        assert!(Query::<Article>::new()
            .include(Relation::ArticleComments)
            .validate()
            .is_ok());
        assert!(matches!(
            Query::<Article>::new()
                .include(Relation::AuthorArticles)
                .validate(),
            Err(ValidationError::RelationMismatch { .. })
        ));
    }

    #[test]
    fn unknown_filter_columns_are_rejected() {
        assert!(matches!(
            Query::<Article>::new()
                .filter(Field::new("rating").equals(5_i64))
                .validate(),
            Err(ValidationError::UnknownField { .. })
        ));
    }
}
