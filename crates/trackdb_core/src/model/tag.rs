//! Tag, shared between articles.
//!
//! # Invariants
//! - Names are trimmed with inner whitespace collapsed to single spaces.
//! - Uniqueness (case-insensitive) is enforced by storage, not here.

use crate::error::{StoreResult, ValidationError};
use crate::model::article::Article;
use crate::model::entity::{check_row_shape, required_id, required_text, AnyRef, Entity, EntityRef};
use crate::model::navigation::{nav, Navigation};
use crate::model::relation::Relation;
use crate::model::resolvable::Resolvable;
use crate::model::value::{EntityId, EntityKind, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

static WHITESPACE_RUN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s+").ok());

#[derive(Debug)]
pub struct Tag {
    id: EntityId,
    name: String,
    articles: Resolvable<Vec<EntityRef<Article>>>,
}

impl Tag {
    /// Creates a new tag with a normalized name.
    ///
    /// # Errors
    /// - `BlankField` when `name` is blank.
    pub fn create(name: impl Into<String>) -> Result<EntityRef<Tag>, ValidationError> {
        Ok(EntityRef::new(Self {
            id: Uuid::new_v4(),
            name: normalize_name(&name.into())?,
            articles: Resolvable::Resolved(Vec::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), ValidationError> {
        self.name = normalize_name(&name.into())?;
        Ok(())
    }

    pub fn articles(&self) -> Option<&[EntityRef<Article>]> {
        self.articles.get().map(Vec::as_slice)
    }
}

fn normalize_name(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::BlankField {
            entity: EntityKind::Tag,
            field: "name",
        });
    }
    Ok(match WHITESPACE_RUN.as_ref() {
        Some(pattern) => pattern.replace_all(trimmed, " ").into_owned(),
        None => trimmed.to_string(),
    })
}

impl Entity for Tag {
    const KIND: EntityKind = EntityKind::Tag;

    fn id(&self) -> EntityId {
        self.id
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::Id(self.id), Value::Text(self.name.clone())]
    }

    fn from_values(row: &[Value]) -> StoreResult<Self> {
        check_row_shape(Self::KIND, row)?;
        Ok(Self {
            id: required_id(Self::KIND, row, 0)?,
            name: required_text(Self::KIND, row, 1)?,
            articles: Resolvable::Unresolved,
        })
    }

    fn wrap(handle: EntityRef<Self>) -> AnyRef {
        AnyRef::Tag(handle)
    }

    fn downcast(any: &AnyRef) -> Option<EntityRef<Self>> {
        match any {
            AnyRef::Tag(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    fn release_navigations(&mut self) {
        self.articles.reset();
    }
}

impl Navigation for nav::TagArticles {
    type Source = Tag;
    type Target = Article;
    type Value = Vec<EntityRef<Article>>;

    const RELATION: Relation = Relation::TagArticles;

    fn slot(source: &Tag) -> &Resolvable<Self::Value> {
        &source.articles
    }

    fn slot_mut(source: &mut Tag) -> &mut Resolvable<Self::Value> {
        &mut source.articles
    }
}
