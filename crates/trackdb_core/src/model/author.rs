//! Author aggregate root.

use crate::error::{StoreResult, ValidationError};
use crate::model::article::Article;
use crate::model::entity::{check_row_shape, required_id, required_text, AnyRef, Entity, EntityRef};
use crate::model::navigation::{nav, Navigation};
use crate::model::relation::Relation;
use crate::model::resolvable::Resolvable;
use crate::model::value::{EntityId, EntityKind, Value};
use uuid::Uuid;

#[derive(Debug)]
pub struct Author {
    id: EntityId,
    name: String,
    articles: Resolvable<Vec<EntityRef<Article>>>,
}

impl Author {
    /// Creates a new author with a generated id.
    ///
    /// # Errors
    /// - `BlankField` when `name` is blank.
    pub fn create(name: impl Into<String>) -> Result<EntityRef<Author>, ValidationError> {
        let name = validate_name(name.into())?;
        Ok(EntityRef::new(Self {
            id: Uuid::new_v4(),
            name,
            articles: Resolvable::Resolved(Vec::new()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), ValidationError> {
        self.name = validate_name(name.into())?;
        Ok(())
    }

    /// Loaded articles, `None` while unresolved.
    pub fn articles(&self) -> Option<&[EntityRef<Article>]> {
        self.articles.get().map(Vec::as_slice)
    }
}

fn validate_name(name: String) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::BlankField {
            entity: EntityKind::Author,
            field: "name",
        });
    }
    Ok(trimmed.to_string())
}

impl Entity for Author {
    const KIND: EntityKind = EntityKind::Author;

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
        AnyRef::Author(handle)
    }

    fn downcast(any: &AnyRef) -> Option<EntityRef<Self>> {
        match any {
            AnyRef::Author(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    fn release_navigations(&mut self) {
        self.articles.reset();
    }
}

impl Navigation for nav::AuthorArticles {
    type Source = Author;
    type Target = Article;
    type Value = Vec<EntityRef<Article>>;

    const RELATION: Relation = Relation::AuthorArticles;

    fn slot(source: &Author) -> &Resolvable<Self::Value> {
        &source.articles
    }

    fn slot_mut(source: &mut Author) -> &mut Resolvable<Self::Value> {
        &mut source.articles
    }
}

#[cfg(test)]
mod tests {
    use super::Author;
    use crate::error::ValidationError;
    use crate::model::entity::Entity;
    use crate::model::value::Value;

    #[test]
    fn create_trims_and_rejects_blank_names() {
        let author = Author::create("  Alice ").unwrap();
        assert_eq!(author.borrow().name(), "Alice");
        assert!(matches!(
            Author::create("   "),
            Err(ValidationError::BlankField { field: "name", .. })
        ));
    }

    #[test]
    fn stored_rows_start_with_unresolved_articles() {
        let author = Author::create("Bob").unwrap();
        let row = author.borrow().values();
        let loaded = Author::from_values(&row).unwrap();
        assert_eq!(loaded.id(), author.id());
        assert!(loaded.articles().is_none());
    }

    #[test]
    fn invalid_rows_are_rejected() {
        let row = vec![Value::Text("not-a-uuid".to_string()), Value::from("Bob")];
        assert!(Author::from_values(&row).is_err());
    }
}
