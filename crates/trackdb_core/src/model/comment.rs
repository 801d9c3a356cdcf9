//! Comment, an owned child of an article.

use crate::error::{StoreResult, ValidationError};
use crate::model::article::Article;
use crate::model::entity::{check_row_shape, required_id, required_text, AnyRef, Entity, EntityRef};
use crate::model::navigation::{nav, Navigation};
use crate::model::relation::Relation;
use crate::model::resolvable::Resolvable;
use crate::model::value::{EntityId, EntityKind, Value};
use uuid::Uuid;

#[derive(Debug)]
pub struct Comment {
    id: EntityId,
    content: String,
    article_id: EntityId,
    article: Resolvable<Option<EntityRef<Article>>>,
}

impl Comment {
    /// Only reachable through [`Article::add_comment`].
    pub(crate) fn new(
        content: String,
        article_id: EntityId,
    ) -> Result<EntityRef<Comment>, ValidationError> {
        let content = validate_content(content)?;
        if article_id.is_nil() {
            return Err(ValidationError::NilId {
                entity: EntityKind::Comment,
                field: "article_id",
            });
        }
        Ok(EntityRef::new(Self {
            id: Uuid::new_v4(),
            content,
            article_id,
            article: Resolvable::Unresolved,
        }))
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn set_content(&mut self, content: impl Into<String>) -> Result<(), ValidationError> {
        self.content = validate_content(content.into())?;
        Ok(())
    }

    pub fn article_id(&self) -> EntityId {
        self.article_id
    }

    pub fn article(&self) -> Option<EntityRef<Article>> {
        self.article.get().and_then(Clone::clone)
    }
}

fn validate_content(content: String) -> Result<String, ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::BlankField {
            entity: EntityKind::Comment,
            field: "content",
        });
    }
    Ok(content)
}

impl Entity for Comment {
    const KIND: EntityKind = EntityKind::Comment;

    fn id(&self) -> EntityId {
        self.id
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Id(self.id),
            Value::Text(self.content.clone()),
            Value::Id(self.article_id),
        ]
    }

    fn from_values(row: &[Value]) -> StoreResult<Self> {
        check_row_shape(Self::KIND, row)?;
        Ok(Self {
            id: required_id(Self::KIND, row, 0)?,
            content: required_text(Self::KIND, row, 1)?,
            article_id: required_id(Self::KIND, row, 2)?,
            article: Resolvable::Unresolved,
        })
    }

    fn wrap(handle: EntityRef<Self>) -> AnyRef {
        AnyRef::Comment(handle)
    }

    fn downcast(any: &AnyRef) -> Option<EntityRef<Self>> {
        match any {
            AnyRef::Comment(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    fn release_navigations(&mut self) {
        self.article.reset();
    }
}

impl Navigation for nav::CommentArticle {
    type Source = Comment;
    type Target = Article;
    type Value = Option<EntityRef<Article>>;

    const RELATION: Relation = Relation::CommentArticle;

    fn slot(source: &Comment) -> &Resolvable<Self::Value> {
        &source.article
    }

    fn slot_mut(source: &mut Comment) -> &mut Resolvable<Self::Value> {
        &mut source.article
    }
}
