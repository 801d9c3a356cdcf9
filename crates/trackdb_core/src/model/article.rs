//! Article aggregate root.
//!
//! # Responsibility
//! - Own the comment collection and the tag associations.
//! - Create comments, the only way a comment comes into existence.
//!
//! # Invariants
//! - `author_id` is set once by the factory and never reassigned.
//! - Collections can only be changed once loaded.

use crate::error::{StoreResult, ValidationError};
use crate::model::author::Author;
use crate::model::comment::Comment;
use crate::model::entity::{check_row_shape, required_id, required_text, AnyRef, Entity, EntityRef};
use crate::model::navigation::{nav, Navigation};
use crate::model::relation::Relation;
use crate::model::resolvable::Resolvable;
use crate::model::tag::Tag;
use crate::model::value::{EntityId, EntityKind, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug)]
pub struct Article {
    id: EntityId,
    title: String,
    content: String,
    /// Unix epoch milliseconds.
    created_at: i64,
    author_id: EntityId,
    author: Resolvable<Option<EntityRef<Author>>>,
    comments: Resolvable<Vec<EntityRef<Comment>>>,
    tags: Resolvable<Vec<EntityRef<Tag>>>,
}

impl Article {
    /// Creates a new article stamped with the current time.
    ///
    /// # Errors
    /// - `BlankField` when `title` or `content` is blank.
    /// - `NilId` when `author_id` is nil.
    pub fn create(
        title: impl Into<String>,
        content: impl Into<String>,
        author_id: EntityId,
    ) -> Result<EntityRef<Article>, ValidationError> {
        Self::create_at(title, content, author_id, now_epoch_ms())
    }

    /// Same as [`Article::create`] with an explicit creation timestamp.
    pub fn create_at(
        title: impl Into<String>,
        content: impl Into<String>,
        author_id: EntityId,
        created_at: i64,
    ) -> Result<EntityRef<Article>, ValidationError> {
        let title = validate_text("title", title.into())?;
        let content = validate_text("content", content.into())?;
        if author_id.is_nil() {
            return Err(ValidationError::NilId {
                entity: EntityKind::Article,
                field: "author_id",
            });
        }

        Ok(EntityRef::new(Self {
            id: Uuid::new_v4(),
            title,
            content,
            created_at,
            author_id,
            author: Resolvable::Unresolved,
            comments: Resolvable::Resolved(Vec::new()),
            tags: Resolvable::Resolved(Vec::new()),
        }))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn author_id(&self) -> EntityId {
        self.author_id
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), ValidationError> {
        self.title = validate_text("title", title.into())?;
        Ok(())
    }

    pub fn set_content(&mut self, content: impl Into<String>) -> Result<(), ValidationError> {
        self.content = validate_text("content", content.into())?;
        Ok(())
    }

    /// Loaded author, `None` while unresolved.
    pub fn author(&self) -> Option<EntityRef<Author>> {
        self.author.get().and_then(Clone::clone)
    }

    pub fn comments(&self) -> Option<&[EntityRef<Comment>]> {
        self.comments.get().map(Vec::as_slice)
    }

    pub fn tags(&self) -> Option<&[EntityRef<Tag>]> {
        self.tags.get().map(Vec::as_slice)
    }

    /// Creates a comment owned by this article and appends it.
    ///
    /// The comment is persisted with the article's next save.
    pub fn add_comment(
        &mut self,
        content: impl Into<String>,
    ) -> Result<EntityRef<Comment>, ValidationError> {
        let comment = Comment::new(content.into(), self.id)?;
        let comments = self.comments.get_mut().ok_or(ValidationError::CollectionNotLoaded {
            kind: EntityKind::Article,
            relation: Relation::ArticleComments,
        })?;
        comments.push(comment.clone());
        Ok(comment)
    }

    /// Detaches a comment; a persisted comment is deleted on the next save.
    pub fn remove_comment(
        &mut self,
        comment_id: EntityId,
    ) -> Result<Option<EntityRef<Comment>>, ValidationError> {
        let comments = self.comments.get_mut().ok_or(ValidationError::CollectionNotLoaded {
            kind: EntityKind::Article,
            relation: Relation::ArticleComments,
        })?;
        Ok(comments
            .iter()
            .position(|comment| comment.id() == comment_id)
            .map(|index| comments.remove(index)))
    }

    /// Associates a tag. Returns `false` when it was already associated.
    pub fn add_tag(&mut self, tag: &EntityRef<Tag>) -> Result<bool, ValidationError> {
        let tags = self.tags.get_mut().ok_or(ValidationError::CollectionNotLoaded {
            kind: EntityKind::Article,
            relation: Relation::ArticleTags,
        })?;
        if tags.iter().any(|existing| existing.id() == tag.id()) {
            return Ok(false);
        }
        tags.push(tag.clone());
        Ok(true)
    }

    /// Removes a tag association. The tag itself is left alone.
    pub fn remove_tag(&mut self, tag_id: EntityId) -> Result<bool, ValidationError> {
        let tags = self.tags.get_mut().ok_or(ValidationError::CollectionNotLoaded {
            kind: EntityKind::Article,
            relation: Relation::ArticleTags,
        })?;
        let before = tags.len();
        tags.retain(|tag| tag.id() != tag_id);
        Ok(tags.len() != before)
    }
}

fn validate_text(field: &'static str, value: String) -> Result<String, ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::BlankField {
            entity: EntityKind::Article,
            field,
        });
    }
    Ok(value)
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

impl Entity for Article {
    const KIND: EntityKind = EntityKind::Article;

    fn id(&self) -> EntityId {
        self.id
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Id(self.id),
            Value::Text(self.title.clone()),
            Value::Text(self.content.clone()),
            Value::Integer(self.created_at),
            Value::Id(self.author_id),
        ]
    }

    fn from_values(row: &[Value]) -> StoreResult<Self> {
        check_row_shape(Self::KIND, row)?;
        Ok(Self {
            id: required_id(Self::KIND, row, 0)?,
            title: required_text(Self::KIND, row, 1)?,
            content: required_text(Self::KIND, row, 2)?,
            created_at: row[3].expect_integer("articles.created_at")?,
            author_id: required_id(Self::KIND, row, 4)?,
            author: Resolvable::Unresolved,
            comments: Resolvable::Unresolved,
            tags: Resolvable::Unresolved,
        })
    }

    fn wrap(handle: EntityRef<Self>) -> AnyRef {
        AnyRef::Article(handle)
    }

    fn downcast(any: &AnyRef) -> Option<EntityRef<Self>> {
        match any {
            AnyRef::Article(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    fn release_navigations(&mut self) {
        self.author.reset();
        self.comments.reset();
        self.tags.reset();
    }
}

impl Navigation for nav::ArticleAuthor {
    type Source = Article;
    type Target = Author;
    type Value = Option<EntityRef<Author>>;

    const RELATION: Relation = Relation::ArticleAuthor;

    fn slot(source: &Article) -> &Resolvable<Self::Value> {
        &source.author
    }

    fn slot_mut(source: &mut Article) -> &mut Resolvable<Self::Value> {
        &mut source.author
    }
}

impl Navigation for nav::ArticleComments {
    type Source = Article;
    type Target = Comment;
    type Value = Vec<EntityRef<Comment>>;

    const RELATION: Relation = Relation::ArticleComments;

    fn slot(source: &Article) -> &Resolvable<Self::Value> {
        &source.comments
    }

    fn slot_mut(source: &mut Article) -> &mut Resolvable<Self::Value> {
        &mut source.comments
    }
}

impl Navigation for nav::ArticleTags {
    type Source = Article;
    type Target = Tag;
    type Value = Vec<EntityRef<Tag>>;

    const RELATION: Relation = Relation::ArticleTags;

    fn slot(source: &Article) -> &Resolvable<Self::Value> {
        &source.tags
    }

    fn slot_mut(source: &mut Article) -> &mut Resolvable<Self::Value> {
        &mut source.tags
    }
}

#[cfg(test)]
mod tests {
    use super::Article;
    use crate::error::ValidationError;
    use crate::model::entity::Entity;
    use crate::model::tag::Tag;
    use uuid::Uuid;

    #[test]
    fn create_rejects_nil_author_and_blank_title() {
        assert!(matches!(
            Article::create("Title", "Body", Uuid::nil()),
            Err(ValidationError::NilId {
                field: "author_id",
                ..
            })
        ));
        assert!(matches!(
            Article::create(" ", "Body", Uuid::new_v4()),
            Err(ValidationError::BlankField { field: "title", .. })
        ));
    }

    #[test]
    fn comments_are_created_with_the_owning_article_id() {
        let article = Article::create("Title", "Body", Uuid::new_v4()).unwrap();
        let comment = article.borrow_mut().add_comment("Nice").unwrap();
        assert_eq!(comment.borrow().article_id(), article.id());
        assert_eq!(article.borrow().comments().unwrap().len(), 1);

        let removed = article.borrow_mut().remove_comment(comment.id()).unwrap();
        assert!(removed.unwrap().ptr_eq(&comment));
        assert!(article.borrow().comments().unwrap().is_empty());
    }

    #[test]
    fn tags_are_associated_once() {
        let article = Article::create("Title", "Body", Uuid::new_v4()).unwrap();
        let tag = Tag::create("rust").unwrap();
        assert!(article.borrow_mut().add_tag(&tag).unwrap());
        assert!(!article.borrow_mut().add_tag(&tag).unwrap());
        assert!(article.borrow_mut().remove_tag(tag.id()).unwrap());
        assert!(!article.borrow_mut().remove_tag(tag.id()).unwrap());
    }

    #[test]
    fn unloaded_collections_cannot_be_changed() {
        let article = Article::create("Title", "Body", Uuid::new_v4()).unwrap();
        let loaded = Article::from_values(&article.borrow().values()).unwrap();
        let loaded = crate::model::entity::EntityRef::new(loaded);
        assert!(matches!(
            loaded.borrow_mut().add_comment("x"),
            Err(ValidationError::CollectionNotLoaded { .. })
        ));
    }
}
