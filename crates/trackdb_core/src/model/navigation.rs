//! Typed navigation markers.
//!
//! # Responsibility
//! - Tie each [`Relation`] to the entity field that caches it.
//! - Define how loaded targets are stored: one optional reference or a
//!   collection merged by identity.
//!
//! # See also
//! - `loading` for the kind-erased dispatch over these markers.

use crate::model::entity::{Entity, EntityRef};
use crate::model::relation::Relation;
use crate::model::resolvable::Resolvable;

/// Compile-time description of one navigation property.
pub trait Navigation {
    type Source: Entity;
    type Target: Entity;
    type Value: NavigationValue<Self::Target>;

    const RELATION: Relation;

    fn slot(source: &Self::Source) -> &Resolvable<Self::Value>;

    fn slot_mut(source: &mut Self::Source) -> &mut Resolvable<Self::Value>;
}

/// Storage shape of a resolved navigation.
pub trait NavigationValue<T: Entity>: Clone {
    fn from_loaded(found: Vec<EntityRef<T>>) -> Self;

    /// Adds newly found members without dropping in-memory ones.
    fn merge(&mut self, found: Vec<EntityRef<T>>);

    fn members(&self) -> Vec<EntityRef<T>>;

    /// Drops members for which `keep` returns `false`.
    fn retain(&mut self, keep: &dyn Fn(&EntityRef<T>) -> bool);
}

impl<T: Entity> NavigationValue<T> for Option<EntityRef<T>> {
    fn from_loaded(found: Vec<EntityRef<T>>) -> Self {
        found.into_iter().next()
    }

    fn merge(&mut self, found: Vec<EntityRef<T>>) {
        if self.is_none() {
            *self = found.into_iter().next();
        }
    }

    fn members(&self) -> Vec<EntityRef<T>> {
        self.iter().cloned().collect()
    }

    fn retain(&mut self, keep: &dyn Fn(&EntityRef<T>) -> bool) {
        if self.as_ref().is_some_and(|member| !keep(member)) {
            *self = None;
        }
    }
}

impl<T: Entity> NavigationValue<T> for Vec<EntityRef<T>> {
    fn from_loaded(found: Vec<EntityRef<T>>) -> Self {
        let mut members = Vec::with_capacity(found.len());
        members.merge(found);
        members
    }

    fn merge(&mut self, found: Vec<EntityRef<T>>) {
        for candidate in found {
            if !self.iter().any(|member| member.id() == candidate.id()) {
                self.push(candidate);
            }
        }
    }

    fn members(&self) -> Vec<EntityRef<T>> {
        self.clone()
    }

    fn retain(&mut self, keep: &dyn Fn(&EntityRef<T>) -> bool) {
        Vec::retain(self, |member| keep(member));
    }
}

/// Navigation markers, one per [`Relation`].
pub mod nav {
    /// `Author.articles`
    #[derive(Debug, Clone, Copy)]
    pub struct AuthorArticles;
    /// `Article.author`
    #[derive(Debug, Clone, Copy)]
    pub struct ArticleAuthor;
    /// `Article.comments`
    #[derive(Debug, Clone, Copy)]
    pub struct ArticleComments;
    /// `Comment.article`
    #[derive(Debug, Clone, Copy)]
    pub struct CommentArticle;
    /// `Article.tags`
    #[derive(Debug, Clone, Copy)]
    pub struct ArticleTags;
    /// `Tag.articles`
    #[derive(Debug, Clone, Copy)]
    pub struct TagArticles;
}
