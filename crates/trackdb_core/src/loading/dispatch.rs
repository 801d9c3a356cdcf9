//! Kind-erased access to navigation slots, keyed by [`Relation`].

use crate::error::{StoreError, StoreResult};
use crate::model::entity::{AnyRef, Entity, EntityKey, EntityRef};
use crate::model::navigation::{nav, Navigation, NavigationValue};
use crate::model::relation::Relation;
use crate::model::resolvable::Resolvable;
use std::collections::BTreeSet;

/// Resolves `relation` on `source` with `found`, merging into an already
/// resolved value.
pub(crate) fn resolve(source: &AnyRef, relation: Relation, found: &[AnyRef]) -> StoreResult<()> {
    match relation {
        Relation::AuthorArticles => resolve_with::<nav::AuthorArticles>(source, found),
        Relation::ArticleAuthor => resolve_with::<nav::ArticleAuthor>(source, found),
        Relation::ArticleComments => resolve_with::<nav::ArticleComments>(source, found),
        Relation::CommentArticle => resolve_with::<nav::CommentArticle>(source, found),
        Relation::ArticleTags => resolve_with::<nav::ArticleTags>(source, found),
        Relation::TagArticles => resolve_with::<nav::TagArticles>(source, found),
    }
}

/// Loaded members of `relation` on `source`, `None` while unresolved.
pub(crate) fn members(source: &AnyRef, relation: Relation) -> Option<Vec<AnyRef>> {
    match relation {
        Relation::AuthorArticles => members_with::<nav::AuthorArticles>(source),
        Relation::ArticleAuthor => members_with::<nav::ArticleAuthor>(source),
        Relation::ArticleComments => members_with::<nav::ArticleComments>(source),
        Relation::CommentArticle => members_with::<nav::CommentArticle>(source),
        Relation::ArticleTags => members_with::<nav::ArticleTags>(source),
        Relation::TagArticles => members_with::<nav::TagArticles>(source),
    }
}

pub(crate) fn is_resolved(source: &AnyRef, relation: Relation) -> bool {
    members(source, relation).is_some()
}

/// Drops members whose key is in `removed` from every navigation of `source`.
pub(crate) fn prune(source: &AnyRef, removed: &BTreeSet<EntityKey>) {
    for relation in Relation::from_kind(source.kind()) {
        match relation {
            Relation::AuthorArticles => prune_with::<nav::AuthorArticles>(source, removed),
            Relation::ArticleAuthor => prune_with::<nav::ArticleAuthor>(source, removed),
            Relation::ArticleComments => prune_with::<nav::ArticleComments>(source, removed),
            Relation::CommentArticle => prune_with::<nav::CommentArticle>(source, removed),
            Relation::ArticleTags => prune_with::<nav::ArticleTags>(source, removed),
            Relation::TagArticles => prune_with::<nav::TagArticles>(source, removed),
        }
    }
}

fn resolve_with<N: Navigation>(source: &AnyRef, found: &[AnyRef]) -> StoreResult<()> {
    let handle = N::Source::downcast(source).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "{} cannot hold navigation {}",
            source.kind(),
            N::RELATION
        ))
    })?;
    let targets = found
        .iter()
        .filter_map(N::Target::downcast)
        .collect::<Vec<EntityRef<N::Target>>>();

    let mut entity = handle.borrow_mut();
    let slot = N::slot_mut(&mut entity);
    match *slot {
        Resolvable::Resolved(ref mut value) => value.merge(targets),
        Resolvable::Unresolved => *slot = Resolvable::Resolved(N::Value::from_loaded(targets)),
    }
    Ok(())
}

fn members_with<N: Navigation>(source: &AnyRef) -> Option<Vec<AnyRef>> {
    let handle = N::Source::downcast(source)?;
    let entity = handle.borrow();
    let members = N::slot(&entity).get().map(|value| {
        value
            .members()
            .into_iter()
            .map(EntityRef::into_any)
            .collect::<Vec<_>>()
    });
    members
}

fn prune_with<N: Navigation>(source: &AnyRef, removed: &BTreeSet<EntityKey>) {
    let Some(handle) = N::Source::downcast(source) else {
        return;
    };
    let mut entity = handle.borrow_mut();
    if let Some(value) = N::slot_mut(&mut entity).get_mut() {
        value.retain(&|member| !removed.contains(&member.key()));
    }
}
