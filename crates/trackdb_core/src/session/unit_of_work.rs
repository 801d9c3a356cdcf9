//! Unit of work: pending-change derivation and atomic commit.
//!
//! # Responsibility
//! - Derive inserts, updates, deletes and association changes from the
//!   identity map and tracker.
//! - Apply them in foreign-key order inside one transaction, then update
//!   tracking state.
//!
//! # Invariants
//! - Tracking state changes only after the transaction committed.
//! - Inserts run owners first, deletes run dependents first.
//! - An entity added and removed before any save never reaches storage.

use crate::error::{ConstraintViolation, OrmResult, ValidationError};
use crate::loading::dispatch;
use crate::model::entity::{AnyRef, EntityKey};
use crate::model::relation::{DeletePolicy, Relation};
use crate::model::value::{EntityId, EntityKind, Value};
use crate::session::delete_resolver;
use crate::session::identity_map::IdentityMap;
use crate::session::tracker::{ChangeTracker, Lifecycle};
use crate::session::Session;
use crate::store::{WriteBatch, WriteOp};
use log::{error, info};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// Row counts written by one successful save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub linked: usize,
    pub unlinked: usize,
}

/// Pending changes of one session, before delete resolution.
#[derive(Debug, Default)]
struct ChangeSet {
    /// Tracked `Added` entities followed by untracked reachable ones.
    inserts: Vec<AnyRef>,
    /// Untracked entities discovered through tracked collections.
    discovered: Vec<AnyRef>,
    updates: Vec<(EntityKey, Vec<(&'static str, Value)>)>,
    deletes: Vec<EntityKey>,
    /// Never persisted and no longer wanted; only forgotten.
    skipped: Vec<EntityKey>,
    /// (article, tag) association rows to add.
    links: Vec<(EntityId, EntityId)>,
    unlinks: Vec<(EntityId, EntityId)>,
}

impl ChangeSet {
    fn collect(map: &IdentityMap, tracker: &ChangeTracker) -> Result<Self, ValidationError> {
        let mut changes = Self::default();
        let mut added = Vec::new();

        for (key, entry) in tracker.iter() {
            let Some(entity) = map.get(key.kind, key.id) else {
                continue;
            };
            let orphan = is_orphan(map, tracker, entity);
            match entry.lifecycle {
                Lifecycle::Deleted if entry.persisted => changes.deletes.push(*key),
                Lifecycle::Deleted => changes.skipped.push(*key),
                Lifecycle::Added if orphan => changes.skipped.push(*key),
                Lifecycle::Added => added.push((entry.order, entity.clone())),
                Lifecycle::Persisted if orphan => changes.deletes.push(*key),
                Lifecycle::Persisted => {
                    let changed = tracker.changed_columns(key, &entity.values());
                    if !changed.is_empty() {
                        changes.updates.push((*key, changed));
                    }
                }
            }
        }

        added.sort_by_key(|(order, _)| *order);
        changes.inserts = added.into_iter().map(|(_, entity)| entity).collect();
        changes.discovered = discover(map, tracker)?;
        changes.inserts.extend(changes.discovered.iter().cloned());
        changes
            .inserts
            .sort_by_key(|entity| entity.kind().dependency_rank());

        for entity in map.iter().chain(changes.discovered.iter()) {
            let AnyRef::Article(_) = entity else {
                continue;
            };
            let key = entity.key();
            if tracker
                .entry(&key)
                .is_some_and(|entry| entry.lifecycle == Lifecycle::Deleted)
            {
                continue;
            }
            let Some(current) = dispatch::members(entity, Relation::ArticleTags) else {
                continue;
            };
            let current = current.iter().map(AnyRef::id).collect::<BTreeSet<_>>();
            let empty = BTreeSet::new();
            let snapshot = tracker
                .collection_snapshot(&key, Relation::ArticleTags)
                .unwrap_or(&empty);
            for tag in current.difference(snapshot) {
                changes.links.push((key.id, *tag));
            }
            for tag in snapshot.difference(&current) {
                changes.unlinks.push((key.id, *tag));
            }
        }

        Ok(changes)
    }

    fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.links.is_empty()
            && self.unlinks.is_empty()
    }
}

/// Untracked comments and tags held by tracked collections of `entity`.
pub(crate) fn reachable_members(entity: &AnyRef) -> Vec<AnyRef> {
    Relation::from_kind(entity.kind())
        .filter(|relation| relation.is_tracked_collection())
        .filter_map(|relation| dispatch::members(entity, relation))
        .flatten()
        .collect()
}

/// `root` followed by every distinct instance reachable through tracked
/// collections.
///
/// # Errors
/// - `IdentityConflict` when two different instances share an identity.
pub(crate) fn graph_of(root: &AnyRef) -> Result<Vec<AnyRef>, ValidationError> {
    let mut graph = vec![root.clone()];
    let mut cursor = 0;
    while cursor < graph.len() {
        let members = reachable_members(&graph[cursor]);
        cursor += 1;
        for member in members {
            match graph.iter().find(|seen| seen.key() == member.key()) {
                Some(seen) if seen.ptr_eq(&member) => {}
                Some(_) => {
                    return Err(ValidationError::IdentityConflict {
                        kind: member.kind(),
                        id: member.id(),
                    })
                }
                None => graph.push(member),
            }
        }
    }
    Ok(graph)
}

/// Entities reachable from live tracked entities but not tracked themselves.
///
/// # Errors
/// - `IdentityConflict` when a reachable instance shadows a tracked one or
///   two reachable instances share an identity.
pub(crate) fn discover(
    map: &IdentityMap,
    tracker: &ChangeTracker,
) -> Result<Vec<AnyRef>, ValidationError> {
    let mut found: Vec<AnyRef> = Vec::new();
    let mut keys = HashSet::new();
    for owner in map.iter() {
        let live = tracker
            .entry(&owner.key())
            .is_some_and(|entry| entry.lifecycle != Lifecycle::Deleted);
        if !live {
            continue;
        }
        for member in reachable_members(owner) {
            let key = member.key();
            match map.get(key.kind, key.id) {
                Some(tracked) if tracked.ptr_eq(&member) => continue,
                Some(_) => {
                    return Err(ValidationError::IdentityConflict {
                        kind: key.kind,
                        id: key.id,
                    })
                }
                None => {}
            }
            if keys.insert(key) {
                found.push(member);
            } else if !found.iter().any(|seen| seen.ptr_eq(&member)) {
                return Err(ValidationError::IdentityConflict {
                    kind: key.kind,
                    id: key.id,
                });
            }
        }
    }
    Ok(found)
}

/// A tracked comment that its live, loaded article no longer holds.
///
/// A persisted comment only counts when the article's loaded collection
/// contained it, so comments outside a partial load are never deleted.
pub(crate) fn is_orphan(map: &IdentityMap, tracker: &ChangeTracker, entity: &AnyRef) -> bool {
    let AnyRef::Comment(comment) = entity else {
        return false;
    };
    let Some(entry) = tracker.entry(&entity.key()) else {
        return false;
    };
    if entry.lifecycle == Lifecycle::Deleted {
        return false;
    }

    let article_key = EntityKey::new(EntityKind::Article, comment.borrow().article_id());
    let Some(article) = map.get(article_key.kind, article_key.id) else {
        return false;
    };
    let article_live = tracker
        .entry(&article_key)
        .is_some_and(|entry| entry.lifecycle != Lifecycle::Deleted);
    if !article_live {
        return false;
    }
    let Some(members) = dispatch::members(article, Relation::ArticleComments) else {
        return false;
    };
    if members.iter().any(|member| member.ptr_eq(entity)) {
        return false;
    }

    if entry.persisted {
        tracker
            .collection_snapshot(&article_key, Relation::ArticleComments)
            .is_some_and(|snapshot| snapshot.contains(&entity.id()))
    } else {
        true
    }
}

pub(crate) fn has_changes(map: &IdentityMap, tracker: &ChangeTracker) -> bool {
    ChangeSet::collect(map, tracker).map_or(true, |changes| !changes.is_empty())
}

pub(crate) fn save(session: &mut Session) -> OrmResult<SaveSummary> {
    let started_at = Instant::now();
    let result = commit(session);
    match &result {
        Ok(summary) => info!(
            "event=save module=session status=ok inserted={} updated={} deleted={} linked={} unlinked={} duration_ms={}",
            summary.inserted,
            summary.updated,
            summary.deleted,
            summary.linked,
            summary.unlinked,
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=save module=session status=error duration_ms={} error={}",
            started_at.elapsed().as_millis(),
            err
        ),
    }
    result
}

fn commit(session: &mut Session) -> OrmResult<SaveSummary> {
    let changes = ChangeSet::collect(&session.identity_map, &session.tracker)?;
    if changes.is_empty() {
        forget_all(session, &changes.skipped.iter().copied().collect());
        return Ok(SaveSummary::default());
    }

    let backend = Arc::clone(&session.backend);
    let mut tx = session.gateway.begin(backend.as_ref())?;
    let deleted = delete_resolver::resolve(
        &mut session.gateway,
        tx.as_mut(),
        &session.model,
        &changes.deletes,
    )?;

    let mut gone = deleted
        .iter()
        .chain(changes.skipped.iter())
        .copied()
        .collect::<BTreeSet<_>>();
    let inserts = drop_inserts_under_removed_owners(session, changes.inserts, &mut gone)?;

    let mut batch = WriteBatch::default();
    let mut summary = SaveSummary::default();
    for entity in &inserts {
        batch.push(WriteOp::Insert {
            kind: entity.kind(),
            row: entity.values(),
        });
    }
    summary.inserted = inserts.len();

    let is_gone = |kind: EntityKind, id: EntityId| gone.contains(&EntityKey::new(kind, id));
    for (article, tag) in &changes.links {
        if is_gone(EntityKind::Article, *article) || is_gone(EntityKind::Tag, *tag) {
            continue;
        }
        batch.push(WriteOp::Link {
            relation: Relation::ArticleTags,
            source: *article,
            target: *tag,
        });
        summary.linked += 1;
    }
    for (key, changed) in &changes.updates {
        if gone.contains(key) {
            continue;
        }
        batch.push(WriteOp::Update {
            kind: key.kind,
            id: key.id,
            changes: changed.clone(),
        });
        summary.updated += 1;
    }
    for (article, tag) in &changes.unlinks {
        if is_gone(EntityKind::Article, *article) || is_gone(EntityKind::Tag, *tag) {
            continue;
        }
        batch.push(WriteOp::Unlink {
            relation: Relation::ArticleTags,
            source: *article,
            target: *tag,
        });
        summary.unlinked += 1;
    }

    let mut deletes = deleted.iter().copied().collect::<Vec<_>>();
    deletes.sort_by_key(|key| std::cmp::Reverse(key.kind.dependency_rank()));
    for key in &deletes {
        match key.kind {
            EntityKind::Article => batch.push(WriteOp::UnlinkAll {
                relation: Relation::ArticleTags,
                source: key.id,
            }),
            EntityKind::Tag => batch.push(WriteOp::UnlinkAll {
                relation: Relation::TagArticles,
                source: key.id,
            }),
            EntityKind::Author | EntityKind::Comment => {}
        }
    }
    for key in &deletes {
        batch.push(WriteOp::Delete {
            kind: key.kind,
            id: key.id,
        });
    }
    summary.deleted = deletes.len();

    if !batch.is_empty() {
        session.gateway.write_in(tx.as_mut(), &batch)?;
    }
    session.gateway.commit(tx)?;

    apply_committed(session, &changes.discovered, &gone);
    Ok(summary)
}

/// Drops inserts whose owner is being deleted (cascade) or fails the commit
/// (restrict), until no insert references a removed owner.
fn drop_inserts_under_removed_owners(
    session: &Session,
    mut inserts: Vec<AnyRef>,
    gone: &mut BTreeSet<EntityKey>,
) -> OrmResult<Vec<AnyRef>> {
    loop {
        let mut blocked: BTreeMap<(EntityKey, Relation), usize> = BTreeMap::new();
        let mut dropped = Vec::new();
        for entity in &inserts {
            let Some(owner) = entity.owner_key().filter(|owner| gone.contains(owner)) else {
                continue;
            };
            let Some(relation) = delete_resolver::owning_relation(entity.kind()) else {
                continue;
            };
            match session.model.policy(relation) {
                Some(DeletePolicy::Cascade) => dropped.push(entity.key()),
                Some(DeletePolicy::Restrict) | None => {
                    *blocked.entry((owner, relation)).or_default() += 1;
                }
            }
        }

        if let Some(((owner, relation), dependents)) = blocked.into_iter().next() {
            return Err(ConstraintViolation::RestrictedDelete {
                owner: owner.kind,
                owner_id: owner.id,
                relation,
                dependents,
            }
            .into());
        }
        if dropped.is_empty() {
            return Ok(inserts);
        }
        inserts.retain(|entity| !dropped.contains(&entity.key()));
        gone.extend(dropped);
    }
}

fn apply_committed(session: &mut Session, discovered: &[AnyRef], gone: &BTreeSet<EntityKey>) {
    for entity in discovered {
        if gone.contains(&entity.key()) {
            continue;
        }
        // Conflicts were rejected while collecting changes.
        if session.identity_map.register(entity).is_ok() {
            session.tracker.track_added(entity.key());
        }
    }

    forget_all(session, gone);
    if !gone.is_empty() {
        for entity in session.identity_map.iter() {
            dispatch::prune(entity, gone);
        }
    }

    for entity in session.identity_map.iter() {
        let key = entity.key();
        let collections = Relation::from_kind(key.kind)
            .filter(|relation| relation.is_tracked_collection())
            .filter_map(|relation| {
                dispatch::members(entity, relation)
                    .map(|members| (relation, members.iter().map(AnyRef::id).collect()))
            })
            .collect::<BTreeMap<_, _>>();
        session.tracker.accept(key, entity.values(), collections);
    }
}

fn forget_all(session: &mut Session, keys: &BTreeSet<EntityKey>) {
    for key in keys {
        super::release_navigations(session.identity_map.remove(key));
        session.tracker.forget(key);
    }
}
