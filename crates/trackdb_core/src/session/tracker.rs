//! Change tracker: per-entity lifecycle plus snapshot diffing.
//!
//! # Responsibility
//! - Record which tracked entities are staged for insert or delete.
//! - Keep the scalar snapshot taken at load or last commit, and the member
//!   ids of tracked collections, so pending changes can be derived.
//!
//! # Invariants
//! - `Modified` is never stored; it is computed by comparing current values
//!   with the snapshot, so reverting a field returns to `Unchanged`.
//! - Entries only change on explicit staging or after a successful commit.

use crate::model::entity::EntityKey;
use crate::model::relation::Relation;
use crate::model::value::{EntityId, EntityKind, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Observable tracking state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Detached,
    Added,
    Unchanged,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Added,
    Persisted,
    Deleted,
}

#[derive(Debug, Clone)]
pub(crate) struct TrackedEntry {
    pub(crate) lifecycle: Lifecycle,
    /// A row for this entity exists in storage.
    pub(crate) persisted: bool,
    /// Scalar values at load or last commit.
    pub(crate) snapshot: Option<Vec<Value>>,
    /// Member ids of tracked collections at load or last commit.
    pub(crate) collections: BTreeMap<Relation, BTreeSet<EntityId>>,
    /// Tracking order; inserts of one kind are written in this order.
    pub(crate) order: u64,
}

impl TrackedEntry {
    fn new(lifecycle: Lifecycle, snapshot: Option<Vec<Value>>, order: u64) -> Self {
        Self {
            lifecycle,
            persisted: lifecycle != Lifecycle::Added,
            snapshot,
            collections: BTreeMap::new(),
            order,
        }
    }
}

#[derive(Debug, Default)]
pub struct ChangeTracker {
    entries: BTreeMap<EntityKey, TrackedEntry>,
    next_order: u64,
}

impl ChangeTracker {
    pub(crate) fn entry(&self, key: &EntityKey) -> Option<&TrackedEntry> {
        self.entries.get(key)
    }

    pub fn is_tracked(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Stages a new entity for insert. Un-deletes a staged removal.
    pub fn track_added(&mut self, key: EntityKey) {
        let order = self.bump_order();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                if entry.lifecycle == Lifecycle::Deleted {
                    entry.lifecycle = if entry.persisted {
                        Lifecycle::Persisted
                    } else {
                        Lifecycle::Added
                    };
                }
            }
            None => {
                self.entries
                    .insert(key, TrackedEntry::new(Lifecycle::Added, None, order));
            }
        }
    }

    /// Tracks an entity known to exist in storage, snapshotting `values`.
    /// Existing entries are left untouched.
    pub fn track_unchanged(&mut self, key: EntityKey, values: Vec<Value>) {
        let order = self.bump_order();
        self.entries
            .entry(key)
            .or_insert_with(|| TrackedEntry::new(Lifecycle::Persisted, Some(values), order));
    }

    /// Stages removal. An untracked entity is assumed to be persisted.
    pub fn mark_deleted(&mut self, key: EntityKey, values: Vec<Value>) {
        let order = self.bump_order();
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| TrackedEntry::new(Lifecycle::Persisted, Some(values), order));
        entry.lifecycle = Lifecycle::Deleted;
    }

    /// State of `key` given its current scalar values.
    pub fn state(&self, key: &EntityKey, current: &[Value]) -> EntityState {
        match self.entries.get(key) {
            None => EntityState::Detached,
            Some(entry) => match entry.lifecycle {
                Lifecycle::Added => EntityState::Added,
                Lifecycle::Deleted => EntityState::Deleted,
                Lifecycle::Persisted => match &entry.snapshot {
                    Some(snapshot) if snapshot.as_slice() != current => EntityState::Modified,
                    _ => EntityState::Unchanged,
                },
            },
        }
    }

    /// Columns whose current value differs from the snapshot.
    pub fn changed_columns(
        &self,
        key: &EntityKey,
        current: &[Value],
    ) -> Vec<(&'static str, Value)> {
        let Some(snapshot) = self.entries.get(key).and_then(|entry| entry.snapshot.as_ref())
        else {
            return Vec::new();
        };
        diff_columns(key.kind, snapshot, current)
    }

    /// Adds loaded member ids to the collection snapshot of `key`.
    pub fn snapshot_collection(
        &mut self,
        key: &EntityKey,
        relation: Relation,
        ids: impl IntoIterator<Item = EntityId>,
    ) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.collections.entry(relation).or_default().extend(ids);
        }
    }

    pub fn collection_snapshot(
        &self,
        key: &EntityKey,
        relation: Relation,
    ) -> Option<&BTreeSet<EntityId>> {
        self.entries
            .get(key)
            .and_then(|entry| entry.collections.get(&relation))
    }

    /// Records a successful commit of `key`.
    pub fn accept(
        &mut self,
        key: EntityKey,
        values: Vec<Value>,
        collections: BTreeMap<Relation, BTreeSet<EntityId>>,
    ) {
        let order = self.bump_order();
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| TrackedEntry::new(Lifecycle::Persisted, None, order));
        entry.lifecycle = Lifecycle::Persisted;
        entry.persisted = true;
        entry.snapshot = Some(values);
        entry.collections.extend(collections);
    }

    pub fn forget(&mut self, key: &EntityKey) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn bump_order(&mut self) -> u64 {
        self.next_order += 1;
        self.next_order
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&EntityKey, &TrackedEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn diff_columns(kind: EntityKind, snapshot: &[Value], current: &[Value]) -> Vec<(&'static str, Value)> {
    kind.columns()
        .iter()
        .zip(snapshot.iter().zip(current.iter()))
        .filter(|(_, (before, after))| before != after)
        .map(|(column, (_, after))| (*column, after.clone()))
        .collect()
}
