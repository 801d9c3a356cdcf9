//! Session: identity map, change tracking and the unit of work.
//!
//! # Responsibility
//! - Own the per-session identity map and change tracker.
//! - Stage additions and removals, and commit them atomically with [`Session::save`].
//! - Load navigations explicitly ([`Session::load`]) or lazily
//!   ([`Session::navigate`]).
//!
//! # Invariants
//! - A session is single-threaded; independent sessions share one backend.
//! - Staging never touches storage; every storage access is one round trip
//!   through the session gateway.
//! - A failed save leaves the identity map and tracker unchanged.
//!
//! # See also
//! - `query` for reading entities into a session.
//! - `loading` for the resolution strategies.

mod delete_resolver;
mod gateway;
mod identity_map;
mod tracker;
mod unit_of_work;

pub use gateway::{CancellationToken, SessionStats};
pub use identity_map::IdentityMap;
pub use tracker::{ChangeTracker, EntityState};
pub use unit_of_work::SaveSummary;

use crate::error::{OrmResult, StoreError, ValidationError};
use crate::loading::{self, dispatch, Materializer};
use crate::model::entity::{AnyRef, Entity, EntityRef};
use crate::model::navigation::Navigation;
use crate::model::relation::{Model, Relation};
use crate::model::value::{EntityId, EntityKind};
use crate::query::expr::Field;
use crate::query::Query;
use crate::store::Backend;
use gateway::Gateway;
use log::debug;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Per-session behavior switches.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Queries register and snapshot what they return unless overridden.
    pub tracking: bool,
    /// Unresolved navigations load on first [`Session::navigate`].
    pub lazy_loading: bool,
    /// Includes load with one round trip per relation instead of one join.
    pub split_queries: bool,
    pub cancellation: CancellationToken,
    /// Upper bound for a single round trip; `None` disables the check.
    pub round_trip_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tracking: true,
            lazy_loading: true,
            split_queries: false,
            cancellation: CancellationToken::new(),
            round_trip_timeout: None,
        }
    }
}

/// Serializable snapshot of a session for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDebugInfo {
    pub entities: Vec<TrackedEntityInfo>,
    pub stats: SessionStats,
    pub tracking: bool,
    pub lazy_loading: bool,
    pub split_queries: bool,
    pub cancelled: bool,
    pub round_trip_timeout_ms: Option<u128>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedEntityInfo {
    pub kind: EntityKind,
    pub id: EntityId,
    pub state: EntityState,
}

pub struct Session {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) model: Arc<Model>,
    pub(crate) options: SessionOptions,
    pub(crate) identity_map: IdentityMap,
    pub(crate) tracker: ChangeTracker,
    pub(crate) gateway: Gateway,
}

impl Session {
    pub fn new(backend: Arc<dyn Backend>, model: Arc<Model>) -> Self {
        Self::with_options(backend, model, SessionOptions::default())
    }

    pub fn with_options(
        backend: Arc<dyn Backend>,
        model: Arc<Model>,
        options: SessionOptions,
    ) -> Self {
        let gateway = Gateway::new(options.cancellation.clone(), options.round_trip_timeout);
        Self {
            backend,
            model,
            options,
            identity_map: IdentityMap::default(),
            tracker: ChangeTracker::default(),
            gateway,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    /// Stages `entity` for insert, together with the untracked comments and
    /// tags reachable from it.
    ///
    /// Re-adding an entity staged for removal cancels the removal.
    ///
    /// # Errors
    /// - `IdentityConflict` when another instance with the same identity is
    ///   tracked; nothing is staged then.
    pub fn add<T: Entity>(&mut self, entity: &EntityRef<T>) -> OrmResult<()> {
        let root = entity.clone().into_any();
        let mut staged = vec![root.clone()];
        staged.extend(unit_of_work::reachable_members(&root));

        for candidate in &staged {
            self.check_identity(candidate)?;
        }
        for candidate in staged {
            if self.identity_map.register(&candidate)? || candidate.ptr_eq(&root) {
                self.tracker.track_added(candidate.key());
            }
        }
        Ok(())
    }

    /// Starts tracking an entity that already exists in storage, together
    /// with the comments and tags in its loaded collections, snapshotting
    /// current values and collections.
    ///
    /// # Errors
    /// - `IdentityConflict` when another instance with the same identity is
    ///   tracked; nothing is attached then.
    pub fn attach<T: Entity>(&mut self, entity: &EntityRef<T>) -> OrmResult<()> {
        let graph = unit_of_work::graph_of(&entity.clone().into_any())?;
        for candidate in &graph {
            self.check_identity(candidate)?;
        }
        for candidate in &graph {
            if self.identity_map.register(candidate)? {
                self.track_attached(candidate);
            }
        }
        Ok(())
    }

    fn track_attached(&mut self, entity: &AnyRef) {
        let key = entity.key();
        self.tracker.track_unchanged(key, entity.values());
        for relation in
            Relation::from_kind(key.kind).filter(|relation| relation.is_tracked_collection())
        {
            if let Some(members) = dispatch::members(entity, relation) {
                self.tracker
                    .snapshot_collection(&key, relation, members.iter().map(AnyRef::id));
            }
        }
    }

    /// Stages `entity` for deletion at the next save.
    ///
    /// An entity that was never persisted is simply dropped by that save.
    /// Staging never fails on dependents; delete policies apply at commit.
    pub fn remove<T: Entity>(&mut self, entity: &EntityRef<T>) -> OrmResult<()> {
        let any = entity.clone().into_any();
        let key = any.key();
        let was_tracked = self.identity_map.holds(&any);
        let discovered = !was_tracked
            && unit_of_work::discover(&self.identity_map, &self.tracker)?
                .iter()
                .any(|member| member.ptr_eq(&any));

        self.identity_map.register(&any)?;
        if discovered {
            self.tracker.track_added(key);
        }
        self.tracker.mark_deleted(key, any.values());
        Ok(())
    }

    /// Stops tracking everything. Storage is not touched.
    ///
    /// Navigations of the released instances are reset to unresolved, except
    /// for instances the caller is borrowing at that moment.
    pub fn clear(&mut self) {
        release_navigations(self.identity_map.clear());
        self.tracker.clear();
    }

    /// Tracked instance of `T` with `id`, without touching storage.
    pub fn get<T: Entity>(&self, id: EntityId) -> Option<EntityRef<T>> {
        self.identity_map.get_typed(id)
    }

    /// Tracked instance when present, otherwise one query by id.
    pub fn find<T: Entity>(&mut self, id: EntityId) -> OrmResult<Option<EntityRef<T>>> {
        if let Some(tracked) = self.get::<T>(id) {
            return Ok(Some(tracked));
        }
        Query::<T>::new()
            .filter(Field::new("id").equals(id))
            .first_or_default(self)
    }

    /// Tracking state of `entity` in this session.
    pub fn state_of<T: Entity>(&self, entity: &EntityRef<T>) -> EntityState {
        let any = entity.clone().into_any();
        if !self.identity_map.holds(&any) {
            // A conflicting graph is reported by add, remove and save.
            let reachable = unit_of_work::discover(&self.identity_map, &self.tracker)
                .unwrap_or_default()
                .iter()
                .any(|member| member.ptr_eq(&any));
            return if reachable {
                EntityState::Added
            } else {
                EntityState::Detached
            };
        }

        if unit_of_work::is_orphan(&self.identity_map, &self.tracker, &any) {
            return EntityState::Deleted;
        }
        self.tracker.state(&any.key(), &any.values())
    }

    /// Loads navigation `N` of `entity` with exactly one round trip, merging
    /// into an already loaded collection.
    pub fn load<N: Navigation>(
        &mut self,
        entity: &EntityRef<N::Source>,
        _navigation: N,
    ) -> OrmResult<N::Value> {
        let any = entity.clone().into_any();
        let tracking = self.options.tracking && self.identity_map.holds(&any);
        let mut materializer = Materializer::new(tracking);
        loading::load_relation(self, &mut materializer, std::slice::from_ref(&any), N::RELATION)?;

        let value = {
            let source = entity.borrow();
            N::slot(&source).get().cloned()
        };
        value.ok_or_else(|| {
            StoreError::InvalidData(format!("{} stayed unresolved after loading", N::RELATION))
                .into()
        })
    }

    /// Cached navigation `N` of `entity`, loaded on first access when lazy
    /// loading is enabled.
    ///
    /// # Errors
    /// - `NavigationNotLoaded` when unresolved and lazy loading is disabled.
    pub fn navigate<N: Navigation>(
        &mut self,
        entity: &EntityRef<N::Source>,
        navigation: N,
    ) -> OrmResult<N::Value> {
        let cached = {
            let source = entity.borrow();
            N::slot(&source).get().cloned()
        };
        if let Some(value) = cached {
            return Ok(value);
        }
        if !self.options.lazy_loading {
            return Err(ValidationError::NavigationNotLoaded {
                kind: <N::Source as Entity>::KIND,
                relation: N::RELATION,
            }
            .into());
        }

        debug!(
            "event=lazy_load module=session status=start kind={} id={} relation={}",
            <N::Source as Entity>::KIND,
            entity.id(),
            N::RELATION
        );
        self.load(entity, navigation)
    }

    /// Commits every pending change in one transaction.
    ///
    /// # Errors
    /// - `ConstraintViolation` when a restrict policy or a storage constraint
    ///   rejects the commit.
    /// - `Storage` on backend failure, cancellation or timeout.
    ///
    /// On error nothing is written and tracking state is unchanged.
    pub fn save(&mut self) -> OrmResult<SaveSummary> {
        unit_of_work::save(self)
    }

    /// Whether `save` would write anything.
    pub fn has_changes(&self) -> bool {
        unit_of_work::has_changes(&self.identity_map, &self.tracker)
    }

    pub fn stats(&self) -> SessionStats {
        self.gateway.stats()
    }

    pub fn reset_stats(&mut self) {
        self.gateway.reset_stats();
    }

    pub fn debug_info(&self) -> SessionDebugInfo {
        let entities = self
            .identity_map
            .iter()
            .map(|entity| TrackedEntityInfo {
                kind: entity.kind(),
                id: entity.id(),
                state: self.state_of_any(entity),
            })
            .collect();
        SessionDebugInfo {
            entities,
            stats: self.stats(),
            tracking: self.options.tracking,
            lazy_loading: self.options.lazy_loading,
            split_queries: self.options.split_queries,
            cancelled: self.options.cancellation.is_cancelled(),
            round_trip_timeout_ms: self
                .options
                .round_trip_timeout
                .map(|timeout| timeout.as_millis()),
        }
    }

    fn state_of_any(&self, entity: &AnyRef) -> EntityState {
        if unit_of_work::is_orphan(&self.identity_map, &self.tracker, entity) {
            return EntityState::Deleted;
        }
        self.tracker.state(&entity.key(), &entity.values())
    }

    fn check_identity(&self, entity: &AnyRef) -> Result<(), ValidationError> {
        match self.identity_map.get(entity.kind(), entity.id()) {
            Some(existing) if !existing.ptr_eq(entity) => Err(ValidationError::IdentityConflict {
                kind: entity.kind(),
                id: entity.id(),
            }),
            _ => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        release_navigations(self.identity_map.clear());
    }
}

/// Resets navigations of released instances. Instances still borrowed by a
/// caller keep their navigations.
pub(crate) fn release_navigations(entities: impl IntoIterator<Item = AnyRef>) {
    for entity in entities {
        if !entity.release_navigations() {
            debug!(
                "event=release_navigations module=session status=skipped key={}",
                entity.key()
            );
        }
    }
}
