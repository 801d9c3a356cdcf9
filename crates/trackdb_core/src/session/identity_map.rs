//! Per-session identity map.
//!
//! # Responsibility
//! - Hold at most one instance per (kind, id) for the session lifetime.
//!
//! # Invariants
//! - Lookups never touch storage.
//! - Registering the same instance twice is a no-op; registering a
//!   different instance under a known identity is rejected.

use crate::error::ValidationError;
use crate::model::entity::{AnyRef, Entity, EntityKey, EntityRef};
use crate::model::value::{EntityId, EntityKind};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: BTreeMap<EntityKey, AnyRef>,
}

impl IdentityMap {
    pub fn get(&self, kind: EntityKind, id: EntityId) -> Option<&AnyRef> {
        self.entries.get(&EntityKey::new(kind, id))
    }

    pub fn get_typed<T: Entity>(&self, id: EntityId) -> Option<EntityRef<T>> {
        self.get(T::KIND, id).and_then(T::downcast)
    }

    /// Inserts `entity`. Returns `true` when it was not tracked before.
    ///
    /// # Errors
    /// - `IdentityConflict` when another instance holds the identity.
    pub fn register(&mut self, entity: &AnyRef) -> Result<bool, ValidationError> {
        let key = entity.key();
        match self.entries.get(&key) {
            Some(existing) if existing.ptr_eq(entity) => Ok(false),
            Some(_) => Err(ValidationError::IdentityConflict {
                kind: key.kind,
                id: key.id,
            }),
            None => {
                self.entries.insert(key, entity.clone());
                Ok(true)
            }
        }
    }

    /// Whether this exact instance is the tracked one.
    pub fn holds(&self, entity: &AnyRef) -> bool {
        self.entries
            .get(&entity.key())
            .is_some_and(|existing| existing.ptr_eq(entity))
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<AnyRef> {
        self.entries.remove(key)
    }

    /// Empties the map, handing back what it held.
    pub fn clear(&mut self) -> Vec<AnyRef> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in (kind, id) order.
    pub fn iter(&self) -> impl Iterator<Item = &AnyRef> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::IdentityMap;
    use crate::error::ValidationError;
    use crate::model::author::Author;
    use crate::model::entity::{Entity, EntityRef};
    use crate::model::value::EntityKind;

    #[test]
    fn same_instance_registers_once() {
        let mut map = IdentityMap::default();
        let author = Author::create("Alice").unwrap().into_any();
        assert!(map.register(&author).unwrap());
        assert!(!map.register(&author).unwrap());
        assert_eq!(map.len(), 1);
        assert!(map
            .get(EntityKind::Author, author.id())
            .unwrap()
            .ptr_eq(&author));
    }

    #[test]
    fn different_instance_with_same_identity_conflicts() {
        let mut map = IdentityMap::default();
        let author = Author::create("Alice").unwrap();
        map.register(&author.clone().into_any()).unwrap();

        let copy = Author::from_values(&author.borrow().values()).unwrap();
        let copy = EntityRef::new(copy).into_any();
        assert_eq!(
            map.register(&copy),
            Err(ValidationError::IdentityConflict {
                kind: EntityKind::Author,
                id: author.id()
            })
        );
        assert!(!map.holds(&copy));
    }

    #[test]
    fn clear_hands_back_entries() {
        let mut map = IdentityMap::default();
        map.register(&Author::create("A").unwrap().into_any())
            .unwrap();
        map.register(&Author::create("B").unwrap().into_any())
            .unwrap();
        assert_eq!(map.clear().len(), 2);
        assert!(map.is_empty());
    }
}
