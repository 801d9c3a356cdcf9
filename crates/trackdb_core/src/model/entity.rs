//! Shared entity handles and the entity contract.
//!
//! # Responsibility
//! - Define [`Entity`], implemented by every persisted kind.
//! - Provide the shared handle [`EntityRef`] and its kind-erased form [`AnyRef`].
//!
//! # Invariants
//! - A handle caches the entity id; ids never change after creation.
//! - "Same instance" means the same allocation (`ptr_eq`), not equal fields.

use crate::error::{StoreError, StoreResult};
use crate::model::article::Article;
use crate::model::author::Author;
use crate::model::comment::Comment;
use crate::model::tag::Tag;
use crate::model::value::{EntityId, EntityKind, Value};
use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

/// Contract between a persisted kind and the session machinery.
pub trait Entity: Sized + 'static {
    const KIND: EntityKind;

    fn id(&self) -> EntityId;

    /// Scalar columns in [`EntityKind::columns`] order.
    fn values(&self) -> Vec<Value>;

    /// Rebuilds an entity from a stored row, rejecting invalid data.
    /// Navigations start unresolved.
    fn from_values(row: &[Value]) -> StoreResult<Self>;

    fn wrap(handle: EntityRef<Self>) -> AnyRef;

    fn downcast(any: &AnyRef) -> Option<EntityRef<Self>>;

    /// Resets every navigation to unresolved, dropping held handles.
    fn release_navigations(&mut self);
}

/// Identity of one entity across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Shared, interior-mutable handle to one entity instance.
pub struct EntityRef<T> {
    id: EntityId,
    cell: Rc<RefCell<T>>,
}

impl<T: Entity> EntityRef<T> {
    pub(crate) fn new(entity: T) -> Self {
        Self {
            id: entity.id(),
            cell: Rc::new(RefCell::new(entity)),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(T::KIND, self.id)
    }

    /// Immutable view. Panics if a mutable borrow is active.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.cell.borrow()
    }

    /// Mutable view. Panics if any other borrow is active.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.cell.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    fn release_navigations(&self) -> bool {
        match self.cell.try_borrow_mut() {
            Ok(mut entity) => {
                entity.release_navigations();
                true
            }
            Err(_) => false,
        }
    }

    pub fn into_any(self) -> AnyRef {
        T::wrap(self)
    }
}

impl<T> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: Entity> Debug for EntityRef<T> {
    // Navigations may form cycles; print identity only.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntityRef({}:{})", T::KIND, self.id)
    }
}

/// Kind-erased entity handle used by the identity map and loaders.
#[derive(Debug, Clone)]
pub enum AnyRef {
    Author(EntityRef<Author>),
    Article(EntityRef<Article>),
    Comment(EntityRef<Comment>),
    Tag(EntityRef<Tag>),
}

impl AnyRef {
    /// Builds a detached instance of `kind` from a stored row.
    pub(crate) fn from_row(kind: EntityKind, row: &[Value]) -> StoreResult<Self> {
        Ok(match kind {
            EntityKind::Author => Self::Author(EntityRef::new(Author::from_values(row)?)),
            EntityKind::Article => Self::Article(EntityRef::new(Article::from_values(row)?)),
            EntityKind::Comment => Self::Comment(EntityRef::new(Comment::from_values(row)?)),
            EntityKind::Tag => Self::Tag(EntityRef::new(Tag::from_values(row)?)),
        })
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Author(_) => EntityKind::Author,
            Self::Article(_) => EntityKind::Article,
            Self::Comment(_) => EntityKind::Comment,
            Self::Tag(_) => EntityKind::Tag,
        }
    }

    pub fn id(&self) -> EntityId {
        match self {
            Self::Author(handle) => handle.id(),
            Self::Article(handle) => handle.id(),
            Self::Comment(handle) => handle.id(),
            Self::Tag(handle) => handle.id(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind(), self.id())
    }

    pub fn ptr_eq(&self, other: &AnyRef) -> bool {
        match (self, other) {
            (Self::Author(left), Self::Author(right)) => left.ptr_eq(right),
            (Self::Article(left), Self::Article(right)) => left.ptr_eq(right),
            (Self::Comment(left), Self::Comment(right)) => left.ptr_eq(right),
            (Self::Tag(left), Self::Tag(right)) => left.ptr_eq(right),
            _ => false,
        }
    }

    pub fn values(&self) -> Vec<Value> {
        match self {
            Self::Author(handle) => handle.borrow().values(),
            Self::Article(handle) => handle.borrow().values(),
            Self::Comment(handle) => handle.borrow().values(),
            Self::Tag(handle) => handle.borrow().values(),
        }
    }

    /// Owner under an ownership relation, read from the foreign key.
    pub fn owner_key(&self) -> Option<EntityKey> {
        match self {
            Self::Article(handle) => Some(EntityKey::new(
                EntityKind::Author,
                handle.borrow().author_id(),
            )),
            Self::Comment(handle) => Some(EntityKey::new(
                EntityKind::Article,
                handle.borrow().article_id(),
            )),
            Self::Author(_) | Self::Tag(_) => None,
        }
    }

    /// Resets navigations to unresolved. Returns `false` and leaves the
    /// instance as is while a caller still borrows it.
    pub(crate) fn release_navigations(&self) -> bool {
        match self {
            Self::Author(handle) => handle.release_navigations(),
            Self::Article(handle) => handle.release_navigations(),
            Self::Comment(handle) => handle.release_navigations(),
            Self::Tag(handle) => handle.release_navigations(),
        }
    }
}

/// Checks a stored row has exactly the columns of `kind`.
pub(crate) fn check_row_shape(kind: EntityKind, row: &[Value]) -> StoreResult<()> {
    let expected = kind.columns().len();
    if row.len() != expected {
        return Err(StoreError::InvalidData(format!(
            "{} row has {} columns, expected {expected}",
            kind.table(),
            row.len()
        )));
    }
    Ok(())
}

/// Text column that must not be blank once persisted.
pub(crate) fn required_text(kind: EntityKind, row: &[Value], index: usize) -> StoreResult<String> {
    let column = format!("{}.{}", kind.table(), kind.columns()[index]);
    let text = row[index].expect_text(&column)?;
    if text.trim().is_empty() {
        return Err(StoreError::InvalidData(format!("blank value in {column}")));
    }
    Ok(text)
}

pub(crate) fn required_id(kind: EntityKind, row: &[Value], index: usize) -> StoreResult<EntityId> {
    let column = format!("{}.{}", kind.table(), kind.columns()[index]);
    let id = row[index].expect_id(&column)?;
    if id.is_nil() {
        return Err(StoreError::InvalidData(format!("nil id in {column}")));
    }
    Ok(id)
}
