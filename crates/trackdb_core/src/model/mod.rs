//! Entity model for the blog schema.
//!
//! # Responsibility
//! - Define the persisted entity kinds and their validated factories.
//! - Describe relationships, navigation properties and delete policies.
//!
//! # Invariants
//! - Every entity is identified by a stable UUID assigned at creation.
//! - Entities are only constructed through factories or from stored rows.
//!
//! # See also
//! - `session` for tracking and persistence of these entities.

pub mod article;
pub mod author;
pub mod comment;
pub mod entity;
pub mod navigation;
pub mod relation;
pub mod resolvable;
pub mod tag;
pub mod value;

pub use article::Article;
pub use author::Author;
pub use comment::Comment;
pub use entity::{AnyRef, Entity, EntityKey, EntityRef};
pub use navigation::{nav, Navigation, NavigationValue};
pub use relation::{Cardinality, DeletePolicy, Link, Model, ModelBuilder, Relation};
pub use resolvable::Resolvable;
pub use tag::Tag;
pub use value::{EntityId, EntityKind, Value};
