#![allow(dead_code)]

use std::sync::Arc;
use trackdb_core::{
    Article, Author, Backend, EntityId, Model, Session, SessionOptions, SqliteBackend, Tag,
};

/// Ids of the seeded blog.
///
/// Alice wrote "Rust ownership" (two comments, tags `rust` and `orm`) and
/// "Async Rust"; Bob wrote "SQL basics".
pub struct Seed {
    pub alice: EntityId,
    pub bob: EntityId,
    pub ownership: EntityId,
    pub async_rust: EntityId,
    pub sql_basics: EntityId,
    pub rust_tag: EntityId,
    pub orm_tag: EntityId,
}

pub fn backend() -> Arc<dyn Backend> {
    Arc::new(SqliteBackend::open_in_memory().unwrap())
}

pub fn session(backend: &Arc<dyn Backend>) -> Session {
    Session::new(Arc::clone(backend), Arc::new(Model::blog()))
}

pub fn session_with(backend: &Arc<dyn Backend>, options: SessionOptions) -> Session {
    Session::with_options(Arc::clone(backend), Arc::new(Model::blog()), options)
}

pub fn seed(backend: &Arc<dyn Backend>) -> Seed {
    let mut session = session(backend);

    let alice = Author::create("Alice").unwrap();
    let bob = Author::create("Bob").unwrap();
    session.add(&alice).unwrap();
    session.add(&bob).unwrap();

    let ownership =
        Article::create_at("Rust ownership", "Borrowing explained", alice.id(), 1_000).unwrap();
    let async_rust = Article::create_at("Async Rust", "Futures and tasks", alice.id(), 2_000).unwrap();
    let sql_basics = Article::create_at("SQL basics", "Joins and indexes", bob.id(), 3_000).unwrap();

    let rust_tag = Tag::create("rust").unwrap();
    let orm_tag = Tag::create("orm").unwrap();
    {
        let mut article = ownership.borrow_mut();
        article.add_comment("Great read").unwrap();
        article.add_comment("Thanks for the examples").unwrap();
        article.add_tag(&rust_tag).unwrap();
        article.add_tag(&orm_tag).unwrap();
    }

    session.add(&ownership).unwrap();
    session.add(&async_rust).unwrap();
    session.add(&sql_basics).unwrap();
    session.save().unwrap();

    Seed {
        alice: alice.id(),
        bob: bob.id(),
        ownership: ownership.id(),
        async_rust: async_rust.id(),
        sql_basics: sql_basics.id(),
        rust_tag: rust_tag.id(),
        orm_tag: orm_tag.id(),
    }
}

/// Fresh backend, seeded, plus an empty session over it.
pub fn seeded() -> (Arc<dyn Backend>, Seed, Session) {
    let backend = backend();
    let seed = seed(&backend);
    let session = session(&backend);
    (backend, seed, session)
}
