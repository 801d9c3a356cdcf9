mod common;

use trackdb_core::{
    nav, Article, Author, EntityRef, Field, IncludePath, OrmError, Query, Relation,
    SessionOptions, ValidationError,
};

fn ownership_query() -> Query<Article> {
    Query::<Article>::new()
        .filter(Field::new("title").equals("Rust ownership"))
        .include(Relation::ArticleComments)
        .include(Relation::ArticleTags)
}

/// Sorted comment contents and tag names of a loaded article.
fn graph_of(article: &EntityRef<Article>) -> (Vec<String>, Vec<String>) {
    let article = article.borrow();
    let mut comments = article
        .comments()
        .unwrap()
        .iter()
        .map(|comment| comment.borrow().content().to_string())
        .collect::<Vec<_>>();
    let mut tags = article
        .tags()
        .unwrap()
        .iter()
        .map(|tag| tag.borrow().name().to_string())
        .collect::<Vec<_>>();
    comments.sort();
    tags.sort();
    (comments, tags)
}

#[test]
fn lazy_navigation_costs_one_round_trip_per_parent() {
    let (_backend, _seed, mut session) = common::seeded();

    let articles = Query::<Article>::new()
        .order_by(Field::new("created_at"))
        .list(&mut session)
        .unwrap();
    assert_eq!(session.stats().round_trips, 1);

    let mut names = Vec::new();
    for article in &articles {
        let author = session
            .navigate(article, nav::ArticleAuthor)
            .unwrap()
            .unwrap();
        names.push(author.borrow().name().to_string());
    }
    assert_eq!(names, vec!["Alice", "Alice", "Bob"]);
    assert_eq!(session.stats().round_trips, 4);

    let first_author = articles[0].borrow().author().unwrap();
    let second_author = articles[1].borrow().author().unwrap();
    assert!(first_author.ptr_eq(&second_author));

    session.navigate(&articles[0], nav::ArticleAuthor).unwrap();
    assert_eq!(session.stats().round_trips, 4);
}

#[test]
fn eager_loading_costs_the_same_for_one_or_many_parents() {
    let (_backend, seed, mut session) = common::seeded();

    let one = Query::<Article>::new()
        .filter(Field::new("id").equals(seed.ownership))
        .include(Relation::ArticleComments);
    let all = Query::<Article>::new().include(Relation::ArticleComments);

    for (query, parents) in [(one, 1), (all, 3)] {
        session.reset_stats();
        let joined = query.clone().as_single_query().list(&mut session).unwrap();
        assert_eq!(joined.len(), parents);
        assert_eq!(session.stats().round_trips, 1);

        session.clear();
        session.reset_stats();
        let separate = query.as_split_query().list(&mut session).unwrap();
        assert_eq!(separate.len(), parents);
        assert_eq!(session.stats().round_trips, 2);
        assert!(separate
            .iter()
            .all(|article| article.borrow().comments().is_some()));
        session.clear();
    }
}

#[test]
fn disabled_lazy_loading_reports_unloaded_navigations() {
    let (backend, _seed, _session) = common::seeded();
    let mut session = common::session_with(
        &backend,
        SessionOptions {
            lazy_loading: false,
            ..SessionOptions::default()
        },
    );

    let article = Query::<Article>::new()
        .order_by(Field::new("created_at"))
        .first(&mut session)
        .unwrap();
    let err = session
        .navigate(&article, nav::ArticleComments)
        .unwrap_err();
    assert!(matches!(
        err,
        OrmError::Validation(ValidationError::NavigationNotLoaded {
            relation: Relation::ArticleComments,
            ..
        })
    ));
    assert_eq!(session.stats().round_trips, 1);

    let comments = session.load(&article, nav::ArticleComments).unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(session.navigate(&article, nav::ArticleComments).unwrap().len(), 2);
}

#[test]
fn explicit_load_costs_exactly_one_round_trip() {
    let (_backend, seed, mut session) = common::seeded();

    let alice = session.find::<Author>(seed.alice).unwrap().unwrap();
    session.reset_stats();

    let articles = session.load(&alice, nav::AuthorArticles).unwrap();
    assert_eq!(articles.len(), 2);
    assert_eq!(session.stats().round_trips, 1);

    let again = session.load(&alice, nav::AuthorArticles).unwrap();
    assert_eq!(again.len(), 2);
    assert!(again[0].ptr_eq(&articles[0]));
    assert_eq!(session.stats().round_trips, 2);

    let tags = session.load(&articles[0], nav::ArticleTags).unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(session.stats().round_trips, 3);
}

#[test]
fn single_query_mode_joins_every_include() {
    let (_backend, _seed, mut session) = common::seeded();

    let article = ownership_query()
        .as_single_query()
        .single(&mut session)
        .unwrap();

    assert_eq!(session.stats().round_trips, 1);
    assert_eq!(session.stats().rows_read, 4);
    let (comments, tags) = graph_of(&article);
    assert_eq!(comments.len(), 2);
    assert_eq!(tags, vec!["orm", "rust"]);
}

#[test]
fn split_query_mode_loads_each_include_separately() {
    let (_backend, _seed, mut session) = common::seeded();

    let article = ownership_query()
        .as_split_query()
        .single(&mut session)
        .unwrap();

    assert_eq!(session.stats().round_trips, 3);
    assert_eq!(session.stats().rows_read, 5);
    let (comments, tags) = graph_of(&article);
    assert_eq!(comments.len(), 2);
    assert_eq!(tags.len(), 2);
}

#[test]
fn both_modes_produce_the_same_graph() {
    let (backend, _seed, mut single) = common::seeded();
    let mut split = common::session_with(
        &backend,
        SessionOptions {
            split_queries: true,
            ..SessionOptions::default()
        },
    );

    let joined = ownership_query().list(&mut single).unwrap();
    let separate = ownership_query().list(&mut split).unwrap();

    assert_eq!(single.stats().round_trips, 1);
    assert_eq!(split.stats().round_trips, 3);
    assert_eq!(joined.len(), 1);
    assert_eq!(separate.len(), 1);
    assert_eq!(graph_of(&joined[0]), graph_of(&separate[0]));
}

#[test]
fn empty_collections_resolve_as_loaded() {
    let (_backend, seed, mut session) = common::seeded();

    let articles = Query::<Article>::new()
        .include(Relation::ArticleComments)
        .order_by(Field::new("created_at"))
        .list(&mut session)
        .unwrap();
    assert_eq!(articles.len(), 3);
    assert_eq!(articles[0].id(), seed.ownership);
    assert_eq!(articles[0].borrow().comments().unwrap().len(), 2);
    assert_eq!(articles[1].borrow().comments().unwrap().len(), 0);
    assert_eq!(articles[2].borrow().comments().unwrap().len(), 0);
}

#[test]
fn nested_include_loads_one_level_per_round_trip() {
    let (_backend, seed, mut session) = common::seeded();

    let alice = Query::<Author>::new()
        .filter(Field::new("name").equals("Alice"))
        .include(IncludePath::new(Relation::AuthorArticles).then(Relation::ArticleComments))
        .single(&mut session)
        .unwrap();
    assert_eq!(session.stats().round_trips, 2);

    let articles = alice.borrow().articles().unwrap().to_vec();
    assert_eq!(articles.len(), 2);
    for article in &articles {
        let expected = if article.id() == seed.ownership { 2 } else { 0 };
        assert_eq!(article.borrow().comments().unwrap().len(), expected);
    }
}

#[test]
fn loading_a_collection_fixes_up_the_inverse_reference() {
    let (_backend, _seed, mut session) = common::seeded();

    let article = ownership_query().single(&mut session).unwrap();
    let comments = article.borrow().comments().unwrap().to_vec();
    for comment in &comments {
        let owner = comment.borrow().article().unwrap();
        assert!(owner.ptr_eq(&article));
    }

    let before = session.stats().round_trips;
    let owner = session
        .navigate(&comments[0], nav::CommentArticle)
        .unwrap()
        .unwrap();
    assert!(owner.ptr_eq(&article));
    assert_eq!(session.stats().round_trips, before);
}

#[test]
fn reloading_merges_with_in_memory_members() {
    let (_backend, _seed, mut session) = common::seeded();

    let article = ownership_query().single(&mut session).unwrap();
    let pending = article.borrow_mut().add_comment("Still reading").unwrap();

    let comments = session.load(&article, nav::ArticleComments).unwrap();
    assert_eq!(comments.len(), 3);
    assert!(comments.iter().any(|comment| comment.ptr_eq(&pending)));

    let summary = session.save().unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(
        Query::<trackdb_core::Comment>::new()
            .count(&mut session)
            .unwrap(),
        3
    );
}

#[test]
fn no_tracking_includes_stay_out_of_the_session() {
    let (_backend, _seed, mut session) = common::seeded();

    let article = ownership_query()
        .as_no_tracking()
        .single(&mut session)
        .unwrap();
    let (comments, tags) = graph_of(&article);
    assert_eq!(comments.len(), 2);
    assert_eq!(tags.len(), 2);
    assert!(session.identity_map().is_empty());
    assert!(!session.has_changes());
}
