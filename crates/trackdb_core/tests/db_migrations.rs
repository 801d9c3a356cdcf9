use rusqlite::Connection;
use trackdb_core::db::migrations::latest_version;
use trackdb_core::db::{open_db, open_db_in_memory, DbError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "authors");
    assert_table_exists(&conn, "articles");
    assert_table_exists(&conn, "comments");
    assert_table_exists(&conn, "tags");
    assert_table_exists(&conn, "article_tags");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blog.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    conn_first
        .execute(
            "INSERT INTO authors (id, name) VALUES (?1, ?2);",
            ["6f0f5f5e-0000-4000-8000-000000000001", "Alice"],
        )
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let authors: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM authors;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(authors, 1);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn tag_names_are_unique_ignoring_case() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO tags (id, name) VALUES (?1, ?2);",
        ["6f0f5f5e-0000-4000-8000-0000000000a1", "rust"],
    )
    .unwrap();

    let duplicate = conn.execute(
        "INSERT INTO tags (id, name) VALUES (?1, ?2);",
        ["6f0f5f5e-0000-4000-8000-0000000000a2", "RUST"],
    );
    assert!(duplicate.is_err());
}

#[test]
fn foreign_keys_are_enforced() {
    let conn = open_db_in_memory().unwrap();
    let orphan = conn.execute(
        "INSERT INTO articles (id, title, content, created_at, author_id)
         VALUES (?1, 'Lost', 'No author', 0, ?2);",
        [
            "6f0f5f5e-0000-4000-8000-0000000000b1",
            "6f0f5f5e-0000-4000-8000-0000000000b2",
        ],
    );
    assert!(orphan.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
