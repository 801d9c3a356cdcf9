//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `trackdb_core` linkage and schema bootstrap from a binary.
//! - Keep output deterministic for quick local sanity checks.

use std::process::ExitCode;

fn main() -> ExitCode {
    println!("trackdb_core version={}", trackdb_core::core_version());

    let conn = match trackdb_core::db::open_db_in_memory() {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("trackdb_core db_open failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    match trackdb_core::db::schema_version(&conn) {
        Ok(version) => {
            println!("trackdb_core schema_version={version}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("trackdb_core schema_version failed: {err}");
            ExitCode::FAILURE
        }
    }
}
