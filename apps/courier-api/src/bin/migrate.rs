//! Standalone migration runner for courier-api.
//!
//! Usage:
//!   cargo run -p courier-api --bin courier-migrate
//!   cargo run -p courier-api --bin courier-migrate -- --test
//!
//! Reads DATABASE_URL from the environment (or .env via dotenvy).

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::path::Path;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

fn main() {
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    let mut database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL env var is required");

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--test") {
        database_url = with_test_db_suffix(&database_url);
    }

    println!("Connecting to database...");
    let mut conn =
        PgConnection::establish(&database_url).expect("failed to connect to database");

    println!("Running pending migrations...");
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .expect("failed to run migrations");

    if applied.is_empty() {
        println!("No pending migrations.");
    } else {
        for migration in applied {
            println!("Applied migration: {migration}");
        }
    }
}

/// Append `_test` to the database name in the connection string.
fn with_test_db_suffix(url: &str) -> String {
    match url.rsplit_once('/') {
        Some((head, db)) => format!("{head}/{db}_test"),
        None => format!("{url}_test"),
    }
}
