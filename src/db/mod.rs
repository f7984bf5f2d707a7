//! Database module.
//!
//! Repositories come in two interchangeable flavours: in-memory indexed lists
//! and a SQLite-backed document store. The selector picks one per process.

mod document;
mod memory;
mod selector;
mod traits;

pub use document::*;
pub use memory::*;
pub use selector::*;
pub use traits::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the document store connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run embedded migrations
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
///
/// Each table keeps the full JSON document in `doc` next to the columns used
/// for lookups, filtering, ordering and uniqueness.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daos (
            id TEXT PRIMARY KEY,
            numero_liste TEXT NOT NULL UNIQUE,
            objet_dossier TEXT NOT NULL,
            reference TEXT NOT NULL,
            autorite_contractante TEXT NOT NULL,
            date_depot TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            doc TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE COLLATE NOCASE,
            created_at TEXT NOT NULL,
            doc TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            dao_id TEXT NOT NULL,
            task_id INTEGER,
            created_at TEXT NOT NULL,
            doc TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            doc TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_daos_created_at ON daos(created_at);
        CREATE INDEX IF NOT EXISTS idx_daos_autorite ON daos(autorite_contractante);
        CREATE INDEX IF NOT EXISTS idx_daos_date_depot ON daos(date_depot);
        CREATE INDEX IF NOT EXISTS idx_comments_dao ON comments(dao_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_notifications_created_at ON notifications(created_at);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
