//! Database access shared across Chaser services
//!
//! All durable state lives in a single SQLite file; the tables are created
//! additively by [`migrations::run_migrations`].

pub mod migrations;

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize the database connection pool and bring the schema up to date.
pub async fn init_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// In-memory pool with the full schema, for tests.
///
/// Capped at one connection: every pooled connection to `:memory:` opens
/// its own database, so a larger pool would see empty tables.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await?;
    migrations::run_migrations(&pool).await?;
    Ok(pool)
}
