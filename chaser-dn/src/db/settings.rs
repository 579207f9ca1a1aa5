//! Settings database operations
//!
//! Get/set accessors for the key-value settings table. Values are stored
//! as strings and parsed on read; the run orchestrator snapshots
//! everything it needs into a `RunConfiguration` once per invocation
//! instead of re-querying mid-run.

use chaser_common::Result;
use sqlx::SqlitePool;
use std::str::FromStr;

/// Read a typed setting. `None` when the key is absent.
pub async fn get_setting<T: FromStr>(pool: &SqlitePool, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match value {
        Some(raw) => match raw.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => {
                tracing::warn!(key, raw, "Ignoring unparseable setting value");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Write a setting, replacing any previous value
pub async fn set_setting(pool: &SqlitePool, key: &str, value: impl ToString) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_common::db::init_memory_pool;

    #[tokio::test]
    async fn test_get_set_round_trip() {
        let pool = init_memory_pool().await.unwrap();

        assert_eq!(get_setting::<i64>(&pool, "daily_cap").await.unwrap(), None);

        set_setting(&pool, "daily_cap", 200i64).await.unwrap();
        assert_eq!(
            get_setting::<i64>(&pool, "daily_cap").await.unwrap(),
            Some(200)
        );

        set_setting(&pool, "daily_cap", 150i64).await.unwrap();
        assert_eq!(
            get_setting::<i64>(&pool, "daily_cap").await.unwrap(),
            Some(150)
        );
    }

    #[tokio::test]
    async fn test_unparseable_value_ignored() {
        let pool = init_memory_pool().await.unwrap();

        set_setting(&pool, "daily_cap", "not-a-number").await.unwrap();
        assert_eq!(get_setting::<i64>(&pool, "daily_cap").await.unwrap(), None);
        assert_eq!(
            get_setting::<String>(&pool, "daily_cap").await.unwrap(),
            Some("not-a-number".to_string())
        );
    }
}
