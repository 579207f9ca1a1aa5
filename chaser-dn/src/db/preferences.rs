//! Customer preference persistence
//!
//! One row per lower-cased email address. Written only by the explicit
//! opt-out/opt-in operations; the campaign engine treats it as read-only.

use chaser_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;

/// Opt-out flags for one recipient
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CustomerPreference {
    pub email: String,
    pub opted_out_all: bool,
    pub opted_out_reminders: bool,
    pub opted_out_collections: bool,
}

/// Which opt-out granularity a campaign falls under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptOutScope {
    Reminders,
    Collections,
}

/// Load the preference row for an address, if any
pub async fn get(pool: &SqlitePool, email: &str) -> Result<Option<CustomerPreference>> {
    let preference = sqlx::query_as::<_, CustomerPreference>(
        r#"
        SELECT email, opted_out_all, opted_out_reminders, opted_out_collections
        FROM customer_preferences
        WHERE email = ?
        "#,
    )
    .bind(email.to_lowercase())
    .fetch_optional(pool)
    .await?;
    Ok(preference)
}

/// Whether the address is suppressed for the given campaign scope
pub async fn is_opted_out(pool: &SqlitePool, email: &str, scope: OptOutScope) -> Result<bool> {
    match get(pool, email).await? {
        None => Ok(false),
        Some(pref) => Ok(pref.opted_out_all
            || match scope {
                OptOutScope::Reminders => pref.opted_out_reminders,
                OptOutScope::Collections => pref.opted_out_collections,
            }),
    }
}

/// Set opt-out flags for an address, creating the row if needed
pub async fn set_opt_out(
    pool: &SqlitePool,
    email: &str,
    all: bool,
    reminders: bool,
    collections: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO customer_preferences
            (email, opted_out_all, opted_out_reminders, opted_out_collections)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(email) DO UPDATE SET
            opted_out_all = excluded.opted_out_all,
            opted_out_reminders = excluded.opted_out_reminders,
            opted_out_collections = excluded.opted_out_collections,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(email.to_lowercase())
    .bind(all)
    .bind(reminders)
    .bind(collections)
    .execute(pool)
    .await?;
    Ok(())
}

/// Opt an address back in (drops the row). Returns false if none existed.
pub async fn opt_in(pool: &SqlitePool, email: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM customer_preferences WHERE email = ?")
        .bind(email.to_lowercase())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// All preference rows, for the admin surface
pub async fn list(pool: &SqlitePool) -> Result<Vec<CustomerPreference>> {
    let preferences = sqlx::query_as::<_, CustomerPreference>(
        r#"
        SELECT email, opted_out_all, opted_out_reminders, opted_out_collections
        FROM customer_preferences
        ORDER BY email
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(preferences)
}
