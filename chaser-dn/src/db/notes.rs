//! Note cache persistence
//!
//! One row per (order, external note id). Raw note data is written by the
//! sync; resolved contact/author display fields are filled in later by
//! enrichment, each side independently.

use chaser_common::Result;
use sqlx::SqlitePool;

/// Cached order note with optionally-resolved contact and author
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NoteCacheEntry {
    pub order_id: i64,
    pub note_id: i64,
    pub note_text: Option<String>,
    pub contact_id: Option<i64>,
    pub author_id: Option<i64>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_company: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub author_company: Option<String>,
}

/// Insert-or-update the raw note fields. Resolved display fields are
/// preserved on conflict: a note observed again does not lose enrichment.
pub async fn upsert_raw_note(
    pool: &SqlitePool,
    order_id: i64,
    note_id: i64,
    note_text: Option<&str>,
    contact_id: Option<i64>,
    author_id: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO invoice_notes (order_id, note_id, note_text, contact_id, author_id)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(order_id, note_id) DO UPDATE SET
            note_text = excluded.note_text,
            contact_id = excluded.contact_id,
            author_id = excluded.author_id,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(order_id)
    .bind(note_id)
    .bind(note_text)
    .bind(contact_id)
    .bind(author_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fill in the resolved subject-contact display fields for one note
pub async fn set_resolved_contact(
    pool: &SqlitePool,
    order_id: i64,
    note_id: i64,
    name: Option<&str>,
    email: Option<&str>,
    company: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE invoice_notes
        SET contact_name = ?, contact_email = ?, contact_company = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE order_id = ? AND note_id = ?
        "#,
    )
    .bind(name)
    .bind(email)
    .bind(company)
    .bind(order_id)
    .bind(note_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fill in the resolved author display fields for one note
pub async fn set_resolved_author(
    pool: &SqlitePool,
    order_id: i64,
    note_id: i64,
    name: Option<&str>,
    email: Option<&str>,
    company: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE invoice_notes
        SET author_name = ?, author_email = ?, author_company = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE order_id = ? AND note_id = ?
        "#,
    )
    .bind(name)
    .bind(email)
    .bind(company)
    .bind(order_id)
    .bind(note_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// All cached notes for an order
pub async fn list_for_order(pool: &SqlitePool, order_id: i64) -> Result<Vec<NoteCacheEntry>> {
    let notes = sqlx::query_as::<_, NoteCacheEntry>(
        r#"
        SELECT order_id, note_id, note_text, contact_id, author_id,
               contact_name, contact_email, contact_company,
               author_name, author_email, author_company
        FROM invoice_notes
        WHERE order_id = ?
        ORDER BY note_id
        "#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(notes)
}

/// Notes on an order whose subject contact or author is still unresolved
pub async fn list_unresolved_for_order(
    pool: &SqlitePool,
    order_id: i64,
) -> Result<Vec<NoteCacheEntry>> {
    let notes = sqlx::query_as::<_, NoteCacheEntry>(
        r#"
        SELECT order_id, note_id, note_text, contact_id, author_id,
               contact_name, contact_email, contact_company,
               author_name, author_email, author_company
        FROM invoice_notes
        WHERE order_id = ?
          AND ((contact_id IS NOT NULL AND contact_name IS NULL)
            OR (author_id IS NOT NULL AND author_name IS NULL))
        ORDER BY note_id
        "#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_common::db::init_memory_pool;

    #[tokio::test]
    async fn test_upsert_updates_not_recreates() {
        let pool = init_memory_pool().await.unwrap();

        upsert_raw_note(&pool, 1, 10, Some("first"), Some(7), Some(3))
            .await
            .unwrap();
        upsert_raw_note(&pool, 1, 10, Some("edited"), Some(7), Some(3))
            .await
            .unwrap();

        let notes = list_for_order(&pool, 1).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].note_text.as_deref(), Some("edited"));
    }

    #[tokio::test]
    async fn test_resync_preserves_resolved_fields() {
        let pool = init_memory_pool().await.unwrap();

        upsert_raw_note(&pool, 1, 10, Some("text"), Some(7), Some(3))
            .await
            .unwrap();
        set_resolved_contact(&pool, 1, 10, Some("Ada"), Some("ada@example.com"), None)
            .await
            .unwrap();

        // The next sync observes the same note again
        upsert_raw_note(&pool, 1, 10, Some("text"), Some(7), Some(3))
            .await
            .unwrap();

        let notes = list_for_order(&pool, 1).await.unwrap();
        assert_eq!(notes[0].contact_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_unresolved_listing() {
        let pool = init_memory_pool().await.unwrap();

        // Fully resolved
        upsert_raw_note(&pool, 1, 10, None, Some(7), None).await.unwrap();
        set_resolved_contact(&pool, 1, 10, Some("Ada"), None, None)
            .await
            .unwrap();

        // Author still unresolved
        upsert_raw_note(&pool, 1, 11, None, None, Some(3)).await.unwrap();

        // No ids at all: nothing to resolve
        upsert_raw_note(&pool, 1, 12, None, None, None).await.unwrap();

        let unresolved = list_unresolved_for_order(&pool, 1).await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].note_id, 11);
    }
}
