//! Payment link persistence
//!
//! Write-once rows: a link is constructed the first time an order lacks
//! one and never regenerated afterwards.

use chaser_common::Result;
use sqlx::SqlitePool;

/// Stored payment link for an order
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentLink {
    pub order_id: i64,
    pub url: String,
    pub contact_id: Option<i64>,
}

/// Insert a link if none exists yet. Returns true when a row was written,
/// false when the order already had one.
pub async fn insert_if_absent(
    pool: &SqlitePool,
    order_id: i64,
    url: &str,
    contact_id: Option<i64>,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO payment_links (order_id, url, contact_id) VALUES (?, ?, ?)",
    )
    .bind(order_id)
    .bind(url)
    .bind(contact_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Load the link for an order
pub async fn get(pool: &SqlitePool, order_id: i64) -> Result<Option<PaymentLink>> {
    let link = sqlx::query_as::<_, PaymentLink>(
        "SELECT order_id, url, contact_id FROM payment_links WHERE order_id = ?",
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?;
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_common::db::init_memory_pool;

    #[tokio::test]
    async fn test_link_is_write_once() {
        let pool = init_memory_pool().await.unwrap();

        assert!(insert_if_absent(&pool, 1, "https://pay/a", Some(7))
            .await
            .unwrap());
        // A second construction attempt must not replace the stored URL
        assert!(!insert_if_absent(&pool, 1, "https://pay/b", Some(8))
            .await
            .unwrap());

        let link = get(&pool, 1).await.unwrap().unwrap();
        assert_eq!(link.url, "https://pay/a");
        assert_eq!(link.contact_id, Some(7));
    }
}
