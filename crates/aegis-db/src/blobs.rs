use aegis_core::CollectedBlob;
use chrono::{NaiveDate, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{PersistenceError, PersistenceResult};

/// Opaque collected-payload store. Content schemas are analyser-specific
/// and version-tolerant; this layer never inspects them.
pub struct BlobStore {
    pool: SqlitePool,
}

impl BlobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, blob: &CollectedBlob) -> PersistenceResult<()> {
        let content = serde_json::to_string(&blob.content)
            .map_err(|e| PersistenceError::Integrity(e.to_string()))?;

        sqlx::query(
            "INSERT INTO collected_blobs
                 (ticker, site_id, domain_id, data_type, data_date, content, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (ticker, site_id, domain_id, data_type, data_date)
             DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
        )
        .bind(&blob.ticker)
        .bind(blob.site_id)
        .bind(blob.domain_id)
        .bind(&blob.data_type)
        .bind(blob.data_date)
        .bind(content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    /// Latest content for (ticker, data_type) across sites.
    pub async fn latest(
        &self,
        ticker: &str,
        data_type: &str,
    ) -> PersistenceResult<Option<serde_json::Value>> {
        let row = sqlx::query(
            "SELECT content FROM collected_blobs
             WHERE ticker = ? AND data_type = ?
             ORDER BY data_date DESC, updated_at DESC LIMIT 1",
        )
        .bind(ticker)
        .bind(data_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(row.and_then(|r| serde_json::from_str(&r.get::<String, _>("content")).ok()))
    }

    /// Age in seconds of the freshest blob for (ticker, data_type), or None
    /// when nothing was ever collected. Drives the collector freshness cache.
    pub async fn age_secs(
        &self,
        ticker: &str,
        data_type: &str,
    ) -> PersistenceResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT updated_at FROM collected_blobs
             WHERE ticker = ? AND data_type = ?
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(ticker)
        .bind(data_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(row.map(|r| {
            let updated: chrono::DateTime<Utc> = r.get("updated_at");
            (Utc::now() - updated).num_seconds()
        }))
    }

    /// All latest blob contents for a ticker, keyed by data_type.
    pub async fn latest_all(
        &self,
        ticker: &str,
    ) -> PersistenceResult<std::collections::HashMap<String, serde_json::Value>> {
        let rows = sqlx::query(
            "SELECT data_type, content FROM collected_blobs b
             WHERE ticker = ?
               AND updated_at = (SELECT MAX(updated_at) FROM collected_blobs
                                 WHERE ticker = b.ticker AND data_type = b.data_type)",
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        let mut out = std::collections::HashMap::new();
        for r in rows {
            let data_type: String = r.get("data_type");
            if let Ok(value) = serde_json::from_str(&r.get::<String, _>("content")) {
                out.insert(data_type, value);
            }
        }
        Ok(out)
    }

    pub async fn count(&self) -> PersistenceResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM collected_blobs")
            .fetch_one(&self.pool)
            .await
            .map_err(PersistenceError::from_sqlx)?;
        Ok(row.get("n"))
    }
}

pub fn blob(
    ticker: &str,
    site_id: i64,
    domain_id: i64,
    data_type: &str,
    data_date: NaiveDate,
    content: serde_json::Value,
) -> CollectedBlob {
    CollectedBlob {
        ticker: ticker.to_string(),
        site_id,
        domain_id,
        data_type: data_type.to_string(),
        data_date,
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;
    use serde_json::json;

    #[tokio::test]
    async fn double_upsert_keeps_row_count() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.blobs();

        let b = blob(
            "005930",
            1,
            1,
            "news",
            "2025-06-02".parse().unwrap(),
            json!({"items": [], "raw_count": 0}),
        );
        store.upsert(&b).await.unwrap();
        store.upsert(&b).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn latest_prefers_newer_data_date() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.blobs();

        store
            .upsert(&blob("005930", 1, 1, "news", "2025-06-01".parse().unwrap(), json!({"v": 1})))
            .await
            .unwrap();
        store
            .upsert(&blob("005930", 1, 1, "news", "2025-06-02".parse().unwrap(), json!({"v": 2})))
            .await
            .unwrap();

        let latest = store.latest("005930", "news").await.unwrap().unwrap();
        assert_eq!(latest["v"], 2);
    }
}
