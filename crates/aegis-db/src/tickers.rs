use aegis_core::{Market, Ticker};
use sqlx::{Row, SqlitePool};

use crate::error::{PersistenceError, PersistenceResult};

/// Ticker master access. Codes are immutable; name and delisting flag may
/// change over the listing's lifetime.
pub struct TickerStore {
    pool: SqlitePool,
}

impl TickerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, ticker: &Ticker) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO tickers (code, name, market, sector, is_delisted)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (code) DO UPDATE SET
                 name = excluded.name,
                 sector = COALESCE(excluded.sector, tickers.sector),
                 is_delisted = excluded.is_delisted",
        )
        .bind(&ticker.code)
        .bind(&ticker.name)
        .bind(ticker.market.as_str())
        .bind(&ticker.sector)
        .bind(ticker.is_delisted as i64)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    pub async fn get(&self, code: &str) -> PersistenceResult<Option<Ticker>> {
        let row = sqlx::query(
            "SELECT code, name, market, sector, is_delisted FROM tickers WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(row.map(|r| row_to_ticker(&r)))
    }

    pub async fn list_active(&self) -> PersistenceResult<Vec<Ticker>> {
        let rows = sqlx::query(
            "SELECT code, name, market, sector, is_delisted
             FROM tickers WHERE is_delisted = 0 ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows.iter().map(row_to_ticker).collect())
    }

    /// Soft delete. Tickers live forever; delisting only flips the flag.
    pub async fn mark_delisted(&self, code: &str) -> PersistenceResult<()> {
        sqlx::query("UPDATE tickers SET is_delisted = 1 WHERE code = ?")
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }
}

fn row_to_ticker(row: &sqlx::sqlite::SqliteRow) -> Ticker {
    let market: String = row.get("market");
    Ticker {
        code: row.get("code"),
        name: row.get("name"),
        market: Market::parse(&market).unwrap_or(Market::Kospi),
        sector: row.get("sector"),
        is_delisted: row.get::<i64, _>("is_delisted") != 0,
    }
}

#[cfg(test)]
mod tests {
    use crate::Db;
    use aegis_core::{Market, Ticker};

    fn samsung() -> Ticker {
        Ticker {
            code: "005930".into(),
            name: "삼성전자".into(),
            market: Market::Kospi,
            sector: Some("전기전자".into()),
            is_delisted: false,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.tickers();

        store.upsert(&samsung()).await.unwrap();
        store.upsert(&samsung()).await.unwrap();

        let listed = store.list_active().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "삼성전자");
    }

    #[tokio::test]
    async fn delisting_is_soft() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.tickers();

        store.upsert(&samsung()).await.unwrap();
        store.mark_delisted("005930").await.unwrap();

        assert!(store.list_active().await.unwrap().is_empty());
        assert!(store.get("005930").await.unwrap().unwrap().is_delisted);
    }
}
