use aegis_core::Holding;
use sqlx::{Row, SqlitePool};

use crate::error::{PersistenceError, PersistenceResult};

/// Holdings access. Two writers exist (tick ingest and trade import);
/// both serialise through row-level DB updates.
pub struct HoldingStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl HoldingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn set_position(
        &self,
        code: &str,
        quantity: f64,
        avg_buy_price: f64,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO holdings (code, quantity, avg_buy_price, current_price)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (code) DO UPDATE SET
                 quantity = excluded.quantity,
                 avg_buy_price = excluded.avg_buy_price",
        )
        .bind(code)
        .bind(quantity)
        .bind(avg_buy_price)
        .bind(avg_buy_price)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    /// Apply a manual trade. Buys re-average the cost basis; sells reduce
    /// quantity and clamp at zero.
    pub async fn apply_trade(
        &self,
        code: &str,
        side: TradeSide,
        quantity: f64,
        price: f64,
    ) -> PersistenceResult<Holding> {
        if quantity <= 0.0 || price <= 0.0 {
            return Err(PersistenceError::Integrity(
                "trade quantity and price must be positive".into(),
            ));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(PersistenceError::from_sqlx)?;

        let existing = sqlx::query(
            "SELECT quantity, avg_buy_price, current_price FROM holdings WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        let (qty, avg, cur) = existing
            .map(|r| {
                (
                    r.get::<f64, _>("quantity"),
                    r.get::<f64, _>("avg_buy_price"),
                    r.get::<f64, _>("current_price"),
                )
            })
            .unwrap_or((0.0, 0.0, price));

        let (new_qty, new_avg) = match side {
            TradeSide::Buy => {
                let total = qty + quantity;
                (total, (qty * avg + quantity * price) / total)
            }
            TradeSide::Sell => ((qty - quantity).max(0.0), avg),
        };

        sqlx::query(
            "INSERT INTO holdings (code, quantity, avg_buy_price, current_price)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (code) DO UPDATE SET
                 quantity = excluded.quantity,
                 avg_buy_price = excluded.avg_buy_price,
                 current_price = excluded.current_price",
        )
        .bind(code)
        .bind(new_qty)
        .bind(new_avg)
        .bind(if cur > 0.0 { cur } else { price })
        .execute(&mut *tx)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        tx.commit().await.map_err(PersistenceError::from_sqlx)?;

        Ok(Holding {
            code: code.to_string(),
            quantity: new_qty,
            avg_buy_price: new_avg,
            current_price: if cur > 0.0 { cur } else { price },
        })
    }

    pub async fn get(&self, code: &str) -> PersistenceResult<Option<Holding>> {
        let row = sqlx::query(
            "SELECT code, quantity, avg_buy_price, current_price FROM holdings WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(row.map(|r| row_to_holding(&r)))
    }

    pub async fn list(&self) -> PersistenceResult<Vec<Holding>> {
        let rows = sqlx::query(
            "SELECT code, quantity, avg_buy_price, current_price
             FROM holdings WHERE quantity > 0 ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows.iter().map(row_to_holding).collect())
    }
}

fn row_to_holding(row: &sqlx::sqlite::SqliteRow) -> Holding {
    Holding {
        code: row.get("code"),
        quantity: row.get("quantity"),
        avg_buy_price: row.get("avg_buy_price"),
        current_price: row.get("current_price"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    #[tokio::test]
    async fn buy_reaverages_cost_basis() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.holdings();

        store
            .apply_trade("005930", TradeSide::Buy, 10.0, 100.0)
            .await
            .unwrap();
        let h = store
            .apply_trade("005930", TradeSide::Buy, 10.0, 200.0)
            .await
            .unwrap();

        assert_eq!(h.quantity, 20.0);
        assert!((h.avg_buy_price - 150.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sell_clamps_at_zero() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.holdings();

        store
            .apply_trade("005930", TradeSide::Buy, 5.0, 100.0)
            .await
            .unwrap();
        let h = store
            .apply_trade("005930", TradeSide::Sell, 50.0, 110.0)
            .await
            .unwrap();
        assert_eq!(h.quantity, 0.0);
    }

    #[tokio::test]
    async fn rejects_non_positive_trades() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.holdings();
        assert!(store
            .apply_trade("005930", TradeSide::Buy, 0.0, 100.0)
            .await
            .is_err());
    }
}
