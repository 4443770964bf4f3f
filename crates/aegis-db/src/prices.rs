use aegis_core::{DailyBar, Tick};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{PersistenceError, PersistenceResult};

/// OHLCV and tick access.
pub struct PriceStore {
    pool: SqlitePool,
}

impl PriceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a batch of daily bars in one transaction. Bars violating the
    /// OHLC invariant are dropped with a warning; the batch continues.
    pub async fn upsert_bars(&self, bars: &[DailyBar]) -> PersistenceResult<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(PersistenceError::from_sqlx)?;

        let mut written = 0usize;
        for bar in bars {
            if !bar.is_valid() {
                tracing::warn!(code = %bar.code, date = %bar.date, "dropping invalid OHLCV row");
                continue;
            }
            sqlx::query(
                "INSERT INTO ohlcv (code, date, open, high, low, close, volume)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (code, date) DO UPDATE SET
                     open = excluded.open, high = excluded.high,
                     low = excluded.low, close = excluded.close,
                     volume = excluded.volume",
            )
            .bind(&bar.code)
            .bind(bar.date)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::from_sqlx)?;
            written += 1;
        }

        tx.commit().await.map_err(PersistenceError::from_sqlx)?;
        Ok(written)
    }

    pub async fn bars_between(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> PersistenceResult<Vec<DailyBar>> {
        let rows = sqlx::query(
            "SELECT code, date, open, high, low, close, volume
             FROM ohlcv WHERE code = ? AND date >= ? AND date <= ?
             ORDER BY date",
        )
        .bind(code)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows.iter().map(row_to_bar).collect())
    }

    /// Most recent `limit` bars at or before `as_of`, oldest first.
    pub async fn recent_bars(
        &self,
        code: &str,
        as_of: NaiveDate,
        limit: usize,
    ) -> PersistenceResult<Vec<DailyBar>> {
        let rows = sqlx::query(
            "SELECT code, date, open, high, low, close, volume
             FROM ohlcv WHERE code = ? AND date <= ?
             ORDER BY date DESC LIMIT ?",
        )
        .bind(code)
        .bind(as_of)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        let mut bars: Vec<DailyBar> = rows.iter().map(row_to_bar).collect();
        bars.reverse();
        Ok(bars)
    }

    /// First close at or after `date` (used by the performance tracker).
    pub async fn close_on_or_after(
        &self,
        code: &str,
        date: NaiveDate,
    ) -> PersistenceResult<Option<(NaiveDate, f64)>> {
        let row = sqlx::query(
            "SELECT date, close FROM ohlcv WHERE code = ? AND date >= ?
             ORDER BY date LIMIT 1",
        )
        .bind(code)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(row.map(|r| (r.get("date"), r.get("close"))))
    }

    /// Latest bar per code at or before `as_of` (market-breadth input).
    pub async fn latest_bars(&self, as_of: NaiveDate) -> PersistenceResult<Vec<DailyBar>> {
        let rows = sqlx::query(
            "SELECT o.code, o.date, o.open, o.high, o.low, o.close, o.volume
             FROM ohlcv o
             JOIN (SELECT code, MAX(date) AS max_date FROM ohlcv
                   WHERE date <= ? GROUP BY code) latest
                 ON latest.code = o.code AND latest.max_date = o.date",
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows.iter().map(row_to_bar).collect())
    }

    /// Insert a tick and mirror its price onto the holding's
    /// `current_price` inside the same transaction.
    pub async fn insert_tick(&self, tick: &Tick) -> PersistenceResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(PersistenceError::from_sqlx)?;

        sqlx::query("INSERT INTO ticks (code, ts, price, volume) VALUES (?, ?, ?, ?)")
            .bind(&tick.code)
            .bind(tick.timestamp)
            .bind(tick.price)
            .bind(tick.volume)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::from_sqlx)?;

        sqlx::query("UPDATE holdings SET current_price = ? WHERE code = ?")
            .bind(tick.price)
            .bind(&tick.code)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::from_sqlx)?;

        tx.commit().await.map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    /// Ticks for one calendar day, time-ordered (VWAP input).
    pub async fn ticks_for_day(
        &self,
        code: &str,
        day: NaiveDate,
    ) -> PersistenceResult<Vec<Tick>> {
        let start = day.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let end = start + chrono::Duration::days(1);

        let rows = sqlx::query(
            "SELECT code, ts, price, volume FROM ticks
             WHERE code = ? AND ts >= ? AND ts < ? ORDER BY ts",
        )
        .bind(code)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows
            .iter()
            .map(|r| Tick {
                code: r.get("code"),
                timestamp: r.get::<DateTime<Utc>, _>("ts"),
                price: r.get("price"),
                volume: r.get("volume"),
            })
            .collect())
    }

    /// Drop ticks older than the cutoff. Returns rows removed.
    pub async fn prune_ticks(&self, older_than: DateTime<Utc>) -> PersistenceResult<u64> {
        let result = sqlx::query("DELETE FROM ticks WHERE ts < ?")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}

fn row_to_bar(row: &sqlx::sqlite::SqliteRow) -> DailyBar {
    DailyBar {
        code: row.get("code"),
        date: row.get("date"),
        open: row.get("open"),
        high: row.get("high"),
        low: row.get("low"),
        close: row.get("close"),
        volume: row.get("volume"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    fn bar(code: &str, date: &str, close: f64) -> DailyBar {
        DailyBar {
            code: code.into(),
            date: date.parse().unwrap(),
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
            volume: 100_000.0,
        }
    }

    #[tokio::test]
    async fn bar_upsert_is_idempotent() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let prices = db.prices();

        let bars = vec![bar("005930", "2025-06-02", 100.0), bar("005930", "2025-06-03", 101.0)];
        prices.upsert_bars(&bars).await.unwrap();
        prices.upsert_bars(&bars).await.unwrap();

        let loaded = prices
            .bars_between("005930", "2025-06-01".parse().unwrap(), "2025-06-30".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn invalid_bar_is_dropped_not_fatal() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let prices = db.prices();

        let mut bad = bar("005930", "2025-06-02", 100.0);
        bad.low = 200.0;
        let written = prices
            .upsert_bars(&[bad, bar("005930", "2025-06-03", 101.0)])
            .await
            .unwrap();
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn tick_insert_updates_holding_price() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.holdings()
            .set_position("005930", 10.0, 70_000.0)
            .await
            .unwrap();

        db.prices()
            .insert_tick(&Tick {
                code: "005930".into(),
                timestamp: Utc::now(),
                price: 71_500.0,
                volume: 50.0,
            })
            .await
            .unwrap();

        let holding = db.holdings().get("005930").await.unwrap().unwrap();
        assert_eq!(holding.current_price, 71_500.0);
    }
}
