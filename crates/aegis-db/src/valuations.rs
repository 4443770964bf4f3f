use aegis_core::ScreenerConfig;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

use crate::error::{PersistenceError, PersistenceResult};

/// Latest valuation metrics per ticker (PER/PBR/ROE/debt, market cap,
/// traded value). Written by tier-1/3 fetchers, read by screener stage 1
/// and the fundamental analyser.
pub struct ValuationStore {
    pool: SqlitePool,
}

/// Stage-1 screener output row.
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub code: String,
    pub per: f64,
    pub pbr: f64,
    pub market_cap: f64,
    pub trading_value: f64,
}

impl ValuationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        &self,
        code: &str,
        date: NaiveDate,
        per: Option<f64>,
        pbr: Option<f64>,
        roe: Option<f64>,
        debt_ratio: Option<f64>,
        market_cap: Option<f64>,
        trading_value: Option<f64>,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO valuations
                 (code, date, per, pbr, roe, debt_ratio, market_cap, trading_value)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (code, date) DO UPDATE SET
                 per = COALESCE(excluded.per, valuations.per),
                 pbr = COALESCE(excluded.pbr, valuations.pbr),
                 roe = COALESCE(excluded.roe, valuations.roe),
                 debt_ratio = COALESCE(excluded.debt_ratio, valuations.debt_ratio),
                 market_cap = COALESCE(excluded.market_cap, valuations.market_cap),
                 trading_value = COALESCE(excluded.trading_value, valuations.trading_value)",
        )
        .bind(code)
        .bind(date)
        .bind(per)
        .bind(pbr)
        .bind(roe)
        .bind(debt_ratio)
        .bind(market_cap)
        .bind(trading_value)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    pub async fn latest(
        &self,
        code: &str,
    ) -> PersistenceResult<Option<(NaiveDate, serde_json::Value)>> {
        let row = sqlx::query(
            "SELECT date, per, pbr, roe, debt_ratio, market_cap, trading_value
             FROM valuations WHERE code = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(row.map(|r| {
            let date: NaiveDate = r.get("date");
            let value = serde_json::json!({
                "per": r.get::<Option<f64>, _>("per"),
                "pbr": r.get::<Option<f64>, _>("pbr"),
                "roe": r.get::<Option<f64>, _>("roe"),
                "debt_ratio": r.get::<Option<f64>, _>("debt_ratio"),
                "market_cap": r.get::<Option<f64>, _>("market_cap"),
                "trading_value": r.get::<Option<f64>, _>("trading_value"),
            });
            (date, value)
        }))
    }

    /// Stage-1 screen: value bounds + liquidity floors over the active
    /// universe minus current holdings, ordered by data freshness then
    /// traded value, capped at `cfg.stage1_limit`.
    pub async fn screen_stage1(&self, cfg: &ScreenerConfig) -> PersistenceResult<Vec<CandidateRow>> {
        let rows = sqlx::query(
            "SELECT v.code, v.per, v.pbr, v.market_cap, v.trading_value
             FROM valuations v
             JOIN tickers t ON t.code = v.code AND t.is_delisted = 0
             LEFT JOIN holdings h ON h.code = v.code AND h.quantity > 0
             JOIN (SELECT code, MAX(date) AS max_date FROM valuations GROUP BY code) latest
                 ON latest.code = v.code AND latest.max_date = v.date
             JOIN (SELECT code, MAX(date) AS max_date FROM ohlcv GROUP BY code) bars
                 ON bars.code = v.code
             JOIN ohlcv o ON o.code = bars.code AND o.date = bars.max_date
             WHERE h.code IS NULL
               AND v.pbr BETWEEN ? AND ?
               AND v.per BETWEEN ? AND ?
               AND o.volume >= ?
               AND v.market_cap >= ?
               AND v.trading_value >= ?
             ORDER BY v.date DESC, v.trading_value DESC
             LIMIT ?",
        )
        .bind(cfg.pbr_min)
        .bind(cfg.pbr_max)
        .bind(cfg.per_min)
        .bind(cfg.per_max)
        .bind(cfg.min_volume)
        .bind(cfg.min_market_cap)
        .bind(cfg.min_trading_value)
        .bind(cfg.stage1_limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows
            .iter()
            .map(|r| CandidateRow {
                code: r.get("code"),
                per: r.get::<Option<f64>, _>("per").unwrap_or(0.0),
                pbr: r.get::<Option<f64>, _>("pbr").unwrap_or(0.0),
                market_cap: r.get::<Option<f64>, _>("market_cap").unwrap_or(0.0),
                trading_value: r.get::<Option<f64>, _>("trading_value").unwrap_or(0.0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;
    use aegis_core::{DailyBar, Market, Ticker};

    async fn seed(db: &Db, code: &str, per: f64, pbr: f64, volume: f64) {
        db.tickers()
            .upsert(&Ticker {
                code: code.into(),
                name: format!("종목{code}"),
                market: Market::Kospi,
                sector: None,
                is_delisted: false,
            })
            .await
            .unwrap();
        db.valuations()
            .upsert(
                code,
                "2025-06-02".parse().unwrap(),
                Some(per),
                Some(pbr),
                Some(12.0),
                Some(80.0),
                Some(1e11),
                Some(6e9),
            )
            .await
            .unwrap();
        db.prices()
            .upsert_bars(&[DailyBar {
                code: code.into(),
                date: "2025-06-02".parse().unwrap(),
                open: 99.0,
                high: 102.0,
                low: 98.0,
                close: 100.0,
                volume,
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stage1_applies_value_and_liquidity_bounds() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        seed(&db, "000100", 8.0, 0.9, 100_000.0).await; // passes
        seed(&db, "000200", 35.0, 0.9, 100_000.0).await; // PER too high
        seed(&db, "000300", 8.0, 0.9, 1_000.0).await; // volume floor

        let cfg = ScreenerConfig::default();
        let out = db.valuations().screen_stage1(&cfg).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].code, "000100");
    }

    #[tokio::test]
    async fn stage1_excludes_current_holdings() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        seed(&db, "000100", 8.0, 0.9, 100_000.0).await;
        db.holdings()
            .set_position("000100", 5.0, 90.0)
            .await
            .unwrap();

        let out = db
            .valuations()
            .screen_stage1(&ScreenerConfig::default())
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
