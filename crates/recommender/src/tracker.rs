use aegis_core::{Performance, PerformanceStatus};
use aegis_db::Db;
use anyhow::Result;
use chrono::NaiveDate;

/// Horizons at which each recommendation's outcome is verified.
const HORIZONS: [u32; 3] = [7, 14, 30];

/// Status bands on the horizon return.
fn classify(return_rate: f64) -> PerformanceStatus {
    if return_rate <= -0.10 {
        PerformanceStatus::Failed
    } else if return_rate <= -0.05 {
        PerformanceStatus::Warning
    } else if return_rate >= 0.10 {
        PerformanceStatus::Success
    } else {
        PerformanceStatus::Active
    }
}

/// Walks recommendations whose 7/14/30-day horizon has elapsed and
/// writes one performance row per (rec, horizon).
pub struct PriceTracker {
    db: Db,
}

#[derive(Debug, Default, Clone)]
pub struct TrackSummary {
    pub checked: usize,
    pub written: usize,
    pub failed_status: usize,
}

impl PriceTracker {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn track(&self, as_of: NaiveDate) -> Result<TrackSummary> {
        let mut summary = TrackSummary::default();

        for horizon in HORIZONS {
            let pending = self
                .db
                .recommendations()
                .pending_performance(horizon, as_of)
                .await?;

            for rec in pending {
                summary.checked += 1;

                let check_date = rec.rec_date + chrono::Duration::days(horizon as i64);
                let Some((_, check_price)) = self
                    .db
                    .prices()
                    .close_on_or_after(&rec.ticker, check_date)
                    .await?
                else {
                    // Price not collected yet; retried on the next run
                    tracing::debug!(rec_id = rec.id, horizon, "no close price yet");
                    continue;
                };

                if rec.rec_price <= 0.0 {
                    tracing::warn!(rec_id = rec.id, "rec_price invalid, dropping row");
                    continue;
                }
                let return_rate = (check_price - rec.rec_price) / rec.rec_price;

                // Max drawdown over the holding window, from entry price
                let window = self
                    .db
                    .prices()
                    .bars_between(&rec.ticker, rec.rec_date, check_date)
                    .await?;
                let max_drawdown = window
                    .iter()
                    .map(|b| (b.low - rec.rec_price) / rec.rec_price)
                    .fold(0.0f64, f64::min);

                let status = classify(return_rate);
                if status == PerformanceStatus::Failed {
                    summary.failed_status += 1;
                }

                self.db
                    .recommendations()
                    .upsert_performance(&Performance {
                        rec_id: rec.id,
                        days_held: horizon,
                        check_price,
                        return_rate,
                        max_drawdown,
                        status,
                    })
                    .await?;
                summary.written += 1;

                tracing::info!(
                    rec_id = rec.id,
                    ticker = %rec.ticker,
                    horizon,
                    return_pct = return_rate * 100.0,
                    status = status.as_str(),
                    "performance recorded"
                );
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{DailyBar, RecGrade, Recommendation};
    use serde_json::json;

    fn close_bar(code: &str, date: NaiveDate, close: f64) -> DailyBar {
        DailyBar {
            code: code.into(),
            date,
            open: close,
            high: close * 1.01,
            low: close * 0.985,
            close,
            volume: 100_000.0,
        }
    }

    async fn seed_rec(db: &Db, rec_date: &str, rec_price: f64) -> i64 {
        db.recommendations()
            .insert(&Recommendation {
                id: 0,
                ticker: "005930".into(),
                batch_id: "b1".into(),
                rec_date: rec_date.parse().unwrap(),
                rec_price,
                grade: RecGrade::A,
                confidence: 0.8,
                rationale: "test".into(),
                scores: json!({}),
                final_score: 0.5,
            })
            .await
            .unwrap()
    }

    /// S5 shape: D0 at 10,000 with closes +5% / +2% / -11% at the three
    /// horizons → active, active, failed.
    #[tokio::test]
    async fn horizon_statuses_follow_return_bands() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let rec_date: NaiveDate = "2025-05-01".parse().unwrap();
        let rec_id = seed_rec(&db, "2025-05-01", 10_000.0).await;

        let bars: Vec<DailyBar> = [(7i64, 10_500.0), (14, 10_200.0), (30, 8_900.0)]
            .iter()
            .map(|(d, px)| close_bar("005930", rec_date + chrono::Duration::days(*d), *px))
            .collect();
        db.prices().upsert_bars(&bars).await.unwrap();

        let tracker = PriceTracker::new(db.clone());
        let summary = tracker.track("2025-06-01".parse().unwrap()).await.unwrap();
        assert_eq!(summary.written, 3);
        assert_eq!(summary.failed_status, 1);

        let rows = db.recommendations().performance_for(rec_id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!((rows[0].return_rate - 0.05).abs() < 1e-9);
        assert_eq!(rows[0].status, PerformanceStatus::Active);
        assert!((rows[1].return_rate - 0.02).abs() < 1e-9);
        assert_eq!(rows[1].status, PerformanceStatus::Active);
        assert!((rows[2].return_rate + 0.11).abs() < 1e-9);
        assert_eq!(rows[2].status, PerformanceStatus::Failed);
    }

    #[tokio::test]
    async fn unelapsed_horizons_wait() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        seed_rec(&db, "2025-05-01", 10_000.0).await;
        db.prices()
            .upsert_bars(&[close_bar("005930", "2025-05-08".parse().unwrap(), 10_500.0)])
            .await
            .unwrap();

        // Only the 7-day horizon has elapsed by 2025-05-09
        let tracker = PriceTracker::new(db.clone());
        let summary = tracker.track("2025-05-09".parse().unwrap()).await.unwrap();
        assert_eq!(summary.written, 1);
    }

    #[tokio::test]
    async fn tracking_twice_writes_no_duplicates() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let rec_id = seed_rec(&db, "2025-05-01", 10_000.0).await;
        db.prices()
            .upsert_bars(&[close_bar("005930", "2025-05-08".parse().unwrap(), 10_500.0)])
            .await
            .unwrap();

        let tracker = PriceTracker::new(db.clone());
        tracker.track("2025-05-09".parse().unwrap()).await.unwrap();
        let second = tracker.track("2025-05-09".parse().unwrap()).await.unwrap();
        assert_eq!(second.written, 0);

        let rows = db.recommendations().performance_for(rec_id).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn status_bands() {
        assert_eq!(classify(0.12), PerformanceStatus::Success);
        assert_eq!(classify(0.05), PerformanceStatus::Active);
        assert_eq!(classify(-0.06), PerformanceStatus::Warning);
        assert_eq!(classify(-0.11), PerformanceStatus::Failed);
    }
}
