use aegis_core::{
    Performance, PerformanceStatus, RecGrade, Recommendation, Retrospective,
};
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

use crate::error::{PersistenceError, PersistenceResult};

/// Recommendation, performance and retrospective access.
pub struct RecommendationStore {
    pool: SqlitePool,
}

impl RecommendationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one recommendation. (ticker, rec_date, batch_id) is unique;
    /// re-running a batch upserts rather than duplicating.
    pub async fn insert(&self, rec: &Recommendation) -> PersistenceResult<i64> {
        let scores = serde_json::to_string(&rec.scores)
            .map_err(|e| PersistenceError::Integrity(e.to_string()))?;

        sqlx::query(
            "INSERT INTO recommendations
                 (ticker, batch_id, rec_date, rec_price, grade, confidence,
                  rationale, scores, final_score)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (ticker, rec_date, batch_id) DO UPDATE SET
                 rec_price = excluded.rec_price, grade = excluded.grade,
                 confidence = excluded.confidence, rationale = excluded.rationale,
                 scores = excluded.scores, final_score = excluded.final_score",
        )
        .bind(&rec.ticker)
        .bind(&rec.batch_id)
        .bind(rec.rec_date)
        .bind(rec.rec_price)
        .bind(rec.grade.as_str())
        .bind(rec.confidence)
        .bind(&rec.rationale)
        .bind(scores)
        .bind(rec.final_score)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        // Re-select rather than trusting last_insert_rowid: the upsert path
        // leaves it pointing at an unrelated earlier insert.
        let row = sqlx::query(
            "SELECT id FROM recommendations WHERE ticker = ? AND rec_date = ? AND batch_id = ?",
        )
        .bind(&rec.ticker)
        .bind(rec.rec_date)
        .bind(&rec.batch_id)
        .fetch_one(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(row.get("id"))
    }

    pub async fn get(&self, id: i64) -> PersistenceResult<Option<Recommendation>> {
        let row = sqlx::query(
            "SELECT id, ticker, batch_id, rec_date, rec_price, grade, confidence,
                    rationale, scores, final_score
             FROM recommendations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(row.map(|r| row_to_rec(&r)))
    }

    pub async fn list_batch(&self, batch_id: &str) -> PersistenceResult<Vec<Recommendation>> {
        let rows = sqlx::query(
            "SELECT id, ticker, batch_id, rec_date, rec_price, grade, confidence,
                    rationale, scores, final_score
             FROM recommendations WHERE batch_id = ? ORDER BY final_score DESC",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows.iter().map(row_to_rec).collect())
    }

    /// Recommendations whose `days_held` horizon has elapsed by `as_of` and
    /// which have no performance row for that horizon yet.
    pub async fn pending_performance(
        &self,
        days_held: u32,
        as_of: NaiveDate,
    ) -> PersistenceResult<Vec<Recommendation>> {
        let cutoff = as_of - chrono::Duration::days(days_held as i64);
        let rows = sqlx::query(
            "SELECT r.id, r.ticker, r.batch_id, r.rec_date, r.rec_price, r.grade,
                    r.confidence, r.rationale, r.scores, r.final_score
             FROM recommendations r
             LEFT JOIN performance p ON p.rec_id = r.id AND p.days_held = ?
             WHERE p.rec_id IS NULL AND r.rec_date <= ?
             ORDER BY r.rec_date",
        )
        .bind(days_held as i64)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows.iter().map(row_to_rec).collect())
    }

    pub async fn upsert_performance(&self, perf: &Performance) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO performance
                 (rec_id, days_held, check_price, return_rate, max_drawdown, status)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (rec_id, days_held) DO UPDATE SET
                 check_price = excluded.check_price,
                 return_rate = excluded.return_rate,
                 max_drawdown = excluded.max_drawdown,
                 status = excluded.status",
        )
        .bind(perf.rec_id)
        .bind(perf.days_held as i64)
        .bind(perf.check_price)
        .bind(perf.return_rate)
        .bind(perf.max_drawdown)
        .bind(perf.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    pub async fn performance_for(&self, rec_id: i64) -> PersistenceResult<Vec<Performance>> {
        let rows = sqlx::query(
            "SELECT rec_id, days_held, check_price, return_rate, max_drawdown, status
             FROM performance WHERE rec_id = ? ORDER BY days_held",
        )
        .bind(rec_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows.iter().map(row_to_perf).collect())
    }

    /// Failed performance rows lacking a retrospective, oldest first.
    pub async fn failed_without_retrospective(
        &self,
        limit: usize,
    ) -> PersistenceResult<Vec<(Recommendation, Performance)>> {
        let rows = sqlx::query(
            "SELECT r.id, r.ticker, r.batch_id, r.rec_date, r.rec_price, r.grade,
                    r.confidence, r.rationale, r.scores, r.final_score,
                    p.rec_id, p.days_held, p.check_price,
                    p.return_rate, p.max_drawdown, p.status
             FROM performance p
             JOIN recommendations r ON r.id = p.rec_id
             LEFT JOIN retrospectives t
                 ON t.rec_id = p.rec_id AND t.days_held = p.days_held
             WHERE p.status = 'failed' AND t.rec_id IS NULL
             ORDER BY r.rec_date LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows
            .iter()
            .map(|r| (row_to_rec(r), row_to_perf(r)))
            .collect())
    }

    /// Insert-only: at most one retrospective per (rec, horizon). A second
    /// insert is a `Conflict`.
    pub async fn insert_retrospective(&self, retro: &Retrospective) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO retrospectives
                 (rec_id, days_held, missed_risks, actual_cause, lesson,
                  improvement, confidence_adjustment)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(retro.rec_id)
        .bind(retro.days_held as i64)
        .bind(&retro.missed_risks)
        .bind(&retro.actual_cause)
        .bind(&retro.lesson)
        .bind(&retro.improvement)
        .bind(retro.confidence_adjustment.clamp(-10.0, 10.0))
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    pub async fn retrospectives_for(&self, rec_id: i64) -> PersistenceResult<Vec<Retrospective>> {
        let rows = sqlx::query(
            "SELECT rec_id, days_held, missed_risks, actual_cause, lesson,
                    improvement, confidence_adjustment
             FROM retrospectives WHERE rec_id = ? ORDER BY days_held",
        )
        .bind(rec_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows
            .iter()
            .map(|r| Retrospective {
                rec_id: r.get("rec_id"),
                days_held: r.get::<i64, _>("days_held") as u32,
                missed_risks: r.get("missed_risks"),
                actual_cause: r.get("actual_cause"),
                lesson: r.get("lesson"),
                improvement: r.get("improvement"),
                confidence_adjustment: r.get("confidence_adjustment"),
            })
            .collect())
    }
}

fn row_to_rec(row: &sqlx::sqlite::SqliteRow) -> Recommendation {
    Recommendation {
        id: row.get("id"),
        ticker: row.get("ticker"),
        batch_id: row.get("batch_id"),
        rec_date: row.get("rec_date"),
        rec_price: row.get("rec_price"),
        grade: RecGrade::parse(&row.get::<String, _>("grade")).unwrap_or(RecGrade::C),
        confidence: row.get("confidence"),
        rationale: row.get("rationale"),
        scores: serde_json::from_str(&row.get::<String, _>("scores"))
            .unwrap_or(serde_json::Value::Null),
        final_score: row.get("final_score"),
    }
}

fn row_to_perf(row: &sqlx::sqlite::SqliteRow) -> Performance {
    Performance {
        rec_id: row.get("rec_id"),
        days_held: row.get::<i64, _>("days_held") as u32,
        check_price: row.get("check_price"),
        return_rate: row.get("return_rate"),
        max_drawdown: row.get("max_drawdown"),
        status: PerformanceStatus::parse(&row.get::<String, _>("status"))
            .unwrap_or(PerformanceStatus::Active),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;
    use serde_json::json;

    fn rec(ticker: &str, date: &str) -> Recommendation {
        Recommendation {
            id: 0,
            ticker: ticker.into(),
            batch_id: "batch-1".into(),
            rec_date: date.parse().unwrap(),
            rec_price: 10_000.0,
            grade: RecGrade::A,
            confidence: 0.8,
            rationale: "uptrend with foreign accumulation".into(),
            scores: json!({"technical": 1.5}),
            final_score: 0.5,
        }
    }

    #[tokio::test]
    async fn rec_unique_by_ticker_date_batch() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.recommendations();

        let id1 = store.insert(&rec("005930", "2025-06-02")).await.unwrap();
        let id2 = store.insert(&rec("005930", "2025-06-02")).await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn pending_performance_respects_horizon() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.recommendations();
        let id = store.insert(&rec("005930", "2025-06-02")).await.unwrap();

        // 5 days later: 7-day horizon not yet elapsed
        let pending = store
            .pending_performance(7, "2025-06-07".parse().unwrap())
            .await
            .unwrap();
        assert!(pending.is_empty());

        let pending = store
            .pending_performance(7, "2025-06-09".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        store
            .upsert_performance(&Performance {
                rec_id: id,
                days_held: 7,
                check_price: 10_500.0,
                return_rate: 0.05,
                max_drawdown: -0.01,
                status: PerformanceStatus::Active,
            })
            .await
            .unwrap();
        let pending = store
            .pending_performance(7, "2025-06-09".parse().unwrap())
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn retrospective_is_unique_per_horizon() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.recommendations();
        let id = store.insert(&rec("005930", "2025-06-02")).await.unwrap();

        let retro = Retrospective {
            rec_id: id,
            days_held: 30,
            missed_risks: "sector-wide drawdown".into(),
            actual_cause: "semiconductor downcycle".into(),
            lesson: "check sector breadth before entry".into(),
            improvement: "add sector filter".into(),
            confidence_adjustment: -4.0,
        };
        store.insert_retrospective(&retro).await.unwrap();
        let err = store.insert_retrospective(&retro).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }
}
