use aegis_core::{HealthStatus, Site, SiteHealth, Tier};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{PersistenceError, PersistenceResult};

/// Site registry, execution log and health tracking.
pub struct SiteStore {
    pool: SqlitePool,
}

/// Execution-log row written after every `execute`, success or failure.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub site_id: i64,
    pub ticker: String,
    pub ok: bool,
    pub duration_ms: u64,
    pub error_kind: Option<String>,
}

const DEGRADED_AFTER: u32 = 3;
const DOWN_AFTER: u32 = 10;

impl SiteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_site(&self, site: &Site) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO sites (id, name, tier, rate_limit_per_minute, timeout_secs, is_active)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name, tier = excluded.tier,
                 rate_limit_per_minute = excluded.rate_limit_per_minute,
                 timeout_secs = excluded.timeout_secs,
                 is_active = excluded.is_active",
        )
        .bind(site.id)
        .bind(&site.name)
        .bind(site.tier.rank() as i64)
        .bind(site.rate_limit_per_minute.map(|v| v as i64))
        .bind(site.timeout_secs.map(|v| v as i64))
        .bind(site.is_active as i64)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    pub async fn list_active(&self) -> PersistenceResult<Vec<Site>> {
        let rows = sqlx::query(
            "SELECT id, name, tier, rate_limit_per_minute, timeout_secs, is_active
             FROM sites WHERE is_active = 1 ORDER BY tier, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows.iter().filter_map(row_to_site).collect())
    }

    pub async fn get(&self, site_id: i64) -> PersistenceResult<Option<Site>> {
        let row = sqlx::query(
            "SELECT id, name, tier, rate_limit_per_minute, timeout_secs, is_active
             FROM sites WHERE id = ?",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(row.as_ref().and_then(row_to_site))
    }

    /// Append to the execution log and fold the outcome into site health.
    /// Both writes happen regardless of fetch success or failure.
    pub async fn record_execution(&self, rec: &ExecutionRecord) -> PersistenceResult<SiteHealth> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(PersistenceError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO execution_log (site_id, ticker, status, duration_ms, error_kind, ts)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(rec.site_id)
        .bind(&rec.ticker)
        .bind(if rec.ok { "ok" } else { "fail" })
        .bind(rec.duration_ms as i64)
        .bind(&rec.error_kind)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        let current = sqlx::query(
            "SELECT consecutive_failures, avg_latency_ms FROM site_health WHERE site_id = ?",
        )
        .bind(rec.site_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        let (prev_failures, prev_latency) = current
            .map(|r| {
                (
                    r.get::<i64, _>("consecutive_failures") as u32,
                    r.get::<f64, _>("avg_latency_ms"),
                )
            })
            .unwrap_or((0, 0.0));

        let failures = if rec.ok { 0 } else { prev_failures + 1 };
        let status = if failures >= DOWN_AFTER {
            HealthStatus::Down
        } else if failures >= DEGRADED_AFTER {
            HealthStatus::Degraded
        } else {
            HealthStatus::Active
        };

        // Exponential moving average keeps the column cheap to maintain.
        let avg_latency = if prev_latency == 0.0 {
            rec.duration_ms as f64
        } else {
            prev_latency * 0.8 + rec.duration_ms as f64 * 0.2
        };

        let last_success = if rec.ok { Some(Utc::now()) } else { None };

        sqlx::query(
            "INSERT INTO site_health
                 (site_id, status, consecutive_failures, avg_latency_ms, last_success_ts)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (site_id) DO UPDATE SET
                 status = excluded.status,
                 consecutive_failures = excluded.consecutive_failures,
                 avg_latency_ms = excluded.avg_latency_ms,
                 last_success_ts = COALESCE(excluded.last_success_ts, site_health.last_success_ts)",
        )
        .bind(rec.site_id)
        .bind(status.as_str())
        .bind(failures as i64)
        .bind(avg_latency)
        .bind(last_success)
        .execute(&mut *tx)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        tx.commit().await.map_err(PersistenceError::from_sqlx)?;

        Ok(SiteHealth {
            site_id: rec.site_id,
            status,
            consecutive_failures: failures,
            avg_latency_ms: avg_latency,
            last_success_ts: last_success,
        })
    }

    /// Override the derived status (Blocked responses force `degraded`,
    /// Auth failures force `down`).
    pub async fn force_status(
        &self,
        site_id: i64,
        status: HealthStatus,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO site_health (site_id, status) VALUES (?, ?)
             ON CONFLICT (site_id) DO UPDATE SET status = excluded.status",
        )
        .bind(site_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;
        Ok(())
    }

    pub async fn health(&self, site_id: i64) -> PersistenceResult<Option<SiteHealth>> {
        let row = sqlx::query(
            "SELECT site_id, status, consecutive_failures, avg_latency_ms, last_success_ts
             FROM site_health WHERE site_id = ?",
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(row.map(|r| SiteHealth {
            site_id: r.get("site_id"),
            status: HealthStatus::parse(&r.get::<String, _>("status"))
                .unwrap_or(HealthStatus::Active),
            consecutive_failures: r.get::<i64, _>("consecutive_failures") as u32,
            avg_latency_ms: r.get("avg_latency_ms"),
            last_success_ts: r.get::<Option<DateTime<Utc>>, _>("last_success_ts"),
        }))
    }

    /// Health summary across all sites for the CLI report.
    pub async fn health_report(&self) -> PersistenceResult<Vec<(String, SiteHealth)>> {
        let rows = sqlx::query(
            "SELECT s.name, h.site_id, h.status, h.consecutive_failures,
                    h.avg_latency_ms, h.last_success_ts
             FROM site_health h JOIN sites s ON s.id = h.site_id
             ORDER BY s.tier, s.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        Ok(rows
            .iter()
            .map(|r| {
                (
                    r.get::<String, _>("name"),
                    SiteHealth {
                        site_id: r.get("site_id"),
                        status: HealthStatus::parse(&r.get::<String, _>("status"))
                            .unwrap_or(HealthStatus::Active),
                        consecutive_failures: r.get::<i64, _>("consecutive_failures") as u32,
                        avg_latency_ms: r.get("avg_latency_ms"),
                        last_success_ts: r.get::<Option<DateTime<Utc>>, _>("last_success_ts"),
                    },
                )
            })
            .collect())
    }
}

fn row_to_site(row: &sqlx::sqlite::SqliteRow) -> Option<Site> {
    Some(Site {
        id: row.get("id"),
        name: row.get("name"),
        tier: Tier::from_rank(row.get::<i64, _>("tier"))?,
        rate_limit_per_minute: row
            .get::<Option<i64>, _>("rate_limit_per_minute")
            .map(|v| v as u32),
        timeout_secs: row.get::<Option<i64>, _>("timeout_secs").map(|v| v as u64),
        is_active: row.get::<i64, _>("is_active") != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Db;

    fn site(id: i64, tier: Tier) -> Site {
        Site {
            id,
            name: format!("site-{id}"),
            tier,
            rate_limit_per_minute: Some(60),
            timeout_secs: None,
            is_active: true,
        }
    }

    fn fail(site_id: i64) -> ExecutionRecord {
        ExecutionRecord {
            site_id,
            ticker: "005930".into(),
            ok: false,
            duration_ms: 120,
            error_kind: Some("transient".into()),
        }
    }

    #[tokio::test]
    async fn health_degrades_then_goes_down() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.sites();
        store.upsert_site(&site(1, Tier::Official)).await.unwrap();

        for _ in 0..2 {
            let h = store.record_execution(&fail(1)).await.unwrap();
            assert_eq!(h.status, HealthStatus::Active);
        }
        let h = store.record_execution(&fail(1)).await.unwrap();
        assert_eq!(h.status, HealthStatus::Degraded);
        assert_eq!(h.consecutive_failures, 3);

        for _ in 0..6 {
            store.record_execution(&fail(1)).await.unwrap();
        }
        let h = store.record_execution(&fail(1)).await.unwrap();
        assert_eq!(h.status, HealthStatus::Down);
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.sites();
        store.upsert_site(&site(1, Tier::Official)).await.unwrap();

        for _ in 0..4 {
            store.record_execution(&fail(1)).await.unwrap();
        }
        let h = store
            .record_execution(&ExecutionRecord {
                site_id: 1,
                ticker: "005930".into(),
                ok: true,
                duration_ms: 80,
                error_kind: None,
            })
            .await
            .unwrap();
        assert_eq!(h.status, HealthStatus::Active);
        assert_eq!(h.consecutive_failures, 0);
        assert!(h.last_success_ts.is_some());
    }

    #[tokio::test]
    async fn list_active_orders_by_tier() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let store = db.sites();
        store.upsert_site(&site(10, Tier::Browser)).await.unwrap();
        store.upsert_site(&site(2, Tier::Official)).await.unwrap();

        let sites = store.list_active().await.unwrap();
        assert_eq!(sites[0].tier, Tier::Official);
        assert_eq!(sites[1].tier, Tier::Browser);
    }
}
