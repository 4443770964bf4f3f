use aegis_core::SupplyDemand;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

use crate::error::{PersistenceError, PersistenceResult};

pub struct SupplyDemandStore {
    pool: SqlitePool,
}

impl SupplyDemandStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, rows: &[SupplyDemand]) -> PersistenceResult<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(PersistenceError::from_sqlx)?;

        for sd in rows {
            sqlx::query(
                "INSERT INTO supply_demand
                     (code, date, foreign_net, institution_net, pension_net, individual_net)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (code, date) DO UPDATE SET
                     foreign_net = excluded.foreign_net,
                     institution_net = excluded.institution_net,
                     pension_net = excluded.pension_net,
                     individual_net = excluded.individual_net",
            )
            .bind(&sd.code)
            .bind(sd.date)
            .bind(sd.foreign_net)
            .bind(sd.institution_net)
            .bind(sd.pension_net)
            .bind(sd.individual_net)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::from_sqlx)?;
        }

        tx.commit().await.map_err(PersistenceError::from_sqlx)?;
        Ok(rows.len())
    }

    /// Most recent `limit` rows at or before `as_of`, oldest first.
    pub async fn recent(
        &self,
        code: &str,
        as_of: NaiveDate,
        limit: usize,
    ) -> PersistenceResult<Vec<SupplyDemand>> {
        let rows = sqlx::query(
            "SELECT code, date, foreign_net, institution_net, pension_net, individual_net
             FROM supply_demand WHERE code = ? AND date <= ?
             ORDER BY date DESC LIMIT ?",
        )
        .bind(code)
        .bind(as_of)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::from_sqlx)?;

        let mut out: Vec<SupplyDemand> = rows
            .iter()
            .map(|r| SupplyDemand {
                code: r.get("code"),
                date: r.get("date"),
                foreign_net: r.get("foreign_net"),
                institution_net: r.get("institution_net"),
                pension_net: r.get("pension_net"),
                individual_net: r.get("individual_net"),
            })
            .collect();
        out.reverse();
        Ok(out)
    }
}
