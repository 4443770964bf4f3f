pub mod blobs;
pub mod error;
pub mod holdings;
pub mod prices;
pub mod recs;
pub mod sites;
pub mod supply;
pub mod tickers;
pub mod valuations;

pub use blobs::BlobStore;
pub use error::{PersistenceError, PersistenceResult};
pub use holdings::HoldingStore;
pub use prices::PriceStore;
pub use recs::RecommendationStore;
pub use sites::SiteStore;
pub use supply::SupplyDemandStore;
pub use tickers::TickerStore;
pub use valuations::{CandidateRow, ValuationStore};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Shared database handle. Owns the pool; every entity store is a cheap
/// view over it.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (or create) the database and run the embedded schema.
    pub async fn connect(database_url: &str) -> PersistenceResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(PersistenceError::from_sqlx)?
            .create_if_missing(true);

        // Pool must stay at least as large as the orchestrator worker pool
        // so a full tier cannot starve persistence.
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await
            .map_err(PersistenceError::from_sqlx)?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Connect using `DATABASE_URL` (or `DB_URL`), defaulting to a
    /// local file.
    pub async fn from_env() -> PersistenceResult<Self> {
        let url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("DB_URL"))
            .unwrap_or_else(|_| "sqlite:aegis.db".to_string());
        Self::connect(&url).await
    }

    async fn init_schema(&self) -> PersistenceResult<()> {
        let schema = include_str!("schema.sql");

        // sqlx executes one statement per query; split on ';'
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt)
                    .execute(&self.pool)
                    .await
                    .map_err(PersistenceError::from_sqlx)?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn tickers(&self) -> TickerStore {
        TickerStore::new(self.pool.clone())
    }

    pub fn prices(&self) -> PriceStore {
        PriceStore::new(self.pool.clone())
    }

    pub fn supply(&self) -> SupplyDemandStore {
        SupplyDemandStore::new(self.pool.clone())
    }

    pub fn valuations(&self) -> ValuationStore {
        ValuationStore::new(self.pool.clone())
    }

    pub fn blobs(&self) -> BlobStore {
        BlobStore::new(self.pool.clone())
    }

    pub fn sites(&self) -> SiteStore {
        SiteStore::new(self.pool.clone())
    }

    pub fn holdings(&self) -> HoldingStore {
        HoldingStore::new(self.pool.clone())
    }

    pub fn recommendations(&self) -> RecommendationStore {
        RecommendationStore::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_bootstrap_schema() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        assert!(db.pool().acquire().await.is_ok());
        // Schema is idempotent
        db.init_schema().await.unwrap();
    }
}
