use std::sync::Arc;

use aegis_db::Db;
use anyhow::Result;
use collect_orchestrator::CollectOrchestrator;

/// Data types the batch runner refreshes before analysing, with the
/// registry site that provides each.
const REFRESH_PLAN: &[(&str, &str)] = &[
    ("news", "naver-news"),
    ("disclosure", "dart-disclosure"),
    ("consensus", "fnguide-consensus"),
];

/// Pre-analysis refresh with a freshness cache: a blob younger than the
/// window is not re-fetched, so a batch over 100 tickers only hits the
/// wire for stale entries.
pub struct Collector {
    db: Db,
    orchestrator: Arc<CollectOrchestrator>,
    freshness_secs: u64,
}

impl Collector {
    pub fn new(db: Db, orchestrator: Arc<CollectOrchestrator>, freshness_secs: u64) -> Self {
        Self {
            db,
            orchestrator,
            freshness_secs,
        }
    }

    pub async fn refresh(&self, ticker: &str) -> Result<usize> {
        let sites = self.db.sites().list_active().await?;
        let mut refreshed = 0usize;

        for (data_type, site_name) in REFRESH_PLAN {
            let fresh = self
                .db
                .blobs()
                .age_secs(ticker, data_type)
                .await?
                .is_some_and(|age| age >= 0 && (age as u64) < self.freshness_secs);
            if fresh {
                tracing::debug!(ticker, data_type, "blob fresh, skipping re-fetch");
                continue;
            }

            let Some(site) = sites.iter().find(|s| s.name == *site_name) else {
                tracing::debug!(site_name, "refresh source not registered");
                continue;
            };

            // Failures are recovered inside the executor; a dead source
            // just leaves the stale blob in place
            if let Err(e) = self.orchestrator.run_single(site.id, ticker).await {
                tracing::warn!(ticker, site_name, error = %e, "refresh failed");
            } else {
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }
}
