use std::sync::Arc;
use std::time::Duration;

use aegis_core::{AegisConfig, DailyBar, FetchError, HealthStatus, Site, SupplyDemand, Tick};
use aegis_db::sites::ExecutionRecord;
use aegis_db::Db;
use chrono::{DateTime, Utc};
use rate_limiter::SiteRateLimiter;

use crate::fetcher::{FetchPayload, Fetcher};

/// Terminal outcome of one `execute` call. The wrapper recovers every
/// fetch failure locally; callers only see what happened, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Payload persisted (`rows` materialised into typed tables)
    Success { rows: usize },
    /// Source had nothing for this ticker; recorded as zero-row success
    NotFound,
    /// All attempts exhausted or a non-retryable failure
    Failed { kind: &'static str },
}

/// Wraps `Fetcher::fetch` with rate limiting, per-attempt timeout,
/// transient retry, idempotent persistence and health bookkeeping.
pub struct FetchExecutor {
    db: Db,
    limiter: Arc<SiteRateLimiter>,
    config: Arc<AegisConfig>,
}

impl FetchExecutor {
    pub fn new(db: Db, limiter: Arc<SiteRateLimiter>, config: Arc<AegisConfig>) -> Self {
        Self {
            db,
            limiter,
            config,
        }
    }

    pub async fn execute(&self, site: &Site, fetcher: &dyn Fetcher, ticker: &str) -> FetchOutcome {
        let desc = fetcher.descriptor();
        let retry = self.config.fetch.retry;
        let timeout = Duration::from_secs(
            site.timeout_secs
                .unwrap_or(self.config.fetch.attempt_timeout_secs),
        );

        let started = std::time::Instant::now();
        let mut last_err: Option<FetchError> = None;

        for attempt in 1..=retry.max_attempts {
            let delay = retry.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire(desc.site_id).await;

            let result = match tokio::time::timeout(timeout, fetcher.fetch(ticker)).await {
                Ok(r) => r,
                Err(_) => Err(FetchError::Transient(format!(
                    "attempt deadline {:?} exceeded",
                    timeout
                ))),
            };

            match result {
                Ok(payload) => {
                    let rows = self.persist(desc.site_id, desc.domain_id, ticker, &payload).await;
                    self.finish(site, ticker, started, true, None).await;
                    tracing::debug!(
                        site = %site.name, ticker, data_type = %payload.data_type,
                        rows, "fetch ok"
                    );
                    return FetchOutcome::Success { rows };
                }
                Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                    tracing::warn!(
                        site = %site.name, ticker, attempt,
                        error = %err, "transient fetch failure, retrying"
                    );
                    last_err = Some(err);
                }
                Err(err) => {
                    last_err = Some(err);
                    break;
                }
            }
        }

        let err = last_err.expect("loop always records an error before exiting");
        let kind = err.kind();

        match &err {
            FetchError::NotFound(_) => {
                // Ticker unknown at this source: zero-row success
                self.finish(site, ticker, started, true, Some(kind)).await;
                return FetchOutcome::NotFound;
            }
            FetchError::Blocked(_) => {
                self.limiter
                    .impose_cooldown(
                        desc.site_id,
                        Duration::from_secs(self.config.fetch.blocked_cooldown_secs),
                    )
                    .await;
            }
            _ => {}
        }

        self.finish(site, ticker, started, false, Some(kind)).await;

        match &err {
            FetchError::Blocked(_) => {
                if let Err(e) = self
                    .db
                    .sites()
                    .force_status(desc.site_id, HealthStatus::Degraded)
                    .await
                {
                    tracing::error!(site = %site.name, error = %e, "health override failed");
                }
            }
            FetchError::Auth(_) => {
                if let Err(e) = self
                    .db
                    .sites()
                    .force_status(desc.site_id, HealthStatus::Down)
                    .await
                {
                    tracing::error!(site = %site.name, error = %e, "health override failed");
                }
            }
            _ => {}
        }

        tracing::warn!(site = %site.name, ticker, kind, error = %err, "fetch failed");
        FetchOutcome::Failed { kind }
    }

    /// Execution log + health row. Runs on success and failure alike.
    async fn finish(
        &self,
        site: &Site,
        ticker: &str,
        started: std::time::Instant,
        ok: bool,
        error_kind: Option<&'static str>,
    ) {
        let record = ExecutionRecord {
            site_id: site.id,
            ticker: ticker.to_string(),
            ok,
            duration_ms: started.elapsed().as_millis() as u64,
            error_kind: error_kind.map(str::to_string),
        };
        if let Err(e) = self.db.sites().record_execution(&record).await {
            tracing::error!(site = %site.name, error = %e, "execution log write failed");
        }
    }

    /// Blob UPSERT plus typed materialisation for the data types the
    /// screener and analysers read from relational tables.
    async fn persist(
        &self,
        site_id: i64,
        domain_id: i64,
        ticker: &str,
        payload: &FetchPayload,
    ) -> usize {
        let blob = aegis_db::blobs::blob(
            ticker,
            site_id,
            domain_id,
            &payload.data_type,
            payload.data_date,
            payload.content.clone(),
        );
        if let Err(e) = self.db.blobs().upsert(&blob).await {
            tracing::error!(ticker, error = %e, "blob upsert failed");
        }

        match payload.data_type.as_str() {
            "ohlcv" => self.materialise_bars(ticker, payload).await,
            "supply_demand" => self.materialise_supply(ticker, payload).await,
            "valuation" => self.materialise_valuation(ticker, payload).await,
            "tick" => self.materialise_ticks(ticker, payload).await,
            _ => 0,
        }
    }

    async fn materialise_bars(&self, ticker: &str, payload: &FetchPayload) -> usize {
        let Some(items) = payload.content.get("bars").and_then(|v| v.as_array()) else {
            return 0;
        };
        let bars: Vec<DailyBar> = items
            .iter()
            .filter_map(|item| {
                Some(DailyBar {
                    code: ticker.to_string(),
                    date: item.get("date")?.as_str()?.parse().ok()?,
                    open: item.get("open")?.as_f64()?,
                    high: item.get("high")?.as_f64()?,
                    low: item.get("low")?.as_f64()?,
                    close: item.get("close")?.as_f64()?,
                    volume: item.get("volume")?.as_f64()?,
                })
            })
            .collect();

        match self.db.prices().upsert_bars(&bars).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(ticker, error = %e, "bar materialisation failed");
                0
            }
        }
    }

    async fn materialise_supply(&self, ticker: &str, payload: &FetchPayload) -> usize {
        let Some(items) = payload.content.get("rows").and_then(|v| v.as_array()) else {
            return 0;
        };
        let rows: Vec<SupplyDemand> = items
            .iter()
            .filter_map(|item| {
                Some(SupplyDemand {
                    code: ticker.to_string(),
                    date: item.get("date")?.as_str()?.parse().ok()?,
                    foreign_net: item.get("foreign_net").and_then(|v| v.as_f64()).unwrap_or(0.0),
                    institution_net: item
                        .get("institution_net")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.0),
                    pension_net: item.get("pension_net").and_then(|v| v.as_f64()).unwrap_or(0.0),
                    individual_net: item
                        .get("individual_net")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.0),
                })
            })
            .collect();

        match self.db.supply().upsert(&rows).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(ticker, error = %e, "supply materialisation failed");
                0
            }
        }
    }

    async fn materialise_valuation(&self, ticker: &str, payload: &FetchPayload) -> usize {
        let c = &payload.content;
        let get = |key: &str| c.get(key).and_then(|v| v.as_f64());
        match self
            .db
            .valuations()
            .upsert(
                ticker,
                payload.data_date,
                get("per"),
                get("pbr"),
                get("roe"),
                get("debt_ratio"),
                get("market_cap"),
                get("trading_value"),
            )
            .await
        {
            Ok(()) => 1,
            Err(e) => {
                tracing::error!(ticker, error = %e, "valuation materialisation failed");
                0
            }
        }
    }

    async fn materialise_ticks(&self, ticker: &str, payload: &FetchPayload) -> usize {
        let Some(items) = payload.content.get("ticks").and_then(|v| v.as_array()) else {
            return 0;
        };
        let mut written = 0usize;
        for item in items {
            let Some(tick) = (|| {
                Some(Tick {
                    code: ticker.to_string(),
                    timestamp: item
                        .get("ts")?
                        .as_str()?
                        .parse::<DateTime<Utc>>()
                        .ok()?,
                    price: item.get("price")?.as_f64()?,
                    volume: item.get("volume").and_then(|v| v.as_f64()).unwrap_or(0.0),
                })
            })() else {
                continue;
            };
            match self.db.prices().insert_tick(&tick).await {
                Ok(()) => written += 1,
                Err(e) => tracing::error!(ticker, error = %e, "tick insert failed"),
            }
        }
        written
    }
}
