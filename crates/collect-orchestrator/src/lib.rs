//! Tier-ordered, concurrency-bounded collection scheduler.
//!
//! Tiers run strictly in ascending order so the fast, reliable sources
//! hydrate the cache before scraped and browser-driven ones start; within
//! a tier every (site, ticker) pair runs concurrently under a bounded
//! worker pool. Tier 4 is serialised to one in-flight browser.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::{AegisConfig, Site, Tier};
use aegis_db::Db;
use anyhow::{bail, Context, Result};
use fetcher_framework::{FetchExecutor, FetchOutcome, Fetcher};
use fetchers::FetcherFactory;
use rate_limiter::SiteRateLimiter;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Counts for one completed run.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub sites: usize,
    pub tasks: usize,
    pub succeeded: usize,
    pub not_found: usize,
    pub failed: usize,
    pub skipped_sites: usize,
    pub elapsed: Duration,
}

pub struct CollectOrchestrator {
    db: Db,
    limiter: Arc<SiteRateLimiter>,
    executor: Arc<FetchExecutor>,
    factory: FetcherFactory,
    config: Arc<AegisConfig>,
}

impl CollectOrchestrator {
    pub fn new(db: Db, config: Arc<AegisConfig>) -> Self {
        let limiter = Arc::new(SiteRateLimiter::new(config.fetch.default_rate_per_minute));
        let executor = Arc::new(FetchExecutor::new(
            db.clone(),
            Arc::clone(&limiter),
            Arc::clone(&config),
        ));
        Self {
            db,
            limiter,
            executor,
            factory: FetcherFactory::new(),
            config,
        }
    }

    /// Load active sites and resolve adapters, registering each site's
    /// rate with the shared limiter. Unknown sites are logged and skipped.
    async fn load_fleet(&self) -> Result<(Vec<(Site, Arc<dyn Fetcher>)>, usize)> {
        let sites = self
            .db
            .sites()
            .list_active()
            .await
            .context("loading site registry")?;

        let mut fleet: Vec<(Site, Arc<dyn Fetcher>)> = Vec::new();
        let mut skipped = 0usize;
        for site in sites {
            match self.factory.build(&site) {
                Some(fetcher) => {
                    self.limiter
                        .register(site.id, site.rate_limit_per_minute)
                        .await;
                    fleet.push((site, Arc::from(fetcher)));
                }
                None => {
                    tracing::info!(site = %site.name, "no adapter for site, skipping");
                    skipped += 1;
                }
            }
        }
        Ok((fleet, skipped))
    }

    /// One full pass over all tiers for the given tickers.
    pub async fn run(&self, tickers: &[String]) -> Result<RunSummary> {
        let started = std::time::Instant::now();
        let (fleet, skipped_sites) = self.load_fleet().await?;

        let mut by_tier: HashMap<Tier, Vec<(Site, Arc<dyn Fetcher>)>> = HashMap::new();
        for (site, fetcher) in fleet {
            by_tier.entry(site.tier).or_default().push((site, fetcher));
        }

        let mut summary = RunSummary {
            sites: by_tier.values().map(Vec::len).sum(),
            skipped_sites,
            ..Default::default()
        };

        for tier in Tier::ALL {
            let Some(members) = by_tier.get(&tier) else {
                continue;
            };

            let pool_size = if tier == Tier::Browser {
                self.config.fetch.tier4_concurrency
            } else {
                self.config.fetch.concurrency
            };
            let semaphore = Arc::new(Semaphore::new(pool_size.max(1)));
            let mut tasks: JoinSet<FetchOutcome> = JoinSet::new();

            tracing::info!(
                tier = tier.rank(),
                sites = members.len(),
                tickers = tickers.len(),
                workers = pool_size,
                "starting tier"
            );

            for (site, fetcher) in members {
                for ticker in tickers {
                    let site = site.clone();
                    let fetcher = Arc::clone(fetcher);
                    let executor = Arc::clone(&self.executor);
                    let semaphore = Arc::clone(&semaphore);
                    let ticker = ticker.clone();

                    tasks.spawn(async move {
                        let _permit = semaphore
                            .acquire()
                            .await
                            .expect("semaphore never closed");
                        executor.execute(&site, fetcher.as_ref(), &ticker).await
                    });
                }
            }

            // Tier barrier: drain every task before the next tier starts
            while let Some(joined) = tasks.join_next().await {
                summary.tasks += 1;
                match joined {
                    Ok(FetchOutcome::Success { .. }) => summary.succeeded += 1,
                    Ok(FetchOutcome::NotFound) => summary.not_found += 1,
                    Ok(FetchOutcome::Failed { .. }) => summary.failed += 1,
                    Err(e) => {
                        // A panicked task loses one (site, ticker) pair only
                        tracing::error!(error = %e, "fetch task panicked");
                        summary.failed += 1;
                    }
                }
            }
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            tasks = summary.tasks,
            ok = summary.succeeded,
            not_found = summary.not_found,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "collection run complete"
        );
        Ok(summary)
    }

    /// Fetch one (site, ticker) pair outside the tier machinery.
    pub async fn run_single(&self, site_id: i64, ticker: &str) -> Result<FetchOutcome> {
        let site = self
            .db
            .sites()
            .get(site_id)
            .await?
            .with_context(|| format!("site {site_id} not registered"))?;
        let Some(fetcher) = self.factory.build(&site) else {
            bail!("site {} has no adapter", site.name);
        };
        self.limiter
            .register(site.id, site.rate_limit_per_minute)
            .await;
        Ok(self.executor.execute(&site, fetcher.as_ref(), ticker).await)
    }

    /// Re-run collection every `interval`. A tick that fires while the
    /// previous run is still in flight is skipped, not queued, so a long
    /// outage cannot produce a thundering herd of catch-up runs.
    pub async fn schedule(
        &self,
        interval: Duration,
        tickers: Vec<String>,
        run_once: bool,
    ) -> Result<()> {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            timer.tick().await;
            if let Err(e) = self.run(&tickers).await {
                tracing::error!(error = %e, "scheduled run failed, continuing");
            }
            if run_once {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{FetchError, Tier};
    use async_trait::async_trait;
    use chrono::Utc;
    use fetcher_framework::{FetchPayload, FetcherDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records (tier, instant) per call so tier-barrier ordering and
    /// tier-4 serialisation can be asserted.
    struct ProbeFetcher {
        desc: FetcherDescriptor,
        log: Arc<Mutex<Vec<(u8, std::time::Instant)>>>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Fetcher for ProbeFetcher {
        fn descriptor(&self) -> &FetcherDescriptor {
            &self.desc
        }

        async fn fetch(&self, _ticker: &str) -> Result<FetchPayload, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.log
                .lock()
                .unwrap()
                .push((self.desc.tier.rank(), std::time::Instant::now()));
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(FetchPayload {
                data_type: "probe".into(),
                data_date: Utc::now().date_naive(),
                content: serde_json::json!({}),
            })
        }
    }

    struct ProbeHarness {
        executor: Arc<FetchExecutor>,
        log: Arc<Mutex<Vec<(u8, std::time::Instant)>>>,
        max_in_flight: Arc<AtomicUsize>,
    }

    async fn probe_harness(db: &Db) -> ProbeHarness {
        let config = Arc::new(AegisConfig::default());
        let limiter = Arc::new(SiteRateLimiter::new(60_000));
        ProbeHarness {
            executor: Arc::new(FetchExecutor::new(db.clone(), limiter, config)),
            log: Arc::new(Mutex::new(Vec::new())),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn probe(h: &ProbeHarness, site_id: i64, tier: Tier) -> (Site, Arc<dyn Fetcher>) {
        let site = Site {
            id: site_id,
            name: format!("probe-{site_id}"),
            tier,
            rate_limit_per_minute: Some(60_000),
            timeout_secs: None,
            is_active: true,
        };
        let fetcher: Arc<dyn Fetcher> = Arc::new(ProbeFetcher {
            desc: FetcherDescriptor::new(site_id, 1, "probe", tier),
            log: Arc::clone(&h.log),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::clone(&h.max_in_flight),
        });
        (site, fetcher)
    }

    /// Drives the same tier loop as `run` over injected probes.
    async fn drive(
        h: &ProbeHarness,
        fleet: Vec<(Site, Arc<dyn Fetcher>)>,
        tickers: &[String],
        tier4_pool: usize,
    ) {
        let mut by_tier: HashMap<Tier, Vec<(Site, Arc<dyn Fetcher>)>> = HashMap::new();
        for pair in fleet {
            by_tier.entry(pair.0.tier).or_default().push(pair);
        }
        for tier in Tier::ALL {
            let Some(members) = by_tier.get(&tier) else {
                continue;
            };
            let pool = if tier == Tier::Browser { tier4_pool } else { 10 };
            let semaphore = Arc::new(Semaphore::new(pool));
            let mut tasks = JoinSet::new();
            for (site, fetcher) in members {
                for ticker in tickers {
                    let (site, fetcher) = (site.clone(), Arc::clone(fetcher));
                    let executor = Arc::clone(&h.executor);
                    let semaphore = Arc::clone(&semaphore);
                    let ticker = ticker.clone();
                    tasks.spawn(async move {
                        let _permit = semaphore.acquire().await.unwrap();
                        executor.execute(&site, fetcher.as_ref(), &ticker).await
                    });
                }
            }
            while tasks.join_next().await.is_some() {}
        }
    }

    #[tokio::test]
    async fn tiers_run_in_strict_order() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let h = probe_harness(&db).await;
        let fleet = vec![
            probe(&h, 1, Tier::Official),
            probe(&h, 2, Tier::Api),
            probe(&h, 3, Tier::Scrape),
        ];
        let tickers: Vec<String> = vec!["005930".into(), "000660".into()];

        drive(&h, fleet, &tickers, 1).await;

        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 6);
        // No tier-k start may precede a tier-(k-1) start in the recorded order
        let tiers: Vec<u8> = log.iter().map(|(t, _)| *t).collect();
        let mut sorted = tiers.clone();
        sorted.sort_unstable();
        assert_eq!(tiers, sorted, "tier starts interleaved: {tiers:?}");
    }

    #[tokio::test]
    async fn browser_tier_is_serialised() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let h = probe_harness(&db).await;
        let fleet = vec![probe(&h, 40, Tier::Browser)];
        let tickers: Vec<String> = (0..5).map(|i| format!("00000{i}")).collect();

        drive(&h, fleet, &tickers, 1).await;

        assert_eq!(h.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
