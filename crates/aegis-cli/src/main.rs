//! aegis: Korean-equity analysis CLI.
//!
//! Usage:
//!   aegis register <code> [name]     Add a ticker to the master
//!   aegis trade "<free text>"        Import a trade journal line
//!   aegis analyse                    Analyse current holdings
//!   aegis recommend                  Run a recommendation batch
//!   aegis collect                    Start realtime collection (holdings)
//!   aegis auto                       20-minute scheduled full loop
//!
//! Exit codes: 0 success, 1 generic error, 2 invalid input,
//! 3 external dependency unavailable.

mod trade;

use std::sync::Arc;
use std::time::Duration;

use aegis_core::{AegisConfig, Market, Ticker};
use aegis_db::holdings::TradeSide;
use aegis_db::Db;
use chrono::{FixedOffset, NaiveDate, Utc};
use collect_orchestrator::CollectOrchestrator;
use recommender::{
    AnalysisPipeline, BatchRunner, Collector, GeminiClient, PriceTracker, RetrospectiveEngine,
    SlackNotifier,
};

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_INVALID: i32 = 2;
const EXIT_UNAVAILABLE: i32 = 3;

const AUTO_INTERVAL_MINS: u64 = 20;
const COLLECT_INTERVAL_SECS: u64 = 60;

fn kst_now() -> chrono::DateTime<FixedOffset> {
    Utc::now().with_timezone(&FixedOffset::east_opt(9 * 3600).unwrap())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aegis=info,recommender=info,collect_orchestrator=info".into()),
        )
        .init();

    std::process::exit(run().await);
}

async fn run() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(verb) = args.first() else {
        usage();
        return EXIT_INVALID;
    };

    let db = match Db::from_env().await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("database unavailable: {e}");
            return EXIT_UNAVAILABLE;
        }
    };
    let config = Arc::new(AegisConfig::from_env());

    // Keep the registry current on every invocation
    if let Err(e) = seed_registry(&db).await {
        eprintln!("site registry seed failed: {e}");
        return EXIT_UNAVAILABLE;
    }

    match verb.as_str() {
        "register" => cmd_register(&db, &args[1..]).await,
        "trade" => cmd_trade(&db, &args[1..]).await,
        "analyse" | "analyze" => cmd_analyse(&db, config).await,
        "recommend" => cmd_recommend(&db, config).await,
        "collect" => cmd_collect(&db, config).await,
        "auto" => cmd_auto(&db, config).await,
        _ => {
            usage();
            EXIT_INVALID
        }
    }
}

fn usage() {
    eprintln!("Usage:");
    eprintln!("  aegis register <code> [name]");
    eprintln!("  aegis trade \"<free text>\"");
    eprintln!("  aegis analyse");
    eprintln!("  aegis recommend");
    eprintln!("  aegis collect");
    eprintln!("  aegis auto");
}

async fn seed_registry(db: &Db) -> Result<(), aegis_db::PersistenceError> {
    for site in fetchers::default_sites() {
        db.sites().upsert_site(&site).await?;
    }
    Ok(())
}

async fn cmd_register(db: &Db, args: &[String]) -> i32 {
    let Some(code) = args.first() else {
        eprintln!("register needs a 6-digit code");
        return EXIT_INVALID;
    };
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        eprintln!("'{code}' is not a 6-digit issue code");
        return EXIT_INVALID;
    }

    let ticker = Ticker {
        code: code.clone(),
        name: args.get(1).cloned().unwrap_or_else(|| code.clone()),
        market: Market::Kospi,
        sector: None,
        is_delisted: false,
    };
    match db.tickers().upsert(&ticker).await {
        Ok(()) => {
            println!("registered {} ({})", ticker.code, ticker.name);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("register failed: {e}");
            EXIT_ERROR
        }
    }
}

async fn cmd_trade(db: &Db, args: &[String]) -> i32 {
    let text = args.join(" ");
    let Some(parsed) = trade::parse_trade(&text) else {
        eprintln!("could not parse a trade from: {text}");
        return EXIT_INVALID;
    };

    // Resolve a name to its issue code via the ticker master
    let code = if parsed.is_code {
        parsed.instrument.clone()
    } else {
        let listed = match db.tickers().list_active().await {
            Ok(listed) => listed,
            Err(e) => {
                eprintln!("ticker lookup failed: {e}");
                return EXIT_ERROR;
            }
        };
        match listed.iter().find(|t| t.name == parsed.instrument) {
            Some(t) => t.code.clone(),
            None => {
                eprintln!("unknown instrument '{}'; register it first", parsed.instrument);
                return EXIT_INVALID;
            }
        }
    };

    match db
        .holdings()
        .apply_trade(&code, parsed.side, parsed.quantity, parsed.price)
        .await
    {
        Ok(holding) => {
            let side = match parsed.side {
                TradeSide::Buy => "bought",
                TradeSide::Sell => "sold",
            };
            println!(
                "{side} {} x{} @ {:.0} → position {} @ avg {:.0}",
                code, parsed.quantity, parsed.price, holding.quantity, holding.avg_buy_price
            );
            EXIT_OK
        }
        Err(e) => {
            eprintln!("trade import failed: {e}");
            EXIT_ERROR
        }
    }
}

async fn cmd_analyse(db: &Db, config: Arc<AegisConfig>) -> i32 {
    let holdings = match db.holdings().list().await {
        Ok(h) => h,
        Err(e) => {
            eprintln!("holdings unavailable: {e}");
            return EXIT_ERROR;
        }
    };
    if holdings.is_empty() {
        println!("no holdings to analyse");
        return EXIT_OK;
    }

    let pipeline = AnalysisPipeline::new(db.clone(), config);
    let as_of = kst_now().date_naive();
    let mut failures = 0usize;

    for holding in &holdings {
        match pipeline.analyse(&holding.code, as_of).await {
            Ok(analysis) => {
                println!(
                    "{}: {} (score {:+.2}, regime {}, confidence {:.0}%)",
                    holding.code,
                    analysis.fused.decision.as_str(),
                    analysis.fused.final_score,
                    analysis.fused.regime.as_str(),
                    analysis.fused.confidence * 100.0,
                );
                for veto in &analysis.fused.vetoes {
                    println!("  veto: {}", veto.as_str());
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: analysis failed: {e}", holding.code);
            }
        }
    }

    if failures == holdings.len() {
        EXIT_ERROR
    } else {
        EXIT_OK
    }
}

async fn cmd_recommend(db: &Db, config: Arc<AegisConfig>) -> i32 {
    let orchestrator = Arc::new(CollectOrchestrator::new(db.clone(), Arc::clone(&config)));
    let collector = Collector::new(
        db.clone(),
        Arc::clone(&orchestrator),
        config.collector_freshness_secs,
    );
    let runner = BatchRunner::new(db.clone(), Arc::clone(&config), collector);

    match runner.run(kst_now().date_naive()).await {
        Ok(summary) => {
            println!(
                "batch {}: {} screened, {} analysed, {} recommended",
                summary.batch_id, summary.screened, summary.analysed, summary.recommended
            );
            let notifier = SlackNotifier::from_env();
            let _ = notifier
                .send(&format!(
                    "AEGIS batch {}: {} recommendations",
                    summary.batch_id, summary.recommended
                ))
                .await;
            EXIT_OK
        }
        Err(e) => {
            eprintln!("recommendation batch failed: {e}");
            EXIT_ERROR
        }
    }
}

async fn cmd_collect(db: &Db, config: Arc<AegisConfig>) -> i32 {
    let holdings = match db.holdings().list().await {
        Ok(h) => h,
        Err(e) => {
            eprintln!("holdings unavailable: {e}");
            return EXIT_ERROR;
        }
    };
    let tickers: Vec<String> = if holdings.is_empty() {
        match db.tickers().list_active().await {
            Ok(listed) => listed.into_iter().map(|t| t.code).collect(),
            Err(e) => {
                eprintln!("universe unavailable: {e}");
                return EXIT_ERROR;
            }
        }
    } else {
        holdings.into_iter().map(|h| h.code).collect()
    };

    if tickers.is_empty() {
        eprintln!("nothing to collect; register tickers first");
        return EXIT_INVALID;
    }

    println!("realtime collection over {} tickers (Ctrl-C to stop)", tickers.len());
    let orchestrator = CollectOrchestrator::new(db.clone(), config);
    match orchestrator
        .schedule(Duration::from_secs(COLLECT_INTERVAL_SECS), tickers, false)
        .await
    {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("collection loop failed: {e}");
            EXIT_ERROR
        }
    }
}

async fn cmd_auto(db: &Db, config: Arc<AegisConfig>) -> i32 {
    let orchestrator = Arc::new(CollectOrchestrator::new(db.clone(), Arc::clone(&config)));
    let tracker = PriceTracker::new(db.clone());
    let mut last_evening_run: Option<NaiveDate> = None;

    println!("auto mode: full loop every {AUTO_INTERVAL_MINS} minutes");
    let mut timer = tokio::time::interval(Duration::from_secs(AUTO_INTERVAL_MINS * 60));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        timer.tick().await;

        let universe: Vec<String> = match db.tickers().list_active().await {
            Ok(listed) => listed.into_iter().map(|t| t.code).collect(),
            Err(e) => {
                eprintln!("universe unavailable: {e}");
                return EXIT_ERROR;
            }
        };
        if let Err(e) = orchestrator.run(&universe).await {
            tracing::error!(error = %e, "scheduled collection failed, continuing");
        }

        // Surface sources that are limping
        if let Ok(report) = db.sites().health_report().await {
            for (name, health) in report {
                if health.status != aegis_core::HealthStatus::Active {
                    tracing::warn!(
                        site = %name,
                        status = health.status.as_str(),
                        failures = health.consecutive_failures,
                        avg_latency_ms = health.avg_latency_ms,
                        "unhealthy source"
                    );
                }
            }
        }

        // Evening duties once per day after the 18:00 KST close
        let now = kst_now();
        let today = now.date_naive();
        if now.time() >= chrono::NaiveTime::from_hms_opt(18, 0, 0).unwrap()
            && last_evening_run != Some(today)
        {
            last_evening_run = Some(today);

            match tracker.track(today).await {
                Ok(summary) => tracing::info!(
                    checked = summary.checked,
                    written = summary.written,
                    failed = summary.failed_status,
                    "performance tracking done"
                ),
                Err(e) => tracing::error!(error = %e, "performance tracking failed"),
            }

            if let Some(gemini) = GeminiClient::from_env() {
                let retro = RetrospectiveEngine::new(
                    db.clone(),
                    Box::new(gemini),
                    config.retro.clone(),
                );
                match retro.run().await {
                    Ok(summary) => tracing::info!(
                        written = summary.written,
                        ai_errors = summary.ai_errors,
                        "retrospectives done"
                    ),
                    Err(e) => tracing::error!(error = %e, "retrospective run failed"),
                }
            }

            // Ticks older than a month are pruned once a day
            let cutoff = Utc::now() - chrono::Duration::days(31);
            match db.prices().prune_ticks(cutoff).await {
                Ok(n) if n > 0 => tracing::info!(pruned = n, "old ticks pruned"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "tick pruning failed"),
            }
        }
    }
}
