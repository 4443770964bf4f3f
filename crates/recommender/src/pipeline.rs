use std::sync::Arc;

use aegis_core::{
    AegisConfig, Analyser, AnalyserResult, AnalysisInput,
};
use aegis_db::Db;
use anyhow::Result;
use chrono::NaiveDate;
use fusion_engine::{classify_regime, FusedDecision, FusionEngine, RegimeRead};

use consensus_analysis::ConsensusAnalyser;
use disclosure_analysis::DisclosureAnalyser;
use fundamental_analysis::FundamentalAnalyser;
use market_context::MarketContextAnalyser;
use news_sentiment::NewsSentimentAnalyser;
use supply_demand_analysis::SupplyDemandAnalyser;
use technical_analysis::TechnicalAnalyser;

/// Issue code the index fetcher stores KOSPI composite bars under.
const INDEX_CODE: &str = "KOSPI";

/// Loads everything one ticker needs, runs the seven analysers and
/// fuses the outcome. A failed analyser logs and contributes weight
/// zero; it never aborts the ticker.
pub struct AnalysisPipeline {
    db: Db,
    config: Arc<AegisConfig>,
    analysers: Vec<Arc<dyn Analyser>>,
    fusion: FusionEngine,
}

pub struct TickerAnalysis {
    pub ticker: String,
    pub as_of: NaiveDate,
    pub results: Vec<AnalyserResult>,
    pub fused: FusedDecision,
    pub last_close: Option<f64>,
}

impl AnalysisPipeline {
    pub fn new(db: Db, config: Arc<AegisConfig>) -> Self {
        let analysers: Vec<Arc<dyn Analyser>> = vec![
            Arc::new(TechnicalAnalyser::new()),
            Arc::new(DisclosureAnalyser::new()),
            Arc::new(SupplyDemandAnalyser::new()),
            Arc::new(FundamentalAnalyser::new()),
            Arc::new(NewsSentimentAnalyser::default()),
            Arc::new(ConsensusAnalyser::new()),
            Arc::new(MarketContextAnalyser::new()),
        ];
        let fusion = FusionEngine::new(config.fusion.clone());
        Self {
            db,
            config,
            analysers,
            fusion,
        }
    }

    pub async fn build_input(&self, ticker: &str, as_of: NaiveDate) -> Result<AnalysisInput> {
        let mut input = AnalysisInput::new(ticker, as_of);
        input.bars = self.db.prices().recent_bars(ticker, as_of, 90).await?;
        input.ticks = self.db.prices().ticks_for_day(ticker, as_of).await?;
        input.supply = self.db.supply().recent(ticker, as_of, 20).await?;
        input.blobs = self.db.blobs().latest_all(ticker).await?;
        input.index_bars = self.db.prices().recent_bars(INDEX_CODE, as_of, 90).await?;
        input.market_snapshot = self.db.prices().latest_bars(as_of).await?;
        Ok(input)
    }

    pub async fn analyse(&self, ticker: &str, as_of: NaiveDate) -> Result<TickerAnalysis> {
        let input = self.build_input(ticker, as_of).await?;

        let mut results = Vec::with_capacity(self.analysers.len());
        for analyser in &self.analysers {
            match analyser.analyse(&input).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    // Weight-zero degradation: fusion renormalises
                    tracing::warn!(
                        ticker,
                        analyser = analyser.kind().as_str(),
                        error = %e,
                        "analyser failed, contributing nothing"
                    );
                }
            }
        }

        let regime = if input.index_bars.len() >= 60 {
            classify_regime(&input.index_bars, self.config.fusion.regime_band)
        } else {
            RegimeRead::unknown()
        };

        // Holding status feeds the bearish-market veto, which only
        // blocks opening new positions
        let is_held = self
            .db
            .holdings()
            .get(ticker)
            .await?
            .is_some_and(|h| h.quantity > 0.0);

        let liquidity = liquidity_5d(&input);
        let fused = self.fusion.fuse(&regime, &results, liquidity, is_held);

        Ok(TickerAnalysis {
            ticker: ticker.to_string(),
            as_of,
            last_close: input.bars.last().map(|b| b.close),
            results,
            fused,
        })
    }
}

/// 5-day average traded value (close × volume), the liquidity-veto input.
fn liquidity_5d(input: &AnalysisInput) -> Option<f64> {
    if input.bars.is_empty() {
        return None;
    }
    let tail = &input.bars[input.bars.len().saturating_sub(5)..];
    Some(tail.iter().map(|b| b.close * b.volume).sum::<f64>() / tail.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::DailyBar;

    #[tokio::test]
    async fn pipeline_degrades_to_neutral_on_empty_db() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let pipeline = AnalysisPipeline::new(db, Arc::new(AegisConfig::default()));

        let analysis = pipeline
            .analyse("005930", "2025-06-02".parse().unwrap())
            .await
            .unwrap();

        // Technical fails (no bars); blob-driven analysers return neutral
        assert!(analysis.results.len() >= 5);
        assert!(analysis.fused.final_score.abs() < 0.2);
    }

    #[tokio::test]
    async fn pipeline_scores_seeded_uptrend() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let bars: Vec<DailyBar> = (0..70)
            .map(|i| {
                let close = 10_000.0 + 80.0 * i as f64;
                DailyBar {
                    code: "005930".into(),
                    date: "2025-03-01".parse::<NaiveDate>().unwrap()
                        + chrono::Duration::days(i),
                    open: close * 0.995,
                    high: close * 1.015,
                    low: close * 0.985,
                    close,
                    volume: 500_000.0,
                }
            })
            .collect();
        db.prices().upsert_bars(&bars).await.unwrap();

        let pipeline = AnalysisPipeline::new(db, Arc::new(AegisConfig::default()));
        let analysis = pipeline
            .analyse("005930", "2025-05-09".parse().unwrap())
            .await
            .unwrap();

        assert!(analysis.last_close.is_some());
        assert!((-1.0..=1.0).contains(&analysis.fused.final_score));
        let technical = analysis
            .results
            .iter()
            .find(|r| r.kind == aegis_core::AnalyserKind::Technical)
            .expect("technical analyser ran");
        assert!(technical.score > 0.0);
    }
}
