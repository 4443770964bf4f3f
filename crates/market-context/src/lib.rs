//! Market-wide context scorer, independent of the analysed ticker.
//!
//! Computes market breadth (ADR = advancers / decliners) and an index
//! trend read, folds them into a five-level mood, and caches the result
//! for five minutes — every ticker in a batch shares one computation.

use aegis_core::{
    Analyser, AnalyserKind, AnalyserResult, AnalysisError, AnalysisInput, DailyBar,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

const CACHE_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketMood {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

impl MarketMood {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMood::StrongBullish => "strong_bullish",
            MarketMood::Bullish => "bullish",
            MarketMood::Neutral => "neutral",
            MarketMood::Bearish => "bearish",
            MarketMood::StrongBearish => "strong_bearish",
        }
    }

    fn score(&self) -> f64 {
        match self {
            MarketMood::StrongBullish => 2.0,
            MarketMood::Bullish => 1.0,
            MarketMood::Neutral => 0.0,
            MarketMood::Bearish => -1.0,
            MarketMood::StrongBearish => -2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub mood: MarketMood,
    pub adr: f64,
    pub index_return_5d: f64,
    pub advancers: usize,
    pub decliners: usize,
    pub computed_at: DateTime<Utc>,
}

struct CacheEntry {
    snapshot: MarketSnapshot,
    cached_at: DateTime<Utc>,
}

pub struct MarketContextAnalyser {
    cache: DashMap<String, CacheEntry>,
}

impl MarketContextAnalyser {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Breadth over the latest two sessions of every active ticker's bars.
    fn compute(index_bars: &[DailyBar], market_snapshot: &[DailyBar]) -> MarketSnapshot {
        let mut advancers = 0usize;
        let mut decliners = 0usize;
        for bar in market_snapshot {
            if bar.close > bar.open {
                advancers += 1;
            } else if bar.close < bar.open {
                decliners += 1;
            }
        }
        let adr = if decliners == 0 {
            advancers.max(1) as f64
        } else {
            advancers as f64 / decliners as f64
        };

        let index_return_5d = if index_bars.len() >= 6 {
            let last = index_bars[index_bars.len() - 1].close;
            let prior = index_bars[index_bars.len() - 6].close;
            if prior > 0.0 {
                (last - prior) / prior
            } else {
                0.0
            }
        } else {
            0.0
        };

        let mood = match (adr, index_return_5d) {
            (a, r) if a >= 2.0 && r >= 0.02 => MarketMood::StrongBullish,
            (a, r) if a >= 1.2 && r >= 0.0 => MarketMood::Bullish,
            (a, r) if a <= 0.5 && r <= -0.02 => MarketMood::StrongBearish,
            (a, r) if a <= 0.8 || r <= -0.01 => MarketMood::Bearish,
            _ => MarketMood::Neutral,
        };

        MarketSnapshot {
            mood,
            adr,
            index_return_5d,
            advancers,
            decliners,
            computed_at: Utc::now(),
        }
    }

    pub fn snapshot(&self, input: &AnalysisInput) -> MarketSnapshot {
        let key = input.as_of.to_string();
        if let Some(entry) = self.cache.get(&key) {
            if (Utc::now() - entry.cached_at).num_seconds() < CACHE_TTL_SECS {
                return entry.snapshot.clone();
            }
        }

        let snapshot = Self::compute(&input.index_bars, &input.market_snapshot);
        self.cache.insert(
            key,
            CacheEntry {
                snapshot: snapshot.clone(),
                cached_at: Utc::now(),
            },
        );
        snapshot
    }
}

impl Default for MarketContextAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyser for MarketContextAnalyser {
    fn kind(&self) -> AnalyserKind {
        AnalyserKind::MarketContext
    }

    async fn analyse(&self, input: &AnalysisInput) -> Result<AnalyserResult, AnalysisError> {
        if input.index_bars.is_empty() && input.market_snapshot.is_empty() {
            let mut result =
                AnalyserResult::new(AnalyserKind::MarketContext, 0.0, "no market data");
            result.metrics = json!({"mood": MarketMood::Neutral.as_str()});
            return Ok(result);
        }

        let snapshot = self.snapshot(input);

        let mut result = AnalyserResult::new(
            AnalyserKind::MarketContext,
            snapshot.mood.score(),
            format!(
                "{} (ADR {:.2}, index 5d {:+.1}%)",
                snapshot.mood.as_str(),
                snapshot.adr,
                snapshot.index_return_5d * 100.0
            ),
        );
        result.metrics = json!({
            "mood": snapshot.mood.as_str(),
            "adr": snapshot.adr,
            "advancers": snapshot.advancers,
            "decliners": snapshot.decliners,
            "index_return_5d": snapshot.index_return_5d,
        });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(code: &str, day: u32, open: f64, close: f64) -> DailyBar {
        DailyBar {
            code: code.into(),
            date: NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
            open,
            high: open.max(close) * 1.01,
            low: open.min(close) * 0.99,
            close,
            volume: 1_000_000.0,
        }
    }

    fn rising_index() -> Vec<DailyBar> {
        (1..=10)
            .map(|i| bar("KOSPI", i, 2600.0 + i as f64 * 12.0, 2606.0 + i as f64 * 12.0))
            .collect()
    }

    #[tokio::test]
    async fn broad_rally_reads_strong_bullish() {
        let mut input = AnalysisInput::new("005930", "2025-06-10".parse().unwrap());
        input.index_bars = rising_index();
        input.market_snapshot = (0..30)
            .map(|i| bar(&format!("{i:06}"), 10, 100.0, if i < 25 { 105.0 } else { 95.0 }))
            .collect();

        let r = MarketContextAnalyser::new().analyse(&input).await.unwrap();
        assert_eq!(r.score, 2.0);
        assert_eq!(r.metrics["mood"], "strong_bullish");
    }

    #[tokio::test]
    async fn broad_selloff_reads_strong_bearish() {
        let mut input = AnalysisInput::new("005930", "2025-06-10".parse().unwrap());
        input.index_bars = (1..=10)
            .map(|i| bar("KOSPI", i, 2700.0 - i as f64 * 15.0, 2690.0 - i as f64 * 15.0))
            .collect();
        input.market_snapshot = (0..30)
            .map(|i| bar(&format!("{i:06}"), 10, 100.0, if i < 25 { 95.0 } else { 105.0 }))
            .collect();

        let r = MarketContextAnalyser::new().analyse(&input).await.unwrap();
        assert_eq!(r.metrics["mood"], "strong_bearish");
    }

    #[tokio::test]
    async fn snapshot_is_cached_within_ttl() {
        let analyser = MarketContextAnalyser::new();
        let mut input = AnalysisInput::new("005930", "2025-06-10".parse().unwrap());
        input.index_bars = rising_index();
        input.market_snapshot = vec![bar("000001", 10, 100.0, 105.0)];

        let first = analyser.snapshot(&input);

        // Mutating the input does not change the cached snapshot
        input.market_snapshot = vec![bar("000001", 10, 100.0, 90.0)];
        let second = analyser.snapshot(&input);
        assert_eq!(first.computed_at, second.computed_at);
        assert_eq!(first.advancers, second.advancers);
    }
}
