use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::AnalyserKind;

/// Retry behaviour for transient fetch failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPreset {
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
    pub multiplier: f64,
}

impl RetryPreset {
    pub fn quick() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_secs: 0.5,
            multiplier: 1.5,
        }
    }

    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_secs: 1.0,
            multiplier: 2.0,
        }
    }

    pub fn persistent() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_secs: 2.0,
            multiplier: 2.0,
        }
    }

    /// Delay before attempt `attempt` (1-based; attempt 1 has no delay).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let secs = self.initial_delay_secs * self.multiplier.powi(attempt as i32 - 2);
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryPreset {
    fn default() -> Self {
        Self::standard()
    }
}

/// Orchestrator / fetcher tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Worker pool size within one tier
    pub concurrency: usize,
    /// Browser-tier subpool (memory-bound)
    pub tier4_concurrency: usize,
    /// Applied when the site registry leaves the rate unset
    pub default_rate_per_minute: u32,
    /// Per-attempt deadline
    pub attempt_timeout_secs: u64,
    pub retry: RetryPreset,
    /// Cool-down imposed on a site after a Blocked response
    pub blocked_cooldown_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            tier4_concurrency: 1,
            default_rate_per_minute: 60,
            attempt_timeout_secs: 30,
            retry: RetryPreset::standard(),
            blocked_cooldown_secs: 60,
        }
    }
}

/// Stage-1 / stage-2 screener bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    pub pbr_min: f64,
    pub pbr_max: f64,
    pub per_min: f64,
    pub per_max: f64,
    pub min_volume: f64,
    pub min_market_cap: f64,
    pub min_trading_value: f64,
    pub stage1_limit: usize,
    pub stage2_limit: usize,
    /// Quant score bucket weights, summing to 100
    pub weight_volume: f64,
    pub weight_trend: f64,
    pub weight_volatility: f64,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            pbr_min: 0.1,
            pbr_max: 1.5,
            per_min: 1.0,
            per_max: 20.0,
            min_volume: 50_000.0,
            min_market_cap: 5e10,
            min_trading_value: 5e9,
            stage1_limit: 300,
            stage2_limit: 100,
            weight_volume: 30.0,
            weight_trend: 40.0,
            weight_volatility: 30.0,
        }
    }
}

/// Market regime for weight selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Bull,
    Sideway,
    Bear,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Bull => "BULL",
            Regime::Sideway => "SIDEWAY",
            Regime::Bear => "BEAR",
        }
    }
}

/// Analyser weights for one regime. Normalised to sum 1 on construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeWeights {
    weights: HashMap<AnalyserKind, f64>,
}

impl RegimeWeights {
    pub fn new(pairs: &[(AnalyserKind, f64)]) -> Self {
        let total: f64 = pairs.iter().map(|(_, w)| w).sum();
        let weights = pairs
            .iter()
            .map(|(k, w)| (*k, if total > 0.0 { w / total } else { 0.0 }))
            .collect();
        Self { weights }
    }

    pub fn weight(&self, kind: AnalyserKind) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(0.0)
    }
}

/// Fusion thresholds and per-regime weight tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub bull: RegimeWeights,
    pub sideway: RegimeWeights,
    pub bear: RegimeWeights,
    /// MA20/MA60 band for regime classification (0.02 = 2%)
    pub regime_band: f64,
    /// 5-day average traded value below this blocks buys (KRW)
    pub min_traded_value: f64,
}

impl FusionConfig {
    pub fn weights_for(&self, regime: Regime) -> &RegimeWeights {
        match regime {
            Regime::Bull => &self.bull,
            Regime::Sideway => &self.sideway,
            Regime::Bear => &self.bear,
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        use AnalyserKind::*;
        Self {
            bull: RegimeWeights::new(&[
                (Technical, 0.25),
                (Disclosure, 0.10),
                (Supply, 0.20),
                (Fundamental, 0.05),
                (MarketContext, 0.15),
                (News, 0.15),
                (Consensus, 0.10),
            ]),
            sideway: RegimeWeights::new(&[
                (Technical, 0.20),
                (Disclosure, 0.15),
                (Supply, 0.20),
                (Fundamental, 0.10),
                (MarketContext, 0.10),
                (News, 0.15),
                (Consensus, 0.10),
            ]),
            bear: RegimeWeights::new(&[
                (Technical, 0.15),
                (Disclosure, 0.20),
                (Supply, 0.15),
                (Fundamental, 0.20),
                (MarketContext, 0.10),
                (News, 0.10),
                (Consensus, 0.10),
            ]),
            regime_band: 0.02,
            min_traded_value: 1e9,
        }
    }
}

/// Backtest risk management tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Cap on a single position as a fraction of capital
    pub max_capital_per_trade_pct: f64,
    /// Risk budget per trade as a fraction of capital
    pub risk_per_trade_pct: f64,
    /// Stop distance in ATR(14) multiples
    pub atr_stop_multiplier: f64,
    /// Fallback stop when ATR is unavailable
    pub fallback_stop_pct: f64,
    /// Daily cumulative loss that trips the circuit breaker
    pub daily_loss_halt_pct: f64,
    /// Trade count that trips the circuit breaker
    pub max_trades_per_day: u32,
    pub slippage_pct: f64,
    pub commission_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_capital_per_trade_pct: 0.20,
            risk_per_trade_pct: 0.02,
            atr_stop_multiplier: 2.0,
            fallback_stop_pct: 0.03,
            daily_loss_halt_pct: -0.02,
            max_trades_per_day: 10,
            slippage_pct: 0.0005,
            commission_pct: 0.00015,
        }
    }
}

/// Retrospective (LLM) pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetroConfig {
    pub call_interval_secs: u64,
    pub batch_limit: usize,
}

impl Default for RetroConfig {
    fn default() -> Self {
        Self {
            call_interval_secs: 2,
            batch_limit: 10,
        }
    }
}

/// Immutable configuration snapshot, loaded once at startup and shared by
/// Arc. There are no process-wide mutable globals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AegisConfig {
    pub fetch: FetchConfig,
    pub screener: ScreenerConfig,
    pub fusion: FusionConfig,
    pub risk: RiskConfig,
    pub retro: RetroConfig,
    /// Collector freshness window in seconds (skip re-fetch when younger)
    pub collector_freshness_secs: u64,
}

impl AegisConfig {
    /// Snapshot with env overrides for the handful of operational knobs.
    pub fn from_env() -> Self {
        let mut cfg = Self {
            collector_freshness_secs: 3600,
            ..Default::default()
        };
        if let Some(n) = env_parse::<usize>("AEGIS_CONCURRENCY") {
            cfg.fetch.concurrency = n.max(1);
        }
        if let Some(n) = env_parse::<u64>("AEGIS_FETCH_TIMEOUT_SECS") {
            cfg.fetch.attempt_timeout_secs = n;
        }
        if let Some(n) = env_parse::<u32>("AEGIS_DEFAULT_RATE_PER_MIN") {
            cfg.fetch.default_rate_per_minute = n.max(1);
        }
        if let Some(n) = env_parse::<u64>("AEGIS_COLLECT_FRESHNESS_SECS") {
            cfg.collector_freshness_secs = n;
        }
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_presets_match_documented_values() {
        let q = RetryPreset::quick();
        assert_eq!(q.max_attempts, 2);
        assert_eq!(q.delay_before(2), Duration::from_millis(500));

        let s = RetryPreset::standard();
        assert_eq!(s.max_attempts, 3);
        assert_eq!(s.delay_before(2), Duration::from_secs(1));
        assert_eq!(s.delay_before(3), Duration::from_secs(2));

        let p = RetryPreset::persistent();
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.delay_before(4), Duration::from_secs(8));
    }

    #[test]
    fn regime_weights_normalise_to_one() {
        let cfg = FusionConfig::default();
        for regime in [Regime::Bull, Regime::Sideway, Regime::Bear] {
            let sum: f64 = AnalyserKind::ALL
                .iter()
                .map(|k| cfg.weights_for(regime).weight(*k))
                .sum();
            assert!((sum - 1.0).abs() < 1e-9, "{regime:?} weights sum to {sum}");
        }
    }

    #[test]
    fn missing_analyser_gets_weight_zero() {
        let w = RegimeWeights::new(&[(AnalyserKind::Technical, 1.0)]);
        assert_eq!(w.weight(AnalyserKind::News), 0.0);
    }
}
