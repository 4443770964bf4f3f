pub mod regime;

pub use regime::{classify_regime, RegimeRead};

use aegis_core::{
    AnalyserKind, AnalyserResult, FusionConfig, Regime, Signal,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Veto rules in precedence order; the first triggered rule decides how
/// the aggregate outcome is overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Veto {
    /// Halt-trigger disclosure: forced exit regardless of score
    TradingHalt,
    /// Fundamental grade danger: buys blocked
    DangerFundamental,
    /// Market mood strong_bearish: new buys blocked
    BearishMarket,
    /// 5-day average traded value under the liquidity floor: buys blocked
    Illiquid,
}

impl Veto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Veto::TradingHalt => "trading_halt",
            Veto::DangerFundamental => "danger_fundamental",
            Veto::BearishMarket => "bearish_market",
            Veto::Illiquid => "illiquid",
        }
    }
}

/// Final outcome after weighting and veto evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
    ForceSell,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::StrongBuy => "STRONG_BUY",
            Decision::Buy => "BUY",
            Decision::Hold => "HOLD",
            Decision::Sell => "SELL",
            Decision::StrongSell => "STRONG_SELL",
            Decision::ForceSell => "FORCE_SELL",
        }
    }

    fn from_signal(signal: Signal) -> Self {
        match signal {
            Signal::StrongBuy => Decision::StrongBuy,
            Signal::Buy => Decision::Buy,
            Signal::Hold => Decision::Hold,
            Signal::Sell => Decision::Sell,
            Signal::StrongSell => Decision::StrongSell,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Decision::StrongBuy | Decision::Buy)
    }
}

#[derive(Debug, Clone)]
pub struct FusedDecision {
    pub regime: Regime,
    pub regime_confidence: f64,
    /// Weighted score in [-1, +1]
    pub final_score: f64,
    pub decision: Decision,
    pub vetoes: Vec<Veto>,
    /// Per-analyser breakdown for the recommendation record
    pub contributions: serde_json::Value,
    /// Mean absolute analyser agreement, used as confidence
    pub confidence: f64,
}

/// Combines analyser results under regime weights, then applies vetoes.
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Analyser score in [-2,2] → normalised contribution in [-1,1].
    fn normalise(score: f64) -> f64 {
        (score / 2.0).clamp(-1.0, 1.0)
    }

    /// `liquidity_5d` is the 5-day average traded value in KRW; `None`
    /// when unknown (treated as liquid — missing data is not a veto).
    /// `is_held` marks a ticker already in the portfolio: the bearish-
    /// market veto blocks NEW buys only, so adds to an existing holding
    /// pass through it (the other buy vetoes apply regardless).
    pub fn fuse(
        &self,
        regime: &RegimeRead,
        results: &[AnalyserResult],
        liquidity_5d: Option<f64>,
        is_held: bool,
    ) -> FusedDecision {
        let weights = self.config.weights_for(regime.regime);

        // Missing analysers simply contribute weight zero; the present
        // weights are re-normalised so one failure does not bias the rest.
        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        let mut contributions = serde_json::Map::new();
        let mut agreement = 0.0;

        for result in results {
            let weight = weights.weight(result.kind);
            let normalised = Self::normalise(result.score);
            weighted += weight * normalised;
            weight_sum += weight;
            agreement += normalised.abs() * weight;
            contributions.insert(
                result.kind.as_str().to_string(),
                json!({
                    "score": result.score,
                    "normalised": normalised,
                    "weight": weight,
                    "grade": result.grade.as_str(),
                }),
            );
        }

        let final_score = if weight_sum > 0.0 {
            (weighted / weight_sum).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let confidence = if weight_sum > 0.0 {
            (agreement / weight_sum).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let signal = Signal::from_fused_score(final_score);
        let mut vetoes = Vec::new();

        if results.iter().any(|r| r.flags.trading_halt) {
            vetoes.push(Veto::TradingHalt);
        }
        if results.iter().any(|r| {
            r.kind == AnalyserKind::Fundamental
                && (r.grade == aegis_core::ScoreGrade::Danger || !r.flags.pass_filter)
        }) {
            vetoes.push(Veto::DangerFundamental);
        }
        if results.iter().any(|r| {
            r.kind == AnalyserKind::MarketContext
                && r.metrics.get("mood").and_then(|v| v.as_str()) == Some("strong_bearish")
        }) {
            vetoes.push(Veto::BearishMarket);
        }
        if liquidity_5d.is_some_and(|v| v < self.config.min_traded_value) {
            vetoes.push(Veto::Illiquid);
        }

        // First applicable veto in precedence order decides the override
        let mut decision = Decision::from_signal(signal);
        for veto in &vetoes {
            match veto {
                Veto::TradingHalt => {
                    decision = Decision::ForceSell;
                    break;
                }
                Veto::BearishMarket if is_held => continue,
                _ if decision.is_buy() => {
                    decision = Decision::Hold;
                    break;
                }
                _ => {}
            }
        }

        if !vetoes.is_empty() {
            tracing::info!(
                vetoes = ?vetoes.iter().map(Veto::as_str).collect::<Vec<_>>(),
                score = final_score,
                decision = decision.as_str(),
                "veto applied"
            );
        }

        FusedDecision {
            regime: regime.regime,
            regime_confidence: regime.confidence,
            final_score,
            decision,
            vetoes,
            contributions: serde_json::Value::Object(contributions),
            confidence,
        }
    }
}
