//! Analyst-consensus momentum scorer.
//!
//! Reads the current consensus blob and, when present, a prior snapshot
//! (`consensus_prev`) to detect target-price revisions. Upside to the
//! average target and revision direction drive the score; breadth of
//! coverage scales confidence in both directions.

use aegis_core::{
    Analyser, AnalyserKind, AnalyserResult, AnalysisError, AnalysisInput,
};
use async_trait::async_trait;
use serde_json::json;

pub struct ConsensusAnalyser;

impl ConsensusAnalyser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsensusAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

fn f64_field(blob: &serde_json::Value, key: &str) -> Option<f64> {
    blob.get(key).and_then(|v| v.as_f64())
}

#[async_trait]
impl Analyser for ConsensusAnalyser {
    fn kind(&self) -> AnalyserKind {
        AnalyserKind::Consensus
    }

    async fn analyse(&self, input: &AnalysisInput) -> Result<AnalyserResult, AnalysisError> {
        let Some(blob) = input.blob("consensus") else {
            let mut result =
                AnalyserResult::new(AnalyserKind::Consensus, 0.0, "no analyst coverage");
            result.metrics = json!({"covering_firms": 0});
            return Ok(result);
        };

        let target = f64_field(blob, "avg_target_price");
        let buy_count = f64_field(blob, "buy_count").unwrap_or(0.0);
        let hold_count = f64_field(blob, "hold_count").unwrap_or(0.0);
        let sell_count = f64_field(blob, "sell_count").unwrap_or(0.0);
        let opinion = f64_field(blob, "opinion_score");
        let covering = buy_count + hold_count + sell_count;

        let current_price = input.bars.last().map(|b| b.close);

        let mut score: f64 = 0.0;
        let mut events = Vec::new();

        // Upside to average target
        if let (Some(target), Some(price)) = (target, current_price) {
            if price > 0.0 {
                let upside = (target - price) / price;
                if upside >= 0.30 {
                    score += 1.0;
                    events.push(format!("목표가 괴리 {:.0}%", upside * 100.0));
                } else if upside >= 0.10 {
                    score += 0.5;
                    events.push(format!("목표가 괴리 {:.0}%", upside * 100.0));
                } else if upside < -0.05 {
                    score -= 0.5;
                    events.push("현재가가 목표가 상회".to_string());
                }
            }
        }

        // Revision vs. prior snapshot
        if let Some(prev) = input.blob("consensus_prev") {
            if let (Some(now), Some(before)) = (target, f64_field(prev, "avg_target_price")) {
                if before > 0.0 {
                    let change = (now - before) / before;
                    if change >= 0.03 {
                        score += 0.5;
                        events.push(format!("목표가 상향 {:+.1}%", change * 100.0));
                    } else if change <= -0.03 {
                        score -= 0.5;
                        events.push(format!("목표가 하향 {:+.1}%", change * 100.0));
                    }
                }
            }
        }

        // Opinion balance (counts when available, else the 1..5 score)
        if covering > 0.0 {
            let balance = (buy_count - sell_count) / covering;
            score += balance * 0.5;
        } else if let Some(op) = opinion {
            // FnGuide scale: 3 is neutral
            score += ((op - 3.0) / 2.0) * 0.5;
        }

        // Thin coverage mutes the signal
        if covering > 0.0 && covering < 3.0 {
            score *= 0.5;
            events.push(format!("커버리지 {covering:.0}개사"));
        }

        let score = score.clamp(-2.0, 2.0);
        let mut result = AnalyserResult::new(
            AnalyserKind::Consensus,
            score,
            format!("{covering:.0} covering firms"),
        );
        result.key_events = events;
        result.metrics = json!({
            "avg_target_price": target,
            "covering_firms": covering,
            "buy_count": buy_count,
            "sell_count": sell_count,
            "opinion_score": opinion,
        });
        Ok(result)
    }
}
