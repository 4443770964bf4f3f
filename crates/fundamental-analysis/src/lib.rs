//! Fundamental grading on ROE, PER, PBR and debt ratio from the latest
//! collected valuation blob. A debt ratio above 300% fails the hard
//! filter (`pass_filter = false`), which blocks buys downstream.

use aegis_core::{
    Analyser, AnalyserKind, AnalyserResult, AnalysisError, AnalysisInput,
};
use async_trait::async_trait;
use serde_json::json;

const DEBT_HARD_LIMIT: f64 = 300.0;

pub struct FundamentalAnalyser;

impl FundamentalAnalyser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FundamentalAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyser for FundamentalAnalyser {
    fn kind(&self) -> AnalyserKind {
        AnalyserKind::Fundamental
    }

    async fn analyse(&self, input: &AnalysisInput) -> Result<AnalyserResult, AnalysisError> {
        let Some(blob) = input.blob("valuation") else {
            let mut result =
                AnalyserResult::new(AnalyserKind::Fundamental, 0.0, "no valuation collected");
            result.metrics = json!({});
            return Ok(result);
        };

        let get = |key: &str| blob.get(key).and_then(|v| v.as_f64());
        let roe = get("roe");
        let per = get("per");
        let pbr = get("pbr");
        let debt_ratio = get("debt_ratio");

        let mut score: f64 = 0.0;
        let mut events = Vec::new();

        if let Some(roe) = roe {
            if roe >= 15.0 {
                score += 0.5;
                events.push(format!("ROE {roe:.1}%"));
            } else if roe < 0.0 {
                score -= 0.5;
                events.push(format!("적자 (ROE {roe:.1}%)"));
            }
        }
        if let Some(per) = per {
            if per > 0.0 && per < 10.0 {
                score += 0.2;
                events.push(format!("PER {per:.1}"));
            } else if per > 40.0 {
                score -= 0.2;
            }
        }
        if let Some(pbr) = pbr {
            if pbr > 0.0 && pbr < 1.0 {
                score += 0.2;
                events.push(format!("PBR {pbr:.2}"));
            }
        }

        let mut pass_filter = true;
        if let Some(debt) = debt_ratio {
            if debt > DEBT_HARD_LIMIT {
                pass_filter = false;
                score -= 1.5;
                events.push(format!("부채비율 {debt:.0}% (한도 {DEBT_HARD_LIMIT:.0}%)"));
            } else if debt > 200.0 {
                score -= 0.5;
                events.push(format!("부채비율 {debt:.0}%"));
            }
        }

        let score = score.clamp(-2.0, 2.0);
        let notes = if pass_filter {
            "valuation grade".to_string()
        } else {
            "debt ratio exceeds hard limit".to_string()
        };

        let mut result = AnalyserResult::new(AnalyserKind::Fundamental, score, notes);
        result.flags.pass_filter = pass_filter;
        result.key_events = events;
        result.metrics = json!({
            "roe": roe,
            "per": per,
            "pbr": pbr,
            "debt_ratio": debt_ratio,
            "pass_filter": pass_filter,
        });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input_with_valuation(v: serde_json::Value) -> AnalysisInput {
        let mut input = AnalysisInput::new("005930", "2025-06-02".parse().unwrap());
        input.blobs.insert("valuation".into(), v);
        input
    }

    #[tokio::test]
    async fn quality_value_stock_scores_up() {
        let input = input_with_valuation(json!({
            "roe": 18.0, "per": 8.0, "pbr": 0.8, "debt_ratio": 60.0
        }));
        let r = FundamentalAnalyser::new().analyse(&input).await.unwrap();
        assert!((r.score - 0.9).abs() < 1e-9);
        assert!(r.flags.pass_filter);
    }

    #[tokio::test]
    async fn excessive_debt_fails_hard_filter() {
        let input = input_with_valuation(json!({
            "roe": 20.0, "per": 5.0, "pbr": 0.5, "debt_ratio": 450.0
        }));
        let r = FundamentalAnalyser::new().analyse(&input).await.unwrap();
        assert!(!r.flags.pass_filter);
        assert!(r.score < 0.0);
    }

    #[tokio::test]
    async fn missing_fields_are_tolerated() {
        let input = input_with_valuation(json!({"per": 7.5}));
        let r = FundamentalAnalyser::new().analyse(&input).await.unwrap();
        assert!((r.score - 0.2).abs() < 1e-9);
        assert!(r.flags.pass_filter);
    }
}
