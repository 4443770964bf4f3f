//! Institutional / foreign flow scorer.
//!
//! Net-buy amounts over the recent window translate into a signed score
//! with a dual-buy pattern bonus (both groups net-positive on the latest
//! day), a streak bonus (three or more consecutive net-buy days), and a
//! dual-sell penalty.

use aegis_core::{
    Analyser, AnalyserKind, AnalyserResult, AnalysisError, AnalysisInput, SupplyDemand,
};
use async_trait::async_trait;
use serde_json::json;

pub struct SupplyDemandAnalyser;

impl SupplyDemandAnalyser {
    pub fn new() -> Self {
        Self
    }

    fn streak(rows: &[SupplyDemand], pick: fn(&SupplyDemand) -> f64) -> usize {
        rows.iter().rev().take_while(|r| pick(r) > 0.0).count()
    }
}

impl Default for SupplyDemandAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyser for SupplyDemandAnalyser {
    fn kind(&self) -> AnalyserKind {
        AnalyserKind::Supply
    }

    async fn analyse(&self, input: &AnalysisInput) -> Result<AnalyserResult, AnalysisError> {
        let rows = &input.supply;
        if rows.is_empty() {
            let mut result =
                AnalyserResult::new(AnalyserKind::Supply, 0.0, "no supply/demand rows");
            result.metrics = json!({"days": 0});
            return Ok(result);
        }

        let latest = rows.last().unwrap();
        let total_foreign: f64 = rows.iter().map(|r| r.foreign_net).sum();
        let total_inst: f64 = rows.iter().map(|r| r.institution_net).sum();

        let mut score: f64 = 0.0;
        let mut events = Vec::new();

        // Window aggregates, half a point each
        if total_foreign > 0.0 {
            score += 0.5;
            events.push(format!("외국인 순매수 {:.0}억", total_foreign / 1e8));
        } else if total_foreign < 0.0 {
            score -= 0.5;
        }
        if total_inst > 0.0 {
            score += 0.5;
            events.push(format!("기관 순매수 {:.0}억", total_inst / 1e8));
        } else if total_inst < 0.0 {
            score -= 0.5;
        }

        // Same-day dual buy / dual sell
        if latest.foreign_net > 0.0 && latest.institution_net > 0.0 {
            score += 1.0;
            events.push("외국인·기관 동반 순매수".to_string());
        } else if latest.foreign_net < 0.0 && latest.institution_net < 0.0 {
            score -= 1.0;
            events.push("외국인·기관 동반 순매도".to_string());
        }

        // Streak bonus: three or more consecutive net-buy days by either group
        let foreign_streak = Self::streak(rows, |r| r.foreign_net);
        let inst_streak = Self::streak(rows, |r| r.institution_net);
        if foreign_streak >= 3 || inst_streak >= 3 {
            score += 0.5;
            events.push(format!(
                "연속 순매수 (외국인 {foreign_streak}일 / 기관 {inst_streak}일)"
            ));
        }

        let score = score.clamp(-2.0, 2.0);
        let mut result = AnalyserResult::new(
            AnalyserKind::Supply,
            score,
            format!("{}-day flow window", rows.len()),
        );
        result.key_events = events;
        result.metrics = json!({
            "days": rows.len(),
            "total_foreign_net": total_foreign,
            "total_institution_net": total_inst,
            "latest_pension_net": latest.pension_net,
            "foreign_streak": foreign_streak,
            "institution_streak": inst_streak,
        });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rows(flows: &[(f64, f64)]) -> Vec<SupplyDemand> {
        flows
            .iter()
            .enumerate()
            .map(|(i, (foreign, inst))| SupplyDemand {
                code: "005930".into(),
                date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                foreign_net: *foreign,
                institution_net: *inst,
                pension_net: 0.0,
                individual_net: -(foreign + inst),
            })
            .collect()
    }

    fn input_with(flows: &[(f64, f64)]) -> AnalysisInput {
        let mut input = AnalysisInput::new("005930", "2025-06-10".parse().unwrap());
        input.supply = rows(flows);
        input
    }

    #[tokio::test]
    async fn dual_buy_with_streak_maxes_out() {
        let input = input_with(&[(1e9, 1e9), (2e9, 1e9), (1e9, 2e9)]);
        let r = SupplyDemandAnalyser::new().analyse(&input).await.unwrap();
        // 0.5 + 0.5 + 1.0 + 0.5 clamped to 2.0
        assert_eq!(r.score, 2.0);
    }

    #[tokio::test]
    async fn dual_sell_is_penalised() {
        let input = input_with(&[(-1e9, -1e9), (-2e9, -1e9)]);
        let r = SupplyDemandAnalyser::new().analyse(&input).await.unwrap();
        assert_eq!(r.score, -2.0);
    }

    #[tokio::test]
    async fn split_flows_roughly_cancel() {
        let input = input_with(&[(1e9, -1e9)]);
        let r = SupplyDemandAnalyser::new().analyse(&input).await.unwrap();
        assert_eq!(r.score, 0.0);
    }

    #[tokio::test]
    async fn empty_window_is_neutral() {
        let input = AnalysisInput::new("005930", "2025-06-10".parse().unwrap());
        let r = SupplyDemandAnalyser::new().analyse(&input).await.unwrap();
        assert_eq!(r.score, 0.0);
    }
}
