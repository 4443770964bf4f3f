//! Two-stage candidate screener.
//!
//! Stage 1 runs in SQL: value bounds (PBR, PER), liquidity floors
//! (volume, market cap, traded value) over the active universe minus
//! holdings, capped at 300. Stage 2 loads 60 days of OHLCV and 20 days
//! of flow data per survivor and computes a quant score in [0, 100]
//! allocated 30 volume / 40 trend / 30 volatility. Output is ranked by
//! score descending, ties broken by ascending PBR then PER.

use aegis_core::{DailyBar, ScreenerConfig, SupplyDemand};
use aegis_db::{CandidateRow, Db};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use technical_analysis::indicators::{disparity, rsi_ewm, sma};

/// RSI sanity band: candidates outside it are in free-fall or blow-off
/// and are dropped before scoring.
const RSI_MIN: f64 = 10.0;
const RSI_MAX: f64 = 90.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub code: String,
    pub quant_score: f64,
    pub pbr: f64,
    pub per: f64,
    pub metrics: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenResult {
    pub stage1_count: usize,
    pub stage2_count: usize,
    pub candidates: Vec<Candidate>,
}

pub struct CandidateScreener {
    db: Db,
    config: ScreenerConfig,
}

/// Map `value` onto [0,1] between `lo` and `hi`.
fn scale(value: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Stage-2 quant score over one candidate's history. `None` when the
/// history is too short or the RSI sanity band rejects it.
pub fn quant_score(
    bars: &[DailyBar],
    supply: &[SupplyDemand],
    cfg: &ScreenerConfig,
) -> Option<(f64, serde_json::Value)> {
    if bars.len() < 21 {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let last = bars.last().unwrap();
    let price = last.close;

    let rsi = *rsi_ewm(&closes, 14).last().unwrap();
    if !(RSI_MIN..=RSI_MAX).contains(&rsi) {
        return None;
    }

    // --- Volume dynamics (weight 30) ---
    // surge: today's volume vs its 5-day average
    let vol_ma5 = sma(&volumes, 5).last().copied().unwrap_or(0.0);
    let surge = if vol_ma5 > 0.0 { last.volume / vol_ma5 } else { 0.0 };
    // participation: 5-day vs 20-day average volume
    let vol_ma20 = sma(&volumes, 20).last().copied().unwrap_or(0.0);
    let participation = if vol_ma20 > 0.0 { vol_ma5 / vol_ma20 } else { 0.0 };
    // net-flow support over the supply window
    let net_flow: f64 = supply
        .iter()
        .map(|s| s.foreign_net + s.institution_net)
        .sum();
    let volume_score = scale(surge, 0.8, 3.0) * 0.5
        + scale(participation, 0.8, 2.0) * 0.3
        + if net_flow > 0.0 { 0.2 } else { 0.0 };

    // --- Trend / breakout (weight 40) ---
    let ma5 = sma(&closes, 5).last().copied().unwrap_or(price);
    let ma20 = sma(&closes, 20).last().copied().unwrap_or(price);
    let aligned = price > ma5 && ma5 > ma20;
    let high_20d = bars[bars.len() - 21..bars.len() - 1]
        .iter()
        .map(|b| b.high)
        .fold(f64::MIN, f64::max);
    let breakout = price > high_20d;
    let high_52w = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let high_ratio = if high_52w > 0.0 { price / high_52w } else { 0.0 };
    let ret_3d = if bars.len() >= 4 {
        let prior = bars[bars.len() - 4].close;
        if prior > 0.0 { (price - prior) / prior } else { 0.0 }
    } else {
        0.0
    };
    let trend_score = if aligned { 0.3 } else { 0.0 }
        + if breakout { 0.25 } else { 0.0 }
        + scale(high_ratio, 0.6, 1.0) * 0.25
        + scale(ret_3d, -0.02, 0.08) * 0.2;

    // --- Volatility (weight 30) ---
    let intraday_range = if last.close > 0.0 {
        (last.high - last.low) / last.close
    } else {
        0.0
    };
    let range_5d: f64 = bars[bars.len() - 5..]
        .iter()
        .map(|b| if b.close > 0.0 { (b.high - b.low) / b.close } else { 0.0 })
        .sum::<f64>()
        / 5.0;
    let disp_20 = disparity(price, ma20);
    // Sweet spot: moving but not unhinged, and not stretched from MA20
    let volatility_score = scale(intraday_range, 0.005, 0.04) * 0.35
        + scale(range_5d, 0.005, 0.04) * 0.35
        + (1.0 - scale((disp_20 - 100.0).abs(), 2.0, 15.0)) * 0.3;

    let total = volume_score * cfg.weight_volume
        + trend_score * cfg.weight_trend
        + volatility_score * cfg.weight_volatility;

    let metrics = json!({
        "rsi_14": rsi,
        "volume_surge": surge,
        "ma_aligned": aligned,
        "breakout_20d": breakout,
        "high_52w_ratio": high_ratio,
        "return_3d": ret_3d,
        "intraday_range": intraday_range,
        "range_5d": range_5d,
        "disparity_20": disp_20,
        "volume_score": volume_score,
        "trend_score": trend_score,
        "volatility_score": volatility_score,
    });

    Some((total.clamp(0.0, 100.0), metrics))
}

impl CandidateScreener {
    pub fn new(db: Db, config: ScreenerConfig) -> Self {
        Self { db, config }
    }

    pub async fn screen(&self, as_of: NaiveDate) -> Result<ScreenResult> {
        let stage1 = self
            .db
            .valuations()
            .screen_stage1(&self.config)
            .await
            .context("stage-1 screen")?;
        let stage1_count = stage1.len();
        tracing::info!(stage1 = stage1_count, "stage-1 candidates");

        let mut candidates = Vec::new();
        for row in &stage1 {
            match self.score_candidate(row, as_of).await {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(e) => {
                    // One bad candidate never aborts the batch
                    tracing::warn!(code = %row.code, error = %e, "stage-2 scoring failed");
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.quant_score
                .partial_cmp(&a.quant_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.pbr
                        .partial_cmp(&b.pbr)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(
                    a.per
                        .partial_cmp(&b.per)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        candidates.truncate(self.config.stage2_limit);

        tracing::info!(
            stage1 = stage1_count,
            stage2 = candidates.len(),
            "screen complete"
        );
        Ok(ScreenResult {
            stage1_count,
            stage2_count: candidates.len(),
            candidates,
        })
    }

    async fn score_candidate(
        &self,
        row: &CandidateRow,
        as_of: NaiveDate,
    ) -> Result<Option<Candidate>> {
        let bars = self.db.prices().recent_bars(&row.code, as_of, 60).await?;
        let supply = self.db.supply().recent(&row.code, as_of, 20).await?;

        Ok(quant_score(&bars, &supply, &self.config).map(|(score, metrics)| Candidate {
            code: row.code.clone(),
            quant_score: score,
            pbr: row.pbr,
            per: row.per,
            metrics,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars(closes: &[f64], volumes: &[f64]) -> Vec<DailyBar> {
        closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&close, &volume))| DailyBar {
                code: "000100".into(),
                date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                open: close * 0.995,
                high: close * 1.015,
                low: close * 0.985,
                close,
                volume,
            })
            .collect()
    }

    /// Uptrend with a shallow dip every ninth day; a monotonic series
    /// would pin RSI at 100 and trip the sanity band.
    fn steady_up(n: usize) -> Vec<DailyBar> {
        let closes: Vec<f64> = (0..n)
            .map(|i| 100.0 + 0.6 * i as f64 - if i % 9 == 4 { 2.0 } else { 0.0 })
            .collect();
        let volumes: Vec<f64> = (0..n)
            .map(|i| if i == n - 1 { 400_000.0 } else { 150_000.0 })
            .collect();
        bars(&closes, &volumes)
    }

    #[test]
    fn uptrend_with_surge_scores_high() {
        let cfg = ScreenerConfig::default();
        let (score, metrics) = quant_score(&steady_up(60), &[], &cfg).unwrap();
        assert!(score > 50.0, "score = {score}");
        assert_eq!(metrics["ma_aligned"], true);
    }

    #[test]
    fn free_fall_rsi_is_rejected() {
        let cfg = ScreenerConfig::default();
        // Relentless decline pushes RSI under the sanity floor
        let closes: Vec<f64> = (0..40).map(|i| 200.0 * 0.97f64.powi(i)).collect();
        let volumes = vec![150_000.0; 40];
        assert!(quant_score(&bars(&closes, &volumes), &[], &cfg).is_none());
    }

    #[test]
    fn short_history_is_rejected() {
        let cfg = ScreenerConfig::default();
        assert!(quant_score(&steady_up(10), &[], &cfg).is_none());
    }

    #[test]
    fn score_is_bounded() {
        let cfg = ScreenerConfig::default();
        let (score, _) = quant_score(&steady_up(60), &[], &cfg).unwrap();
        assert!((0.0..=100.0).contains(&score));
    }

    async fn seed_universe_member(db: &Db, code: &str, closes: &[f64]) {
        use aegis_core::{Market, Ticker};
        db.tickers()
            .upsert(&Ticker {
                code: code.into(),
                name: format!("종목{code}"),
                market: Market::Kospi,
                sector: None,
                is_delisted: false,
            })
            .await
            .unwrap();
        let history: Vec<DailyBar> = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| DailyBar {
                code: code.into(),
                date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                open: close * 0.995,
                high: close * 1.015,
                low: close * 0.985,
                close,
                volume: 150_000.0,
            })
            .collect();
        db.prices().upsert_bars(&history).await.unwrap();
        db.valuations()
            .upsert(
                code,
                history.last().unwrap().date,
                Some(8.0),
                Some(0.9),
                Some(12.0),
                Some(80.0),
                Some(1e11),
                Some(6e9),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn two_stage_screen_drops_free_fall_candidate() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        let dip = |i: usize, depth: f64| if i % 9 == 4 { depth } else { 0.0 };
        let up_a: Vec<f64> = (0..60).map(|i| 100.0 + 0.6 * i as f64 - dip(i, 2.0)).collect();
        let up_b: Vec<f64> = (0..60).map(|i| 50.0 + 0.2 * i as f64 - dip(i, 0.8)).collect();
        let crash: Vec<f64> = (0..60).map(|i| 200.0 * 0.97f64.powi(i as i32)).collect();

        seed_universe_member(&db, "000100", &up_a).await;
        seed_universe_member(&db, "000200", &up_b).await;
        seed_universe_member(&db, "000300", &crash).await;

        let screener = CandidateScreener::new(db, ScreenerConfig::default());
        let result = screener.screen("2025-04-29".parse().unwrap()).await.unwrap();

        assert_eq!(result.stage1_count, 3);
        assert_eq!(result.stage2_count, 2);
        assert!(result.candidates.iter().all(|c| c.code != "000300"));
        assert!(result.candidates[0].quant_score >= result.candidates[1].quant_score);
    }
}
