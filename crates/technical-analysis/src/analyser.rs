use aegis_core::{
    Analyser, AnalyserKind, AnalyserResult, AnalysisError, AnalysisInput, Signal,
};
use async_trait::async_trait;
use serde_json::json;

use crate::indicators::*;

/// Technical scorer over daily bars and the current session's ticks.
///
/// Three sub-indicators contribute ±1 each:
/// - MA(5/20/60) alignment (price > MA5 > MA20 bullish, inverse bearish)
/// - session VWAP support/break
/// - RSI(14) extremes (oversold bullish, overbought bearish)
pub struct TechnicalAnalyser;

impl TechnicalAnalyser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TechnicalAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyser for TechnicalAnalyser {
    fn kind(&self) -> AnalyserKind {
        AnalyserKind::Technical
    }

    async fn analyse(&self, input: &AnalysisInput) -> Result<AnalyserResult, AnalysisError> {
        let bars = &input.bars;
        if bars.len() < 20 {
            return Err(AnalysisError::InsufficientData(format!(
                "{}: {} bars, need 20",
                input.ticker,
                bars.len()
            )));
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let price = *closes.last().unwrap();

        let mut score: f64 = 0.0;
        let mut events = Vec::new();

        // Moving-average alignment
        let ma5 = sma(&closes, 5);
        let ma20 = sma(&closes, 20);
        let ma60 = sma(&closes, 60);
        let (last_ma5, last_ma20) = (*ma5.last().unwrap(), *ma20.last().unwrap());

        if price > last_ma5 && last_ma5 > last_ma20 {
            score += 1.0;
            events.push("정배열 (price > MA5 > MA20)".to_string());
        } else if price < last_ma5 && last_ma5 < last_ma20 {
            score -= 1.0;
            events.push("역배열 (price < MA5 < MA20)".to_string());
        }

        // Session VWAP support/break; falls back to a volume-weighted
        // close over recent bars when no ticks were collected today
        let vwap = session_vwap(&input.ticks)
            .last()
            .map(|(_, v)| *v)
            .or_else(|| {
                let window = &bars[bars.len().saturating_sub(5)..];
                let vol: f64 = window.iter().map(|b| b.volume).sum();
                if vol > 0.0 {
                    Some(window.iter().map(|b| b.close * b.volume).sum::<f64>() / vol)
                } else {
                    None
                }
            });

        if let Some(vwap) = vwap {
            if price > vwap * 1.002 {
                score += 1.0;
                events.push(format!("VWAP 지지 ({vwap:.0})"));
            } else if price < vwap * 0.998 {
                score -= 1.0;
                events.push(format!("VWAP 이탈 ({vwap:.0})"));
            }
        }

        // RSI extremes
        let rsi = rsi_ewm(&closes, 14);
        let last_rsi = *rsi.last().unwrap();
        if last_rsi <= 30.0 {
            score += 1.0;
            events.push(format!("RSI 과매도 ({last_rsi:.1})"));
        } else if last_rsi >= 70.0 {
            score -= 1.0;
            events.push(format!("RSI 과매수 ({last_rsi:.1})"));
        }

        let score = score.clamp(-2.0, 2.0);
        let signal = match score as i64 {
            2 => Signal::StrongBuy,
            1 => Signal::Buy,
            0 => Signal::Hold,
            -1 => Signal::Sell,
            _ => Signal::StrongSell,
        };

        let mut result = AnalyserResult::new(
            AnalyserKind::Technical,
            score,
            format!("{} ({:+.0})", signal.to_label(), score),
        );
        result.key_events = events;
        result.metrics = json!({
            "price": price,
            "ma5": last_ma5,
            "ma20": last_ma20,
            "ma60": ma60.last(),
            "disparity_20": disparity(price, last_ma20),
            "disparity_60": ma60.last().map(|m| disparity(price, *m)),
            "rsi_14": last_rsi,
            "vwap": vwap,
            "signal": signal.to_label(),
        });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::DailyBar;
    use chrono::NaiveDate;

    fn bars_from_closes(closes: &[f64]) -> Vec<DailyBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| DailyBar {
                code: "005930".into(),
                date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                open: close * 0.99,
                high: close * 1.02,
                low: close * 0.98,
                close,
                volume: 1_000_000.0,
            })
            .collect()
    }

    fn input_with_closes(closes: &[f64]) -> AnalysisInput {
        let mut input = AnalysisInput::new("005930", "2025-06-02".parse().unwrap());
        input.bars = bars_from_closes(closes);
        input
    }

    #[tokio::test]
    async fn steady_uptrend_scores_positive() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + 0.5 * i as f64).collect();
        let input = input_with_closes(&closes);

        let result = TechnicalAnalyser::new().analyse(&input).await.unwrap();
        assert!(result.score > 0.0, "score = {}", result.score);
        assert!((-2.0..=2.0).contains(&result.score));
    }

    #[tokio::test]
    async fn steady_downtrend_scores_negative() {
        let closes: Vec<f64> = (0..60).map(|i| 200.0 - 1.0 * i as f64).collect();
        let input = input_with_closes(&closes);

        let result = TechnicalAnalyser::new().analyse(&input).await.unwrap();
        assert!(result.score < 0.0, "score = {}", result.score);
    }

    #[tokio::test]
    async fn short_history_is_insufficient() {
        let closes: Vec<f64> = (0..5).map(|i| 100.0 + i as f64).collect();
        let input = input_with_closes(&closes);

        let err = TechnicalAnalyser::new().analyse(&input).await.unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData(_)));
    }
}
