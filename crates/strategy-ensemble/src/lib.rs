//! Strategy ensemble: trend-following, mean-reversion and swing, each
//! emitting a discrete signal in [-2, +2] over a price window, combined
//! by regime-dependent weights.

use aegis_core::{DailyBar, Regime};
use technical_analysis::indicators::{bollinger_bands, dmi, macd, rsi_ewm, sma};

/// A strategy votes on one window of bars (oldest first).
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn signal(&self, window: &[DailyBar]) -> i8;
}

/// MACD histogram direction confirmed by DMI.
pub struct TrendFollowing;

impl Strategy for TrendFollowing {
    fn name(&self) -> &'static str {
        "trend_following"
    }

    fn signal(&self, window: &[DailyBar]) -> i8 {
        if window.len() < 35 {
            return 0;
        }
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let macd_result = macd(&closes, 12, 26, 9);
        let Some(&hist) = macd_result.histogram.last() else {
            return 0;
        };
        let prev_hist = macd_result.histogram[macd_result.histogram.len().saturating_sub(2)];

        let dmi_result = dmi(window, 14);
        let di_bull = match (dmi_result.plus_di.last(), dmi_result.minus_di.last()) {
            (Some(p), Some(m)) => p > m,
            _ => false,
        };
        let adx_strong = dmi_result.adx.last().is_some_and(|a| *a > 25.0);

        match (hist > 0.0, hist > prev_hist, di_bull) {
            (true, true, true) if adx_strong => 2,
            (true, _, true) => 1,
            (false, false, false) if adx_strong => -2,
            (false, _, false) => -1,
            _ => 0,
        }
    }
}

/// Bollinger(20, 2) touches, faded back toward the middle band.
pub struct MeanReversion;

impl Strategy for MeanReversion {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn signal(&self, window: &[DailyBar]) -> i8 {
        if window.len() < 20 {
            return 0;
        }
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let bb = bollinger_bands(&closes, 20, 2.0);
        let (Some(&upper), Some(&lower), Some(&middle)) =
            (bb.upper.last(), bb.lower.last(), bb.middle.last())
        else {
            return 0;
        };
        let price = *closes.last().unwrap();
        let band_width = upper - lower;
        if band_width <= 0.0 {
            return 0;
        }

        if price <= lower {
            2
        } else if price < middle - band_width * 0.25 {
            1
        } else if price >= upper {
            -2
        } else if price > middle + band_width * 0.25 {
            -1
        } else {
            0
        }
    }
}

/// Composite swing entry: MA trend gate, RSI timing, VWAP-proxy pullback.
pub struct Swing;

impl Strategy for Swing {
    fn name(&self) -> &'static str {
        "swing"
    }

    fn signal(&self, window: &[DailyBar]) -> i8 {
        if window.len() < 20 {
            return 0;
        }
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let price = *closes.last().unwrap();
        let ma5 = sma(&closes, 5).last().copied().unwrap_or(price);
        let ma20 = sma(&closes, 20).last().copied().unwrap_or(price);
        let rsi = *rsi_ewm(&closes, 14).last().unwrap();

        // Volume-weighted close over the last 5 bars stands in for the
        // session VWAP in daily-bar backtests
        let tail = &window[window.len() - 5..];
        let vol: f64 = tail.iter().map(|b| b.volume).sum();
        let vwap = if vol > 0.0 {
            tail.iter().map(|b| b.close * b.volume).sum::<f64>() / vol
        } else {
            price
        };

        let uptrend = price > ma20 && ma5 > ma20;
        let downtrend = price < ma20 && ma5 < ma20;

        if uptrend && rsi < 45.0 && price <= vwap * 1.005 {
            2
        } else if uptrend && rsi < 60.0 {
            1
        } else if downtrend && rsi > 55.0 {
            -2
        } else if downtrend {
            -1
        } else {
            0
        }
    }
}

/// Regime-weighted ensemble vote over all three strategies.
pub struct StrategyEnsemble {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyEnsemble {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(TrendFollowing),
                Box::new(MeanReversion),
                Box::new(Swing),
            ],
        }
    }

    fn weights(regime: Regime) -> [f64; 3] {
        // [trend, mean-reversion, swing]
        match regime {
            Regime::Bull => [0.5, 0.15, 0.35],
            Regime::Sideway => [0.2, 0.5, 0.3],
            Regime::Bear => [0.35, 0.3, 0.35],
        }
    }

    /// Weighted vote rounded to a discrete signal in [-2, +2].
    pub fn signal(&self, window: &[DailyBar], regime: Regime) -> i8 {
        let weights = Self::weights(regime);
        let vote: f64 = self
            .strategies
            .iter()
            .zip(weights)
            .map(|(s, w)| s.signal(window) as f64 * w)
            .sum();
        (vote.round() as i8).clamp(-2, 2)
    }

    /// Per-strategy breakdown for trade logs.
    pub fn breakdown(&self, window: &[DailyBar]) -> Vec<(&'static str, i8)> {
        self.strategies
            .iter()
            .map(|s| (s.name(), s.signal(window)))
            .collect()
    }
}

impl Default for StrategyEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars(closes: &[f64]) -> Vec<DailyBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| DailyBar {
                code: "005930".into(),
                date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                open: close * 0.997,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000_000.0,
            })
            .collect()
    }

    #[test]
    fn trend_following_likes_sustained_advance() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        assert!(TrendFollowing.signal(&bars(&closes)) > 0);
    }

    #[test]
    fn trend_following_dislikes_sustained_decline() {
        let closes: Vec<f64> = (0..60).map(|i| 200.0 * 0.99f64.powi(i)).collect();
        assert!(TrendFollowing.signal(&bars(&closes)) < 0);
    }

    #[test]
    fn mean_reversion_buys_lower_band_touch() {
        let mut closes = vec![100.0; 25];
        // Sharp dislocation through the lower band
        closes.extend([97.0, 93.0, 88.0]);
        assert!(MeanReversion.signal(&bars(&closes)) > 0);
    }

    #[test]
    fn mean_reversion_fades_upper_band_touch() {
        let mut closes = vec![100.0; 25];
        closes.extend([103.0, 107.0, 112.0]);
        assert!(MeanReversion.signal(&bars(&closes)) < 0);
    }

    #[test]
    fn short_windows_are_neutral() {
        let closes = vec![100.0, 101.0, 102.0];
        let window = bars(&closes);
        assert_eq!(TrendFollowing.signal(&window), 0);
        assert_eq!(MeanReversion.signal(&window), 0);
        assert_eq!(Swing.signal(&window), 0);
    }

    #[test]
    fn ensemble_vote_stays_in_band() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let window = bars(&closes);
        for regime in [Regime::Bull, Regime::Sideway, Regime::Bear] {
            let vote = StrategyEnsemble::new().signal(&window, regime);
            assert!((-2..=2).contains(&vote));
        }
    }
}
