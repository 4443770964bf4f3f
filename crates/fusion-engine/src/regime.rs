use aegis_core::{DailyBar, Regime};
use technical_analysis::indicators::sma;

/// Regime classification over index (or sector) bars.
#[derive(Debug, Clone)]
pub struct RegimeRead {
    pub regime: Regime,
    /// |(MA20 − MA60)/MA60| clamped to [0, 1]
    pub confidence: f64,
    pub ma20: f64,
    pub ma60: f64,
}

impl RegimeRead {
    /// Neutral read used when there is not enough history.
    pub fn unknown() -> Self {
        Self {
            regime: Regime::Sideway,
            confidence: 0.0,
            ma20: 0.0,
            ma60: 0.0,
        }
    }
}

/// MA20 vs MA60 with a ±`band` tolerance (0.02 = 2%):
/// BULL above the band, BEAR below, SIDEWAY inside.
pub fn classify_regime(bars: &[DailyBar], band: f64) -> RegimeRead {
    if bars.len() < 60 {
        return RegimeRead::unknown();
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ma20 = match sma(&closes, 20).last() {
        Some(v) => *v,
        None => return RegimeRead::unknown(),
    };
    let ma60 = match sma(&closes, 60).last() {
        Some(v) => *v,
        None => return RegimeRead::unknown(),
    };
    if ma60 <= 0.0 {
        return RegimeRead::unknown();
    }

    let regime = if ma20 >= ma60 * (1.0 + band) {
        Regime::Bull
    } else if ma20 <= ma60 * (1.0 - band) {
        Regime::Bear
    } else {
        Regime::Sideway
    };

    RegimeRead {
        regime,
        confidence: ((ma20 - ma60) / ma60).abs().clamp(0.0, 1.0),
        ma20,
        ma60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    /// Series whose final MA20 and MA60 land on the given values: the
    /// last 20 closes sit at `ma20_level`, the 40 before that at the
    /// level that makes the 60-bar mean equal `ma60_level`.
    fn bars_with_mas(ma20_level: f64, ma60_level: f64) -> Vec<DailyBar> {
        let head_level = (ma60_level * 60.0 - ma20_level * 20.0) / 40.0;
        (0..60)
            .map(|i| {
                let close = if i < 40 { head_level } else { ma20_level };
                DailyBar {
                    code: "KOSPI".into(),
                    date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
                        + chrono::Duration::days(i),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 0.0,
                }
            })
            .collect()
    }

    #[test]
    fn ma_spread_above_band_is_bull() {
        let read = classify_regime(&bars_with_mas(105.0, 100.0), 0.02);
        assert_eq!(read.regime, Regime::Bull);
        assert!((read.confidence - 0.05).abs() < 1e-9);
    }

    #[test]
    fn ma_spread_below_band_is_bear() {
        let read = classify_regime(&bars_with_mas(98.0, 100.0), 0.02);
        assert_eq!(read.regime, Regime::Bear);
    }

    #[test]
    fn equal_mas_are_sideway() {
        let read = classify_regime(&bars_with_mas(100.0, 100.0), 0.02);
        assert_eq!(read.regime, Regime::Sideway);
        assert_eq!(read.confidence, 0.0);
    }

    #[test]
    fn short_history_reads_unknown() {
        let bars = bars_with_mas(105.0, 100.0);
        let read = classify_regime(&bars[..30], 0.02);
        assert_eq!(read.regime, Regime::Sideway);
        assert_eq!(read.confidence, 0.0);
    }
}
