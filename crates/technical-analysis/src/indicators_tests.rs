#[cfg(test)]
mod tests {
    use crate::indicators::*;
    use aegis_core::{DailyBar, Tick};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn sample_bars() -> Vec<DailyBar> {
        let prices = vec![
            (100.0, 102.0, 99.0, 101.0),
            (101.0, 103.0, 100.0, 102.0),
            (102.0, 104.0, 101.0, 103.0),
            (103.0, 105.0, 102.0, 104.0),
            (104.0, 106.0, 103.0, 105.0),
            (105.0, 107.0, 104.0, 106.0),
            (106.0, 108.0, 105.0, 107.0),
            (107.0, 109.0, 106.0, 108.0),
            (108.0, 110.0, 107.0, 109.0),
            (109.0, 111.0, 108.0, 110.0),
            (110.0, 112.0, 109.0, 111.0),
            (111.0, 113.0, 110.0, 112.0),
            (112.0, 114.0, 111.0, 113.0),
            (113.0, 115.0, 112.0, 114.0),
            (114.0, 116.0, 113.0, 115.0),
        ];

        prices
            .into_iter()
            .enumerate()
            .map(|(i, (open, high, low, close))| DailyBar {
                code: "005930".into(),
                date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap() + chrono::Duration::days(i as i64),
                open,
                high,
                low,
                close,
                volume: 1_000_000.0,
            })
            .collect()
    }

    #[test]
    fn sma_basic() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&data, 3);

        assert_eq!(result.len(), 3);
        assert!((result[0] - 2.0).abs() < 0.001);
        assert!((result[1] - 3.0).abs() < 0.001);
        assert!((result[2] - 4.0).abs() < 0.001);
    }

    #[test]
    fn sma_insufficient_data() {
        assert!(sma(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn ema_length_matches_input() {
        let data = vec![22.0, 24.0, 23.0, 25.0, 26.0, 27.0];
        let result = ema(&data, 3);
        assert_eq!(result.len(), data.len());
        let seed = (22.0 + 24.0 + 23.0) / 3.0;
        assert!((result[0] - seed).abs() < 0.01);
    }

    #[test]
    fn rsi_neutral_seed_and_bounds() {
        let flat = vec![100.0; 20];
        let result = rsi_ewm(&flat, 14);
        assert!(result.iter().all(|v| (*v - 50.0).abs() < 1e-9));

        let mixed = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ];
        for v in rsi_ewm(&mixed, 14) {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn rsi_rises_in_uptrend() {
        let up: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let result = rsi_ewm(&up, 14);
        assert!(*result.last().unwrap() > 70.0);
    }

    #[test]
    fn macd_histogram_positive_in_acceleration() {
        let data: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let result = macd(&data, 12, 26, 9);
        assert!(!result.histogram.is_empty());
        assert!(*result.macd_line.last().unwrap() > 0.0);
    }

    #[test]
    fn atr_reflects_range() {
        let bars = sample_bars();
        let result = atr(&bars, 14);
        assert_eq!(result.len(), 1);
        // Constant 3-point daily range with 1-point gaps
        assert!((result[0] - 3.0).abs() < 0.5);
    }

    #[test]
    fn dmi_uptrend_has_plus_di_dominant() {
        let bars = sample_bars();
        let result = dmi(&bars, 5);
        let pdi = *result.plus_di.last().unwrap();
        let mdi = *result.minus_di.last().unwrap();
        assert!(pdi > mdi);
    }

    #[test]
    fn vwap_resets_on_date_change() {
        let day1 = Utc.with_ymd_and_hms(2025, 6, 2, 1, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2025, 6, 3, 1, 0, 0).unwrap();
        let ticks = vec![
            Tick { code: "005930".into(), timestamp: day1, price: 100.0, volume: 10.0 },
            Tick { code: "005930".into(), timestamp: day1 + chrono::Duration::hours(1), price: 110.0, volume: 10.0 },
            Tick { code: "005930".into(), timestamp: day2, price: 200.0, volume: 5.0 },
        ];

        let sessions = session_vwap(&ticks);
        assert_eq!(sessions.len(), 2);
        assert!((sessions[0].1 - 105.0).abs() < 1e-9);
        assert!((sessions[1].1 - 200.0).abs() < 1e-9);
    }

    #[test]
    fn disparity_is_percent_of_ma() {
        assert!((disparity(105.0, 100.0) - 105.0).abs() < 1e-9);
        assert_eq!(disparity(100.0, 0.0), 100.0);
    }
}
