use aegis_core::{DailyBar, Tick};
use chrono::NaiveDate;

/// Return val if it is finite, otherwise return default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(finite_or(sum / period as f64, 0.0));
    }
    result
}

/// Exponential Moving Average. Output length matches input length; the
/// first `period` slots carry the SMA seed (MACD relies on this).
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    if data.len() < period {
        let avg = data.iter().sum::<f64>() / data.len() as f64;
        return vec![finite_or(avg, 0.0)];
    }

    let sma_seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    let sma_seed = finite_or(sma_seed, 0.0);

    let mut result = Vec::with_capacity(data.len());
    for _ in 0..period {
        result.push(sma_seed);
    }
    for i in period..data.len() {
        let prev_ema = result[i - 1];
        let ema_val = (data[i] - prev_ema) * multiplier + prev_ema;
        result.push(finite_or(ema_val, prev_ema));
    }
    result
}

/// RSI via exponentially-weighted gains/losses (alpha = 1/period). A
/// flat or too-short series seeds to the neutral 50 instead of NaN.
pub fn rsi_ewm(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < 2 {
        return vec![50.0; data.len()];
    }

    let alpha = 1.0 / period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    let mut result = Vec::with_capacity(data.len());
    result.push(50.0);

    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = avg_gain * (1.0 - alpha) + gain * alpha;
        avg_loss = avg_loss * (1.0 - alpha) + loss * alpha;

        let value = if avg_loss == 0.0 && avg_gain == 0.0 {
            50.0
        } else if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };
        result.push(finite_or(value, 50.0));
    }
    result
}

/// MACD (Moving Average Convergence Divergence)
pub struct MacdResult {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(data: &[f64], fast: usize, slow: usize, signal: usize) -> MacdResult {
    if fast == 0 || slow == 0 || signal == 0 || slow < fast || data.len() < slow {
        return MacdResult {
            macd_line: vec![],
            signal_line: vec![],
            histogram: vec![],
        };
    }

    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);

    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = ema(&macd_line, signal);
    let histogram: Vec<f64> = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Bollinger Bands
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger_bands(data: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    if period == 0 || data.len() < period {
        return BollingerBands {
            upper: vec![],
            middle: vec![],
            lower: vec![],
        };
    }

    let middle = sma(data, period);
    let mut upper = Vec::with_capacity(middle.len());
    let mut lower = Vec::with_capacity(middle.len());

    for i in period - 1..data.len() {
        let slice = &data[i + 1 - period..=i];
        let mean = middle[i + 1 - period];
        let variance: f64 = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = variance.sqrt();

        upper.push(finite_or(mean + std_dev * std, mean));
        lower.push(finite_or(mean - std_dev * std, mean));
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

/// Average True Range over daily bars.
pub fn atr(bars: &[DailyBar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < 2 {
        return vec![];
    }

    let mut true_ranges = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let high_low = bars[i].high - bars[i].low;
        let high_close = (bars[i].high - bars[i - 1].close).abs();
        let low_close = (bars[i].low - bars[i - 1].close).abs();
        true_ranges.push(high_low.max(high_close).max(low_close));
    }

    sma(&true_ranges, period)
}

/// +DI / -DI / ADX (Wilder smoothing via EWM)
pub struct DmiResult {
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
    pub adx: Vec<f64>,
}

pub fn dmi(bars: &[DailyBar], period: usize) -> DmiResult {
    if period == 0 || bars.len() < period + 1 {
        return DmiResult {
            plus_di: vec![],
            minus_di: vec![],
            adx: vec![],
        };
    }

    let alpha = 1.0 / period as f64;
    let mut sm_plus = 0.0;
    let mut sm_minus = 0.0;
    let mut sm_tr = 0.0;
    let mut plus_di = Vec::new();
    let mut minus_di = Vec::new();
    let mut dx_values = Vec::new();

    for i in 1..bars.len() {
        let up_move = bars[i].high - bars[i - 1].high;
        let down_move = bars[i - 1].low - bars[i].low;
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        let tr = (bars[i].high - bars[i].low)
            .max((bars[i].high - bars[i - 1].close).abs())
            .max((bars[i].low - bars[i - 1].close).abs());

        sm_plus = sm_plus * (1.0 - alpha) + plus_dm * alpha;
        sm_minus = sm_minus * (1.0 - alpha) + minus_dm * alpha;
        sm_tr = sm_tr * (1.0 - alpha) + tr * alpha;

        if sm_tr > 0.0 {
            let pdi = 100.0 * sm_plus / sm_tr;
            let mdi = 100.0 * sm_minus / sm_tr;
            plus_di.push(pdi);
            minus_di.push(mdi);
            let denom = pdi + mdi;
            dx_values.push(if denom > 0.0 {
                100.0 * (pdi - mdi).abs() / denom
            } else {
                0.0
            });
        }
    }

    let adx = if dx_values.len() >= period {
        ema(&dx_values, period)
    } else {
        vec![]
    };

    DmiResult {
        plus_di,
        minus_di,
        adx,
    }
}

/// Session VWAP from time-ordered ticks, reset on each calendar-date
/// change. Returns (date, vwap) per session.
pub fn session_vwap(ticks: &[Tick]) -> Vec<(NaiveDate, f64)> {
    let mut sessions: Vec<(NaiveDate, f64)> = Vec::new();
    let mut current_date: Option<NaiveDate> = None;
    let mut pv_sum = 0.0;
    let mut vol_sum = 0.0;

    for tick in ticks {
        let date = tick.timestamp.date_naive();
        if current_date != Some(date) {
            if let Some(prev) = current_date {
                if vol_sum > 0.0 {
                    sessions.push((prev, pv_sum / vol_sum));
                }
            }
            current_date = Some(date);
            pv_sum = 0.0;
            vol_sum = 0.0;
        }
        pv_sum += tick.price * tick.volume;
        vol_sum += tick.volume;
    }

    if let Some(date) = current_date {
        if vol_sum > 0.0 {
            sessions.push((date, pv_sum / vol_sum));
        }
    }
    sessions
}

/// Current price as a percentage of an MA (100 = at the average).
pub fn disparity(price: f64, ma: f64) -> f64 {
    if ma == 0.0 {
        return 100.0;
    }
    finite_or(price / ma * 100.0, 100.0)
}
