use aegis_core::RiskConfig;

/// Position sizing and stop placement.
///
/// Size = min(Kelly-fractional allocation, capital cap, risk budget /
/// stop distance). The Kelly estimate runs off the running win/loss
/// profile and is halved for safety; with no history it falls back to
/// the capital cap.
pub struct RiskManager {
    config: RiskConfig,
    wins: u32,
    losses: u32,
    total_win: f64,
    total_loss: f64,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            wins: 0,
            losses: 0,
            total_win: 0.0,
            total_loss: 0.0,
        }
    }

    pub fn record_outcome(&mut self, pnl: f64) {
        if pnl > 0.0 {
            self.wins += 1;
            self.total_win += pnl;
        } else if pnl < 0.0 {
            self.losses += 1;
            self.total_loss += -pnl;
        }
    }

    /// Half-Kelly fraction from the running profile, or None below the
    /// minimum sample.
    fn kelly_fraction(&self) -> Option<f64> {
        let n = self.wins + self.losses;
        if n < 10 || self.wins == 0 || self.losses == 0 {
            return None;
        }
        let p = self.wins as f64 / n as f64;
        let avg_win = self.total_win / self.wins as f64;
        let avg_loss = self.total_loss / self.losses as f64;
        if avg_loss <= 0.0 {
            return None;
        }
        let b = avg_win / avg_loss;
        let kelly = (b * p - (1.0 - p)) / b;
        Some((kelly * 0.5).clamp(0.0, 1.0))
    }

    /// Shares to buy at `price` with the stop at `stop_price`.
    pub fn position_size(&self, equity: f64, price: f64, stop_price: f64) -> f64 {
        if price <= 0.0 || equity <= 0.0 {
            return 0.0;
        }

        let cap_fraction = self
            .kelly_fraction()
            .unwrap_or(self.config.max_capital_per_trade_pct)
            .min(self.config.max_capital_per_trade_pct);
        let capital_cap = equity * cap_fraction;

        let stop_distance = (price - stop_price).max(price * 0.001);
        let risk_cap = equity * self.config.risk_per_trade_pct / stop_distance * price;

        (capital_cap.min(risk_cap) / price).floor()
    }

    /// Initial stop: close − multiplier × ATR, with a percentage
    /// fallback when ATR is unavailable.
    pub fn stop_price(&self, entry: f64, atr: Option<f64>) -> f64 {
        match atr {
            Some(atr) if atr > 0.0 => entry - self.config.atr_stop_multiplier * atr,
            _ => entry * (1.0 - self.config.fallback_stop_pct),
        }
    }
}

/// Stop that ratchets up with new highs, preserving the original
/// stop distance.
#[derive(Debug, Clone)]
pub struct TrailingStop {
    pub stop: f64,
    high: f64,
    distance: f64,
}

impl TrailingStop {
    pub fn new(entry: f64, initial_stop: f64) -> Self {
        Self {
            stop: initial_stop,
            high: entry,
            distance: entry - initial_stop,
        }
    }

    /// Raise the stop on a new high; never lowers it.
    pub fn update(&mut self, high: f64) {
        if high > self.high {
            self.high = high;
            self.stop = self.stop.max(high - self.distance);
        }
    }

    /// True when this exit is a ratcheted stop rather than the original.
    pub fn is_trailing(&self, initial_stop: f64) -> bool {
        self.stop > initial_stop
    }
}
