use chrono::NaiveDate;

/// Daily circuit breaker: entries are refused for the remainder of the
/// day once cumulative realised loss reaches the halt threshold or the
/// trade count hits its cap. State resets on each new session.
pub struct CircuitBreaker {
    /// Halt when day P&L / day-start equity falls to this (negative)
    daily_loss_halt_pct: f64,
    max_trades_per_day: u32,

    day: Option<NaiveDate>,
    day_start_equity: f64,
    day_pnl: f64,
    trades_today: u32,
    halted: bool,
    halted_days: usize,
}

impl CircuitBreaker {
    pub fn new(daily_loss_halt_pct: f64, max_trades_per_day: u32) -> Self {
        Self {
            daily_loss_halt_pct,
            max_trades_per_day,
            day: None,
            day_start_equity: 0.0,
            day_pnl: 0.0,
            trades_today: 0,
            halted: false,
            halted_days: 0,
        }
    }

    /// Roll to a new session; prior-day halt state is discarded.
    pub fn on_new_day(&mut self, day: NaiveDate, equity: f64) {
        if self.day == Some(day) {
            return;
        }
        self.day = Some(day);
        self.day_start_equity = equity;
        self.day_pnl = 0.0;
        self.trades_today = 0;
        self.halted = false;
    }

    /// Count one trade. The unit is a round trip, recorded at position
    /// open; callers must not call this again on the exit leg.
    pub fn record_trade(&mut self) {
        self.trades_today += 1;
        if self.trades_today >= self.max_trades_per_day {
            self.trip("trade count cap");
        }
    }

    pub fn record_pnl(&mut self, pnl: f64) {
        self.day_pnl += pnl;
        if self.day_start_equity > 0.0
            && self.day_pnl / self.day_start_equity <= self.daily_loss_halt_pct
        {
            self.trip("daily loss limit");
        }
    }

    fn trip(&mut self, reason: &str) {
        if !self.halted {
            self.halted = true;
            self.halted_days += 1;
            tracing::warn!(
                day = ?self.day,
                pnl = self.day_pnl,
                trades = self.trades_today,
                reason,
                "circuit breaker tripped, entries halted for the day"
            );
        }
    }

    pub fn entries_allowed(&self) -> bool {
        !self.halted
    }

    pub fn halted_days(&self) -> usize {
        self.halted_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn loss_limit_halts_entries_for_the_day() {
        let mut cb = CircuitBreaker::new(-0.02, 10);
        cb.on_new_day(day(2), 10_000_000.0);

        cb.record_pnl(-150_000.0);
        assert!(cb.entries_allowed());
        cb.record_pnl(-100_000.0); // -2.5% cumulative
        assert!(!cb.entries_allowed());

        // Next session resets
        cb.on_new_day(day(3), 9_750_000.0);
        assert!(cb.entries_allowed());
        assert_eq!(cb.halted_days(), 1);
    }

    #[test]
    fn trade_count_cap_halts_entries() {
        let mut cb = CircuitBreaker::new(-0.02, 10);
        cb.on_new_day(day(2), 10_000_000.0);
        for _ in 0..9 {
            cb.record_trade();
            assert!(cb.entries_allowed());
        }
        cb.record_trade();
        assert!(!cb.entries_allowed());
    }

    #[test]
    fn same_day_rollover_is_idempotent() {
        let mut cb = CircuitBreaker::new(-0.02, 10);
        cb.on_new_day(day(2), 10_000_000.0);
        cb.record_pnl(-300_000.0);
        assert!(!cb.entries_allowed());
        cb.on_new_day(day(2), 9_700_000.0);
        assert!(!cb.entries_allowed());
    }
}
