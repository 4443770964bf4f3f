use aegis_core::RiskConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub risk: RiskConfig,
    /// Bars of history before the first tradable bar
    pub warmup_bars: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000_000.0,
            risk: RiskConfig::default(),
            warmup_bars: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitCause {
    Signal,
    StopLoss,
    TrailingStop,
    EndOfData,
}

impl ExitCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitCause::Signal => "signal",
            ExitCause::StopLoss => "stop_loss",
            ExitCause::TrailingStop => "trailing_stop",
            ExitCause::EndOfData => "end_of_data",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub code: String,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: f64,
    /// Gross P&L before fees
    pub pnl: f64,
    /// Commission + slippage, both sides
    pub fees: f64,
    pub exit_cause: ExitCause,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub initial_equity: f64,
    pub final_equity: f64,
    pub total_fees: f64,
    pub trade_count: usize,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub profit_factor: f64,
    pub halted_days: usize,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub exit_causes: HashMap<String, usize>,
}

impl BacktestResult {
    /// Accounting identity: final = initial + Σ gross pnl − Σ fees.
    pub fn accounting_holds(&self) -> bool {
        let expected: f64 = self.initial_equity
            + self.trades.iter().map(|t| t.pnl).sum::<f64>()
            - self.total_fees;
        (expected - self.final_equity).abs() < 1e-6 * self.initial_equity.max(1.0)
    }
}
