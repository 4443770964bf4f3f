use aegis_core::DailyBar;
use chrono::NaiveDate;
use fusion_engine::classify_regime;
use strategy_ensemble::StrategyEnsemble;
use technical_analysis::indicators::atr;

use crate::circuit_breaker::CircuitBreaker;
use crate::models::*;
use crate::risk::{RiskManager, TrailingStop};

/// Event-loop backtest over one instrument's time-sorted daily bars.
///
/// Per bar: roll the circuit breaker to the session, service stops on
/// the open position, ask the regime-weighted ensemble for a signal,
/// and route entries through the risk manager. Execution applies
/// slippage and commission symmetrically on both sides.
pub struct BacktestEngine {
    config: BacktestConfig,
}

struct OpenPosition {
    entry_date: NaiveDate,
    entry_price: f64,
    shares: f64,
    initial_stop: f64,
    trailing: TrailingStop,
    entry_fees: f64,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    fn fees_for(&self, price: f64, shares: f64) -> f64 {
        let notional = price * shares;
        notional * (self.config.risk.slippage_pct + self.config.risk.commission_pct)
    }

    pub fn run(&self, code: &str, bars: &[DailyBar]) -> BacktestResult {
        let warmup = self.config.warmup_bars.max(20);
        let risk = &self.config.risk;

        let mut cash = self.config.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut trades: Vec<TradeRecord> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();
        let mut total_fees = 0.0;
        let mut peak = self.config.initial_capital;
        let mut max_drawdown: f64 = 0.0;

        let mut breaker = CircuitBreaker::new(risk.daily_loss_halt_pct, risk.max_trades_per_day);
        let mut risk_manager = RiskManager::new(risk.clone());
        let ensemble = StrategyEnsemble::new();

        for i in warmup..bars.len() {
            let bar = &bars[i];
            let window = &bars[..=i];

            let equity_mark = cash
                + position
                    .as_ref()
                    .map(|p| p.shares * bar.close)
                    .unwrap_or(0.0);
            breaker.on_new_day(bar.date, equity_mark);

            // 1. Service stops before anything else
            let stop_hit = position
                .as_mut()
                .map(|pos| {
                    pos.trailing.update(bar.high);
                    bar.low <= pos.trailing.stop
                })
                .unwrap_or(false);
            if stop_hit {
                let pos = position.take().unwrap();
                let cause = if pos.trailing.is_trailing(pos.initial_stop) {
                    ExitCause::TrailingStop
                } else {
                    ExitCause::StopLoss
                };
                let stop_price = pos.trailing.stop;
                let (trade, fees) = self.close(code, pos, bar.date, stop_price, cause);
                cash += trade.exit_price * trade.shares - fees;
                total_fees += fees;
                breaker.record_pnl(trade.pnl - trade.fees);
                risk_manager.record_outcome(trade.pnl - trade.fees);
                trades.push(trade);
            }

            // 2. Signal from the ensemble under the current regime
            let regime = classify_regime(window, 0.02);
            let signal = ensemble.signal(window, regime.regime);

            if signal <= -1 {
                if let Some(pos) = position.take() {
                    let (trade, fees) =
                        self.close(code, pos, bar.date, bar.close, ExitCause::Signal);
                    cash += trade.exit_price * trade.shares - fees;
                    total_fees += fees;
                    breaker.record_pnl(trade.pnl - trade.fees);
                    risk_manager.record_outcome(trade.pnl - trade.fees);
                    trades.push(trade);
                }
            } else if signal >= 1 && position.is_none() && breaker.entries_allowed() {
                let atr_value = atr(window, 14).last().copied();
                let entry_price = bar.close * (1.0 + risk.slippage_pct);
                let stop = risk_manager.stop_price(entry_price, atr_value);
                let shares = risk_manager.position_size(cash, entry_price, stop);

                if shares >= 1.0 {
                    let notional = entry_price * shares;
                    let fees = notional * risk.commission_pct;
                    if notional + fees <= cash {
                        cash -= notional + fees;
                        total_fees += fees;
                        // One count per round trip: the breaker counts
                        // opens, so exits must not increment it again
                        breaker.record_trade();
                        position = Some(OpenPosition {
                            entry_date: bar.date,
                            entry_price,
                            shares,
                            initial_stop: stop,
                            trailing: TrailingStop::new(entry_price, stop),
                            entry_fees: fees,
                        });
                    }
                }
            }

            // 3. Mark equity at the close
            let equity = cash
                + position
                    .as_ref()
                    .map(|p| p.shares * bar.close)
                    .unwrap_or(0.0);
            peak = peak.max(equity);
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - equity) / peak);
            }
            equity_curve.push(EquityPoint {
                date: bar.date,
                equity,
            });
        }

        // Force-close whatever is still open on the last bar
        if let Some(pos) = position.take() {
            let last = bars.last().unwrap();
            let (trade, fees) = self.close(code, pos, last.date, last.close, ExitCause::EndOfData);
            cash += trade.exit_price * trade.shares - fees;
            total_fees += fees;
            risk_manager.record_outcome(trade.pnl - trade.fees);
            trades.push(trade);
            if let Some(point) = equity_curve.last_mut() {
                point.equity = cash;
            }
        }

        let final_equity = cash;
        let wins = trades.iter().filter(|t| t.pnl - t.fees > 0.0).count();
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            wins as f64 / trades.len() as f64
        };
        let gross_profit: f64 = trades
            .iter()
            .map(|t| (t.pnl - t.fees).max(0.0))
            .sum();
        let gross_loss: f64 = trades
            .iter()
            .map(|t| (-(t.pnl - t.fees)).max(0.0))
            .sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let mut exit_causes = std::collections::HashMap::new();
        for trade in &trades {
            *exit_causes
                .entry(trade.exit_cause.as_str().to_string())
                .or_insert(0) += 1;
        }

        BacktestResult {
            initial_equity: self.config.initial_capital,
            final_equity,
            total_fees,
            trade_count: trades.len(),
            win_rate,
            max_drawdown,
            profit_factor,
            halted_days: breaker.halted_days(),
            trades,
            equity_curve,
            exit_causes,
        }
    }

    fn close(
        &self,
        code: &str,
        pos: OpenPosition,
        date: NaiveDate,
        raw_exit: f64,
        cause: ExitCause,
    ) -> (TradeRecord, f64) {
        let exit_price = raw_exit * (1.0 - self.config.risk.slippage_pct);
        let exit_fees = exit_price * pos.shares * self.config.risk.commission_pct;
        let pnl = (exit_price - pos.entry_price) * pos.shares;
        let trade = TradeRecord {
            code: code.to_string(),
            entry_date: pos.entry_date,
            exit_date: date,
            entry_price: pos.entry_price,
            exit_price,
            shares: pos.shares,
            pnl,
            fees: pos.entry_fees + exit_fees,
            exit_cause: cause,
        };
        (trade, exit_fees)
    }
}
