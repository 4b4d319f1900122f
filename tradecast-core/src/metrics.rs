//! Derived session performance metrics.
//!
//! Everything here is recomputed on demand from the session's running
//! counters plus one scan of its trade ledger; nothing is stored
//! redundantly.

use crate::entities::{TradeRecord, TradingSession};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

/// Snapshot of a session's derived performance figures.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// `winning / total`, 0 for an empty ledger.
    pub win_rate: f64,
    /// `|max_profit / max_loss|`; infinite when there is profit but no
    /// recorded loss, 0 otherwise.
    pub profit_factor: f64,
    pub roi_pct: f64,
    pub total_pnl: Decimal,
    pub total_fees: Decimal,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub current_drawdown_pct: Decimal,
}

/// Compute the metrics for `session` from its ordered trade ledger.
pub fn compute(session: &TradingSession, trades: &[TradeRecord]) -> PerformanceMetrics {
    let win_rate = if session.total_trades == 0 {
        0.0
    } else {
        f64::from(session.winning_trades) / f64::from(session.total_trades)
    };

    let profit_factor = profit_factor(session.max_profit, session.max_loss);

    let roi_pct = if session.initial_capital.is_zero() {
        0.0
    } else {
        ((session.current_capital - session.initial_capital) / session.initial_capital
            * Decimal::from(100))
        .to_f64()
        .unwrap_or(0.0)
    };

    let streaks = scan_streaks(trades);

    PerformanceMetrics {
        total_trades: session.total_trades,
        winning_trades: session.winning_trades,
        losing_trades: session.losing_trades,
        win_rate,
        profit_factor,
        roi_pct,
        total_pnl: session.total_pnl,
        total_fees: session.total_fees,
        max_consecutive_wins: streaks.max_wins,
        max_consecutive_losses: streaks.max_losses,
        average_win: streaks.average_win,
        average_loss: streaks.average_loss,
        current_drawdown_pct: session.current_drawdown_pct,
    }
}

/// The single zero-denominator rule used everywhere: infinite when
/// `max_loss` is zero and there is profit, 0 when there is neither.
fn profit_factor(max_profit: Decimal, max_loss: Decimal) -> f64 {
    if max_loss.is_zero() {
        if max_profit > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        (max_profit / max_loss).abs().to_f64().unwrap_or(0.0)
    }
}

struct StreakScan {
    max_wins: u32,
    max_losses: u32,
    average_win: Decimal,
    average_loss: Decimal,
}

/// One pass over the ledger: streak counters reset on sign change,
/// flat trades (pnl == 0) break both streaks.
fn scan_streaks(trades: &[TradeRecord]) -> StreakScan {
    let mut max_wins = 0u32;
    let mut max_losses = 0u32;
    let mut run_wins = 0u32;
    let mut run_losses = 0u32;
    let mut win_sum = Decimal::ZERO;
    let mut win_count = 0u32;
    let mut loss_sum = Decimal::ZERO;
    let mut loss_count = 0u32;

    for trade in trades {
        if trade.pnl > Decimal::ZERO {
            run_wins += 1;
            run_losses = 0;
            win_sum += trade.pnl;
            win_count += 1;
        } else if trade.pnl < Decimal::ZERO {
            run_losses += 1;
            run_wins = 0;
            loss_sum += trade.pnl;
            loss_count += 1;
        } else {
            run_wins = 0;
            run_losses = 0;
        }
        max_wins = max_wins.max(run_wins);
        max_losses = max_losses.max(run_losses);
    }

    StreakScan {
        max_wins,
        max_losses,
        average_win: if win_count == 0 {
            Decimal::ZERO
        } else {
            win_sum / Decimal::from(win_count)
        },
        average_loss: if loss_count == 0 {
            Decimal::ZERO
        } else {
            loss_sum / Decimal::from(loss_count)
        },
    }
}
