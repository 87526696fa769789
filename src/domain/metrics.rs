//! Performance metrics over an equity curve and its realized round trips.

use serde::Serialize;

use super::portfolio::{EquityPoint, RoundTrip};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const SHARPE_EPSILON: f64 = 1e-9;

/// A denominator that was zero (or too small a sample) and was replaced by a
/// neutral value instead of producing NaN or infinity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumericGuard {
    pub metric: &'static str,
    pub detail: String,
}

impl NumericGuard {
    fn record(guards: &mut Vec<NumericGuard>, metric: &'static str, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::debug!(metric, detail = %detail, "numeric guard applied");
        guards.push(NumericGuard { metric, detail });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration: usize,
    pub trade_count: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_trade_duration: f64,
}

impl Metrics {
    /// Compute every metric; guards taken along the way are appended to
    /// `guards`. Growth is measured from `initial_equity`, the capital held
    /// before the first decision.
    pub fn compute(
        initial_equity: f64,
        equity_curve: &[EquityPoint],
        round_trips: &[RoundTrip],
        guards: &mut Vec<NumericGuard>,
    ) -> Self {
        let (total_return, cagr) = compute_growth(initial_equity, equity_curve, guards);
        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve, guards);
        let (sharpe, sortino) = compute_risk_adjusted(equity_curve, guards);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_duration_days = 0i64;

        for trip in round_trips {
            if trip.is_win() {
                trades_won += 1;
                total_wins += trip.pnl;
                largest_win = largest_win.max(trip.pnl);
            } else if trip.pnl < 0.0 {
                trades_lost += 1;
                total_losses += trip.pnl.abs();
                largest_loss = largest_loss.max(trip.pnl.abs());
            }
            total_duration_days += (trip.exit_date - trip.entry_date).num_days();
        }

        let trade_count = round_trips.len();
        let win_rate = if trade_count > 0 {
            trades_won as f64 / trade_count as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };
        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };
        let avg_trade_duration = if trade_count > 0 {
            total_duration_days as f64 / trade_count as f64
        } else {
            0.0
        };

        Metrics {
            total_return,
            cagr,
            sharpe,
            sortino,
            max_drawdown,
            max_drawdown_duration,
            trade_count,
            trades_won,
            trades_lost,
            win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_trade_duration,
        }
    }
}

/// total_return = e[-1]/initial - 1; cagr = (e[-1]/initial)^(252/len) - 1.
fn compute_growth(
    initial_equity: f64,
    equity_curve: &[EquityPoint],
    guards: &mut Vec<NumericGuard>,
) -> (f64, f64) {
    let Some(last) = equity_curve.last() else {
        return (0.0, 0.0);
    };
    if !(initial_equity > 0.0) {
        NumericGuard::record(guards, "total_return", "initial equity is not positive");
        return (0.0, 0.0);
    }
    let growth = last.equity / initial_equity;
    let total_return = growth - 1.0;

    let cagr = if equity_curve.len() < 2 {
        0.0
    } else {
        let value = growth.powf(TRADING_DAYS_PER_YEAR / equity_curve.len() as f64) - 1.0;
        if value.is_finite() {
            value
        } else {
            NumericGuard::record(guards, "cagr", "non-finite growth");
            0.0
        }
    };

    (total_return, cagr)
}

/// Largest peak-to-trough decline as a fraction of the peak, and the longest
/// run of bars spent below a prior peak.
fn compute_drawdown(equity_curve: &[EquityPoint], guards: &mut Vec<NumericGuard>) -> (f64, usize) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut current_duration = 0usize;
    let mut max_duration = 0usize;
    let mut zero_peak_seen = false;

    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
            current_duration = 0;
        } else if peak > 0.0 {
            let dd = ((peak - point.equity) / peak).clamp(0.0, 1.0);
            max_dd = max_dd.max(dd);
            if point.equity < peak {
                current_duration += 1;
                max_duration = max_duration.max(current_duration);
            }
        } else if !zero_peak_seen {
            zero_peak_seen = true;
            NumericGuard::record(guards, "max_drawdown", "peak equity is not positive");
        }
    }

    (max_dd, max_duration)
}

fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

fn compute_risk_adjusted(equity_curve: &[EquityPoint], guards: &mut Vec<NumericGuard>) -> (f64, f64) {
    let mut zero_base = false;
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            if w[0].equity > 0.0 {
                w[1].equity / w[0].equity - 1.0
            } else {
                zero_base = true;
                0.0
            }
        })
        .collect();
    if zero_base {
        NumericGuard::record(guards, "step_returns", "zero equity base treated as flat return");
    }

    if returns.len() < 2 {
        return (0.0, 0.0);
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let annualizer = TRADING_DAYS_PER_YEAR.sqrt();

    let sharpe = annualizer * mean / (sample_std(&returns) + SHARPE_EPSILON);

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let sortino = if downside.len() < 2 {
        NumericGuard::record(
            guards,
            "sortino",
            format!("{} negative returns, need 2", downside.len()),
        );
        0.0
    } else {
        let downside_std = sample_std(&downside);
        if downside_std > 0.0 {
            annualizer * mean / downside_std
        } else {
            NumericGuard::record(guards, "sortino", "zero downside deviation");
            0.0
        }
    };

    (sharpe, sortino)
}
