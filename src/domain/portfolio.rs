//! Long-only, single-instrument portfolio ledger.
//!
//! The same transition function drives the trading environment and the
//! backtest engine. After every transition
//! `net_worth == cash + position * price` holds for the marking price.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Hold,
    Buy,
    Sell,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Hold, Action::Buy, Action::Sell];

    /// Discrete action code: 0 = HOLD, 1 = BUY, 2 = SELL.
    pub fn from_index(index: usize) -> Option<Action> {
        Action::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        match self {
            Action::Hold => 0,
            Action::Buy => 1,
            Action::Sell => 2,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Hold => f.write_str("HOLD"),
            Action::Buy => f.write_str("BUY"),
            Action::Sell => f.write_str("SELL"),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_uppercase().as_str() {
            "HOLD" | "0" => Ok(Action::Hold),
            "BUY" | "1" => Ok(Action::Buy),
            "SELL" | "2" => Ok(Action::Sell),
            _ => Err(format!("unknown action '{}'", trimmed)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

/// An executed order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub action: Action,
    pub date: NaiveDate,
    pub price: f64,
    pub units: f64,
    /// Cash leaving the account on a buy, or gross proceeds on a sell.
    pub gross: f64,
    pub fee: f64,
}

/// A realized BUY -> SELL cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoundTrip {
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub exit_price: f64,
    pub units: f64,
    /// Cash spent on entry, fee included.
    pub entry_spend: f64,
    /// Cash received on exit, fee deducted.
    pub exit_proceeds: f64,
    pub pnl: f64,
}

impl RoundTrip {
    pub fn is_win(&self) -> bool {
        self.exit_proceeds > self.entry_spend
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioState {
    pub cash: f64,
    pub position: f64,
    pub entry_price: f64,
    pub net_worth: f64,
    pub max_net_worth: f64,
    pub step_index: usize,
    transaction_cost: f64,
    position_size_fraction: f64,
    open_entry: Option<(NaiveDate, f64)>,
    round_trips: Vec<RoundTrip>,
}

impl PortfolioState {
    /// `transaction_cost` is a fraction of traded value charged on both sides;
    /// `position_size_fraction` is the share of cash committed by a BUY.
    pub fn new(initial_cash: f64, transaction_cost: f64, position_size_fraction: f64) -> Self {
        PortfolioState {
            cash: initial_cash,
            position: 0.0,
            entry_price: 0.0,
            net_worth: initial_cash,
            max_net_worth: initial_cash,
            step_index: 0,
            transaction_cost,
            position_size_fraction,
            open_entry: None,
            round_trips: Vec::new(),
        }
    }

    pub fn position_state(&self) -> PositionState {
        if self.position > 0.0 {
            PositionState::Long
        } else {
            PositionState::Flat
        }
    }

    pub fn round_trips(&self) -> &[RoundTrip] {
        &self.round_trips
    }

    pub fn into_round_trips(self) -> Vec<RoundTrip> {
        self.round_trips
    }

    /// Execute `action` at `price`, then mark the book to `price` and advance
    /// the step index. Returns the fill, or `None` for a no-op (HOLD, BUY
    /// while long, SELL while flat).
    pub fn apply(&mut self, action: Action, date: NaiveDate, price: f64) -> Option<Fill> {
        let fill = match (action, self.position_state()) {
            (Action::Buy, PositionState::Flat) => self.buy(date, price),
            (Action::Sell, PositionState::Long) => Some(self.sell(date, price)),
            _ => None,
        };
        self.mark(price);
        self.step_index += 1;
        fill
    }

    /// Revalue at `price` and update the running peak.
    pub fn mark(&mut self, price: f64) {
        self.net_worth = self.cash + self.position * price;
        self.max_net_worth = self.max_net_worth.max(self.net_worth);
    }

    fn buy(&mut self, date: NaiveDate, price: f64) -> Option<Fill> {
        let spend = self.cash * self.position_size_fraction;
        if !(spend > 0.0) || !(price > 0.0) {
            return None;
        }
        let fee = spend * self.transaction_cost;
        let units = (spend - fee) / price;

        self.cash -= spend;
        self.position = units;
        self.entry_price = price;
        self.open_entry = Some((date, spend));

        tracing::debug!(%date, price, units, spend, fee, "buy filled");
        Some(Fill {
            action: Action::Buy,
            date,
            price,
            units,
            gross: spend,
            fee,
        })
    }

    fn sell(&mut self, date: NaiveDate, price: f64) -> Fill {
        let units = self.position;
        let proceeds = units * price;
        let fee = proceeds * self.transaction_cost;
        let net = proceeds - fee;

        self.cash += net;
        if let Some((entry_date, entry_spend)) = self.open_entry.take() {
            self.round_trips.push(RoundTrip {
                entry_date,
                exit_date: date,
                entry_price: self.entry_price,
                exit_price: price,
                units,
                entry_spend,
                exit_proceeds: net,
                pnl: net - entry_spend,
            });
        }
        self.position = 0.0;
        self.entry_price = 0.0;

        tracing::debug!(%date, price, units, proceeds, fee, "sell filled");
        Fill {
            action: Action::Sell,
            date,
            price,
            units,
            gross: proceeds,
            fee,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn action_codes() {
        assert_eq!(Action::from_index(1), Some(Action::Buy));
        assert_eq!(Action::from_index(3), None);
        assert_eq!(Action::Sell.index(), 2);
        assert_eq!("sell".parse::<Action>(), Ok(Action::Sell));
        assert_eq!("0".parse::<Action>(), Ok(Action::Hold));
        assert!("short".parse::<Action>().is_err());
    }

    #[test]
    fn buy_while_flat_spends_cash_net_of_fee() {
        let mut p = PortfolioState::new(1000.0, 0.01, 1.0);
        let fill = p.apply(Action::Buy, day(1), 10.0).unwrap();
        assert_relative_eq!(fill.fee, 10.0);
        assert_relative_eq!(p.position, 99.0);
        assert_relative_eq!(p.cash, 0.0);
        assert_relative_eq!(p.net_worth, 990.0);
        assert_eq!(p.position_state(), PositionState::Long);
        assert_eq!(p.step_index, 1);
    }

    #[test]
    fn partial_sizing_keeps_cash() {
        let mut p = PortfolioState::new(1000.0, 0.0, 0.5);
        p.apply(Action::Buy, day(1), 10.0);
        assert_relative_eq!(p.cash, 500.0);
        assert_relative_eq!(p.position, 50.0);
        p.apply(Action::Hold, day(2), 12.0);
        assert_relative_eq!(p.net_worth, 500.0 + 50.0 * 12.0);
    }

    #[test]
    fn buy_while_long_is_noop() {
        let mut p = PortfolioState::new(1000.0, 0.001, 1.0);
        p.apply(Action::Buy, day(1), 10.0);
        let before = (p.cash, p.position, p.entry_price);
        assert!(p.apply(Action::Buy, day(2), 11.0).is_none());
        assert_eq!(before, (p.cash, p.position, p.entry_price));
    }

    #[test]
    fn sell_while_flat_is_noop() {
        let mut p = PortfolioState::new(1000.0, 0.001, 1.0);
        assert!(p.apply(Action::Sell, day(1), 10.0).is_none());
        assert_relative_eq!(p.cash, 1000.0);
        assert_relative_eq!(p.net_worth, 1000.0);
    }

    #[test]
    fn sell_records_round_trip() {
        let mut p = PortfolioState::new(1000.0, 0.01, 1.0);
        p.apply(Action::Buy, day(1), 10.0);
        let fill = p.apply(Action::Sell, day(2), 11.0).unwrap();
        assert_relative_eq!(fill.gross, 99.0 * 11.0);
        assert_relative_eq!(p.cash, 1089.0 - 10.89);
        assert_eq!(p.position_state(), PositionState::Flat);

        let trip = p.round_trips()[0];
        assert_eq!(trip.entry_date, day(1));
        assert_eq!(trip.exit_date, day(2));
        assert_relative_eq!(trip.entry_spend, 1000.0);
        assert_relative_eq!(trip.pnl, 1078.11 - 1000.0, epsilon = 1e-9);
        assert!(trip.is_win());
    }

    #[test]
    fn flat_round_trip_with_costs_loses() {
        let mut p = PortfolioState::new(1000.0, 0.001, 1.0);
        p.apply(Action::Buy, day(1), 10.0);
        p.apply(Action::Sell, day(2), 10.0);
        assert!(!p.round_trips()[0].is_win());
        assert!(p.cash < 1000.0);
    }

    #[test]
    fn peak_tracks_max_net_worth() {
        let mut p = PortfolioState::new(100.0, 0.0, 1.0);
        p.apply(Action::Buy, day(1), 1.0);
        p.apply(Action::Hold, day(2), 2.0);
        p.apply(Action::Hold, day(3), 1.5);
        assert_relative_eq!(p.max_net_worth, 200.0);
        assert_relative_eq!(p.net_worth, 150.0);
    }
}
