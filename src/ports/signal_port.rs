//! Ports for the external predictive collaborators.
//!
//! Each returns a plain scalar (or action). A non-finite number means the
//! collaborator had nothing usable to say and is treated as neutral.

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::decision::Signals;
use crate::domain::features::FeatureFrame;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::portfolio::Action;
use crate::domain::technical::Fundamentals;

/// Classifier estimating the probability that the next close is higher.
pub trait DirectionClassifier: Send + Sync {
    fn prob_up(&self, bars: &[OhlcvBar], frame: &FeatureFrame) -> f64;
}

/// Regressor forecasting the next-bar return.
pub trait ReturnPredictor: Send + Sync {
    fn predict(&self, bars: &[OhlcvBar], frame: &FeatureFrame) -> f64;
}

/// Trained policy mapping an environment observation to an action.
pub trait PolicyAgent: Send + Sync {
    fn act(&self, observation: &[f64]) -> Action;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewsSentiment {
    /// Aggregate polarity in [-1, 1].
    pub score: f64,
    pub summary: String,
}

pub trait NewsSentimentProvider: Send + Sync {
    fn sentiment(&self, symbol: &str) -> NewsSentiment;
}

pub trait FundamentalsProvider: Send + Sync {
    /// Snapshot for `symbol`; unknown fields are 0.0.
    fn fundamentals(&self, symbol: &str) -> Fundamentals;
}

/// Precomputed signals looked up by date, for replaying external model output
/// in a backtest.
pub trait SignalHistory {
    /// Latest recorded signals on or before `date`; all-neutral if none.
    fn signals_as_of(&self, date: NaiveDate) -> Signals;
}
