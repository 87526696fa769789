//! Episodic trading MDP over a single price series.
//!
//! State is the step index plus a flat/long portfolio; actions are
//! HOLD/BUY/SELL; the reward is the net-worth change minus a drawdown
//! penalty. Transitions share [`PortfolioState::apply`] with the backtest.

use super::error::SignalfuseError;
use super::features::{FeatureColumn, FeatureFrame};
use super::ohlcv::PriceSeries;
use super::portfolio::{Action, Fill, PortfolioState};

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentConfig {
    pub initial_balance: f64,
    pub transaction_cost: f64,
    pub drawdown_penalty: f64,
    pub features: Vec<FeatureColumn>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            initial_balance: 100_000.0,
            transaction_cost: 0.001,
            drawdown_penalty: 0.1,
            features: FeatureColumn::MODEL_INPUTS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Observation for the next step; `None` once the episode is done.
    pub observation: Option<Vec<f64>>,
    pub reward: f64,
    pub done: bool,
    pub net_worth: f64,
    pub cash: f64,
    pub position: f64,
    pub fill: Option<Fill>,
}

#[derive(Debug, Clone)]
pub struct TradingEnvironment {
    series: PriceSeries,
    frame: FeatureFrame,
    config: EnvironmentConfig,
    start: usize,
    current: usize,
    done: bool,
    portfolio: PortfolioState,
}

impl TradingEnvironment {
    /// The episode starts at the first bar where every selected feature is
    /// defined and needs at least one more bar after it.
    pub fn new(series: PriceSeries, config: EnvironmentConfig) -> Result<Self, SignalfuseError> {
        let frame = FeatureFrame::build(&series);
        let start = frame
            .first_complete_row(&config.features)
            .filter(|&s| s + 1 < series.len())
            .ok_or_else(|| SignalfuseError::InsufficientData {
                context: "environment episode".to_string(),
                available: series.len(),
                minimum: frame.first_complete_row(&config.features).unwrap_or(series.len()) + 2,
            })?;

        let portfolio = PortfolioState::new(config.initial_balance, config.transaction_cost, 1.0);
        Ok(TradingEnvironment {
            series,
            frame,
            config,
            start,
            current: start,
            done: false,
            portfolio,
        })
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn current_step(&self) -> usize {
        self.current
    }

    pub fn start_step(&self) -> usize {
        self.start
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn portfolio(&self) -> &PortfolioState {
        &self.portfolio
    }

    /// Restore the initial state and return the first observation.
    pub fn reset(&mut self) -> Vec<f64> {
        self.current = self.start;
        self.done = false;
        self.portfolio = PortfolioState::new(
            self.config.initial_balance,
            self.config.transaction_cost,
            1.0,
        );
        // `start` is a complete row by construction.
        self.frame
            .row(&self.config.features, self.start)
            .unwrap_or_default()
    }

    pub fn observation(&self) -> Option<Vec<f64>> {
        if self.done {
            return None;
        }
        self.frame.row(&self.config.features, self.current)
    }

    pub fn step(&mut self, action: Action) -> Result<StepOutcome, SignalfuseError> {
        if self.done {
            return Err(SignalfuseError::EpisodeFinished { step: self.current });
        }

        let bar = &self.series.bars()[self.current];
        let previous = self.portfolio.net_worth;
        let fill = self.portfolio.apply(action, bar.date, bar.close);

        let peak = self.portfolio.max_net_worth;
        let drawdown = if peak > 0.0 {
            (peak - self.portfolio.net_worth) / peak
        } else {
            tracing::debug!(step = self.current, "zero peak net worth; drawdown penalty skipped");
            0.0
        };
        let reward = self.portfolio.net_worth - previous - self.config.drawdown_penalty * drawdown;

        self.current += 1;
        self.done = self.current >= self.series.len() - 1;

        Ok(StepOutcome {
            observation: self.observation(),
            reward,
            done: self.done,
            net_worth: self.portfolio.net_worth,
            cash: self.portfolio.cash,
            position: self.portfolio.position,
            fill,
        })
    }
}
