//! Backtest engine and decision loop.
//!
//! `run_backtest` walks the bars in date order from `warmup_bars`, asks a
//! [`DecisionPolicy`] for a decision on the bars seen so far, applies it to a
//! [`PortfolioState`] at the bar's close, and records the net worth.

use chrono::NaiveDate;
use serde::Serialize;

use super::decision::Decision;
use super::error::SignalfuseError;
use super::features::FeatureFrame;
use super::metrics::{Metrics, NumericGuard};
use super::ohlcv::{OhlcvBar, PriceSeries};
use super::portfolio::{Action, EquityPoint, Fill, PortfolioState, RoundTrip};
use super::regime::{self, RegimeConfig, RegimeLabel, RegimeModel};
use super::technical::{self, Fundamentals};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Fraction of traded value charged on each fill.
    pub transaction_cost: f64,
    /// Share of available cash committed by each BUY, in (0, 1].
    pub position_size_fraction: f64,
    /// Bars skipped before the first decision.
    pub warmup_bars: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 100_000.0,
            transaction_cost: 0.001,
            position_size_fraction: 1.0,
            warmup_bars: 0,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), SignalfuseError> {
        if !(self.initial_capital > 0.0) || !self.initial_capital.is_finite() {
            return Err(SignalfuseError::invalid(
                "backtest",
                "initial_capital",
                format!("must be positive (got {})", self.initial_capital),
            ));
        }
        if !(0.0..1.0).contains(&self.transaction_cost) {
            return Err(SignalfuseError::invalid(
                "backtest",
                "transaction_cost",
                format!("must be in [0, 1) (got {})", self.transaction_cost),
            ));
        }
        if !(self.position_size_fraction > 0.0 && self.position_size_fraction <= 1.0) {
            return Err(SignalfuseError::invalid(
                "backtest",
                "position_size",
                format!("must be in (0, 1] (got {})", self.position_size_fraction),
            ));
        }
        Ok(())
    }
}

/// Produces one decision per bar from the bars seen so far.
///
/// `bars` is the prefix `bars[..=index]`; implementations must not look past
/// it.
pub trait DecisionPolicy {
    fn decide(&mut self, bars: &[OhlcvBar], index: usize) -> Decision;

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> DecisionPolicy for F
where
    F: FnMut(&[OhlcvBar], usize) -> Decision,
{
    fn decide(&mut self, bars: &[OhlcvBar], index: usize) -> Decision {
        self(bars, index)
    }
}

/// Precomputed action per bar index. Indices past the end hold.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSeries {
    actions: Vec<Action>,
}

impl ActionSeries {
    pub fn new(actions: Vec<Action>) -> Self {
        ActionSeries { actions }
    }
}

impl DecisionPolicy for ActionSeries {
    fn decide(&mut self, _bars: &[OhlcvBar], index: usize) -> Decision {
        match self.actions.get(index) {
            Some(&action) => Decision {
                action,
                score: 0.0,
                confidence: 1.0,
                explanation: vec![format!("Scheduled {}", action)],
            },
            None => Decision::hold("No scheduled action"),
        }
    }

    fn name(&self) -> &str {
        "action-series"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuyAndHold;

impl DecisionPolicy for BuyAndHold {
    fn decide(&mut self, _bars: &[OhlcvBar], _index: usize) -> Decision {
        Decision {
            action: Action::Buy,
            score: 0.0,
            confidence: 1.0,
            explanation: vec!["Buy and hold".to_string()],
        }
    }

    fn name(&self) -> &str {
        "buy-and-hold"
    }
}

/// The technical rule signal applied bar by bar.
#[derive(Debug, Clone)]
pub struct TechnicalPolicy {
    frame: FeatureFrame,
    fundamentals: Fundamentals,
}

impl TechnicalPolicy {
    /// Indicators are causal, so one frame over the full series gives the
    /// same readings as a frame rebuilt on every prefix.
    pub fn new(series: &PriceSeries, fundamentals: Fundamentals) -> Self {
        TechnicalPolicy {
            frame: FeatureFrame::build(series),
            fundamentals,
        }
    }
}

impl DecisionPolicy for TechnicalPolicy {
    fn decide(&mut self, bars: &[OhlcvBar], index: usize) -> Decision {
        let fundamentals = technical::with_price_levels(bars, &self.fundamentals);
        technical::evaluate(&self.frame.indicators_at(index), &fundamentals)
    }

    fn name(&self) -> &str {
        "technical"
    }
}

/// Trades the latest regime label: BUY in a bull regime, SELL in a bear
/// regime. The model is refit on the prefix every `refit_every` bars.
#[derive(Debug, Clone)]
pub struct RegimePolicy {
    config: RegimeConfig,
    refit_every: usize,
    model: Option<RegimeModel>,
    last_fit: Option<usize>,
}

impl RegimePolicy {
    pub fn new(config: RegimeConfig, refit_every: usize) -> Self {
        RegimePolicy {
            config,
            refit_every: refit_every.max(1),
            model: None,
            last_fit: None,
        }
    }

    /// Latest label for the prefix `bars`, refitting first when the model is
    /// missing or stale.
    pub fn label(&mut self, bars: &[OhlcvBar], index: usize) -> Result<RegimeLabel, SignalfuseError> {
        let prefix = PriceSeries::new(bars.to_vec())?;
        let stale = self
            .last_fit
            .is_none_or(|at| index >= at + self.refit_every);
        if self.model.is_none() || stale {
            self.model = Some(regime::fit_regime(&prefix, &self.config)?);
            self.last_fit = Some(index);
        }
        self.model
            .as_ref()
            .ok_or(SignalfuseError::ModelNotFitted)?
            .predict_latest(&prefix)
    }
}

impl DecisionPolicy for RegimePolicy {
    fn decide(&mut self, bars: &[OhlcvBar], index: usize) -> Decision {
        match self.label(bars, index) {
            Ok(RegimeLabel::Bull) => Decision {
                action: Action::Buy,
                score: 1.0,
                confidence: 1.0,
                explanation: vec!["Market regime is bullish".to_string()],
            },
            Ok(RegimeLabel::Bear) => Decision {
                action: Action::Sell,
                score: -1.0,
                confidence: 1.0,
                explanation: vec!["Market regime is bearish".to_string()],
            },
            Ok(RegimeLabel::Sideways) => Decision::hold("Market regime is sideways"),
            Err(err) => {
                tracing::debug!(index, error = %err, "regime unavailable; holding");
                Decision::hold("Regime unavailable")
            }
        }
    }

    fn name(&self) -> &str {
        "regime"
    }
}

/// Output of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub policy: String,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: Metrics,
    pub round_trips: Vec<RoundTrip>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub fills: usize,
    pub numeric_guards: Vec<NumericGuard>,
}

impl BacktestResult {
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.equity_curve.first().map(|p| p.date)
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.equity_curve.last().map(|p| p.date)
    }
}

pub fn run_backtest(
    series: &PriceSeries,
    policy: &mut dyn DecisionPolicy,
    config: &BacktestConfig,
) -> Result<BacktestResult, SignalfuseError> {
    config.validate()?;
    let bars = series.bars();
    if bars.is_empty() {
        return Err(SignalfuseError::data("price series is empty"));
    }
    if config.warmup_bars >= bars.len() {
        return Err(SignalfuseError::InsufficientData {
            context: "backtest after warmup".to_string(),
            available: bars.len(),
            minimum: config.warmup_bars + 1,
        });
    }

    let mut portfolio = PortfolioState::new(
        config.initial_capital,
        config.transaction_cost,
        config.position_size_fraction,
    );
    let mut equity_curve = Vec::with_capacity(bars.len() - config.warmup_bars);
    let mut fills: Vec<Fill> = Vec::new();

    for index in config.warmup_bars..bars.len() {
        let bar = &bars[index];
        let decision = policy.decide(&bars[..=index], index);
        if let Some(fill) = portfolio.apply(decision.action, bar.date, bar.close) {
            fills.push(fill);
        }
        equity_curve.push(EquityPoint {
            date: bar.date,
            equity: portfolio.net_worth,
        });
    }

    let round_trips = portfolio.into_round_trips();
    let mut numeric_guards = Vec::new();
    let metrics = Metrics::compute(
        config.initial_capital,
        &equity_curve,
        &round_trips,
        &mut numeric_guards,
    );
    let final_equity = equity_curve
        .last()
        .map(|p| p.equity)
        .unwrap_or(config.initial_capital);

    tracing::info!(
        policy = policy.name(),
        bars = equity_curve.len(),
        fills = fills.len(),
        round_trips = round_trips.len(),
        total_return = metrics.total_return,
        max_drawdown = metrics.max_drawdown,
        "backtest complete"
    );

    Ok(BacktestResult {
        policy: policy.name().to_string(),
        equity_curve,
        metrics,
        round_trips,
        initial_capital: config.initial_capital,
        final_equity,
        fills: fills.len(),
        numeric_guards,
    })
}
