//! Signal pipeline: collect every available signal for the latest bar and
//! fuse them into one decision.
//!
//! Collaborators are optional. A missing collaborator, a non-finite answer or
//! a failed regime fit leaves the corresponding signal neutral.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

use super::backtest::{DecisionPolicy, RegimePolicy};
use super::decision::{fuse, Decision, FusionWeights, Signals};
use super::features::{FeatureColumn, FeatureFrame};
use super::ohlcv::{OhlcvBar, PriceSeries};
use super::regime::{detect_regime, RegimeConfig};
use super::technical::{self, Fundamentals};
use crate::ports::signal_port::{
    DirectionClassifier, FundamentalsProvider, NewsSentimentProvider, PolicyAgent,
    ReturnPredictor, SignalHistory,
};

/// The external collaborators consulted by [`run_pipeline`].
#[derive(Clone, Default)]
pub struct SignalSources {
    pub classifier: Option<Arc<dyn DirectionClassifier>>,
    pub forecast_a: Option<Arc<dyn ReturnPredictor>>,
    pub forecast_b: Option<Arc<dyn ReturnPredictor>>,
    pub policy: Option<Arc<dyn PolicyAgent>>,
    pub news: Option<Arc<dyn NewsSentimentProvider>>,
    pub fundamentals: Option<Arc<dyn FundamentalsProvider>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub symbol: String,
    pub regime: RegimeConfig,
    pub weights: FusionWeights,
    /// Observation columns handed to the policy agent.
    pub observation_features: Vec<FeatureColumn>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            symbol: String::new(),
            regime: RegimeConfig::default(),
            weights: FusionWeights::default(),
            observation_features: FeatureColumn::MODEL_INPUTS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub close: f64,
    pub fundamentals: Fundamentals,
    pub technical: Decision,
    pub signals: Signals,
    pub decision: Decision,
    pub news_summary: Option<String>,
    /// Why the regime signal is missing, when it is.
    pub regime_note: Option<String>,
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Gather signals for the last bar of `series`, overlay `overrides`, and fuse.
pub fn run_pipeline(
    series: &PriceSeries,
    sources: &SignalSources,
    config: &PipelineConfig,
    overrides: &Signals,
) -> PipelineOutput {
    let bars = series.bars();
    let last = series.last();
    let frame = FeatureFrame::build(series);
    let index = series.len() - 1;

    let snapshot = sources
        .fundamentals
        .as_ref()
        .map(|p| p.fundamentals(&config.symbol))
        .unwrap_or_default();
    let fundamentals = technical::with_price_levels(bars, &snapshot);
    let technical = technical::evaluate(&frame.indicators_at(index), &fundamentals);

    let (regime, regime_note) = match detect_regime(series, &config.regime) {
        Ok(label) => (Some(label), None),
        Err(err) => {
            tracing::debug!(error = %err, "regime signal unavailable");
            (None, Some(err.to_string()))
        }
    };

    let news = sources.news.as_ref().map(|p| p.sentiment(&config.symbol));
    let policy_action = sources.policy.as_ref().and_then(|agent| {
        frame
            .row(&config.observation_features, index)
            .map(|obs| agent.act(&obs))
    });

    let gathered = Signals {
        ml_prob_up: sources
            .classifier
            .as_ref()
            .and_then(|c| finite(c.prob_up(bars, &frame))),
        forecast_a: sources
            .forecast_a
            .as_ref()
            .and_then(|p| finite(p.predict(bars, &frame))),
        forecast_b: sources
            .forecast_b
            .as_ref()
            .and_then(|p| finite(p.predict(bars, &frame))),
        regime,
        policy_action,
        sentiment: news.as_ref().and_then(|n| finite(n.score)),
    };
    let signals = gathered.merged(overrides);
    let decision = fuse(&signals, &config.weights);

    tracing::info!(
        symbol = %config.symbol,
        as_of = %last.date,
        action = %decision.action,
        score = decision.score,
        confidence = decision.confidence,
        "signals fused"
    );

    PipelineOutput {
        symbol: config.symbol.clone(),
        as_of: last.date,
        close: last.close,
        fundamentals,
        technical,
        signals,
        decision,
        news_summary: news.map(|n| n.summary).filter(|s| !s.is_empty()),
        regime_note,
    }
}

/// Replays recorded signals bar by bar. A bar without a recorded regime gets
/// one from the embedded [`RegimePolicy`], when present.
pub struct FusionPolicy<'a> {
    history: &'a dyn SignalHistory,
    weights: FusionWeights,
    regime: Option<RegimePolicy>,
}

impl<'a> FusionPolicy<'a> {
    pub fn new(history: &'a dyn SignalHistory, weights: FusionWeights, regime: Option<RegimePolicy>) -> Self {
        FusionPolicy {
            history,
            weights,
            regime,
        }
    }
}

impl DecisionPolicy for FusionPolicy<'_> {
    fn decide(&mut self, bars: &[OhlcvBar], index: usize) -> Decision {
        let Some(bar) = bars.last() else {
            return Decision::hold("No bars");
        };
        let mut signals = self.history.signals_as_of(bar.date);
        if signals.regime.is_none() {
            if let Some(policy) = self.regime.as_mut() {
                signals.regime = policy.label(bars, index).ok();
            }
        }
        fuse(&signals, &self.weights)
    }

    fn name(&self) -> &str {
        "fusion"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;
    use crate::domain::portfolio::Action;
    use crate::domain::regime::RegimeLabel;
    use crate::ports::signal_port::NewsSentiment;

    struct Fixed(f64);

    impl DirectionClassifier for Fixed {
        fn prob_up(&self, _bars: &[OhlcvBar], _frame: &FeatureFrame) -> f64 {
            self.0
        }
    }

    impl ReturnPredictor for Fixed {
        fn predict(&self, _bars: &[OhlcvBar], _frame: &FeatureFrame) -> f64 {
            self.0
        }
    }

    struct AlwaysBuy;

    impl PolicyAgent for AlwaysBuy {
        fn act(&self, observation: &[f64]) -> Action {
            assert_eq!(observation.len(), 4);
            Action::Buy
        }
    }

    struct Upbeat;

    impl NewsSentimentProvider for Upbeat {
        fn sentiment(&self, _symbol: &str) -> NewsSentiment {
            NewsSentiment {
                score: 0.6,
                summary: "earnings beat".to_string(),
            }
        }
    }

    fn rising(n: usize) -> PriceSeries {
        PriceSeries::new(make_bars(
            &(0..n).map(|i| 100.0 * 1.002_f64.powi(i as i32)).collect::<Vec<_>>(),
        ))
        .unwrap()
    }

    #[test]
    fn without_sources_only_regime_can_speak() {
        let s = rising(10);
        let out = run_pipeline(&s, &SignalSources::default(), &PipelineConfig::default(), &Signals::default());
        assert!(out.regime_note.is_some());
        assert_eq!(out.signals, Signals::default());
        assert_eq!(out.decision.action, Action::Hold);
        assert_eq!(out.as_of, s.last().date);
    }

    #[test]
    fn all_sources_bullish() {
        let s = rising(60);
        let sources = SignalSources {
            classifier: Some(Arc::new(Fixed(0.9))),
            forecast_a: Some(Arc::new(Fixed(0.01))),
            forecast_b: Some(Arc::new(Fixed(0.02))),
            policy: Some(Arc::new(AlwaysBuy)),
            news: Some(Arc::new(Upbeat)),
            fundamentals: None,
        };
        let out = run_pipeline(&s, &sources, &PipelineConfig::default(), &Signals::default());
        assert_eq!(out.decision.action, Action::Buy);
        assert!(out.decision.score >= 4.5);
        assert_eq!(out.news_summary.as_deref(), Some("earnings beat"));
    }

    #[test]
    fn non_finite_predictions_are_dropped() {
        let s = rising(10);
        let sources = SignalSources {
            forecast_a: Some(Arc::new(Fixed(f64::NAN))),
            ..SignalSources::default()
        };
        let out = run_pipeline(&s, &sources, &PipelineConfig::default(), &Signals::default());
        assert_eq!(out.signals.forecast_a, None);
    }

    #[test]
    fn overrides_win() {
        let s = rising(10);
        let overrides = Signals {
            regime: Some(RegimeLabel::Bear),
            policy_action: Some(Action::Sell),
            ..Signals::default()
        };
        let out = run_pipeline(&s, &SignalSources::default(), &PipelineConfig::default(), &overrides);
        assert_eq!(out.decision.action, Action::Sell);
    }

    struct Recorded;

    impl SignalHistory for Recorded {
        fn signals_as_of(&self, _date: NaiveDate) -> Signals {
            Signals {
                ml_prob_up: Some(0.8),
                forecast_a: Some(0.01),
                ..Signals::default()
            }
        }
    }

    #[test]
    fn fusion_policy_replays_history() {
        let s = rising(5);
        let history = Recorded;
        let mut policy = FusionPolicy::new(&history, FusionWeights::default(), None);
        let d = policy.decide(s.bars(), 4);
        assert_eq!(d.action, Action::Buy);
        assert_eq!(policy.name(), "fusion");
    }
}
