//! Signal fusion: scalar model outputs in, one auditable decision out.
//!
//! `fuse` is total. Missing or non-finite inputs contribute nothing.

use serde::Serialize;
use std::collections::BTreeMap;

use super::portfolio::Action;
use super::regime::RegimeLabel;

pub const NO_STRONG_SIGNAL: &str = "No strong signal";

/// Raw inputs to the fusion step. `None` means the signal is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Signals {
    /// Classifier probability that the next bar closes higher, in [0, 1].
    pub ml_prob_up: Option<f64>,
    /// Primary return forecast. An exact `0.0` scores bearish; `None` scores nothing.
    pub forecast_a: Option<f64>,
    /// Secondary return forecast; only a positive value counts.
    pub forecast_b: Option<f64>,
    pub regime: Option<RegimeLabel>,
    pub policy_action: Option<Action>,
    /// News sentiment in [-1, 1].
    pub sentiment: Option<f64>,
}

impl Signals {
    /// Build from string pairs such as `ml_prob_up=0.7`. Unknown keys are
    /// ignored; values that do not parse are left neutral.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut signals = Signals::default();
        for (key, value) in pairs {
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "ml_prob_up" => signals.ml_prob_up = value.parse().ok(),
                "forecast_a" => signals.forecast_a = value.parse().ok(),
                "forecast_b" => signals.forecast_b = value.parse().ok(),
                "regime" => signals.regime = value.parse().ok(),
                "policy_action" => signals.policy_action = value.parse().ok(),
                "sentiment" => signals.sentiment = value.parse().ok(),
                other => tracing::debug!(key = other, "ignoring unknown signal key"),
            }
        }
        signals
    }

    /// Fields set in `overrides` replace the ones in `self`.
    pub fn merged(self, overrides: &Signals) -> Signals {
        Signals {
            ml_prob_up: overrides.ml_prob_up.or(self.ml_prob_up),
            forecast_a: overrides.forecast_a.or(self.forecast_a),
            forecast_b: overrides.forecast_b.or(self.forecast_b),
            regime: overrides.regime.or(self.regime),
            policy_action: overrides.policy_action.or(self.policy_action),
            sentiment: overrides.sentiment.or(self.sentiment),
        }
    }

    /// Flat `key -> value` view, for snapshots and logs.
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        let mut put = |k: &'static str, v: Option<String>| {
            map.insert(k, v.unwrap_or_else(|| "none".to_string()));
        };
        put("ml_prob_up", self.ml_prob_up.map(|v| v.to_string()));
        put("forecast_a", self.forecast_a.map(|v| v.to_string()));
        put("forecast_b", self.forecast_b.map(|v| v.to_string()));
        put("regime", self.regime.map(|v| v.to_string()));
        put("policy_action", self.policy_action.map(|v| v.to_string()));
        put("sentiment", self.sentiment.map(|v| v.to_string()));
        map
    }
}

/// Every threshold and weight used by [`fuse`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionWeights {
    pub ml_bullish_above: f64,
    pub ml_bearish_below: f64,
    pub ml_weight: f64,
    pub forecast_a_weight: f64,
    pub forecast_b_bonus: f64,
    pub regime_weight: f64,
    pub policy_weight: f64,
    pub sentiment_threshold: f64,
    pub sentiment_weight: f64,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    /// Score is clamped to `[-max_score, max_score]`; confidence is
    /// `|score| / max_score`. A non-positive or non-finite value falls back
    /// to the default bound.
    pub max_score: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        FusionWeights {
            ml_bullish_above: 0.6,
            ml_bearish_below: 0.4,
            ml_weight: 1.0,
            forecast_a_weight: 1.0,
            forecast_b_bonus: 0.5,
            regime_weight: 1.0,
            policy_weight: 1.0,
            sentiment_threshold: 0.2,
            sentiment_weight: 1.0,
            buy_threshold: 2.0,
            sell_threshold: -2.0,
            max_score: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub action: Action,
    pub score: f64,
    pub confidence: f64,
    pub explanation: Vec<String>,
}

impl Decision {
    pub fn hold(reason: &str) -> Self {
        Decision {
            action: Action::Hold,
            score: 0.0,
            confidence: 0.0,
            explanation: vec![reason.to_string()],
        }
    }

    pub fn explanation_text(&self) -> String {
        self.explanation.join(" | ")
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

pub fn fuse(signals: &Signals, weights: &FusionWeights) -> Decision {
    let mut score = 0.0;
    let mut reasons: Vec<String> = Vec::new();
    let mut add = |delta: f64, reason: &str| {
        score += delta;
        reasons.push(reason.to_string());
    };

    if let Some(p) = finite(signals.ml_prob_up) {
        if p > weights.ml_bullish_above {
            add(weights.ml_weight, "ML model is bullish");
        } else if p < weights.ml_bearish_below {
            add(-weights.ml_weight, "ML model is bearish");
        }
    }

    if let Some(r) = finite(signals.forecast_a) {
        if r > 0.0 {
            add(weights.forecast_a_weight, "Primary forecast predicts positive return");
        } else {
            add(-weights.forecast_a_weight, "Primary forecast predicts negative return");
        }
    }

    if finite(signals.forecast_b).is_some_and(|r| r > 0.0) {
        add(weights.forecast_b_bonus, "Secondary forecast confirms upside");
    }

    match signals.regime {
        Some(RegimeLabel::Bull) => add(weights.regime_weight, "Market regime is bullish"),
        Some(RegimeLabel::Bear) => add(-weights.regime_weight, "Market regime is bearish"),
        _ => {}
    }

    match signals.policy_action {
        Some(Action::Buy) => add(weights.policy_weight, "Policy agent suggests BUY"),
        Some(Action::Sell) => add(-weights.policy_weight, "Policy agent suggests SELL"),
        _ => {}
    }

    if let Some(s) = finite(signals.sentiment) {
        if s > weights.sentiment_threshold {
            add(weights.sentiment_weight, "Positive news sentiment");
        } else if s < -weights.sentiment_threshold {
            add(-weights.sentiment_weight, "Negative news sentiment");
        }
    }

    let bound = if weights.max_score.is_finite() && weights.max_score > 0.0 {
        weights.max_score
    } else {
        FusionWeights::default().max_score
    };
    let score = score.clamp(-bound, bound);
    let action = if score >= weights.buy_threshold {
        Action::Buy
    } else if score <= weights.sell_threshold {
        Action::Sell
    } else {
        Action::Hold
    };
    let confidence = (score.abs() / bound).min(1.0);
    if reasons.is_empty() {
        reasons.push(NO_STRONG_SIGNAL.to_string());
    }

    Decision {
        action,
        score,
        confidence,
        explanation: reasons,
    }
}
