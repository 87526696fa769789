//! Market regime detection with a Gaussian hidden Markov model.
//!
//! Observations are `(log return, rolling volatility)` pairs. After fitting,
//! states are ranked by mean return and mapped onto [`RegimeLabel`]s; the
//! mapping is fixed for the lifetime of a [`RegimeModel`].

pub mod gaussian;
pub mod hmm;

use chrono::NaiveDate;
use ndarray::Array2;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub use gaussian::CovarianceType;
pub use hmm::{FitReport, GaussianHmm};

use super::error::SignalfuseError;
use super::indicator::rolling_stddev;
use super::ohlcv::PriceSeries;

pub const MIN_BARS: usize = 30;
pub const MIN_CLEAN_RETURNS: usize = 20;
pub const VOLATILITY_WINDOW: usize = 10;
pub const EXTREME_RETURN: f64 = 0.5;
const DEGENERATE_SPREAD: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeLabel {
    Bear,
    Sideways,
    Bull,
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegimeLabel::Bear => f.write_str("BEAR"),
            RegimeLabel::Sideways => f.write_str("SIDEWAYS"),
            RegimeLabel::Bull => f.write_str("BULL"),
        }
    }
}

impl FromStr for RegimeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BEAR" => Ok(RegimeLabel::Bear),
            "SIDEWAYS" | "NEUTRAL" => Ok(RegimeLabel::Sideways),
            "BULL" => Ok(RegimeLabel::Bull),
            other => Err(format!("unknown regime label '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeConfig {
    pub n_states: usize,
    pub covariance: CovarianceType,
    pub max_iter: usize,
    pub tol: f64,
    pub min_variance: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        RegimeConfig {
            n_states: 2,
            covariance: CovarianceType::Diagonal,
            max_iter: 200,
            tol: 1e-4,
            min_variance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegimePoint {
    pub date: NaiveDate,
    pub label: RegimeLabel,
}

/// Feature rows for the HMM plus the bar date each row belongs to.
#[derive(Debug, Clone)]
pub struct RegimeFeatures {
    pub dates: Vec<NaiveDate>,
    pub observations: Array2<f64>,
    /// Log returns left after the extreme-move filter.
    pub clean_returns: usize,
}

/// Log return per bar with `|r| >= EXTREME_RETURN` discarded, paired with the
/// sample volatility of the preceding `VOLATILITY_WINDOW` clean returns.
pub fn regime_features(series: &PriceSeries) -> RegimeFeatures {
    let bars = series.bars();
    let mut dates = Vec::new();
    let mut returns = Vec::new();
    for w in bars.windows(2) {
        let r = (w[1].close / w[0].close).ln();
        if r.is_finite() && r.abs() < EXTREME_RETURN {
            dates.push(w[1].date);
            returns.push(r);
        }
    }

    let volatility = rolling_stddev(&returns, VOLATILITY_WINDOW);
    let rows: Vec<(NaiveDate, f64, f64)> = dates
        .iter()
        .zip(&returns)
        .zip(&volatility)
        .filter_map(|((d, r), v)| v.map(|v| (*d, *r, v)))
        .collect();

    let observations = Array2::from_shape_fn((rows.len(), 2), |(i, j)| {
        if j == 0 { rows[i].1 } else { rows[i].2 }
    });

    RegimeFeatures {
        dates: rows.iter().map(|r| r.0).collect(),
        observations,
        clean_returns: returns.len(),
    }
}

/// A fitted regime model. Immutable after [`fit_regime`].
#[derive(Debug, Clone)]
pub struct RegimeModel {
    hmm: GaussianHmm,
    labels: Vec<RegimeLabel>,
    degenerate: bool,
    report: FitReport,
}

impl RegimeModel {
    pub fn report(&self) -> &FitReport {
        &self.report
    }

    pub fn hmm(&self) -> &GaussianHmm {
        &self.hmm
    }

    /// True when the fitted states are indistinguishable by mean return.
    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    pub fn label_for_state(&self, state: usize) -> RegimeLabel {
        if self.degenerate {
            return RegimeLabel::Sideways;
        }
        self.labels
            .get(state)
            .copied()
            .unwrap_or(RegimeLabel::Sideways)
    }

    /// One label per feature row, aligned to the tail of `series`.
    pub fn predict_series(&self, series: &PriceSeries) -> Result<Vec<RegimePoint>, SignalfuseError> {
        let features = regime_features(series);
        if features.dates.is_empty() {
            return Err(SignalfuseError::InsufficientData {
                context: "regime prediction".to_string(),
                available: features.clean_returns,
                minimum: VOLATILITY_WINDOW,
            });
        }
        let path = self.hmm.viterbi(features.observations.view());
        Ok(features
            .dates
            .iter()
            .zip(path)
            .map(|(date, state)| RegimePoint {
                date: *date,
                label: self.label_for_state(state),
            })
            .collect())
    }

    pub fn predict_latest(&self, series: &PriceSeries) -> Result<RegimeLabel, SignalfuseError> {
        let points = self.predict_series(series)?;
        Ok(points
            .last()
            .map(|p| p.label)
            .unwrap_or(RegimeLabel::Sideways))
    }
}

fn labels_by_rank(means: &[f64]) -> Vec<RegimeLabel> {
    let mut order: Vec<usize> = (0..means.len()).collect();
    order.sort_by(|&a, &b| means[a].total_cmp(&means[b]).then(a.cmp(&b)));

    let ladder: &[RegimeLabel] = if means.len() == 3 {
        &[RegimeLabel::Bear, RegimeLabel::Sideways, RegimeLabel::Bull]
    } else {
        &[RegimeLabel::Bear, RegimeLabel::Bull]
    };

    let mut labels = vec![RegimeLabel::Sideways; means.len()];
    for (rank, state) in order.into_iter().enumerate() {
        labels[state] = ladder.get(rank).copied().unwrap_or(RegimeLabel::Sideways);
    }
    labels
}

pub fn fit_regime(series: &PriceSeries, config: &RegimeConfig) -> Result<RegimeModel, SignalfuseError> {
    if !(2..=3).contains(&config.n_states) {
        return Err(SignalfuseError::invalid(
            "regime",
            "n_states",
            format!("must be 2 or 3 (got {})", config.n_states),
        ));
    }
    if series.len() < MIN_BARS {
        return Err(SignalfuseError::InsufficientData {
            context: "regime fit bars".to_string(),
            available: series.len(),
            minimum: MIN_BARS,
        });
    }
    let features = regime_features(series);
    if features.clean_returns < MIN_CLEAN_RETURNS {
        return Err(SignalfuseError::InsufficientData {
            context: "regime fit clean returns".to_string(),
            available: features.clean_returns,
            minimum: MIN_CLEAN_RETURNS,
        });
    }

    let (hmm, report) = GaussianHmm::fit(
        features.observations.view(),
        config.n_states,
        config.covariance,
        config.max_iter,
        config.tol,
        config.min_variance,
    );

    let means: Vec<f64> = hmm.emissions().iter().map(|g| g.mean()[0]).collect();
    let spread = means.iter().cloned().fold(f64::MIN, f64::max)
        - means.iter().cloned().fold(f64::MAX, f64::min);
    let degenerate = !(spread >= DEGENERATE_SPREAD);
    if degenerate {
        tracing::debug!(spread, "regime states indistinguishable; predictions are sideways");
    }

    tracing::info!(
        n_states = config.n_states,
        covariance = %config.covariance,
        rows = features.dates.len(),
        iterations = report.iterations,
        converged = report.converged,
        "fitted regime model"
    );

    Ok(RegimeModel {
        labels: labels_by_rank(&means),
        hmm,
        degenerate,
        report,
    })
}

/// Fit on `series`, then label its latest bar.
pub fn detect_regime(series: &PriceSeries, config: &RegimeConfig) -> Result<RegimeLabel, SignalfuseError> {
    fit_regime(series, config)?.predict_latest(series)
}

/// Stateful wrapper holding an optional fitted model.
#[derive(Debug, Clone, Default)]
pub struct RegimeDetector {
    config: RegimeConfig,
    model: Option<RegimeModel>,
}

impl RegimeDetector {
    pub fn new(config: RegimeConfig) -> Self {
        RegimeDetector {
            config,
            model: None,
        }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    pub fn model(&self) -> Option<&RegimeModel> {
        self.model.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    /// Refits from scratch; a failed fit leaves any previous model in place.
    pub fn fit(&mut self, series: &PriceSeries) -> Result<&RegimeModel, SignalfuseError> {
        let model = fit_regime(series, &self.config)?;
        Ok(self.model.insert(model))
    }

    pub fn predict_latest(&self, series: &PriceSeries) -> Result<RegimeLabel, SignalfuseError> {
        self.model
            .as_ref()
            .ok_or(SignalfuseError::ModelNotFitted)?
            .predict_latest(series)
    }

    pub fn predict_series(&self, series: &PriceSeries) -> Result<Vec<RegimePoint>, SignalfuseError> {
        self.model
            .as_ref()
            .ok_or(SignalfuseError::ModelNotFitted)?
            .predict_series(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;

    fn series(prices: &[f64]) -> PriceSeries {
        PriceSeries::new(make_bars(prices)).unwrap()
    }

    /// Rally, slump, rally: each leg 40 bars with small alternating noise.
    fn trending_legs() -> Vec<f64> {
        let mut prices = vec![100.0];
        for i in 0..120 {
            let drift = if (40..80).contains(&i) { -0.012 } else { 0.012 };
            let noise = if i % 2 == 0 { 0.002 } else { -0.002 };
            let last = *prices.last().unwrap();
            prices.push(last * (1.0 + drift + noise));
        }
        prices
    }

    #[test]
    fn label_parsing() {
        assert_eq!("bull".parse::<RegimeLabel>(), Ok(RegimeLabel::Bull));
        assert_eq!("NEUTRAL".parse::<RegimeLabel>(), Ok(RegimeLabel::Sideways));
        assert!("crab".parse::<RegimeLabel>().is_err());
        assert_eq!(RegimeLabel::Bear.to_string(), "BEAR");
    }

    #[test]
    fn features_drop_extreme_moves() {
        let mut prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        prices[10] = 300.0;
        let f = regime_features(&series(&prices));
        // Jumps into and out of the spike are both discarded.
        assert_eq!(f.clean_returns, 17);
        assert_eq!(f.observations.nrows(), 8);
        assert_eq!(f.observations.ncols(), 2);
    }

    #[test]
    fn fit_rejects_short_series() {
        let prices: Vec<f64> = (0..29).map(|i| 100.0 + i as f64).collect();
        let err = fit_regime(&series(&prices), &RegimeConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SignalfuseError::InsufficientData { available: 29, minimum: 30, .. }
        ));
    }

    #[test]
    fn fit_rejects_too_few_clean_returns() {
        // Every other bar doubles, so most returns are extreme.
        let prices: Vec<f64> = (0..40)
            .map(|i| if i % 2 == 0 { 100.0 } else { 200.0 })
            .collect();
        let err = fit_regime(&series(&prices), &RegimeConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SignalfuseError::InsufficientData { minimum: 20, .. }
        ));
    }

    #[test]
    fn fit_rejects_bad_state_count() {
        let config = RegimeConfig {
            n_states: 4,
            ..RegimeConfig::default()
        };
        let err = fit_regime(&series(&trending_legs()), &config).unwrap_err();
        assert!(matches!(err, SignalfuseError::ConfigInvalid { .. }));
    }

    #[test]
    fn two_state_model_emits_bull_and_bear_only() {
        let s = series(&trending_legs());
        let model = fit_regime(&s, &RegimeConfig::default()).unwrap();
        let points = model.predict_series(&s).unwrap();
        assert!(points.iter().all(|p| p.label != RegimeLabel::Sideways));
        assert_eq!(points.last().unwrap().date, s.last().date);
        assert_eq!(model.predict_latest(&s).unwrap(), RegimeLabel::Bull);
    }

    #[test]
    fn three_state_labels_are_ranked_by_mean() {
        let labels = labels_by_rank(&[0.01, -0.02, 0.0]);
        assert_eq!(
            labels,
            vec![RegimeLabel::Bull, RegimeLabel::Bear, RegimeLabel::Sideways]
        );
    }

    #[test]
    fn tied_means_rank_by_state_index() {
        assert_eq!(
            labels_by_rank(&[0.0, 0.0]),
            vec![RegimeLabel::Bear, RegimeLabel::Bull]
        );
    }

    #[test]
    fn constant_series_is_degenerate_and_sideways() {
        let s = series(&[50.0; 40]);
        for covariance in [CovarianceType::Diagonal, CovarianceType::Full] {
            let config = RegimeConfig {
                covariance,
                ..RegimeConfig::default()
            };
            let model = fit_regime(&s, &config).unwrap();
            assert!(model.is_degenerate());
            assert!(model
                .predict_series(&s)
                .unwrap()
                .iter()
                .all(|p| p.label == RegimeLabel::Sideways));
        }
    }

    #[test]
    fn fit_is_deterministic() {
        let s = series(&trending_legs());
        let config = RegimeConfig {
            n_states: 3,
            covariance: CovarianceType::Full,
            ..RegimeConfig::default()
        };
        let a = fit_regime(&s, &config).unwrap();
        let b = fit_regime(&s, &config).unwrap();
        assert_eq!(a.hmm(), b.hmm());
        assert_eq!(a.predict_series(&s).unwrap(), b.predict_series(&s).unwrap());
    }

    #[test]
    fn detector_requires_fit() {
        let s = series(&trending_legs());
        let mut detector = RegimeDetector::new(RegimeConfig::default());
        assert!(matches!(
            detector.predict_latest(&s),
            Err(SignalfuseError::ModelNotFitted)
        ));
        detector.fit(&s).unwrap();
        assert!(detector.is_fitted());
        assert_eq!(detector.predict_latest(&s).unwrap(), detect_regime(&s, detector.config()).unwrap());
    }

    #[test]
    fn failed_refit_keeps_previous_model() {
        let mut detector = RegimeDetector::new(RegimeConfig::default());
        detector.fit(&series(&trending_legs())).unwrap();
        assert!(detector.fit(&series(&[10.0; 5])).is_err());
        assert!(detector.is_fitted());
    }
}
