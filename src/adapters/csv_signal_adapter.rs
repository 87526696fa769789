//! Recorded external signals loaded from CSV.
//!
//! Header: `date,ml_prob_up,forecast_a,forecast_b,policy_action,sentiment`
//! with an optional `regime` column. Blank or unparsable cells are neutral.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::domain::decision::Signals;
use crate::domain::error::SignalfuseError;
use crate::domain::features::FeatureFrame;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::pipeline::SignalSources;
use crate::domain::portfolio::Action;
use crate::ports::signal_port::{
    DirectionClassifier, NewsSentiment, NewsSentimentProvider, PolicyAgent, ReturnPredictor,
    SignalHistory,
};

#[derive(Debug, Clone, Default)]
pub struct CsvSignalAdapter {
    rows: BTreeMap<NaiveDate, Signals>,
}

impl CsvSignalAdapter {
    pub fn from_file(path: &Path) -> Result<Self, SignalfuseError> {
        let content = fs::read_to_string(path).map_err(|e| {
            SignalfuseError::data(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_csv(&content)
    }

    pub fn from_csv(content: &str) -> Result<Self, SignalfuseError> {
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| SignalfuseError::data(format!("CSV header error: {}", e)))?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        let date_col = headers
            .iter()
            .position(|h| h == "date")
            .ok_or_else(|| SignalfuseError::data("signal file has no date column"))?;

        let mut rows = BTreeMap::new();
        for result in rdr.records() {
            let record =
                result.map_err(|e| SignalfuseError::data(format!("CSV parse error: {}", e)))?;
            let raw_date = record.get(date_col).unwrap_or("").trim();
            let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|e| {
                SignalfuseError::data(format!("invalid signal date '{}': {}", raw_date, e))
            })?;
            let pairs = headers
                .iter()
                .zip(record.iter())
                .filter(|(h, v)| h.as_str() != "date" && !v.trim().is_empty())
                .map(|(h, v)| (h.as_str(), v));
            rows.insert(date, Signals::from_pairs(pairs));
        }
        tracing::debug!(rows = rows.len(), "loaded recorded signals");
        Ok(CsvSignalAdapter { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Port implementations answering with the row in effect on `date`.
    pub fn sources_as_of(&self, date: NaiveDate) -> SignalSources {
        let s = self.signals_as_of(date);
        SignalSources {
            classifier: Some(Arc::new(RecordedValue(s.ml_prob_up))),
            forecast_a: Some(Arc::new(RecordedValue(s.forecast_a))),
            forecast_b: Some(Arc::new(RecordedValue(s.forecast_b))),
            policy: Some(Arc::new(RecordedAction(s.policy_action))),
            news: Some(Arc::new(RecordedSentiment(s.sentiment))),
            fundamentals: None,
        }
    }
}

impl SignalHistory for CsvSignalAdapter {
    fn signals_as_of(&self, date: NaiveDate) -> Signals {
        self.rows
            .range(..=date)
            .next_back()
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }
}

/// A recorded scalar; absent values answer NaN (neutral).
#[derive(Debug, Clone, Copy)]
pub struct RecordedValue(pub Option<f64>);

impl DirectionClassifier for RecordedValue {
    fn prob_up(&self, _bars: &[OhlcvBar], _frame: &FeatureFrame) -> f64 {
        self.0.unwrap_or(f64::NAN)
    }
}

impl ReturnPredictor for RecordedValue {
    fn predict(&self, _bars: &[OhlcvBar], _frame: &FeatureFrame) -> f64 {
        self.0.unwrap_or(f64::NAN)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecordedAction(pub Option<Action>);

impl PolicyAgent for RecordedAction {
    fn act(&self, _observation: &[f64]) -> Action {
        self.0.unwrap_or(Action::Hold)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecordedSentiment(pub Option<f64>);

impl NewsSentimentProvider for RecordedSentiment {
    fn sentiment(&self, _symbol: &str) -> NewsSentiment {
        NewsSentiment {
            score: self.0.unwrap_or(f64::NAN),
            summary: String::new(),
        }
    }
}
