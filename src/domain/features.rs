//! Per-bar feature frame derived from a price series.
//!
//! Columns are recomputed on every run and never persisted. Values that are
//! still inside an indicator's warmup window are `None`.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::indicator::macd::{DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW};
use super::indicator::{
    calculate_atr, calculate_ema, calculate_macd, calculate_rsi, rolling_stddev, IndicatorSeries,
};
use super::ohlcv::PriceSeries;

const RANGE_EPSILON: f64 = 1e-9;
const RANGE_WINDOW: usize = 20;
const VOLATILITY_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureColumn {
    RsiNorm,
    EmaSpread,
    MacdDiff,
    AtrPct,
    Volatility10,
    Return1,
    Return5,
    Return10,
    RangePosition,
}

impl FeatureColumn {
    pub const ALL: [FeatureColumn; 9] = [
        FeatureColumn::RsiNorm,
        FeatureColumn::EmaSpread,
        FeatureColumn::MacdDiff,
        FeatureColumn::AtrPct,
        FeatureColumn::Volatility10,
        FeatureColumn::Return1,
        FeatureColumn::Return5,
        FeatureColumn::Return10,
        FeatureColumn::RangePosition,
    ];

    /// Observation columns consumed by the sequence models and the policy agent.
    pub const MODEL_INPUTS: [FeatureColumn; 4] = [
        FeatureColumn::RsiNorm,
        FeatureColumn::EmaSpread,
        FeatureColumn::MacdDiff,
        FeatureColumn::AtrPct,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureColumn::RsiNorm => "rsi_norm",
            FeatureColumn::EmaSpread => "ema_spread",
            FeatureColumn::MacdDiff => "macd_diff",
            FeatureColumn::AtrPct => "atr_pct",
            FeatureColumn::Volatility10 => "volatility_10",
            FeatureColumn::Return1 => "return_1",
            FeatureColumn::Return5 => "return_5",
            FeatureColumn::Return10 => "return_10",
            FeatureColumn::RangePosition => "range_position",
        }
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        FeatureColumn::ALL
            .iter()
            .copied()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| format!("unknown feature column '{}'", s.trim()))
    }
}

/// Parse a comma-separated feature list, e.g. `rsi_norm, ema_spread`.
pub fn parse_feature_list(list: &str) -> Result<Vec<FeatureColumn>, String> {
    let columns = list
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(FeatureColumn::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err("feature list is empty".to_string());
    }
    Ok(columns)
}

/// Raw indicator readings at one bar, as consumed by the technical rule signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FeatureFrame {
    dates: Vec<NaiveDate>,
    columns: HashMap<FeatureColumn, Vec<Option<f64>>>,
    rsi: IndicatorSeries,
    macd: IndicatorSeries,
}

impl FeatureFrame {
    pub fn build(series: &PriceSeries) -> Self {
        let bars = series.bars();
        let n = bars.len();
        let closes = series.closes();

        let ema_20 = calculate_ema(bars, 20);
        let ema_50 = calculate_ema(bars, 50);
        let rsi = calculate_rsi(bars, 14);
        let macd = calculate_macd(bars, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL);
        let atr = calculate_atr(bars, 14);

        let pct_change = |lag: usize| -> Vec<Option<f64>> {
            (0..n)
                .map(|i| (i >= lag).then(|| closes[i] / closes[i - lag] - 1.0))
                .collect()
        };
        let return_1 = pct_change(1);
        let raw_returns: Vec<f64> = return_1.iter().map(|r| r.unwrap_or(f64::NAN)).collect();

        let mut columns = HashMap::new();
        columns.insert(
            FeatureColumn::RsiNorm,
            (0..n).map(|i| rsi.simple_at(i).map(|v| v / 100.0)).collect(),
        );
        columns.insert(
            FeatureColumn::EmaSpread,
            (0..n)
                .map(|i| Some((ema_20.simple_at(i)? - ema_50.simple_at(i)?) / closes[i]))
                .collect(),
        );
        columns.insert(
            FeatureColumn::MacdDiff,
            (0..n)
                .map(|i| macd.macd_at(i).map(|(line, signal)| line - signal))
                .collect(),
        );
        columns.insert(
            FeatureColumn::AtrPct,
            (0..n).map(|i| atr.simple_at(i).map(|v| v / closes[i])).collect(),
        );
        columns.insert(
            FeatureColumn::Volatility10,
            rolling_stddev(&raw_returns, VOLATILITY_WINDOW),
        );
        columns.insert(FeatureColumn::Return1, return_1);
        columns.insert(FeatureColumn::Return5, pct_change(5));
        columns.insert(FeatureColumn::Return10, pct_change(10));
        columns.insert(
            FeatureColumn::RangePosition,
            (0..n)
                .map(|i| {
                    if i + 1 < RANGE_WINDOW {
                        return None;
                    }
                    let window = &bars[i + 1 - RANGE_WINDOW..=i];
                    let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
                    let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
                    Some((closes[i] - low) / (high - low + RANGE_EPSILON))
                })
                .collect(),
        );

        for values in columns.values_mut() {
            for v in values.iter_mut() {
                if v.is_some_and(|x| !x.is_finite()) {
                    *v = None;
                }
            }
        }

        FeatureFrame {
            dates: series.dates(),
            columns,
            rsi,
            macd,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn date(&self, index: usize) -> Option<NaiveDate> {
        self.dates.get(index).copied()
    }

    pub fn value(&self, column: FeatureColumn, index: usize) -> Option<f64> {
        self.columns.get(&column)?.get(index).copied().flatten()
    }

    /// Fixed-order feature vector at `index`, or `None` if any column is undefined.
    pub fn row(&self, columns: &[FeatureColumn], index: usize) -> Option<Vec<f64>> {
        columns.iter().map(|c| self.value(*c, index)).collect()
    }

    /// First bar at which every requested column is defined.
    pub fn first_complete_row(&self, columns: &[FeatureColumn]) -> Option<usize> {
        (0..self.len()).find(|&i| self.row(columns, i).is_some())
    }

    pub fn indicators_at(&self, index: usize) -> IndicatorSnapshot {
        let macd = self.macd.macd_at(index);
        IndicatorSnapshot {
            rsi: self.rsi.simple_at(index),
            macd: macd.map(|(line, _)| line),
            macd_signal: macd.map(|(_, signal)| signal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;

    fn frame(prices: &[f64]) -> FeatureFrame {
        FeatureFrame::build(&PriceSeries::new(make_bars(prices)).unwrap())
    }

    #[test]
    fn column_names_round_trip() {
        for column in FeatureColumn::ALL {
            assert_eq!(column.name().parse::<FeatureColumn>().unwrap(), column);
        }
    }

    #[test]
    fn parse_feature_list_rejects_unknown() {
        assert!(parse_feature_list("rsi_norm, bogus").is_err());
        assert!(parse_feature_list(" , ").is_err());
        assert_eq!(
            parse_feature_list("RSI_NORM,atr_pct").unwrap(),
            vec![FeatureColumn::RsiNorm, FeatureColumn::AtrPct]
        );
    }

    #[test]
    fn returns_have_lagged_warmup() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let f = frame(&prices);
        assert_eq!(f.value(FeatureColumn::Return1, 0), None);
        assert!((f.value(FeatureColumn::Return1, 1).unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(f.value(FeatureColumn::Return5, 4), None);
        assert!((f.value(FeatureColumn::Return5, 5).unwrap() - 0.05).abs() < 1e-12);
        assert_eq!(f.value(FeatureColumn::Volatility10, 9), None);
        assert!(f.value(FeatureColumn::Volatility10, 10).is_some());
    }

    #[test]
    fn range_position_top_of_range_for_rising_series() {
        let prices: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        let f = frame(&prices);
        assert_eq!(f.value(FeatureColumn::RangePosition, 18), None);
        let pos = f.value(FeatureColumn::RangePosition, 24).unwrap();
        assert!((pos - 1.0).abs() < 1e-6);
    }

    #[test]
    fn first_complete_row_waits_for_slowest_column() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.3).sin()).collect();
        let f = frame(&prices);
        assert_eq!(f.first_complete_row(&FeatureColumn::MODEL_INPUTS), Some(14));
        assert_eq!(f.first_complete_row(&FeatureColumn::ALL), Some(19));
        assert_eq!(f.row(&FeatureColumn::MODEL_INPUTS, 14).unwrap().len(), 4);
    }

    #[test]
    fn indicators_snapshot_exposes_raw_values() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let snap = frame(&prices).indicators_at(19);
        assert!(snap.rsi.unwrap() > 99.0);
        assert!(snap.macd.unwrap() > 0.0);
        assert!(snap.macd_signal.is_some());
    }
}
