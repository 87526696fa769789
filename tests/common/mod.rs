#![allow(dead_code)]

use chrono::NaiveDate;
use signalfuse::domain::error::SignalfuseError;
pub use signalfuse::domain::ohlcv::{OhlcvBar, PriceSeries};
use signalfuse::ports::data_port::PriceProvider;
use std::collections::HashMap;
use std::io::Write;

pub struct MockPriceProvider {
    pub data: HashMap<(String, String), Vec<OhlcvBar>>,
}

impl MockPriceProvider {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, timeframe: &str, bars: Vec<OhlcvBar>) -> Self {
        self.data
            .insert((symbol.to_string(), timeframe.to_string()), bars);
        self
    }
}

impl PriceProvider for MockPriceProvider {
    fn fetch(&self, symbol: &str, timeframe: &str) -> Result<PriceSeries, SignalfuseError> {
        match self.data.get(&(symbol.to_string(), timeframe.to_string())) {
            Some(bars) if !bars.is_empty() => PriceSeries::new(bars.clone()),
            _ => Err(SignalfuseError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            }),
        }
    }

    fn list_symbols(&self, timeframe: &str) -> Result<Vec<String>, SignalfuseError> {
        let mut symbols: Vec<String> = self
            .data
            .keys()
            .filter(|(_, tf)| tf == timeframe)
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        Ok(symbols)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(date: &str, close: f64) -> OhlcvBar {
    OhlcvBar {
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1000.0,
    }
}

/// One bar per calendar day from 2024-01-01, all prices equal to the close.
pub fn bars_from_closes(closes: &[f64]) -> Vec<OhlcvBar> {
    let start = date(2024, 1, 1);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| OhlcvBar {
            date: start + chrono::Duration::days(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        })
        .collect()
}

pub fn series(closes: &[f64]) -> PriceSeries {
    PriceSeries::new(bars_from_closes(closes)).unwrap()
}

pub fn rising(count: usize, start: f64, step: f64) -> Vec<f64> {
    (0..count).map(|i| start + step * i as f64).collect()
}

/// Rally, slump, rally; each leg 40 bars with small alternating noise.
pub fn trending_legs() -> Vec<f64> {
    let mut prices = vec![100.0];
    for i in 0..120 {
        let drift = if (40..80).contains(&i) { -0.012 } else { 0.012 };
        let noise = if i % 2 == 0 { 0.002 } else { -0.002 };
        let last = *prices.last().unwrap();
        prices.push(last * (1.0 + drift + noise));
    }
    prices
}

pub fn price_csv(bars: &[OhlcvBar]) -> String {
    let mut out = String::from("date,open,high,low,close,volume\n");
    for b in bars {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.date, b.open, b.high, b.low, b.close, b.volume
        ));
    }
    out
}

pub fn write_temp(content: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
