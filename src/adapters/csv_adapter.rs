//! CSV file price data adapter.
//!
//! Files are named `<symbol>_<timeframe>.csv` and carry a header row with
//! `date,open,high,low,close[,volume]` in any order and any letter case.

use crate::domain::error::SignalfuseError;
use crate::domain::ohlcv::{OhlcvBar, PriceSeries};
use crate::ports::data_port::PriceProvider;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", symbol, timeframe))
    }

    /// Read every bar in `path`. An empty file yields an empty vector.
    pub fn read_bars(path: &Path) -> Result<Vec<OhlcvBar>, SignalfuseError> {
        let content = fs::read_to_string(path).map_err(|e| {
            SignalfuseError::data(format!("failed to read {}: {}", path.display(), e))
        })?;
        parse_bars(&content)
    }

    /// Load a single price file into a validated series.
    pub fn load_file(path: &Path) -> Result<PriceSeries, SignalfuseError> {
        let bars = Self::read_bars(path)?;
        if bars.is_empty() {
            return Err(SignalfuseError::DataUnavailable {
                symbol: path.display().to_string(),
                timeframe: "file".to_string(),
            });
        }
        PriceSeries::new(bars)
    }
}

struct Columns {
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, SignalfuseError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| SignalfuseError::data(format!("missing {} column", name)))
        };
        Ok(Columns {
            date: require("date")?,
            open: require("open")?,
            high: require("high")?,
            low: require("low")?,
            close: require("close")?,
            volume: find("volume"),
        })
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, SignalfuseError> {
    let raw = raw.trim();
    // Timestamps such as `2024-01-15 00:00:00` keep only the date part.
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| SignalfuseError::data(format!("invalid date '{}': {}", raw, e)))
}

fn field(record: &csv::StringRecord, index: usize, name: &str) -> Result<f64, SignalfuseError> {
    record
        .get(index)
        .ok_or_else(|| SignalfuseError::data(format!("missing {} value", name)))?
        .trim()
        .parse()
        .map_err(|e| SignalfuseError::data(format!("invalid {} value: {}", name, e)))
}

pub(crate) fn parse_bars(content: &str) -> Result<Vec<OhlcvBar>, SignalfuseError> {
    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let headers = rdr
        .headers()
        .map_err(|e| SignalfuseError::data(format!("CSV header error: {}", e)))?
        .clone();
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    let cols = Columns::from_headers(&headers)?;

    let mut bars = Vec::new();
    for result in rdr.records() {
        let record =
            result.map_err(|e| SignalfuseError::data(format!("CSV parse error: {}", e)))?;
        let date = parse_date(
            record
                .get(cols.date)
                .ok_or_else(|| SignalfuseError::data("missing date value"))?,
        )?;
        let volume = match cols.volume {
            Some(i) => field(&record, i, "volume")?,
            None => 0.0,
        };
        bars.push(OhlcvBar {
            date,
            open: field(&record, cols.open, "open")?,
            high: field(&record, cols.high, "high")?,
            low: field(&record, cols.low, "low")?,
            close: field(&record, cols.close, "close")?,
            volume,
        });
    }
    Ok(bars)
}

impl PriceProvider for CsvAdapter {
    fn fetch(&self, symbol: &str, timeframe: &str) -> Result<PriceSeries, SignalfuseError> {
        let path = self.csv_path(symbol, timeframe);
        if !path.exists() {
            return Err(SignalfuseError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }
        let bars = Self::read_bars(&path)?;
        if bars.is_empty() {
            return Err(SignalfuseError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }
        tracing::debug!(symbol, timeframe, bars = bars.len(), "loaded price file");
        PriceSeries::new(bars)
    }

    fn list_symbols(&self, timeframe: &str) -> Result<Vec<String>, SignalfuseError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            SignalfuseError::data(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let suffix = format!("_{}.csv", timeframe);
        let mut symbols = Vec::new();

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            if let Some(symbol) = name_str.strip_suffix(&suffix) {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "Date,Open,High,Low,Close,Volume\n\
            2024-01-16,105.0,115.0,100.0,110.0,60000\n\
            2024-01-15,100.0,110.0,90.0,105.0,50000\n\
            2024-01-17,110.0,120.0,105.0,115.0,55000\n";

        fs::write(path.join("ACME_1d.csv"), csv_content).unwrap();
        fs::write(path.join("EMPTY_1d.csv"), "date,open,high,low,close,volume\n").unwrap();
        fs::write(path.join("ACME_1h.csv"), "date,open,high,low,close,volume\n").unwrap();

        (dir, path)
    }

    #[test]
    fn fetch_returns_sorted_series() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let series = adapter.fetch("ACME", "1d").unwrap();
        let bars = series.bars();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 50000.0);
    }

    #[test]
    fn fetch_missing_file_is_unavailable() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert!(matches!(
            adapter.fetch("XYZ", "1d"),
            Err(SignalfuseError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn fetch_empty_file_is_unavailable() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert!(matches!(
            adapter.fetch("EMPTY", "1d"),
            Err(SignalfuseError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn list_symbols_filters_by_timeframe() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        assert_eq!(adapter.list_symbols("1d").unwrap(), vec!["ACME", "EMPTY"]);
        assert_eq!(adapter.list_symbols("1h").unwrap(), vec!["ACME"]);
    }

    #[test]
    fn columns_in_any_order_and_no_volume() {
        let bars = parse_bars("close,date,low,high,open\n10,2024-02-01 00:00:00,9,11,10\n").unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 10.0);
        assert_eq!(bars[0].volume, 0.0);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    }

    #[test]
    fn missing_close_column_is_an_error() {
        let err = parse_bars("date,open,high,low\n2024-01-01,1,1,1\n").unwrap_err();
        assert!(err.to_string().contains("close"));
    }

    #[test]
    fn invalid_number_is_an_error() {
        assert!(parse_bars("date,open,high,low,close\n2024-01-01,1,1,1,abc\n").is_err());
    }

    #[test]
    fn duplicate_dates_rejected_on_load() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("dup.csv");
        fs::write(
            &file,
            "date,open,high,low,close\n2024-01-01,1,1,1,1\n2024-01-01,2,2,2,2\n",
        )
        .unwrap();
        assert!(matches!(
            CsvAdapter::load_file(&file),
            Err(SignalfuseError::Data { .. })
        ));
    }
}
