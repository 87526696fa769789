//! OHLCV bars and the validated price series built from them.

use chrono::NaiveDate;

use super::error::SignalfuseError;

#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OhlcvBar {
    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    fn validate(&self) -> Result<(), SignalfuseError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(SignalfuseError::data(format!(
                "non-finite price on {}",
                self.date
            )));
        }
        if self.close <= 0.0 {
            return Err(SignalfuseError::data(format!(
                "close must be positive on {} (got {})",
                self.date, self.close
            )));
        }
        if self.high < self.low {
            return Err(SignalfuseError::data(format!(
                "high {} below low {} on {}",
                self.high, self.low, self.date
            )));
        }
        if self.volume.is_nan() || self.volume < 0.0 {
            return Err(SignalfuseError::data(format!(
                "negative or missing volume on {}",
                self.date
            )));
        }
        Ok(())
    }
}

/// Immutable, date-ordered price history for a single instrument.
///
/// Dates are strictly ascending and unique; every bar satisfies `high >= low`
/// and `volume >= 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    bars: Vec<OhlcvBar>,
}

impl PriceSeries {
    /// Validates and takes ownership of `bars`. Bars are sorted by date first;
    /// a duplicate date is rejected rather than silently dropped.
    pub fn new(mut bars: Vec<OhlcvBar>) -> Result<Self, SignalfuseError> {
        if bars.is_empty() {
            return Err(SignalfuseError::data("price series is empty"));
        }

        bars.sort_by_key(|b| b.date);

        for bar in &bars {
            bar.validate()?;
        }
        if let Some(w) = bars.windows(2).find(|w| w[0].date == w[1].date) {
            return Err(SignalfuseError::data(format!(
                "duplicate bar date {}",
                w[1].date
            )));
        }

        Ok(PriceSeries { bars })
    }

    pub fn bars(&self) -> &[OhlcvBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|b| b.date).collect()
    }

    pub fn last(&self) -> &OhlcvBar {
        // Non-empty by construction.
        &self.bars[self.bars.len() - 1]
    }

    /// The first `len` bars as a new series.
    pub fn prefix(&self, len: usize) -> Result<PriceSeries, SignalfuseError> {
        PriceSeries::new(self.bars[..len.min(self.bars.len())].to_vec())
    }
}
