//! Price data port trait.

use crate::domain::error::SignalfuseError;
use crate::domain::ohlcv::PriceSeries;

pub trait PriceProvider {
    /// Full history for `symbol` at `timeframe` (e.g. `1d`). An empty result
    /// is `DataUnavailable`, never an empty series.
    fn fetch(&self, symbol: &str, timeframe: &str) -> Result<PriceSeries, SignalfuseError>;

    fn list_symbols(&self, timeframe: &str) -> Result<Vec<String>, SignalfuseError>;
}
