//! Report / artifact export port trait.

use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::SignalfuseError;
use crate::domain::pipeline::PipelineOutput;

/// Port for persisting run artifacts.
pub trait ReportPort {
    /// `date,equity` rows, one per evaluated bar.
    fn write_equity_curve(&self, result: &BacktestResult, path: &Path) -> Result<(), SignalfuseError>;

    /// Flat key/value record of the run's metrics.
    fn write_metrics(&self, result: &BacktestResult, path: &Path) -> Result<(), SignalfuseError>;

    fn write_decision(&self, output: &PipelineOutput, path: &Path) -> Result<(), SignalfuseError>;
}
