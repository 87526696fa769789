//! File export adapter implementing [`ReportPort`].
//!
//! Writes the equity curve as CSV, and the metrics record and decision
//! snapshot as pretty-printed JSON. Parent directories are created on demand.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::domain::backtest::BacktestResult;
use crate::domain::error::SignalfuseError;
use crate::domain::pipeline::PipelineOutput;
use crate::ports::report_port::ReportPort;

pub const EQUITY_FILE: &str = "equity_curve.csv";
pub const METRICS_FILE: &str = "metrics.json";
pub const DECISION_FILE: &str = "decision.json";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportAdapter;

impl ExportAdapter {
    pub fn new() -> Self {
        ExportAdapter
    }

    /// Write both backtest artifacts into `dir` under their default names.
    pub fn write_backtest(&self, result: &BacktestResult, dir: &Path) -> Result<(), SignalfuseError> {
        self.write_equity_curve(result, &dir.join(EQUITY_FILE))?;
        self.write_metrics(result, &dir.join(METRICS_FILE))
    }
}

fn export_err(path: &Path, reason: impl ToString) -> SignalfuseError {
    SignalfuseError::Export {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn ensure_parent(path: &Path) -> Result<(), SignalfuseError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| export_err(path, e))
        }
        _ => Ok(()),
    }
}

fn write_json(path: &Path, value: &Value) -> Result<(), SignalfuseError> {
    ensure_parent(path)?;
    let text = serde_json::to_string_pretty(value).map_err(|e| export_err(path, e))?;
    fs::write(path, text + "\n").map_err(|e| export_err(path, e))
}

/// Flat key/value record of metrics plus run identification.
pub fn metrics_record(result: &BacktestResult) -> Result<Map<String, Value>, serde_json::Error> {
    let mut record = match serde_json::to_value(&result.metrics)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    record.insert("policy".into(), json!(result.policy));
    record.insert("initial_capital".into(), json!(result.initial_capital));
    record.insert("final_equity".into(), json!(result.final_equity));
    record.insert("fills".into(), json!(result.fills));
    record.insert("bars".into(), json!(result.equity_curve.len()));
    record.insert(
        "start_date".into(),
        json!(result.start_date().map(|d| d.to_string())),
    );
    record.insert(
        "end_date".into(),
        json!(result.end_date().map(|d| d.to_string())),
    );
    record.insert(
        "numeric_guards".into(),
        json!(result.numeric_guards.iter().map(|g| g.metric).collect::<Vec<_>>()),
    );
    Ok(record)
}

impl ReportPort for ExportAdapter {
    fn write_equity_curve(&self, result: &BacktestResult, path: &Path) -> Result<(), SignalfuseError> {
        ensure_parent(path)?;
        let mut writer = csv::Writer::from_path(path).map_err(|e| export_err(path, e))?;
        for point in &result.equity_curve {
            writer.serialize(point).map_err(|e| export_err(path, e))?;
        }
        writer.flush().map_err(|e| export_err(path, e))?;
        tracing::info!(path = %path.display(), rows = result.equity_curve.len(), "equity curve written");
        Ok(())
    }

    fn write_metrics(&self, result: &BacktestResult, path: &Path) -> Result<(), SignalfuseError> {
        let record = metrics_record(result).map_err(|e| export_err(path, e))?;
        write_json(path, &Value::Object(record))?;
        tracing::info!(path = %path.display(), "metrics written");
        Ok(())
    }

    fn write_decision(&self, output: &PipelineOutput, path: &Path) -> Result<(), SignalfuseError> {
        let mut snapshot = serde_json::to_value(output).map_err(|e| export_err(path, e))?;
        if let Value::Object(map) = &mut snapshot {
            map.insert(
                "explanation".into(),
                json!(output.decision.explanation_text()),
            );
        }
        write_json(path, &snapshot)?;
        tracing::info!(path = %path.display(), action = %output.decision.action, "decision written");
        Ok(())
    }
}
