//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod csv_signal_adapter;
pub mod deadline;
pub mod export_adapter;
pub mod file_config_adapter;
