//! Core domain types and logic.

pub mod backtest;
pub mod config;
pub mod config_validation;
pub mod decision;
pub mod environment;
pub mod error;
pub mod features;
pub mod indicator;
pub mod metrics;
pub mod ohlcv;
pub mod pipeline;
pub mod portfolio;
pub mod regime;
pub mod technical;
