//! Application configuration assembled from a [`ConfigPort`].

use std::time::Duration;

use super::backtest::BacktestConfig;
use super::config_validation::validate_config;
use super::decision::FusionWeights;
use super::environment::EnvironmentConfig;
use super::error::SignalfuseError;
use super::features::{parse_feature_list, FeatureColumn};
use super::regime::{CovarianceType, RegimeConfig};
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_TIMEOUT_MS: i64 = 2000;
pub const DEFAULT_REFIT_EVERY: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub symbol: String,
    pub timeframe: String,
    pub backtest: BacktestConfig,
    pub regime: RegimeConfig,
    /// Bars between regime refits during a backtest.
    pub refit_every: usize,
    pub environment: EnvironmentConfig,
    pub fusion: FusionWeights,
    pub provider_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            symbol: "UNKNOWN".to_string(),
            timeframe: "1d".to_string(),
            backtest: BacktestConfig::default(),
            regime: RegimeConfig::default(),
            refit_every: DEFAULT_REFIT_EVERY,
            environment: EnvironmentConfig::default(),
            fusion: FusionWeights::default(),
            provider_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS as u64),
        }
    }
}

impl AppConfig {
    /// Validate every section, then read values over the defaults.
    pub fn from_port(config: &dyn ConfigPort) -> Result<Self, SignalfuseError> {
        validate_config(config)?;
        let d = AppConfig::default();

        let backtest = BacktestConfig {
            initial_capital: config.get_double("backtest", "initial_capital", d.backtest.initial_capital),
            transaction_cost: config.get_double("backtest", "transaction_cost", d.backtest.transaction_cost),
            position_size_fraction: config.get_double(
                "backtest",
                "position_size",
                d.backtest.position_size_fraction,
            ),
            warmup_bars: config.get_int("backtest", "warmup_bars", d.backtest.warmup_bars as i64) as usize,
        };

        let covariance = match config.get_string("regime", "covariance") {
            Some(raw) => raw
                .parse::<CovarianceType>()
                .map_err(|e| SignalfuseError::invalid("regime", "covariance", e))?,
            None => d.regime.covariance,
        };
        let regime = RegimeConfig {
            n_states: config.get_int("regime", "n_states", d.regime.n_states as i64) as usize,
            covariance,
            max_iter: config.get_int("regime", "max_iter", d.regime.max_iter as i64) as usize,
            tol: config.get_double("regime", "tol", d.regime.tol),
            min_variance: config.get_double("regime", "min_variance", d.regime.min_variance),
        };

        let features: Vec<FeatureColumn> = match config.get_string("environment", "features") {
            Some(list) => {
                parse_feature_list(&list).map_err(|e| SignalfuseError::invalid("environment", "features", e))?
            }
            None => d.environment.features.clone(),
        };
        let environment = EnvironmentConfig {
            initial_balance: config.get_double(
                "environment",
                "initial_balance",
                d.environment.initial_balance,
            ),
            transaction_cost: config.get_double(
                "environment",
                "transaction_cost",
                d.environment.transaction_cost,
            ),
            drawdown_penalty: config.get_double(
                "environment",
                "drawdown_penalty",
                d.environment.drawdown_penalty,
            ),
            features,
        };

        let w = d.fusion;
        let fusion = FusionWeights {
            ml_bullish_above: config.get_double("fusion", "ml_bullish_above", w.ml_bullish_above),
            ml_bearish_below: config.get_double("fusion", "ml_bearish_below", w.ml_bearish_below),
            ml_weight: config.get_double("fusion", "ml_weight", w.ml_weight),
            forecast_a_weight: config.get_double("fusion", "forecast_a_weight", w.forecast_a_weight),
            forecast_b_bonus: config.get_double("fusion", "forecast_b_bonus", w.forecast_b_bonus),
            regime_weight: config.get_double("fusion", "regime_weight", w.regime_weight),
            policy_weight: config.get_double("fusion", "policy_weight", w.policy_weight),
            sentiment_threshold: config.get_double("fusion", "sentiment_threshold", w.sentiment_threshold),
            sentiment_weight: config.get_double("fusion", "sentiment_weight", w.sentiment_weight),
            buy_threshold: config.get_double("fusion", "buy_threshold", w.buy_threshold),
            sell_threshold: config.get_double("fusion", "sell_threshold", w.sell_threshold),
            max_score: config.get_double("fusion", "max_score", w.max_score),
        };

        let timeout_ms = config.get_int("providers", "timeout_ms", DEFAULT_TIMEOUT_MS);

        Ok(AppConfig {
            symbol: config
                .get_string("backtest", "symbol")
                .map(|s| s.trim().to_string())
                .unwrap_or(d.symbol),
            timeframe: config
                .get_string("backtest", "timeframe")
                .map(|s| s.trim().to_string())
                .unwrap_or(d.timeframe),
            backtest,
            regime,
            refit_every: config.get_int("regime", "refit_every", d.refit_every as i64) as usize,
            environment,
            fusion,
            provider_timeout: Duration::from_millis(timeout_ms as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    #[test]
    fn defaults_when_sections_missing() {
        let c = AppConfig::from_port(&FileConfigAdapter::from_string("").unwrap()).unwrap();
        assert_eq!(c, AppConfig::default());
        assert_eq!(c.provider_timeout, Duration::from_millis(2000));
        assert_eq!(c.regime.max_iter, 200);
    }

    #[test]
    fn reads_every_section() {
        let content = r#"
[backtest]
symbol = ACME
timeframe = 1h
initial_capital = 25000
transaction_cost = 0.002
position_size = 0.5
warmup_bars = 30

[regime]
n_states = 3
covariance = full
refit_every = 10

[environment]
drawdown_penalty = 0.2
features = atr_pct, rsi_norm

[fusion]
buy_threshold = 3

[providers]
timeout_ms = 250
"#;
        let c = AppConfig::from_port(&FileConfigAdapter::from_string(content).unwrap()).unwrap();
        assert_eq!(c.symbol, "ACME");
        assert_eq!(c.timeframe, "1h");
        assert_eq!(c.backtest.initial_capital, 25000.0);
        assert_eq!(c.backtest.position_size_fraction, 0.5);
        assert_eq!(c.backtest.warmup_bars, 30);
        assert_eq!(c.regime.n_states, 3);
        assert_eq!(c.regime.covariance, CovarianceType::Full);
        assert_eq!(c.refit_every, 10);
        assert_eq!(c.environment.drawdown_penalty, 0.2);
        assert_eq!(
            c.environment.features,
            vec![FeatureColumn::AtrPct, FeatureColumn::RsiNorm]
        );
        assert_eq!(c.fusion.buy_threshold, 3.0);
        assert_eq!(c.fusion.sell_threshold, -2.0);
        assert_eq!(c.provider_timeout, Duration::from_millis(250));
    }

    #[test]
    fn invalid_section_fails() {
        let c = FileConfigAdapter::from_string("[regime]\nn_states = 5\n").unwrap();
        assert!(matches!(
            AppConfig::from_port(&c),
            Err(SignalfuseError::ConfigInvalid { .. })
        ));
    }
}
