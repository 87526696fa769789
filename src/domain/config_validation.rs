//! Configuration validation.
//!
//! Every section is checked before a run. Values are parsed from the raw
//! strings so that a malformed number is reported instead of silently
//! replaced by its default.

use crate::domain::error::SignalfuseError;
use crate::domain::features::parse_feature_list;
use crate::domain::regime::CovarianceType;
use crate::ports::config_port::ConfigPort;

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), SignalfuseError> {
    validate_backtest_config(config)?;
    validate_regime_config(config)?;
    validate_environment_config(config)?;
    validate_fusion_config(config)?;
    validate_providers_config(config)?;
    validate_fundamentals_config(config)?;
    Ok(())
}

/// Parse `[section] key` as f64 if present.
fn number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, SignalfuseError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| SignalfuseError::invalid(section, key, format!("'{}' is not a number", raw.trim()))),
    }
}

fn integer(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<i64>, SignalfuseError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| SignalfuseError::invalid(section, key, format!("'{}' is not an integer", raw.trim()))),
    }
}

fn check(
    value: Option<f64>,
    ok: impl Fn(f64) -> bool,
    section: &str,
    key: &str,
    rule: &str,
) -> Result<(), SignalfuseError> {
    match value {
        Some(v) if !ok(v) => Err(SignalfuseError::invalid(
            section,
            key,
            format!("{} must be {} (got {})", key, rule, v),
        )),
        _ => Ok(()),
    }
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), SignalfuseError> {
    let s = "backtest";
    check(number(config, s, "initial_capital")?, |v| v > 0.0, s, "initial_capital", "positive")?;
    check(
        number(config, s, "transaction_cost")?,
        |v| (0.0..1.0).contains(&v),
        s,
        "transaction_cost",
        "in [0, 1)",
    )?;
    check(
        number(config, s, "position_size")?,
        |v| v > 0.0 && v <= 1.0,
        s,
        "position_size",
        "in (0, 1]",
    )?;
    if let Some(w) = integer(config, s, "warmup_bars")? {
        if w < 0 {
            return Err(SignalfuseError::invalid(s, "warmup_bars", "warmup_bars must be non-negative"));
        }
    }
    if let Some(sym) = config.get_string(s, "symbol") {
        if sym.trim().is_empty() {
            return Err(SignalfuseError::invalid(s, "symbol", "symbol must not be empty"));
        }
    }
    Ok(())
}

pub fn validate_regime_config(config: &dyn ConfigPort) -> Result<(), SignalfuseError> {
    let s = "regime";
    if let Some(n) = integer(config, s, "n_states")? {
        if !(2..=3).contains(&n) {
            return Err(SignalfuseError::invalid(s, "n_states", format!("n_states must be 2 or 3 (got {})", n)));
        }
    }
    if let Some(raw) = config.get_string(s, "covariance") {
        raw.parse::<CovarianceType>()
            .map_err(|e| SignalfuseError::invalid(s, "covariance", e))?;
    }
    for key in ["max_iter", "refit_every"] {
        if let Some(n) = integer(config, s, key)? {
            if n < 1 {
                return Err(SignalfuseError::invalid(s, key, format!("{} must be at least 1", key)));
            }
        }
    }
    check(number(config, s, "tol")?, |v| v > 0.0, s, "tol", "positive")?;
    check(number(config, s, "min_variance")?, |v| v > 0.0, s, "min_variance", "positive")?;
    Ok(())
}

pub fn validate_environment_config(config: &dyn ConfigPort) -> Result<(), SignalfuseError> {
    let s = "environment";
    check(number(config, s, "initial_balance")?, |v| v > 0.0, s, "initial_balance", "positive")?;
    check(
        number(config, s, "transaction_cost")?,
        |v| (0.0..1.0).contains(&v),
        s,
        "transaction_cost",
        "in [0, 1)",
    )?;
    check(number(config, s, "drawdown_penalty")?, |v| v >= 0.0, s, "drawdown_penalty", "non-negative")?;
    if let Some(list) = config.get_string(s, "features") {
        parse_feature_list(&list).map_err(|e| SignalfuseError::invalid(s, "features", e))?;
    }
    Ok(())
}

pub fn validate_fusion_config(config: &dyn ConfigPort) -> Result<(), SignalfuseError> {
    let s = "fusion";
    for key in [
        "ml_weight",
        "forecast_a_weight",
        "forecast_b_bonus",
        "regime_weight",
        "policy_weight",
        "sentiment_weight",
        "sentiment_threshold",
    ] {
        check(number(config, s, key)?, |v| v >= 0.0, s, key, "non-negative")?;
    }
    check(number(config, s, "max_score")?, |v| v > 0.0, s, "max_score", "positive")?;

    let bull = number(config, s, "ml_bullish_above")?.unwrap_or(0.6);
    let bear = number(config, s, "ml_bearish_below")?.unwrap_or(0.4);
    if !(0.0..=1.0).contains(&bull) || !(0.0..=1.0).contains(&bear) || bear > bull {
        return Err(SignalfuseError::invalid(
            s,
            "ml_bearish_below",
            "ml thresholds must lie in [0, 1] with ml_bearish_below <= ml_bullish_above",
        ));
    }

    let buy = number(config, s, "buy_threshold")?.unwrap_or(2.0);
    let sell = number(config, s, "sell_threshold")?.unwrap_or(-2.0);
    if buy <= sell {
        return Err(SignalfuseError::invalid(
            s,
            "buy_threshold",
            format!("buy_threshold {} must exceed sell_threshold {}", buy, sell),
        ));
    }
    Ok(())
}

pub fn validate_providers_config(config: &dyn ConfigPort) -> Result<(), SignalfuseError> {
    if let Some(ms) = integer(config, "providers", "timeout_ms")? {
        if ms <= 0 {
            return Err(SignalfuseError::invalid("providers", "timeout_ms", "timeout_ms must be positive"));
        }
    }
    Ok(())
}

pub fn validate_fundamentals_config(config: &dyn ConfigPort) -> Result<(), SignalfuseError> {
    for key in config.keys("fundamentals") {
        number(config, "fundamentals", &key)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn adapter(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn invalid_key(result: Result<(), SignalfuseError>) -> String {
        match result {
            Err(SignalfuseError::ConfigInvalid { key, .. }) => key,
            other => panic!("expected ConfigInvalid, got {:?}", other),
        }
    }

    #[test]
    fn empty_config_is_valid() {
        assert!(validate_config(&adapter("")).is_ok());
    }

    #[test]
    fn full_config_is_valid() {
        let content = r#"
[backtest]
symbol = ACME
initial_capital = 50000
transaction_cost = 0.002
position_size = 0.5
warmup_bars = 60

[regime]
n_states = 3
covariance = full
max_iter = 100
tol = 0.001
min_variance = 0.000001

[environment]
features = rsi_norm, ema_spread

[fusion]
buy_threshold = 2.5
sell_threshold = -2.5

[providers]
timeout_ms = 1500

[fundamentals]
roe = 0.2
"#;
        assert!(validate_config(&adapter(content)).is_ok());
    }

    #[test]
    fn rejects_non_numeric_capital() {
        let c = adapter("[backtest]\ninitial_capital = lots\n");
        assert_eq!(invalid_key(validate_backtest_config(&c)), "initial_capital");
    }

    #[test]
    fn rejects_zero_capital() {
        let c = adapter("[backtest]\ninitial_capital = 0\n");
        assert_eq!(invalid_key(validate_backtest_config(&c)), "initial_capital");
    }

    #[test]
    fn rejects_position_size_above_one() {
        let c = adapter("[backtest]\nposition_size = 1.5\n");
        assert_eq!(invalid_key(validate_backtest_config(&c)), "position_size");
    }

    #[test]
    fn rejects_negative_warmup() {
        let c = adapter("[backtest]\nwarmup_bars = -1\n");
        assert_eq!(invalid_key(validate_backtest_config(&c)), "warmup_bars");
    }

    #[test]
    fn rejects_four_states() {
        let c = adapter("[regime]\nn_states = 4\n");
        assert_eq!(invalid_key(validate_regime_config(&c)), "n_states");
    }

    #[test]
    fn rejects_unknown_covariance() {
        let c = adapter("[regime]\ncovariance = tied\n");
        assert_eq!(invalid_key(validate_regime_config(&c)), "covariance");
    }

    #[test]
    fn rejects_unknown_feature() {
        let c = adapter("[environment]\nfeatures = rsi_norm, moon_phase\n");
        assert_eq!(invalid_key(validate_environment_config(&c)), "features");
    }

    #[test]
    fn rejects_inverted_fusion_thresholds() {
        let c = adapter("[fusion]\nbuy_threshold = -3\n");
        assert_eq!(invalid_key(validate_fusion_config(&c)), "buy_threshold");
        let c = adapter("[fusion]\nml_bullish_above = 0.3\n");
        assert_eq!(invalid_key(validate_fusion_config(&c)), "ml_bearish_below");
    }

    #[test]
    fn rejects_zero_timeout() {
        let c = adapter("[providers]\ntimeout_ms = 0\n");
        assert_eq!(invalid_key(validate_providers_config(&c)), "timeout_ms");
    }

    #[test]
    fn rejects_garbage_fundamentals() {
        let c = adapter("[fundamentals]\nroe = high\n");
        assert_eq!(invalid_key(validate_fundamentals_config(&c)), "roe");
    }
}
