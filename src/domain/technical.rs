//! Rule-based technical signal over indicator readings and a fundamentals
//! snapshot.

use serde::Serialize;

use super::decision::Decision;
use super::features::IndicatorSnapshot;
use super::ohlcv::OhlcvBar;
use super::portfolio::Action;

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;
const NEAR_LOW_BAND: f64 = 1.05;
const NEAR_HIGH_BAND: f64 = 0.95;
const HIGH_LEVERAGE: f64 = 2.0;
const STRONG_ROE: f64 = 0.15;
const ACTION_THRESHOLD: f64 = 1.5;
const CONFIDENCE_SCALE: f64 = 3.0;
const WEEKS_52_BARS: usize = 252;

pub const NO_STRONG_SIGNALS: &str = "No strong signals";

/// Point-in-time fundamentals. Fields the provider does not know are 0.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Fundamentals {
    pub current_price: f64,
    pub week52_high: f64,
    pub week52_low: f64,
    pub debt_to_equity: f64,
    pub roe: f64,
}

/// Fill a snapshot's missing price levels from `bars`: the current price is
/// the last close and the 52-week range spans the trailing 252 bars.
pub fn with_price_levels(bars: &[OhlcvBar], snapshot: &Fundamentals) -> Fundamentals {
    let window = &bars[bars.len().saturating_sub(WEEKS_52_BARS)..];
    let mut f = *snapshot;
    if f.current_price <= 0.0 {
        f.current_price = bars.last().map(|b| b.close).unwrap_or(0.0);
    }
    if f.week52_high <= 0.0 {
        f.week52_high = window.iter().map(|b| b.high).fold(0.0, f64::max);
    }
    if f.week52_low <= 0.0 && !window.is_empty() {
        f.week52_low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    }
    f
}

/// Score the rule table. RSI and MACD rules are skipped while the indicator
/// is still warming up, and the 52-week rules need positive price levels.
pub fn evaluate(indicators: &IndicatorSnapshot, fundamentals: &Fundamentals) -> Decision {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if let Some(rsi) = indicators.rsi {
        if rsi < RSI_OVERSOLD {
            score += 1.0;
            reasons.push("RSI oversold");
        } else if rsi > RSI_OVERBOUGHT {
            score -= 1.0;
            reasons.push("RSI overbought");
        }
    }

    if let (Some(macd), Some(signal)) = (indicators.macd, indicators.macd_signal) {
        if macd > signal {
            score += 0.5;
            reasons.push("MACD bullish crossover");
        } else {
            score -= 0.5;
            reasons.push("MACD bearish crossover");
        }
    }

    let price = fundamentals.current_price;
    if price > 0.0 {
        if fundamentals.week52_low > 0.0 && price <= fundamentals.week52_low * NEAR_LOW_BAND {
            score += 0.5;
            reasons.push("Near 52-week low");
        }
        if fundamentals.week52_high > 0.0 && price >= fundamentals.week52_high * NEAR_HIGH_BAND {
            score -= 0.5;
            reasons.push("Near 52-week high");
        }
    }

    if fundamentals.debt_to_equity > HIGH_LEVERAGE {
        score -= 0.5;
        reasons.push("High leverage");
    }
    if fundamentals.roe > STRONG_ROE {
        score += 0.5;
        reasons.push("Strong ROE");
    }

    let action = if score >= ACTION_THRESHOLD {
        Action::Buy
    } else if score <= -ACTION_THRESHOLD {
        Action::Sell
    } else {
        Action::Hold
    };

    Decision {
        action,
        score,
        confidence: (f64::abs(score) / CONFIDENCE_SCALE).min(1.0),
        explanation: if reasons.is_empty() {
            vec![NO_STRONG_SIGNALS.to_string()]
        } else {
            reasons.into_iter().map(String::from).collect()
        },
    }
}
