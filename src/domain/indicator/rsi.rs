//! RSI (Relative Strength Index) indicator.
//!
//! Average gain/loss are simple rolling means over the last n price changes:
//! RSI = 100 - 100 / (1 + avg_gain / (avg_loss + 1e-9)).
//!
//! Warmup: the first n bars are invalid (n price changes are needed).

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::OhlcvBar;

const LOSS_EPSILON: f64 = 1e-9;

pub fn calculate_rsi(bars: &[OhlcvBar], period: usize) -> IndicatorSeries {
    let mut values = Vec::with_capacity(bars.len());

    for (i, bar) in bars.iter().enumerate() {
        let valid = period > 0 && i >= period;
        let rsi = if valid {
            let window = &bars[i - period..=i];
            let (gain, loss) = window.windows(2).fold((0.0, 0.0), |(g, l), w| {
                let change = w[1].close - w[0].close;
                if change > 0.0 {
                    (g + change, l)
                } else {
                    (g, l - change)
                }
            });
            let avg_gain = gain / period as f64;
            let avg_loss = loss / period as f64;
            let rs = avg_gain / (avg_loss + LOSS_EPSILON);
            100.0 - 100.0 / (1.0 + rs)
        } else {
            0.0
        };

        values.push(IndicatorPoint {
            date: bar.date,
            valid,
            value: IndicatorValue::Simple(rsi),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Rsi(period),
        values,
    }
}
