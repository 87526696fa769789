//! Deadline wrappers for external signal providers.
//!
//! The call runs on a worker thread. If no answer arrives within the timeout
//! the neutral value is returned and the worker is left to finish on its own.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::domain::features::FeatureFrame;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::pipeline::SignalSources;
use crate::domain::portfolio::Action;
use crate::domain::technical::Fundamentals;
use crate::ports::signal_port::{
    DirectionClassifier, FundamentalsProvider, NewsSentiment, NewsSentimentProvider, PolicyAgent,
    ReturnPredictor,
};

/// Run `f` on a worker thread; `None` on timeout or if the worker panics.
pub fn call_with_deadline<T, F>(label: &str, timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("provider-{}", label))
        .spawn(move || {
            // The receiver may already be gone after a timeout.
            let _ = tx.send(f());
        });
    if let Err(e) = spawned {
        tracing::warn!(provider = label, error = %e, "failed to spawn provider thread");
        return None;
    }

    match rx.recv_timeout(timeout) {
        Ok(value) => Some(value),
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                provider = label,
                timeout_ms = timeout.as_millis() as u64,
                "provider timed out; using neutral value"
            );
            None
        }
        Err(RecvTimeoutError::Disconnected) => {
            tracing::warn!(provider = label, "provider failed; using neutral value");
            None
        }
    }
}

/// A provider behind a deadline.
pub struct Timed<P: ?Sized> {
    label: &'static str,
    inner: Arc<P>,
    timeout: Duration,
}

impl<P: ?Sized> Timed<P> {
    pub fn new(label: &'static str, inner: Arc<P>, timeout: Duration) -> Self {
        Timed {
            label,
            inner,
            timeout,
        }
    }
}

impl DirectionClassifier for Timed<dyn DirectionClassifier> {
    fn prob_up(&self, bars: &[OhlcvBar], frame: &FeatureFrame) -> f64 {
        let inner = Arc::clone(&self.inner);
        let (bars, frame) = (bars.to_vec(), frame.clone());
        call_with_deadline(self.label, self.timeout, move || inner.prob_up(&bars, &frame))
            .unwrap_or(f64::NAN)
    }
}

impl ReturnPredictor for Timed<dyn ReturnPredictor> {
    fn predict(&self, bars: &[OhlcvBar], frame: &FeatureFrame) -> f64 {
        let inner = Arc::clone(&self.inner);
        let (bars, frame) = (bars.to_vec(), frame.clone());
        call_with_deadline(self.label, self.timeout, move || inner.predict(&bars, &frame))
            .unwrap_or(f64::NAN)
    }
}

impl PolicyAgent for Timed<dyn PolicyAgent> {
    fn act(&self, observation: &[f64]) -> Action {
        let inner = Arc::clone(&self.inner);
        let observation = observation.to_vec();
        call_with_deadline(self.label, self.timeout, move || inner.act(&observation))
            .unwrap_or(Action::Hold)
    }
}

impl NewsSentimentProvider for Timed<dyn NewsSentimentProvider> {
    fn sentiment(&self, symbol: &str) -> NewsSentiment {
        let inner = Arc::clone(&self.inner);
        let symbol = symbol.to_string();
        call_with_deadline(self.label, self.timeout, move || inner.sentiment(&symbol)).unwrap_or(
            NewsSentiment {
                score: f64::NAN,
                summary: String::new(),
            },
        )
    }
}

impl FundamentalsProvider for Timed<dyn FundamentalsProvider> {
    fn fundamentals(&self, symbol: &str) -> Fundamentals {
        let inner = Arc::clone(&self.inner);
        let symbol = symbol.to_string();
        call_with_deadline(self.label, self.timeout, move || inner.fundamentals(&symbol))
            .unwrap_or_default()
    }
}

/// Put every configured provider behind `timeout`.
pub fn with_deadline(sources: &SignalSources, timeout: Duration) -> SignalSources {
    SignalSources {
        classifier: sources.classifier.clone().map(|p| {
            Arc::new(Timed::new("classifier", p, timeout)) as Arc<dyn DirectionClassifier>
        }),
        forecast_a: sources.forecast_a.clone().map(|p| {
            Arc::new(Timed::new("forecast_a", p, timeout)) as Arc<dyn ReturnPredictor>
        }),
        forecast_b: sources.forecast_b.clone().map(|p| {
            Arc::new(Timed::new("forecast_b", p, timeout)) as Arc<dyn ReturnPredictor>
        }),
        policy: sources
            .policy
            .clone()
            .map(|p| Arc::new(Timed::new("policy", p, timeout)) as Arc<dyn PolicyAgent>),
        news: sources
            .news
            .clone()
            .map(|p| Arc::new(Timed::new("news", p, timeout)) as Arc<dyn NewsSentimentProvider>),
        fundamentals: sources.fundamentals.clone().map(|p| {
            Arc::new(Timed::new("fundamentals", p, timeout)) as Arc<dyn FundamentalsProvider>
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow(Duration, f64);

    impl ReturnPredictor for Slow {
        fn predict(&self, _bars: &[OhlcvBar], _frame: &FeatureFrame) -> f64 {
            thread::sleep(self.0);
            self.1
        }
    }

    struct Panicky;

    impl PolicyAgent for Panicky {
        fn act(&self, _observation: &[f64]) -> Action {
            panic!("model crashed");
        }
    }

    fn empty_frame() -> FeatureFrame {
        let bars = crate::domain::indicator::test_support::make_bars(&[1.0, 2.0]);
        FeatureFrame::build(&crate::domain::ohlcv::PriceSeries::new(bars).unwrap())
    }

    #[test]
    fn fast_call_returns_value() {
        assert_eq!(call_with_deadline("t", Duration::from_secs(1), || 7), Some(7));
    }

    #[test]
    fn slow_call_times_out() {
        let out = call_with_deadline("t", Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            7
        });
        assert_eq!(out, None);
    }

    #[test]
    fn timed_predictor_falls_back_to_nan() {
        let inner: Arc<dyn ReturnPredictor> = Arc::new(Slow(Duration::from_millis(500), 0.1));
        let timed = Timed::new("slow", inner, Duration::from_millis(20));
        assert!(timed.predict(&[], &empty_frame()).is_nan());
    }

    #[test]
    fn timed_predictor_passes_through() {
        let inner: Arc<dyn ReturnPredictor> = Arc::new(Slow(Duration::ZERO, 0.1));
        let timed = Timed::new("fast", inner, Duration::from_secs(2));
        assert_eq!(timed.predict(&[], &empty_frame()), 0.1);
    }

    #[test]
    fn panicking_agent_holds() {
        let inner: Arc<dyn PolicyAgent> = Arc::new(Panicky);
        let timed = Timed::new("panicky", inner, Duration::from_secs(2));
        assert_eq!(timed.act(&[0.0]), Action::Hold);
    }

    #[test]
    fn with_deadline_wraps_only_present_sources() {
        let sources = SignalSources {
            forecast_a: Some(Arc::new(Slow(Duration::ZERO, 0.3))),
            ..SignalSources::default()
        };
        let wrapped = with_deadline(&sources, Duration::from_secs(1));
        assert!(wrapped.forecast_a.is_some());
        assert!(wrapped.classifier.is_none());
        assert!(wrapped.news.is_none());
    }
}
