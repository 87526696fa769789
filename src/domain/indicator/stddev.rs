//! Rolling sample standard deviation.
//!
//! STDDEV(n)[i] = sqrt(sum((x[i-j] - mean)^2 for j in 0..n) / (n - 1))
//! Warmup: the first (n-1) positions are `None`, as is any window holding a
//! non-finite value.

pub fn rolling_stddev(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window < 2 || i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            if slice.iter().any(|v| !v.is_finite()) {
                return None;
            }
            let mean = slice.iter().sum::<f64>() / window as f64;
            let variance =
                slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
            Some(variance.sqrt())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stddev_warmup() {
        let out = rolling_stddev(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!(out[2].is_some());
    }

    #[test]
    fn stddev_known_value() {
        // Sample std of [2, 4, 4, 4, 5, 5, 7, 9] = 2.138089935...
        let out = rolling_stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8);
        assert!((out[7].unwrap() - 2.138_089_935_299_395).abs() < 1e-12);
    }

    #[test]
    fn stddev_constant_is_zero() {
        let out = rolling_stddev(&[3.0; 5], 3);
        assert_eq!(out[4], Some(0.0));
    }

    #[test]
    fn stddev_skips_non_finite_windows() {
        let out = rolling_stddev(&[1.0, f64::NAN, 3.0, 4.0, 5.0], 2);
        assert_eq!(out[1], None);
        assert_eq!(out[2], None);
        assert!(out[3].is_some());
    }
}
