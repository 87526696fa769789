//! Gaussian emission densities for the regime HMM.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Shape of the per-state covariance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovarianceType {
    Diagonal,
    Full,
}

impl fmt::Display for CovarianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovarianceType::Diagonal => f.write_str("diag"),
            CovarianceType::Full => f.write_str("full"),
        }
    }
}

impl FromStr for CovarianceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "diag" | "diagonal" => Ok(CovarianceType::Diagonal),
            "full" => Ok(CovarianceType::Full),
            other => Err(format!("unknown covariance type '{}'", other)),
        }
    }
}

/// Multivariate normal with a cached Cholesky factor.
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    cholesky: Array2<f64>,
    log_det: f64,
}

impl Gaussian {
    /// Builds a density from raw moment estimates.
    ///
    /// `min_variance` is added to every diagonal entry. A full covariance that
    /// is still not positive definite is replaced by its diagonal. The returned
    /// flag reports whether the floor was load-bearing (some raw variance fell
    /// below it) or the diagonal fallback was taken.
    pub fn from_moments(
        mean: Array1<f64>,
        raw_covariance: &Array2<f64>,
        kind: CovarianceType,
        min_variance: f64,
    ) -> (Self, bool) {
        let d = mean.len();
        let mut guarded = (0..d).any(|i| raw_covariance[[i, i]] < min_variance);

        let mut covariance = match kind {
            CovarianceType::Diagonal => Array2::from_diag(&raw_covariance.diag().to_owned()),
            CovarianceType::Full => raw_covariance.clone(),
        };
        for i in 0..d {
            covariance[[i, i]] = covariance[[i, i]].max(0.0) + min_variance;
        }

        let cholesky = match cholesky(covariance.view()) {
            Some(l) => l,
            None => {
                guarded = true;
                covariance = Array2::from_diag(&covariance.diag().to_owned());
                Array2::from_diag(&covariance.diag().mapv(f64::sqrt))
            }
        };
        let log_det = 2.0 * cholesky.diag().iter().map(|v| v.ln()).sum::<f64>();

        (
            Gaussian {
                mean,
                covariance,
                cholesky,
                log_det,
            },
            guarded,
        )
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    /// log N(x | mean, covariance)
    pub fn log_pdf(&self, x: ArrayView1<f64>) -> f64 {
        let d = self.dim();
        // Solve L z = (x - mean); the quadratic form is |z|^2.
        let mut z = Array1::<f64>::zeros(d);
        for i in 0..d {
            let mut acc = x[i] - self.mean[i];
            for k in 0..i {
                acc -= self.cholesky[[i, k]] * z[k];
            }
            z[i] = acc / self.cholesky[[i, i]];
        }
        let quad = z.dot(&z);
        -0.5 * (d as f64 * (2.0 * PI).ln() + self.log_det + quad)
    }
}

/// Weighted mean and (biased) covariance of the rows of `observations`.
/// Returns `None` when the weights carry no mass.
pub fn weighted_moments(
    observations: ArrayView2<f64>,
    weights: ArrayView1<f64>,
) -> Option<(Array1<f64>, Array2<f64>)> {
    let total = weights.sum();
    if !(total > 1e-10) {
        return None;
    }
    let d = observations.ncols();

    let mut mean = Array1::<f64>::zeros(d);
    for (row, &w) in observations.rows().into_iter().zip(weights.iter()) {
        mean.scaled_add(w, &row);
    }
    mean /= total;

    let mut covariance = Array2::<f64>::zeros((d, d));
    for (row, &w) in observations.rows().into_iter().zip(weights.iter()) {
        let diff = &row - &mean;
        for j in 0..d {
            for k in 0..d {
                covariance[[j, k]] += w * diff[j] * diff[k];
            }
        }
    }
    covariance /= total;

    Some((mean, covariance))
}

/// Lower-triangular Cholesky factor, or `None` if `a` is not positive definite.
fn cholesky(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr2, array};

    #[test]
    fn covariance_type_parses() {
        assert_eq!("diag".parse::<CovarianceType>(), Ok(CovarianceType::Diagonal));
        assert_eq!("FULL".parse::<CovarianceType>(), Ok(CovarianceType::Full));
        assert!("spherical".parse::<CovarianceType>().is_err());
    }

    #[test]
    fn standard_normal_log_pdf_at_mean() {
        let (g, guarded) =
            Gaussian::from_moments(array![0.0], &arr2(&[[1.0]]), CovarianceType::Diagonal, 0.0);
        assert!(!guarded);
        assert_relative_eq!(
            g.log_pdf(array![0.0].view()),
            -0.5 * (2.0 * PI).ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn full_covariance_matches_closed_form() {
        let cov = arr2(&[[2.0, 0.5], [0.5, 1.0]]);
        let (g, _) = Gaussian::from_moments(array![1.0, -1.0], &cov, CovarianceType::Full, 0.0);
        let x = array![2.0, 0.0];
        // det = 1.75, inverse = [[1, -0.5], [-0.5, 2]] / 1.75; diff = [1, 1]
        let quad = (1.0 - 0.5 - 0.5 + 2.0) / 1.75;
        let expected = -0.5 * (2.0 * (2.0 * PI).ln() + 1.75_f64.ln() + quad);
        assert_relative_eq!(g.log_pdf(x.view()), expected, epsilon = 1e-12);
    }

    #[test]
    fn diagonal_drops_off_diagonal_terms() {
        let cov = arr2(&[[2.0, 0.5], [0.5, 1.0]]);
        let (g, _) = Gaussian::from_moments(array![0.0, 0.0], &cov, CovarianceType::Diagonal, 0.0);
        assert_eq!(g.covariance()[[0, 1]], 0.0);
        assert_eq!(g.covariance()[[1, 1]], 1.0);
    }

    #[test]
    fn zero_variance_is_floored_deterministically() {
        let zero = Array2::<f64>::zeros((2, 2));
        let (a, guarded) =
            Gaussian::from_moments(array![0.0, 0.0], &zero, CovarianceType::Full, 1e-6);
        let (b, _) = Gaussian::from_moments(array![0.0, 0.0], &zero, CovarianceType::Full, 1e-6);
        assert!(guarded);
        assert_eq!(a, b);
        assert_relative_eq!(a.covariance()[[0, 0]], 1e-6);
        assert!(a.log_pdf(array![0.0, 0.0].view()).is_finite());
    }

    #[test]
    fn non_positive_definite_falls_back_to_diagonal() {
        let cov = arr2(&[[1.0, 2.0], [2.0, 1.0]]);
        let (g, guarded) = Gaussian::from_moments(array![0.0, 0.0], &cov, CovarianceType::Full, 0.0);
        assert!(guarded);
        assert_eq!(g.covariance()[[0, 1]], 0.0);
        assert!(g.log_pdf(array![0.5, 0.5].view()).is_finite());
    }

    #[test]
    fn weighted_moments_respect_weights() {
        let obs = arr2(&[[1.0, 0.0], [3.0, 2.0], [100.0, 100.0]]);
        let (mean, cov) = weighted_moments(obs.view(), array![1.0, 1.0, 0.0].view()).unwrap();
        assert_relative_eq!(mean[0], 2.0);
        assert_relative_eq!(mean[1], 1.0);
        assert_relative_eq!(cov[[0, 0]], 1.0);
        assert_relative_eq!(cov[[0, 1]], 1.0);
    }

    #[test]
    fn weighted_moments_without_mass() {
        let obs = arr2(&[[1.0], [2.0]]);
        assert!(weighted_moments(obs.view(), array![0.0, 0.0].view()).is_none());
    }
}
