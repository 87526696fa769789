//! Gaussian hidden Markov model: deterministic initialization, scaled
//! forward-backward, Baum-Welch re-estimation and Viterbi decoding.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::gaussian::{weighted_moments, CovarianceType, Gaussian};

const LOG_FLOOR: f64 = 1e-300;
const INITIAL_STAY_PROBABILITY: f64 = 0.9;

/// Outcome of a Baum-Welch run.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub iterations: usize,
    pub log_likelihood: f64,
    pub converged: bool,
    /// Number of emission updates where the covariance floor or the diagonal
    /// fallback changed the estimate.
    pub guarded_updates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaussianHmm {
    start: Array1<f64>,
    transition: Array2<f64>,
    emissions: Vec<Gaussian>,
    covariance_type: CovarianceType,
    min_variance: f64,
}

/// Posterior quantities from one E-step.
struct Posterior {
    gamma: Array2<f64>,
    xi_sum: Array2<f64>,
    log_likelihood: f64,
}

impl GaussianHmm {
    /// Seeds a `n_states` model from `observations` (T x D, T >= n_states).
    ///
    /// Rows are ordered by their first column (the return), split into
    /// contiguous buckets of near-equal size, and each bucket mean seeds one
    /// state. All states share the pooled covariance.
    pub fn initialize(
        observations: ArrayView2<f64>,
        n_states: usize,
        covariance_type: CovarianceType,
        min_variance: f64,
    ) -> (Self, usize) {
        let t = observations.nrows();
        let d = observations.ncols();

        let mut order: Vec<usize> = (0..t).collect();
        order.sort_by(|&a, &b| {
            observations[[a, 0]]
                .total_cmp(&observations[[b, 0]])
                .then(a.cmp(&b))
        });

        let uniform = Array1::from_elem(t, 1.0);
        let (_, pooled) = weighted_moments(observations, uniform.view())
            .unwrap_or_else(|| (Array1::zeros(d), Array2::zeros((d, d))));

        let mut guarded = 0;
        let mut emissions = Vec::with_capacity(n_states);
        for k in 0..n_states {
            let lo = k * t / n_states;
            let hi = ((k + 1) * t / n_states).max(lo + 1).min(t);
            let mut mean = Array1::<f64>::zeros(d);
            for &row in &order[lo..hi] {
                mean += &observations.row(row);
            }
            mean /= (hi - lo) as f64;
            let (g, floored) =
                Gaussian::from_moments(mean, &pooled, covariance_type, min_variance);
            guarded += usize::from(floored);
            emissions.push(g);
        }

        let start = Array1::from_elem(n_states, 1.0 / n_states as f64);
        let off = if n_states > 1 {
            (1.0 - INITIAL_STAY_PROBABILITY) / (n_states - 1) as f64
        } else {
            0.0
        };
        let transition = Array2::from_shape_fn((n_states, n_states), |(i, j)| {
            if i == j {
                if n_states > 1 { INITIAL_STAY_PROBABILITY } else { 1.0 }
            } else {
                off
            }
        });

        (
            GaussianHmm {
                start,
                transition,
                emissions,
                covariance_type,
                min_variance,
            },
            guarded,
        )
    }

    /// Initialize, then run Baum-Welch until the log-likelihood gain drops
    /// below `tol` or `max_iter` iterations have run.
    pub fn fit(
        observations: ArrayView2<f64>,
        n_states: usize,
        covariance_type: CovarianceType,
        max_iter: usize,
        tol: f64,
        min_variance: f64,
    ) -> (Self, FitReport) {
        let (mut model, mut guarded_updates) =
            Self::initialize(observations, n_states, covariance_type, min_variance);

        let mut previous = f64::NEG_INFINITY;
        let mut log_likelihood = f64::NEG_INFINITY;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < max_iter {
            let posterior = model.posterior(observations);
            log_likelihood = posterior.log_likelihood;
            iterations += 1;

            guarded_updates += model.maximize(observations, &posterior);

            let gain = log_likelihood - previous;
            tracing::trace!(iteration = iterations, log_likelihood, gain, "baum-welch step");
            if gain.abs() < tol {
                converged = true;
                break;
            }
            previous = log_likelihood;
        }

        tracing::debug!(
            iterations,
            log_likelihood,
            converged,
            guarded_updates,
            "hmm fit finished"
        );

        (
            model,
            FitReport {
                iterations,
                log_likelihood,
                converged,
                guarded_updates,
            },
        )
    }

    pub fn n_states(&self) -> usize {
        self.start.len()
    }

    pub fn start(&self) -> &Array1<f64> {
        &self.start
    }

    pub fn transition(&self) -> &Array2<f64> {
        &self.transition
    }

    pub fn emissions(&self) -> &[Gaussian] {
        &self.emissions
    }

    pub fn log_likelihood(&self, observations: ArrayView2<f64>) -> f64 {
        self.posterior(observations).log_likelihood
    }

    /// Most likely state path.
    pub fn viterbi(&self, observations: ArrayView2<f64>) -> Vec<usize> {
        let t = observations.nrows();
        let n = self.n_states();
        if t == 0 {
            return vec![];
        }

        let log_b = self.log_emissions(observations);
        let log_start = self.start.mapv(|p| (p + LOG_FLOOR).ln());
        let log_trans = self.transition.mapv(|p| (p + LOG_FLOOR).ln());

        let mut delta = Array2::<f64>::zeros((t, n));
        let mut psi = Array2::<usize>::zeros((t, n));
        for j in 0..n {
            delta[[0, j]] = log_start[j] + log_b[[0, j]];
        }
        for step in 1..t {
            for j in 0..n {
                let mut best = f64::NEG_INFINITY;
                let mut arg = 0;
                for i in 0..n {
                    let v = delta[[step - 1, i]] + log_trans[[i, j]];
                    if v > best {
                        best = v;
                        arg = i;
                    }
                }
                delta[[step, j]] = best + log_b[[step, j]];
                psi[[step, j]] = arg;
            }
        }

        let mut last = 0;
        for j in 1..n {
            if delta[[t - 1, j]] > delta[[t - 1, last]] {
                last = j;
            }
        }
        let mut path = vec![0; t];
        path[t - 1] = last;
        for step in (0..t - 1).rev() {
            path[step] = psi[[step + 1, path[step + 1]]];
        }
        path
    }

    fn log_emissions(&self, observations: ArrayView2<f64>) -> Array2<f64> {
        let t = observations.nrows();
        let n = self.n_states();
        Array2::from_shape_fn((t, n), |(step, j)| {
            self.emissions[j].log_pdf(observations.row(step))
        })
    }

    /// Scaled forward-backward. Emission likelihoods are shifted by the
    /// per-step maximum before exponentiation; the shift is added back into
    /// the log-likelihood.
    fn posterior(&self, observations: ArrayView2<f64>) -> Posterior {
        let t = observations.nrows();
        let n = self.n_states();
        let log_b = self.log_emissions(observations);

        let mut b = Array2::<f64>::zeros((t, n));
        let mut shift = Array1::<f64>::zeros(t);
        for step in 0..t {
            let row = log_b.row(step);
            let m = row.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
            let m = if m.is_finite() { m } else { 0.0 };
            shift[step] = m;
            for j in 0..n {
                b[[step, j]] = (row[j] - m).exp();
            }
        }

        let mut alpha = Array2::<f64>::zeros((t, n));
        let mut scale = Array1::<f64>::zeros(t);
        for step in 0..t {
            for j in 0..n {
                let prior = if step == 0 {
                    self.start[j]
                } else {
                    (0..n)
                        .map(|i| alpha[[step - 1, i]] * self.transition[[i, j]])
                        .sum()
                };
                alpha[[step, j]] = prior * b[[step, j]];
            }
            let c = alpha.row(step).sum();
            if c > 0.0 && c.is_finite() {
                alpha.row_mut(step).mapv_inplace(|v| v / c);
                scale[step] = c;
            } else {
                alpha.row_mut(step).fill(1.0 / n as f64);
                scale[step] = LOG_FLOOR;
            }
        }

        let mut beta = Array2::<f64>::ones((t, n));
        for step in (0..t.saturating_sub(1)).rev() {
            for i in 0..n {
                let v: f64 = (0..n)
                    .map(|j| self.transition[[i, j]] * b[[step + 1, j]] * beta[[step + 1, j]])
                    .sum();
                beta[[step, i]] = v / scale[step + 1];
            }
        }

        let mut gamma = &alpha * &beta;
        for mut row in gamma.axis_iter_mut(Axis(0)) {
            let s = row.sum();
            if s > 0.0 {
                row.mapv_inplace(|v| v / s);
            } else {
                row.fill(1.0 / n as f64);
            }
        }

        let mut xi_sum = Array2::<f64>::zeros((n, n));
        for step in 0..t.saturating_sub(1) {
            for i in 0..n {
                for j in 0..n {
                    xi_sum[[i, j]] += alpha[[step, i]]
                        * self.transition[[i, j]]
                        * b[[step + 1, j]]
                        * beta[[step + 1, j]]
                        / scale[step + 1];
                }
            }
        }

        let log_likelihood = scale.iter().map(|c| c.ln()).sum::<f64>() + shift.sum();

        Posterior {
            gamma,
            xi_sum,
            log_likelihood,
        }
    }

    /// M-step. Returns the number of guarded emission updates.
    fn maximize(&mut self, observations: ArrayView2<f64>, posterior: &Posterior) -> usize {
        let n = self.n_states();

        self.start.assign(&posterior.gamma.row(0));

        for i in 0..n {
            let row_sum = posterior.xi_sum.row(i).sum();
            if row_sum > 0.0 {
                for j in 0..n {
                    self.transition[[i, j]] = posterior.xi_sum[[i, j]] / row_sum;
                }
            }
        }

        let mut guarded = 0;
        for k in 0..n {
            let weights = posterior.gamma.column(k);
            if let Some((mean, covariance)) = weighted_moments(observations, weights) {
                let (g, floored) = Gaussian::from_moments(
                    mean,
                    &covariance,
                    self.covariance_type,
                    self.min_variance,
                );
                guarded += usize::from(floored);
                self.emissions[k] = g;
            }
        }
        guarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two well separated clusters in alternating blocks of ten rows.
    fn two_cluster_obs() -> Array2<f64> {
        Array2::from_shape_fn((60, 2), |(t, d)| {
            let block = (t / 10) % 2;
            let wobble = ((t * 7 + d * 3) % 5) as f64 * 0.001;
            match (block, d) {
                (0, 0) => -0.02 + wobble,
                (0, _) => 0.03 + wobble,
                (_, 0) => 0.02 + wobble,
                (_, _) => 0.01 + wobble,
            }
        })
    }

    #[test]
    fn initialization_orders_means_by_return() {
        let obs = two_cluster_obs();
        let (model, _) = GaussianHmm::initialize(obs.view(), 2, CovarianceType::Diagonal, 1e-6);
        assert!(model.emissions()[0].mean()[0] < model.emissions()[1].mean()[0]);
        assert_relative_eq!(model.start()[0], 0.5);
        assert_relative_eq!(model.transition()[[0, 0]], 0.9);
        assert_relative_eq!(model.transition()[[0, 1]], 0.1);
    }

    #[test]
    fn three_state_transitions_are_row_stochastic() {
        let obs = two_cluster_obs();
        let (model, _) = GaussianHmm::fit(obs.view(), 3, CovarianceType::Full, 50, 1e-4, 1e-6);
        for row in model.transition().rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }
        assert_relative_eq!(model.start().sum(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn fit_improves_likelihood() {
        let obs = two_cluster_obs();
        let (initial, _) = GaussianHmm::initialize(obs.view(), 2, CovarianceType::Diagonal, 1e-6);
        let (fitted, report) =
            GaussianHmm::fit(obs.view(), 2, CovarianceType::Diagonal, 200, 1e-4, 1e-6);
        assert!(report.log_likelihood.is_finite());
        assert!(fitted.log_likelihood(obs.view()) >= initial.log_likelihood(obs.view()));
    }

    #[test]
    fn viterbi_recovers_blocks() {
        let obs = two_cluster_obs();
        let (model, _) = GaussianHmm::fit(obs.view(), 2, CovarianceType::Diagonal, 200, 1e-4, 1e-6);
        let path = model.viterbi(obs.view());
        assert_eq!(path.len(), 60);
        let low = if model.emissions()[0].mean()[0] < model.emissions()[1].mean()[0] {
            0
        } else {
            1
        };
        assert_eq!(path[0], low);
        assert_eq!(path[15], 1 - low);
        assert_eq!(path[25], low);
    }

    #[test]
    fn fit_is_deterministic() {
        let obs = two_cluster_obs();
        let a = GaussianHmm::fit(obs.view(), 3, CovarianceType::Full, 100, 1e-4, 1e-6);
        let b = GaussianHmm::fit(obs.view(), 3, CovarianceType::Full, 100, 1e-4, 1e-6);
        assert_eq!(a, b);
    }

    #[test]
    fn constant_observations_stay_finite() {
        let obs = Array2::<f64>::zeros((30, 2));
        let (model, report) =
            GaussianHmm::fit(obs.view(), 2, CovarianceType::Full, 200, 1e-4, 1e-6);
        assert!(report.log_likelihood.is_finite());
        assert!(report.guarded_updates > 0);
        assert_eq!(model.viterbi(obs.view()).len(), 30);
    }

    #[test]
    fn viterbi_on_empty_input() {
        let obs = two_cluster_obs();
        let (model, _) = GaussianHmm::initialize(obs.view(), 2, CovarianceType::Diagonal, 1e-6);
        assert!(model.viterbi(Array2::<f64>::zeros((0, 2)).view()).is_empty());
    }
}
