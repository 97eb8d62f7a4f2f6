use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use crate::{
    data::{time_order, SurvivalTime},
    error::{TuneError, Result},
};

/// Configuration for Cox model optimization
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    pub l2_penalty: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            l2_penalty: 0.0,
            max_iterations: 50,
            tolerance: 1e-9,
        }
    }
}

/// Newton-Raphson on the ridge-penalised Cox partial likelihood (Breslow ties)
pub struct CoxOptimizer {
    config: OptimizationConfig,
}

impl CoxOptimizer {
    pub fn new(config: OptimizationConfig) -> Self {
        Self { config }
    }

    pub fn optimize(
        &self,
        x: ArrayView2<f64>,
        y: &[SurvivalTime],
        weights: Option<ArrayView1<f64>>,
    ) -> Result<Array1<f64>> {
        if x.nrows() != y.len() {
            return Err(TuneError::invalid_dimensions(
                format!("covariates rows ({}) != n_cases ({})", x.nrows(), y.len())
            ));
        }
        let n_features = x.ncols();
        let l2 = self.config.l2_penalty;
        let mut beta = Array1::zeros(n_features);

        let penalized = |loglik: f64, beta: &Array1<f64>| loglik - 0.5 * l2 * beta.dot(beta);

        let (loglik, mut gradient, mut hessian) = self.likelihood_derivatives(x, y, weights, &beta)?;
        let mut current = penalized(loglik, &beta);

        for iteration in 0..self.config.max_iterations {
            // Add Ridge penalty to gradient and Hessian
            let penalized_gradient = &gradient - &(l2 * &beta);
            let mut penalized_hessian = hessian.clone();
            for i in 0..n_features {
                penalized_hessian[[i, i]] -= l2;
            }

            let step = solve_linear_system(&penalized_hessian, &penalized_gradient)?;

            // step halving until the penalised likelihood stops dropping
            let mut scale = 1.0;
            let mut accepted = None;
            for _ in 0..30 {
                let candidate = &beta - &(scale * &step);
                let derivs = self.likelihood_derivatives(x, y, weights, &candidate)?;
                let value = penalized(derivs.0, &candidate);
                if value.is_finite() && value >= current - 1e-12 {
                    accepted = Some((candidate, derivs, value));
                    break;
                }
                scale *= 0.5;
            }

            let Some((candidate, (_, g, h), value)) = accepted else {
                log::debug!("cox newton stalled at iteration {}", iteration);
                break;
            };
            beta = candidate;
            gradient = g;
            hessian = h;
            let improvement = value - current;
            current = value;

            if improvement.abs() < self.config.tolerance * (1.0 + current.abs()) {
                return Ok(beta);
            }
        }

        if beta.iter().any(|b| !b.is_finite()) {
            return Err(TuneError::numerical_error("newton-raphson diverged"));
        }
        Ok(beta)
    }

    /// log partial likelihood, gradient and hessian in one pass over the
    /// risk sets (cases sorted by time, accumulated from the latest time back)
    fn likelihood_derivatives(
        &self,
        x: ArrayView2<f64>,
        y: &[SurvivalTime],
        weights: Option<ArrayView1<f64>>,
        beta: &Array1<f64>,
    ) -> Result<(f64, Array1<f64>, Array2<f64>)> {
        let n_features = x.ncols();
        let eta = x.dot(beta);
        // shift linear predictors so exp() can't overflow; cancels in the ratios
        let shift = eta.iter().copied().fold(f64::NEG_INFINITY, f64::max).max(0.0);
        let weight = |i: usize| weights.map_or(1.0, |w| w[i]);

        let mut loglik = 0.0;
        let mut gradient = Array1::zeros(n_features);
        let mut hessian = Array2::zeros((n_features, n_features));

        let mut s0 = 0.0;
        let mut s1: Array1<f64> = Array1::zeros(n_features);
        let mut s2: Array2<f64> = Array2::zeros((n_features, n_features));

        let order = time_order(y);
        let mut end = order.len();
        while end > 0 {
            // group of cases sharing the current (latest remaining) time
            let t = y[order[end - 1]].time;
            let mut start = end;
            while start > 0 && y[order[start - 1]].time == t {
                start -= 1;
            }
            let group = &order[start..end];

            for &i in group {
                let r = weight(i) * (eta[i] - shift).exp();
                let xi = x.row(i);
                s0 += r;
                s1.scaled_add(r, &xi);
                for j in 0..n_features {
                    for k in 0..n_features {
                        s2[[j, k]] += r * xi[j] * xi[k];
                    }
                }
            }

            if s0 <= 0.0 || !s0.is_finite() {
                return Err(TuneError::numerical_error("Risk set sum is non-positive"));
            }
            let log_sum = s0.ln() + shift;
            let mean = &s1 / s0;

            for &i in group.iter().filter(|&&i| y[i].is_event()) {
                let w = weight(i);
                loglik += w * (eta[i] - log_sum);
                gradient.scaled_add(w, &(&x.row(i) - &mean));
                for j in 0..n_features {
                    for k in 0..n_features {
                        hessian[[j, k]] -= w * (s2[[j, k]] / s0 - mean[j] * mean[k]);
                    }
                }
            }
            end = start;
        }

        Ok((loglik, gradient, hessian))
    }
}

/// weighted ridge least squares: (X'WX + l2 I) b = X'Wy
pub fn ridge_least_squares(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    weights: Option<ArrayView1<f64>>,
    l2: f64,
) -> Result<Array1<f64>> {
    if x.nrows() != y.len() {
        return Err(TuneError::invalid_dimensions(
            format!("covariates rows ({}) != response len ({})", x.nrows(), y.len())
        ));
    }
    let xw = match weights {
        Some(w) => {
            let mut xw = x.to_owned();
            for (mut row, &wi) in xw.rows_mut().into_iter().zip(w.iter()) {
                row *= wi;
            }
            xw
        }
        None => x.to_owned(),
    };
    let mut gram = xw.t().dot(&x);
    for i in 0..gram.nrows() {
        gram[[i, i]] += l2;
    }
    let rhs = xw.t().dot(&y);
    solve_linear_system(&gram, &rhs)
}

/// Solve linear system Ax = b (gaussian elimination w/ partial pivoting)
pub fn solve_linear_system(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(TuneError::invalid_dimensions("Matrix dimensions mismatch"));
    }

    let mut a_copy = a.clone();
    let mut b_copy = b.clone();

    // Forward elimination
    for i in 0..n {
        let mut max_row = i;
        for k in i + 1..n {
            if a_copy[[k, i]].abs() > a_copy[[max_row, i]].abs() {
                max_row = k;
            }
        }

        if a_copy[[max_row, i]].abs() < 1e-12 {
            return Err(TuneError::numerical_error("Matrix is singular"));
        }

        if max_row != i {
            for j in 0..n {
                a_copy.swap([i, j], [max_row, j]);
            }
            b_copy.swap(i, max_row);
        }

        for k in i + 1..n {
            let factor = a_copy[[k, i]] / a_copy[[i, i]];
            for j in i..n {
                a_copy[[k, j]] -= factor * a_copy[[i, j]];
            }
            b_copy[k] -= factor * b_copy[i];
        }
    }

    // Back substitution
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = b_copy[i];
        for j in i + 1..n {
            x[i] -= a_copy[[i, j]] * x[j];
        }
        x[i] /= a_copy[[i, i]];
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn create_test_data() -> (Array2<f64>, Vec<SurvivalTime>) {
        let x = Array2::from_shape_vec((6, 2), vec![
            1.0, 0.0,
            0.0, 1.0,
            1.0, 1.0,
            -1.0, 0.0,
            0.0, -1.0,
            0.5, 0.5,
        ]).unwrap();
        let y = vec![
            SurvivalTime::event(1.0),
            SurvivalTime::event(2.0),
            SurvivalTime::censored(3.0),
            SurvivalTime::event(4.0),
            SurvivalTime::event(5.0),
            SurvivalTime::event(2.0),
        ];
        (x, y)
    }

    #[test]
    fn test_solve_linear_system() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![3.0, 5.0];
        let x = solve_linear_system(&a, &b).unwrap();
        assert_relative_eq!(x[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(x[1], 1.4, epsilon = 1e-12);

        let singular = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(solve_linear_system(&singular, &b).is_err());
    }

    #[test]
    fn test_single_binary_covariate_score_is_zero_at_optimum() {
        let (x, y) = create_test_data();
        let optimizer = CoxOptimizer::new(OptimizationConfig { l2_penalty: 0.1, ..Default::default() });
        let beta = optimizer.optimize(x.view(), &y, None).unwrap();

        let (_, gradient, _) = optimizer.likelihood_derivatives(x.view(), &y, None, &beta).unwrap();
        let penalized = &gradient - &(0.1 * &beta);
        assert!(penalized.iter().all(|g| g.abs() < 1e-6));
    }

    #[test]
    fn test_ridge_shrinks_coefficients() {
        let (x, y) = create_test_data();
        let light = CoxOptimizer::new(OptimizationConfig { l2_penalty: 0.01, ..Default::default() })
            .optimize(x.view(), &y, None)
            .unwrap();
        let heavy = CoxOptimizer::new(OptimizationConfig { l2_penalty: 10.0, ..Default::default() })
            .optimize(x.view(), &y, None)
            .unwrap();
        assert!(heavy.dot(&heavy) < light.dot(&light));
    }

    #[test]
    fn test_integer_weights_match_duplication() {
        let (x, y) = create_test_data();
        let optimizer = CoxOptimizer::new(OptimizationConfig { l2_penalty: 0.5, ..Default::default() });

        let w = array![2.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let weighted = optimizer.optimize(x.view(), &y, Some(w.view())).unwrap();

        let idx = [0, 0, 1, 2, 3, 4, 5];
        let x_dup = x.select(ndarray::Axis(0), &idx);
        let y_dup: Vec<SurvivalTime> = idx.iter().map(|&i| y[i]).collect();
        let duplicated = optimizer.optimize(x_dup.view(), &y_dup, None).unwrap();

        for j in 0..2 {
            assert_relative_eq!(weighted[j], duplicated[j], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_ridge_least_squares_exact_fit() {
        let x = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 1.0]];
        let y = array![1.0, 2.0, 3.0, 4.0];
        let b = ridge_least_squares(x.view(), y.view(), None, 0.0).unwrap();
        assert_relative_eq!(b[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(b[1], 2.0, epsilon = 1e-10);
    }
}
