use std::time::Instant;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use crate::{
    data::SurvivalData,
    error::{CoxError, Result},
    metrics::log_partial_likelihood,
};

/// largest single coordinate move per sweep - keeps newton steps from overshooting
const MAX_COORDINATE_STEP: f64 = 1.0;

/// Optimization algorithm types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerType {
    NewtonRaphson,
    CoordinateDescent,
}

/// Configuration for Cox model optimization
///
/// The maximised objective is
/// `loglik(beta) - l1 * sum(f_j * |beta_j|) - 0.5 * l2 * sum(f_j * beta_j^2)`
/// where `f_j` are the per-feature penalty factors (0 = unpenalized).
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    pub l1_penalty: f64,
    pub l2_penalty: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub optimizer_type: OptimizerType,
    pub penalty_factors: Option<Array1<f64>>,
    pub deadline: Option<Instant>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            l1_penalty: 0.0,
            l2_penalty: 0.0,
            max_iterations: 1000,
            tolerance: 1e-6,
            optimizer_type: OptimizerType::NewtonRaphson,
            penalty_factors: None,
            deadline: None,
        }
    }
}

pub struct CoxOptimizer {
    config: OptimizationConfig,
}

impl CoxOptimizer {
    pub fn new(config: OptimizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Optimize Cox model from beta = 0
    pub fn optimize(&self, data: &SurvivalData) -> Result<Array1<f64>> {
        self.optimize_from(data, Array1::zeros(data.n_features()))
    }

    /// Optimize from a warm start. Zero iterations hands the start back untouched.
    pub fn optimize_from(&self, data: &SurvivalData, initial: Array1<f64>) -> Result<Array1<f64>> {
        if initial.len() != data.n_features() {
            return Err(CoxError::invalid_dimensions(
                format!("initial values ({}) != features ({})", initial.len(), data.n_features())
            ));
        }
        if let Some(factors) = &self.config.penalty_factors {
            if factors.len() != data.n_features() {
                return Err(CoxError::invalid_dimensions("penalty factors don't match feature count"));
            }
        }

        let mut beta = initial;
        if self.config.max_iterations == 0 {
            return Ok(beta);
        }

        match self.config.optimizer_type {
            OptimizerType::CoordinateDescent => {
                self.coordinate_descent_optimize(data, &mut beta)?;
            }
            OptimizerType::NewtonRaphson => {
                if self.config.l1_penalty > 0.0 {
                    self.coordinate_descent_optimize(data, &mut beta)?;
                } else {
                    self.newton_raphson_optimize(data, &mut beta)?;
                }
            }
        }

        Ok(beta)
    }

    /// penalized log partial likelihood at beta
    pub fn penalized_log_likelihood(&self, data: &SurvivalData, beta: &Array1<f64>) -> Result<f64> {
        let eta = data.covariates().dot(beta);
        let loglik = log_partial_likelihood(data, eta.view())?;
        Ok(loglik - self.penalty(beta))
    }

    fn penalty(&self, beta: &Array1<f64>) -> f64 {
        beta.iter()
            .enumerate()
            .map(|(j, &b)| {
                let f = self.penalty_factor(j);
                f * (self.config.l1_penalty * b.abs() + 0.5 * self.config.l2_penalty * b * b)
            })
            .sum()
    }

    fn penalty_factor(&self, j: usize) -> f64 {
        self.config.penalty_factors.as_ref().map_or(1.0, |f| f[j])
    }

    fn check_deadline(&self) -> Result<()> {
        match self.config.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CoxError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Newton-Raphson w/ step halving (unpenalized & ridge)
    fn newton_raphson_optimize(&self, data: &SurvivalData, beta: &mut Array1<f64>) -> Result<()> {
        let n_features = beta.len();

        for iteration in 0..self.config.max_iterations {
            self.check_deadline()?;

            let (loglik, gradient, information) = likelihood_derivatives(data, beta)?;
            let penalized_loglik = loglik - self.penalty(beta);

            // Add Ridge penalty to gradient and information
            let mut penalized_gradient = gradient;
            let mut penalized_information = information;
            for j in 0..n_features {
                let l2 = self.config.l2_penalty * self.penalty_factor(j);
                penalized_gradient[j] -= l2 * beta[j];
                penalized_information[[j, j]] += l2;
            }

            let step = solve_linear_system(&penalized_information, &penalized_gradient)
                .map_err(|e| CoxError::optimization_failed(format!("newton step: {}", e)))?;

            let mut scale = 1.0;
            let (candidate, candidate_loglik) = loop {
                let candidate = &*beta + &(scale * &step);
                let value = self.penalized_log_likelihood(data, &candidate)?;
                if value >= penalized_loglik - 1e-12 || scale < 1e-4 {
                    break (candidate, value);
                }
                scale *= 0.5;
            };

            *beta = candidate;

            if !beta.iter().all(|b| b.is_finite()) {
                return Err(CoxError::numerical_error("non-finite coefficients in newton-raphson"));
            }

            if (candidate_loglik - penalized_loglik).abs() < self.config.tolerance {
                log::trace!("newton-raphson converged after {} iterations", iteration + 1);
                return Ok(());
            }
        }

        Err(CoxError::optimization_failed(
            "Newton-Raphson failed to converge"
        ))
    }

    /// Coordinate descent optimization (lasso, ridge, elastic net)
    fn coordinate_descent_optimize(&self, data: &SurvivalData, beta: &mut Array1<f64>) -> Result<()> {
        let covariates = data.covariates();
        let mut eta = covariates.dot(&*beta);

        for iteration in 0..self.config.max_iterations {
            self.check_deadline()?;
            let mut max_change = 0.0f64;

            for j in 0..beta.len() {
                let (gradient, hessian) = coordinate_derivatives(data, eta.view(), j);
                let factor = self.penalty_factor(j);
                let l1 = self.config.l1_penalty * factor;
                let l2 = self.config.l2_penalty * factor;

                let denominator = hessian + l2;
                if denominator <= 1e-12 {
                    continue; // flat direction (constant column), nothing to learn
                }

                let old = beta[j];
                let target = self.soft_threshold(hessian * old + gradient, l1) / denominator;
                if !target.is_finite() {
                    return Err(CoxError::numerical_error(
                        format!("coordinate {} update is not finite", j)
                    ));
                }

                let delta = (target - old).clamp(-MAX_COORDINATE_STEP, MAX_COORDINATE_STEP);
                if delta != 0.0 {
                    beta[j] = old + delta;
                    eta.scaled_add(delta, &covariates.column(j));
                    max_change = max_change.max(delta.abs());
                }
            }

            if max_change < self.config.tolerance {
                log::trace!("coordinate descent converged after {} sweeps", iteration + 1);
                return Ok(());
            }
        }

        Err(CoxError::optimization_failed(
            "Coordinate descent failed to converge"
        ))
    }

    /// Soft thresholding operator for L1 regularization
    fn soft_threshold(&self, x: f64, lambda: f64) -> f64 {
        if x > lambda {
            x - lambda
        } else if x < -lambda {
            x + lambda
        } else {
            0.0
        }
    }
}

/// first & (negated) second derivative of the log partial likelihood along coordinate j
fn coordinate_derivatives(data: &SurvivalData, eta: ArrayView1<f64>, j: usize) -> (f64, f64) {
    let covariates = data.covariates();
    let shift = eta.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut gradient = 0.0;
    let mut hessian = 0.0;

    for (risk_set, died) in data.risk_sets().iter().zip(data.event_sets()) {
        let mut s0 = 0.0;
        let mut s1 = 0.0;
        let mut s2 = 0.0;
        for &i in risk_set {
            let w = (eta[i] - shift).exp();
            let x = covariates[[i, j]];
            s0 += w;
            s1 += w * x;
            s2 += w * x * x;
        }
        if s0 <= 0.0 {
            continue;
        }

        let d = died.len() as f64;
        let mean = s1 / s0;
        gradient += died.iter().map(|&i| covariates[[i, j]]).sum::<f64>() - d * mean;
        hessian += d * (s2 / s0 - mean * mean);
    }

    (gradient, hessian)
}

/// log partial likelihood, gradient, and observed information (Breslow ties)
pub fn likelihood_derivatives(
    data: &SurvivalData,
    beta: &Array1<f64>,
) -> Result<(f64, Array1<f64>, Array2<f64>)> {
    let n_features = data.n_features();
    if beta.len() != n_features {
        return Err(CoxError::invalid_dimensions("beta length != feature count"));
    }

    let covariates = data.covariates();
    let eta = covariates.dot(beta);
    let shift = eta.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut loglik = 0.0;
    let mut gradient = Array1::zeros(n_features);
    let mut information = Array2::zeros((n_features, n_features));

    for (risk_set, died) in data.risk_sets().iter().zip(data.event_sets()) {
        let mut s0 = 0.0;
        let mut s1 = Array1::<f64>::zeros(n_features);
        let mut s2 = Array2::<f64>::zeros((n_features, n_features));

        for &i in risk_set {
            let w = (eta[i] - shift).exp();
            let row = covariates.row(i);
            s0 += w;
            s1.scaled_add(w, &row);
            for a in 0..n_features {
                for b in 0..n_features {
                    s2[[a, b]] += w * row[a] * row[b];
                }
            }
        }

        if s0 <= 0.0 || !s0.is_finite() {
            return Err(CoxError::numerical_error("Risk set sum is non-positive"));
        }

        let d = died.len() as f64;
        let mean = &s1 / s0;
        loglik -= d * (s0.ln() + shift);
        for &i in died {
            loglik += eta[i];
            gradient += &covariates.row(i);
        }
        gradient.scaled_add(-d, &mean);

        for a in 0..n_features {
            for b in 0..n_features {
                information[[a, b]] += d * (s2[[a, b]] / s0 - mean[a] * mean[b]);
            }
        }
    }

    Ok((loglik, gradient, information))
}

/// gradient of the log partial likelihood at beta
pub fn score_vector(data: &SurvivalData, beta: &Array1<f64>) -> Result<Array1<f64>> {
    let eta = data.covariates().dot(beta);
    Ok((0..data.n_features())
        .map(|j| coordinate_derivatives(data, eta.view(), j).0)
        .collect())
}

/// Solve linear system Ax = b (partial pivoting)
pub fn solve_linear_system(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(CoxError::invalid_dimensions("Matrix dimensions mismatch"));
    }

    let mut a_copy = a.clone();
    let mut b_copy = b.clone();

    // Forward elimination
    for i in 0..n {
        let max_row = pivot_row(&a_copy, i);
        if a_copy[[max_row, i]].abs() < 1e-12 {
            return Err(CoxError::numerical_error("Matrix is singular"));
        }

        if max_row != i {
            swap_rows(&mut a_copy, i, max_row);
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

/// Gauss-Jordan inverse, used for the variance of fitted coefficients
pub fn invert_matrix(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(CoxError::invalid_dimensions("can only invert square matrices"));
    }

    let mut left = a.clone();
    let mut right = Array2::<f64>::eye(n);

    for i in 0..n {
        let max_row = pivot_row(&left, i);
        if left[[max_row, i]].abs() < 1e-12 {
            return Err(CoxError::numerical_error("Matrix is singular"));
        }
        if max_row != i {
            swap_rows(&mut left, i, max_row);
            swap_rows(&mut right, i, max_row);
        }

        let pivot = left[[i, i]];
        left.row_mut(i).mapv_inplace(|v| v / pivot);
        right.row_mut(i).mapv_inplace(|v| v / pivot);

        for k in 0..n {
            if k == i {
                continue;
            }
            let factor = left[[k, i]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                left[[k, j]] -= factor * left[[i, j]];
                right[[k, j]] -= factor * right[[i, j]];
            }
        }
    }

    Ok(right)
}

fn pivot_row(a: &Array2<f64>, column: usize) -> usize {
    let mut max_row = column;
    for k in column + 1..a.nrows() {
        if a[[k, column]].abs() > a[[max_row, column]].abs() {
            max_row = k;
        }
    }
    max_row
}

fn swap_rows(a: &mut Array2<f64>, i: usize, k: usize) {
    for j in 0..a.ncols() {
        a.swap([i, j], [k, j]);
    }
}
