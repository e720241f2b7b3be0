//! penalized solver - picks lambda by k-fold cross-validated partial likelihood
//!
//! The cross-validated log likelihood for a penalty value is
//! `cvl = sum_k [ loglik(beta_-k) - loglik_-k(beta_-k) ]`, i.e. what each held-out
//! fold adds to the full-data partial likelihood when the coefficients were fit
//! without it. The lambda maximising `cvl` wins and is refit on all data.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use crate::{
    data::SurvivalData,
    error::{CoxError, Result},
    metrics::log_partial_likelihood,
    optimization::{score_vector, CoxOptimizer, OptimizationConfig, OptimizerType},
};

/// the ridge optimum is scaled by this before it becomes the fixed L2 of an elastic net
pub const ENET_L2_SCALE: f64 = 1.0 / 8.0;

/// which regularization strategy a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PenaltyType {
    /// L1
    Lasso,
    /// L2
    Ridge,
    /// L1 + L2, with L2 taken from a scaled ridge optimum
    #[serde(rename = "ENET")]
    ElasticNet,
}

impl PenaltyType {
    pub const ALL: [PenaltyType; 3] = [PenaltyType::Lasso, PenaltyType::Ridge, PenaltyType::ElasticNet];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Lasso => "LASSO",
            Self::Ridge => "RIDGE",
            Self::ElasticNet => "ENET",
        }
    }
}

impl fmt::Display for PenaltyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PenaltyType {
    type Err = CoxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LASSO" => Ok(Self::Lasso),
            "RIDGE" => Ok(Self::Ridge),
            "ENET" => Ok(Self::ElasticNet),
            _ => Err(CoxError::UnsupportedPenalty { name: s.to_string() }),
        }
    }
}

/// what a single run asks of the solver
#[derive(Debug, Clone)]
pub struct PenaltyRequest<'a> {
    pub penalty: PenaltyType,
    /// features passed through w/o penalization
    pub unpenalized: &'a [String],
    /// seeds the internal fold assignment
    pub seed: u64,
    pub deadline: Option<Instant>,
}

/// sparse solution handed back by a solver
#[derive(Debug, Clone, PartialEq)]
pub struct PenalizedFit {
    pub coefficients: Array1<f64>,
    pub lambda1: f64,
    pub lambda2: f64,
    /// cross-validated log likelihood at the chosen penalty
    pub cvl: f64,
}

impl PenalizedFit {
    /// indices of the nonzero coefficients
    pub fn selected(&self) -> Vec<usize> {
        self.coefficients
            .iter()
            .enumerate()
            .filter_map(|(j, &b)| (b != 0.0).then_some(j))
            .collect()
    }
}

/// anything that can produce a sparse penalized cox solution
pub trait PenalizedSolver: Send + Sync {
    fn fit(&self, data: &SurvivalData, request: &PenaltyRequest<'_>) -> Result<PenalizedFit>;
}

/// grid & convergence settings of the cross-validated solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub folds: usize,
    pub n_lambda: usize,
    /// smallest L1 on the path as a fraction of lambda_max
    pub lambda_min_ratio: f64,
    /// (min, max) of the L2 search grid
    pub l2_range: (f64, f64),
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl SolverConfig {
    /// grids & fold counts that can't produce a usable lambda path
    pub fn validate(&self) -> Result<()> {
        let (low, high) = self.l2_range;
        if self.folds < 2 {
            return Err(CoxError::invalid_parameter("folds", self.folds.to_string()));
        }
        if self.n_lambda == 0 {
            return Err(CoxError::invalid_parameter("n_lambda", "0"));
        }
        if !(self.lambda_min_ratio > 0.0 && self.lambda_min_ratio <= 1.0) {
            return Err(CoxError::invalid_parameter("lambda_min_ratio", self.lambda_min_ratio.to_string()));
        }
        if !(low > 0.0 && low <= high && high.is_finite()) {
            return Err(CoxError::invalid_parameter("l2_range", format!("({}, {})", low, high)));
        }
        if !(self.tolerance > 0.0) {
            return Err(CoxError::invalid_parameter("tolerance", self.tolerance.to_string()));
        }
        Ok(())
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            n_lambda: 20,
            lambda_min_ratio: 0.01,
            l2_range: (0.01, 1000.0),
            max_iterations: 1000,
            tolerance: 1e-6,
        }
    }
}

/// default solver: optimal L1 / L2 search by k-fold cross-validation
#[derive(Debug, Clone, Default)]
pub struct CrossValidatedSolver {
    config: SolverConfig,
}

impl CrossValidatedSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// best lambda1 for a fixed lambda2
    pub fn opt_l1(&self, data: &SurvivalData, lambda2: f64, request: &PenaltyRequest<'_>) -> Result<PenalizedFit> {
        self.config.validate()?;
        let factors = penalty_factors(data, request.unpenalized);
        let lambda_max = self.lambda_max(data, &factors, request.deadline)?;

        if lambda_max <= 0.0 || !lambda_max.is_finite() {
            return Err(CoxError::no_signal("score is flat at zero, no lambda path"));
        }

        let grid = log_grid(lambda_max, lambda_max * self.config.lambda_min_ratio, self.config.n_lambda);
        let path: Vec<(f64, f64)> = grid.iter().map(|&l1| (l1, lambda2)).collect();
        self.cross_validate(data, &path, &factors, request)
    }

    /// best lambda2 w/o L1
    pub fn opt_l2(&self, data: &SurvivalData, request: &PenaltyRequest<'_>) -> Result<PenalizedFit> {
        self.config.validate()?;
        let factors = penalty_factors(data, request.unpenalized);
        let (low, high) = self.config.l2_range;
        let grid = log_grid(high, low, self.config.n_lambda);
        let path: Vec<(f64, f64)> = grid.iter().map(|&l2| (0.0, l2)).collect();
        self.cross_validate(data, &path, &factors, request)
    }

    /// smallest lambda1 that keeps every penalized coefficient at zero, i.e.
    /// the largest penalized score at the fit of the unpenalized features alone
    fn lambda_max(&self, data: &SurvivalData, factors: &Array1<f64>, deadline: Option<Instant>) -> Result<f64> {
        let free: Vec<usize> = (0..factors.len()).filter(|&j| factors[j] == 0.0).collect();

        let mut beta = Array1::zeros(data.n_features());
        if !free.is_empty() {
            let unpenalized = CoxOptimizer::new(OptimizationConfig {
                max_iterations: self.config.max_iterations,
                tolerance: self.config.tolerance,
                deadline,
                ..Default::default()
            })
            .optimize(&data.select_features(&free)?)?;
            for (&j, &b) in free.iter().zip(unpenalized.iter()) {
                beta[j] = b;
            }
        }

        let score = score_vector(data, &beta)?;
        Ok(score
            .iter()
            .zip(factors.iter())
            .filter(|&(_, &f)| f > 0.0)
            .map(|(g, f)| g.abs() / f)
            .fold(0.0, f64::max))
    }

    fn optimizer(&self, lambda1: f64, lambda2: f64, factors: &Array1<f64>, deadline: Option<Instant>) -> CoxOptimizer {
        CoxOptimizer::new(OptimizationConfig {
            l1_penalty: lambda1,
            l2_penalty: lambda2,
            max_iterations: self.config.max_iterations,
            tolerance: self.config.tolerance,
            optimizer_type: OptimizerType::CoordinateDescent,
            penalty_factors: Some(factors.clone()),
            deadline,
        })
    }

    /// warm-started path fit; entries that fail to converge come back as None
    fn fit_path(
        &self,
        data: &SurvivalData,
        path: &[(f64, f64)],
        factors: &Array1<f64>,
        deadline: Option<Instant>,
    ) -> Result<Vec<Option<Array1<f64>>>> {
        let mut warm = Array1::zeros(data.n_features());
        let mut fits = Vec::with_capacity(path.len());

        for &(lambda1, lambda2) in path {
            match self.optimizer(lambda1, lambda2, factors, deadline).optimize_from(data, warm.clone()) {
                Ok(beta) => {
                    warm = beta.clone();
                    fits.push(Some(beta));
                }
                Err(CoxError::DeadlineExceeded) => return Err(CoxError::DeadlineExceeded),
                Err(e) => {
                    log::trace!("path fit failed at l1={:.4} l2={:.4}: {}", lambda1, lambda2, e);
                    fits.push(None);
                }
            }
        }

        Ok(fits)
    }

    fn cross_validate(
        &self,
        data: &SurvivalData,
        path: &[(f64, f64)],
        factors: &Array1<f64>,
        request: &PenaltyRequest<'_>,
    ) -> Result<PenalizedFit> {
        let folds = assign_folds(data.n_samples(), self.config.folds, request.seed);
        let mut cvl = vec![0.0; path.len()];

        for fold in 0..folds.iter().max().map_or(0, |&k| k + 1) {
            let train: Vec<usize> = (0..data.n_samples()).filter(|&i| folds[i] != fold).collect();
            let train_data = data.subset(&train)?;

            for (value, beta) in cvl.iter_mut().zip(self.fit_path(&train_data, path, factors, request.deadline)?) {
                *value += match beta {
                    Some(beta) => held_out_contribution(data, &train_data, &beta).unwrap_or(f64::NEG_INFINITY),
                    None => f64::NEG_INFINITY,
                };
            }
        }

        let (best, best_cvl) = cvl
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| CoxError::optimization_failed("no penalty value converged in any fold"))?;

        // refit on everything, walking the path down to the winner
        let fits = self.fit_path(data, &path[..=best], factors, request.deadline)?;
        let coefficients = fits
            .into_iter()
            .last()
            .flatten()
            .ok_or_else(|| CoxError::optimization_failed("refit at the selected penalty failed"))?;

        let (lambda1, lambda2) = path[best];
        log::debug!(
            "{} selected l1={:.5} l2={:.5} (cvl {:.4}, grid point {}/{})",
            request.penalty, lambda1, lambda2, best_cvl, best + 1, path.len()
        );

        Ok(PenalizedFit { coefficients, lambda1, lambda2, cvl: best_cvl })
    }
}

impl PenalizedSolver for CrossValidatedSolver {
    fn fit(&self, data: &SurvivalData, request: &PenaltyRequest<'_>) -> Result<PenalizedFit> {
        match request.penalty {
            PenaltyType::Lasso => self.opt_l1(data, 0.0, request),
            PenaltyType::Ridge => self.opt_l2(data, request),
            PenaltyType::ElasticNet => {
                let ridge = self.opt_l2(data, request)?;
                self.opt_l1(data, ridge.lambda2 * ENET_L2_SCALE, request)
            }
        }
    }
}

/// 0 for unpenalized features, 1 otherwise
fn penalty_factors(data: &SurvivalData, unpenalized: &[String]) -> Array1<f64> {
    data.feature_names()
        .iter()
        .map(|name| if unpenalized.contains(name) { 0.0 } else { 1.0 })
        .collect()
}

/// log-spaced values from `from` to `to` (inclusive)
fn log_grid(from: f64, to: f64, n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![from];
    }
    let (a, b) = (from.ln(), to.ln());
    (0..n)
        .map(|i| (a + (b - a) * i as f64 / (n - 1) as f64).exp())
        .collect()
}

/// deterministic fold labels: seeded shuffle, then round-robin
fn assign_folds(n: usize, folds: usize, seed: u64) -> Vec<usize> {
    let k = folds.clamp(1, n.max(1));
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut labels = vec![0; n];
    for (position, &i) in order.iter().enumerate() {
        labels[i] = position % k;
    }
    labels
}

fn held_out_contribution(full: &SurvivalData, train: &SurvivalData, beta: &Array1<f64>) -> Result<f64> {
    let full_loglik = log_partial_likelihood(full, full.covariates().dot(beta).view())?;
    let train_loglik = log_partial_likelihood(train, train.covariates().dot(beta).view())?;
    Ok(full_loglik - train_loglik)
}
