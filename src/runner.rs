use std::time::{Duration, Instant};

use ndarray::Array1;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use crate::{
    data::SurvivalData,
    ensemble::{EnsembleResult, RunResult},
    error::{CoxError, Result},
    metrics::survival_concordance,
    model::CoxModel,
    penalty::{CrossValidatedSolver, PenaltyRequest, PenaltyType, PenalizedSolver, SolverConfig},
    resample::{Resampler, SamplingMode},
};

/// .632 bootstrap weight on the out-of-bag concordance
pub const BOOT_TEST_WEIGHT: f64 = 0.632;
/// .632 bootstrap weight on the in-sample concordance
pub const BOOT_TRAIN_WEIGHT: f64 = 0.368;
/// fewer runs than this still work, but the ensemble is thin
pub const RECOMMENDED_MIN_RUNS: usize = 50;

/// batch settings shared by every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub runs: usize,
    pub sampling: SamplingMode,
    /// features never penalized (e.g. clinical covariates)
    pub unpenalized: Vec<String>,
    /// worker pool size, None = rayon's default
    pub threads: Option<usize>,
    /// per-run wall clock budget
    pub run_timeout: Option<Duration>,
    pub solver: SolverConfig,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            runs: 100,
            sampling: SamplingMode::Cv,
            unpenalized: Vec::new(),
            threads: None,
            run_timeout: None,
            solver: SolverConfig::default(),
        }
    }
}

impl EnsembleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runs(mut self, runs: usize) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingMode) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_unpenalized(mut self, features: Vec<String>) -> Self {
        self.unpenalized = features;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn with_solver_config(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }
}

/// drives resample -> penalized fit -> refit -> score for every run
pub struct EnsembleRunner<S = CrossValidatedSolver> {
    config: EnsembleConfig,
    solver: S,
}

impl EnsembleRunner<CrossValidatedSolver> {
    pub fn new(config: EnsembleConfig) -> Self {
        let solver = CrossValidatedSolver::new(config.solver.clone());
        Self { config, solver }
    }
}

impl<S: PenalizedSolver> EnsembleRunner<S> {
    /// swap in another penalized solver
    pub fn with_solver<T: PenalizedSolver>(self, solver: T) -> EnsembleRunner<T> {
        EnsembleRunner { config: self.config, solver }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// config problems that must stop a batch before any run starts
    fn validate(&self, data: &SurvivalData) -> Result<()> {
        if self.config.runs == 0 {
            return Err(CoxError::InvalidRunCount { runs: 0 });
        }
        self.config.solver.validate()?;

        if let Some(unknown) = self
            .config
            .unpenalized
            .iter()
            .find(|name| data.feature_index(name).is_none())
        {
            return Err(CoxError::invalid_parameter("unpenalized", unknown.clone()));
        }

        if self.config.runs < RECOMMENDED_MIN_RUNS {
            log::warn!(
                "{} runs requested, at least {} are recommended for stable estimates",
                self.config.runs, RECOMMENDED_MIN_RUNS
            );
        }

        Ok(())
    }

    /// all configured runs for one penalty type, failed runs dropped, run order kept
    pub fn run(&self, data: &SurvivalData, penalty: PenaltyType) -> Result<EnsembleResult> {
        self.validate(data)?;
        log::info!(
            "{}: {} {} runs on {} patients x {} features",
            penalty, self.config.runs, self.config.sampling, data.n_samples(), data.n_features()
        );

        let outcomes = match self.config.threads {
            Some(threads) => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| CoxError::invalid_parameter("threads", e.to_string()))?;
                pool.install(|| self.collect_runs(data, penalty))
            }
            None => self.collect_runs(data, penalty),
        };

        let runs: Vec<RunResult> = outcomes.into_iter().flatten().collect();
        log::info!("{}: kept {}/{} runs", penalty, runs.len(), self.config.runs);

        Ok(EnsembleResult {
            penalty,
            sampling: self.config.sampling,
            feature_names: data.feature_names().to_vec(),
            patient_ids: data.patient_ids().to_vec(),
            requested_runs: self.config.runs,
            runs,
        })
    }

    /// one ensemble per penalty type, in the order given
    pub fn run_all(&self, data: &SurvivalData, penalties: &[PenaltyType]) -> Result<Vec<EnsembleResult>> {
        penalties.iter().map(|&penalty| self.run(data, penalty)).collect()
    }

    fn collect_runs(&self, data: &SurvivalData, penalty: PenaltyType) -> Vec<Option<RunResult>> {
        (1..=self.config.runs as u64)
            .into_par_iter()
            .map(|run| match self.run_once(data, penalty, run) {
                Ok(result) => Some(result),
                Err(e) => {
                    log::debug!("{} run {} dropped: {}", penalty, run, e);
                    None
                }
            })
            .collect()
    }

    /// a single run; any error here only sinks this run
    pub fn run_once(&self, data: &SurvivalData, penalty: PenaltyType, run: u64) -> Result<RunResult> {
        let deadline = self.config.run_timeout.map(|timeout| Instant::now() + timeout);
        let sampling = self.config.sampling;

        let split = Resampler::new(sampling).split(data.n_samples(), run);
        let train = data.subset(&split.train)?;

        let request = PenaltyRequest {
            penalty,
            unpenalized: &self.config.unpenalized,
            seed: run,
            deadline,
        };
        let fit = self.solver.fit(&train, &request)?;

        let selected = fit.selected();
        if selected.is_empty() {
            return Err(CoxError::no_signal("penalized fit kept no features"));
        }

        // unpenalized refit pinned at the penalized solution
        let train_selected = train.select_features(&selected)?;
        let initial: Array1<f64> = selected.iter().map(|&j| fit.coefficients[j]).collect();
        let mut model = CoxModel::new()
            .with_initial_coefficients(initial)
            .with_max_iterations(0)
            .with_deadline(deadline);
        model.fit(&train_selected)?;

        let train_concordance = survival_concordance(
            &train_selected,
            model.predict(train_selected.covariates())?.view(),
        );

        let mut predictions = vec![None; data.n_samples()];
        let test_concordance = if split.test.is_empty() {
            None
        } else {
            let test_selected = data.select_features(&selected)?.subset(&split.test)?;
            let test_lp = model.predict(test_selected.covariates())?;
            for (&i, &lp) in split.test.iter().zip(test_lp.iter()) {
                predictions[i] = Some(lp);
            }
            Some(survival_concordance(&test_selected, test_lp.view()))
        };

        let concordance = match sampling {
            SamplingMode::Cv => test_concordance
                .ok_or_else(|| CoxError::invalid_dimensions("cv split left no test patients"))??,
            SamplingMode::Boot => {
                let oob = test_concordance.and_then(|c| {
                    c.map_err(|e| log::debug!("run {} has no out-of-bag concordance: {}", run, e)).ok()
                });
                bootstrap_concordance(train_concordance?, oob)
            }
        };

        let coefficients_selected = model.coefficients()?;
        let standard_errors = model.standard_errors()?;
        let mut coefficients = vec![None; data.n_features()];
        let mut errors = vec![None; data.n_features()];
        for (k, &j) in selected.iter().enumerate() {
            coefficients[j] = Some(coefficients_selected[k]);
            errors[j] = standard_errors.as_ref().map(|se| se[k]);
        }

        Ok(RunResult {
            run,
            concordance,
            coefficients,
            standard_errors: errors,
            predictions,
            training_means: train.column_means().to_vec(),
            lambda1: fit.lambda1,
            lambda2: fit.lambda2,
            train_size: split.train.len(),
            test_size: split.test.len(),
        })
    }
}

/// .632 blend; w/o an out-of-bag estimate the in-sample value stands alone
pub fn bootstrap_concordance(train: f64, test: Option<f64>) -> f64 {
    match test {
        Some(test) => BOOT_TEST_WEIGHT * test + BOOT_TRAIN_WEIGHT * train,
        None => train,
    }
}
