use std::time::Instant;

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use crate::{
    data::SurvivalData,
    error::{CoxError, Result},
    optimization::{likelihood_derivatives, invert_matrix, CoxOptimizer, OptimizationConfig},
};

/// unpenalized cox model over whatever features it's handed
///
/// Each run refits its selected features w/ zero iterations from the penalized
/// solution, which keeps that solution but attaches standard errors and the
/// training means used to centre every later prediction.
#[derive(Debug, Clone)]
pub struct CoxModel {
    initial_coefficients: Option<Array1<f64>>,
    max_iterations: usize,
    tolerance: f64,
    deadline: Option<Instant>,
    fit: Option<FittedCox>,
}

#[derive(Debug, Clone)]
struct FittedCox {
    coefficients: Array1<f64>,
    standard_errors: Option<Array1<f64>>, // None if the information is singular
    means: Array1<f64>,
}

impl Default for CoxModel {
    fn default() -> Self {
        Self {
            initial_coefficients: None,
            max_iterations: 100,
            tolerance: 1e-9,
            deadline: None,
            fit: None,
        }
    }
}

impl CoxModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// newton iterations; 0 evaluates the model at the starting values
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// starting values (default all zeros)
    pub fn with_initial_coefficients(mut self, init: Array1<f64>) -> Self {
        self.initial_coefficients = Some(init);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn fit(&mut self, data: &SurvivalData) -> Result<&mut Self> {
        let optimizer = CoxOptimizer::new(OptimizationConfig {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            deadline: self.deadline,
            ..Default::default()
        });

        let start = self
            .initial_coefficients
            .clone()
            .unwrap_or_else(|| Array1::zeros(data.n_features()));
        let coefficients = optimizer.optimize_from(data, start)?;

        self.fit = Some(FittedCox {
            standard_errors: standard_errors(data, &coefficients),
            means: data.column_means(),
            coefficients,
        });
        Ok(self)
    }

    fn fitted(&self) -> Result<&FittedCox> {
        self.fit.as_ref().ok_or(CoxError::ModelNotFitted)
    }

    pub fn coefficients(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.fitted()?.coefficients.view())
    }

    pub fn standard_errors(&self) -> Result<Option<ArrayView1<'_, f64>>> {
        Ok(self.fitted()?.standard_errors.as_ref().map(|se| se.view()))
    }

    /// per-feature means of the training data
    pub fn means(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.fitted()?.means.view())
    }

    /// centred linear predictor (x - means) . beta
    pub fn predict(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        let fit = self.fitted()?;
        if covariates.ncols() != fit.coefficients.len() {
            return Err(CoxError::invalid_dimensions(
                format!("model has {} features, got {}", fit.coefficients.len(), covariates.ncols())
            ));
        }

        let centred = &covariates - &fit.means.view().insert_axis(Axis(0));
        Ok(centred.dot(&fit.coefficients))
    }
}

/// sqrt(diag(I^-1)) at beta
fn standard_errors(data: &SurvivalData, beta: &Array1<f64>) -> Option<Array1<f64>> {
    let variance = likelihood_derivatives(data, beta)
        .and_then(|(_, _, information)| invert_matrix(&information));

    match variance {
        Ok(variance) => Some(variance.diag().mapv(|v| v.max(0.0).sqrt())),
        Err(e) => {
            log::debug!("no standard errors at refit: {}", e);
            None
        }
    }
}
