//! # cox ensemble
//!
//! repeated penalized cox regression - fit lasso / ridge / elastic net over many
//! resamples of a cohort, keep what every run learned, score new patients w/ all of it
//!
//! ## what you get
//!
//! - cv (2/3 - 1/3) or bootstrap (out-of-bag) resampling, seeded per run
//! - penalties tuned by cross-validated partial likelihood
//! - right-censored and left-truncated (start, stop] survival
//! - runs in parallel, in run order, failed runs dropped
//! - risk projection onto a 0-10 scale + survival curves w/ confidence bounds
//!
//! ## quick start
//!
//! ```rust,no_run
//! use cox_ensemble::{
//!     EnsembleConfig, EnsembleRunner, FeatureMatrix, PenaltyType, RiskProjector,
//!     SamplingMode, SurvivalData, SurvivalResponse,
//! };
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // binary mutation calls, one row per patient
//! let covariates = Array2::from_shape_vec((6, 2), vec![
//!     1.0, 0.0,
//!     0.0, 1.0,
//!     1.0, 1.0,
//!     0.0, 0.0,
//!     1.0, 0.0,
//!     0.0, 1.0,
//! ])?;
//! let response = SurvivalResponse::from_columns(vec![
//!     vec![5.0, 12.0, 3.0, 30.0, 8.0, 20.0],   // time
//!     vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0],      // status
//! ])?;
//! let data = SurvivalData::new(
//!     (1..=6).map(|i| format!("p{}", i)).collect(),
//!     vec!["TP53".into(), "KRAS".into()],
//!     covariates,
//!     response,
//! )?;
//!
//! let runner = EnsembleRunner::new(EnsembleConfig::new().with_runs(50).with_sampling(SamplingMode::Cv));
//! let ensemble = runner.run(&data, PenaltyType::Lasso)?;
//!
//! // score a new cohort on the training cohort's scale
//! let projector = RiskProjector::new(&ensemble)?;
//! let risk = projector.project(&FeatureMatrix::from(&data))?;
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod model;
pub mod optimization;
pub mod metrics;
pub mod error;
pub mod penalty;
pub mod resample;
pub mod ensemble;
pub mod runner;
pub mod projection;
pub mod curves;
pub mod summary;

pub use data::{FeatureMatrix, SurvivalData, SurvivalResponse};
pub use model::CoxModel;
pub use error::{CoxError, Result};
pub use penalty::{CrossValidatedSolver, PenalizedFit, PenalizedSolver, PenaltyType, SolverConfig};
pub use resample::{Resampler, SamplingMode, Split};
pub use ensemble::{EnsembleResult, RunResult};
pub use runner::{EnsembleConfig, EnsembleRunner};
pub use projection::{ProjectedRisk, RiskProjector};
pub use curves::{ReferenceModel, SurvivalCurve};
pub use summary::{EnsembleSummary, FeatureSummary, RiskGroup};
