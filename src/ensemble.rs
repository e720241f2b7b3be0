use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use crate::{
    error::{CoxError, Result},
    penalty::PenaltyType,
    resample::SamplingMode,
};

/// what one successful resampling run leaves behind
///
/// `coefficients`, `standard_errors` and `training_means` are aligned with the
/// ensemble's `feature_names`; `predictions` with its `patient_ids`. `None`
/// marks an unselected feature or a patient outside this run's test set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// run index, also the resampling seed
    pub run: u64,
    /// held-out (cv) or .632-corrected (boot) concordance
    pub concordance: f64,
    pub coefficients: Vec<Option<f64>>,
    pub standard_errors: Vec<Option<f64>>,
    pub predictions: Vec<Option<f64>>,
    pub training_means: Vec<f64>,
    pub lambda1: f64,
    pub lambda2: f64,
    pub train_size: usize,
    pub test_size: usize,
}

impl RunResult {
    /// (feature index, coefficient) for every feature this run selected
    pub fn selected(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.coefficients
            .iter()
            .enumerate()
            .filter_map(|(j, c)| c.map(|c| (j, c)))
    }

    pub fn n_selected(&self) -> usize {
        self.coefficients.iter().filter(|c| c.is_some()).count()
    }
}

/// all retained runs for one penalty type, in run order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub penalty: PenaltyType,
    pub sampling: SamplingMode,
    pub feature_names: Vec<String>,
    pub patient_ids: Vec<String>,
    /// how many runs were asked for - `runs` can be shorter
    pub requested_runs: usize,
    pub runs: Vec<RunResult>,
}

impl EnsembleResult {
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// `{study}_{sampling}_{penalty}`
    pub fn artifact_name(&self, study: &str) -> String {
        artifact_name(study, self.sampling, self.penalty)
    }

    /// per-patient mean of the runs' predictions, skipping runs that didn't test them
    pub fn average_predictions(&self) -> Vec<Option<f64>> {
        (0..self.patient_ids.len())
            .map(|i| {
                let (sum, count) = self
                    .runs
                    .iter()
                    .filter_map(|run| run.predictions.get(i).copied().flatten())
                    .fold((0.0, 0usize), |(s, c), p| (s + p, c + 1));
                (count > 0).then(|| sum / count as f64)
            })
            .collect()
    }

    /// names of features selected by at least one run
    pub fn selected_features(&self) -> Vec<&str> {
        self.feature_names
            .iter()
            .enumerate()
            .filter(|(j, _)| self.runs.iter().any(|run| run.coefficients[*j].is_some()))
            .map(|(_, name)| name.as_str())
            .collect()
    }

    pub fn concordances(&self) -> Vec<f64> {
        self.runs.iter().map(|run| run.concordance).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let result: Self = serde_json::from_str(json)?;
        result.validate()?;
        Ok(result)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let result: Self = serde_json::from_reader(reader)?;
        result.validate()?;
        Ok(result)
    }

    /// every run must line up with the feature & patient axes
    fn validate(&self) -> Result<()> {
        let p = self.feature_names.len();
        let n = self.patient_ids.len();
        for run in &self.runs {
            if run.coefficients.len() != p
                || run.standard_errors.len() != p
                || run.training_means.len() != p
                || run.predictions.len() != n
            {
                return Err(CoxError::serialization(
                    format!("run {} doesn't match {} features x {} patients", run.run, p, n)
                ));
            }
        }
        Ok(())
    }
}

/// artifact stem for a study / sampling / penalty combination
pub fn artifact_name(study: &str, sampling: SamplingMode, penalty: PenaltyType) -> String {
    format!("{}_{}_{}", study, sampling, penalty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_result() -> EnsembleResult {
        let make_run = |run, concordance, coefficients: Vec<Option<f64>>, predictions| RunResult {
            run,
            concordance,
            standard_errors: coefficients.iter().map(|c| c.map(|_| 0.2)).collect(),
            coefficients,
            predictions,
            training_means: vec![0.5, 0.25],
            lambda1: 0.1,
            lambda2: 0.0,
            train_size: 2,
            test_size: 1,
        };

        EnsembleResult {
            penalty: PenaltyType::Lasso,
            sampling: SamplingMode::Cv,
            feature_names: vec!["TP53".into(), "KRAS".into()],
            patient_ids: vec!["a".into(), "b".into(), "c".into()],
            requested_runs: 3,
            runs: vec![
                make_run(1, 0.7, vec![Some(0.8), None], vec![Some(1.0), None, Some(0.0)]),
                make_run(3, 0.6, vec![Some(0.4), None], vec![Some(3.0), None, None]),
            ],
        }
    }

    #[test]
    fn test_artifact_name() {
        let result = sample_result();
        assert_eq!(result.artifact_name("luad"), "luad_cv_LASSO");
        assert_eq!(artifact_name("brca", SamplingMode::Boot, PenaltyType::ElasticNet), "brca_boot_ENET");
    }

    #[test]
    fn test_average_predictions_skip_missing() {
        let averages = sample_result().average_predictions();
        assert_relative_eq!(averages[0].unwrap(), 2.0, epsilon = 1e-12);
        assert_eq!(averages[1], None);
        assert_relative_eq!(averages[2].unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_selected_features() {
        let result = sample_result();
        assert_eq!(result.selected_features(), vec!["TP53"]);
        assert_eq!(result.runs[0].n_selected(), 1);
        assert_eq!(result.runs[0].selected().collect::<Vec<_>>(), vec![(0, 0.8)]);
    }

    #[test]
    fn test_json_round_trip() {
        let result = sample_result();
        let json = result.to_json().unwrap();
        assert!(json.contains("null"));
        assert_eq!(EnsembleResult::from_json(&json).unwrap(), result);

        let mut buffer = Vec::new();
        result.write_to(&mut buffer).unwrap();
        assert_eq!(EnsembleResult::read_from(buffer.as_slice()).unwrap(), result);
    }

    #[test]
    fn test_misaligned_artifact_rejected() {
        let mut result = sample_result();
        result.runs[1].predictions.pop();
        let json = serde_json::to_string(&result).unwrap();
        assert!(matches!(EnsembleResult::from_json(&json), Err(CoxError::Serialization { .. })));
    }
}
