use ndarray::Array2;
use crate::{
    data::FeatureMatrix,
    ensemble::EnsembleResult,
    error::{CoxError, Result},
};

/// projected scores live on [0, RISK_SCALE_MAX] relative to the training cohort
pub const RISK_SCALE_MAX: f64 = 10.0;

/// ensemble risk for a new cohort
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRisk {
    pub patient_ids: Vec<String>,
    /// mean centred linear predictor across runs
    pub raw: Vec<f64>,
    /// `raw` mapped onto the training cohort's [0, 10] scale
    pub scaled: Vec<f64>,
    /// trained features found in the new data
    pub matched_features: Vec<String>,
    /// trained features absent from the new data, filled with zeros
    pub synthesized_features: Vec<String>,
}

/// scores new patients w/ every run of a trained ensemble
#[derive(Debug, Clone)]
pub struct RiskProjector<'a> {
    ensemble: &'a EnsembleResult,
    reference_min: f64,
    reference_max: f64,
}

impl<'a> RiskProjector<'a> {
    /// the reference range is the spread of the cohort's average held-out risk
    pub fn new(ensemble: &'a EnsembleResult) -> Result<Self> {
        if ensemble.is_empty() {
            return Err(CoxError::invalid_parameter("ensemble", "has no runs"));
        }

        let (reference_min, reference_max) = ensemble
            .average_predictions()
            .into_iter()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| (lo.min(r), hi.max(r)));

        if !(reference_max > reference_min) {
            return Err(CoxError::numerical_error(
                format!("degenerate reference risk range [{}, {}]", reference_min, reference_max)
            ));
        }

        Ok(Self { ensemble, reference_min, reference_max })
    }

    /// (min, max) of the training cohort's average risk
    pub fn reference_range(&self) -> (f64, f64) {
        (self.reference_min, self.reference_max)
    }

    /// affine map of a raw score onto the reference scale (not clamped)
    pub fn rescale(&self, raw: f64) -> f64 {
        (raw - self.reference_min) / (self.reference_max - self.reference_min) * RISK_SCALE_MAX
    }

    /// rescaled average risk of the training cohort itself
    pub fn cohort_scores(&self) -> Vec<Option<f64>> {
        self.ensemble
            .average_predictions()
            .into_iter()
            .map(|r| r.map(|r| self.rescale(r)))
            .collect()
    }

    pub fn project(&self, new_data: &FeatureMatrix) -> Result<ProjectedRisk> {
        let trained = &self.ensemble.feature_names;
        let columns: Vec<Option<usize>> = trained
            .iter()
            .map(|name| new_data.feature_names.iter().position(|f| f == name))
            .collect();

        if columns.iter().all(Option::is_none) {
            return Err(CoxError::NoOverlappingFeatures);
        }

        let (matched_features, synthesized_features): (Vec<String>, Vec<String>) = {
            let (hit, miss): (Vec<_>, Vec<_>) = trained.iter().zip(&columns).partition(|(_, c)| c.is_some());
            (
                hit.into_iter().map(|(name, _)| name.clone()).collect(),
                miss.into_iter().map(|(name, _)| name.clone()).collect(),
            )
        };
        log::debug!(
            "projecting {} patients: {} features matched, {} synthesized as zero",
            new_data.n_samples(), matched_features.len(), synthesized_features.len()
        );

        // new data laid out on the trained feature axis; absent mutation = 0
        let n = new_data.n_samples();
        let mut aligned = Array2::<f64>::zeros((n, trained.len()));
        for (j, column) in columns.iter().enumerate() {
            if let Some(c) = *column {
                aligned.column_mut(j).assign(&new_data.values.column(c));
            }
        }

        let n_runs = self.ensemble.len() as f64;
        let mut raw = vec![0.0; n];
        for run in &self.ensemble.runs {
            for (j, coefficient) in run.selected() {
                let mean = run.training_means[j];
                for (score, &x) in raw.iter_mut().zip(aligned.column(j)) {
                    *score += (x - mean) * coefficient / n_runs;
                }
            }
        }

        let scaled = raw.iter().map(|&r| self.rescale(r)).collect();

        Ok(ProjectedRisk {
            patient_ids: new_data.patient_ids.clone(),
            raw,
            scaled,
            matched_features,
            synthesized_features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use crate::{ensemble::RunResult, penalty::PenaltyType, resample::SamplingMode};

    fn make_run(run: u64, coefficients: Vec<Option<f64>>, predictions: Vec<Option<f64>>) -> RunResult {
        RunResult {
            run,
            concordance: 0.65,
            standard_errors: vec![None; coefficients.len()],
            coefficients,
            predictions,
            training_means: vec![0.5, 0.2, 0.1],
            lambda1: 0.1,
            lambda2: 0.0,
            train_size: 4,
            test_size: 2,
        }
    }

    fn sample_ensemble() -> EnsembleResult {
        EnsembleResult {
            penalty: PenaltyType::Lasso,
            sampling: SamplingMode::Cv,
            feature_names: vec!["TP53".into(), "KRAS".into(), "EGFR".into()],
            patient_ids: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            requested_runs: 2,
            runs: vec![
                make_run(1, vec![Some(1.0), None, None], vec![Some(-1.0), Some(1.0), None, None]),
                make_run(2, vec![Some(0.6), Some(-0.5), None], vec![None, Some(3.0), Some(0.0), None]),
            ],
        }
    }

    fn new_cohort(names: &[&str], values: Vec<f64>) -> FeatureMatrix {
        let n = values.len() / names.len();
        FeatureMatrix::new(
            (0..n).map(|i| format!("new{}", i)).collect(),
            names.iter().map(|s| s.to_string()).collect(),
            Array2::from_shape_vec((n, names.len()), values).unwrap(),
        ).unwrap()
    }

    #[test]
    fn test_reference_range_from_average_predictions() {
        let ensemble = sample_ensemble();
        let projector = RiskProjector::new(&ensemble).unwrap();
        // averages: a = -1, b = 2, c = 0, d untested
        assert_eq!(projector.reference_range(), (-1.0, 2.0));
        assert_relative_eq!(projector.rescale(-1.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(projector.rescale(2.0), 10.0, epsilon = 1e-12);

        let cohort = projector.cohort_scores();
        assert_eq!(cohort[3], None);
        assert_relative_eq!(cohort[2].unwrap(), 10.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_centres_with_run_means() {
        let ensemble = sample_ensemble();
        let projector = RiskProjector::new(&ensemble).unwrap();
        let cohort = new_cohort(&["TP53", "KRAS"], vec![1.0, 0.0, 0.0, 1.0]);
        let risk = projector.project(&cohort).unwrap();

        // run1: (x1 - .5) * 1.0; run2: (x1 - .5) * .6 + (x2 - .2) * -.5
        let first = (0.5 * 1.0 + (0.5 * 0.6 + (-0.2) * -0.5)) / 2.0;
        let second = (-0.5 * 1.0 + (-0.5 * 0.6 + 0.8 * -0.5)) / 2.0;
        assert_relative_eq!(risk.raw[0], first, epsilon = 1e-12);
        assert_relative_eq!(risk.raw[1], second, epsilon = 1e-12);
        assert_relative_eq!(risk.scaled[0], (first + 1.0) / 3.0 * 10.0, epsilon = 1e-12);
        assert_eq!(risk.synthesized_features, vec!["EGFR".to_string()]);
    }

    #[test]
    fn test_missing_features_are_zero_filled() {
        let ensemble = sample_ensemble();
        let projector = RiskProjector::new(&ensemble).unwrap();

        let only_tp53 = new_cohort(&["TP53", "BRAF"], vec![1.0, 1.0]);
        let explicit = new_cohort(&["TP53", "KRAS", "EGFR"], vec![1.0, 0.0, 0.0]);
        let a = projector.project(&only_tp53).unwrap();
        let b = projector.project(&explicit).unwrap();
        assert_relative_eq!(a.raw[0], b.raw[0], epsilon = 1e-12);
        assert_eq!(a.matched_features, vec!["TP53".to_string()]);
    }

    #[test]
    fn test_no_overlap_is_an_error() {
        let ensemble = sample_ensemble();
        let projector = RiskProjector::new(&ensemble).unwrap();
        let unrelated = new_cohort(&["BRAF", "PIK3CA"], vec![1.0, 0.0]);
        assert_eq!(projector.project(&unrelated).unwrap_err(), CoxError::NoOverlappingFeatures);
    }

    #[test]
    fn test_empty_ensemble_rejected() {
        let mut ensemble = sample_ensemble();
        ensemble.runs.clear();
        assert!(RiskProjector::new(&ensemble).is_err());
    }

    #[test]
    fn test_unselected_overlap_has_no_effect() {
        let ensemble = sample_ensemble();
        let projector = RiskProjector::new(&ensemble).unwrap();
        // EGFR was never selected, so its value can't move the score
        let low = projector.project(&new_cohort(&["EGFR"], vec![0.0])).unwrap();
        let high = projector.project(&new_cohort(&["EGFR"], vec![1.0])).unwrap();
        assert_eq!(low.raw, high.raw);
    }
}
