//! individual survival curves from a one-covariate cox model on the ensemble score
//!
//! The baseline cumulative hazard is Breslow's. Pointwise bounds use the Tsiatis
//! variance of the cumulative hazard (baseline + coefficient uncertainty) on the
//! log-survival scale.

use ndarray::{Array1, Array2};
use crate::{
    data::SurvivalData,
    error::{CoxError, Result},
    model::CoxModel,
    projection::ProjectedRisk,
};

/// spacing of the curve grid, in the cohort's time units
pub const CURVE_STEP: f64 = 3.0;
/// number of grid points
pub const CURVE_POINTS: usize = 15;

const Z_95: f64 = 1.959_963_984_540_054;

/// survival probability w/ 95% bounds at fixed times
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivalCurve {
    pub times: Vec<f64>,
    pub survival: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// 3, 6, ..., 45
pub fn curve_times() -> Vec<f64> {
    (1..=CURVE_POINTS).map(|k| k as f64 * CURVE_STEP).collect()
}

#[derive(Debug, Clone)]
pub struct ReferenceModel {
    coefficient: f64,
    variance: f64,
    mean_score: f64,
    event_times: Vec<f64>,
    hazard_increments: Vec<f64>,   // d_k / S0_k
    variance_increments: Vec<f64>, // d_k / S0_k^2
    weighted_means: Vec<f64>,      // S1_k / S0_k
}

impl ReferenceModel {
    /// fit on the training cohort; patients w/o a score are left out
    pub fn fit(data: &SurvivalData, scores: &[Option<f64>]) -> Result<Self> {
        if scores.len() != data.n_samples() {
            return Err(CoxError::invalid_dimensions(
                format!("{} scores for {} patients", scores.len(), data.n_samples())
            ));
        }

        let rows: Vec<usize> = (0..scores.len()).filter(|&i| scores[i].is_some()).collect();
        let values: Vec<f64> = rows.iter().filter_map(|&i| scores[i]).collect();
        if values.len() < 2 {
            return Err(CoxError::invalid_survival_data("need at least 2 scored patients"));
        }

        let cohort = data.subset(&rows)?;
        let scored = SurvivalData::new(
            cohort.patient_ids().to_vec(),
            vec!["risk_score".to_string()],
            Array2::from_shape_vec((values.len(), 1), values)
                .map_err(|e| CoxError::invalid_dimensions(e.to_string()))?,
            cohort.response(),
        )?;

        let mut model = CoxModel::new();
        model.fit(&scored)?;
        let coefficient = model.coefficients()?[0];
        let variance = model
            .standard_errors()?
            .map_or(0.0, |se| se[0] * se[0]);
        let mean_score = model.means()?[0];

        let z: Array1<f64> = scored.covariates().column(0).mapv(|s| s - mean_score);
        let mut hazard_increments = Vec::new();
        let mut variance_increments = Vec::new();
        let mut weighted_means = Vec::new();
        for (risk_set, died) in scored.risk_sets().iter().zip(scored.event_sets()) {
            let (s0, s1) = risk_set.iter().fold((0.0, 0.0), |(s0, s1), &i| {
                let w = (coefficient * z[i]).exp();
                (s0 + w, s1 + w * z[i])
            });
            let d = died.len() as f64;
            hazard_increments.push(d / s0);
            variance_increments.push(d / (s0 * s0));
            weighted_means.push(s1 / s0);
        }

        Ok(Self {
            coefficient,
            variance,
            mean_score,
            event_times: scored.event_times().to_vec(),
            hazard_increments,
            variance_increments,
            weighted_means,
        })
    }

    /// log hazard ratio per unit of risk score
    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    /// curve on the default 3..45 grid
    pub fn curve(&self, score: f64) -> SurvivalCurve {
        self.curve_at(score, &curve_times())
    }

    pub fn curve_at(&self, score: f64, times: &[f64]) -> SurvivalCurve {
        let z = score - self.mean_score;
        let ratio = (self.coefficient * z).exp();

        let mut curve = SurvivalCurve {
            times: times.to_vec(),
            survival: Vec::with_capacity(times.len()),
            lower: Vec::with_capacity(times.len()),
            upper: Vec::with_capacity(times.len()),
        };

        for &t in times {
            let mut baseline = 0.0;
            let mut baseline_variance = 0.0;
            let mut q = 0.0;
            for k in 0..self.event_times.len() {
                if self.event_times[k] > t {
                    break;
                }
                baseline += self.hazard_increments[k];
                baseline_variance += self.variance_increments[k];
                q += self.hazard_increments[k] * (z - self.weighted_means[k]);
            }

            let hazard = ratio * baseline;
            let se = ratio * (baseline_variance + q * q * self.variance).sqrt();
            curve.survival.push((-hazard).exp());
            curve.lower.push((-hazard - Z_95 * se).exp().clamp(0.0, 1.0));
            curve.upper.push((-hazard + Z_95 * se).exp().clamp(0.0, 1.0));
        }

        curve
    }

    /// curves for the named patients of a projected cohort
    pub fn curves_for(&self, risk: &ProjectedRisk, patients: &[&str]) -> Result<Vec<(String, SurvivalCurve)>> {
        patients
            .iter()
            .map(|&id| {
                let i = risk
                    .patient_ids
                    .iter()
                    .position(|p| p == id)
                    .ok_or_else(|| CoxError::invalid_parameter("patient", id))?;
                Ok((id.to_string(), self.curve(risk.scaled[i])))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// higher score, shorter survival
    fn scored_cohort(n: usize) -> (SurvivalData, Vec<Option<f64>>) {
        let mut rng = StdRng::seed_from_u64(17);
        let mut times = Vec::with_capacity(n);
        let mut events = Vec::with_capacity(n);
        let mut scores = Vec::with_capacity(n);
        for _ in 0..n {
            let score: f64 = rng.gen_range(0.0..10.0);
            let hazard = 0.02 * (0.3 * score).exp();
            let time = (-rng.r#gen::<f64>().ln() / hazard).max(0.1);
            let censor = rng.gen_range(20.0..80.0);
            times.push(time.min(censor));
            events.push(time < censor);
            scores.push(Some(score));
        }
        scores[0] = None;
        let data = SurvivalData::from_right_censored(times, events, Array2::zeros((n, 1))).unwrap();
        (data, scores)
    }

    #[test]
    fn test_curve_grid() {
        let times = curve_times();
        assert_eq!(times.len(), 15);
        assert_eq!(times[0], 3.0);
        assert_eq!(times[14], 45.0);
    }

    #[test]
    fn test_curves_are_monotone_and_bounded() {
        let (data, scores) = scored_cohort(150);
        let reference = ReferenceModel::fit(&data, &scores).unwrap();
        assert!(reference.coefficient() > 0.0);

        let curve = reference.curve(5.0);
        for k in 0..curve.times.len() {
            assert!(curve.lower[k] <= curve.survival[k] && curve.survival[k] <= curve.upper[k]);
            assert!((0.0..=1.0).contains(&curve.survival[k]));
            if k > 0 {
                assert!(curve.survival[k] <= curve.survival[k - 1]);
            }
        }
    }

    #[test]
    fn test_higher_score_lower_survival() {
        let (data, scores) = scored_cohort(150);
        let reference = ReferenceModel::fit(&data, &scores).unwrap();
        let low = reference.curve(1.0);
        let high = reference.curve(9.0);
        assert!(high.survival[14] < low.survival[14]);
    }

    #[test]
    fn test_curves_for_unknown_patient() {
        let (data, scores) = scored_cohort(60);
        let reference = ReferenceModel::fit(&data, &scores).unwrap();
        let risk = ProjectedRisk {
            patient_ids: vec!["n1".into()],
            raw: vec![0.1],
            scaled: vec![4.0],
            matched_features: vec![],
            synthesized_features: vec![],
        };
        let curves = reference.curves_for(&risk, &["n1"]).unwrap();
        assert_eq!(curves[0].0, "n1");
        assert!(reference.curves_for(&risk, &["n2"]).is_err());
    }
}
