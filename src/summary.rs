use std::fmt;

use serde::{Deserialize, Serialize};
use crate::{
    ensemble::EnsembleResult,
    error::{CoxError, Result},
};

/// per-feature view across an ensemble's runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub name: String,
    /// fraction of runs that kept the feature
    pub selection_frequency: f64,
    /// over selecting runs only; None if never selected
    pub mean_coefficient: Option<f64>,
    pub median_coefficient: Option<f64>,
    pub mean_hazard_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSummary {
    pub runs: usize,
    pub requested_runs: usize,
    pub mean_concordance: f64,
    pub median_concordance: f64,
    pub sd_concordance: f64,
    pub min_concordance: f64,
    pub max_concordance: f64,
    /// ordered by selection frequency, most frequent first
    pub features: Vec<FeatureSummary>,
}

impl EnsembleSummary {
    pub fn from_result(result: &EnsembleResult) -> Result<Self> {
        if result.is_empty() {
            return Err(CoxError::invalid_parameter("ensemble", "has no runs"));
        }

        let concordances = result.concordances();
        let n_runs = result.len();

        let mut features: Vec<FeatureSummary> = result
            .feature_names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let coefficients: Vec<f64> = result.runs.iter().filter_map(|run| run.coefficients[j]).collect();
                let hazard_ratios: Vec<f64> = coefficients.iter().map(|c| c.exp()).collect();
                FeatureSummary {
                    name: name.clone(),
                    selection_frequency: coefficients.len() as f64 / n_runs as f64,
                    mean_coefficient: mean(&coefficients),
                    median_coefficient: median(&coefficients),
                    mean_hazard_ratio: mean(&hazard_ratios),
                }
            })
            .collect();
        features.sort_by(|a, b| b.selection_frequency.total_cmp(&a.selection_frequency));

        Ok(Self {
            runs: n_runs,
            requested_runs: result.requested_runs,
            mean_concordance: mean(&concordances).unwrap_or(f64::NAN),
            median_concordance: median(&concordances).unwrap_or(f64::NAN),
            sd_concordance: std_dev(&concordances),
            min_concordance: concordances.iter().copied().fold(f64::INFINITY, f64::min),
            max_concordance: concordances.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            features,
        })
    }

    /// features kept by at least `min_frequency` of the runs
    pub fn stable_features(&self, min_frequency: f64) -> impl Iterator<Item = &FeatureSummary> {
        self.features.iter().filter(move |f| f.selection_frequency >= min_frequency)
    }
}

impl fmt::Display for EnsembleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ensemble: {}/{} runs retained", self.runs, self.requested_runs)?;
        writeln!(
            f,
            "concordance: mean {:.3}, median {:.3}, sd {:.3}, range [{:.3}, {:.3}]",
            self.mean_concordance, self.median_concordance, self.sd_concordance,
            self.min_concordance, self.max_concordance
        )?;
        writeln!(f, "{:<16} {:>9} {:>10} {:>8}", "feature", "selected", "coef", "hr")?;
        for feature in self.features.iter().filter(|f| f.selection_frequency > 0.0) {
            writeln!(
                f,
                "{:<16} {:>8.1}% {:>10.4} {:>8.4}",
                feature.name,
                feature.selection_frequency * 100.0,
                feature.mean_coefficient.unwrap_or(f64::NAN),
                feature.mean_hazard_ratio.unwrap_or(f64::NAN),
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskGroup {
    High,
    Low,
}

/// split scores at a cutoff; exactly at the cutoff counts as low
pub fn stratify(scores: &[f64], cutoff: f64) -> Vec<RiskGroup> {
    scores
        .iter()
        .map(|&s| if s > cutoff { RiskGroup::High } else { RiskGroup::Low })
        .collect()
}

pub fn median_cutoff(scores: &[f64]) -> Result<f64> {
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(CoxError::numerical_error("non-finite risk score"));
    }
    median(scores).ok_or_else(|| CoxError::invalid_parameter("scores", "empty"))
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// sample standard deviation, 0 for a single value
fn std_dev(values: &[f64]) -> f64 {
    let Some(m) = mean(values) else { return 0.0 };
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}
