use std::collections::HashSet;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use crate::error::{CoxError, Result};

/// survival outcome - plain right-censored or left-truncated (counting process)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SurvivalResponse {
    /// (time, status)
    Right { time: Vec<f64>, event: Vec<bool> },
    /// (time1, time2, status) - subject enters the risk set after time1
    Counting { start: Vec<f64>, stop: Vec<f64>, event: Vec<bool> },
}

impl SurvivalResponse {
    /// build from raw response columns, status coded 0/1 in the last column
    pub fn from_columns(columns: Vec<Vec<f64>>) -> Result<Self> {
        let arity = columns.len();
        if arity != 2 && arity != 3 {
            return Err(CoxError::MalformedResponse { columns: arity });
        }

        let n = columns[0].len();
        if columns.iter().any(|c| c.len() != n) {
            return Err(CoxError::invalid_dimensions("response columns differ in length"));
        }
        if columns.iter().flatten().any(|v| v.is_nan()) {
            return Err(CoxError::missing_values("survival response contains NaN"));
        }

        let mut columns = columns;
        let status = columns.pop().unwrap_or_default();
        let event = status
            .iter()
            .map(|&s| match s {
                s if s == 0.0 => Ok(false),
                s if s == 1.0 => Ok(true),
                other => Err(CoxError::invalid_survival_data(
                    format!("status must be 0/1, got {}", other)
                )),
            })
            .collect::<Result<Vec<bool>>>()?;

        let mut columns = columns.into_iter();
        match (columns.next(), columns.next()) {
            (Some(time), None) => Ok(Self::Right { time, event }),
            (Some(start), Some(stop)) => Ok(Self::Counting { start, stop, event }),
            _ => Err(CoxError::MalformedResponse { columns: arity }),
        }
    }

    /// number of subjects
    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn events(&self) -> &[bool] {
        match self {
            Self::Right { event, .. } | Self::Counting { event, .. } => event,
        }
    }

    /// 2 for (time, status), 3 for (time1, time2, status)
    pub fn arity(&self) -> usize {
        match self {
            Self::Right { .. } => 2,
            Self::Counting { .. } => 3,
        }
    }
}

/// survival data - patients x named features + their outcome
#[derive(Debug, Clone)]
pub struct SurvivalData {
    patient_ids: Vec<String>,
    feature_names: Vec<String>,
    entry: Array1<f64>,              // risk-set entry (0 for right-censored)
    times: Array1<f64>,              // time to event/censoring
    events: Array1<bool>,            // true = event, false = censored
    counting: bool,                  // built from a 3-column response?
    covariates: Array2<f64>,         // patient features (n_samples x n_features)
    event_times: Vec<f64>,           // unique event times, ascending
    risk_set_indices: Vec<Vec<usize>>, // who's at risk at each event time
    event_indices: Vec<Vec<usize>>,  // who died at each event time
}

impl SurvivalData {
    /// full constructor: ids, feature names, covariates and response
    pub fn new(
        patient_ids: Vec<String>,
        feature_names: Vec<String>,
        covariates: Array2<f64>,
        response: SurvivalResponse,
    ) -> Result<Self> {
        if has_duplicates(&patient_ids) {
            return Err(CoxError::invalid_survival_data("patient ids must be unique"));
        }
        if has_duplicates(&feature_names) {
            return Err(CoxError::invalid_survival_data("feature names must be unique"));
        }
        if patient_ids.len() != covariates.nrows() {
            return Err(CoxError::invalid_dimensions(
                format!("patient ids ({}) != covariate rows ({})", patient_ids.len(), covariates.nrows())
            ));
        }

        let counting = response.arity() == 3;
        let (entry, times, events) = match response {
            SurvivalResponse::Right { time, event } => (vec![0.0; time.len()], time, event),
            SurvivalResponse::Counting { start, stop, event } => (start, stop, event),
        };

        Self::assemble(patient_ids, feature_names, entry, times, events, counting, covariates)
    }

    /// convenience for right-censored data - ids p1.., features x1..
    pub fn from_right_censored(
        times: Vec<f64>,        // survival/censoring times
        events: Vec<bool>,      // true = event occurred, false = censored
        covariates: Array2<f64>, // patient features matrix
    ) -> Result<Self> {
        let patient_ids = (1..=times.len()).map(|i| format!("p{}", i)).collect();
        let feature_names = (1..=covariates.ncols()).map(|j| format!("x{}", j)).collect();
        Self::new(patient_ids, feature_names, covariates, SurvivalResponse::Right { time: times, event: events })
    }

    fn assemble(
        patient_ids: Vec<String>,
        feature_names: Vec<String>,
        entry: Vec<f64>,
        times: Vec<f64>,
        events: Vec<bool>,
        counting: bool,
        covariates: Array2<f64>,
    ) -> Result<Self> {
        let n_samples = times.len();

        if events.len() != n_samples || entry.len() != n_samples {
            return Err(CoxError::invalid_dimensions(
                format!("times len ({}) != events len ({})", n_samples, events.len())
            ));
        }

        if covariates.nrows() != n_samples {
            return Err(CoxError::invalid_dimensions(
                format!("covariates rows ({}) != n_samples ({})", covariates.nrows(), n_samples)
            ));
        }

        if feature_names.len() != covariates.ncols() {
            return Err(CoxError::invalid_dimensions(
                format!("feature names ({}) != covariate cols ({})", feature_names.len(), covariates.ncols())
            ));
        }

        if covariates.iter().any(|v| v.is_nan()) || times.iter().chain(entry.iter()).any(|t| t.is_nan()) {
            return Err(CoxError::missing_values("dataset contains NaN entries"));
        }

        if covariates.iter().any(|v| v.is_infinite()) {
            return Err(CoxError::invalid_survival_data("covariates must be finite"));
        }

        if times.iter().any(|&t| t <= 0.0 || !t.is_finite()) {
            return Err(CoxError::invalid_survival_data(
                "survival times must be positive & finite"
            ));
        }

        if entry.iter().zip(times.iter()).any(|(&s, &t)| s < 0.0 || s >= t) {
            return Err(CoxError::invalid_survival_data(
                "entry times must satisfy 0 <= time1 < time2"
            ));
        }

        let mut data = Self {
            patient_ids,
            feature_names,
            entry: Array1::from(entry),
            times: Array1::from(times),
            events: Array1::from(events),
            counting,
            covariates,
            event_times: Vec::new(),
            risk_set_indices: Vec::new(),
            event_indices: Vec::new(),
        };

        data.compute_risk_sets();
        Ok(data)
    }

    /// precompute risk sets for each event time (who's still at risk)
    fn compute_risk_sets(&mut self) {
        let mut event_times: Vec<f64> = self.times
            .iter()
            .zip(self.events.iter())
            .filter_map(|(time, event)| if *event { Some(*time) } else { None })
            .collect();

        event_times.sort_by(f64::total_cmp);
        event_times.dedup();  // remove duplicate event times

        self.risk_set_indices.clear();
        self.event_indices.clear();

        for &event_time in &event_times {
            // entered before this time & hasn't died/been censored yet
            let risk_set: Vec<usize> = (0..self.n_samples())
                .filter(|&i| self.entry[i] < event_time && self.times[i] >= event_time)
                .collect();
            let died: Vec<usize> = (0..self.n_samples())
                .filter(|&i| self.events[i] && self.times[i] == event_time)
                .collect();
            self.risk_set_indices.push(risk_set);
            self.event_indices.push(died);
        }

        self.event_times = event_times;
    }

    /// how many patients
    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    /// how many features per patient
    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    pub fn patient_ids(&self) -> &[String] {
        &self.patient_ids
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// column index of a named feature
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|f| f == name)
    }

    /// survival/censoring (exit) times
    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    /// risk-set entry times, all zero unless left-truncated
    pub fn entry_times(&self) -> ArrayView1<'_, f64> {
        self.entry.view()
    }

    pub fn is_counting(&self) -> bool {
        self.counting
    }

    /// event indicators (true = event, false = censored)
    pub fn events(&self) -> &[bool] {
        self.events.as_slice().unwrap_or(&[])
    }

    /// how many events were observed
    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }

    /// patient feature matrix
    pub fn covariates(&self) -> ArrayView2<'_, f64> {
        self.covariates.view()
    }

    /// precomputed risk sets, one per unique event time
    pub fn risk_sets(&self) -> &[Vec<usize>] {
        &self.risk_set_indices
    }

    /// patients with an event at each unique event time
    pub fn event_sets(&self) -> &[Vec<usize>] {
        &self.event_indices
    }

    /// unique event times in order
    pub fn event_times(&self) -> &[f64] {
        &self.event_times
    }

    /// the response this dataset was built from
    pub fn response(&self) -> SurvivalResponse {
        let stop = self.times.to_vec();
        let event = self.events.to_vec();
        if self.counting {
            SurvivalResponse::Counting { start: self.entry.to_vec(), stop, event }
        } else {
            SurvivalResponse::Right { time: stop, event }
        }
    }

    /// grab a subset of patients by indices - repeats allowed (bootstrap draws)
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.n_samples()) {
            return Err(CoxError::invalid_dimensions(
                "subset index out of bounds"
            ));
        }

        let patient_ids = indices.iter().map(|&i| self.patient_ids[i].clone()).collect();
        let entry: Vec<f64> = indices.iter().map(|&i| self.entry[i]).collect();
        let times: Vec<f64> = indices.iter().map(|&i| self.times[i]).collect();
        let events: Vec<bool> = indices.iter().map(|&i| self.events[i]).collect();
        let covariates = self.covariates.select(Axis(0), indices);

        Self::assemble(patient_ids, self.feature_names.clone(), entry, times, events, self.counting, covariates)
    }

    /// keep only the given feature columns (in the given order)
    pub fn select_features(&self, columns: &[usize]) -> Result<Self> {
        if columns.iter().any(|&j| j >= self.n_features()) {
            return Err(CoxError::invalid_dimensions("feature index out of bounds"));
        }

        let mut data = self.clone();
        data.feature_names = columns.iter().map(|&j| self.feature_names[j].clone()).collect();
        data.covariates = self.covariates.select(Axis(1), columns);
        Ok(data)
    }

    /// per-feature means, used for centering linear predictors
    pub fn column_means(&self) -> Array1<f64> {
        self.covariates
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.n_features()))
    }
}

/// covariates for a cohort w/o outcome - what risk projection consumes
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub patient_ids: Vec<String>,
    pub feature_names: Vec<String>,
    pub values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(patient_ids: Vec<String>, feature_names: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if patient_ids.len() != values.nrows() || feature_names.len() != values.ncols() {
            return Err(CoxError::invalid_dimensions(
                format!(
                    "{} ids x {} names vs {}x{} values",
                    patient_ids.len(), feature_names.len(), values.nrows(), values.ncols()
                )
            ));
        }
        if has_duplicates(&feature_names) {
            return Err(CoxError::invalid_survival_data("feature names must be unique"));
        }
        if values.iter().any(|v| v.is_nan()) {
            return Err(CoxError::missing_values("new data contains NaN entries"));
        }
        if values.iter().any(|v| v.is_infinite()) {
            return Err(CoxError::invalid_survival_data("new data must be finite"));
        }
        Ok(Self { patient_ids, feature_names, values })
    }

    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    /// values of a named column, if present
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.feature_names
            .iter()
            .position(|f| f == name)
            .map(|j| self.values.column(j))
    }
}

impl From<&SurvivalData> for FeatureMatrix {
    fn from(data: &SurvivalData) -> Self {
        Self {
            patient_ids: data.patient_ids.clone(),
            feature_names: data.feature_names.clone(),
            values: data.covariates.clone(),
        }
    }
}

fn has_duplicates(names: &[String]) -> bool {
    let mut seen = HashSet::with_capacity(names.len());
    names.iter().any(|n| !seen.insert(n.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let events = vec![true, false, true, true, false];
        let covariates = Array2::from_shape_vec((5, 2), vec![
            1.0, 2.0,
            3.0, 4.0,
            5.0, 6.0,
            7.0, 8.0,
            9.0, 10.0,
        ]).unwrap();

        SurvivalData::from_right_censored(times, events, covariates).unwrap()
    }

    #[test]
    fn test_survival_data_creation() {
        let data = create_test_data();
        assert_eq!(data.n_samples(), 5);
        assert_eq!(data.n_features(), 2);
        assert_eq!(data.event_times(), &[1.0, 3.0, 4.0]);
        assert_eq!(data.feature_names(), &["x1".to_string(), "x2".to_string()]);
        assert_eq!(data.patient_ids()[4], "p5");
        assert_eq!(data.risk_sets()[1], vec![2, 3, 4]);
        assert_eq!(data.event_sets()[2], vec![3]);
    }

    #[test]
    fn test_invalid_dimensions() {
        let times = vec![1.0, 2.0];
        let events = vec![true];  // Wrong length
        let covariates = Array2::zeros((2, 2));

        assert!(SurvivalData::from_right_censored(times, events, covariates).is_err());
    }

    #[test]
    fn test_invalid_times() {
        let times = vec![-1.0, 2.0];  // Negative time
        let events = vec![true, false];
        let covariates = Array2::zeros((2, 2));

        assert!(SurvivalData::from_right_censored(times, events, covariates).is_err());
    }

    #[test]
    fn test_missing_values_rejected() {
        let times = vec![1.0, 2.0];
        let events = vec![true, false];
        let covariates = Array2::from_shape_vec((2, 1), vec![1.0, f64::NAN]).unwrap();

        let err = SurvivalData::from_right_censored(times, events, covariates).unwrap_err();
        assert!(matches!(err, CoxError::MissingValues { .. }));
    }

    #[test]
    fn test_infinite_covariates_rejected() {
        let covariates = Array2::from_shape_vec((2, 1), vec![1.0, f64::INFINITY]).unwrap();
        let err = SurvivalData::from_right_censored(vec![1.0, 2.0], vec![true, false], covariates).unwrap_err();
        assert!(matches!(err, CoxError::InvalidSurvivalData { .. }));

        let values = Array2::from_shape_vec((1, 1), vec![f64::NEG_INFINITY]).unwrap();
        assert!(FeatureMatrix::new(vec!["n1".into()], vec!["TP53".into()], values).is_err());
    }

    #[test]
    fn test_response_arity() {
        let two = SurvivalResponse::from_columns(vec![vec![1.0, 2.0], vec![1.0, 0.0]]).unwrap();
        assert_eq!(two.arity(), 2);
        assert_eq!(two.events(), &[true, false]);

        let three = SurvivalResponse::from_columns(vec![
            vec![0.0, 0.5],
            vec![1.0, 2.0],
            vec![0.0, 1.0],
        ]).unwrap();
        assert_eq!(three.arity(), 3);

        let err = SurvivalResponse::from_columns(vec![vec![1.0]]).unwrap_err();
        assert_eq!(err, CoxError::MalformedResponse { columns: 1 });
        let err = SurvivalResponse::from_columns(vec![vec![1.0]; 4]).unwrap_err();
        assert_eq!(err, CoxError::MalformedResponse { columns: 4 });
    }

    #[test]
    fn test_bad_status_code() {
        let err = SurvivalResponse::from_columns(vec![vec![1.0, 2.0], vec![1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, CoxError::InvalidSurvivalData { .. }));
    }

    #[test]
    fn test_left_truncated_risk_sets() {
        let response = SurvivalResponse::Counting {
            start: vec![0.0, 2.5, 0.0],
            stop: vec![2.0, 4.0, 5.0],
            event: vec![true, true, false],
        };
        let ids = vec!["a".into(), "b".into(), "c".into()];
        let data = SurvivalData::new(ids, vec!["g".into()], Array2::zeros((3, 1)), response).unwrap();

        assert!(data.is_counting());
        // patient b only enters at 2.5, so isn't at risk at t = 2
        assert_eq!(data.risk_sets()[0], vec![0, 2]);
        assert_eq!(data.risk_sets()[1], vec![1, 2]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let response = SurvivalResponse::Right { time: vec![1.0, 2.0], event: vec![true, true] };
        let ids = vec!["a".into(), "a".into()];
        assert!(SurvivalData::new(ids, vec!["g".into()], Array2::zeros((2, 1)), response).is_err());
    }

    #[test]
    fn test_subset() {
        let data = create_test_data();
        let subset = data.subset(&[0, 2, 4]).unwrap();

        assert_eq!(subset.n_samples(), 3);
        assert_eq!(subset.times()[0], 1.0);
        assert_eq!(subset.times()[1], 3.0);
        assert_eq!(subset.times()[2], 5.0);
        assert_eq!(subset.patient_ids()[1], "p3");
    }

    #[test]
    fn test_subset_with_repeats() {
        let data = create_test_data();
        let boot = data.subset(&[0, 0, 3, 3, 3]).unwrap();
        assert_eq!(boot.n_samples(), 5);
        assert_eq!(boot.n_events(), 5);
    }

    #[test]
    fn test_column_means() {
        let data = create_test_data();
        let means = data.column_means();
        assert_relative_eq!(means[0], 5.0, epsilon = 1e-10);
        assert_relative_eq!(means[1], 6.0, epsilon = 1e-10);
    }

    #[test]
    fn test_select_features() {
        let data = create_test_data();
        let selected = data.select_features(&[1]).unwrap();
        assert_eq!(selected.n_features(), 1);
        assert_eq!(selected.feature_names(), &["x2".to_string()]);
        assert_eq!(selected.covariates()[[0, 0]], 2.0);
    }

    #[test]
    fn test_feature_matrix() {
        let values = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let matrix = FeatureMatrix::new(
            vec!["n1".into(), "n2".into()],
            vec!["TP53".into(), "KRAS".into()],
            values,
        ).unwrap();
        assert_eq!(matrix.column("KRAS").unwrap().to_vec(), vec![0.0, 1.0]);
        assert!(matrix.column("EGFR").is_none());
    }
}
