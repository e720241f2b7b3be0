use ndarray::ArrayView1;
use crate::{
    data::SurvivalData,
    error::{CoxError, Result},
};

/// Harrell's C over right-censored outcomes
///
/// A pair is usable when the earlier time is an event and the other patient
/// outlived it. Equal risk scores on a usable pair score 1/2.
pub fn concordance_index(
    risk_scores: ArrayView1<f64>,
    times: ArrayView1<f64>,
    events: &[bool],
) -> Result<f64> {
    harrell(risk_scores, times, None, events)
}

/// Harrell's C against a dataset's own response; w/ (start, stop] data a
/// patient only counts against deaths after they entered
pub fn survival_concordance(data: &SurvivalData, risk_scores: ArrayView1<f64>) -> Result<f64> {
    let entry = data.is_counting().then(|| data.entry_times());
    harrell(risk_scores, data.times(), entry, data.events())
}

#[derive(Default)]
struct PairTally {
    usable: f64,
    score: f64,
}

fn harrell(
    risk: ArrayView1<f64>,
    times: ArrayView1<f64>,
    entry: Option<ArrayView1<f64>>,
    events: &[bool],
) -> Result<f64> {
    let n = risk.len();
    if times.len() != n || events.len() != n || entry.is_some_and(|e| e.len() != n) {
        return Err(CoxError::invalid_dimensions(
            format!("{} risk scores vs {} times / {} events", n, times.len(), events.len())
        ));
    }
    if n < 2 {
        return Err(CoxError::invalid_dimensions("concordance needs 2+ patients"));
    }

    let mut tally = PairTally::default();
    for died in (0..n).filter(|&i| events[i]) {
        let t = times[died];
        for other in 0..n {
            let survived = times[other] > t || (times[other] == t && !events[other]);
            let entered = entry.is_none_or(|e| e[other] < t);
            if other == died || !survived || !entered {
                continue;
            }

            tally.usable += 1.0;
            tally.score += match risk[died].total_cmp(&risk[other]) {
                std::cmp::Ordering::Greater => 1.0,
                std::cmp::Ordering::Equal => 0.5,
                std::cmp::Ordering::Less => 0.0,
            };
        }
    }

    if tally.usable == 0.0 {
        return Err(CoxError::numerical_error("no usable pairs, concordance undefined"));
    }
    Ok(tally.score / tally.usable)
}

/// Breslow log partial likelihood at linear predictor `eta`
pub fn log_partial_likelihood(data: &SurvivalData, eta: ArrayView1<f64>) -> Result<f64> {
    if eta.len() != data.n_samples() {
        return Err(CoxError::invalid_dimensions(
            format!("{} linear predictors for {} patients", eta.len(), data.n_samples())
        ));
    }

    let loglik: f64 = data
        .risk_sets()
        .iter()
        .zip(data.event_sets())
        .filter(|(at_risk, died)| !at_risk.is_empty() && !died.is_empty())
        .map(|(at_risk, died)| {
            let denominator = log_sum_exp(at_risk.iter().map(|&i| eta[i]));
            died.iter().map(|&i| eta[i] - denominator).sum::<f64>()
        })
        .sum();

    if !loglik.is_finite() {
        return Err(CoxError::numerical_error("log partial likelihood is not finite"));
    }
    Ok(loglik)
}

/// ln(sum(exp(x))) shifted by the max
fn log_sum_exp(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let shift = values.clone().fold(f64::NEG_INFINITY, f64::max);
    shift + values.map(|v| (v - shift).exp()).sum::<f64>().ln()
}
