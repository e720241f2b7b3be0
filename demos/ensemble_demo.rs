use cox_ensemble::{
    EnsembleConfig, EnsembleRunner, EnsembleSummary, FeatureMatrix, PenaltyType, ReferenceModel,
    RiskProjector, SamplingMode, SurvivalData, SurvivalResponse,
    summary::{median_cutoff, stratify, RiskGroup},
};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

const GENES: [&str; 8] = ["TP53", "KRAS", "EGFR", "STK11", "KEAP1", "SMARCA4", "NF1", "BRAF"];

fn generate_cohort(n_samples: usize, seed: u64, prefix: &str) -> cox_ensemble::Result<SurvivalData> {
    let mut rng = StdRng::seed_from_u64(seed);

    // STK11 & KEAP1 hurt, EGFR helps, the rest is noise
    let true_coefficients = [0.0, 0.2, -0.7, 0.9, 0.6, 0.0, 0.0, 0.0];

    let mut values = Vec::with_capacity(n_samples * GENES.len());
    let mut times = Vec::with_capacity(n_samples);
    let mut status = Vec::with_capacity(n_samples);

    for _ in 0..n_samples {
        let row: Vec<f64> = (0..GENES.len()).map(|_| if rng.gen_bool(0.25) { 1.0 } else { 0.0 }).collect();
        let linear_pred: f64 = row.iter().zip(true_coefficients).map(|(x, b)| x * b).sum();
        values.extend(row);

        // months to death from an exponential baseline
        let time = (-rng.r#gen::<f64>().max(1e-12).ln() / (0.03 * linear_pred.exp())).max(0.5);
        let censoring_time = rng.gen_range(12.0..72.0);
        times.push(time.min(censoring_time));
        status.push(if time < censoring_time { 1.0 } else { 0.0 });
    }

    let covariates = Array2::from_shape_vec((n_samples, GENES.len()), values)
        .map_err(|e| cox_ensemble::CoxError::invalid_dimensions(e.to_string()))?;
    SurvivalData::new(
        (1..=n_samples).map(|i| format!("{}{}", prefix, i)).collect(),
        GENES.iter().map(|g| g.to_string()).collect(),
        covariates,
        SurvivalResponse::from_columns(vec![times, status])?,
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Repeated Penalized Cox Regression");
    println!("=================================");

    let training = generate_cohort(200, 42, "train")?;
    println!(
        "training cohort: {} patients, {} genes, {} events\n",
        training.n_samples(), training.n_features(), training.n_events()
    );

    let runner = EnsembleRunner::new(
        EnsembleConfig::new()
            .with_runs(50)
            .with_sampling(SamplingMode::Cv)
    );

    let ensembles = runner.run_all(&training, &PenaltyType::ALL)?;
    for ensemble in &ensembles {
        let summary = EnsembleSummary::from_result(ensemble)?;
        println!("[{}]", ensemble.artifact_name("demo"));
        println!("{}", summary);
    }

    // score an external cohort that only sequenced part of the panel
    let lasso = &ensembles[0];
    let external = generate_cohort(40, 7, "ext")?;
    let panel = ["TP53", "KRAS", "EGFR", "STK11"];
    let columns: Vec<usize> = panel.iter().filter_map(|g| external.feature_index(g)).collect();
    let incoming = FeatureMatrix::from(&external.select_features(&columns)?);

    let projector = RiskProjector::new(lasso)?;
    let risk = projector.project(&incoming)?;
    println!("projected {} external patients", risk.patient_ids.len());
    println!("  matched: {:?}", risk.matched_features);
    println!("  zero-filled: {:?}", risk.synthesized_features);

    let cutoff = median_cutoff(&risk.scaled)?;
    let groups = stratify(&risk.scaled, cutoff);
    let high = groups.iter().filter(|&&g| g == RiskGroup::High).count();
    println!("  median cutoff {:.2}: {} high risk, {} low risk\n", cutoff, high, groups.len() - high);

    let reference = ReferenceModel::fit(&training, &projector.cohort_scores())?;
    println!("reference model: log HR per risk unit = {:.4}", reference.coefficient());
    println!("{:<8} {:>8} {:>8} {:>8}", "patient", "month", "S(t)", "95% CI");
    for (patient, curve) in reference.curves_for(&risk, &["ext1", "ext2"])? {
        for k in (0..curve.times.len()).step_by(4) {
            println!(
                "{:<8} {:>8.0} {:>8.3} [{:.3}, {:.3}]",
                patient, curve.times[k], curve.survival[k], curve.lower[k], curve.upper[k]
            );
        }
    }

    let json = lasso.to_json()?;
    println!("\nLASSO artifact: {} bytes of JSON", json.len());

    Ok(())
}
