use survtune::{
    diff, Control, CoxModel, Dataset, Fitted, ModelSpec, NullModel,
    Prediction, SelectedModel, Settings, Statistic, SurvDistribution, TieMethod, TunedModel,
};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

fn generate_synthetic_dataset(n_samples: usize, n_features: usize, seed: u64) -> survtune::Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);

    let covariates = Array2::from_shape_fn((n_samples, n_features), |_| rng.gen_range(-2.0..2.0));

    // first 3 features are truly predictive
    let true_coefficients = [0.8, -0.5, 0.3];

    let mut times = Vec::with_capacity(n_samples);
    let mut events = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let linear_pred: f64 = (0..n_features.min(3))
            .map(|j| covariates[[i, j]] * true_coefficients[j])
            .sum();
        let hazard = 0.1 * linear_pred.exp();

        // exponential survival time, uniform censoring
        let u: f64 = rng.gen_range(1e-9..1.0);
        let time = -u.ln() / hazard;
        let censoring_time = rng.gen_range(1.0..15.0);

        if time < censoring_time {
            times.push(time);
            events.push(true);
        } else {
            times.push(censoring_time);
            events.push(false);
        }
    }

    Dataset::survival(times, events, covariates)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Survival model tuning example");
    println!("=============================\n");

    let data = generate_synthetic_dataset(300, 10, 42)?;
    let n_events = data.response().as_survival().map_or(0, |y| y.iter().filter(|s| s.is_event()).count());
    println!("Dataset: {} cases, {} features, {} events\n", data.n_cases(), data.n_features(), n_events);

    // compare a few fixed models under 5x2 cv
    println!("Model comparison (5-fold cv, 2 repeats)");
    println!("=======================================");
    let comparison = Settings::default()
        .with_control(Control::cv(5, 2).with_seed(42).with_workers(4))
        .with_stats(vec![Statistic::Mean, Statistic::Sd, Statistic::Median]);
    let specs = [
        ModelSpec::new(NullModel),
        ModelSpec::new(CoxModel::new()).with_param("lambda", 0.0).with_label("Cox"),
        ModelSpec::new(CoxModel::new()).with_param("lambda", 5.0).with_label("Ridge Cox"),
        // penalty scales w/ the data it's fit on
        ModelSpec::new(CoxModel::new())
            .with_deferred("lambda", |ctx| (ctx.n_obs as f64 / 100.0).into())
            .with_param("distr", "weibull")
            .with_label("Weibull Cox"),
    ];
    let resamples = comparison.resample(&data, &specs)?;
    let perf = comparison.performance(&resamples, None)?;
    println!("{}", comparison.summary(&perf)?);

    let tests = comparison.t_test(&diff(&perf)?);
    println!("{:<14} {:<14} {:>12} {:>10}", "Model A", "Model B", "Mean diff", "p (holm)");
    println!("{:-<52}", "");
    for (i, a) in tests.models.iter().enumerate() {
        for b in tests.models.iter().skip(i + 1) {
            println!(
                "{:<14} {:<14} {:>12.4} {:>10.4}",
                a, b,
                tests.mean_diff("cindex", a, b).unwrap_or(f64::NAN),
                tests.p_value("cindex", a, b).unwrap_or(f64::NAN)
            );
        }
    }
    println!();

    // tune the penalty over the model's default grid
    println!("Tuning the cox penalty");
    println!("======================");
    let settings = Settings::default()
        .with_control(Control::cv(5, 1).with_seed(7).with_workers(4))
        .with_grid_size(6)
        .with_surv_distr(SurvDistribution::Empirical(TieMethod::Breslow));
    let tuned = TunedModel::new(ModelSpec::new(CoxModel::new()))
        .with_settings(settings.clone())
        .train(&data)?;
    let bits = tuned.bits();
    println!("{:<36} {:>10}", "Candidate", bits.metric);
    println!("{:-<48}", "");
    for (i, (label, value)) in bits.candidates.iter().zip(&bits.values).enumerate() {
        let marker = if i == bits.selected { " <" } else { "" };
        println!("{:<36} {:>10.4}{}", label, value, marker);
    }
    println!();

    if let Some(importance) = tuned.varimp() {
        println!("{:<10} {:>12}", "Feature", "|coef|");
        println!("{:-<23}", "");
        for (i, v) in importance.iter().enumerate() {
            println!("{:<10} {:>12.6}", format!("X{}", i), v);
        }
        println!("Note: X0, X1, X2 are the true predictive features in this synthetic dataset.\n");
    }

    // pick between the tuned model and a baseline, estimated under bootstrap
    println!("Selecting between tuned cox and the null model (bootstrap)");
    println!("==========================================================");
    let selected = SelectedModel::new(vec![
        ModelSpec::new(TunedModel::new(ModelSpec::new(CoxModel::new())).with_settings(settings.with_grid_size(3))),
        ModelSpec::new(NullModel),
    ])?
    .with_settings(Settings::default().with_control(Control::boot(10).with_seed(1)))
    .train(&data)?;
    println!("winner: {}", selected.bits().selected_label());

    let horizon = [2.0, 5.0, 10.0];
    if let Prediction::SurvCurves(curves) = selected.predict(data.x(), Some(&horizon))? {
        println!("\nPredicted survival for the first 3 cases at t = {:?}", horizon);
        for row in curves.values().rows().into_iter().take(3) {
            println!("  {:?}", row.iter().map(|s| format!("{:.3}", s)).collect::<Vec<_>>());
        }
    }

    Ok(())
}
