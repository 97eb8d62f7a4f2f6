use survtune::{
    diff, performance, resample, resample_models, t_test, Control, CoxModel, Dataset, EmpiricalCurve,
    FailurePolicy, Fitted, LinearModel, Metric, Model, ModelSpec, NullModel, PAdjust, ParamValue, Params,
    Prediction, Response, ResponseKind, Settings, SurvivalTime, TieMethod, TuneError, TunedModel, TuningGrid,
    WeibullCurve,
};
use ndarray::{Array1, Array2, ArrayView2};
use approx::assert_relative_eq;
use std::collections::HashSet;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn create_synthetic_data(n_samples: usize, n_features: usize, seed: u64) -> Dataset {
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    let mut rng = StdRng::seed_from_u64(seed);

    let covariates = Array2::from_shape_fn((n_samples, n_features), |_| rng.gen_range(-2.0..2.0));

    // exponential event times driven by the first three features, uniform censoring
    let true_coefficients = [0.5, -0.3, 0.2];
    let mut times = Vec::with_capacity(n_samples);
    let mut events = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let linear_pred: f64 = (0..n_features.min(3))
            .map(|j| covariates[[i, j]] * true_coefficients[j])
            .sum();
        let u: f64 = rng.gen_range(1e-6..1.0);
        let time = (-u.ln() / (0.1 * linear_pred.exp())).max(0.1);
        let censoring_time = rng.gen_range(1.0..10.0);

        if time < censoring_time {
            times.push(time);
            events.push(true);
        } else {
            times.push(censoring_time);
            events.push(false);
        }
    }

    Dataset::survival(times, events, covariates).unwrap()
}

fn numeric_data(n: usize) -> Dataset {
    let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * (j + 2)) % 11) as f64);
    let y = Array1::from_shape_fn(n, |i| 1.5 * x[[i, 0]] - 0.5 * x[[i, 1]] + (i % 3) as f64);
    Dataset::new(x, Response::Numeric(y)).unwrap()
}

/// ignores the data; predicts a fixed score per value of `n`
struct Scored;

struct ScoredFit(f64);

impl Fitted for ScoredFit {
    fn predict(&self, x: ArrayView2<f64>, _times: Option<&[f64]>) -> survtune::Result<Prediction> {
        Ok(Prediction::Numeric(Array1::from_elem(x.nrows(), self.0)))
    }
}

impl Model for Scored {
    fn name(&self) -> &str {
        "Scored"
    }

    fn response_types(&self) -> &[ResponseKind] {
        &[ResponseKind::Numeric]
    }

    fn fit(&self, _data: &Dataset, params: &Params) -> survtune::Result<Box<dyn Fitted>> {
        let score = match params.float("n", 0.0)? as i64 {
            25 => 0.70,
            50 => 0.85,
            100 => 0.60,
            _ => 0.0,
        };
        Ok(Box::new(ScoredFit(score)))
    }
}

fn score_metric() -> Metric {
    Metric::new("score", true, |_obs, pred, _ctx| match pred {
        Prediction::Numeric(p) => Ok(p.mean().unwrap_or(f64::NAN)),
        _ => Ok(f64::NAN),
    })
}

#[test]
fn test_empirical_curves_are_valid_step_functions() {
    let data = create_synthetic_data(80, 3, 42);
    let y = data.response().as_survival().unwrap();

    for method in [TieMethod::Breslow, TieMethod::Efron, TieMethod::FlemingHarrington] {
        let curve = EmpiricalCurve::fit(y, None, method).unwrap();
        assert_eq!(curve.survival_at(0.0), 1.0);
        assert!(curve.survival().windows(2).all(|w| w[1] <= w[0]));
        assert!(curve.survival().iter().all(|&s| (0.0..=1.0).contains(&s)));

        let horizon = 5.0;
        let mean = curve.mean(Some(horizon));
        assert!(mean >= 0.0 && mean <= horizon);
        assert!(curve.mean(None) <= curve.last_time());
    }
}

#[test]
fn test_tie_methods_agree_without_ties() {
    let y: Vec<SurvivalTime> = (1..=12)
        .map(|i| if i % 3 == 0 { SurvivalTime::censored(i as f64) } else { SurvivalTime::event(i as f64) })
        .collect();
    let breslow = EmpiricalCurve::fit(&y, None, TieMethod::Breslow).unwrap();
    let efron = EmpiricalCurve::fit(&y, None, TieMethod::Efron).unwrap();
    let fh = EmpiricalCurve::fit(&y, None, TieMethod::FlemingHarrington).unwrap();

    for ((b, e), f) in breslow.cumulative_hazard().iter().zip(efron.cumulative_hazard()).zip(fh.cumulative_hazard()) {
        assert_relative_eq!(b, e, epsilon = 1e-12);
        assert_relative_eq!(b, f, epsilon = 1e-12);
    }
}

#[test]
fn test_exponential_closed_form() {
    let rate = 0.3;
    let curve = WeibullCurve::new(1.0, rate);
    for t in [0.0, 0.5, 2.0, 10.0] {
        assert_relative_eq!(curve.survival_at(t), (-rate * t).exp(), epsilon = 1e-12);
    }
    // risk multiplies the rate
    assert_relative_eq!(curve.with_risk(2.0).survival_at(1.0), (-2.0 * rate).exp(), epsilon = 1e-12);
}

#[test]
fn test_cv_records_partition_cases() {
    let data = numeric_data(23);
    let control = Control::cv(5, 2).with_seed(11);
    let resamples = resample(&data, &ModelSpec::new(LinearModel), &control).unwrap();

    let records = &resamples.models()[0].records;
    assert_eq!(records.len(), 10);
    for rep in records.chunks(5) {
        let mut seen = HashSet::new();
        for record in rep {
            assert!(record.error.is_none());
            for &id in &record.test.case_ids {
                assert!(seen.insert(id), "case {} held out twice", id);
            }
        }
        assert_eq!(seen.len(), 23);
    }
}

#[test]
fn test_combined_diff_matches_subtraction() {
    let data = numeric_data(30);
    let control = Control::boot(8).with_seed(5);
    let a = resample(&data, &ModelSpec::new(LinearModel), &control).unwrap();
    let b = resample(&data, &ModelSpec::new(NullModel), &control).unwrap();

    let perf_a = performance(&a, None).unwrap();
    let perf_b = performance(&b, None).unwrap();
    let combined = survtune::Resamples::combine(&[&a, &b]).unwrap();
    let perf = performance(&combined, None).unwrap();
    assert_eq!(perf.models(), &["LinearModel".to_string(), "NullModel".to_string()]);

    let d = diff(&perf).unwrap();
    assert_eq!(d.diffs.models(), &["LinearModel - NullModel".to_string()]);
    for i in 0..perf.iterations().len() {
        for k in 0..perf.metrics().len() {
            let expected = perf_a.values()[[i, k, 0]] - perf_b.values()[[i, k, 0]];
            assert_relative_eq!(d.diffs.values()[[i, k, 0]], expected, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_combine_mismatch_leaves_inputs_intact() {
    let data = numeric_data(30);
    let a = resample(&data, &ModelSpec::new(LinearModel), &Control::cv(5, 1).with_seed(1)).unwrap();
    let b = resample(&data, &ModelSpec::new(NullModel), &Control::cv(5, 1).with_seed(2)).unwrap();

    let result = survtune::Resamples::combine(&[&a, &b]);
    assert!(matches!(result, Err(TuneError::StructuralMismatch { .. })));
    assert_eq!(a.model_names(), vec!["LinearModel"]);
    assert_eq!(b.model_names(), vec!["NullModel"]);
    assert!(performance(&a, None).is_ok());
}

#[test]
fn test_t_test_invariant_to_model_order() {
    let data = numeric_data(40);
    let control = Control::cv(5, 2).with_seed(3);
    let specs = [
        ModelSpec::new(LinearModel),
        ModelSpec::new(NullModel),
        ModelSpec::new(LinearModel).with_param("lambda", 50.0).with_label("Ridge"),
    ];
    let forward = resample_models(&data, &specs, &control).unwrap();
    let reversed_specs: Vec<_> = specs.iter().rev().cloned().collect();
    let reversed = resample_models(&data, &reversed_specs, &control).unwrap();

    let t1 = t_test(&diff(&performance(&forward, None).unwrap()).unwrap(), PAdjust::Holm);
    let t2 = t_test(&diff(&performance(&reversed, None).unwrap()).unwrap(), PAdjust::Holm);

    for metric in ["rmse", "mae"] {
        for (a, b) in [("LinearModel", "NullModel"), ("LinearModel", "Ridge"), ("NullModel", "Ridge")] {
            let p1 = t1.p_value(metric, a, b).unwrap();
            let p2 = t2.p_value(metric, a, b).unwrap();
            assert_relative_eq!(p1, p2, epsilon = 1e-12);
            assert_relative_eq!(t1.p_value(metric, b, a).unwrap(), p1, epsilon = 1e-12);
            assert_relative_eq!(t1.mean_diff(metric, a, b).unwrap(), -t2.mean_diff(metric, b, a).unwrap(), epsilon = 1e-12);
        }
        assert!(t1.p_value(metric, "Ridge", "Ridge").unwrap().is_nan());
    }
}

#[test]
fn test_tuning_picks_best_grid_point() {
    let data = numeric_data(30);
    let settings = Settings::default().with_control(Control::cv(5, 1).with_seed(9));
    let tuned = TunedModel::new(ModelSpec::new(Scored))
        .with_grid(TuningGrid::explicit(vec![(
            "n".into(),
            vec![ParamValue::Int(25), ParamValue::Int(50), ParamValue::Int(100)],
        )]))
        .with_settings(settings)
        .with_metrics(vec![score_metric()]);

    let fit = tuned.train(&data).unwrap();
    let bits = fit.bits();
    assert_eq!(bits.selected, 1);
    assert_eq!(bits.selected_params(), &[("n".to_string(), ParamValue::Int(50))]);
    assert_eq!(bits.selected_label(), "Scored(n=50)");
    assert!(bits.maximize);
    for (value, expected) in bits.values.iter().zip([0.70, 0.85, 0.60]) {
        assert_relative_eq!(*value, expected, epsilon = 1e-12);
    }

    match fit.predict(data.x(), None).unwrap() {
        Prediction::Numeric(p) => assert_relative_eq!(p[0], 0.85),
        other => panic!("unexpected prediction {:?}", other.kind()),
    }
}

#[test]
fn test_parallel_resampling_is_reproducible() {
    init_logging();
    let data = create_synthetic_data(60, 3, 7);
    let specs = [
        ModelSpec::new(CoxModel::new()).with_param("lambda", 0.1),
        ModelSpec::new(NullModel),
    ];
    let metrics = [Metric::cindex(), Metric::brier()];
    let run = |workers: usize| {
        let control = Control::boot(12).with_seed(2024).with_workers(workers).with_times(vec![1.0, 3.0, 6.0]);
        let resamples = resample_models(&data, &specs, &control).unwrap();
        let perf = performance(&resamples, Some(&metrics)).unwrap();
        perf.values().iter().map(|v| v.to_bits()).collect::<Vec<_>>()
    };

    let serial = run(1);
    assert_eq!(serial, run(4));
    assert_eq!(serial, run(3));
}

#[test]
fn test_cox_cross_validation_end_to_end() {
    let data = create_synthetic_data(120, 5, 42);
    let control = Control::cv(4, 1).with_seed(42);
    let resamples = resample_models(
        &data,
        &[ModelSpec::new(CoxModel::new()).with_param("lambda", 0.01), ModelSpec::new(NullModel)],
        &control,
    )
    .unwrap();
    let perf = performance(&resamples, None).unwrap();
    assert_eq!(perf.metrics()[0], "cindex");

    let cox = perf.series("cindex", "CoxModel").unwrap();
    let null = perf.series("cindex", "NullModel").unwrap();
    assert!(cox.iter().all(|c| (0.0..=1.0).contains(c)));
    // constant risk ties every pair
    assert!(null.iter().all(|&c| (c - 0.5).abs() < 1e-12));
    assert!(cox.mean().unwrap() > 0.55);
}

#[test]
fn test_cox_tuning_end_to_end() {
    let data = create_synthetic_data(80, 3, 1);
    let settings = Settings::default()
        .with_control(Control::cv(3, 1).with_seed(1))
        .with_grid_size(3);
    let fit = TunedModel::new(ModelSpec::new(CoxModel::new()))
        .with_settings(settings)
        .train(&data)
        .unwrap();

    assert_eq!(fit.bits().candidates.len(), 3);
    assert!(fit.bits().candidates.iter().all(|c| c.starts_with("CoxModel(lambda=")));
    assert_eq!(fit.bits().metric, "cindex");
    match fit.predict(data.x(), None).unwrap() {
        Prediction::SurvMeans(m) => assert_eq!(m.len(), 80),
        other => panic!("unexpected prediction {:?}", other.kind()),
    }
    assert_eq!(fit.varimp().map(|v| v.len()), Some(3));
}

#[test]
fn test_lenient_failures_become_missing_values() {
    init_logging();
    let data = numeric_data(20);
    // a negative penalty fails every fit
    let spec = ModelSpec::new(LinearModel).with_param("lambda", -1.0);

    let strict = resample(&data, &spec, &Control::cv(4, 1));
    assert!(matches!(strict, Err(TuneError::ModelFit { iteration: 0, .. })));

    let lenient = resample(&data, &spec, &Control::cv(4, 1).with_failure(FailurePolicy::Lenient)).unwrap();
    assert_eq!(lenient.n_failed(), 4);
    let perf = performance(&lenient, None).unwrap();
    assert!(perf.values().iter().all(|v| v.is_nan()));
}
