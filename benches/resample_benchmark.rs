use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use survtune::{
    metrics::harrell_c_index, performance, resample, resample_models, Control, CoxModel, Dataset, EmpiricalCurve,
    MetricContext, ModelSpec, NullModel, Prediction, Settings, TieMethod, TunedModel,
};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

fn generate_synthetic_data(n_samples: usize, n_features: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(42);

    let covariates = Array2::from_shape_fn((n_samples, n_features), |_| rng.gen_range(-2.0..2.0));
    let true_coefficients = [0.5, -0.3, 0.2];

    let mut times = Vec::with_capacity(n_samples);
    let mut events = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let linear_pred: f64 = (0..n_features.min(3))
            .map(|j| covariates[[i, j]] * true_coefficients[j])
            .sum();
        let u: f64 = rng.gen_range(1e-6..1.0);
        let time = (-u.ln() / (0.1 * linear_pred.exp())).max(0.1);
        let censoring_time = rng.gen_range(1.0..8.0);

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

fn benchmark_curve_fitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("curve_fitting");

    for &n_samples in [100, 1000, 5000].iter() {
        let data = generate_synthetic_data(n_samples, 1);
        let y = data.response().as_survival().unwrap().to_vec();
        for method in [TieMethod::Breslow, TieMethod::Efron] {
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{:?}_{}", method, n_samples)),
                &y,
                |b, y| b.iter(|| EmpiricalCurve::fit(black_box(y), None, method).unwrap()),
            );
        }
    }
    group.finish();
}

fn benchmark_cv(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_validation");
    group.sample_size(10);

    let data = generate_synthetic_data(300, 10);
    let spec = ModelSpec::new(CoxModel::new()).with_param("lambda", 0.1);

    for &workers in [1, 4].iter() {
        let control = Control::cv(10, 1).with_seed(1).with_workers(workers);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_workers", workers)),
            &control,
            |b, control| {
                b.iter(|| resample(black_box(&data), &spec, control).unwrap());
            },
        );
    }
    group.finish();
}

fn benchmark_performance(c: &mut Criterion) {
    let mut group = c.benchmark_group("performance");

    let data = generate_synthetic_data(300, 5);
    let control = Control::boot(25).with_seed(3).with_times(vec![1.0, 2.0, 4.0]);
    let specs = [ModelSpec::new(CoxModel::new()).with_param("lambda", 0.1), ModelSpec::new(NullModel)];
    let resamples = resample_models(&data, &specs, &control).unwrap();

    group.bench_function("boot25_two_models", |b| {
        b.iter(|| performance(black_box(&resamples), None).unwrap());
    });

    let fitted = specs[0].fit(&data, 0).unwrap();
    let risks = match fitted.predict(data.x(), None).unwrap() {
        Prediction::SurvMeans(m) => m.mapv(|v| -v),
        _ => unreachable!(),
    };
    let y = data.response().as_survival().unwrap();
    group.bench_function("harrell_c_index", |b| {
        b.iter(|| harrell_c_index(black_box(risks.view()), black_box(y), &MetricContext::default()));
    });

    group.finish();
}

fn benchmark_tuning(c: &mut Criterion) {
    let mut group = c.benchmark_group("tuning");
    group.sample_size(10);

    let data = generate_synthetic_data(200, 8);
    let settings = Settings::default().with_control(Control::cv(5, 1).with_seed(7).with_workers(4));
    let tuned = TunedModel::new(ModelSpec::new(CoxModel::new())).with_settings(settings);

    group.bench_function("cox_default_grid", |b| {
        b.iter(|| tuned.train(black_box(&data)).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_curve_fitting,
    benchmark_cv,
    benchmark_performance,
    benchmark_tuning
);
criterion_main!(benches);
