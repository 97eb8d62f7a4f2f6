//! Performance aggregation: metric values per (iteration, metric, model),
//! and NaN-ignoring summaries over the iteration dimension.

use std::fmt;
use std::sync::Arc;

use ndarray::{concatenate, s, Array2, Array3, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use crate::{
    error::{TuneError, Result},
    metrics::{default_metrics, Metric, MetricContext},
    resample::{Evaluation, Resamples},
};

/// resample iteration x metric x model
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceArray {
    pub(crate) values: Array3<f64>,
    pub(crate) iterations: Vec<String>,
    pub(crate) metrics: Vec<String>,
    pub(crate) maximize: Vec<bool>,
    pub(crate) models: Vec<String>,
}

impl PerformanceArray {
    pub fn new(
        values: Array3<f64>,
        iterations: Vec<String>,
        metrics: Vec<(String, bool)>,
        models: Vec<String>,
    ) -> Result<Self> {
        if values.dim() != (iterations.len(), metrics.len(), models.len()) {
            return Err(TuneError::invalid_dimensions(
                format!("values {:?} vs {} iterations, {} metrics, {} models",
                       values.dim(), iterations.len(), metrics.len(), models.len())
            ));
        }
        let (metrics, maximize) = metrics.into_iter().unzip();
        Ok(Self { values, iterations, metrics, maximize, models })
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    pub fn iterations(&self) -> &[String] {
        &self.iterations
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// polarity of each metric, same order as `metrics()`
    pub fn maximize(&self) -> &[bool] {
        &self.maximize
    }

    pub fn metric_index(&self, metric: &str) -> Result<usize> {
        self.metrics
            .iter()
            .position(|m| m == metric)
            .ok_or_else(|| TuneError::configuration(format!("no metric named {}", metric)))
    }

    pub fn model_index(&self, model: &str) -> Result<usize> {
        self.models
            .iter()
            .position(|m| m == model)
            .ok_or_else(|| TuneError::configuration(format!("no model named {}", model)))
    }

    /// values of one metric for one model across iterations
    pub fn series(&self, metric: &str, model: &str) -> Result<ArrayView1<'_, f64>> {
        let (k, m) = (self.metric_index(metric)?, self.model_index(model)?);
        Ok(self.values.slice(s![.., k, m]))
    }

    pub(crate) fn check_compatible(&self, other: &Self) -> Result<()> {
        if self.iterations != other.iterations {
            return Err(TuneError::structural_mismatch("performance arrays have different iterations"));
        }
        if self.metrics != other.metrics || self.maximize != other.maximize {
            return Err(TuneError::structural_mismatch("performance arrays have different metrics"));
        }
        Ok(())
    }

    /// new array w/ `other`'s models added after ours; both inputs untouched.
    /// duplicate model names get a numeric suffix
    pub fn append(&self, other: &Self) -> Result<Self> {
        self.check_compatible(other)?;
        let values = concatenate(Axis(2), &[self.values.view(), other.values.view()])
            .map_err(|e| TuneError::invalid_dimensions(e.to_string()))?;
        let names: Vec<String> = self.models.iter().chain(&other.models).cloned().collect();
        Ok(Self {
            values,
            iterations: self.iterations.clone(),
            metrics: self.metrics.clone(),
            maximize: self.maximize.clone(),
            models: unique_names(names),
        })
    }
}

/// make.unique-style names: repeats get ".1", ".2", ...
pub(crate) fn unique_names(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        let mut k = 1;
        while out.contains(&candidate) {
            candidate = format!("{}.{}", name, k);
            k += 1;
        }
        out.push(candidate);
    }
    out
}

fn evaluate(metric: &Metric, eval: &Evaluation, cutoff: f64) -> Result<f64> {
    let Some(predicted) = &eval.predicted else {
        return Ok(f64::NAN);
    };
    let ctx = MetricContext { cutoff, weights: eval.weights.as_deref() };
    metric.compute(&eval.observed, predicted, &ctx)
}

/// metric values for every iteration and model; `None` uses the defaults
/// for the response kind. optimism methods report `apparent - (train - test)`
pub fn performance(resamples: &Resamples, metrics: Option<&[Metric]>) -> Result<PerformanceArray> {
    performance_with_cutoff(resamples, metrics, 0.5)
}

pub fn performance_with_cutoff(
    resamples: &Resamples,
    metrics: Option<&[Metric]>,
    cutoff: f64,
) -> Result<PerformanceArray> {
    let defaults;
    let metrics = match metrics {
        Some(m) => m,
        None => {
            defaults = default_metrics(resamples.response_kind());
            &defaults
        }
    };
    if metrics.is_empty() {
        return Err(TuneError::configuration("need at least one metric"));
    }
    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = metrics.iter().find(|m| !seen.insert(m.name())) {
        return Err(TuneError::configuration(format!("metric {} listed twice", dup.name())));
    }

    let iterations = resamples.iteration_labels();
    let models = resamples.models();
    let mut values = Array3::from_elem((iterations.len(), metrics.len(), models.len()), f64::NAN);

    for (m, model) in models.iter().enumerate() {
        if model.records.len() != iterations.len() {
            return Err(TuneError::structural_mismatch(
                format!("model {} has {} iterations, expected {}", model.name, model.records.len(), iterations.len())
            ));
        }
        for (k, metric) in metrics.iter().enumerate() {
            let apparent = match &model.apparent {
                Some(eval) => Some(evaluate(metric, eval, cutoff)?),
                None => None,
            };
            for (i, record) in model.records.iter().enumerate() {
                let test = evaluate(metric, &record.test, cutoff)?;
                values[[i, k, m]] = match (&record.train, apparent) {
                    (Some(train), Some(apparent)) => {
                        let optimism = evaluate(metric, train, cutoff)? - test;
                        apparent - optimism
                    }
                    _ => test,
                };
            }
        }
    }

    PerformanceArray::new(
        values,
        iterations,
        metrics.iter().map(|m| (m.name().to_string(), m.maximize())).collect(),
        resamples.model_names().into_iter().map(String::from).collect(),
    )
}

pub type StatFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// summary statistic over iterations; always sees the non-missing values only
#[derive(Clone, Serialize, Deserialize)]
pub enum Statistic {
    Mean,
    Median,
    Sd,
    Min,
    Max,
    #[serde(skip)]
    Custom(String, StatFn),
}

impl fmt::Debug for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl PartialEq for Statistic {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Statistic {
    pub fn custom(name: impl Into<String>, f: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Statistic::Custom(name.into(), Arc::new(f))
    }

    pub fn name(&self) -> &str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Median => "median",
            Statistic::Sd => "sd",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Custom(name, _) => name,
        }
    }

    /// the five built-ins, in summary order
    pub fn defaults() -> Vec<Statistic> {
        vec![Statistic::Mean, Statistic::Median, Statistic::Sd, Statistic::Min, Statistic::Max]
    }

    /// NaN-ignoring; NaN when nothing is left
    pub fn apply(&self, values: impl IntoIterator<Item = f64>) -> f64 {
        let mut xs: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
        if xs.is_empty() {
            return f64::NAN;
        }
        let n = xs.len() as f64;
        match self {
            Statistic::Mean => xs.iter().sum::<f64>() / n,
            Statistic::Median => {
                xs.sort_by(f64::total_cmp);
                let mid = xs.len() / 2;
                if xs.len() % 2 == 0 { 0.5 * (xs[mid - 1] + xs[mid]) } else { xs[mid] }
            }
            Statistic::Sd => {
                if xs.len() < 2 {
                    return f64::NAN;
                }
                let mean = xs.iter().sum::<f64>() / n;
                (xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
            }
            Statistic::Min => xs.iter().copied().fold(f64::INFINITY, f64::min),
            Statistic::Max => xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Statistic::Custom(_, f) => f(&xs),
        }
    }
}

/// model x metric x statistic, plus missing counts per model x metric
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    pub values: Array3<f64>,
    pub missing: Array2<usize>,
    pub models: Vec<String>,
    pub metrics: Vec<String>,
    pub stats: Vec<String>,
}

impl PerformanceSummary {
    pub fn get(&self, model: &str, metric: &str, stat: &str) -> Option<f64> {
        let m = self.models.iter().position(|x| x == model)?;
        let k = self.metrics.iter().position(|x| x == metric)?;
        let s = self.stats.iter().position(|x| x == stat)?;
        Some(self.values[[m, k, s]])
    }
}

impl fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, metric) in self.metrics.iter().enumerate() {
            writeln!(f, "{}", metric)?;
            write!(f, "{:>20}", "")?;
            for stat in &self.stats {
                write!(f, "{:>12}", stat)?;
            }
            writeln!(f, "{:>9}", "missing")?;
            for (m, model) in self.models.iter().enumerate() {
                write!(f, "{:>20}", model)?;
                for s in 0..self.stats.len() {
                    write!(f, "{:>12.6}", self.values[[m, k, s]])?;
                }
                writeln!(f, "{:>9}", self.missing[[m, k]])?;
            }
        }
        Ok(())
    }
}

/// summarise each (model, metric) over iterations; `None` uses mean, median, sd, min, max
pub fn summary(perf: &PerformanceArray, stats: Option<&[Statistic]>) -> Result<PerformanceSummary> {
    let defaults;
    let stats = match stats {
        Some(s) => s,
        None => {
            defaults = Statistic::defaults();
            &defaults
        }
    };
    if stats.is_empty() {
        return Err(TuneError::configuration("need at least one summary statistic"));
    }

    let (_, n_metrics, n_models) = perf.values.dim();
    let mut values = Array3::from_elem((n_models, n_metrics, stats.len()), f64::NAN);
    let mut missing = Array2::zeros((n_models, n_metrics));
    for m in 0..n_models {
        for k in 0..n_metrics {
            let series = perf.values.slice(s![.., k, m]);
            missing[[m, k]] = series.iter().filter(|v| v.is_nan()).count();
            for (j, stat) in stats.iter().enumerate() {
                values[[m, k, j]] = stat.apply(series.iter().copied());
            }
        }
    }

    Ok(PerformanceSummary {
        values,
        missing,
        models: perf.models.clone(),
        metrics: perf.metrics.clone(),
        stats: stats.iter().map(|s| s.name().to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Control, FailurePolicy};
    use crate::data::{Dataset, Response};
    use crate::model::ModelSpec;
    use crate::null_model::NullModel;
    use crate::resample::resample;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array2};

    fn array(values: Vec<f64>, models: &[&str]) -> PerformanceArray {
        let n_models = models.len();
        let n_iter = values.len() / n_models;
        PerformanceArray::new(
            Array3::from_shape_vec((n_iter, 1, n_models), values).unwrap(),
            (0..n_iter).map(|i| format!("Boot{}", i + 1)).collect(),
            vec![("rmse".to_string(), false)],
            models.iter().map(|m| m.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_statistics_ignore_missing() {
        let xs = [3.0, f64::NAN, 1.0, 2.0, 10.0];
        assert_relative_eq!(Statistic::Mean.apply(xs), 4.0);
        assert_relative_eq!(Statistic::Median.apply(xs), 2.5);
        assert_relative_eq!(Statistic::Min.apply(xs), 1.0);
        assert_relative_eq!(Statistic::Max.apply(xs), 10.0);
        assert_relative_eq!(Statistic::Sd.apply([1.0, 3.0]), 2f64.sqrt());
        assert!(Statistic::Sd.apply([1.0, f64::NAN]).is_nan());
        assert!(Statistic::Mean.apply([f64::NAN]).is_nan());

        let range = Statistic::custom("range", |xs| {
            xs.iter().copied().fold(f64::NEG_INFINITY, f64::max) - xs.iter().copied().fold(f64::INFINITY, f64::min)
        });
        assert_relative_eq!(range.apply(xs), 9.0);
    }

    #[test]
    fn test_summary_counts_missing() {
        let perf = array(vec![1.0, f64::NAN, 3.0, 5.0], &["a"]);
        let sum = summary(&perf, None).unwrap();
        assert_eq!(sum.missing[[0, 0]], 1);
        assert_relative_eq!(sum.get("a", "rmse", "mean").unwrap(), 3.0);
        assert_eq!(sum.stats.len(), 5);
        assert!(sum.get("b", "rmse", "mean").is_none());
        assert!(summary(&perf, Some(&[])).is_err());
    }

    #[test]
    fn test_append_rebuilds() {
        let a = array(vec![1.0, 2.0], &["m"]);
        let b = array(vec![3.0, 4.0], &["m"]);
        let both = a.append(&b).unwrap();
        assert_eq!(both.models(), &["m".to_string(), "m.1".to_string()]);
        assert_eq!(both.values().dim(), (2, 1, 2));
        assert_eq!(a.values().dim(), (2, 1, 1)); // untouched
        assert_relative_eq!(both.series("rmse", "m.1").unwrap()[1], 4.0);

        let short = array(vec![1.0], &["x"]);
        assert!(matches!(a.append(&short), Err(TuneError::StructuralMismatch { .. })));
    }

    #[test]
    fn test_performance_shape_and_values() {
        let x = Array2::zeros((10, 1));
        let y = Response::Numeric(Array1::from_shape_fn(10, |i| i as f64));
        let data = Dataset::new(x, y).unwrap();
        let res = resample(&data, &ModelSpec::new(NullModel), &Control::cv(5, 1).with_seed(1)).unwrap();

        let perf = performance(&res, None).unwrap();
        assert_eq!(perf.values().dim(), (5, 3, 1));
        assert_eq!(perf.metrics()[0], "rmse");
        assert!(perf.values().iter().take(1).all(|v| v.is_finite() && *v > 0.0));

        let only_mae = performance(&res, Some(&[Metric::mae()])).unwrap();
        assert_eq!(only_mae.metrics(), &["mae".to_string()]);
        assert!(performance(&res, Some(&[Metric::mae(), Metric::mae()])).is_err());
    }

    #[test]
    fn test_optimism_correction() {
        let x = Array2::zeros((12, 1));
        let y = Response::Numeric(Array1::from_shape_fn(12, |i| (i * i) as f64));
        let data = Dataset::new(x, y).unwrap();
        let res = resample(&data, &ModelSpec::new(NullModel), &Control::boot_optimism(3).with_seed(4)).unwrap();
        let perf = performance(&res, Some(&[Metric::rmse()])).unwrap();

        let model = &res.models()[0];
        let ctx = MetricContext::default();
        let score = |e: &Evaluation| Metric::rmse().compute(&e.observed, e.predicted.as_ref().unwrap(), &ctx).unwrap();
        let apparent = score(model.apparent.as_ref().unwrap());
        for (i, r) in model.records.iter().enumerate() {
            let want = apparent - (score(r.train.as_ref().unwrap()) - score(&r.test));
            assert_relative_eq!(perf.values()[[i, 0, 0]], want, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_failed_iterations_are_missing() {
        struct Never;
        impl crate::model::Model for Never {
            fn name(&self) -> &str {
                "Never"
            }
            fn response_types(&self) -> &[crate::data::ResponseKind] {
                &[crate::data::ResponseKind::Numeric]
            }
            fn fit(&self, _: &Dataset, _: &crate::model::Params) -> Result<Box<dyn crate::model::Fitted>> {
                Err(TuneError::numerical_error("nope"))
            }
        }
        let data = Dataset::new(Array2::zeros((6, 1)), Response::Numeric(Array1::zeros(6))).unwrap();
        let control = Control::cv(3, 1).with_failure(FailurePolicy::Lenient);
        let res = resample(&data, &ModelSpec::new(Never), &control).unwrap();
        let perf = performance(&res, None).unwrap();
        assert!(perf.values().iter().all(|v| v.is_nan()));
        assert_eq!(summary(&perf, None).unwrap().missing[[0, 0]], 3);
    }
}
