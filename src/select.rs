//! Model selection and tuning: resample every candidate under one control,
//! rank them by a summary statistic of one metric, refit the winner on the
//! full data.

use itertools::Itertools;
use ndarray::{s, Array1, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::{
    data::{Dataset, ResponseKind},
    error::{TuneError, Result},
    metrics::Metric,
    model::{FitContext, Fitted, Model, ModelSpec, ParamSet, ParamValue, Params},
    performance::{performance_with_cutoff, PerformanceArray, Statistic},
    prediction::Prediction,
    resample::resample_models,
    settings::Settings,
};

/// bookkeeping from one selection run
#[derive(Debug, Clone)]
pub struct TrainBits {
    /// candidate labels, in enumeration order
    pub candidates: Vec<String>,
    /// grid values per candidate (empty for model lists)
    pub params: Vec<Vec<(String, ParamValue)>>,
    pub performance: PerformanceArray,
    pub selected: usize,
    /// selection statistic per candidate
    pub values: Vec<f64>,
    pub metric: String,
    pub maximize: bool,
}

impl TrainBits {
    pub fn selected_label(&self) -> &str {
        &self.candidates[self.selected]
    }

    pub fn selected_params(&self) -> &[(String, ParamValue)] {
        &self.params[self.selected]
    }
}

/// index of the best candidate on `metric` (first metric if `None`):
/// max or min of `stat` by the metric's polarity. first occurrence wins
/// ties and NaN candidates are skipped
pub fn select_best(
    perf: &PerformanceArray,
    metric: Option<&str>,
    stat: &Statistic,
) -> Result<(usize, Vec<f64>, usize)> {
    let k = match metric {
        Some(name) => perf.metric_index(name)?,
        None if perf.metrics().is_empty() => return Err(TuneError::configuration("no metrics to select on")),
        None => 0,
    };
    let maximize = perf.maximize()[k];
    let values: Vec<f64> = (0..perf.models().len())
        .map(|m| stat.apply(perf.values().slice(s![.., k, m]).iter().copied()))
        .collect();

    let mut best: Option<usize> = None;
    for (m, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        let better = match best {
            None => true,
            Some(b) if maximize => v > values[b],
            Some(b) => v < values[b],
        };
        if better {
            best = Some(m);
        }
    }
    let best = best.ok_or_else(|| {
        TuneError::numerical_error(format!("no candidate has a usable {} value", perf.metrics()[k]))
    })?;
    Ok((k, values, best))
}

/// trained winner + the run that picked it
pub struct SelectionFit {
    fitted: Box<dyn Fitted>,
    winner: ModelSpec,
    bits: TrainBits,
}

impl std::fmt::Debug for SelectionFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionFit")
            .field("winner", &self.winner)
            .field("bits", &self.bits)
            .finish()
    }
}

impl SelectionFit {
    pub fn bits(&self) -> &TrainBits {
        &self.bits
    }

    pub fn winner(&self) -> &ModelSpec {
        &self.winner
    }

    pub fn fitted(&self) -> &dyn Fitted {
        self.fitted.as_ref()
    }
}

impl Fitted for SelectionFit {
    fn predict(&self, x: ArrayView2<f64>, times: Option<&[f64]>) -> Result<Prediction> {
        self.fitted.predict(x, times)
    }

    fn varimp(&self) -> Option<Array1<f64>> {
        self.fitted.varimp()
    }
}

/// shared resample -> summarise -> select -> refit pipeline
#[derive(Debug, Clone, Default)]
struct Selector {
    settings: Settings,
    metrics: Option<Vec<Metric>>,
    metric: Option<String>,
}

impl Selector {
    fn run(
        &self,
        data: &Dataset,
        candidates: Vec<ModelSpec>,
        params: Vec<Vec<(String, ParamValue)>>,
    ) -> Result<SelectionFit> {
        self.settings.validate()?;
        let control = self.settings.control();
        let kind = data.response().kind();

        let candidates: Vec<ModelSpec> = candidates
            .into_iter()
            .map(|spec| self.with_surv_default(spec, kind))
            .collect();

        let resamples = resample_models(data, &candidates, control)?;
        let performance = performance_with_cutoff(&resamples, self.metrics.as_deref(), self.settings.cutoff())?;
        let (k, values, selected) = select_best(&performance, self.metric.as_deref(), self.settings.select_stat())?;

        let winner = candidates[selected].clone();
        log::info!(
            "selected {} of {} candidates: {} ({} {} = {:.6})",
            selected + 1, candidates.len(), performance.models()[selected],
            self.settings.select_stat().name(), performance.metrics()[k], values[selected]
        );
        let fitted = winner
            .fit(data, control.seed)
            .map_err(|e| TuneError::model_fit(0, format!("refit of {} failed: {}", winner.name(), e)))?;

        let bits = TrainBits {
            candidates: performance.models().to_vec(),
            params,
            metric: performance.metrics()[k].clone(),
            maximize: performance.maximize()[k],
            performance,
            selected,
            values,
        };
        Ok(SelectionFit { fitted, winner, bits })
    }

    /// survival candidates that don't pick a distribution get the settings default
    fn with_surv_default(&self, spec: ModelSpec, kind: ResponseKind) -> ModelSpec {
        if kind != ResponseKind::Survival || spec.params().names().any(|n| n == "distr") {
            return spec;
        }
        spec.with_param("distr", self.settings.surv_distr().to_string().as_str())
    }
}

/// pick the best of an explicit list of models
#[derive(Debug, Clone)]
pub struct SelectedModel {
    candidates: Vec<ModelSpec>,
    response_types: Vec<ResponseKind>,
    selector: Selector,
}

impl SelectedModel {
    pub fn new(candidates: Vec<ModelSpec>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(TuneError::configuration("no candidate models"));
        }
        // kinds every candidate can handle
        let response_types = candidates[0]
            .model()
            .response_types()
            .iter()
            .copied()
            .filter(|k| candidates.iter().all(|c| c.supports(*k)))
            .collect::<Vec<_>>();
        if response_types.is_empty() {
            return Err(TuneError::configuration("candidate models share no response type"));
        }
        Ok(Self { candidates, response_types, selector: Selector::default() })
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.selector.settings = settings;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.selector.metrics = Some(metrics);
        self
    }

    /// select on this metric instead of the first one
    pub fn with_selection_metric(mut self, metric: impl Into<String>) -> Self {
        self.selector.metric = Some(metric.into());
        self
    }

    pub fn candidates(&self) -> &[ModelSpec] {
        &self.candidates
    }

    pub fn train(&self, data: &Dataset) -> Result<SelectionFit> {
        let kind = data.response().kind();
        if !self.response_types.contains(&kind) {
            return Err(TuneError::configuration(
                format!("not every candidate handles {:?} responses", kind)
            ));
        }
        let params = vec![Vec::new(); self.candidates.len()];
        self.selector.run(data, self.candidates.clone(), params)
    }
}

impl Model for SelectedModel {
    fn name(&self) -> &str {
        "SelectedModel"
    }

    fn response_types(&self) -> &[ResponseKind] {
        &self.response_types
    }

    fn fit(&self, data: &Dataset, _params: &Params) -> Result<Box<dyn Fitted>> {
        Ok(Box::new(self.train(data)?))
    }
}

/// candidate grid for a tuned model
#[derive(Debug, Clone, PartialEq)]
pub enum TuningGrid {
    /// the model's own grid, `size` values per parameter (settings default if `None`)
    Default { size: Option<usize>, random: Option<usize> },
    /// cartesian product of the given values
    Explicit { values: Vec<(String, Vec<ParamValue>)>, random: Option<usize> },
}

impl Default for TuningGrid {
    fn default() -> Self {
        TuningGrid::Default { size: None, random: None }
    }
}

impl TuningGrid {
    pub fn explicit(values: Vec<(String, Vec<ParamValue>)>) -> Self {
        TuningGrid::Explicit { values, random: None }
    }

    /// evaluate a random subset of `n` grid points instead of all of them
    pub fn with_random(self, n: usize) -> Self {
        match self {
            TuningGrid::Default { size, .. } => TuningGrid::Default { size, random: Some(n) },
            TuningGrid::Explicit { values, .. } => TuningGrid::Explicit { values, random: Some(n) },
        }
    }

    /// grid points in enumeration order (last parameter varies fastest)
    pub fn expand(&self, model: &dyn Model, ctx: &FitContext, default_size: usize, seed: u64) -> Result<Vec<Vec<(String, ParamValue)>>> {
        let (values, random) = match self {
            TuningGrid::Default { size, random } => {
                (model.default_grid(ctx, size.unwrap_or(default_size)), *random)
            }
            TuningGrid::Explicit { values, random } => (values.clone(), *random),
        };
        if let Some((name, _)) = values.iter().find(|(_, v)| v.is_empty()) {
            return Err(TuneError::configuration(format!("no values for tuning parameter {}", name)));
        }
        if values.iter().map(|(n, _)| n).duplicates().next().is_some() {
            return Err(TuneError::configuration("tuning parameter listed twice"));
        }

        let points: Vec<Vec<(String, ParamValue)>> = if values.is_empty() {
            vec![Vec::new()]
        } else {
            values
                .iter()
                .map(|(name, vals)| vals.iter().map(move |v| (name.clone(), v.clone())))
                .multi_cartesian_product()
                .collect()
        };

        match random {
            Some(0) => Err(TuneError::configuration("random grid size must be positive")),
            Some(n) if n < points.len() => {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut keep = rand::seq::index::sample(&mut rng, points.len(), n).into_vec();
                keep.sort_unstable();
                Ok(keep.into_iter().map(|i| points[i].clone()).collect())
            }
            _ => Ok(points),
        }
    }
}

/// one model tuned over a parameter grid
#[derive(Debug, Clone)]
pub struct TunedModel {
    spec: ModelSpec,
    grid: TuningGrid,
    selector: Selector,
}

impl TunedModel {
    pub fn new(spec: ModelSpec) -> Self {
        Self { spec, grid: TuningGrid::default(), selector: Selector::default() }
    }

    pub fn with_grid(mut self, grid: TuningGrid) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.selector.settings = settings;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.selector.metrics = Some(metrics);
        self
    }

    pub fn with_selection_metric(mut self, metric: impl Into<String>) -> Self {
        self.selector.metric = Some(metric.into());
        self
    }

    /// grid points for this data; default grids may depend on its size
    pub fn grid_points(&self, data: &Dataset) -> Result<Vec<Vec<(String, ParamValue)>>> {
        let seed = self.selector.settings.control().seed;
        self.grid.expand(
            self.spec.model().as_ref(),
            &FitContext::from_data(data, seed),
            self.selector.settings.grid_size(),
            seed,
        )
    }

    pub fn train(&self, data: &Dataset) -> Result<SelectionFit> {
        let points = self.grid_points(data)?;
        let candidates = points
            .iter()
            .map(|point| {
                if point.is_empty() {
                    return self.spec.clone();
                }
                let params = point
                    .iter()
                    .fold(ParamSet::new(), |acc, (name, value)| acc.set(name.clone(), value.clone()));
                let label = point.iter().map(|(n, v)| format!("{}={}", n, v)).join(", ");
                self.spec
                    .clone()
                    .with_params(&params)
                    .with_label(format!("{}({})", self.spec.name(), label))
            })
            .collect();
        log::debug!("tuning {} over {} grid points", self.spec.name(), points.len());
        self.selector.run(data, candidates, points)
    }
}

impl Model for TunedModel {
    fn name(&self) -> &str {
        "TunedModel"
    }

    fn response_types(&self) -> &[ResponseKind] {
        self.spec.model().response_types()
    }

    fn fit(&self, data: &Dataset, _params: &Params) -> Result<Box<dyn Fitted>> {
        Ok(Box::new(self.train(data)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Control;
    use crate::cox::CoxModel;
    use crate::data::Response;
    use crate::linear::LinearModel;
    use crate::null_model::NullModel;
    use ndarray::{Array2, Array3};

    fn perf(values: Vec<f64>, maximize: bool) -> PerformanceArray {
        let n_models = values.len() / 2;
        PerformanceArray::new(
            Array3::from_shape_vec((2, 1, n_models), values).unwrap(),
            vec!["Boot1".into(), "Boot2".into()],
            vec![("m".into(), maximize)],
            (0..n_models).map(|i| format!("c{}", i)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_select_best_polarity_ties_and_nan() {
        // iteration-major: [it0: c0 c1 c2], [it1: c0 c1 c2]
        let p = perf(vec![0.7, 0.9, f64::NAN, 0.7, 0.9, f64::NAN], true);
        assert_eq!(select_best(&p, None, &Statistic::Mean).unwrap().2, 1);

        let tie = perf(vec![0.5, 0.5, 0.1, 0.5, 0.5, 0.1], false);
        assert_eq!(select_best(&tie, None, &Statistic::Mean).unwrap().2, 2);
        let tie = perf(vec![0.5, 0.5, 0.9, 0.5, 0.5, 0.9], false);
        assert_eq!(select_best(&tie, None, &Statistic::Mean).unwrap().2, 0);

        let none = perf(vec![f64::NAN, f64::NAN], true);
        assert!(select_best(&none, None, &Statistic::Mean).is_err());
        assert!(select_best(&p, Some("nope"), &Statistic::Mean).is_err());
    }

    #[test]
    fn test_grid_expansion_order_and_random_subset() {
        let grid = TuningGrid::explicit(vec![
            ("a".into(), vec![1i64.into(), 2i64.into()]),
            ("b".into(), vec!["x".into(), "y".into(), "z".into()]),
        ]);
        let ctx = FitContext { n_obs: 10, n_features: 1, seed: 0 };
        let points = grid.expand(&NullModel, &ctx, 3, 0).unwrap();
        assert_eq!(points.len(), 6);
        assert_eq!(points[1], vec![("a".to_string(), ParamValue::Int(1)), ("b".to_string(), ParamValue::Text("y".into()))]);

        let sub = grid.clone().with_random(4).expand(&NullModel, &ctx, 3, 7).unwrap();
        assert_eq!(sub.len(), 4);
        assert!(sub.iter().all(|p| points.contains(p)));
        assert_eq!(sub, grid.clone().with_random(4).expand(&NullModel, &ctx, 3, 7).unwrap());

        let bad = TuningGrid::explicit(vec![("a".into(), vec![])]);
        assert!(bad.expand(&NullModel, &ctx, 3, 0).is_err());
    }

    #[test]
    fn test_default_grid_depends_on_data_size() {
        let ctx_small = FitContext { n_obs: 20, n_features: 2, seed: 0 };
        let ctx_large = FitContext { n_obs: 2000, n_features: 2, seed: 0 };
        let grid = TuningGrid::default();
        let small = grid.expand(&CoxModel::new(), &ctx_small, 4, 0).unwrap();
        let large = grid.expand(&CoxModel::new(), &ctx_large, 4, 0).unwrap();
        assert_eq!(small.len(), 4);
        assert_ne!(small, large);

        // no default grid -> the model as is
        assert_eq!(grid.expand(&NullModel, &ctx_small, 4, 0).unwrap(), vec![Vec::new()]);
    }

    #[test]
    fn test_selected_model_intersects_response_types() {
        let sel = SelectedModel::new(vec![ModelSpec::new(NullModel), ModelSpec::new(LinearModel)]).unwrap();
        assert_eq!(sel.response_types(), &[ResponseKind::Numeric, ResponseKind::Matrix]);
        assert!(SelectedModel::new(vec![ModelSpec::new(LinearModel), ModelSpec::new(CoxModel::new())]).is_err());

        let surv = Dataset::survival(vec![1.0, 2.0, 3.0, 4.0], vec![true; 4], Array2::zeros((4, 1))).unwrap();
        assert!(matches!(sel.train(&surv), Err(TuneError::Configuration { .. })));
    }

    #[test]
    fn test_selected_model_prefers_signal() {
        let n = 40;
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y = Response::Numeric(Array1::from_shape_fn(n, |i| 2.0 * i as f64 + (i % 3) as f64));
        let data = Dataset::new(x.clone(), y).unwrap();

        let settings = Settings::default().with_control(Control::cv(5, 1).with_seed(3));
        let sel = SelectedModel::new(vec![ModelSpec::new(NullModel), ModelSpec::new(LinearModel)])
            .unwrap()
            .with_settings(settings);
        let fit = sel.train(&data).unwrap();
        assert_eq!(fit.bits().selected, 1);
        assert_eq!(fit.bits().metric, "rmse");
        assert!(!fit.bits().maximize);
        assert_eq!(fit.bits().candidates, vec!["NullModel".to_string(), "LinearModel".to_string()]);
        assert!(fit.predict(x.view(), None).is_ok());
    }
}
