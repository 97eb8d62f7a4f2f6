//! Resampling controller: turns a [`Control`] into train/test index sets,
//! fits and predicts each one, and collects the results by iteration.
//!
//! All randomness (fold labels, bootstrap draws, split membership and the
//! seed handed to every fit) comes from one `StdRng` seeded from
//! `control.seed` and is drawn up front on the calling thread. Iterations
//! then run on a rayon pool and are collected in index order, so the output
//! doesn't depend on the worker count.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::{
    control::{Control, FailurePolicy, Method},
    data::{Dataset, Response, ResponseKind, Strata},
    error::{TuneError, Result},
    model::{Fitted, ModelSpec},
    prediction::Prediction,
};

/// observed vs predicted for one set of evaluated cases
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub case_ids: Vec<usize>,
    pub observed: Response,
    /// `None` when the fit or predict call failed under the lenient policy
    pub predicted: Option<Prediction>,
    pub weights: Option<Vec<f64>>,
    pub strata: Option<Vec<usize>>,
}

impl Evaluation {
    fn new(data: &Dataset, strata: Option<&[usize]>, indices: &[usize], predicted: Option<Prediction>) -> Self {
        Self {
            case_ids: data.ids().to_vec(),
            observed: data.response().clone(),
            predicted,
            weights: data.weights().map(|w| w.to_vec()),
            strata: strata.map(|s| indices.iter().map(|&i| s[i]).collect()),
        }
    }

    pub fn n_cases(&self) -> usize {
        self.case_ids.len()
    }
}

/// one resample iteration of one model
#[derive(Debug, Clone)]
pub struct ResampleRecord {
    pub iteration: usize,
    pub label: String,
    pub seed: u64,
    /// held-out (or full-data) predictions
    pub test: Evaluation,
    /// predictions on the training cases; optimism methods only
    pub train: Option<Evaluation>,
    pub error: Option<TuneError>,
}

/// all iterations of one model
#[derive(Debug, Clone)]
pub struct ModelResamples {
    pub name: String,
    pub records: Vec<ResampleRecord>,
    /// full-data fit predicted on the full data; optimism methods only
    pub apparent: Option<Evaluation>,
}

/// resampled predictions for one or more models under a single control
#[derive(Debug, Clone)]
pub struct Resamples {
    pub(crate) models: Vec<ModelResamples>,
    pub(crate) control: Control,
    pub(crate) strata: Option<Strata>,
    pub(crate) kind: ResponseKind,
}

impl Resamples {
    pub fn models(&self) -> &[ModelResamples] {
        &self.models
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn strata(&self) -> Option<&Strata> {
        self.strata.as_ref()
    }

    pub fn response_kind(&self) -> ResponseKind {
        self.kind
    }

    /// iteration labels, shared by every model
    pub fn iteration_labels(&self) -> Vec<String> {
        self.models
            .first()
            .map(|m| m.records.iter().map(|r| r.label.clone()).collect())
            .unwrap_or_default()
    }

    pub fn n_failed(&self) -> usize {
        self.models
            .iter()
            .flat_map(|m| &m.records)
            .filter(|r| r.error.is_some())
            .count()
    }
}

/// train/test cases + fit seed for one iteration
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IterationPlan {
    pub label: String,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    pub seed: u64,
}

/// every iteration of a control on `n` cases, plus the seed of the apparent fit
pub(crate) fn plan_iterations(control: &Control, n: usize, strata: Option<&[usize]>) -> (Vec<IterationPlan>, u64) {
    let mut rng = StdRng::seed_from_u64(control.seed);
    let all: Vec<usize> = (0..n).collect();
    let mut sets: Vec<(String, Vec<usize>, Vec<usize>)> = Vec::new();

    match control.method {
        Method::CV { folds, repeats } | Method::CVOptimism { folds, repeats } => {
            for rep in 0..repeats {
                let fold_of = assign_folds(n, folds, strata, &mut rng);
                for fold in 0..folds {
                    let (test, train): (Vec<usize>, Vec<usize>) = all.iter().copied().partition(|&i| fold_of[i] == fold);
                    sets.push((format!("Rep{}.Fold{}", rep + 1, fold + 1), train, test));
                }
            }
        }
        Method::Boot { samples } | Method::OOB { samples } | Method::BootOptimism { samples } => {
            for b in 0..samples {
                let train = bootstrap_sample(n, strata, &mut rng);
                let test = if matches!(control.method, Method::OOB { .. }) {
                    let mut in_bag = vec![false; n];
                    train.iter().for_each(|&i| in_bag[i] = true);
                    all.iter().copied().filter(|&i| !in_bag[i]).collect()
                } else {
                    all.clone()
                };
                sets.push((format!("Boot{}", b + 1), train, test));
            }
        }
        Method::Split { prop } => {
            let (train, test) = split_cases(n, prop, strata, &mut rng);
            sets.push(("Split".to_string(), train, test));
        }
        Method::Train => sets.push(("Train".to_string(), all.clone(), all.clone())),
    }

    let plans = sets
        .into_iter()
        .map(|(label, train, test)| IterationPlan { label, train, test, seed: rng.r#gen() })
        .collect();
    (plans, rng.r#gen())
}

/// cases grouped by stratum (a single group when unstratified), each shuffled
fn shuffled_groups(n: usize, strata: Option<&[usize]>, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = match strata {
        Some(labels) => {
            let n_groups = labels.iter().copied().max().map_or(0, |m| m + 1);
            let mut groups = vec![Vec::new(); n_groups];
            for (i, &s) in labels.iter().enumerate() {
                groups[s].push(i);
            }
            groups.retain(|g| !g.is_empty());
            groups
        }
        None => vec![(0..n).collect()],
    };
    for g in &mut groups {
        g.shuffle(rng);
    }
    groups
}

/// fold label per case; strata are dealt round-robin so every fold gets
/// its share of each stratum and fold sizes differ by at most one
fn assign_folds(n: usize, folds: usize, strata: Option<&[usize]>, rng: &mut StdRng) -> Vec<usize> {
    let mut fold_of = vec![0; n];
    let order = shuffled_groups(n, strata, rng).concat();
    for (pos, i) in order.into_iter().enumerate() {
        fold_of[i] = pos % folds;
    }
    fold_of
}

fn bootstrap_sample(n: usize, strata: Option<&[usize]>, rng: &mut StdRng) -> Vec<usize> {
    match strata {
        None => (0..n).map(|_| rng.gen_range(0..n)).collect(),
        Some(_) => shuffled_groups(n, strata, rng)
            .into_iter()
            .flat_map(|g| {
                let draws: Vec<usize> = (0..g.len()).map(|_| g[rng.gen_range(0..g.len())]).collect();
                draws
            })
            .collect(),
    }
}

fn split_cases(n: usize, prop: f64, strata: Option<&[usize]>, rng: &mut StdRng) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for g in shuffled_groups(n, strata, rng) {
        let k = ((prop * g.len() as f64).round() as usize).min(g.len());
        train.extend_from_slice(&g[..k]);
        test.extend_from_slice(&g[k..]);
    }
    // at least one case on each side
    if train.is_empty() {
        if let Some(i) = test.pop() {
            train.push(i);
        }
    } else if test.is_empty() {
        if let Some(i) = train.pop() {
            test.push(i);
        }
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// map `f` over `0..n`, on a pool of `workers` threads when workers > 1;
/// results always come back in index order
pub(crate) fn run_indexed<T, F>(workers: usize, n: usize, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if workers <= 1 {
        return Ok((0..n).map(f).collect());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| TuneError::configuration(format!("failed to build thread pool: {}", e)))?;
    Ok(pool.install(|| (0..n).into_par_iter().map(f).collect()))
}

/// the stratification variable a control asks for on this data
pub(crate) fn resolve_strata(data: &Dataset, control: &Control) -> Option<Strata> {
    match data.strata() {
        Some(s) => Some(s.clone()),
        None if control.strata.from_response => {
            Strata::from_response(data.response(), control.strata.breaks)
        }
        None => None,
    }
}

fn check_prediction(pred: &Prediction, on: &Dataset) -> Result<()> {
    let want = on.response().kind();
    if pred.kind() != want {
        return Err(TuneError::configuration(
            format!("model predicted {:?} values for a {:?} response", pred.kind(), want)
        ));
    }
    if pred.len() != on.n_cases() {
        return Err(TuneError::invalid_dimensions(
            format!("{} predictions for {} cases", pred.len(), on.n_cases())
        ));
    }
    Ok(())
}

fn predict_on(fitted: &dyn Fitted, on: &Dataset, times: Option<&[f64]>) -> Result<Prediction> {
    let pred = fitted.predict(on.x(), times)?;
    check_prediction(&pred, on)?;
    Ok(pred)
}

struct Runner<'a> {
    data: &'a Dataset,
    spec: &'a ModelSpec,
    control: &'a Control,
    strata: Option<&'a [usize]>,
}

impl Runner<'_> {
    fn times(&self) -> Option<&[f64]> {
        self.control.times.as_deref()
    }

    fn run(&self, iteration: usize, plan: &IterationPlan) -> Result<ResampleRecord> {
        let train_data = self.data.subset(&plan.train)?;
        let test_data = self.data.subset(&plan.test)?;
        let optimism = self.control.method.is_optimism();

        let outcome = self.spec.fit(&train_data, plan.seed).and_then(|fitted| {
            let test = predict_on(fitted.as_ref(), &test_data, self.times())?;
            let train = if optimism {
                Some(predict_on(fitted.as_ref(), &train_data, self.times())?)
            } else {
                None
            };
            Ok((test, train))
        });

        let (test_pred, train_pred, error) = match outcome {
            Ok((test, train)) => (Some(test), train, None),
            Err(e) => (None, None, Some(TuneError::model_fit(iteration, e.to_string()))),
        };
        if let Some(e) = &error {
            log::debug!("{} {}: {}", self.spec.name(), plan.label, e);
        }

        Ok(ResampleRecord {
            iteration,
            label: plan.label.clone(),
            seed: plan.seed,
            test: Evaluation::new(&test_data, self.strata, &plan.test, test_pred),
            train: optimism.then(|| Evaluation::new(&train_data, self.strata, &plan.train, train_pred)),
            error,
        })
    }

    /// full-data fit; counted as the iteration after the last resample
    fn apparent(&self, iteration: usize, seed: u64) -> Result<Evaluation> {
        let all: Vec<usize> = (0..self.data.n_cases()).collect();
        let predicted = self
            .spec
            .fit(self.data, seed)
            .and_then(|fitted| predict_on(fitted.as_ref(), self.data, self.times()));
        let predicted = match (predicted, self.control.failure) {
            (Ok(p), _) => Some(p),
            (Err(e), FailurePolicy::Strict) => {
                return Err(TuneError::model_fit(iteration, format!("apparent fit: {}", e)))
            }
            (Err(e), FailurePolicy::Lenient) => {
                log::warn!("{}: apparent fit failed, optimism-corrected metrics will be missing: {}", self.spec.name(), e);
                None
            }
        };
        Ok(Evaluation::new(self.data, self.strata, &all, predicted))
    }
}

/// run `control`'s resampling protocol for one model
pub fn resample(data: &Dataset, spec: &ModelSpec, control: &Control) -> Result<Resamples> {
    control.validate_for(data.n_cases())?;
    let kind = data.response().kind();
    if !spec.supports(kind) {
        return Err(TuneError::configuration(
            format!("model {} doesn't handle {:?} responses", spec.name(), kind)
        ));
    }

    let strata = resolve_strata(data, control);
    let labels = strata.as_ref().map(|s| s.labels(control.strata.breaks));
    let (plans, apparent_seed) = plan_iterations(control, data.n_cases(), labels.as_deref());

    log::info!(
        "resampling {} w/ {:?}: {} iterations on {} cases, {} workers",
        spec.name(), control.method, plans.len(), data.n_cases(), control.workers.max(1)
    );

    let runner = Runner { data, spec, control, strata: labels.as_deref() };
    let records = run_indexed(control.workers, plans.len(), |i| runner.run(i, &plans[i]))?
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let failed: Vec<&ResampleRecord> = records.iter().filter(|r| r.error.is_some()).collect();
    if let Some(first) = failed.first() {
        match control.failure {
            FailurePolicy::Strict => {
                return Err(first.error.clone().unwrap_or_else(|| TuneError::model_fit(first.iteration, "unknown failure")));
            }
            FailurePolicy::Lenient => log::warn!(
                "{}: {} of {} iterations failed, their metrics will be missing",
                spec.name(), failed.len(), records.len()
            ),
        }
    }

    let apparent = if control.method.is_optimism() {
        Some(runner.apparent(plans.len(), apparent_seed)?)
    } else {
        None
    };

    log::info!("finished resampling {}", spec.name());
    Ok(Resamples {
        models: vec![ModelResamples { name: spec.name().to_string(), records, apparent }],
        control: control.clone(),
        strata,
        kind,
    })
}

/// resample several models under the same control and combine the results
pub fn resample_models(data: &Dataset, specs: &[ModelSpec], control: &Control) -> Result<Resamples> {
    if specs.is_empty() {
        return Err(TuneError::configuration("no models to resample"));
    }
    let parts = specs
        .iter()
        .map(|spec| resample(data, spec, control))
        .collect::<Result<Vec<_>>>()?;
    Resamples::combine(&parts.iter().collect::<Vec<_>>())
}
