//! Named performance metrics: observed response x prediction -> scalar.
//!
//! A metric that isn't defined for the prediction it's handed (a survival
//! brier score on predicted means, accuracy on a numeric response, a
//! c-index without comparable pairs) returns `NaN` so it shows up as a
//! missing value downstream. Length mismatches are real errors.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayView1, Axis};
use crate::{
    data::{time_order, Response, ResponseKind, SurvivalTime},
    error::{TuneError, Result},
    prediction::{Prediction, SurvMatrix},
};

/// extra inputs a metric may use
#[derive(Debug, Clone, Copy)]
pub struct MetricContext<'a> {
    pub cutoff: f64,                 // binary class probability threshold
    pub weights: Option<&'a [f64]>, // case weights of the evaluated cases
}

impl Default for MetricContext<'_> {
    fn default() -> Self {
        Self { cutoff: 0.5, weights: None }
    }
}

impl<'a> MetricContext<'a> {
    fn weight(&self, i: usize) -> f64 {
        self.weights.map_or(1.0, |w| w[i])
    }
}

pub type MetricFn =
    Arc<dyn Fn(&Response, &Prediction, &MetricContext<'_>) -> Result<f64> + Send + Sync>;

/// a named metric with its polarity
#[derive(Clone)]
pub struct Metric {
    name: String,
    maximize: bool,
    f: MetricFn,
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("name", &self.name)
            .field("maximize", &self.maximize)
            .finish()
    }
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        maximize: bool,
        f: impl Fn(&Response, &Prediction, &MetricContext<'_>) -> Result<f64> + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), maximize, f: Arc::new(f) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// true when bigger values are better
    pub fn maximize(&self) -> bool {
        self.maximize
    }

    pub fn compute(&self, observed: &Response, predicted: &Prediction, ctx: &MetricContext<'_>) -> Result<f64> {
        if observed.len() != predicted.len() {
            return Err(TuneError::invalid_dimensions(
                format!("{} observed cases vs {} predictions", observed.len(), predicted.len())
            ));
        }
        if let Some(w) = ctx.weights {
            if w.len() != observed.len() {
                return Err(TuneError::invalid_dimensions(
                    format!("{} weights for {} cases", w.len(), observed.len())
                ));
            }
        }
        (self.f)(observed, predicted, ctx)
    }

    pub fn rmse() -> Self {
        Self::new("rmse", false, |obs, pred, ctx| {
            Ok(squared_errors(obs, pred, ctx, |e| e * e).sqrt())
        })
    }

    pub fn mae() -> Self {
        Self::new("mae", false, |obs, pred, ctx| Ok(squared_errors(obs, pred, ctx, f64::abs)))
    }

    pub fn r2() -> Self {
        Self::new("r2", true, |obs, pred, ctx| Ok(r_squared(obs, pred, ctx)))
    }

    pub fn accuracy() -> Self {
        Self::new("accuracy", true, |obs, pred, ctx| Ok(accuracy(obs, pred, ctx)))
    }

    /// multiclass brier for factors, ipcw brier averaged over the grid for survival curves
    pub fn brier() -> Self {
        Self::new("brier", false, |obs, pred, ctx| match (obs, pred) {
            (Response::Survival(y), Prediction::SurvCurves(m)) => Ok(survival_brier(y, m, ctx)),
            _ => Ok(class_brier(obs, pred, ctx)),
        })
    }

    pub fn cross_entropy() -> Self {
        Self::new("cross_entropy", false, |obs, pred, ctx| Ok(cross_entropy(obs, pred, ctx)))
    }

    /// harrell's concordance between predicted survival and observed times
    pub fn cindex() -> Self {
        Self::new("cindex", true, |obs, pred, ctx| {
            let (Response::Survival(y), Some(risks)) = (obs, survival_risks(pred)) else {
                return Ok(f64::NAN);
            };
            Ok(harrell_c_index(risks.view(), y, ctx))
        })
    }
}

/// default metric set per response kind; the first one drives selection
pub fn default_metrics(kind: ResponseKind) -> Vec<Metric> {
    match kind {
        ResponseKind::Numeric | ResponseKind::Matrix => vec![Metric::rmse(), Metric::r2(), Metric::mae()],
        ResponseKind::Factor => vec![Metric::brier(), Metric::accuracy(), Metric::cross_entropy()],
        ResponseKind::Survival => vec![Metric::cindex(), Metric::brier(), Metric::rmse()],
    }
}

fn weighted_mean(values: impl Iterator<Item = (f64, f64)>) -> f64 {
    let (mut num, mut den) = (0.0, 0.0);
    for (v, w) in values {
        num += w * v;
        den += w;
    }
    if den > 0.0 { num / den } else { f64::NAN }
}

/// weighted mean of `loss(observed - predicted)`; survival means are
/// scored against event cases only
fn squared_errors(obs: &Response, pred: &Prediction, ctx: &MetricContext<'_>, loss: impl Fn(f64) -> f64) -> f64 {
    match (obs, pred) {
        (Response::Numeric(y), Prediction::Numeric(p)) => {
            weighted_mean((0..y.len()).map(|i| (loss(y[i] - p[i]), ctx.weight(i))))
        }
        (Response::Matrix(y), Prediction::Matrix(p)) if y.dim() == p.dim() => weighted_mean(
            y.indexed_iter().map(|((i, j), &v)| (loss(v - p[[i, j]]), ctx.weight(i))),
        ),
        (Response::Survival(y), Prediction::SurvMeans(p)) => weighted_mean(
            (0..y.len())
                .filter(|&i| y[i].is_event())
                .map(|i| (loss(y[i].time - p[i]), ctx.weight(i))),
        ),
        _ => f64::NAN,
    }
}

fn r_squared(obs: &Response, pred: &Prediction, ctx: &MetricContext<'_>) -> f64 {
    let columns: Vec<(ArrayView1<f64>, ArrayView1<f64>)> = match (obs, pred) {
        (Response::Numeric(y), Prediction::Numeric(p)) => vec![(y.view(), p.view())],
        (Response::Matrix(y), Prediction::Matrix(p)) if y.dim() == p.dim() => {
            y.axis_iter(Axis(1)).zip(p.axis_iter(Axis(1))).collect()
        }
        _ => return f64::NAN,
    };
    let (mut sse, mut sst) = (0.0, 0.0);
    for (y, p) in columns {
        let mean = weighted_mean((0..y.len()).map(|i| (y[i], ctx.weight(i))));
        for i in 0..y.len() {
            sse += ctx.weight(i) * (y[i] - p[i]).powi(2);
            sst += ctx.weight(i) * (y[i] - mean).powi(2);
        }
    }
    if sst > 0.0 { 1.0 - sse / sst } else { f64::NAN }
}

fn class_probs<'a>(obs: &'a Response, pred: &'a Prediction) -> Option<(&'a [usize], ndarray::ArrayView2<'a, f64>)> {
    match (obs, pred) {
        (Response::Factor { codes, levels, .. }, Prediction::Factor { probs, .. })
            if probs.ncols() == levels.len() => Some((codes.as_slice(), probs.view())),
        _ => None,
    }
}

fn accuracy(obs: &Response, pred: &Prediction, ctx: &MetricContext<'_>) -> f64 {
    let Some((codes, probs)) = class_probs(obs, pred) else {
        return f64::NAN;
    };
    let predicted_class = |i: usize| -> usize {
        let row = probs.row(i);
        if row.len() == 2 {
            return (row[1] > ctx.cutoff) as usize;
        }
        // first max wins
        row.iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (k, &p)| if p > best.1 { (k, p) } else { best })
            .0
    };
    weighted_mean((0..codes.len()).map(|i| ((predicted_class(i) == codes[i]) as u8 as f64, ctx.weight(i))))
}

fn class_brier(obs: &Response, pred: &Prediction, ctx: &MetricContext<'_>) -> f64 {
    let Some((codes, probs)) = class_probs(obs, pred) else {
        return f64::NAN;
    };
    weighted_mean((0..codes.len()).map(|i| {
        let score: f64 = probs
            .row(i)
            .iter()
            .enumerate()
            .map(|(k, &p)| (p - (k == codes[i]) as u8 as f64).powi(2))
            .sum();
        (score, ctx.weight(i))
    }))
}

fn cross_entropy(obs: &Response, pred: &Prediction, ctx: &MetricContext<'_>) -> f64 {
    let Some((codes, probs)) = class_probs(obs, pred) else {
        return f64::NAN;
    };
    let eps = 1e-15;
    weighted_mean((0..codes.len()).map(|i| (-probs[[i, codes[i]]].clamp(eps, 1.0).ln(), ctx.weight(i))))
}

/// risk score per case from a survival prediction: shorter expected survival = higher risk
fn survival_risks(pred: &Prediction) -> Option<Array1<f64>> {
    match pred {
        Prediction::SurvMeans(m) => Some(m.mapv(|v| -v)),
        Prediction::SurvCurves(m) => Some(m.mean_times().mapv(|v| -v)),
        _ => None,
    }
}

/// Harrell's C-index with tie handling; pairs are weighted by w_i * w_j
pub fn harrell_c_index(risk_scores: ArrayView1<f64>, y: &[SurvivalTime], ctx: &MetricContext<'_>) -> f64 {
    if risk_scores.iter().any(|r| r.is_nan()) {
        return f64::NAN;
    }
    let n = y.len();
    let mut concordant = 0.0;
    let mut discordant = 0.0;
    let mut tied_risk = 0.0;

    for i in 0..n {
        if !y[i].is_event() {
            continue;
        }
        for j in 0..n {
            if i == j {
                continue;
            }
            // j is comparable to i if j outlived i (event or censored)
            if y[j].time > y[i].time || (!y[j].is_event() && y[j].time >= y[i].time) {
                let w = ctx.weight(i) * ctx.weight(j);
                if risk_scores[i] > risk_scores[j] {
                    concordant += w;
                } else if risk_scores[i] < risk_scores[j] {
                    discordant += w;
                } else {
                    tied_risk += w;
                }
            }
        }
    }

    let total_pairs = concordant + discordant + tied_risk;
    if total_pairs == 0.0 {
        return f64::NAN;
    }
    (concordant + 0.5 * tied_risk) / total_pairs
}

/// Kaplan-Meier estimate of the censoring distribution G(t) = P(C > t)
#[derive(Debug, Clone)]
pub(crate) struct CensoringCurve {
    times: Vec<f64>,
    surv: Vec<f64>,
}

impl CensoringCurve {
    pub(crate) fn fit(y: &[SurvivalTime], weights: impl Fn(usize) -> f64) -> Self {
        let order = time_order(y);
        let mut at_risk: f64 = order.iter().map(|&i| weights(i)).sum();
        let mut times = Vec::new();
        let mut surv = Vec::new();
        let mut prob = 1.0;

        let mut start = 0;
        while start < order.len() {
            let t = y[order[start]].time;
            let mut end = start;
            let (mut leaving, mut censored) = (0.0, 0.0);
            while end < order.len() && y[order[end]].time == t {
                let i = order[end];
                leaving += weights(i);
                if !y[i].is_event() {
                    censored += weights(i);
                }
                end += 1;
            }
            if censored > 0.0 && at_risk > 0.0 {
                prob *= 1.0 - censored / at_risk;
                times.push(t);
                surv.push(prob);
            }
            at_risk -= leaving;
            start = end;
        }
        Self { times, surv }
    }

    /// G(t)
    pub(crate) fn at(&self, t: f64) -> f64 {
        let idx = self.times.partition_point(|&x| x <= t);
        if idx == 0 { 1.0 } else { self.surv[idx - 1] }
    }

    /// G(t-), censoring strictly before t
    pub(crate) fn before(&self, t: f64) -> f64 {
        let idx = self.times.partition_point(|&x| x < t);
        if idx == 0 { 1.0 } else { self.surv[idx - 1] }
    }
}

/// inverse-probability-of-censoring weighted brier score, averaged over
/// the prediction times of the matrix
pub fn survival_brier(y: &[SurvivalTime], predicted: &SurvMatrix, ctx: &MetricContext<'_>) -> f64 {
    let probs = predicted.to_probs();
    let censoring = CensoringCurve::fit(y, |i| ctx.weight(i));

    let scores: Vec<f64> = probs
        .times()
        .iter()
        .enumerate()
        .map(|(j, &t)| {
            weighted_mean((0..y.len()).map(|i| {
                let s = probs.values()[[i, j]];
                let score = if y[i].time <= t && y[i].is_event() {
                    let g = censoring.before(y[i].time);
                    if g > 0.0 { s * s / g } else { 0.0 }
                } else if y[i].time > t {
                    let g = censoring.at(t);
                    if g > 0.0 { (1.0 - s).powi(2) / g } else { 0.0 }
                } else {
                    0.0 // censored before t: carried by the weights of the others
                };
                (score, ctx.weight(i))
            }))
        })
        .collect();

    if scores.is_empty() {
        return f64::NAN;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}
