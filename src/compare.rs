//! Combining independent runs, pairwise model differences and paired
//! t-tests with multiplicity adjustment.

use itertools::Itertools;
use ndarray::{s, Array2, Array3};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use crate::{
    error::{TuneError, Result},
    performance::{unique_names, PerformanceArray},
    resample::Resamples,
};

impl Resamples {
    /// one multi-model result from runs w/ identical control and strata;
    /// the inputs are left as they are
    pub fn combine(parts: &[&Resamples]) -> Result<Resamples> {
        let Some((first, rest)) = parts.split_first() else {
            return Err(TuneError::configuration("nothing to combine"));
        };
        for other in rest {
            if other.control != first.control {
                return Err(TuneError::structural_mismatch("resamples have different controls"));
            }
            if other.strata != first.strata {
                return Err(TuneError::structural_mismatch("resamples have different stratification"));
            }
            if other.kind != first.kind {
                return Err(TuneError::structural_mismatch(
                    format!("can't combine {:?} and {:?} responses", first.kind, other.kind)
                ));
            }
            if other.iteration_labels() != first.iteration_labels() {
                return Err(TuneError::structural_mismatch("resamples have different iterations"));
            }
        }

        let mut models: Vec<_> = parts.iter().flat_map(|r| r.models.iter().cloned()).collect();
        let names = unique_names(models.iter().map(|m| m.name.clone()).collect());
        for (model, name) in models.iter_mut().zip(names) {
            model.name = name;
        }
        Ok(Resamples {
            models,
            control: first.control.clone(),
            strata: first.strata.clone(),
            kind: first.kind,
        })
    }
}

impl PerformanceArray {
    /// model-dimension concatenation of several arrays
    pub fn combine(parts: &[&PerformanceArray]) -> Result<PerformanceArray> {
        let Some((first, rest)) = parts.split_first() else {
            return Err(TuneError::configuration("nothing to combine"));
        };
        rest.iter().try_fold((*first).clone(), |acc, p| acc.append(p))
    }
}

/// pairwise model differences, one "a - b" series per unordered pair
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceDiff {
    /// iteration x metric x pair, pairs in place of models
    pub diffs: PerformanceArray,
    pub models: Vec<String>,
    pub pairs: Vec<(usize, usize)>,
}

/// all C(C-1)/2 differences `model_i - model_j`, i < j
pub fn diff(perf: &PerformanceArray) -> Result<PerformanceDiff> {
    let n_models = perf.models.len();
    if n_models < 2 {
        return Err(TuneError::configuration("need at least two models to difference"));
    }
    let pairs: Vec<(usize, usize)> = (0..n_models).tuple_combinations().collect();
    let (n_iter, n_metrics, _) = perf.values.dim();

    let mut values = Array3::zeros((n_iter, n_metrics, pairs.len()));
    for (p, &(i, j)) in pairs.iter().enumerate() {
        let d = &perf.values.slice(s![.., .., i]) - &perf.values.slice(s![.., .., j]);
        values.slice_mut(s![.., .., p]).assign(&d);
    }

    let labels = pairs
        .iter()
        .map(|&(i, j)| format!("{} - {}", perf.models[i], perf.models[j]))
        .collect();
    let diffs = PerformanceArray {
        values,
        iterations: perf.iterations.clone(),
        metrics: perf.metrics.clone(),
        maximize: perf.maximize.clone(),
        models: labels,
    };
    Ok(PerformanceDiff { diffs, models: perf.models.clone(), pairs })
}

/// multiple-comparison adjustment of p-values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PAdjust {
    #[default]
    Holm,
    Hochberg,
    Bonferroni,
    /// Benjamini-Hochberg
    BH,
    /// Benjamini-Yekutieli
    BY,
    None,
}

/// adjust a family of p-values; NaNs stay NaN and don't count toward the family size
pub fn p_adjust(p: &[f64], method: PAdjust) -> Vec<f64> {
    let idx: Vec<usize> = (0..p.len()).filter(|&i| !p[i].is_nan()).collect();
    let m = idx.len();
    let mut out = p.to_vec();
    if m == 0 || method == PAdjust::None {
        return out;
    }
    let mf = m as f64;

    // ascending order of the non-missing p-values
    let mut order = idx.clone();
    order.sort_by(|&a, &b| p[a].total_cmp(&p[b]));

    match method {
        PAdjust::Bonferroni => {
            for &i in &idx {
                out[i] = (mf * p[i]).min(1.0);
            }
        }
        PAdjust::Holm => {
            let mut running = 0.0f64;
            for (k, &i) in order.iter().enumerate() {
                running = running.max(((mf - k as f64) * p[i]).min(1.0));
                out[i] = running;
            }
        }
        PAdjust::Hochberg | PAdjust::BH | PAdjust::BY => {
            let q: f64 = match method {
                PAdjust::BY => (1..=m).map(|i| 1.0 / i as f64).sum(),
                _ => 1.0,
            };
            let mut running = 1.0f64;
            for (k, &i) in order.iter().enumerate().rev() {
                let factor = match method {
                    PAdjust::Hochberg => mf - k as f64,
                    _ => q * mf / (k as f64 + 1.0),
                };
                running = running.min((factor * p[i]).min(1.0));
                out[i] = running;
            }
        }
        PAdjust::None => {}
    }
    out
}

/// paired t-test result: two model x model matrices per metric.
/// `p_values` is symmetric w/ NaN on the diagonal; `mean_diffs[i][j]` is
/// the mean of `model_i - model_j`, so it's antisymmetric
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceDiffTest {
    pub metrics: Vec<String>,
    pub models: Vec<String>,
    pub p_values: Vec<Array2<f64>>,
    pub mean_diffs: Vec<Array2<f64>>,
    pub adjust: PAdjust,
}

impl PerformanceDiffTest {
    fn indices(&self, metric: &str, a: &str, b: &str) -> Option<(usize, usize, usize)> {
        let k = self.metrics.iter().position(|m| m == metric)?;
        let i = self.models.iter().position(|m| m == a)?;
        let j = self.models.iter().position(|m| m == b)?;
        Some((k, i, j))
    }

    pub fn p_value(&self, metric: &str, a: &str, b: &str) -> Option<f64> {
        self.indices(metric, a, b).map(|(k, i, j)| self.p_values[k][[i, j]])
    }

    pub fn mean_diff(&self, metric: &str, a: &str, b: &str) -> Option<f64> {
        self.indices(metric, a, b).map(|(k, i, j)| self.mean_diffs[k][[i, j]])
    }
}

/// two-sided one-sample t-test of paired differences against 0
fn paired_t_test(diffs: impl Iterator<Item = f64>) -> (f64, f64) {
    let d: Vec<f64> = diffs.filter(|v| !v.is_nan()).collect();
    let n = d.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let nf = n as f64;
    let mean = d.iter().sum::<f64>() / nf;
    if n < 2 {
        return (mean, f64::NAN);
    }
    let sd = (d.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (nf - 1.0)).sqrt();
    if sd == 0.0 {
        // constant differences: no evidence either way when they're all 0
        return (mean, if mean == 0.0 { 1.0 } else { 0.0 });
    }
    let t = mean / (sd / nf.sqrt());
    let p = match StudentsT::new(0.0, 1.0, nf - 1.0) {
        Ok(dist) => 2.0 * (1.0 - dist.cdf(t.abs())),
        Err(_) => f64::NAN,
    };
    (mean, p)
}

/// paired t-tests of every model pair on every metric, p-values adjusted
/// across the pairs of each metric
pub fn t_test(diff: &PerformanceDiff, adjust: PAdjust) -> PerformanceDiffTest {
    let n_models = diff.models.len();
    let values = &diff.diffs.values;
    let mut p_values = Vec::with_capacity(diff.diffs.metrics.len());
    let mut mean_diffs = Vec::with_capacity(diff.diffs.metrics.len());

    for k in 0..diff.diffs.metrics.len() {
        let tests: Vec<(f64, f64)> = (0..diff.pairs.len())
            .map(|p| paired_t_test(values.slice(s![.., k, p]).iter().copied()))
            .collect();
        let raw: Vec<f64> = tests.iter().map(|t| t.1).collect();
        let adjusted = p_adjust(&raw, adjust);

        let mut pv = Array2::from_elem((n_models, n_models), f64::NAN);
        let mut md = Array2::zeros((n_models, n_models));
        for (p, &(i, j)) in diff.pairs.iter().enumerate() {
            pv[[i, j]] = adjusted[p];
            pv[[j, i]] = adjusted[p];
            md[[i, j]] = tests[p].0;
            md[[j, i]] = -tests[p].0;
        }
        p_values.push(pv);
        mean_diffs.push(md);
    }

    PerformanceDiffTest {
        metrics: diff.diffs.metrics.clone(),
        models: diff.models.clone(),
        p_values,
        mean_diffs,
        adjust,
    }
}
