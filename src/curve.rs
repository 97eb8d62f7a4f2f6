//! Empirical survival curves from (optionally risk-weighted) right-censored data.
//!
//! Each distinct observed time contributes a hazard increment built from the
//! total risk `W` still at risk, the number of events `d`, the risk mass of the
//! event cases `Wd` and the at-risk count `n`:
//!
//! - Breslow: `d / W`
//! - Efron: `sum_{k<d} 1 / (W - (k/d) Wd)`
//! - Fleming-Harrington: `sum_{k<d} 1 / (W - k W / n)`
//!
//! Survival is `exp(-H)` in all three cases, so the estimators agree exactly
//! whenever no event times are tied.

use serde::{Deserialize, Serialize};
use crate::{
    data::{time_order, validate_survival_times, SurvivalTime},
    error::{TuneError, Result},
};

/// how tied event times enter the baseline hazard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TieMethod {
    Breslow,
    #[default]
    Efron,
    FlemingHarrington,
}

impl std::str::FromStr for TieMethod {
    type Err = TuneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "breslow" => Ok(TieMethod::Breslow),
            "efron" => Ok(TieMethod::Efron),
            "fleming-harrington" | "fh" => Ok(TieMethod::FlemingHarrington),
            other => Err(TuneError::invalid_parameter("method", other)),
        }
    }
}

impl TieMethod {
    /// hazard jump for `d` tied events out of a risk set of total risk `w`,
    /// `wd` of it carried by the events. efron and fleming-harrington both
    /// take the k-th tied event out of a risk set reduced by `k/d` of `wd`
    fn hazard_increment(self, d: usize, w: f64, wd: f64) -> f64 {
        if d == 0 {
            return 0.0;
        }
        let df = d as f64;
        match self {
            TieMethod::Breslow => df / w,
            TieMethod::Efron | TieMethod::FlemingHarrington => (0..d)
                .map(|k| 1.0 / (w - (k as f64 / df) * wd))
                .sum(),
        }
    }
}

/// step-function survival estimate at the unique observed times
#[derive(Debug, Clone, PartialEq)]
pub struct EmpiricalCurve {
    times: Vec<f64>,      // sorted unique observed times
    n_risk: Vec<usize>,   // cases at risk just before each time
    n_event: Vec<usize>,
    n_censor: Vec<usize>,
    cumhaz: Vec<f64>,
    surv: Vec<f64>,
    method: TieMethod,
}

impl EmpiricalCurve {
    /// fit a curve; `risks` are relative risk multipliers (1 for everyone if None)
    pub fn fit(y: &[SurvivalTime], risks: Option<&[f64]>, method: TieMethod) -> Result<Self> {
        validate_survival_times(y)?;
        if y.is_empty() {
            return Err(TuneError::invalid_survival_data("can't build a curve from zero cases"));
        }
        if let Some(r) = risks {
            if r.len() != y.len() {
                return Err(TuneError::invalid_dimensions(
                    format!("risks len ({}) != n_cases ({})", r.len(), y.len())
                ));
            }
            if r.iter().any(|&v| !(v > 0.0) || !v.is_finite()) {
                return Err(TuneError::numerical_error("risks must be positive & finite"));
            }
        }
        let risk = |i: usize| risks.map_or(1.0, |r| r[i]);

        // group cases by unique time (stable order)
        let order = time_order(y);
        let mut times = Vec::new();
        let mut n_event = Vec::new();
        let mut n_censor = Vec::new();
        let mut group_risk = Vec::new();  // risk of everyone leaving at this time
        let mut event_risk = Vec::new();  // Wd
        let mut group_size = Vec::new();

        for &i in &order {
            let is_new = times.last().map_or(true, |&t: &f64| y[i].time > t);
            if is_new {
                times.push(y[i].time);
                n_event.push(0);
                n_censor.push(0);
                group_risk.push(0.0);
                event_risk.push(0.0);
                group_size.push(0);
            }
            let g = times.len() - 1;
            group_risk[g] += risk(i);
            group_size[g] += 1;
            if y[i].is_event() {
                n_event[g] += 1;
                event_risk[g] += risk(i);
            } else {
                n_censor[g] += 1;
            }
        }

        // risk sets are suffix sums over the groups
        let n_groups = times.len();
        let mut at_risk_w = vec![0.0; n_groups];
        let mut n_risk = vec![0usize; n_groups];
        let (mut w, mut n) = (0.0, 0usize);
        for g in (0..n_groups).rev() {
            w += group_risk[g];
            n += group_size[g];
            at_risk_w[g] = w;
            n_risk[g] = n;
        }

        let mut cumhaz = Vec::with_capacity(n_groups);
        let mut surv = Vec::with_capacity(n_groups);
        let mut h = 0.0;
        for g in 0..n_groups {
            h += method.hazard_increment(n_event[g], at_risk_w[g], event_risk[g]);
            cumhaz.push(h);
            surv.push((-h).exp());
        }

        Ok(Self { times, n_risk, n_event, n_censor, cumhaz, surv, method })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn n_risk(&self) -> &[usize] {
        &self.n_risk
    }

    pub fn n_event(&self) -> &[usize] {
        &self.n_event
    }

    pub fn n_censor(&self) -> &[usize] {
        &self.n_censor
    }

    pub fn cumulative_hazard(&self) -> &[f64] {
        &self.cumhaz
    }

    pub fn survival(&self) -> &[f64] {
        &self.surv
    }

    pub fn method(&self) -> TieMethod {
        self.method
    }

    /// last observed time - the curve isn't defined past it
    pub fn last_time(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// distinct times at which at least one event happened
    pub fn event_times(&self) -> Vec<f64> {
        self.times
            .iter()
            .zip(&self.n_event)
            .filter(|(_, &d)| d > 0)
            .map(|(&t, _)| t)
            .collect()
    }

    /// survival at `t`: last estimate at or before t, 1 before the first time
    pub fn survival_at(&self, t: f64) -> f64 {
        step_lookup(&self.times, &self.surv, t)
    }

    /// survival for a case w/ relative risk `risk`: S0(t)^risk
    pub fn survival_at_risk(&self, t: f64, risk: f64) -> f64 {
        self.survival_at(t).powf(risk)
    }

    /// restricted mean survival time up to `horizon` (default last observed time)
    pub fn mean(&self, horizon: Option<f64>) -> f64 {
        self.mean_at_risk(1.0, horizon)
    }

    pub fn mean_at_risk(&self, risk: f64, horizon: Option<f64>) -> f64 {
        let horizon = horizon.unwrap_or_else(|| self.last_time()).min(self.last_time());
        let surv: Vec<f64> = self.surv.iter().map(|s| s.powf(risk)).collect();
        step_integral(&self.times, &surv, horizon)
    }
}

/// right-continuous step lookup w/ value 1 before the first time
pub(crate) fn step_lookup(times: &[f64], values: &[f64], t: f64) -> f64 {
    let idx = times.partition_point(|&x| x <= t);
    if idx == 0 { 1.0 } else { values[idx - 1] }
}

/// area under a survival step function that starts at (0, 1) and is
/// clamped to 0 past `horizon`
pub(crate) fn step_integral(times: &[f64], surv: &[f64], horizon: f64) -> f64 {
    if !(horizon > 0.0) {
        return 0.0;
    }
    let mut area = 0.0;
    let (mut prev_t, mut prev_s) = (0.0, 1.0);
    for (&t, &s) in times.iter().zip(surv) {
        if t > horizon {
            break;
        }
        area += (t - prev_t) * prev_s;
        prev_t = t;
        prev_s = s;
    }
    area + (horizon - prev_t) * prev_s
}
