//! Weibull survival curves `S(t) = exp(-scale * t^shape)`.
//!
//! Fits come in two flavours: maximum likelihood from right-censored times
//! (with per-case risk multipliers entering the scale) and least squares on
//! an already-estimated survival curve. Either can pin the shape, which gives
//! the exponential (1) and Rayleigh (2) special cases. A fit with fewer
//! distinct event times than free parameters is not an error; it comes back
//! with NaN parameters.

use crate::{
    curve::step_integral,
    data::{validate_survival_times, SurvivalTime},
    error::{TuneError, Result},
};

const MAX_NEWTON_ITER: usize = 100;
const NEWTON_TOL: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeibullCurve {
    pub shape: f64,
    pub scale: f64,
}

impl WeibullCurve {
    pub fn new(shape: f64, scale: f64) -> Self {
        Self { shape, scale }
    }

    /// NaN parameters - not enough information to fit
    pub fn undefined() -> Self {
        Self { shape: f64::NAN, scale: f64::NAN }
    }

    pub fn is_defined(&self) -> bool {
        self.shape.is_finite() && self.scale.is_finite() && self.shape > 0.0 && self.scale >= 0.0
    }

    pub fn survival_at(&self, t: f64) -> f64 {
        if !self.is_defined() {
            return f64::NAN;
        }
        if t <= 0.0 {
            return 1.0;
        }
        (-self.scale * t.powf(self.shape)).exp()
    }

    /// same shape, scale multiplied by a case's relative risk
    pub fn with_risk(&self, risk: f64) -> Self {
        Self { shape: self.shape, scale: self.scale * risk }
    }

    /// restricted mean over a time grid, treating the curve as a step function
    /// at the grid points and stopping at the last one
    pub fn mean(&self, grid: &[f64]) -> f64 {
        if !self.is_defined() {
            return f64::NAN;
        }
        let surv: Vec<f64> = grid.iter().map(|&t| self.survival_at(t)).collect();
        step_integral(grid, &surv, grid.last().copied().unwrap_or(0.0))
    }

    /// ML fit from right-censored data w/ optional risk multipliers and fixed shape
    pub fn fit_censored(
        y: &[SurvivalTime],
        risks: Option<&[f64]>,
        fixed_shape: Option<f64>,
    ) -> Result<Self> {
        validate_survival_times(y)?;
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
        validate_shape(fixed_shape)?;

        // log(t) terms need t > 0; zero-time cases carry no information here
        let cases: Vec<(f64, bool, f64)> = y
            .iter()
            .enumerate()
            .filter(|(_, s)| s.time > 0.0)
            .map(|(i, s)| (s.time, s.is_event(), risks.map_or(1.0, |r| r[i])))
            .collect();
        if cases.len() < y.len() {
            log::debug!("weibull fit skipped {} zero-time cases", y.len() - cases.len());
        }

        let mut distinct: Vec<f64> = cases.iter().filter(|c| c.1).map(|c| c.0).collect();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        let n_free = if fixed_shape.is_some() { 1 } else { 2 };
        if distinct.len() < n_free {
            log::debug!(
                "weibull fit needs {} distinct event times, got {} - returning NA",
                n_free,
                distinct.len()
            );
            return Ok(Self::undefined());
        }

        // rescale time to [0, 1] so t^k stays tame during the shape search
        let t_max = cases.iter().map(|c| c.0).fold(0.0, f64::max);
        let scaled: Vec<(f64, bool, f64)> = cases.iter().map(|&(t, e, r)| (t / t_max, e, r)).collect();
        let n_events = scaled.iter().filter(|c| c.1).count() as f64;

        let shape = match fixed_shape {
            Some(k) => k,
            None => profile_shape(&scaled, n_events)?,
        };
        let denom: f64 = scaled.iter().map(|&(t, _, r)| r * t.powf(shape)).sum();
        let scale_unit = n_events / denom;

        Ok(Self { shape, scale: scale_unit / t_max.powf(shape) })
    }

    /// least squares of log(-log S) on log(t) over the strictly decreasing
    /// part of an estimated curve
    pub fn fit_curve(times: &[f64], surv: &[f64], fixed_shape: Option<f64>) -> Result<Self> {
        if times.len() != surv.len() {
            return Err(TuneError::invalid_dimensions(
                format!("times len ({}) != survival len ({})", times.len(), surv.len())
            ));
        }
        validate_shape(fixed_shape)?;

        let mut points = Vec::new();
        let mut prev = 1.0;
        for (&t, &s) in times.iter().zip(surv) {
            if s < prev {
                let x = t.ln();
                let y = (-s.ln()).ln();
                if x.is_finite() && y.is_finite() {
                    points.push((x, y));
                }
            }
            if s.is_finite() {
                prev = prev.min(s);
            }
        }

        let n = points.len() as f64;
        match fixed_shape {
            Some(k) => {
                if points.is_empty() {
                    return Ok(Self::undefined());
                }
                let log_scale = points.iter().map(|&(x, y)| y - k * x).sum::<f64>() / n;
                Ok(Self { shape: k, scale: log_scale.exp() })
            }
            None => {
                if points.len() < 2 {
                    return Ok(Self::undefined());
                }
                let x_bar = points.iter().map(|p| p.0).sum::<f64>() / n;
                let y_bar = points.iter().map(|p| p.1).sum::<f64>() / n;
                let sxx: f64 = points.iter().map(|p| (p.0 - x_bar).powi(2)).sum();
                let sxy: f64 = points.iter().map(|p| (p.0 - x_bar) * (p.1 - y_bar)).sum();
                if sxx <= 0.0 {
                    return Ok(Self::undefined());
                }
                let shape = sxy / sxx;
                if !(shape > 0.0) {
                    return Ok(Self::undefined());
                }
                Ok(Self { shape, scale: (y_bar - shape * x_bar).exp() })
            }
        }
    }
}

fn validate_shape(shape: Option<f64>) -> Result<()> {
    match shape {
        Some(k) if !(k > 0.0) || !k.is_finite() => {
            Err(TuneError::invalid_parameter("shape", k.to_string()))
        }
        _ => Ok(()),
    }
}

/// Newton-Raphson on the profile log-likelihood of the shape
/// (scale profiled out as D / sum r t^k); concave in k so one root
fn profile_shape(cases: &[(f64, bool, f64)], n_events: f64) -> Result<f64> {
    let sum_log_event: f64 = cases.iter().filter(|c| c.1).map(|c| c.0.ln()).sum();

    let profile = |k: f64| -> (f64, f64, f64) {
        let (mut s0, mut s1, mut s2) = (0.0, 0.0, 0.0);
        for &(t, _, r) in cases {
            let tk = r * t.powf(k);
            let lt = t.ln();
            s0 += tk;
            s1 += tk * lt;
            s2 += tk * lt * lt;
        }
        let loglik = n_events * (n_events / s0).ln() + n_events * k.ln()
            + (k - 1.0) * sum_log_event - n_events;
        let grad = n_events / k + sum_log_event - n_events * s1 / s0;
        let hess = -n_events / (k * k) - n_events * (s2 / s0 - (s1 / s0).powi(2));
        (loglik, grad, hess)
    };

    let mut k = 1.0;
    let (mut loglik, mut grad, mut hess) = profile(k);
    for _ in 0..MAX_NEWTON_ITER {
        let mut step = -grad / hess;
        // step halving keeps k positive and the likelihood climbing
        let mut accepted = false;
        for _ in 0..60 {
            let candidate = k + step;
            if candidate > 0.0 {
                let next = profile(candidate);
                if next.0.is_finite() && next.0 >= loglik - 1e-12 {
                    k = candidate;
                    (loglik, grad, hess) = next;
                    accepted = true;
                    break;
                }
            }
            step *= 0.5;
        }
        if !accepted || step.abs() < NEWTON_TOL * k.max(1.0) {
            break;
        }
    }

    if !k.is_finite() || k <= 0.0 {
        return Err(TuneError::numerical_error(format!("weibull shape search diverged: {}", k)));
    }
    Ok(k)
}
