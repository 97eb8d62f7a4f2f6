use ndarray::{Array1, ArrayView2, Axis};
use crate::{
    data::{Dataset, ResponseKind, SurvivalTime},
    error::{TuneError, Result},
    model::{FitContext, Fitted, Model, ParamValue, Params},
    optimization::{CoxOptimizer, OptimizationConfig},
    prediction::{predict_survival, Prediction, SurvDistribution},
};

/// cox proportional hazards w/ ridge penalty
///
/// params read at fit time:
/// - `lambda`: ridge penalty (default 0)
/// - `distr`: how survival is predicted - "empirical" (default), "breslow",
///   "efron", "fleming-harrington", "weibull", "exponential", "rayleigh"
#[derive(Debug, Clone)]
pub struct CoxModel {
    max_iterations: usize, // optimization limit
    tolerance: f64,        // convergence threshold
}

impl Default for CoxModel {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-9,
        }
    }
}

impl CoxModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// max iterations before giving up
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    /// how close is close enough for convergence
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    /// fit and keep the concrete type (coefficients etc.)
    pub fn fit_data(&self, data: &Dataset, params: &Params) -> Result<CoxFit> {
        let y = data.response().as_survival().ok_or_else(|| {
            TuneError::configuration("cox model needs a survival response")
        })?;
        let lambda = params.float("lambda", 0.0)?;
        if !(lambda >= 0.0) {
            return Err(TuneError::invalid_parameter("lambda", lambda.to_string()));
        }
        let distr: SurvDistribution = params.text("distr", "empirical")?.parse()?;

        // centre covariates so baseline risk is the risk of the average case
        let means = data
            .x()
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(data.n_features()));
        let centered = &data.x() - &means;

        let config = OptimizationConfig {
            l2_penalty: lambda,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        };
        let weights = data.weights().map(|w| w.view());
        let coefficients = CoxOptimizer::new(config).optimize(centered.view(), y, weights)?;

        let train_risks = centered.dot(&coefficients).mapv(f64::exp);
        if train_risks.iter().any(|r| !r.is_finite()) {
            return Err(TuneError::numerical_error("training risks overflowed"));
        }

        Ok(CoxFit {
            coefficients,
            means,
            train_times: y.to_vec(),
            train_risks: train_risks.to_vec(),
            distr,
        })
    }
}

impl Model for CoxModel {
    fn name(&self) -> &str {
        "CoxModel"
    }

    fn response_types(&self) -> &[ResponseKind] {
        &[ResponseKind::Survival]
    }

    fn fit(&self, data: &Dataset, params: &Params) -> Result<Box<dyn Fitted>> {
        Ok(Box::new(self.fit_data(data, params)?))
    }

    /// log-spaced ridge penalties; the upper end grows w/ the sample size
    fn default_grid(&self, ctx: &FitContext, size: usize) -> Vec<(String, Vec<ParamValue>)> {
        let hi = (ctx.n_obs as f64 / 10.0).max(1.0);
        vec![("lambda".to_string(), log_grid(1e-3, hi, size))]
    }
}

/// `size` log-spaced values from `lo` to `hi`; the endpoints come back exactly
pub(crate) fn log_grid(lo: f64, hi: f64, size: usize) -> Vec<ParamValue> {
    match size {
        0 => Vec::new(),
        1 => vec![ParamValue::Float((lo * hi).sqrt())],
        _ => (0..size)
            .map(|k| {
                let value = match k {
                    0 => lo,
                    k if k == size - 1 => hi,
                    k => {
                        let frac = k as f64 / (size - 1) as f64;
                        (lo.ln() + frac * (hi.ln() - lo.ln())).exp()
                    }
                };
                ParamValue::Float(value)
            })
            .collect(),
    }
}

/// what the cox model learned
#[derive(Debug, Clone)]
pub struct CoxFit {
    coefficients: Array1<f64>, // the betas (centered covariates)
    means: Array1<f64>,        // covariate centres
    train_times: Vec<SurvivalTime>,
    train_risks: Vec<f64>,
    distr: SurvDistribution,
}

impl CoxFit {
    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    /// hazard ratios (exp of coefficients)
    pub fn hazard_ratios(&self) -> Array1<f64> {
        self.coefficients.mapv(f64::exp)
    }

    /// relative risk vs the average training case
    pub fn risks(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.coefficients.len() {
            return Err(TuneError::invalid_dimensions(
                format!("feature count mismatch: expected {}, got {}",
                       self.coefficients.len(), x.ncols())
            ));
        }
        Ok((&x - &self.means).dot(&self.coefficients).mapv(f64::exp))
    }
}

impl Fitted for CoxFit {
    fn predict(&self, x: ArrayView2<f64>, times: Option<&[f64]>) -> Result<Prediction> {
        let risks = self.risks(x)?;
        predict_survival(
            &self.train_times,
            Some(&self.train_risks),
            &risks.to_vec(),
            times,
            self.distr,
        )
    }

    /// feature importance = abs value of coefficients
    fn varimp(&self) -> Option<Array1<f64>> {
        Some(self.coefficients.mapv(f64::abs))
    }
}
