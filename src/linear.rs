use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use crate::{
    cox::log_grid,
    data::{Dataset, Response, ResponseKind},
    error::{TuneError, Result},
    model::{FitContext, Fitted, Model, ParamValue, Params},
    optimization::ridge_least_squares,
    prediction::Prediction,
};

/// ridge regression for numeric (and multi-column numeric) responses;
/// reads `lambda` (default 0), intercept is never penalised
#[derive(Debug, Clone, Default)]
pub struct LinearModel;

impl LinearModel {
    pub fn new() -> Self {
        Self
    }
}

impl Model for LinearModel {
    fn name(&self) -> &str {
        "LinearModel"
    }

    fn response_types(&self) -> &[ResponseKind] {
        &[ResponseKind::Numeric, ResponseKind::Matrix]
    }

    fn fit(&self, data: &Dataset, params: &Params) -> Result<Box<dyn Fitted>> {
        let lambda = params.float("lambda", 0.0)?;
        if !(lambda >= 0.0) {
            return Err(TuneError::invalid_parameter("lambda", lambda.to_string()));
        }

        let weights = data.weights().map(|w| w.view());
        // x and y share the weighted centre so the unpenalised intercept is exact
        let x_means = Array1::from_iter(data.x().columns().into_iter().map(|col| weighted_mean(col, weights)));
        let centered = &data.x() - &x_means;

        let fit_column = |y: ArrayView1<f64>| -> Result<(f64, Array1<f64>)> {
            let y_mean = weighted_mean(y, weights);
            let yc = y.mapv(|v| v - y_mean);
            let beta = ridge_least_squares(centered.view(), yc.view(), weights, lambda)?;
            Ok((y_mean - x_means.dot(&beta), beta))
        };

        let (intercepts, coefficients, multi) = match data.response() {
            Response::Numeric(y) => {
                let (b0, beta) = fit_column(y.view())?;
                (Array1::from(vec![b0]), beta.insert_axis(Axis(1)), false)
            }
            Response::Matrix(y) => {
                let mut intercepts = Array1::zeros(y.ncols());
                let mut coefficients = Array2::zeros((data.n_features(), y.ncols()));
                for (k, col) in y.columns().into_iter().enumerate() {
                    let (b0, beta) = fit_column(col)?;
                    intercepts[k] = b0;
                    coefficients.column_mut(k).assign(&beta);
                }
                (intercepts, coefficients, true)
            }
            other => {
                return Err(TuneError::configuration(
                    format!("linear model can't fit {:?} responses", other.kind())
                ))
            }
        };

        Ok(Box::new(LinearFit { intercepts, coefficients, multi }))
    }

    fn default_grid(&self, ctx: &FitContext, size: usize) -> Vec<(String, Vec<ParamValue>)> {
        let hi = (ctx.n_obs as f64 / 10.0).max(1.0);
        vec![("lambda".to_string(), log_grid(1e-3, hi, size))]
    }
}

fn weighted_mean(y: ArrayView1<f64>, weights: Option<ArrayView1<f64>>) -> f64 {
    match weights {
        Some(w) => {
            let total = w.sum();
            if total > 0.0 { w.dot(&y) / total } else { f64::NAN }
        }
        None => y.mean().unwrap_or(f64::NAN),
    }
}

#[derive(Debug, Clone)]
pub struct LinearFit {
    intercepts: Array1<f64>,   // one per response column
    coefficients: Array2<f64>, // n_features x n_columns
    multi: bool,
}

impl LinearFit {
    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    pub fn intercepts(&self) -> &Array1<f64> {
        &self.intercepts
    }
}

impl Fitted for LinearFit {
    fn predict(&self, x: ArrayView2<f64>, _times: Option<&[f64]>) -> Result<Prediction> {
        if x.ncols() != self.coefficients.nrows() {
            return Err(TuneError::invalid_dimensions(
                format!("feature count mismatch: expected {}, got {}",
                       self.coefficients.nrows(), x.ncols())
            ));
        }
        let fitted = x.dot(&self.coefficients) + &self.intercepts;
        if self.multi {
            Ok(Prediction::Matrix(fitted))
        } else {
            Ok(Prediction::Numeric(fitted.column(0).to_owned()))
        }
    }

    fn varimp(&self) -> Option<Array1<f64>> {
        Some(self.coefficients.map_axis(Axis(1), |row| row.iter().map(|b| b.abs()).sum()))
    }
}
