//! # survtune
//!
//! resampled performance estimation, model comparison and tuning - w/ survival data as a first class citizen
//!
//! ## what you get
//!
//! - cv, bootstrap, out-of-bag, optimism-corrected and split resampling
//! - performance arrays (iterations x metrics x models) + summaries
//! - paired differences w/ t-tests and p-value adjustment
//! - grid tuning and picking between model lists
//! - empirical (breslow / efron / fleming-harrington) and weibull survival curves
//! - parallel resampling that's bit-for-bit reproducible
//!
//! ## quick start
//!
//! ```rust
//! use survtune::{resample, performance, summary, Control, CoxModel, Dataset, ModelSpec};
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let n = 40;
//! let times: Vec<f64> = (0..n).map(|i| 1.0 + (i * 7 % 13) as f64).collect();
//! let events: Vec<bool> = (0..n).map(|i| i % 4 != 0).collect(); // false = censored
//! let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * (j + 3)) % 5) as f64 / 5.0);
//! let data = Dataset::survival(times, events, x)?;
//!
//! // 5-fold cv of a lightly penalised cox model
//! let spec = ModelSpec::new(CoxModel::new()).with_param("lambda", 0.1);
//! let control = Control::cv(5, 1).with_seed(42);
//! let resamples = resample(&data, &spec, &control)?;
//!
//! let perf = performance(&resamples, None)?;
//! println!("{}", summary(&perf, None)?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod data;
pub mod curve;
pub mod weibull;
pub mod prediction;
pub mod model;
pub mod optimization;
pub mod cox;
pub mod linear;
pub mod null_model;
pub mod metrics;
pub mod control;
pub mod resample;
pub mod performance;
pub mod compare;
pub mod settings;
pub mod select;

pub use error::{TuneError, Result};
pub use data::{Dataset, Response, ResponseKind, Strata, SurvivalTime};
pub use curve::{EmpiricalCurve, TieMethod};
pub use weibull::WeibullCurve;
pub use prediction::{predict_survival, Prediction, SurvDistribution, SurvKind, SurvMatrix};
pub use model::{FitContext, Fitted, Model, ModelSpec, ParamSet, ParamValue, Params};
pub use cox::{CoxFit, CoxModel};
pub use linear::LinearModel;
pub use null_model::NullModel;
pub use metrics::{default_metrics, Metric, MetricContext};
pub use control::{Control, FailurePolicy, Method, StrataOptions};
pub use resample::{resample, resample_models, Resamples};
pub use performance::{performance, summary, PerformanceArray, PerformanceSummary, Statistic};
pub use compare::{diff, p_adjust, t_test, PAdjust, PerformanceDiff, PerformanceDiffTest};
pub use settings::Settings;
pub use select::{SelectedModel, SelectionFit, TrainBits, TunedModel, TuningGrid};

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_basic_functionality() {
        let n_samples = 30;
        let n_features = 3;

        let times: Vec<f64> = (0..n_samples).map(|i| 1.0 + i as f64).collect();
        let events = vec![true; n_samples];
        let covariates = Array2::zeros((n_samples, n_features));

        let data = Dataset::survival(times, events, covariates).unwrap();
        assert_eq!(data.n_cases(), n_samples);
        assert_eq!(data.n_features(), n_features);

        let resamples = resample(&data, &ModelSpec::new(NullModel), &Control::cv(3, 1)).unwrap();
        let perf = performance(&resamples, None).unwrap();
        assert_eq!(perf.values().dim(), (3, 3, 1));
    }
}
