use serde::{Deserialize, Serialize};
use crate::{
    error::{TuneError, Result},
    prediction::validate_times,
};

/// resampling protocol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Method {
    /// k-fold cross-validation, repeated
    CV { folds: usize, repeats: usize },
    /// bootstrap fits, predicting the full data
    Boot { samples: usize },
    /// bootstrap fits, predicting the out-of-bag cases
    OOB { samples: usize },
    /// optimism-corrected bootstrap
    BootOptimism { samples: usize },
    /// optimism-corrected cross-validation
    CVOptimism { folds: usize, repeats: usize },
    /// single random train/test split, `prop` of cases for training
    Split { prop: f64 },
    /// fit + predict the full data once (apparent performance)
    Train,
}

impl Method {
    /// number of resample iterations this protocol runs
    pub fn n_iterations(&self) -> usize {
        match *self {
            Method::CV { folds, repeats } | Method::CVOptimism { folds, repeats } => folds * repeats,
            Method::Boot { samples } | Method::OOB { samples } | Method::BootOptimism { samples } => samples,
            Method::Split { .. } | Method::Train => 1,
        }
    }

    pub fn is_optimism(&self) -> bool {
        matches!(self, Method::BootOptimism { .. } | Method::CVOptimism { .. })
    }
}

/// how a stratification variable is used
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrataOptions {
    /// quantile buckets for numeric strata (and survival times)
    pub breaks: usize,
    /// stratify on the response when the data carries no explicit strata
    pub from_response: bool,
}

impl Default for StrataOptions {
    fn default() -> Self {
        Self { breaks: 4, from_response: false }
    }
}

/// what happens when a model fails inside a resample iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// run everything, then fail w/ the lowest-index error
    #[default]
    Strict,
    /// keep going; the failed iteration's metrics are missing
    Lenient,
}

/// resampling control: protocol + everything that affects its output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub method: Method,
    pub seed: u64,
    pub strata: StrataOptions,
    /// survival prediction times; `None` predicts mean survival
    pub times: Option<Vec<f64>>,
    /// worker threads, 0 or 1 = sequential
    pub workers: usize,
    pub failure: FailurePolicy,
}

impl Default for Control {
    fn default() -> Self {
        Self::cv(10, 1)
    }
}

impl Control {
    fn with_method(method: Method) -> Self {
        Self {
            method,
            seed: 0,
            strata: StrataOptions::default(),
            times: None,
            workers: 0,
            failure: FailurePolicy::default(),
        }
    }

    pub fn cv(folds: usize, repeats: usize) -> Self {
        Self::with_method(Method::CV { folds, repeats })
    }

    pub fn boot(samples: usize) -> Self {
        Self::with_method(Method::Boot { samples })
    }

    pub fn oob(samples: usize) -> Self {
        Self::with_method(Method::OOB { samples })
    }

    pub fn boot_optimism(samples: usize) -> Self {
        Self::with_method(Method::BootOptimism { samples })
    }

    pub fn cv_optimism(folds: usize, repeats: usize) -> Self {
        Self::with_method(Method::CVOptimism { folds, repeats })
    }

    pub fn split(prop: f64) -> Self {
        Self::with_method(Method::Split { prop })
    }

    pub fn train() -> Self {
        Self::with_method(Method::Train)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_times(mut self, times: Vec<f64>) -> Self {
        self.times = Some(times);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_failure(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    pub fn with_strata(mut self, strata: StrataOptions) -> Self {
        self.strata = strata;
        self
    }

    /// checks that need no data; `n_cases` checks are done by `resample`
    pub fn validate(&self) -> Result<()> {
        match self.method {
            Method::CV { folds, repeats } | Method::CVOptimism { folds, repeats } => {
                if folds < 2 {
                    return Err(TuneError::configuration(format!("need at least 2 folds, got {}", folds)));
                }
                if repeats == 0 {
                    return Err(TuneError::configuration("need at least 1 repeat"));
                }
            }
            Method::Boot { samples } | Method::OOB { samples } | Method::BootOptimism { samples } => {
                if samples == 0 {
                    return Err(TuneError::configuration("need at least 1 bootstrap sample"));
                }
            }
            Method::Split { prop } => {
                if !(prop > 0.0 && prop < 1.0) {
                    return Err(TuneError::configuration(format!("split proportion {} not in (0, 1)", prop)));
                }
            }
            Method::Train => {}
        }
        if self.strata.breaks == 0 {
            return Err(TuneError::configuration("strata breaks must be positive"));
        }
        if let Some(times) = &self.times {
            validate_times(times).map_err(|e| TuneError::configuration(e.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn validate_for(&self, n_cases: usize) -> Result<()> {
        self.validate()?;
        let needed = match self.method {
            Method::CV { folds, .. } | Method::CVOptimism { folds, .. } => folds,
            Method::Split { .. } => 2,
            _ => 1,
        };
        if n_cases < needed {
            return Err(TuneError::configuration(
                format!("{:?} needs at least {} cases, data has {}", self.method, needed, n_cases)
            ));
        }
        Ok(())
    }
}
