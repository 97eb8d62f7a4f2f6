use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use crate::error::{TuneError, Result};

/// one observed survival outcome: time + event indicator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurvivalTime {
    pub time: f64,  // time to event/censoring
    pub status: u8, // 0 = censored, 1 = event, >1 also counts as event
}

impl SurvivalTime {
    pub fn new(time: f64, status: u8) -> Self {
        Self { time, status }
    }

    pub fn event(time: f64) -> Self {
        Self { time, status: 1 }
    }

    pub fn censored(time: f64) -> Self {
        Self { time, status: 0 }
    }

    /// multi-state codes collapse to a plain event
    pub fn is_event(&self) -> bool {
        self.status >= 1
    }
}

/// build survival times from the usual (times, events) vec pair
pub fn survival_times(times: &[f64], events: &[bool]) -> Result<Vec<SurvivalTime>> {
    if times.len() != events.len() {
        return Err(TuneError::invalid_dimensions(
            format!("times len ({}) != events len ({})", times.len(), events.len())
        ));
    }
    let out: Vec<SurvivalTime> = times
        .iter()
        .zip(events)
        .map(|(&t, &e)| SurvivalTime::new(t, e as u8))
        .collect();
    validate_survival_times(&out)?;
    Ok(out)
}

pub(crate) fn validate_survival_times(times: &[SurvivalTime]) -> Result<()> {
    if times.iter().any(|s| s.time < 0.0 || !s.time.is_finite()) {
        return Err(TuneError::invalid_survival_data(
            "survival times must be non-negative & finite"
        ));
    }
    Ok(())
}

/// indices that sort survival times by time; stable so ties keep input order
pub(crate) fn time_order(times: &[SurvivalTime]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..times.len()).collect();
    order.sort_by(|&a, &b| times[a].time.total_cmp(&times[b].time));
    order
}

/// the closed set of response kinds every model / metric dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseKind {
    Numeric,
    Factor,
    Matrix,
    Survival,
}

/// observed outcome column(s)
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Numeric(Array1<f64>),
    Factor {
        codes: Vec<usize>,
        levels: Vec<String>,
        ordered: bool,
    },
    Matrix(Array2<f64>),
    Survival(Vec<SurvivalTime>),
}

impl Response {
    pub fn factor(codes: Vec<usize>, levels: Vec<String>) -> Result<Self> {
        if let Some(&bad) = codes.iter().find(|&&c| c >= levels.len()) {
            return Err(TuneError::invalid_parameter("factor code", bad.to_string()));
        }
        Ok(Response::Factor { codes, levels, ordered: false })
    }

    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::Numeric(_) => ResponseKind::Numeric,
            Response::Factor { .. } => ResponseKind::Factor,
            Response::Matrix(_) => ResponseKind::Matrix,
            Response::Survival(_) => ResponseKind::Survival,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Response::Numeric(y) => y.len(),
            Response::Factor { codes, .. } => codes.len(),
            Response::Matrix(y) => y.nrows(),
            Response::Survival(y) => y.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_survival(&self) -> Option<&[SurvivalTime]> {
        match self {
            Response::Survival(y) => Some(y),
            _ => None,
        }
    }

    /// rows picked by index; duplicates allowed (bootstrap draws)
    pub fn select(&self, indices: &[usize]) -> Response {
        match self {
            Response::Numeric(y) => Response::Numeric(indices.iter().map(|&i| y[i]).collect()),
            Response::Factor { codes, levels, ordered } => Response::Factor {
                codes: indices.iter().map(|&i| codes[i]).collect(),
                levels: levels.clone(),
                ordered: *ordered,
            },
            Response::Matrix(y) => Response::Matrix(y.select(Axis(0), indices)),
            Response::Survival(y) => Response::Survival(indices.iter().map(|&i| y[i]).collect()),
        }
    }
}

/// variable whose proportions resampling should preserve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Strata {
    Factor(Vec<usize>),
    Numeric(Vec<f64>),
}

impl Strata {
    pub fn len(&self) -> usize {
        match self {
            Strata::Factor(v) => v.len(),
            Strata::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// default stratification for a response: factor levels, numeric
    /// quantiles, or event status crossed w/ time quantiles for survival
    pub fn from_response(response: &Response, breaks: usize) -> Option<Strata> {
        match response {
            Response::Numeric(y) => Some(Strata::Numeric(y.to_vec())),
            Response::Factor { codes, .. } => Some(Strata::Factor(codes.clone())),
            Response::Matrix(_) => None,
            Response::Survival(y) => {
                let breaks = breaks.max(1);
                let mut labels = vec![0usize; y.len()];
                for status in [false, true] {
                    let members: Vec<usize> = (0..y.len())
                        .filter(|&i| y[i].is_event() == status)
                        .collect();
                    let values: Vec<f64> = members.iter().map(|&i| y[i].time).collect();
                    for (&i, bucket) in members.iter().zip(quantile_buckets(&values, breaks)) {
                        labels[i] = status as usize * breaks + bucket;
                    }
                }
                Some(Strata::Factor(labels))
            }
        }
    }

    /// integer stratum per case; numeric values get `breaks` quantile buckets
    pub fn labels(&self, breaks: usize) -> Vec<usize> {
        match self {
            Strata::Factor(codes) => codes.clone(),
            Strata::Numeric(values) => quantile_buckets(values, breaks.max(1)),
        }
    }

    pub fn select(&self, indices: &[usize]) -> Strata {
        match self {
            Strata::Factor(v) => Strata::Factor(indices.iter().map(|&i| v[i]).collect()),
            Strata::Numeric(v) => Strata::Numeric(indices.iter().map(|&i| v[i]).collect()),
        }
    }
}

/// rank-based quantile bucket of each value, in 0..breaks
fn quantile_buckets(values: &[f64], breaks: usize) -> Vec<usize> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    // ties take the rank of their first occurrence so they share a bucket
    let mut buckets = vec![0usize; n];
    let mut first = 0;
    for (rank, &i) in order.iter().enumerate() {
        if rank > 0 && values[i] != values[order[rank - 1]] {
            first = rank;
        }
        buckets[i] = (first * breaks / n.max(1)).min(breaks - 1);
    }
    buckets
}

/// cases: features + response, plus optional weights / strata
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array2<f64>,              // n_cases x n_features
    response: Response,
    weights: Option<Array1<f64>>, // case weights
    strata: Option<Strata>,
    ids: Vec<usize>,             // original case ids, kept through subsetting
}

impl Dataset {
    pub fn new(x: Array2<f64>, response: Response) -> Result<Self> {
        let n = response.len();
        if x.nrows() != n {
            return Err(TuneError::invalid_dimensions(
                format!("covariates rows ({}) != n_cases ({})", x.nrows(), n)
            ));
        }
        if let Response::Survival(y) = &response {
            validate_survival_times(y)?;
        }
        Ok(Self {
            x,
            response,
            weights: None,
            strata: None,
            ids: (0..n).collect(),
        })
    }

    /// survival data from raw (times, events) vecs, like the usual surv objects
    pub fn survival(times: Vec<f64>, events: Vec<bool>, x: Array2<f64>) -> Result<Self> {
        let y = survival_times(&times, &events)?;
        Self::new(x, Response::Survival(y))
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.n_cases() {
            return Err(TuneError::invalid_dimensions(
                format!("weights len ({}) != n_cases ({})", weights.len(), self.n_cases())
            ));
        }
        if weights.iter().any(|&w| w < 0.0 || !w.is_finite()) {
            return Err(TuneError::invalid_parameter("weights", "negative or non-finite"));
        }
        self.weights = Some(Array1::from(weights));
        Ok(self)
    }

    pub fn with_strata(mut self, strata: Strata) -> Result<Self> {
        if strata.len() != self.n_cases() {
            return Err(TuneError::invalid_dimensions(
                format!("strata len ({}) != n_cases ({})", strata.len(), self.n_cases())
            ));
        }
        self.strata = Some(strata);
        Ok(self)
    }

    pub fn n_cases(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn x(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn weights(&self) -> Option<&Array1<f64>> {
        self.weights.as_ref()
    }

    pub fn strata(&self) -> Option<&Strata> {
        self.strata.as_ref()
    }

    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    /// grab a subset of cases by indices (repeats allowed)
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.n_cases()) {
            return Err(TuneError::invalid_dimensions("subset index out of bounds"));
        }

        Ok(Self {
            x: self.x.select(Axis(0), indices),
            response: self.response.select(indices),
            weights: self.weights.as_ref().map(|w| indices.iter().map(|&i| w[i]).collect()),
            strata: self.strata.as_ref().map(|s| s.select(indices)),
            ids: indices.iter().map(|&i| self.ids[i]).collect(),
        })
    }
}
