use ndarray::{concatenate, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use crate::{
    curve::{step_integral, EmpiricalCurve, TieMethod},
    data::{ResponseKind, SurvivalTime},
    error::{TuneError, Result},
    weibull::WeibullCurve,
};

/// what the cells of a survival matrix hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurvKind {
    Probs,  // P(T > t)
    Events, // P(T <= t)
}

/// cases x prediction times, w/ the time grid attached
#[derive(Debug, Clone, PartialEq)]
pub struct SurvMatrix {
    values: Array2<f64>,
    times: Array1<f64>,
    kind: SurvKind,
}

impl SurvMatrix {
    pub fn new(values: Array2<f64>, times: Vec<f64>, kind: SurvKind) -> Result<Self> {
        if values.ncols() != times.len() {
            return Err(TuneError::invalid_dimensions(
                format!("matrix has {} columns but {} prediction times", values.ncols(), times.len())
            ));
        }
        validate_times(&times)?;
        Ok(Self { values, times: Array1::from(times), kind })
    }

    pub fn probs(values: Array2<f64>, times: Vec<f64>) -> Result<Self> {
        Self::new(values, times, SurvKind::Probs)
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn times(&self) -> &Array1<f64> {
        &self.times
    }

    pub fn kind(&self) -> SurvKind {
        self.kind
    }

    pub fn n_cases(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    fn check_same_grid(&self, other: &Self) -> Result<()> {
        if self.times != other.times {
            return Err(TuneError::structural_mismatch("survival matrices have different time grids"));
        }
        if self.kind != other.kind {
            return Err(TuneError::structural_mismatch(
                format!("can't combine {:?} with {:?} matrices", self.kind, other.kind)
            ));
        }
        Ok(())
    }

    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            values: self.values.select(Axis(0), indices),
            times: self.times.clone(),
            kind: self.kind,
        }
    }

    /// keep some prediction times; the grid follows the columns
    pub fn select_cols(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&j| j >= self.n_times()) {
            return Err(TuneError::invalid_dimensions("time column index out of bounds"));
        }
        let times: Vec<f64> = indices.iter().map(|&j| self.times[j]).collect();
        Self::new(self.values.select(Axis(1), indices), times, self.kind)
    }

    /// stack cases from two matrices w/ identical grids
    pub fn row_bind(&self, other: &Self) -> Result<Self> {
        self.check_same_grid(other)?;
        let values = concatenate(Axis(0), &[self.values.view(), other.values.view()])
            .map_err(|e| TuneError::invalid_dimensions(e.to_string()))?;
        Ok(Self { values, times: self.times.clone(), kind: self.kind })
    }

    /// elementwise combination; shapes and grids must match exactly
    pub fn zip_with(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Result<Self> {
        self.check_same_grid(other)?;
        if self.values.dim() != other.values.dim() {
            return Err(TuneError::invalid_dimensions(
                format!("matrix shapes {:?} vs {:?}", self.values.dim(), other.values.dim())
            ));
        }
        let mut values = self.values.clone();
        values.zip_mut_with(&other.values, |a, &b| *a = f(*a, b));
        Ok(Self { values, times: self.times.clone(), kind: self.kind })
    }

    pub fn difference(&self, other: &Self) -> Result<Self> {
        self.zip_with(other, |a, b| a - b)
    }

    /// grid and values w/ the implicit time-0 column in front
    /// (1 for probabilities, 0 for events); nothing is stored
    pub fn with_time_zero(&self) -> (Array1<f64>, Array2<f64>) {
        if self.times.get(0).is_some_and(|&t| t == 0.0) {
            return (self.times.clone(), self.values.clone());
        }
        let fill = match self.kind {
            SurvKind::Probs => 1.0,
            SurvKind::Events => 0.0,
        };
        let mut times = Vec::with_capacity(self.n_times() + 1);
        times.push(0.0);
        times.extend(self.times.iter().copied());

        let mut values = Array2::from_elem((self.n_cases(), self.n_times() + 1), fill);
        values.slice_mut(ndarray::s![.., 1..]).assign(&self.values);
        (Array1::from(times), values)
    }

    pub fn to_probs(&self) -> Self {
        match self.kind {
            SurvKind::Probs => self.clone(),
            SurvKind::Events => Self {
                values: self.values.mapv(|v| 1.0 - v),
                times: self.times.clone(),
                kind: SurvKind::Probs,
            },
        }
    }

    pub fn to_events(&self) -> Self {
        match self.kind {
            SurvKind::Events => self.clone(),
            SurvKind::Probs => Self {
                values: self.values.mapv(|v| 1.0 - v),
                times: self.times.clone(),
                kind: SurvKind::Events,
            },
        }
    }

    /// restricted mean survival per case, integrated up to the last grid time
    pub fn mean_times(&self) -> Array1<f64> {
        let probs = self.to_probs();
        let times = probs.times.to_vec();
        let horizon = times.last().copied().unwrap_or(0.0);
        probs
            .values
            .rows()
            .into_iter()
            .map(|row| {
                if row.iter().any(|v| v.is_nan()) {
                    return f64::NAN;
                }
                step_integral(&times, &row.to_vec(), horizon)
            })
            .collect()
    }

    /// per-case weibull fitted to each predicted curve
    pub fn to_weibull(&self, fixed_shape: Option<f64>) -> Result<Vec<WeibullCurve>> {
        let probs = self.to_probs();
        let times = probs.times.to_vec();
        probs
            .values
            .rows()
            .into_iter()
            .map(|row| WeibullCurve::fit_curve(&times, &row.to_vec(), fixed_shape))
            .collect()
    }
}

pub(crate) fn validate_times(times: &[f64]) -> Result<()> {
    if times.is_empty() {
        return Err(TuneError::invalid_parameter("times", "empty prediction time grid"));
    }
    if times.iter().any(|&t| t < 0.0 || !t.is_finite()) {
        return Err(TuneError::invalid_parameter("times", "prediction times must be non-negative & finite"));
    }
    if times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(TuneError::invalid_parameter("times", "prediction times must be strictly increasing"));
    }
    Ok(())
}

/// model output, one variant per response kind
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Numeric(Array1<f64>),
    Factor { probs: Array2<f64>, levels: Vec<String> },
    Matrix(Array2<f64>),
    SurvCurves(SurvMatrix),
    SurvMeans(Array1<f64>),
}

impl Prediction {
    pub fn kind(&self) -> ResponseKind {
        match self {
            Prediction::Numeric(_) => ResponseKind::Numeric,
            Prediction::Factor { .. } => ResponseKind::Factor,
            Prediction::Matrix(_) => ResponseKind::Matrix,
            Prediction::SurvCurves(_) | Prediction::SurvMeans(_) => ResponseKind::Survival,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Prediction::Numeric(p) | Prediction::SurvMeans(p) => p.len(),
            Prediction::Factor { probs, .. } => probs.nrows(),
            Prediction::Matrix(p) => p.nrows(),
            Prediction::SurvCurves(p) => p.n_cases(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn select_rows(&self, indices: &[usize]) -> Prediction {
        match self {
            Prediction::Numeric(p) => Prediction::Numeric(indices.iter().map(|&i| p[i]).collect()),
            Prediction::SurvMeans(p) => Prediction::SurvMeans(indices.iter().map(|&i| p[i]).collect()),
            Prediction::Factor { probs, levels } => Prediction::Factor {
                probs: probs.select(Axis(0), indices),
                levels: levels.clone(),
            },
            Prediction::Matrix(p) => Prediction::Matrix(p.select(Axis(0), indices)),
            Prediction::SurvCurves(p) => Prediction::SurvCurves(p.select_rows(indices)),
        }
    }
}

/// how survival predictions are derived from training times + risks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurvDistribution {
    Empirical(TieMethod),
    Weibull,
    Exponential,
    Rayleigh,
}

impl Default for SurvDistribution {
    fn default() -> Self {
        SurvDistribution::Empirical(TieMethod::default())
    }
}

impl std::str::FromStr for SurvDistribution {
    type Err = TuneError;

    /// "empirical" uses the default tie method; "breslow" etc. pick one
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "empirical" => Ok(SurvDistribution::default()),
            "weibull" => Ok(SurvDistribution::Weibull),
            "exponential" => Ok(SurvDistribution::Exponential),
            "rayleigh" => Ok(SurvDistribution::Rayleigh),
            other => other
                .parse::<TieMethod>()
                .map(SurvDistribution::Empirical)
                .map_err(|_| TuneError::invalid_parameter("distr", other)),
        }
    }
}

impl std::fmt::Display for SurvDistribution {
    /// the text `from_str` reads back
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SurvDistribution::Empirical(TieMethod::Breslow) => "breslow",
            SurvDistribution::Empirical(TieMethod::Efron) => "efron",
            SurvDistribution::Empirical(TieMethod::FlemingHarrington) => "fleming-harrington",
            SurvDistribution::Weibull => "weibull",
            SurvDistribution::Exponential => "exponential",
            SurvDistribution::Rayleigh => "rayleigh",
        };
        write!(f, "{}", name)
    }
}

impl SurvDistribution {
    fn fixed_shape(self) -> Option<f64> {
        match self {
            SurvDistribution::Exponential => Some(1.0),
            SurvDistribution::Rayleigh => Some(2.0),
            _ => None,
        }
    }
}

/// survival predictions for new cases w/ relative risks `new_risks`:
/// a probability matrix at `times`, or restricted means when no times are given
pub fn predict_survival(
    train: &[SurvivalTime],
    train_risks: Option<&[f64]>,
    new_risks: &[f64],
    times: Option<&[f64]>,
    distr: SurvDistribution,
) -> Result<Prediction> {
    if new_risks.iter().any(|&r| !(r > 0.0) || !r.is_finite()) {
        return Err(TuneError::numerical_error("predicted risks must be positive & finite"));
    }
    if let Some(times) = times {
        validate_times(times)?;
    }

    match distr {
        SurvDistribution::Empirical(method) => {
            let curve = EmpiricalCurve::fit(train, train_risks, method)?;
            match times {
                Some(times) => {
                    let values = Array2::from_shape_fn((new_risks.len(), times.len()), |(i, j)| {
                        curve.survival_at_risk(times[j], new_risks[i])
                    });
                    Ok(Prediction::SurvCurves(SurvMatrix::probs(values, times.to_vec())?))
                }
                None => Ok(Prediction::SurvMeans(
                    new_risks.iter().map(|&r| curve.mean_at_risk(r, None)).collect(),
                )),
            }
        }
        parametric => {
            let fit = WeibullCurve::fit_censored(train, train_risks, parametric.fixed_shape())?;
            match times {
                Some(times) => {
                    let values = Array2::from_shape_fn((new_risks.len(), times.len()), |(i, j)| {
                        fit.with_risk(new_risks[i]).survival_at(times[j])
                    });
                    Ok(Prediction::SurvCurves(SurvMatrix::probs(values, times.to_vec())?))
                }
                None => {
                    let mut grid: Vec<f64> = train.iter().map(|s| s.time).collect();
                    grid.sort_by(f64::total_cmp);
                    grid.dedup();
                    Ok(Prediction::SurvMeans(
                        new_risks.iter().map(|&r| fit.with_risk(r).mean(&grid)).collect(),
                    ))
                }
            }
        }
    }
}
