use serde::{Deserialize, Serialize};
use crate::{
    compare::{t_test, PAdjust, PerformanceDiff, PerformanceDiffTest},
    control::{Control, FailurePolicy},
    error::{TuneError, Result},
    metrics::Metric,
    performance::{performance_with_cutoff, summary, PerformanceArray, PerformanceSummary, Statistic},
    prediction::SurvDistribution,
    resample::{resample_models, Resamples},
    data::Dataset,
    model::ModelSpec,
};

/// defaults threaded through the entry points that need them.
/// immutable: every `with_*` returns a new value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    control: Control,
    grid_size: usize,
    stats: Vec<Statistic>,
    select_stat: Statistic,
    p_adjust: PAdjust,
    cutoff: f64,
    surv_distr: SurvDistribution,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            control: Control::default(),
            grid_size: 3,
            stats: Statistic::defaults(),
            select_stat: Statistic::Mean,
            p_adjust: PAdjust::default(),
            cutoff: 0.5,
            surv_distr: SurvDistribution::default(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// resampling control for tuning and selection
    pub fn control(&self) -> &Control {
        &self.control
    }

    /// values per parameter in model default grids
    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// statistics `summary` reports
    pub fn stats(&self) -> &[Statistic] {
        &self.stats
    }

    /// statistic candidates are ranked by
    pub fn select_stat(&self) -> &Statistic {
        &self.select_stat
    }

    pub fn p_adjust(&self) -> PAdjust {
        self.p_adjust
    }

    /// binary class probability threshold
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// default survival distribution for models that read `distr`
    pub fn surv_distr(&self) -> SurvDistribution {
        self.surv_distr
    }

    pub fn failure(&self) -> FailurePolicy {
        self.control.failure
    }

    pub fn with_control(&self, control: Control) -> Self {
        Self { control, ..self.clone() }
    }

    pub fn with_grid_size(&self, grid_size: usize) -> Self {
        Self { grid_size, ..self.clone() }
    }

    pub fn with_stats(&self, stats: Vec<Statistic>) -> Self {
        Self { stats, ..self.clone() }
    }

    pub fn with_select_stat(&self, select_stat: Statistic) -> Self {
        Self { select_stat, ..self.clone() }
    }

    pub fn with_p_adjust(&self, p_adjust: PAdjust) -> Self {
        Self { p_adjust, ..self.clone() }
    }

    pub fn with_cutoff(&self, cutoff: f64) -> Self {
        Self { cutoff, ..self.clone() }
    }

    pub fn with_surv_distr(&self, surv_distr: SurvDistribution) -> Self {
        Self { surv_distr, ..self.clone() }
    }

    pub fn with_failure(&self, failure: FailurePolicy) -> Self {
        self.with_control(self.control.clone().with_failure(failure))
    }

    /// resample `specs` under these settings' control
    pub fn resample(&self, data: &Dataset, specs: &[ModelSpec]) -> Result<Resamples> {
        resample_models(data, specs, &self.control)
    }

    /// performance w/ these settings' class cutoff
    pub fn performance(&self, resamples: &Resamples, metrics: Option<&[Metric]>) -> Result<PerformanceArray> {
        performance_with_cutoff(resamples, metrics, self.cutoff)
    }

    /// summary w/ these settings' statistics
    pub fn summary(&self, perf: &PerformanceArray) -> Result<PerformanceSummary> {
        summary(perf, Some(&self.stats))
    }

    /// paired t-tests w/ these settings' p-value adjustment
    pub fn t_test(&self, diff: &PerformanceDiff) -> PerformanceDiffTest {
        t_test(diff, self.p_adjust)
    }

    /// everything that can be checked before touching data
    pub fn validate(&self) -> Result<()> {
        self.control.validate()?;
        if self.grid_size == 0 {
            return Err(TuneError::configuration("grid size must be positive"));
        }
        if self.stats.is_empty() {
            return Err(TuneError::configuration("need at least one summary statistic"));
        }
        if !(self.cutoff > 0.0 && self.cutoff < 1.0) {
            return Err(TuneError::configuration(format!("cutoff {} not in (0, 1)", self.cutoff)));
        }
        Ok(())
    }
}
