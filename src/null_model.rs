use ndarray::{Array1, Array2, ArrayView2, Axis};
use crate::{
    data::{Dataset, Response, ResponseKind, SurvivalTime},
    error::{TuneError, Result},
    model::{Fitted, Model, Params},
    prediction::{predict_survival, Prediction, SurvDistribution},
};

/// intercept-only benchmark: every case gets the same prediction.
/// survival responses get the marginal curve (`distr` picks the estimator)
#[derive(Debug, Clone, Default)]
pub struct NullModel;

impl NullModel {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone)]
enum NullFit {
    Numeric(f64),
    Factor { probs: Array1<f64>, levels: Vec<String> },
    Matrix(Array1<f64>),
    Survival { train: Vec<SurvivalTime>, distr: SurvDistribution },
}

impl Model for NullModel {
    fn name(&self) -> &str {
        "NullModel"
    }

    fn response_types(&self) -> &[ResponseKind] {
        &[
            ResponseKind::Numeric,
            ResponseKind::Factor,
            ResponseKind::Matrix,
            ResponseKind::Survival,
        ]
    }

    fn fit(&self, data: &Dataset, params: &Params) -> Result<Box<dyn Fitted>> {
        let n = data.n_cases();
        if n == 0 {
            return Err(TuneError::invalid_dimensions("can't fit on zero cases"));
        }
        let weights = data
            .weights()
            .cloned()
            .unwrap_or_else(|| Array1::ones(n));
        let total = weights.sum();
        if !(total > 0.0) {
            return Err(TuneError::invalid_parameter("weights", "sum to zero"));
        }

        let fit = match data.response() {
            Response::Numeric(y) => NullFit::Numeric(weights.dot(y) / total),
            Response::Factor { codes, levels, .. } => {
                let mut probs = Array1::zeros(levels.len());
                for (&c, &w) in codes.iter().zip(weights.iter()) {
                    probs[c] += w;
                }
                NullFit::Factor { probs: probs / total, levels: levels.clone() }
            }
            Response::Matrix(y) => NullFit::Matrix(weights.dot(y) / total),
            Response::Survival(y) => NullFit::Survival {
                train: y.clone(),
                distr: params.text("distr", "empirical")?.parse()?,
            },
        };
        Ok(Box::new(fit))
    }
}

impl Fitted for NullFit {
    fn predict(&self, x: ArrayView2<f64>, times: Option<&[f64]>) -> Result<Prediction> {
        let n = x.nrows();
        match self {
            NullFit::Numeric(mean) => Ok(Prediction::Numeric(Array1::from_elem(n, *mean))),
            NullFit::Factor { probs, levels } => {
                let probs = probs
                    .view()
                    .insert_axis(Axis(0))
                    .broadcast((n, probs.len()))
                    .map(|b| b.to_owned())
                    .unwrap_or_else(|| Array2::zeros((n, probs.len())));
                Ok(Prediction::Factor { probs, levels: levels.clone() })
            }
            NullFit::Matrix(means) => {
                let mut out = Array2::zeros((n, means.len()));
                out.rows_mut().into_iter().for_each(|mut row| row.assign(means));
                Ok(Prediction::Matrix(out))
            }
            NullFit::Survival { train, distr } => {
                predict_survival(train, None, &vec![1.0; n], times, *distr)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{EmpiricalCurve, TieMethod};
    use crate::model::ModelSpec;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_numeric_and_factor() {
        let x = Array2::zeros((4, 1));
        let numeric = Dataset::new(x.clone(), Response::Numeric(array![1.0, 2.0, 3.0, 6.0])).unwrap();
        let fit = ModelSpec::new(NullModel).fit(&numeric, 0).unwrap();
        assert_eq!(fit.predict(x.view(), None).unwrap(), Prediction::Numeric(array![3.0, 3.0, 3.0, 3.0]));

        let y = Response::factor(vec![0, 1, 1, 1], vec!["a".into(), "b".into()]).unwrap();
        let factor = Dataset::new(x.clone(), y).unwrap();
        let fit = ModelSpec::new(NullModel).fit(&factor, 0).unwrap();
        let Prediction::Factor { probs, .. } = fit.predict(x.view(), None).unwrap() else {
            panic!("expected class probabilities");
        };
        assert_eq!(probs.dim(), (4, 2));
        assert_relative_eq!(probs[[3, 1]], 0.75);
    }

    #[test]
    fn test_weighted_matrix_means() {
        let x = Array2::zeros((2, 1));
        let data = Dataset::new(x.clone(), Response::Matrix(array![[0.0, 1.0], [4.0, 3.0]]))
            .unwrap()
            .with_weights(vec![3.0, 1.0])
            .unwrap();
        let fit = ModelSpec::new(NullModel).fit(&data, 0).unwrap();
        let Prediction::Matrix(pred) = fit.predict(x.view(), None).unwrap() else {
            panic!("expected matrix");
        };
        assert_relative_eq!(pred[[1, 0]], 1.0);
        assert_relative_eq!(pred[[0, 1]], 1.5);
    }

    #[test]
    fn test_survival_marginal_curve() {
        let x = Array2::zeros((4, 1));
        let data = Dataset::survival(vec![1.0, 2.0, 2.0, 5.0], vec![true, true, false, true], x.clone()).unwrap();
        let spec = ModelSpec::new(NullModel).with_param("distr", "breslow");
        let fit = spec.fit(&data, 0).unwrap();

        let curve = EmpiricalCurve::fit(data.response().as_survival().unwrap(), None, TieMethod::Breslow).unwrap();
        let Prediction::SurvCurves(m) = fit.predict(x.view(), Some(&[1.5, 4.0])).unwrap() else {
            panic!("expected curves");
        };
        assert_relative_eq!(m.values()[[2, 1]], curve.survival_at(4.0), epsilon = 1e-12);

        let Prediction::SurvMeans(means) = fit.predict(x.view(), None).unwrap() else {
            panic!("expected means");
        };
        assert_relative_eq!(means[0], curve.mean(None), epsilon = 1e-12);
    }
}
