//! The two capabilities the engine needs from a model (fit, predict) plus
//! the parameter plumbing around them.
//!
//! Parameters are stored unresolved in a [`ParamSet`]. A parameter can be a
//! plain value or a deferred closure of the [`FitContext`]; closures run at
//! every fit against the training subset actually being used, so something
//! like "`mtry` = sqrt of the feature count" or "`min_node` = 1% of cases"
//! tracks each resample instead of the full data.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use crate::{
    data::{Dataset, ResponseKind},
    error::{TuneError, Result},
    prediction::Prediction,
};

/// a resolved parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Text(String),
    Flag(bool),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{}", s),
            ParamValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Flag(v)
    }
}

/// what a deferred parameter gets to look at when it's resolved
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitContext {
    pub n_obs: usize,
    pub n_features: usize,
    pub seed: u64,
}

impl FitContext {
    pub fn from_data(data: &Dataset, seed: u64) -> Self {
        Self {
            n_obs: data.n_cases(),
            n_features: data.n_features(),
            seed,
        }
    }
}

pub type DeferredFn = Arc<dyn Fn(&FitContext) -> ParamValue + Send + Sync>;

#[derive(Clone)]
pub enum Param {
    Value(ParamValue),
    Deferred(DeferredFn),
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Value(v) => write!(f, "{:?}", v),
            Param::Deferred(_) => write!(f, "Deferred(<fn>)"),
        }
    }
}

/// ordered, unresolved parameters; later entries win on name clashes
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    entries: Vec<(String, Param)>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name.into(), Param::Value(value.into()));
        self
    }

    /// parameter computed from the training context at fit time
    pub fn defer(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&FitContext) -> ParamValue + Send + Sync + 'static,
    ) -> Self {
        self.insert(name.into(), Param::Deferred(Arc::new(f)));
        self
    }

    fn insert(&mut self, name: String, param: Param) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = param,
            None => self.entries.push((name, param)),
        }
    }

    /// self overridden by `other`
    pub fn merge(&self, other: &ParamSet) -> ParamSet {
        let mut out = self.clone();
        for (name, param) in &other.entries {
            out.insert(name.clone(), param.clone());
        }
        out
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, ctx: &FitContext) -> Params {
        let values = self
            .entries
            .iter()
            .map(|(name, param)| {
                let value = match param {
                    Param::Value(v) => v.clone(),
                    Param::Deferred(f) => f(ctx),
                };
                (name.clone(), value)
            })
            .collect();
        Params { values }
    }
}

/// resolved parameters handed to `Model::fit`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn float(&self, name: &str, default: f64) -> Result<f64> {
        match self.values.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| TuneError::invalid_parameter(name, v.to_string())),
        }
    }

    pub fn text<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str> {
        match self.values.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_str()
                .ok_or_else(|| TuneError::invalid_parameter(name, v.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    /// "name=value, ..." - used to label tuning candidates
    pub fn label(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// fit capability of an external model
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    /// response kinds this model can be trained on
    fn response_types(&self) -> &[ResponseKind];

    fn fit(&self, data: &Dataset, params: &Params) -> Result<Box<dyn Fitted>>;

    /// grid of `size` values per tunable parameter, may depend on the data
    fn default_grid(&self, _ctx: &FitContext, _size: usize) -> Vec<(String, Vec<ParamValue>)> {
        Vec::new()
    }
}

/// predict capability of a trained model
pub trait Fitted: Send + Sync {
    fn predict(&self, x: ArrayView2<f64>, times: Option<&[f64]>) -> Result<Prediction>;

    fn varimp(&self) -> Option<Array1<f64>> {
        None
    }
}

/// a model plus the parameters it should be fit with
#[derive(Clone)]
pub struct ModelSpec {
    model: Arc<dyn Model>,
    params: ParamSet,
    label: Option<String>,
}

impl fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSpec")
            .field("model", &self.model.name())
            .field("params", &self.params)
            .field("label", &self.label)
            .finish()
    }
}

impl ModelSpec {
    pub fn new(model: impl Model + 'static) -> Self {
        Self::from_arc(Arc::new(model))
    }

    pub fn from_arc(model: Arc<dyn Model>) -> Self {
        Self { model, params: ParamSet::new(), label: None }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params = self.params.set(name, value);
        self
    }

    pub fn with_deferred(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&FitContext) -> ParamValue + Send + Sync + 'static,
    ) -> Self {
        self.params = self.params.defer(name, f);
        self
    }

    pub fn with_params(mut self, params: &ParamSet) -> Self {
        self.params = self.params.merge(params);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// display name: explicit label, else the model's own name
    pub fn name(&self) -> &str {
        self.label.as_deref().unwrap_or_else(|| self.model.name())
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn supports(&self, kind: ResponseKind) -> bool {
        self.model.response_types().contains(&kind)
    }

    /// resolve deferred params against this data, then fit
    pub fn fit(&self, data: &Dataset, seed: u64) -> Result<Box<dyn Fitted>> {
        let kind = data.response().kind();
        if !self.supports(kind) {
            return Err(TuneError::configuration(
                format!("model {} doesn't handle {:?} responses", self.name(), kind)
            ));
        }
        let params = self.params.resolve(&FitContext::from_data(data, seed));
        self.model.fit(data, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_set_override_and_resolve() {
        let base = ParamSet::new().set("lambda", 0.1).set("ties", "efron");
        let over = ParamSet::new()
            .set("lambda", 0.5)
            .defer("nmin", |ctx| ParamValue::Int((ctx.n_obs / 10) as i64));
        let merged = base.merge(&over);

        let ctx = FitContext { n_obs: 200, n_features: 3, seed: 1 };
        let params = merged.resolve(&ctx);
        assert_eq!(params.float("lambda", 0.0).unwrap(), 0.5);
        assert_eq!(params.text("ties", "breslow").unwrap(), "efron");
        assert_eq!(params.get("nmin"), Some(&ParamValue::Int(20)));
        assert_eq!(merged.names().collect::<Vec<_>>(), vec!["lambda", "ties", "nmin"]);

        // deferred values follow the context they're resolved in
        let small = merged.resolve(&FitContext { n_obs: 50, ..ctx });
        assert_eq!(small.get("nmin"), Some(&ParamValue::Int(5)));
    }

    #[test]
    fn test_param_type_errors() {
        let params = ParamSet::new().set("lambda", "big").resolve(&FitContext {
            n_obs: 1,
            n_features: 1,
            seed: 0,
        });
        assert!(params.float("lambda", 0.0).is_err());
        assert_eq!(params.float("alpha", 2.0).unwrap(), 2.0);
        assert_eq!(params.label(), "lambda=big");
    }
}
