use thiserror::Error;

pub type Result<T> = std::result::Result<T, TuneError>;

#[derive(Error, Debug, Clone)]
pub enum TuneError {
    #[error("dimensions don't match: {message}")]
    InvalidDimensions { message: String },

    #[error("bad parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    #[error("numerical issues: {message}")]
    NumericalError { message: String },

    #[error("survival data is broken: {message}")]
    InvalidSurvivalData { message: String },

    /// bad control / grid / metric setup, caught before any resampling work
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// results that can't be merged or compared
    #[error("structures don't match: {message}")]
    StructuralMismatch { message: String },

    /// an external fit or predict call failed inside a resample iteration
    #[error("model fit failed in iteration {iteration}: {message}")]
    ModelFit { iteration: usize, message: String },
}

impl TuneError {
    pub fn invalid_dimensions(message: impl Into<String>) -> Self {
        Self::InvalidDimensions { message: message.into() }
    }

    pub fn invalid_parameter(parameter: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    pub fn numerical_error(message: impl Into<String>) -> Self {
        Self::NumericalError { message: message.into() }
    }

    pub fn invalid_survival_data(message: impl Into<String>) -> Self {
        Self::InvalidSurvivalData { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn structural_mismatch(message: impl Into<String>) -> Self {
        Self::StructuralMismatch { message: message.into() }
    }

    pub fn model_fit(iteration: usize, message: impl Into<String>) -> Self {
        Self::ModelFit {
            iteration,
            message: message.into(),
        }
    }
}
