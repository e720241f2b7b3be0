use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoxError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoxError {
    #[error("dimensions don't match: {message}")]
    InvalidDimensions { message: String },
    
    #[error("optimization blew up: {message}")]
    OptimizationFailed { message: String },
    
    #[error("model not fitted yet - call fit() first")]
    ModelNotFitted,
    
    #[error("bad parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },
    
    #[error("numerical issues: {message}")]
    NumericalError { message: String },
    
    #[error("survival data is broken: {message}")]
    InvalidSurvivalData { message: String },

    #[error("missing values in dataset: {message}")]
    MissingValues { message: String },

    #[error("unsupported penalty type: {name} (expected LASSO, RIDGE or ENET)")]
    UnsupportedPenalty { name: String },

    #[error("unsupported sampling mode: {name} (expected cv or boot)")]
    UnsupportedSampling { name: String },

    #[error("number of runs must be positive, got {runs}")]
    InvalidRunCount { runs: usize },

    #[error("survival response needs 2 (time, status) or 3 (time1, time2, status) columns, got {columns}")]
    MalformedResponse { columns: usize },

    #[error("no signal: {message}")]
    NoSignal { message: String },

    #[error("no overlapping features between new data and the trained feature set")]
    NoOverlappingFeatures,

    #[error("run exceeded its deadline")]
    DeadlineExceeded,

    #[error("serialization failed: {message}")]
    Serialization { message: String },
}

impl CoxError {
    pub fn invalid_dimensions(message: impl Into<String>) -> Self {
        Self::InvalidDimensions { message: message.into() }
    }
    
    pub fn optimization_failed(message: impl Into<String>) -> Self {
        Self::OptimizationFailed { message: message.into() }
    }
    
    pub fn invalid_parameter(parameter: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidParameter { 
            parameter: parameter.into(), 
            value: value.into() 
        }
    }
    
    pub fn numerical_error(message: impl Into<String>) -> Self {
        Self::NumericalError { message: message.into() }
    }
    
    pub fn invalid_survival_data(message: impl Into<String>) -> Self {
        Self::InvalidSurvivalData { message: message.into() }
    }

    pub fn missing_values(message: impl Into<String>) -> Self {
        Self::MissingValues { message: message.into() }
    }

    pub fn no_signal(message: impl Into<String>) -> Self {
        Self::NoSignal { message: message.into() }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// fatal errors abort a whole batch; everything else only sinks one run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingValues { .. }
                | Self::UnsupportedPenalty { .. }
                | Self::UnsupportedSampling { .. }
                | Self::InvalidRunCount { .. }
                | Self::MalformedResponse { .. }
                | Self::NoOverlappingFeatures
        )
    }
}

impl From<serde_json::Error> for CoxError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
