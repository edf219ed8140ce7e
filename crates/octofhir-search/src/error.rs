use octofhir_core::EngineError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("Unknown search parameter '{code}' for {resource_type}")]
    UnknownParameter { resource_type: String, code: String },

    #[error("Invalid value for {param}: {message}")]
    InvalidValue { param: String, message: String },

    #[error("Modifier '{modifier}' is not allowed on {param}")]
    InvalidModifier { param: String, modifier: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Chain target '{0}' is not a reference parameter")]
    InvalidChain(String),
}

impl SearchError {
    pub fn invalid_value(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn unknown_parameter(resource_type: impl Into<String>, code: impl Into<String>) -> Self {
        Self::UnknownParameter {
            resource_type: resource_type.into(),
            code: code.into(),
        }
    }
}

impl From<SearchError> for EngineError {
    fn from(err: SearchError) -> Self {
        EngineError::bad_request(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
