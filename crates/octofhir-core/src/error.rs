use thiserror::Error;

/// Shared error taxonomy for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    #[error("Resource deleted: {resource_type}/{id}")]
    Gone { resource_type: String, id: String },

    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Evaluation error: {message}")]
    Evaluation { message: String },

    #[error("Invalid FHIR DateTime: {0}")]
    InvalidDateTime(String),

    #[error("Invalid FHIR ID: {0}")]
    InvalidId(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Create a new NotFound error
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Create a new Gone error (deleted resource, 410)
    pub fn gone(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Gone {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Create a new PreconditionFailed error
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Create a new BadRequest error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a new Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a new Evaluation error
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// HTTP status the error maps to at the transport boundary
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Gone { .. } => 410,
            Self::PreconditionFailed { .. } => 412,
            Self::BadRequest { .. }
            | Self::InvalidDateTime(_)
            | Self::InvalidId(_)
            | Self::Json(_) => 400,
            Self::Conflict { .. } => 409,
            Self::Evaluation { .. } => 500,
        }
    }

    /// Check if this error is a client error (4xx category)
    pub fn is_client_error(&self) -> bool {
        self.http_status() < 500
    }

    /// Check if this error is a server error (5xx category)
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Gone { .. } => ErrorCategory::Deleted,
            Self::PreconditionFailed { .. } => ErrorCategory::Precondition,
            Self::BadRequest { .. } | Self::InvalidDateTime(_) | Self::InvalidId(_) => {
                ErrorCategory::Validation
            }
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Evaluation { .. } => ErrorCategory::Evaluation,
            Self::Json(_) => ErrorCategory::Serialization,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Deleted,
    Precondition,
    Conflict,
    Evaluation,
    Serialization,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Deleted => write!(f, "deleted"),
            Self::Precondition => write!(f, "precondition"),
            Self::Conflict => write!(f, "conflict"),
            Self::Evaluation => write!(f, "evaluation"),
            Self::Serialization => write!(f, "serialization"),
        }
    }
}

/// Convenience result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
