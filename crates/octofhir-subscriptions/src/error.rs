use octofhir_core::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SubscriptionError>;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("invalid SubscriptionTopic: {0}")]
    InvalidTopic(String),

    #[error("invalid Subscription: {0}")]
    InvalidSubscription(String),

    #[error("no SubscriptionTopic with url '{0}'")]
    UnknownTopic(String),

    #[error("no Subscription with id '{0}'")]
    UnknownSubscription(String),

    #[error("criteria evaluation failed: {0}")]
    Criteria(String),

    #[error("filter evaluation failed: {0}")]
    Filter(String),
}

impl From<SubscriptionError> for EngineError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::UnknownSubscription(id) => EngineError::not_found("Subscription", id),
            SubscriptionError::Criteria(message) | SubscriptionError::Filter(message) => {
                EngineError::evaluation(message)
            }
            other => EngineError::bad_request(other.to_string()),
        }
    }
}
