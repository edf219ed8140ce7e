//! Topic-based subscription engine.
//!
//! Parses SubscriptionTopic and Subscription resources, evaluates committed
//! resource changes against their triggers and filters, numbers matched
//! events per subscription, and renders subscription-notification bundles.
//! Delivery transports and storage are the embedder's concern.

pub mod bundle;
pub mod criteria;
pub mod engine;
pub mod error;
pub mod topics;
pub mod types;

pub use bundle::NotificationBundleBuilder;
pub use criteria::{
    CompiledCriteria, CriteriaContext, CriteriaEvaluator, UnsupportedCriteriaEvaluator,
};
pub use engine::{FilterMatcher, SubscriptionEngine};
pub use error::{Result, SubscriptionError};
pub use topics::{parse_subscription, parse_topic};
pub use types::{
    AppliedFilter, FilterDefinition, NotificationShape, NotificationType, ParsedSubscription,
    ParsedTopic, PayloadContent, QueryCriteria, QueryResultBehavior, ResourceTrigger,
    SubscriptionEvent, SubscriptionStatus, TopicStatus, TriggerInteraction,
};
