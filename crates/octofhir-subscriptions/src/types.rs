//! Parsed subscription and topic representations.
//!
//! These are derived from SubscriptionTopic and Subscription resources but
//! flattened for runtime trigger matching. Delivery transports are out of
//! scope; a subscription only records its channel configuration and the
//! events matched for it.

use indexmap::IndexMap;
use octofhir_core::FhirDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parsed SubscriptionTopic for in-memory trigger matching.
#[derive(Debug, Clone)]
pub struct ParsedTopic {
    pub id: String,
    /// Canonical URL, the key subscriptions reference the topic by
    pub url: String,
    pub title: Option<String>,
    pub status: TopicStatus,
    pub resource_triggers: Vec<ResourceTrigger>,
    /// Filter parameters subscribers may use
    pub can_filter_by: Vec<FilterDefinition>,
    pub notification_shape: Vec<NotificationShape>,
}

impl ParsedTopic {
    /// The trigger covering a resource type and interaction, if any.
    pub fn trigger_for(
        &self,
        resource_type: &str,
        interaction: TriggerInteraction,
    ) -> Option<&ResourceTrigger> {
        self.resource_triggers
            .iter()
            .find(|t| t.resource_type == resource_type && t.interactions.contains(&interaction))
    }

    /// Does the topic declare `param` as filterable for `resource_type`?
    pub fn allows_filter(&self, resource_type: &str, param: &str) -> bool {
        self.can_filter_by.iter().any(|f| {
            f.filter_parameter == param
                && f.resource
                    .as_deref()
                    .is_none_or(|r| r == resource_type)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
    Draft,
    Active,
    Retired,
    #[default]
    Unknown,
}

impl From<&str> for TopicStatus {
    fn from(s: &str) -> Self {
        match s {
            "draft" => Self::Draft,
            "active" => Self::Active,
            "retired" => Self::Retired,
            _ => Self::Unknown,
        }
    }
}

/// One resourceTrigger entry of a topic.
#[derive(Debug, Clone)]
pub struct ResourceTrigger {
    pub resource_type: String,
    pub interactions: Vec<TriggerInteraction>,
    /// FHIRPath criteria, evaluated with %previous and %current bound
    pub fhirpath_criteria: Option<String>,
    pub query_criteria: Option<QueryCriteria>,
    pub description: Option<String>,
}

/// Query-style trigger criteria comparing previous and current versions.
#[derive(Debug, Clone)]
pub struct QueryCriteria {
    pub previous: Option<String>,
    pub current: Option<String>,
    /// Fixed verdict for creates; when set it decides the trigger outright
    pub result_for_create: Option<QueryResultBehavior>,
    /// Fixed verdict for deletes; when set it decides the trigger outright
    pub result_for_delete: Option<QueryResultBehavior>,
    pub require_both: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResultBehavior {
    TestPasses,
    TestFails,
}

impl From<&str> for QueryResultBehavior {
    fn from(s: &str) -> Self {
        match s {
            "test-fails" => Self::TestFails,
            _ => Self::TestPasses,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerInteraction {
    Create,
    Update,
    Delete,
}

impl TriggerInteraction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl From<&str> for TriggerInteraction {
    fn from(s: &str) -> Self {
        match s {
            "create" => Self::Create,
            "delete" => Self::Delete,
            _ => Self::Update,
        }
    }
}

/// One canFilterBy entry of a topic.
#[derive(Debug, Clone)]
pub struct FilterDefinition {
    pub filter_parameter: String,
    pub resource: Option<String>,
    pub comparators: Vec<String>,
    pub modifiers: Vec<String>,
    pub description: Option<String>,
}

/// One notificationShape entry of a topic.
#[derive(Debug, Clone)]
pub struct NotificationShape {
    pub resource: String,
    pub include: Vec<String>,
    pub rev_include: Vec<String>,
}

/// Parsed Subscription with its accumulated event history.
#[derive(Debug, Clone)]
pub struct ParsedSubscription {
    pub id: String,
    pub topic_url: String,
    pub status: SubscriptionStatus,
    pub channel_type: String,
    pub endpoint: Option<String>,
    pub content_type: Option<String>,
    pub content: PayloadContent,
    pub heartbeat_period: Option<u32>,
    /// Delivery timeout hint in seconds, recorded for the transport layer
    pub timeout: Option<u32>,
    pub end: Option<FhirDateTime>,
    pub filters: Vec<AppliedFilter>,
    /// Events matched since the subscription started, contiguous from 1
    pub event_count: u64,
    /// Event number to event, in arrival order
    pub events: IndexMap<u64, SubscriptionEvent>,
    /// Error notes accumulated while in error state
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Requested,
    Active,
    Error,
    Off,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Active => "active",
            Self::Error => "error",
            Self::Off => "off",
        }
    }

}

impl From<&str> for SubscriptionStatus {
    fn from(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "error" => Self::Error,
            "off" => Self::Off,
            _ => Self::Requested,
        }
    }
}

/// Payload content level for notification bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadContent {
    Empty,
    IdOnly,
    #[default]
    FullResource,
}

impl From<&str> for PayloadContent {
    fn from(s: &str) -> Self {
        match s {
            "empty" => Self::Empty,
            "id-only" => Self::IdOnly,
            _ => Self::FullResource,
        }
    }
}

/// A filter a subscriber applied, constrained by the topic's canFilterBy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedFilter {
    pub resource_type: Option<String>,
    pub filter_parameter: String,
    pub comparator: Option<String>,
    pub modifier: Option<String>,
    pub value: String,
}

impl AppliedFilter {
    /// Render the filter as a `name=value` query pair, the form the
    /// search layer consumes.
    pub fn as_query_pair(&self) -> (String, String) {
        let name = match &self.modifier {
            Some(modifier) => format!("{}:{}", self.filter_parameter, modifier),
            None => self.filter_parameter.clone(),
        };
        let value = match &self.comparator {
            Some(comparator) => format!("{}{}", comparator, self.value),
            None => self.value.clone(),
        };
        (name, value)
    }
}

/// One matched event, kept for `$events` replay.
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    pub event_number: u64,
    pub timestamp: FhirDateTime,
    pub focus_type: String,
    pub focus_id: String,
    pub interaction: TriggerInteraction,
    /// Snapshot of the resource at event time, absent for `empty` payloads
    pub resource: Option<Value>,
}

impl SubscriptionEvent {
    pub fn focus_reference(&self) -> String {
        format!("{}/{}", self.focus_type, self.focus_id)
    }
}

/// Notification bundle flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    Handshake,
    Heartbeat,
    EventNotification,
    QueryStatus,
    QueryEvent,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Heartbeat => "heartbeat",
            Self::EventNotification => "event-notification",
            Self::QueryStatus => "query-status",
            Self::QueryEvent => "query-event",
        }
    }
}
