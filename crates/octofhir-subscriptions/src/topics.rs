//! Parsing of SubscriptionTopic and Subscription resources into their
//! runtime representations.

use crate::error::{Result, SubscriptionError};
use crate::types::{
    AppliedFilter, FilterDefinition, NotificationShape, ParsedSubscription, ParsedTopic,
    PayloadContent, QueryCriteria, ResourceTrigger, SubscriptionStatus, TopicStatus,
    TriggerInteraction,
};
use indexmap::IndexMap;
use octofhir_core::FhirDateTime;
use serde_json::Value;

pub fn parse_topic(resource: &Value) -> Result<ParsedTopic> {
    let id = require_str(resource, "id", SubscriptionError::InvalidTopic)?;
    let url = require_str(resource, "url", SubscriptionError::InvalidTopic)?;
    let title = str_field(resource, "title");
    let status = resource
        .get("status")
        .and_then(Value::as_str)
        .map(TopicStatus::from)
        .unwrap_or_default();

    Ok(ParsedTopic {
        id,
        url,
        title,
        status,
        resource_triggers: parse_resource_triggers(resource),
        can_filter_by: parse_filter_definitions(resource),
        notification_shape: parse_notification_shape(resource),
    })
}

fn parse_resource_triggers(resource: &Value) -> Vec<ResourceTrigger> {
    let triggers = resource
        .get("resourceTrigger")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    triggers
        .iter()
        .filter_map(|trigger| {
            let resource_type = trigger.get("resource").and_then(Value::as_str)?.to_string();

            let interactions = trigger
                .get("supportedInteraction")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(TriggerInteraction::from)
                        .collect()
                })
                // Absent means any interaction fires the trigger.
                .unwrap_or_else(|| {
                    vec![
                        TriggerInteraction::Create,
                        TriggerInteraction::Update,
                        TriggerInteraction::Delete,
                    ]
                });

            let query_criteria = trigger.get("queryCriteria").map(|qc| QueryCriteria {
                previous: str_field(qc, "previous"),
                current: str_field(qc, "current"),
                result_for_create: qc
                    .get("resultForCreate")
                    .and_then(Value::as_str)
                    .map(Into::into),
                result_for_delete: qc
                    .get("resultForDelete")
                    .and_then(Value::as_str)
                    .map(Into::into),
                require_both: qc
                    .get("requireBoth")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            });

            Some(ResourceTrigger {
                resource_type,
                interactions,
                fhirpath_criteria: str_field(trigger, "fhirPathCriteria"),
                query_criteria,
                description: str_field(trigger, "description"),
            })
        })
        .collect()
}

fn parse_filter_definitions(resource: &Value) -> Vec<FilterDefinition> {
    let filters = resource
        .get("canFilterBy")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    filters
        .iter()
        .filter_map(|filter| {
            Some(FilterDefinition {
                filter_parameter: filter
                    .get("filterParameter")
                    .and_then(Value::as_str)?
                    .to_string(),
                resource: str_field(filter, "resource"),
                comparators: str_array(filter, "comparator"),
                modifiers: str_array(filter, "modifier"),
                description: str_field(filter, "description"),
            })
        })
        .collect()
}

fn parse_notification_shape(resource: &Value) -> Vec<NotificationShape> {
    let shapes = resource
        .get("notificationShape")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    shapes
        .iter()
        .filter_map(|shape| {
            Some(NotificationShape {
                resource: shape.get("resource").and_then(Value::as_str)?.to_string(),
                include: str_array(shape, "include"),
                rev_include: str_array(shape, "revInclude"),
            })
        })
        .collect()
}

pub fn parse_subscription(resource: &Value) -> Result<ParsedSubscription> {
    let id = require_str(resource, "id", SubscriptionError::InvalidSubscription)?;
    let topic_url = require_str(resource, "topic", SubscriptionError::InvalidSubscription)?;
    let status = resource
        .get("status")
        .and_then(Value::as_str)
        .map(SubscriptionStatus::from)
        .unwrap_or_default();

    let channel_type = resource
        .get("channelType")
        .and_then(|c| c.get("code"))
        .and_then(Value::as_str)
        .unwrap_or("rest-hook")
        .to_string();

    let content = resource
        .get("content")
        .and_then(Value::as_str)
        .map(PayloadContent::from)
        .unwrap_or_default();

    let heartbeat_period = resource
        .get("heartbeatPeriod")
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok());

    let timeout = resource
        .get("timeout")
        .and_then(Value::as_u64)
        .and_then(|t| u32::try_from(t).ok());

    let end = match str_field(resource, "end") {
        Some(raw) => Some(raw.parse::<FhirDateTime>().map_err(|e| {
            SubscriptionError::InvalidSubscription(format!("bad end time: {e}"))
        })?),
        None => None,
    };

    let filters = resource
        .get("filterBy")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .map(|filter| {
            let filter_parameter = filter
                .get("filterParameter")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SubscriptionError::InvalidSubscription(
                        "filterBy entry is missing filterParameter".to_string(),
                    )
                })?
                .to_string();
            let value = filter
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SubscriptionError::InvalidSubscription(
                        "filterBy entry is missing value".to_string(),
                    )
                })?
                .to_string();
            Ok(AppliedFilter {
                resource_type: str_field(filter, "resourceType"),
                filter_parameter,
                comparator: str_field(filter, "comparator"),
                modifier: str_field(filter, "modifier"),
                value,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ParsedSubscription {
        id,
        topic_url,
        status,
        channel_type,
        endpoint: str_field(resource, "endpoint"),
        content_type: str_field(resource, "contentType"),
        content,
        heartbeat_period,
        timeout,
        end,
        filters,
        event_count: 0,
        events: IndexMap::new(),
        errors: Vec::new(),
    })
}

fn require_str(
    resource: &Value,
    field: &str,
    err: fn(String) -> SubscriptionError,
) -> Result<String> {
    resource
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| err(format!("missing '{field}'")))
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

fn str_array(value: &Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_topic_with_triggers_and_filters() {
        let topic = parse_topic(&json!({
            "resourceType": "SubscriptionTopic",
            "id": "enc-finished",
            "url": "http://example.org/topics/encounter-finished",
            "title": "Finished encounters",
            "status": "active",
            "resourceTrigger": [{
                "resource": "Encounter",
                "supportedInteraction": ["create", "update"],
                "fhirPathCriteria": "%current.status = 'finished'",
                "queryCriteria": {
                    "previous": "status:not=finished",
                    "current": "status=finished",
                    "resultForCreate": "test-passes",
                    "resultForDelete": "test-fails",
                    "requireBoth": true
                }
            }],
            "canFilterBy": [{
                "filterParameter": "patient",
                "resource": "Encounter",
                "comparator": ["eq"]
            }]
        }))
        .unwrap();

        assert_eq!(topic.url, "http://example.org/topics/encounter-finished");
        assert_eq!(topic.status, TopicStatus::Active);
        let trigger = topic
            .trigger_for("Encounter", TriggerInteraction::Update)
            .unwrap();
        assert_eq!(
            trigger.fhirpath_criteria.as_deref(),
            Some("%current.status = 'finished'")
        );
        let criteria = trigger.query_criteria.as_ref().unwrap();
        assert!(criteria.require_both);
        assert_eq!(
            criteria.result_for_delete,
            Some(crate::types::QueryResultBehavior::TestFails)
        );
        assert!(topic.allows_filter("Encounter", "patient"));
        assert!(!topic.allows_filter("Encounter", "status"));
    }

    #[test]
    fn topic_without_url_is_rejected() {
        let result = parse_topic(&json!({"resourceType": "SubscriptionTopic", "id": "t"}));
        assert!(matches!(result, Err(SubscriptionError::InvalidTopic(_))));
    }

    #[test]
    fn absent_supported_interaction_covers_all() {
        let topic = parse_topic(&json!({
            "resourceType": "SubscriptionTopic",
            "id": "t",
            "url": "http://example.org/topics/any",
            "resourceTrigger": [{"resource": "Patient"}]
        }))
        .unwrap();
        for interaction in [
            TriggerInteraction::Create,
            TriggerInteraction::Update,
            TriggerInteraction::Delete,
        ] {
            assert!(topic.trigger_for("Patient", interaction).is_some());
        }
    }

    #[test]
    fn parses_subscription() {
        let subscription = parse_subscription(&json!({
            "resourceType": "Subscription",
            "id": "sub1",
            "status": "requested",
            "topic": "http://example.org/topics/encounter-finished",
            "channelType": {"system": "http://terminology.hl7.org/CodeSystem/subscription-channel-type", "code": "rest-hook"},
            "endpoint": "https://client.example.org/fhir/hook",
            "contentType": "application/fhir+json",
            "content": "id-only",
            "heartbeatPeriod": 60,
            "timeout": 30,
            "filterBy": [{
                "resourceType": "Encounter",
                "filterParameter": "patient",
                "value": "Patient/p1"
            }]
        }))
        .unwrap();

        assert_eq!(subscription.status, SubscriptionStatus::Requested);
        assert_eq!(subscription.content, PayloadContent::IdOnly);
        assert_eq!(subscription.heartbeat_period, Some(60));
        assert_eq!(subscription.timeout, Some(30));
        assert_eq!(subscription.filters.len(), 1);
        assert_eq!(subscription.event_count, 0);
    }

    #[test]
    fn out_of_range_periods_are_dropped() {
        let subscription = parse_subscription(&json!({
            "resourceType": "Subscription",
            "id": "sub1",
            "topic": "http://example.org/topics/encounter-finished",
            "heartbeatPeriod": 4_294_967_296u64,
            "timeout": 4_294_967_296u64
        }))
        .unwrap();
        assert_eq!(subscription.heartbeat_period, None);
        assert_eq!(subscription.timeout, None);
    }

    #[test]
    fn subscription_without_topic_is_rejected() {
        let result = parse_subscription(&json!({
            "resourceType": "Subscription",
            "id": "sub1",
            "status": "requested"
        }));
        assert!(matches!(
            result,
            Err(SubscriptionError::InvalidSubscription(_))
        ));
    }
}
