//! Notification bundle assembly.
//!
//! Every notification is a `Bundle` of type `subscription-notification`
//! whose first entry is a `SubscriptionStatus` resource; focus resources
//! follow per the subscription's payload content level.

use crate::types::{NotificationType, PayloadContent, SubscriptionEvent, SubscriptionStatus};
use octofhir_core::now_utc;
use serde_json::{Value, json};
use uuid::Uuid;

pub struct NotificationBundleBuilder {
    subscription_id: String,
    topic_url: String,
    notification_type: NotificationType,
    subscription_status: SubscriptionStatus,
    events_since_start: u64,
    content: PayloadContent,
    events: Vec<SubscriptionEvent>,
    errors: Vec<String>,
}

impl NotificationBundleBuilder {
    pub fn new(
        subscription_id: impl Into<String>,
        topic_url: impl Into<String>,
        notification_type: NotificationType,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            topic_url: topic_url.into(),
            notification_type,
            subscription_status: SubscriptionStatus::Active,
            events_since_start: 0,
            content: PayloadContent::default(),
            events: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn status(mut self, status: SubscriptionStatus) -> Self {
        self.subscription_status = status;
        self
    }

    pub fn events_since_start(mut self, count: u64) -> Self {
        self.events_since_start = count;
        self
    }

    pub fn content(mut self, content: PayloadContent) -> Self {
        self.content = content;
        self
    }

    pub fn event(mut self, event: SubscriptionEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn events(mut self, events: impl IntoIterator<Item = SubscriptionEvent>) -> Self {
        self.events.extend(events);
        self
    }

    pub fn errors(mut self, errors: &[String]) -> Self {
        self.errors.extend_from_slice(errors);
        self
    }

    pub fn build(self) -> Value {
        let timestamp = now_utc().to_string();

        let mut status = json!({
            "resourceType": "SubscriptionStatus",
            "status": self.subscription_status.as_str(),
            "type": self.notification_type.as_str(),
            "eventsSinceSubscriptionStart": self.events_since_start.to_string(),
            "subscription": {
                "reference": format!("Subscription/{}", self.subscription_id)
            },
            "topic": self.topic_url
        });

        if !self.events.is_empty() {
            let notification_events: Vec<Value> = self
                .events
                .iter()
                .map(|event| {
                    json!({
                        "eventNumber": event.event_number.to_string(),
                        "timestamp": event.timestamp.to_string(),
                        "focus": {"reference": event.focus_reference()}
                    })
                })
                .collect();
            status["notificationEvent"] = Value::Array(notification_events);
        }

        if !self.errors.is_empty() {
            let errors: Vec<Value> = self.errors.iter().map(|e| json!({"text": e})).collect();
            status["error"] = Value::Array(errors);
        }

        let mut entries = vec![json!({
            "fullUrl": format!("urn:uuid:{}", Uuid::new_v4()),
            "resource": status
        })];

        if self.content != PayloadContent::Empty {
            for event in &self.events {
                let mut entry = json!({
                    "fullUrl": event.focus_reference(),
                    "request": {
                        "method": request_method(event),
                        "url": event.focus_reference()
                    },
                    "response": {"status": "200"}
                });
                if self.content == PayloadContent::FullResource
                    && let Some(resource) = &event.resource
                {
                    entry["resource"] = resource.clone();
                }
                entries.push(entry);
            }
        }

        json!({
            "resourceType": "Bundle",
            "type": "subscription-notification",
            "timestamp": timestamp,
            "entry": entries
        })
    }
}

fn request_method(event: &SubscriptionEvent) -> &'static str {
    match event.interaction {
        crate::types::TriggerInteraction::Create => "POST",
        crate::types::TriggerInteraction::Update => "PUT",
        crate::types::TriggerInteraction::Delete => "DELETE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriggerInteraction;
    use octofhir_core::now_utc;

    fn event(number: u64, resource: Option<Value>) -> SubscriptionEvent {
        SubscriptionEvent {
            event_number: number,
            timestamp: now_utc(),
            focus_type: "Encounter".to_string(),
            focus_id: "e1".to_string(),
            interaction: TriggerInteraction::Update,
            resource,
        }
    }

    #[test]
    fn handshake_bundle_has_only_status_entry() {
        let bundle = NotificationBundleBuilder::new(
            "sub1",
            "http://example.org/topics/enc",
            NotificationType::Handshake,
        )
        .build();

        assert_eq!(bundle["type"], json!("subscription-notification"));
        let entries = bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        let status = &entries[0]["resource"];
        assert_eq!(status["resourceType"], json!("SubscriptionStatus"));
        assert_eq!(status["type"], json!("handshake"));
        assert_eq!(status["eventsSinceSubscriptionStart"], json!("0"));
        assert!(status.get("notificationEvent").is_none());
    }

    #[test]
    fn event_notification_embeds_resource_for_full_content() {
        let resource = json!({"resourceType": "Encounter", "id": "e1", "status": "finished"});
        let bundle = NotificationBundleBuilder::new(
            "sub1",
            "http://example.org/topics/enc",
            NotificationType::EventNotification,
        )
        .events_since_start(3)
        .content(PayloadContent::FullResource)
        .event(event(3, Some(resource.clone())))
        .build();

        let entries = bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        let status = &entries[0]["resource"];
        assert_eq!(
            status["notificationEvent"][0]["eventNumber"],
            json!("3")
        );
        assert_eq!(entries[1]["resource"], resource);
        assert_eq!(entries[1]["request"]["method"], json!("PUT"));
    }

    #[test]
    fn id_only_content_omits_resource_but_keeps_reference() {
        let bundle = NotificationBundleBuilder::new(
            "sub1",
            "http://example.org/topics/enc",
            NotificationType::EventNotification,
        )
        .content(PayloadContent::IdOnly)
        .event(event(1, None))
        .build();

        let entries = bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["fullUrl"], json!("Encounter/e1"));
        assert!(entries[1].get("resource").is_none());
    }

    #[test]
    fn empty_content_sends_no_focus_entries() {
        let bundle = NotificationBundleBuilder::new(
            "sub1",
            "http://example.org/topics/enc",
            NotificationType::EventNotification,
        )
        .content(PayloadContent::Empty)
        .event(event(1, None))
        .build();

        let entries = bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        // The status entry still names the event.
        assert!(entries[0]["resource"].get("notificationEvent").is_some());
    }

    #[test]
    fn error_notes_surface_on_status() {
        let bundle = NotificationBundleBuilder::new(
            "sub1",
            "http://example.org/topics/enc",
            NotificationType::QueryStatus,
        )
        .status(SubscriptionStatus::Error)
        .errors(&["criteria compilation failed".to_string()])
        .build();

        let status = &bundle["entry"][0]["resource"];
        assert_eq!(status["status"], json!("error"));
        assert_eq!(status["error"][0]["text"], json!("criteria compilation failed"));
    }
}
