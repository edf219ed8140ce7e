//! Subscription engine: topic and subscription registries plus the
//! per-commit trigger evaluation and event numbering.
//!
//! The engine never touches storage. Query-style criteria and subscriber
//! filters are delegated to a [`FilterMatcher`] the embedder provides, and
//! FHIRPath criteria go through the configured
//! [`CriteriaEvaluator`](crate::criteria::CriteriaEvaluator). Event numbers
//! are assigned under the engine lock, so a subscription's numbers are
//! contiguous from 1 in commit order.

use crate::bundle::NotificationBundleBuilder;
use crate::criteria::{
    CompiledCriteria, CriteriaContext, CriteriaEvaluator, UnsupportedCriteriaEvaluator,
};
use crate::error::{Result, SubscriptionError};
use crate::topics::{parse_subscription, parse_topic};
use crate::types::{
    AppliedFilter, NotificationType, ParsedSubscription, ParsedTopic, PayloadContent,
    QueryCriteria, QueryResultBehavior, ResourceTrigger, SubscriptionEvent, SubscriptionStatus,
    TopicStatus, TriggerInteraction,
};
use octofhir_core::{FhirDateTime, now_utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Evaluates query-style criteria and subscriber filters against a single
/// document. Implemented by the store on top of its search layer.
pub trait FilterMatcher: Send + Sync {
    /// Does `document` match the query string `query` for `resource_type`?
    fn query_matches(&self, resource_type: &str, document: &Value, query: &str) -> Result<bool>;

    /// Does `document` satisfy every applicable filter?
    fn filters_match(
        &self,
        resource_type: &str,
        document: &Value,
        filters: &[AppliedFilter],
    ) -> Result<bool>;
}

struct EngineState {
    /// Topics by resource id
    topics: HashMap<String, ParsedTopic>,
    /// Canonical URL to topic id
    topic_ids_by_url: HashMap<String, String>,
    subscriptions: HashMap<String, ParsedSubscription>,
    /// Criteria compilation cache; failures are cached too so a broken
    /// expression is reported once per engine, not once per event
    compiled: HashMap<String, std::result::Result<Arc<dyn CompiledCriteria>, String>>,
}

pub struct SubscriptionEngine {
    evaluator: Arc<dyn CriteriaEvaluator>,
    state: Mutex<EngineState>,
}

impl Default for SubscriptionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionEngine {
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(UnsupportedCriteriaEvaluator))
    }

    pub fn with_evaluator(evaluator: Arc<dyn CriteriaEvaluator>) -> Self {
        Self {
            evaluator,
            state: Mutex::new(EngineState {
                topics: HashMap::new(),
                topic_ids_by_url: HashMap::new(),
                subscriptions: HashMap::new(),
                compiled: HashMap::new(),
            }),
        }
    }

    // ---- topic registry ----

    pub fn upsert_topic(&self, resource: &Value) -> Result<()> {
        let topic = parse_topic(resource)?;
        let mut state = self.state.lock();
        if let Some(old) = state.topics.get(&topic.id)
            && old.url != topic.url
        {
            let old_url = old.url.clone();
            state.topic_ids_by_url.remove(&old_url);
        }
        debug!(id = %topic.id, url = %topic.url, "registering subscription topic");
        state
            .topic_ids_by_url
            .insert(topic.url.clone(), topic.id.clone());
        state.topics.insert(topic.id.clone(), topic);
        Ok(())
    }

    pub fn remove_topic(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        match state.topics.remove(id) {
            Some(topic) => {
                state.topic_ids_by_url.remove(&topic.url);
                true
            }
            None => false,
        }
    }

    pub fn topic_by_url(&self, url: &str) -> Option<ParsedTopic> {
        let state = self.state.lock();
        let id = state.topic_ids_by_url.get(url)?;
        state.topics.get(id).cloned()
    }

    // ---- subscription registry ----

    /// Validate a Subscription resource against the registered topics
    /// without registering it.
    pub fn validate_subscription(&self, resource: &Value) -> Result<()> {
        let parsed = parse_subscription(resource)?;
        let state = self.state.lock();
        let topic = state
            .topic_ids_by_url
            .get(&parsed.topic_url)
            .and_then(|id| state.topics.get(id))
            .ok_or_else(|| SubscriptionError::UnknownTopic(parsed.topic_url.clone()))?;
        check_filters(&parsed, topic)
    }

    /// Register or update a subscription. Its topic must already be known
    /// and every filter must be allowed by the topic's canFilterBy. Event
    /// history survives updates to the same id.
    pub fn upsert_subscription(&self, resource: &Value) -> Result<()> {
        let mut parsed = parse_subscription(resource)?;
        let mut state = self.state.lock();

        let topic = state
            .topic_ids_by_url
            .get(&parsed.topic_url)
            .and_then(|id| state.topics.get(id))
            .ok_or_else(|| SubscriptionError::UnknownTopic(parsed.topic_url.clone()))?;
        check_filters(&parsed, topic)?;

        if let Some(existing) = state.subscriptions.get(&parsed.id) {
            parsed.event_count = existing.event_count;
            parsed.events = existing.events.clone();
            if parsed.status == SubscriptionStatus::Active {
                // Reactivation clears the error log.
                parsed.errors = Vec::new();
            } else {
                parsed.errors = existing.errors.clone();
            }
        }
        debug!(id = %parsed.id, topic = %parsed.topic_url, status = parsed.status.as_str(),
            "registering subscription");
        state.subscriptions.insert(parsed.id.clone(), parsed);
        Ok(())
    }

    pub fn remove_subscription(&self, id: &str) -> bool {
        self.state.lock().subscriptions.remove(id).is_some()
    }

    pub fn subscription(&self, id: &str) -> Option<ParsedSubscription> {
        self.state.lock().subscriptions.get(id).cloned()
    }

    // ---- lifecycle ----

    /// Activate a subscription and return the handshake bundle.
    pub fn mark_active(&self, id: &str) -> Result<Value> {
        let mut state = self.state.lock();
        let sub = state
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| SubscriptionError::UnknownSubscription(id.to_string()))?;
        sub.status = SubscriptionStatus::Active;
        sub.errors.clear();
        Ok(
            NotificationBundleBuilder::new(&sub.id, &sub.topic_url, NotificationType::Handshake)
                .status(sub.status)
                .events_since_start(sub.event_count)
                .build(),
        )
    }

    pub fn mark_error(&self, id: &str, message: impl Into<String>) -> Result<()> {
        let mut state = self.state.lock();
        let sub = state
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| SubscriptionError::UnknownSubscription(id.to_string()))?;
        sub.status = SubscriptionStatus::Error;
        sub.errors.push(message.into());
        Ok(())
    }

    pub fn mark_off(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let sub = state
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| SubscriptionError::UnknownSubscription(id.to_string()))?;
        sub.status = SubscriptionStatus::Off;
        Ok(())
    }

    /// Turn off subscriptions whose end time has passed. Returns the ids
    /// that were turned off.
    pub fn expire(&self, now: &FhirDateTime) -> Vec<String> {
        let mut state = self.state.lock();
        let mut expired = Vec::new();
        for sub in state.subscriptions.values_mut() {
            if sub.status != SubscriptionStatus::Off
                && sub.end.as_ref().is_some_and(|end| end.0 <= now.0)
            {
                sub.status = SubscriptionStatus::Off;
                expired.push(sub.id.clone());
            }
        }
        expired
    }

    // ---- notification bundles ----

    pub fn heartbeat_bundle(&self, id: &str) -> Result<Value> {
        let state = self.state.lock();
        let sub = state
            .subscriptions
            .get(id)
            .ok_or_else(|| SubscriptionError::UnknownSubscription(id.to_string()))?;
        Ok(
            NotificationBundleBuilder::new(&sub.id, &sub.topic_url, NotificationType::Heartbeat)
                .status(sub.status)
                .events_since_start(sub.event_count)
                .build(),
        )
    }

    /// `$status` for one subscription.
    pub fn status_bundle(&self, id: &str) -> Result<Value> {
        let state = self.state.lock();
        let sub = state
            .subscriptions
            .get(id)
            .ok_or_else(|| SubscriptionError::UnknownSubscription(id.to_string()))?;
        Ok(
            NotificationBundleBuilder::new(&sub.id, &sub.topic_url, NotificationType::QueryStatus)
                .status(sub.status)
                .events_since_start(sub.event_count)
                .errors(&sub.errors)
                .build(),
        )
    }

    /// `$status` across subscriptions, narrowed by id list and status list.
    /// An empty list means no restriction on that axis. Bundles come back
    /// in subscription id order.
    pub fn status_bundles(
        &self,
        ids: &[String],
        statuses: &[SubscriptionStatus],
    ) -> Vec<Value> {
        let state = self.state.lock();
        let mut subs: Vec<&ParsedSubscription> = state
            .subscriptions
            .values()
            .filter(|sub| ids.is_empty() || ids.contains(&sub.id))
            .filter(|sub| statuses.is_empty() || statuses.contains(&sub.status))
            .collect();
        subs.sort_by(|a, b| a.id.cmp(&b.id));
        subs.into_iter()
            .map(|sub| {
                NotificationBundleBuilder::new(
                    &sub.id,
                    &sub.topic_url,
                    NotificationType::QueryStatus,
                )
                .status(sub.status)
                .events_since_start(sub.event_count)
                .errors(&sub.errors)
                .build()
            })
            .collect()
    }

    /// `$events` replay over `[since, until]`, both inclusive and optional.
    pub fn events_bundle(
        &self,
        id: &str,
        since: Option<u64>,
        until: Option<u64>,
    ) -> Result<Value> {
        let state = self.state.lock();
        let sub = state
            .subscriptions
            .get(id)
            .ok_or_else(|| SubscriptionError::UnknownSubscription(id.to_string()))?;
        let events = sub
            .events
            .values()
            .filter(|e| since.is_none_or(|s| e.event_number >= s))
            .filter(|e| until.is_none_or(|u| e.event_number <= u))
            .cloned();
        Ok(
            NotificationBundleBuilder::new(&sub.id, &sub.topic_url, NotificationType::QueryEvent)
                .status(sub.status)
                .events_since_start(sub.event_count)
                .content(sub.content)
                .events(events)
                .build(),
        )
    }

    // ---- trigger evaluation ----

    /// Evaluate one committed change against every active subscription.
    ///
    /// `previous` is the version before the change (absent on create) and
    /// `current` the version after it (absent on delete). Returns the
    /// event-notification bundles to deliver, in subscription id order.
    /// Evaluation failures never propagate; they are recorded on the
    /// affected subscription and the event is skipped.
    pub fn notify(
        &self,
        resource_type: &str,
        interaction: TriggerInteraction,
        previous: Option<&Value>,
        current: Option<&Value>,
        matcher: &dyn FilterMatcher,
    ) -> Vec<(String, Value)> {
        let mut state = self.state.lock();
        let EngineState {
            topics,
            topic_ids_by_url,
            subscriptions,
            compiled,
        } = &mut *state;

        let now = now_utc();
        let mut deliveries = Vec::new();
        let mut ids: Vec<&String> = subscriptions.keys().collect();
        ids.sort();
        let ids: Vec<String> = ids.into_iter().cloned().collect();

        for id in ids {
            let Some(sub) = subscriptions.get_mut(&id) else {
                continue;
            };
            if sub.status != SubscriptionStatus::Active {
                continue;
            }
            if sub.end.as_ref().is_some_and(|end| end.0 <= now.0) {
                sub.status = SubscriptionStatus::Off;
                continue;
            }
            let Some(topic) = topic_ids_by_url
                .get(&sub.topic_url)
                .and_then(|tid| topics.get(tid))
            else {
                continue;
            };
            if topic.status != TopicStatus::Active {
                continue;
            }
            let Some(trigger) = topic.trigger_for(resource_type, interaction) else {
                continue;
            };

            // Delete events carry the last seen version as focus.
            let Some(focus) = current.or(previous) else {
                continue;
            };

            let matched = trigger_match(
                trigger,
                resource_type,
                interaction,
                previous,
                current,
                compiled,
                self.evaluator.as_ref(),
                matcher,
            );
            match matched {
                Ok(true) => {}
                Ok(false) => continue,
                Err(message) => {
                    record_error(sub, message);
                    continue;
                }
            }

            if !sub.filters.is_empty() {
                let applicable: Vec<AppliedFilter> = sub
                    .filters
                    .iter()
                    .filter(|f| {
                        f.resource_type
                            .as_deref()
                            .is_none_or(|rt| rt == resource_type)
                    })
                    .cloned()
                    .collect();
                match matcher.filters_match(resource_type, focus, &applicable) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        record_error(sub, e.to_string());
                        continue;
                    }
                }
            }

            let Some(focus_id) = focus.get("id").and_then(Value::as_str) else {
                continue;
            };
            sub.event_count += 1;
            let event = SubscriptionEvent {
                event_number: sub.event_count,
                timestamp: now.clone(),
                focus_type: resource_type.to_string(),
                focus_id: focus_id.to_string(),
                interaction,
                resource: (sub.content == PayloadContent::FullResource)
                    .then(|| focus.clone()),
            };
            sub.events.insert(event.event_number, event.clone());
            debug!(subscription = %sub.id, event = event.event_number,
                focus = %event.focus_reference(), "subscription event matched");

            let bundle = NotificationBundleBuilder::new(
                &sub.id,
                &sub.topic_url,
                NotificationType::EventNotification,
            )
            .status(sub.status)
            .events_since_start(sub.event_count)
            .content(sub.content)
            .event(event)
            .build();
            deliveries.push((sub.id.clone(), bundle));
        }
        deliveries
    }
}

fn check_filters(parsed: &ParsedSubscription, topic: &ParsedTopic) -> Result<()> {
    for filter in &parsed.filters {
        let resource_type = filter.resource_type.as_deref().unwrap_or_default();
        if !topic.allows_filter(resource_type, &filter.filter_parameter) {
            return Err(SubscriptionError::InvalidSubscription(format!(
                "filter '{}' is not allowed by topic '{}'",
                filter.filter_parameter, parsed.topic_url
            )));
        }
    }
    Ok(())
}

fn record_error(sub: &mut ParsedSubscription, message: String) {
    warn!(subscription = %sub.id, error = %message, "subscription evaluation failed");
    if sub.errors.last() != Some(&message) {
        sub.errors.push(message);
    }
}

/// Trigger criteria precedence: a fixed create/delete verdict decides
/// outright, then FHIRPath criteria's boolean result alone, then the
/// query criteria. A trigger carrying none of these always matches.
#[allow(clippy::too_many_arguments)]
fn trigger_match(
    trigger: &ResourceTrigger,
    resource_type: &str,
    interaction: TriggerInteraction,
    previous: Option<&Value>,
    current: Option<&Value>,
    compiled: &mut HashMap<String, std::result::Result<Arc<dyn CompiledCriteria>, String>>,
    evaluator: &dyn CriteriaEvaluator,
    matcher: &dyn FilterMatcher,
) -> std::result::Result<bool, String> {
    let verdict = trigger
        .query_criteria
        .as_ref()
        .and_then(|c| match interaction {
            TriggerInteraction::Create => c.result_for_create,
            TriggerInteraction::Delete => c.result_for_delete,
            TriggerInteraction::Update => None,
        });
    if let Some(verdict) = verdict {
        return Ok(verdict == QueryResultBehavior::TestPasses);
    }
    if let Some(expression) = &trigger.fhirpath_criteria {
        let entry = compiled
            .entry(expression.clone())
            .or_insert_with(|| evaluator.compile(expression).map_err(|e| e.to_string()));
        return match entry {
            Ok(criteria) => criteria
                .evaluate(CriteriaContext { previous, current })
                .map_err(|e| e.to_string()),
            Err(message) => Err(message.clone()),
        };
    }
    if let Some(criteria) = &trigger.query_criteria {
        return query_criteria_match(criteria, resource_type, previous, current, matcher)
            .map_err(|e| e.to_string());
    }
    Ok(true)
}

fn query_criteria_match(
    criteria: &QueryCriteria,
    resource_type: &str,
    previous: Option<&Value>,
    current: Option<&Value>,
    matcher: &dyn FilterMatcher,
) -> Result<bool> {
    // Absent snapshots were already settled by the fixed verdicts; a side
    // with no snapshot or no query has nothing left to test.
    let previous_ok = match (previous, &criteria.previous) {
        (Some(doc), Some(query)) => matcher.query_matches(resource_type, doc, query)?,
        _ => true,
    };
    let current_ok = match (current, &criteria.current) {
        (Some(doc), Some(query)) => matcher.query_matches(resource_type, doc, query)?,
        _ => true,
    };
    if criteria.require_both {
        Ok(previous_ok && current_ok)
    } else {
        Ok(previous_ok || current_ok)
    }
}
