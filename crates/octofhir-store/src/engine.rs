//! The multi-tenant in-memory engine: one [`ResourceStore`] per resource
//! type plus the search registry, compartments and the subscription engine
//! wired into every commit.
//!
//! Commits of the control resource types (SearchParameter,
//! CompartmentDefinition, SubscriptionTopic, Subscription) maintain the
//! respective registries; every commit then fans out to subscription
//! trigger evaluation while the committing store's write lock is held, so
//! event numbers follow commit order.
//!
//! Subscription-time filters and conditional operation predicates run
//! under the committing store's write lock, so both evaluate with a
//! [`NullResolver`]: chained, `_has` and `_include` clauses resolve
//! nothing there instead of re-entering a store lock.

use crate::bundle;
use crate::outcome::{OutcomeStatus, StoreOutcome};
use crate::record::ResourceRecord;
use crate::store::{Change, ChangeKind, ResourceStore, StoreConfig};
use octofhir_core::{
    EngineError, Interaction, RequestContext, ResourceDocument, ResponseContext, Result, now_utc,
};
use octofhir_search::compartment::{CompartmentDefinition, CompartmentEngine};
use octofhir_search::{
    NullResolver, ParsedQuery, ResourceResolver, SearchOptions, SearchParameter,
    SearchParameterRegistry, SearchTester, SummaryMode, include, projection, sort_documents,
};
use octofhir_subscriptions::{
    AppliedFilter, CriteriaEvaluator, FilterMatcher, SubscriptionEngine, SubscriptionError,
    SubscriptionStatus, TriggerInteraction,
};
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use url::form_urlencoded;

pub struct EngineConfig {
    /// Service base used in bundle links, locations and fullUrls
    pub base_url: String,
    pub search: SearchOptions,
    pub store: StoreConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090/fhir".to_string(),
            search: SearchOptions::default(),
            store: StoreConfig::default(),
        }
    }
}

pub struct MemoryEngine {
    config: EngineConfig,
    registry: Arc<SearchParameterRegistry>,
    compartments: CompartmentEngine,
    subscriptions: Arc<SubscriptionEngine>,
    stores: RwLock<HashMap<String, Arc<ResourceStore>>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            registry: Arc::new(SearchParameterRegistry::with_base_parameters()),
            compartments: CompartmentEngine::with_patient_compartment(),
            subscriptions: Arc::new(SubscriptionEngine::new()),
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Engine with a FHIRPath evaluator wired into subscription criteria.
    pub fn with_evaluator(config: EngineConfig, evaluator: Arc<dyn CriteriaEvaluator>) -> Self {
        Self {
            config,
            registry: Arc::new(SearchParameterRegistry::with_base_parameters()),
            compartments: CompartmentEngine::with_patient_compartment(),
            subscriptions: Arc::new(SubscriptionEngine::with_evaluator(evaluator)),
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &SearchParameterRegistry {
        &self.registry
    }

    pub fn subscriptions(&self) -> &SubscriptionEngine {
        &self.subscriptions
    }

    pub fn compartments(&self) -> &CompartmentEngine {
        &self.compartments
    }

    fn store_for(&self, resource_type: &str) -> Arc<ResourceStore> {
        if let Some(store) = self.stores.read().get(resource_type) {
            return store.clone();
        }
        self.stores
            .write()
            .entry(resource_type.to_string())
            .or_insert_with(|| Arc::new(ResourceStore::new(resource_type, self.config.store)))
            .clone()
    }

    // ---- CRUD ----

    pub fn create(&self, body: Value) -> Result<StoreOutcome> {
        let doc = ResourceDocument::from_value(body)?;
        self.pre_validate(&doc)?;
        let store = self.store_for(doc.resource_type());
        store.create(doc, |change| self.after_commit(change))
    }

    pub fn conditional_create(&self, body: Value, if_none_exist: &str) -> Result<StoreOutcome> {
        let doc = ResourceDocument::from_value(body)?;
        self.pre_validate(&doc)?;
        let resource_type = doc.resource_type().to_string();
        let parsed = ParsedQuery::parse(if_none_exist)?;
        let store = self.store_for(&resource_type);
        let tester = SearchTester::new(&self.registry, &NullResolver);
        store.conditional_create(
            doc,
            |candidate| {
                tester
                    .matches(&resource_type, candidate, &parsed, &self.config.search)
                    .map_err(EngineError::from)
            },
            |change| self.after_commit(change),
        )
    }

    pub fn update(
        &self,
        resource_type: &str,
        id: &str,
        body: Value,
        if_match: Option<u64>,
    ) -> Result<StoreOutcome> {
        let doc = ResourceDocument::from_value(body)?;
        self.pre_validate(&doc)?;
        let store = self.store_for(resource_type);
        store.update(id, doc, if_match, |change| self.after_commit(change))
    }

    pub fn conditional_update(
        &self,
        resource_type: &str,
        query: &str,
        body: Value,
        if_match: Option<u64>,
    ) -> Result<StoreOutcome> {
        let doc = ResourceDocument::from_value(body)?;
        self.pre_validate(&doc)?;
        let parsed = ParsedQuery::parse(query)?;
        let store = self.store_for(resource_type);
        let tester = SearchTester::new(&self.registry, &NullResolver);
        store.conditional_update(
            doc,
            |candidate| {
                tester
                    .matches(resource_type, candidate, &parsed, &self.config.search)
                    .map_err(EngineError::from)
            },
            if_match,
            |change| self.after_commit(change),
        )
    }

    pub fn delete(&self, resource_type: &str, id: &str) -> Result<StoreOutcome> {
        let store = self.store_for(resource_type);
        store.delete(id, |change| self.after_commit(change))
    }

    pub fn conditional_delete(&self, resource_type: &str, query: &str) -> Result<StoreOutcome> {
        let parsed = ParsedQuery::parse(query)?;
        let store = self.store_for(resource_type);
        let tester = SearchTester::new(&self.registry, &NullResolver);
        store.conditional_delete(
            |candidate| {
                tester
                    .matches(resource_type, candidate, &parsed, &self.config.search)
                    .map_err(EngineError::from)
            },
            |change| self.after_commit(change),
        )
    }

    pub fn read(&self, resource_type: &str, id: &str) -> Result<ResourceRecord> {
        self.store_for(resource_type).read(id)
    }

    pub fn vread(&self, resource_type: &str, id: &str, version_id: u64) -> Result<ResourceRecord> {
        self.store_for(resource_type).vread(id, version_id)
    }

    /// Instance history as a history bundle, newest first.
    pub fn history(&self, resource_type: &str, id: &str) -> Result<Value> {
        let records = self.store_for(resource_type).history(id)?;
        Ok(bundle::history(&self.config.base_url, &records))
    }

    /// Turn off subscriptions whose end time has passed.
    pub fn expire_subscriptions(&self) -> Vec<String> {
        self.subscriptions.expire(&now_utc())
    }

    // ---- searches ----

    pub fn search(&self, resource_type: &str, query: &str) -> Result<Value> {
        let parsed = ParsedQuery::parse(query)?;
        let store = self.store_for(resource_type);
        let tester = SearchTester::new(&self.registry, self);
        let mut matches = Vec::new();
        for doc in store.current_snapshot() {
            if tester.matches(resource_type, &doc, &parsed, &self.config.search)? {
                matches.push(doc);
            }
        }
        sort_documents(&mut matches, resource_type, &parsed.sort, &self.registry)?;

        let path = format!("{}/{resource_type}", self.config.base_url);
        self.finish_search(matches, &parsed, &path, query)
    }

    /// System-level search across every store, optionally narrowed by
    /// `_type`. Ordering beyond commit order is not supported here.
    pub fn system_search(&self, query: &str) -> Result<Value> {
        let parsed = ParsedQuery::parse(query)?;
        if !parsed.sort.is_empty() {
            return Err(EngineError::bad_request(
                "_sort is not supported for system-level search",
            ));
        }
        let types: Vec<String> = if parsed.types.is_empty() {
            let stores = self.stores.read();
            let mut types: Vec<String> = stores.keys().cloned().collect();
            types.sort();
            types
        } else {
            parsed.types.clone()
        };

        let tester = SearchTester::new(&self.registry, self);
        let mut matches = Vec::new();
        for resource_type in &types {
            for doc in self.documents_of_type(resource_type) {
                if tester.matches(resource_type, &doc, &parsed, &self.config.search)? {
                    matches.push(doc);
                }
            }
        }
        let path = self.config.base_url.clone();
        self.finish_search(matches, &parsed, &path, query)
    }

    /// Compartment search: all member types for `member_type` None (the
    /// `/*` form), otherwise the one named type.
    pub fn compartment_search(
        &self,
        compartment_type: &str,
        owner_id: &str,
        member_type: Option<&str>,
        query: &str,
    ) -> Result<Value> {
        // The owner itself must exist (or 404/410 accordingly).
        self.store_for(compartment_type).read(owner_id)?;

        let parsed = ParsedQuery::parse(query)?;
        if member_type.is_none() && !parsed.sort.is_empty() {
            return Err(EngineError::bad_request(
                "_sort requires a single member type in compartment search",
            ));
        }
        let member_types: Vec<String> = match member_type {
            Some(t) => vec![t.to_string()],
            None => {
                let mut types = self.compartments.member_types(compartment_type);
                types.sort();
                types
            }
        };

        let tester = SearchTester::new(&self.registry, self);
        let mut matches = Vec::new();
        for resource_type in &member_types {
            for doc in self.documents_of_type(resource_type) {
                if self.compartments.is_in_compartment(
                    &self.registry,
                    compartment_type,
                    owner_id,
                    &doc,
                ) && tester.matches(resource_type, &doc, &parsed, &self.config.search)?
                {
                    matches.push(doc);
                }
            }
        }
        if let Some(resource_type) = member_type {
            sort_documents(&mut matches, resource_type, &parsed.sort, &self.registry)?;
        }

        let member_segment = member_type.unwrap_or("*");
        let path = format!(
            "{}/{compartment_type}/{owner_id}/{member_segment}",
            self.config.base_url
        );
        self.finish_search(matches, &parsed, &path, query)
    }

    /// Shared tail of every search: paging, includes, projection, bundle.
    fn finish_search(
        &self,
        matches: Vec<ResourceDocument>,
        parsed: &ParsedQuery,
        path: &str,
        raw_query: &str,
    ) -> Result<Value> {
        let total = matches.len();
        let self_url = if raw_query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{raw_query}")
        };
        if parsed.summary == SummaryMode::Count {
            return Ok(bundle::searchset(total, &self_url, None, vec![], vec![], true));
        }

        let count = parsed
            .count
            .unwrap_or(self.config.search.default_count)
            .min(self.config.search.max_count);
        let offset = parsed.offset;
        let page: Vec<ResourceDocument> =
            matches.into_iter().skip(offset).take(count).collect();
        let includes = include::expand(&self.registry, self, &page, &parsed.includes)?;
        let next_url = next_link(path, raw_query, offset, count, total);

        let match_entries = page
            .iter()
            .map(|doc| {
                (
                    self.full_url(doc),
                    projection::apply(doc, parsed.summary, &parsed.elements),
                )
            })
            .collect();
        // Included resources are delivered whole; projection applies to
        // the match set only.
        let include_entries = includes
            .iter()
            .map(|doc| (self.full_url(doc), doc.element().clone()))
            .collect();
        Ok(bundle::searchset(
            total,
            &self_url,
            next_url.as_deref(),
            match_entries,
            include_entries,
            false,
        ))
    }

    fn full_url(&self, doc: &ResourceDocument) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url,
            doc.resource_type(),
            doc.id().unwrap_or_default()
        )
    }

    // ---- request boundary ----

    /// Serve one classified request. Errors become OperationOutcome
    /// responses with the matching status code.
    pub fn handle(&self, ctx: &RequestContext) -> ResponseContext {
        match self.dispatch(ctx) {
            Ok(response) => response,
            Err(error) => ResponseContext::new(error.http_status())
                .with_body(bundle::operation_outcome(&error)),
        }
    }

    fn dispatch(&self, ctx: &RequestContext) -> Result<ResponseContext> {
        match &ctx.interaction {
            Interaction::Read => {
                let record = self.read(require_type(ctx)?, require_id(ctx)?)?;
                Ok(resource_response(200, &record))
            }
            Interaction::Vread => {
                let version = ctx
                    .version_id
                    .ok_or_else(|| EngineError::bad_request("vread requires a version id"))?;
                let record = self.vread(require_type(ctx)?, require_id(ctx)?, version)?;
                Ok(resource_response(200, &record))
            }
            Interaction::Create => {
                let body = require_body(ctx)?;
                let outcome = match &ctx.if_none_exist {
                    Some(criteria) => self.conditional_create(body, criteria)?,
                    None => self.create(body)?,
                };
                Ok(self.mutation_response(outcome))
            }
            Interaction::Update => {
                let body = require_body(ctx)?;
                let outcome = self.update(
                    require_type(ctx)?,
                    require_id(ctx)?,
                    body,
                    ctx.if_match,
                )?;
                Ok(self.mutation_response(outcome))
            }
            Interaction::Delete => {
                self.delete(require_type(ctx)?, require_id(ctx)?)?;
                Ok(ResponseContext::new(204))
            }
            Interaction::History => {
                let body = self.history(require_type(ctx)?, require_id(ctx)?)?;
                Ok(ResponseContext::new(200).with_body(body))
            }
            Interaction::TypeSearch => {
                let body = self.search(require_type(ctx)?, &ctx.query)?;
                Ok(ResponseContext::new(200).with_body(body))
            }
            Interaction::SystemSearch => {
                let body = self.system_search(&ctx.query)?;
                Ok(ResponseContext::new(200).with_body(body))
            }
            Interaction::CompartmentSearch => {
                let body = self.compartment_search(
                    require_type(ctx)?,
                    require_id(ctx)?,
                    None,
                    &ctx.query,
                )?;
                Ok(ResponseContext::new(200).with_body(body))
            }
            Interaction::CompartmentTypeSearch => {
                let member = ctx.compartment_member.as_deref().ok_or_else(|| {
                    EngineError::bad_request("compartment search requires a member type")
                })?;
                let body = self.compartment_search(
                    require_type(ctx)?,
                    require_id(ctx)?,
                    Some(member),
                    &ctx.query,
                )?;
                Ok(ResponseContext::new(200).with_body(body))
            }
            Interaction::Operation(op) => self.dispatch_operation(ctx, op),
        }
    }

    fn dispatch_operation(&self, ctx: &RequestContext, op: &str) -> Result<ResponseContext> {
        if require_type(ctx)? != "Subscription" {
            return Err(EngineError::bad_request(format!(
                "unsupported operation ${op}"
            )));
        }
        match (op, ctx.id.as_deref()) {
            ("status", Some(id)) => {
                let body = self.subscriptions.status_bundle(id)?;
                Ok(ResponseContext::new(200).with_body(body))
            }
            ("status", None) => {
                let mut ids = Vec::new();
                let mut statuses = Vec::new();
                for (name, value) in form_urlencoded::parse(ctx.query.as_bytes()) {
                    let values = value.split(',').map(str::trim).filter(|v| !v.is_empty());
                    match name.as_ref() {
                        "id" => ids.extend(values.map(str::to_string)),
                        "status" => statuses.extend(values.map(SubscriptionStatus::from)),
                        _ => {}
                    }
                }
                let bundles = self.subscriptions.status_bundles(&ids, &statuses);
                let entries: Vec<Value> =
                    bundles.into_iter().map(|b| json!({"resource": b})).collect();
                let body = json!({
                    "resourceType": "Bundle",
                    "type": "searchset",
                    "total": entries.len(),
                    "entry": entries
                });
                Ok(ResponseContext::new(200).with_body(body))
            }
            ("events", Some(id)) => {
                let mut since = None;
                let mut until = None;
                for (name, value) in form_urlencoded::parse(ctx.query.as_bytes()) {
                    let parsed = || {
                        value.parse::<u64>().map_err(|_| {
                            EngineError::bad_request(format!("invalid {name} value '{value}'"))
                        })
                    };
                    match name.as_ref() {
                        "eventsSinceNumber" => since = Some(parsed()?),
                        "eventsUntilNumber" => until = Some(parsed()?),
                        _ => {}
                    }
                }
                let body = self.subscriptions.events_bundle(id, since, until)?;
                Ok(ResponseContext::new(200).with_body(body))
            }
            ("events", None) => Err(EngineError::bad_request(
                "$events requires a subscription id",
            )),
            _ => Err(EngineError::bad_request(format!(
                "unsupported operation ${op}"
            ))),
        }
    }

    fn mutation_response(&self, outcome: StoreOutcome) -> ResponseContext {
        let mut response = ResponseContext::new(outcome.status.http())
            .with_body(outcome.record.document.element().clone())
            .with_etag(outcome.record.version_id);
        if outcome.status == OutcomeStatus::Created {
            response = response.with_location(format!(
                "{}/{}",
                self.config.base_url,
                outcome.record.location()
            ));
        }
        response
    }

    // ---- commit plumbing ----

    /// Reject control resources that would fail registration, before any
    /// version is committed.
    fn pre_validate(&self, doc: &ResourceDocument) -> Result<()> {
        match doc.resource_type() {
            "SearchParameter" => {
                SearchParameter::from_document(doc.element())?;
            }
            "CompartmentDefinition" => {
                CompartmentDefinition::from_document(doc.element())?;
            }
            "SubscriptionTopic" => {
                octofhir_subscriptions::parse_topic(doc.element())?;
            }
            "Subscription" => {
                self.subscriptions.validate_subscription(doc.element())?;
            }
            _ => {}
        }
        Ok(())
    }

    fn after_commit(&self, change: Change<'_>) {
        match change.resource_type {
            "SearchParameter" => self.commit_search_parameter(&change),
            "CompartmentDefinition" => self.commit_compartment(&change),
            "SubscriptionTopic" => self.commit_topic(&change),
            "Subscription" => self.commit_subscription(&change),
            _ => {}
        }

        let interaction = match change.kind {
            ChangeKind::Create => TriggerInteraction::Create,
            ChangeKind::Update => TriggerInteraction::Update,
            ChangeKind::Delete => TriggerInteraction::Delete,
        };
        let deliveries = self.subscriptions.notify(
            change.resource_type,
            interaction,
            change.previous.map(ResourceDocument::element),
            change.current.map(ResourceDocument::element),
            self,
        );
        for (subscription, _bundle) in &deliveries {
            debug!(%subscription, resource_type = change.resource_type,
                "notification ready for delivery");
        }
    }

    fn commit_search_parameter(&self, change: &Change<'_>) {
        match (change.current, change.previous) {
            (Some(doc), _) => match SearchParameter::from_document(doc.element()) {
                Ok(param) => self.registry.upsert(param),
                Err(e) => warn!(error = %e, "skipping unparseable SearchParameter"),
            },
            (None, Some(previous)) => {
                if let Some(url) = previous.element().get("url").and_then(Value::as_str) {
                    self.registry.remove_by_url(url);
                }
            }
            (None, None) => {}
        }
    }

    fn commit_compartment(&self, change: &Change<'_>) {
        match (change.current, change.previous) {
            (Some(doc), _) => match CompartmentDefinition::from_document(doc.element())
                .and_then(|def| self.compartments.register(def, &self.registry))
            {
                Ok(()) => {}
                Err(e) => warn!(error = %e, "skipping invalid CompartmentDefinition"),
            },
            (None, Some(previous)) => {
                if let Some(code) = previous.element().get("code").and_then(Value::as_str) {
                    self.compartments.remove(code);
                }
            }
            (None, None) => {}
        }
    }

    fn commit_topic(&self, change: &Change<'_>) {
        match (change.current, change.previous) {
            (Some(doc), _) => {
                if let Err(e) = self.subscriptions.upsert_topic(doc.element()) {
                    warn!(error = %e, "skipping invalid SubscriptionTopic");
                }
            }
            (None, Some(previous)) => {
                if let Some(id) = previous.id() {
                    self.subscriptions.remove_topic(id);
                }
            }
            (None, None) => {}
        }
    }

    fn commit_subscription(&self, change: &Change<'_>) {
        match (change.current, change.previous) {
            (Some(doc), _) => {
                if let Err(e) = self.subscriptions.upsert_subscription(doc.element()) {
                    warn!(error = %e, "skipping invalid Subscription");
                    return;
                }
                let requested =
                    doc.element().get("status").and_then(Value::as_str) == Some("requested");
                if requested && let Some(id) = doc.id() {
                    match self.subscriptions.mark_active(id) {
                        Ok(_handshake) => {
                            debug!(subscription = id, "handshake complete, subscription active");
                        }
                        Err(e) => warn!(error = %e, "subscription activation failed"),
                    }
                }
            }
            (None, Some(previous)) => {
                if let Some(id) = previous.id() {
                    self.subscriptions.remove_subscription(id);
                }
            }
            (None, None) => {}
        }
    }
}

impl ResourceResolver for MemoryEngine {
    fn resolve(&self, resource_type: &str, id: &str) -> Option<ResourceDocument> {
        let store = self.stores.read().get(resource_type)?.clone();
        store.read(id).ok().map(|record| record.document)
    }

    fn documents_of_type(&self, resource_type: &str) -> Vec<ResourceDocument> {
        self.stores
            .read()
            .get(resource_type)
            .map(|store| store.current_snapshot())
            .unwrap_or_default()
    }
}

impl FilterMatcher for MemoryEngine {
    fn query_matches(
        &self,
        resource_type: &str,
        document: &Value,
        query: &str,
    ) -> std::result::Result<bool, SubscriptionError> {
        let parsed = ParsedQuery::parse(query)
            .map_err(|e| SubscriptionError::Filter(e.to_string()))?;
        let doc = ResourceDocument::from_value(document.clone())
            .map_err(|e| SubscriptionError::Filter(e.to_string()))?;
        // Runs under a store write lock; chained lookups are off-limits.
        let tester = SearchTester::new(&self.registry, &NullResolver);
        tester
            .matches(resource_type, &doc, &parsed, &self.config.search)
            .map_err(|e| SubscriptionError::Filter(e.to_string()))
    }

    fn filters_match(
        &self,
        resource_type: &str,
        document: &Value,
        filters: &[AppliedFilter],
    ) -> std::result::Result<bool, SubscriptionError> {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for filter in filters {
            let (name, value) = filter.as_query_pair();
            serializer.append_pair(&name, &value);
        }
        self.query_matches(resource_type, document, &serializer.finish())
    }
}

fn require_type<'a>(ctx: &'a RequestContext) -> Result<&'a str> {
    ctx.resource_type
        .as_deref()
        .ok_or_else(|| EngineError::bad_request("request has no resource type"))
}

fn require_id<'a>(ctx: &'a RequestContext) -> Result<&'a str> {
    ctx.id
        .as_deref()
        .ok_or_else(|| EngineError::bad_request("request has no resource id"))
}

fn require_body(ctx: &RequestContext) -> Result<Value> {
    ctx.body
        .clone()
        .ok_or_else(|| EngineError::bad_request("request requires a body"))
}

fn resource_response(status: u16, record: &ResourceRecord) -> ResponseContext {
    ResponseContext::new(status)
        .with_body(record.document.element().clone())
        .with_etag(record.version_id)
}

/// Next-page link: the original query minus `_offset`, with paging pairs
/// appended. The self link keeps the raw query verbatim instead.
fn next_link(
    path: &str,
    raw_query: &str,
    offset: usize,
    count: usize,
    total: usize,
) -> Option<String> {
    if count == 0 || offset + count >= total {
        return None;
    }
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut has_count = false;
    for (name, value) in form_urlencoded::parse(raw_query.as_bytes()) {
        if name == "_offset" {
            continue;
        }
        if name == "_count" {
            has_count = true;
        }
        serializer.append_pair(&name, &value);
    }
    if !has_count {
        serializer.append_pair("_count", &count.to_string());
    }
    serializer.append_pair("_offset", &(offset + count).to_string());
    Some(format!("{path}?{}", serializer.finish()))
}
