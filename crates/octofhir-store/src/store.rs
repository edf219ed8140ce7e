//! Per-type versioned resource store.
//!
//! One store holds every version chain of a single resource type behind
//! one `RwLock`. Mutations run the `after_commit` callback while the write
//! lock is still held, so downstream consumers (index maintenance,
//! subscription fan-out) observe commits in lock order and event numbering
//! stays aligned with version numbering.
//!
//! Conditional operations evaluate their predicate under the same write
//! lock. A predicate must therefore never read back into any store; the
//! engine hands conditional predicates a resolver that resolves nothing.

use crate::outcome::StoreOutcome;
use crate::record::{ResourceRecord, VersionChain};
use octofhir_core::{
    EngineError, ResourceDocument, Result, generate_id, now_utc, validate_id,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Honor the id in a create body instead of assigning a fresh one
    pub allow_client_assigned_ids: bool,
    /// Let update create the resource when the id does not exist yet
    pub allow_create_as_update: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            allow_client_assigned_ids: true,
            allow_create_as_update: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// A committed change, handed to `after_commit` under the write lock.
pub struct Change<'a> {
    pub kind: ChangeKind,
    pub resource_type: &'a str,
    pub previous: Option<&'a ResourceDocument>,
    pub current: Option<&'a ResourceDocument>,
}

type State = HashMap<String, VersionChain>;

pub struct ResourceStore {
    resource_type: String,
    config: StoreConfig,
    state: RwLock<State>,
}

impl ResourceStore {
    pub fn new(resource_type: impl Into<String>, config: StoreConfig) -> Self {
        Self {
            resource_type: resource_type.into(),
            config,
            state: RwLock::new(HashMap::new()),
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    // ---- reads ----

    pub fn read(&self, id: &str) -> Result<ResourceRecord> {
        let state = self.state.read();
        let chain = state
            .get(id)
            .ok_or_else(|| EngineError::not_found(&self.resource_type, id))?;
        match chain.live() {
            Some(record) => Ok(record.clone()),
            None => Err(EngineError::gone(&self.resource_type, id)),
        }
    }

    pub fn vread(&self, id: &str, version_id: u64) -> Result<ResourceRecord> {
        let state = self.state.read();
        let record = state
            .get(id)
            .and_then(|chain| chain.version(version_id))
            .ok_or_else(|| EngineError::not_found(&self.resource_type, id))?;
        if record.deleted {
            return Err(EngineError::gone(&self.resource_type, id));
        }
        Ok(record.clone())
    }

    /// All versions of `id`, newest first, tombstones included.
    pub fn history(&self, id: &str) -> Result<Vec<ResourceRecord>> {
        let state = self.state.read();
        let chain = state
            .get(id)
            .ok_or_else(|| EngineError::not_found(&self.resource_type, id))?;
        Ok(chain.history())
    }

    /// Current versions of every live resource.
    pub fn current_snapshot(&self) -> Vec<ResourceDocument> {
        self.state
            .read()
            .values()
            .filter_map(|chain| chain.live().map(|r| r.document.clone()))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.state
            .read()
            .values()
            .filter(|chain| chain.live().is_some())
            .count()
    }

    // ---- mutations ----

    pub fn create(
        &self,
        doc: ResourceDocument,
        after_commit: impl FnOnce(Change<'_>),
    ) -> Result<StoreOutcome> {
        self.check_type(&doc)?;
        let mut state = self.state.write();
        self.create_locked(&mut state, doc, after_commit)
    }

    pub fn update(
        &self,
        id: &str,
        doc: ResourceDocument,
        if_match: Option<u64>,
        after_commit: impl FnOnce(Change<'_>),
    ) -> Result<StoreOutcome> {
        self.check_type(&doc)?;
        let mut state = self.state.write();
        self.update_locked(&mut state, id, doc, if_match, after_commit)
    }

    pub fn delete(
        &self,
        id: &str,
        after_commit: impl FnOnce(Change<'_>),
    ) -> Result<StoreOutcome> {
        let mut state = self.state.write();
        self.delete_locked(&mut state, id, after_commit)
    }

    // ---- conditional mutations ----
    //
    // The 0/1/many discipline: no match behaves like the plain operation
    // (or fails for delete), exactly one match operates on it, more than
    // one match rejects without mutating.

    /// `If-None-Exist` create: an existing single match is returned as-is
    /// with an OK outcome instead of creating a duplicate.
    pub fn conditional_create(
        &self,
        doc: ResourceDocument,
        predicate: impl Fn(&ResourceDocument) -> Result<bool>,
        after_commit: impl FnOnce(Change<'_>),
    ) -> Result<StoreOutcome> {
        self.check_type(&doc)?;
        let mut state = self.state.write();
        match self.matching_records(&state, &predicate)?.as_slice() {
            [] => self.create_locked(&mut state, doc, after_commit),
            [existing] => Ok(StoreOutcome::ok(existing.clone())),
            _ => Err(EngineError::precondition_failed(
                "conditional create matched multiple resources",
            )),
        }
    }

    pub fn conditional_update(
        &self,
        doc: ResourceDocument,
        predicate: impl Fn(&ResourceDocument) -> Result<bool>,
        if_match: Option<u64>,
        after_commit: impl FnOnce(Change<'_>),
    ) -> Result<StoreOutcome> {
        self.check_type(&doc)?;
        let mut state = self.state.write();
        match self.matching_records(&state, &predicate)?.as_slice() {
            [] => match doc.id() {
                Some(id) => {
                    let id = id.to_string();
                    self.update_locked(&mut state, &id, doc, if_match, after_commit)
                }
                None => self.create_locked(&mut state, doc, after_commit),
            },
            [existing] => {
                if doc.id().is_some_and(|id| id != existing.id) {
                    return Err(EngineError::bad_request(format!(
                        "conditional update matched {}/{} but the body carries a different id",
                        self.resource_type, existing.id
                    )));
                }
                let id = existing.id.clone();
                self.update_locked(&mut state, &id, doc, if_match, after_commit)
            }
            _ => Err(EngineError::precondition_failed(
                "conditional update matched multiple resources",
            )),
        }
    }

    pub fn conditional_delete(
        &self,
        predicate: impl Fn(&ResourceDocument) -> Result<bool>,
        after_commit: impl FnOnce(Change<'_>),
    ) -> Result<StoreOutcome> {
        let mut state = self.state.write();
        match self.matching_records(&state, &predicate)?.as_slice() {
            [] => Err(EngineError::not_found(&self.resource_type, "?")),
            [existing] => {
                let id = existing.id.clone();
                self.delete_locked(&mut state, &id, after_commit)
            }
            _ => Err(EngineError::precondition_failed(
                "conditional delete matched multiple resources",
            )),
        }
    }

    // ---- internals, write lock held ----

    fn create_locked(
        &self,
        state: &mut State,
        mut doc: ResourceDocument,
        after_commit: impl FnOnce(Change<'_>),
    ) -> Result<StoreOutcome> {
        let id = match doc.id() {
            Some(id) if self.config.allow_client_assigned_ids => {
                validate_id(id)?;
                if state.get(id).and_then(VersionChain::live).is_some() {
                    return Err(EngineError::conflict(format!(
                        "{}/{} already exists",
                        self.resource_type, id
                    )));
                }
                id.to_string()
            }
            _ => generate_id(),
        };

        let chain = state.entry(id.clone()).or_insert_with(VersionChain::new);
        let version_id = chain.next_version();
        let now = now_utc();
        doc.set_id(&id);
        doc.stamp_meta(version_id, &now);
        let record = ResourceRecord {
            resource_type: self.resource_type.clone(),
            id,
            version_id,
            last_updated: now,
            document: doc,
            deleted: false,
        };
        chain.push(record.clone());
        debug!(resource = %record.reference(), version = version_id, "created resource");
        after_commit(Change {
            kind: ChangeKind::Create,
            resource_type: &self.resource_type,
            previous: None,
            current: Some(&record.document),
        });
        Ok(StoreOutcome::created(record))
    }

    fn update_locked(
        &self,
        state: &mut State,
        id: &str,
        mut doc: ResourceDocument,
        if_match: Option<u64>,
        after_commit: impl FnOnce(Change<'_>),
    ) -> Result<StoreOutcome> {
        validate_id(id)?;
        if doc.id().is_some_and(|body_id| body_id != id) {
            return Err(EngineError::bad_request(
                "resource id in body does not match the request id",
            ));
        }

        let previous = state.get(id).and_then(VersionChain::live).cloned();
        match (&previous, if_match) {
            (Some(current), Some(expected)) if current.version_id != expected => {
                return Err(EngineError::precondition_failed(format!(
                    "version mismatch: expected {expected}, found {}",
                    current.version_id
                )));
            }
            (None, Some(_)) => {
                return Err(EngineError::precondition_failed(
                    "If-Match given but no current version exists",
                ));
            }
            _ => {}
        }
        if previous.is_none()
            && !state.contains_key(id)
            && !self.config.allow_create_as_update
        {
            return Err(EngineError::not_found(&self.resource_type, id));
        }

        let chain = state
            .entry(id.to_string())
            .or_insert_with(VersionChain::new);
        let version_id = chain.next_version();
        let now = now_utc();
        doc.set_id(id);
        doc.stamp_meta(version_id, &now);
        let record = ResourceRecord {
            resource_type: self.resource_type.clone(),
            id: id.to_string(),
            version_id,
            last_updated: now,
            document: doc,
            deleted: false,
        };
        chain.push(record.clone());
        debug!(resource = %record.reference(), version = version_id, "updated resource");
        match &previous {
            Some(prev) => {
                after_commit(Change {
                    kind: ChangeKind::Update,
                    resource_type: &self.resource_type,
                    previous: Some(&prev.document),
                    current: Some(&record.document),
                });
                Ok(StoreOutcome::ok(record))
            }
            // Create-as-update, including revival after delete.
            None => {
                after_commit(Change {
                    kind: ChangeKind::Create,
                    resource_type: &self.resource_type,
                    previous: None,
                    current: Some(&record.document),
                });
                Ok(StoreOutcome::created(record))
            }
        }
    }

    fn delete_locked(
        &self,
        state: &mut State,
        id: &str,
        after_commit: impl FnOnce(Change<'_>),
    ) -> Result<StoreOutcome> {
        let chain = state
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(&self.resource_type, id))?;
        let previous = chain
            .live()
            .cloned()
            .ok_or_else(|| EngineError::not_found(&self.resource_type, id))?;

        let version_id = chain.next_version();
        let now = now_utc();
        let mut tombstone_doc = previous.document.clone();
        tombstone_doc.stamp_meta(version_id, &now);
        let record = ResourceRecord {
            resource_type: self.resource_type.clone(),
            id: id.to_string(),
            version_id,
            last_updated: now,
            document: tombstone_doc,
            deleted: true,
        };
        chain.push(record.clone());
        debug!(resource = %record.reference(), version = version_id, "deleted resource");
        after_commit(Change {
            kind: ChangeKind::Delete,
            resource_type: &self.resource_type,
            previous: Some(&previous.document),
            current: None,
        });
        Ok(StoreOutcome::no_content(record))
    }

    fn matching_records(
        &self,
        state: &State,
        predicate: &impl Fn(&ResourceDocument) -> Result<bool>,
    ) -> Result<Vec<ResourceRecord>> {
        let mut matches = Vec::new();
        for chain in state.values() {
            if let Some(record) = chain.live()
                && predicate(&record.document)?
            {
                matches.push(record.clone());
                if matches.len() > 1 {
                    break;
                }
            }
        }
        Ok(matches)
    }

    fn check_type(&self, doc: &ResourceDocument) -> Result<()> {
        if doc.resource_type() != self.resource_type {
            return Err(EngineError::bad_request(format!(
                "expected a {} resource, got {}",
                self.resource_type,
                doc.resource_type()
            )));
        }
        Ok(())
    }
}
