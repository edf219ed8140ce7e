//! Version chains: the full history of one logical resource.

use octofhir_core::{FhirDateTime, ResourceDocument};

/// One stored version of a resource.
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub resource_type: String,
    pub id: String,
    pub version_id: u64,
    pub last_updated: FhirDateTime,
    pub document: ResourceDocument,
    /// Tombstone marker; the document holds the last content before deletion
    pub deleted: bool,
}

impl ResourceRecord {
    pub fn location(&self) -> String {
        format!(
            "{}/{}/_history/{}",
            self.resource_type, self.id, self.version_id
        )
    }

    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

/// All versions of one logical id, oldest first. Version ids are assigned
/// here and are contiguous from 1, tombstones included.
#[derive(Debug, Default)]
pub(crate) struct VersionChain {
    versions: Vec<ResourceRecord>,
}

impl VersionChain {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_version(&self) -> u64 {
        self.versions.last().map_or(1, |r| r.version_id + 1)
    }

    pub(crate) fn push(&mut self, record: ResourceRecord) {
        debug_assert_eq!(record.version_id, self.next_version());
        self.versions.push(record);
    }

    /// The latest version, tombstone or not.
    pub(crate) fn current(&self) -> Option<&ResourceRecord> {
        self.versions.last()
    }

    /// The latest version if it is live.
    pub(crate) fn live(&self) -> Option<&ResourceRecord> {
        self.versions.last().filter(|r| !r.deleted)
    }

    pub(crate) fn version(&self, version_id: u64) -> Option<&ResourceRecord> {
        // Contiguous from 1, so the index is direct.
        let index = usize::try_from(version_id).ok()?.checked_sub(1)?;
        self.versions.get(index)
    }

    /// All versions, newest first.
    pub(crate) fn history(&self) -> Vec<ResourceRecord> {
        self.versions.iter().rev().cloned().collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_core::now_utc;
    use serde_json::json;

    fn record(version_id: u64, deleted: bool) -> ResourceRecord {
        ResourceRecord {
            resource_type: "Patient".to_string(),
            id: "p1".to_string(),
            version_id,
            last_updated: now_utc(),
            document: ResourceDocument::from_value(json!({
                "resourceType": "Patient", "id": "p1"
            }))
            .unwrap(),
            deleted,
        }
    }

    #[test]
    fn versions_are_contiguous() {
        let mut chain = VersionChain::new();
        assert_eq!(chain.next_version(), 1);
        chain.push(record(1, false));
        chain.push(record(2, false));
        assert_eq!(chain.next_version(), 3);
        assert_eq!(chain.version(2).unwrap().version_id, 2);
        assert!(chain.version(3).is_none());
    }

    #[test]
    fn live_excludes_tombstones() {
        let mut chain = VersionChain::new();
        chain.push(record(1, false));
        chain.push(record(2, true));
        assert!(chain.live().is_none());
        assert_eq!(chain.current().unwrap().version_id, 2);
    }

    #[test]
    fn history_is_newest_first() {
        let mut chain = VersionChain::new();
        chain.push(record(1, false));
        chain.push(record(2, false));
        let versions: Vec<u64> = chain.history().iter().map(|r| r.version_id).collect();
        assert_eq!(versions, vec![2, 1]);
    }
}
