use crate::error::{EngineError, Result};
use crate::time::FhirDateTime;
use serde_json::{Map, Value, json};

/// An opaque FHIR resource document.
///
/// The engine never interprets clinical content; it only needs the type name,
/// the logical id, the version metadata and element-tree access for search
/// extraction. Everything else passes through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDocument {
    resource_type: String,
    body: Value,
}

impl ResourceDocument {
    /// Wrap a JSON document. Fails when `resourceType` is absent or not a string.
    pub fn from_value(body: Value) -> Result<Self> {
        let resource_type = body
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::bad_request("Document has no resourceType"))?
            .to_string();
        if !body.is_object() {
            return Err(EngineError::bad_request("Document must be a JSON object"));
        }
        Ok(Self {
            resource_type,
            body,
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: &str) {
        if let Value::Object(map) = &mut self.body {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
    }

    pub fn version_id(&self) -> Option<u64> {
        self.body
            .get("meta")
            .and_then(|m| m.get("versionId"))
            .and_then(Value::as_str)
            .and_then(|v| v.parse().ok())
    }

    pub fn last_updated(&self) -> Option<FhirDateTime> {
        self.body
            .get("meta")
            .and_then(|m| m.get("lastUpdated"))
            .and_then(Value::as_str)
            .and_then(|v| v.parse().ok())
    }

    /// Stamp server-controlled metadata onto `meta`, preserving any other
    /// meta content the client supplied.
    pub fn stamp_meta(&mut self, version_id: u64, last_updated: &FhirDateTime) {
        let Value::Object(map) = &mut self.body else {
            return;
        };
        let meta = map
            .entry("meta".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(meta) = meta {
            meta.insert("versionId".to_string(), json!(version_id.to_string()));
            meta.insert("lastUpdated".to_string(), json!(last_updated.to_string()));
        }
    }

    /// Borrow the underlying element tree.
    pub fn element(&self) -> &Value {
        &self.body
    }

    pub fn into_value(self) -> Value {
        self.body
    }

    /// True when `other` names the same resource (type + id).
    pub fn same_identity(&self, other: &ResourceDocument) -> bool {
        self.resource_type == other.resource_type
            && self.id().is_some()
            && self.id() == other.id()
    }
}
