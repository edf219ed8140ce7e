//! Compartment membership.
//!
//! A compartment definition maps member resource types to the reference
//! parameter codes that tie a member to the compartment owner. Membership
//! is re-evaluated per query against those parameters, which keeps it
//! automatically consistent with updates to the member documents.

use crate::error::{Result, SearchError};
use crate::parameters::SearchParameterType;
use crate::path;
use crate::registry::SearchParameterRegistry;
use crate::types::reference;
use octofhir_core::ResourceDocument;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CompartmentDefinition {
    /// The compartment's owner resource type, e.g. "Patient"
    pub code: String,
    /// Member resource type to linking parameter codes
    pub resources: HashMap<String, Vec<String>>,
}

impl CompartmentDefinition {
    /// Parse a CompartmentDefinition resource. Resource entries without
    /// params do not participate in the compartment.
    pub fn from_document(doc: &Value) -> Result<Self> {
        let code = doc
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SearchError::InvalidQuery("CompartmentDefinition is missing 'code'".to_string())
            })?
            .to_string();
        let mut resources = HashMap::new();
        if let Some(entries) = doc.get("resource").and_then(Value::as_array) {
            for entry in entries {
                let Some(resource_type) = entry.get("code").and_then(Value::as_str) else {
                    continue;
                };
                let params: Vec<String> = entry
                    .get("param")
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                if !params.is_empty() {
                    resources.insert(resource_type.to_string(), params);
                }
            }
        }
        Ok(Self { code, resources })
    }

    /// The bundled Patient compartment covering the seeded clinical types.
    pub fn patient() -> Self {
        let mut resources = HashMap::new();
        resources.insert(
            "Observation".to_string(),
            vec!["subject".to_string(), "performer".to_string()],
        );
        resources.insert("Encounter".to_string(), vec!["subject".to_string()]);
        resources.insert("Condition".to_string(), vec!["subject".to_string()]);
        Self {
            code: "Patient".to_string(),
            resources,
        }
    }
}

#[derive(Default)]
pub struct CompartmentEngine {
    definitions: RwLock<HashMap<String, CompartmentDefinition>>,
}

impl CompartmentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine pre-loaded with the bundled Patient compartment.
    pub fn with_patient_compartment() -> Self {
        let engine = Self::new();
        engine
            .definitions
            .write()
            .insert("Patient".to_string(), CompartmentDefinition::patient());
        engine
    }

    /// Register a definition, validating its parameter codes against the
    /// registry so a broken definition fails at registration, not at query
    /// time.
    pub fn register(
        &self,
        definition: CompartmentDefinition,
        registry: &SearchParameterRegistry,
    ) -> Result<()> {
        for (resource_type, codes) in &definition.resources {
            for code in codes {
                let param = registry.get(resource_type, code).ok_or_else(|| {
                    SearchError::unknown_parameter(resource_type, code)
                })?;
                if param.param_type != SearchParameterType::Reference {
                    return Err(SearchError::InvalidChain(code.clone()));
                }
            }
        }
        info!(compartment = %definition.code, "registering compartment definition");
        self.definitions
            .write()
            .insert(definition.code.clone(), definition);
        Ok(())
    }

    pub fn remove(&self, code: &str) -> bool {
        self.definitions.write().remove(code).is_some()
    }

    /// The linking parameter codes for a member type, used to synthesize
    /// the equivalent OR filter.
    pub fn param_codes_for(&self, compartment: &str, resource_type: &str) -> Vec<String> {
        self.definitions
            .read()
            .get(compartment)
            .and_then(|d| d.resources.get(resource_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Member types a compartment spans.
    pub fn member_types(&self, compartment: &str) -> Vec<String> {
        self.definitions
            .read()
            .get(compartment)
            .map(|d| d.resources.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Is `doc` in the compartment of `compartment_type/owner_id`?
    ///
    /// The owner document itself is always a member of its own compartment.
    pub fn is_in_compartment(
        &self,
        registry: &SearchParameterRegistry,
        compartment_type: &str,
        owner_id: &str,
        doc: &ResourceDocument,
    ) -> bool {
        if doc.resource_type() == compartment_type && doc.id() == Some(owner_id) {
            return true;
        }
        let owner_reference = format!("{compartment_type}/{owner_id}");
        for code in self.param_codes_for(compartment_type, doc.resource_type()) {
            let Some(param) = registry.get(doc.resource_type(), &code) else {
                continue;
            };
            for expression in param.expressions_for(doc.resource_type()) {
                for element in path::extract(doc.element(), expression) {
                    if reference::matches(element, &owner_reference, None, &param.target) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> ResourceDocument {
        ResourceDocument::from_value(value).unwrap()
    }

    #[test]
    fn patient_compartment_membership() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let engine = CompartmentEngine::with_patient_compartment();

        let mine = doc(json!({
            "resourceType": "Observation", "id": "o1",
            "subject": {"reference": "Patient/p1"}
        }));
        let theirs = doc(json!({
            "resourceType": "Observation", "id": "o2",
            "subject": {"reference": "Patient/p2"}
        }));
        assert!(engine.is_in_compartment(&registry, "Patient", "p1", &mine));
        assert!(!engine.is_in_compartment(&registry, "Patient", "p1", &theirs));
    }

    #[test]
    fn owner_is_in_its_own_compartment() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let engine = CompartmentEngine::with_patient_compartment();
        let owner = doc(json!({"resourceType": "Patient", "id": "p1"}));
        assert!(engine.is_in_compartment(&registry, "Patient", "p1", &owner));
        assert!(!engine.is_in_compartment(&registry, "Patient", "p2", &owner));
    }

    #[test]
    fn any_linking_param_grants_membership() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let engine = CompartmentEngine::with_patient_compartment();
        let performed = doc(json!({
            "resourceType": "Observation", "id": "o3",
            "subject": {"reference": "Group/g1"},
            "performer": [{"reference": "Patient/p1"}]
        }));
        assert!(engine.is_in_compartment(&registry, "Patient", "p1", &performed));
    }

    #[test]
    fn register_validates_codes() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let engine = CompartmentEngine::new();
        let mut resources = HashMap::new();
        resources.insert("Observation".to_string(), vec!["bogus".to_string()]);
        let bad = CompartmentDefinition {
            code: "Patient".to_string(),
            resources,
        };
        assert!(engine.register(bad, &registry).is_err());

        let mut resources = HashMap::new();
        resources.insert("Observation".to_string(), vec!["status".to_string()]);
        let not_a_reference = CompartmentDefinition {
            code: "Patient".to_string(),
            resources,
        };
        assert!(engine.register(not_a_reference, &registry).is_err());
    }

    #[test]
    fn from_document_parses_resource_entries() {
        let parsed = CompartmentDefinition::from_document(&json!({
            "resourceType": "CompartmentDefinition",
            "code": "Encounter",
            "resource": [
                {"code": "Observation", "param": ["encounter"]},
                {"code": "Binary"}
            ]
        }))
        .unwrap();
        assert_eq!(parsed.code, "Encounter");
        assert_eq!(
            parsed.resources.get("Observation"),
            Some(&vec!["encounter".to_string()])
        );
        assert!(!parsed.resources.contains_key("Binary"));
    }
}
