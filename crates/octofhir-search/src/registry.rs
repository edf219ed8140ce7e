//! Search parameter registry.
//!
//! Parameters are indexed three ways: by (resource type, code) for query
//! resolution, by canonical URL for conformance-resource updates, and a
//! common set for parameters whose base is Resource/DomainResource. DashMap
//! keeps reads lock-free so registry updates never block searches.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::parameters::{CompositeComponent, SearchParameter, SearchParameterType};

#[derive(Debug, Default)]
pub struct SearchParameterRegistry {
    /// Parameters indexed by (resource_type, code)
    by_resource: DashMap<(String, String), Arc<SearchParameter>>,
    /// All parameters by canonical URL
    by_url: DashMap<String, Arc<SearchParameter>>,
    /// Parameters whose base includes "Resource" or "DomainResource"
    common: DashMap<String, Arc<SearchParameter>>,
}

impl SearchParameterRegistry {
    pub fn new() -> Self {
        Self {
            by_resource: DashMap::new(),
            by_url: DashMap::new(),
            common: DashMap::new(),
        }
    }

    /// Registry pre-seeded with the common result parameters and a bundled
    /// set of clinical parameters, so the engine is usable before any
    /// SearchParameter resources are stored.
    pub fn with_base_parameters() -> Self {
        let registry = Self::new();
        for param in base_parameters() {
            registry.register(param);
        }
        registry
    }

    /// Register a search parameter, replacing any previous definition with
    /// the same canonical URL.
    pub fn register(&self, param: SearchParameter) {
        let param = Arc::new(param);
        debug!(code = %param.code, url = %param.url, "registering search parameter");

        self.by_url.insert(param.url.clone(), param.clone());
        if param.is_common() {
            self.common.insert(param.code.clone(), param.clone());
        }
        for base in &param.base {
            self.by_resource
                .insert((base.clone(), param.code.clone()), param.clone());
        }
    }

    /// Alias for `register()` used by incremental conformance updates.
    pub fn upsert(&self, param: SearchParameter) {
        self.register(param);
    }

    /// Remove a search parameter by its canonical URL.
    ///
    /// Returns true if the parameter was found and removed.
    pub fn remove_by_url(&self, url: &str) -> bool {
        if let Some((_, param)) = self.by_url.remove(url) {
            for base in &param.base {
                if base == "Resource" || base == "DomainResource" {
                    self.common.remove(&param.code);
                } else {
                    self.by_resource.remove(&(base.clone(), param.code.clone()));
                }
            }
            true
        } else {
            false
        }
    }

    /// Resolve a parameter for a resource type, falling back to the common set.
    pub fn get(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameter>> {
        let key = (resource_type.to_string(), code.to_string());
        if let Some(param) = self.by_resource.get(&key) {
            return Some(param.clone());
        }
        self.common.get(code).map(|p| p.clone())
    }

    pub fn get_by_url(&self, url: &str) -> Option<Arc<SearchParameter>> {
        self.by_url.get(url).map(|entry| entry.value().clone())
    }

    /// All parameters applicable to a resource type, common ones included.
    pub fn get_all_for_type(&self, resource_type: &str) -> Vec<Arc<SearchParameter>> {
        let mut params: Vec<_> = self.common.iter().map(|e| e.value().clone()).collect();
        params.extend(
            self.by_resource
                .iter()
                .filter(|e| e.key().0 == resource_type)
                .map(|e| e.value().clone()),
        );
        params
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }
}

fn sp(
    code: &str,
    url_tail: &str,
    param_type: SearchParameterType,
    base: &[&str],
    expression: &str,
) -> SearchParameter {
    SearchParameter::new(
        code,
        format!("http://hl7.org/fhir/SearchParameter/{url_tail}"),
        param_type,
        base.iter().map(|b| b.to_string()).collect(),
    )
    .with_expression(expression)
}

/// The bundled definitions seeded by `with_base_parameters`.
fn base_parameters() -> Vec<SearchParameter> {
    use SearchParameterType::*;

    vec![
        sp("_id", "Resource-id", Token, &["Resource"], "Resource.id"),
        sp(
            "_lastUpdated",
            "Resource-lastUpdated",
            Date,
            &["Resource"],
            "Resource.meta.lastUpdated",
        ),
        // Patient
        sp("name", "Patient-name", String, &["Patient"], "Patient.name"),
        sp(
            "family",
            "individual-family",
            String,
            &["Patient"],
            "Patient.name.family",
        ),
        sp(
            "given",
            "individual-given",
            String,
            &["Patient"],
            "Patient.name.given",
        ),
        sp(
            "identifier",
            "Patient-identifier",
            Token,
            &["Patient"],
            "Patient.identifier",
        ),
        sp(
            "birthdate",
            "individual-birthdate",
            Date,
            &["Patient"],
            "Patient.birthDate",
        ),
        sp(
            "gender",
            "individual-gender",
            Token,
            &["Patient"],
            "Patient.gender",
        ),
        sp(
            "organization",
            "Patient-organization",
            Reference,
            &["Patient"],
            "Patient.managingOrganization",
        )
        .with_targets(vec!["Organization".to_string()]),
        sp(
            "general-practitioner",
            "Patient-general-practitioner",
            Reference,
            &["Patient"],
            "Patient.generalPractitioner",
        )
        .with_targets(vec![
            "Practitioner".to_string(),
            "Organization".to_string(),
        ]),
        sp(
            "address-city",
            "individual-address-city",
            String,
            &["Patient"],
            "Patient.address.city",
        ),
        // Observation
        sp(
            "code",
            "clinical-code",
            Token,
            &["Observation", "Condition"],
            "Observation.code | Condition.code",
        ),
        sp(
            "status",
            "Observation-status",
            Token,
            &["Observation"],
            "Observation.status",
        ),
        sp(
            "category",
            "Observation-category",
            Token,
            &["Observation"],
            "Observation.category",
        ),
        sp(
            "subject",
            "Observation-subject",
            Reference,
            &["Observation"],
            "Observation.subject",
        )
        .with_targets(vec![
            "Patient".to_string(),
            "Group".to_string(),
            "Device".to_string(),
            "Location".to_string(),
        ]),
        sp(
            "patient",
            "clinical-patient",
            Reference,
            &["Observation", "Condition", "Encounter"],
            "Observation.subject.where(resolve() is Patient) | Condition.subject.where(resolve() is Patient) | Encounter.subject.where(resolve() is Patient)",
        )
        .with_targets(vec!["Patient".to_string()]),
        sp(
            "date",
            "clinical-date",
            Date,
            &["Observation", "Encounter"],
            "Observation.effective | Encounter.period",
        ),
        sp(
            "value-quantity",
            "Observation-value-quantity",
            Quantity,
            &["Observation"],
            "Observation.value.as(Quantity)",
        ),
        sp(
            "identifier",
            "Observation-identifier",
            Token,
            &["Observation"],
            "Observation.identifier",
        ),
        sp(
            "encounter",
            "Observation-encounter",
            Reference,
            &["Observation"],
            "Observation.encounter",
        )
        .with_targets(vec!["Encounter".to_string()]),
        sp(
            "performer",
            "Observation-performer",
            Reference,
            &["Observation"],
            "Observation.performer",
        )
        .with_targets(vec![
            "Practitioner".to_string(),
            "Organization".to_string(),
            "Patient".to_string(),
        ]),
        sp(
            "code-value-quantity",
            "Observation-code-value-quantity",
            Composite,
            &["Observation"],
            "Observation",
        )
        .with_components(vec![
            CompositeComponent {
                definition: "http://hl7.org/fhir/SearchParameter/clinical-code".to_string(),
                expression: "code".to_string(),
            },
            CompositeComponent {
                definition: "http://hl7.org/fhir/SearchParameter/Observation-value-quantity"
                    .to_string(),
                expression: "value.as(Quantity)".to_string(),
            },
        ]),
        // Encounter
        sp(
            "status",
            "Encounter-status",
            Token,
            &["Encounter"],
            "Encounter.status",
        ),
        sp(
            "subject",
            "Encounter-subject",
            Reference,
            &["Encounter"],
            "Encounter.subject",
        )
        .with_targets(vec!["Patient".to_string(), "Group".to_string()]),
        sp(
            "class",
            "Encounter-class",
            Token,
            &["Encounter"],
            "Encounter.class",
        ),
        // Condition
        sp(
            "subject",
            "Condition-subject",
            Reference,
            &["Condition"],
            "Condition.subject",
        )
        .with_targets(vec!["Patient".to_string(), "Group".to_string()]),
        sp(
            "clinical-status",
            "Condition-clinical-status",
            Token,
            &["Condition"],
            "Condition.clinicalStatus",
        ),
        // Practitioner / Organization
        sp(
            "name",
            "Practitioner-name",
            String,
            &["Practitioner"],
            "Practitioner.name",
        ),
        sp(
            "identifier",
            "Practitioner-identifier",
            Token,
            &["Practitioner"],
            "Practitioner.identifier",
        ),
        sp(
            "name",
            "Organization-name",
            String,
            &["Organization"],
            "Organization.name",
        ),
        // Subscriptions
        sp(
            "status",
            "Subscription-status",
            Token,
            &["Subscription"],
            "Subscription.status",
        ),
        sp(
            "url",
            "SubscriptionTopic-url",
            Uri,
            &["SubscriptionTopic"],
            "SubscriptionTopic.url",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = SearchParameterRegistry::new();
        registry.register(
            SearchParameter::new(
                "name",
                "http://hl7.org/fhir/SearchParameter/Patient-name",
                SearchParameterType::String,
                vec!["Patient".to_string()],
            )
            .with_expression("Patient.name"),
        );

        let found = registry.get("Patient", "name").unwrap();
        assert_eq!(found.code, "name");
        assert!(registry.get("Observation", "name").is_none());
    }

    #[test]
    fn test_common_parameter_fallback() {
        let registry = SearchParameterRegistry::with_base_parameters();
        assert!(registry.get("Patient", "_id").is_some());
        assert!(registry.get("MedicationRequest", "_id").is_some());
        assert!(registry.get("MedicationRequest", "_lastUpdated").is_some());
    }

    #[test]
    fn test_base_parameters_cover_clinical_set() {
        let registry = SearchParameterRegistry::with_base_parameters();
        assert!(registry.get("Patient", "name").is_some());
        assert!(registry.get("Patient", "birthdate").is_some());
        assert!(registry.get("Observation", "code").is_some());
        assert!(registry.get("Condition", "code").is_some());
        assert!(registry.get("Observation", "value-quantity").is_some());
        let composite = registry.get("Observation", "code-value-quantity").unwrap();
        assert_eq!(composite.param_type, SearchParameterType::Composite);
        assert_eq!(composite.component.len(), 2);
    }

    #[test]
    fn test_type_scoped_codes_do_not_collide() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let obs_status = registry.get("Observation", "status").unwrap();
        let enc_status = registry.get("Encounter", "status").unwrap();
        assert_eq!(obs_status.expressions_for("Observation"), vec!["Observation.status"]);
        assert_eq!(enc_status.expressions_for("Encounter"), vec!["Encounter.status"]);
    }

    #[test]
    fn test_upsert_replaces_by_url() {
        let registry = SearchParameterRegistry::new();
        let url = "http://example.org/SearchParameter/custom";
        registry.upsert(
            SearchParameter::new(
                "custom",
                url,
                SearchParameterType::String,
                vec!["Patient".to_string()],
            )
            .with_expression("Patient.name"),
        );
        registry.upsert(
            SearchParameter::new(
                "custom",
                url,
                SearchParameterType::String,
                vec!["Patient".to_string()],
            )
            .with_expression("Patient.name.family"),
        );
        assert_eq!(registry.len(), 1);
        let p = registry.get("Patient", "custom").unwrap();
        assert_eq!(p.expression, vec!["Patient.name.family".to_string()]);
    }

    #[test]
    fn test_remove_by_url() {
        let registry = SearchParameterRegistry::new();
        registry.register(SearchParameter::new(
            "custom",
            "http://example.org/SearchParameter/custom",
            SearchParameterType::String,
            vec!["Patient".to_string()],
        ));
        assert!(registry.remove_by_url("http://example.org/SearchParameter/custom"));
        assert!(registry.get("Patient", "custom").is_none());
        assert!(!registry.remove_by_url("http://example.org/nope"));
    }

    #[test]
    fn test_get_all_for_type() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let patient_params = registry.get_all_for_type("Patient");
        assert!(patient_params.iter().any(|p| p.code == "name"));
        assert!(patient_params.iter().any(|p| p.code == "_id"));
        let unknown_type = registry.get_all_for_type("Basic");
        assert!(unknown_type.iter().all(|p| p.is_common()));
    }
}
