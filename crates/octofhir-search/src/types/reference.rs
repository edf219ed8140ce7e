//! Reference parameter matching.
//!
//! Query forms: `Type/id`, a bare `id` (restricted by the parameter's
//! declared targets or a `:Type` modifier), an absolute URL matched
//! literally, and `:identifier` with `system|value` against the logical
//! identifier of a Reference element.

use crate::parameters::SearchModifier;
use serde_json::Value;

pub fn matches(
    element: &Value,
    query: &str,
    modifier: Option<&SearchModifier>,
    targets: &[String],
) -> bool {
    match element {
        Value::Array(items) => items
            .iter()
            .any(|item| matches(item, query, modifier, targets)),
        Value::String(s) => {
            // canonical references are plain strings
            reference_string_matches(s, query, modifier, targets)
        }
        Value::Object(map) => {
            if let Some(SearchModifier::Identifier) = modifier {
                return identifier_matches(map.get("identifier"), query);
            }
            if let Some(reference) = map.get("reference").and_then(Value::as_str) {
                if reference_string_matches(reference, query, modifier, targets) {
                    return true;
                }
            }
            map.get("display").and_then(Value::as_str) == Some(query)
        }
        _ => false,
    }
}

fn reference_string_matches(
    stored: &str,
    query: &str,
    modifier: Option<&SearchModifier>,
    targets: &[String],
) -> bool {
    // Version-specific stored references still match an unversioned query.
    let stored_trimmed = stored
        .split_once("/_history/")
        .map_or(stored, |(head, _)| head);

    if query.contains('/') || query.contains("://") {
        return stored_trimmed == query || stored == query;
    }

    // Bare id: the type comes from the :Type modifier, or must be
    // unambiguous across the declared targets.
    let candidate_types: Vec<&str> = match modifier {
        Some(SearchModifier::Type(t)) => vec![t.as_str()],
        _ => targets.iter().map(String::as_str).collect(),
    };
    if candidate_types.is_empty() {
        // No restriction known; match on the id segment alone.
        return stored_trimmed
            .rsplit_once('/')
            .is_some_and(|(_, id)| id == query);
    }
    candidate_types
        .iter()
        .any(|t| stored_trimmed == format!("{t}/{query}"))
}

fn identifier_matches(identifier: Option<&Value>, query: &str) -> bool {
    let Some(identifier) = identifier else {
        return false;
    };
    let (system, value) = match query.split_once('|') {
        Some((s, v)) => ((!s.is_empty()).then_some(s), v),
        None => (None, query),
    };
    let elem_system = identifier.get("system").and_then(Value::as_str);
    let elem_value = identifier.get("value").and_then(Value::as_str);
    let system_ok = system.is_none_or(|s| elem_system == Some(s));
    system_ok && elem_value == Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subject() -> Value {
        json!({"reference": "Patient/p1", "display": "Peter Chalmers"})
    }

    #[test]
    fn typed_query_matches_reference() {
        assert!(matches(&subject(), "Patient/p1", None, &[]));
        assert!(!matches(&subject(), "Patient/p2", None, &[]));
        assert!(!matches(&subject(), "Group/p1", None, &[]));
    }

    #[test]
    fn bare_id_uses_targets() {
        let targets = vec!["Patient".to_string(), "Group".to_string()];
        assert!(matches(&subject(), "p1", None, &targets));
        assert!(!matches(&subject(), "p2", None, &targets));
        let wrong_targets = vec!["Device".to_string()];
        assert!(!matches(&subject(), "p1", None, &wrong_targets));
    }

    #[test]
    fn type_modifier_restricts_bare_id() {
        let m = SearchModifier::Type("Patient".to_string());
        assert!(matches(&subject(), "p1", Some(&m), &[]));
        let m = SearchModifier::Type("Group".to_string());
        assert!(!matches(&subject(), "p1", Some(&m), &[]));
    }

    #[test]
    fn versioned_stored_reference_matches_unversioned_query() {
        let element = json!({"reference": "Patient/p1/_history/3"});
        assert!(matches(&element, "Patient/p1", None, &[]));
    }

    #[test]
    fn display_equality_matches() {
        assert!(matches(&subject(), "Peter Chalmers", None, &[]));
    }

    #[test]
    fn identifier_modifier() {
        let element = json!({
            "identifier": {"system": "urn:mrn", "value": "12345"}
        });
        let m = SearchModifier::Identifier;
        assert!(matches(&element, "urn:mrn|12345", Some(&m), &[]));
        assert!(matches(&element, "12345", Some(&m), &[]));
        assert!(!matches(&element, "urn:other|12345", Some(&m), &[]));
        assert!(!matches(&subject(), "12345", Some(&m), &[]));
    }

    #[test]
    fn array_of_references() {
        let performers = json!([
            {"reference": "Practitioner/dr1"},
            {"reference": "Organization/org1"}
        ]);
        assert!(matches(&performers, "Organization/org1", None, &[]));
    }

    #[test]
    fn canonical_string_reference() {
        let canonical = json!("http://example.org/fhir/SubscriptionTopic/encounters");
        assert!(matches(
            &canonical,
            "http://example.org/fhir/SubscriptionTopic/encounters",
            None,
            &[]
        ));
    }
}
