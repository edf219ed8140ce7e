//! URI parameter matching: exact by default, `:below` for hierarchical
//! prefixes of the stored value, `:above` for stored prefixes of the query.

use crate::parameters::SearchModifier;
use serde_json::Value;

pub fn matches(element: &Value, query: &str, modifier: Option<&SearchModifier>) -> bool {
    match element {
        Value::Array(items) => items.iter().any(|i| matches(i, query, modifier)),
        Value::String(stored) => match modifier {
            Some(SearchModifier::Below) => stored.starts_with(query),
            Some(SearchModifier::Above) => query.starts_with(stored.as_str()),
            _ => stored == query,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_by_default() {
        let stored = json!("http://example.org/fhir/ValueSet/123");
        assert!(matches(&stored, "http://example.org/fhir/ValueSet/123", None));
        assert!(!matches(&stored, "http://example.org/fhir/ValueSet", None));
    }

    #[test]
    fn below_matches_descendants() {
        let stored = json!("http://example.org/fhir/ValueSet/123/_history/5");
        let m = Some(SearchModifier::Below);
        assert!(matches(&stored, "http://example.org/fhir/ValueSet/123", m.as_ref()));
        assert!(!matches(&stored, "http://example.org/other", m.as_ref()));
    }

    #[test]
    fn above_matches_ancestors() {
        let stored = json!("http://example.org/fhir");
        let m = Some(SearchModifier::Above);
        assert!(matches(&stored, "http://example.org/fhir/ValueSet/123", m.as_ref()));
        assert!(!matches(&stored, "http://other.org/x", m.as_ref()));
    }
}
