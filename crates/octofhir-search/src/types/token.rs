//! Token parameter matching.
//!
//! Query forms: `code`, `system|code`, `|code` (code with no system) and
//! `system|` (any code in system). Elements may be plain codes, booleans,
//! Coding, CodeableConcept, Identifier or ContactPoint values.

use crate::parameters::SearchModifier;
use serde_json::Value;

pub fn matches(element: &Value, query: &str, modifier: Option<&SearchModifier>) -> bool {
    match modifier {
        // :not negates at the parameter level in the tester; value-level
        // matching stays positive here.
        Some(SearchModifier::Text) => text_matches(element, query),
        Some(SearchModifier::OfType) => of_type_matches(element, query),
        _ => {
            let (system, code) = split_query(query);
            token_matches(element, system, code)
        }
    }
}

/// Split `system|code`. `None` system means "don't care"; `Some("")` means
/// "explicitly no system".
fn split_query(query: &str) -> (Option<&str>, Option<&str>) {
    match query.split_once('|') {
        Some((system, "")) => (Some(system), None),
        Some((system, code)) => (Some(system), Some(code)),
        None => (None, Some(query)),
    }
}

fn token_matches(element: &Value, system: Option<&str>, code: Option<&str>) -> bool {
    match element {
        Value::String(s) => system_and_code_match(None, Some(s), system, code),
        Value::Bool(b) => {
            let s = if *b { "true" } else { "false" };
            system_and_code_match(None, Some(s), system, code)
        }
        Value::Number(n) => system_and_code_match(None, Some(&n.to_string()), system, code),
        Value::Array(items) => items.iter().any(|i| token_matches(i, system, code)),
        Value::Object(map) => {
            // CodeableConcept
            if let Some(codings) = map.get("coding") {
                if token_matches(codings, system, code) {
                    return true;
                }
            }
            // Coding or Identifier or ContactPoint
            let elem_system = map.get("system").and_then(Value::as_str);
            let elem_code = map
                .get("code")
                .or_else(|| map.get("value"))
                .and_then(Value::as_str);
            if elem_code.is_some() || elem_system.is_some() {
                return system_and_code_match(elem_system, elem_code, system, code);
            }
            false
        }
        _ => false,
    }
}

fn system_and_code_match(
    elem_system: Option<&str>,
    elem_code: Option<&str>,
    query_system: Option<&str>,
    query_code: Option<&str>,
) -> bool {
    let system_ok = match query_system {
        None => true,
        Some("") => elem_system.is_none(),
        Some(sys) => elem_system == Some(sys),
    };
    let code_ok = match query_code {
        None => true,
        Some(code) => elem_code == Some(code),
    };
    system_ok && code_ok
}

fn text_matches(element: &Value, query: &str) -> bool {
    let query = query.to_lowercase();
    let mut texts = Vec::new();
    collect_texts(element, &mut texts);
    texts
        .iter()
        .any(|t| t.to_lowercase().starts_with(&query))
}

fn collect_texts<'a>(element: &'a Value, out: &mut Vec<&'a str>) {
    match element {
        Value::Array(items) => {
            for item in items {
                collect_texts(item, out);
            }
        }
        Value::Object(map) => {
            for key in ["text", "display"] {
                if let Some(Value::String(s)) = map.get(key) {
                    out.push(s);
                }
            }
            if let Some(codings) = map.get("coding") {
                collect_texts(codings, out);
            }
        }
        _ => {}
    }
}

/// `:of-type` on Identifier: `type-system|type-code|value`.
fn of_type_matches(element: &Value, query: &str) -> bool {
    let parts: Vec<&str> = query.split('|').collect();
    let [type_system, type_code, value] = parts.as_slice() else {
        return false;
    };
    match element {
        Value::Array(items) => items.iter().any(|i| of_type_matches(i, query)),
        Value::Object(map) => {
            let value_ok = map.get("value").and_then(Value::as_str) == Some(*value);
            let type_ok = map
                .get("type")
                .and_then(|t| t.get("coding"))
                .and_then(Value::as_array)
                .is_some_and(|codings| {
                    codings.iter().any(|c| {
                        c.get("system").and_then(Value::as_str) == Some(*type_system)
                            && c.get("code").and_then(Value::as_str) == Some(*type_code)
                    })
                });
            value_ok && type_ok
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_code_matches() {
        assert!(matches(&json!("final"), "final", None));
        assert!(!matches(&json!("final"), "amended", None));
        assert!(matches(&json!(true), "true", None));
    }

    #[test]
    fn coding_matches_system_and_code() {
        let coding = json!({"system": "http://loinc.org", "code": "1234-5"});
        assert!(matches(&coding, "1234-5", None));
        assert!(matches(&coding, "http://loinc.org|1234-5", None));
        assert!(!matches(&coding, "http://snomed.info/sct|1234-5", None));
        assert!(matches(&coding, "http://loinc.org|", None));
    }

    #[test]
    fn codeable_concept_matches_any_coding() {
        let cc = json!({
            "coding": [
                {"system": "http://loinc.org", "code": "1234-5"},
                {"system": "http://snomed.info/sct", "code": "271649006"}
            ],
            "text": "Systolic blood pressure"
        });
        assert!(matches(&cc, "http://snomed.info/sct|271649006", None));
        assert!(matches(&cc, "1234-5", None));
        assert!(!matches(&cc, "http://loinc.org|9999-9", None));
    }

    #[test]
    fn no_system_form_requires_absent_system() {
        let with_system = json!({"system": "http://acme.org", "code": "x"});
        let without_system = json!({"code": "x"});
        assert!(!matches(&with_system, "|x", None));
        assert!(matches(&without_system, "|x", None));
    }

    #[test]
    fn identifier_matches_on_value() {
        let identifier = json!({"system": "urn:mrn", "value": "12345"});
        assert!(matches(&identifier, "urn:mrn|12345", None));
        assert!(matches(&identifier, "12345", None));
    }

    #[test]
    fn text_modifier_matches_display_and_text() {
        let cc = json!({
            "coding": [{"system": "s", "code": "c", "display": "Headache disorder"}],
            "text": "Severe headache"
        });
        let m = Some(SearchModifier::Text);
        assert!(matches(&cc, "severe", m.as_ref()));
        assert!(matches(&cc, "headache d", m.as_ref()));
        assert!(!matches(&cc, "migraine", m.as_ref()));
    }

    #[test]
    fn of_type_matches_identifier_type_and_value() {
        let identifier = json!({
            "type": {"coding": [{"system": "http://terminology.hl7.org/CodeSystem/v2-0203", "code": "MR"}]},
            "value": "446053"
        });
        let m = Some(SearchModifier::OfType);
        assert!(matches(
            &identifier,
            "http://terminology.hl7.org/CodeSystem/v2-0203|MR|446053",
            m.as_ref()
        ));
        assert!(!matches(
            &identifier,
            "http://terminology.hl7.org/CodeSystem/v2-0203|MR|999",
            m.as_ref()
        ));
    }
}
