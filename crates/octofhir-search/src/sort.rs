//! Result ordering for `_sort`.
//!
//! A stable multi-key sort: later keys only break ties left by earlier
//! ones, and equal documents keep their input order. Documents without a
//! value for a key sort before those with one ascending, after them
//! descending. Complex element types order by a fixed part sequence
//! (Period by start then end, HumanName by text/family/given, and so on).

use crate::error::{Result, SearchError};
use crate::parser::SortKey;
use crate::path;
use crate::registry::SearchParameterRegistry;
use octofhir_core::ResourceDocument;
use serde_json::Value;
use std::cmp::Ordering;

pub fn sort_documents(
    docs: &mut [ResourceDocument],
    resource_type: &str,
    keys: &[SortKey],
    registry: &SearchParameterRegistry,
) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }

    // Precompute key tuples so the comparator stays cheap.
    let mut keyed: Vec<Vec<Option<KeyValue>>> = Vec::with_capacity(docs.len());
    for doc in docs.iter() {
        let mut row = Vec::with_capacity(keys.len());
        for key in keys {
            row.push(extract_key(doc, resource_type, &key.code, registry)?);
        }
        keyed.push(row);
    }

    let mut order: Vec<usize> = (0..docs.len()).collect();
    order.sort_by(|&a, &b| {
        for (i, key) in keys.iter().enumerate() {
            let ord = compare_optional(&keyed[a][i], &keyed[b][i]);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    let mut sorted: Vec<ResourceDocument> = order.iter().map(|&i| docs[i].clone()).collect();
    docs.swap_with_slice(&mut sorted);
    Ok(())
}

/// A comparable sort key: a sequence of atoms compared left to right.
#[derive(Debug, Clone, PartialEq)]
enum KeyAtom {
    Number(f64),
    Text(String),
}

type KeyValue = Vec<KeyAtom>;

fn compare_optional(a: &Option<KeyValue>, b: &Option<KeyValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_key(a, b),
    }
}

fn compare_key(a: &KeyValue, b: &KeyValue) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = match (x, y) {
            (KeyAtom::Number(m), KeyAtom::Number(n)) => {
                m.partial_cmp(n).unwrap_or(Ordering::Equal)
            }
            (KeyAtom::Text(s), KeyAtom::Text(t)) => s.cmp(t),
            (KeyAtom::Number(_), KeyAtom::Text(_)) => Ordering::Less,
            (KeyAtom::Text(_), KeyAtom::Number(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn extract_key(
    doc: &ResourceDocument,
    resource_type: &str,
    code: &str,
    registry: &SearchParameterRegistry,
) -> Result<Option<KeyValue>> {
    let definition = registry
        .get(resource_type, code)
        .ok_or_else(|| SearchError::unknown_parameter(resource_type, code))?;

    let mut candidates: Vec<KeyValue> = Vec::new();
    for expression in definition.expressions_for(resource_type) {
        for element in path::extract(doc.element(), expression) {
            if let Some(key) = element_key(element) {
                candidates.push(key);
            }
        }
    }
    // Repeating elements sort by their lowest value.
    candidates.sort_by(|a, b| compare_key(a, b));
    Ok(candidates.into_iter().next())
}

fn element_key(element: &Value) -> Option<KeyValue> {
    match element {
        Value::String(s) => Some(vec![KeyAtom::Text(s.to_lowercase())]),
        Value::Number(n) => Some(vec![KeyAtom::Number(n.as_f64()?)]),
        Value::Bool(b) => Some(vec![KeyAtom::Text(b.to_string())]),
        Value::Object(map) => {
            // Quantity
            if let Some(value) = map.get("value").and_then(Value::as_f64) {
                return Some(vec![KeyAtom::Number(value)]);
            }
            // Period: (start, end)
            if map.contains_key("start") || map.contains_key("end") {
                return Some(text_parts(map, &["start", "end"]));
            }
            // HumanName
            if map.contains_key("family") || map.contains_key("given") {
                let mut parts = text_parts(map, &["text", "family"]);
                let given = map
                    .get("given")
                    .and_then(Value::as_array)
                    .and_then(|g| g.first())
                    .and_then(Value::as_str)
                    .unwrap_or("");
                parts.push(KeyAtom::Text(given.to_lowercase()));
                return Some(parts);
            }
            // Address
            if map.contains_key("city") || map.contains_key("postalCode") {
                return Some(text_parts(
                    map,
                    &["text", "city", "state", "postalCode", "country"],
                ));
            }
            // Reference: (display, reference, identifier)
            if map.contains_key("reference") || map.contains_key("display") {
                let mut parts = text_parts(map, &["display", "reference"]);
                if let Some(identifier) = map.get("identifier") {
                    let system = identifier.get("system").and_then(Value::as_str).unwrap_or("");
                    let value = identifier.get("value").and_then(Value::as_str).unwrap_or("");
                    parts.push(KeyAtom::Text(format!("{system}|{value}").to_lowercase()));
                }
                return Some(parts);
            }
            // CodeableConcept / Coding: first code
            if let Some(code) = first_code(element) {
                return Some(vec![KeyAtom::Text(code.to_lowercase())]);
            }
            None
        }
        _ => None,
    }
}

fn text_parts(map: &serde_json::Map<String, Value>, fields: &[&str]) -> KeyValue {
    fields
        .iter()
        .map(|f| {
            KeyAtom::Text(
                map.get(*f)
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase(),
            )
        })
        .collect()
}

fn first_code(element: &Value) -> Option<&str> {
    if let Some(code) = element.get("code").and_then(Value::as_str) {
        return Some(code);
    }
    element
        .get("coding")?
        .as_array()?
        .first()?
        .get("code")?
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(values: Vec<Value>) -> Vec<ResourceDocument> {
        values
            .into_iter()
            .map(|v| ResourceDocument::from_value(v).unwrap())
            .collect()
    }

    fn ids(docs: &[ResourceDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.id().unwrap()).collect()
    }

    fn keys(spec: &str) -> Vec<SortKey> {
        spec.split(',')
            .map(|s| match s.strip_prefix('-') {
                Some(code) => SortKey {
                    code: code.to_string(),
                    descending: true,
                },
                None => SortKey {
                    code: s.to_string(),
                    descending: false,
                },
            })
            .collect()
    }

    #[test]
    fn sorts_by_string_key() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let mut patients = docs(vec![
            json!({"resourceType": "Patient", "id": "b", "name": [{"family": "Windsor"}]}),
            json!({"resourceType": "Patient", "id": "a", "name": [{"family": "chalmers"}]}),
        ]);
        sort_documents(&mut patients, "Patient", &keys("name"), &registry).unwrap();
        assert_eq!(ids(&patients), vec!["a", "b"]);
    }

    #[test]
    fn descending_reverses() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let mut patients = docs(vec![
            json!({"resourceType": "Patient", "id": "a", "birthDate": "1970-01-01"}),
            json!({"resourceType": "Patient", "id": "b", "birthDate": "1980-01-01"}),
        ]);
        sort_documents(&mut patients, "Patient", &keys("-birthdate"), &registry).unwrap();
        assert_eq!(ids(&patients), vec!["b", "a"]);
    }

    #[test]
    fn missing_values_sort_first_ascending_last_descending() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let mut patients = docs(vec![
            json!({"resourceType": "Patient", "id": "with", "birthDate": "1970-01-01"}),
            json!({"resourceType": "Patient", "id": "without"}),
        ]);
        sort_documents(&mut patients, "Patient", &keys("birthdate"), &registry).unwrap();
        assert_eq!(ids(&patients), vec!["without", "with"]);
        sort_documents(&mut patients, "Patient", &keys("-birthdate"), &registry).unwrap();
        assert_eq!(ids(&patients), vec!["with", "without"]);
    }

    #[test]
    fn multi_key_breaks_ties_and_is_stable() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let mut observations = docs(vec![
            json!({"resourceType": "Observation", "id": "o1", "status": "final", "effectiveDateTime": "2023-02-01"}),
            json!({"resourceType": "Observation", "id": "o2", "status": "amended", "effectiveDateTime": "2023-01-01"}),
            json!({"resourceType": "Observation", "id": "o3", "status": "final", "effectiveDateTime": "2023-01-01"}),
            json!({"resourceType": "Observation", "id": "o4", "status": "final", "effectiveDateTime": "2023-01-01"}),
        ]);
        sort_documents(&mut observations, "Observation", &keys("status,date"), &registry).unwrap();
        // amended first; within final, earlier date first; o3 before o4 by input order
        assert_eq!(ids(&observations), vec!["o2", "o3", "o4", "o1"]);
    }

    #[test]
    fn unknown_sort_code_is_rejected() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let mut patients = docs(vec![json!({"resourceType": "Patient", "id": "a"})]);
        assert!(sort_documents(&mut patients, "Patient", &keys("bogus"), &registry).is_err());
    }

    #[test]
    fn sorts_by_quantity_value() {
        let registry = SearchParameterRegistry::with_base_parameters();
        let mut observations = docs(vec![
            json!({"resourceType": "Observation", "id": "hi", "valueQuantity": {"value": 9.1}}),
            json!({"resourceType": "Observation", "id": "lo", "valueQuantity": {"value": 2.3}}),
        ]);
        sort_documents(
            &mut observations,
            "Observation",
            &keys("value-quantity"),
            &registry,
        )
        .unwrap();
        assert_eq!(ids(&observations), vec!["lo", "hi"]);
    }
}
