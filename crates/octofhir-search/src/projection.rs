//! `_summary` / `_elements` projection.
//!
//! Projection works on top-level element names. `resourceType`, `id` and
//! `meta` always survive, and any projected rendering gains the SUBSETTED
//! meta tag. `_summary=true` keeps a fixed summary set; schema summary
//! flags are not consulted.

use crate::parser::SummaryMode;
use octofhir_core::ResourceDocument;
use serde_json::{Map, Value, json};

const MANDATORY: &[&str] = &["resourceType", "id", "meta"];

const SUMMARY: &[&str] = &[
    "identifier",
    "active",
    "name",
    "telecom",
    "gender",
    "birthDate",
    "address",
    "managingOrganization",
    "status",
    "category",
    "code",
    "subject",
    "encounter",
    "effectiveDateTime",
    "effectivePeriod",
    "effectiveInstant",
    "issued",
    "valueQuantity",
    "valueCodeableConcept",
    "valueString",
    "period",
    "class",
    "type",
    "url",
    "version",
    "title",
    "date",
    "topic",
    "reason",
    "criteria",
];

/// Render `doc` under the requested projection.
pub fn apply(doc: &ResourceDocument, summary: SummaryMode, elements: &[String]) -> Value {
    let full = doc.element().clone();
    let Value::Object(map) = full else {
        return full;
    };

    let projected: Map<String, Value> = match summary {
        SummaryMode::False if elements.is_empty() => return Value::Object(map),
        SummaryMode::False => retain(map, |key| elements.iter().any(|e| e == key)),
        SummaryMode::True => retain(map, |key| SUMMARY.contains(&key)),
        SummaryMode::Text => retain(map, |key| key == "text"),
        SummaryMode::Data => retain(map, |key| key != "text"),
        // Count renders no entries at all; callers never project with it.
        SummaryMode::Count => return Value::Object(map),
    };
    Value::Object(mark_subsetted(projected))
}

fn retain<F: Fn(&str) -> bool>(map: Map<String, Value>, keep: F) -> Map<String, Value> {
    map.into_iter()
        .filter(|(key, _)| MANDATORY.contains(&key.as_str()) || keep(key))
        .collect()
}

fn mark_subsetted(mut map: Map<String, Value>) -> Map<String, Value> {
    let meta = map
        .entry("meta".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(meta) = meta {
        let tags = meta
            .entry("tag".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(tags) = tags {
            let subsetted = json!({
                "system": "http://terminology.hl7.org/CodeSystem/v3-ObservationValue",
                "code": "SUBSETTED"
            });
            if !tags.contains(&subsetted) {
                tags.push(subsetted);
            }
        }
    }
    map
}
