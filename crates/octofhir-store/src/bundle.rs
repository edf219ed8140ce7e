//! Bundle and OperationOutcome rendering for store responses.

use crate::record::ResourceRecord;
use octofhir_core::{EngineError, ErrorCategory, now_utc};
use serde_json::{Value, json};

/// Assemble a searchset bundle. `matches` and `includes` are
/// `(fullUrl, resource)` pairs; a count-only bundle carries no entries.
pub(crate) fn searchset(
    total: usize,
    self_url: &str,
    next_url: Option<&str>,
    matches: Vec<(String, Value)>,
    includes: Vec<(String, Value)>,
    count_only: bool,
) -> Value {
    let mut links = vec![json!({"relation": "self", "url": self_url})];
    if let Some(next) = next_url {
        links.push(json!({"relation": "next", "url": next}));
    }

    let mut bundle = json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": total,
        "link": links
    });
    if count_only {
        return bundle;
    }

    let entries: Vec<Value> = matches
        .into_iter()
        .map(|(full_url, resource)| {
            json!({
                "fullUrl": full_url,
                "resource": resource,
                "search": {"mode": "match"}
            })
        })
        .chain(includes.into_iter().map(|(full_url, resource)| {
            json!({
                "fullUrl": full_url,
                "resource": resource,
                "search": {"mode": "include"}
            })
        }))
        .collect();
    bundle["entry"] = Value::Array(entries);
    bundle
}

/// Assemble a history bundle, newest version first.
pub(crate) fn history(base_url: &str, records: &[ResourceRecord]) -> Value {
    let entries: Vec<Value> = records
        .iter()
        .map(|record| {
            let (method, url) = if record.deleted {
                ("DELETE", record.reference())
            } else if record.version_id == 1 {
                ("POST", record.resource_type.clone())
            } else {
                ("PUT", record.reference())
            };
            let mut entry = json!({
                "fullUrl": format!("{base_url}/{}", record.reference()),
                "request": {"method": method, "url": url},
                "response": {
                    "status": if record.deleted { "204" } else { "200" },
                    "etag": format!("W/\"{}\"", record.version_id),
                    "lastModified": record.last_updated.to_string()
                }
            });
            if !record.deleted {
                entry["resource"] = record.document.element().clone();
            }
            entry
        })
        .collect();

    json!({
        "resourceType": "Bundle",
        "type": "history",
        "total": records.len(),
        "timestamp": now_utc().to_string(),
        "entry": entries
    })
}

/// Render an engine error as an OperationOutcome.
pub(crate) fn operation_outcome(error: &EngineError) -> Value {
    let code = match error.category() {
        ErrorCategory::Validation => "invalid",
        ErrorCategory::NotFound => "not-found",
        ErrorCategory::Deleted => "deleted",
        ErrorCategory::Precondition | ErrorCategory::Conflict => "conflict",
        ErrorCategory::Evaluation => "exception",
        ErrorCategory::Serialization => "structure",
    };
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": "error",
            "code": code,
            "diagnostics": error.to_string()
        }]
    })
}
