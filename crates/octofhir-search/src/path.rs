//! Element path extraction over a resource's JSON tree.
//!
//! Search parameter expressions are restricted FHIRPath: dotted element
//! paths with `as(Type)` casts and `where(...)` guards. Extraction walks
//! the document, flattening arrays at every step, and returns the leaf
//! element values a predicate evaluator then matches against.

use serde_json::Value;

/// Extract the element values a path expression selects from `doc`.
///
/// A leading type-name segment is skipped (the caller already picked the
/// expression alternatives for the document's type). `where(...)` guards
/// pass values through unevaluated; the typed matchers downstream apply
/// the equivalent restriction.
pub fn extract<'a>(doc: &'a Value, expression: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = expression.split('.').map(str::trim).collect();
    let mut current: Vec<&'a Value> = vec![doc];

    let mut i = 0;
    while i < segments.len() {
        let segment = segments[i];

        if i == 0 && is_type_segment(segment) {
            i += 1;
            continue;
        }
        if segment.starts_with("where(") || segment == "first()" || segment == "exists()" {
            i += 1;
            continue;
        }

        // `field.as(Type)` addresses the choice element `fieldType`.
        let field: std::borrow::Cow<'_, str> = match segments.get(i + 1) {
            Some(next) if next.starts_with("as(") => {
                let cast = next
                    .trim_start_matches("as(")
                    .trim_end_matches(')')
                    .trim();
                i += 1;
                format!("{segment}{cast}").into()
            }
            _ => segment.into(),
        };

        let mut next_values = Vec::new();
        for value in current {
            collect_field(value, &field, &mut next_values);
        }
        current = next_values;
        i += 1;
    }
    current
}

fn is_type_segment(segment: &str) -> bool {
    segment.chars().next().is_some_and(|c| c.is_ascii_uppercase()) && !segment.contains('(')
}

fn collect_field<'a>(value: &'a Value, field: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_field(item, field, out);
            }
        }
        Value::Object(map) => {
            if let Some(found) = map.get(field) {
                flatten(found, out);
            } else {
                // Choice element: `effective` selects `effectiveDateTime`,
                // `effectivePeriod`, whichever is present.
                for (key, found) in map {
                    if let Some(rest) = key.strip_prefix(field)
                        && rest.chars().next().is_some_and(|c| c.is_ascii_uppercase())
                    {
                        flatten(found, out);
                    }
                }
            }
        }
        _ => {}
    }
}

fn flatten<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten(item, out);
            }
        }
        other => out.push(other),
    }
}
