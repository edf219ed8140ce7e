//! String parameter matching.
//!
//! Default matching is case- and accent-insensitive starts-with; `:exact`
//! is a case-sensitive full match and `:contains` a folded substring test.
//! Complex elements (HumanName, Address) match when any nested string part
//! matches.

use crate::parameters::SearchModifier;
use serde_json::Value;

pub fn matches(element: &Value, query: &str, modifier: Option<&SearchModifier>) -> bool {
    let mut parts = Vec::new();
    gather_strings(element, &mut parts);

    match modifier {
        Some(SearchModifier::Exact) => parts.iter().any(|p| *p == query),
        Some(SearchModifier::Contains) => {
            let folded = fold(query);
            parts.iter().any(|p| fold(p).contains(&folded))
        }
        _ => {
            let folded = fold(query);
            parts.iter().any(|p| fold(p).starts_with(&folded))
        }
    }
}

fn gather_strings<'a>(element: &'a Value, out: &mut Vec<&'a str>) {
    match element {
        Value::String(s) => out.push(s),
        Value::Array(items) => {
            for item in items {
                gather_strings(item, out);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                gather_strings(value, out);
            }
        }
        _ => {}
    }
}

/// Case fold plus Latin-1 accent stripping.
fn fold(s: &str) -> String {
    s.chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
            'è' | 'é' | 'ê' | 'ë' => 'e',
            'ì' | 'í' | 'î' | 'ï' => 'i',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
            'ù' | 'ú' | 'û' | 'ü' => 'u',
            'ý' | 'ÿ' => 'y',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}
