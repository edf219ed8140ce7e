//! Quantity parameter matching.
//!
//! Query form is `value|system|code`, `value||code` or a bare `value`.
//! When both sides carry a unit from the same dimension in the bundled
//! UCUM table, values are compared in canonical units, so `ge90|...|kg`
//! matches a 200 lb observation. A bare value query is unit-agnostic.

use crate::error::{Result, SearchError};
use crate::parser::ParsedValue;
use crate::types::number::{self, Decimal};
use serde_json::Value;

pub fn matches(element: &Value, value: &ParsedValue) -> Result<bool> {
    let query = parse_query(&value.raw)?;
    match element {
        Value::Array(items) => {
            for item in items {
                if quantity_matches(item, value, &query) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Ok(quantity_matches(element, value, &query)),
    }
}

struct QuantityQuery {
    decimal: Decimal,
    system: Option<String>,
    code: Option<String>,
}

fn parse_query(raw: &str) -> Result<QuantityQuery> {
    let invalid = || SearchError::invalid_value("quantity", format!("invalid quantity '{raw}'"));
    let parts: Vec<&str> = raw.split('|').collect();
    let (value_part, system, code) = match parts.as_slice() {
        [v] => (*v, None, None),
        [v, s, c] => (
            *v,
            (!s.is_empty()).then(|| s.to_string()),
            (!c.is_empty()).then(|| c.to_string()),
        ),
        _ => return Err(invalid()),
    };
    let decimal = number::parse_decimal(value_part).ok_or_else(invalid)?;
    Ok(QuantityQuery {
        decimal,
        system,
        code,
    })
}

fn quantity_matches(element: &Value, value: &ParsedValue, query: &QuantityQuery) -> bool {
    let Value::Object(map) = element else {
        return false;
    };
    let Some(elem_value) = map.get("value").and_then(Value::as_f64) else {
        return false;
    };
    let elem_code = map
        .get("code")
        .or_else(|| map.get("unit"))
        .and_then(Value::as_str);
    let elem_system = map.get("system").and_then(Value::as_str);

    let Some(query_code) = query.code.as_deref() else {
        // Unit-agnostic comparison.
        return number::compare(elem_value, query.decimal, value.prefix);
    };

    if let Some(system) = query.system.as_deref()
        && elem_system.is_some_and(|s| s != system)
    {
        return false;
    }

    match (canonical(query_code), elem_code.and_then(canonical)) {
        (Some((q_dim, q_factor)), Some((e_dim, e_factor))) if q_dim == e_dim => {
            let canon_query = Decimal {
                value: query.decimal.value * q_factor,
                half_step: query.decimal.half_step * q_factor,
            };
            number::compare(elem_value * e_factor, canon_query, value.prefix)
        }
        _ => {
            // Unknown units must agree literally.
            elem_code == Some(query_code)
                && number::compare(elem_value, query.decimal, value.prefix)
        }
    }
}

/// Bundled UCUM conversions: (dimension, factor to the canonical unit).
fn canonical(code: &str) -> Option<(&'static str, f64)> {
    Some(match code {
        // mass, canonical kg
        "kg" => ("mass", 1.0),
        "g" => ("mass", 1e-3),
        "mg" => ("mass", 1e-6),
        "ug" => ("mass", 1e-9),
        "[lb_av]" | "lbs" => ("mass", 0.453_592_37),
        "[oz_av]" => ("mass", 0.028_349_523_125),
        // length, canonical m
        "m" => ("length", 1.0),
        "cm" => ("length", 0.01),
        "mm" => ("length", 0.001),
        "[in_i]" => ("length", 0.0254),
        "[ft_i]" => ("length", 0.3048),
        // time, canonical s
        "s" => ("time", 1.0),
        "min" => ("time", 60.0),
        "h" => ("time", 3600.0),
        "d" => ("time", 86_400.0),
        "wk" => ("time", 604_800.0),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::SearchPrefix;
    use serde_json::json;

    fn value(prefix: Option<SearchPrefix>, raw: &str) -> ParsedValue {
        ParsedValue {
            prefix,
            raw: raw.to_string(),
        }
    }

    fn weight_lbs(v: f64) -> Value {
        json!({"value": v, "system": "http://unitsofmeasure.org", "code": "[lb_av]", "unit": "lbs"})
    }

    #[test]
    fn unit_agnostic_bare_value() {
        assert!(matches(&weight_lbs(185.0), &value(None, "185")).unwrap());
        assert!(!matches(&weight_lbs(185.0), &value(None, "90")).unwrap());
    }

    #[test]
    fn cross_unit_comparison_via_canonical() {
        // 200 lb is about 90.7 kg
        let q = value(Some(SearchPrefix::Ge), "90|http://unitsofmeasure.org|kg");
        assert!(matches(&weight_lbs(200.0), &q).unwrap());
        let q = value(Some(SearchPrefix::Ge), "90|http://unitsofmeasure.org|kg");
        assert!(!matches(&weight_lbs(150.0), &q).unwrap());
    }

    #[test]
    fn same_unit_comparison() {
        let bp = json!({"value": 107.0, "system": "http://unitsofmeasure.org", "code": "mm[Hg]"});
        assert!(matches(&bp, &value(None, "107|http://unitsofmeasure.org|mm[Hg]")).unwrap());
        assert!(!matches(&bp, &value(None, "107|http://unitsofmeasure.org|cm")).unwrap());
    }

    #[test]
    fn system_mismatch_fails() {
        let q = value(None, "185|http://example.org/other|[lb_av]");
        assert!(!matches(&weight_lbs(185.0), &q).unwrap());
    }

    #[test]
    fn code_only_form() {
        let q = value(None, "185||lbs");
        assert!(matches(&weight_lbs(185.0), &q).unwrap());
    }

    #[test]
    fn array_of_quantities_matches_any() {
        let components = json!([
            {"value": 107.0, "code": "mm[Hg]"},
            {"value": 60.0, "code": "mm[Hg]"}
        ]);
        assert!(matches(&components, &value(None, "60||mm[Hg]")).unwrap());
    }

    #[test]
    fn invalid_query_errors() {
        assert!(matches(&weight_lbs(1.0), &value(None, "heavy")).is_err());
        assert!(matches(&weight_lbs(1.0), &value(None, "1|a")).is_err());
    }
}
