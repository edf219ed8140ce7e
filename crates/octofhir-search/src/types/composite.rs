//! Composite parameter support.
//!
//! A composite value joins component values with `$`
//! (`code-value-quantity=8480-6$ge140`). All components must match on the
//! same repetition of the root expression, so a blood pressure panel with
//! systolic 107 and diastolic 60 does not spuriously match `8480-6$ge60`.

use crate::error::{Result, SearchError};
use crate::parameters::{CompositeComponent, SearchParameter};
use crate::parser::ParsedValue;
use crate::types::element_matches;
use crate::{path, registry::SearchParameterRegistry};
use serde_json::Value;

/// Split a composite query value into its component values.
pub fn split_values(raw: &str) -> Vec<&str> {
    raw.split('$').collect()
}

/// Evaluate a composite parameter against the root elements of one document.
///
/// `roots` are the repetitions the composite's own expression selects.
/// Component definitions are resolved through the registry by canonical URL.
pub fn matches(
    registry: &SearchParameterRegistry,
    param: &SearchParameter,
    roots: &[&Value],
    value: &ParsedValue,
) -> Result<bool> {
    let component_values = split_values(&value.raw);
    if component_values.len() != param.component.len() {
        return Err(SearchError::invalid_value(
            &param.code,
            format!(
                "expected {} components joined by '$', got {}",
                param.component.len(),
                component_values.len()
            ),
        ));
    }

    for root in roots {
        let mut all = true;
        for (component, raw) in param.component.iter().zip(&component_values) {
            if !component_matches(registry, param, component, root, raw)? {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
    }
    Ok(false)
}

fn component_matches(
    registry: &SearchParameterRegistry,
    param: &SearchParameter,
    component: &CompositeComponent,
    root: &Value,
    raw: &str,
) -> Result<bool> {
    let definition = registry.get_by_url(&component.definition).ok_or_else(|| {
        SearchError::invalid_value(
            &param.code,
            format!("unknown component definition '{}'", component.definition),
        )
    })?;

    // Prefixes inside component values follow the component's own type.
    let (prefix, remainder) = crate::parser::extract_prefix(raw);
    let parsed = ParsedValue {
        prefix,
        raw: remainder.to_string(),
    };

    let elements = path::extract(root, &component.expression);
    for element in elements {
        if element_matches(definition.param_type, element, &parsed, None, &definition.target)? {
            return Ok(true);
        }
    }
    Ok(false)
}
