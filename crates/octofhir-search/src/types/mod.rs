//! Typed predicate evaluators, one module per search parameter type.
//!
//! Each module exposes pure functions from an element value plus a query
//! value to a match decision. The tester extracts elements via `path` and
//! dispatches here.

pub mod composite;
pub mod date;
pub mod number;
pub mod quantity;
pub mod reference;
pub mod string;
pub mod token;
pub mod uri;

use crate::error::Result;
use crate::parameters::{SearchModifier, SearchParameterType};
use crate::parser::ParsedValue;
use serde_json::Value;

/// Match one extracted element against one query value.
///
/// `targets` is the parameter's declared reference targets, used by the
/// reference matcher to disambiguate bare ids. Composite parameters do not
/// dispatch through here; the tester drives their per-component matching.
pub fn element_matches(
    param_type: SearchParameterType,
    element: &Value,
    value: &ParsedValue,
    modifier: Option<&SearchModifier>,
    targets: &[String],
) -> Result<bool> {
    match param_type {
        SearchParameterType::String => Ok(string::matches(element, &value.raw, modifier)),
        SearchParameterType::Token | SearchParameterType::Special => {
            Ok(token::matches(element, &value.raw, modifier))
        }
        SearchParameterType::Date => date::matches(element, value),
        SearchParameterType::Number => number::matches(element, value),
        SearchParameterType::Quantity => quantity::matches(element, value),
        SearchParameterType::Reference => {
            Ok(reference::matches(element, &value.raw, modifier, targets))
        }
        SearchParameterType::Uri => Ok(uri::matches(element, &value.raw, modifier)),
        SearchParameterType::Composite => Ok(false),
    }
}
