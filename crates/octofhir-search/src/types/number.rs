//! Number parameter matching.
//!
//! An unprefixed or `eq` query carries an implicit range from its written
//! precision: `100` means `[99.5, 100.5)`, `100.00` means `[99.995, 100.005)`.
//! Ordering prefixes compare against the literal value; `ap` allows 10%.

use crate::error::{Result, SearchError};
use crate::parameters::SearchPrefix;
use crate::parser::ParsedValue;
use serde_json::Value;

pub fn matches(element: &Value, value: &ParsedValue) -> Result<bool> {
    let query = parse_decimal(&value.raw)
        .ok_or_else(|| SearchError::invalid_value("number", format!("invalid number '{}'", value.raw)))?;
    let Some(actual) = element.as_f64() else {
        return Ok(false);
    };
    Ok(compare(actual, query, value.prefix))
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Decimal {
    pub value: f64,
    /// Half of the last written decimal place
    pub half_step: f64,
}

pub(crate) fn parse_decimal(raw: &str) -> Option<Decimal> {
    let value: f64 = raw.parse().ok()?;
    let mantissa = raw.split(['e', 'E']).next().unwrap_or(raw);
    let fraction_digits = mantissa
        .split_once('.')
        .map(|(_, frac)| frac.len())
        .unwrap_or(0);
    let half_step = 0.5 * 10f64.powi(-(fraction_digits as i32));
    Some(Decimal { value, half_step })
}

pub(crate) fn compare(actual: f64, query: Decimal, prefix: Option<SearchPrefix>) -> bool {
    match prefix.unwrap_or(SearchPrefix::Eq) {
        SearchPrefix::Eq => {
            actual >= query.value - query.half_step && actual < query.value + query.half_step
        }
        SearchPrefix::Ne => {
            !(actual >= query.value - query.half_step && actual < query.value + query.half_step)
        }
        SearchPrefix::Gt => actual > query.value,
        SearchPrefix::Lt => actual < query.value,
        SearchPrefix::Ge => actual >= query.value,
        SearchPrefix::Le => actual <= query.value,
        // A plain number is a point; starts-after and ends-before reduce to
        // strict ordering.
        SearchPrefix::Sa => actual > query.value,
        SearchPrefix::Eb => actual < query.value,
        SearchPrefix::Ap => (actual - query.value).abs() <= 0.1 * query.value.abs().max(f64::MIN_POSITIVE),
    }
}
