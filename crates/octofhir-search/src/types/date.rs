//! Date parameter matching with interval semantics.
//!
//! A stored date denotes the interval its precision covers; a Period is the
//! interval between its bounds. Comparison prefixes relate the stored
//! interval to the query interval: `eq` is containment in the query range,
//! `sa`/`eb` are strict interval orderings, `ap` is overlap.

use crate::error::{Result, SearchError};
use crate::parameters::SearchPrefix;
use crate::parser::ParsedValue;
use octofhir_core::FhirDate;
use serde_json::Value;
use time::OffsetDateTime;

pub fn matches(element: &Value, value: &ParsedValue) -> Result<bool> {
    let query: FhirDate = value
        .raw
        .parse()
        .map_err(|_| SearchError::invalid_value("date", format!("invalid date '{}'", value.raw)))?;
    let Some(interval) = element_interval(element) else {
        return Ok(false);
    };
    Ok(compare(&interval, &query, value.prefix))
}

/// `[start, end]` bounds of the stored element; `None` on either side means
/// an open Period bound.
struct Interval {
    start: Option<OffsetDateTime>,
    end: Option<OffsetDateTime>,
}

fn element_interval(element: &Value) -> Option<Interval> {
    match element {
        Value::String(s) => {
            let date: FhirDate = s.parse().ok()?;
            Some(Interval {
                start: Some(date.start_instant()),
                end: Some(date.end_instant()),
            })
        }
        Value::Object(map) if map.contains_key("start") || map.contains_key("end") => {
            let parse_bound = |key: &str, end: bool| -> Option<OffsetDateTime> {
                let s = map.get(key)?.as_str()?;
                let date: FhirDate = s.parse().ok()?;
                Some(if end {
                    date.end_instant()
                } else {
                    date.start_instant()
                })
            };
            Some(Interval {
                start: parse_bound("start", false),
                end: parse_bound("end", true),
            })
        }
        _ => None,
    }
}

fn compare(interval: &Interval, query: &FhirDate, prefix: Option<SearchPrefix>) -> bool {
    let q_start = query.start_instant();
    let q_end = query.end_instant();
    let Interval { start, end } = interval;

    match prefix.unwrap_or(SearchPrefix::Eq) {
        SearchPrefix::Eq => {
            // Stored interval fully inside the query interval; open Period
            // bounds can never be contained.
            matches!((start, end), (Some(s), Some(e)) if q_start <= *s && *e <= q_end)
        }
        SearchPrefix::Ne => {
            !matches!((start, end), (Some(s), Some(e)) if q_start <= *s && *e <= q_end)
        }
        SearchPrefix::Gt => end.is_none_or(|e| e > q_end),
        SearchPrefix::Lt => start.is_none_or(|s| s < q_start),
        SearchPrefix::Ge => end.is_none_or(|e| e >= q_start),
        SearchPrefix::Le => start.is_none_or(|s| s <= q_end),
        SearchPrefix::Sa => start.is_some_and(|s| s > q_end),
        SearchPrefix::Eb => end.is_some_and(|e| e < q_start),
        SearchPrefix::Ap => {
            // Overlap; open bounds extend to infinity on that side.
            let starts_before_q_ends = start.is_none_or(|s| s <= q_end);
            let ends_after_q_starts = end.is_none_or(|e| e >= q_start);
            starts_before_q_ends && ends_after_q_starts
        }
    }
}
