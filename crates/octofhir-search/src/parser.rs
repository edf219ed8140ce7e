use crate::error::{Result, SearchError};
use crate::parameters::{SearchModifier, SearchPrefix};
use url::form_urlencoded;

/// A single search value with an optional comparison prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedValue {
    pub prefix: Option<SearchPrefix>,
    pub raw: String,
}

/// One step of a chained parameter, e.g. the `organization:Organization`
/// in `subject:Patient.organization:Organization.name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSegment {
    pub code: String,
    pub target_type: Option<String>,
}

/// A parsed filter parameter: root code, optional chain through reference
/// parameters, a modifier on the leaf, and OR-ed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedParam {
    pub name: String,
    /// Type restriction on the root parameter when it heads a chain
    pub target_type: Option<String>,
    pub chain: Vec<ChainSegment>,
    pub modifier: Option<SearchModifier>,
    pub values: Vec<ParsedValue>,
}

impl ParsedParam {
    pub fn simple(name: impl Into<String>, values: Vec<ParsedValue>) -> Self {
        Self {
            name: name.into(),
            target_type: None,
            chain: Vec::new(),
            modifier: None,
            values,
        }
    }
}

/// A reverse chain parameter: `_has:Observation:subject:code=1234-5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasParam {
    pub target_type: String,
    pub reference_param: String,
    pub inner: HasInner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HasInner {
    Param(ParsedParam),
    Has(Box<HasParam>),
}

/// A parsed `_include` or `_revinclude` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub source_type: String,
    pub param: String,
    pub target_type: Option<String>,
    pub reverse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryMode {
    #[default]
    False,
    True,
    Text,
    Data,
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub code: String,
    pub descending: bool,
}

/// The full decoded shape of a search query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    /// The query string exactly as received, for verbatim self links
    pub raw: String,
    pub params: Vec<ParsedParam>,
    pub has: Vec<HasParam>,
    pub includes: Vec<IncludeDirective>,
    pub sort: Vec<SortKey>,
    pub count: Option<usize>,
    pub offset: usize,
    pub summary: SummaryMode,
    pub elements: Vec<String>,
    /// `_type` restriction for system-level searches
    pub types: Vec<String>,
}

impl ParsedQuery {
    /// Parse an application/x-www-form-urlencoded query string.
    ///
    /// Result parameters (`_count`, `_sort`, `_include`, ...) are pulled out
    /// into their own fields; everything else becomes a filter param. Filter
    /// codes are not resolved here; the tester validates them against the
    /// registry.
    pub fn parse(query: &str) -> Result<Self> {
        let mut parsed = ParsedQuery {
            raw: query.to_string(),
            ..Default::default()
        };

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let key = key.as_ref();
            let value = value.as_ref();
            match key {
                "_count" => {
                    let n: usize = value.parse().map_err(|_| {
                        SearchError::invalid_value("_count", "must be a non-negative integer")
                    })?;
                    parsed.count = Some(n);
                }
                "_offset" => {
                    parsed.offset = value.parse().map_err(|_| {
                        SearchError::invalid_value("_offset", "must be a non-negative integer")
                    })?;
                }
                "_sort" => {
                    for field in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                        let (code, descending) = match field.strip_prefix('-') {
                            Some(stripped) => (stripped, true),
                            None => (field, false),
                        };
                        parsed.sort.push(SortKey {
                            code: code.to_string(),
                            descending,
                        });
                    }
                }
                "_include" | "_revinclude" => {
                    parsed
                        .includes
                        .push(Self::parse_include(key, value, key == "_revinclude")?);
                }
                "_summary" => {
                    parsed.summary = match value {
                        "false" => SummaryMode::False,
                        "true" => SummaryMode::True,
                        "text" => SummaryMode::Text,
                        "data" => SummaryMode::Data,
                        "count" => SummaryMode::Count,
                        other => {
                            return Err(SearchError::invalid_value(
                                "_summary",
                                format!("unsupported value '{other}'"),
                            ));
                        }
                    };
                }
                "_elements" => {
                    parsed.elements.extend(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|e| !e.is_empty())
                            .map(str::to_string),
                    );
                }
                "_type" => {
                    parsed.types.extend(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .map(str::to_string),
                    );
                }
                // Accepted but not acted on by the in-memory engine.
                "_total" | "_format" | "_pretty" => {}
                _ if key.starts_with("_has:") => {
                    let segments: Vec<&str> = key.split(':').skip(1).collect();
                    parsed.has.push(Self::parse_has(&segments, value)?);
                }
                _ => {
                    parsed.params.push(Self::parse_filter(key, value)?);
                }
            }
        }
        Ok(parsed)
    }

    fn parse_filter(key: &str, value: &str) -> Result<ParsedParam> {
        let parts: Vec<&str> = key.split('.').collect();
        let (root_code, root_qual) = split_qualifier(parts[0]);
        if root_code.is_empty() {
            return Err(SearchError::InvalidQuery(format!(
                "empty parameter name in '{key}'"
            )));
        }

        let mut param = ParsedParam {
            name: root_code.to_string(),
            target_type: None,
            chain: Vec::new(),
            modifier: None,
            values: parse_values(value),
        };

        if parts.len() == 1 {
            param.modifier = root_qual.map(parse_modifier).transpose()?;
            return Ok(param);
        }

        // Chained: the root qualifier is a type restriction, middle segments
        // carry their own restrictions, and the leaf may carry a modifier.
        if let Some(q) = root_qual {
            if !is_type_name(q) {
                return Err(SearchError::InvalidQuery(format!(
                    "chained parameter '{key}' requires a resource type qualifier, got '{q}'"
                )));
            }
            param.target_type = Some(q.to_string());
        }
        for (i, part) in parts[1..].iter().enumerate() {
            let is_leaf = i == parts.len() - 2;
            let (code, qual) = split_qualifier(part);
            if code.is_empty() {
                return Err(SearchError::InvalidQuery(format!(
                    "empty chain segment in '{key}'"
                )));
            }
            let mut segment = ChainSegment {
                code: code.to_string(),
                target_type: None,
            };
            match qual {
                Some(q) if is_leaf && !is_type_name(q) => {
                    param.modifier = Some(parse_modifier(q)?);
                }
                Some(q) if is_type_name(q) => segment.target_type = Some(q.to_string()),
                Some(q) => {
                    return Err(SearchError::InvalidQuery(format!(
                        "unexpected qualifier '{q}' in chained parameter '{key}'"
                    )));
                }
                None => {}
            }
            param.chain.push(segment);
        }
        Ok(param)
    }

    fn parse_has(segments: &[&str], value: &str) -> Result<HasParam> {
        if segments.len() < 3 {
            return Err(SearchError::InvalidQuery(
                "_has requires _has:Type:refParam:param".to_string(),
            ));
        }
        let target_type = segments[0].to_string();
        let reference_param = segments[1].to_string();
        let rest = &segments[2..];

        let inner = if rest[0] == "_has" {
            HasInner::Has(Box::new(Self::parse_has(&rest[1..], value)?))
        } else {
            let mut param = ParsedParam::simple(rest[0], parse_values(value));
            if let Some(modifier) = rest.get(1) {
                param.modifier = Some(parse_modifier(modifier)?);
            }
            HasInner::Param(param)
        };
        Ok(HasParam {
            target_type,
            reference_param,
            inner,
        })
    }

    fn parse_include(key: &str, value: &str, reverse: bool) -> Result<IncludeDirective> {
        let parts: Vec<&str> = value.split(':').collect();
        match parts.as_slice() {
            [source, param] => Ok(IncludeDirective {
                source_type: source.to_string(),
                param: param.to_string(),
                target_type: None,
                reverse,
            }),
            [source, param, "iterate"] => Ok(IncludeDirective {
                source_type: source.to_string(),
                param: param.to_string(),
                target_type: None,
                reverse,
            }),
            [source, param, target] => Ok(IncludeDirective {
                source_type: source.to_string(),
                param: param.to_string(),
                target_type: Some(target.to_string()),
                reverse,
            }),
            _ => Err(SearchError::invalid_value(
                key,
                format!("expected Type:param or Type:param:Target, got '{value}'"),
            )),
        }
    }
}

fn split_qualifier(part: &str) -> (&str, Option<&str>) {
    match part.split_once(':') {
        Some((code, qual)) if !qual.is_empty() => (code, Some(qual)),
        Some((code, _)) => (code, None),
        None => (part, None),
    }
}

fn is_type_name(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn parse_modifier(s: &str) -> Result<SearchModifier> {
    if let Some(m) = SearchModifier::parse(s) {
        return Ok(m);
    }
    if is_type_name(s) {
        return Ok(SearchModifier::Type(s.to_string()));
    }
    Err(SearchError::InvalidQuery(format!("unknown modifier '{s}'")))
}

fn parse_values(value: &str) -> Vec<ParsedValue> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            let (prefix, remainder) = extract_prefix(v);
            ParsedValue {
                prefix,
                raw: remainder.to_string(),
            }
        })
        .collect()
}

/// Extract a two-letter comparison prefix.
///
/// A prefix only counts when what follows could start an ordered value
/// (digit, sign or decimal point), so string values like `lemon` keep
/// their leading letters.
pub(crate) fn extract_prefix(value: &str) -> (Option<SearchPrefix>, &str) {
    if value.len() < 3 {
        return (None, value);
    }
    let (head, rest) = value.split_at(2);
    let ordered_start = rest
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+' || c == '.');
    match SearchPrefix::parse(head) {
        Some(prefix) if ordered_start => (Some(prefix), rest),
        _ => (None, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_param() {
        let q = ParsedQuery::parse("name=John").unwrap();
        assert_eq!(q.params.len(), 1);
        let p = &q.params[0];
        assert_eq!(p.name, "name");
        assert_eq!(p.modifier, None);
        assert_eq!(p.values[0].raw, "John");
    }

    #[test]
    fn parses_modifier() {
        let q = ParsedQuery::parse("name:exact=John").unwrap();
        assert_eq!(q.params[0].modifier, Some(SearchModifier::Exact));
    }

    #[test]
    fn parses_type_modifier() {
        let q = ParsedQuery::parse("subject:Patient=123").unwrap();
        let p = &q.params[0];
        assert_eq!(p.name, "subject");
        assert_eq!(p.modifier, Some(SearchModifier::Type("Patient".to_string())));
        assert!(p.chain.is_empty());
    }

    #[test]
    fn parses_chain() {
        let q = ParsedQuery::parse("subject:Patient.name=peter").unwrap();
        let p = &q.params[0];
        assert_eq!(p.name, "subject");
        assert_eq!(p.target_type.as_deref(), Some("Patient"));
        assert_eq!(p.chain.len(), 1);
        assert_eq!(p.chain[0].code, "name");
        assert_eq!(p.modifier, None);
    }

    #[test]
    fn parses_chain_with_leaf_modifier() {
        let q = ParsedQuery::parse("subject:Patient.name:exact=Peter").unwrap();
        let p = &q.params[0];
        assert_eq!(p.chain[0].code, "name");
        assert_eq!(p.modifier, Some(SearchModifier::Exact));
    }

    #[test]
    fn parses_two_level_chain() {
        let q = ParsedQuery::parse("subject:Patient.organization:Organization.name=Acme").unwrap();
        let p = &q.params[0];
        assert_eq!(p.chain.len(), 2);
        assert_eq!(p.chain[0].code, "organization");
        assert_eq!(p.chain[0].target_type.as_deref(), Some("Organization"));
        assert_eq!(p.chain[1].code, "name");
    }

    #[test]
    fn parses_has() {
        let q = ParsedQuery::parse("_has:Observation:subject:code=1234-5").unwrap();
        assert_eq!(q.has.len(), 1);
        let h = &q.has[0];
        assert_eq!(h.target_type, "Observation");
        assert_eq!(h.reference_param, "subject");
        match &h.inner {
            HasInner::Param(p) => {
                assert_eq!(p.name, "code");
                assert_eq!(p.values[0].raw, "1234-5");
            }
            other => panic!("unexpected inner: {other:?}"),
        }
    }

    #[test]
    fn parses_nested_has() {
        let q =
            ParsedQuery::parse("_has:Observation:subject:_has:AuditEvent:entity:agent=MyUser")
                .unwrap();
        let h = &q.has[0];
        match &h.inner {
            HasInner::Has(nested) => {
                assert_eq!(nested.target_type, "AuditEvent");
                assert_eq!(nested.reference_param, "entity");
            }
            other => panic!("unexpected inner: {other:?}"),
        }
    }

    #[test]
    fn rejects_short_has() {
        assert!(ParsedQuery::parse("_has:Observation:subject=x").is_err());
    }

    #[test]
    fn parses_comma_or_values() {
        let q = ParsedQuery::parse("status=active,completed").unwrap();
        assert_eq!(q.params[0].values.len(), 2);
    }

    #[test]
    fn prefix_extraction_needs_ordered_value() {
        let q = ParsedQuery::parse("birthdate=ge2020-01-01&name=lemon").unwrap();
        assert_eq!(q.params[0].values[0].prefix, Some(SearchPrefix::Ge));
        assert_eq!(q.params[0].values[0].raw, "2020-01-01");
        assert_eq!(q.params[1].values[0].prefix, None);
        assert_eq!(q.params[1].values[0].raw, "lemon");
    }

    #[test]
    fn parses_result_directives() {
        let q = ParsedQuery::parse(
            "_count=20&_offset=40&_sort=status,-date&_summary=true&_elements=id,code&_type=Patient,Observation",
        )
        .unwrap();
        assert_eq!(q.count, Some(20));
        assert_eq!(q.offset, 40);
        assert_eq!(q.sort.len(), 2);
        assert!(!q.sort[0].descending);
        assert!(q.sort[1].descending);
        assert_eq!(q.sort[1].code, "date");
        assert_eq!(q.summary, SummaryMode::True);
        assert_eq!(q.elements, vec!["id".to_string(), "code".to_string()]);
        assert_eq!(q.types.len(), 2);
    }

    #[test]
    fn rejects_bad_count_and_summary() {
        assert!(ParsedQuery::parse("_count=abc").is_err());
        assert!(ParsedQuery::parse("_offset=-3").is_err());
        assert!(ParsedQuery::parse("_summary=maybe").is_err());
    }

    #[test]
    fn parses_includes() {
        let q = ParsedQuery::parse(
            "_include=Observation:subject&_revinclude=Observation:subject:Patient",
        )
        .unwrap();
        assert_eq!(q.includes.len(), 2);
        assert!(!q.includes[0].reverse);
        assert_eq!(q.includes[0].source_type, "Observation");
        assert_eq!(q.includes[0].param, "subject");
        assert!(q.includes[1].reverse);
        assert_eq!(q.includes[1].target_type.as_deref(), Some("Patient"));
    }

    #[test]
    fn rejects_bad_include() {
        assert!(ParsedQuery::parse("_include=subject").is_err());
    }

    #[test]
    fn parses_missing_modifier_value() {
        let q = ParsedQuery::parse("organization:missing=true").unwrap();
        let p = &q.params[0];
        assert_eq!(p.modifier, Some(SearchModifier::Missing));
        assert_eq!(p.values[0].raw, "true");
    }

    #[test]
    fn url_decoding_applies() {
        let q = ParsedQuery::parse("name=John%20Doe&uri=https%3A%2F%2Fexample.org%2Fx").unwrap();
        assert_eq!(q.params[0].values[0].raw, "John Doe");
        assert_eq!(q.params[1].values[0].raw, "https://example.org/x");
    }

    #[test]
    fn empty_value_keeps_param_with_no_values() {
        let q = ParsedQuery::parse("name=").unwrap();
        assert_eq!(q.params.len(), 1);
        assert!(q.params[0].values.is_empty());
    }

    #[test]
    fn raw_query_is_preserved_verbatim() {
        let raw = "status=final&_count=5";
        let q = ParsedQuery::parse(raw).unwrap();
        assert_eq!(q.raw, raw);
    }
}
