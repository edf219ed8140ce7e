//! `_include` / `_revinclude` expansion.
//!
//! Included documents ride along with the matches but are never counted in
//! the result total; the bundle layer marks them `search.mode=include`.
//! Expansion runs after paging, over the page's matches only.

use crate::error::{Result, SearchError};
use crate::parameters::SearchParameterType;
use crate::parser::IncludeDirective;
use crate::path;
use crate::registry::SearchParameterRegistry;
use crate::tester::ResourceResolver;
use octofhir_core::{ResourceDocument, parse_reference};
use serde_json::Value;
use std::collections::HashSet;

pub fn expand(
    registry: &SearchParameterRegistry,
    resolver: &dyn ResourceResolver,
    matches: &[ResourceDocument],
    directives: &[IncludeDirective],
) -> Result<Vec<ResourceDocument>> {
    let mut seen: HashSet<(String, String)> = matches
        .iter()
        .filter_map(|d| Some((d.resource_type().to_string(), d.id()?.to_string())))
        .collect();
    let mut included = Vec::new();

    for directive in directives {
        if directive.reverse {
            expand_reverse(registry, resolver, matches, directive, &mut seen, &mut included)?;
        } else {
            expand_forward(registry, resolver, matches, directive, &mut seen, &mut included)?;
        }
    }
    Ok(included)
}

fn expand_forward(
    registry: &SearchParameterRegistry,
    resolver: &dyn ResourceResolver,
    matches: &[ResourceDocument],
    directive: &IncludeDirective,
    seen: &mut HashSet<(String, String)>,
    included: &mut Vec<ResourceDocument>,
) -> Result<()> {
    let definition = reference_definition(registry, directive)?;

    for doc in matches {
        if doc.resource_type() != directive.source_type {
            continue;
        }
        for expression in definition.expressions_for(doc.resource_type()) {
            for element in path::extract(doc.element(), expression) {
                let Some(reference) = reference_string(element) else {
                    continue;
                };
                let Ok(parsed) = parse_reference(reference, None) else {
                    continue;
                };
                if let Some(target) = &directive.target_type
                    && parsed.resource_type != *target
                {
                    continue;
                }
                if !definition.target.is_empty()
                    && !definition.target.contains(&parsed.resource_type)
                {
                    continue;
                }
                let key = (parsed.resource_type.clone(), parsed.id.clone());
                if seen.contains(&key) {
                    continue;
                }
                if let Some(target_doc) = resolver.resolve(&parsed.resource_type, &parsed.id) {
                    seen.insert(key);
                    included.push(target_doc);
                }
            }
        }
    }
    Ok(())
}

fn expand_reverse(
    registry: &SearchParameterRegistry,
    resolver: &dyn ResourceResolver,
    matches: &[ResourceDocument],
    directive: &IncludeDirective,
    seen: &mut HashSet<(String, String)>,
    included: &mut Vec<ResourceDocument>,
) -> Result<()> {
    let definition = reference_definition(registry, directive)?;

    let match_refs: HashSet<String> = matches
        .iter()
        .filter(|d| {
            directive
                .target_type
                .as_deref()
                .is_none_or(|t| d.resource_type() == t)
        })
        .filter_map(|d| Some(format!("{}/{}", d.resource_type(), d.id()?)))
        .collect();

    for candidate in resolver.documents_of_type(&directive.source_type) {
        let Some(id) = candidate.id() else { continue };
        let key = (directive.source_type.clone(), id.to_string());
        if seen.contains(&key) {
            continue;
        }
        let points_at_match = definition
            .expressions_for(&directive.source_type)
            .iter()
            .flat_map(|expr| path::extract(candidate.element(), expr))
            .filter_map(reference_string)
            .any(|r| match_refs.contains(r));
        if points_at_match {
            seen.insert(key);
            included.push(candidate);
        }
    }
    Ok(())
}

fn reference_definition(
    registry: &SearchParameterRegistry,
    directive: &IncludeDirective,
) -> Result<std::sync::Arc<crate::parameters::SearchParameter>> {
    let definition = registry
        .get(&directive.source_type, &directive.param)
        .ok_or_else(|| {
            SearchError::unknown_parameter(&directive.source_type, &directive.param)
        })?;
    if definition.param_type != SearchParameterType::Reference {
        return Err(SearchError::InvalidChain(directive.param.clone()));
    }
    Ok(definition)
}

fn reference_string(element: &Value) -> Option<&str> {
    match element {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("reference").and_then(Value::as_str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct MapResolver {
        docs: HashMap<String, Vec<ResourceDocument>>,
    }

    impl MapResolver {
        fn new(values: Vec<Value>) -> Self {
            let mut docs: HashMap<String, Vec<ResourceDocument>> = HashMap::new();
            for value in values {
                let doc = ResourceDocument::from_value(value).unwrap();
                docs.entry(doc.resource_type().to_string())
                    .or_default()
                    .push(doc);
            }
            Self { docs }
        }
    }

    impl ResourceResolver for MapResolver {
        fn resolve(&self, resource_type: &str, id: &str) -> Option<ResourceDocument> {
            self.docs
                .get(resource_type)?
                .iter()
                .find(|d| d.id() == Some(id))
                .cloned()
        }

        fn documents_of_type(&self, resource_type: &str) -> Vec<ResourceDocument> {
            self.docs.get(resource_type).cloned().unwrap_or_default()
        }
    }

    fn fixture() -> MapResolver {
        MapResolver::new(vec![
            json!({"resourceType": "Patient", "id": "p1"}),
            json!({"resourceType": "Patient", "id": "p2"}),
            json!({
                "resourceType": "Observation", "id": "o1",
                "subject": {"reference": "Patient/p1"}
            }),
            json!({
                "resourceType": "Observation", "id": "o2",
                "subject": {"reference": "Patient/p2"}
            }),
        ])
    }

    fn directive(value: &str, reverse: bool) -> IncludeDirective {
        let parts: Vec<&str> = value.split(':').collect();
        IncludeDirective {
            source_type: parts[0].to_string(),
            param: parts[1].to_string(),
            target_type: parts.get(2).map(|t| t.to_string()),
            reverse,
        }
    }

    #[test]
    fn forward_include_pulls_referenced_targets() {
        let resolver = fixture();
        let registry = SearchParameterRegistry::with_base_parameters();
        let matches = vec![resolver.resolve("Observation", "o1").unwrap()];
        let included = expand(
            &registry,
            &resolver,
            &matches,
            &[directive("Observation:subject", false)],
        )
        .unwrap();
        assert_eq!(included.len(), 1);
        assert_eq!(included[0].id(), Some("p1"));
    }

    #[test]
    fn revinclude_pulls_referencing_sources() {
        let resolver = fixture();
        let registry = SearchParameterRegistry::with_base_parameters();
        let matches = vec![resolver.resolve("Patient", "p1").unwrap()];
        let included = expand(
            &registry,
            &resolver,
            &matches,
            &[directive("Observation:subject", true)],
        )
        .unwrap();
        assert_eq!(included.len(), 1);
        assert_eq!(included[0].id(), Some("o1"));
    }

    #[test]
    fn includes_are_deduplicated() {
        let resolver = fixture();
        let registry = SearchParameterRegistry::with_base_parameters();
        let matches = vec![
            resolver.resolve("Observation", "o1").unwrap(),
            resolver.resolve("Observation", "o2").unwrap(),
        ];
        // Both observations point at distinct patients; repeating the
        // directive must not duplicate them.
        let included = expand(
            &registry,
            &resolver,
            &matches,
            &[
                directive("Observation:subject", false),
                directive("Observation:subject", false),
            ],
        )
        .unwrap();
        assert_eq!(included.len(), 2);
    }

    #[test]
    fn unknown_include_param_is_rejected() {
        let resolver = fixture();
        let registry = SearchParameterRegistry::with_base_parameters();
        let matches = vec![resolver.resolve("Observation", "o1").unwrap()];
        assert!(
            expand(
                &registry,
                &resolver,
                &matches,
                &[directive("Observation:bogus", false)],
            )
            .is_err()
        );
    }
}
