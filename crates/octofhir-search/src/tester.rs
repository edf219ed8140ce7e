//! Query evaluation against candidate documents.
//!
//! The tester resolves each parsed parameter against the registry and
//! answers whether one document satisfies a query: AND across parameters,
//! OR across comma values, OR across extracted elements. Chained and
//! `_has` parameters recurse through a `ResourceResolver`.

use crate::error::{Result, SearchError};
use crate::parameters::{SearchModifier, SearchParameter, SearchParameterType};
use crate::parser::{ChainSegment, HasInner, HasParam, ParsedParam, ParsedQuery, ParsedValue};
use crate::registry::SearchParameterRegistry;
use crate::types::{self, composite};
use crate::path;
use octofhir_core::{ResourceDocument, parse_reference};
use serde_json::Value;
use tracing::debug;

/// Read access to current resource versions, used for chain resolution,
/// `_has` scans and include expansion.
pub trait ResourceResolver {
    fn resolve(&self, resource_type: &str, id: &str) -> Option<ResourceDocument>;
    fn documents_of_type(&self, resource_type: &str) -> Vec<ResourceDocument>;
}

/// A resolver that knows nothing, for contexts where chains must not
/// re-enter the store.
pub struct NullResolver;

impl ResourceResolver for NullResolver {
    fn resolve(&self, _resource_type: &str, _id: &str) -> Option<ResourceDocument> {
        None
    }

    fn documents_of_type(&self, _resource_type: &str) -> Vec<ResourceDocument> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    /// Skip unknown parameters instead of rejecting the query
    pub lenient: bool,
    pub default_count: usize,
    pub max_count: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            lenient: false,
            default_count: 50,
            max_count: 500,
        }
    }
}

pub struct SearchTester<'a> {
    registry: &'a SearchParameterRegistry,
    resolver: &'a dyn ResourceResolver,
}

impl<'a> SearchTester<'a> {
    pub fn new(registry: &'a SearchParameterRegistry, resolver: &'a dyn ResourceResolver) -> Self {
        Self { registry, resolver }
    }

    /// Does `doc` satisfy every filter parameter of `query`?
    pub fn matches(
        &self,
        resource_type: &str,
        doc: &ResourceDocument,
        query: &ParsedQuery,
        options: &SearchOptions,
    ) -> Result<bool> {
        for param in &query.params {
            if !self.param_matches(resource_type, doc, param, options)? {
                return Ok(false);
            }
        }
        for has in &query.has {
            if !self.has_matches(resource_type, doc, has, options)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate a single parameter, exposed for subscription filters.
    pub fn param_matches(
        &self,
        resource_type: &str,
        doc: &ResourceDocument,
        param: &ParsedParam,
        options: &SearchOptions,
    ) -> Result<bool> {
        match self.evaluate(resource_type, doc.element(), param, &param.chain, options) {
            Err(SearchError::UnknownParameter { resource_type, code }) if options.lenient => {
                debug!(resource_type = %resource_type, code = %code, "skipping unknown parameter");
                Ok(true)
            }
            other => other,
        }
    }

    fn evaluate(
        &self,
        resource_type: &str,
        doc: &Value,
        param: &ParsedParam,
        chain: &[ChainSegment],
        options: &SearchOptions,
    ) -> Result<bool> {
        let definition = self
            .registry
            .get(resource_type, &param.name)
            .ok_or_else(|| SearchError::unknown_parameter(resource_type, &param.name))?;

        if !chain.is_empty() {
            return self.evaluate_chain(resource_type, doc, param, &definition, chain, options);
        }

        let elements = self.extract_all(resource_type, doc, &definition);

        if let Some(SearchModifier::Missing) = param.modifier {
            let want_missing = param
                .values
                .first()
                .map(|v| v.raw.as_str())
                .unwrap_or("true")
                == "true";
            return Ok(elements.is_empty() == want_missing);
        }

        if definition.param_type == SearchParameterType::Composite {
            for value in &param.values {
                if composite::matches(self.registry, &definition, &elements, value)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        if let Some(SearchModifier::Not) = param.modifier {
            // :not holds when no element matches any of the values.
            for value in &param.values {
                for element in &elements {
                    if types::element_matches(
                        definition.param_type,
                        element,
                        value,
                        None,
                        &definition.target,
                    )? {
                        return Ok(false);
                    }
                }
            }
            return Ok(true);
        }

        for value in &param.values {
            for element in &elements {
                if types::element_matches(
                    definition.param_type,
                    element,
                    value,
                    param.modifier.as_ref(),
                    &definition.target,
                )? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn evaluate_chain(
        &self,
        resource_type: &str,
        doc: &Value,
        param: &ParsedParam,
        definition: &SearchParameter,
        chain: &[ChainSegment],
        options: &SearchOptions,
    ) -> Result<bool> {
        if definition.param_type != SearchParameterType::Reference {
            return Err(SearchError::InvalidChain(param.name.clone()));
        }
        // The restriction on this hop: an explicit type qualifier, else the
        // definition's declared targets.
        let restriction: Vec<String> = match param.target_type.as_deref() {
            Some(t) => vec![t.to_string()],
            None => definition.target.clone(),
        };

        for element in self.extract_all(resource_type, doc, definition) {
            let Some(reference) = reference_string(element) else {
                continue;
            };
            let Ok(parsed) = parse_reference(reference, None) else {
                continue;
            };
            if !restriction.is_empty() && !restriction.iter().any(|t| *t == parsed.resource_type) {
                continue;
            }
            let Some(target_doc) = self.resolver.resolve(&parsed.resource_type, &parsed.id)
            else {
                continue;
            };
            let next = ParsedParam {
                name: chain[0].code.clone(),
                target_type: chain[0].target_type.clone(),
                chain: Vec::new(),
                modifier: param.modifier.clone(),
                values: param.values.clone(),
            };
            if self.evaluate(
                &parsed.resource_type,
                target_doc.element(),
                &next,
                &chain[1..],
                options,
            )? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn has_matches(
        &self,
        resource_type: &str,
        doc: &ResourceDocument,
        has: &HasParam,
        options: &SearchOptions,
    ) -> Result<bool> {
        let Some(id) = doc.id() else {
            return Ok(false);
        };
        let my_reference = format!("{resource_type}/{id}");
        let ref_param = ParsedParam::simple(
            &has.reference_param,
            vec![ParsedValue {
                prefix: None,
                raw: my_reference,
            }],
        );

        for candidate in self.resolver.documents_of_type(&has.target_type) {
            if !self.evaluate(
                &has.target_type,
                candidate.element(),
                &ref_param,
                &[],
                options,
            )? {
                continue;
            }
            let inner_ok = match &has.inner {
                HasInner::Param(param) => {
                    self.evaluate(&has.target_type, candidate.element(), param, &param.chain, options)?
                }
                HasInner::Has(nested) => {
                    self.has_matches(&has.target_type, &candidate, nested, options)?
                }
            };
            if inner_ok {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn extract_all<'d>(
        &self,
        resource_type: &str,
        doc: &'d Value,
        definition: &SearchParameter,
    ) -> Vec<&'d Value> {
        let mut elements = Vec::new();
        for expression in definition.expressions_for(resource_type) {
            elements.extend(path::extract(doc, expression));
        }
        elements
    }
}

fn reference_string(element: &Value) -> Option<&str> {
    match element {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("reference").and_then(Value::as_str),
        _ => None,
    }
}
