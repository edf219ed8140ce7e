//! Reference string parsing.
//!
//! Reference values come in several shapes: relative (`Patient/123`),
//! versioned (`Patient/123/_history/2`), absolute (`http://host/fhir/Patient/123`),
//! contained (`#id`) and URN (`urn:uuid:...`). Only the first three can be
//! resolved against the local store; an absolute URL resolves only when it
//! matches the configured base URL.

use std::fmt;

/// A reference resolved to a local resource handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceReference {
    pub resource_type: String,
    pub id: String,
    pub version: Option<String>,
}

impl ResourceReference {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version: None,
        }
    }

    pub fn to_relative(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_relative())
    }
}

/// A reference that cannot be resolved against the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvableReference {
    Contained(String),
    Urn(String),
    External(String),
    Invalid(String),
}

impl fmt::Display for UnresolvableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contained(id) => write!(f, "contained reference: #{id}"),
            Self::Urn(urn) => write!(f, "URN reference: {urn}"),
            Self::External(url) => write!(f, "external reference: {url}"),
            Self::Invalid(reason) => write!(f, "invalid reference: {reason}"),
        }
    }
}

impl std::error::Error for UnresolvableReference {}

/// Parse a reference string into a local handle.
///
/// `base_url`, when given, lets absolute URLs under that base resolve as if
/// they were relative. Contained and URN references are never resolvable here.
pub fn parse_reference(
    reference: &str,
    base_url: Option<&str>,
) -> Result<ResourceReference, UnresolvableReference> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(UnresolvableReference::Invalid("empty reference".to_string()));
    }

    if let Some(contained_id) = reference.strip_prefix('#') {
        return Err(UnresolvableReference::Contained(contained_id.to_string()));
    }

    if reference.starts_with("urn:") {
        return Err(UnresolvableReference::Urn(reference.to_string()));
    }

    let path = if reference.contains("://") {
        let Some(base) = base_url else {
            return Err(UnresolvableReference::External(reference.to_string()));
        };
        match reference.strip_prefix(base.trim_end_matches('/')) {
            Some(suffix) => suffix.trim_start_matches('/'),
            None => return Err(UnresolvableReference::External(reference.to_string())),
        }
    } else {
        reference
    };

    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() < 2 {
        return Err(UnresolvableReference::Invalid(format!(
            "reference must contain at least Type/id: {reference}"
        )));
    }

    let resource_type = parts[0];
    let id = parts[1];
    if !resource_type
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
    {
        return Err(UnresolvableReference::Invalid(format!(
            "resource type must start with an uppercase letter: {resource_type}"
        )));
    }
    if id.is_empty() {
        return Err(UnresolvableReference::Invalid(
            "resource id cannot be empty".to_string(),
        ));
    }

    let version = (parts.len() >= 4 && parts[2] == "_history").then(|| parts[3].to_string());

    Ok(ResourceReference {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
        version,
    })
}
