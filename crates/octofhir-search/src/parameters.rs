use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// FHIR SearchParameter type enumeration
/// See: https://hl7.org/fhir/R4B/search.html#table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParameterType {
    Number,
    Date,
    String,
    Token,
    Reference,
    Composite,
    Quantity,
    Uri,
    Special,
}

impl SearchParameterType {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            "string" => Some(Self::String),
            "token" => Some(Self::Token),
            "reference" => Some(Self::Reference),
            "composite" => Some(Self::Composite),
            "quantity" => Some(Self::Quantity),
            "uri" => Some(Self::Uri),
            "special" => Some(Self::Special),
            _ => None,
        }
    }
}

/// Supported search modifiers, applied as `name:modifier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchModifier {
    Exact,
    Contains,
    Text,
    Below,
    Above,
    Not,
    Identifier,   // for reference parameters
    Type(String), // e.g., subject:Patient
    Missing,      // value is a boolean
    OfType,       // for token parameters
}

impl SearchModifier {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missing" => Some(Self::Missing),
            "exact" => Some(Self::Exact),
            "contains" => Some(Self::Contains),
            "not" => Some(Self::Not),
            "text" => Some(Self::Text),
            "below" => Some(Self::Below),
            "above" => Some(Self::Above),
            "identifier" => Some(Self::Identifier),
            "of-type" | "ofType" => Some(Self::OfType),
            // Type modifier is handled separately during parsing
            _ => None,
        }
    }

    /// Check if this modifier is applicable to the given parameter type.
    pub fn applicable_to(&self, param_type: SearchParameterType) -> bool {
        match self {
            Self::Missing => true,
            Self::Exact | Self::Contains => matches!(param_type, SearchParameterType::String),
            Self::Not | Self::OfType => matches!(param_type, SearchParameterType::Token),
            Self::Text => matches!(param_type, SearchParameterType::Token),
            Self::Below | Self::Above => matches!(
                param_type,
                SearchParameterType::Uri | SearchParameterType::Token
            ),
            Self::Type(_) | Self::Identifier => {
                matches!(param_type, SearchParameterType::Reference)
            }
        }
    }
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Contains => write!(f, "contains"),
            Self::Text => write!(f, "text"),
            Self::Below => write!(f, "below"),
            Self::Above => write!(f, "above"),
            Self::Not => write!(f, "not"),
            Self::Identifier => write!(f, "identifier"),
            Self::Type(t) => write!(f, "{t}"),
            Self::Missing => write!(f, "missing"),
            Self::OfType => write!(f, "of-type"),
        }
    }
}

/// Prefixes for ordered search values, e.g. `ge2020-01-01`, `lt5.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa, // starts after
    Eb, // ends before
    Ap, // approximately
}

impl SearchPrefix {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "ge" => Some(Self::Ge),
            "le" => Some(Self::Le),
            "sa" => Some(Self::Sa),
            "eb" => Some(Self::Eb),
            "ap" => Some(Self::Ap),
            _ => None,
        }
    }
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchPrefix::Eq => "eq",
            SearchPrefix::Ne => "ne",
            SearchPrefix::Gt => "gt",
            SearchPrefix::Lt => "lt",
            SearchPrefix::Ge => "ge",
            SearchPrefix::Le => "le",
            SearchPrefix::Sa => "sa",
            SearchPrefix::Eb => "eb",
            SearchPrefix::Ap => "ap",
        };
        f.write_str(s)
    }
}

/// One component of a composite search parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeComponent {
    /// Canonical URL of the component parameter definition
    pub definition: String,
    /// Sub-expression relative to the root expression
    pub expression: String,
}

/// A complete search parameter definition.
///
/// Mirrors the fields of a FHIR SearchParameter resource that matter for
/// in-memory evaluation.
#[derive(Debug, Clone)]
pub struct SearchParameter {
    /// The code used in search queries (e.g., "name", "identifier")
    pub code: String,
    /// The canonical URL of this search parameter
    pub url: String,
    /// The type of search parameter (token, string, reference, etc.)
    pub param_type: SearchParameterType,
    /// Element path expressions, one per `|`-separated alternative
    pub expression: Vec<String>,
    /// Resource types this parameter applies to
    pub base: Vec<String>,
    /// Target resource types for reference parameters
    pub target: Vec<String>,
    /// Components for composite parameters
    pub component: Vec<CompositeComponent>,
    /// Human-readable description
    pub description: String,
}

impl SearchParameter {
    pub fn new(
        code: impl Into<String>,
        url: impl Into<String>,
        param_type: SearchParameterType,
        base: Vec<String>,
    ) -> Self {
        Self {
            code: code.into(),
            url: url.into(),
            param_type,
            expression: Vec::new(),
            base,
            target: Vec::new(),
            component: Vec::new(),
            description: String::new(),
        }
    }

    #[must_use]
    pub fn with_expression(mut self, expr: impl Into<String>) -> Self {
        self.expression = expr
            .into()
            .split('|')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    #[must_use]
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.target = targets;
        self
    }

    #[must_use]
    pub fn with_components(mut self, components: Vec<CompositeComponent>) -> Self {
        self.component = components;
        self
    }

    /// Build a definition from a stored SearchParameter document.
    pub fn from_document(doc: &Value) -> Result<Self> {
        let str_field = |name: &str| -> Result<String> {
            doc.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    SearchError::InvalidQuery(format!("SearchParameter is missing '{name}'"))
                })
        };
        let str_list = |name: &str| -> Vec<String> {
            doc.get(name)
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let code = str_field("code")?;
        let url = str_field("url")?;
        let type_str = str_field("type")?;
        let param_type = SearchParameterType::parse(&type_str).ok_or_else(|| {
            SearchError::invalid_value("type", format!("unknown search parameter type '{type_str}'"))
        })?;
        let base = str_list("base");
        if base.is_empty() {
            return Err(SearchError::InvalidQuery(
                "SearchParameter has an empty 'base' list".to_string(),
            ));
        }

        let component = doc
            .get("component")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|c| {
                        Some(CompositeComponent {
                            definition: c.get("definition")?.as_str()?.to_string(),
                            expression: c.get("expression")?.as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut param = Self::new(code, url, param_type, base)
            .with_targets(str_list("target"))
            .with_components(component);
        if let Some(expr) = doc.get("expression").and_then(Value::as_str) {
            param = param.with_expression(expr);
        }
        if let Some(desc) = doc.get("description").and_then(Value::as_str) {
            param = param.with_description(desc);
        }
        Ok(param)
    }

    /// Check if this parameter applies to a given resource type.
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.base
            .iter()
            .any(|b| b == resource_type || b == "Resource" || b == "DomainResource")
    }

    /// Check if this is a common parameter (applies to all resources).
    pub fn is_common(&self) -> bool {
        self.base
            .iter()
            .any(|b| b == "Resource" || b == "DomainResource")
    }

    /// The expression alternatives that apply to `resource_type`.
    ///
    /// A multi-base definition carries one alternative per base type
    /// (`Patient.name | Practitioner.name`); an alternative with no type
    /// prefix applies everywhere.
    pub fn expressions_for(&self, resource_type: &str) -> Vec<&str> {
        self.expression
            .iter()
            .filter(|e| {
                match e.split('.').next() {
                    Some(head) if head.chars().next().is_some_and(|c| c.is_ascii_uppercase()) => {
                        head == resource_type || head == "Resource" || head == "DomainResource"
                    }
                    _ => true,
                }
            })
            .map(String::as_str)
            .collect()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}
