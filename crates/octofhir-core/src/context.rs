use crate::error::{EngineError, Result};
use serde_json::Value;

/// The interaction a request resolves to, classified from method + path shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Read,
    Vread,
    Create,
    Update,
    Delete,
    History,
    TypeSearch,
    SystemSearch,
    CompartmentSearch,
    CompartmentTypeSearch,
    Operation(String),
}

impl Interaction {
    /// Classify an interaction from the HTTP method and the path segments
    /// below the service base.
    pub fn classify(method: &str, path: &str) -> Result<Interaction> {
        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        let unsupported = || {
            EngineError::bad_request(format!("Unsupported interaction: {method} /{path}"))
        };

        if let Some(op) = segments.last().and_then(|s| s.strip_prefix('$')) {
            return Ok(Interaction::Operation(op.to_string()));
        }

        match (method, segments.as_slice()) {
            ("GET", []) => Ok(Interaction::SystemSearch),
            ("GET", [_t]) => Ok(Interaction::TypeSearch),
            ("POST", [_t]) => Ok(Interaction::Create),
            ("GET", [_t, _id]) => Ok(Interaction::Read),
            ("PUT", [_t, _id]) => Ok(Interaction::Update),
            ("DELETE", [_t, _id]) => Ok(Interaction::Delete),
            ("GET", [_t, _id, "_history"]) => Ok(Interaction::History),
            ("GET", [_t, _id, "_history", _v]) => Ok(Interaction::Vread),
            ("GET", [_t, _id, "*"]) => Ok(Interaction::CompartmentSearch),
            ("GET", [_t, _id, child])
                if child.chars().next().is_some_and(|c| c.is_ascii_uppercase()) =>
            {
                Ok(Interaction::CompartmentTypeSearch)
            }
            _ => Err(unsupported()),
        }
    }

    /// True for interactions that mutate store state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Interaction::Create | Interaction::Update | Interaction::Delete
        )
    }
}

/// The request boundary handed to the engine by a transport layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub interaction: Interaction,
    pub resource_type: Option<String>,
    pub id: Option<String>,
    pub version_id: Option<u64>,
    /// Member type of a compartment search, e.g. the `Observation` in
    /// `GET /Patient/p1/Observation`
    pub compartment_member: Option<String>,
    pub query: String,
    pub if_match: Option<u64>,
    pub if_none_exist: Option<String>,
    pub body: Option<Value>,
}

impl RequestContext {
    pub fn from_request(
        method: &str,
        path: &str,
        query: &str,
        body: Option<Value>,
    ) -> Result<Self> {
        let interaction = Interaction::classify(method, path)?;
        let segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        let resource_type = segments.first().map(|s| s.to_string());
        // Type-level operations have no id segment.
        let id = segments
            .get(1)
            .filter(|s| !s.starts_with('$'))
            .map(|s| s.to_string());
        let version_id = match interaction {
            Interaction::Vread => segments.get(3).and_then(|v| v.parse().ok()),
            _ => None,
        };
        let compartment_member = match interaction {
            Interaction::CompartmentTypeSearch => segments.get(2).map(|s| s.to_string()),
            _ => None,
        };
        Ok(Self {
            interaction,
            resource_type,
            id,
            version_id,
            compartment_member,
            query: query.to_string(),
            if_match: None,
            if_none_exist: None,
            body,
        })
    }

    pub fn with_if_match(mut self, version: u64) -> Self {
        self.if_match = Some(version);
        self
    }

    pub fn with_if_none_exist(mut self, query: impl Into<String>) -> Self {
        self.if_none_exist = Some(query.into());
        self
    }
}

/// What the engine hands back to the transport layer.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub status: u16,
    pub body: Option<Value>,
    pub etag_version: Option<u64>,
    pub location: Option<String>,
}

impl ResponseContext {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            body: None,
            etag_version: None,
            location: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_etag(mut self, version: u64) -> Self {
        self.etag_version = Some(version);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_crud() {
        assert_eq!(
            Interaction::classify("POST", "/Patient").unwrap(),
            Interaction::Create
        );
        assert_eq!(
            Interaction::classify("GET", "/Patient/123").unwrap(),
            Interaction::Read
        );
        assert_eq!(
            Interaction::classify("PUT", "/Patient/123").unwrap(),
            Interaction::Update
        );
        assert_eq!(
            Interaction::classify("DELETE", "/Patient/123").unwrap(),
            Interaction::Delete
        );
    }

    #[test]
    fn test_classify_history_and_vread() {
        assert_eq!(
            Interaction::classify("GET", "/Patient/123/_history").unwrap(),
            Interaction::History
        );
        assert_eq!(
            Interaction::classify("GET", "/Patient/123/_history/2").unwrap(),
            Interaction::Vread
        );
    }

    #[test]
    fn test_classify_searches() {
        assert_eq!(
            Interaction::classify("GET", "/").unwrap(),
            Interaction::SystemSearch
        );
        assert_eq!(
            Interaction::classify("GET", "/Observation").unwrap(),
            Interaction::TypeSearch
        );
        assert_eq!(
            Interaction::classify("GET", "/Patient/123/*").unwrap(),
            Interaction::CompartmentSearch
        );
        assert_eq!(
            Interaction::classify("GET", "/Patient/123/Observation").unwrap(),
            Interaction::CompartmentTypeSearch
        );
    }

    #[test]
    fn test_classify_operation() {
        assert_eq!(
            Interaction::classify("GET", "/Subscription/s1/$status").unwrap(),
            Interaction::Operation("status".to_string())
        );
        assert_eq!(
            Interaction::classify("GET", "/Subscription/s1/$events").unwrap(),
            Interaction::Operation("events".to_string())
        );

        let ctx =
            RequestContext::from_request("GET", "/Subscription/$status", "status=active", None)
                .unwrap();
        assert_eq!(ctx.interaction, Interaction::Operation("status".to_string()));
        assert_eq!(ctx.resource_type.as_deref(), Some("Subscription"));
        assert_eq!(ctx.id, None);
    }

    #[test]
    fn test_classify_rejects_unknown_shape() {
        assert!(Interaction::classify("PATCH", "/Patient/123").is_err());
        assert!(Interaction::classify("PUT", "/Patient").is_err());
    }

    #[test]
    fn test_request_context_extraction() {
        let ctx =
            RequestContext::from_request("GET", "/Patient/123/_history/4", "", None).unwrap();
        assert_eq!(ctx.interaction, Interaction::Vread);
        assert_eq!(ctx.resource_type.as_deref(), Some("Patient"));
        assert_eq!(ctx.id.as_deref(), Some("123"));
        assert_eq!(ctx.version_id, Some(4));
    }

    #[test]
    fn test_compartment_member_extraction() {
        let ctx =
            RequestContext::from_request("GET", "/Patient/p1/Observation", "code=1234-5", None)
                .unwrap();
        assert_eq!(ctx.interaction, Interaction::CompartmentTypeSearch);
        assert_eq!(ctx.compartment_member.as_deref(), Some("Observation"));

        let ctx = RequestContext::from_request("GET", "/Patient/p1/*", "", None).unwrap();
        assert_eq!(ctx.interaction, Interaction::CompartmentSearch);
        assert_eq!(ctx.compartment_member, None);
    }

    #[test]
    fn test_is_mutation() {
        assert!(Interaction::Create.is_mutation());
        assert!(Interaction::Delete.is_mutation());
        assert!(!Interaction::Read.is_mutation());
        assert!(!Interaction::TypeSearch.is_mutation());
    }
}
