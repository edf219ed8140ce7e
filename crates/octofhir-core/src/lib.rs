pub mod context;
pub mod document;
pub mod error;
pub mod id;
pub mod reference;
pub mod time;

pub use context::{Interaction, RequestContext, ResponseContext};
pub use document::ResourceDocument;
pub use error::{EngineError, ErrorCategory, Result};
pub use id::{generate_id, validate_id};
pub use reference::{ResourceReference, UnresolvableReference, parse_reference};
pub use time::{DatePrecision, FhirDate, FhirDateTime, now_utc};
