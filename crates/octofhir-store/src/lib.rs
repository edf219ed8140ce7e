//! In-memory versioned resource store and the engine that ties storage,
//! search, compartments and subscriptions together behind one request
//! boundary.
//!
//! [`ResourceStore`] holds the version chains for a single resource type;
//! [`MemoryEngine`] owns one store per type and routes classified requests
//! to CRUD, history, search and subscription operations.

mod bundle;
pub mod engine;
pub mod outcome;
pub mod record;
pub mod store;

pub use engine::{EngineConfig, MemoryEngine};
pub use outcome::{OutcomeStatus, StoreOutcome};
pub use record::ResourceRecord;
pub use store::{Change, ChangeKind, ResourceStore, StoreConfig};
