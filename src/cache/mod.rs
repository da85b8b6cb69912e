//! Cache read model
//!
//! - `DocumentStore`: queryable current-state documents
//! - `CacheProjector`: keeps the store in step with the event feed
//!
//! The projector runs behind the write path and may lag it. Callers that
//! need read-your-writes consistency query the domain indices instead.

mod projector;
mod store;

pub use projector::{CacheProjector, ProjectionError};
pub use store::{DocumentQuery, DocumentStore, QueryError};
