//! Domain indices
//!
//! In-memory views derived purely from replayed events. They are never
//! persisted; every index can be rebuilt from position zero at any time.
//! Each index guards its state with one coarse lock taken for the duration
//! of an apply or a query.
//!
//! - `EntityIndex`: id allocation, status and ownership per resource type
//! - `MediaIndex`: media type, status and file path of media entities
//! - `ReferencesIndex`: bidirectional reference graph plus timestamps
//! - `RatingIndex`: per-entity rating statistics from user activity

use std::any::Any;

use crate::types::Event;

mod entity_index;
mod media_index;
mod rating_index;
mod references_index;

pub use entity_index::{EntityFacts, EntityIndex};
pub use media_index::MediaIndex;
pub use rating_index::{RatingIndex, RATING_ACTIVITY};
pub use references_index::ReferencesIndex;

/// A read model fed by the event stream client
pub trait DomainIndex: Any + Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Fold one event into the index
    ///
    /// Called in log order, both during replay and on the append path.
    fn apply_event(&self, event: &Event);

    fn as_any(&self) -> &dyn Any;
}
