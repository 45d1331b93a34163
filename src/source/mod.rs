//! Remote verification queue.
//!
//! The engine only ever asks two things of the run-tracking service: what a
//! resource is called, and which items are pending on it right now. Both
//! calls are read-only and safe to repeat.

pub mod memory;
pub mod speedrun;

pub use memory::MemorySource;
pub use speedrun::SpeedrunClient;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::model::{Resource, ResourceId, WorkItem};

#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Resolve a resource id to its display name.
    async fn describe(&self, resource: &ResourceId) -> Result<Resource, SourceError>;

    /// Pending items, in the service's own order.
    async fn list_pending(&self, resource: &ResourceId) -> Result<Vec<WorkItem>, SourceError>;
}
