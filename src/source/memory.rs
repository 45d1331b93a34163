//! In-memory queue source for tests and dry runs.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::QueueSource;
use crate::error::SourceError;
use crate::model::{ItemId, Resource, ResourceId, WorkItem};

#[derive(Default)]
struct Inner {
    resources: HashMap<ResourceId, (String, Vec<WorkItem>)>,
    unauthorized: HashSet<ResourceId>,
    failing: HashSet<ResourceId>,
    calls: usize,
}

/// A queue whose contents are set directly by the caller.
#[derive(Default)]
pub struct MemorySource {
    inner: Mutex<Inner>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a resource with an empty queue.
    pub fn add_resource(&self, id: impl Into<ResourceId>, name: impl Into<String>) {
        self.lock()
            .resources
            .insert(id.into(), (name.into(), Vec::new()));
    }

    /// Replace a resource's pending items.
    pub fn set_pending(&self, id: &ResourceId, items: Vec<WorkItem>) {
        if let Some((_, pending)) = self.lock().resources.get_mut(id) {
            *pending = items;
        }
    }

    pub fn push_pending(&self, id: &ResourceId, item: WorkItem) {
        if let Some((_, pending)) = self.lock().resources.get_mut(id) {
            pending.push(item);
        }
    }

    pub fn remove_pending(&self, id: &ResourceId, item: &ItemId) {
        if let Some((_, pending)) = self.lock().resources.get_mut(id) {
            pending.retain(|w| &w.id != item);
        }
    }

    /// Make every call for `id` fail as unauthorized until cleared.
    pub fn set_unauthorized(&self, id: &ResourceId, unauthorized: bool) {
        let mut inner = self.lock();
        if unauthorized {
            inner.unauthorized.insert(id.clone());
        } else {
            inner.unauthorized.remove(id);
        }
    }

    /// Make every call for `id` fail transiently until cleared.
    pub fn set_failing(&self, id: &ResourceId, failing: bool) {
        let mut inner = self.lock();
        if failing {
            inner.failing.insert(id.clone());
        } else {
            inner.failing.remove(id);
        }
    }

    /// Number of `list_pending` calls served, failures included.
    pub fn list_calls(&self) -> usize {
        self.lock().calls
    }

    fn check(inner: &Inner, id: &ResourceId) -> Result<(), SourceError> {
        if inner.unauthorized.contains(id) {
            return Err(SourceError::Unauthorized {
                resource: id.clone(),
            });
        }
        if inner.failing.contains(id) {
            return Err(SourceError::Transient(format!("{id}: simulated outage")));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueSource for MemorySource {
    async fn describe(&self, resource: &ResourceId) -> Result<Resource, SourceError> {
        let inner = self.lock();
        Self::check(&inner, resource)?;
        let (name, _) = inner
            .resources
            .get(resource)
            .ok_or_else(|| SourceError::NotFound {
                resource: resource.clone(),
            })?;
        Ok(Resource {
            id: resource.clone(),
            name: name.clone(),
        })
    }

    async fn list_pending(&self, resource: &ResourceId) -> Result<Vec<WorkItem>, SourceError> {
        let mut inner = self.lock();
        inner.calls += 1;
        Self::check(&inner, resource)?;
        inner
            .resources
            .get(resource)
            .map(|(_, pending)| pending.clone())
            .ok_or_else(|| SourceError::NotFound {
                resource: resource.clone(),
            })
    }
}
