//! Process-local playable handles for resident items.
//!
//! A handle is what the renderer actually plays: a locator plus shared access
//! to the payload bytes. The registry holds at most one live handle per
//! identity and revokes it on release, after which reads fail. It never
//! decides residency on its own; the prefetch pipeline tells it what to
//! acquire and release.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::ItemId;

/// Scheme used for handle locators
pub const HANDLE_SCHEME: &str = "mem://reelwindow/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("Handle for {0} has been revoked")]
    Revoked(ItemId),
}

#[derive(Debug)]
struct HandleInner {
    id: ItemId,
    locator: String,
    created_at: DateTime<Utc>,
    payload: Mutex<Option<Bytes>>,
}

/// Shared, cheaply cloneable handle. Clones refer to the same resource.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    inner: Arc<HandleInner>,
}

impl ResourceHandle {
    fn new(id: ItemId, payload: Bytes) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                locator: format!("{}{}", HANDLE_SCHEME, Uuid::new_v4()),
                created_at: Utc::now(),
                payload: Mutex::new(Some(payload)),
            }),
        }
    }

    fn payload_slot(&self) -> MutexGuard<'_, Option<Bytes>> {
        self.inner
            .payload
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> &ItemId {
        &self.inner.id
    }

    /// Opaque locator the renderer plays from
    pub fn locator(&self) -> &str {
        &self.inner.locator
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Payload bytes, unless the handle was revoked
    pub fn read(&self) -> Result<Bytes, HandleError> {
        self.payload_slot()
            .clone()
            .ok_or_else(|| HandleError::Revoked(self.inner.id.clone()))
    }

    pub fn is_revoked(&self) -> bool {
        self.payload_slot().is_none()
    }

    /// Whether two handles refer to the same resource
    pub fn same_as(&self, other: &ResourceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn revoke(&self) {
        self.payload_slot().take();
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for ResourceHandle {}

/// Registry of live handles, keyed by identity
#[derive(Debug, Default)]
pub struct ResourceHandleRegistry {
    handles: Mutex<HashMap<ItemId, ResourceHandle>>,
}

impl ResourceHandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<ItemId, ResourceHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Live handle for `id`, creating one from `payload` if none exists
    pub fn acquire(&self, id: &ItemId, payload: Bytes) -> ResourceHandle {
        let mut handles = self.handles();
        if let Some(existing) = handles.get(id) {
            return existing.clone();
        }

        let handle = ResourceHandle::new(id.clone(), payload);
        debug!(%id, locator = handle.locator(), "Handle acquired");
        handles.insert(id.clone(), handle.clone());
        handle
    }

    /// Revoke and forget the handle for `id`. Returns whether one existed.
    pub fn release(&self, id: &ItemId) -> bool {
        match self.handles().remove(id) {
            Some(handle) => {
                handle.revoke();
                debug!(%id, "Handle released");
                true
            }
            None => false,
        }
    }

    /// Revoke every handle
    pub fn release_all(&self) -> Vec<ItemId> {
        let drained: Vec<(ItemId, ResourceHandle)> = self.handles().drain().collect();
        drained
            .into_iter()
            .map(|(id, handle)| {
                handle.revoke();
                id
            })
            .collect()
    }

    pub fn get(&self, id: &ItemId) -> Option<ResourceHandle> {
        self.handles().get(id).cloned()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.handles().contains_key(id)
    }

    pub fn live_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.handles().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }
}

impl Drop for ResourceHandleRegistry {
    fn drop(&mut self) {
        let released = self.release_all();
        if !released.is_empty() {
            debug!(count = released.len(), "Registry torn down, handles revoked");
        }
    }
}
