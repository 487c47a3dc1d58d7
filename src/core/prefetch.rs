//! Keeps the window's near-term items resident.
//!
//! After every window mutation the pipeline receives a snapshot and computes
//! the target set: the current item, the one after it, and anything appended
//! since the previous snapshot. Each target without a handle gets its own
//! tracked task that resolves the payload and acquires a handle. Tasks never
//! touch the window; they only read the scope recorded here.
//!
//! Scope changes and handle acquisition happen under the same lock, so a
//! fetch that completes after its item was evicted can never leave a handle
//! behind. Cache deletes that fail for evicted items are retried on the next
//! sync.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{Item, ItemId, PipelineEvent};

use super::fetcher::Fetcher;
use super::registry::{ResourceHandle, ResourceHandleRegistry};
use super::window::WindowSnapshot;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Scope {
    /// Identities in the window as of the latest snapshot
    members: HashSet<ItemId>,

    /// Identities already seen by a previous computation
    seen: HashSet<ItemId>,

    /// Identity at the current position
    current: Option<ItemId>,

    /// Evicted identities whose cache delete failed; retried on the next sync
    pending_purge: HashSet<ItemId>,
}

struct Shared {
    fetcher: Arc<Fetcher>,
    registry: Arc<ResourceHandleRegistry>,
    scope: Mutex<Scope>,
    events: broadcast::Sender<PipelineEvent>,
    /// Spawned tasks whose future has not yet completed or been dropped
    outstanding: watch::Sender<usize>,
}

impl Shared {
    fn scope(&self) -> MutexGuard<'_, Scope> {
        self.scope
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Count a task as outstanding. Must be called before spawning it.
    fn track(self: &Arc<Self>) -> TaskTicket {
        self.outstanding.send_modify(|n| *n += 1);
        TaskTicket(Arc::clone(self))
    }

    /// Remember identities to delete again on the next sync
    fn defer_purge(&self, ids: impl IntoIterator<Item = ItemId>) {
        let mut scope = self.scope();
        for id in ids {
            if !scope.members.contains(&id) {
                scope.pending_purge.insert(id);
            }
        }
    }
}

/// Moved into a spawned task; releases its count when the task ends or is aborted
struct TaskTicket(Arc<Shared>);

impl Drop for TaskTicket {
    fn drop(&mut self) {
        self.0.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[derive(Default)]
struct Tasks {
    prefetch: HashMap<ItemId, JoinHandle<()>>,
    purges: Vec<JoinHandle<()>>,
}

impl Tasks {
    fn prune(&mut self) {
        self.prefetch.retain(|_, handle| !handle.is_finished());
        self.purges.retain(|handle| !handle.is_finished());
    }

    fn drain(&mut self) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = self.prefetch.drain().map(|(_, h)| h).collect();
        handles.append(&mut self.purges);
        handles
    }
}

/// Drives fetches and handle lifetimes for the window
pub struct PrefetchPipeline {
    shared: Arc<Shared>,
    tasks: Mutex<Tasks>,
}

impl PrefetchPipeline {
    pub fn new(fetcher: Arc<Fetcher>, registry: Arc<ResourceHandleRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outstanding, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                fetcher,
                registry,
                scope: Mutex::new(Scope::default()),
                events,
                outstanding,
            }),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to residency events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<ResourceHandleRegistry> {
        &self.shared.registry
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.shared.fetcher
    }

    /// Live handle for `id`, if resident
    pub fn handle(&self, id: &ItemId) -> Option<ResourceHandle> {
        self.shared.registry.get(id)
    }

    /// Number of prefetch and purge tasks not yet finished
    pub fn pending_tasks(&self) -> usize {
        let mut tasks = self.tasks();
        tasks.prune();
        tasks.prefetch.len() + tasks.purges.len()
    }

    /// Bring residency in line with `snapshot`. `evicted` lists identities the
    /// window just dropped. Never blocks: all I/O happens in spawned tasks.
    pub fn sync(&self, snapshot: &WindowSnapshot, evicted: &[ItemId]) {
        let mut scope = self.shared.scope();

        scope.members = snapshot.items.iter().map(|item| item.id.clone()).collect();
        scope.current = snapshot.current().map(|item| item.id.clone());

        for id in evicted {
            if self.shared.registry.release(id) {
                self.shared.emit(PipelineEvent::Released { id: id.clone() });
            }
        }

        let mut purge = evicted.to_vec();
        for id in std::mem::take(&mut scope.pending_purge) {
            if !scope.members.contains(&id) && !purge.contains(&id) {
                purge.push(id);
            }
        }

        let targets = target_set(snapshot, &scope.seen);
        let mut seen = scope.members.clone();

        let mut tasks = self.tasks();
        tasks.prune();

        if !purge.is_empty() {
            info!(
                evicted = evicted.len(),
                retried = purge.len() - evicted.len(),
                "Purging evicted items"
            );
            let ticket = self.shared.track();
            let shared = Arc::clone(&self.shared);
            tasks.purges.push(tokio::spawn(async move {
                let _ticket = ticket;
                purge_evicted(shared, purge).await;
            }));
        }

        for item in targets {
            if self.shared.registry.contains(&item.id) {
                continue;
            }
            if tasks.prefetch.contains_key(&item.id) {
                // The running task may have started before an eviction and end
                // without a handle, so keep treating the item as new
                seen.remove(&item.id);
                continue;
            }

            debug!(id = %item.id, "Scheduling prefetch");
            let ticket = self.shared.track();
            let shared = Arc::clone(&self.shared);
            let id = item.id.clone();
            tasks.prefetch.insert(
                id,
                tokio::spawn(async move {
                    let _ticket = ticket;
                    prefetch(shared, item).await;
                }),
            );
        }

        scope.seen = seen;
    }

    /// Wait until every outstanding task has finished, including ones
    /// spawned while waiting
    pub async fn settle(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        let _ = outstanding.wait_for(|n| *n == 0).await;
        self.tasks().prune();
    }

    /// Stop all work and revoke every handle
    pub async fn shutdown(&self) {
        {
            let mut scope = self.shared.scope();
            scope.members.clear();
            scope.seen.clear();
            scope.current = None;
            scope.pending_purge.clear();
        }

        let handles = self.tasks().drain();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }

        let released = self.shared.registry.release_all();
        info!(count = released.len(), "Prefetch pipeline shut down");
        for id in released {
            self.shared.emit(PipelineEvent::Released { id });
        }
    }
}

/// Current, next, then everything not seen before, without repeats
fn target_set(snapshot: &WindowSnapshot, seen: &HashSet<ItemId>) -> Vec<Item> {
    let mut picked: HashSet<&ItemId> = HashSet::new();
    let mut targets = Vec::new();

    let fresh = snapshot.items.iter().filter(|item| !seen.contains(&item.id));
    for item in snapshot.current().into_iter().chain(snapshot.next()).chain(fresh) {
        if picked.insert(&item.id) {
            targets.push(item.clone());
        }
    }

    targets
}

async fn prefetch(shared: Arc<Shared>, item: Item) {
    let payload = match shared.fetcher.resolve(&item).await {
        Ok(payload) => payload,
        Err(e) => {
            warn!(id = %item.id, error = %e, "Prefetch failed");
            shared.emit(PipelineEvent::PrefetchFailed {
                id: item.id.clone(),
                reason: e.to_string(),
            });
            return;
        }
    };

    let acquired = {
        let scope = shared.scope();
        if scope.members.contains(&item.id) {
            shared.registry.acquire(&item.id, payload);
            Some(scope.current.as_ref() == Some(&item.id))
        } else {
            None
        }
    };

    match acquired {
        Some(current) => {
            debug!(id = %item.id, current, "Item resident");
            shared.emit(PipelineEvent::HandleReady {
                id: item.id,
                current,
            });
        }
        None => {
            debug!(id = %item.id, "Item evicted during fetch, discarding payload");
            let still_gone = !shared.scope().members.contains(&item.id);
            if still_gone {
                if let Err(e) = shared.fetcher.store().delete(&item.id).await {
                    warn!(id = %item.id, error = %e, "Failed to purge stale payload");
                    shared.defer_purge([item.id.clone()]);
                }
            }
        }
    }
}

async fn purge_evicted(shared: Arc<Shared>, ids: Vec<ItemId>) {
    let report = shared.fetcher.store().delete_many(&ids).await;
    if report.is_ok() {
        return;
    }

    for (id, reason) in &report.failed {
        warn!(%id, %reason, "Cache purge failed, retrying on next sync");
    }
    shared.defer_purge(report.failed.into_iter().map(|(id, _)| id));
}
