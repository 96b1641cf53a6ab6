//! The process registry: the single source of truth mapping process ids to
//! managed handles.
//!
//! # Concurrency
//!
//! Two sources mutate the registry concurrently: replies to outstanding API
//! calls and the pushed event stream. Every insert, lookup and removal is a
//! single indivisible step on a sharded map, so no caller ever observes a
//! half-updated map.
//!
//! Creating a handle may suspend for as long as the process takes to answer
//! on its control socket. Creation is serialized per id only: a second
//! resolution of the same new id waits for the first and then finds its
//! handle, while lookups and creations for other ids proceed untouched.
//!
//! A creation that fails or whose future is dropped never inserts anything.

use std::collections::HashSet;
use std::sync::Arc;

use boss_core::{ProcessDescriptor, ProcessId};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::{ConnectionError, FactoryError, Result};
use crate::factory::ProcessFactory;
use crate::handle::ProcessRef;

/// Id-to-handle map plus resolution and reconciliation.
///
/// The registry is an explicitly owned object; each connection builds its
/// own, so independent connections never share handles.
pub struct Registry {
    processes: DashMap<ProcessId, ProcessRef>,

    /// Per-id creation slots. An entry exists only while a creation for
    /// that id is running or waiting.
    creating: DashMap<ProcessId, Arc<Mutex<()>>>,

    factory: Arc<dyn ProcessFactory>,
}

impl Registry {
    pub fn new(factory: Arc<dyn ProcessFactory>) -> Self {
        Self {
            processes: DashMap::new(),
            creating: DashMap::new(),
            factory,
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn get(&self, id: &ProcessId) -> Option<ProcessRef> {
        self.processes.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &ProcessId) -> bool {
        self.processes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn ids(&self) -> Vec<ProcessId> {
        self.processes.iter().map(|entry| entry.key().clone()).collect()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Inserts an already constructed handle under its own id.
    ///
    /// Returns the handle previously registered under that id, if any.
    pub fn insert(&self, handle: ProcessRef) -> Option<ProcessRef> {
        self.processes.insert(handle.id().clone(), handle)
    }

    /// Removes a handle. Removing an absent id is a no-op.
    pub fn remove(&self, id: &ProcessId) -> Option<ProcessRef> {
        let removed = self.processes.remove(id).map(|(_, handle)| handle);
        if removed.is_some() {
            debug!(process_id = %id, remaining = self.len(), "Managed process removed");
        }
        removed
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Returns the handle for `descriptor`, creating it if this id is new.
    ///
    /// An existing handle is refreshed with `update(descriptor)` and returned
    /// without calling the factory. A new handle is built from the
    /// descriptor's socket address and inserted only once construction
    /// succeeds.
    ///
    /// Afterwards, if the handle names a manager that is registered, the
    /// manager is told about the worker. This happens on every resolution,
    /// so managers must accept repeated adds.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidInput` if the descriptor is missing or has no id
    /// - `ConnectionError::Factory` with the factory's error, unchanged
    pub async fn find_or_create(
        &self,
        descriptor: Option<&ProcessDescriptor>,
    ) -> Result<ProcessRef> {
        let descriptor =
            descriptor.ok_or_else(|| ConnectionError::invalid_input("No process info"))?;
        let id = descriptor
            .id()
            .ok_or_else(|| ConnectionError::invalid_input("No process id in process info"))?;

        let handle = match self.refresh(id, descriptor) {
            Some(existing) => existing,
            None => self.create(id, descriptor).await?,
        };

        self.attach_to_manager(&handle);
        Ok(handle)
    }

    fn refresh(&self, id: &ProcessId, descriptor: &ProcessDescriptor) -> Option<ProcessRef> {
        let existing = self.get(id)?;
        existing.update(descriptor);
        Some(existing)
    }

    async fn create(&self, id: &ProcessId, descriptor: &ProcessDescriptor) -> Result<ProcessRef> {
        let _slot = self.claim_creation(id).await;

        // A concurrent resolution of the same id may have finished while we waited.
        if let Some(existing) = self.refresh(id, descriptor) {
            return Ok(existing);
        }

        debug!(process_id = %id, address = %descriptor.socket, "Creating managed process");
        let handle = self.factory.create(&descriptor.socket).await?;

        if handle.id() != id {
            return Err(FactoryError::IdMismatch {
                address: descriptor.socket.clone(),
                expected: id.clone(),
                actual: handle.id().clone(),
            }
            .into());
        }

        self.processes.insert(id.clone(), Arc::clone(&handle));
        info!(
            process_id = %id,
            total_processes = self.len(),
            "Managed process registered"
        );
        Ok(handle)
    }

    async fn claim_creation(&self, id: &ProcessId) -> CreationSlot<'_> {
        let lock = Arc::clone(self.creating.entry(id.clone()).or_default().value());
        // Built before waiting so that a waiter dropped mid-wait still
        // forgets the slot.
        let mut slot = CreationSlot {
            creating: &self.creating,
            id: id.clone(),
            guard: None,
        };
        slot.guard = Some(lock.lock_owned().await);
        slot
    }

    fn attach_to_manager(&self, handle: &ProcessRef) {
        let Some(manager_id) = handle.manager_id().filter(|id| !id.is_empty()) else {
            return;
        };
        let Some(manager) = self.get(&manager_id) else {
            debug!(
                process_id = %handle.id(),
                manager_id = %manager_id,
                "Manager not registered, skipping worker attach"
            );
            return;
        };

        match manager.as_cluster() {
            Some(cluster) => cluster.add_worker(Arc::clone(handle)),
            None => debug!(
                process_id = %handle.id(),
                manager_id = %manager_id,
                "Manager does not track workers"
            ),
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Removes every handle whose id is absent from `snapshot`.
    ///
    /// Comparison is by id only. Handles whose ids are present are left
    /// untouched. Returns the ids that were removed.
    pub fn prune_missing(&self, snapshot: &[ProcessDescriptor]) -> Vec<ProcessId> {
        let live: HashSet<&ProcessId> = snapshot.iter().filter_map(ProcessDescriptor::id).collect();

        let missing: Vec<ProcessId> = self
            .processes
            .iter()
            .filter(|entry| !live.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        missing
            .into_iter()
            .filter(|id| self.remove(id).is_some())
            .collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("processes", &self.len())
            .field("creating", &self.creating.len())
            .finish()
    }
}

/// Exclusive right to create the handle for one id.
///
/// Dropping the slot, held or still waiting, releases the lock and forgets
/// the slot once nobody else is waiting on it.
struct CreationSlot<'a> {
    creating: &'a DashMap<ProcessId, Arc<Mutex<()>>>,
    id: ProcessId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.creating
            .remove_if(&self.id, |_, slot| Arc::strong_count(slot) == 1);
    }
}
