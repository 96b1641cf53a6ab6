//! Managed process handles.
//!
//! A handle is the connection's long-lived, locally owned object for one
//! supervised process or cluster manager. The registry creates a handle the
//! first time an id is seen and afterwards only refreshes it in place with
//! [`ManagedProcess::update`].
//!
//! Workers refer to their manager by id only; the manager holds the worker
//! handles it has been told about. No handle holds a structural pointer to
//! its manager, so removing a manager from the registry never leaves a
//! worker keeping it alive.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use boss_core::{DomainError, ProcessDescriptor, ProcessId, ProcessKind};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of a handle's own event channel
const HANDLE_EVENT_BUFFER: usize = 64;

/// Shared reference to a managed process.
pub type ProcessRef = Arc<dyn ManagedProcess>;

// ============================================================================
// Handle Traits
// ============================================================================

/// A supervised unit as seen by the connection.
pub trait ManagedProcess: fmt::Debug + Send + Sync {
    /// Stable identity. Never changes after construction.
    fn id(&self) -> &ProcessId;

    /// Refreshes mutable state from the latest descriptor.
    fn update(&self, descriptor: &ProcessDescriptor);

    /// Id of the cluster manager this process works for.
    fn manager_id(&self) -> Option<ProcessId> {
        None
    }

    /// Worker membership operations, for handles that manage a cluster.
    fn as_cluster(&self) -> Option<&dyn ClusterManager> {
        None
    }

    /// Receives an event the daemon sent about this process.
    fn emit(&self, _name: &str, _args: &[EventArg]) {}

    /// Latest known state, in descriptor form.
    fn descriptor(&self) -> ProcessDescriptor {
        ProcessDescriptor {
            id: Some(self.id().clone()),
            ..ProcessDescriptor::default()
        }
    }
}

/// Worker membership of a cluster manager.
///
/// Membership is not ownership: adding or removing a worker never creates
/// or destroys it. Re-adding a known worker is harmless.
pub trait ClusterManager: Send + Sync {
    fn add_worker(&self, worker: ProcessRef);
    fn remove_worker(&self, worker: &ProcessRef);

    /// Snapshot of the current worker membership.
    fn workers(&self) -> Vec<ProcessRef>;
}

// ============================================================================
// Events
// ============================================================================

/// A positional event argument after translation.
#[derive(Debug, Clone)]
pub enum EventArg {
    /// A descriptor that was resolved to its handle.
    Process(ProcessRef),
    /// Anything else, passed through opaquely.
    Value(serde_json::Value),
}

impl EventArg {
    pub fn as_process(&self) -> Option<&ProcessRef> {
        match self {
            Self::Process(process) => Some(process),
            Self::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Process(_) => None,
        }
    }
}

/// A daemon event with its subject resolved to a handle.
#[derive(Debug, Clone)]
pub struct ProcessEvent {
    pub name: String,
    pub process: ProcessRef,
    pub args: Vec<EventArg>,
}

/// An event delivered to a single handle's subscribers.
#[derive(Debug, Clone)]
pub struct HandleEvent {
    pub name: String,
    pub args: Vec<EventArg>,
}

// ============================================================================
// Process Handle
// ============================================================================

/// Mutable state of a [`ProcessHandle`].
#[derive(Debug, Clone)]
pub struct ProcessState {
    pub descriptor: ProcessDescriptor,
    pub updated_at: DateTime<Utc>,
    /// Number of updates applied since creation.
    pub revision: u64,
}

/// The standard managed process handle.
///
/// Handles of kind [`ProcessKind::Cluster`] also track worker membership.
pub struct ProcessHandle {
    id: ProcessId,
    kind: ProcessKind,
    state: RwLock<ProcessState>,
    workers: Mutex<Vec<ProcessRef>>,
    events: broadcast::Sender<HandleEvent>,
}

impl ProcessHandle {
    /// Creates a handle seeded from a descriptor.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::MissingField` if the descriptor has no id.
    pub fn from_descriptor(descriptor: &ProcessDescriptor) -> Result<Self, DomainError> {
        let id = descriptor.id().cloned().ok_or_else(|| DomainError::missing("id"))?;
        let (events, _) = broadcast::channel(HANDLE_EVENT_BUFFER);

        Ok(Self {
            id,
            kind: descriptor.kind,
            state: RwLock::new(ProcessState {
                descriptor: descriptor.clone(),
                updated_at: Utc::now(),
                revision: 0,
            }),
            workers: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn state(&self) -> ProcessState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe to events about this process only.
    pub fn subscribe(&self) -> broadcast::Receiver<HandleEvent> {
        self.events.subscribe()
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl ManagedProcess for ProcessHandle {
    fn id(&self) -> &ProcessId {
        &self.id
    }

    fn update(&self, descriptor: &ProcessDescriptor) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.descriptor = ProcessDescriptor {
            // Identity and kind are fixed at creation.
            id: Some(self.id.clone()),
            kind: self.kind,
            ..descriptor.clone()
        };
        state.updated_at = Utc::now();
        state.revision = state.revision.saturating_add(1);
    }

    fn manager_id(&self) -> Option<ProcessId> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .descriptor
            .manager()
            .cloned()
    }

    fn as_cluster(&self) -> Option<&dyn ClusterManager> {
        match self.kind {
            ProcessKind::Cluster => Some(self),
            ProcessKind::Process => None,
        }
    }

    fn emit(&self, name: &str, args: &[EventArg]) {
        // No subscribers is the common case.
        let _ = self.events.send(HandleEvent {
            name: name.to_string(),
            args: args.to_vec(),
        });
    }

    fn descriptor(&self) -> ProcessDescriptor {
        self.state().descriptor
    }
}

impl ClusterManager for ProcessHandle {
    fn add_worker(&self, worker: ProcessRef) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if workers.iter().any(|w| w.id() == worker.id()) {
            return;
        }
        debug!(manager_id = %self.id, worker_id = %worker.id(), "Worker joined cluster");
        workers.push(worker);
    }

    fn remove_worker(&self, worker: &ProcessRef) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = workers.len();
        workers.retain(|w| w.id() != worker.id());
        if workers.len() != before {
            debug!(manager_id = %self.id, worker_id = %worker.id(), "Worker left cluster");
        }
    }

    fn workers(&self) -> Vec<ProcessRef> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
