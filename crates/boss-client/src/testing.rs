//! Test doubles for the connection's collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use boss_core::{ProcessDescriptor, ProcessId};
use boss_protocol::{RawEvent, Reply, Request};
use tokio::sync::broadcast;

use crate::api::DaemonApi;
use crate::error::{ApiError, FactoryError};
use crate::factory::ProcessFactory;
use crate::handle::{ClusterManager, EventArg, ManagedProcess, ProcessRef};

/// Handle that records every call made on it.
#[derive(Debug)]
pub struct FakeProcess {
    id: ProcessId,
    manager: Option<ProcessId>,
    cluster: bool,
    pub updates: Mutex<Vec<ProcessDescriptor>>,
    pub added: Mutex<Vec<ProcessId>>,
    pub removed: Mutex<Vec<ProcessId>>,
    pub emitted: Mutex<Vec<(String, usize)>>,
    members: Mutex<Vec<ProcessRef>>,
}

impl FakeProcess {
    fn build(id: &str, manager: Option<&str>, cluster: bool) -> Arc<Self> {
        Arc::new(Self {
            id: ProcessId::new(id),
            manager: manager.map(ProcessId::new),
            cluster,
            updates: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
            members: Mutex::new(Vec::new()),
        })
    }

    pub fn plain(id: &str) -> Arc<Self> {
        Self::build(id, None, false)
    }

    pub fn worker(id: &str, manager: &str) -> Arc<Self> {
        Self::build(id, Some(manager), false)
    }

    pub fn manager(id: &str) -> Arc<Self> {
        Self::build(id, None, true)
    }

    pub fn added(&self) -> Vec<ProcessId> {
        self.added.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<ProcessId> {
        self.removed.lock().unwrap().clone()
    }

    pub fn emitted(&self) -> Vec<(String, usize)> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn handle(self: &Arc<Self>) -> ProcessRef {
        Arc::clone(self) as ProcessRef
    }
}

impl ManagedProcess for FakeProcess {
    fn id(&self) -> &ProcessId {
        &self.id
    }

    fn update(&self, descriptor: &ProcessDescriptor) {
        self.updates.lock().unwrap().push(descriptor.clone());
    }

    fn manager_id(&self) -> Option<ProcessId> {
        self.manager.clone()
    }

    fn as_cluster(&self) -> Option<&dyn ClusterManager> {
        self.cluster.then_some(self as &dyn ClusterManager)
    }

    fn emit(&self, name: &str, args: &[EventArg]) {
        self.emitted
            .lock()
            .unwrap()
            .push((name.to_string(), args.len()));
    }
}

impl ClusterManager for FakeProcess {
    fn add_worker(&self, worker: ProcessRef) {
        self.added.lock().unwrap().push(worker.id().clone());
        self.members.lock().unwrap().push(worker);
    }

    fn remove_worker(&self, worker: &ProcessRef) {
        self.removed.lock().unwrap().push(worker.id().clone());
        self.members.lock().unwrap().retain(|w| w.id() != worker.id());
    }

    fn workers(&self) -> Vec<ProcessRef> {
        self.members.lock().unwrap().clone()
    }
}

/// Factory serving prepared handles by address.
#[derive(Default)]
pub struct FakeFactory {
    prepared: Mutex<HashMap<String, ProcessRef>>,
    failures: Mutex<HashMap<String, FactoryError>>,
    calls: AtomicUsize,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn prepare(&self, address: &str, handle: ProcessRef) {
        self.prepared
            .lock()
            .unwrap()
            .insert(address.to_string(), handle);
    }

    pub fn fail(&self, address: &str, error: FactoryError) {
        self.failures
            .lock()
            .unwrap()
            .insert(address.to_string(), error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessFactory for FakeFactory {
    async fn create(&self, address: &str) -> Result<ProcessRef, FactoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().get(address) {
            return Err(err.clone());
        }
        self.prepared
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| FactoryError::Connect {
                address: address.to_string(),
                reason: "no such process".to_string(),
            })
    }
}

/// Daemon API answering from a queue of canned replies.
pub struct FakeApi {
    replies: Mutex<VecDeque<Result<Reply, ApiError>>>,
    pub requests: Mutex<Vec<Request>>,
    events: Mutex<Option<broadcast::Sender<RawEvent>>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            events: Mutex::new(Some(events)),
        })
    }

    pub fn reply(&self, reply: Result<Reply, ApiError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn send_event(&self, event: RawEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }

    /// Ends the event stream, as when the daemon goes away.
    pub fn hang_up(&self) {
        self.events.lock().unwrap().take();
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl DaemonApi for FakeApi {
    async fn request(&self, request: Request) -> Result<Reply, ApiError> {
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or(Err(ApiError::ChannelClosed))
    }

    fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        match self.events.lock().unwrap().as_ref() {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        }
    }
}

/// Descriptor whose socket address is derived from its id.
pub fn descriptor(id: &str) -> ProcessDescriptor {
    ProcessDescriptor::new(id, address(id))
}

pub fn address(id: &str) -> String {
    format!("/tmp/{id}.sock")
}

pub fn same(a: &ProcessRef, b: &ProcessRef) -> bool {
    Arc::ptr_eq(a, b)
}
