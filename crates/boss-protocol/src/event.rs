//! Events pushed by the daemon.

use boss_core::{ProcessDescriptor, ProcessId};
use serde::{Deserialize, Serialize};

/// Name of the event a cluster manager sends when one of its workers exits.
///
/// The event's subject is the manager; its first argument is the worker.
pub const WORKER_EXIT: &str = "worker:exit";

/// An event as pushed by the daemon: `(name, subject, ...args)`.
///
/// `args` are opaque to the protocol; consumers interpret them per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    pub process: ProcessDescriptor,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<serde_json::Value>,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, process: ProcessDescriptor) -> Self {
        Self {
            name: name.into(),
            process,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<serde_json::Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Creates a worker exit event for `worker` leaving `manager`.
    pub fn worker_exit(manager: ProcessDescriptor, worker: &ProcessDescriptor) -> Self {
        let worker = serde_json::to_value(worker).unwrap_or(serde_json::Value::Null);
        Self::new(WORKER_EXIT, manager).with_arg(worker)
    }

    /// Id of the event's subject, if it has one.
    pub fn subject_id(&self) -> Option<&ProcessId> {
        self.process.id()
    }
}
