//! Event translation.
//!
//! The proxy consumes the daemon's raw event stream and re-emits each event
//! with its subject descriptor replaced by the registered handle. Events run
//! through a small dispatch table keyed by event name: every event gets the
//! default translation, and named hooks may additionally rewrite arguments
//! and apply registry side effects.
//!
//! Events are handled strictly one at a time in arrival order, hooks
//! included. An event whose subject is not registered is dropped with a
//! warning; it never stops the stream.

use std::collections::HashMap;
use std::sync::Arc;

use boss_core::ProcessDescriptor;
use boss_protocol::{RawEvent, WORKER_EXIT};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{ConnectionError, Result};
use crate::handle::{EventArg, ProcessEvent};
use crate::registry::Registry;

/// Side effect run on a translated event before it is emitted.
pub type EventHook = fn(&Registry, &mut ProcessEvent);

/// Translates raw daemon events into handle events.
pub struct EventProxy {
    registry: Arc<Registry>,
    hooks: HashMap<String, EventHook>,
    outbound: broadcast::Sender<ProcessEvent>,
}

impl EventProxy {
    /// Creates a proxy emitting on `outbound`, with the worker exit hook installed.
    pub fn new(registry: Arc<Registry>, outbound: broadcast::Sender<ProcessEvent>) -> Self {
        Self {
            registry,
            hooks: HashMap::new(),
            outbound,
        }
        .on(WORKER_EXIT, detach_exited_worker)
    }

    /// Installs `hook` for events named `name`, replacing any previous one.
    #[must_use]
    pub fn on(mut self, name: impl Into<String>, hook: EventHook) -> Self {
        self.hooks.insert(name.into(), hook);
        self
    }

    /// Resolves the subject of `raw` to its registered handle.
    ///
    /// Never creates a handle. Extra arguments are carried over unchanged.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidInput` if the subject has no id
    /// - `ConnectionError::Unresolvable` if no handle is registered for it
    pub fn translate(&self, raw: RawEvent) -> Result<ProcessEvent> {
        let id = raw
            .subject_id()
            .ok_or_else(|| ConnectionError::invalid_input("No process id in event subject"))?;
        let process = self
            .registry
            .get(id)
            .ok_or_else(|| ConnectionError::Unresolvable(id.clone()))?;

        Ok(ProcessEvent {
            name: raw.name,
            process,
            args: raw.args.into_iter().map(EventArg::Value).collect(),
        })
    }

    /// Translates and emits one event. Returns whether it was emitted.
    pub fn dispatch(&self, raw: RawEvent) -> bool {
        let name = raw.name.clone();
        let mut event = match self.translate(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(event = %name, error = %e, "Dropping event");
                return false;
            }
        };

        if let Some(hook) = self.hooks.get(&event.name) {
            hook(&self.registry, &mut event);
        }

        event.process.emit(&event.name, &event.args);
        trace!(event = %event.name, process_id = %event.process.id(), "Event forwarded");
        // No subscribers is fine.
        let _ = self.outbound.send(event);
        true
    }

    /// Pumps `events` until the stream closes or `cancel` fires.
    pub async fn run(self, mut events: broadcast::Receiver<RawEvent>, cancel: CancellationToken) {
        debug!("Event proxy started");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Event proxy cancelled");
                    break;
                }
                received = events.recv() => match received {
                    Ok(raw) => {
                        self.dispatch(raw);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event proxy lagged, events lost");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Daemon event stream closed");
                        break;
                    }
                },
            }
        }
    }
}

impl std::fmt::Debug for EventProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProxy")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Worker exit: the subject is the manager, the first argument the worker.
///
/// Replaces the worker argument with its handle, detaches it from the
/// manager and removes it from the registry.
fn detach_exited_worker(registry: &Registry, event: &mut ProcessEvent) {
    let Some(slot) = event.args.first_mut() else {
        warn!(manager_id = %event.process.id(), "Worker exit without a worker");
        return;
    };
    let Some(worker_id) = slot
        .as_value()
        .and_then(ProcessDescriptor::from_value)
        .and_then(|worker| worker.id().cloned())
    else {
        warn!(manager_id = %event.process.id(), "Worker exit names no worker id");
        return;
    };

    if let Some(worker) = registry.get(&worker_id) {
        *slot = EventArg::Process(worker.clone());
        if let Some(cluster) = event.process.as_cluster() {
            cluster.remove_worker(&worker);
        }
    }

    registry.remove(&worker_id);
    debug!(
        manager_id = %event.process.id(),
        worker_id = %worker_id,
        "Exited worker removed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor, same, FakeFactory, FakeProcess};
    use boss_core::ProcessId;
    use serde_json::json;
    use std::time::Duration;

    fn proxy() -> (EventProxy, Arc<Registry>, broadcast::Receiver<ProcessEvent>) {
        let registry = Arc::new(Registry::new(FakeFactory::new()));
        let (tx, rx) = broadcast::channel(16);
        (EventProxy::new(registry.clone(), tx), registry, rx)
    }

    fn worker_exit(manager: &str, worker: &str) -> RawEvent {
        RawEvent::worker_exit(
            descriptor(manager),
            &descriptor(worker).with_manager(manager),
        )
    }

    #[test]
    fn test_event_subject_is_substituted() {
        let (proxy, registry, mut rx) = proxy();
        let x = FakeProcess::plain("x");
        registry.insert(x.handle());

        assert!(proxy.dispatch(RawEvent::new("foo", descriptor("x")).with_arg("bar")));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name, "foo");
        assert!(same(&event.process, &x.handle()));
        assert_eq!(event.args.len(), 1);
        assert_eq!(event.args[0].as_value(), Some(&json!("bar")));
        assert_eq!(x.emitted(), [("foo".to_string(), 1)]);
    }

    #[test]
    fn test_unregistered_subject_is_dropped() {
        let (proxy, registry, mut rx) = proxy();

        assert!(!proxy.dispatch(RawEvent::new("foo", descriptor("ghost"))));

        assert!(rx.try_recv().is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_translate_errors() {
        let (proxy, _registry, _rx) = proxy();

        let err = proxy.translate(RawEvent::new("foo", descriptor("ghost"))).unwrap_err();
        assert_eq!(err, ConnectionError::Unresolvable(ProcessId::new("ghost")));

        let err = proxy
            .translate(RawEvent::new("foo", ProcessDescriptor::default()))
            .unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidInput(_)));
    }

    #[test]
    fn test_worker_exit_detaches_and_removes_worker() {
        let (proxy, registry, mut rx) = proxy();
        let manager = FakeProcess::manager("m");
        let worker = FakeProcess::worker("w", "m");
        registry.insert(manager.handle());
        registry.insert(worker.handle());

        assert!(proxy.dispatch(worker_exit("m", "w")));

        assert_eq!(manager.removed(), [ProcessId::new("w")]);
        assert!(!registry.contains(&ProcessId::new("w")));
        assert!(registry.contains(&ProcessId::new("m")));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name, WORKER_EXIT);
        assert!(same(&event.process, &manager.handle()));
        let exited = event.args[0].as_process().unwrap();
        assert!(same(exited, &worker.handle()));
    }

    #[test]
    fn test_worker_exit_with_unknown_manager_has_no_effect() {
        let (proxy, registry, _rx) = proxy();
        registry.insert(FakeProcess::worker("w", "m").handle());

        assert!(!proxy.dispatch(worker_exit("m", "w")));

        assert!(registry.contains(&ProcessId::new("w")));
    }

    #[test]
    fn test_worker_exit_for_unregistered_worker() {
        let (proxy, registry, mut rx) = proxy();
        let manager = FakeProcess::manager("m");
        registry.insert(manager.handle());

        assert!(proxy.dispatch(worker_exit("m", "w")));

        assert!(manager.removed().is_empty());
        let event = rx.try_recv().unwrap();
        assert!(event.args[0].as_value().is_some());
    }

    #[test]
    fn test_worker_exit_on_plain_manager_still_removes_worker() {
        let (proxy, registry, _rx) = proxy();
        registry.insert(FakeProcess::plain("m").handle());
        registry.insert(FakeProcess::worker("w", "m").handle());

        proxy.dispatch(worker_exit("m", "w"));

        assert!(!registry.contains(&ProcessId::new("w")));
    }

    #[test]
    fn test_custom_hook_runs_before_emit() {
        fn mark(_registry: &Registry, event: &mut ProcessEvent) {
            event.args.push(EventArg::Value(json!("marked")));
        }

        let (proxy, registry, mut rx) = proxy();
        let proxy = proxy.on("process:ready", mark);
        let p = FakeProcess::plain("p");
        registry.insert(p.handle());

        proxy.dispatch(RawEvent::new("process:ready", descriptor("p")));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.args[0].as_value(), Some(&json!("marked")));
        assert_eq!(p.emitted(), [("process:ready".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_run_forwards_in_order_until_closed() {
        let (proxy, registry, mut rx) = proxy();
        registry.insert(FakeProcess::plain("x").handle());
        let (raw_tx, raw_rx) = broadcast::channel(16);

        for name in ["one", "two", "three"] {
            raw_tx.send(RawEvent::new(name, descriptor("x"))).unwrap();
        }
        drop(raw_tx);

        tokio::time::timeout(
            Duration::from_secs(1),
            proxy.run(raw_rx, CancellationToken::new()),
        )
        .await
        .unwrap();

        let names: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (proxy, _registry, _rx) = proxy();
        let (_raw_tx, raw_rx) = broadcast::channel::<RawEvent>(16);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(proxy.run(raw_rx, cancel.clone()));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
