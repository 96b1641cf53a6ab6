//! Descriptor substitution on daemon API results.
//!
//! The interceptor sits between callers and the raw [`DaemonApi`]. Methods
//! are registered by name together with the shape of descriptor their reply
//! carries; one generic call path then resolves those descriptors through
//! the [`Registry`] before the caller sees them. Methods that are not
//! registered pass their reply through untouched.

use std::collections::HashMap;
use std::sync::Arc;

use boss_core::ProcessDescriptor;
use boss_protocol::{Method, Reply, Request};
use futures::future::try_join_all;
use tracing::debug;

use crate::api::DaemonApi;
use crate::error::{ConnectionError, Result};
use crate::handle::ProcessRef;
use crate::registry::Registry;

/// How a registered method's reply is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// One descriptor, resolved to one handle.
    Single,
    /// An ordered sequence, resolved entry by entry in order.
    Sequence,
    /// An authoritative sequence: the registry is pruned against it first.
    Snapshot,
}

/// A daemon reply after interception.
#[derive(Debug, Clone)]
pub enum Resolved {
    Process(ProcessRef),
    Processes(Vec<ProcessRef>),
    /// Reply of a method that is not intercepted.
    Passthrough(Reply),
}

impl Resolved {
    fn kind(&self) -> &'static str {
        match self {
            Self::Process(_) => "process",
            Self::Processes(_) => "processes",
            Self::Passthrough(reply) => reply.kind(),
        }
    }

    pub fn into_process(self, method: Method) -> Result<ProcessRef> {
        match self {
            Self::Process(process) => Ok(process),
            other => Err(unexpected(method, other.kind())),
        }
    }

    pub fn into_processes(self, method: Method) -> Result<Vec<ProcessRef>> {
        match self {
            Self::Processes(processes) => Ok(processes),
            other => Err(unexpected(method, other.kind())),
        }
    }

    pub fn into_reply(self, method: Method) -> Result<Reply> {
        match self {
            Self::Passthrough(reply) => Ok(reply),
            other => Err(unexpected(method, other.kind())),
        }
    }
}

fn unexpected(method: Method, reply: &str) -> ConnectionError {
    ConnectionError::UnexpectedReply {
        method,
        reply: reply.to_string(),
    }
}

/// Wraps a daemon API so registered methods return handles, not descriptors.
pub struct MethodInterceptor {
    api: Arc<dyn DaemonApi>,
    registry: Arc<Registry>,
    methods: HashMap<Method, ResultShape>,
}

impl MethodInterceptor {
    /// Creates an interceptor with no methods registered.
    pub fn new(api: Arc<dyn DaemonApi>, registry: Arc<Registry>) -> Self {
        Self {
            api,
            registry,
            methods: HashMap::new(),
        }
    }

    /// Registers `method` for interception with the given reply shape.
    #[must_use]
    pub fn intercept(mut self, method: Method, shape: ResultShape) -> Self {
        self.methods.insert(method, shape);
        self
    }

    /// Creates an interceptor over every method that answers with descriptors.
    pub fn with_process_methods(api: Arc<dyn DaemonApi>, registry: Arc<Registry>) -> Self {
        Self::new(api, registry)
            .intercept(Method::ListProcesses, ResultShape::Snapshot)
            .intercept(Method::StartProcess, ResultShape::Single)
            .intercept(Method::FindProcessInfoById, ResultShape::Single)
            .intercept(Method::FindProcessInfoByPid, ResultShape::Single)
            .intercept(Method::FindProcessInfoByName, ResultShape::Single)
    }

    pub fn shape_of(&self, method: Method) -> Option<ResultShape> {
        self.methods.get(&method).copied()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Forwards `request` unchanged and resolves the descriptors in its reply.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Api` if the daemon call fails; nothing is resolved
    /// - any resolution error; a sequence fails as a whole on its first error
    /// - `ConnectionError::UnexpectedReply` if the reply does not match the
    ///   registered shape
    pub async fn call(&self, request: Request) -> Result<Resolved> {
        let method = request.method();
        let reply = self.api.request(request).await?;

        let Some(shape) = self.shape_of(method) else {
            return Ok(Resolved::Passthrough(reply));
        };

        match (shape, reply) {
            (ResultShape::Single, Reply::Process(descriptor)) => {
                let process = self.registry.find_or_create(descriptor.as_ref()).await?;
                Ok(Resolved::Process(process))
            }
            (ResultShape::Sequence, Reply::Processes(descriptors)) => {
                self.resolve_all(&descriptors).await.map(Resolved::Processes)
            }
            (ResultShape::Snapshot, Reply::Processes(descriptors)) => {
                let pruned = self.registry.prune_missing(&descriptors);
                if !pruned.is_empty() {
                    debug!(%method, pruned = pruned.len(), "Pruned processes missing from snapshot");
                }
                self.resolve_all(&descriptors).await.map(Resolved::Processes)
            }
            (_, reply) => Err(unexpected(method, reply.kind())),
        }
    }

    async fn resolve_all(&self, descriptors: &[ProcessDescriptor]) -> Result<Vec<ProcessRef>> {
        try_join_all(
            descriptors
                .iter()
                .map(|descriptor| self.registry.find_or_create(Some(descriptor))),
        )
        .await
    }
}

impl std::fmt::Debug for MethodInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodInterceptor")
            .field("methods", &self.methods)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, FactoryError};
    use crate::testing::{address, descriptor, same, FakeApi, FakeFactory, FakeProcess};
    use boss_core::ProcessId;

    fn interceptor(api: &Arc<FakeApi>, factory: &Arc<FakeFactory>) -> MethodInterceptor {
        let registry = Arc::new(Registry::new(factory.clone()));
        MethodInterceptor::with_process_methods(api.clone(), registry)
    }

    #[tokio::test]
    async fn test_list_returns_existing_handle() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        let interceptor = interceptor(&api, &factory);
        let foo = FakeProcess::plain("foo").handle();
        interceptor.registry().insert(foo.clone());

        api.reply(Ok(Reply::Processes(vec![descriptor("foo")])));
        let processes = interceptor
            .call(Request::ListProcesses)
            .await
            .unwrap()
            .into_processes(Method::ListProcesses)
            .unwrap();

        assert_eq!(processes.len(), 1);
        assert!(same(&processes[0], &foo));
        assert_eq!(factory.calls(), 0);
    }

    #[tokio::test]
    async fn test_upstream_error_skips_resolution() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        let interceptor = interceptor(&api, &factory);

        api.reply(Err(ApiError::remote("daemon is shutting down")));
        let err = interceptor.call(Request::ListProcesses).await.unwrap_err();

        assert_eq!(
            err,
            ConnectionError::Api(ApiError::remote("daemon is shutting down"))
        );
        assert_eq!(factory.calls(), 0);
        assert!(interceptor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_sequence_preserves_order() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        for id in ["c", "a", "b"] {
            factory.prepare(&address(id), FakeProcess::plain(id).handle());
        }
        let interceptor = interceptor(&api, &factory);

        api.reply(Ok(Reply::Processes(vec![
            descriptor("c"),
            descriptor("a"),
            descriptor("b"),
        ])));
        let ids: Vec<String> = interceptor
            .call(Request::ListProcesses)
            .await
            .unwrap()
            .into_processes(Method::ListProcesses)
            .unwrap()
            .iter()
            .map(|p| p.id().to_string())
            .collect();

        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_sequence_fails_fast() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        factory.prepare(&address("ok"), FakeProcess::plain("ok").handle());
        let failure = FactoryError::Connect {
            address: address("bad"),
            reason: "refused".to_string(),
        };
        factory.fail(&address("bad"), failure.clone());
        let interceptor = interceptor(&api, &factory);

        api.reply(Ok(Reply::Processes(vec![descriptor("ok"), descriptor("bad")])));
        let err = interceptor.call(Request::ListProcesses).await.unwrap_err();

        assert_eq!(err, ConnectionError::Factory(failure));
        assert!(!interceptor.registry().contains(&ProcessId::new("bad")));
    }

    #[tokio::test]
    async fn test_snapshot_prunes_missing_before_resolving() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        let interceptor = interceptor(&api, &factory);
        let kept = FakeProcess::plain("kept").handle();
        interceptor.registry().insert(kept.clone());
        interceptor.registry().insert(FakeProcess::plain("gone").handle());

        api.reply(Ok(Reply::Processes(vec![descriptor("kept")])));
        interceptor.call(Request::ListProcesses).await.unwrap();

        assert_eq!(interceptor.registry().ids(), [ProcessId::new("kept")]);
        assert!(same(
            &interceptor.registry().get(&ProcessId::new("kept")).unwrap(),
            &kept
        ));
    }

    #[tokio::test]
    async fn test_plain_sequence_does_not_prune() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        let registry = Arc::new(Registry::new(factory.clone()));
        registry.insert(FakeProcess::plain("a").handle());
        registry.insert(FakeProcess::plain("b").handle());
        let interceptor = MethodInterceptor::new(api.clone(), registry)
            .intercept(Method::ListProcesses, ResultShape::Sequence);

        api.reply(Ok(Reply::Processes(vec![descriptor("a")])));
        interceptor.call(Request::ListProcesses).await.unwrap();

        assert_eq!(interceptor.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_single_creates_new_handle() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        factory.prepare(&address("foo"), FakeProcess::plain("foo").handle());
        let interceptor = interceptor(&api, &factory);

        api.reply(Ok(Reply::Process(Some(descriptor("foo")))));
        let process = interceptor
            .call(Request::FindProcessInfoById {
                id: ProcessId::new("foo"),
            })
            .await
            .unwrap()
            .into_process(Method::FindProcessInfoById)
            .unwrap();

        assert_eq!(process.id().as_str(), "foo");
        assert_eq!(factory.calls(), 1);
        assert!(interceptor.registry().contains(&ProcessId::new("foo")));
    }

    #[tokio::test]
    async fn test_single_without_descriptor_is_invalid_input() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        let interceptor = interceptor(&api, &factory);

        api.reply(Ok(Reply::Process(None)));
        let err = interceptor
            .call(Request::FindProcessInfoByPid { pid: 1 })
            .await
            .unwrap_err();

        assert_eq!(err, ConnectionError::invalid_input("No process info"));
    }

    #[tokio::test]
    async fn test_unregistered_method_passes_through() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        let interceptor = interceptor(&api, &factory);
        assert_eq!(interceptor.shape_of(Method::Kill), None);

        api.reply(Ok(Reply::Empty));
        let reply = interceptor
            .call(Request::Kill)
            .await
            .unwrap()
            .into_reply(Method::Kill)
            .unwrap();

        assert_eq!(reply, Reply::Empty);
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_unexpected_reply() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        let interceptor = interceptor(&api, &factory);

        api.reply(Ok(Reply::Empty));
        let err = interceptor.call(Request::ListProcesses).await.unwrap_err();

        assert_eq!(
            err,
            ConnectionError::UnexpectedReply {
                method: Method::ListProcesses,
                reply: "empty".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_request_forwarded_unchanged() {
        let api = FakeApi::new();
        let factory = FakeFactory::new();
        let interceptor = interceptor(&api, &factory);
        let request = Request::FindProcessInfoByName {
            name: "web".to_string(),
        };

        api.reply(Ok(Reply::Process(None)));
        let _ = interceptor.call(request.clone()).await;

        assert_eq!(api.requests.lock().unwrap().as_slice(), [request]);
    }
}
