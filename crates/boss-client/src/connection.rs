//! The daemon connection façade.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use boss_core::{ProcessId, StartOptions};
use boss_protocol::{Method, Reply, Request};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::DaemonApi;
use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, Result};
use crate::factory::{ProcessFactory, SocketProcessFactory};
use crate::handle::{ProcessEvent, ProcessRef};
use crate::interceptor::MethodInterceptor;
use crate::proxy::EventProxy;
use crate::registry::Registry;
use crate::transport::SocketDaemonApi;

/// Default capacity of the connection's event channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// One coherent view of the daemon: process calls return managed handles
/// and daemon events arrive with their subjects resolved.
///
/// The connection owns its registry. Constructing a connection spawns the
/// event proxy on the current Tokio runtime; it stops when the connection
/// is closed or dropped, or when the daemon's event stream ends. Once it
/// stops, subscribers see their stream end and the connection reports
/// itself closed.
///
/// # Example
///
/// ```rust,ignore
/// use boss_client::{ConnectionConfig, DaemonConnection};
///
/// let connection = DaemonConnection::connect(&ConnectionConfig::default()).await?;
/// for process in connection.list_processes().await? {
///     println!("{}", process.id());
/// }
/// ```
pub struct DaemonConnection {
    api: Arc<dyn DaemonApi>,
    interceptor: MethodInterceptor,
    registry: Arc<Registry>,
    /// Cleared when the proxy stops, so no sender outlives the event stream.
    events: Arc<RwLock<Option<broadcast::Sender<ProcessEvent>>>>,
    cancel_token: CancellationToken,
    closed: AtomicBool,
}

impl DaemonConnection {
    pub fn new(api: Arc<dyn DaemonApi>, factory: Arc<dyn ProcessFactory>) -> Self {
        Self::with_event_buffer(api, factory, DEFAULT_EVENT_BUFFER)
    }

    pub fn with_event_buffer(
        api: Arc<dyn DaemonApi>,
        factory: Arc<dyn ProcessFactory>,
        event_buffer: usize,
    ) -> Self {
        let registry = Arc::new(Registry::new(factory));
        let (sender, _) = broadcast::channel(event_buffer.max(1));
        let events = Arc::new(RwLock::new(Some(sender.clone())));
        let cancel_token = CancellationToken::new();

        // Subscribe before any call can be made so no event is missed.
        let raw_events = api.subscribe();
        let proxy = EventProxy::new(Arc::clone(&registry), sender);
        let proxy_events = Arc::clone(&events);
        let proxy_token = cancel_token.clone();
        tokio::spawn(async move {
            proxy.run(raw_events, proxy_token.clone()).await;
            proxy_events
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            proxy_token.cancel();
        });

        let interceptor = MethodInterceptor::with_process_methods(Arc::clone(&api), Arc::clone(&registry));

        Self {
            api,
            interceptor,
            registry,
            events,
            cancel_token,
            closed: AtomicBool::new(false),
        }
    }

    /// Connects to the daemon over its Unix socket.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::Api` if the daemon cannot be reached or
    /// refuses the handshake.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let api = SocketDaemonApi::connect(config).await?;
        let factory = SocketProcessFactory::shared(config.connect_timeout);
        Ok(Self::with_event_buffer(
            Arc::new(api),
            factory,
            config.event_buffer,
        ))
    }

    // ========================================================================
    // Process Calls
    // ========================================================================

    /// Lists every supervised process.
    ///
    /// The reply is authoritative: handles for processes no longer listed
    /// are dropped from the registry.
    pub async fn list_processes(&self) -> Result<Vec<ProcessRef>> {
        self.interceptor
            .call(Request::ListProcesses)
            .await?
            .into_processes(Method::ListProcesses)
    }

    /// Starts `script` and returns the handle of the new process.
    pub async fn start_process(
        &self,
        script: impl Into<PathBuf>,
        options: StartOptions,
    ) -> Result<ProcessRef> {
        let request = Request::StartProcess {
            script: script.into(),
            options,
        };
        self.interceptor
            .call(request)
            .await?
            .into_process(Method::StartProcess)
    }

    pub async fn find_process_info_by_id(&self, id: &ProcessId) -> Result<ProcessRef> {
        let request = Request::FindProcessInfoById { id: id.clone() };
        self.interceptor
            .call(request)
            .await?
            .into_process(Method::FindProcessInfoById)
    }

    pub async fn find_process_info_by_pid(&self, pid: u32) -> Result<ProcessRef> {
        self.interceptor
            .call(Request::FindProcessInfoByPid { pid })
            .await?
            .into_process(Method::FindProcessInfoByPid)
    }

    pub async fn find_process_info_by_name(&self, name: &str) -> Result<ProcessRef> {
        let request = Request::FindProcessInfoByName {
            name: name.to_string(),
        };
        self.interceptor
            .call(request)
            .await?
            .into_process(Method::FindProcessInfoByName)
    }

    /// Asks the daemon to stop every process and exit.
    pub async fn kill(&self) -> Result<()> {
        match self.interceptor.call(Request::Kill).await?.into_reply(Method::Kill)? {
            Reply::Empty => Ok(()),
            other => Err(ConnectionError::UnexpectedReply {
                method: Method::Kill,
                reply: other.kind().to_string(),
            }),
        }
    }

    // ========================================================================
    // Events and State
    // ========================================================================

    /// Subscribes to translated daemon events.
    ///
    /// The stream ends with `RecvError::Closed` when the daemon's event
    /// stream ends or the connection is closed.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        match events.as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// True once the connection was closed or the daemon's event stream ended.
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Stops event translation and releases the daemon API.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_token.cancel();
        self.api.close().await;
        debug!(processes = self.registry.len(), "Daemon connection closed");
    }
}

impl Drop for DaemonConnection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl std::fmt::Debug for DaemonConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonConnection")
            .field("registry", &self.registry)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Spawns a task that refreshes the process list every `period`.
///
/// Each pass lists processes, which prunes handles the daemon no longer
/// reports. Failures are logged and the next pass retried. The task ends
/// when `cancel_token` fires or the connection is closed.
pub fn spawn_reconcile_task(
    connection: Arc<DaemonConnection>,
    period: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, "Reconcile task started");

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Reconcile task stopping: cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if connection.is_closed() {
                debug!("Reconcile task stopping: connection closed");
                break;
            }

            match connection.list_processes().await {
                Ok(processes) => debug!(count = processes.len(), "Registry reconciled"),
                Err(e) => warn!(error = %e, "Reconcile pass failed"),
            }
        }
    })
}
