//! Unix socket transport to the boss daemon.
//!
//! One connection carries both directions: calls go out tagged with a
//! sequence number and their responses are matched back by a background
//! reader task, which also pushes daemon events into a broadcast channel.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use boss_protocol::{
    decode_line, encode_line, ClientMessage, DaemonMessage, Outcome, ProtocolVersion, RawEvent,
    Reply, Request,
};
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::api::DaemonApi;
use crate::config::ConnectionConfig;
use crate::error::ApiError;

type ReplySender = oneshot::Sender<Result<Reply, ApiError>>;

// ============================================================================
// Shared State
// ============================================================================

/// State shared between callers and the reader task.
struct Shared {
    pending: DashMap<u64, ReplySender>,
    closed: AtomicBool,
    /// Dropped on close so subscribers see the stream end.
    events: RwLock<Option<broadcast::Sender<RawEvent>>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fails every pending call and ends the event stream.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let failed = self.pending.len();
        // Dropping a sender wakes its caller with `ChannelClosed`.
        self.pending.clear();
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(failed, "Daemon connection closed");
    }

    fn publish(&self, event: RawEvent) {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = events.as_ref() {
            // No subscribers is fine.
            let _ = sender.send(event);
        }
    }

    /// Handles one message from the daemon.
    fn route(&self, line: &str) -> Result<(), ApiError> {
        match decode_line::<DaemonMessage>(line)? {
            DaemonMessage::Response { seq, outcome } => {
                let Some((_, reply_tx)) = self.pending.remove(&seq) else {
                    debug!(seq, "Response for abandoned request");
                    return Ok(());
                };
                let result = match outcome {
                    Outcome::Ok { reply } => Ok(reply),
                    Outcome::Error { message, code } => Err(ApiError::Remote { message, code }),
                };
                let _ = reply_tx.send(result);
            }
            DaemonMessage::Event { event } => {
                trace!(event = %event.name, process = %event.process.label(), "Received event");
                self.publish(event);
            }
            DaemonMessage::Error { message, code } => {
                warn!(
                    error_message = %message,
                    error_code = ?code,
                    "Received error from daemon"
                );
            }
            DaemonMessage::Connected { .. } | DaemonMessage::Rejected { .. } => {
                warn!("Received unexpected handshake message after connection");
            }
        }
        Ok(())
    }
}

/// Removes a pending entry when its caller finishes or gives up.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, ReplySender>,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.seq);
    }
}

// ============================================================================
// Socket Daemon API
// ============================================================================

/// [`DaemonApi`] over the daemon's Unix socket.
pub struct SocketDaemonApi {
    client_id: String,
    writer: Mutex<OwnedWriteHalf>,
    shared: Arc<Shared>,
    next_seq: AtomicU64,
    request_timeout: Duration,
    cancel_token: CancellationToken,
}

impl SocketDaemonApi {
    /// Connects to the daemon at `config.socket_path` and performs the handshake.
    ///
    /// # Errors
    ///
    /// - `ApiError::Io` if the socket cannot be reached
    /// - `ApiError::Timeout` if connecting or the handshake exceeds `connect_timeout`
    /// - `ApiError::Rejected` / `ApiError::VersionMismatch` if the daemon refuses
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ApiError> {
        let connect_timeout = || ApiError::Timeout {
            method: "connect".to_string(),
        };

        debug!(socket_path = %config.socket_path.display(), "Connecting to daemon");
        let stream = timeout(config.connect_timeout, UnixStream::connect(&config.socket_path))
            .await
            .map_err(|_| connect_timeout())?
            .map_err(|e| ApiError::io(&e))?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let client_id = timeout(config.connect_timeout, handshake(&mut reader, &mut writer))
            .await
            .map_err(|_| connect_timeout())??;

        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
            events: RwLock::new(Some(events)),
        });
        let cancel_token = CancellationToken::new();

        tokio::spawn(read_loop(reader, Arc::clone(&shared), cancel_token.clone()));

        info!(
            client_id = %client_id,
            socket_path = %config.socket_path.display(),
            "Connected to daemon"
        );

        Ok(Self {
            client_id,
            writer: Mutex::new(writer),
            shared,
            next_seq: AtomicU64::new(1),
            request_timeout: config.request_timeout,
            cancel_token,
        })
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), ApiError> {
        let line = encode_line(message)?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ApiError::io(&e))?;
        writer.flush().await.map_err(|e| ApiError::io(&e))?;
        Ok(())
    }
}

#[async_trait]
impl DaemonApi for SocketDaemonApi {
    async fn request(&self, request: Request) -> Result<Reply, ApiError> {
        if self.shared.is_closed() {
            return Err(ApiError::ChannelClosed);
        }

        let method = request.method();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending.insert(seq, reply_tx);
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            seq,
        };

        // The reader may have closed between the check above and the insert.
        if self.shared.is_closed() {
            return Err(ApiError::ChannelClosed);
        }

        self.send(&ClientMessage::request(seq, request)).await?;
        debug!(seq, %method, "Sent request");

        match timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ApiError::ChannelClosed),
            Err(_) => {
                warn!(seq, %method, timeout_ms = self.request_timeout.as_millis() as u64, "Request timed out");
                Err(ApiError::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Says goodbye to the daemon and stops the reader task.
    async fn close(&self) {
        if !self.shared.is_closed() {
            if let Err(e) = self.send(&ClientMessage::disconnect()).await {
                debug!(error = %e, "Failed to send disconnect");
            }
        }
        self.cancel_token.cancel();
        self.shared.close();
    }

    fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        let events = self
            .shared
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match events.as_ref() {
            Some(sender) => sender.subscribe(),
            // Already closed: hand out a receiver whose stream has ended.
            None => broadcast::channel(1).1,
        }
    }
}

impl Drop for SocketDaemonApi {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl std::fmt::Debug for SocketDaemonApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketDaemonApi")
            .field("client_id", &self.client_id)
            .field("pending", &self.shared.pending.len())
            .field("closed", &self.shared.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection Tasks
// ============================================================================

/// Sends `connect` and waits for the daemon's verdict. Returns the client id.
async fn handshake(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
) -> Result<String, ApiError> {
    let line = encode_line(&ClientMessage::connect(None))?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ApiError::io(&e))?;
    writer.flush().await.map_err(|e| ApiError::io(&e))?;

    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| ApiError::io(&e))?;
    if read == 0 {
        return Err(ApiError::ChannelClosed);
    }

    match decode_line::<DaemonMessage>(&line)? {
        DaemonMessage::Connected {
            protocol_version,
            client_id,
        } => {
            ProtocolVersion::CURRENT.ensure_compatible(&protocol_version)?;
            debug!(client_id, protocol_version = %protocol_version, "Handshake complete");
            Ok(client_id)
        }
        DaemonMessage::Rejected {
            reason,
            protocol_version,
        } => {
            warn!(reason = %reason, protocol_version = %protocol_version, "Daemon rejected connection");
            Err(ApiError::Rejected(reason))
        }
        other => Err(ApiError::Protocol(format!(
            "unexpected response to connect: {other:?}"
        ))),
    }
}

/// Reads daemon messages until EOF, a read error, or cancellation.
async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
) {
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Reader task cancelled");
                break;
            }
            read = reader.read_line(&mut line) => match read {
                Ok(0) => {
                    info!("Daemon closed connection");
                    break;
                }
                Ok(_) => {
                    if let Err(e) = shared.route(&line) {
                        // One bad line does not end the connection.
                        warn!(error = %e, line = %line.trim(), "Failed to handle message");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read from daemon");
                    break;
                }
            },
        }
    }

    shared.close();
}
