//! Construction of managed process handles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boss_core::ProcessDescriptor;
use boss_protocol::{decode_line, encode_line, ProcessReply, ProcessRequest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::FactoryError;
use crate::handle::{ProcessHandle, ProcessRef};

/// Builds a managed process handle from a process's control socket address.
///
/// Creation may take arbitrarily long; the registry never holds a lock that
/// blocks unrelated lookups while a factory call is pending.
#[async_trait]
pub trait ProcessFactory: Send + Sync {
    async fn create(&self, address: &str) -> Result<ProcessRef, FactoryError>;
}

/// Factory that asks the process to describe itself over its control socket.
#[derive(Debug, Clone)]
pub struct SocketProcessFactory {
    connect_timeout: Duration,
}

impl SocketProcessFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn shared(connect_timeout: Duration) -> Arc<dyn ProcessFactory> {
        Arc::new(Self::new(connect_timeout))
    }
}

#[async_trait]
impl ProcessFactory for SocketProcessFactory {
    async fn create(&self, address: &str) -> Result<ProcessRef, FactoryError> {
        let descriptor = timeout(self.connect_timeout, describe(address))
            .await
            .map_err(|_| FactoryError::Timeout {
                address: address.to_string(),
            })??;

        let handle =
            ProcessHandle::from_descriptor(&descriptor).map_err(|e| FactoryError::Handshake {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        debug!(process = %descriptor.label(), address, "Process handle constructed");
        Ok(Arc::new(handle))
    }
}

/// Performs the describe handshake on a process control socket.
async fn describe(address: &str) -> Result<ProcessDescriptor, FactoryError> {
    let handshake = |reason: String| FactoryError::Handshake {
        address: address.to_string(),
        reason,
    };

    let stream = UnixStream::connect(address)
        .await
        .map_err(|e| FactoryError::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    let (reader, mut writer) = stream.into_split();

    let request = encode_line(&ProcessRequest::Describe).map_err(|e| handshake(e.to_string()))?;
    writer
        .write_all(request.as_bytes())
        .await
        .map_err(|e| handshake(e.to_string()))?;
    writer.flush().await.map_err(|e| handshake(e.to_string()))?;

    let mut line = String::new();
    let read = BufReader::new(reader)
        .read_line(&mut line)
        .await
        .map_err(|e| handshake(e.to_string()))?;
    if read == 0 {
        return Err(handshake("connection closed before reply".to_string()));
    }

    match decode_line::<ProcessReply>(&line).map_err(|e| handshake(e.to_string()))? {
        ProcessReply::ProcessInfo { process } => Ok(process),
        ProcessReply::Error { message } => Err(handshake(message)),
    }
}
