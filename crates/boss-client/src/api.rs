//! The daemon API collaborator.

use async_trait::async_trait;
use boss_protocol::{RawEvent, Reply, Request};
use tokio::sync::broadcast;

use crate::error::ApiError;

/// Raw daemon API: a request/response channel plus an event subscription.
///
/// Results carry raw process descriptors; [`crate::DaemonConnection`] turns
/// them into managed handles.
#[async_trait]
pub trait DaemonApi: Send + Sync {
    /// Performs one API call.
    ///
    /// # Errors
    ///
    /// Any `ApiError`; the connection passes it to its caller unchanged.
    async fn request(&self, request: Request) -> Result<Reply, ApiError>;

    /// Subscribes to events pushed by the daemon, in the order received.
    fn subscribe(&self) -> broadcast::Receiver<RawEvent>;

    /// Releases the underlying channel. Later calls may fail.
    async fn close(&self) {}
}
