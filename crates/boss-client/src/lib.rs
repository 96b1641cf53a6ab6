//! boss client - Daemon connection core
//!
//! This crate turns the daemon's raw process descriptors into long-lived,
//! locally owned process handles:
//! - `registry` - The id → handle map, with per-id creation and pruning
//! - `interceptor` - Resolves descriptors in daemon call results
//! - `proxy` - Translates pushed daemon events and applies cluster bookkeeping
//! - `connection` - The `DaemonConnection` façade composing the above
//! - `transport` / `factory` - Unix socket implementations of the collaborators
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      DaemonConnection                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────────┐  calls   ┌───────────────────────────┐ │
//! │  │ MethodInterceptor│─────────▶│        DaemonApi          │ │
//! │  │ (call results)   │◀─────────│ (SocketDaemonApi)         │ │
//! │  └────────┬─────────┘ replies  └─────────────┬─────────────┘ │
//! │           │                                  │ events        │
//! │           │ resolve                          ▼               │
//! │           │                    ┌───────────────────────────┐ │
//! │           │                    │        EventProxy         │ │
//! │           │                    │  (lookup + exit hooks)    │ │
//! │           ▼                    └─────────────┬─────────────┘ │
//! │  ┌──────────────────┐   lookup / remove      │               │
//! │  │     Registry     │◀───────────────────────┘               │
//! │  │ (id → handle)    │────▶ ProcessFactory (new ids only)     │
//! │  └──────────────────┘                                        │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate does not use `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()` or direct indexing. Poisoned
//! locks are recovered, and channel closure is handled as a normal state.

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod handle;
pub mod interceptor;
pub mod proxy;
pub mod registry;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use api::DaemonApi;
pub use config::{ConfigError, ConnectionConfig};
pub use connection::{spawn_reconcile_task, DaemonConnection};
pub use error::{ApiError, ConnectionError, FactoryError, Result};
pub use factory::{ProcessFactory, SocketProcessFactory};
pub use handle::{
    ClusterManager, EventArg, HandleEvent, ManagedProcess, ProcessEvent, ProcessHandle,
    ProcessRef, ProcessState,
};
pub use interceptor::{MethodInterceptor, Resolved, ResultShape};
pub use proxy::{EventHook, EventProxy};
pub use registry::Registry;
pub use transport::SocketDaemonApi;
