//! boss core - Shared types for process supervision
//!
//! This crate provides the domain types shared between the wire protocol
//! (`boss-protocol`) and the daemon connection (`boss-client`).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod process;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use process::{ProcessDescriptor, ProcessId, ProcessKind, StartOptions};
