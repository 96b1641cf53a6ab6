//! boss protocol - Wire protocol for daemon communication
//!
//! This crate provides message types for communication between a daemon
//! connection and the boss daemon, and between a connection and the control
//! socket of an individual supervised process.
//!
//! Messages are newline-delimited JSON (see [`codec`]).

pub mod codec;
pub mod event;
pub mod message;
pub mod request;
pub mod version;

pub use codec::{decode_line, encode_line, FrameError};
pub use event::{RawEvent, WORKER_EXIT};
pub use message::{ClientMessage, DaemonMessage, MessageType, Outcome, ProcessReply, ProcessRequest};
pub use request::{Method, Reply, Request};
pub use version::{ProtocolVersion, VersionError};
