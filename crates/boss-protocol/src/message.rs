//! Framed messages exchanged with the daemon and with process control sockets.
//!
//! A connection opens with `connect` / `connected`. After that, every call
//! carries a `seq` that the daemon echoes in its `response`, while `event`
//! messages may arrive at any point in between.

use crate::event::RawEvent;
use crate::request::{Reply, Request};
use crate::version::ProtocolVersion;
use boss_core::ProcessDescriptor;
use serde::{Deserialize, Serialize};

// ============================================================================
// Connection → Daemon
// ============================================================================

/// Body of a [`ClientMessage`], discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Opens the session
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// One API call, answered by the `Response` with the same `seq`
    Call { seq: u64, request: Request },

    /// Ends the session; the daemon closes the socket
    Disconnect,
}

/// Everything a connection writes to the daemon socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Stamps `message` with [`ProtocolVersion::CURRENT`].
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn request(seq: u64, request: Request) -> Self {
        Self::new(MessageType::Call { seq, request })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

// ============================================================================
// Daemon → Connection
// ============================================================================

/// How a call ended, keyed by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok {
        reply: Reply,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

/// Everything the daemon writes to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Handshake accepted; `client_id` names this session in daemon logs
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
    },

    /// Handshake refused. The session ends after this message.
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    Response {
        seq: u64,
        outcome: Outcome,
    },

    Event {
        event: RawEvent,
    },

    /// A problem with the session itself, not with any one call
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn reply(seq: u64, reply: Reply) -> Self {
        Self::Response {
            seq,
            outcome: Outcome::Ok { reply },
        }
    }

    pub fn failure(seq: u64, message: &str, code: Option<&str>) -> Self {
        Self::Response {
            seq,
            outcome: Outcome::Error {
                message: message.to_string(),
                code: code.map(str::to_string),
            },
        }
    }

    pub fn event(event: RawEvent) -> Self {
        Self::Event { event }
    }
}

// ============================================================================
// Process Control Socket
// ============================================================================

/// What a connection may ask a supervised process directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessRequest {
    Describe,
}

/// A supervised process's answer on its control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessReply {
    ProcessInfo { process: ProcessDescriptor },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use boss_core::ProcessId;

    #[test]
    fn test_client_message_is_flat() {
        let msg = ClientMessage::disconnect();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"disconnect\""));
        assert!(json.contains("\"protocol_version\""));
        assert!(!json.contains("\"message\""));
    }

    #[test]
    fn test_call_message_roundtrip() {
        let original = ClientMessage::request(
            3,
            Request::FindProcessInfoById {
                id: ProcessId::new("foo"),
            },
        );
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();

        match parsed.message {
            MessageType::Call { seq, request } => {
                assert_eq!(seq, 3);
                assert_eq!(
                    request,
                    Request::FindProcessInfoById {
                        id: ProcessId::new("foo")
                    }
                );
            }
            _ => panic!("Expected Call message"),
        }
    }

    #[test]
    fn test_connected_carries_client_id() {
        let msg = DaemonMessage::connected("conn-7f3a".to_string());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"client_id\":\"conn-7f3a\""));
    }

    #[test]
    fn test_failure_response() {
        let msg = DaemonMessage::failure(9, "no such script", Some("ENOENT"));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"status\":\"error\""));

        let parsed: DaemonMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_process_reply_parses() {
        let json = r#"{"type":"process_info","process":{"id":"w1","socket":"/tmp/w1.sock","pid":77}}"#;
        let reply: ProcessReply = serde_json::from_str(json).unwrap();
        match reply {
            ProcessReply::ProcessInfo { process } => {
                assert_eq!(process.id(), Some(&ProcessId::new("w1")));
                assert_eq!(process.pid, Some(77));
            }
            ProcessReply::Error { .. } => panic!("Expected ProcessInfo reply"),
        }
    }
}
