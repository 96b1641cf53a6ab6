//! Protocol version negotiated during the handshake.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// `major.minor` version stamped on every handshake message.
///
/// A connection and daemon interoperate when their majors agree. Minor bumps
/// only add optional fields or message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 2, minor: 1 };

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Reads `"<major>.<minor>"`, e.g. `"2.1"`.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let malformed = || VersionError::InvalidFormat(s.to_string());

        let (major, minor) = s.split_once('.').ok_or_else(malformed)?;
        Ok(Self {
            major: major.parse().map_err(|_| malformed())?,
            minor: minor.parse().map_err(|_| malformed())?,
        })
    }

    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }

    /// Like [`is_compatible_with`](Self::is_compatible_with), but names
    /// both sides in the error.
    pub fn ensure_compatible(&self, peer: &ProtocolVersion) -> Result<(), VersionError> {
        if !self.is_compatible_with(peer) {
            return Err(VersionError::Incompatible {
                got: peer.to_string(),
                expected: self.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Malformed protocol version '{0}'")]
    InvalidFormat(String),

    #[error("Daemon speaks protocol {got}, this client needs {expected}.x")]
    Incompatible { got: String, expected: String },
}
