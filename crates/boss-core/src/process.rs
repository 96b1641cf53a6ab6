//! Process identity and the raw descriptors reported by the daemon.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Stable identity of a supervised process or cluster manager.
///
/// Assigned by the daemon when the process is started and never reused
/// for a different process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProcessId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProcessId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Process Kind
// ============================================================================

/// Whether a descriptor names a standalone process or a cluster manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    #[default]
    Process,
    /// Manager of a group of worker processes.
    Cluster,
}

impl ProcessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Cluster => "cluster",
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(Self::Process),
            "cluster" => Ok(Self::Cluster),
            other => Err(DomainError::InvalidFieldValue {
                field: "kind".to_string(),
                value: other.to_string(),
                expected: "process or cluster".to_string(),
            }),
        }
    }
}

// ============================================================================
// Process Descriptor
// ============================================================================

/// Raw snapshot of a process as reported by the daemon.
///
/// Descriptors are transient: they arrive with call results and events,
/// are used to locate or refresh a managed handle, and are then dropped.
/// Nothing downstream mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    /// Identity. Absent on malformed reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProcessId>,

    /// Address of the process's own control socket.
    #[serde(default)]
    pub socket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Id of the cluster manager this process works for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<ProcessId>,

    #[serde(default)]
    pub kind: ProcessKind,
}

impl ProcessDescriptor {
    pub fn new(id: impl Into<ProcessId>, socket: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            socket: socket.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_manager(mut self, manager: impl Into<ProcessId>) -> Self {
        self.manager = Some(manager.into());
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ProcessKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the identity, treating a blank id as missing.
    pub fn id(&self) -> Option<&ProcessId> {
        self.id.as_ref().filter(|id| !id.is_empty())
    }

    /// Returns the manager id, treating a blank id as missing.
    pub fn manager(&self) -> Option<&ProcessId> {
        self.manager.as_ref().filter(|id| !id.is_empty())
    }

    /// Interprets an opaque event argument as a descriptor.
    ///
    /// Returns `None` unless the value is an object carrying a non-blank id.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let descriptor: Self = serde_json::from_value(value.clone()).ok()?;
        descriptor.id()?;
        Some(descriptor)
    }

    /// Label used in listings: the name if known, otherwise the short id.
    pub fn label(&self) -> &str {
        match (&self.name, self.id()) {
            (Some(name), _) if !name.is_empty() => name,
            (_, Some(id)) => id.short(),
            _ => "?",
        }
    }
}

// ============================================================================
// Start Options
// ============================================================================

/// Options accepted by the daemon when starting a script.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StartOptions {
    /// User to run the process as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Group to run the process as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Display name; defaults to the script's file name on the daemon side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Number of cluster workers. `None` starts a standalone process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<u32>,

    /// Arguments passed to the script
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub argv: Vec<String>,
}

impl StartOptions {
    /// Checks the options against the script they will start.
    ///
    /// # Errors
    ///
    /// - `DomainError::InvalidFieldValue` if the script path is not absolute
    ///   or `instances` is zero
    /// - `DomainError::MissingField` if a user or group is given but blank
    pub fn validate(&self, script: &Path) -> DomainResult<()> {
        if !script.is_absolute() {
            return Err(DomainError::InvalidFieldValue {
                field: "script".to_string(),
                value: script.display().to_string(),
                expected: "an absolute path".to_string(),
            });
        }

        if self.instances == Some(0) {
            return Err(DomainError::InvalidFieldValue {
                field: "instances".to_string(),
                value: "0".to_string(),
                expected: "at least 1".to_string(),
            });
        }

        if self.user.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(DomainError::missing("user"));
        }
        if self.group.as_deref().is_some_and(|g| g.trim().is_empty()) {
            return Err(DomainError::missing("group"));
        }

        Ok(())
    }
}
