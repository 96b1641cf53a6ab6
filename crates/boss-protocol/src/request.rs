//! Daemon API requests and their replies.

use std::fmt;
use std::path::PathBuf;

use boss_core::{ProcessDescriptor, ProcessId, StartOptions};
use serde::{Deserialize, Serialize};

/// Name of a daemon API method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    ListProcesses,
    StartProcess,
    FindProcessInfoById,
    FindProcessInfoByPid,
    FindProcessInfoByName,
    Kill,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListProcesses => "list_processes",
            Self::StartProcess => "start_process",
            Self::FindProcessInfoById => "find_process_info_by_id",
            Self::FindProcessInfoByPid => "find_process_info_by_pid",
            Self::FindProcessInfoByName => "find_process_info_by_name",
            Self::Kill => "kill",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call on the daemon API, with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    ListProcesses,
    StartProcess {
        script: PathBuf,
        #[serde(default)]
        options: StartOptions,
    },
    FindProcessInfoById {
        id: ProcessId,
    },
    FindProcessInfoByPid {
        pid: u32,
    },
    FindProcessInfoByName {
        name: String,
    },
    /// Stop every process and shut the daemon down.
    Kill,
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Self::ListProcesses => Method::ListProcesses,
            Self::StartProcess { .. } => Method::StartProcess,
            Self::FindProcessInfoById { .. } => Method::FindProcessInfoById,
            Self::FindProcessInfoByPid { .. } => Method::FindProcessInfoByPid,
            Self::FindProcessInfoByName { .. } => Method::FindProcessInfoByName,
            Self::Kill => Method::Kill,
        }
    }
}

/// Successful result of a daemon API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reply {
    /// A single descriptor. `None` when the daemon found nothing.
    Process(Option<ProcessDescriptor>),
    /// An ordered sequence of descriptors.
    Processes(Vec<ProcessDescriptor>),
    /// No payload.
    Empty,
}

impl Reply {
    /// Short name of the reply shape, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Process(_) => "process",
            Self::Processes(_) => "processes",
            Self::Empty => "empty",
        }
    }
}
