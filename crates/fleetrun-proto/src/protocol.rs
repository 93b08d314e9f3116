// Domain-level view of the Portal protocol, independent of the generated
// prost types. The dispatcher builds `Operation`s and reports
// `OperationResponse`s; conversions to the wire types live in `conversion`.

use fleetrun_core::State;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One remote operation the dispatcher can invoke on an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    ServiceStart { name: String },
    ServiceStop { name: String },
    ServiceRestart { name: String },
    ServiceStatus { name: String },
    RunCommand { name: String, args: Vec<String> },
    CpuUsage,
    FileRead { path: String },
}

impl Operation {
    /// RPC method name, as listed in the service definition.
    pub fn method(&self) -> &'static str {
        match self {
            Operation::ServiceStart { .. } => "ServiceStart",
            Operation::ServiceStop { .. } => "ServiceStop",
            Operation::ServiceRestart { .. } => "ServiceRestart",
            Operation::ServiceStatus { .. } => "ServiceStatus",
            Operation::RunCommand { .. } => "RunCommand",
            Operation::CpuUsage => "CpuUsage",
            Operation::FileRead { .. } => "FileRead",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::ServiceStart { name }
            | Operation::ServiceStop { name }
            | Operation::ServiceRestart { name }
            | Operation::ServiceStatus { name } => write!(f, "{} {}", self.method(), name),
            Operation::RunCommand { name, args } if args.is_empty() => {
                write!(f, "{} {}", self.method(), name)
            }
            Operation::RunCommand { name, args } => {
                write!(f, "{} {} {}", self.method(), name, args.join(" "))
            }
            Operation::CpuUsage => f.write_str(self.method()),
            Operation::FileRead { path } => write!(f, "{} {}", self.method(), path),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceResponse {
    pub state: State,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceStatusResponse {
    pub state: State,
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse {
    pub state: State,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CpuUsageResponse {
    pub load_avg1: i32,
    pub load_avg5: i32,
    pub load_avg15: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileReadResponse {
    pub state: State,
    pub content: String,
}

/// Successful reply of one remote operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationResponse {
    Service(ServiceResponse),
    ServiceStatus(ServiceStatusResponse),
    Command(CommandResponse),
    CpuUsage(CpuUsageResponse),
    FileRead(FileReadResponse),
}

impl OperationResponse {
    pub fn state(&self) -> State {
        match self {
            OperationResponse::Service(res) => res.state,
            OperationResponse::ServiceStatus(res) => res.state,
            OperationResponse::Command(res) => res.state,
            OperationResponse::CpuUsage(_) => State::Unknown,
            OperationResponse::FileRead(res) => res.state,
        }
    }

    /// Human-readable one-line (or multi-line for file content) summary.
    pub fn summary(&self) -> String {
        match self {
            OperationResponse::Service(res) => format!("[{}] {}", res.state, res.message),
            OperationResponse::ServiceStatus(res) => format!(
                "load={} active={} sub={}",
                res.load_state, res.active_state, res.sub_state
            ),
            OperationResponse::Command(res) => res.message.clone(),
            OperationResponse::CpuUsage(res) => format!(
                "load average: {} {} {}",
                res.load_avg1, res.load_avg5, res.load_avg15
            ),
            OperationResponse::FileRead(res) => res.content.clone(),
        }
    }
}
