//! Operator side of fleetrun: discover instances, select them with a target
//! expression and fan an operation out to their agents.

pub mod cli;
pub mod features;
pub mod report;
pub mod shared;

pub use features::dispatch::repo::{AgentConnector, TlsAgentConnector};
pub use features::dispatch::service::{
    DispatchError, DispatchOptions, DispatchService, TargetOutcome,
};
pub use features::target_selection::repo::InstanceSource;
pub use features::target_selection::service::{SelectionError, TargetSelectionService};
pub use report::FleetReport;
pub use shared::error::{ConfigError, ControlPlaneError, ControlPlaneResult};
