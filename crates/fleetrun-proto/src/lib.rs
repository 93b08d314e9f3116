pub mod conversion;
pub mod protocol;
pub mod tls;
pub mod transport;

pub use protocol::*;

pub mod v1 {
    tonic::include_proto!("fleetrun.v1");
}

/// Port the agent listens on unless configured otherwise.
pub const DEFAULT_AGENT_PORT: u16 = 1337;
