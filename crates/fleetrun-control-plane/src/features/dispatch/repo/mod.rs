use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetrun_proto::transport::connect_tls;
use fleetrun_proto::v1::portal_client::PortalClient;
use fleetrun_proto::v1::{CommandRequest, CpuUsageRequest, FileReadRequest, ServiceRequest};
use fleetrun_proto::{Operation, OperationResponse};
use rustls::ClientConfig;
use tonic::transport::Channel;
use tonic::Status;

use crate::features::dispatch::service::DispatchError;
use crate::shared::error::error_chain;

/// Performs one remote operation against one agent address.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn call(
        &self,
        address: &str,
        operation: &Operation,
    ) -> Result<OperationResponse, DispatchError>;
}

/// Dials agents over mutual TLS. The client config is shared read-only
/// across every concurrent call.
pub struct TlsAgentConnector {
    tls: Arc<ClientConfig>,
    port: u16,
    server_name: Option<String>,
    connect_timeout: Duration,
}

impl TlsAgentConnector {
    pub fn new(
        tls: Arc<ClientConfig>,
        port: u16,
        server_name: Option<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            tls,
            port,
            server_name,
            connect_timeout,
        }
    }
}

#[async_trait]
impl AgentConnector for TlsAgentConnector {
    async fn call(
        &self,
        address: &str,
        operation: &Operation,
    ) -> Result<OperationResponse, DispatchError> {
        let channel = connect_tls(
            address,
            self.port,
            self.tls.clone(),
            self.server_name.as_deref(),
            self.connect_timeout,
        )
        .await
        .map_err(|e| DispatchError::Connect(error_chain(&e)))?;

        // File contents are returned whole; lift tonic's 4 MiB default.
        let mut client = PortalClient::new(channel).max_decoding_message_size(usize::MAX);
        invoke(&mut client, operation)
            .await
            .map_err(DispatchError::from)
    }
}

/// Issue the RPC matching `operation` on an established client.
pub async fn invoke(
    client: &mut PortalClient<Channel>,
    operation: &Operation,
) -> Result<OperationResponse, Status> {
    let response = match operation {
        Operation::ServiceStart { name } => OperationResponse::Service(
            client
                .service_start(ServiceRequest { name: name.clone() })
                .await?
                .into_inner()
                .into(),
        ),
        Operation::ServiceStop { name } => OperationResponse::Service(
            client
                .service_stop(ServiceRequest { name: name.clone() })
                .await?
                .into_inner()
                .into(),
        ),
        Operation::ServiceRestart { name } => OperationResponse::Service(
            client
                .service_restart(ServiceRequest { name: name.clone() })
                .await?
                .into_inner()
                .into(),
        ),
        Operation::ServiceStatus { name } => OperationResponse::ServiceStatus(
            client
                .service_status(ServiceRequest { name: name.clone() })
                .await?
                .into_inner()
                .into(),
        ),
        Operation::RunCommand { name, args } => OperationResponse::Command(
            client
                .run_command(CommandRequest {
                    name: name.clone(),
                    args: args.clone(),
                })
                .await?
                .into_inner()
                .into(),
        ),
        Operation::CpuUsage => OperationResponse::CpuUsage(
            client
                .cpu_usage(CpuUsageRequest {})
                .await?
                .into_inner()
                .into(),
        ),
        Operation::FileRead { path } => OperationResponse::FileRead(
            client
                .file_read(FileReadRequest { path: path.clone() })
                .await?
                .into_inner()
                .into(),
        ),
    };
    Ok(response)
}
