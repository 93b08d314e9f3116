use std::future::Future;
use std::sync::Arc;

use fleetrun_proto::transport::{tls_incoming, PeerInfo};
use fleetrun_proto::v1::portal_server::{Portal, PortalServer};
use fleetrun_proto::v1::{
    CommandRequest, CommandResponse, CpuUsageRequest, CpuUsageResponse, FileReadRequest,
    FileReadResponse, ServiceRequest, ServiceResponse, ServiceStatusResponse,
};
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::PortalAgent;

pub struct AgentServer {
    agent: Arc<PortalAgent>,
}

impl AgentServer {
    pub fn new(agent: Arc<PortalAgent>) -> Self {
        Self { agent }
    }
}

fn log_peer<T>(request: &Request<T>, method: &'static str) {
    if let Some(peer) = request.extensions().get::<PeerInfo>() {
        debug!(remote_addr = %peer.remote_addr, method, "Incoming request");
    }
}

#[tonic::async_trait]
impl Portal for AgentServer {
    async fn service_start(
        &self,
        request: Request<ServiceRequest>,
    ) -> Result<Response<ServiceResponse>, Status> {
        log_peer(&request, "ServiceStart");
        let req = request.into_inner();
        let res = self.agent.service_start(&req.name).await?;
        Ok(Response::new(res.into()))
    }

    async fn service_stop(
        &self,
        request: Request<ServiceRequest>,
    ) -> Result<Response<ServiceResponse>, Status> {
        log_peer(&request, "ServiceStop");
        let req = request.into_inner();
        let res = self.agent.service_stop(&req.name).await?;
        Ok(Response::new(res.into()))
    }

    async fn service_restart(
        &self,
        request: Request<ServiceRequest>,
    ) -> Result<Response<ServiceResponse>, Status> {
        log_peer(&request, "ServiceRestart");
        let req = request.into_inner();
        let res = self.agent.service_restart(&req.name).await?;
        Ok(Response::new(res.into()))
    }

    async fn service_status(
        &self,
        request: Request<ServiceRequest>,
    ) -> Result<Response<ServiceStatusResponse>, Status> {
        log_peer(&request, "ServiceStatus");
        let req = request.into_inner();
        let res = self.agent.service_status(&req.name).await?;
        Ok(Response::new(res.into()))
    }

    async fn run_command(
        &self,
        request: Request<CommandRequest>,
    ) -> Result<Response<CommandResponse>, Status> {
        log_peer(&request, "RunCommand");
        let req = request.into_inner();
        let res = self.agent.run_command(&req.name, &req.args).await?;
        Ok(Response::new(res.into()))
    }

    async fn cpu_usage(
        &self,
        request: Request<CpuUsageRequest>,
    ) -> Result<Response<CpuUsageResponse>, Status> {
        log_peer(&request, "CpuUsage");
        let res = self.agent.cpu_usage().await?;
        Ok(Response::new(res.into()))
    }

    async fn file_read(
        &self,
        request: Request<FileReadRequest>,
    ) -> Result<Response<FileReadResponse>, Status> {
        log_peer(&request, "FileRead");
        let req = request.into_inner();
        let res = self.agent.file_read(&req.path).await?;
        Ok(Response::new(res.into()))
    }
}

/// Serve the Portal service on `listener` over TLS until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    tls: Arc<ServerConfig>,
    agent: Arc<PortalAgent>,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), tonic::transport::Error> {
    Server::builder()
        .add_service(
            PortalServer::new(AgentServer::new(agent))
                .max_decoding_message_size(usize::MAX)
                .max_encoding_message_size(usize::MAX),
        )
        .serve_with_incoming_shutdown(tls_incoming(listener, tls), shutdown)
        .await
}
