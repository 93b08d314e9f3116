pub mod features;
pub mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use fleetrun_proto::tls::TrustMode;
use fleetrun_proto::{
    CommandResponse, CpuUsageResponse, FileReadResponse, ServiceResponse, ServiceStatusResponse,
};
use thiserror::Error;
use tonic::Status;
use tracing::{info, warn};

use features::command_execution::CommandService;
use features::file_access::FileAccessService;
use features::host_metrics::{HostMetricsService, LOADAVG_PATH};
use features::service_control::repo::{ServiceManager, SystemctlServiceManager};
use features::service_control::service::ServiceControlService;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{0}")]
    FailedPrecondition(String),
    #[error("command exited with status {code}: {output}")]
    CommandFailed { code: i32, output: String },
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<HandlerError> for Status {
    fn from(error: HandlerError) -> Self {
        let message = error.to_string();
        match error {
            HandlerError::InvalidArgument(_) => Status::invalid_argument(message),
            HandlerError::NotFound(_) => Status::not_found(message),
            HandlerError::PermissionDenied(_) => Status::permission_denied(message),
            HandlerError::FailedPrecondition(_) => Status::failed_precondition(message),
            HandlerError::CommandFailed { .. } => Status::aborted(message),
            HandlerError::Unavailable(_) => Status::unavailable(message),
            HandlerError::Internal(_) => Status::internal(message),
        }
    }
}

/// Listener and trust settings resolved from the command line.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub listen: SocketAddr,
    pub trust: TrustMode,
}

/// The operations an agent performs on its host. Holds no mutable state;
/// every call is independent.
pub struct PortalAgent {
    services: ServiceControlService,
    commands: CommandService,
    metrics: HostMetricsService,
    files: FileAccessService,
}

impl PortalAgent {
    pub fn new(manager: Arc<dyn ServiceManager>, loadavg_path: impl Into<PathBuf>) -> Self {
        Self {
            services: ServiceControlService::new(manager),
            commands: CommandService::new(),
            metrics: HostMetricsService::new(loadavg_path),
            files: FileAccessService::new(),
        }
    }

    /// An agent acting on the local host through systemd and procfs.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemctlServiceManager::new()), LOADAVG_PATH)
    }

    pub async fn service_start(&self, name: &str) -> Result<ServiceResponse, HandlerError> {
        let result = self.services.start(name).await;
        log_service("ServiceStart", name, &result);
        result
    }

    pub async fn service_stop(&self, name: &str) -> Result<ServiceResponse, HandlerError> {
        let result = self.services.stop(name).await;
        log_service("ServiceStop", name, &result);
        result
    }

    pub async fn service_restart(&self, name: &str) -> Result<ServiceResponse, HandlerError> {
        let result = self.services.restart(name).await;
        log_service("ServiceRestart", name, &result);
        result
    }

    pub async fn service_status(&self, name: &str) -> Result<ServiceStatusResponse, HandlerError> {
        let result = self.services.status(name).await;
        match &result {
            Ok(res) => info!(
                operation = "ServiceStatus",
                name,
                active_state = %res.active_state,
                "Handled request"
            ),
            Err(error) => warn!(operation = "ServiceStatus", name, error = %error, "Request failed"),
        }
        result
    }

    pub async fn run_command(
        &self,
        name: &str,
        args: &[String],
    ) -> Result<CommandResponse, HandlerError> {
        let result = self.commands.run(name, args).await;
        match &result {
            Ok(_) => info!(operation = "RunCommand", name, ?args, "Handled request"),
            Err(error) => {
                warn!(operation = "RunCommand", name, ?args, error = %error, "Request failed")
            }
        }
        result
    }

    pub async fn cpu_usage(&self) -> Result<CpuUsageResponse, HandlerError> {
        let result = self.metrics.cpu_usage().await;
        if let Err(error) = &result {
            warn!(operation = "CpuUsage", error = %error, "Request failed");
        }
        result
    }

    pub async fn file_read(&self, path: &str) -> Result<FileReadResponse, HandlerError> {
        let result = self.files.read(path).await;
        match &result {
            Ok(res) => info!(operation = "FileRead", path, bytes = res.content.len(), "Handled request"),
            Err(error) => warn!(operation = "FileRead", path, error = %error, "Request failed"),
        }
        result
    }
}

fn log_service(operation: &'static str, name: &str, result: &Result<ServiceResponse, HandlerError>) {
    match result {
        Ok(res) => info!(operation, name, state = %res.state, "Handled request"),
        Err(error) => warn!(operation, name, error = %error, "Request failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_handler_errors_map_to_status_codes() {
        let cases = vec![
            (HandlerError::InvalidArgument("x".into()), Code::InvalidArgument),
            (HandlerError::NotFound("x".into()), Code::NotFound),
            (HandlerError::PermissionDenied("x".into()), Code::PermissionDenied),
            (HandlerError::FailedPrecondition("x".into()), Code::FailedPrecondition),
            (
                HandlerError::CommandFailed {
                    code: 2,
                    output: "x".into(),
                },
                Code::Aborted,
            ),
            (HandlerError::Unavailable("x".into()), Code::Unavailable),
            (HandlerError::Internal("x".into()), Code::Internal),
        ];

        for (error, code) in cases {
            assert_eq!(Status::from(error).code(), code);
        }
    }

    #[test]
    fn test_command_failure_status_keeps_output() {
        let status = Status::from(HandlerError::CommandFailed {
            code: 3,
            output: "disk full".to_string(),
        });
        assert!(status.message().contains("status 3"));
        assert!(status.message().contains("disk full"));
    }
}
