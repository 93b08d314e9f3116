use std::sync::Arc;

use fleetrun_core::State;
use fleetrun_proto::{ServiceResponse, ServiceStatusResponse};
use tracing::warn;

use crate::features::service_control::repo::{
    ManagerError, ServiceManager, UnitAction, UnitStatus,
};
use crate::HandlerError;

impl From<ManagerError> for HandlerError {
    fn from(error: ManagerError) -> Self {
        match error {
            ManagerError::Spawn { .. } => HandlerError::Unavailable(error.to_string()),
            ManagerError::Failed { .. } | ManagerError::Parse(_) => {
                HandlerError::Internal(error.to_string())
            }
        }
    }
}

pub struct ServiceControlService {
    manager: Arc<dyn ServiceManager>,
}

impl ServiceControlService {
    pub fn new(manager: Arc<dyn ServiceManager>) -> Self {
        Self { manager }
    }

    pub async fn start(&self, unit: &str) -> Result<ServiceResponse, HandlerError> {
        validate_unit(unit)?;
        let before = self.pre_query(unit).await?;
        if before.as_ref().is_some_and(UnitStatus::is_active) {
            return Ok(response(State::Unchanged, format!("{unit} is already running")));
        }

        self.manager.execute(UnitAction::Start, unit).await?;
        Ok(response(changed_unless_unknown(&before), format!("{unit} started")))
    }

    pub async fn stop(&self, unit: &str) -> Result<ServiceResponse, HandlerError> {
        validate_unit(unit)?;
        let before = self.pre_query(unit).await?;
        if before.as_ref().is_some_and(UnitStatus::is_stopped) {
            return Ok(response(State::Unchanged, format!("{unit} is already stopped")));
        }

        self.manager.execute(UnitAction::Stop, unit).await?;
        Ok(response(changed_unless_unknown(&before), format!("{unit} stopped")))
    }

    pub async fn restart(&self, unit: &str) -> Result<ServiceResponse, HandlerError> {
        validate_unit(unit)?;
        let before = self.pre_query(unit).await?;

        self.manager.execute(UnitAction::Restart, unit).await?;
        Ok(response(changed_unless_unknown(&before), format!("{unit} restarted")))
    }

    pub async fn status(&self, unit: &str) -> Result<ServiceStatusResponse, HandlerError> {
        validate_unit(unit)?;
        let status = self.manager.status(unit).await?;
        if status.is_not_found() {
            return Err(HandlerError::NotFound(format!("unit {unit}")));
        }

        Ok(ServiceStatusResponse {
            state: State::Unknown,
            load_state: status.load_state,
            active_state: status.active_state,
            sub_state: status.sub_state,
        })
    }

    /// Current unit state, or `None` when it could not be determined. A unit
    /// the manager does not know is an error.
    async fn pre_query(&self, unit: &str) -> Result<Option<UnitStatus>, HandlerError> {
        match self.manager.status(unit).await {
            Ok(status) if status.is_not_found() => {
                Err(HandlerError::NotFound(format!("unit {unit}")))
            }
            Ok(status) => Ok(Some(status)),
            Err(error) => {
                warn!(unit, error = %error, "Could not determine unit state before acting");
                Ok(None)
            }
        }
    }
}

fn changed_unless_unknown(before: &Option<UnitStatus>) -> State {
    match before {
        Some(_) => State::Changed,
        None => State::Unknown,
    }
}

fn response(state: State, message: String) -> ServiceResponse {
    ServiceResponse { state, message }
}

fn validate_unit(unit: &str) -> Result<(), HandlerError> {
    if unit.trim().is_empty() {
        return Err(HandlerError::InvalidArgument(
            "service name must not be empty".to_string(),
        ));
    }
    if unit.starts_with('-') {
        return Err(HandlerError::InvalidArgument(format!(
            "service name '{unit}' must not start with '-'"
        )));
    }
    Ok(())
}
