use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

const SHOW_PROPERTIES: &str = "--property=LoadState,ActiveState,SubState";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("'{command}' failed: {output}")]
    Failed { command: String, output: String },
    #[error("unexpected systemctl output: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAction {
    Start,
    Stop,
    Restart,
}

impl UnitAction {
    pub fn verb(&self) -> &'static str {
        match self {
            UnitAction::Start => "start",
            UnitAction::Stop => "stop",
            UnitAction::Restart => "restart",
        }
    }
}

/// The unit properties reported by `systemctl show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
}

impl UnitStatus {
    pub fn is_not_found(&self) -> bool {
        self.load_state == "not-found"
    }

    pub fn is_active(&self) -> bool {
        self.active_state == "active"
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.active_state.as_str(), "inactive" | "failed")
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn status(&self, unit: &str) -> Result<UnitStatus, ManagerError>;
    async fn execute(&self, action: UnitAction, unit: &str) -> Result<(), ManagerError>;
}

/// Drives units through the `systemctl` binary.
pub struct SystemctlServiceManager {
    program: String,
}

impl SystemctlServiceManager {
    pub fn new() -> Self {
        Self::with_program("systemctl")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, ManagerError> {
        debug!(program = %self.program, ?args, "Running service manager command");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ManagerError::Spawn {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if combined.is_empty() {
                combined = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            return Err(ManagerError::Failed {
                command: format!("{} {}", self.program, args.join(" ")),
                output: combined,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for SystemctlServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceManager for SystemctlServiceManager {
    async fn status(&self, unit: &str) -> Result<UnitStatus, ManagerError> {
        let stdout = self.run(&["show", SHOW_PROPERTIES, "--", unit]).await?;
        parse_show(&stdout)
    }

    async fn execute(&self, action: UnitAction, unit: &str) -> Result<(), ManagerError> {
        self.run(&[action.verb(), "--", unit]).await.map(|_| ())
    }
}

pub(crate) fn parse_show(stdout: &str) -> Result<UnitStatus, ManagerError> {
    let mut load_state = None;
    let mut active_state = None;
    let mut sub_state = None;

    for line in stdout.lines() {
        match line.split_once('=') {
            Some(("LoadState", value)) => load_state = Some(value.trim().to_string()),
            Some(("ActiveState", value)) => active_state = Some(value.trim().to_string()),
            Some(("SubState", value)) => sub_state = Some(value.trim().to_string()),
            _ => {}
        }
    }

    match (load_state, active_state, sub_state) {
        (Some(load_state), Some(active_state), Some(sub_state)) => Ok(UnitStatus {
            load_state,
            active_state,
            sub_state,
        }),
        _ => Err(ManagerError::Parse(stdout.trim().to_string())),
    }
}
