use std::io::ErrorKind;
use std::process::Stdio;

use fleetrun_core::State;
use fleetrun_proto::CommandResponse;
use tokio::process::Command;

use crate::HandlerError;

/// Runs programs directly, without a shell.
#[derive(Debug, Default, Clone)]
pub struct CommandService;

impl CommandService {
    pub fn new() -> Self {
        Self
    }

    /// Stdout followed by stderr, both lossily decoded, is returned as the
    /// message on success and carried in the error otherwise.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<CommandResponse, HandlerError> {
        if program.trim().is_empty() {
            return Err(HandlerError::InvalidArgument(
                "command name must not be empty".to_string(),
            ));
        }

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => HandlerError::NotFound(format!("program '{program}'")),
                ErrorKind::PermissionDenied => {
                    HandlerError::PermissionDenied(format!("cannot execute '{program}'"))
                }
                _ => HandlerError::Internal(format!("failed to run '{program}': {e}")),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(CommandResponse {
                state: State::Unknown,
                message: combined,
            })
        } else {
            Err(HandlerError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                output: combined,
            })
        }
    }
}
