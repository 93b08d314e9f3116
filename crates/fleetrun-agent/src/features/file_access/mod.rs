use std::io::{self, ErrorKind};
use std::path::Path;

use fleetrun_core::State;
use fleetrun_proto::FileReadResponse;

use crate::HandlerError;

#[derive(Debug, Default, Clone)]
pub struct FileAccessService;

impl FileAccessService {
    pub fn new() -> Self {
        Self
    }

    /// Read a whole file. Content is returned inline and is not size-limited.
    pub async fn read(&self, path: &str) -> Result<FileReadResponse, HandlerError> {
        if path.is_empty() || !Path::new(path).is_absolute() {
            return Err(HandlerError::InvalidArgument(format!(
                "path '{path}' must be absolute"
            )));
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| io_error(path, e))?;
        if metadata.is_dir() {
            return Err(HandlerError::FailedPrecondition(format!(
                "{path} is a directory"
            )));
        }

        let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
        Ok(FileReadResponse {
            state: State::Unknown,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

fn io_error(path: &str, error: io::Error) -> HandlerError {
    match error.kind() {
        ErrorKind::NotFound => HandlerError::NotFound(format!("file {path}")),
        ErrorKind::PermissionDenied => HandlerError::PermissionDenied(path.to_string()),
        _ => HandlerError::Internal(format!("failed to read {path}: {error}")),
    }
}
