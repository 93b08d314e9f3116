use std::io;
use std::path::PathBuf;

use fleetrun_core::FilterError;
use fleetrun_proto::tls::TlsError;
use fleetrun_providers::{ProviderError, RegistryError};
use thiserror::Error;

use crate::features::target_selection::service::SelectionError;

/// Problems with the operator-supplied configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("incomplete AWS configuration: {0} is required")]
    IncompleteAws(&'static str),
    #[error("GCP project is set but no credentials were given (--gcp-access-token or --gcp-credentials)")]
    MissingGcpCredentials,
    #[error("failed to read {path}: {source}")]
    ReadCredentials {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("invalid target expression: {0}")]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),
}

pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;

/// Render an error with its `source()` chain, `outer: inner: root`.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_error_message() {
        let err = ControlPlaneError::from(FilterError::UnknownIdentifier("Zone".to_string()));
        assert_eq!(
            err.to_string(),
            "invalid target expression: unknown identifier 'Zone'"
        );
    }

    #[test]
    fn test_registry_error_is_transparent() {
        let err = ControlPlaneError::from(RegistryError::NoProvidersEnabled);
        assert_eq!(err.to_string(), "no cloud providers enabled");
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = ConfigError::ReadCredentials {
            path: PathBuf::from("/tmp/key.json"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        let rendered = error_chain(&err);
        assert!(rendered.starts_with("failed to read /tmp/key.json: gone"));
        assert_eq!(rendered.matches("gone").count(), 1);
    }
}
