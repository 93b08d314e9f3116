//! Instance discovery across cloud providers.
//!
//! Each backend lives under `features/<provider>` with a `repo` (one API
//! page per call) and a `service` (pagination and normalization into
//! [`Instance`]). [`Provider`] closes the set of backends and
//! [`ProviderRegistry`] merges their listings.

pub mod features;
pub mod registry;

use fleetrun_core::{Instance, ProviderTag};
use thiserror::Error;

pub use features::aws::{
    AwsCredentialSource, AwsKeys, AwsProvider, AwsSettings, SharedConfigFiles,
};
pub use features::gcp::{GcpCredentials, GcpProvider, GcpSettings, ServiceAccountKey};
pub use registry::{ProviderRegistry, RegistryError};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid {provider} configuration: {message}")]
    Config {
        provider: ProviderTag,
        message: String,
    },
    #[error("{provider} authentication failed: {message}")]
    Auth {
        provider: ProviderTag,
        message: String,
    },
    #[error("{provider} request failed: {message}")]
    Request {
        provider: ProviderTag,
        message: String,
    },
    #[error("{provider} API returned HTTP {status}: {body}")]
    Api {
        provider: ProviderTag,
        status: u16,
        body: String,
    },
    #[error("failed to decode {provider} response: {message}")]
    Decode {
        provider: ProviderTag,
        message: String,
    },
}

impl ProviderError {
    pub fn provider(&self) -> ProviderTag {
        match self {
            ProviderError::Config { provider, .. }
            | ProviderError::Auth { provider, .. }
            | ProviderError::Request { provider, .. }
            | ProviderError::Api { provider, .. }
            | ProviderError::Decode { provider, .. } => *provider,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Resolved settings for every backend; `None` leaves a backend disabled.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub aws: Option<AwsSettings>,
    pub gcp: Option<GcpSettings>,
}

impl ProviderSettings {
    pub fn enabled(&self) -> usize {
        usize::from(self.aws.is_some()) + usize::from(self.gcp.is_some())
    }
}

/// A cloud backend able to enumerate its instances.
pub enum Provider {
    Aws(AwsProvider),
    Gcp(GcpProvider),
}

impl Provider {
    pub fn tag(&self) -> ProviderTag {
        match self {
            Provider::Aws(_) => ProviderTag::Aws,
            Provider::Gcp(_) => ProviderTag::Gcp,
        }
    }

    /// Every instance the backend currently reports, across all pages.
    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        match self {
            Provider::Aws(provider) => provider.list_instances().await,
            Provider::Gcp(provider) => provider.list_instances().await,
        }
    }
}
