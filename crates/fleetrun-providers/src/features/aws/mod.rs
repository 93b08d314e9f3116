pub mod repo;
pub mod service;

use std::sync::Arc;

use fleetrun_core::{Instance, ProviderTag};

use crate::{ProviderError, Result};
use repo::credentials::CredentialsProvider;
use repo::{Ec2Repository, HttpEc2Repository};
use service::AwsInventoryService;

pub use repo::credentials::{AwsCredentialSource, AwsKeys, SharedConfigFiles};

/// Target region, credential source and shared-file locations.
#[derive(Debug, Clone)]
pub struct AwsSettings {
    /// Falls back to the profile's `region` in the config file.
    pub region: Option<String>,
    pub credentials: AwsCredentialSource,
    pub shared_files: SharedConfigFiles,
    /// Replaces `https://ec2.<region>.amazonaws.com/`.
    pub endpoint: Option<String>,
}

impl AwsSettings {
    pub fn new(credentials: AwsCredentialSource) -> Self {
        Self {
            region: None,
            credentials,
            shared_files: SharedConfigFiles::default_locations(),
            endpoint: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if let AwsCredentialSource::Static(keys) = &self.credentials {
            if keys.access_key_id.trim().is_empty() {
                return Err(config_error("access key id is required"));
            }
            if keys.secret_access_key.trim().is_empty() {
                return Err(config_error("secret access key is required"));
            }
        }
        if let AwsCredentialSource::Profile(name) = &self.credentials {
            if name.trim().is_empty() {
                return Err(config_error("profile name is empty"));
            }
        }
        Ok(())
    }

    /// Explicit region, else the profile's configured one.
    pub fn resolve_region(&self) -> Result<String> {
        if let Some(region) = self.region.as_deref().map(str::trim) {
            if !region.is_empty() {
                return Ok(region.to_string());
            }
        }
        let profile = self.credentials.profile();
        self.shared_files.profile_region(profile)?.ok_or_else(|| {
            config_error(format!(
                "region is required (set AWS_REGION or `region` in profile '{profile}')"
            ))
        })
    }
}

fn config_error(message: impl Into<String>) -> ProviderError {
    ProviderError::Config {
        provider: ProviderTag::Aws,
        message: message.into(),
    }
}

/// EC2 instance discovery in a single region.
pub struct AwsProvider {
    service: AwsInventoryService,
}

impl AwsProvider {
    pub fn new(settings: &AwsSettings) -> Result<Self> {
        settings.validate()?;
        let region = settings.resolve_region()?;
        let credentials = CredentialsProvider::new(
            settings.credentials.clone(),
            settings.shared_files.clone(),
        )?;
        let repo = HttpEc2Repository::new(region, settings.endpoint.as_deref(), credentials)?;
        Ok(Self::with_repository(Arc::new(repo)))
    }

    pub fn with_repository(repo: Arc<dyn Ec2Repository>) -> Self {
        Self {
            service: AwsInventoryService::new(repo),
        }
    }

    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        self.service.list_instances().await
    }
}
