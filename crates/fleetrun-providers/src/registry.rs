use fleetrun_core::{Instance, ProviderTag};
use futures::future::join_all;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{AwsProvider, GcpProvider, Provider, ProviderSettings};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no cloud providers enabled")]
    NoProvidersEnabled,
    #[error("no cloud providers could be initialised")]
    NoProvidersAvailable,
    #[error("every cloud provider failed to list instances")]
    AllProvidersFailed,
}

/// The set of initialised providers for one command invocation.
pub struct ProviderRegistry {
    providers: Vec<Provider>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Provider>) -> Result<Self, RegistryError> {
        if providers.is_empty() {
            return Err(RegistryError::NoProvidersEnabled);
        }
        Ok(Self { providers })
    }

    /// Initialise every configured provider. One that fails to initialise is
    /// logged and left out.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, RegistryError> {
        if settings.enabled() == 0 {
            return Err(RegistryError::NoProvidersEnabled);
        }

        let mut providers = Vec::with_capacity(settings.enabled());
        if let Some(aws) = &settings.aws {
            match AwsProvider::new(aws) {
                Ok(provider) => providers.push(Provider::Aws(provider)),
                Err(error) => error!(provider = "aws", error = %error, "Failed to initialise provider"),
            }
        }
        if let Some(gcp) = &settings.gcp {
            match GcpProvider::new(gcp) {
                Ok(provider) => providers.push(Provider::Gcp(provider)),
                Err(error) => error!(provider = "gcp", error = %error, "Failed to initialise provider"),
            }
        }

        if providers.is_empty() {
            return Err(RegistryError::NoProvidersAvailable);
        }
        Ok(Self { providers })
    }

    pub fn tags(&self) -> Vec<ProviderTag> {
        self.providers.iter().map(Provider::tag).collect()
    }

    /// Query every provider concurrently and concatenate the results in
    /// provider order. A failing provider is logged and skipped.
    pub async fn list_instances(&self) -> Result<Vec<Instance>, RegistryError> {
        let results = join_all(self.providers.iter().map(|provider| async move {
            (provider.tag(), provider.list_instances().await)
        }))
        .await;

        let mut instances = Vec::new();
        let mut succeeded = 0usize;
        for (tag, result) in results {
            match result {
                Ok(listed) => {
                    info!(provider = %tag, count = listed.len(), "Discovered instances");
                    succeeded += 1;
                    instances.extend(listed);
                }
                Err(error) => {
                    warn!(provider = %tag, error = %error, "Provider failed to list instances");
                }
            }
        }

        if succeeded == 0 {
            return Err(RegistryError::AllProvidersFailed);
        }
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::aws::repo::{DescribeInstancesPage, Ec2Instance, Ec2Repository};
    use crate::features::gcp::repo::{
        AggregatedInstancesPage, ComputeInstance, ComputeRepository,
    };
    use crate::{AwsCredentialSource, AwsKeys, AwsSettings, GcpCredentials, GcpSettings, ProviderError, Result};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StaticEc2(Vec<&'static str>);

    #[async_trait]
    impl Ec2Repository for StaticEc2 {
        async fn describe_instances(&self, _token: Option<&str>) -> Result<DescribeInstancesPage> {
            Ok(DescribeInstancesPage {
                instances: self
                    .0
                    .iter()
                    .map(|id| Ec2Instance {
                        instance_id: id.to_string(),
                        private_ip_address: Some("10.0.0.1".to_string()),
                        ..Default::default()
                    })
                    .collect(),
                next_token: None,
            })
        }
    }

    struct BrokenEc2;

    #[async_trait]
    impl Ec2Repository for BrokenEc2 {
        async fn describe_instances(&self, _token: Option<&str>) -> Result<DescribeInstancesPage> {
            Err(ProviderError::Request {
                provider: ProviderTag::Aws,
                message: "connection refused".to_string(),
            })
        }
    }

    struct StaticCompute(Vec<&'static str>);

    #[async_trait]
    impl ComputeRepository for StaticCompute {
        async fn aggregated_instances(
            &self,
            _token: Option<&str>,
        ) -> Result<AggregatedInstancesPage> {
            Ok(AggregatedInstancesPage {
                instances: self
                    .0
                    .iter()
                    .map(|name| ComputeInstance {
                        name: name.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                next_page_token: None,
            })
        }
    }

    struct BrokenCompute;

    #[async_trait]
    impl ComputeRepository for BrokenCompute {
        async fn aggregated_instances(
            &self,
            _token: Option<&str>,
        ) -> Result<AggregatedInstancesPage> {
            Err(ProviderError::Api {
                provider: ProviderTag::Gcp,
                status: 500,
                body: "backend error".to_string(),
            })
        }
    }

    fn aws(repo: impl Ec2Repository + 'static) -> Provider {
        Provider::Aws(AwsProvider::with_repository(Arc::new(repo)))
    }

    fn gcp(repo: impl ComputeRepository + 'static) -> Provider {
        Provider::Gcp(GcpProvider::with_repository(Arc::new(repo)))
    }

    #[test]
    fn test_no_settings_means_no_providers_enabled() {
        let result = ProviderRegistry::from_settings(&ProviderSettings::default());
        assert_eq!(result.err(), Some(RegistryError::NoProvidersEnabled));
    }

    #[test]
    fn test_failed_initialisation_is_excluded() {
        let settings = ProviderSettings {
            aws: Some(AwsSettings::new(AwsCredentialSource::Static(AwsKeys::new(
                "AKID", "",
            )))),
            gcp: Some(GcpSettings {
                project: "example-project".to_string(),
                credentials: GcpCredentials::AccessToken("token".to_string()),
                endpoint: None,
            }),
        };

        let registry = ProviderRegistry::from_settings(&settings).unwrap();
        assert_eq!(registry.tags(), vec![ProviderTag::Gcp]);
    }

    #[test]
    fn test_all_initialisations_failing_is_distinct_error() {
        let settings = ProviderSettings {
            aws: None,
            gcp: Some(GcpSettings {
                project: String::new(),
                credentials: GcpCredentials::AccessToken("token".to_string()),
                endpoint: None,
            }),
        };

        let result = ProviderRegistry::from_settings(&settings);
        assert_eq!(result.err(), Some(RegistryError::NoProvidersAvailable));
    }

    #[tokio::test]
    async fn test_list_instances_merges_providers_in_order() {
        let registry = ProviderRegistry::new(vec![
            aws(StaticEc2(vec!["i-1", "i-2"])),
            gcp(StaticCompute(vec!["vm-1"])),
        ])
        .unwrap();

        let instances = registry.list_instances().await.unwrap();
        let names: Vec<&str> = instances.iter().map(Instance::name).collect();
        assert_eq!(names, vec!["i-1", "i-2", "vm-1"]);
    }

    #[tokio::test]
    async fn test_failing_provider_is_skipped() {
        let registry =
            ProviderRegistry::new(vec![aws(BrokenEc2), gcp(StaticCompute(vec!["vm-1"]))]).unwrap();

        let instances = registry.list_instances().await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].provider(), ProviderTag::Gcp);
    }

    #[tokio::test]
    async fn test_every_provider_failing_is_an_error() {
        let registry = ProviderRegistry::new(vec![aws(BrokenEc2), gcp(BrokenCompute)]).unwrap();
        assert_eq!(
            registry.list_instances().await.err(),
            Some(RegistryError::AllProvidersFailed)
        );
    }

    #[tokio::test]
    async fn test_empty_listing_is_not_a_failure() {
        let registry = ProviderRegistry::new(vec![aws(StaticEc2(vec![]))]).unwrap();
        assert!(registry.list_instances().await.unwrap().is_empty());
    }
}
