use async_trait::async_trait;
use fleetrun_core::Instance;
use fleetrun_providers::{ProviderRegistry, RegistryError};

/// Where candidate instances come from.
#[async_trait]
pub trait InstanceSource: Send + Sync {
    async fn discover(&self) -> Result<Vec<Instance>, RegistryError>;
}

#[async_trait]
impl InstanceSource for ProviderRegistry {
    async fn discover(&self) -> Result<Vec<Instance>, RegistryError> {
        self.list_instances().await
    }
}
