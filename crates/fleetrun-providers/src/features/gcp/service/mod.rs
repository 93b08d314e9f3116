use std::sync::Arc;

use fleetrun_core::{Instance, ProviderTag};
use tracing::{debug, warn};

use crate::features::gcp::repo::{ComputeInstance, ComputeRepository};
use crate::{ProviderError, Result};

pub struct GcpInventoryService {
    repo: Arc<dyn ComputeRepository>,
}

impl GcpInventoryService {
    pub fn new(repo: Arc<dyn ComputeRepository>) -> Self {
        Self { repo }
    }

    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.repo.aggregated_instances(page_token.as_deref()).await?;
            pages += 1;

            for raw in page.instances {
                match normalize(raw) {
                    Ok(instance) => instances.push(instance),
                    Err(error) => warn!(error = %error, "Skipping GCE instance without a name"),
                }
            }

            match page.next_page_token {
                Some(token) if page_token.as_deref() == Some(token.as_str()) => {
                    return Err(ProviderError::Decode {
                        provider: ProviderTag::Gcp,
                        message: "pagination token did not advance".to_string(),
                    });
                }
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(pages, count = instances.len(), "Listed GCE instances");
        Ok(instances)
    }
}

pub(crate) fn normalize(raw: ComputeInstance) -> fleetrun_core::Result<Instance> {
    let private_address = raw
        .network_interfaces
        .iter()
        .find_map(|nic| nic.network_ip.clone().filter(|ip| !ip.is_empty()))
        .unwrap_or_default();
    let public_address = raw
        .network_interfaces
        .iter()
        .flat_map(|nic| nic.access_configs.iter())
        .find_map(|config| config.nat_ip.clone().filter(|ip| !ip.is_empty()))
        .unwrap_or_default();

    Instance::new(
        raw.name,
        private_address,
        public_address,
        raw.labels,
        ProviderTag::Gcp,
    )
}
