use std::sync::Arc;

use fleetrun_core::{CompiledFilter, Instance};
use fleetrun_providers::RegistryError;
use thiserror::Error;
use tracing::info;

use crate::features::target_selection::repo::InstanceSource;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error(transparent)]
    Discovery(#[from] RegistryError),
    #[error("no instances found")]
    NoInstancesFound,
    #[error("no instances matched target expression '{0}'")]
    NoInstancesMatched(String),
}

pub struct TargetSelectionService {
    source: Arc<dyn InstanceSource>,
}

impl TargetSelectionService {
    pub fn new(source: Arc<dyn InstanceSource>) -> Self {
        Self { source }
    }

    /// Discover instances and keep those matching `filter`, in discovery order.
    pub async fn select(&self, filter: &CompiledFilter) -> Result<Vec<Instance>, SelectionError> {
        let discovered = self.source.discover().await?;
        if discovered.is_empty() {
            return Err(SelectionError::NoInstancesFound);
        }

        let total = discovered.len();
        let selected = filter.select(discovered);
        info!(total, selected = selected.len(), target = %filter.source(), "Selected targets");

        if selected.is_empty() {
            return Err(SelectionError::NoInstancesMatched(filter.source().to_string()));
        }
        Ok(selected)
    }
}
