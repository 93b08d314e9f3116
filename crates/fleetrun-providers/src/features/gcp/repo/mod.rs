pub mod auth;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use fleetrun_core::{Labels, ProviderTag};
use serde::Deserialize;

use super::{GcpCredentials, GcpSettings};
use crate::{ProviderError, Result};
use auth::TokenSource;

const DEFAULT_ENDPOINT: &str = "https://compute.googleapis.com";
const PAGE_SIZE: &str = "100";
const FIELDS: &str = "nextPageToken,items/*/instances(name,networkInterfaces,labels)";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccessConfig {
    #[serde(rename = "natIP", default)]
    pub nat_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(rename = "networkIP", default)]
    pub network_ip: Option<String>,
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeInstance {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub labels: Labels,
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedInstancesPage {
    pub instances: Vec<ComputeInstance>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait ComputeRepository: Send + Sync {
    /// Fetch one page of `instances.aggregatedList` across all zones.
    async fn aggregated_instances(&self, page_token: Option<&str>)
        -> Result<AggregatedInstancesPage>;
}

pub struct HttpComputeRepository {
    client: reqwest::Client,
    url: String,
    tokens: TokenSource,
}

impl HttpComputeRepository {
    pub fn new(settings: GcpSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Config {
                provider: ProviderTag::Gcp,
                message: format!("failed to build http client: {e}"),
            })?;

        let tokens = match settings.credentials {
            GcpCredentials::AccessToken(token) => TokenSource::Static(token),
            GcpCredentials::ServiceAccount(key) => TokenSource::service_account(key)?,
        };

        let endpoint = settings.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let url = format!(
            "{}/compute/v1/projects/{}/aggregated/instances",
            endpoint.trim_end_matches('/'),
            urlencoding::encode(&settings.project)
        );

        Ok(Self {
            client,
            url,
            tokens,
        })
    }
}

#[async_trait]
impl ComputeRepository for HttpComputeRepository {
    async fn aggregated_instances(
        &self,
        page_token: Option<&str>,
    ) -> Result<AggregatedInstancesPage> {
        let token = self.tokens.token(&self.client).await?;

        let mut query = vec![("maxResults", PAGE_SIZE), ("fields", FIELDS)];
        if let Some(page_token) = page_token {
            query.push(("pageToken", page_token));
        }

        let response = self
            .client
            .get(&self.url)
            .query(&query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: ProviderTag::Gcp,
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ProviderError::Request {
            provider: ProviderTag::Gcp,
            message: format!("failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            return Err(ProviderError::Api {
                provider: ProviderTag::Gcp,
                status: status.as_u16(),
                body,
            });
        }

        parse_aggregated_list(&body)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ScopedList {
    #[serde(default)]
    instances: Vec<ComputeInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatedList {
    #[serde(default)]
    items: BTreeMap<String, ScopedList>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub(crate) fn parse_aggregated_list(body: &str) -> Result<AggregatedInstancesPage> {
    let list: AggregatedList = serde_json::from_str(body).map_err(|e| ProviderError::Decode {
        provider: ProviderTag::Gcp,
        message: e.to_string(),
    })?;

    Ok(AggregatedInstancesPage {
        instances: list
            .items
            .into_values()
            .flat_map(|scope| scope.instances)
            .collect(),
        next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "items": {
            "zones/europe-west1-b": {
                "instances": [
                    {
                        "name": "api-1",
                        "networkInterfaces": [
                            {
                                "networkIP": "10.132.0.2",
                                "accessConfigs": [{ "natIP": "35.195.1.2" }]
                            }
                        ],
                        "labels": { "env": "prod", "team": "core" }
                    }
                ]
            },
            "zones/us-central1-a": {
                "warning": {
                    "code": "NO_RESULTS_ON_PAGE",
                    "message": "There are no results for scope 'zones/us-central1-a' on this page."
                }
            },
            "zones/us-east1-c": {
                "instances": [
                    { "name": "worker-1", "networkInterfaces": [{ "networkIP": "10.142.0.7" }] }
                ]
            }
        },
        "nextPageToken": "CjAI"
    }"#;

    #[test]
    fn test_parse_aggregated_list_flattens_zones() {
        let page = parse_aggregated_list(PAGE).unwrap();

        assert_eq!(page.next_page_token.as_deref(), Some("CjAI"));
        assert_eq!(page.instances.len(), 2);

        let api = &page.instances[0];
        assert_eq!(api.name, "api-1");
        assert_eq!(api.network_interfaces[0].network_ip.as_deref(), Some("10.132.0.2"));
        assert_eq!(
            api.network_interfaces[0].access_configs[0].nat_ip.as_deref(),
            Some("35.195.1.2")
        );
        assert_eq!(api.labels.get("team").map(String::as_str), Some("core"));

        let worker = &page.instances[1];
        assert!(worker.labels.is_empty());
        assert!(worker.network_interfaces[0].access_configs.is_empty());
    }

    #[test]
    fn test_parse_empty_project() {
        let page = parse_aggregated_list("{}").unwrap();
        assert!(page.instances.is_empty());
        assert_eq!(page.next_page_token, None);
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(matches!(
            parse_aggregated_list("<html>"),
            Err(ProviderError::Decode { .. })
        ));
    }

    #[test]
    fn test_url_uses_endpoint_override() {
        let repo = HttpComputeRepository::new(GcpSettings {
            project: "example-project".to_string(),
            credentials: GcpCredentials::AccessToken("token".to_string()),
            endpoint: Some("http://127.0.0.1:8085/".to_string()),
        })
        .unwrap();

        assert_eq!(
            repo.url,
            "http://127.0.0.1:8085/compute/v1/projects/example-project/aggregated/instances"
        );
    }
}
