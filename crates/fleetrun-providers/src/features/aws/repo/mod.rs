pub mod credentials;
pub mod sigv4;

use async_trait::async_trait;
use fleetrun_core::ProviderTag;
use serde::Deserialize;
use std::time::Duration;

use credentials::CredentialsProvider;
use crate::{ProviderError, Result};

const API_VERSION: &str = "2016-11-15";
const PAGE_SIZE: u32 = 20;
const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ec2Instance {
    pub instance_id: String,
    pub private_ip_address: Option<String>,
    pub public_ip_address: Option<String>,
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct DescribeInstancesPage {
    pub instances: Vec<Ec2Instance>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait Ec2Repository: Send + Sync {
    /// Fetch one page of `DescribeInstances`.
    async fn describe_instances(&self, next_token: Option<&str>) -> Result<DescribeInstancesPage>;
}

pub struct HttpEc2Repository {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    region: String,
    credentials: CredentialsProvider,
}

impl HttpEc2Repository {
    pub fn new(
        region: String,
        endpoint: Option<&str>,
        credentials: CredentialsProvider,
    ) -> Result<Self> {
        let endpoint = endpoint
            .map(str::to_string)
            .unwrap_or_else(|| format!("https://ec2.{region}.amazonaws.com/"));
        let endpoint = reqwest::Url::parse(&endpoint)
            .map_err(|e| config_error(format!("invalid endpoint '{endpoint}': {e}")))?;
        if endpoint.host_str().is_none() {
            return Err(config_error(format!("endpoint '{endpoint}' has no host")));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| config_error(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            region,
            credentials,
        })
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

#[async_trait]
impl Ec2Repository for HttpEc2Repository {
    async fn describe_instances(&self, next_token: Option<&str>) -> Result<DescribeInstancesPage> {
        let body = request_body(next_token);
        let host = self.host();
        let keys = self.credentials.credentials().await?;

        let signable = sigv4::SignableRequest {
            method: "POST",
            host: &host,
            path: self.endpoint.path(),
            query: "",
            content_type: CONTENT_TYPE,
            body: body.as_bytes(),
        };
        let credentials = sigv4::Credentials {
            access_key_id: &keys.access_key_id,
            secret_access_key: &keys.secret_access_key,
            session_token: keys.session_token.as_deref(),
        };
        let signed = sigv4::sign(
            &signable,
            &credentials,
            &self.region,
            "ec2",
            chrono::Utc::now(),
        );

        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE);
        for (name, value) in signed {
            builder = builder.header(name, value);
        }

        let response = builder.body(body).send().await.map_err(|e| ProviderError::Request {
            provider: ProviderTag::Aws,
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ProviderError::Request {
            provider: ProviderTag::Aws,
            message: format!("failed to read response body: {e}"),
        })?;
        if !status.is_success() {
            return Err(ProviderError::Api {
                provider: ProviderTag::Aws,
                status: status.as_u16(),
                body: text,
            });
        }

        parse_describe_instances(&text)
    }
}

fn config_error(message: String) -> ProviderError {
    ProviderError::Config {
        provider: ProviderTag::Aws,
        message,
    }
}

fn request_body(next_token: Option<&str>) -> String {
    let mut params = vec![
        ("Action", "DescribeInstances".to_string()),
        ("MaxResults", PAGE_SIZE.to_string()),
    ];
    if let Some(token) = next_token {
        params.push(("NextToken", token.to_string()));
    }
    params.push(("Version", API_VERSION.to_string()));

    params
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

// Response XML, reduced to the elements discovery needs. EC2 wraps every
// list in a `<...Set>` element holding repeated `<item>` children.

#[derive(Debug, Deserialize)]
struct ItemSet<T> {
    #[serde(rename = "item", default = "Vec::new")]
    items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservation_set: ItemSet<Reservation>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reservation {
    #[serde(default)]
    instances_set: ItemSet<RawInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInstance {
    #[serde(default)]
    instance_id: String,
    #[serde(default)]
    private_ip_address: Option<String>,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    tag_set: ItemSet<RawTag>,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    key: String,
    #[serde(default)]
    value: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub(crate) fn parse_describe_instances(xml: &str) -> Result<DescribeInstancesPage> {
    let response: DescribeInstancesResponse =
        quick_xml::de::from_str(xml).map_err(|e| ProviderError::Decode {
            provider: ProviderTag::Aws,
            message: e.to_string(),
        })?;

    let instances = response
        .reservation_set
        .items
        .into_iter()
        .flat_map(|reservation| reservation.instances_set.items)
        .map(|raw| Ec2Instance {
            instance_id: raw.instance_id,
            private_ip_address: non_empty(raw.private_ip_address),
            public_ip_address: non_empty(raw.ip_address),
            tags: raw
                .tag_set
                .items
                .into_iter()
                .map(|tag| (tag.key, tag.value))
                .collect(),
        })
        .collect();

    Ok(DescribeInstancesPage {
        instances,
        next_token: non_empty(response.next_token),
    })
}
