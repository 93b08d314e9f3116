//! AWS credential resolution.
//!
//! Credentials come from explicit keys, a named profile in the shared
//! `credentials`/`config` files, or the default chain: the `default` profile
//! first, then the EC2 instance metadata service (IMDSv2) for an attached
//! instance role. Role credentials are cached until shortly before they
//! expire.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetrun_core::ProviderTag;
use ini::Ini;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{ProviderError, Result};

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";

const IMDS_TOKEN_TTL_SECS: &str = "21600";
const IMDS_TIMEOUT: Duration = Duration::from_secs(2);
const REFRESH_MARGIN_SECS: i64 = 300;

/// One set of signing credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    /// Set for temporary role credentials.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AwsKeys {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expires_at: None,
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - chrono::Duration::seconds(REFRESH_MARGIN_SECS) > now,
            None => true,
        }
    }
}

impl fmt::Debug for AwsKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsKeys")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Where signing credentials are taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwsCredentialSource {
    Static(AwsKeys),
    Profile(String),
    DefaultChain,
}

impl AwsCredentialSource {
    /// Profile whose `config` section may carry the region.
    pub fn profile(&self) -> &str {
        match self {
            AwsCredentialSource::Profile(name) => name,
            _ => DEFAULT_PROFILE,
        }
    }
}

/// Locations of the shared `credentials` and `config` files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedConfigFiles {
    pub credentials: PathBuf,
    pub config: PathBuf,
}

impl SharedConfigFiles {
    /// `AWS_SHARED_CREDENTIALS_FILE` / `AWS_CONFIG_FILE`, else `~/.aws/*`.
    pub fn default_locations() -> Self {
        let aws_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join(".aws");
        Self {
            credentials: std::env::var_os("AWS_SHARED_CREDENTIALS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| aws_dir.join("credentials")),
            config: std::env::var_os("AWS_CONFIG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| aws_dir.join("config")),
        }
    }

    /// Keys for `profile`, from the credentials file first and the config
    /// file second. `Ok(None)` when neither file defines them.
    pub fn profile_keys(&self, profile: &str) -> Result<Option<AwsKeys>> {
        for (path, section) in [
            (&self.credentials, profile.to_string()),
            (&self.config, config_section(profile)),
        ] {
            let Some(ini) = load_ini(path)? else {
                continue;
            };
            let Some(props) = ini.section(Some(section.as_str())) else {
                continue;
            };
            let (Some(id), Some(secret)) = (
                props.get("aws_access_key_id"),
                props.get("aws_secret_access_key"),
            ) else {
                continue;
            };
            return Ok(Some(AwsKeys {
                access_key_id: id.trim().to_string(),
                secret_access_key: secret.trim().to_string(),
                session_token: props.get("aws_session_token").map(|t| t.trim().to_string()),
                expires_at: None,
            }));
        }
        Ok(None)
    }

    /// `region` of `profile` in the config file.
    pub fn profile_region(&self, profile: &str) -> Result<Option<String>> {
        let Some(ini) = load_ini(&self.config)? else {
            return Ok(None);
        };
        Ok(ini
            .section(Some(config_section(profile).as_str()))
            .and_then(|props| props.get("region"))
            .map(|region| region.trim().to_string())
            .filter(|region| !region.is_empty()))
    }
}

fn config_section(profile: &str) -> String {
    if profile == DEFAULT_PROFILE {
        profile.to_string()
    } else {
        format!("profile {profile}")
    }
}

fn load_ini(path: &Path) -> Result<Option<Ini>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(auth_error(format!("failed to read {}: {e}", path.display())));
        }
    };
    Ini::load_from_str(&content)
        .map(Some)
        .map_err(|e| auth_error(format!("malformed {}: {e}", path.display())))
}

fn auth_error(message: impl Into<String>) -> ProviderError {
    ProviderError::Auth {
        provider: ProviderTag::Aws,
        message: message.into(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleCredentials {
    code: String,
    access_key_id: String,
    secret_access_key: String,
    token: String,
    expiration: DateTime<Utc>,
}

pub(crate) fn parse_role_credentials(json: &str) -> Result<AwsKeys> {
    let creds: RoleCredentials = serde_json::from_str(json)
        .map_err(|e| auth_error(format!("invalid instance role credentials: {e}")))?;
    if creds.code != "Success" {
        return Err(auth_error(format!(
            "instance metadata returned code {}",
            creds.code
        )));
    }
    Ok(AwsKeys {
        access_key_id: creds.access_key_id,
        secret_access_key: creds.secret_access_key,
        session_token: Some(creds.token),
        expires_at: Some(creds.expiration),
    })
}

/// Resolves [`AwsCredentialSource`] into keys on every signed request.
pub struct CredentialsProvider {
    source: AwsCredentialSource,
    files: SharedConfigFiles,
    imds_endpoint: String,
    client: reqwest::Client,
    cached: Mutex<Option<AwsKeys>>,
}

impl CredentialsProvider {
    pub fn new(source: AwsCredentialSource, files: SharedConfigFiles) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(IMDS_TIMEOUT)
            .build()
            .map_err(|e| auth_error(format!("failed to build metadata client: {e}")))?;
        Ok(Self {
            source,
            files,
            imds_endpoint: DEFAULT_IMDS_ENDPOINT.to_string(),
            client,
            cached: Mutex::new(None),
        })
    }

    pub fn with_imds_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.imds_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn credentials(&self) -> Result<AwsKeys> {
        match &self.source {
            AwsCredentialSource::Static(keys) => Ok(keys.clone()),
            AwsCredentialSource::Profile(profile) => self
                .files
                .profile_keys(profile)?
                .ok_or_else(|| auth_error(format!("profile '{profile}' has no credentials"))),
            AwsCredentialSource::DefaultChain => {
                if let Some(keys) = self.files.profile_keys(DEFAULT_PROFILE)? {
                    return Ok(keys);
                }
                self.instance_role().await
            }
        }
    }

    async fn instance_role(&self) -> Result<AwsKeys> {
        let mut cached = self.cached.lock().await;
        if let Some(keys) = cached.as_ref() {
            if keys.is_fresh(Utc::now()) {
                return Ok(keys.clone());
            }
        }

        let token = self
            .imds_request(
                self.client
                    .put(format!("{}/latest/api/token", self.imds_endpoint))
                    .header("x-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL_SECS),
            )
            .await?;

        let base = format!("{}/latest/meta-data/iam/security-credentials/", self.imds_endpoint);
        let roles = self
            .imds_request(self.client.get(&base).header("x-aws-ec2-metadata-token", &token))
            .await?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| auth_error("no instance role attached"))?
            .to_string();

        let body = self
            .imds_request(
                self.client
                    .get(format!("{base}{role}"))
                    .header("x-aws-ec2-metadata-token", &token),
            )
            .await?;
        let keys = parse_role_credentials(&body)?;
        debug!(role = %role, expires_at = ?keys.expires_at, "Obtained instance role credentials");

        *cached = Some(keys.clone());
        Ok(keys)
    }

    async fn imds_request(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let response = request
            .send()
            .await
            .map_err(|e| auth_error(format!("no credentials found and instance metadata is unreachable: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| auth_error(format!("failed to read instance metadata: {e}")))?;
        if !status.is_success() {
            return Err(auth_error(format!("instance metadata returned {status}")));
        }
        Ok(body)
    }
}
