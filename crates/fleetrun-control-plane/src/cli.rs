//! Command-line surface of the `fleetrun` binary and its resolution into the
//! settings structs the library consumes.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fleetrun_core::AddressKind;
use fleetrun_proto::tls::{TlsResult, TrustMode};
use fleetrun_proto::{Operation, DEFAULT_AGENT_PORT};
use fleetrun_providers::{
    AwsCredentialSource, AwsKeys, AwsSettings, GcpCredentials, GcpSettings, ProviderSettings,
    ServiceAccountKey,
};

use crate::features::dispatch::service::{DispatchOptions, DEFAULT_CONCURRENCY};
use crate::shared::error::ConfigError;

/// Run operations on cloud instances selected by label
#[derive(Debug, Parser)]
#[command(name = "fleetrun", version, propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Target expression, e.g. `Labels.env == 'prod' && Provider == 'gcp'`
    #[arg(short, long, env = "FLEETRUN_TARGET", default_value = "")]
    pub target: String,

    /// Dial instances on their private address
    #[arg(long, env = "FLEETRUN_USE_PRIVATE_IP")]
    pub use_private_ip: bool,

    /// Agent port
    #[arg(short, long, env = "FLEETRUN_PORT", default_value_t = DEFAULT_AGENT_PORT)]
    pub port: u16,

    /// Per-target deadline (`30s`, `500ms`, `2m` or plain seconds)
    #[arg(long, env = "FLEETRUN_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Maximum number of agents contacted at once
    #[arg(long, env = "FLEETRUN_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Skip agent certificate verification and present no client certificate
    #[arg(long, env = "FLEETRUN_INSECURE")]
    pub insecure: bool,

    /// CA bundle agent certificates must chain to
    #[arg(long, env = "FLEETRUN_CA")]
    pub ca: Option<PathBuf>,

    /// Client certificate
    #[arg(long, env = "FLEETRUN_CERT")]
    pub cert: Option<PathBuf>,

    /// Client private key
    #[arg(long, env = "FLEETRUN_KEY")]
    pub key: Option<PathBuf>,

    /// Name to verify agent certificates against instead of the dialed address
    #[arg(long, env = "FLEETRUN_SERVER_NAME")]
    pub server_name: Option<String>,

    #[command(flatten)]
    pub aws: AwsArgs,

    #[command(flatten)]
    pub gcp: GcpArgs,

    /// Log filter, e.g. `debug` or `fleetrun_providers=trace`
    #[arg(long, env = "FLEETRUN_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "FLEETRUN_LOG_JSON")]
    pub json: bool,

    /// Result format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct AwsArgs {
    /// Defaults to the profile's configured region
    #[arg(long = "aws-region", env = "AWS_REGION")]
    pub region: Option<String>,

    /// Named profile from the shared AWS credentials/config files
    #[arg(long = "aws-profile", env = "AWS_PROFILE")]
    pub profile: Option<String>,

    #[arg(long = "aws-access-key-id", env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long = "aws-secret-access-key", env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    #[arg(long = "aws-session-token", env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    /// Alternative EC2 endpoint
    #[arg(id = "aws_endpoint", long = "aws-endpoint", env = "FLEETRUN_AWS_ENDPOINT")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Args)]
pub struct GcpArgs {
    /// Enables GCP discovery
    #[arg(long = "gcp-project", env = "FLEETRUN_GCP_PROJECT")]
    pub project: Option<String>,

    /// Service account JSON key file
    #[arg(long = "gcp-credentials", env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Pre-issued OAuth2 access token, preferred over `--gcp-credentials`
    #[arg(long = "gcp-access-token", env = "FLEETRUN_GCP_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Alternative Compute Engine endpoint
    #[arg(id = "gcp_endpoint", long = "gcp-endpoint", env = "FLEETRUN_GCP_ENDPOINT")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Control a systemd unit
    #[command(subcommand)]
    Service(ServiceCommand),

    /// Run a program and collect its output
    Run {
        program: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Report load averages
    Cpu,

    /// Read files
    #[command(subcommand)]
    File(FileCommand),

    /// List the instances the target expression selects
    Instances,
}

#[derive(Debug, Subcommand)]
pub enum ServiceCommand {
    Start { name: String },
    Stop { name: String },
    Restart { name: String },
    Status { name: String },
}

#[derive(Debug, Subcommand)]
pub enum FileCommand {
    Read { path: String },
}

impl Command {
    /// The remote operation this command dispatches, `None` for local-only commands.
    pub fn operation(&self) -> Option<Operation> {
        let operation = match self {
            Command::Service(ServiceCommand::Start { name }) => {
                Operation::ServiceStart { name: name.clone() }
            }
            Command::Service(ServiceCommand::Stop { name }) => {
                Operation::ServiceStop { name: name.clone() }
            }
            Command::Service(ServiceCommand::Restart { name }) => {
                Operation::ServiceRestart { name: name.clone() }
            }
            Command::Service(ServiceCommand::Status { name }) => {
                Operation::ServiceStatus { name: name.clone() }
            }
            Command::Run { program, args } => Operation::RunCommand {
                name: program.clone(),
                args: args.clone(),
            },
            Command::Cpu => Operation::CpuUsage,
            Command::File(FileCommand::Read { path }) => Operation::FileRead { path: path.clone() },
            Command::Instances => return None,
        };
        Some(operation)
    }
}

impl GlobalArgs {
    pub fn address_kind(&self) -> AddressKind {
        if self.use_private_ip {
            AddressKind::Private
        } else {
            AddressKind::Public
        }
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            address_kind: self.address_kind(),
            concurrency: self.concurrency,
            timeout: self.timeout,
        }
    }

    pub fn trust_mode(&self) -> TlsResult<TrustMode> {
        TrustMode::resolve(
            self.insecure,
            self.ca.clone(),
            self.cert.clone(),
            self.key.clone(),
        )
    }

    /// AWS is enabled by an access key id, a profile or a region; GCP by a
    /// project. A backend that is enabled but incompletely configured is an
    /// error.
    pub fn provider_settings(&self) -> Result<ProviderSettings, ConfigError> {
        Ok(ProviderSettings {
            aws: self.aws.settings()?,
            gcp: self.gcp.settings()?,
        })
    }
}

impl AwsArgs {
    /// Explicit keys win over a profile; with neither, the default chain
    /// (`default` profile, then the instance role) is used.
    fn settings(&self) -> Result<Option<AwsSettings>, ConfigError> {
        let credentials = match (&self.access_key_id, &self.profile) {
            (Some(access_key_id), _) => {
                let secret_access_key = self
                    .secret_access_key
                    .clone()
                    .ok_or(ConfigError::IncompleteAws("AWS_SECRET_ACCESS_KEY"))?;
                AwsCredentialSource::Static(AwsKeys {
                    session_token: self.session_token.clone(),
                    ..AwsKeys::new(access_key_id.clone(), secret_access_key)
                })
            }
            (None, Some(profile)) => AwsCredentialSource::Profile(profile.clone()),
            (None, None) if self.region.is_some() => AwsCredentialSource::DefaultChain,
            (None, None) => return Ok(None),
        };

        Ok(Some(AwsSettings {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            ..AwsSettings::new(credentials)
        }))
    }
}

impl GcpArgs {
    fn settings(&self) -> Result<Option<GcpSettings>, ConfigError> {
        let Some(project) = self.project.clone() else {
            return Ok(None);
        };

        let credentials = match (&self.access_token, &self.credentials) {
            (Some(token), _) => GcpCredentials::AccessToken(token.clone()),
            (None, Some(path)) => {
                let json = fs::read_to_string(path).map_err(|source| {
                    ConfigError::ReadCredentials {
                        path: path.clone(),
                        source,
                    }
                })?;
                GcpCredentials::ServiceAccount(ServiceAccountKey::from_json(&json)?)
            }
            (None, None) => return Err(ConfigError::MissingGcpCredentials),
        };

        Ok(Some(GcpSettings {
            project,
            credentials,
            endpoint: self.endpoint.clone(),
        }))
    }
}

/// Parses `500ms`, `30s`, `2m` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(index) => value.split_at(index),
        None => (value, "s"),
    };
    let amount: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{value}'"))?;

    let duration = match unit {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount * 60),
        _ => return Err(format!("invalid duration unit in '{value}', expected ms, s or m")),
    };
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}
