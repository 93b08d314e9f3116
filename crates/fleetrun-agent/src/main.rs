use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fleetrun_agent::server;
use fleetrun_agent::{AgentSettings, PortalAgent};
use fleetrun_proto::tls::TrustMode;
use fleetrun_proto::DEFAULT_AGENT_PORT;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "fleetrun-agent", version, about = "Serve fleetrun operations on this host")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "FLEETRUN_AGENT_ADDRESS", default_value = "0.0.0.0")]
    address: IpAddr,

    /// Port to listen on
    #[arg(long, env = "FLEETRUN_AGENT_PORT", default_value_t = DEFAULT_AGENT_PORT)]
    port: u16,

    /// Accept any client and present a throwaway certificate
    #[arg(long, env = "FLEETRUN_INSECURE")]
    insecure: bool,

    /// CA bundle that client certificates must chain to
    #[arg(long, env = "FLEETRUN_CA", default_value = "/etc/portal/ca.crt")]
    ca: PathBuf,

    /// Certificate presented to clients
    #[arg(long, env = "FLEETRUN_CERT", default_value = "/etc/portal/portal.crt")]
    cert: PathBuf,

    /// Private key for the certificate
    #[arg(long, env = "FLEETRUN_KEY", default_value = "/etc/portal/portal.key")]
    key: PathBuf,

    /// Log filter, e.g. `debug` or `fleetrun_agent=trace`
    #[arg(long, env = "FLEETRUN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "FLEETRUN_LOG_JSON")]
    json: bool,
}

fn init_tracing(log_level: Option<&str>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("fleetrun_agent=info,info")),
    };

    let builder = FmtSubscriber::builder().with_env_filter(filter);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref(), args.json)?;

    let settings = AgentSettings {
        listen: SocketAddr::new(args.address, args.port),
        trust: TrustMode::resolve(
            args.insecure,
            Some(args.ca),
            Some(args.cert),
            Some(args.key),
        )?,
    };
    let tls = settings.trust.server_config()?;

    let listener = TcpListener::bind(settings.listen).await?;
    info!(
        listen = %settings.listen,
        insecure = settings.trust.is_insecure(),
        "Starting fleetrun agent"
    );

    let agent = Arc::new(PortalAgent::system());
    server::serve(listener, tls, agent, shutdown_signal()).await?;

    Ok(())
}
