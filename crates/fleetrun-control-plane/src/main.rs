use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use fleetrun_control_plane::cli::{Cli, OutputFormat};
use fleetrun_control_plane::report::{render_instances_json, render_instances_text, FleetReport};
use fleetrun_control_plane::shared::error::{error_chain, ControlPlaneResult};
use fleetrun_control_plane::{DispatchService, TargetSelectionService, TlsAgentConnector};
use fleetrun_core::compile;
use fleetrun_providers::ProviderRegistry;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn init_tracing(log_level: Option<&str>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("fleetrun=info,fleetrun_control_plane=info,warn")),
    };

    // Results go to stdout; logs stay on stderr.
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Returns whether every target succeeded.
async fn run(cli: Cli) -> ControlPlaneResult<bool> {
    let global = &cli.global;
    let filter = compile(&global.target)?;
    let operation = cli.command.operation();

    // Resolve TLS before discovery so bad certificate paths fail fast.
    let client_tls = match &operation {
        Some(_) => Some(global.trust_mode()?.client_config()?),
        None => None,
    };

    let settings = global.provider_settings()?;
    let registry = ProviderRegistry::from_settings(&settings)?;
    info!(providers = ?registry.tags(), "Discovering instances");

    let selection = TargetSelectionService::new(Arc::new(registry));
    let targets = selection.select(&filter).await?;

    let (Some(operation), Some(client_tls)) = (operation, client_tls) else {
        let rendered = match global.output {
            OutputFormat::Text => render_instances_text(&targets),
            OutputFormat::Json => render_instances_json(&targets)?,
        };
        print!("{rendered}");
        return Ok(true);
    };

    let options = global.dispatch_options();
    let connector = TlsAgentConnector::new(
        client_tls,
        global.port,
        global.server_name.clone(),
        options.timeout,
    );
    let address_kind = options.address_kind;
    let dispatcher = DispatchService::new(Arc::new(connector), options);
    let outcomes = dispatcher.dispatch(targets, &operation).await;

    let report = FleetReport::new(&operation, &outcomes, address_kind);
    match global.output {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(!report.has_failures())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.global.log_level.as_deref(), cli.global.json) {
        eprintln!("fleetrun: failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("fleetrun: {}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}
