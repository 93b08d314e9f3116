//! Operator-facing rendering of dispatch outcomes and instance listings.

use std::fmt::Write as _;

use fleetrun_core::{AddressKind, Instance, Labels, ProviderTag, State};
use fleetrun_proto::{Operation, OperationResponse};
use serde::Serialize;

use crate::features::dispatch::service::{DispatchError, TargetOutcome};

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub instance: String,
    pub provider: ProviderTag,
    pub address: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<OperationResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DispatchError>,
}

/// Summary of one operation across the whole fleet.
#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    pub operation: Operation,
    pub succeeded: usize,
    pub failed: usize,
    pub targets: Vec<TargetReport>,
}

impl FleetReport {
    pub fn new(operation: &Operation, outcomes: &[TargetOutcome], kind: AddressKind) -> Self {
        let targets: Vec<TargetReport> = outcomes
            .iter()
            .map(|outcome| {
                let (response, error) = match &outcome.result {
                    Ok(response) => (Some(response.clone()), None),
                    Err(error) => (None, Some(error.clone())),
                };
                TargetReport {
                    instance: outcome.instance.name().to_string(),
                    provider: outcome.instance.provider(),
                    address: outcome.instance.address(kind).map(str::to_string),
                    success: outcome.is_success(),
                    state: response.as_ref().map(OperationResponse::state),
                    response,
                    error,
                }
            })
            .collect();

        let succeeded = targets.iter().filter(|t| t.success).count();
        Self {
            operation: operation.clone(),
            succeeded,
            failed: targets.len() - succeeded,
            targets,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for target in &self.targets {
            let address = target.address.as_deref().unwrap_or("-");
            let _ = writeln!(out, "{} ({}, {}):", target.instance, target.provider, address);

            let body = match (&target.response, &target.error) {
                (Some(response), _) => response.summary(),
                (None, Some(error)) => format!("ERROR: {error}"),
                (None, None) => String::new(),
            };
            for line in body.lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
        let _ = writeln!(
            out,
            "{}: {} succeeded, {} failed",
            self.operation, self.succeeded, self.failed
        );
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Serialize)]
struct InstanceRow<'a> {
    name: &'a str,
    provider: ProviderTag,
    private_address: &'a str,
    public_address: &'a str,
    labels: &'a Labels,
}

/// One line per instance: name, provider, addresses, then `key=value` labels.
pub fn render_instances_text(instances: &[Instance]) -> String {
    let mut out = String::new();
    for instance in instances {
        let labels = instance
            .labels()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            instance.name(),
            instance.provider(),
            or_dash(instance.private_address()),
            or_dash(instance.public_address()),
            labels
        );
    }
    out
}

pub fn render_instances_json(instances: &[Instance]) -> serde_json::Result<String> {
    let rows: Vec<InstanceRow<'_>> = instances
        .iter()
        .map(|instance| InstanceRow {
            name: instance.name(),
            provider: instance.provider(),
            private_address: instance.private_address(),
            public_address: instance.public_address(),
            labels: instance.labels(),
        })
        .collect();
    serde_json::to_string_pretty(&rows)
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}
