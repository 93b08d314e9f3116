use std::sync::Arc;
use std::time::Duration;

use fleetrun_core::{AddressKind, Instance};
use fleetrun_proto::{Operation, OperationResponse};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tonic::Status;
use tracing::{info, warn};

use crate::features::dispatch::repo::AgentConnector;

pub const DEFAULT_CONCURRENCY: usize = 16;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why one target did not produce a response.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DispatchError {
    #[error("instance has no {address_kind} address")]
    NoAddress { address_kind: AddressKind },
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("no response within {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("agent returned {code}: {message}")]
    Remote { code: String, message: String },
}

impl From<Status> for DispatchError {
    fn from(status: Status) -> Self {
        DispatchError::Remote {
            code: format!("{:?}", status.code()),
            message: status.message().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub address_kind: AddressKind,
    pub concurrency: usize,
    pub timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            address_kind: AddressKind::Public,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Result of one operation against one target.
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub instance: Instance,
    pub result: Result<OperationResponse, DispatchError>,
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct DispatchService {
    connector: Arc<dyn AgentConnector>,
    options: DispatchOptions,
}

impl DispatchService {
    pub fn new(connector: Arc<dyn AgentConnector>, options: DispatchOptions) -> Self {
        Self { connector, options }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Run `operation` against every target with at most `concurrency` calls
    /// in flight. Returns exactly one outcome per target, in target order.
    /// A slow target holds only its own slot; the others keep flowing.
    pub async fn dispatch(&self, targets: Vec<Instance>, operation: &Operation) -> Vec<TargetOutcome> {
        let concurrency = self.options.concurrency.max(1);
        info!(
            targets = targets.len(),
            concurrency,
            operation = %operation,
            "Dispatching operation"
        );

        let mut outcomes: Vec<(usize, TargetOutcome)> =
            stream::iter(targets.into_iter().enumerate())
                .map(|(index, instance)| async move {
                    (index, self.dispatch_one(instance, operation).await)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn dispatch_one(&self, instance: Instance, operation: &Operation) -> TargetOutcome {
        let kind = self.options.address_kind;
        let result = match instance.address(kind) {
            None => Err(DispatchError::NoAddress { address_kind: kind }),
            Some(address) => {
                match tokio::time::timeout(
                    self.options.timeout,
                    self.connector.call(address, operation),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::Timeout(self.options.timeout)),
                }
            }
        };

        match &result {
            Ok(response) => info!(
                instance = %instance.name(),
                method = operation.method(),
                state = %response.state(),
                "Operation completed"
            ),
            Err(error) => warn!(
                instance = %instance.name(),
                method = operation.method(),
                error = %error,
                "Operation failed"
            ),
        }

        TargetOutcome { instance, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetrun_core::{Labels, ProviderTag, State};
    use fleetrun_proto::ServiceResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every address except `broken`, which refuses connections.
    struct StubConnector {
        broken: &'static str,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl StubConnector {
        fn new(broken: &'static str) -> Self {
            Self {
                broken,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AgentConnector for StubConnector {
        async fn call(
            &self,
            address: &str,
            _operation: &Operation,
        ) -> Result<OperationResponse, DispatchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if address == self.broken {
                return Err(DispatchError::Connect("connection refused".to_string()));
            }
            Ok(OperationResponse::Service(ServiceResponse {
                state: State::Changed,
                message: format!("started on {address}"),
            }))
        }
    }

    struct HangingConnector;

    #[async_trait]
    impl AgentConnector for HangingConnector {
        async fn call(
            &self,
            _address: &str,
            _operation: &Operation,
        ) -> Result<OperationResponse, DispatchError> {
            std::future::pending().await
        }
    }

    fn target(name: &str, private: &str, public: &str) -> Instance {
        Instance::new(name, private, public, Labels::new(), ProviderTag::Aws).unwrap()
    }

    fn fleet(size: usize) -> Vec<Instance> {
        (0..size)
            .map(|i| target(&format!("web-{i}"), &format!("10.0.0.{i}"), &format!("34.0.0.{i}")))
            .collect()
    }

    fn start_nginx() -> Operation {
        Operation::ServiceStart {
            name: "nginx.service".to_string(),
        }
    }

    #[tokio::test]
    async fn test_one_broken_target_yields_one_failure() {
        let connector = Arc::new(StubConnector::new("34.0.0.3"));
        let service = DispatchService::new(connector, DispatchOptions::default());

        let outcomes = service.dispatch(fleet(7), &start_nginx()).await;

        assert_eq!(outcomes.len(), 7);
        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.instance.name())
            .collect();
        assert_eq!(failed, vec!["web-3"]);
        assert_eq!(
            outcomes[3].result,
            Err(DispatchError::Connect("connection refused".to_string()))
        );
    }

    #[tokio::test]
    async fn test_outcomes_follow_target_order() {
        let service = DispatchService::new(
            Arc::new(StubConnector::new("")),
            DispatchOptions {
                concurrency: 3,
                ..DispatchOptions::default()
            },
        );

        let outcomes = service.dispatch(fleet(10), &start_nginx()).await;
        let names: Vec<String> = outcomes.iter().map(|o| o.instance.name().to_string()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("web-{i}")).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let connector = Arc::new(StubConnector::new(""));
        let service = DispatchService::new(
            connector.clone(),
            DispatchOptions {
                concurrency: 2,
                ..DispatchOptions::default()
            },
        );

        service.dispatch(fleet(8), &Operation::CpuUsage).await;
        let max = connector.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 2, "observed {max} concurrent calls");
        assert!(max >= 1);
    }

    #[tokio::test]
    async fn test_private_address_selection() {
        let service = DispatchService::new(
            Arc::new(StubConnector::new("34.0.0.1")),
            DispatchOptions {
                address_kind: AddressKind::Private,
                ..DispatchOptions::default()
            },
        );

        let outcomes = service.dispatch(fleet(2), &start_nginx()).await;
        assert!(outcomes.iter().all(TargetOutcome::is_success));
        match &outcomes[1].result {
            Ok(OperationResponse::Service(res)) => assert_eq!(res.message, "started on 10.0.0.1"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_address_is_that_targets_error() {
        let service = DispatchService::new(
            Arc::new(StubConnector::new("")),
            DispatchOptions::default(),
        );
        let targets = vec![target("private-only", "10.0.0.9", ""), target("web", "", "34.1.1.1")];

        let outcomes = service.dispatch(targets, &Operation::CpuUsage).await;
        assert_eq!(
            outcomes[0].result,
            Err(DispatchError::NoAddress {
                address_kind: AddressKind::Public
            })
        );
        assert!(outcomes[1].is_success());
    }

    #[tokio::test]
    async fn test_hanging_agent_times_out() {
        let service = DispatchService::new(
            Arc::new(HangingConnector),
            DispatchOptions {
                timeout: Duration::from_millis(50),
                ..DispatchOptions::default()
            },
        );

        let outcomes = service.dispatch(fleet(3), &Operation::CpuUsage).await;
        assert_eq!(outcomes.len(), 3);
        for outcome in outcomes {
            assert_eq!(outcome.result, Err(DispatchError::Timeout(Duration::from_millis(50))));
        }
    }

    /// Records the order in which calls finish; `slow` takes much longer.
    struct RecordingConnector {
        slow: &'static str,
        finished: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AgentConnector for RecordingConnector {
        async fn call(
            &self,
            address: &str,
            _operation: &Operation,
        ) -> Result<OperationResponse, DispatchError> {
            let delay = if address == self.slow { 300 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.finished.lock().unwrap().push(address.to_string());
            Ok(OperationResponse::CpuUsage(fleetrun_proto::CpuUsageResponse {
                load_avg1: 0,
                load_avg5: 0,
                load_avg15: 0,
            }))
        }
    }

    #[tokio::test]
    async fn test_slow_head_target_does_not_block_the_rest() {
        let connector = Arc::new(RecordingConnector {
            slow: "34.0.0.0",
            finished: std::sync::Mutex::new(Vec::new()),
        });
        let service = DispatchService::new(
            connector.clone(),
            DispatchOptions {
                concurrency: 2,
                ..DispatchOptions::default()
            },
        );

        let outcomes = service.dispatch(fleet(6), &Operation::CpuUsage).await;

        let finished = connector.finished.lock().unwrap().clone();
        assert_eq!(finished.len(), 6);
        assert_eq!(finished.last().map(String::as_str), Some("34.0.0.0"));

        let names: Vec<&str> = outcomes.iter().map(|o| o.instance.name()).collect();
        assert_eq!(names, vec!["web-0", "web-1", "web-2", "web-3", "web-4", "web-5"]);
        assert!(outcomes.iter().all(TargetOutcome::is_success));
    }

    #[test]
    fn test_status_maps_to_remote_error() {
        let err = DispatchError::from(Status::not_found("unit nope.service not found"));
        assert_eq!(
            err,
            DispatchError::Remote {
                code: "NotFound".to_string(),
                message: "unit nope.service not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_dispatches() {
        let service = DispatchService::new(
            Arc::new(StubConnector::new("")),
            DispatchOptions {
                concurrency: 0,
                ..DispatchOptions::default()
            },
        );
        let outcomes = service.dispatch(fleet(2), &Operation::CpuUsage).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(TargetOutcome::is_success));
    }
}
