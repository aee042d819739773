//! The Applier: executes a [`Plan`] with bounded, dependency-respecting
//! parallelism, retries, progress reporting, and cooperative cancellation.

pub mod progress;

pub use progress::{NoopProgressSink, Phase, ProgressEvent, ProgressSink};

use crate::cancellation::CancellationToken;
use crate::config::RuntimeConfig;
use crate::engine::Engine;
use crate::errors::{Error, Result};
use crate::fileset::FilesetEngine;
use crate::identifier::Identifier;
use crate::manifest::Manifest;
use crate::planner::{Action, Kind, Operation, Plan};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::warn;

type TargetKey = (Kind, String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpStatus {
    Pending,
    Running,
    Ok,
    Failed,
    Skipped,
}

/// Outcome recorded for one [`Operation`] after an apply run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    /// The operation this outcome belongs to.
    pub operation: Operation,
    /// Terminal status.
    pub status: OutcomeStatus,
    /// Error detail, when `status` is `Failed`.
    pub error: Option<String>,
}

/// Terminal status of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Completed successfully (or was already a noop).
    Ok,
    /// Failed after exhausting retries.
    Failed,
    /// Never attempted: a dependency failed.
    Skipped,
}

/// Result of applying a whole [`Plan`] to completion (never returned for a
/// cancelled run; see [`Applier::apply`]).
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// Per-operation outcomes, in completion order.
    pub operations: Vec<OperationOutcome>,
}

impl ApplyOutcome {
    /// True if every operation succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.operations.iter().all(|o| o.status == OutcomeStatus::Ok)
    }
}

/// Executes a [`Plan`] against an [`Engine`].
pub struct Applier<'a> {
    engine: &'a dyn Engine,
    manifest: &'a Manifest,
    config: &'a RuntimeConfig,
    identifier: &'a Identifier,
    sink: &'a dyn ProgressSink,
    cancellation: &'a CancellationToken,
}

impl<'a> Applier<'a> {
    /// Build an applier bound to an engine, the manifest it reconciles, the
    /// active tunables, and the sink/token a caller supplies for the
    /// duration of one apply run.
    #[must_use]
    pub fn new(
        engine: &'a dyn Engine,
        manifest: &'a Manifest,
        config: &'a RuntimeConfig,
        identifier: &'a Identifier,
        sink: &'a dyn ProgressSink,
        cancellation: &'a CancellationToken,
    ) -> Self {
        Self {
            engine,
            manifest,
            config,
            identifier,
            sink,
            cancellation,
        }
    }

    /// Execute every non-noop operation in `plan`, honoring its dependency
    /// graph, bounded concurrency, retries, and cancellation.
    pub async fn apply(&self, plan: &Plan) -> Result<ApplyOutcome> {
        let operations: Vec<Operation> = plan
            .all_operations()
            .into_iter()
            .filter(|op| op.action != Action::Noop)
            .cloned()
            .collect();

        let mut status: HashMap<TargetKey, OpStatus> = operations
            .iter()
            .map(|op| (op.target.key(), OpStatus::Pending))
            .collect();

        let overall = Semaphore::new(self.config.parallelism.max(1));
        let compose = Semaphore::new(self.config.compose_semaphore.max(1));
        let mut volume_semaphores: HashMap<String, Semaphore> = HashMap::new();
        for fileset in &self.manifest.filesets {
            volume_semaphores
                .entry(fileset.target_volume.clone())
                .or_insert_with(|| Semaphore::new(self.config.helper_semaphore_per_volume.max(1)));
        }
        let fileset_volume: HashMap<&str, &str> = self
            .manifest
            .filesets
            .iter()
            .map(|f| (f.name.as_str(), f.target_volume.as_str()))
            .collect();

        let mut outcomes = Vec::with_capacity(operations.len());
        let mut in_flight: FuturesUnordered<
            std::pin::Pin<Box<dyn std::future::Future<Output = (TargetKey, Result<()>)> + Send + '_>>,
        > = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            if self.cancellation.is_cancelled() {
                cancelled = true;
                break;
            }

            for op in &operations {
                let key = op.target.key();
                if status[&key] != OpStatus::Pending {
                    continue;
                }
                if !op.deps.iter().all(|dep| status.get(dep) == Some(&OpStatus::Ok)) {
                    continue;
                }
                *status.get_mut(&key).unwrap() = OpStatus::Running;
                self.sink.report(ProgressEvent {
                    operation: describe(op),
                    phase: Phase::Start,
                    message: None,
                });

                let volume_sem = fileset_volume
                    .get(op.target.name.as_str())
                    .and_then(|v| volume_semaphores.get(*v));
                in_flight.push(Box::pin(self.run_operation(op, &overall, &compose, volume_sem)));
            }

            let Some((key, result)) = in_flight.next().await else {
                break;
            };
            self.record_completion(key, result, &operations, &mut status, &mut outcomes);
        }

        if cancelled {
            // Subprocesses already in flight were signalled to terminate
            // (see `ProcessExecutor`); give them `cancellation_grace` to
            // unwind and report their real outcome before forcibly
            // detaching whatever is still running.
            let grace = self.config.cancellation_grace;
            let drained = tokio::time::timeout(grace, async {
                while let Some((key, result)) = in_flight.next().await {
                    self.record_completion(key, result, &operations, &mut status, &mut outcomes);
                }
            })
            .await;
            if drained.is_err() {
                warn!(
                    grace_seconds = grace.as_secs(),
                    "cancellation grace period elapsed with operations still in flight; detaching"
                );
            }

            let mut incomplete = 0;
            for op in &operations {
                match status[&op.target.key()] {
                    OpStatus::Running => {
                        incomplete += 1;
                        outcomes.push(OperationOutcome {
                            operation: op.clone(),
                            status: OutcomeStatus::Failed,
                            error: Some("cancelled".to_string()),
                        });
                    }
                    OpStatus::Pending => {
                        incomplete += 1;
                        outcomes.push(OperationOutcome {
                            operation: op.clone(),
                            status: OutcomeStatus::Skipped,
                            error: Some("cancelled".to_string()),
                        });
                    }
                    _ => {}
                }
            }

            return Err(Error::internal(
                "apply",
                format!("cancelled with {incomplete} operation(s) incomplete"),
            ));
        }

        Ok(ApplyOutcome { operations: outcomes })
    }

    fn record_completion(
        &self,
        key: TargetKey,
        result: Result<()>,
        operations: &[Operation],
        status: &mut HashMap<TargetKey, OpStatus>,
        outcomes: &mut Vec<OperationOutcome>,
    ) {
        let op = operations.iter().find(|o| o.target.key() == key).unwrap();
        match result {
            Ok(()) => {
                *status.get_mut(&key).unwrap() = OpStatus::Ok;
                self.sink.report(ProgressEvent {
                    operation: describe(op),
                    phase: Phase::Ok,
                    message: None,
                });
                outcomes.push(OperationOutcome {
                    operation: op.clone(),
                    status: OutcomeStatus::Ok,
                    error: None,
                });
            }
            Err(e) => {
                *status.get_mut(&key).unwrap() = OpStatus::Failed;
                self.sink.report(ProgressEvent {
                    operation: describe(op),
                    phase: Phase::Fail,
                    message: Some(e.to_string()),
                });
                outcomes.push(OperationOutcome {
                    operation: op.clone(),
                    status: OutcomeStatus::Failed,
                    error: Some(e.to_string()),
                });
                skip_dependents(operations, status, &key, self.sink, outcomes);
            }
        }
    }

    async fn run_operation(
        &self,
        op: &Operation,
        overall: &Semaphore,
        compose: &Semaphore,
        volume_sem: Option<&Semaphore>,
    ) -> (TargetKey, Result<()>) {
        let key = op.target.key();
        let _overall_permit = overall.acquire().await.expect("semaphore never closed");
        let result = self.execute_with_retry(op, compose, volume_sem).await;
        (key, result)
    }

    async fn execute_with_retry(
        &self,
        op: &Operation,
        compose: &Semaphore,
        volume_sem: Option<&Semaphore>,
    ) -> Result<()> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let outcome = self.execute_once(op, compose, volume_sem).await;
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    warn!(operation = %describe(op), attempt, "retrying after transient error");
                    self.sink.report(ProgressEvent {
                        operation: describe(op),
                        phase: Phase::Retry,
                        message: Some(e.to_string()),
                    });
                    sleep(retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute_once(
        &self,
        op: &Operation,
        compose: &Semaphore,
        volume_sem: Option<&Semaphore>,
    ) -> Result<()> {
        let mut labels = HashMap::new();
        labels.insert(
            crate::labels::IDENTIFIER.to_string(),
            self.identifier.as_str().to_string(),
        );

        match op.target.kind {
            Kind::Network => match op.action {
                Action::Create => self.engine.create_network(&op.target.name, &labels).await,
                Action::Delete => self.engine.remove_network(&op.target.name).await,
                _ => Ok(()),
            },
            Kind::Volume => match op.action {
                Action::Create => self.engine.create_volume(&op.target.name, &labels).await,
                Action::Delete => self.engine.remove_volume(&op.target.name).await,
                _ => Ok(()),
            },
            Kind::Fileset => {
                let _permit = match volume_sem {
                    Some(sem) => Some(sem.acquire().await.expect("semaphore never closed")),
                    None => None,
                };
                let fileset = self
                    .manifest
                    .filesets
                    .iter()
                    .find(|f| f.name == op.target.name)
                    .ok_or_else(|| Error::internal("apply fileset", format!("unknown fileset {}", op.target.name)))?;
                let engine = FilesetEngine::new(self.engine, self.config, self.identifier);
                engine.sync(fileset).await.map(|_| ())
            }
            Kind::Service => {
                let _permit = compose.acquire().await.expect("semaphore never closed");
                let stack = self
                    .manifest
                    .stack(&op.target.stack)
                    .ok_or_else(|| Error::internal("apply service", format!("unknown stack {}", op.target.stack)))?;
                match op.action {
                    Action::Create | Action::Recreate => {
                        self.engine
                            .compose_up(stack, &[op.target.name.clone()], &stack.inline_env, &labels)
                            .await
                    }
                    Action::Delete => {
                        self.engine.compose_down(stack, &[op.target.name.clone()]).await
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}

fn skip_dependents(
    operations: &[Operation],
    status: &mut HashMap<TargetKey, OpStatus>,
    failed_key: &TargetKey,
    sink: &dyn ProgressSink,
    outcomes: &mut Vec<OperationOutcome>,
) {
    let mut frontier = vec![failed_key.clone()];
    while let Some(key) = frontier.pop() {
        for op in operations {
            let dep_key = op.target.key();
            if status.get(&dep_key) == Some(&OpStatus::Pending) && op.deps.contains(&key) {
                status.insert(dep_key.clone(), OpStatus::Skipped);
                sink.report(ProgressEvent {
                    operation: describe(op),
                    phase: Phase::Skip,
                    message: Some("dependency failed".to_string()),
                });
                outcomes.push(OperationOutcome {
                    operation: op.clone(),
                    status: OutcomeStatus::Skipped,
                    error: Some("dependency failed".to_string()),
                });
                frontier.push(dep_key);
            }
        }
    }
}

fn describe(op: &Operation) -> String {
    if op.target.stack.is_empty() {
        format!("{:?} {}", op.target.kind, op.target.name)
    } else {
        format!("{:?} {}/{}", op.target.kind, op.target.stack, op.target.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::manifest::{Manifest, Network, Volume};
    use crate::planner::{Action, Kind, Target};
    use crate::testing::FakeEngine;

    fn manifest() -> Manifest {
        Manifest {
            identifier: Identifier::new("demo").unwrap(),
            stacks: vec![],
            networks: vec![Network {
                name: "net-a".to_string(),
            }],
            volumes: vec![Volume {
                name: "data".to_string(),
            }],
            filesets: vec![],
        }
    }

    #[tokio::test]
    async fn creates_independent_networks_and_volumes() {
        let engine = FakeEngine::new();
        let manifest = manifest();
        let config = RuntimeConfig::sequential();
        let identifier = manifest.identifier.clone();
        let sink = NoopProgressSink;
        let token = CancellationToken::new();
        let applier = Applier::new(&engine, &manifest, &config, &identifier, &sink, &token);

        let plan = Plan {
            networks: vec![Operation {
                target: Target {
                    kind: Kind::Network,
                    stack: String::new(),
                    name: "net-a".to_string(),
                },
                action: Action::Create,
                reason: "absent".to_string(),
                deps: Vec::new(),
            }],
            volumes: vec![Operation {
                target: Target {
                    kind: Kind::Volume,
                    stack: String::new(),
                    name: "data".to_string(),
                },
                action: Action::Create,
                reason: "absent".to_string(),
                deps: Vec::new(),
            }],
            ..Default::default()
        };

        let outcome = applier.apply(&plan).await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(engine.list_networks(&crate::engine::LabelFilter::default()).await.unwrap(), vec!["net-a"]);
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependent_operation() {
        let engine = FakeEngine::new();
        let manifest = manifest();
        let config = RuntimeConfig::sequential();
        let identifier = manifest.identifier.clone();
        let sink = NoopProgressSink;
        let token = CancellationToken::new();
        let applier = Applier::new(&engine, &manifest, &config, &identifier, &sink, &token);

        let vol_key = (Kind::Volume, String::new(), "data".to_string());
        let plan = Plan {
            volumes: vec![Operation {
                target: Target {
                    kind: Kind::Volume,
                    stack: String::new(),
                    name: "missing-for-delete".to_string(),
                },
                action: Action::Delete,
                reason: "force failure".to_string(),
                deps: Vec::new(),
            }],
            filesets: vec![Operation {
                target: Target {
                    kind: Kind::Fileset,
                    stack: String::new(),
                    name: "assets".to_string(),
                },
                action: Action::Update,
                reason: "depends on volume".to_string(),
                deps: vec![(Kind::Volume, String::new(), "missing-for-delete".to_string())],
            }],
            ..Default::default()
        };
        let _ = vol_key;

        let outcome = applier.apply(&plan).await.unwrap();
        assert!(!outcome.succeeded());
        let fileset_outcome = outcome
            .operations
            .iter()
            .find(|o| o.operation.target.name == "assets")
            .unwrap();
        assert_eq!(fileset_outcome.status, OutcomeStatus::Skipped);
    }

    #[tokio::test]
    async fn pre_cancelled_token_returns_error_without_running_anything() {
        let engine = FakeEngine::new();
        let manifest = manifest();
        let config = RuntimeConfig::sequential();
        let identifier = manifest.identifier.clone();
        let sink = NoopProgressSink;
        let token = CancellationToken::new();
        token.cancel();
        let applier = Applier::new(&engine, &manifest, &config, &identifier, &sink, &token);

        let plan = Plan {
            volumes: vec![Operation {
                target: Target {
                    kind: Kind::Volume,
                    stack: String::new(),
                    name: "data".to_string(),
                },
                action: Action::Create,
                reason: "absent".to_string(),
                deps: Vec::new(),
            }],
            ..Default::default()
        };

        let err = applier.apply(&plan).await.unwrap_err();
        assert!(err.to_string().contains("1 operation"));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_marks_running_failed_and_unstarted_skipped() {
        let engine = FakeEngine::new();
        engine.set_create_volume_delay(std::time::Duration::from_millis(200));
        let manifest = manifest();
        let mut config = RuntimeConfig::sequential();
        config.cancellation_grace = std::time::Duration::from_millis(20);
        let identifier = manifest.identifier.clone();
        let sink = NoopProgressSink;
        let token = CancellationToken::new();
        let applier = Applier::new(&engine, &manifest, &config, &identifier, &sink, &token);

        // The network depends on the volume purely to keep it `Pending`
        // (never dispatched) while the volume is mid-flight, so the two
        // branches of the cancellation tail are both exercised.
        let plan = Plan {
            volumes: vec![Operation {
                target: Target {
                    kind: Kind::Volume,
                    stack: String::new(),
                    name: "data".to_string(),
                },
                action: Action::Create,
                reason: "absent".to_string(),
                deps: Vec::new(),
            }],
            networks: vec![Operation {
                target: Target {
                    kind: Kind::Network,
                    stack: String::new(),
                    name: "net-a".to_string(),
                },
                action: Action::Create,
                reason: "absent".to_string(),
                deps: vec![(Kind::Volume, String::new(), "data".to_string())],
            }],
            ..Default::default()
        };

        let cancel_token = token.clone();
        tokio::spawn(async move {
            sleep(std::time::Duration::from_millis(30)).await;
            cancel_token.cancel();
        });

        let err = applier.apply(&plan).await.unwrap_err();
        assert!(err.to_string().contains("2 operation"));
        // The volume create was dispatched and genuinely attempted...
        assert!(engine.calls().iter().any(|c| c == "create_volume(data)"));
        // ...but its dependent network never got far enough to run.
        assert!(!engine.calls().iter().any(|c| c.starts_with("create_network")));
    }
}
