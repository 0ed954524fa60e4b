// Exclusive worker: walks the shared task list, one gate per task

use crate::gate::{ExclusiveTaskGate, TaskOutcome};
use crate::lease::{LeaseId, LeaseSpec};
use crate::store::CoordinationStore;
use crate::task::Task;
use crate::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default prefix of every lock key
pub const DEFAULT_NAMESPACE: &str = "service";

/// Lock record key for a task: `{namespace}/{task_id}/leader`
pub fn lock_key(namespace: &str, task_id: &str) -> String {
    let namespace = namespace.trim_matches('/');
    let task_id = task_id.trim_matches('/');
    if namespace.is_empty() {
        format!("{}/leader", task_id)
    } else {
        format!("{}/{}/leader", namespace, task_id)
    }
}

#[derive(Debug)]
pub struct TaskReport {
    pub task: String,
    pub key: String,
    pub outcome: TaskOutcome,
    /// The attempt's lease was destroyed rather than left to expire
    pub lease_released: bool,
}

/// Result of one pass over the task list
#[derive(Debug, Default)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
    /// The run was stopped before every task was evaluated
    pub interrupted: bool,
}

impl RunReport {
    pub fn leader_count(&self) -> usize {
        self.tasks.iter().filter(|r| r.outcome.was_leader()).count()
    }

    pub fn failures(&self) -> usize {
        self.tasks.iter().filter(|r| !r.outcome.is_success()).count()
    }

    /// Attempts whose lease could not be destroyed
    pub fn release_failures(&self) -> usize {
        self.tasks.iter().filter(|r| !r.lease_released).count()
    }
}

pub struct ExclusiveWorker {
    store: Arc<dyn CoordinationStore>,
    spec: LeaseSpec,
    namespace: String,
    shutdown: CancellationToken,
}

impl ExclusiveWorker {
    pub fn new(store: Arc<dyn CoordinationStore>, spec: LeaseSpec, namespace: impl Into<String>) -> Self {
        Self {
            store,
            spec,
            namespace: namespace.into(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled by [`ExclusiveWorker::stop`]; hand it to a signal handler
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Abort the running task, release its lease and skip the rest
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn key_for(&self, task_id: &str) -> String {
        lock_key(&self.namespace, task_id)
    }

    /// Evaluate every task once, in order.
    ///
    /// Not leading a task, or a task failing, never stops the pass. A store
    /// fault while setting up a lease aborts it with that error.
    pub async fn run(&self, tasks: &[Arc<dyn Task>]) -> Result<RunReport> {
        let mut report = RunReport::default();

        for task in tasks {
            if self.shutdown.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let key = self.key_for(task.id());
            let spec = self.spec.clone().with_name(format!("solo/{}", task.id()));
            let mut gate = ExclusiveTaskGate::new(self.store.clone(), spec, key.clone());

            let outcome = gate.run(task.as_ref(), &self.shutdown).await?;
            let lease_released = gate.lease_released();
            match &outcome {
                TaskOutcome::NotLeader => info!("{}: not leader, skipping", key),
                TaskOutcome::Completed => info!("{}: leader, task completed", key),
                TaskOutcome::Aborted if lease_released => {
                    warn!("{}: interrupted, lease released", key);
                    report.interrupted = true;
                }
                TaskOutcome::Aborted => {
                    warn!("{}: interrupted, lease left to expire", key);
                    report.interrupted = true;
                }
                other => warn!("{}: leader, {}", key, other),
            }

            report.tasks.push(TaskReport {
                task: task.id().to_string(),
                key,
                outcome,
                lease_released,
            });
        }

        if self.shutdown.is_cancelled() {
            report.interrupted = true;
        }
        Ok(report)
    }

    /// Who holds the task's lock right now, without competing for it
    pub async fn leader(&self, task_id: &str) -> Result<Option<LeaseId>> {
        let record = self.store.kv_get(&self.key_for(task_id)).await?;
        Ok(record.and_then(|pair| pair.session))
    }
}
