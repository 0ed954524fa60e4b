// Exclusive task gate
//
// One gate per task key and attempt. The gate creates a lease, races for the
// key's lock record and, only if it wins, runs the task while a background
// loop keeps the lease alive. Whatever happens, the lease is destroyed once.

use crate::lease::{LeaseManager, LeaseSpec, RenewalSignal};
use crate::store::CoordinationStore;
use crate::task::Task;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where a task attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    SessionReady,
    NotLeader,
    Leader,
    Running,
    Aborting,
    Done,
}

/// How a task attempt ended
#[derive(Debug)]
pub enum TaskOutcome {
    /// Another worker holds the key
    NotLeader,
    /// We led and the task finished cleanly
    Completed,
    /// We led and the task returned an error
    Failed(Error),
    /// Renewal failed, so we stopped acting as leader
    LeadershipLost(Error),
    /// Interrupted before the task finished
    Aborted,
}

impl TaskOutcome {
    pub fn was_leader(&self) -> bool {
        !matches!(self, TaskOutcome::NotLeader)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::NotLeader | TaskOutcome::Completed)
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::NotLeader => write!(f, "not leader"),
            TaskOutcome::Completed => write!(f, "completed"),
            TaskOutcome::Failed(e) => write!(f, "failed: {}", e),
            TaskOutcome::LeadershipLost(e) => write!(f, "leadership lost: {}", e),
            TaskOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// Closes the renewal signal and destroys the lease.
///
/// `release` is the normal path. If the guard is dropped while still armed
/// (panicking task, gate future dropped) the destroy is spawned on the
/// current runtime instead.
struct LeaseGuard {
    manager: Arc<LeaseManager>,
    signal: RenewalSignal,
    armed: bool,
}

impl LeaseGuard {
    fn new(manager: Arc<LeaseManager>) -> Self {
        Self {
            manager,
            signal: RenewalSignal::new(),
            armed: true,
        }
    }

    async fn release(mut self) -> Result<()> {
        self.signal.close();
        let result = self.manager.destroy().await;
        self.armed = false;
        result
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.signal.close();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.manager.clone();
                handle.spawn(async move {
                    if let Err(e) = manager.destroy().await {
                        warn!("deferred lease destroy failed: {}", e);
                    }
                });
            }
            Err(_) => warn!(
                "no runtime to destroy lease {:?}; the store will expire it",
                self.manager.lease_id()
            ),
        }
    }
}

pub struct ExclusiveTaskGate {
    store: Arc<dyn CoordinationStore>,
    spec: LeaseSpec,
    key: String,
    state: GateState,
    lease_released: bool,
}

impl ExclusiveTaskGate {
    pub fn new(store: Arc<dyn CoordinationStore>, spec: LeaseSpec, key: impl Into<String>) -> Self {
        Self {
            store,
            spec,
            key: key.into(),
            state: GateState::Idle,
            lease_released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Whether the last attempt's lease was destroyed in the store. `false`
    /// means it is left to expire on its TTL.
    pub fn lease_released(&self) -> bool {
        self.lease_released
    }

    fn transition(&mut self, next: GateState) {
        debug!("{}: {:?} -> {:?}", self.key, self.state, next);
        self.state = next;
    }

    /// Run one attempt of `task` under the key's lock.
    ///
    /// `Err` only for store faults while creating the lease or acquiring the
    /// key; every other ending is a [`TaskOutcome`]. Cancelling `cancel`
    /// aborts a running task. The lease created here is destroyed before
    /// this returns, on every path.
    pub async fn run(&mut self, task: &dyn Task, cancel: &CancellationToken) -> Result<TaskOutcome> {
        self.state = GateState::Idle;
        self.lease_released = false;

        let manager = Arc::new(LeaseManager::new(self.store.clone(), self.spec.clone()));
        let lease_id = manager.create().await?;
        self.transition(GateState::SessionReady);
        let guard = LeaseGuard::new(manager.clone());

        let held = match manager.acquire(&self.key, lease_id.as_str().as_bytes()).await {
            Ok(held) => held,
            Err(e) => {
                self.finish(guard).await;
                return Err(e);
            }
        };

        if !held {
            self.transition(GateState::NotLeader);
            self.finish(guard).await;
            return Ok(TaskOutcome::NotLeader);
        }
        self.transition(GateState::Leader);

        let mut renewal = tokio::spawn({
            let manager = manager.clone();
            let signal = guard.signal.clone();
            async move { manager.renew_periodically(signal).await }
        });
        self.transition(GateState::Running);

        let (outcome, renewal_finished) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.transition(GateState::Aborting);
                (TaskOutcome::Aborted, false)
            }
            joined = &mut renewal => {
                let err = match joined {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => Error::StoreUnavailable("renewal stopped unexpectedly".to_string()),
                    Err(e) => Error::StoreUnavailable(format!("renewal task ended: {}", e)),
                };
                warn!("{}: lost leadership: {}", self.key, err);
                (TaskOutcome::LeadershipLost(err), true)
            }
            result = task.run() => {
                let outcome = match result {
                    Ok(()) => TaskOutcome::Completed,
                    Err(source) => TaskOutcome::Failed(Error::TaskFailure {
                        task: task.id().to_string(),
                        source,
                    }),
                };
                (outcome, false)
            }
        };

        if self.state == GateState::Running {
            self.transition(GateState::Leader);
        }

        guard.signal.close();
        if !renewal_finished {
            match renewal.await {
                Ok(Err(e)) => debug!("{}: renewal ended with {}", self.key, e),
                Err(e) => warn!("{}: renewal task ended: {}", self.key, e),
                Ok(Ok(())) => {}
            }
        }

        self.finish(guard).await;
        Ok(outcome)
    }

    async fn finish(&mut self, guard: LeaseGuard) {
        match guard.release().await {
            Ok(()) => self.lease_released = true,
            Err(e) => warn!("{}: could not destroy lease, the store will expire it: {}", self.key, e),
        }
        self.transition(GateState::Done);
    }
}
