pub use std::{sync::Arc, time::Duration};

pub use tokio_util::sync::CancellationToken;

pub use crate::config::Config;
pub use crate::gate::{ExclusiveTaskGate, GateState, TaskOutcome};
pub use crate::lease::{ExpiryBehavior, LeaseId, LeaseManager, LeaseSpec, RenewalSignal};
pub use crate::store::{ConsulStore, CoordinationStore, InMemoryStore, KvPair};
pub use crate::task::{CommandTask, SleepTask, Task};
pub use crate::worker::{lock_key, ExclusiveWorker, RunReport};
pub use crate::{Error, Result};
