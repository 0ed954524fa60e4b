// Coordination store boundary
//
// Any store offering sessions with server-side TTL, atomic acquire on a key
// and a lock-delay after release can back the lease manager.

pub mod consul;
pub mod memory;

pub use consul::ConsulStore;
pub use memory::{InMemoryStore, StoreStats};

use crate::{
    lease::{ExpiryBehavior, LeaseId, LeaseSpec},
    Result,
};
use async_trait::async_trait;
use std::time::Duration;

/// Session parameters sent to the store on creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub name: Option<String>,
    pub ttl: Duration,
    pub behavior: ExpiryBehavior,
    pub lock_delay: Option<Duration>,
}

impl From<&LeaseSpec> for SessionEntry {
    fn from(spec: &LeaseSpec) -> Self {
        Self {
            name: spec.name.clone(),
            ttl: spec.ttl,
            behavior: spec.behavior,
            lock_delay: spec.lock_delay,
        }
    }
}

/// A lock record: key, diagnostic value and owning session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    pub session: Option<LeaseId>,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>, session: LeaseId) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            session: Some(session),
        }
    }
}

#[async_trait]
pub trait CoordinationStore: Send + Sync + std::fmt::Debug {
    /// Create a session and return its identifier
    async fn session_create(&self, entry: &SessionEntry) -> Result<LeaseId>;

    /// Reset the session's TTL clock
    async fn session_renew(&self, id: &LeaseId, ttl: Duration) -> Result<()>;

    /// Invalidate the session, triggering its expiry behavior
    async fn session_destroy(&self, id: &LeaseId) -> Result<()>;

    /// Atomically bind `pair.key` to `pair.session`; `false` if someone else holds it
    async fn kv_acquire(&self, pair: &KvPair) -> Result<bool>;

    /// Read a lock record without taking it
    async fn kv_get(&self, key: &str) -> Result<Option<KvPair>>;
}
