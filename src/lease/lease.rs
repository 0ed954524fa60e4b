// Core lease data structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default lease duration (15 seconds)
pub const DEFAULT_TTL: Duration = Duration::from_secs(15);

/// Default grace period after a lock is released before it can be taken again
pub const DEFAULT_LOCK_DELAY: Duration = Duration::from_secs(15);

/// Opaque lease identifier issued by the coordination store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub String);

impl LeaseId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LeaseId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for LeaseId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// What happens to lock records owned by a lease once it is invalidated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryBehavior {
    /// Remove the lock record entirely
    #[default]
    Delete,
    /// Keep the record but clear its owner
    Release,
}

impl ExpiryBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryBehavior::Delete => "delete",
            ExpiryBehavior::Release => "release",
        }
    }
}

impl fmt::Display for ExpiryBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters used to request a lease from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSpec {
    /// Diagnostic name attached to the session
    pub name: Option<String>,

    /// Time after which an unrenewed lease is invalidated
    pub ttl: Duration,

    /// Fate of owned lock records on expiry or destroy
    pub behavior: ExpiryBehavior,

    /// Lock-delay override; the store default applies when `None`
    pub lock_delay: Option<Duration>,
}

impl LeaseSpec {
    pub fn new(ttl: Duration) -> Self {
        Self {
            name: None,
            ttl,
            behavior: ExpiryBehavior::default(),
            lock_delay: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_behavior(mut self, behavior: ExpiryBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_lock_delay(mut self, lock_delay: Duration) -> Self {
        self.lock_delay = Some(lock_delay);
        self
    }

    /// How often the lease is refreshed while held
    pub fn renewal_interval(&self) -> Duration {
        self.ttl / 2
    }
}

impl Default for LeaseSpec {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
