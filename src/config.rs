//! Configuration file parsing.
//!
//! ```toml
//! namespace = "service"
//!
//! [store]
//! backend = "consul"
//! address = "http://127.0.0.1:8500"
//!
//! [lease]
//! ttl = "15s"
//! behavior = "delete"
//!
//! [[tasks]]
//! id = "bobrunner"
//! duration = "30s"
//!
//! [[tasks]]
//! id = "backup"
//! command = ["/usr/local/bin/backup", "--full"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lease::{ExpiryBehavior, LeaseSpec, DEFAULT_TTL};
use crate::store::{consul, ConsulStore, CoordinationStore, InMemoryStore};
use crate::task::{CommandTask, SleepTask, Task, DEFAULT_SLEEP};
use crate::worker::DEFAULT_NAMESPACE;
use crate::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Prefix of every lock key.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub lease: LeaseConfig,

    /// Ordered task list, identical on every worker.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            store: StoreConfig::default(),
            lease: LeaseConfig::default(),
            tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Consul,
    /// Process-local store; only useful for trying things out.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_address")]
    pub address: String,

    /// ACL token.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub datacenter: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_address() -> String {
    consul::DEFAULT_ADDRESS.to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            address: default_address(),
            token: None,
            datacenter: None,
            timeout: default_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn build(&self) -> Result<Arc<dyn CoordinationStore>> {
        match self.backend {
            Backend::Memory => Ok(Arc::new(InMemoryStore::new())),
            Backend::Consul => {
                let mut store = ConsulStore::new(self.address.clone(), self.timeout)?;
                if let Some(token) = &self.token {
                    store = store.with_token(token.clone());
                }
                if let Some(dc) = &self.datacenter {
                    store = store.with_datacenter(dc.clone());
                }
                Ok(Arc::new(store))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    #[serde(default)]
    pub behavior: ExpiryBehavior,

    #[serde(default, with = "humantime_serde::option")]
    pub lock_delay: Option<Duration>,
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            behavior: ExpiryBehavior::default(),
            lock_delay: None,
        }
    }
}

impl LeaseConfig {
    pub fn spec(&self) -> LeaseSpec {
        let mut spec = LeaseSpec::new(self.ttl).with_behavior(self.behavior);
        if let Some(delay) = self.lock_delay {
            spec = spec.with_lock_delay(delay);
        }
        spec
    }
}

/// One task. Runs `command` if given, otherwise sleeps for `duration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,

    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default, with = "humantime_serde::option")]
    pub duration: Option<Duration>,
}

impl TaskConfig {
    pub fn build(&self) -> Result<Arc<dyn Task>> {
        match &self.command {
            Some(argv) => CommandTask::new(self.id.clone(), argv)
                .map(|task| Arc::new(task) as Arc<dyn Task>)
                .ok_or_else(|| Error::Config(format!("task {:?} has an empty command", self.id))),
            None => Ok(Arc::new(SleepTask::new(
                self.id.clone(),
                self.duration.unwrap_or(DEFAULT_SLEEP),
            ))),
        }
    }
}

impl Config {
    /// Default location: `~/.solo/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".solo").join("config.toml"))
    }

    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lease.ttl.is_zero() {
            return Err(Error::Config("lease ttl must be positive".to_string()));
        }
        if self.store.backend == Backend::Consul
            && !(consul::MIN_TTL..=consul::MAX_TTL).contains(&self.lease.ttl)
        {
            return Err(Error::Config(format!(
                "consul session ttl must be between {:?} and {:?}, got {:?}",
                consul::MIN_TTL,
                consul::MAX_TTL,
                self.lease.ttl
            )));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.trim_matches('/').is_empty() {
                return Err(Error::Config("task id must not be empty".to_string()));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(Error::Config(format!("duplicate task id {:?}", task.id)));
            }
            if task.command.is_some() && task.duration.is_some() {
                return Err(Error::Config(format!(
                    "task {:?} sets both command and duration",
                    task.id
                )));
            }
        }
        Ok(())
    }

    pub fn build_tasks(&self) -> Result<Vec<Arc<dyn Task>>> {
        self.tasks.iter().map(TaskConfig::build).collect()
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
