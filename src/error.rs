use crate::lease::LeaseId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Lease {lease_id} is no longer recognised by the store")]
    LeaseAlreadyInvalid { lease_id: LeaseId },

    #[error("Lease {lease_id} already created; destroy it before creating another")]
    LeaseAlreadyCreated { lease_id: LeaseId },

    #[error("No lease has been created")]
    NoLease,

    #[error("Task {task:?} failed: {source}")]
    TaskFailure {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient faults that a caller may choose to retry
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
