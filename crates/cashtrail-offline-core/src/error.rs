use thiserror::Error;

/// Failure of a single network fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout(err.to_string())
        } else if err.is_builder() {
            NetworkError::InvalidRequest(err.to_string())
        } else {
            NetworkError::Offline(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache store is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Precache of {path} failed: {source}")]
    Install {
        path: String,
        #[source]
        source: NetworkError,
    },

    #[error("Precache of {path} returned status {status}")]
    InstallStatus { path: String, status: u16 },

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl WorkerError {
    /// True when the error came from the network rather than local storage.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            WorkerError::Network(_) | WorkerError::Install { .. } | WorkerError::InstallStatus { .. }
        )
    }
}
