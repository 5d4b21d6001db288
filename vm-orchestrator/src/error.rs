use std::fmt;
use thiserror::Error;
use vm_provider::ProviderError;

pub type Result<T> = std::result::Result<T, HandlerError>;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("unable to resolve {path}: {source}")]
    Resolution {
        path: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error("unable to start {method}: {source}")]
    Execution {
        method: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    AggregatedOperation(#[from] AggregatedError),

    #[error("unable to find box {name:?}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: ProviderError,
    },

    #[error("unable to read forwarded ports for box {name:?}: {source}")]
    ForwardedPorts {
        name: String,
        #[source]
        source: ProviderError,
    },

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failure of a shared box fetch. Every caller waiting on the same fetch
/// receives an identical copy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unable to fetch box {box_name:?}: {message}")]
pub struct ProvisioningError {
    pub box_name: String,
    pub message: String,
}

/// Every failure cause observed while a streamed command ran.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedError {
    causes: Vec<String>,
}

impl AggregatedError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cause: impl Into<String>) {
        self.causes.push(cause.into());
    }

    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    pub fn causes(&self) -> &[String] {
        &self.causes
    }
}

impl fmt::Display for AggregatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.causes.as_slice() {
            [] => f.write_str("no errors"),
            [single] => f.write_str(single),
            causes => {
                write!(f, "{} errors occurred:", causes.len())?;
                for cause in causes {
                    write!(f, "\n\t* {}", cause)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregated_error_display() {
        let mut err = AggregatedError::new();
        assert!(err.is_empty());

        err.push("disk full");
        assert_eq!(err.to_string(), "disk full");

        err.push("exit status 1");
        assert_eq!(
            err.to_string(),
            "2 errors occurred:\n\t* disk full\n\t* exit status 1"
        );
    }
}
