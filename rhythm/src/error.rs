//! Error taxonomy for the persistence protocol.
//!
//! Precondition failures are raised before any write happens. I/O and parse
//! failures carry the offending path. Container errors keep their own type so
//! the retry path can match on [`ContainerError::AlreadyOpen`].

use std::path::PathBuf;

use thiserror::Error;

use crate::io::container::ContainerError;

/// Result alias used across the protocol.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A caller-side contract was violated (missing record, bad path, wrong filename).
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml error in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("json error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Container(#[from] ContainerError),
}

impl StoreError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_message_names_the_contract() {
        let err = StoreError::precondition("config record is missing");
        assert!(err.is_precondition());
        assert_eq!(
            err.to_string(),
            "precondition failed: config record is missing"
        );
    }

    #[test]
    fn io_error_includes_path() {
        let err = StoreError::io(
            "/tmp/run_info.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_precondition());
        assert!(err.to_string().contains("/tmp/run_info.json"));
    }
}
