//! Errors that abort supervisor startup.
//!
//! Every variant here is fatal to the calling process. Failures inside
//! reconcilers never surface as one of these types; they are logged where they
//! happen.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to build an authenticated connection to the API server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The credentials file is missing or could not be parsed.
    #[error("malformed credentials in {path:?}: {source}")]
    MalformedCredentials {
        /// Path of the kubeconfig that was read
        path: PathBuf,
        /// Underlying kubeconfig error
        #[source]
        source: kube::config::KubeconfigError,
    },

    /// The REST configuration was read but no client could be built from it.
    #[error("unable to construct client: {0}")]
    ClientConstruction(#[source] kube::Error),

    /// The user agent could not be encoded as a header value.
    #[error("invalid user agent {0:?}")]
    InvalidUserAgent(String),

    /// The API server did not answer a version probe.
    #[error("cluster API unreachable: {0}")]
    Unreachable(#[source] kube::Error),
}

/// Failure to install schema extensions.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// One or more records never reported established before the deadline.
    #[error("timed out waiting for schema extensions to be established: {}", .names.join(", "))]
    Timeout {
        /// Records that were still pending
        names: Vec<String>,
    },

    /// The API server refused a record's schema.
    #[error("schema extension {name} rejected: {reason}")]
    Rejected {
        /// Record name
        name: String,
        /// Reason reported by the API server
        reason: String,
    },

    /// A request against the API server failed.
    #[error("schema extension {name}: {source}")]
    Api {
        /// Record name
        name: String,
        /// Underlying error
        #[source]
        source: anyhow::Error,
    },
}

/// Failure of a controller group to reach its initial synced state.
#[derive(Debug, Error)]
#[error("controller group {group} failed to start: {cause}")]
pub struct StartupError {
    /// Name of the group that failed
    pub group: String,
    /// Why it failed
    #[source]
    pub cause: anyhow::Error,
}

impl StartupError {
    /// Create a startup error for a group.
    pub fn new(group: impl Into<String>, cause: anyhow::Error) -> Self {
        StartupError {
            group: group.into(),
            cause,
        }
    }
}

/// Any error that aborts the bootstrap sequence.
#[derive(Debug, Error)]
pub enum Error {
    /// See [`ConnectionError`]
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// See [`RegistrationError`]
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// See [`StartupError`]
    #[error(transparent)]
    Startup(#[from] StartupError),
}

/// Result alias for bootstrap operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_timeout_lists_pending_records() {
        let err = RegistrationError::Timeout {
            names: vec![
                "helmcharts.helm.cattle.io".to_string(),
                "helmchartconfigs.helm.cattle.io".to_string(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "timed out waiting for schema extensions to be established: helmcharts.helm.cattle.io, helmchartconfigs.helm.cattle.io"
        );
    }

    #[test]
    fn test_startup_error_converts() {
        let err: Error = StartupError::new("core", anyhow::anyhow!("list failed")).into();
        assert!(matches!(err, Error::Startup(StartupError { ref group, .. }) if group == "core"));
        assert_eq!(
            err.to_string(),
            "controller group core failed to start: list failed"
        );
    }
}
