//! Error types for network lifecycle operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while managing networks and resolving addresses.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Failed to connect to the hypervisor.
    #[error("Failed to connect to hypervisor at {uri}: {reason}")]
    ConnectionFailed {
        uri: String,
        reason: String,
    },

    /// The network is not defined on the hypervisor.
    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    /// Another domain still references the network.
    #[error("Network {network} still in use at least by domain '{domain}'")]
    NetworkInUse {
        network: String,
        domain: String,
    },

    /// The private network would collide with the default network.
    #[error("Private network can't be named {0}: this is the name of the default network")]
    NameCollision(String),

    /// A hypervisor call failed.
    #[error("{operation}: {reason}")]
    Hypervisor {
        operation: String,
        reason: String,
    },

    /// A bounded poll never observed the desired state.
    #[error("{operation} did not complete within {timeout:?} after {attempts} attempt(s)")]
    RetryExhausted {
        operation: String,
        timeout: Duration,
        attempts: u32,
        #[source]
        source: Box<NetworkError>,
    },

    /// A legacy lease line did not have exactly five fields.
    #[error("Malformed leases entry: {0:?}")]
    MalformedLease(String),

    /// The status snapshot was not a valid JSON lease array.
    #[error("Failed to parse status file {}: {source}", path.display())]
    StatusParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A domain definition could not be parsed.
    #[error("Failed to parse XML of domain '{domain}': {reason}")]
    Xml {
        domain: String,
        reason: String,
    },

    /// Reading a lease or status file failed.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The mock backend's internal state was poisoned.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Any error wrapped with operation-specific context.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<NetworkError>,
    },
}

impl NetworkError {
    /// Build a [`NetworkError::Hypervisor`] from an operation and its failure.
    pub fn hypervisor(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Hypervisor {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap this error with additional context.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) reports a missing network.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NetworkNotFound(_) => true,
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Attach context to a fallible result.
pub trait ResultExt<T> {
    /// Wrap the error, if any, with a lazily built context message.
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.context(f()))
    }
}

/// Result type alias for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_through_context() {
        let err = NetworkError::NetworkNotFound("kvmnet-private".to_string())
            .context("checking network kvmnet-private");
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "checking network kvmnet-private: Network not found: kvmnet-private"
        );
    }

    #[test]
    fn test_in_use_names_domain() {
        let err = NetworkError::NetworkInUse {
            network: "kvmnet-private".to_string(),
            domain: "other-vm".to_string(),
        };
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("'other-vm'"));
    }
}
