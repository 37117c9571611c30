// src/error.rs

//! Error types for the girder runtime
//!
//! Resolution failures are normally recovered locally (the module simply
//! stays `Installed`); an `Error` only escapes from operations that
//! explicitly requested progress, such as `start` on an unresolved module.

use crate::registry::ModuleId;
use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by lifecycle and service operations
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown module id
    #[error("module {0} not found")]
    NotFound(ModuleId),

    /// Start was attempted without satisfiable wiring
    #[error("module {module} is unresolved: {reason}")]
    Unresolved { module: ModuleId, reason: String },

    /// Operation not valid for the module's current state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The module's entry point failed; the module was rolled back to
    /// `Resolved` before this error was returned
    #[error("activation of module {module} failed")]
    ActivationFailed {
        module: ModuleId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An external security policy denied the operation
    #[error("security policy denied {0}")]
    SecurityDenied(String),

    /// A manifest header could not be parsed
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    /// A version or version range string could not be parsed
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// A service filter expression could not be parsed
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Unknown service id
    #[error("service {0} not found")]
    ServiceNotFound(u64),
}

impl Error {
    /// Returns true if this error indicates a missing module or service
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ServiceNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound(42);
        assert_eq!(err.to_string(), "module 42 not found");

        let err = Error::Unresolved {
            module: 7,
            reason: "no exporter for pkg.a".to_string(),
        };
        assert!(err.to_string().contains("unresolved"));
        assert!(err.to_string().contains("pkg.a"));
    }

    #[test]
    fn test_activation_failed_preserves_cause() {
        let cause = std::io::Error::other("boom");
        let err = Error::ActivationFailed {
            module: 3,
            source: Box::new(cause),
        };

        let source = std::error::Error::source(&err).expect("cause preserved");
        assert_eq!(source.to_string(), "boom");
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::NotFound(1).is_not_found());
        assert!(Error::ServiceNotFound(1).is_not_found());
        assert!(!Error::IllegalState("x".to_string()).is_not_found());
    }
}
