//! Error types for the ACL operator

use thiserror::Error;

/// Main error type for ACL operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Directory (Tsuru API / ACL API) lookup error
    #[error("directory error: {0}")]
    Directory(String),

    /// The looked-up entity does not exist in the external directory
    #[error("{0}")]
    NotFound(String),

    /// DNS resolution error
    #[error("dns error: {0}")]
    Dns(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a directory error with the given message
    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a DNS error with the given message
    pub fn dns(msg: impl Into<String>) -> Self {
        Self::Dns(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether retrying the same operation may succeed without a spec change
    ///
    /// Validation and serialization errors require a config fix; everything
    /// else is assumed transient (external services and the API server
    /// recover on their own).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(ae)) => !(400..500).contains(&ae.code),
            Error::Kube(_) => true,
            Error::Validation(_) => false,
            Error::Directory(_) => true,
            Error::NotFound(_) => true,
            Error::Dns(_) => true,
            Error::Serialization(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transient failures (DNS outages, directory hiccups, API server
    /// unavailability) must be retried; user-caused failures must not.
    #[test]
    fn retryability_follows_error_category() {
        assert!(Error::dns("timeout for host").is_retryable());
        assert!(Error::directory("connection refused").is_retryable());
        assert!(Error::not_found("App not found").is_retryable());
        assert!(!Error::validation("invalid CIDR \"300.0.0.1/32\"").is_retryable());
        assert!(!Error::serialization("missing field `host`").is_retryable());
    }

    #[test]
    fn messages_carry_category_prefix() {
        let err = Error::validation("ip \"nope\" is not a valid CIDR");
        assert!(err.to_string().starts_with("validation error"));

        let err = Error::dns("lookup timed out after 10s");
        assert!(err.to_string().contains("lookup timed out"));
    }
}
