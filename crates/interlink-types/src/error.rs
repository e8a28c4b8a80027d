use thiserror::Error;

/// Result type alias for service communication
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the service communication layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Target service is not present in the registry
    #[error("Service not found: {0}")]
    NotFound(String),

    /// Target service is registered but marked as unavailable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Transport or HTTP-level failure, including non-success statuses and
    /// malformed encrypted envelopes
    #[error("Communication error: {0}")]
    Communication(String),

    /// Circuit breaker refused the call without touching the network
    #[error("Circuit breaker is open for service: {0}")]
    CircuitOpen(String),

    /// Missing key, key derivation failure, bad authentication tag or
    /// malformed ciphertext
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request could not be built (bad header, bad method, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether the failure is worth retrying
    ///
    /// Only transport-level communication failures are transient. Everything
    /// else either cannot succeed on a second attempt or must not be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Communication(_))
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 502,
            Error::Unavailable(_) => 503,
            Error::Communication(_) => 502,
            Error::CircuitOpen(_) => 503,
            Error::Encryption(_) => 500,
            Error::Config(_) => 500,
            Error::InvalidRequest(_) => 500,
        }
    }

    /// Get error code for client consumption
    pub fn error_code(&self) -> &str {
        match self {
            Error::NotFound(_) => "SERVICE_NOT_FOUND",
            Error::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Error::Communication(_) => "COMMUNICATION_ERROR",
            Error::CircuitOpen(_) => "CIRCUIT_OPEN",
            Error::Encryption(_) => "ENCRYPTION_ERROR",
            Error::Config(_) => "CONFIGURATION_ERROR",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("billing".to_string());
        assert_eq!(err.to_string(), "Service not found: billing");

        let err = Error::CircuitOpen("billing".to_string());
        assert!(err.to_string().contains("Circuit breaker is open"));

        let err = Error::Encryption("bad tag".to_string());
        assert!(err.to_string().contains("Encryption error"));
    }

    #[test]
    fn test_only_communication_is_transient() {
        assert!(Error::Communication("timeout".to_string()).is_transient());

        assert!(!Error::NotFound("x".to_string()).is_transient());
        assert!(!Error::Unavailable("x".to_string()).is_transient());
        assert!(!Error::CircuitOpen("x".to_string()).is_transient());
        assert!(!Error::Encryption("x".to_string()).is_transient());
        assert!(!Error::Config("x".to_string()).is_transient());
        assert!(!Error::InvalidRequest("x".to_string()).is_transient());
    }

    #[test]
    fn test_breaker_open_is_distinct_from_communication() {
        let open = Error::CircuitOpen("peer".to_string());
        let comm = Error::Communication("peer".to_string());
        assert_ne!(open.error_code(), comm.error_code());
        assert_eq!(open.status_code(), 503);
        assert_eq!(comm.status_code(), 502);
    }

    #[test]
    fn test_not_found_and_unavailable_codes() {
        assert_eq!(Error::NotFound("x".to_string()).error_code(), "SERVICE_NOT_FOUND");
        assert_eq!(Error::Unavailable("x".to_string()).error_code(), "SERVICE_UNAVAILABLE");
    }
}
