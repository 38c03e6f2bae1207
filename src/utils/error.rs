use std::time::Duration;

use crate::transport::Endpoint;

/// Errors raised while establishing or tearing down the connection to the backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// A single endpoint could not be reached
    #[error("Host unreachable: {endpoint} ({reason})")]
    HostUnreachable {
        /// Endpoint that refused or timed out
        endpoint: Endpoint,
        /// Transport supplied reason
        reason: String,
    },
    /// Every configured endpoint was tried and none accepted the connection
    #[error("All hosts exhausted after {attempts} attempts")]
    AllHostsExhausted {
        /// Total number of connection attempts made
        attempts: u32,
    },
    /// An operation required a live connection
    #[error("Session is not connected")]
    NotConnected,
    /// The session was stopped and cannot be used anymore
    #[error("Session has been terminated")]
    Terminated,
    /// Session options failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised by token generation and authorization.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    /// The backend answered the token request with a failure
    #[error("Token generation failed: {category} - {description}")]
    TokenGenerationFailed {
        /// Failure category reported by the backend
        category: String,
        /// Human readable description
        description: String,
    },
    /// The backend denied the authorization request
    #[error("Authorization failed: {category} - {description}")]
    AuthorizationFailed {
        /// Failure category reported by the backend
        category: String,
        /// Human readable description
        description: String,
    },
    /// No terminal reply arrived within the configured bound
    #[error("Authentication timed out after {0:?}")]
    Timeout(Duration),
    /// The connection failed while authenticating
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// An identity can be resolved only once
    #[error("Identity already resolved")]
    AlreadyResolved,
    /// The configured strategy is missing a parameter or is unknown
    #[error("Invalid authentication strategy: {0}")]
    InvalidStrategy(String),
}

/// Errors raised while opening services and exchanging requests.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// The target service has not been opened on this session
    #[error("Service not open: {0}")]
    ServiceNotOpen(String),
    /// The backend refused to open the service
    #[error("Failed to open service {service}: {description}")]
    ServiceOpenFailed {
        /// Service name
        service: String,
        /// Reason given by the backend
        description: String,
    },
    /// The service does not advertise the requested operation
    #[error("Unknown operation {operation} on service {service}")]
    UnknownOperation {
        /// Service name
        service: String,
        /// Requested operation
        operation: String,
    },
    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The terminal response carried an error payload
    #[error("Response error: {category} - {description}")]
    Response {
        /// Error category
        category: String,
        /// Human readable description
        description: String,
    },
    /// The request was cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,
    /// No reply arrived within the configured bound
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// The connection was not available
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Errors related to subscriptions, both local validation and backend reports.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubscriptionError {
    /// Another tracked subscription already uses this correlation id
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(String),
    /// The topic is already subscribed and has not been unsubscribed
    #[error("Topic already subscribed: {0}")]
    DuplicateTopic(String),
    /// A single field of the subscription was rejected
    #[error("Field exception on {field}: {category} - {description}")]
    FieldException {
        /// Rejected field
        field: String,
        /// Error category
        category: String,
        /// Human readable description
        description: String,
    },
    /// The whole subscription failed
    #[error("Subscription failure: {category} - {description}")]
    Failure {
        /// Error category
        category: String,
        /// Human readable description
        description: String,
    },
    /// The subscription could not be built
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),
}

/// Errors raised by typed element accessors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// No element with that name
    #[error("Element not found: {name}")]
    NotFound {
        /// Requested element name
        name: String,
    },
    /// The element holds a different datatype than the accessor expects
    #[error("Element {name} is {actual}, not {expected}")]
    TypeMismatch {
        /// Element name
        name: String,
        /// Datatype the accessor asked for
        expected: &'static str,
        /// Datatype actually stored
        actual: &'static str,
    },
    /// Array index past the end
    #[error("Index {index} out of range for {name} ({len} values)")]
    IndexOutOfRange {
        /// Element name
        name: String,
        /// Requested index
        index: usize,
        /// Number of values held
        len: usize,
    },
}

/// Top level error for session operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Connection failure
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Authentication failure
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Request failure
    #[error(transparent)]
    Request(#[from] RequestError),
    /// Subscription failure
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    /// Element decoding failure
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_category_and_description() {
        let err = RequestError::Response {
            category: "BAD_SEC".to_string(),
            description: "Unknown security".to_string(),
        };
        assert_eq!(err.to_string(), "Response error: BAD_SEC - Unknown security");
    }

    #[test]
    fn test_session_error_from_conversions() {
        let err: SessionError = ConnectionError::AllHostsExhausted { attempts: 3 }.into();
        assert!(matches!(
            err,
            SessionError::Connection(ConnectionError::AllHostsExhausted { attempts: 3 })
        ));

        let err: AuthError = ConnectionError::NotConnected.into();
        assert_eq!(err.to_string(), "Session is not connected");
    }

    #[test]
    fn test_decode_error_type_mismatch_display() {
        let err = DecodeError::TypeMismatch {
            name: "PX_LAST".to_string(),
            expected: "int32",
            actual: "float64",
        };
        assert_eq!(err.to_string(), "Element PX_LAST is float64, not int32");
    }
}
