use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known message type names.
///
/// Types the core reacts to are enumerated; anything else travels as `Other` and is
/// handed to the application untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Name {
    /// The session connected for the first time
    SessionStarted,
    /// The session could not connect to any endpoint
    SessionStartupFailure,
    /// The session is gone for good
    SessionTerminated,
    /// The connection came back after a drop
    SessionConnectionUp,
    /// The connection dropped
    SessionConnectionDown,
    /// A service was opened
    ServiceOpened,
    /// A service could not be opened
    ServiceOpenFailure,
    /// Token generation succeeded
    TokenGenerationSuccess,
    /// Token generation failed
    TokenGenerationFailure,
    /// Authorization succeeded
    AuthorizationSuccess,
    /// Authorization failed
    AuthorizationFailure,
    /// A previously granted authorization was revoked
    AuthorizationRevoked,
    /// A subscription started delivering
    SubscriptionStarted,
    /// A subscription failed
    SubscriptionFailure,
    /// A subscription ended, usually as the acknowledgment of an unsubscribe
    SubscriptionTerminated,
    /// Data for a subscription
    MarketDataEvents,
    /// A request failed before producing a response
    RequestFailure,
    /// Any other message type
    Other(String),
}

impl Name {
    /// Returns the wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Name::SessionStarted => "SessionStarted",
            Name::SessionStartupFailure => "SessionStartupFailure",
            Name::SessionTerminated => "SessionTerminated",
            Name::SessionConnectionUp => "SessionConnectionUp",
            Name::SessionConnectionDown => "SessionConnectionDown",
            Name::ServiceOpened => "ServiceOpened",
            Name::ServiceOpenFailure => "ServiceOpenFailure",
            Name::TokenGenerationSuccess => "TokenGenerationSuccess",
            Name::TokenGenerationFailure => "TokenGenerationFailure",
            Name::AuthorizationSuccess => "AuthorizationSuccess",
            Name::AuthorizationFailure => "AuthorizationFailure",
            Name::AuthorizationRevoked => "AuthorizationRevoked",
            Name::SubscriptionStarted => "SubscriptionStarted",
            Name::SubscriptionFailure => "SubscriptionFailure",
            Name::SubscriptionTerminated => "SubscriptionTerminated",
            Name::MarketDataEvents => "MarketDataEvents",
            Name::RequestFailure => "RequestFailure",
            Name::Other(name) => name,
        }
    }

    /// Maps a wire name to a well-known variant where one exists.
    pub fn parse(name: &str) -> Self {
        match name {
            "SessionStarted" => Name::SessionStarted,
            "SessionStartupFailure" => Name::SessionStartupFailure,
            "SessionTerminated" => Name::SessionTerminated,
            "SessionConnectionUp" => Name::SessionConnectionUp,
            "SessionConnectionDown" => Name::SessionConnectionDown,
            "ServiceOpened" => Name::ServiceOpened,
            "ServiceOpenFailure" => Name::ServiceOpenFailure,
            "TokenGenerationSuccess" => Name::TokenGenerationSuccess,
            "TokenGenerationFailure" => Name::TokenGenerationFailure,
            "AuthorizationSuccess" => Name::AuthorizationSuccess,
            "AuthorizationFailure" => Name::AuthorizationFailure,
            "AuthorizationRevoked" => Name::AuthorizationRevoked,
            "SubscriptionStarted" => Name::SubscriptionStarted,
            "SubscriptionFailure" => Name::SubscriptionFailure,
            "SubscriptionTerminated" => Name::SubscriptionTerminated,
            "MarketDataEvents" => Name::MarketDataEvents,
            "RequestFailure" => Name::RequestFailure,
            other => Name::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::parse(&value)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::parse(value)
    }
}

impl From<Name> for String {
    fn from(value: Name) -> Self {
        match value {
            Name::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Element names the core reads from payloads.
pub mod element {
    /// Error block of a response
    pub const RESPONSE_ERROR: &str = "responseError";
    /// Error category
    pub const CATEGORY: &str = "category";
    /// Error subcategory
    pub const SUBCATEGORY: &str = "subcategory";
    /// Error message
    pub const MESSAGE: &str = "message";
    /// Error description
    pub const DESCRIPTION: &str = "description";
    /// Error code
    pub const CODE: &str = "code";
    /// Failure reason block
    pub const REASON: &str = "reason";
    /// Per-field exceptions of a subscription
    pub const EXCEPTIONS: &str = "exceptions";
    /// Field identifier inside an exception
    pub const FIELD_ID: &str = "fieldId";
    /// Generated token
    pub const TOKEN: &str = "token";
    /// Operations advertised by a service
    pub const OPERATIONS: &str = "operations";
    /// Service name
    pub const SERVICE_NAME: &str = "serviceName";
    /// Endpoint a session connected to
    pub const ENDPOINT: &str = "endpoint";
    /// Topic of a subscription
    pub const TOPIC: &str = "topic";
    /// Fields of a subscription
    pub const FIELDS: &str = "fields";
    /// User id of a manual authorization
    pub const USER_ID: &str = "userId";
    /// IP address of a manual authorization
    pub const IP_ADDRESS: &str = "ipAddress";
}
