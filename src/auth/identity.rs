use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::message::CorrelationId;
use crate::utils::AuthError;

/// Opaque authentication token returned by token generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(String);

impl Token {
    /// Wraps a raw token string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tokens are credentials; only show a prefix.
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "{}…", prefix)
    }
}

/// Outcome of an authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entitlement {
    /// Data may be delivered against the identity
    Granted,
    /// The backend refused the authorization
    Denied {
        /// Error category
        category: String,
        /// Error description
        description: String,
    },
}

/// Handle on an authorization, attached to subscriptions and requests.
///
/// Clones share the same entitlement state, which is resolved exactly once.
#[derive(Debug, Clone)]
pub struct Identity {
    correlation_id: CorrelationId,
    entitlement: Arc<OnceLock<Entitlement>>,
}

impl Identity {
    pub(crate) fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            entitlement: Arc::new(OnceLock::new()),
        }
    }

    /// Correlation id of the authorization that created this identity.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Entitlement state, `None` while the authorization is pending.
    pub fn entitlement(&self) -> Option<&Entitlement> {
        self.entitlement.get()
    }

    /// Whether the authorization succeeded.
    pub fn is_authorized(&self) -> bool {
        matches!(self.entitlement.get(), Some(Entitlement::Granted))
    }

    pub(crate) fn resolve(&self, entitlement: Entitlement) -> Result<(), AuthError> {
        self.entitlement
            .set(entitlement)
            .map_err(|_| AuthError::AlreadyResolved)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.correlation_id == other.correlation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_resolves_once() {
        let identity = Identity::new(CorrelationId::Internal(4));
        let shared = identity.clone();
        assert!(identity.entitlement().is_none());

        identity.resolve(Entitlement::Granted).unwrap();
        assert!(shared.is_authorized());
        assert_eq!(
            shared.resolve(Entitlement::Denied {
                category: "X".into(),
                description: "Y".into(),
            }),
            Err(AuthError::AlreadyResolved)
        );
        assert!(identity.is_authorized());
    }

    #[test]
    fn test_token_display_hides_value() {
        let token = Token::new("abcdefghijklmnop");
        assert_eq!(token.as_str(), "abcdefghijklmnop");
        assert_eq!(token.to_string(), "abcdef…");
    }
}
