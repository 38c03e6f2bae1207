use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthStrategy;
use crate::connection::management::ReconnectionConfig;
use crate::transport::{DEFAULT_PORT, Endpoint};
use crate::utils::ConnectionError;

/// Connection, authentication and queueing options of a session.
#[derive(Clone)]
pub struct SessionOptions {
    /// Candidate endpoints, tried in order
    pub endpoints: Vec<Endpoint>,
    /// Total connection attempts across all endpoints; defaults to the endpoint count
    pub connect_attempts: Option<u32>,
    /// Bound on a single connection attempt
    pub connect_timeout: Duration,
    /// Auto-restart policy; `enabled = false` turns reconnection off
    pub reconnection: ReconnectionConfig,
    /// Bound on token, authorization and service-open waits
    pub auth_timeout: Duration,
    /// Capacity of each private event queue
    pub event_queue_capacity: usize,
    /// Authentication strategy, `None` for no authentication options
    pub auth: Option<Arc<dyn AuthStrategy>>,
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("endpoints", &self.endpoints)
            .field("connect_attempts", &self.connect_attempts)
            .field("connect_timeout", &self.connect_timeout)
            .field("reconnection", &self.reconnection)
            .field("auth_timeout", &self.auth_timeout)
            .field("event_queue_capacity", &self.event_queue_capacity)
            .field("auth", &self.auth.as_ref().map(|a| a.name()))
            .finish()
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            endpoints: vec![Endpoint::new("localhost", DEFAULT_PORT)],
            connect_attempts: None,
            connect_timeout: Duration::from_secs(5),
            reconnection: ReconnectionConfig::disabled(),
            auth_timeout: Duration::from_secs(10),
            event_queue_capacity: 64,
            auth: None,
        }
    }
}

impl SessionOptions {
    /// Creates options with a single endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoints: vec![endpoint],
            ..Self::default()
        }
    }

    /// Replaces the endpoint list.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Adds a fallback endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Sets the total number of connection attempts.
    #[must_use]
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = Some(attempts);
        self
    }

    /// Sets the single attempt bound.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Turns auto-restart on or off, keeping the other reconnection settings.
    #[must_use]
    pub fn with_auto_restart(mut self, enabled: bool) -> Self {
        self.reconnection.enabled = enabled;
        self
    }

    /// Replaces the reconnection policy.
    #[must_use]
    pub fn with_reconnection(mut self, reconnection: ReconnectionConfig) -> Self {
        self.reconnection = reconnection;
        self
    }

    /// Sets the token/authorization/service-open wait bound.
    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Sets the private queue capacity.
    #[must_use]
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Sets the authentication strategy.
    #[must_use]
    pub fn with_auth(mut self, strategy: Arc<dyn AuthStrategy>) -> Self {
        self.auth = Some(strategy);
        self
    }

    /// Whether auto-restart is on.
    pub fn auto_restart(&self) -> bool {
        self.reconnection.enabled
    }

    /// Effective number of connection attempts per round.
    pub fn effective_connect_attempts(&self) -> u32 {
        self.connect_attempts
            .unwrap_or_else(|| u32::try_from(self.endpoints.len()).unwrap_or(u32::MAX))
    }

    /// Authentication options string of the configured strategy.
    pub fn auth_options(&self) -> Option<String> {
        self.auth.as_ref().and_then(|strategy| strategy.options())
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.endpoints.is_empty() {
            return Err(ConnectionError::InvalidConfig(
                "at least one endpoint is required".to_string(),
            ));
        }
        if self.connect_attempts == Some(0) {
            return Err(ConnectionError::InvalidConfig(
                "connect_attempts must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConnectionError::InvalidConfig(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }
        if self.auth_timeout.is_zero() {
            return Err(ConnectionError::InvalidConfig(
                "auth_timeout must be greater than 0".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConnectionError::InvalidConfig(
                "event_queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.reconnection.enabled {
            self.reconnection
                .validate()
                .map_err(ConnectionError::InvalidConfig)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OsLogon;

    #[test]
    fn test_defaults() {
        let options = SessionOptions::default();
        assert_eq!(options.endpoints, vec![Endpoint::new("localhost", DEFAULT_PORT)]);
        assert_eq!(options.effective_connect_attempts(), 1);
        assert!(!options.auto_restart());
        assert!(options.auth_options().is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let options = SessionOptions::new(Endpoint::new("primary", 8194))
            .with_endpoint(Endpoint::new("backup", 8194))
            .with_auto_restart(true)
            .with_auth_timeout(Duration::from_millis(250))
            .with_auth(Arc::new(OsLogon));

        assert_eq!(options.endpoints.len(), 2);
        assert_eq!(options.effective_connect_attempts(), 2);
        assert!(options.auto_restart());
        assert_eq!(options.auth_timeout, Duration::from_millis(250));
        assert_eq!(
            options.auth_options().as_deref(),
            Some("AuthenticationType=OS_LOGON")
        );
        assert!(format!("{:?}", options).contains("OS_LOGON"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SessionOptions::default()
            .with_endpoints(Vec::new())
            .validate()
            .is_err());
        assert!(SessionOptions::default()
            .with_connect_attempts(0)
            .validate()
            .is_err());
        assert!(SessionOptions::default()
            .with_auth_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(SessionOptions::default()
            .with_event_queue_capacity(0)
            .validate()
            .is_err());
        assert!(SessionOptions::default()
            .with_reconnection(ReconnectionConfig::new().with_backoff_multiplier(0.5))
            .validate()
            .is_err());
    }
}
