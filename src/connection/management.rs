//! Connection lifecycle: host failover on start, backoff reconnection, idempotent stop.
//!
//! The manager never talks to handlers directly. Every lifecycle change is turned into a
//! synthesized `SessionStatus` event and pushed into the same inbound channel the
//! transport feeds, so status and data reach the dispatcher in arrival order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::connection::options::SessionOptions;
use crate::message::{Element, Event, EventType, Message, Name, element_names};
use crate::transport::{
    Endpoint, InboundSender, Outbound, Transport, TransportError, TransportEvent,
};
use crate::utils::ConnectionError;

/// How [`ConnectionManager::stop`] closes the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Let frames already handed to the transport drain
    #[default]
    Graceful,
    /// Drop the link at once
    Immediate,
}

/// Current state of the connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Connection is not established
    Disconnected,
    /// Initial connection attempt is in progress
    Connecting,
    /// Connection is established and active
    Connected,
    /// Reconnection is in progress
    Reconnecting {
        /// Current reconnection attempt number
        attempt: u32,
        /// Timestamp for the next retry attempt
        next_retry: Instant,
    },
    /// Connection has failed permanently
    Failed {
        /// Reason for the connection failure
        reason: String,
    },
    /// The session was stopped
    Terminated,
}

/// Configuration for reconnection behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionConfig {
    /// Whether automatic reconnection is enabled
    pub enabled: bool,
    /// Initial delay before the first reconnection attempt
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_delay: Duration,
    /// Maximum number of reconnection attempts (None for unlimited)
    pub max_attempts: Option<u32>,
    /// Multiplier for exponential backoff between attempts
    pub backoff_multiplier: f64,
    /// Whether to add random jitter to delays to avoid thundering herd
    pub jitter_enabled: bool,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(10),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

impl ReconnectionConfig {
    /// Creates a new reconnection config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled reconnection config
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Creates a fast reconnection config for testing
    pub fn fast() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(5),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 1.5,
            jitter_enabled: false,
        }
    }

    /// Creates a conservative reconnection config
    pub fn conservative() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(20),
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.5,
            jitter_enabled: true,
        }
    }

    /// Sets whether reconnection is enabled
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the maximum number of reconnection attempts
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Removes the attempt limit
    #[must_use]
    pub fn with_unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Sets the initial delay between reconnection attempts
    #[must_use]
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Sets the maximum delay between reconnection attempts
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the backoff multiplier
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets whether jitter is enabled
    #[must_use]
    pub fn with_jitter_enabled(mut self, jitter_enabled: bool) -> Self {
        self.jitter_enabled = jitter_enabled;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max_attempts) = self.max_attempts
            && max_attempts == 0
        {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.initial_delay.is_zero() {
            return Err("initial_delay must be greater than 0".to_string());
        }

        if self.max_delay < self.initial_delay {
            return Err("max_delay must be greater than or equal to initial_delay".to_string());
        }

        if self.backoff_multiplier <= 1.0 {
            return Err("backoff_multiplier must be greater than 1.0".to_string());
        }

        Ok(())
    }

    /// Delay before reconnection attempt `attempt` (1-based): exponential backoff capped
    /// at `max_delay`, plus up to 25% jitter when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_millis() as f64;
        let calculated = base_delay * self.backoff_multiplier.powi(exponent);
        let capped = calculated.min(self.max_delay.as_millis() as f64);
        let delay = Duration::from_millis(capped as u64);

        if self.jitter_enabled {
            let jitter_range = delay.as_millis() as u64 / 4;
            let jitter = rand::random::<u64>() % (jitter_range + 1);
            delay + Duration::from_millis(jitter)
        } else {
            delay
        }
    }
}

/// Connection metrics for monitoring and debugging
#[derive(Debug, Default, Clone)]
pub struct ConnectionMetrics {
    /// Total number of connection attempts made
    pub total_connections: u64,
    /// Number of successful reconnection attempts
    pub successful_reconnections: u64,
    /// Number of reconnection rounds that gave up
    pub failed_reconnections: u64,
    /// Number of subscriptions re-sent after a reconnection
    pub subscription_recoveries: u64,
    /// Timestamp of when these metrics were last updated
    pub last_updated: Option<Instant>,
}

/// Owns the link to the backend through a [`Transport`].
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    options: SessionOptions,
    inbound: InboundSender,
    connection_state: RwLock<ConnectionState>,
    endpoint: RwLock<Option<Endpoint>>,
    metrics: Mutex<ConnectionMetrics>,
    terminated: AtomicBool,
    shutdown_signal: Notify,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("options", &self.options)
            .field("terminated", &self.terminated.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager. `inbound` receives both transport events and the synthesized
    /// session status events.
    pub fn new(
        transport: Arc<dyn Transport>,
        options: SessionOptions,
        inbound: InboundSender,
    ) -> Self {
        Self {
            transport,
            options,
            inbound,
            connection_state: RwLock::new(ConnectionState::Disconnected),
            endpoint: RwLock::new(None),
            metrics: Mutex::new(ConnectionMetrics::default()),
            terminated: AtomicBool::new(false),
            shutdown_signal: Notify::new(),
        }
    }

    /// Session options the manager was built with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Gets the current connection state
    pub async fn get_connection_state(&self) -> ConnectionState {
        self.connection_state.read().await.clone()
    }

    /// Gets connection metrics
    pub async fn get_metrics(&self) -> ConnectionMetrics {
        self.metrics.lock().await.clone()
    }

    /// Endpoint of the live connection.
    pub async fn current_endpoint(&self) -> Option<Endpoint> {
        self.endpoint.read().await.clone()
    }

    /// Whether the link is up.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.connection_state.read().await, ConnectionState::Connected)
    }

    /// Whether [`stop`](Self::stop) ran or reconnection gave up.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Connects to the first reachable endpoint.
    ///
    /// Endpoints are tried in order, cycling through the list, until
    /// `connect_attempts` attempts have been made. Emits `SessionStarted` on success and
    /// `SessionStartupFailure` otherwise.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::AllHostsExhausted`] when every attempt failed,
    /// [`ConnectionError::Terminated`] after `stop`.
    pub async fn start(&self) -> Result<Endpoint, ConnectionError> {
        if self.is_terminated() {
            return Err(ConnectionError::Terminated);
        }
        self.options.validate()?;
        self.set_state(ConnectionState::Connecting).await;

        let attempts = self.options.effective_connect_attempts();
        match self.connect_round(attempts).await {
            Ok(endpoint) => {
                info!("Session started on {}", endpoint);
                self.emit(
                    Name::SessionStarted,
                    Element::complex(Name::SessionStarted.as_str())
                        .with(element_names::ENDPOINT, endpoint.to_string()),
                );
                Ok(endpoint)
            }
            Err(e) => {
                error!("Session startup failed: {}", e);
                self.set_state(ConnectionState::Failed {
                    reason: e.to_string(),
                })
                .await;
                self.emit(
                    Name::SessionStartupFailure,
                    Element::complex(Name::SessionStartupFailure.as_str())
                        .with_element(reason("CONNECTION", &e.to_string())),
                );
                Err(e)
            }
        }
    }

    /// Records a dropped link and emits `SessionConnectionDown`.
    ///
    /// Returns whether the caller should run [`reconnect`](Self::reconnect).
    pub async fn handle_disconnection(&self, cause: &str) -> bool {
        if self.is_terminated() {
            debug!("Ignoring disconnection after stop: {}", cause);
            return false;
        }
        warn!("Connection lost: {}", cause);
        let endpoint = self.endpoint.write().await.take();
        self.set_state(ConnectionState::Disconnected).await;

        let mut payload = Element::complex(Name::SessionConnectionDown.as_str())
            .with_element(reason("CONNECTION", cause));
        if let Some(endpoint) = endpoint {
            payload = payload.with(element_names::ENDPOINT, endpoint.to_string());
        }
        self.emit(Name::SessionConnectionDown, payload);

        {
            let mut metrics = self.metrics.lock().await;
            metrics.last_updated = Some(Instant::now());
        }

        self.options.auto_restart()
    }

    /// Re-establishes the link with exponential backoff.
    ///
    /// Each attempt tries every endpoint once. Emits `SessionConnectionUp` on success. When
    /// the attempt limit is reached the session is terminated and `SessionTerminated` is
    /// emitted.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::AllHostsExhausted`] when the attempt limit was reached,
    /// [`ConnectionError::Terminated`] when `stop` interrupted the wait.
    pub async fn reconnect(&self) -> Result<Endpoint, ConnectionError> {
        let config = &self.options.reconnection;
        let round = u32::try_from(self.options.endpoints.len()).unwrap_or(u32::MAX);
        let mut attempt = 0u32;

        loop {
            if self.is_terminated() {
                return Err(ConnectionError::Terminated);
            }
            attempt += 1;
            if let Some(max_attempts) = config.max_attempts
                && attempt > max_attempts
            {
                error!("Maximum reconnection attempts ({}) reached", max_attempts);
                {
                    let mut metrics = self.metrics.lock().await;
                    metrics.failed_reconnections += 1;
                    metrics.last_updated = Some(Instant::now());
                }
                self.set_state(ConnectionState::Failed {
                    reason: "Maximum reconnection attempts reached".to_string(),
                })
                .await;
                self.terminate("Maximum reconnection attempts reached");
                return Err(ConnectionError::AllHostsExhausted {
                    attempts: max_attempts.saturating_mul(round),
                });
            }

            let delay = config.delay_for_attempt(attempt);
            self.set_state(ConnectionState::Reconnecting {
                attempt,
                next_retry: Instant::now() + delay,
            })
            .await;
            info!("Reconnection attempt {} in {:?}", attempt, delay);

            tokio::select! {
                _ = sleep(delay) => {},
                _ = self.shutdown_signal.notified() => {
                    debug!("Reconnection interrupted by stop");
                    return Err(ConnectionError::Terminated);
                }
            }
            if self.is_terminated() {
                return Err(ConnectionError::Terminated);
            }

            match self.connect_round(round).await {
                Ok(endpoint) => {
                    info!("Reconnection successful after {} attempts", attempt);
                    {
                        let mut metrics = self.metrics.lock().await;
                        metrics.successful_reconnections += 1;
                        metrics.last_updated = Some(Instant::now());
                    }
                    self.emit(
                        Name::SessionConnectionUp,
                        Element::complex(Name::SessionConnectionUp.as_str())
                            .with(element_names::ENDPOINT, endpoint.to_string()),
                    );
                    return Ok(endpoint);
                }
                Err(e) => warn!("Reconnection attempt {} failed: {}", attempt, e),
            }
        }
    }

    /// Adds `count` to the subscription recovery metric.
    pub async fn record_recoveries(&self, count: usize) {
        let mut metrics = self.metrics.lock().await;
        metrics.subscription_recoveries += count as u64;
        metrics.last_updated = Some(Instant::now());
    }

    /// Hands a frame to the transport.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotConnected`] when the link is down,
    /// [`ConnectionError::Terminated`] after stop.
    pub async fn send(&self, frame: Outbound) -> Result<(), ConnectionError> {
        if self.is_terminated() {
            return Err(ConnectionError::Terminated);
        }
        if !self.is_connected().await {
            return Err(ConnectionError::NotConnected);
        }
        match self.transport.send(frame).await {
            Ok(()) => Ok(()),
            Err(TransportError::NotConnected) => Err(ConnectionError::NotConnected),
            Err(e) => {
                warn!("Transport send failed: {}", e);
                match self.current_endpoint().await {
                    Some(endpoint) => Err(ConnectionError::HostUnreachable {
                        endpoint,
                        reason: e.to_string(),
                    }),
                    None => Err(ConnectionError::NotConnected),
                }
            }
        }
    }

    /// Closes the session. Only the first call has any effect; it emits
    /// `SessionTerminated` exactly once.
    pub async fn stop(&self, mode: StopMode) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            debug!("Session already stopped");
            return;
        }
        info!("Stopping session ({:?})", mode);
        self.shutdown_signal.notify_waiters();
        self.transport.disconnect(mode).await;
        self.endpoint.write().await.take();
        self.set_state(ConnectionState::Terminated).await;
        self.emit_terminated("Session stopped");
    }

    async fn connect_round(&self, attempts: u32) -> Result<Endpoint, ConnectionError> {
        let endpoints = &self.options.endpoints;
        if endpoints.is_empty() {
            return Err(ConnectionError::InvalidConfig(
                "at least one endpoint is required".to_string(),
            ));
        }
        let auth_options = self.options.auth_options();

        for attempt in 0..attempts {
            if self.is_terminated() {
                return Err(ConnectionError::Terminated);
            }
            let endpoint = &endpoints[attempt as usize % endpoints.len()];
            {
                let mut metrics = self.metrics.lock().await;
                metrics.total_connections += 1;
                metrics.last_updated = Some(Instant::now());
            }
            debug!("Connecting to {} (attempt {}/{})", endpoint, attempt + 1, attempts);

            let result = timeout(
                self.options.connect_timeout,
                self.transport
                    .connect(endpoint, auth_options.as_deref(), self.inbound.clone()),
            )
            .await;
            match result {
                Ok(Ok(())) => {
                    *self.endpoint.write().await = Some(endpoint.clone());
                    self.set_state(ConnectionState::Connected).await;
                    return Ok(endpoint.clone());
                }
                Ok(Err(e)) => warn!("Host {} unreachable: {}", endpoint, e),
                Err(_) => warn!(
                    "Connecting to {} timed out after {:?}",
                    endpoint, self.options.connect_timeout
                ),
            }
        }
        Err(ConnectionError::AllHostsExhausted { attempts })
    }

    fn terminate(&self, cause: &str) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.shutdown_signal.notify_waiters();
            self.emit_terminated(cause);
        }
    }

    fn emit_terminated(&self, cause: &str) {
        self.emit(
            Name::SessionTerminated,
            Element::complex(Name::SessionTerminated.as_str())
                .with_element(reason("SESSION", cause)),
        );
    }

    async fn set_state(&self, state: ConnectionState) {
        let mut current = self.connection_state.write().await;
        // Terminated is final.
        if *current != ConnectionState::Terminated {
            *current = state;
        }
    }

    fn emit(&self, name: Name, payload: Element) {
        let message = Message::with_payload(name, None, payload);
        let event = Event::single(EventType::SessionStatus, message);
        if self.inbound.send(TransportEvent::Event(event)).is_err() {
            debug!("Session status dropped, no consumer left");
        }
    }
}

fn reason(category: &str, description: &str) -> Element {
    Element::complex(element_names::REASON)
        .with(element_names::CATEGORY, category)
        .with(element_names::DESCRIPTION, description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use tokio::sync::mpsc;

    fn session_status(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<Name> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransportEvent::Event(event) = event {
                for message in event {
                    names.push(message.message_type().clone());
                }
            }
        }
        names
    }

    #[test]
    fn test_delay_for_attempt_without_jitter() {
        let config = ReconnectionConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500))
            .with_backoff_multiplier(2.0)
            .with_jitter_enabled(false);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_jitter_is_bounded() {
        let config = ReconnectionConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_jitter_enabled(true);
        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn test_reconnection_config_validation() {
        assert!(ReconnectionConfig::default().validate().is_ok());
        assert!(ReconnectionConfig::fast().validate().is_ok());
        assert!(ReconnectionConfig::conservative().validate().is_ok());
        assert!(ReconnectionConfig::new().with_max_attempts(0).validate().is_err());
        assert!(ReconnectionConfig::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(1))
            .validate()
            .is_err());
        assert!(!ReconnectionConfig::disabled().enabled);
    }

    #[tokio::test]
    async fn test_start_fails_over_to_next_host() {
        let primary = Endpoint::new("primary", 8194);
        let backup = Endpoint::new("backup", 8194);
        let mock = Arc::new(MockTransport::new().with_unreachable(primary.clone()));
        let options = SessionOptions::new(primary.clone()).with_endpoint(backup.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(mock.clone(), options, tx);

        assert_eq!(manager.start().await.unwrap(), backup);
        assert_eq!(mock.connect_log(), vec![primary, backup.clone()]);
        assert_eq!(manager.current_endpoint().await, Some(backup));
        assert_eq!(manager.get_connection_state().await, ConnectionState::Connected);
        assert_eq!(session_status(&mut rx), vec![Name::SessionStarted]);
        assert_eq!(manager.get_metrics().await.total_connections, 2);
    }

    #[tokio::test]
    async fn test_start_exhausts_all_hosts() {
        let a = Endpoint::new("a", 1);
        let b = Endpoint::new("b", 1);
        let mock = Arc::new(
            MockTransport::new()
                .with_unreachable(a.clone())
                .with_unreachable(b.clone()),
        );
        let options = SessionOptions::new(a.clone())
            .with_endpoint(b.clone())
            .with_connect_attempts(3);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(mock.clone(), options, tx);

        assert_eq!(
            manager.start().await,
            Err(ConnectionError::AllHostsExhausted { attempts: 3 })
        );
        assert_eq!(mock.connect_log(), vec![a.clone(), b, a]);
        assert!(matches!(
            manager.get_connection_state().await,
            ConnectionState::Failed { .. }
        ));
        assert_eq!(session_status(&mut rx), vec![Name::SessionStartupFailure]);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mock = Arc::new(MockTransport::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(mock, SessionOptions::default(), tx);
        manager.start().await.unwrap();

        manager.stop(StopMode::Graceful).await;
        manager.stop(StopMode::Immediate).await;

        assert_eq!(
            session_status(&mut rx),
            vec![Name::SessionStarted, Name::SessionTerminated]
        );
        assert_eq!(manager.get_connection_state().await, ConnectionState::Terminated);
        assert_eq!(manager.start().await, Err(ConnectionError::Terminated));
        assert!(!manager.handle_disconnection("late").await);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mock = Arc::new(MockTransport::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(mock, SessionOptions::default(), tx);
        let frame = Outbound::Cancel {
            correlation_id: 1.into(),
        };
        assert_eq!(
            manager.send(frame.clone()).await,
            Err(ConnectionError::NotConnected)
        );
        manager.start().await.unwrap();
        assert!(manager.send(frame).await.is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_after_drop() {
        let endpoint = Endpoint::new("h", 1);
        let mock = Arc::new(MockTransport::new());
        let options = SessionOptions::new(endpoint.clone())
            .with_reconnection(ReconnectionConfig::fast());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(mock.clone(), options, tx);
        manager.start().await.unwrap();

        mock.set_reachable(&endpoint, false);
        mock.drop_connection("reset");
        assert!(manager.handle_disconnection("reset").await);
        assert!(!manager.is_connected().await);

        let reconnect = manager.reconnect();
        let heal = async {
            sleep(Duration::from_millis(30)).await;
            mock.set_reachable(&endpoint, true);
        };
        let (result, ()) = tokio::join!(reconnect, heal);
        assert_eq!(result.unwrap(), endpoint);

        let names = session_status(&mut rx);
        assert_eq!(names.first(), Some(&Name::SessionStarted));
        assert!(names.contains(&Name::SessionConnectionDown));
        assert_eq!(names.last(), Some(&Name::SessionConnectionUp));
        assert_eq!(manager.get_metrics().await.successful_reconnections, 1);
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_and_terminates() {
        let endpoint = Endpoint::new("h", 1);
        let mock = Arc::new(MockTransport::new());
        let options = SessionOptions::new(endpoint.clone()).with_reconnection(
            ReconnectionConfig::fast().with_max_attempts(2),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(mock.clone(), options, tx);
        manager.start().await.unwrap();
        mock.set_reachable(&endpoint, false);
        manager.handle_disconnection("reset").await;

        assert_eq!(
            manager.reconnect().await,
            Err(ConnectionError::AllHostsExhausted { attempts: 2 })
        );
        assert!(manager.is_terminated());
        let names = session_status(&mut rx);
        assert_eq!(
            names.iter().filter(|n| **n == Name::SessionTerminated).count(),
            1
        );
        manager.stop(StopMode::Immediate).await;
        assert!(session_status(&mut rx).is_empty());
    }
}
