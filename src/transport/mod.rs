//! Seam between the session core and whatever moves bytes to the backend.
//!
//! The core never frames or encodes anything itself: it hands [`Outbound`] frames to a
//! [`Transport`] and receives decoded [`Event`]s back through an inbound channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::connection::StopMode;
use crate::message::{CorrelationId, Event};
use crate::request::Request;
use crate::subscription::Subscription;
use crate::utils::ConnectionError;

mod mock;

pub use mock::{MockTransport, ScriptedReply};

/// Default backend port.
pub const DEFAULT_PORT: u16 = 8194;

/// A candidate backend host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host` or `host:port`, using [`DEFAULT_PORT`] when the port is omitted.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidConfig`] for an empty host or a bad port.
    pub fn parse(input: &str) -> Result<Self, ConnectionError> {
        let input = input.trim();
        let (host, port) = match input.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    ConnectionError::InvalidConfig(format!("bad port in {}: {}", input, e))
                })?;
                (host, port)
            }
            None => (input, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(ConnectionError::InvalidConfig(format!(
                "missing host in '{}'",
                input
            )));
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Frames the core asks the transport to deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Open a service
    OpenService {
        /// Id the service status reply will carry
        correlation_id: CorrelationId,
        /// Service name
        service: String,
    },
    /// Generate an authentication token
    GenerateToken {
        /// Id the token status reply will carry
        correlation_id: CorrelationId,
        /// Authentication options of the configured strategy
        auth_options: Option<String>,
    },
    /// Authorize a token against a service
    Authorize {
        /// Id the authorization reply will carry
        correlation_id: CorrelationId,
        /// Token to authorize
        token: String,
        /// Authorization request built from the target service
        request: Request,
    },
    /// Start a subscription
    Subscribe {
        /// Subscription to start
        subscription: Subscription,
        /// Identity the data is entitled against
        identity: Option<CorrelationId>,
    },
    /// Stop a subscription
    Unsubscribe {
        /// Subscription id
        correlation_id: CorrelationId,
        /// Subscription topic
        topic: String,
    },
    /// Send a request
    Request {
        /// Id every partial and final reply will carry
        correlation_id: CorrelationId,
        /// The request
        request: Request,
        /// Identity the request is entitled against
        identity: Option<CorrelationId>,
    },
    /// Ask the backend to stop replying to a request
    Cancel {
        /// Request id
        correlation_id: CorrelationId,
    },
}

/// What a transport pushes into the core.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded event
    Event(Event),
    /// The connection dropped
    Disconnected {
        /// Transport supplied reason
        reason: String,
    },
}

/// Sender half handed to the transport on every connect.
pub type InboundSender = mpsc::UnboundedSender<TransportEvent>;

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint refused the connection
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// A frame was sent without a live connection
    #[error("not connected")]
    NotConnected,
    /// Any other failure
    #[error("{0}")]
    Other(String),
}

/// The external session/transport collaborator.
///
/// Implementations own framing, encoding and network I/O. They must push every
/// decoded inbound event, and a single `Disconnected` when the link drops, into the
/// sender received on `connect`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a connection to `endpoint`.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        auth_options: Option<&str>,
        inbound: InboundSender,
    ) -> Result<(), TransportError>;

    /// Delivers one outbound frame.
    async fn send(&self, frame: Outbound) -> Result<(), TransportError>;

    /// Closes the connection. `Graceful` lets in-flight frames drain first.
    async fn disconnect(&self, mode: StopMode);
}
