use serde::{Deserialize, Serialize};

use crate::message::correlation::CorrelationId;
use crate::message::element::{Element, ErrorInfo};
use crate::message::name::{Name, element as names};
use crate::utils::DecodeError;

/// Classification shared by every message of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Session lifecycle: started, connection up/down, terminated
    SessionStatus,
    /// Service open results
    ServiceStatus,
    /// Token generation results
    TokenStatus,
    /// Authorization results and revocations
    AuthorizationStatus,
    /// Subscription lifecycle: started, failed, terminated
    SubscriptionStatus,
    /// Subscription data
    SubscriptionData,
    /// Intermediate reply of a request
    PartialResponse,
    /// Terminal reply of a request
    Response,
    /// Request level failures
    RequestStatus,
    /// Administrative notices
    Admin,
    /// Anything the core does not classify
    Unknown,
}

impl EventType {
    /// Whether messages of this type are bound to a correlation id.
    pub fn is_correlated(self) -> bool {
        !matches!(
            self,
            EventType::SessionStatus | EventType::Admin | EventType::Unknown
        )
    }
}

/// A single message: type name, optional correlation id and structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    message_type: Name,
    correlation_id: Option<CorrelationId>,
    payload: Element,
}

impl Message {
    /// Creates a message whose payload root is named after the message type.
    pub fn new(message_type: impl Into<Name>, correlation_id: Option<CorrelationId>) -> Self {
        let message_type = message_type.into();
        let payload = Element::complex(message_type.as_str());
        Self {
            message_type,
            correlation_id,
            payload,
        }
    }

    /// Creates a message with an explicit payload.
    pub fn with_payload(
        message_type: impl Into<Name>,
        correlation_id: Option<CorrelationId>,
        payload: Element,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            correlation_id,
            payload,
        }
    }

    /// Message type name.
    pub fn message_type(&self) -> &Name {
        &self.message_type
    }

    /// Correlation id, `None` for session level messages.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    /// Payload root.
    pub fn payload(&self) -> &Element {
        &self.payload
    }

    /// Mutable payload root.
    pub fn payload_mut(&mut self) -> &mut Element {
        &mut self.payload
    }

    /// Shortcut for `payload().has_element(name)`.
    pub fn has_element(&self, name: &str) -> bool {
        self.payload.has_element(name)
    }

    /// Shortcut for `payload().get_element(name)`.
    pub fn get_element(&self, name: &str) -> Result<&Element, DecodeError> {
        self.payload.get_element(name)
    }

    /// Error block of a response, checked before any normal field is read.
    pub fn response_error(&self) -> Option<ErrorInfo> {
        self.payload
            .get_element(names::RESPONSE_ERROR)
            .ok()
            .and_then(ErrorInfo::from_element)
    }

    /// Failure reason block (`reason`) of a status message.
    pub fn reason(&self) -> Option<ErrorInfo> {
        self.payload
            .get_element(names::REASON)
            .ok()
            .and_then(ErrorInfo::from_element)
    }

    /// JSON rendering for logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unprintable message: {}>", e))
    }
}

/// An ordered, finite batch of messages sharing one [`EventType`].
///
/// Iterating consumes the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    event_type: EventType,
    messages: Vec<Message>,
}

impl Event {
    /// Creates an event.
    pub fn new(event_type: EventType, messages: Vec<Message>) -> Self {
        Self {
            event_type,
            messages,
        }
    }

    /// Creates a single message event.
    pub fn single(event_type: EventType, message: Message) -> Self {
        Self::new(event_type, vec![message])
    }

    /// Event classification.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Messages in delivery order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the event carries no message.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl IntoIterator for Event {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}
