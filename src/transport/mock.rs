use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{Endpoint, InboundSender, Outbound, Transport, TransportError, TransportEvent};
use crate::connection::StopMode;
use crate::message::{CorrelationId, Element, Event, EventType, Message, Name, element_names};

/// A reply the mock sends for a request operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedReply {
    /// `PartialResponse` or `Response` (or any other type to test odd sequences)
    pub event_type: EventType,
    /// Payload; its name becomes the message type
    pub payload: Element,
}

impl ScriptedReply {
    /// Intermediate reply.
    pub fn partial(payload: Element) -> Self {
        Self {
            event_type: EventType::PartialResponse,
            payload,
        }
    }

    /// Terminal reply.
    pub fn response(payload: Element) -> Self {
        Self {
            event_type: EventType::Response,
            payload,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    inbound: Option<InboundSender>,
    connected: Option<Endpoint>,
    unreachable: HashSet<Endpoint>,
    connect_log: Vec<Endpoint>,
    sent: Vec<Outbound>,
    services: HashMap<String, Vec<String>>,
    bad_fields: HashMap<String, Vec<String>>,
    failing_topics: HashMap<String, (String, String)>,
    active_topics: HashMap<String, CorrelationId>,
    replies: HashMap<String, Vec<ScriptedReply>>,
    token_failure: Option<(String, String)>,
    authorization_denial: Option<(String, String)>,
    withhold_token: bool,
    withhold_authorization: bool,
    withhold_subscription_status: bool,
    tokens_issued: u64,
}

/// In-memory [`Transport`] that answers frames from a script.
///
/// Unscripted services fail to open, subscriptions start immediately (reporting the
/// configured bad fields as exceptions), unsubscribes are acknowledged and requests
/// without a script get a single empty `Response`.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Creates a mock where every endpoint is reachable.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `endpoint` refuse connections.
    #[must_use]
    pub fn with_unreachable(self, endpoint: Endpoint) -> Self {
        self.lock().unreachable.insert(endpoint);
        self
    }

    /// Advertises a service and its operations.
    #[must_use]
    pub fn with_service(self, name: &str, operations: &[&str]) -> Self {
        self.lock().services.insert(
            name.to_string(),
            operations.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Rejects `fields` of `topic` with a per-field exception.
    #[must_use]
    pub fn with_bad_fields(self, topic: &str, fields: &[&str]) -> Self {
        self.lock().bad_fields.insert(
            topic.to_string(),
            fields.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Fails every subscription to `topic`.
    #[must_use]
    pub fn with_failing_topic(self, topic: &str, category: &str, description: &str) -> Self {
        self.lock().failing_topics.insert(
            topic.to_string(),
            (category.to_string(), description.to_string()),
        );
        self
    }

    /// Scripts the replies to `operation`.
    #[must_use]
    pub fn with_replies(self, operation: &str, replies: Vec<ScriptedReply>) -> Self {
        self.lock().replies.insert(operation.to_string(), replies);
        self
    }

    /// Answers token generation with a failure.
    #[must_use]
    pub fn with_token_failure(self, category: &str, description: &str) -> Self {
        self.lock().token_failure = Some((category.to_string(), description.to_string()));
        self
    }

    /// Answers authorization with a denial.
    #[must_use]
    pub fn with_authorization_denied(self, category: &str, description: &str) -> Self {
        self.lock().authorization_denial = Some((category.to_string(), description.to_string()));
        self
    }

    /// Never answers token generation.
    #[must_use]
    pub fn withholding_token(self) -> Self {
        self.lock().withhold_token = true;
        self
    }

    /// Never answers authorization.
    #[must_use]
    pub fn withholding_authorization(self) -> Self {
        self.lock().withhold_authorization = true;
        self
    }

    /// Never answers subscribe frames.
    #[must_use]
    pub fn withholding_subscription_status(self) -> Self {
        self.lock().withhold_subscription_status = true;
        self
    }

    /// Marks an endpoint reachable or not at runtime.
    pub fn set_reachable(&self, endpoint: &Endpoint, reachable: bool) {
        let mut state = self.lock();
        if reachable {
            state.unreachable.remove(endpoint);
        } else {
            state.unreachable.insert(endpoint.clone());
        }
    }

    /// Simulates a dropped link.
    pub fn drop_connection(&self, reason: &str) {
        let mut state = self.lock();
        state.connected = None;
        state.active_topics.clear();
        if let Some(inbound) = state.inbound.take() {
            let _ = inbound.send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Publishes a data message on the active subscription to `topic`.
    ///
    /// Returns `false` if the topic is not subscribed on the current connection.
    pub fn publish(&self, topic: &str, payload: Element) -> bool {
        let state = self.lock();
        let Some(correlation_id) = state.active_topics.get(topic).cloned() else {
            return false;
        };
        let message = Message::with_payload(Name::MarketDataEvents, Some(correlation_id), payload);
        Self::push(&state, Event::single(EventType::SubscriptionData, message));
        true
    }

    /// Pushes an arbitrary event to the session.
    pub fn inject(&self, event: Event) -> bool {
        let state = self.lock();
        Self::push(&state, event)
    }

    /// Frames sent so far.
    pub fn sent(&self) -> Vec<Outbound> {
        self.lock().sent.clone()
    }

    /// Endpoints tried so far, in order.
    pub fn connect_log(&self) -> Vec<Endpoint> {
        self.lock().connect_log.clone()
    }

    /// Endpoint of the live connection.
    pub fn connected_endpoint(&self) -> Option<Endpoint> {
        self.lock().connected.clone()
    }

    /// Topics subscribed on the live connection.
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().active_topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    fn push(state: &MockState, event: Event) -> bool {
        match &state.inbound {
            Some(inbound) => inbound.send(TransportEvent::Event(event)).is_ok(),
            None => false,
        }
    }

    fn reason(category: &str, description: &str) -> Element {
        Element::complex(element_names::REASON)
            .with(element_names::CATEGORY, category)
            .with(element_names::DESCRIPTION, description)
    }

    fn status(name: Name, correlation_id: CorrelationId, payload: Element) -> Message {
        Message::with_payload(name, Some(correlation_id), payload)
    }

    fn respond(state: &mut MockState, frame: &Outbound) {
        match frame {
            Outbound::OpenService {
                correlation_id,
                service,
            } => {
                let message = match state.services.get(service) {
                    Some(operations) => {
                        let mut list = Element::array(element_names::OPERATIONS);
                        for operation in operations {
                            list = list.with_value(operation.as_str());
                        }
                        let payload = Element::complex(Name::ServiceOpened.as_str())
                            .with(element_names::SERVICE_NAME, service.as_str())
                            .with_element(list);
                        Self::status(Name::ServiceOpened, correlation_id.clone(), payload)
                    }
                    None => {
                        let payload = Element::complex(Name::ServiceOpenFailure.as_str())
                            .with(element_names::SERVICE_NAME, service.as_str())
                            .with_element(Self::reason("NOT_FOUND", "Service not found"));
                        Self::status(Name::ServiceOpenFailure, correlation_id.clone(), payload)
                    }
                };
                Self::push(state, Event::single(EventType::ServiceStatus, message));
            }
            Outbound::GenerateToken { correlation_id, .. } => {
                if state.withhold_token {
                    return;
                }
                let message = match &state.token_failure {
                    Some((category, description)) => Self::status(
                        Name::TokenGenerationFailure,
                        correlation_id.clone(),
                        Element::complex(Name::TokenGenerationFailure.as_str())
                            .with_element(Self::reason(category, description)),
                    ),
                    None => {
                        state.tokens_issued += 1;
                        Self::status(
                            Name::TokenGenerationSuccess,
                            correlation_id.clone(),
                            Element::complex(Name::TokenGenerationSuccess.as_str()).with(
                                element_names::TOKEN,
                                format!("token-{}", state.tokens_issued),
                            ),
                        )
                    }
                };
                Self::push(state, Event::single(EventType::TokenStatus, message));
            }
            Outbound::Authorize { correlation_id, .. } => {
                if state.withhold_authorization {
                    return;
                }
                let message = match &state.authorization_denial {
                    Some((category, description)) => Self::status(
                        Name::AuthorizationFailure,
                        correlation_id.clone(),
                        Element::complex(Name::AuthorizationFailure.as_str())
                            .with_element(Self::reason(category, description)),
                    ),
                    None => Self::status(
                        Name::AuthorizationSuccess,
                        correlation_id.clone(),
                        Element::complex(Name::AuthorizationSuccess.as_str()),
                    ),
                };
                Self::push(state, Event::single(EventType::AuthorizationStatus, message));
            }
            Outbound::Subscribe { subscription, .. } => {
                if state.withhold_subscription_status {
                    return;
                }
                let topic = subscription.topic().to_string();
                let correlation_id = subscription.correlation_id().clone();
                let message = if let Some((category, description)) =
                    state.failing_topics.get(&topic)
                {
                    Self::status(
                        Name::SubscriptionFailure,
                        correlation_id,
                        Element::complex(Name::SubscriptionFailure.as_str())
                            .with_element(Self::reason(category, description)),
                    )
                } else if state.active_topics.contains_key(&topic) {
                    Self::status(
                        Name::SubscriptionFailure,
                        correlation_id,
                        Element::complex(Name::SubscriptionFailure.as_str()).with_element(
                            Self::reason("DUPLICATE_SUBSCRIPTION", "Topic already subscribed"),
                        ),
                    )
                } else {
                    let bad = state.bad_fields.get(&topic).cloned().unwrap_or_default();
                    let mut exceptions = Element::array(element_names::EXCEPTIONS);
                    for field in subscription.fields().iter().filter(|f| bad.contains(f)) {
                        let entry = Element::complex(element_names::EXCEPTIONS)
                            .with(element_names::FIELD_ID, field.as_str())
                            .with_element(Self::reason("BAD_FLD", "Field not valid"));
                        exceptions = exceptions.with_entry(entry);
                    }
                    state
                        .active_topics
                        .insert(topic.clone(), correlation_id.clone());
                    let mut payload = Element::complex(Name::SubscriptionStarted.as_str())
                        .with(element_names::TOPIC, topic.as_str());
                    if exceptions.num_values() > 0 {
                        payload = payload.with_element(exceptions);
                    }
                    Self::status(Name::SubscriptionStarted, correlation_id, payload)
                };
                Self::push(state, Event::single(EventType::SubscriptionStatus, message));
            }
            Outbound::Unsubscribe {
                correlation_id,
                topic,
            } => {
                if state.active_topics.get(topic) == Some(correlation_id) {
                    state.active_topics.remove(topic);
                }
                let message = Self::status(
                    Name::SubscriptionTerminated,
                    correlation_id.clone(),
                    Element::complex(Name::SubscriptionTerminated.as_str())
                        .with(element_names::TOPIC, topic.as_str()),
                );
                Self::push(state, Event::single(EventType::SubscriptionStatus, message));
            }
            Outbound::Request {
                correlation_id,
                request,
                ..
            } => {
                let replies = state
                    .replies
                    .get(request.operation())
                    .cloned()
                    .unwrap_or_else(|| {
                        vec![ScriptedReply::response(Element::complex(format!(
                            "{}Response",
                            request.operation().trim_end_matches("Request")
                        )))]
                    });
                for reply in replies {
                    let name = Name::parse(reply.payload.name());
                    let message =
                        Message::with_payload(name, Some(correlation_id.clone()), reply.payload);
                    Self::push(state, Event::single(reply.event_type, message));
                }
            }
            Outbound::Cancel { correlation_id } => {
                debug!("Mock transport: cancel for {}", correlation_id);
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _auth_options: Option<&str>,
        inbound: InboundSender,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connect_log.push(endpoint.clone());
        if state.unreachable.contains(endpoint) {
            return Err(TransportError::Unreachable(endpoint.to_string()));
        }
        state.connected = Some(endpoint.clone());
        state.inbound = Some(inbound);
        state.active_topics.clear();
        Ok(())
    }

    async fn send(&self, frame: Outbound) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.connected.is_none() {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(frame.clone());
        Self::respond(&mut state, &frame);
        Ok(())
    }

    async fn disconnect(&self, mode: StopMode) {
        debug!("Mock transport: disconnect ({:?})", mode);
        let mut state = self.lock();
        state.connected = None;
        state.inbound = None;
        state.active_topics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_refused() {
        let bad = Endpoint::new("bad", 1);
        let mock = MockTransport::new().with_unreachable(bad.clone());
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(mock.connect(&bad, None, tx.clone()).await.is_err());
        assert!(mock.connect(&Endpoint::new("good", 1), None, tx).await.is_ok());
        assert_eq!(mock.connect_log().len(), 2);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let mock = MockTransport::new();
        let frame = Outbound::Cancel {
            correlation_id: CorrelationId::Int(1),
        };
        assert_eq!(mock.send(frame).await, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_drop_connection_notifies_inbound() {
        let mock = MockTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        mock.connect(&Endpoint::new("h", 1), None, tx).await.unwrap();
        mock.drop_connection("link reset");
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Disconnected {
                reason: "link reset".to_string()
            })
        );
        assert!(mock.connected_endpoint().is_none());
    }
}
