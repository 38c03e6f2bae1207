//! Per-request state machine: `Pending -> PartialReceiving* -> retired`.
//!
//! Only ids in flight are delivered. Once the terminal reply (or an error, or a cancel)
//! retires an id, anything still arriving for it is dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::{CorrelationId, EventType, Message};
use crate::utils::{ConnectionError, RequestError};

const RETIRED_HISTORY: usize = 1024;

/// Reply forwarded to the channel returned by `Session::request`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Intermediate data
    Partial(Message),
    /// Terminal data
    Final(Message),
    /// Terminal error; no data follows
    Failed(RequestError),
}

/// What the dispatcher should do with a correlated reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Deliver as partial data
    Partial,
    /// Deliver as the terminal reply
    Final,
    /// Deliver as the terminal error
    Error(RequestError),
    /// Not in flight; drop silently
    Dropped,
}

/// Progress of a request in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Sent, nothing received yet
    Pending,
    /// At least one partial reply received
    PartialReceiving {
        /// Partial replies so far
        partials: usize,
    },
}

#[derive(Debug)]
struct Tracked {
    operation: String,
    state: RequestState,
    sink: Option<mpsc::UnboundedSender<Reply>>,
}

impl Tracked {
    fn forward(&self, reply: Reply) {
        if let Some(sink) = &self.sink
            && sink.send(reply).is_err()
        {
            debug!("Reply receiver for {} dropped", self.operation);
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    in_flight: HashMap<CorrelationId, Tracked>,
    retired: HashSet<CorrelationId>,
    retired_order: VecDeque<CorrelationId>,
}

impl Inner {
    fn retire(&mut self, correlation_id: &CorrelationId) -> Option<Tracked> {
        let tracked = self.in_flight.remove(correlation_id)?;
        if self.retired.insert(correlation_id.clone()) {
            self.retired_order.push_back(correlation_id.clone());
            if self.retired_order.len() > RETIRED_HISTORY
                && let Some(oldest) = self.retired_order.pop_front()
            {
                self.retired.remove(&oldest);
            }
        }
        Some(tracked)
    }
}

/// Matches replies to requests by correlation id.
#[derive(Debug, Default)]
pub struct RequestResponseCorrelator {
    inner: Mutex<Inner>,
}

impl RequestResponseCorrelator {
    /// Creates an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts tracking a request. A retired id may be reused.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidRequest`] when the id is already in flight.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        operation: &str,
        sink: Option<mpsc::UnboundedSender<Reply>>,
    ) -> Result<(), RequestError> {
        let mut inner = self.lock();
        if inner.in_flight.contains_key(&correlation_id) {
            return Err(RequestError::InvalidRequest(format!(
                "correlation id {} is already in flight",
                correlation_id
            )));
        }
        inner.retired.remove(&correlation_id);
        inner.in_flight.insert(
            correlation_id,
            Tracked {
                operation: operation.to_string(),
                state: RequestState::Pending,
                sink,
            },
        );
        Ok(())
    }

    /// Classifies a correlated reply and advances the request's state.
    ///
    /// The error block is checked before anything else: a reply carrying one is
    /// terminal, whatever its event type.
    pub fn accept(&self, event_type: EventType, message: &Message) -> Delivery {
        let Some(correlation_id) = message.correlation_id() else {
            return Delivery::Dropped;
        };
        let mut inner = self.lock();
        if !inner.in_flight.contains_key(correlation_id) {
            debug!(
                "Dropping {} for {}: not in flight",
                message.message_type(),
                correlation_id
            );
            return Delivery::Dropped;
        }

        if let Some(info) = message.response_error() {
            let error = RequestError::Response {
                category: info.category,
                description: info.description,
            };
            if let Some(tracked) = inner.retire(correlation_id) {
                warn!("{} {} failed: {}", tracked.operation, correlation_id, error);
                tracked.forward(Reply::Failed(error.clone()));
            }
            return Delivery::Error(error);
        }

        match event_type {
            EventType::PartialResponse => {
                if let Some(tracked) = inner.in_flight.get_mut(correlation_id) {
                    tracked.state = match tracked.state {
                        RequestState::Pending => RequestState::PartialReceiving { partials: 1 },
                        RequestState::PartialReceiving { partials } => {
                            RequestState::PartialReceiving {
                                partials: partials + 1,
                            }
                        }
                    };
                    tracked.forward(Reply::Partial(message.clone()));
                }
                Delivery::Partial
            }
            EventType::Response => {
                if let Some(tracked) = inner.retire(correlation_id) {
                    tracked.forward(Reply::Final(message.clone()));
                }
                Delivery::Final
            }
            _ => {
                let (category, description) = match message.reason() {
                    Some(info) => (info.category, info.description),
                    None => ("UNKNOWN".to_string(), message.message_type().to_string()),
                };
                let error = RequestError::Response {
                    category,
                    description,
                };
                if let Some(tracked) = inner.retire(correlation_id) {
                    warn!("{} {} failed: {}", tracked.operation, correlation_id, error);
                    tracked.forward(Reply::Failed(error.clone()));
                }
                Delivery::Error(error)
            }
        }
    }

    /// Stops tracking a request. Returns whether it was in flight.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        match self.lock().retire(correlation_id) {
            Some(tracked) => {
                debug!("{} {} cancelled", tracked.operation, correlation_id);
                tracked.forward(Reply::Failed(RequestError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Retires a request that could not be sent.
    pub fn fail(&self, correlation_id: &CorrelationId, error: RequestError) {
        if let Some(tracked) = self.lock().retire(correlation_id) {
            tracked.forward(Reply::Failed(error));
        }
    }

    /// Retires every request in flight, e.g. when the session stops.
    pub fn fail_all(&self, error: ConnectionError) {
        let mut inner = self.lock();
        let ids: Vec<CorrelationId> = inner.in_flight.keys().cloned().collect();
        for correlation_id in ids {
            if let Some(tracked) = inner.retire(&correlation_id) {
                tracked.forward(Reply::Failed(RequestError::Connection(error.clone())));
            }
        }
    }

    /// State of a request in flight.
    pub fn state(&self, correlation_id: &CorrelationId) -> Option<RequestState> {
        self.lock()
            .in_flight
            .get(correlation_id)
            .map(|tracked| tracked.state)
    }

    /// Whether the id is in flight.
    pub fn is_in_flight(&self, correlation_id: &CorrelationId) -> bool {
        self.lock().in_flight.contains_key(correlation_id)
    }

    /// Whether the id was recently retired.
    pub fn is_retired(&self, correlation_id: &CorrelationId) -> bool {
        self.lock().retired.contains(correlation_id)
    }

    /// Number of requests in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Element, Name, element_names};

    fn reply(name: &str, id: i64, payload: Element) -> Message {
        Message::with_payload(Name::parse(name), Some(CorrelationId::Int(id)), payload)
    }

    fn bar_data(id: i64, close: f64) -> Message {
        reply(
            "IntradayBarResponse",
            id,
            Element::complex("IntradayBarResponse").with("close", close),
        )
    }

    #[test]
    fn test_partial_then_final() {
        let correlator = RequestResponseCorrelator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator
            .register(CorrelationId::Int(1), "IntradayBarRequest", Some(tx))
            .unwrap();

        assert_eq!(
            correlator.accept(EventType::PartialResponse, &bar_data(1, 10.0)),
            Delivery::Partial
        );
        assert_eq!(
            correlator.state(&CorrelationId::Int(1)),
            Some(RequestState::PartialReceiving { partials: 1 })
        );
        assert_eq!(
            correlator.accept(EventType::Response, &bar_data(1, 11.0)),
            Delivery::Final
        );
        assert_eq!(
            correlator.accept(EventType::Response, &bar_data(1, 11.0)),
            Delivery::Dropped
        );
        assert!(correlator.is_retired(&CorrelationId::Int(1)));

        assert!(matches!(rx.try_recv(), Ok(Reply::Partial(_))));
        assert!(matches!(rx.try_recv(), Ok(Reply::Final(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_error_payload_is_terminal() {
        let correlator = RequestResponseCorrelator::new();
        correlator
            .register(CorrelationId::Int(2), "ReferenceDataRequest", None)
            .unwrap();
        let error = reply(
            "ReferenceDataResponse",
            2,
            Element::complex("ReferenceDataResponse").with_element(
                Element::complex(element_names::RESPONSE_ERROR)
                    .with(element_names::CATEGORY, "BAD_SEC")
                    .with(element_names::MESSAGE, "Unknown security"),
            ),
        );
        assert_eq!(
            correlator.accept(EventType::PartialResponse, &error),
            Delivery::Error(RequestError::Response {
                category: "BAD_SEC".to_string(),
                description: "Unknown security".to_string(),
            })
        );
        assert_eq!(correlator.in_flight(), 0);
    }

    #[test]
    fn test_cancel_retires() {
        let correlator = RequestResponseCorrelator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator
            .register(CorrelationId::Int(3), "IntradayBarRequest", Some(tx))
            .unwrap();
        assert!(correlator.cancel(&CorrelationId::Int(3)));
        assert!(!correlator.cancel(&CorrelationId::Int(3)));
        assert_eq!(
            correlator.accept(EventType::PartialResponse, &bar_data(3, 1.0)),
            Delivery::Dropped
        );
        assert_eq!(rx.try_recv(), Ok(Reply::Failed(RequestError::Cancelled)));
    }

    #[test]
    fn test_ids_in_flight_are_unique_and_retired_ids_reusable() {
        let correlator = RequestResponseCorrelator::new();
        correlator
            .register(CorrelationId::Int(4), "A", None)
            .unwrap();
        assert!(correlator
            .register(CorrelationId::Int(4), "A", None)
            .is_err());
        correlator.accept(EventType::Response, &bar_data(4, 1.0));
        assert!(correlator
            .register(CorrelationId::Int(4), "A", None)
            .is_ok());
        assert!(!correlator.is_retired(&CorrelationId::Int(4)));
    }

    #[test]
    fn test_request_failure_message_is_terminal() {
        let correlator = RequestResponseCorrelator::new();
        correlator
            .register(CorrelationId::Int(5), "A", None)
            .unwrap();
        let failure = reply(
            "RequestFailure",
            5,
            Element::complex("RequestFailure").with_element(
                Element::complex(element_names::REASON)
                    .with(element_names::CATEGORY, "TIMEOUT")
                    .with(element_names::DESCRIPTION, "Request timed out"),
            ),
        );
        assert!(matches!(
            correlator.accept(EventType::RequestStatus, &failure),
            Delivery::Error(RequestError::Response { .. })
        ));
        assert!(!correlator.is_in_flight(&CorrelationId::Int(5)));
    }

    #[test]
    fn test_fail_all() {
        let correlator = RequestResponseCorrelator::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        correlator
            .register(CorrelationId::Int(6), "A", Some(tx))
            .unwrap();
        correlator.fail_all(ConnectionError::Terminated);
        assert_eq!(correlator.in_flight(), 0);
        assert_eq!(
            rx.try_recv(),
            Ok(Reply::Failed(RequestError::Connection(
                ConnectionError::Terminated
            )))
        );
    }
}
