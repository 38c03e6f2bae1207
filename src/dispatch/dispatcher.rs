//! Routing of inbound events to handlers.
//!
//! Every message updates subscription and request state exactly once, then reaches at
//! most one handler callback. Listener and handler code runs under `catch_unwind`, so
//! a failing consumer costs one message, never the loop.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::dispatch::handler::EventHandler;
use crate::message::{CorrelationId, Event, EventType, Message, Name};
use crate::request::{Delivery, RequestResponseCorrelator};
use crate::subscription::{DataDelivery, ListenerNotice, StatusChange, SubscriptionRegistry};
use crate::utils::{ConnectionError, RequestError, catch_panic};

/// A handler or listener callback that returned an error or panicked.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerFailure {
    /// Type of the message being handled
    pub message_type: Name,
    /// Its correlation id
    pub correlation_id: Option<CorrelationId>,
    /// Error text or panic payload
    pub error: String,
}

/// Outcome of dispatching one or more events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Messages handed to a handler callback
    pub delivered: usize,
    /// Messages dropped: stale ids, untracked subscriptions, repeated termination
    pub dropped: usize,
    /// Callbacks that failed
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    /// Adds another report to this one.
    pub fn merge(&mut self, other: DispatchReport) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.failures.extend(other.failures);
    }

    /// Whether every callback succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, message: &Message, error: String) {
        self.failures.push(HandlerFailure {
            message_type: message.message_type().clone(),
            correlation_id: message.correlation_id().cloned(),
            error,
        });
    }
}

enum Route {
    SessionStatus,
    ServiceStatus,
    Auth,
    SubscriptionStatus(StatusChange),
    SubscriptionData,
    Partial,
    Final,
    RequestError(RequestError),
    Other,
    Drop,
}

/// Classifies events by type tag, updates subscription and request state, and routes
/// each message to the matching [`EventHandler`] callback.
///
/// State is updated exactly once per message, whether the event is dispatched to a
/// handler or only filtered for a polling consumer.
#[derive(Debug)]
pub struct EventDispatcher {
    registry: Arc<SubscriptionRegistry>,
    correlator: Arc<RequestResponseCorrelator>,
    terminated: bool,
}

impl EventDispatcher {
    /// Creates a dispatcher over the session's shared state.
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        correlator: Arc<RequestResponseCorrelator>,
    ) -> Self {
        Self {
            registry,
            correlator,
            terminated: false,
        }
    }

    /// Whether `SessionTerminated` went through.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn route(
        &mut self,
        event_type: EventType,
        message: &Message,
    ) -> (Route, Option<ListenerNotice>) {
        let route = match event_type {
            EventType::SessionStatus => {
                if *message.message_type() == Name::SessionTerminated {
                    if self.terminated {
                        debug!("Dropping repeated SessionTerminated");
                        return (Route::Drop, None);
                    }
                    self.terminated = true;
                    self.correlator.fail_all(ConnectionError::Terminated);
                    self.registry.clear();
                }
                Route::SessionStatus
            }
            EventType::ServiceStatus => Route::ServiceStatus,
            EventType::TokenStatus | EventType::AuthorizationStatus => Route::Auth,
            EventType::SubscriptionStatus => match self.registry.apply_status(message) {
                Some(update) => return (Route::SubscriptionStatus(update.change), update.notice),
                None => {
                    debug!(
                        "Dropping {} for untracked subscription {:?}",
                        message.message_type(),
                        message.correlation_id()
                    );
                    Route::Drop
                }
            },
            EventType::SubscriptionData => match self.registry.apply_data(message) {
                DataDelivery::Deliver(notice) => return (Route::SubscriptionData, notice),
                DataDelivery::Drop => Route::Drop,
            },
            EventType::PartialResponse | EventType::Response | EventType::RequestStatus => {
                match self.correlator.accept(event_type, message) {
                    Delivery::Partial => Route::Partial,
                    Delivery::Final => Route::Final,
                    Delivery::Error(error) => Route::RequestError(error),
                    Delivery::Dropped => Route::Drop,
                }
            }
            EventType::Admin | EventType::Unknown => Route::Other,
        };
        (route, None)
    }

    /// Applies an event to the session state and returns the messages a polling
    /// consumer should see, `None` when all of them were dropped.
    pub fn filter(&mut self, event: Event) -> Option<Event> {
        let event_type = event.event_type();
        let kept: Vec<Message> = event
            .into_iter()
            .filter(|message| {
                let (route, notice) = self.route(event_type, message);
                if let Some(notice) = notice
                    && let Err(e) = notice.deliver()
                {
                    error!("Listener failed on {:?}: {}", message.correlation_id(), e);
                }
                !matches!(route, Route::Drop)
            })
            .collect();
        if kept.is_empty() {
            None
        } else {
            Some(Event::new(event_type, kept))
        }
    }

    /// Applies an event and invokes `handler` once per delivered message.
    pub fn dispatch(&mut self, event: &Event, handler: &mut dyn EventHandler) -> DispatchReport {
        let mut report = DispatchReport::default();
        let event_type = event.event_type();
        for message in event.messages() {
            let (route, notice) = self.route(event_type, message);
            if matches!(route, Route::Drop) {
                report.dropped += 1;
                continue;
            }
            report.delivered += 1;
            if let Some(notice) = notice
                && let Err(failure) = notice.deliver()
            {
                error!("Listener failed on {:?}: {}", message.correlation_id(), failure);
                report.record(message, failure);
            }
            if let Err(failure) = invoke(handler, &route, event_type, message) {
                error!(
                    "Handler failed on {} ({:?}): {}",
                    message.message_type(),
                    message.correlation_id(),
                    failure
                );
                report.record(message, failure);
            }
        }
        report
    }

    /// Dispatches events until the channel closes or the session terminates.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut handler: Box<dyn EventHandler>,
    ) -> DispatchReport {
        let mut total = DispatchReport::default();
        while let Some(event) = events.recv().await {
            let report = self.dispatch(&event, handler.as_mut());
            total.merge(report);
            if self.terminated {
                break;
            }
        }
        info!(
            "Dispatch loop finished: {} delivered, {} dropped, {} handler failures",
            total.delivered,
            total.dropped,
            total.failures.len()
        );
        total
    }
}

fn invoke(
    handler: &mut dyn EventHandler,
    route: &Route,
    event_type: EventType,
    message: &Message,
) -> Result<(), String> {
    let outcome = catch_panic(|| match route {
        Route::SessionStatus => handler.on_session_status(message),
        Route::ServiceStatus => handler.on_service_status(message),
        Route::Auth => handler.on_auth_status(event_type, message),
        Route::SubscriptionStatus(change) => handler.on_subscription_status(message, change),
        Route::SubscriptionData => handler.on_subscription_data(message),
        Route::Partial => handler.on_partial_response(message),
        Route::Final => handler.on_response(message),
        Route::RequestError(error) => handler.on_request_error(message, error),
        Route::Other | Route::Drop => handler.on_other(event_type, message),
    });
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic),
    }
}
