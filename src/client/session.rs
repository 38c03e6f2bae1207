//! The [`Session`] facade and its builder.

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

use crate::auth::{AuthenticationFlow, Identity, Token};
use crate::client::queue::{EventQueue, QueueRouter};
use crate::connection::{
    ConnectionManager, ConnectionMetrics, ConnectionState, SessionOptions, StopMode,
};
use crate::dispatch::{DispatchReport, EventDispatcher, EventHandler};
use crate::message::{
    CorrelationId, CorrelationIdGenerator, Element, Event, EventType, Message, Name,
    element_names,
};
use crate::request::{Reply, Request, RequestResponseCorrelator, Service};
use crate::subscription::{
    DUPLICATE_SUBSCRIPTION, Subscription, SubscriptionListener, SubscriptionRegistry,
    SubscriptionStatus, UnsubscribeAction,
};
use crate::transport::{Endpoint, Outbound, Transport, TransportEvent};
use crate::utils::{AuthError, ConnectionError, RequestError, SessionError, SubscriptionError};

/// Builder for a [`Session`].
///
/// # Examples
///
/// ```ignore
/// let session = Session::builder()
///     .options(SessionOptions::new(Endpoint::new("10.0.0.1", 8194)).with_auto_restart(true))
///     .transport(transport)
///     .handler(Box::new(MyHandler))
///     .build()?;
/// ```
#[derive(Default)]
pub struct SessionBuilder {
    options: SessionOptions,
    transport: Option<Arc<dyn Transport>>,
    handler: Option<Box<dyn EventHandler>>,
}

impl SessionBuilder {
    /// Creates a builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session options.
    #[must_use]
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Delivers events to `handler` on a dispatch task instead of through
    /// [`Session::next_event`].
    #[must_use]
    pub fn handler(mut self, handler: Box<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Validates the options and creates the session. Nothing is sent until
    /// [`Session::start`].
    ///
    /// # Errors
    ///
    /// [`ConnectionError::InvalidConfig`] for invalid options or a missing transport.
    pub fn build(self) -> Result<Session, ConnectionError> {
        let transport = self
            .transport
            .ok_or_else(|| ConnectionError::InvalidConfig("no transport configured".to_string()))?;
        Session::create(self.options, transport, self.handler)
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("options", &self.options)
            .field("transport", &self.transport.is_some())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

struct Consumer {
    events: mpsc::UnboundedReceiver<Event>,
    dispatcher: EventDispatcher,
}

struct Startup {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    handler: Option<Box<dyn EventHandler>>,
}

struct SessionInner {
    connection: Arc<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    correlator: Arc<RequestResponseCorrelator>,
    router: Arc<QueueRouter>,
    ids: Arc<CorrelationIdGenerator>,
    auth: AuthenticationFlow,
    services: Mutex<HashMap<String, Service>>,
    events_tx: mpsc::UnboundedSender<Event>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    consumer: tokio::sync::Mutex<Option<Consumer>>,
    startup: Mutex<Option<Startup>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    dispatch: tokio::sync::Mutex<Option<JoinHandle<DispatchReport>>>,
    shutdown_signal: Arc<Notify>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One logical connection to the backend.
///
/// A session is created once, started, and stopped exactly once. Cloning is cheap and
/// every clone drives the same session.
///
/// Events reach the application either through an [`EventHandler`] given to the
/// builder (callback mode) or by polling [`next_event`](Session::next_event) /
/// [`events`](Session::events). Replies to token generation, authorization and service
/// opening are consumed internally on private queues and never appear there.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.inner.connection)
            .field("registry", &self.inner.registry)
            .field("correlator", &self.inner.correlator)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Starts building a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Creates a polling-mode session.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::InvalidConfig`] for invalid options.
    pub fn new(
        options: SessionOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConnectionError> {
        Self::create(options, transport, None)
    }

    fn create(
        options: SessionOptions,
        transport: Arc<dyn Transport>,
        handler: Option<Box<dyn EventHandler>>,
    ) -> Result<Self, ConnectionError> {
        options.validate()?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let router = Arc::new(QueueRouter::new(options.event_queue_capacity));
        let connection = Arc::new(ConnectionManager::new(transport, options, inbound_tx.clone()));
        let registry = Arc::new(SubscriptionRegistry::new());
        let correlator = Arc::new(RequestResponseCorrelator::new());
        let ids = Arc::new(CorrelationIdGenerator::new());
        let auth = AuthenticationFlow::new(
            Arc::clone(&connection),
            Arc::clone(&router),
            Arc::clone(&ids),
        );
        let dispatcher = EventDispatcher::new(Arc::clone(&registry), Arc::clone(&correlator));

        Ok(Self {
            inner: Arc::new(SessionInner {
                connection,
                registry,
                correlator,
                router,
                ids,
                auth,
                services: Mutex::new(HashMap::new()),
                events_tx,
                inbound_tx,
                consumer: tokio::sync::Mutex::new(Some(Consumer {
                    events: events_rx,
                    dispatcher,
                })),
                startup: Mutex::new(Some(Startup {
                    inbound: inbound_rx,
                    handler,
                })),
                pump: Mutex::new(None),
                dispatch: tokio::sync::Mutex::new(None),
                shutdown_signal: Arc::new(Notify::new()),
            }),
        })
    }

    /// Connects to the first reachable endpoint and sends every subscription
    /// submitted so far.
    ///
    /// `SessionStarted` or `SessionStartupFailure` is delivered as an event either way.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::AllHostsExhausted`] when no endpoint accepted the connection,
    /// [`ConnectionError::Terminated`] after [`stop`](Self::stop).
    pub async fn start(&self) -> Result<Endpoint, ConnectionError> {
        self.spawn_tasks().await;
        let endpoint = self.inner.connection.start().await?;
        let sent = flush_pending(&self.inner.connection, &self.inner.registry).await;
        if sent > 0 {
            info!("Sent {} queued subscriptions", sent);
        }
        Ok(endpoint)
    }

    async fn spawn_tasks(&self) {
        let Some(startup) = lock(&self.inner.startup).take() else {
            return;
        };
        let pump = tokio::spawn(pump(
            startup.inbound,
            Arc::clone(&self.inner.connection),
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.router),
            self.inner.events_tx.clone(),
        ));
        *lock(&self.inner.pump) = Some(pump);

        if let Some(handler) = startup.handler
            && let Some(consumer) = self.inner.consumer.lock().await.take()
        {
            let shutdown_signal = Arc::clone(&self.inner.shutdown_signal);
            let task = tokio::spawn(async move {
                let report = consumer.dispatcher.run(consumer.events, handler).await;
                shutdown_signal.notify_waiters();
                report
            });
            *self.inner.dispatch.lock().await = Some(task);
        }
    }

    /// Stops the session. Idempotent: `SessionTerminated` is delivered once whatever the
    /// number of calls.
    ///
    /// `Immediate` also fails every request in flight and forgets every subscription
    /// right away; `Graceful` lets the events already received reach the application
    /// first.
    pub async fn stop(&self, mode: StopMode) {
        self.inner.connection.stop(mode).await;
        if mode == StopMode::Immediate {
            self.inner.correlator.fail_all(ConnectionError::Terminated);
            self.inner.registry.clear();
        }
        lock(&self.inner.services).clear();
    }

    /// Waits for the dispatch task to finish and returns its report.
    ///
    /// Returns `None` in polling mode or if the report was already taken.
    pub async fn join(&self) -> Option<DispatchReport> {
        let task = self.inner.dispatch.lock().await.take()?;
        match task.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Dispatch task failed: {}", e);
                None
            }
        }
    }

    /// Notified when the dispatch loop ends after `SessionTerminated`.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.inner.shutdown_signal)
    }

    /// Current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.connection.get_connection_state().await
    }

    /// Whether the session is connected.
    pub async fn is_connected(&self) -> bool {
        self.inner.connection.is_connected().await
    }

    /// Connection counters.
    pub async fn metrics(&self) -> ConnectionMetrics {
        self.inner.connection.get_metrics().await
    }

    /// Endpoint of the live connection.
    pub async fn current_endpoint(&self) -> Option<Endpoint> {
        self.inner.connection.current_endpoint().await
    }

    /// Session options.
    pub fn options(&self) -> &SessionOptions {
        self.inner.connection.options()
    }

    /// Returns a fresh correlation id, unique within this session.
    pub fn next_correlation_id(&self) -> CorrelationId {
        self.inner.ids.next_id()
    }

    /// Binds a private queue to `correlation_id`. Messages carrying that id are routed
    /// to it instead of the main event stream until the queue is dropped.
    pub fn open_event_queue(&self, correlation_id: CorrelationId) -> EventQueue {
        self.inner.router.open(correlation_id)
    }

    /// Opens a service, or returns it if already open.
    ///
    /// # Errors
    ///
    /// [`RequestError::ServiceOpenFailed`] when the backend refuses,
    /// [`RequestError::Timeout`] when it does not answer within the auth timeout,
    /// [`RequestError::Connection`] when the frame cannot be sent.
    pub async fn open_service(&self, name: &str) -> Result<Service, RequestError> {
        if let Some(service) = lock(&self.inner.services).get(name) {
            return Ok(service.clone());
        }

        let correlation_id = self.inner.ids.next_id();
        let mut queue = self.inner.router.open(correlation_id.clone());
        self.inner
            .connection
            .send(Outbound::OpenService {
                correlation_id,
                service: name.to_string(),
            })
            .await?;

        let bound = self.options().auth_timeout;
        let outcome = queue
            .wait_for(bound, |message| match message.message_type() {
                Name::ServiceOpened => Some(Ok(service_from(name, message))),
                Name::ServiceOpenFailure => Some(Err(RequestError::ServiceOpenFailed {
                    service: name.to_string(),
                    description: message
                        .reason()
                        .map(|info| info.description)
                        .unwrap_or_else(|| "no reason given".to_string()),
                })),
                _ => None,
            })
            .await;

        match outcome {
            Some(Ok(service)) => {
                info!("Service {} opened", name);
                lock(&self.inner.services).insert(name.to_string(), service.clone());
                Ok(service)
            }
            Some(Err(e)) => {
                warn!("{}", e);
                Err(e)
            }
            None => {
                warn!("Opening {} timed out after {:?}", name, bound);
                Err(RequestError::Timeout(bound))
            }
        }
    }

    /// Returns a service opened earlier.
    ///
    /// # Errors
    ///
    /// [`RequestError::ServiceNotOpen`] when it was never opened on this session.
    pub fn get_service(&self, name: &str) -> Result<Service, RequestError> {
        lock(&self.inner.services)
            .get(name)
            .cloned()
            .ok_or_else(|| RequestError::ServiceNotOpen(name.to_string()))
    }

    /// Generates a token with the configured strategy.
    ///
    /// # Errors
    ///
    /// See [`AuthenticationFlow::generate_token`].
    pub async fn generate_token(&self) -> Result<Token, AuthError> {
        self.inner.auth.generate_token().await
    }

    /// Authorizes `token` against `service`.
    ///
    /// # Errors
    ///
    /// See [`AuthenticationFlow::authorize`].
    pub async fn authorize(&self, token: &Token, service: &Service) -> Result<Identity, AuthError> {
        self.inner.auth.authorize(token, service).await
    }

    /// Generates a token and authorizes it against the named service, opening the
    /// service first if needed.
    ///
    /// # Errors
    ///
    /// The first failing step; later steps are never attempted.
    pub async fn authenticate(&self, service: &str) -> Result<Identity, SessionError> {
        let service = self.open_service(service).await?;
        Ok(self.inner.auth.authenticate(&service).await?)
    }

    /// The authentication flow of this session.
    pub fn authenticator(&self) -> &AuthenticationFlow {
        &self.inner.auth
    }

    /// Sends a request and returns its correlation id. Replies are delivered as events.
    ///
    /// # Errors
    ///
    /// [`RequestError::ServiceNotOpen`] when the request's service was not opened,
    /// [`RequestError::InvalidRequest`] for an id already in flight or an identity that
    /// was not granted, [`RequestError::Connection`] when the frame cannot be sent.
    pub async fn send_request(
        &self,
        request: Request,
        identity: Option<&Identity>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<CorrelationId, RequestError> {
        self.submit(request, identity, correlation_id, None).await
    }

    /// Sends a request and returns a channel that receives its replies, in addition to
    /// the events delivered to the application.
    ///
    /// Replies are forwarded as events are dispatched: in polling mode they arrive only
    /// as the application polls.
    ///
    /// # Errors
    ///
    /// As [`send_request`](Self::send_request).
    pub async fn request(
        &self,
        request: Request,
        identity: Option<&Identity>,
    ) -> Result<(CorrelationId, mpsc::UnboundedReceiver<Reply>), RequestError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let correlation_id = self.submit(request, identity, None, Some(tx)).await?;
        Ok((correlation_id, rx))
    }

    async fn submit(
        &self,
        request: Request,
        identity: Option<&Identity>,
        correlation_id: Option<CorrelationId>,
        sink: Option<mpsc::UnboundedSender<Reply>>,
    ) -> Result<CorrelationId, RequestError> {
        let service = self.get_service(request.service())?;
        if !service.has_operation(request.operation()) {
            return Err(RequestError::UnknownOperation {
                service: service.name().to_string(),
                operation: request.operation().to_string(),
            });
        }
        if let Some(identity) = identity
            && !identity.is_authorized()
        {
            return Err(RequestError::InvalidRequest(format!(
                "identity {} is not authorized",
                identity.correlation_id()
            )));
        }

        let correlation_id = correlation_id.unwrap_or_else(|| self.inner.ids.next_id());
        self.inner
            .correlator
            .register(correlation_id.clone(), request.operation(), sink)?;
        debug!("Sending {} as {}", request.operation(), correlation_id);
        let frame = Outbound::Request {
            correlation_id: correlation_id.clone(),
            request,
            identity: identity.map(|identity| identity.correlation_id().clone()),
        };
        if let Err(e) = self.inner.connection.send(frame).await {
            self.inner
                .correlator
                .fail(&correlation_id, RequestError::Connection(e.clone()));
            return Err(e.into());
        }
        Ok(correlation_id)
    }

    /// Cancels a request in flight. Returns whether it was in flight; any later reply
    /// for it is dropped.
    pub async fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if !self.inner.correlator.cancel(correlation_id) {
            return false;
        }
        if let Err(e) = self
            .inner
            .connection
            .send(Outbound::Cancel {
                correlation_id: correlation_id.clone(),
            })
            .await
        {
            debug!("Cancel of {} not sent: {}", correlation_id, e);
        }
        true
    }

    /// Submits subscriptions. Fire-and-forget: start, failure and data arrive as
    /// events.
    ///
    /// Subscriptions submitted while disconnected are sent on the next connection. A
    /// duplicate (same correlation id or topic as a registered entry) is rejected with a
    /// `SubscriptionFailure` event and leaves the existing entry untouched.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Terminated`] after stop, or an identity that was not granted.
    pub async fn subscribe(
        &self,
        subscriptions: Vec<Subscription>,
        identity: Option<&Identity>,
    ) -> Result<(), SessionError> {
        self.check_subscribable(identity)?;
        let identity = identity.map(|identity| identity.correlation_id().clone());
        for subscription in subscriptions {
            self.register(subscription, identity.clone(), None);
        }
        flush_pending(&self.inner.connection, &self.inner.registry).await;
        Ok(())
    }

    /// Submits one subscription whose lifecycle and data are also reported to
    /// `listener`.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn subscribe_with_listener(
        &self,
        subscription: Subscription,
        identity: Option<&Identity>,
        listener: Box<dyn SubscriptionListener>,
    ) -> Result<(), SessionError> {
        self.check_subscribable(identity)?;
        let identity = identity.map(|identity| identity.correlation_id().clone());
        self.register(subscription, identity, Some(listener));
        flush_pending(&self.inner.connection, &self.inner.registry).await;
        Ok(())
    }

    fn check_subscribable(&self, identity: Option<&Identity>) -> Result<(), SessionError> {
        if self.inner.connection.is_terminated() {
            return Err(ConnectionError::Terminated.into());
        }
        if let Some(identity) = identity
            && !identity.is_authorized()
        {
            return Err(SubscriptionError::InvalidSubscription(format!(
                "identity {} is not authorized",
                identity.correlation_id()
            ))
            .into());
        }
        Ok(())
    }

    fn register(
        &self,
        subscription: Subscription,
        identity: Option<CorrelationId>,
        listener: Option<Box<dyn SubscriptionListener>>,
    ) {
        let correlation_id = subscription.correlation_id().clone();
        if let Err(e) = self.inner.registry.register(subscription, identity, listener) {
            let payload = Element::complex(Name::SubscriptionFailure.as_str()).with_element(
                Element::complex(element_names::REASON)
                    .with(element_names::CATEGORY, DUPLICATE_SUBSCRIPTION)
                    .with(element_names::DESCRIPTION, e.to_string()),
            );
            let message =
                Message::with_payload(Name::SubscriptionFailure, Some(correlation_id), payload);
            let event = Event::single(EventType::SubscriptionStatus, message);
            if self.inner.inbound_tx.send(TransportEvent::Event(event)).is_err() {
                debug!("Event stream closed, duplicate rejection not delivered");
            }
        }
    }

    /// Unsubscribes. Entries never sent are removed at once; the others are removed
    /// when the backend acknowledges, and their data is dropped meanwhile.
    pub async fn unsubscribe(&self, subscriptions: &[Subscription]) {
        for subscription in subscriptions {
            match self.inner.registry.begin_unsubscribe(subscription.correlation_id()) {
                UnsubscribeAction::Send {
                    correlation_id,
                    topic,
                } => {
                    if let Err(e) = self
                        .inner
                        .connection
                        .send(Outbound::Unsubscribe {
                            correlation_id,
                            topic,
                        })
                        .await
                    {
                        warn!("Unsubscribe of {} not sent: {}", subscription.topic(), e);
                    }
                }
                UnsubscribeAction::Removed => {
                    debug!("{} removed before being sent", subscription.topic())
                }
                UnsubscribeAction::Unknown => {
                    debug!("{} is not subscribed", subscription.topic())
                }
            }
        }
    }

    /// The registry of this session's subscriptions.
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// The in-flight request table of this session.
    pub fn requests(&self) -> &RequestResponseCorrelator {
        &self.inner.correlator
    }

    /// Status of a subscription.
    pub fn subscription_status(
        &self,
        correlation_id: &CorrelationId,
    ) -> Option<SubscriptionStatus> {
        self.inner.registry.status(correlation_id)
    }

    /// Waits up to `bound` for a subscription to start delivering.
    pub async fn wait_for_subscription(
        &self,
        correlation_id: &CorrelationId,
        bound: Duration,
    ) -> Option<SubscriptionStatus> {
        self.inner.registry.wait_for_active(correlation_id, bound).await
    }

    /// Polls the next event, waiting at most `bound`.
    ///
    /// Session state is updated as events are taken: stale replies and data for
    /// unknown subscriptions never come out. Returns `None` on timeout, in callback
    /// mode, and once the stream was taken by [`events`](Self::events).
    pub async fn next_event(&self, bound: Duration) -> Option<Event> {
        let mut guard = self.inner.consumer.lock().await;
        let Some(consumer) = guard.as_mut() else {
            debug!("No polling consumer on this session");
            return None;
        };
        let deadline = Instant::now() + bound;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let event = match timeout(remaining, consumer.events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) | Err(_) => return None,
            };
            if let Some(event) = consumer.dispatcher.filter(event) {
                return Some(event);
            }
        }
    }

    /// Takes the event stream. The stream ends after `SessionTerminated`.
    ///
    /// Returns `None` in callback mode or when the stream was already taken.
    pub async fn events(&self) -> Option<BoxStream<'static, Event>> {
        let consumer = self.inner.consumer.lock().await.take()?;
        Some(stream::unfold(
            (consumer, false),
            |(mut consumer, done)| async move {
                if done {
                    return None;
                }
                loop {
                    let event = consumer.events.recv().await?;
                    if let Some(event) = consumer.dispatcher.filter(event) {
                        let done = consumer.dispatcher.is_terminated();
                        return Some((event, (consumer, done)));
                    }
                }
            },
        )
        .boxed())
    }
}

fn service_from(name: &str, message: &Message) -> Service {
    let operations = message
        .get_element(element_names::OPERATIONS)
        .map(|list| {
            list.values()
                .iter()
                .filter_map(|value| value.as_str().ok().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Service::new(name, operations)
}

/// Sends every pending or suspended subscription. Returns how many frames went out.
async fn flush_pending(connection: &ConnectionManager, registry: &SubscriptionRegistry) -> usize {
    if !connection.is_connected().await {
        return 0;
    }
    let mut sent = 0;
    for (subscription, identity) in registry.take_resumable() {
        let correlation_id = subscription.correlation_id().clone();
        match connection
            .send(Outbound::Subscribe {
                subscription,
                identity,
            })
            .await
        {
            Ok(()) => sent += 1,
            Err(e) => {
                debug!("Subscribe {} deferred: {}", correlation_id, e);
                registry.mark_pending(&correlation_id);
            }
        }
    }
    sent
}

/// Moves inbound traffic to private queues or the main stream, and drives recovery
/// when the link drops.
async fn pump(
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    connection: Arc<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    router: Arc<QueueRouter>,
    events: mpsc::UnboundedSender<Event>,
) {
    while let Some(item) = inbound.recv().await {
        match item {
            TransportEvent::Event(event) => {
                let terminated = event.event_type() == EventType::SessionStatus
                    && event
                        .messages()
                        .iter()
                        .any(|message| *message.message_type() == Name::SessionTerminated);
                if let Some(event) = router.route(event)
                    && events.send(event).is_err()
                {
                    debug!("Event stream closed");
                }
                if terminated {
                    break;
                }
            }
            TransportEvent::Disconnected { reason } => {
                let suspended = registry.suspend_all();
                debug!("{} subscriptions suspended", suspended);
                if connection.handle_disconnection(&reason).await {
                    let connection = Arc::clone(&connection);
                    let registry = Arc::clone(&registry);
                    tokio::spawn(async move {
                        match connection.reconnect().await {
                            Ok(endpoint) => {
                                let resumed = flush_pending(&connection, &registry).await;
                                info!("Resumed {} subscriptions on {}", resumed, endpoint);
                                connection.record_recoveries(resumed).await;
                            }
                            Err(e) => error!("Giving up on the connection: {}", e),
                        }
                    });
                }
            }
        }
    }
    debug!("Inbound pump finished");
}
