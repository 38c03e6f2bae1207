//! Private event queues and the router that feeds them.
//!
//! Replies to token, authorization and service-open frames never reach the main stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::message::{CorrelationId, Event, Message};

/// A private, bounded queue for point-to-point waits.
///
/// Messages carrying a correlation id bound to a queue are routed here instead of the
/// main event stream. The binding is released when the queue is dropped.
#[derive(Debug)]
pub struct EventQueue {
    correlation_id: CorrelationId,
    receiver: mpsc::Receiver<Event>,
    router: Arc<QueueRouter>,
}

impl EventQueue {
    /// Correlation id bound to this queue.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Waits up to `bound` for the next event.
    ///
    /// Returns `None` on timeout.
    pub async fn next_event(&mut self, bound: Duration) -> Option<Event> {
        match timeout(bound, self.receiver.recv()).await {
            Ok(event) => event,
            Err(_) => None,
        }
    }

    /// Waits for the first message `decide` accepts, counting down a single deadline
    /// across every message received.
    ///
    /// Messages `decide` rejects are logged and skipped. Returns `None` when the deadline
    /// passes first.
    pub async fn wait_for<T>(
        &mut self,
        bound: Duration,
        mut decide: impl FnMut(&Message) -> Option<T>,
    ) -> Option<T> {
        let deadline = Instant::now() + bound;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let event = self.next_event(remaining).await?;
            for message in event {
                if let Some(outcome) = decide(&message) {
                    return Some(outcome);
                }
                debug!(
                    "Ignoring {} on queue {}",
                    message.message_type(),
                    self.correlation_id
                );
            }
        }
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.router.release(&self.correlation_id);
    }
}

/// Side table from correlation id to private queue.
#[derive(Debug)]
pub(crate) struct QueueRouter {
    capacity: usize,
    routes: Mutex<HashMap<CorrelationId, mpsc::Sender<Event>>>,
}

impl QueueRouter {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            routes: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, mpsc::Sender<Event>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds `correlation_id` to a fresh queue, replacing any previous binding.
    pub(crate) fn open(self: &Arc<Self>, correlation_id: CorrelationId) -> EventQueue {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.lock().insert(correlation_id.clone(), sender);
        EventQueue {
            correlation_id,
            receiver,
            router: Arc::clone(self),
        }
    }

    pub(crate) fn is_bound(&self, correlation_id: &CorrelationId) -> bool {
        self.lock().contains_key(correlation_id)
    }

    fn release(&self, correlation_id: &CorrelationId) {
        self.lock().remove(correlation_id);
    }

    /// Moves messages bound to a private queue out of `event`.
    ///
    /// Returns what is left for the main stream, `None` if nothing is.
    pub(crate) fn route(&self, event: Event) -> Option<Event> {
        let routes = self.lock();
        if routes.is_empty() {
            return Some(event);
        }
        let event_type = event.event_type();
        let mut remaining = Vec::new();
        for message in event {
            let sender = message.correlation_id().and_then(|id| routes.get(id));
            match sender {
                Some(sender) => {
                    let id = message.correlation_id().cloned();
                    if sender.try_send(Event::single(event_type, message)).is_err() {
                        warn!("Private queue for {:?} is full or closed, message dropped", id);
                    }
                }
                None => remaining.push(message),
            }
        }
        if remaining.is_empty() {
            None
        } else {
            Some(Event::new(event_type, remaining))
        }
    }
}
