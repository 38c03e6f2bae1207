//! Shared table of live subscriptions.
//!
//! Mutated both by callers (subscribe/unsubscribe) and by the dispatch task (status
//! updates), always under one mutex. Waiters on a subscription becoming active are woken
//! through a [`Notify`] after every change.
//!
//! Listener callbacks never run under that mutex: the registry hands them out as
//! [`ListenerNotice`]s, delivered once the lock is released.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

use crate::message::{CorrelationId, Element, ErrorInfo, Message, Name, element_names};
use crate::subscription::{Subscription, SubscriptionListener};
use crate::utils::{SubscriptionError, catch_panic};

/// Category of the failure synthesized for a rejected duplicate subscription.
pub const DUPLICATE_SUBSCRIPTION: &str = "DUPLICATE_SUBSCRIPTION";

/// Lifecycle of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Accepted while disconnected; sent on the next connection
    Pending,
    /// Sent, waiting for the status reply
    Subscribing,
    /// Started with every field
    Active,
    /// Started, some fields rejected
    Degraded {
        /// Fields that were rejected and will not be requested again
        bad_fields: Vec<String>,
    },
    /// The link dropped; resent on reconnection
    Suspended,
    /// Unsubscribe sent, waiting for the acknowledgment
    Unsubscribing,
}

impl SubscriptionStatus {
    /// Whether data is flowing.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Degraded { .. }
        )
    }
}

/// A field rejected at subscription start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldException {
    /// Field name
    pub field: String,
    /// Error category, e.g. `BAD_FLD`
    pub category: String,
    /// Error description
    pub description: String,
}

impl FieldException {
    /// Reads the `exceptions` array of a `SubscriptionStarted` payload. Malformed entries
    /// are skipped.
    pub fn from_payload(payload: &Element) -> Vec<FieldException> {
        let Ok(exceptions) = payload.get_element(element_names::EXCEPTIONS) else {
            return Vec::new();
        };
        exceptions
            .values()
            .iter()
            .filter_map(|entry| {
                let field = entry.get_as_str(element_names::FIELD_ID).ok()?.to_string();
                let reason = entry
                    .get_element(element_names::REASON)
                    .ok()
                    .and_then(ErrorInfo::from_element);
                let (category, description) = match reason {
                    Some(info) => (info.category, info.description),
                    None => ("UNKNOWN".to_string(), String::new()),
                };
                Some(FieldException {
                    field,
                    category,
                    description,
                })
            })
            .collect()
    }
}

impl fmt::Display for FieldException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {}: {} - {}", self.field, self.category, self.description)
    }
}

/// What a status message did to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    /// Started; `bad_fields` lists fields rejected for the first time
    Started {
        /// Newly rejected fields
        bad_fields: Vec<FieldException>,
    },
    /// Failed and removed
    Failed(SubscriptionError),
    /// Failure reported for a rejected duplicate; the existing entry is untouched
    Rejected(SubscriptionError),
    /// Terminated and removed
    Terminated,
    /// Start reported for an entry not waiting for one: being unsubscribed, or not
    /// sent on the current connection
    Ignored,
    /// Any other status message for a tracked entry
    Other,
}

/// A status message applied to the registry.
#[derive(Debug)]
pub struct StatusUpdate {
    /// What the message did
    pub change: StatusChange,
    /// Listener callback to run once the registry lock is released
    pub notice: Option<ListenerNotice>,
}

/// What [`SubscriptionRegistry::apply_data`] decided.
#[derive(Debug)]
pub enum DataDelivery {
    /// Deliver the message, after the listener callback if any
    Deliver(Option<ListenerNotice>),
    /// Untracked id, or an entry being unsubscribed
    Drop,
}

type SharedListener = Arc<Mutex<Box<dyn SubscriptionListener>>>;

enum Callback {
    Started(Vec<FieldException>),
    Failed(SubscriptionError),
    Update(Message),
    Ended,
}

/// A [`SubscriptionListener`] callback taken out of the registry.
pub struct ListenerNotice {
    listener: SharedListener,
    subscription: Subscription,
    callback: Callback,
}

impl ListenerNotice {
    /// Runs the callback.
    ///
    /// # Errors
    ///
    /// The panic message when the listener panics.
    pub fn deliver(self) -> Result<(), String> {
        let ListenerNotice {
            listener,
            subscription,
            callback,
        } = self;
        catch_panic(move || {
            let mut listener = listener.lock().unwrap_or_else(PoisonError::into_inner);
            match callback {
                Callback::Started(fresh) => {
                    listener.on_subscription(&subscription);
                    if !fresh.is_empty() {
                        listener.on_degraded(&subscription, &fresh);
                    }
                }
                Callback::Failed(error) => listener.on_subscription_error(&subscription, &error),
                Callback::Update(message) => listener.on_item_update(&subscription, &message),
                Callback::Ended => listener.on_unsubscription(&subscription),
            }
        })
    }
}

impl fmt::Debug for ListenerNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let callback = match &self.callback {
            Callback::Started(_) => "started",
            Callback::Failed(_) => "failed",
            Callback::Update(_) => "update",
            Callback::Ended => "ended",
        };
        f.debug_struct("ListenerNotice")
            .field("subscription", &self.subscription)
            .field("callback", &callback)
            .finish()
    }
}

fn deliver_logged(notices: Vec<ListenerNotice>) {
    for notice in notices {
        let topic = notice.subscription.topic().to_string();
        if let Err(e) = notice.deliver() {
            error!("Listener of {} failed: {}", topic, e);
        }
    }
}

/// What [`SubscriptionRegistry::begin_unsubscribe`] decided.
#[derive(Debug, Clone, PartialEq)]
pub enum UnsubscribeAction {
    /// Send an unsubscribe frame and wait for the acknowledgment
    Send {
        /// Subscription id
        correlation_id: CorrelationId,
        /// Subscription topic
        topic: String,
    },
    /// Never reached the backend; removed at once
    Removed,
    /// Not in the registry
    Unknown,
}

struct Entry {
    subscription: Subscription,
    identity: Option<CorrelationId>,
    status: SubscriptionStatus,
    bad_fields: BTreeSet<String>,
    listener: Option<SharedListener>,
}

impl Entry {
    fn notice(&self, callback: Callback) -> Option<ListenerNotice> {
        self.listener.as_ref().map(|listener| ListenerNotice {
            listener: Arc::clone(listener),
            subscription: self.subscription.clone(),
            callback,
        })
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CorrelationId, Entry>,
    rejected: HashMap<CorrelationId, usize>,
}

impl Inner {
    /// Consumes one outstanding duplicate rejection for `correlation_id`.
    fn release_rejection(&mut self, correlation_id: &CorrelationId) -> bool {
        let Some(count) = self.rejected.get_mut(correlation_id) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.rejected.remove(correlation_id);
        }
        true
    }
}

/// Live subscriptions keyed by correlation id.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &inner.entries.len())
            .field("rejected", &inner.rejected.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a new subscription as `Pending`; [`take_resumable`](Self::take_resumable)
    /// hands it out for sending.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::DuplicateCorrelationId`] or
    /// [`SubscriptionError::DuplicateTopic`] when an entry with the same id or topic is
    /// still registered. The rejection is remembered so that the
    /// [`DUPLICATE_SUBSCRIPTION`] failure reported for it reaches handlers without
    /// touching the existing entry.
    pub fn register(
        &self,
        subscription: Subscription,
        identity: Option<CorrelationId>,
        listener: Option<Box<dyn SubscriptionListener>>,
    ) -> Result<(), SubscriptionError> {
        let mut inner = self.lock();
        let correlation_id = subscription.correlation_id().clone();

        let duplicate = if inner.entries.contains_key(&correlation_id) {
            Some(SubscriptionError::DuplicateCorrelationId(
                correlation_id.to_string(),
            ))
        } else if inner
            .entries
            .values()
            .any(|entry| entry.subscription.topic() == subscription.topic())
        {
            Some(SubscriptionError::DuplicateTopic(
                subscription.topic().to_string(),
            ))
        } else {
            None
        };
        if let Some(error) = duplicate {
            warn!("Rejected subscription {}: {}", subscription, error);
            *inner.rejected.entry(correlation_id).or_insert(0) += 1;
            return Err(error);
        }

        debug!("Registered {}", subscription);
        inner.entries.insert(
            correlation_id,
            Entry {
                subscription,
                identity,
                status: SubscriptionStatus::Pending,
                bad_fields: BTreeSet::new(),
                listener: listener.map(|listener| Arc::new(Mutex::new(listener))),
            },
        );
        drop(inner);
        self.changed.notify_waiters();
        Ok(())
    }

    /// Moves an entry back to `Pending` when its subscribe frame could not be sent.
    pub fn mark_pending(&self, correlation_id: &CorrelationId) {
        if let Some(entry) = self.lock().entries.get_mut(correlation_id)
            && entry.status == SubscriptionStatus::Subscribing
        {
            entry.status = SubscriptionStatus::Pending;
        }
    }

    /// Starts unsubscribing.
    ///
    /// Entries the backend never saw (pending, or suspended by a dropped link) are
    /// removed immediately.
    pub fn begin_unsubscribe(&self, correlation_id: &CorrelationId) -> UnsubscribeAction {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(correlation_id) else {
            return UnsubscribeAction::Unknown;
        };
        let action = match entry.status {
            SubscriptionStatus::Pending | SubscriptionStatus::Suspended => {
                UnsubscribeAction::Removed
            }
            SubscriptionStatus::Unsubscribing => return UnsubscribeAction::Unknown,
            _ => {
                entry.status = SubscriptionStatus::Unsubscribing;
                UnsubscribeAction::Send {
                    correlation_id: correlation_id.clone(),
                    topic: entry.subscription.topic().to_string(),
                }
            }
        };
        let notice = match action {
            UnsubscribeAction::Removed => inner
                .entries
                .remove(correlation_id)
                .and_then(|entry| entry.notice(Callback::Ended)),
            _ => None,
        };
        drop(inner);
        self.changed.notify_waiters();
        deliver_logged(notice.into_iter().collect());
        action
    }

    /// Applies a subscription status message.
    ///
    /// Returns `None` when the message concerns no tracked entry and must be dropped.
    /// A failure carrying [`DUPLICATE_SUBSCRIPTION`] answers an outstanding rejection;
    /// any other failure removes the entry.
    pub fn apply_status(&self, message: &Message) -> Option<StatusUpdate> {
        let correlation_id = message.correlation_id()?;
        let mut inner = self.lock();

        let (change, notice) = match message.message_type() {
            Name::SubscriptionFailure => {
                let (category, description) = reason(message);
                let duplicate =
                    category == DUPLICATE_SUBSCRIPTION && inner.release_rejection(correlation_id);
                let error = SubscriptionError::Failure {
                    category,
                    description,
                };
                if duplicate {
                    (StatusChange::Rejected(error), None)
                } else {
                    let entry = inner.entries.remove(correlation_id)?;
                    warn!("Subscription {} failed: {}", entry.subscription, error);
                    let notice = entry.notice(Callback::Failed(error.clone()));
                    (StatusChange::Failed(error), notice)
                }
            }
            Name::SubscriptionStarted => {
                let entry = inner.entries.get_mut(correlation_id)?;
                match entry.status {
                    SubscriptionStatus::Unsubscribing => {
                        debug!("Start of {} ignored, unsubscribing", entry.subscription);
                        (StatusChange::Ignored, None)
                    }
                    SubscriptionStatus::Pending | SubscriptionStatus::Suspended => {
                        debug!(
                            "Start of {} ignored, not sent on this connection",
                            entry.subscription
                        );
                        (StatusChange::Ignored, None)
                    }
                    _ => {
                        let fresh: Vec<FieldException> =
                            FieldException::from_payload(message.payload())
                                .into_iter()
                                .filter(|exception| {
                                    entry.bad_fields.insert(exception.field.clone())
                                })
                                .collect();
                        entry.status = if entry.bad_fields.is_empty() {
                            SubscriptionStatus::Active
                        } else {
                            SubscriptionStatus::Degraded {
                                bad_fields: entry.bad_fields.iter().cloned().collect(),
                            }
                        };
                        info!("Subscription {} is {:?}", entry.subscription, entry.status);
                        let notice = entry.notice(Callback::Started(fresh.clone()));
                        (StatusChange::Started { bad_fields: fresh }, notice)
                    }
                }
            }
            Name::SubscriptionTerminated => {
                let entry = inner.entries.remove(correlation_id)?;
                info!("Subscription {} terminated", entry.subscription);
                (StatusChange::Terminated, entry.notice(Callback::Ended))
            }
            _ => {
                if !inner.entries.contains_key(correlation_id) {
                    return None;
                }
                (StatusChange::Other, None)
            }
        };
        drop(inner);
        self.changed.notify_waiters();
        Some(StatusUpdate { change, notice })
    }

    /// Decides whether a data message is delivered, and hands out the entry's
    /// listener callback for it.
    pub fn apply_data(&self, message: &Message) -> DataDelivery {
        let Some(correlation_id) = message.correlation_id() else {
            return DataDelivery::Drop;
        };
        let inner = self.lock();
        match inner.entries.get(correlation_id) {
            Some(entry) if entry.status != SubscriptionStatus::Unsubscribing => {
                DataDelivery::Deliver(entry.notice(Callback::Update(message.clone())))
            }
            _ => DataDelivery::Drop,
        }
    }

    /// Marks every sent entry `Suspended` after the link dropped. Entries waiting for an
    /// unsubscribe acknowledgment are removed since the acknowledgment will never come.
    pub fn suspend_all(&self) -> usize {
        let mut inner = self.lock();
        let mut dropped = Vec::new();
        for (correlation_id, entry) in inner.entries.iter_mut() {
            match entry.status {
                SubscriptionStatus::Unsubscribing => dropped.push(correlation_id.clone()),
                SubscriptionStatus::Pending => {}
                _ => entry.status = SubscriptionStatus::Suspended,
            }
        }
        let notices: Vec<ListenerNotice> = dropped
            .iter()
            .filter_map(|correlation_id| inner.entries.remove(correlation_id))
            .filter_map(|entry| entry.notice(Callback::Ended))
            .collect();
        let suspended = inner
            .entries
            .values()
            .filter(|entry| entry.status == SubscriptionStatus::Suspended)
            .count();
        drop(inner);
        self.changed.notify_waiters();
        deliver_logged(notices);
        suspended
    }

    /// Collects every pending or suspended entry for (re)sending and marks them
    /// `Subscribing`. Fields already rejected are left out. An entry with no field left
    /// is removed.
    pub fn take_resumable(&self) -> Vec<(Subscription, Option<CorrelationId>)> {
        let mut inner = self.lock();
        let mut frames = Vec::new();
        let mut exhausted = Vec::new();
        for (correlation_id, entry) in inner.entries.iter_mut() {
            if !matches!(
                entry.status,
                SubscriptionStatus::Pending | SubscriptionStatus::Suspended
            ) {
                continue;
            }
            match entry.subscription.without_fields(&entry.bad_fields) {
                Some(subscription) => {
                    entry.status = SubscriptionStatus::Subscribing;
                    frames.push((subscription, entry.identity.clone()));
                }
                None => exhausted.push(correlation_id.clone()),
            }
        }
        for correlation_id in &exhausted {
            if let Some(entry) = inner.entries.remove(correlation_id) {
                warn!(
                    "Dropping {}: every field was rejected",
                    entry.subscription.topic()
                );
            }
        }
        drop(inner);
        self.changed.notify_waiters();
        frames
    }

    /// Whether `correlation_id` belongs to a registered entry or a pending rejection.
    pub fn is_tracked(&self, correlation_id: &CorrelationId) -> bool {
        let inner = self.lock();
        inner.entries.contains_key(correlation_id) || inner.rejected.contains_key(correlation_id)
    }

    /// Status of one entry.
    pub fn status(&self, correlation_id: &CorrelationId) -> Option<SubscriptionStatus> {
        self.lock()
            .entries
            .get(correlation_id)
            .map(|entry| entry.status.clone())
    }

    /// Copy of a registered subscription.
    pub fn get(&self, correlation_id: &CorrelationId) -> Option<Subscription> {
        self.lock()
            .entries
            .get(correlation_id)
            .map(|entry| entry.subscription.clone())
    }

    /// Fields rejected so far for one entry.
    pub fn bad_fields(&self, correlation_id: &CorrelationId) -> Vec<String> {
        self.lock()
            .entries
            .get(correlation_id)
            .map(|entry| entry.bad_fields.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of registered entries, whatever their status.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of entries delivering data.
    pub fn active_count(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|entry| entry.status.is_active())
            .count()
    }

    /// Drops every entry without notifying listeners. Used once the session stops.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.rejected.clear();
        drop(inner);
        self.changed.notify_waiters();
    }

    /// Waits up to `bound` for an entry to become active.
    ///
    /// Returns the status once active, `None` on timeout or if the entry disappears.
    pub async fn wait_for_active(
        &self,
        correlation_id: &CorrelationId,
        bound: Duration,
    ) -> Option<SubscriptionStatus> {
        let deadline = Instant::now() + bound;
        loop {
            let changed = self.changed.notified();
            match self.status(correlation_id) {
                Some(status) if status.is_active() => return Some(status),
                Some(_) => {}
                None => return None,
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, changed).await.is_err() {
                return None;
            }
        }
    }
}

fn reason(message: &Message) -> (String, String) {
    match message.reason() {
        Some(info) => (info.category, info.description),
        None => ("UNKNOWN".to_string(), message.message_type().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(topic: &str, fields: &[&str], id: i64) -> Subscription {
        Subscription::new(
            topic,
            fields.iter().map(|s| s.to_string()).collect(),
            CorrelationId::Int(id),
        )
        .unwrap()
    }

    fn status(name: Name, id: i64, payload: Element) -> Message {
        Message::with_payload(name, Some(CorrelationId::Int(id)), payload)
    }

    fn started(id: i64, bad: &[&str]) -> Message {
        let mut exceptions = Element::array(element_names::EXCEPTIONS);
        for field in bad {
            exceptions = exceptions.with_entry(
                Element::complex(element_names::EXCEPTIONS)
                    .with(element_names::FIELD_ID, *field)
                    .with_element(
                        Element::complex(element_names::REASON)
                            .with(element_names::CATEGORY, "BAD_FLD")
                            .with(element_names::DESCRIPTION, "Field not valid"),
                    ),
            );
        }
        status(
            Name::SubscriptionStarted,
            id,
            Element::complex("SubscriptionStarted").with_element(exceptions),
        )
    }

    fn change(registry: &SubscriptionRegistry, message: &Message) -> Option<StatusChange> {
        registry.apply_status(message).map(|update| update.change)
    }

    fn failure(id: i64, category: &str) -> Message {
        status(
            Name::SubscriptionFailure,
            id,
            Element::complex("SubscriptionFailure").with_element(
                Element::complex(element_names::REASON)
                    .with(element_names::CATEGORY, category)
                    .with(element_names::DESCRIPTION, "failed"),
            ),
        )
    }

    #[test]
    fn test_register_and_start() {
        let registry = SubscriptionRegistry::new();
        registry
            .register(sub("IBM", &["BID"], 1), None, None)
            .unwrap();
        assert_eq!(
            registry.status(&CorrelationId::Int(1)),
            Some(SubscriptionStatus::Pending)
        );
        assert_eq!(registry.take_resumable().len(), 1);
        assert_eq!(
            registry.status(&CorrelationId::Int(1)),
            Some(SubscriptionStatus::Subscribing)
        );
        assert_eq!(
            change(&registry, &started(1, &[])),
            Some(StatusChange::Started {
                bad_fields: Vec::new()
            })
        );
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_duplicates_are_rejected_without_touching_entry() {
        let registry = SubscriptionRegistry::new();
        registry
            .register(sub("IBM", &["BID"], 1), None, None)
            .unwrap();
        registry.take_resumable();
        registry.apply_status(&started(1, &[]));

        assert_eq!(
            registry.register(sub("MSFT", &["BID"], 1), None, None),
            Err(SubscriptionError::DuplicateCorrelationId("1".to_string()))
        );
        assert_eq!(
            registry.register(sub("IBM", &["ASK"], 2), None, None),
            Err(SubscriptionError::DuplicateTopic("IBM".to_string()))
        );
        assert!(registry.is_tracked(&CorrelationId::Int(2)));

        let rejected = change(&registry, &failure(1, DUPLICATE_SUBSCRIPTION));
        assert!(matches!(rejected, Some(StatusChange::Rejected(_))));
        assert_eq!(
            registry.status(&CorrelationId::Int(1)),
            Some(SubscriptionStatus::Active)
        );
        assert!(matches!(
            change(&registry, &failure(2, DUPLICATE_SUBSCRIPTION)),
            Some(StatusChange::Rejected(_))
        ));
        assert!(!registry.is_tracked(&CorrelationId::Int(2)));
    }

    #[test]
    fn test_bad_field_degrades_and_is_reported_once() {
        let registry = SubscriptionRegistry::new();
        registry
            .register(sub("IBM", &["BID", "BAD"], 1), None, None)
            .unwrap();
        registry.take_resumable();
        match change(&registry, &started(1, &["BAD"])).unwrap() {
            StatusChange::Started { bad_fields } => {
                assert_eq!(bad_fields.len(), 1);
                assert_eq!(bad_fields[0].field, "BAD");
                assert_eq!(bad_fields[0].category, "BAD_FLD");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            registry.status(&CorrelationId::Int(1)),
            Some(SubscriptionStatus::Degraded {
                bad_fields: vec!["BAD".to_string()]
            })
        );

        assert_eq!(
            change(&registry, &started(1, &["BAD"])),
            Some(StatusChange::Started {
                bad_fields: Vec::new()
            })
        );
    }

    #[test]
    fn test_resume_skips_bad_fields() {
        let registry = SubscriptionRegistry::new();
        registry
            .register(sub("IBM", &["BID", "BAD"], 1), None, None)
            .unwrap();
        registry.take_resumable();
        registry.apply_status(&started(1, &["BAD"]));

        assert_eq!(registry.suspend_all(), 1);
        let frames = registry.take_resumable();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.fields(), &["BID"]);
        assert_eq!(
            registry.status(&CorrelationId::Int(1)),
            Some(SubscriptionStatus::Subscribing)
        );
        assert!(registry.take_resumable().is_empty());
    }

    #[test]
    fn test_unsubscribe_before_status() {
        let registry = SubscriptionRegistry::new();
        registry
            .register(sub("IBM", &["BID"], 1), None, None)
            .unwrap();
        registry.take_resumable();
        let action = registry.begin_unsubscribe(&CorrelationId::Int(1));
        assert!(matches!(action, UnsubscribeAction::Send { .. }));

        assert_eq!(
            change(&registry, &started(1, &[])),
            Some(StatusChange::Ignored)
        );
        let data = status(Name::MarketDataEvents, 1, Element::complex("MarketDataEvents"));
        assert!(matches!(registry.apply_data(&data), DataDelivery::Drop));

        let terminated = status(
            Name::SubscriptionTerminated,
            1,
            Element::complex("SubscriptionTerminated"),
        );
        assert_eq!(
            change(&registry, &terminated),
            Some(StatusChange::Terminated)
        );
        assert!(registry.is_empty());
        assert_eq!(change(&registry, &terminated), None);
    }

    #[test]
    fn test_pending_unsubscribe_is_immediate() {
        let registry = SubscriptionRegistry::new();
        registry
            .register(sub("IBM", &["BID"], 1), None, None)
            .unwrap();
        assert_eq!(
            registry.begin_unsubscribe(&CorrelationId::Int(1)),
            UnsubscribeAction::Removed
        );
        assert!(registry.is_empty());
        assert_eq!(
            registry.begin_unsubscribe(&CorrelationId::Int(1)),
            UnsubscribeAction::Unknown
        );
    }

    #[test]
    fn test_failure_removes_entry() {
        let registry = SubscriptionRegistry::new();
        registry
            .register(sub("BAD SEC", &["BID"], 1), None, None)
            .unwrap();
        assert_eq!(
            change(&registry, &failure(1, "BAD_SEC")).unwrap(),
            StatusChange::Failed(SubscriptionError::Failure {
                category: "BAD_SEC".to_string(),
                description: "failed".to_string(),
            })
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_backend_failure_is_not_taken_for_duplicate_rejection() {
        let registry = SubscriptionRegistry::new();
        registry
            .register(sub("IBM", &["BID"], 1), None, None)
            .unwrap();
        registry.take_resumable();
        assert!(registry.register(sub("IBM", &["ASK"], 1), None, None).is_err());

        // The backend failure for the live entry is consumed first.
        assert!(matches!(
            change(&registry, &failure(1, "BAD_SEC")),
            Some(StatusChange::Failed(_))
        ));
        assert!(registry.is_empty());
        assert!(matches!(
            change(&registry, &failure(1, DUPLICATE_SUBSCRIPTION)),
            Some(StatusChange::Rejected(_))
        ));
        assert!(!registry.is_tracked(&CorrelationId::Int(1)));
    }

    #[test]
    fn test_start_from_previous_connection_is_ignored() {
        let registry = SubscriptionRegistry::new();
        registry
            .register(sub("IBM", &["BID"], 1), None, None)
            .unwrap();
        assert_eq!(
            change(&registry, &started(1, &[])),
            Some(StatusChange::Ignored)
        );
        registry.take_resumable();
        assert_eq!(registry.suspend_all(), 1);

        assert_eq!(
            change(&registry, &started(1, &[])),
            Some(StatusChange::Ignored)
        );
        assert_eq!(
            registry.status(&CorrelationId::Int(1)),
            Some(SubscriptionStatus::Suspended)
        );
        assert_eq!(registry.take_resumable().len(), 1);
    }

    #[test]
    fn test_listener_runs_outside_the_lock() {
        struct Reentrant {
            registry: Arc<SubscriptionRegistry>,
            seen: Arc<Mutex<Vec<Option<SubscriptionStatus>>>>,
        }
        impl SubscriptionListener for Reentrant {
            fn on_subscription(&mut self, subscription: &Subscription) {
                let status = self.registry.status(subscription.correlation_id());
                self.seen.lock().unwrap().push(status);
            }
        }

        let registry = Arc::new(SubscriptionRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener = Reentrant {
            registry: Arc::clone(&registry),
            seen: Arc::clone(&seen),
        };
        registry
            .register(sub("IBM", &["BID"], 1), None, Some(Box::new(listener)))
            .unwrap();
        registry.take_resumable();

        let update = registry.apply_status(&started(1, &[])).unwrap();
        update.notice.unwrap().deliver().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(SubscriptionStatus::Active)]);
    }

    #[test]
    fn test_panicking_listener_is_reported() {
        struct Faulty;
        impl SubscriptionListener for Faulty {
            fn on_item_update(&self, _subscription: &Subscription, _message: &Message) {
                panic!("cannot render tick");
            }
        }

        let registry = SubscriptionRegistry::new();
        registry
            .register(sub("IBM", &["BID"], 1), None, Some(Box::new(Faulty)))
            .unwrap();
        let data = status(Name::MarketDataEvents, 1, Element::complex("MarketDataEvents"));
        for _ in 0..2 {
            match registry.apply_data(&data) {
                DataDelivery::Deliver(Some(notice)) => {
                    assert_eq!(notice.deliver(), Err("panic: cannot render tick".to_string()))
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_wait_for_active() {
        let registry = Arc::new(SubscriptionRegistry::new());
        registry
            .register(sub("IBM", &["BID"], 1), None, None)
            .unwrap();
        registry.take_resumable();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .wait_for_active(&CorrelationId::Int(1), Duration::from_secs(2))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.apply_status(&started(1, &[]));
        assert_eq!(waiter.await.unwrap(), Some(SubscriptionStatus::Active));

        assert_eq!(
            registry
                .wait_for_active(&CorrelationId::Int(7), Duration::from_millis(10))
                .await,
            None
        );
    }
}
