//! Per-subscription callbacks.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::message::Message;
use crate::subscription::{FieldException, Subscription};
use crate::utils::SubscriptionError;

/// Interface to be implemented to listen to the events of a single subscription:
/// start, per-field exceptions, failure, data and termination.
///
/// Callbacks run on the task that drives dispatch, one at a time, in arrival order. A
/// panicking callback is reported for its message and dispatch carries on.
/// Every method has a default implementation that only logs, so implementors override
/// what they need.
pub trait SubscriptionListener: Send {
    /// The subscription started; data will follow.
    fn on_subscription(&mut self, subscription: &Subscription) {
        info!("Subscribed to {}", subscription.topic());
    }

    /// Some requested fields were rejected. Each field is reported once and never
    /// requested again; the remaining fields keep delivering data.
    fn on_degraded(&mut self, subscription: &Subscription, bad_fields: &[FieldException]) {
        for exception in bad_fields {
            warn!("{}: {}", subscription.topic(), exception);
        }
    }

    /// The subscription failed and was removed.
    fn on_subscription_error(&mut self, subscription: &Subscription, error: &SubscriptionError) {
        warn!("{} failed: {}", subscription.topic(), error);
    }

    /// A data message arrived.
    fn on_item_update(&self, _subscription: &Subscription, message: &Message) {
        debug!("Update: {}", message.to_json());
    }

    /// The subscription ended, by request or by the backend.
    fn on_unsubscription(&mut self, subscription: &Subscription) {
        info!("Unsubscribed from {}", subscription.topic());
    }
}

/// A subscription listener that forwards data messages to a tokio channel.
///
/// This allows data to be processed outside the dispatch task.
///
/// # Examples
///
/// ```ignore
/// use marketsession_rs::subscription::ChannelSubscriptionListener;
///
/// let (listener, mut rx) = ChannelSubscriptionListener::create_channel();
/// session.subscribe_with_listener(subscription, None, Box::new(listener)).await?;
///
/// tokio::spawn(async move {
///     while let Some(message) = rx.recv().await {
///         println!("{}", message.to_json());
///     }
/// });
/// ```
pub struct ChannelSubscriptionListener {
    sender: mpsc::UnboundedSender<Message>,
}

impl ChannelSubscriptionListener {
    /// Creates a listener forwarding into `sender`.
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self { sender }
    }

    /// Creates a new channel pair and returns both the listener and receiver.
    pub fn create_channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl SubscriptionListener for ChannelSubscriptionListener {
    fn on_item_update(&self, _subscription: &Subscription, message: &Message) {
        // The receiver may be gone; that only means nobody wants the data any more.
        let _ = self.sender.send(message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CorrelationId, Element, Name};
    use std::sync::{Arc, Mutex};

    fn subscription() -> Subscription {
        Subscription::new("IBM US Equity", vec!["LAST_PRICE".to_string()], 1).unwrap()
    }

    fn update(price: f64) -> Message {
        Message::with_payload(
            Name::MarketDataEvents,
            Some(CorrelationId::Int(1)),
            Element::complex(Name::MarketDataEvents.as_str()).with("LAST_PRICE", price),
        )
    }

    #[derive(Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl SubscriptionListener for Recorder {
        fn on_subscription(&mut self, subscription: &Subscription) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("subscribed {}", subscription.topic()));
        }

        fn on_unsubscription(&mut self, _subscription: &Subscription) {
            self.calls.lock().unwrap().push("unsubscribed".to_string());
        }
    }

    #[test]
    fn test_overridden_methods_are_called() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut listener = Recorder {
            calls: calls.clone(),
        };
        let sub = subscription();
        listener.on_subscription(&sub);
        listener.on_unsubscription(&sub);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["subscribed IBM US Equity", "unsubscribed"]
        );
    }

    #[test]
    fn test_default_implementations_do_not_panic() {
        struct MinimalListener;
        impl SubscriptionListener for MinimalListener {}

        let mut listener = MinimalListener;
        let sub = subscription();
        listener.on_subscription(&sub);
        listener.on_degraded(
            &sub,
            &[FieldException {
                field: "BAD".to_string(),
                category: "BAD_FLD".to_string(),
                description: "Field not valid".to_string(),
            }],
        );
        listener.on_subscription_error(
            &sub,
            &SubscriptionError::Failure {
                category: "X".to_string(),
                description: "Y".to_string(),
            },
        );
        listener.on_item_update(&sub, &update(1.0));
        listener.on_unsubscription(&sub);
    }

    #[tokio::test]
    async fn test_channel_subscription_listener_forwards_updates() {
        let (listener, mut rx) = ChannelSubscriptionListener::create_channel();
        let sub = subscription();
        for i in 1..=3 {
            listener.on_item_update(&sub, &update(f64::from(i)));
        }
        for i in 1..=3 {
            let received = rx.recv().await.expect("Should receive update");
            assert_eq!(
                received.payload().get_as_f64("LAST_PRICE").unwrap(),
                f64::from(i)
            );
        }
    }

    #[tokio::test]
    async fn test_channel_subscription_listener_dropped_receiver() {
        let (listener, rx) = ChannelSubscriptionListener::create_channel();
        drop(rx);
        listener.on_item_update(&subscription(), &update(1.0));
    }
}
