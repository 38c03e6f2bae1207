use std::error::Error;
use tracing::{debug, info, warn};

use crate::message::{EventType, Message};
use crate::subscription::StatusChange;
use crate::utils::RequestError;

/// Result returned by handler callbacks. An `Err` is reported, never fatal.
pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Callbacks invoked by the dispatcher, one per message, routed by event type.
///
/// Every method has a logging default, so a handler only overrides the categories it
/// cares about. A callback returning `Err` or panicking is reported in the
/// [`DispatchReport`](crate::dispatch::DispatchReport) and dispatch continues with the
/// next message.
pub trait EventHandler: Send {
    /// Session lifecycle: started, startup failure, connection up/down, terminated.
    fn on_session_status(&mut self, message: &Message) -> HandlerResult {
        info!("Session status: {}", message.message_type());
        Ok(())
    }

    /// Service open results not claimed by a private queue.
    fn on_service_status(&mut self, message: &Message) -> HandlerResult {
        debug!("Service status: {}", message.message_type());
        Ok(())
    }

    /// Token and authorization status not claimed by a private queue, including
    /// revocations.
    fn on_auth_status(&mut self, event_type: EventType, message: &Message) -> HandlerResult {
        debug!("{:?}: {}", event_type, message.message_type());
        Ok(())
    }

    /// Subscription status for a tracked subscription, after the registry applied it.
    fn on_subscription_status(
        &mut self,
        message: &Message,
        change: &StatusChange,
    ) -> HandlerResult {
        match change {
            StatusChange::Failed(error) | StatusChange::Rejected(error) => {
                warn!("Subscription {:?}: {}", message.correlation_id(), error)
            }
            StatusChange::Started { bad_fields } => {
                for exception in bad_fields {
                    warn!("Subscription {:?}: {}", message.correlation_id(), exception);
                }
            }
            _ => debug!("Subscription status: {}", message.message_type()),
        }
        Ok(())
    }

    /// Data for a tracked subscription.
    fn on_subscription_data(&mut self, message: &Message) -> HandlerResult {
        debug!("Data: {}", message.to_json());
        Ok(())
    }

    /// Intermediate reply of a request in flight.
    fn on_partial_response(&mut self, message: &Message) -> HandlerResult {
        debug!("Partial response: {}", message.message_type());
        Ok(())
    }

    /// Terminal reply of a request in flight.
    fn on_response(&mut self, message: &Message) -> HandlerResult {
        debug!("Response: {}", message.message_type());
        Ok(())
    }

    /// Terminal error of a request in flight. No data is delivered for it.
    fn on_request_error(&mut self, message: &Message, error: &RequestError) -> HandlerResult {
        warn!("Request {:?} failed: {}", message.correlation_id(), error);
        Ok(())
    }

    /// Anything else: admin notices, unknown event types.
    fn on_other(&mut self, event_type: EventType, message: &Message) -> HandlerResult {
        debug!("Unhandled {:?} message {}", event_type, message.message_type());
        Ok(())
    }
}
