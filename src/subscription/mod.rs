//! Subscriptions, their listeners and the registry tracking them.

mod listener;
mod model;
mod registry;

pub use listener::{ChannelSubscriptionListener, SubscriptionListener};
pub use model::Subscription;
pub use registry::{
    DUPLICATE_SUBSCRIPTION, DataDelivery, FieldException, ListenerNotice, StatusChange,
    StatusUpdate, SubscriptionRegistry, SubscriptionStatus, UnsubscribeAction,
};
