//! Event classification and delivery to handlers.

mod dispatcher;
mod handler;

pub use dispatcher::{DispatchReport, EventDispatcher, HandlerFailure};
pub use handler::{EventHandler, HandlerResult};
