//! The application-facing session.
//!
//! [`Session`] ties the connection manager, authentication flow, subscription registry,
//! request correlator and event dispatcher together. An inbound task routes every
//! event from the transport either to a private [`EventQueue`] or to the main event
//! stream, and drives reconnection when the link drops.

mod queue;
mod session;

pub use queue::EventQueue;
pub(crate) use queue::QueueRouter;
pub use session::{Session, SessionBuilder};
