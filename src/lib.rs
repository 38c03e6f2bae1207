//! # Market Session Rust Client Core
//!
//! An event-driven session client for market-data and reference-data services. The
//! crate owns everything between the application and the wire: connecting to one of
//! several backend hosts with failover, authenticating, tracking subscriptions,
//! correlating requests with their (possibly multi-part) replies and delivering events
//! to the application in arrival order.
//!
//! Framing, encoding and socket I/O stay outside: they live behind the
//! [`transport::Transport`] trait. A scripted [`transport::MockTransport`] ships with the
//! crate for tests and demos.
//!
//! ## Features
//!
//! - **Connection Management**:
//!   - Ordered list of candidate endpoints, tried in turn until one accepts
//!   - Optional automatic restart with exponential backoff and jitter
//!   - Subscriptions resumed after a reconnection, minus the fields already rejected
//!   - Synthesized session status events (`SessionStarted`, `SessionConnectionDown`,
//!     `SessionConnectionUp`, `SessionTerminated`, ...)
//!   - Connection metrics
//!
//! - **Authentication**:
//!   - OS logon, application, directory service and user + application strategies
//!   - Token generation and authorization, each bounded by a timeout
//!   - Identities resolved exactly once
//!
//! - **Subscriptions**:
//!   - Topics with ordered fields and options, keyed by correlation id
//!   - Per-field exceptions reported once, never retried
//!   - Duplicate topics and ids rejected without disturbing the live entry
//!   - Optional per-subscription listeners, including a channel-forwarding one
//!
//! - **Requests**:
//!   - Services opened on demand, requests validated against their operations
//!   - Partial responses followed by exactly one terminal reply
//!   - Error payloads turned into terminal errors
//!   - Cancellation; late replies for retired ids are dropped
//!
//! - **Event Delivery**:
//!   - Callback mode through an [`dispatch::EventHandler`]
//!   - Polling mode through [`client::Session::next_event`] or a `Stream`
//!   - Handler failures caught and reported, never fatal
//!
//! ## Usage
//!
//! ```ignore
//! use marketsession_rs::client::Session;
//! use marketsession_rs::connection::{SessionOptions, StopMode};
//! use marketsession_rs::dispatch::EventHandler;
//! use marketsession_rs::request::Reply;
//! use marketsession_rs::transport::{Endpoint, MockTransport};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl EventHandler for Printer {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(MockTransport::new().with_service("//refdata", &["ReferenceDataRequest"]));
//!     let session = Session::builder()
//!         .options(SessionOptions::new(Endpoint::new("localhost", 8194)))
//!         .transport(transport)
//!         .handler(Box::new(Printer))
//!         .build()?;
//!     session.start().await?;
//!
//!     let service = session.open_service("//refdata").await?;
//!     let mut request = service.create_request("ReferenceDataRequest")?;
//!     request.append("securities", "IBM US Equity")?;
//!     request.append("fields", "PX_LAST")?;
//!
//!     let (_, mut replies) = session.request(request, None).await?;
//!     while let Some(reply) = replies.recv().await {
//!         match reply {
//!             Reply::Partial(message) => println!("partial: {}", message.to_json()),
//!             Reply::Final(message) => {
//!                 println!("final: {}", message.to_json());
//!                 break;
//!             }
//!             Reply::Failed(error) => {
//!                 eprintln!("{}", error);
//!                 break;
//!             }
//!         }
//!     }
//!
//!     session.stop(StopMode::Graceful).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! Everything is logged through `tracing`. [`utils::setup_logger`] installs a formatter
//! reading its level from the `LOGLEVEL` environment variable.

/// Messages, events, correlation ids and the structured payload model.
pub mod message;

/// The seam to the external transport, and a scripted in-memory transport.
pub mod transport;

/// Session options, reconnection policy and the connection lifecycle.
pub mod connection;

/// Authentication strategies and the token/authorization flow.
pub mod auth;

/// Subscriptions and the registry that tracks them.
pub mod subscription;

/// Services, requests and request/response correlation.
pub mod request;

/// Event classification and handler dispatch.
pub mod dispatch;

/// The application-facing [`client::Session`].
pub mod client;

/// Module containing utility functions and error types.
///
/// This module provides the error taxonomy, logger setup and signal handling used
/// throughout the library.
pub mod utils;
