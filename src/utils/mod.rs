/// Module containing the error taxonomy used throughout the library.
///
/// Connection, authentication, request, subscription and decoding failures each have
/// their own enum; `SessionError` wraps all of them for callers that do not care.
pub mod error;
mod logger;
mod util;

pub use error::{
    AuthError, ConnectionError, DecodeError, RequestError, SessionError, SubscriptionError,
};
pub use logger::{setup_logger, setup_logger_with_level};
pub(crate) use util::catch_panic;
pub use util::{option_value, parse_options, setup_signal_hook};
