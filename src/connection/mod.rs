//! Session options and the connection lifecycle.

pub mod management;
mod options;

pub use self::management::{
    ConnectionManager, ConnectionMetrics, ConnectionState, ReconnectionConfig, StopMode,
};
pub use self::options::SessionOptions;
