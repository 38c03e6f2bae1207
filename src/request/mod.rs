//! Services, requests and the request/response correlator.

mod correlator;
mod model;

pub use correlator::{Delivery, Reply, RequestResponseCorrelator, RequestState};
pub use model::{AUTHORIZATION_OPERATION, Request, Service};
