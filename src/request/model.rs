use std::collections::BTreeSet;

use crate::message::{Element, Value};
use crate::utils::{DecodeError, RequestError};

/// Operation name used for authorization requests.
pub const AUTHORIZATION_OPERATION: &str = "AuthorizationRequest";

/// An opened service and the operations it advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    name: String,
    operations: BTreeSet<String>,
}

impl Service {
    /// Creates a service description.
    pub fn new(name: impl Into<String>, operations: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            operations: operations.into_iter().collect(),
        }
    }

    /// Service name, e.g. `//refdata`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operations advertised when the service was opened.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(String::as_str)
    }

    /// Whether `operation` can be requested. A service that advertised nothing
    /// accepts any operation.
    pub fn has_operation(&self, operation: &str) -> bool {
        self.operations.is_empty() || self.operations.contains(operation)
    }

    /// Creates an empty request for `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnknownOperation`] when the service does not advertise it.
    pub fn create_request(&self, operation: &str) -> Result<Request, RequestError> {
        if operation.trim().is_empty() {
            return Err(RequestError::InvalidRequest(
                "operation name must not be empty".to_string(),
            ));
        }
        if !self.has_operation(operation) {
            return Err(RequestError::UnknownOperation {
                service: self.name.clone(),
                operation: operation.to_string(),
            });
        }
        Ok(Request::new(&self.name, operation))
    }

    /// Creates an authorization request against this service.
    pub fn create_authorization_request(&self) -> Request {
        Request::new(&self.name, AUTHORIZATION_OPERATION)
    }
}

/// An outbound request: target service, operation and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    service: String,
    operation: String,
    payload: Element,
}

impl Request {
    pub(crate) fn new(service: &str, operation: &str) -> Self {
        Self {
            service: service.to_string(),
            operation: operation.to_string(),
            payload: Element::complex(operation),
        }
    }

    /// Target service.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Payload root.
    pub fn payload(&self) -> &Element {
        &self.payload
    }

    /// Mutable payload root, for nested construction.
    pub fn payload_mut(&mut self) -> &mut Element {
        &mut self.payload
    }

    /// Sets a top level field.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), DecodeError> {
        self.payload.set(name, value)
    }

    /// Appends a value to a top level array field such as `securities`.
    pub fn append(&mut self, name: &str, value: impl Into<Value>) -> Result<(), DecodeError> {
        self.payload.append_to(name, value)
    }
}
