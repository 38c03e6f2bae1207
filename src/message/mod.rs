mod correlation;
mod element;
mod event;
mod name;

pub use correlation::{CorrelationId, CorrelationIdGenerator};
pub use element::{Element, ErrorInfo, Value};
pub use event::{Event, EventType, Message};
pub use name::{Name, element as element_names};
