use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier attached to every outbound request or subscription and echoed back on
/// every related inbound message.
///
/// Application supplied ids are either integers or strings. Ids allocated by the
/// session itself are `Internal` and never collide with application ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CorrelationId {
    /// Integer id chosen by the application
    Int(i64),
    /// String id chosen by the application
    Text(String),
    /// Id allocated by a [`CorrelationIdGenerator`]
    Internal(u64),
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationId::Int(v) => write!(f, "{}", v),
            CorrelationId::Text(v) => write!(f, "{}", v),
            CorrelationId::Internal(v) => write!(f, "#{}", v),
        }
    }
}

impl From<i64> for CorrelationId {
    fn from(value: i64) -> Self {
        CorrelationId::Int(value)
    }
}

impl From<i32> for CorrelationId {
    fn from(value: i32) -> Self {
        CorrelationId::Int(i64::from(value))
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        CorrelationId::Text(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        CorrelationId::Text(value)
    }
}

/// Per-session allocator of `Internal` correlation ids.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    next: AtomicU64,
}

impl CorrelationIdGenerator {
    /// Creates a generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocates the next id.
    pub fn next_id(&self) -> CorrelationId {
        CorrelationId::Internal(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generator_yields_unique_internal_ids() {
        let generator = CorrelationIdGenerator::new();
        let ids: HashSet<CorrelationId> = (0..100).map(|_| generator.next_id()).collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.contains(&CorrelationId::Internal(1)));
    }

    #[test]
    fn test_internal_ids_never_equal_application_ids() {
        assert_ne!(CorrelationId::Internal(7), CorrelationId::Int(7));
        assert_ne!(CorrelationId::from("7"), CorrelationId::Int(7));
    }

    #[test]
    fn test_display() {
        assert_eq!(CorrelationId::Int(42).to_string(), "42");
        assert_eq!(CorrelationId::from("IBM US Equity").to_string(), "IBM US Equity");
        assert_eq!(CorrelationId::Internal(3).to_string(), "#3");
    }
}
