use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::message::CorrelationId;
use crate::utils::SubscriptionError;

/// A named data stream plus the requested field set and options.
///
/// Immutable once built; the registry keeps its own copy from the moment it is
/// submitted until it is unsubscribed or the session stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    topic: String,
    fields: Vec<String>,
    options: BTreeMap<String, String>,
    correlation_id: CorrelationId,
}

impl Subscription {
    /// Creates a new subscription.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::InvalidSubscription`] if the topic is blank, if no
    /// field is requested, or if a field name is blank or repeated.
    pub fn new(
        topic: impl Into<String>,
        fields: Vec<String>,
        correlation_id: impl Into<CorrelationId>,
    ) -> Result<Self, SubscriptionError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(SubscriptionError::InvalidSubscription(
                "topic must not be empty".to_string(),
            ));
        }
        if fields.is_empty() {
            return Err(SubscriptionError::InvalidSubscription(format!(
                "no fields requested for {}",
                topic
            )));
        }
        let mut seen = BTreeSet::new();
        for field in &fields {
            if field.trim().is_empty() {
                return Err(SubscriptionError::InvalidSubscription(format!(
                    "blank field name for {}",
                    topic
                )));
            }
            if !seen.insert(field.as_str()) {
                return Err(SubscriptionError::InvalidSubscription(format!(
                    "field {} requested twice for {}",
                    field, topic
                )));
            }
        }

        Ok(Self {
            topic,
            fields,
            options: BTreeMap::new(),
            correlation_id: correlation_id.into(),
        })
    }

    /// Adds an option such as `interval=5.0`.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Topic or security identifier.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Requested fields in request order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Subscription options.
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Correlation id echoed on every status and data message.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Copy of this subscription without the given fields, used when resubscribing a
    /// degraded subscription. Returns `None` when no field would be left.
    pub(crate) fn without_fields(&self, excluded: &BTreeSet<String>) -> Option<Subscription> {
        let fields: Vec<String> = self
            .fields
            .iter()
            .filter(|f| !excluded.contains(*f))
            .cloned()
            .collect();
        if fields.is_empty() {
            return None;
        }
        Some(Subscription {
            fields,
            ..self.clone()
        })
    }
}

impl fmt::Display for Subscription {
    /// Renders `topic?fields=a,b&key=value`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?fields={}", self.topic, self.fields.join(","))?;
        for (key, value) in &self.options {
            write!(f, "&{}={}", key, value)?;
        }
        Ok(())
    }
}
