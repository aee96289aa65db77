//! Transport-neutral view of one delivery.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A message as handed to the processor by the transport.
///
/// Read-only to the processor; the transport owns it and is the only party that acts on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport id (Redis stream entry id).
    pub id: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    /// Application properties; carries the routing key.
    pub properties: BTreeMap<String, Value>,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
}

impl InboundMessage {
    pub fn new(id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            content_type: None,
            properties: BTreeMap::new(),
            delivery_count: 1,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_delivery_count(mut self, delivery_count: u32) -> Self {
        self.delivery_count = delivery_count;
        self
    }

    /// String-valued property; `None` when absent or not a string.
    pub fn string_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_defaults() {
        let message = InboundMessage::new("1-0", b"{}".to_vec());
        assert_eq!(message.delivery_count, 1);
        assert!(message.content_type.is_none());
        assert!(message.properties.is_empty());
        assert_eq!(message.body_len(), 2);
    }

    #[test]
    fn test_string_property_ignores_non_strings() {
        let message = InboundMessage::new("1-0", Vec::new())
            .with_property("eventType", "QMS.UserCertificate.Create")
            .with_property("priority", 3);

        assert_eq!(
            message.string_property("eventType"),
            Some("QMS.UserCertificate.Create")
        );
        assert_eq!(message.string_property("priority"), None);
        assert_eq!(message.string_property("missing"), None);
    }
}
