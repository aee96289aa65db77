//! Redis stream entry layout.
//!
//! | field | content |
//! |---|---|
//! | `body` | raw message body |
//! | `content_type` | optional |
//! | `properties` | JSON object of application properties |
//! | `delivery_count` | delivery number of the first read of this entry (absent = 1) |

use crate::message::InboundMessage;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

pub const FIELD_BODY: &str = "body";
pub const FIELD_CONTENT_TYPE: &str = "content_type";
pub const FIELD_PROPERTIES: &str = "properties";
pub const FIELD_DELIVERY_COUNT: &str = "delivery_count";

/// Raw `(field, value)` pairs of one entry.
pub type EntryFields = Vec<(String, Vec<u8>)>;

/// Build an [`InboundMessage`] from a stream entry.
///
/// Unreadable `properties` are dropped with a warning; the message then fails routing
/// and is dead-lettered instead of blocking the stream.
pub fn parse_entry(id: impl Into<String>, fields: EntryFields) -> InboundMessage {
    let id = id.into();
    let mut message = InboundMessage::new(id, Vec::new());

    for (field, value) in fields {
        match field.as_str() {
            FIELD_BODY => message.body = value,
            FIELD_CONTENT_TYPE => message.content_type = String::from_utf8(value).ok(),
            FIELD_PROPERTIES => message.properties = parse_properties(&message.id, &value),
            FIELD_DELIVERY_COUNT => {
                message.delivery_count = std::str::from_utf8(&value)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(1);
            }
            _ => {}
        }
    }

    message
}

fn parse_properties(id: &str, raw: &[u8]) -> BTreeMap<String, Value> {
    match serde_json::from_slice::<Map<String, Value>>(raw) {
        Ok(map) => map.into_iter().collect(),
        Err(e) => {
            warn!(stream_id = %id, error = %e, "Unreadable properties field, ignoring");
            BTreeMap::new()
        }
    }
}

/// Encode a message as entry fields, with `delivery_count` overridden.
pub fn entry_fields(
    message: &InboundMessage,
    delivery_count: u32,
) -> Result<EntryFields, serde_json::Error> {
    encode(
        &message.body,
        message.content_type.as_deref(),
        &message.properties,
        delivery_count,
    )
}

pub fn encode(
    body: &[u8],
    content_type: Option<&str>,
    properties: &BTreeMap<String, Value>,
    delivery_count: u32,
) -> Result<EntryFields, serde_json::Error> {
    let mut fields = vec![(FIELD_BODY.to_string(), body.to_vec())];
    if let Some(content_type) = content_type {
        fields.push((FIELD_CONTENT_TYPE.to_string(), content_type.as_bytes().to_vec()));
    }
    fields.push((FIELD_PROPERTIES.to_string(), serde_json::to_vec(properties)?));
    fields.push((
        FIELD_DELIVERY_COUNT.to_string(),
        delivery_count.to_string().into_bytes(),
    ));
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(k: &str, v: &str) -> (String, Vec<u8>) {
        (k.to_string(), v.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_full_entry() {
        let message = parse_entry(
            "1700000000000-0",
            vec![
                field("body", r#"{"UserId":"x"}"#),
                field("content_type", "application/json"),
                field("properties", r#"{"eventType":"QMS.UserCertificate.Create"}"#),
                field("delivery_count", "3"),
            ],
        );

        assert_eq!(message.id, "1700000000000-0");
        assert_eq!(message.body, br#"{"UserId":"x"}"#);
        assert_eq!(message.content_type.as_deref(), Some("application/json"));
        assert_eq!(
            message.string_property("eventType"),
            Some("QMS.UserCertificate.Create")
        );
        assert_eq!(message.delivery_count, 3);
    }

    #[test]
    fn test_parse_minimal_entry_defaults() {
        let message = parse_entry("1-0", vec![field("body", "{}")]);
        assert_eq!(message.delivery_count, 1);
        assert!(message.properties.is_empty());
        assert!(message.content_type.is_none());
    }

    #[test]
    fn test_unreadable_properties_are_dropped() {
        let message = parse_entry(
            "1-0",
            vec![field("properties", "not json"), field("delivery_count", "zero")],
        );
        assert!(message.properties.is_empty());
        assert_eq!(message.delivery_count, 1);
    }

    #[test]
    fn test_entry_fields_override_delivery_count() {
        let message = InboundMessage::new("1-0", b"{}".to_vec())
            .with_property("eventType", "A")
            .with_delivery_count(2);
        let fields = entry_fields(&message, 3).unwrap();

        let reparsed = parse_entry("2-0", fields);
        assert_eq!(reparsed.delivery_count, 3);
        assert_eq!(reparsed.string_property("eventType"), Some("A"));
        assert_eq!(reparsed.body, b"{}");
    }
}
