//! Stream producer.
//!
//! Publishes event bodies in the entry layout the [`crate::StreamConsumer`] reads.
//!
//! ```rust,ignore
//! let producer = StreamProducer::new(redis, "qms:events");
//! let id = producer.publish_event("QMS.UserCertificate.Create", &event).await?;
//! ```

use crate::config::DEFAULT_ROUTING_KEY_PROPERTY;
use crate::entry;
use crate::error::TransportError;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub const JSON_CONTENT_TYPE: &str = "application/json";

pub struct StreamProducer {
    redis: ConnectionManager,
    stream_name: String,
    routing_key_property: String,
    max_length: i64,
}

impl StreamProducer {
    pub fn new(redis: ConnectionManager, stream_name: impl Into<String>) -> Self {
        Self {
            redis,
            stream_name: stream_name.into(),
            routing_key_property: DEFAULT_ROUTING_KEY_PROPERTY.to_string(),
            max_length: 100_000,
        }
    }

    pub fn with_routing_key_property(mut self, property: impl Into<String>) -> Self {
        self.routing_key_property = property.into();
        self
    }

    /// Set the approximate stream cap (`MAXLEN ~`).
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Append a raw body. Returns the stream entry id.
    pub async fn publish(
        &self,
        body: &[u8],
        content_type: Option<&str>,
        properties: &BTreeMap<String, Value>,
    ) -> Result<String, TransportError> {
        let fields = entry::encode(body, content_type, properties, 1)?;
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*");
        for (field, value) in &fields {
            cmd.arg(field).arg(value.as_slice());
        }
        let stream_id: String = cmd.query_async(&mut conn).await?;

        debug!(stream = %self.stream_name, stream_id = %stream_id, "Published message");
        Ok(stream_id)
    }

    /// Publish a JSON body routed by `event_type`.
    pub async fn publish_json(&self, event_type: &str, body: &[u8]) -> Result<String, TransportError> {
        let properties = self.routing_properties(event_type);
        self.publish(body, Some(JSON_CONTENT_TYPE), &properties).await
    }

    /// Serialize `event` and publish it routed by `event_type`.
    pub async fn publish_event<T: Serialize>(
        &self,
        event_type: &str,
        event: &T,
    ) -> Result<String, TransportError> {
        let body = serde_json::to_vec(event)?;
        self.publish_json(event_type, &body).await
    }

    fn routing_properties(&self, event_type: &str) -> BTreeMap<String, Value> {
        BTreeMap::from([(
            self.routing_key_property.clone(),
            Value::String(event_type.to_string()),
        )])
    }
}
