//! Envelope decoding: routing key lookup and schema deserialization.

use crate::message::InboundMessage;
use crate::registry::EventRegistry;
use std::sync::Arc;
use thiserror::Error;

/// Why a message could not be turned into a typed event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeFailure {
    #[error("routing key property '{property}' is missing or not a string")]
    MissingRoutingKey { property: String },

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Routing key is registered but the body does not match its schema.
    #[error("body of '{event_type}' does not match its schema: {reason}")]
    MalformedBody { event_type: String, reason: String },
}

impl DecodeFailure {
    pub fn event_type(&self) -> Option<&str> {
        match self {
            DecodeFailure::MissingRoutingKey { .. } => None,
            DecodeFailure::UnknownEventType(event_type)
            | DecodeFailure::MalformedBody { event_type, .. } => Some(event_type),
        }
    }
}

/// A successfully decoded delivery.
#[derive(Debug)]
pub struct DecodedEvent<E> {
    pub event_type: String,
    pub event: E,
    pub delivery_count: u32,
}

/// Reads the routing key from a message's properties and deserializes the body with the
/// schema registered for it. Has no side effects.
pub struct EnvelopeDecoder<E> {
    registry: Arc<EventRegistry<E>>,
    routing_key_property: String,
}

impl<E: Send + 'static> EnvelopeDecoder<E> {
    pub fn new(registry: Arc<EventRegistry<E>>, routing_key_property: impl Into<String>) -> Self {
        Self {
            registry,
            routing_key_property: routing_key_property.into(),
        }
    }

    pub fn routing_key_property(&self) -> &str {
        &self.routing_key_property
    }

    pub fn registry(&self) -> &Arc<EventRegistry<E>> {
        &self.registry
    }

    pub fn decode(&self, message: &InboundMessage) -> Result<DecodedEvent<E>, DecodeFailure> {
        let event_type = message
            .string_property(&self.routing_key_property)
            .ok_or_else(|| DecodeFailure::MissingRoutingKey {
                property: self.routing_key_property.clone(),
            })?;

        let route = self
            .registry
            .resolve(event_type)
            .ok_or_else(|| DecodeFailure::UnknownEventType(event_type.to_string()))?;

        let event = route
            .decode(&message.body)
            .map_err(|e| DecodeFailure::MalformedBody {
                event_type: event_type.to_string(),
                reason: e.to_string(),
            })?;

        Ok(DecodedEvent {
            event_type: event_type.to_string(),
            event,
            delivery_count: message.delivery_count,
        })
    }
}
