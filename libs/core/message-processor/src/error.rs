//! Error types of the processing pipeline.
//!
//! Handlers report two different things through two channels: expected business rejections
//! come back as an unsuccessful [`crate::OperationResult`], infrastructure faults come back
//! as a [`HandlerError`]. Decode problems are [`crate::DecodeFailure`]s and never reach a
//! handler.

use database::StoreError;
use thiserror::Error;

/// Infrastructure fault raised while a handler ran.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Host shutdown interrupted the handler; its transaction was dropped.
    #[error("handler cancelled before completion")]
    Cancelled,

    #[error("handler panicked: {0}")]
    Panicked(String),

    /// A route was handed an event of another variant. Indicates a registry wiring bug.
    #[error("event does not match the handler registered for '{event_type}'")]
    EventMismatch { event_type: String },

    #[error("{message}")]
    Unexpected { type_name: String, message: String },
}

impl HandlerError {
    /// Wrap an arbitrary error, keeping its concrete type name for diagnostics.
    pub fn unexpected<E: std::error::Error>(err: &E) -> Self {
        HandlerError::Unexpected {
            type_name: std::any::type_name::<E>().to_string(),
            message: err.to_string(),
        }
    }

    /// Name of the concrete error type, reported as `OriginalExceptionType`.
    pub fn type_name(&self) -> &str {
        match self {
            HandlerError::Store(e) => e.source_type(),
            HandlerError::Cancelled => "HandlerError::Cancelled",
            HandlerError::Panicked(_) => "HandlerError::Panicked",
            HandlerError::EventMismatch { .. } => "HandlerError::EventMismatch",
            HandlerError::Unexpected { type_name, .. } => type_name,
        }
    }

    /// Reported as `OriginalExceptionMessage`.
    pub fn detail(&self) -> String {
        match self {
            HandlerError::Store(e) => e.message().to_string(),
            other => other.to_string(),
        }
    }
}

/// Failure talking to the message transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    pub fn is_connection_error(&self) -> bool {
        match self {
            TransportError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal()
            }
            TransportError::Serialization(_) => false,
        }
    }

    /// The consumer group vanished (stream deleted or flushed).
    pub fn is_nogroup_error(&self) -> bool {
        matches!(self, TransportError::Redis(e) if e.to_string().contains("NOGROUP"))
    }
}

/// Registry construction errors. Raised at startup, never while processing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("event type '{0}' is already registered")]
    DuplicateEventType(String),

    #[error("event type must not be empty")]
    EmptyEventType,
}
