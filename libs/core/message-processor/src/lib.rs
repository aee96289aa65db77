//! Event-driven message processing over Redis Streams.
//!
//! Every delivery goes through one pipeline:
//!
//! 1. [`EnvelopeDecoder`] reads the routing key from the application properties and
//!    deserializes the body against the schema registered in the [`EventRegistry`].
//! 2. The registered [`EventHandler`] applies the event, typically inside one
//!    [`database::TransactionScope`].
//! 3. [`classify`] reduces the outcome to at most one [`FailureKind`].
//! 4. [`route`] maps the kind to a [`TerminalAction`].
//! 5. [`MessageProcessor`] performs exactly one action through [`MessageActions`].
//!
//! [`MessageWorker`] drives the processor from a consumer group, [`DlqDrain`] empties the
//! dead-letter stream, and [`StreamProducer`] publishes events.
//!
//! ## Example
//!
//! ```rust,ignore
//! let registry = Arc::new(
//!     EventRegistry::<QmsEvent>::builder()
//!         .register::<UserCertificateCreated, _>("QMS.UserCertificate.Create", handler)?
//!         .build(),
//! );
//! let processor = Arc::new(MessageProcessor::new(registry, ProcessorConfig::from_env()?));
//! let consumer = StreamConsumer::new(redis, WorkerConfig::from_env()?);
//! MessageWorker::new(consumer, processor).run(shutdown_rx).await?;
//! ```

mod actions;
mod classifier;
mod config;
mod consumer;
mod dlq;
pub mod entry;
mod envelope;
mod error;
mod health;
mod message;
pub mod metrics;
mod outcome;
mod processor;
mod producer;
mod registry;
mod result;
mod worker;

pub use actions::MessageActions;
pub use classifier::{DEFAULT_TRANSIENT_CODES, FailureKind, Outcome, TransientFaults, classify};
pub use config::{DEFAULT_MAX_DELIVERY_COUNT, DEFAULT_ROUTING_KEY_PROPERTY, ProcessorConfig, WorkerConfig};
pub use consumer::{StreamConsumer, dead_letter_fields};
pub use dlq::{DlqDrain, DlqEntry};
pub use envelope::{DecodeFailure, DecodedEvent, EnvelopeDecoder};
pub use error::{HandlerError, RegistryError, TransportError};
pub use health::{HealthResponse, HealthState, ReadinessCheck, health_router};
pub use message::InboundMessage;
pub use metrics::{ProcessorMetrics, init_metrics, render_metrics};
pub use outcome::{
    Attempt, AttemptState, DeadLetter, DeadLetterReason, Decoding, Dispatching,
    PROP_DEAD_LETTER_DESCRIPTION, PROP_DEAD_LETTER_REASON, PROP_EVENT_TYPE,
    PROP_ORIGINAL_EXCEPTION_MESSAGE, PROP_ORIGINAL_EXCEPTION_TYPE, Received, Resolved,
    RouteContext, TerminalAction, route,
};
pub use processor::MessageProcessor;
pub use producer::{JSON_CONTENT_TYPE, StreamProducer};
pub use registry::{EventHandler, EventRegistry, EventRegistryBuilder, EventRoute};
pub use result::OperationResult;
pub use worker::{MessageWorker, backoff_delay};
