//! The per-message orchestrator.
//!
//! `decode → resolve → dispatch → classify → route → settle`. The processor is the only
//! component that calls [`MessageActions`], and it calls exactly one action per delivery.

use crate::actions::MessageActions;
use crate::classifier::{FailureKind, Outcome, classify};
use crate::config::ProcessorConfig;
use crate::envelope::{DecodeFailure, DecodedEvent, EnvelopeDecoder};
use crate::error::{HandlerError, TransportError};
use crate::message::InboundMessage;
use crate::metrics::ProcessorMetrics;
use crate::outcome::{Attempt, Resolved, RouteContext, TerminalAction, route};
use crate::registry::EventRegistry;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Span, debug, error, info, instrument, warn};

pub struct MessageProcessor<E> {
    decoder: EnvelopeDecoder<E>,
    config: ProcessorConfig,
    metrics: ProcessorMetrics,
}

impl<E: Send + 'static> MessageProcessor<E> {
    pub fn new(registry: Arc<EventRegistry<E>>, config: ProcessorConfig) -> Self {
        Self {
            decoder: EnvelopeDecoder::new(registry, config.routing_key_property.clone()),
            config,
            metrics: ProcessorMetrics::new("default"),
        }
    }

    pub fn with_metrics(mut self, metrics: ProcessorMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EventRegistry<E>> {
        self.decoder.registry()
    }

    /// Process one delivery and settle it with exactly one transport action.
    ///
    /// `shutdown` flipping to `true` while the handler runs cancels it: the handler future
    /// is dropped (rolling back its transaction) and the message is abandoned.
    ///
    /// A failing transport action is logged and returned; no other action is attempted.
    pub async fn process<A>(
        &self,
        message: &InboundMessage,
        actions: &A,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<TerminalAction, TransportError>
    where
        A: MessageActions + ?Sized,
    {
        let resolved = self.evaluate(message, &mut shutdown).await;
        self.settle(message, &resolved, actions).await?;
        Ok(resolved.action)
    }

    /// Decide the terminal action for `message` without settling it.
    #[instrument(
        name = "process_message",
        skip_all,
        fields(
            message_id = %message.id,
            delivery_count = message.delivery_count,
            event_type = tracing::field::Empty,
        )
    )]
    pub async fn evaluate(
        &self,
        message: &InboundMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Resolved {
        self.metrics.message_received();
        info!(
            content_type = message.content_type.as_deref().unwrap_or("-"),
            body_len = message.body_len(),
            "Message received"
        );

        let decoding = Attempt::start().decoding();
        match self.decoder.decode(message) {
            Err(failure) => {
                if let Some(event_type) = failure.event_type() {
                    Span::current().record("event_type", event_type);
                }
                let event_type = failure.event_type().map(str::to_string);
                let outcome = Outcome::Undecodable(failure);
                let action = self.decide(&outcome, message, event_type.as_deref());
                decoding.resolve(action)
            }
            Ok(decoded) => {
                Span::current().record("event_type", decoded.event_type.as_str());
                let dispatching = decoding.dispatching();
                let event_type = decoded.event_type.clone();
                let outcome = self.dispatch(decoded, shutdown).await;
                let action = self.decide(&outcome, message, Some(&event_type));
                dispatching.resolve(action)
            }
        }
    }

    async fn dispatch(
        &self,
        decoded: DecodedEvent<E>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let Some(route) = self.decoder.registry().resolve(&decoded.event_type) else {
            return Outcome::Undecodable(DecodeFailure::UnknownEventType(decoded.event_type));
        };
        debug!(handler = route.handler_name(), "Dispatching event");

        let handler = AssertUnwindSafe(route.dispatch(decoded.event)).catch_unwind();

        tokio::select! {
            biased;
            result = handler => match result {
                Ok(Ok(result)) => Outcome::Handled(result),
                Ok(Err(err)) => Outcome::Faulted(err),
                Err(panic) => Outcome::Faulted(HandlerError::Panicked(panic_message(panic))),
            },
            _ = wait_for_shutdown(shutdown) => {
                warn!("Shutdown requested, cancelling handler");
                Outcome::Faulted(HandlerError::Cancelled)
            }
        }
    }

    fn decide(
        &self,
        outcome: &Outcome,
        message: &InboundMessage,
        event_type: Option<&str>,
    ) -> TerminalAction {
        let kind = classify(
            outcome,
            message.delivery_count,
            self.config.max_delivery_count,
            &self.config.transient_faults,
        );
        log_outcome(kind, outcome, message);
        if let Some(kind) = kind {
            self.metrics.failure(kind.as_ref());
        }

        let ctx = RouteContext {
            routing_key_property: &self.config.routing_key_property,
            event_type,
            delivery_count: message.delivery_count,
            max_delivery_count: self.config.max_delivery_count,
        };
        route(kind, outcome, &ctx)
    }

    async fn settle<A>(
        &self,
        message: &InboundMessage,
        resolved: &Resolved,
        actions: &A,
    ) -> Result<(), TransportError>
    where
        A: MessageActions + ?Sized,
    {
        let action = &resolved.action;
        let result = match action {
            TerminalAction::Complete => actions.complete(message).await,
            TerminalAction::Abandon => actions.abandon(message).await,
            TerminalAction::DeadLetter(dead_letter) => {
                actions.dead_letter(message, dead_letter).await
            }
        };

        let event_type = message
            .string_property(&self.config.routing_key_property)
            .unwrap_or("none");

        match result {
            Ok(()) => {
                self.metrics
                    .message_settled(action.name(), event_type, resolved.elapsed);
                debug!(message_id = %message.id, action = action.name(), "Message settled");
                Ok(())
            }
            Err(e) => {
                self.metrics.settle_failed(action.name());
                error!(
                    message_id = %message.id,
                    action = action.name(),
                    error = %e,
                    "Failed to settle message"
                );
                Err(e)
            }
        }
    }
}

fn log_outcome(kind: Option<FailureKind>, outcome: &Outcome, message: &InboundMessage) {
    let fault = outcome.fault();
    match kind {
        None => info!(message_id = %message.id, "Message processed"),
        Some(FailureKind::BusinessRejection) => {
            let reason = match outcome {
                Outcome::Handled(result) => result.message(),
                _ => "",
            };
            error!(message_id = %message.id, reason, "Handler failed to update the database");
        }
        Some(FailureKind::TransientInfrastructure) => warn!(
            message_id = %message.id,
            error = ?fault,
            "Transient failure, abandoning for retry"
        ),
        Some(FailureKind::PermanentInfrastructure) => error!(
            message_id = %message.id,
            error_type = fault.map(|f| f.type_name()),
            error = ?fault,
            "Failed to update database, sending to DLQ"
        ),
        Some(FailureKind::DeliveryExhausted) => warn!(
            message_id = %message.id,
            delivery_count = message.delivery_count,
            error = ?fault,
            "Maximum delivery attempts exceeded, sending to DLQ"
        ),
        Some(FailureKind::MalformedInput) => {
            let reason = match outcome {
                Outcome::Undecodable(failure) => failure.to_string(),
                _ => String::new(),
            };
            warn!(message_id = %message.id, reason = %reason, "Undecodable message, sending to DLQ");
        }
    }
}

/// Resolves once `shutdown` reads `true`; never resolves if the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
