use crate::error::TransportError;
use crate::message::InboundMessage;
use crate::outcome::DeadLetter;
use async_trait::async_trait;

/// Settlement surface of the transport. The processor invokes exactly one of these per
/// delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageActions: Send + Sync {
    /// Acknowledge; the message is gone.
    async fn complete(&self, message: &InboundMessage) -> Result<(), TransportError>;

    /// Release for redelivery with an incremented delivery count.
    async fn abandon(&self, message: &InboundMessage) -> Result<(), TransportError>;

    /// Move to the dead-letter area with diagnostics.
    async fn dead_letter(
        &self,
        message: &InboundMessage,
        dead_letter: &DeadLetter,
    ) -> Result<(), TransportError>;
}
