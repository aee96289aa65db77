//! Dead-letter stream: entry model and the drain worker.
//!
//! The drain reads the DLQ stream with its own consumer group, logs every dead-lettered
//! message with all of its properties, and acknowledges it.

use crate::actions::MessageActions;
use crate::consumer::{
    FIELD_DEAD_LETTER_REASON, FIELD_DEAD_LETTERED_AT, FIELD_SOURCE_ID, FIELD_SOURCE_STREAM,
    StreamConsumer,
};
use crate::entry::{self, EntryFields};
use crate::error::TransportError;
use crate::message::InboundMessage;
use crate::metrics::ProcessorMetrics;
use crate::outcome::{PROP_DEAD_LETTER_DESCRIPTION, PROP_DEAD_LETTER_REASON};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// One message as stored on the dead-letter stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DlqEntry {
    pub message: InboundMessage,
    pub source_stream: Option<String>,
    pub source_id: Option<String>,
    pub reason: Option<String>,
    pub dead_lettered_at: Option<String>,
}

impl DlqEntry {
    pub fn parse(id: impl Into<String>, fields: EntryFields) -> Self {
        let text = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| String::from_utf8(v.clone()).ok())
        };
        let source_stream = text(FIELD_SOURCE_STREAM);
        let source_id = text(FIELD_SOURCE_ID);
        let reason = text(FIELD_DEAD_LETTER_REASON);
        let dead_lettered_at = text(FIELD_DEAD_LETTERED_AT);

        Self {
            message: entry::parse_entry(id, fields),
            source_stream,
            source_id,
            reason,
            dead_lettered_at,
        }
    }

    /// Reason from the entry field, falling back to the `DeadLetterReason` property.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.message.string_property(PROP_DEAD_LETTER_REASON))
            .unwrap_or("unknown")
    }

    pub fn description(&self) -> Option<&str> {
        self.message.string_property(PROP_DEAD_LETTER_DESCRIPTION)
    }

    pub fn from_message(message: InboundMessage) -> Self {
        Self {
            message,
            source_stream: None,
            source_id: None,
            reason: None,
            dead_lettered_at: None,
        }
    }
}

/// Logs and acknowledges everything arriving on the DLQ stream.
pub struct DlqDrain {
    consumer: StreamConsumer,
    metrics: ProcessorMetrics,
}

impl DlqDrain {
    /// `consumer` must be configured for the DLQ stream (see `WorkerConfig::for_dlq`).
    pub fn new(consumer: StreamConsumer) -> Self {
        let metrics = ProcessorMetrics::new(consumer.config().stream_name.clone());
        Self { consumer, metrics }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        info!(
            stream = %self.consumer.config().stream_name,
            group = %self.consumer.config().consumer_group,
            "Starting DLQ drain"
        );
        self.consumer.ensure_consumer_group().await?;

        let poll_interval = Duration::from_millis(self.consumer.config().poll_interval_ms);
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.consumer.read_new_entries().await {
                Ok(entries) => {
                    consecutive_errors = 0;
                    let idle = entries.is_empty();
                    for (id, fields) in entries {
                        self.drain(DlqEntry::parse(id, fields)).await;
                    }
                    if idle && !self.consumer.is_blocking() {
                        tokio::select! {
                            _ = shutdown.changed() => {}
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if e.is_nogroup_error() {
                        let _ = self.consumer.ensure_consumer_group().await;
                    }
                    let delay = crate::worker::backoff_delay(consecutive_errors);
                    warn!(error = %e, backoff_secs = delay.as_secs(), "DLQ read failed, backing off");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("DLQ drain stopped");
        Ok(())
    }

    async fn drain(&self, entry: DlqEntry) {
        log_entry(&entry);
        self.metrics.dead_letter_drained(entry.reason());

        if let Err(e) = self.consumer.complete(&entry.message).await {
            error!(message_id = %entry.message.id, error = %e, "Failed to acknowledge DLQ message");
        }
    }
}

fn log_entry(entry: &DlqEntry) {
    let message = &entry.message;
    warn!(
        message_id = %message.id,
        reason = entry.reason(),
        source_stream = entry.source_stream.as_deref().unwrap_or("-"),
        source_id = entry.source_id.as_deref().unwrap_or("-"),
        description = entry.description().unwrap_or("-"),
        delivery_count = message.delivery_count,
        body = %String::from_utf8_lossy(&message.body),
        "Dead-lettered message"
    );
    for (key, value) in &message.properties {
        warn!(message_id = %message.id, property = %key, value = %value, "Dead-letter property");
    }
}
