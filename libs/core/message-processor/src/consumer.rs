//! Redis Streams transport.
//!
//! Reads entries through a consumer group and settles them. Each settlement is a single
//! `MULTI`/`EXEC` so an entry is never both re-queued and left pending.

use crate::actions::MessageActions;
use crate::config::WorkerConfig;
use crate::entry::{self, EntryFields};
use crate::error::TransportError;
use crate::message::InboundMessage;
use crate::outcome::DeadLetter;
use async_trait::async_trait;
use chrono::Utc;
use redis::RedisResult;
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const FIELD_SOURCE_STREAM: &str = "source_stream";
pub const FIELD_SOURCE_ID: &str = "source_id";
pub const FIELD_DEAD_LETTER_REASON: &str = "dead_letter_reason";
pub const FIELD_DEAD_LETTERED_AT: &str = "dead_lettered_at";

pub type StreamEntries = Vec<(String, EntryFields)>;
type StreamReply = Vec<(String, StreamEntries)>;

#[derive(Clone)]
pub struct StreamConsumer {
    redis: ConnectionManager,
    config: Arc<WorkerConfig>,
}

impl StreamConsumer {
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self {
            redis,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn redis(&self) -> ConnectionManager {
        self.redis.clone()
    }

    pub fn is_blocking(&self) -> bool {
        self.config.block_timeout_ms.is_some()
    }

    /// Create the consumer group (and the stream) if missing.
    pub async fn ensure_consumer_group(&self) -> Result<(), TransportError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read entries never delivered to this group.
    pub async fn read_new(&self) -> Result<Vec<InboundMessage>, TransportError> {
        Ok(self
            .read_new_entries()
            .await?
            .into_iter()
            .map(|(id, fields)| entry::parse_entry(id, fields))
            .collect())
    }

    /// Like [`Self::read_new`], without parsing the entries.
    pub async fn read_new_entries(&self) -> Result<StreamEntries, TransportError> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id);
        if let Some(timeout) = self.config.block_timeout_ms {
            cmd.arg("BLOCK").arg(timeout);
        }
        cmd.arg("COUNT")
            .arg(self.config.batch_size)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">");

        let reply: Option<StreamReply> = cmd.query_async(&mut conn).await?;

        Ok(reply
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_, entries)| entries)
            .collect())
    }

    /// Take over entries pending longer than `claim_idle_ms` in any consumer.
    ///
    /// The returned messages count the earlier, unsettled deliveries.
    pub async fn claim_idle(&self) -> Result<Vec<InboundMessage>, TransportError> {
        let mut conn = self.redis.clone();

        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(self.config.batch_size)
            .query_async(&mut conn)
            .await?;

        let deliveries: HashMap<String, u64> = pending
            .into_iter()
            .filter(|(_, _, idle_ms, _)| *idle_ms >= self.config.claim_idle_ms)
            .map(|(id, _, _, times_delivered)| (id, times_delivered))
            .collect();

        if deliveries.is_empty() {
            return Ok(vec![]);
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg(self.config.claim_idle_ms);
        for id in deliveries.keys() {
            cmd.arg(id);
        }

        let claimed: StreamEntries = cmd.query_async(&mut conn).await?;

        let messages: Vec<InboundMessage> = claimed
            .into_iter()
            .map(|(id, fields)| {
                let times_delivered = deliveries.get(&id).copied().unwrap_or(1);
                let mut message = entry::parse_entry(id, fields);
                message.delivery_count = redelivered_count(message.delivery_count, times_delivered);
                message
            })
            .collect();

        if !messages.is_empty() {
            warn!(
                count = messages.len(),
                stream = %self.config.stream_name,
                "Claimed idle pending messages"
            );
        }
        Ok(messages)
    }

    async fn ack(&self, id: &str) -> Result<(), TransportError> {
        let mut conn = self.redis.clone();
        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(id)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Append `fields` to `stream` and acknowledge `id` in one transaction.
    async fn add_and_ack(
        &self,
        stream: &str,
        fields: &EntryFields,
        id: &str,
    ) -> Result<(), TransportError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*");
        for (field, value) in fields {
            pipe.arg(field).arg(value.as_slice());
        }
        pipe.ignore();
        pipe.cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(id)
            .ignore();

        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageActions for StreamConsumer {
    async fn complete(&self, message: &InboundMessage) -> Result<(), TransportError> {
        self.ack(&message.id).await?;
        debug!(stream_id = %message.id, "Acknowledged message");
        Ok(())
    }

    async fn abandon(&self, message: &InboundMessage) -> Result<(), TransportError> {
        let next = message.delivery_count.saturating_add(1);
        let fields = entry::entry_fields(message, next)?;
        self.add_and_ack(&self.config.stream_name, &fields, &message.id)
            .await?;
        debug!(stream_id = %message.id, next_delivery = next, "Message abandoned for redelivery");
        Ok(())
    }

    async fn dead_letter(
        &self,
        message: &InboundMessage,
        dead_letter: &DeadLetter,
    ) -> Result<(), TransportError> {
        let fields = dead_letter_fields(&self.config.stream_name, message, dead_letter)?;
        self.add_and_ack(&self.config.dlq_stream, &fields, &message.id)
            .await?;
        warn!(
            stream_id = %message.id,
            dlq = %self.config.dlq_stream,
            reason = %dead_letter.reason,
            "Message moved to DLQ"
        );
        Ok(())
    }
}

/// Delivery count of a reclaimed entry. `times_delivered` is the group's count before the claim.
fn redelivered_count(stored: u32, times_delivered: u64) -> u32 {
    let extra = u32::try_from(times_delivered).unwrap_or(u32::MAX);
    stored.saturating_add(extra)
}

/// Original fields plus the dead-letter diagnostics merged into `properties`.
pub fn dead_letter_fields(
    source_stream: &str,
    message: &InboundMessage,
    dead_letter: &DeadLetter,
) -> Result<EntryFields, serde_json::Error> {
    let mut properties = message.properties.clone();
    for (key, value) in &dead_letter.properties {
        properties.insert(key.clone(), Value::String(value.clone()));
    }

    let mut fields = entry::encode(
        &message.body,
        message.content_type.as_deref(),
        &properties,
        message.delivery_count,
    )?;

    fields.push((FIELD_SOURCE_STREAM.to_string(), source_stream.as_bytes().to_vec()));
    fields.push((FIELD_SOURCE_ID.to_string(), message.id.as_bytes().to_vec()));
    fields.push((
        FIELD_DEAD_LETTER_REASON.to_string(),
        dead_letter.reason.to_string().into_bytes(),
    ));
    fields.push((
        FIELD_DEAD_LETTERED_AT.to_string(),
        Utc::now().to_rfc3339().into_bytes(),
    ));
    Ok(fields)
}
