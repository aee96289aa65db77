//! Processor and worker configuration.

use crate::classifier::TransientFaults;
use core_config::{ConfigError, FromEnv, env_list, env_or_default, env_parse};
use uuid::Uuid;

pub const DEFAULT_ROUTING_KEY_PROPERTY: &str = "eventType";
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 5;

/// Decision policy of the [`crate::MessageProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Application property holding the routing key.
    pub routing_key_property: String,
    /// Deliveries above this count are dead-lettered instead of retried. Always > 0.
    pub max_delivery_count: u32,
    pub transient_faults: TransientFaults,
}

impl ProcessorConfig {
    pub fn with_routing_key_property(mut self, property: impl Into<String>) -> Self {
        self.routing_key_property = property.into();
        self
    }

    pub fn with_max_delivery_count(mut self, count: u32) -> Self {
        self.max_delivery_count = count.max(1);
        self
    }

    pub fn with_transient_faults(mut self, faults: TransientFaults) -> Self {
        self.transient_faults = faults;
        self
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            routing_key_property: DEFAULT_ROUTING_KEY_PROPERTY.to_string(),
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
            transient_faults: TransientFaults::default(),
        }
    }
}

/// Environment variables:
/// - `ROUTING_KEY_PROPERTY` (default `eventType`)
/// - `MAX_DELIVERY_COUNT` (default 5, must be > 0)
/// - `TRANSIENT_ERROR_CODES` (comma-separated; replaces the default allow-list)
impl FromEnv for ProcessorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let routing_key_property = env_or_default("ROUTING_KEY_PROPERTY", DEFAULT_ROUTING_KEY_PROPERTY);
        if routing_key_property.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ROUTING_KEY_PROPERTY".to_string(),
                details: "must not be empty".to_string(),
            });
        }

        let max_delivery_count = env_parse("MAX_DELIVERY_COUNT", DEFAULT_MAX_DELIVERY_COUNT)?;
        if max_delivery_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_DELIVERY_COUNT".to_string(),
                details: "must be a positive integer".to_string(),
            });
        }

        let transient_faults = match env_list("TRANSIENT_ERROR_CODES") {
            Some(codes) if !codes.is_empty() => TransientFaults::new(codes),
            _ => TransientFaults::default(),
        };

        Ok(Self {
            routing_key_property,
            max_delivery_count,
            transient_faults,
        })
    }
}

/// Redis Streams consumer settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream_name: String,
    pub consumer_group: String,
    /// Unique per process (auto-generated).
    pub consumer_id: String,
    pub dlq_stream: String,
    /// Approximate cap applied to `XADD` on the source and DLQ streams.
    pub max_length: i64,
    pub batch_size: usize,
    /// `XREADGROUP BLOCK` timeout; `None` polls.
    pub block_timeout_ms: Option<u64>,
    pub poll_interval_ms: u64,
    pub max_concurrent_messages: usize,
    /// Pending entries idle longer than this are reclaimed (redelivered).
    pub claim_idle_ms: u64,
}

impl WorkerConfig {
    pub fn new(stream_name: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        Self {
            dlq_stream: format!("{}:dlq", stream_name),
            stream_name,
            consumer_group: consumer_group.into(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            max_length: 100_000,
            batch_size: 20,
            block_timeout_ms: Some(1000),
            poll_interval_ms: 1000,
            max_concurrent_messages: 10,
            claim_idle_ms: 60_000,
        }
    }

    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    pub fn with_dlq_stream(mut self, stream: impl Into<String>) -> Self {
        self.dlq_stream = stream.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_blocking(mut self, timeout_ms: Option<u64>) -> Self {
        self.block_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_concurrent_messages(mut self, count: usize) -> Self {
        self.max_concurrent_messages = count.max(1);
        self
    }

    pub fn with_claim_idle_ms(mut self, idle_ms: u64) -> Self {
        self.claim_idle_ms = idle_ms;
        self
    }

    /// Settings for the drain worker reading this worker's DLQ stream.
    pub fn for_dlq(&self) -> WorkerConfig {
        WorkerConfig {
            stream_name: self.dlq_stream.clone(),
            consumer_group: format!("{}_dlq", self.consumer_group),
            consumer_id: format!("dlq-{}", Uuid::new_v4()),
            dlq_stream: String::new(),
            max_concurrent_messages: 1,
            ..self.clone()
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("qms:events", "qms_data_updater")
    }
}

/// Environment variables:
/// - `QMS_STREAM_NAME` (default `qms:events`), `QMS_CONSUMER_GROUP` (default `qms_data_updater`)
/// - `QMS_DLQ_STREAM` (default `<stream>:dlq`)
/// - `BATCH_SIZE` (20), `BLOCK_TIMEOUT_MS` (1000, 0 = poll), `CLAIM_IDLE_MS` (60000)
/// - `MAX_CONCURRENT_MESSAGES` (10)
/// - `CONSUMER_ID` (default `worker-<uuid>`)
impl FromEnv for WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let stream_name = env_or_default("QMS_STREAM_NAME", "qms:events");
        let consumer_group = env_or_default("QMS_CONSUMER_GROUP", "qms_data_updater");
        let mut config = WorkerConfig::new(stream_name, consumer_group);

        if let Ok(dlq) = std::env::var("QMS_DLQ_STREAM") {
            config.dlq_stream = dlq;
        }
        if let Ok(id) = std::env::var("CONSUMER_ID") {
            config.consumer_id = id;
        }
        if config.dlq_stream == config.stream_name {
            return Err(ConfigError::InvalidValue {
                key: "QMS_DLQ_STREAM".to_string(),
                details: "must differ from QMS_STREAM_NAME".to_string(),
            });
        }

        let batch_size: usize = env_parse("BATCH_SIZE", config.batch_size)?;
        let block_timeout_ms: u64 = env_parse("BLOCK_TIMEOUT_MS", 1000)?;
        let claim_idle_ms: u64 = env_parse("CLAIM_IDLE_MS", config.claim_idle_ms)?;
        let max_concurrent: usize =
            env_parse("MAX_CONCURRENT_MESSAGES", config.max_concurrent_messages)?;

        Ok(config
            .with_batch_size(batch_size)
            .with_blocking((block_timeout_ms > 0).then_some(block_timeout_ms))
            .with_claim_idle_ms(claim_idle_ms)
            .with_max_concurrent_messages(max_concurrent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_config_defaults() {
        temp_env::with_vars(
            [
                ("ROUTING_KEY_PROPERTY", None::<&str>),
                ("MAX_DELIVERY_COUNT", None),
                ("TRANSIENT_ERROR_CODES", None),
            ],
            || {
                let config = ProcessorConfig::from_env().unwrap();
                assert_eq!(config.routing_key_property, "eventType");
                assert_eq!(config.max_delivery_count, 5);
                assert!(config.transient_faults.contains_code("1205"));
                assert!(config.transient_faults.contains_code("40P01"));
            },
        );
    }

    #[test]
    fn test_processor_config_custom_codes() {
        temp_env::with_vars(
            [
                ("MAX_DELIVERY_COUNT", Some("3")),
                ("TRANSIENT_ERROR_CODES", Some("1205, 40001")),
            ],
            || {
                let config = ProcessorConfig::from_env().unwrap();
                assert_eq!(config.max_delivery_count, 3);
                assert_eq!(
                    config.transient_faults.codes().collect::<Vec<_>>(),
                    vec!["1205", "40001"]
                );
            },
        );
    }

    #[test]
    fn test_processor_config_rejects_zero_threshold() {
        temp_env::with_var("MAX_DELIVERY_COUNT", Some("0"), || {
            let err = ProcessorConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("MAX_DELIVERY_COUNT"));
        });
    }

    #[test]
    fn test_worker_config_from_env() {
        temp_env::with_vars(
            [
                ("QMS_STREAM_NAME", Some("qms:test")),
                ("QMS_CONSUMER_GROUP", None),
                ("QMS_DLQ_STREAM", None),
                ("CONSUMER_ID", Some("worker-a")),
                ("BATCH_SIZE", Some("5")),
                ("BLOCK_TIMEOUT_MS", Some("0")),
                ("MAX_CONCURRENT_MESSAGES", Some("4")),
            ],
            || {
                let config = WorkerConfig::from_env().unwrap();
                assert_eq!(config.stream_name, "qms:test");
                assert_eq!(config.dlq_stream, "qms:test:dlq");
                assert_eq!(config.consumer_group, "qms_data_updater");
                assert_eq!(config.consumer_id, "worker-a");
                assert_eq!(config.batch_size, 5);
                assert_eq!(config.block_timeout_ms, None);
                assert_eq!(config.max_concurrent_messages, 4);
            },
        );
    }

    #[test]
    fn test_worker_config_rejects_dlq_equal_to_source() {
        temp_env::with_vars(
            [
                ("QMS_STREAM_NAME", Some("qms:events")),
                ("QMS_DLQ_STREAM", Some("qms:events")),
            ],
            || {
                let err = WorkerConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("QMS_DLQ_STREAM"));
            },
        );
    }

    #[test]
    fn test_for_dlq_targets_dead_letter_stream() {
        let config = WorkerConfig::new("qms:events", "qms_data_updater");
        let dlq = config.for_dlq();
        assert_eq!(dlq.stream_name, "qms:events:dlq");
        assert_eq!(dlq.consumer_group, "qms_data_updater_dlq");
        assert!(dlq.consumer_id.starts_with("dlq-"));
    }
}
