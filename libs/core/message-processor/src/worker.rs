//! Worker loop: read → process with bounded concurrency → repeat until shutdown.

use crate::consumer::StreamConsumer;
use crate::error::TransportError;
use crate::message::InboundMessage;
use crate::metrics::ProcessorMetrics;
use crate::processor::MessageProcessor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SECS: u64 = 30;

/// Exponential backoff after `consecutive_errors` failed reads, capped at 30s.
pub fn backoff_delay(consecutive_errors: u32) -> Duration {
    let secs = 2u64.saturating_pow(consecutive_errors.min(5));
    Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
}

pub struct MessageWorker<E> {
    consumer: StreamConsumer,
    processor: Arc<MessageProcessor<E>>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    metrics: ProcessorMetrics,
}

impl<E: Send + 'static> MessageWorker<E> {
    pub fn new(consumer: StreamConsumer, processor: Arc<MessageProcessor<E>>) -> Self {
        let config = consumer.config();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_messages));
        let metrics = ProcessorMetrics::new(config.stream_name.clone());
        Self {
            consumer,
            processor,
            semaphore,
            in_flight: Arc::new(AtomicUsize::new(0)),
            metrics,
        }
    }

    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }

    /// Run until `shutdown` reads `true`.
    ///
    /// Handlers still running at shutdown are cancelled and their messages abandoned before
    /// this returns.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        let config = self.consumer.config();
        info!(
            consumer_id = %config.consumer_id,
            stream = %config.stream_name,
            group = %config.consumer_group,
            dlq = %config.dlq_stream,
            event_types = ?self.processor.registry().event_types(),
            max_concurrent_messages = config.max_concurrent_messages,
            "Starting message worker"
        );

        self.consumer.ensure_consumer_group().await?;

        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        let claim_interval = Duration::from_millis(config.claim_idle_ms.max(1000) / 2);
        let mut last_claim = Instant::now();
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            let batch = self.consumer.read_new().await;
            let received = match batch {
                Ok(messages) => {
                    if consecutive_errors > 0 {
                        info!(consecutive_errors, "Connection recovered");
                        consecutive_errors = 0;
                    }
                    let count = messages.len();
                    self.process_batch(messages, &shutdown).await;
                    count
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let delay = if e.is_nogroup_error() {
                        warn!("Consumer group missing, recreating");
                        if let Err(create_err) = self.consumer.ensure_consumer_group().await {
                            error!(error = %create_err, "Failed to recreate consumer group");
                        }
                        Duration::from_secs(1)
                    } else if e.is_connection_error() {
                        let delay = backoff_delay(consecutive_errors);
                        warn!(
                            error = %e,
                            consecutive_errors,
                            backoff_secs = delay.as_secs(),
                            "Redis connection error, backing off"
                        );
                        delay
                    } else {
                        error!(error = %e, "Failed to read from stream");
                        Duration::from_secs(1)
                    };

                    if sleep_or_shutdown(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if last_claim.elapsed() >= claim_interval {
                match self.consumer.claim_idle().await {
                    Ok(claimed) if !claimed.is_empty() => {
                        self.metrics.messages_reclaimed(claimed.len());
                        self.process_batch(claimed, &shutdown).await;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "Failed to claim idle messages"),
                }
                last_claim = Instant::now();
            }

            if received == 0
                && !self.consumer.is_blocking()
                && sleep_or_shutdown(poll_interval, &mut shutdown).await
            {
                break;
            }
        }

        info!("Message worker stopped");
        Ok(())
    }

    /// Process a batch concurrently (bounded by the semaphore) and wait for all of it.
    async fn process_batch(&self, messages: Vec<InboundMessage>, shutdown: &watch::Receiver<bool>) {
        if messages.is_empty() {
            return;
        }
        debug!(count = messages.len(), "Processing batch");

        let mut tasks = JoinSet::new();
        for message in messages {
            let semaphore = Arc::clone(&self.semaphore);
            let processor = Arc::clone(&self.processor);
            let consumer = self.consumer.clone();
            let in_flight = Arc::clone(&self.in_flight);
            let metrics = self.metrics.clone();
            let shutdown = shutdown.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                metrics.in_flight(in_flight.fetch_add(1, Ordering::SeqCst) + 1);

                // Failures are logged and counted by the processor; the entry stays pending
                // and is reclaimed later.
                let _ = processor.process(&message, &consumer, shutdown).await;

                metrics.in_flight(in_flight.fetch_sub(1, Ordering::SeqCst) - 1);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Message task failed");
            }
        }
    }
}

/// Sleep for `delay`; returns `true` if shutdown was requested meanwhile.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = tokio::time::sleep(delay) => false,
    }
}
