//! QMS Data Updater
//!
//! Consumes QMS events from a Redis stream and applies them to PostgreSQL.
//!
//! ## Architecture
//!
//! ```text
//! Redis Stream (qms:events)
//!   ↓ (Consumer Group: qms_data_updater)
//! MessageWorker → MessageProcessor<QmsEvent>
//!   ↓ (routing key → handler, one transaction per message)
//! PgCertificateStore
//!   ↓
//! PostgreSQL
//!
//! dead-lettered messages → qms:events:dlq → DlqDrain (log + ack)
//! ```
//!
//! Every message ends in exactly one of complete, abandon (redelivered with an incremented
//! delivery count) or dead-letter.

use async_trait::async_trait;
use axum::Router;
use core_config::{ConfigError, Environment, FromEnv, env_parse, server::ServerConfig};
use database::{
    postgres::{self, DatabaseConnection, PostgresConfig, connect_from_config_with_retry},
    redis::RedisConfig,
};
use domain_certificates::{PgCertificateStore, USER_CERTIFICATES_DDL};
use eyre::{Result, WrapErr};
use message_processor::{
    DlqDrain, HealthState, MessageProcessor, MessageWorker, ProcessorConfig, ProcessorMetrics,
    ReadinessCheck, StreamConsumer, WorkerConfig, health_router, init_metrics,
};
use sea_orm::ConnectionTrait;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

const APP_NAME: &str = env!("CARGO_PKG_NAME");
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service switches that are not owned by a library config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// `DB_APPLY_SCHEMA` (default false): create missing tables at startup.
    pub apply_schema: bool,
    /// `DLQ_DRAIN_ENABLED` (default true): run the dead-letter drain next to the worker.
    pub dlq_drain_enabled: bool,
}

impl FromEnv for AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            apply_schema: env_parse("DB_APPLY_SCHEMA", false)?,
            dlq_drain_enabled: env_parse("DLQ_DRAIN_ENABLED", true)?,
        })
    }
}

/// `/ready` probe for the certificate store.
struct PostgresReadiness {
    db: DatabaseConnection,
}

#[async_trait]
impl ReadinessCheck for PostgresReadiness {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn check(&self) -> Result<(), String> {
        postgres::check_health(&self.db)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Start the health and metrics HTTP server
///
/// - Liveness: `/health`, `/healthz`
/// - Readiness: `/ready`, `/readyz` (Redis and PostgreSQL)
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, config: ServerConfig) -> Result<()> {
    let app: Router = health_router(health_state);

    let addr = config.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(address = %addr, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

async fn apply_schema(db: &DatabaseConnection) -> Result<()> {
    db.execute_unprepared(USER_CERTIFICATES_DDL)
        .await
        .wrap_err("Failed to apply user_certificates schema")?;
    info!("Database schema applied");
    Ok(())
}

/// Run the data updater
///
/// 1. Sets up color-eyre, structured logging and Prometheus metrics
/// 2. Loads configuration from the environment
/// 3. Connects to PostgreSQL and Redis with retry
/// 4. Runs the message worker (and the DLQ drain) until SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if configuration is invalid, a connection cannot be established, or
/// the worker stops on a fatal transport error.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    init_metrics();

    info!(name = APP_NAME, version = APP_VERSION, "Starting QMS data updater");

    let app_config = AppConfig::from_env().wrap_err("Failed to load service configuration")?;
    let server_config = ServerConfig::from_env().wrap_err("Failed to load health server configuration")?;
    let processor_config =
        ProcessorConfig::from_env().wrap_err("Failed to load processor configuration")?;
    let worker_config = WorkerConfig::from_env().wrap_err("Failed to load worker configuration")?;

    info!(
        stream = %worker_config.stream_name,
        consumer_group = %worker_config.consumer_group,
        consumer_id = %worker_config.consumer_id,
        dlq_stream = %worker_config.dlq_stream,
        batch_size = worker_config.batch_size,
        block_timeout_ms = ?worker_config.block_timeout_ms,
        max_concurrent_messages = worker_config.max_concurrent_messages,
        routing_key_property = %processor_config.routing_key_property,
        max_delivery_count = processor_config.max_delivery_count,
        "Worker configuration loaded"
    );

    let pg_config =
        PostgresConfig::from_env().wrap_err("Failed to load PostgreSQL configuration")?;
    info!("Connecting to PostgreSQL...");
    let db = connect_from_config_with_retry(pg_config, None)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;
    info!("Connected to PostgreSQL successfully");

    if app_config.apply_schema {
        apply_schema(&db).await?;
    }

    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    info!("Connecting to Redis...");
    let redis = database::redis::connect_from_config_with_retry(&redis_config, None)
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis successfully");

    let store = Arc::new(PgCertificateStore::new(db.clone()));
    let registry =
        Arc::new(domain_certificates::registry(store).wrap_err("Failed to build event registry")?);
    info!(event_types = ?registry.event_types(), "Event registry built");

    let processor = Arc::new(
        MessageProcessor::new(registry, processor_config)
            .with_metrics(ProcessorMetrics::new(worker_config.stream_name.clone())),
    );

    let consumer = StreamConsumer::new(redis.clone(), worker_config.clone());
    consumer
        .ensure_consumer_group()
        .await
        .wrap_err("Failed to create consumer group")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    let health_state = HealthState::new(redis.clone(), APP_NAME, APP_VERSION)
        .with_check(PostgresReadiness { db });
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, server_config).await {
            error!(error = %e, "Health server failed");
        }
    });

    let dlq_task = if app_config.dlq_drain_enabled {
        let drain = DlqDrain::new(StreamConsumer::new(redis.clone(), worker_config.for_dlq()));
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { drain.run(rx).await }))
    } else {
        warn!("DLQ drain disabled; dead-lettered messages accumulate on the DLQ stream");
        None
    };

    info!("Starting message worker...");
    let worker = MessageWorker::new(consumer, processor);
    let result = worker.run(shutdown_rx).await;

    if let Some(task) = dlq_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "DLQ drain stopped with an error"),
            Err(e) => error!(error = %e, "DLQ drain task failed"),
        }
    }

    result.wrap_err("Message worker failed")?;
    info!("QMS data updater stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
