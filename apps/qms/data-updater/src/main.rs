//! QMS Data Updater - Entry Point
//!
//! Applies QMS events from the Redis stream to the Postgres store.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    qms_data_updater::run().await
}
