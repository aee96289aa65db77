use redis::aio::ConnectionManager;
use tracing::debug;

use crate::common::DatabaseError;

const BACKEND: &str = "redis";

/// `PING` the stream transport. Backs the worker's `/ready` endpoint.
pub async fn check_health(conn: &mut ConnectionManager) -> Result<(), DatabaseError> {
    let response: String = redis::cmd("PING")
        .query_async(conn)
        .await
        .map_err(|e| DatabaseError::unreachable(BACKEND, e))?;

    if response != "PONG" {
        return Err(DatabaseError::UnexpectedResponse {
            backend: BACKEND,
            response,
        });
    }

    debug!("Redis probe answered");
    Ok(())
}
