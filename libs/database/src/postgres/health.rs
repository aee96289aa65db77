use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement};
use tracing::debug;

use crate::common::DatabaseError;

/// `SELECT 1` against the pool. Backs the worker's `/ready` endpoint.
pub async fn check_health(db: &DatabaseConnection) -> Result<(), DatabaseError> {
    let probe = Statement::from_string(DatabaseBackend::Postgres, "SELECT 1".to_owned());
    db.query_one_raw(probe)
        .await
        .map_err(|e| DatabaseError::unreachable("postgres", e))?;

    debug!("PostgreSQL probe answered");
    Ok(())
}
