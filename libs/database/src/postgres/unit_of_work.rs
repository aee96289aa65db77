use async_trait::async_trait;
use sea_orm::{
    ConnAcquireErr, DatabaseConnection, DatabaseTransaction, DbErr, RuntimeErr, SqlxError,
    TransactionTrait,
};

use crate::common::{StoreError, StoreErrorKind, UnitOfWork};

/// Unit of work over a SeaORM pool. `DatabaseTransaction` rolls back when dropped
/// uncommitted, which gives [`crate::common::TransactionScope`] its drop semantics.
#[derive(Clone, Debug)]
pub struct PostgresUnitOfWork {
    db: DatabaseConnection,
}

impl PostgresUnitOfWork {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    type Transaction = DatabaseTransaction;

    async fn begin(&self) -> Result<DatabaseTransaction, StoreError> {
        Ok(self.db.begin().await?)
    }

    async fn commit(&self, tx: DatabaseTransaction) -> Result<(), StoreError> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: DatabaseTransaction) -> Result<(), StoreError> {
        Ok(tx.rollback().await?)
    }
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        let message = err.to_string();
        let converted = match &err {
            DbErr::ConnectionAcquire(ConnAcquireErr::Timeout) => StoreError::timeout(message),
            DbErr::ConnectionAcquire(_) => StoreError::new(StoreErrorKind::Connection, message),
            DbErr::RecordNotUpdated => StoreError::concurrency_conflict(message),
            DbErr::Conn(RuntimeErr::SqlxError(e))
            | DbErr::Exec(RuntimeErr::SqlxError(e))
            | DbErr::Query(RuntimeErr::SqlxError(e)) => from_sqlx(e, message),
            DbErr::Conn(_) => StoreError::new(StoreErrorKind::Connection, message),
            _ => StoreError::new(StoreErrorKind::Other, message),
        };
        converted.with_source_type(std::any::type_name::<DbErr>())
    }
}

fn from_sqlx(err: &SqlxError, message: String) -> StoreError {
    match err {
        SqlxError::PoolTimedOut => StoreError::timeout(message),
        SqlxError::PoolClosed | SqlxError::Io(_) | SqlxError::Tls(_) => {
            StoreError::new(StoreErrorKind::Connection, message)
        }
        // SQLSTATE, e.g. 40001 serialization_failure or 40P01 deadlock_detected
        SqlxError::Database(db) => {
            let converted = match db.code() {
                Some(code) => StoreError::database(code.into_owned(), message),
                None => StoreError::new(StoreErrorKind::Database, message),
            };
            match db.constraint() {
                Some(constraint) => converted.with_constraint(constraint),
                None => converted,
            }
        }
        _ => StoreError::new(StoreErrorKind::Other, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TransactionScope;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[test]
    fn test_acquire_timeout_maps_to_timeout() {
        let err = StoreError::from(DbErr::ConnectionAcquire(ConnAcquireErr::Timeout));
        assert_eq!(err.kind(), StoreErrorKind::Timeout);
        assert!(err.source_type().contains("DbErr"));
    }

    #[test]
    fn test_pool_timeout_maps_to_timeout() {
        let err = StoreError::from(DbErr::Query(RuntimeErr::SqlxError(
            SqlxError::PoolTimedOut.into(),
        )));
        assert_eq!(err.kind(), StoreErrorKind::Timeout);
    }

    #[test]
    fn test_record_not_updated_maps_to_concurrency_conflict() {
        let err = StoreError::from(DbErr::RecordNotUpdated);
        assert_eq!(err.kind(), StoreErrorKind::ConcurrencyConflict);
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_pool_closed_maps_to_connection() {
        let err = StoreError::from(DbErr::Exec(RuntimeErr::SqlxError(
            SqlxError::PoolClosed.into(),
        )));
        assert_eq!(err.kind(), StoreErrorKind::Connection);
    }

    #[test]
    fn test_custom_error_maps_to_other() {
        let err = StoreError::from(DbErr::Custom("column mismatch".to_string()));
        assert_eq!(err.kind(), StoreErrorKind::Other);
        assert!(err.message().contains("column mismatch"));
    }

    #[tokio::test]
    async fn test_scope_commits_on_mock_connection() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let uow = PostgresUnitOfWork::new(db);

        let scope = TransactionScope::begin(&uow).await.unwrap();
        scope.commit().await.unwrap();
    }
}
