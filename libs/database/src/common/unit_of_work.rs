//! Transactional unit of work shared by every handler that mutates the store.
//!
//! A [`UnitOfWork`] hands out transactions; a [`TransactionScope`] owns one of them for the
//! duration of a single handler invocation. The scope is consumed by exactly one of
//! [`TransactionScope::commit`] or [`TransactionScope::rollback`]. If it is dropped instead
//! (early return, `?`, a cancelled future) the transaction is dropped with it, and every
//! implementation must discard uncommitted writes on drop.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Broad category of a store failure.
///
/// Retry decisions are made by the caller from the kind and the vendor [`StoreError::code`];
/// the kind alone only captures failures that are not identified by a database error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// Optimistic concurrency check failed (row changed or vanished underneath us).
    ConcurrencyConflict,
    /// Connection acquisition or statement timeout.
    Timeout,
    /// The surrounding operation was cancelled before the transaction finished.
    Cancelled,
    /// Connection could not be established or was lost.
    Connection,
    /// The database rejected a statement; see [`StoreError::code`].
    Database,
    /// Anything else (mapping errors, driver bugs, ...).
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreErrorKind::ConcurrencyConflict => "concurrency_conflict",
            StoreErrorKind::Timeout => "timeout",
            StoreErrorKind::Cancelled => "cancelled",
            StoreErrorKind::Connection => "connection",
            StoreErrorKind::Database => "database",
            StoreErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Infrastructure failure raised by a store or its transaction.
#[derive(Debug, Clone, Error)]
#[error("{kind} store error{}: {message}", code_suffix(.code))]
pub struct StoreError {
    kind: StoreErrorKind,
    code: Option<String>,
    constraint: Option<String>,
    source_type: String,
    message: String,
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" [{}]", c))
        .unwrap_or_default()
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            constraint: None,
            source_type: std::any::type_name::<Self>().to_string(),
            message: message.into(),
        }
    }

    /// Error reported by the database with a vendor error code
    /// (SQLSTATE for Postgres, error number for SQL Server).
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Database, message).with_code(code)
    }

    pub fn concurrency_conflict(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::ConcurrencyConflict, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(
            StoreErrorKind::Cancelled,
            "operation cancelled before the transaction completed",
        )
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Name of the constraint the database reported as violated.
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    /// Record the concrete error type this failure was converted from.
    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = source_type.into();
        self
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Transactional store: `begin / commit / rollback`.
///
/// `Transaction` is the mutation surface handed to repositories. Dropping a transaction
/// without committing it must leave no observable writes behind.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Transaction: Send;

    async fn begin(&self) -> Result<Self::Transaction, StoreError>;

    async fn commit(&self, tx: Self::Transaction) -> Result<(), StoreError>;

    async fn rollback(&self, tx: Self::Transaction) -> Result<(), StoreError>;
}

/// A transaction bound to the unit of work that created it.
pub struct TransactionScope<'a, U: UnitOfWork + ?Sized> {
    uow: &'a U,
    tx: U::Transaction,
}

impl<'a, U: UnitOfWork + ?Sized> TransactionScope<'a, U> {
    /// Acquire a new transaction. Must happen before any mutation.
    pub async fn begin(uow: &'a U) -> Result<Self, StoreError> {
        let tx = uow.begin().await?;
        Ok(Self { uow, tx })
    }

    pub fn transaction(&self) -> &U::Transaction {
        &self.tx
    }

    pub fn transaction_mut(&mut self) -> &mut U::Transaction {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.uow.commit(self.tx).await
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.uow.rollback(self.tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Rows are staged in the transaction and only published on commit.
    #[derive(Default)]
    struct VecStore {
        rows: Arc<Mutex<Vec<u32>>>,
        commits: AtomicU32,
        rollbacks: AtomicU32,
    }

    #[async_trait]
    impl UnitOfWork for VecStore {
        type Transaction = Vec<u32>;

        async fn begin(&self) -> Result<Vec<u32>, StoreError> {
            Ok(Vec::new())
        }

        async fn commit(&self, tx: Vec<u32>) -> Result<(), StoreError> {
            self.rows.lock().unwrap().extend(tx);
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&self, _tx: Vec<u32>) -> Result<(), StoreError> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_staged_writes() {
        let store = VecStore::default();
        let mut scope = TransactionScope::begin(&store).await.unwrap();
        scope.transaction_mut().push(1);
        scope.transaction_mut().push(2);
        scope.commit().await.unwrap();

        assert_eq!(*store.rows.lock().unwrap(), vec![1, 2]);
        assert_eq!(store.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = VecStore::default();
        let mut scope = TransactionScope::begin(&store).await.unwrap();
        scope.transaction_mut().push(1);
        scope.rollback().await.unwrap();

        assert!(store.rows.lock().unwrap().is_empty());
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_scope_leaves_no_writes() {
        let store = VecStore::default();
        {
            let mut scope = TransactionScope::begin(&store).await.unwrap();
            scope.transaction_mut().push(42);
        }
        assert!(store.rows.lock().unwrap().is_empty());
        assert_eq!(store.commits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_store_error_display_includes_code() {
        let err = StoreError::database("1205", "deadlock victim");
        assert_eq!(err.to_string(), "database store error [1205]: deadlock victim");
        assert_eq!(err.code(), Some("1205"));
        assert_eq!(err.kind(), StoreErrorKind::Database);
    }

    #[test]
    fn test_store_error_keeps_violated_constraint() {
        let err = StoreError::database("23505", "duplicate key value");
        assert_eq!(err.constraint(), None);

        let err = err.with_constraint("ux_orders_latest");
        assert_eq!(err.constraint(), Some("ux_orders_latest"));
        assert_eq!(err.code(), Some("23505"));
    }

    #[test]
    fn test_store_error_source_type_defaults_to_self() {
        let err = StoreError::timeout("pool exhausted");
        assert!(err.source_type().ends_with("StoreError"));
        let err = err.with_source_type("sea_orm::error::DbErr");
        assert_eq!(err.source_type(), "sea_orm::error::DbErr");
    }
}
