use async_trait::async_trait;
use chrono::Utc;
use database::{StoreError, TransactionScope};
use message_processor::{EventHandler, HandlerError, OperationResult};
use std::sync::Arc;
use tracing::{info, warn};

use crate::events::UserCertificateCreated;
use crate::models::{NewUserCertificate, UserCertificate};
use crate::store::CertificateStore;

enum Applied {
    Inserted { row: UserCertificate, superseded: u64 },
    AlreadyRecorded(UserCertificate),
}

/// Records a newly issued certificate as the user's latest copy.
///
/// All writes happen in one transaction. A redelivered event that some live row already
/// records, whether still latest or superseded since, is acknowledged without writing again.
/// Losing a race with a concurrent writer for the same certificate surfaces as a
/// concurrency conflict so the message is retried.
pub struct UserCertificateCreateHandler<S> {
    store: Arc<S>,
}

impl<S: CertificateStore> UserCertificateCreateHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn apply(
        &self,
        tx: &mut S::Transaction,
        new: NewUserCertificate,
    ) -> Result<Applied, StoreError> {
        if let Some(existing) = self.store.find_recorded(tx, &new).await? {
            return Ok(Applied::AlreadyRecorded(existing));
        }

        let now = Utc::now();
        let superseded = self
            .store
            .clear_latest(tx, new.user_guid, new.certificate_guid, now)
            .await?;
        let row = self.store.insert(tx, new.into_latest(now)).await?;

        Ok(Applied::Inserted { row, superseded })
    }
}

#[async_trait]
impl<S: CertificateStore + 'static> EventHandler<UserCertificateCreated>
    for UserCertificateCreateHandler<S>
{
    async fn handle(&self, event: UserCertificateCreated) -> Result<OperationResult, HandlerError> {
        let new = match NewUserCertificate::try_from(&event) {
            Ok(new) => new,
            Err(e) => {
                warn!(
                    user_id = %event.user_id,
                    certificate_id = %event.certificate_id,
                    error = %e,
                    "Rejected user certificate"
                );
                return Ok(OperationResult::rejected(e.to_string(), 400));
            }
        };

        let mut scope = TransactionScope::begin(self.store.as_ref()).await?;

        match self.apply(scope.transaction_mut(), new).await {
            Ok(Applied::Inserted { row, superseded }) => {
                scope.commit().await?;
                info!(
                    user_certificate_guid = %row.user_certificate_guid,
                    user_guid = %row.user_guid,
                    certificate_guid = %row.certificate_guid,
                    superseded,
                    "Recorded user certificate"
                );
                Ok(with_row(OperationResult::success("All updates succeeded"), &row))
            }
            Ok(Applied::AlreadyRecorded(row)) => {
                if let Err(e) = scope.rollback().await {
                    warn!(error = %e, "Rollback of read-only transaction failed");
                }
                info!(
                    user_certificate_guid = %row.user_certificate_guid,
                    is_latest = row.is_latest,
                    "User certificate already recorded"
                );
                Ok(with_row(
                    OperationResult::success("User certificate already recorded"),
                    &row,
                ))
            }
            Err(e) => {
                if let Err(rollback) = scope.rollback().await {
                    warn!(error = %rollback, "Rollback failed; transaction discarded");
                }
                Err(HandlerError::Store(e))
            }
        }
    }

    fn name(&self) -> &'static str {
        "UserCertificateCreateHandler"
    }
}

fn with_row(result: OperationResult, row: &UserCertificate) -> OperationResult {
    match serde_json::to_value(row) {
        Ok(data) => result.with_data(data),
        Err(_) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FaultPoint, InMemoryCertificateStore};
    use crate::store::latest_conflict;
    use database::StoreErrorKind;

    const USER: &str = "0b8f6f3e-8f0e-4d4b-9d7a-111111111111";
    const CERT: &str = "7c1e2d3f-1a2b-4c5d-8e9f-222222222222";

    fn event(name: &str) -> UserCertificateCreated {
        UserCertificateCreated {
            user_id: USER.into(),
            certificate_id: CERT.into(),
            certificate_name: name.into(),
            certificate_type: "Safety".into(),
        }
    }

    fn handler() -> (Arc<InMemoryCertificateStore>, UserCertificateCreateHandler<InMemoryCertificateStore>) {
        let store = Arc::new(InMemoryCertificateStore::new());
        (store.clone(), UserCertificateCreateHandler::new(store))
    }

    #[tokio::test]
    async fn test_creates_latest_row() {
        let (store, handler) = handler();

        let result = handler.handle(event("Forklift")).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.message(), "All updates succeeded");
        assert_eq!(store.commits(), 1);
        assert_eq!(store.rollbacks(), 0);
        let latest = store.latest_rows();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].certificate_name, "Forklift");
        assert!(result.data().is_some());
    }

    #[tokio::test]
    async fn test_new_name_supersedes_previous_latest() {
        let (store, handler) = handler();

        handler.handle(event("Forklift")).await.unwrap();
        handler.handle(event("Forklift Level 2")).await.unwrap();

        assert_eq!(store.rows().len(), 2);
        let latest = store.latest_rows();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].certificate_name, "Forklift Level 2");
    }

    #[tokio::test]
    async fn test_redelivery_is_not_recorded_twice() {
        let (store, handler) = handler();

        handler.handle(event("Forklift")).await.unwrap();
        let result = handler.handle(event("Forklift")).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.message(), "User certificate already recorded");
        assert_eq!(store.rows().len(), 1);
        assert_eq!(store.commits(), 1);
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_after_newer_copy_does_not_supersede_it() {
        let (store, handler) = handler();

        handler.handle(event("Forklift")).await.unwrap();
        handler.handle(event("Forklift Level 2")).await.unwrap();
        let result = handler.handle(event("Forklift")).await.unwrap();

        assert_eq!(result.message(), "User certificate already recorded");
        assert_eq!(store.rows().len(), 2);
        let latest = store.latest_rows();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].certificate_name, "Forklift Level 2");
    }

    #[tokio::test]
    async fn test_writer_committing_after_handler_loses_with_conflict() {
        let (store, handler) = handler();
        let new = NewUserCertificate::try_from(&event("Forklift")).unwrap();
        let mut other = TransactionScope::begin(store.as_ref()).await.unwrap();
        store
            .insert(other.transaction_mut(), new.into_latest(Utc::now()))
            .await
            .unwrap();

        let result = handler.handle(event("Forklift Level 2")).await.unwrap();
        let err = other.commit().await.unwrap_err();

        assert!(result.is_success());
        assert_eq!(err.kind(), StoreErrorKind::ConcurrencyConflict);
        let latest = store.latest_rows();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].certificate_name, "Forklift Level 2");
    }

    #[tokio::test]
    async fn test_insert_conflict_rolls_back_and_surfaces() {
        let (store, handler) = handler();
        let new = NewUserCertificate::try_from(&event("Forklift")).unwrap();
        store.fail_once(
            FaultPoint::Insert,
            latest_conflict(new.user_guid, new.certificate_guid),
        );

        let err = handler.handle(event("Forklift")).await.unwrap_err();

        assert!(matches!(err, HandlerError::Store(ref e) if e.kind() == StoreErrorKind::ConcurrencyConflict));
        assert_eq!(store.rollbacks(), 1);
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_id_is_rejected_without_transaction() {
        let (store, handler) = handler();
        let mut bad = event("Forklift");
        bad.user_id = "nope".into();

        let result = handler.handle(bad).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.status_code(), 400);
        assert!(result.cause().is_none());
        assert_eq!(store.begins(), 0);
    }

    #[tokio::test]
    async fn test_insert_fault_rolls_back() {
        let (store, handler) = handler();
        store.fail_once(FaultPoint::Insert, StoreError::database("40P01", "deadlock detected"));

        let err = handler.handle(event("Forklift")).await.unwrap_err();

        match err {
            HandlerError::Store(e) => assert_eq!(e.code(), Some("40P01")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.rollbacks(), 1);
        assert_eq!(store.commits(), 0);
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_commit_fault_surfaces_as_store_error() {
        let (store, handler) = handler();
        store.fail_once(FaultPoint::Commit, StoreError::database("1205", "deadlock victim"));

        let err = handler.handle(event("Forklift")).await.unwrap_err();

        assert!(matches!(err, HandlerError::Store(ref e) if e.code() == Some("1205")));
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_begin_fault_surfaces_as_store_error() {
        let (store, handler) = handler();
        store.fail_once(FaultPoint::Begin, StoreError::timeout("pool exhausted"));

        let err = handler.handle(event("Forklift")).await.unwrap_err();

        assert!(matches!(err, HandlerError::Store(_)));
        assert_eq!(store.rollbacks(), 0);
    }
}
