use async_trait::async_trait;
use chrono::{DateTime, Utc};
use database::{StoreError, UnitOfWork};
use uuid::Uuid;

use crate::models::{NewUserCertificate, UserCertificate};

/// SQLSTATE `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Another transaction recorded a latest copy of (user, certificate) after this one
/// started. Retrying re-reads the table and supersedes that copy.
pub fn latest_conflict(user_guid: Uuid, certificate_guid: Uuid) -> StoreError {
    StoreError::concurrency_conflict(format!(
        "a latest copy of certificate {certificate_guid} for user {user_guid} was recorded concurrently"
    ))
    .with_code(UNIQUE_VIOLATION)
}

/// Persistence for user certificates.
///
/// Every operation runs inside a transaction handed out by the store's own
/// [`UnitOfWork`]; nothing is visible to other readers until that transaction commits.
/// At most one live row per (user, certificate) is marked latest; an insert that would
/// break this because of a concurrent writer fails with [`latest_conflict`].
#[async_trait]
pub trait CertificateStore: UnitOfWork {
    /// A live row, latest or superseded, that already records `new`. The latest one wins
    /// when several match.
    async fn find_recorded(
        &self,
        tx: &mut Self::Transaction,
        new: &NewUserCertificate,
    ) -> Result<Option<UserCertificate>, StoreError>;

    /// Unmark every live latest row for (user, certificate). Returns the number of rows changed.
    async fn clear_latest(
        &self,
        tx: &mut Self::Transaction,
        user_guid: Uuid,
        certificate_guid: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn insert(
        &self,
        tx: &mut Self::Transaction,
        row: UserCertificate,
    ) -> Result<UserCertificate, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use database::StoreErrorKind;

    #[test]
    fn test_latest_conflict_is_a_concurrency_conflict() {
        let certificate = Uuid::new_v4();
        let err = latest_conflict(Uuid::new_v4(), certificate);

        assert_eq!(err.kind(), StoreErrorKind::ConcurrencyConflict);
        assert_eq!(err.code(), Some(UNIQUE_VIOLATION));
        assert!(err.message().contains(&certificate.to_string()));
    }
}
