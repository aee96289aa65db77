//! Types shared by every backend.

pub mod error;
pub mod retry;
pub mod unit_of_work;

pub use error::DatabaseError;
pub use retry::{RetryConfig, retry_with_backoff};
pub use unit_of_work::{StoreError, StoreErrorKind, TransactionScope, UnitOfWork};
