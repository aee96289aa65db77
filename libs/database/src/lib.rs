//! Storage plumbing for the QMS data updater.
//!
//! - [`common::UnitOfWork`] / [`common::TransactionScope`]: the transactional surface handlers
//!   mutate through. Store failures surface as [`common::StoreError`], carrying the vendor
//!   error code used for retry classification.
//! - [`postgres`]: SeaORM connection pool, health probe and the Postgres unit of work.
//! - [`redis`]: connection manager for the stream transport.
//!
//! # Features
//!
//! - `postgres` (default) - PostgreSQL support with SeaORM
//! - `redis` (default) - Redis support
//! - `config` - `core_config::FromEnv` implementations for the connection configs
//!
//! ```ignore
//! use database::common::TransactionScope;
//! use database::postgres::{self, PostgresUnitOfWork};
//!
//! let db = postgres::connect(&url).await?;
//! let uow = PostgresUnitOfWork::new(db);
//! let scope = TransactionScope::begin(&uow).await?;
//! // ... mutate through scope.transaction()
//! scope.commit().await?;
//! ```

pub mod common;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis;

pub use common::{DatabaseError, StoreError, StoreErrorKind, TransactionScope, UnitOfWork};
