//! Shared test utilities
//!
//! This crate provides reusable test infrastructure:
//! - `TestDatabase`: PostgreSQL container with automatic cleanup (feature: "postgres")
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: Deterministic test data generation (always available)
//!
//! # Features
//!
//! - `postgres` (default): Enables PostgreSQL test infrastructure
//! - `redis`: Enables Redis test infrastructure
//! - `all`: Enables all of the above
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::{TestDatabase, TestDataBuilder};
//!
//! #[tokio::test]
//! #[ignore] // Requires Docker
//! async fn my_postgres_test() {
//!     let db = TestDatabase::with_schema(MY_DDL).await;
//!     let builder = TestDataBuilder::from_test_name("my_postgres_test");
//!
//!     let user_id = builder.user_id();
//!     let certificate_id = builder.uuid("certificate");
//! }
//! ```
//!
//! Redis containers need `features = ["redis"]` on the dev-dependency:
//!
//! ```rust,ignore
//! let redis = TestRedis::new().await;
//! let producer = StreamProducer::new(redis.connection(), "qms:events");
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

// Conditionally compile database modules based on features
#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "redis")]
mod redis;

// Re-export based on enabled features
#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Deterministic identifiers and names derived from a seed.
///
/// Seed it from the test name so every run of a test sees the same ids, while different
/// tests sharing one container do not collide.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_insert_and_find_latest");
    /// assert_eq!(builder.user_id(), builder.uuid("user"));
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        Self::new(hash_of(&name))
    }

    pub fn user_id(&self) -> Uuid {
        self.uuid("user")
    }

    /// UUID for a named role within the test (e.g. "certificate").
    ///
    /// The same role always gives the same UUID; distinct roles give distinct ones.
    pub fn uuid(&self, role: &str) -> Uuid {
        let high = hash_of(&(self.seed, role));
        let low = hash_of(&(role, self.seed, high));

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&high.to_le_bytes());
        bytes[8..].copy_from_slice(&low.to_le_bytes());
        Uuid::from_bytes(bytes)
    }

    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let name = TestDataBuilder::new(7).name("certificate", "main");
    /// assert_eq!(name, "test-certificate-7-main");
    /// ```
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
