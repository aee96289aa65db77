//! Redis fixture for the stream transport tests.

use redis::Client;
use redis::aio::ConnectionManager;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// A throwaway Redis 8 container. Removed when dropped.
///
/// ```no_run
/// use test_utils::TestRedis;
///
/// # async fn example() {
/// let redis = TestRedis::new().await;
/// let conn = redis.connection();
/// # }
/// ```
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    connection: ConnectionManager,
    connection_string: String,
}

impl TestRedis {
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag("8-alpine")
            .start()
            .await
            .expect("Failed to start Redis container");

        let host_port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");
        let connection_string = format!("redis://127.0.0.1:{}", host_port);

        let client = Client::open(connection_string.as_str()).expect("Invalid Redis URL");
        let connection = ConnectionManager::new(client)
            .await
            .expect("Failed to connect to Redis");

        tracing::info!(port = host_port, "Test Redis ready");

        Self {
            _container: container,
            connection,
            connection_string,
        }
    }

    /// A clone of the shared connection manager, for consumers and producers.
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Entries delivered to `group` on `stream` and not yet acknowledged.
    pub async fn pending_count(&self, stream: &str, group: &str) -> u64 {
        let mut conn = self.connection();
        let summary: (u64, Option<String>, Option<String>, Option<Vec<(String, String)>>) =
            redis::cmd("XPENDING")
                .arg(stream)
                .arg(group)
                .query_async(&mut conn)
                .await
                .expect("XPENDING failed");
        summary.0
    }

    pub async fn stream_len(&self, stream: &str) -> u64 {
        let mut conn = self.connection();
        redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .expect("XLEN failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_stream_helpers() {
        let redis = TestRedis::new().await;
        let mut conn = redis.connection();

        let _: String = redis::cmd("XADD")
            .arg("probe:stream")
            .arg("*")
            .arg("body")
            .arg("{}")
            .query_async(&mut conn)
            .await
            .unwrap();
        let _: () = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg("probe:stream")
            .arg("probe")
            .arg("0")
            .query_async(&mut conn)
            .await
            .unwrap();

        assert_eq!(redis.stream_len("probe:stream").await, 1);
        assert_eq!(redis.pending_count("probe:stream", "probe").await, 0);
        assert!(redis.connection_string().starts_with("redis://"));
    }
}
